// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Conversions from RHI types to `ash` Vulkan types.

use super::driver::VkAttachmentKey;
use ash::vk;
use prism_core::rhi::{
    BlendFactor, BlendOp, BlendState, BufferUsage, CompareFunction, CullMode, Format, FrontFace,
    IndexFormat, LoadOp, PrimitiveTopology, ShaderStages, StoreOp, TextureDesc, TextureKind,
    TextureUsage, VertexFormat, VertexLayout, VertexStepMode,
};

/// A local extension trait converting RHI types into Vulkan values.
pub trait IntoVk<T> {
    /// Consumes self and converts it into its Vulkan counterpart.
    fn into_vk(self) -> T;
}

impl IntoVk<vk::Format> for Format {
    fn into_vk(self) -> vk::Format {
        match self {
            Format::R8Unorm => vk::Format::R8_UNORM,
            Format::Rg8Unorm => vk::Format::R8G8_UNORM,
            Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            Format::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
            Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            Format::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
            Format::R16Float => vk::Format::R16_SFLOAT,
            Format::Rg16Float => vk::Format::R16G16_SFLOAT,
            Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
            Format::R32Float => vk::Format::R32_SFLOAT,
            Format::Rg32Float => vk::Format::R32G32_SFLOAT,
            Format::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
            Format::R32Uint => vk::Format::R32_UINT,
            Format::Depth16Unorm => vk::Format::D16_UNORM,
            Format::Depth24PlusStencil8 => vk::Format::D24_UNORM_S8_UINT,
            Format::Depth32Float => vk::Format::D32_SFLOAT,
        }
    }
}

impl IntoVk<vk::BufferUsageFlags> for BufferUsage {
    fn into_vk(self) -> vk::BufferUsageFlags {
        let mut flags = vk::BufferUsageFlags::empty();
        if self.contains(BufferUsage::VERTEX) {
            flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if self.contains(BufferUsage::INDEX) {
            flags |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if self.contains(BufferUsage::UNIFORM) {
            flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if self.contains(BufferUsage::STORAGE) {
            flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if self.contains(BufferUsage::COPY_SRC) {
            flags |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if self.contains(BufferUsage::COPY_DST) {
            flags |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        flags
    }
}

impl IntoVk<vk::ImageUsageFlags> for TextureUsage {
    fn into_vk(self) -> vk::ImageUsageFlags {
        let mut flags = vk::ImageUsageFlags::empty();
        if self.contains(TextureUsage::SAMPLED) {
            flags |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.contains(TextureUsage::RENDER_TARGET) {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if self.contains(TextureUsage::DEPTH_STENCIL) {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if self.contains(TextureUsage::STORAGE) {
            flags |= vk::ImageUsageFlags::STORAGE;
        }
        // Uploads go through a staging copy.
        if self.contains(TextureUsage::COPY_DST) || self.contains(TextureUsage::SAMPLED) {
            flags |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        if self.contains(TextureUsage::COPY_SRC) {
            flags |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        flags
    }
}

impl IntoVk<vk::IndexType> for IndexFormat {
    fn into_vk(self) -> vk::IndexType {
        match self {
            IndexFormat::Uint16 => vk::IndexType::UINT16,
            IndexFormat::Uint32 => vk::IndexType::UINT32,
        }
    }
}

impl IntoVk<vk::AttachmentLoadOp> for LoadOp {
    fn into_vk(self) -> vk::AttachmentLoadOp {
        match self {
            LoadOp::Load => vk::AttachmentLoadOp::LOAD,
            LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
            LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }
}

impl IntoVk<vk::AttachmentStoreOp> for StoreOp {
    fn into_vk(self) -> vk::AttachmentStoreOp {
        match self {
            StoreOp::Store => vk::AttachmentStoreOp::STORE,
            StoreOp::Discard => vk::AttachmentStoreOp::DONT_CARE,
        }
    }
}

/// Shader pipeline stages; an empty set means every shader stage.
impl IntoVk<vk::PipelineStageFlags> for ShaderStages {
    fn into_vk(self) -> vk::PipelineStageFlags {
        if self.is_empty() {
            return vk::PipelineStageFlags::VERTEX_SHADER
                | vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::COMPUTE_SHADER;
        }
        let mut flags = vk::PipelineStageFlags::empty();
        if self.contains(ShaderStages::VERTEX) {
            flags |= vk::PipelineStageFlags::VERTEX_SHADER;
        }
        if self.contains(ShaderStages::FRAGMENT) {
            flags |= vk::PipelineStageFlags::FRAGMENT_SHADER;
        }
        if self.contains(ShaderStages::COMPUTE) {
            flags |= vk::PipelineStageFlags::COMPUTE_SHADER;
        }
        flags
    }
}

/// Aspect mask of a whole image of `format`.
pub fn aspect_mask(format: Format) -> vk::ImageAspectFlags {
    match (format.is_depth(), format.has_stencil()) {
        (true, true) => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        (true, false) => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

impl IntoVk<vk::PrimitiveTopology> for PrimitiveTopology {
    fn into_vk(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
            PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
            PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        }
    }
}

impl IntoVk<vk::CullModeFlags> for CullMode {
    fn into_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

impl IntoVk<vk::FrontFace> for FrontFace {
    fn into_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::Ccw => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Cw => vk::FrontFace::CLOCKWISE,
        }
    }
}

impl IntoVk<vk::CompareOp> for CompareFunction {
    fn into_vk(self) -> vk::CompareOp {
        match self {
            CompareFunction::Never => vk::CompareOp::NEVER,
            CompareFunction::Less => vk::CompareOp::LESS,
            CompareFunction::Equal => vk::CompareOp::EQUAL,
            CompareFunction::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareFunction::Greater => vk::CompareOp::GREATER,
            CompareFunction::NotEqual => vk::CompareOp::NOT_EQUAL,
            CompareFunction::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
            CompareFunction::Always => vk::CompareOp::ALWAYS,
        }
    }
}

impl IntoVk<vk::BlendFactor> for BlendFactor {
    fn into_vk(self) -> vk::BlendFactor {
        match self {
            BlendFactor::Zero => vk::BlendFactor::ZERO,
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
            BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
            BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
            BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
            BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
            BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        }
    }
}

impl IntoVk<vk::BlendOp> for BlendOp {
    fn into_vk(self) -> vk::BlendOp {
        match self {
            BlendOp::Add => vk::BlendOp::ADD,
            BlendOp::Subtract => vk::BlendOp::SUBTRACT,
            BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
            BlendOp::Min => vk::BlendOp::MIN,
            BlendOp::Max => vk::BlendOp::MAX,
        }
    }
}

impl IntoVk<vk::Format> for VertexFormat {
    fn into_vk(self) -> vk::Format {
        match self {
            VertexFormat::Float32 => vk::Format::R32_SFLOAT,
            VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
            VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
            VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
            VertexFormat::Unorm8x4 => vk::Format::R8G8B8A8_UNORM,
            VertexFormat::Uint32 => vk::Format::R32_UINT,
        }
    }
}

impl IntoVk<vk::VertexInputRate> for VertexStepMode {
    fn into_vk(self) -> vk::VertexInputRate {
        match self {
            VertexStepMode::Vertex => vk::VertexInputRate::VERTEX,
            VertexStepMode::Instance => vk::VertexInputRate::INSTANCE,
        }
    }
}

/// `(image type, view type, create flags, array layers)` of a texture.
pub fn image_shape(desc: &TextureDesc) -> (vk::ImageType, vk::ImageViewType, vk::ImageCreateFlags, u32) {
    let layers = desc.depth_or_layers.max(1);
    match desc.kind {
        TextureKind::D1 => (vk::ImageType::TYPE_1D, vk::ImageViewType::TYPE_1D, vk::ImageCreateFlags::empty(), 1),
        TextureKind::D2 => (vk::ImageType::TYPE_2D, vk::ImageViewType::TYPE_2D, vk::ImageCreateFlags::empty(), 1),
        TextureKind::D2Array => (
            vk::ImageType::TYPE_2D,
            vk::ImageViewType::TYPE_2D_ARRAY,
            vk::ImageCreateFlags::empty(),
            layers,
        ),
        TextureKind::D3 => (vk::ImageType::TYPE_3D, vk::ImageViewType::TYPE_3D, vk::ImageCreateFlags::empty(), 1),
        TextureKind::Cube => (
            vk::ImageType::TYPE_2D,
            vk::ImageViewType::CUBE,
            vk::ImageCreateFlags::CUBE_COMPATIBLE,
            6,
        ),
    }
}

/// Extent of `mip` of a texture. Only 3D textures shrink in depth.
pub fn mip_extent(desc: &TextureDesc, mip: u32) -> vk::Extent3D {
    let shrink = |v: u32| v.checked_shr(mip).unwrap_or(0).max(1);
    vk::Extent3D {
        width: shrink(desc.width),
        height: if desc.kind == TextureKind::D1 { 1 } else { shrink(desc.height) },
        depth: if desc.kind == TextureKind::D3 { shrink(desc.depth_or_layers) } else { 1 },
    }
}

/// A single-sample attachment; stencil follows the depth operations.
pub fn attachment_description(key: &VkAttachmentKey) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(key.format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(key.load)
        .store_op(key.store)
        .stencil_load_op(key.load)
        .stencil_store_op(key.store)
        .initial_layout(key.initial_layout)
        .final_layout(key.final_layout)
}

/// Vertex input bindings and attributes, binding `i` reading slot `i`.
pub fn vertex_input(
    layouts: &[VertexLayout],
) -> (Vec<vk::VertexInputBindingDescription>, Vec<vk::VertexInputAttributeDescription>) {
    let mut bindings = Vec::with_capacity(layouts.len());
    let mut attributes = Vec::new();
    for (binding, layout) in (0u32..).zip(layouts) {
        bindings.push(
            vk::VertexInputBindingDescription::default()
                .binding(binding)
                .stride(layout.stride)
                .input_rate(layout.step_mode.into_vk()),
        );
        attributes.extend(layout.attributes.iter().map(|a| {
            vk::VertexInputAttributeDescription::default()
                .location(a.location)
                .binding(binding)
                .format(a.format.into_vk())
                .offset(a.offset)
        }));
    }
    (bindings, attributes)
}

/// Per-attachment blend state writing every channel.
pub fn blend_attachment(blend: BlendState) -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(blend.enabled)
        .src_color_blend_factor(blend.src_color.into_vk())
        .dst_color_blend_factor(blend.dst_color.into_vk())
        .color_blend_op(blend.color_op.into_vk())
        .src_alpha_blend_factor(blend.src_alpha.into_vk())
        .dst_alpha_blend_factor(blend.dst_alpha.into_vk())
        .alpha_blend_op(blend.alpha_op.into_vk())
        .color_write_mask(vk::ColorComponentFlags::RGBA)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::rhi::{BlendMode, VertexAttribute};

    #[test]
    fn cube_textures_are_six_layer_cube_compatible_images() {
        let mut desc = TextureDesc::d2(64, 64, Format::Rgba8Unorm, TextureUsage::SAMPLED);
        desc.kind = TextureKind::Cube;
        desc.depth_or_layers = 6;
        let (image, view, flags, layers) = image_shape(&desc);
        assert_eq!(image, vk::ImageType::TYPE_2D);
        assert_eq!(view, vk::ImageViewType::CUBE);
        assert!(flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));
        assert_eq!(layers, 6);
    }

    #[test]
    fn mip_extents_never_reach_zero() {
        let mut desc = TextureDesc::d2(256, 64, Format::Rgba8Unorm, TextureUsage::SAMPLED);
        desc.mip_levels = 9;
        let e = mip_extent(&desc, 3);
        assert_eq!((e.width, e.height, e.depth), (32, 8, 1));
        let e = mip_extent(&desc, 8);
        assert_eq!((e.width, e.height, e.depth), (1, 1, 1));

        desc.kind = TextureKind::D3;
        desc.depth_or_layers = 16;
        assert_eq!(mip_extent(&desc, 2).depth, 4);

        desc.kind = TextureKind::D2Array;
        assert_eq!(mip_extent(&desc, 2).depth, 1);
    }

    #[test]
    fn vertex_slots_become_bindings() {
        let layouts = [
            VertexLayout {
                stride: 20,
                step_mode: VertexStepMode::Vertex,
                attributes: vec![
                    VertexAttribute { location: 0, format: VertexFormat::Float32x3, offset: 0 },
                    VertexAttribute { location: 1, format: VertexFormat::Float32x2, offset: 12 },
                ],
            },
            VertexLayout {
                stride: 64,
                step_mode: VertexStepMode::Instance,
                attributes: vec![VertexAttribute { location: 4, format: VertexFormat::Float32x4, offset: 0 }],
            },
        ];
        let (bindings, attributes) = vertex_input(&layouts);
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(bindings[1].stride, 64);
        assert_eq!(bindings[1].input_rate, vk::VertexInputRate::INSTANCE);
        assert_eq!(attributes.len(), 3);
        assert_eq!(attributes[1].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!((attributes[2].location, attributes[2].binding), (4, 1));
    }

    #[test]
    fn alpha_blending_maps_to_src_alpha_factors() {
        let state = blend_attachment(BlendMode::Alpha.blend_state());
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(state.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        assert_eq!(state.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn depth_attachments_keep_their_stencil() {
        let key = VkAttachmentKey {
            format: vk::Format::D24_UNORM_S8_UINT,
            load: vk::AttachmentLoadOp::CLEAR,
            store: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let description = attachment_description(&key);
        assert_eq!(description.stencil_load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(description.final_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(aspect_mask(Format::Depth24PlusStencil8), vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL);
        assert_eq!(CompareFunction::LessEqual.into_vk(), vk::CompareOp::LESS_OR_EQUAL);
    }
}
