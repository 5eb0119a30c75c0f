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

//! Translation of abstract resource states into Vulkan synchronization.
//!
//! Each [`ResourceState`] maps to the pipeline stages that touch the
//! resource, the memory access they perform and, for images, the layout the
//! resource must be in. A [`BarrierBatch`] accumulates any number of
//! transitions and records them as a single `vkCmdPipelineBarrier`.

use super::conversions::{aspect_mask, IntoVk};
use super::driver::VulkanDriver;
use ash::vk;
use prism_core::rhi::{ResourceState, ShaderStages, TextureDesc, TextureKind};

/// The Vulkan view of one resource state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VkState {
    /// Stages that access the resource in this state.
    pub stage: vk::PipelineStageFlags,
    /// Accesses performed in this state.
    pub access: vk::AccessFlags,
    /// Required image layout (ignored for buffers).
    pub layout: vk::ImageLayout,
}

impl VkState {
    const fn new(stage: vk::PipelineStageFlags, access: vk::AccessFlags, layout: vk::ImageLayout) -> Self {
        Self { stage, access, layout }
    }

    /// Accesses that must be made available before the transition. Reads
    /// leave nothing to flush.
    pub fn src_access(&self) -> vk::AccessFlags {
        self.access
            & !(vk::AccessFlags::SHADER_READ
                | vk::AccessFlags::UNIFORM_READ
                | vk::AccessFlags::VERTEX_ATTRIBUTE_READ
                | vk::AccessFlags::INDEX_READ
                | vk::AccessFlags::TRANSFER_READ
                | vk::AccessFlags::COLOR_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ)
    }
}

/// Maps `state` to stages, access and layout. `stages` narrows the shader
/// stages of shader-access states.
pub fn vk_state(state: ResourceState, stages: ShaderStages) -> VkState {
    let shader: vk::PipelineStageFlags = stages.into_vk();
    let fragment_tests =
        vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    match state {
        ResourceState::Undefined => VkState::new(
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::AccessFlags::empty(),
            vk::ImageLayout::UNDEFINED,
        ),
        ResourceState::VertexBuffer => VkState::new(
            vk::PipelineStageFlags::VERTEX_INPUT,
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
            vk::ImageLayout::UNDEFINED,
        ),
        ResourceState::IndexBuffer => VkState::new(
            vk::PipelineStageFlags::VERTEX_INPUT,
            vk::AccessFlags::INDEX_READ,
            vk::ImageLayout::UNDEFINED,
        ),
        ResourceState::UniformBuffer => VkState::new(
            shader,
            vk::AccessFlags::UNIFORM_READ,
            vk::ImageLayout::UNDEFINED,
        ),
        ResourceState::ShaderResource => VkState::new(
            shader,
            vk::AccessFlags::SHADER_READ,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ),
        ResourceState::UnorderedAccess => VkState::new(
            shader,
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            vk::ImageLayout::GENERAL,
        ),
        ResourceState::RenderTarget => VkState::new(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ),
        ResourceState::DepthWrite => VkState::new(
            fragment_tests,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ),
        ResourceState::DepthRead => VkState::new(
            fragment_tests | shader,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::SHADER_READ,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ),
        ResourceState::CopySrc => VkState::new(
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_READ,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ),
        ResourceState::CopyDst => VkState::new(
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ),
        ResourceState::Present => VkState::new(
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
            vk::ImageLayout::PRESENT_SRC_KHR,
        ),
    }
}

/// Transitions waiting to be recorded as one pipeline barrier.
#[derive(Debug, Default)]
pub struct BarrierBatch {
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
    buffers: Vec<vk::BufferMemoryBarrier<'static>>,
    images: Vec<vk::ImageMemoryBarrier<'static>>,
}

impl BarrierBatch {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a whole-buffer transition.
    pub fn add_buffer(&mut self, buffer: vk::Buffer, stages: ShaderStages, before: ResourceState, after: ResourceState) {
        let (src, dst) = (vk_state(before, stages), vk_state(after, stages));
        self.src_stage |= src.stage;
        self.dst_stage |= dst.stage;
        self.buffers.push(
            vk::BufferMemoryBarrier::default()
                .src_access_mask(src.src_access())
                .dst_access_mask(dst.access)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE),
        );
    }

    /// Adds a transition covering every mip and layer of `image`.
    pub fn add_image(
        &mut self,
        image: vk::Image,
        desc: &TextureDesc,
        stages: ShaderStages,
        before: ResourceState,
        after: ResourceState,
    ) {
        let (src, dst) = (vk_state(before, stages), vk_state(after, stages));
        self.src_stage |= src.stage;
        self.dst_stage |= dst.stage;
        let layers = match desc.kind {
            TextureKind::D2Array | TextureKind::Cube => desc.depth_or_layers.max(1),
            _ => 1,
        };
        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(aspect_mask(desc.format))
            .base_mip_level(0)
            .level_count(desc.mip_levels.max(1))
            .base_array_layer(0)
            .layer_count(layers);
        self.images.push(
            vk::ImageMemoryBarrier::default()
                .src_access_mask(src.src_access())
                .dst_access_mask(dst.access)
                .old_layout(src.layout)
                .new_layout(dst.layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(range),
        );
    }

    /// Returns `true` when nothing was added.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.images.is_empty()
    }

    /// Records the batch into `cb`. Does nothing for an empty batch.
    pub fn record(self, driver: &mut dyn VulkanDriver, cb: vk::CommandBuffer) {
        if self.is_empty() {
            return;
        }
        let src_stage = if self.src_stage.is_empty() {
            vk::PipelineStageFlags::TOP_OF_PIPE
        } else {
            self.src_stage
        };
        let dst_stage = if self.dst_stage.is_empty() {
            vk::PipelineStageFlags::BOTTOM_OF_PIPE
        } else {
            self.dst_stage
        };
        driver.cmd_pipeline_barrier(cb, src_stage, dst_stage, &self.buffers, &self.images);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::rhi::{Format, TextureUsage};

    #[test]
    fn render_target_to_shader_resource() {
        let src = vk_state(ResourceState::RenderTarget, ShaderStages::FRAGMENT);
        let dst = vk_state(ResourceState::ShaderResource, ShaderStages::FRAGMENT);
        assert_eq!(src.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(src.src_access(), vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(dst.stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(dst.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn empty_stage_set_means_all_shader_stages() {
        let state = vk_state(ResourceState::UniformBuffer, ShaderStages::empty());
        assert!(state.stage.contains(vk::PipelineStageFlags::VERTEX_SHADER));
        assert!(state.stage.contains(vk::PipelineStageFlags::COMPUTE_SHADER));
    }

    #[test]
    fn batch_accumulates_stages() {
        let mut batch = BarrierBatch::new();
        assert!(batch.is_empty());
        batch.add_buffer(
            vk::Buffer::null(),
            ShaderStages::COMPUTE,
            ResourceState::UnorderedAccess,
            ResourceState::VertexBuffer,
        );
        let desc = TextureDesc::d2(4, 4, Format::Depth32Float, TextureUsage::DEPTH_STENCIL);
        batch.add_image(
            vk::Image::null(),
            &desc,
            ShaderStages::FRAGMENT,
            ResourceState::DepthWrite,
            ResourceState::ShaderResource,
        );
        assert_eq!(
            batch.src_stage,
            vk::PipelineStageFlags::COMPUTE_SHADER
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        );
        assert_eq!(
            batch.dst_stage,
            vk::PipelineStageFlags::VERTEX_INPUT | vk::PipelineStageFlags::FRAGMENT_SHADER
        );
        assert_eq!(
            batch.images[0].subresource_range.aspect_mask,
            vk::ImageAspectFlags::DEPTH
        );
    }
}
