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

//! Value types describing resource creation parameters and pipeline state.
//!
//! Descriptors are consumed once at creation time; the handle returned by the
//! device does not keep a reference to them.

use super::handle::{FramebufferHandle, ShaderHandle, TextureHandle};
use bitflags::bitflags;

/// The maximum number of color attachments any backend accepts in one pass.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// Timeout value meaning "wait forever" for fence waits.
pub const TIMEOUT_INFINITE: u64 = u64::MAX;

/// Pixel formats understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// One 8-bit normalized channel.
    R8Unorm,
    /// Two 8-bit normalized channels.
    Rg8Unorm,
    /// Four 8-bit normalized channels.
    Rgba8Unorm,
    /// Four 8-bit normalized channels, sRGB encoded.
    Rgba8UnormSrgb,
    /// Four 8-bit normalized channels in BGRA order.
    Bgra8Unorm,
    /// Four 8-bit normalized channels in BGRA order, sRGB encoded.
    Bgra8UnormSrgb,
    /// One 16-bit float channel.
    R16Float,
    /// Two 16-bit float channels.
    Rg16Float,
    /// Four 16-bit float channels.
    Rgba16Float,
    /// One 32-bit float channel.
    R32Float,
    /// Two 32-bit float channels.
    Rg32Float,
    /// Four 32-bit float channels.
    Rgba32Float,
    /// One 32-bit unsigned integer channel.
    R32Uint,
    /// 16-bit normalized depth.
    Depth16Unorm,
    /// 24-bit depth with 8-bit stencil.
    Depth24PlusStencil8,
    /// 32-bit float depth.
    Depth32Float,
}

impl Format {
    /// Returns `true` for depth (and depth/stencil) formats.
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Format::Depth16Unorm | Format::Depth24PlusStencil8 | Format::Depth32Float
        )
    }

    /// Returns `true` when the format carries a stencil aspect.
    pub fn has_stencil(self) -> bool {
        matches!(self, Format::Depth24PlusStencil8)
    }

    /// Size of one texel in bytes.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Format::R8Unorm => 1,
            Format::Rg8Unorm | Format::R16Float | Format::Depth16Unorm => 2,
            Format::Rgba8Unorm
            | Format::Rgba8UnormSrgb
            | Format::Bgra8Unorm
            | Format::Bgra8UnormSrgb
            | Format::Rg16Float
            | Format::R32Float
            | Format::R32Uint
            | Format::Depth24PlusStencil8
            | Format::Depth32Float => 4,
            Format::Rgba16Float | Format::Rg32Float => 8,
            Format::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// How a buffer will be used. Backends pick memory placement from this.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Bound as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Bound as an index buffer.
        const INDEX = 1 << 1;
        /// Bound as a uniform buffer.
        const UNIFORM = 1 << 2;
        /// Bound as a read/write storage buffer.
        const STORAGE = 1 << 3;
        /// Source of a copy.
        const COPY_SRC = 1 << 4;
        /// Destination of a copy or a CPU upload.
        const COPY_DST = 1 << 5;
    }
}

bitflags! {
    /// How a texture will be used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Sampled from shaders.
        const SAMPLED = 1 << 0;
        /// Rendered to as a color attachment.
        const RENDER_TARGET = 1 << 1;
        /// Rendered to as a depth/stencil attachment.
        const DEPTH_STENCIL = 1 << 2;
        /// Read/write image access from shaders.
        const STORAGE = 1 << 3;
        /// Destination of uploads.
        const COPY_DST = 1 << 4;
        /// Source of copies / readbacks.
        const COPY_SRC = 1 << 5;
    }
}

bitflags! {
    /// A set of shader stages. Used for reflection stage masks and barriers.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        /// Vertex stage.
        const VERTEX = 1 << 0;
        /// Fragment stage.
        const FRAGMENT = 1 << 1;
        /// Compute stage.
        const COMPUTE = 1 << 2;
    }
}

/// A single programmable pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex stage.
    Vertex,
    /// Fragment stage.
    Fragment,
    /// Compute stage.
    Compute,
}

impl From<ShaderStage> for ShaderStages {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => ShaderStages::VERTEX,
            ShaderStage::Fragment => ShaderStages::FRAGMENT,
            ShaderStage::Compute => ShaderStages::COMPUTE,
        }
    }
}

/// A GPU buffer creation request.
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Optional debug label.
    pub label: Option<String>,
    /// Size in bytes. Must be non-zero.
    pub size: u64,
    /// Allowed usages.
    pub usage: BufferUsage,
    /// If `true` the buffer lives in CPU-visible memory and can be written
    /// directly with `Device::write_buffer`.
    pub host_visible: bool,
}

/// Dimensionality of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// One dimensional.
    D1,
    /// Two dimensional.
    D2,
    /// Array of two dimensional layers.
    D2Array,
    /// Three dimensional.
    D3,
    /// Six-faced cube map.
    Cube,
}

/// A texture creation request.
#[derive(Debug, Clone)]
pub struct TextureDesc {
    /// Optional debug label.
    pub label: Option<String>,
    /// Dimensionality.
    pub kind: TextureKind,
    /// Texel format.
    pub format: Format,
    /// Width in texels.
    pub width: u32,
    /// Height in texels (1 for 1D textures).
    pub height: u32,
    /// Depth for 3D textures, layer count for arrays, 6 for cubes.
    pub depth_or_layers: u32,
    /// Number of mip levels, at least 1.
    pub mip_levels: u32,
    /// Allowed usages.
    pub usage: TextureUsage,
}

impl TextureDesc {
    /// A single-mip 2D texture.
    pub fn d2(width: u32, height: u32, format: Format, usage: TextureUsage) -> Self {
        Self {
            label: None,
            kind: TextureKind::D2,
            format,
            width,
            height,
            depth_or_layers: 1,
            mip_levels: 1,
            usage,
        }
    }

    /// The maximum mip count for the base extent.
    pub fn max_mip_levels(&self) -> u32 {
        let largest = self.width.max(self.height).max(1);
        32 - largest.leading_zeros()
    }
}

/// Texel filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    /// Nearest texel.
    Nearest,
    /// Linear interpolation.
    #[default]
    Linear,
}

/// Behaviour outside the `[0, 1]` texture coordinate range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    /// Tile the texture.
    #[default]
    Repeat,
    /// Tile with mirroring.
    MirrorRepeat,
    /// Clamp to the edge texel.
    ClampToEdge,
    /// Clamp to the border color.
    ClampToBorder,
}

/// Comparison function for depth tests and compare samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    /// Never passes.
    Never,
    /// Passes if new < existing.
    #[default]
    Less,
    /// Passes if new == existing.
    Equal,
    /// Passes if new <= existing.
    LessEqual,
    /// Passes if new > existing.
    Greater,
    /// Passes if new != existing.
    NotEqual,
    /// Passes if new >= existing.
    GreaterEqual,
    /// Always passes.
    Always,
}

/// A sampler creation request.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDesc {
    /// Optional debug label.
    pub label: Option<String>,
    /// Minification filter.
    pub min_filter: FilterMode,
    /// Magnification filter.
    pub mag_filter: FilterMode,
    /// Filter between mip levels.
    pub mip_filter: FilterMode,
    /// Addressing along U.
    pub address_u: AddressMode,
    /// Addressing along V.
    pub address_v: AddressMode,
    /// Addressing along W.
    pub address_w: AddressMode,
    /// 1 disables anisotropic filtering.
    pub max_anisotropy: u8,
    /// When set the sampler performs depth comparison (shadow sampling).
    pub compare: Option<CompareFunction>,
    /// Minimum level of detail.
    pub lod_min: f32,
    /// Maximum level of detail.
    pub lod_max: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            label: None,
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            mip_filter: FilterMode::Linear,
            address_u: AddressMode::Repeat,
            address_v: AddressMode::Repeat,
            address_w: AddressMode::Repeat,
            max_anisotropy: 1,
            compare: None,
            lod_min: 0.0,
            lod_max: 1000.0,
        }
    }
}

/// The code of a single shader stage.
#[derive(Debug, Clone)]
pub enum ShaderCode {
    /// Pre-compiled SPIR-V bytecode.
    SpirV(Vec<u8>),
    /// GLSL source text.
    Glsl(String),
    /// Metal Shading Language source text.
    Msl(String),
}

/// A shader stage creation request.
#[derive(Debug, Clone)]
pub struct ShaderDesc {
    /// Optional debug label.
    pub label: Option<String>,
    /// The stage this code implements.
    pub stage: ShaderStage,
    /// Stage code.
    pub code: ShaderCode,
    /// Entry point function name.
    pub entry_point: String,
}

/// A factor in the blend equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    /// `0`
    Zero,
    /// `1`
    One,
    /// Source color.
    SrcColor,
    /// `1 - src`
    OneMinusSrcColor,
    /// Destination color.
    DstColor,
    /// `1 - dst`
    OneMinusDstColor,
    /// Source alpha.
    SrcAlpha,
    /// `1 - src.a`
    OneMinusSrcAlpha,
    /// Destination alpha.
    DstAlpha,
    /// `1 - dst.a`
    OneMinusDstAlpha,
}

/// The operation combining weighted source and destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    /// `src + dst`
    Add,
    /// `src - dst`
    Subtract,
    /// `dst - src`
    ReverseSubtract,
    /// `min(src, dst)`
    Min,
    /// `max(src, dst)`
    Max,
}

/// Fixed-function blending for the color attachments of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    /// Whether blending is enabled at all.
    pub enabled: bool,
    /// Source color factor.
    pub src_color: BlendFactor,
    /// Destination color factor.
    pub dst_color: BlendFactor,
    /// Color operation.
    pub color_op: BlendOp,
    /// Source alpha factor.
    pub src_alpha: BlendFactor,
    /// Destination alpha factor.
    pub dst_alpha: BlendFactor,
    /// Alpha operation.
    pub alpha_op: BlendOp,
}

impl BlendState {
    /// Blending disabled; the source replaces the destination.
    pub const REPLACE: Self = Self {
        enabled: false,
        src_color: BlendFactor::One,
        dst_color: BlendFactor::Zero,
        color_op: BlendOp::Add,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::Zero,
        alpha_op: BlendOp::Add,
    };
}

impl Default for BlendState {
    fn default() -> Self {
        Self::REPLACE
    }
}

/// The four blend configurations every shader variant is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// No blending.
    Opaque,
    /// Classic `src.a` over blending.
    Alpha,
    /// Source added to the destination.
    Additive,
    /// Destination multiplied by the source.
    Multiply,
}

impl BlendMode {
    /// Every blend mode, in pipeline-array order.
    pub const ALL: [BlendMode; 4] = [
        BlendMode::Opaque,
        BlendMode::Alpha,
        BlendMode::Additive,
        BlendMode::Multiply,
    ];

    /// Position of this mode inside [`BlendMode::ALL`].
    pub fn index(self) -> usize {
        match self {
            BlendMode::Opaque => 0,
            BlendMode::Alpha => 1,
            BlendMode::Additive => 2,
            BlendMode::Multiply => 3,
        }
    }

    /// The fixed-function state implementing this mode.
    pub fn blend_state(self) -> BlendState {
        match self {
            BlendMode::Opaque => BlendState::REPLACE,
            BlendMode::Alpha => BlendState {
                enabled: true,
                src_color: BlendFactor::SrcAlpha,
                dst_color: BlendFactor::OneMinusSrcAlpha,
                color_op: BlendOp::Add,
                src_alpha: BlendFactor::One,
                dst_alpha: BlendFactor::OneMinusSrcAlpha,
                alpha_op: BlendOp::Add,
            },
            BlendMode::Additive => BlendState {
                enabled: true,
                src_color: BlendFactor::SrcAlpha,
                dst_color: BlendFactor::One,
                color_op: BlendOp::Add,
                src_alpha: BlendFactor::One,
                dst_alpha: BlendFactor::One,
                alpha_op: BlendOp::Add,
            },
            BlendMode::Multiply => BlendState {
                enabled: true,
                src_color: BlendFactor::DstColor,
                dst_color: BlendFactor::Zero,
                color_op: BlendOp::Add,
                src_alpha: BlendFactor::DstAlpha,
                dst_alpha: BlendFactor::Zero,
                alpha_op: BlendOp::Add,
            },
        }
    }
}

/// Depth test configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    /// Enables the depth test.
    pub depth_test: bool,
    /// Enables depth writes.
    pub depth_write: bool,
    /// Comparison used by the depth test.
    pub depth_compare: CompareFunction,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_compare: CompareFunction::Less,
        }
    }
}

/// Polygon offset applied to rasterized depth.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DepthBiasState {
    /// Constant offset in depth units.
    pub constant: f32,
    /// Offset scaled by the polygon slope.
    pub slope_scale: f32,
    /// Maximum absolute bias, 0 meaning unclamped.
    pub clamp: f32,
}

impl DepthBiasState {
    /// Returns `true` if any bias is applied.
    pub fn is_enabled(&self) -> bool {
        self.constant != 0.0 || self.slope_scale != 0.0
    }
}

/// Which faces are culled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    /// No culling.
    None,
    /// Cull front faces.
    Front,
    /// Cull back faces.
    #[default]
    Back,
}

/// Winding order of front faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrontFace {
    /// Counter-clockwise.
    #[default]
    Ccw,
    /// Clockwise.
    Cw,
}

/// Rasterizer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RasterState {
    /// Face culling.
    pub cull_mode: CullMode,
    /// Front face winding.
    pub front_face: FrontFace,
    /// Render polygon outlines instead of filling.
    pub wireframe: bool,
}

/// How vertices assemble into primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    /// Points.
    PointList,
    /// Independent lines.
    LineList,
    /// Connected lines.
    LineStrip,
    /// Independent triangles.
    #[default]
    TriangleList,
    /// Connected triangles.
    TriangleStrip,
}

/// Index element size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// 16-bit indices.
    Uint16,
    /// 32-bit indices.
    Uint32,
}

impl IndexFormat {
    /// Size of one index in bytes.
    pub fn size(self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// Format of a single vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    /// One float.
    Float32,
    /// Two floats.
    Float32x2,
    /// Three floats.
    Float32x3,
    /// Four floats.
    Float32x4,
    /// Four normalized bytes.
    Unorm8x4,
    /// One unsigned integer.
    Uint32,
}

impl VertexFormat {
    /// Number of components.
    pub fn components(self) -> u32 {
        match self {
            VertexFormat::Float32 | VertexFormat::Uint32 => 1,
            VertexFormat::Float32x2 => 2,
            VertexFormat::Float32x3 => 3,
            VertexFormat::Float32x4 | VertexFormat::Unorm8x4 => 4,
        }
    }

    /// Size in bytes.
    pub fn size(self) -> u32 {
        match self {
            VertexFormat::Unorm8x4 => 4,
            other => other.components() * 4,
        }
    }
}

/// Whether a vertex buffer advances per vertex or per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexStepMode {
    /// Per vertex.
    #[default]
    Vertex,
    /// Per instance.
    Instance,
}

/// A single attribute inside a vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Shader input location.
    pub location: u32,
    /// Attribute format.
    pub format: VertexFormat,
    /// Byte offset inside one element.
    pub offset: u32,
}

/// Layout of one vertex buffer slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VertexLayout {
    /// Bytes between consecutive elements.
    pub stride: u32,
    /// Step rate.
    pub step_mode: VertexStepMode,
    /// Attributes read from this slot.
    pub attributes: Vec<VertexAttribute>,
}

/// A graphics or compute pipeline creation request.
///
/// A pipeline is a compute pipeline when `compute_shader` is valid, in which
/// case the vertex/fragment shaders and fixed-function state are ignored.
#[derive(Debug, Clone)]
pub struct PipelineDesc {
    /// Optional debug label.
    pub label: Option<String>,
    /// Vertex stage.
    pub vertex_shader: ShaderHandle,
    /// Fragment stage.
    pub fragment_shader: ShaderHandle,
    /// Compute stage.
    pub compute_shader: ShaderHandle,
    /// One layout per vertex buffer slot.
    pub vertex_layouts: Vec<VertexLayout>,
    /// Primitive assembly.
    pub topology: PrimitiveTopology,
    /// Rasterizer state.
    pub raster: RasterState,
    /// Depth state baked into the pipeline.
    pub depth_stencil: DepthStencilState,
    /// Blending applied to every color attachment.
    pub blend: BlendState,
    /// Formats of the color attachments this pipeline renders to.
    pub color_formats: Vec<Format>,
    /// Depth attachment format, if any.
    pub depth_format: Option<Format>,
    /// Whether instanced attributes are used.
    pub instanced: bool,
}

impl PipelineDesc {
    /// A graphics pipeline with default fixed-function state.
    pub fn graphics(vertex_shader: ShaderHandle, fragment_shader: ShaderHandle) -> Self {
        Self {
            label: None,
            vertex_shader,
            fragment_shader,
            compute_shader: ShaderHandle::NONE,
            vertex_layouts: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
            raster: RasterState::default(),
            depth_stencil: DepthStencilState::default(),
            blend: BlendState::REPLACE,
            color_formats: vec![Format::Rgba8Unorm],
            depth_format: Some(Format::Depth32Float),
            instanced: false,
        }
    }

    /// A compute pipeline.
    pub fn compute(compute_shader: ShaderHandle) -> Self {
        Self {
            compute_shader,
            color_formats: Vec::new(),
            depth_format: None,
            ..Self::graphics(ShaderHandle::NONE, ShaderHandle::NONE)
        }
    }

    /// Returns `true` for compute pipelines.
    pub fn is_compute(&self) -> bool {
        self.compute_shader.id != 0
    }
}

/// An offscreen render target set.
#[derive(Debug, Clone, Default)]
pub struct FramebufferDesc {
    /// Optional debug label.
    pub label: Option<String>,
    /// Color targets, at most [`MAX_COLOR_ATTACHMENTS`].
    pub color_attachments: Vec<TextureHandle>,
    /// Depth target, or [`TextureHandle::NONE`].
    pub depth_attachment: TextureHandle,
}

/// What happens to an attachment when a pass begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    /// Keep previous contents.
    Load,
    /// Clear to the attachment's clear value.
    #[default]
    Clear,
    /// Contents are undefined.
    DontCare,
}

/// What happens to an attachment when a pass ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreOp {
    /// Keep the results.
    #[default]
    Store,
    /// Discard the results.
    Discard,
}

/// A color attachment of a render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAttachment {
    /// Target texture; [`TextureHandle::NONE`] selects the default (swapchain) target.
    pub texture: TextureHandle,
    /// Load behaviour.
    pub load: LoadOp,
    /// Store behaviour.
    pub store: StoreOp,
    /// Clear color used with [`LoadOp::Clear`].
    pub clear_color: [f32; 4],
}

impl Default for ColorAttachment {
    fn default() -> Self {
        Self {
            texture: TextureHandle::NONE,
            load: LoadOp::Clear,
            store: StoreOp::Store,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// The depth attachment of a render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthAttachment {
    /// Target texture; [`TextureHandle::NONE`] selects the default depth target.
    pub texture: TextureHandle,
    /// Load behaviour.
    pub load: LoadOp,
    /// Store behaviour.
    pub store: StoreOp,
    /// Clear depth used with [`LoadOp::Clear`].
    pub clear_depth: f32,
    /// Clear stencil used with [`LoadOp::Clear`].
    pub clear_stencil: u32,
}

impl Default for DepthAttachment {
    fn default() -> Self {
        Self {
            texture: TextureHandle::NONE,
            load: LoadOp::Clear,
            store: StoreOp::Discard,
            clear_depth: 1.0,
            clear_stencil: 0,
        }
    }
}

/// Describes one render pass.
///
/// Backends built around framebuffer objects (GL) render into `framebuffer`
/// when it is valid; backends built around attachment lists (Metal, Vulkan)
/// resolve the attachment textures directly.
#[derive(Debug, Clone, Default)]
pub struct RenderPassDesc {
    /// Optional debug label.
    pub label: Option<String>,
    /// Offscreen target, or [`FramebufferHandle::NONE`] for the default target.
    pub framebuffer: FramebufferHandle,
    /// Color attachments.
    pub color_attachments: Vec<ColorAttachment>,
    /// Depth attachment.
    pub depth_attachment: Option<DepthAttachment>,
}

impl RenderPassDesc {
    /// A pass clearing the default target to `color` and its depth to 1.
    pub fn to_default_target(color: [f32; 4]) -> Self {
        Self {
            label: None,
            framebuffer: FramebufferHandle::NONE,
            color_attachments: vec![ColorAttachment {
                clear_color: color,
                ..Default::default()
            }],
            depth_attachment: Some(DepthAttachment::default()),
        }
    }
}

/// Viewport transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Left edge in pixels.
    pub x: f32,
    /// Top (or bottom, backend dependent) edge in pixels.
    pub y: f32,
    /// Width in pixels.
    pub width: f32,
    /// Height in pixels.
    pub height: f32,
    /// Minimum depth.
    pub min_depth: f32,
    /// Maximum depth.
    pub max_depth: f32,
}

impl Viewport {
    /// A full-depth viewport covering `width x height`.
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Scissor rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScissorRect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

/// What a query object measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// GPU time elapsed between `begin_query` and `end_query`, in nanoseconds.
    TimeElapsed,
    /// GPU timestamp written by `write_timestamp`, in nanoseconds.
    Timestamp,
}

/// Result of waiting on a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The GPU passed the fence.
    Signaled,
    /// The timeout expired first.
    TimedOut,
}

/// Abstract usage state of a resource, used to express barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Contents undefined (first use).
    Undefined,
    /// Read as vertex input.
    VertexBuffer,
    /// Read as index input.
    IndexBuffer,
    /// Read as a uniform buffer.
    UniformBuffer,
    /// Sampled / read from shaders.
    ShaderResource,
    /// Read and written from shaders.
    UnorderedAccess,
    /// Written as a color attachment.
    RenderTarget,
    /// Written as a depth attachment.
    DepthWrite,
    /// Read-only depth attachment.
    DepthRead,
    /// Source of a transfer.
    CopySrc,
    /// Destination of a transfer.
    CopyDst,
    /// Handed to the presentation engine.
    Present,
}

/// A state transition for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    /// The buffer.
    pub buffer: super::handle::BufferHandle,
    /// Shader stages touching the buffer in shader-access states.
    pub stages: ShaderStages,
    /// State before the barrier.
    pub before: ResourceState,
    /// State after the barrier.
    pub after: ResourceState,
}

/// A state transition for a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBarrier {
    /// The texture.
    pub texture: TextureHandle,
    /// Shader stages touching the texture in shader-access states.
    pub stages: ShaderStages,
    /// State before the barrier.
    pub before: ResourceState,
    /// State after the barrier.
    pub after: ResourceState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_modes_map_to_distinct_states() {
        let states: Vec<BlendState> = BlendMode::ALL.iter().map(|m| m.blend_state()).collect();
        for (i, a) in states.iter().enumerate() {
            for b in states.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert!(!BlendMode::Opaque.blend_state().enabled);
        for (i, mode) in BlendMode::ALL.iter().enumerate() {
            assert_eq!(mode.index(), i);
        }
    }

    #[test]
    fn depth_formats_are_detected() {
        assert!(Format::Depth32Float.is_depth());
        assert!(Format::Depth24PlusStencil8.has_stencil());
        assert!(!Format::Rgba8Unorm.is_depth());
        assert_eq!(Format::Rgba16Float.bytes_per_pixel(), 8);
    }

    #[test]
    fn max_mip_levels_follows_largest_extent() {
        let desc = TextureDesc::d2(256, 64, Format::Rgba8Unorm, TextureUsage::SAMPLED);
        assert_eq!(desc.max_mip_levels(), 9);
        let one = TextureDesc::d2(1, 1, Format::Rgba8Unorm, TextureUsage::SAMPLED);
        assert_eq!(one.max_mip_levels(), 1);
    }

    #[test]
    fn compute_pipeline_desc_is_detected() {
        let graphics = PipelineDesc::graphics(ShaderHandle { id: 1 }, ShaderHandle { id: 2 });
        assert!(!graphics.is_compute());
        let compute = PipelineDesc::compute(ShaderHandle { id: 3 });
        assert!(compute.is_compute());
        assert!(compute.color_formats.is_empty());
    }

    #[test]
    fn depth_bias_enabled_only_when_non_zero() {
        assert!(!DepthBiasState::default().is_enabled());
        let bias = DepthBiasState {
            constant: 1.25,
            slope_scale: 0.0,
            clamp: 0.0,
        };
        assert!(bias.is_enabled());
    }
}
