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

//! [`MetalDriver`] over a live `MTLDevice`, macOS only.
//!
//! The platform layer owns the window and hands over the `CAMetalLayer`
//! attached to it. Every [`MtlObject`] id maps to a retained Objective-C
//! object; releasing the id drops the retain.

use super::cmd_list::VERTEX_BUFFER_BASE;
use super::driver::{EncoderCommand, MetalDriver, MtlObject, MtlRenderPass, MtlRenderPipelineDesc};
use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2_foundation::{NSRange, NSString};
use objc2_metal::{
    MTLBarrierScope, MTLBlendFactor, MTLBlendOperation, MTLBlitCommandEncoder, MTLBlitPassDescriptor, MTLBuffer,
    MTLClearColor, MTLCommandBuffer, MTLCommandEncoder, MTLCommandQueue, MTLCompareFunction,
    MTLComputeCommandEncoder, MTLComputePipelineState, MTLCounterSampleBuffer, MTLCounterSampleBufferDescriptor,
    MTLCounterSet, MTLCreateSystemDefaultDevice, MTLCullMode, MTLDepthStencilDescriptor, MTLDepthStencilState,
    MTLDevice, MTLFunction, MTLIndexType, MTLLibrary, MTLLoadAction, MTLOrigin, MTLPixelFormat, MTLPrimitiveType,
    MTLRegion, MTLRenderCommandEncoder, MTLRenderPassDescriptor, MTLRenderPipelineDescriptor,
    MTLRenderPipelineState, MTLRenderStages, MTLResource, MTLResourceOptions, MTLSamplerAddressMode,
    MTLSamplerDescriptor, MTLSamplerMinMagFilter, MTLSamplerMipFilter, MTLSamplerState, MTLScissorRect, MTLSharedEvent, MTLSize,
    MTLStorageMode, MTLStoreAction, MTLTexture, MTLTextureDescriptor, MTLTextureType, MTLTextureUsage,
    MTLTriangleFillMode, MTLVertexDescriptor, MTLVertexFormat, MTLVertexStepFunction, MTLViewport, MTLWinding,
};
use objc2_quartz_core::{CAMetalDrawable, CAMetalLayer};
use prism_core::rhi::{
    AddressMode, BlendFactor, BlendOp, CompareFunction, CullMode, DepthStencilState, FilterMode, Format,
    FrontFace, IndexFormat, LoadOp, PrimitiveTopology, SamplerDesc, ShaderStages, StoreOp, TextureDesc,
    TextureKind, TextureUsage, VertexFormat, VertexStepMode,
};
use std::collections::HashMap;
use std::fmt;
use std::ptr::NonNull;

type Object<P> = Retained<ProtocolObject<P>>;

/// `MTLCounterDontSample`
const DONT_SAMPLE: usize = usize::MAX;
/// Written by the GPU when a counter could not be sampled.
const COUNTER_ERROR_VALUE: u64 = u64::MAX;

const DEFAULT_DEPTH_FORMAT: Format = Format::Depth32Float;

enum Native {
    Buffer(Object<dyn MTLBuffer>),
    Texture(Object<dyn MTLTexture>),
    Sampler(Object<dyn MTLSamplerState>),
    Library(Object<dyn MTLLibrary>),
    Function(Object<dyn MTLFunction>),
    RenderPipeline(Object<dyn MTLRenderPipelineState>),
    ComputePipeline(Object<dyn MTLComputePipelineState>),
    DepthStencil(Object<dyn MTLDepthStencilState>),
    Event(Object<dyn MTLSharedEvent>),
    Counters(Object<dyn MTLCounterSampleBuffer>),
    CommandBuffer(Object<dyn MTLCommandBuffer>),
    RenderEncoder(RenderEncoder),
    ComputeEncoder(ComputeEncoder),
}

struct RenderEncoder {
    raw: Object<dyn MTLRenderCommandEncoder>,
}

struct ComputeEncoder {
    raw: Object<dyn MTLComputeCommandEncoder>,
    threads_per_group: usize,
}

/// A system Metal device presenting into a `CAMetalLayer`.
pub struct NativeMetal {
    device: Object<dyn MTLDevice>,
    queue: Object<dyn MTLCommandQueue>,
    layer: Retained<CAMetalLayer>,
    drawable: Option<Object<dyn CAMetalDrawable>>,
    default_depth: Object<dyn MTLTexture>,
    objects: HashMap<u64, Native>,
    next_id: u64,
}

impl fmt::Debug for NativeMetal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeMetal")
            .field("device", &self.device.name().to_string())
            .field("live_objects", &self.objects.len())
            .field("holds_drawable", &self.drawable.is_some())
            .finish()
    }
}

impl NativeMetal {
    /// Binds the system default device to `layer`, whose drawables are
    /// `width` x `height`.
    ///
    /// ## Errors
    /// Returns a description when no Metal device or queue is available.
    pub fn new(layer: Retained<CAMetalLayer>, width: u32, height: u32) -> Result<Self, String> {
        let device = MTLCreateSystemDefaultDevice().ok_or("no Metal device available")?;
        let queue = device.newCommandQueue().ok_or("failed to create a command queue")?;
        // SAFETY: the layer is owned by the caller's window and stays alive.
        unsafe {
            layer.setDevice(Some(&device));
            layer.setPixelFormat(MTLPixelFormat::BGRA8Unorm_sRGB);
        }
        let default_depth = Self::depth_texture(&device, width, height)?;
        log::info!("NativeMetal: using {}", device.name());
        Ok(Self {
            device,
            queue,
            layer,
            drawable: None,
            default_depth,
            objects: HashMap::new(),
            next_id: 1,
        })
    }

    /// Rebuilds the default depth buffer after the drawable size changed.
    ///
    /// ## Errors
    /// Returns a description when the texture cannot be created.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), String> {
        self.default_depth = Self::depth_texture(&self.device, width, height)?;
        Ok(())
    }

    fn depth_texture(device: &ProtocolObject<dyn MTLDevice>, width: u32, height: u32) -> Result<Object<dyn MTLTexture>, String> {
        let desc = TextureDesc::d2(width.max(1), height.max(1), DEFAULT_DEPTH_FORMAT, TextureUsage::DEPTH_STENCIL);
        let descriptor = texture_descriptor(&desc, MTLStorageMode::Private);
        device
            .newTextureWithDescriptor(&descriptor)
            .ok_or_else(|| "failed to create the default depth buffer".to_string())
    }

    fn insert(&mut self, object: Native) -> MtlObject {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, object);
        MtlObject(id)
    }

    fn buffer(&self, object: MtlObject) -> Option<&Object<dyn MTLBuffer>> {
        match self.objects.get(&object.0) {
            Some(Native::Buffer(b)) => Some(b),
            _ => None,
        }
    }

    fn texture(&self, object: MtlObject) -> Option<&Object<dyn MTLTexture>> {
        match self.objects.get(&object.0) {
            Some(Native::Texture(t)) => Some(t),
            _ => None,
        }
    }

    fn function(&self, object: MtlObject) -> Result<&Object<dyn MTLFunction>, String> {
        match self.objects.get(&object.0) {
            Some(Native::Function(f)) => Ok(f),
            _ => Err(format!("{object:?} is not a function")),
        }
    }

    fn command_buffer(&self, object: MtlObject) -> Option<&Object<dyn MTLCommandBuffer>> {
        match self.objects.get(&object.0) {
            Some(Native::CommandBuffer(cb)) => Some(cb),
            _ => None,
        }
    }

    fn drawable_texture(&mut self) -> Result<Object<dyn MTLTexture>, String> {
        if self.drawable.is_none() {
            // SAFETY: the layer has a device and a pixel format.
            self.drawable = unsafe { self.layer.nextDrawable() };
        }
        self.drawable
            .as_ref()
            // SAFETY: the drawable has not been presented yet.
            .map(|d| unsafe { d.texture() })
            .ok_or_else(|| "the layer has no drawable available".to_string())
    }

    /// Copies into a private buffer through a shared staging buffer.
    fn blit_into(&self, buffer: &ProtocolObject<dyn MTLBuffer>, offset: u64, data: &[u8]) {
        let Some(staging) = self
            .device
            .newBufferWithLength_options(data.len(), MTLResourceOptions::StorageModeShared)
        else {
            log::error!("NativeMetal: staging buffer allocation failed");
            return;
        };
        // SAFETY: the staging buffer is exactly `data.len()` bytes and shared.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), staging.contents().as_ptr().cast::<u8>(), data.len());
        }
        let Some(cb) = self.queue.commandBuffer() else {
            log::error!("NativeMetal: no command buffer for a buffer upload");
            return;
        };
        let Some(blit) = cb.blitCommandEncoder() else {
            log::error!("NativeMetal: no blit encoder for a buffer upload");
            return;
        };
        // SAFETY: both ranges lie inside their buffers.
        unsafe {
            blit.copyFromBuffer_sourceOffset_toBuffer_destinationOffset_size(
                &staging,
                0,
                buffer,
                offset as usize,
                data.len(),
            );
        }
        blit.endEncoding();
        cb.commit();
        // SAFETY: blocking on our own upload.
        unsafe { cb.waitUntilCompleted() };
    }

    fn encode_render(&self, encoder: &RenderEncoder, command: EncoderCommand) {
        let raw = &encoder.raw;
        // SAFETY: every object referenced by the command is alive in `objects`
        // and the encoder is open.
        unsafe {
            match command {
                EncoderCommand::SetRenderPipeline(pso) => {
                    if let Some(Native::RenderPipeline(p)) = self.objects.get(&pso.0) {
                        raw.setRenderPipelineState(p);
                    }
                }
                EncoderCommand::SetDepthStencilState(state) => {
                    if let Some(Native::DepthStencil(s)) = self.objects.get(&state.0) {
                        raw.setDepthStencilState(Some(s));
                    }
                }
                EncoderCommand::SetRaster {
                    cull_mode,
                    front_face,
                    wireframe,
                } => {
                    raw.setCullMode(cull(cull_mode));
                    raw.setFrontFacingWinding(winding(front_face));
                    raw.setTriangleFillMode(if wireframe {
                        MTLTriangleFillMode::Lines
                    } else {
                        MTLTriangleFillMode::Fill
                    });
                }
                EncoderCommand::SetDepthBias {
                    constant,
                    slope_scale,
                    clamp,
                } => raw.setDepthBias_slopeScale_clamp(constant, slope_scale, clamp),
                EncoderCommand::SetViewport(v) => raw.setViewport(MTLViewport {
                    originX: f64::from(v.x),
                    originY: f64::from(v.y),
                    width: f64::from(v.width),
                    height: f64::from(v.height),
                    znear: f64::from(v.min_depth),
                    zfar: f64::from(v.max_depth),
                }),
                EncoderCommand::SetScissor(s) => raw.setScissorRect(MTLScissorRect {
                    x: s.x.max(0) as usize,
                    y: s.y.max(0) as usize,
                    width: s.width as usize,
                    height: s.height as usize,
                }),
                EncoderCommand::SetBuffer {
                    stages,
                    index,
                    buffer,
                    offset,
                } => {
                    let Some(b) = self.buffer(buffer) else { return };
                    if stages.is_empty() || stages.contains(ShaderStages::VERTEX) {
                        raw.setVertexBuffer_offset_atIndex(Some(b), offset as usize, index as usize);
                    }
                    if stages.is_empty() || stages.contains(ShaderStages::FRAGMENT) {
                        raw.setFragmentBuffer_offset_atIndex(Some(b), offset as usize, index as usize);
                    }
                }
                EncoderCommand::SetTexture {
                    stages,
                    index,
                    texture,
                    sampler,
                } => {
                    let Some(t) = self.texture(texture) else { return };
                    let sampler = sampler.and_then(|s| match self.objects.get(&s.0) {
                        Some(Native::Sampler(s)) => Some(s),
                        _ => None,
                    });
                    if stages.is_empty() || stages.contains(ShaderStages::VERTEX) {
                        raw.setVertexTexture_atIndex(Some(t), index as usize);
                        if let Some(s) = sampler {
                            raw.setVertexSamplerState_atIndex(Some(s), index as usize);
                        }
                    }
                    if stages.is_empty() || stages.contains(ShaderStages::FRAGMENT) {
                        raw.setFragmentTexture_atIndex(Some(t), index as usize);
                        if let Some(s) = sampler {
                            raw.setFragmentSamplerState_atIndex(Some(s), index as usize);
                        }
                    }
                }
                EncoderCommand::Draw {
                    topology,
                    vertex_start,
                    vertex_count,
                    instance_count,
                } => raw.drawPrimitives_vertexStart_vertexCount_instanceCount(
                    primitive(topology),
                    vertex_start as usize,
                    vertex_count as usize,
                    instance_count as usize,
                ),
                EncoderCommand::DrawIndexed {
                    topology,
                    index_count,
                    index_format,
                    index_buffer,
                    index_offset,
                    instance_count,
                    base_vertex,
                } => {
                    let Some(b) = self.buffer(index_buffer) else { return };
                    raw.drawIndexedPrimitives_indexCount_indexType_indexBuffer_indexBufferOffset_instanceCount_baseVertex_baseInstance(
                        primitive(topology),
                        index_count as usize,
                        index_type(index_format),
                        b,
                        index_offset as usize,
                        instance_count as usize,
                        base_vertex as isize,
                        0,
                    );
                }
                EncoderCommand::MemoryBarrier => raw.memoryBarrierWithScope_afterStages_beforeStages(
                    MTLBarrierScope::Buffers | MTLBarrierScope::Textures,
                    MTLRenderStages::Fragment,
                    MTLRenderStages::Vertex,
                ),
                other @ (EncoderCommand::SetComputePipeline(_) | EncoderCommand::Dispatch { .. }) => {
                    log::warn!("NativeMetal: {} on a render encoder ignored", other.name());
                }
            }
        }
    }

    fn encode_compute(&self, encoder: &mut ComputeEncoder, command: EncoderCommand) {
        // SAFETY: every object referenced by the command is alive in `objects`
        // and the encoder is open.
        unsafe {
            match command {
                EncoderCommand::SetComputePipeline(pso) => {
                    if let Some(Native::ComputePipeline(p)) = self.objects.get(&pso.0) {
                        encoder.raw.setComputePipelineState(p);
                        encoder.threads_per_group = p.threadExecutionWidth().max(1);
                    }
                }
                EncoderCommand::SetBuffer {
                    index, buffer, offset, ..
                } => {
                    if let Some(b) = self.buffer(buffer) {
                        encoder.raw.setBuffer_offset_atIndex(Some(b), offset as usize, index as usize);
                    }
                }
                EncoderCommand::SetTexture {
                    index, texture, sampler, ..
                } => {
                    if let Some(t) = self.texture(texture) {
                        encoder.raw.setTexture_atIndex(Some(t), index as usize);
                    }
                    if let Some(Native::Sampler(s)) = sampler.and_then(|s| self.objects.get(&s.0)) {
                        encoder.raw.setSamplerState_atIndex(Some(s), index as usize);
                    }
                }
                EncoderCommand::Dispatch { groups } => encoder.raw.dispatchThreadgroups_threadsPerThreadgroup(
                    MTLSize {
                        width: groups[0] as usize,
                        height: groups[1] as usize,
                        depth: groups[2] as usize,
                    },
                    MTLSize {
                        width: encoder.threads_per_group,
                        height: 1,
                        depth: 1,
                    },
                ),
                EncoderCommand::MemoryBarrier => encoder
                    .raw
                    .memoryBarrierWithScope(MTLBarrierScope::Buffers | MTLBarrierScope::Textures),
                other => log::warn!("NativeMetal: {} on a compute encoder ignored", other.name()),
            }
        }
    }
}

fn pixel_format(format: Format) -> MTLPixelFormat {
    match format {
        Format::R8Unorm => MTLPixelFormat::R8Unorm,
        Format::Rg8Unorm => MTLPixelFormat::RG8Unorm,
        Format::Rgba8Unorm => MTLPixelFormat::RGBA8Unorm,
        Format::Rgba8UnormSrgb => MTLPixelFormat::RGBA8Unorm_sRGB,
        Format::Bgra8Unorm => MTLPixelFormat::BGRA8Unorm,
        Format::Bgra8UnormSrgb => MTLPixelFormat::BGRA8Unorm_sRGB,
        Format::R16Float => MTLPixelFormat::R16Float,
        Format::Rg16Float => MTLPixelFormat::RG16Float,
        Format::Rgba16Float => MTLPixelFormat::RGBA16Float,
        Format::R32Float => MTLPixelFormat::R32Float,
        Format::Rg32Float => MTLPixelFormat::RG32Float,
        Format::Rgba32Float => MTLPixelFormat::RGBA32Float,
        Format::R32Uint => MTLPixelFormat::R32Uint,
        Format::Depth16Unorm => MTLPixelFormat::Depth16Unorm,
        // Apple GPUs have no 24 bit depth.
        Format::Depth24PlusStencil8 => MTLPixelFormat::Depth32Float_Stencil8,
        Format::Depth32Float => MTLPixelFormat::Depth32Float,
    }
}

fn texture_descriptor(desc: &TextureDesc, storage: MTLStorageMode) -> Retained<MTLTextureDescriptor> {
    let descriptor = MTLTextureDescriptor::new();
    let (texture_type, depth, layers) = match desc.kind {
        TextureKind::D1 => (MTLTextureType::Type1D, 1, 1),
        TextureKind::D2 => (MTLTextureType::Type2D, 1, 1),
        TextureKind::D2Array => (MTLTextureType::Type2DArray, 1, desc.depth_or_layers.max(1)),
        TextureKind::D3 => (MTLTextureType::Type3D, desc.depth_or_layers.max(1), 1),
        TextureKind::Cube => (MTLTextureType::Cube, 1, 1),
    };
    let mut usage = MTLTextureUsage::Unknown;
    if desc.usage.contains(TextureUsage::SAMPLED) {
        usage |= MTLTextureUsage::ShaderRead;
    }
    if desc.usage.contains(TextureUsage::STORAGE) {
        usage |= MTLTextureUsage::ShaderRead | MTLTextureUsage::ShaderWrite;
    }
    if desc.usage.intersects(TextureUsage::RENDER_TARGET | TextureUsage::DEPTH_STENCIL) {
        usage |= MTLTextureUsage::RenderTarget;
    }
    // SAFETY: every value lies in the range the descriptor accepts.
    unsafe {
        descriptor.setTextureType(texture_type);
        descriptor.setPixelFormat(pixel_format(desc.format));
        descriptor.setWidth(desc.width.max(1) as usize);
        descriptor.setHeight(desc.height.max(1) as usize);
        descriptor.setDepth(depth as usize);
        descriptor.setArrayLength(layers as usize);
        descriptor.setMipmapLevelCount(desc.mip_levels.max(1) as usize);
        descriptor.setUsage(usage);
        descriptor.setStorageMode(storage);
    }
    descriptor
}

fn compare(function: CompareFunction) -> MTLCompareFunction {
    match function {
        CompareFunction::Never => MTLCompareFunction::Never,
        CompareFunction::Less => MTLCompareFunction::Less,
        CompareFunction::Equal => MTLCompareFunction::Equal,
        CompareFunction::LessEqual => MTLCompareFunction::LessEqual,
        CompareFunction::Greater => MTLCompareFunction::Greater,
        CompareFunction::NotEqual => MTLCompareFunction::NotEqual,
        CompareFunction::GreaterEqual => MTLCompareFunction::GreaterEqual,
        CompareFunction::Always => MTLCompareFunction::Always,
    }
}

fn blend_factor(factor: BlendFactor) -> MTLBlendFactor {
    match factor {
        BlendFactor::Zero => MTLBlendFactor::Zero,
        BlendFactor::One => MTLBlendFactor::One,
        BlendFactor::SrcColor => MTLBlendFactor::SourceColor,
        BlendFactor::OneMinusSrcColor => MTLBlendFactor::OneMinusSourceColor,
        BlendFactor::DstColor => MTLBlendFactor::DestinationColor,
        BlendFactor::OneMinusDstColor => MTLBlendFactor::OneMinusDestinationColor,
        BlendFactor::SrcAlpha => MTLBlendFactor::SourceAlpha,
        BlendFactor::OneMinusSrcAlpha => MTLBlendFactor::OneMinusSourceAlpha,
        BlendFactor::DstAlpha => MTLBlendFactor::DestinationAlpha,
        BlendFactor::OneMinusDstAlpha => MTLBlendFactor::OneMinusDestinationAlpha,
    }
}

fn blend_op(op: BlendOp) -> MTLBlendOperation {
    match op {
        BlendOp::Add => MTLBlendOperation::Add,
        BlendOp::Subtract => MTLBlendOperation::Subtract,
        BlendOp::ReverseSubtract => MTLBlendOperation::ReverseSubtract,
        BlendOp::Min => MTLBlendOperation::Min,
        BlendOp::Max => MTLBlendOperation::Max,
    }
}

fn vertex_format(format: VertexFormat) -> MTLVertexFormat {
    match format {
        VertexFormat::Float32 => MTLVertexFormat::Float,
        VertexFormat::Float32x2 => MTLVertexFormat::Float2,
        VertexFormat::Float32x3 => MTLVertexFormat::Float3,
        VertexFormat::Float32x4 => MTLVertexFormat::Float4,
        VertexFormat::Unorm8x4 => MTLVertexFormat::UChar4Normalized,
        VertexFormat::Uint32 => MTLVertexFormat::UInt,
    }
}

fn primitive(topology: PrimitiveTopology) -> MTLPrimitiveType {
    match topology {
        PrimitiveTopology::PointList => MTLPrimitiveType::Point,
        PrimitiveTopology::LineList => MTLPrimitiveType::Line,
        PrimitiveTopology::LineStrip => MTLPrimitiveType::LineStrip,
        PrimitiveTopology::TriangleList => MTLPrimitiveType::Triangle,
        PrimitiveTopology::TriangleStrip => MTLPrimitiveType::TriangleStrip,
    }
}

fn cull(mode: CullMode) -> MTLCullMode {
    match mode {
        CullMode::None => MTLCullMode::None,
        CullMode::Front => MTLCullMode::Front,
        CullMode::Back => MTLCullMode::Back,
    }
}

fn winding(face: FrontFace) -> MTLWinding {
    match face {
        FrontFace::Ccw => MTLWinding::CounterClockwise,
        FrontFace::Cw => MTLWinding::Clockwise,
    }
}

fn index_type(format: IndexFormat) -> MTLIndexType {
    match format {
        IndexFormat::Uint16 => MTLIndexType::UInt16,
        IndexFormat::Uint32 => MTLIndexType::UInt32,
    }
}

fn load_action(op: LoadOp) -> MTLLoadAction {
    match op {
        LoadOp::Load => MTLLoadAction::Load,
        LoadOp::Clear => MTLLoadAction::Clear,
        LoadOp::DontCare => MTLLoadAction::DontCare,
    }
}

fn store_action(op: StoreOp) -> MTLStoreAction {
    match op {
        StoreOp::Store => MTLStoreAction::Store,
        StoreOp::Discard => MTLStoreAction::DontCare,
    }
}

fn address_mode(mode: AddressMode) -> MTLSamplerAddressMode {
    match mode {
        AddressMode::Repeat => MTLSamplerAddressMode::Repeat,
        AddressMode::MirrorRepeat => MTLSamplerAddressMode::MirrorRepeat,
        AddressMode::ClampToEdge => MTLSamplerAddressMode::ClampToEdge,
        AddressMode::ClampToBorder => MTLSamplerAddressMode::ClampToBorderColor,
    }
}

fn min_mag(filter: FilterMode) -> MTLSamplerMinMagFilter {
    match filter {
        FilterMode::Nearest => MTLSamplerMinMagFilter::Nearest,
        FilterMode::Linear => MTLSamplerMinMagFilter::Linear,
    }
}

fn described(error: &objc2_foundation::NSError) -> String {
    error.localizedDescription().to_string()
}

impl MetalDriver for NativeMetal {
    fn new_buffer(&mut self, size: u64, host_visible: bool) -> Result<MtlObject, String> {
        let options = if host_visible {
            MTLResourceOptions::StorageModeShared
        } else {
            MTLResourceOptions::StorageModePrivate
        };
        let buffer = self
            .device
            .newBufferWithLength_options(size.max(1) as usize, options)
            .ok_or_else(|| format!("failed to allocate a {size} byte buffer"))?;
        Ok(self.insert(Native::Buffer(buffer)))
    }

    fn buffer_write(&mut self, buffer: MtlObject, offset: u64, data: &[u8]) {
        let Some(raw) = self.buffer(buffer) else {
            log::warn!("NativeMetal: write to unknown buffer {buffer:?}");
            return;
        };
        let fits = offset
            .checked_add(data.len() as u64)
            .is_some_and(|end| end <= raw.length() as u64);
        if !fits {
            log::warn!("NativeMetal: write of {} bytes at {offset} overflows {buffer:?}", data.len());
            return;
        }
        if raw.storageMode() == MTLStorageMode::Private {
            self.blit_into(raw, offset, data);
            return;
        }
        // SAFETY: shared contents are CPU visible and the range was checked.
        unsafe {
            let dst = raw.contents().as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
    }

    fn new_texture(&mut self, desc: &TextureDesc) -> Result<MtlObject, String> {
        let storage = if desc.format.is_depth() {
            MTLStorageMode::Private
        } else if self.device.hasUnifiedMemory() {
            MTLStorageMode::Shared
        } else {
            MTLStorageMode::Managed
        };
        let descriptor = texture_descriptor(desc, storage);
        let texture = self
            .device
            .newTextureWithDescriptor(&descriptor)
            .ok_or_else(|| format!("failed to create a {}x{} {:?} texture", desc.width, desc.height, desc.format))?;
        Ok(self.insert(Native::Texture(texture)))
    }

    fn replace_texture_level(&mut self, texture: MtlObject, desc: &TextureDesc, mip: u32, data: &[u8]) {
        let Some(raw) = self.texture(texture) else {
            log::warn!("NativeMetal: upload to unknown texture {texture:?}");
            return;
        };
        let shrink = |v: u32| v.checked_shr(mip).unwrap_or(0).max(1) as usize;
        let width = shrink(desc.width);
        let height = if desc.kind == TextureKind::D1 { 1 } else { shrink(desc.height) };
        let (depth, slices) = match desc.kind {
            TextureKind::D3 => (shrink(desc.depth_or_layers), 1),
            TextureKind::D2Array => (1, desc.depth_or_layers.max(1) as usize),
            TextureKind::Cube => (1, 6),
            TextureKind::D1 | TextureKind::D2 => (1, 1),
        };
        let bytes_per_row = width * desc.format.bytes_per_pixel() as usize;
        let bytes_per_image = bytes_per_row * height;
        let slice_bytes = bytes_per_image * depth;
        if data.len() < slice_bytes * slices {
            log::warn!(
                "NativeMetal: {} bytes do not cover mip {mip} of {texture:?} ({} expected)",
                data.len(),
                slice_bytes * slices
            );
            return;
        }
        let region = MTLRegion {
            origin: MTLOrigin { x: 0, y: 0, z: 0 },
            size: MTLSize { width, height, depth },
        };
        for slice in 0..slices {
            let bytes = &data[slice * slice_bytes..(slice + 1) * slice_bytes];
            let Some(ptr) = NonNull::new(bytes.as_ptr().cast_mut().cast()) else {
                return;
            };
            // SAFETY: `bytes` covers the region of this slice.
            unsafe {
                raw.replaceRegion_mipmapLevel_slice_withBytes_bytesPerRow_bytesPerImage(
                    region,
                    mip as usize,
                    slice,
                    ptr,
                    bytes_per_row,
                    bytes_per_image,
                );
            }
        }
    }

    fn new_sampler(&mut self, desc: &SamplerDesc, max_anisotropy: f32) -> Result<MtlObject, String> {
        let descriptor = MTLSamplerDescriptor::new();
        // SAFETY: every value lies in the range the descriptor accepts.
        unsafe {
            descriptor.setMinFilter(min_mag(desc.min_filter));
            descriptor.setMagFilter(min_mag(desc.mag_filter));
            descriptor.setMipFilter(match desc.mip_filter {
                FilterMode::Nearest => MTLSamplerMipFilter::Nearest,
                FilterMode::Linear => MTLSamplerMipFilter::Linear,
            });
            descriptor.setSAddressMode(address_mode(desc.address_u));
            descriptor.setTAddressMode(address_mode(desc.address_v));
            descriptor.setRAddressMode(address_mode(desc.address_w));
            descriptor.setMaxAnisotropy(max_anisotropy.max(1.0) as usize);
            descriptor.setLodMinClamp(desc.lod_min);
            descriptor.setLodMaxClamp(desc.lod_max);
            if let Some(function) = desc.compare {
                descriptor.setCompareFunction(compare(function));
            }
        }
        let sampler = self
            .device
            .newSamplerStateWithDescriptor(&descriptor)
            .ok_or("failed to create a sampler state")?;
        Ok(self.insert(Native::Sampler(sampler)))
    }

    fn new_library(&mut self, source: &str) -> Result<MtlObject, String> {
        let library = self
            .device
            .newLibraryWithSource_options_error(&NSString::from_str(source), None)
            .map_err(|e| described(&e))?;
        Ok(self.insert(Native::Library(library)))
    }

    fn new_function(&mut self, library: MtlObject, entry_point: &str) -> Result<MtlObject, String> {
        let Some(Native::Library(raw)) = self.objects.get(&library.0) else {
            return Err(format!("{library:?} is not a library"));
        };
        let function = raw
            .newFunctionWithName(&NSString::from_str(entry_point))
            .ok_or_else(|| format!("no function named '{entry_point}' in the library"))?;
        Ok(self.insert(Native::Function(function)))
    }

    fn new_render_pipeline(&mut self, desc: &MtlRenderPipelineDesc<'_>) -> Result<MtlObject, String> {
        let descriptor = MTLRenderPipelineDescriptor::new();
        let vertex_descriptor = MTLVertexDescriptor::new();
        // SAFETY: functions are alive and every index stays inside the
        // argument tables.
        unsafe {
            descriptor.setLabel(Some(&NSString::from_str(desc.label)));
            descriptor.setVertexFunction(Some(self.function(desc.vertex)?));
            descriptor.setFragmentFunction(Some(self.function(desc.fragment)?));

            for (slot, layout) in desc.vertex_layouts.iter().enumerate() {
                let buffer_index = VERTEX_BUFFER_BASE as usize + slot;
                let native = vertex_descriptor.layouts().objectAtIndexedSubscript(buffer_index);
                native.setStride(layout.stride as usize);
                native.setStepFunction(match layout.step_mode {
                    VertexStepMode::Vertex => MTLVertexStepFunction::PerVertex,
                    VertexStepMode::Instance => MTLVertexStepFunction::PerInstance,
                });
                for attribute in &layout.attributes {
                    let native = vertex_descriptor
                        .attributes()
                        .objectAtIndexedSubscript(attribute.location as usize);
                    native.setFormat(vertex_format(attribute.format));
                    native.setOffset(attribute.offset as usize);
                    native.setBufferIndex(buffer_index);
                }
            }
            descriptor.setVertexDescriptor(Some(&vertex_descriptor));

            for (i, &format) in desc.color_formats.iter().enumerate() {
                let attachment = descriptor.colorAttachments().objectAtIndexedSubscript(i);
                attachment.setPixelFormat(pixel_format(format));
                attachment.setBlendingEnabled(desc.blend.enabled);
                attachment.setSourceRGBBlendFactor(blend_factor(desc.blend.src_color));
                attachment.setDestinationRGBBlendFactor(blend_factor(desc.blend.dst_color));
                attachment.setRgbBlendOperation(blend_op(desc.blend.color_op));
                attachment.setSourceAlphaBlendFactor(blend_factor(desc.blend.src_alpha));
                attachment.setDestinationAlphaBlendFactor(blend_factor(desc.blend.dst_alpha));
                attachment.setAlphaBlendOperation(blend_op(desc.blend.alpha_op));
            }
            if let Some(format) = desc.depth_format {
                descriptor.setDepthAttachmentPixelFormat(pixel_format(format));
                if format.has_stencil() {
                    descriptor.setStencilAttachmentPixelFormat(pixel_format(format));
                }
            }
        }
        let pipeline = self
            .device
            .newRenderPipelineStateWithDescriptor_error(&descriptor)
            .map_err(|e| described(&e))?;
        log::debug!("NativeMetal: created render pipeline '{}'", desc.label);
        Ok(self.insert(Native::RenderPipeline(pipeline)))
    }

    fn new_compute_pipeline(&mut self, function: MtlObject) -> Result<MtlObject, String> {
        let pipeline = self
            .device
            .newComputePipelineStateWithFunction_error(self.function(function)?)
            .map_err(|e| described(&e))?;
        Ok(self.insert(Native::ComputePipeline(pipeline)))
    }

    fn new_depth_stencil_state(&mut self, state: &DepthStencilState) -> Result<MtlObject, String> {
        let descriptor = MTLDepthStencilDescriptor::new();
        // SAFETY: plain descriptor setters.
        unsafe {
            descriptor.setDepthCompareFunction(if state.depth_test {
                compare(state.depth_compare)
            } else {
                MTLCompareFunction::Always
            });
            descriptor.setDepthWriteEnabled(state.depth_test && state.depth_write);
        }
        let native = self
            .device
            .newDepthStencilStateWithDescriptor(&descriptor)
            .ok_or("failed to create a depth stencil state")?;
        Ok(self.insert(Native::DepthStencil(native)))
    }

    fn new_shared_event(&mut self) -> Result<MtlObject, String> {
        let event = self.device.newSharedEvent().ok_or("failed to create a shared event")?;
        Ok(self.insert(Native::Event(event)))
    }

    fn event_value(&mut self, event: MtlObject) -> u64 {
        match self.objects.get(&event.0) {
            Some(Native::Event(e)) => e.signaledValue(),
            _ => 0,
        }
    }

    fn wait_event(&mut self, event: MtlObject, value: u64, timeout_ns: u64) -> bool {
        let Some(Native::Event(e)) = self.objects.get(&event.0) else {
            return false;
        };
        e.waitUntilSignaledValue_timeoutMS(value, timeout_ns.div_ceil(1_000_000))
    }

    fn new_counter_buffer(&mut self, samples: u32) -> Result<MtlObject, String> {
        let timestamp = self
            .device
            .counterSets()
            .and_then(|sets| sets.iter().find(|set| set.name().to_string() == "timestamp"))
            .ok_or("the device exposes no timestamp counter set")?;
        let descriptor = MTLCounterSampleBufferDescriptor::new();
        // SAFETY: the counter set comes from this device.
        unsafe {
            descriptor.setCounterSet(Some(&timestamp));
            descriptor.setStorageMode(MTLStorageMode::Shared);
            descriptor.setSampleCount(samples as usize);
        }
        let buffer = self
            .device
            .newCounterSampleBufferWithDescriptor_error(&descriptor)
            .map_err(|e| described(&e))?;
        Ok(self.insert(Native::Counters(buffer)))
    }

    fn resolve_counter(&mut self, buffer: MtlObject, index: u32) -> Option<u64> {
        let Some(Native::Counters(raw)) = self.objects.get(&buffer.0) else {
            return None;
        };
        // SAFETY: the range holds one sample inside the buffer.
        let data = unsafe { raw.resolveCounterRange(NSRange::new(index as usize, 1)) }?;
        let bytes: [u8; 8] = data.to_vec().get(..8)?.try_into().ok()?;
        match u64::from_ne_bytes(bytes) {
            0 | COUNTER_ERROR_VALUE => None,
            value => Some(value),
        }
    }

    fn release(&mut self, object: MtlObject) {
        if self.objects.remove(&object.0).is_none() {
            log::warn!("NativeMetal: release of unknown object {object:?}");
        }
    }

    fn new_command_buffer(&mut self) -> Result<MtlObject, String> {
        let cb = self.queue.commandBuffer().ok_or("the queue returned no command buffer")?;
        Ok(self.insert(Native::CommandBuffer(cb)))
    }

    fn new_render_encoder(&mut self, command_buffer: MtlObject, pass: &MtlRenderPass) -> Result<MtlObject, String> {
        let descriptor = MTLRenderPassDescriptor::new();
        for (i, target) in pass.colors.iter().enumerate() {
            let texture = match target.texture {
                Some(t) => self.texture(t).cloned().ok_or_else(|| format!("{t:?} is not a texture"))?,
                None => self.drawable_texture()?,
            };
            let [r, g, b, a] = target.clear_color.map(f64::from);
            // SAFETY: the attachment index is below the device limit.
            unsafe {
                let attachment = descriptor.colorAttachments().objectAtIndexedSubscript(i);
                attachment.setTexture(Some(&texture));
                attachment.setLoadAction(load_action(target.load));
                attachment.setStoreAction(store_action(target.store));
                attachment.setClearColor(MTLClearColor {
                    red: r,
                    green: g,
                    blue: b,
                    alpha: a,
                });
            }
        }
        if let Some(depth) = pass.depth {
            let texture = match depth.texture {
                Some(t) => self.texture(t).cloned().ok_or_else(|| format!("{t:?} is not a texture"))?,
                None => self.default_depth.clone(),
            };
            let attachment = descriptor.depthAttachment();
            // SAFETY: the texture has a depth format.
            unsafe {
                attachment.setTexture(Some(&texture));
                attachment.setLoadAction(load_action(depth.load));
                attachment.setStoreAction(store_action(depth.store));
                attachment.setClearDepth(f64::from(depth.clear_depth));
            }
        }
        let cb = self
            .command_buffer(command_buffer)
            .ok_or_else(|| format!("{command_buffer:?} is not a command buffer"))?;
        let raw = cb
            .renderCommandEncoderWithDescriptor(&descriptor)
            .ok_or("failed to open a render encoder")?;
        Ok(self.insert(Native::RenderEncoder(RenderEncoder { raw })))
    }

    fn new_compute_encoder(&mut self, command_buffer: MtlObject) -> Result<MtlObject, String> {
        let cb = self
            .command_buffer(command_buffer)
            .ok_or_else(|| format!("{command_buffer:?} is not a command buffer"))?;
        let raw = cb.computeCommandEncoder().ok_or("failed to open a compute encoder")?;
        Ok(self.insert(Native::ComputeEncoder(ComputeEncoder {
            raw,
            threads_per_group: 1,
        })))
    }

    fn encode(&mut self, encoder: MtlObject, command: EncoderCommand) {
        match self.objects.remove(&encoder.0) {
            Some(Native::RenderEncoder(render)) => {
                self.encode_render(&render, command);
                self.objects.insert(encoder.0, Native::RenderEncoder(render));
            }
            Some(Native::ComputeEncoder(mut compute)) => {
                self.encode_compute(&mut compute, command);
                self.objects.insert(encoder.0, Native::ComputeEncoder(compute));
            }
            Some(other) => {
                self.objects.insert(encoder.0, other);
                log::warn!("NativeMetal: {encoder:?} is not an encoder");
            }
            None => log::warn!("NativeMetal: {} on unknown encoder {encoder:?}", command.name()),
        }
    }

    fn end_encoding(&mut self, encoder: MtlObject) {
        match self.objects.remove(&encoder.0) {
            Some(Native::RenderEncoder(render)) => render.raw.endEncoding(),
            Some(Native::ComputeEncoder(compute)) => compute.raw.endEncoding(),
            Some(other) => {
                self.objects.insert(encoder.0, other);
                log::warn!("NativeMetal: end_encoding on non-encoder {encoder:?}");
            }
            None => log::warn!("NativeMetal: end_encoding on unknown encoder {encoder:?}"),
        }
    }

    fn sample_counter(&mut self, command_buffer: MtlObject, buffer: MtlObject, index: u32) {
        let (Some(cb), Some(Native::Counters(counters))) =
            (self.command_buffer(command_buffer), self.objects.get(&buffer.0))
        else {
            return;
        };
        // Apple GPUs only sample at encoder boundaries, so an empty blit pass
        // carries the sample.
        let descriptor = MTLBlitPassDescriptor::new();
        // SAFETY: the sample index is below the buffer's sample count.
        unsafe {
            let attachment = descriptor.sampleBufferAttachments().objectAtIndexedSubscript(0);
            attachment.setSampleBuffer(Some(counters));
            attachment.setStartOfEncoderSampleIndex(index as usize);
            attachment.setEndOfEncoderSampleIndex(DONT_SAMPLE);
        }
        if let Some(blit) = cb.blitCommandEncoderWithDescriptor(&descriptor) {
            blit.endEncoding();
        }
    }

    fn encode_signal_event(&mut self, command_buffer: MtlObject, event: MtlObject, value: u64) {
        let (Some(cb), Some(Native::Event(e))) = (self.command_buffer(command_buffer), self.objects.get(&event.0)) else {
            return;
        };
        cb.encodeSignalEvent_value(ProtocolObject::from_ref(&**e), value);
    }

    fn commit(&mut self, command_buffer: MtlObject, present: bool) {
        let Some(Native::CommandBuffer(cb)) = self.objects.remove(&command_buffer.0) else {
            log::warn!("NativeMetal: commit of unknown command buffer {command_buffer:?}");
            return;
        };
        if present {
            if let Some(drawable) = self.drawable.take() {
                cb.presentDrawable(ProtocolObject::from_ref(&*drawable));
            }
        }
        cb.commit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth24_maps_to_a_format_apple_gpus_support() {
        assert_eq!(pixel_format(Format::Depth24PlusStencil8), MTLPixelFormat::Depth32Float_Stencil8);
        assert_eq!(pixel_format(Format::Bgra8UnormSrgb), MTLPixelFormat::BGRA8Unorm_sRGB);
    }

    #[test]
    fn render_targets_get_render_target_usage() {
        let desc = TextureDesc::d2(16, 16, Format::Rgba8Unorm, TextureUsage::SAMPLED | TextureUsage::RENDER_TARGET);
        let descriptor = texture_descriptor(&desc, MTLStorageMode::Private);
        let usage = descriptor.usage();
        assert!(usage.contains(MTLTextureUsage::RenderTarget));
        assert!(usage.contains(MTLTextureUsage::ShaderRead));
        assert!(!usage.contains(MTLTextureUsage::ShaderWrite));
    }
}
