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

//! The Metal entry points the Metal device is written against.
//!
//! Objects are opaque [`MtlObject`] ids owned by the driver. Encoders are
//! fed through [`EncoderCommand`] so that the device's redundancy filtering
//! and encoder lifecycle stay independent of the Objective-C bridge.

use prism_core::rhi::{
    BlendState, CullMode, DepthStencilState, Format, FrontFace, IndexFormat, LoadOp,
    PrimitiveTopology, SamplerDesc, ScissorRect, ShaderStages, StoreOp, TextureDesc,
    VertexLayout, Viewport,
};
use std::fmt::Debug;

/// An object owned by a [`MetalDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MtlObject(pub u64);

/// A color target of a render pass; `None` texture selects the drawable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MtlColorTarget {
    /// Target texture.
    pub texture: Option<MtlObject>,
    /// Load action.
    pub load: LoadOp,
    /// Store action.
    pub store: StoreOp,
    /// Clear color.
    pub clear_color: [f32; 4],
}

/// The depth target of a render pass; `None` texture selects the default depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MtlDepthTarget {
    /// Target texture.
    pub texture: Option<MtlObject>,
    /// Load action.
    pub load: LoadOp,
    /// Store action.
    pub store: StoreOp,
    /// Clear depth.
    pub clear_depth: f32,
}

/// `MTLRenderPassDescriptor` contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MtlRenderPass {
    /// Color targets.
    pub colors: Vec<MtlColorTarget>,
    /// Depth target.
    pub depth: Option<MtlDepthTarget>,
}

/// `MTLRenderPipelineDescriptor` contents.
#[derive(Debug, Clone, Copy)]
pub struct MtlRenderPipelineDesc<'a> {
    /// Debug label.
    pub label: &'a str,
    /// Vertex function.
    pub vertex: MtlObject,
    /// Fragment function.
    pub fragment: MtlObject,
    /// Vertex descriptor, slot `i` reading buffer index `VERTEX_BUFFER_BASE + i`.
    pub vertex_layouts: &'a [VertexLayout],
    /// Color attachment pixel formats.
    pub color_formats: &'a [Format],
    /// Depth attachment pixel format.
    pub depth_format: Option<Format>,
    /// Blending applied to every color attachment.
    pub blend: BlendState,
}

/// A command recorded into a render or compute encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderCommand {
    /// `setRenderPipelineState:`
    SetRenderPipeline(MtlObject),
    /// `setComputePipelineState:`
    SetComputePipeline(MtlObject),
    /// `setDepthStencilState:`
    SetDepthStencilState(MtlObject),
    /// `setCullMode:` + `setFrontFacingWinding:` + `setTriangleFillMode:`
    SetRaster {
        /// Culled faces.
        cull_mode: CullMode,
        /// Front winding.
        front_face: FrontFace,
        /// Line fill.
        wireframe: bool,
    },
    /// `setDepthBias:slopeScale:clamp:`
    SetDepthBias {
        /// Constant bias.
        constant: f32,
        /// Slope scaled bias.
        slope_scale: f32,
        /// Clamp.
        clamp: f32,
    },
    /// `setViewport:`
    SetViewport(Viewport),
    /// `setScissorRect:`
    SetScissor(ScissorRect),
    /// `set{Vertex,Fragment,}Buffer:offset:atIndex:` for every stage in `stages`.
    SetBuffer {
        /// Stages receiving the binding.
        stages: ShaderStages,
        /// Argument table index.
        index: u32,
        /// Buffer.
        buffer: MtlObject,
        /// Byte offset.
        offset: u64,
    },
    /// Texture + sampler binding for every stage in `stages`.
    SetTexture {
        /// Stages receiving the binding.
        stages: ShaderStages,
        /// Argument table index.
        index: u32,
        /// Texture.
        texture: MtlObject,
        /// Sampler, if any.
        sampler: Option<MtlObject>,
    },
    /// `drawPrimitives:vertexStart:vertexCount:instanceCount:`
    Draw {
        /// Primitive type.
        topology: PrimitiveTopology,
        /// First vertex.
        vertex_start: u32,
        /// Vertex count.
        vertex_count: u32,
        /// Instance count.
        instance_count: u32,
    },
    /// `drawIndexedPrimitives:...baseVertex:baseInstance:`
    DrawIndexed {
        /// Primitive type.
        topology: PrimitiveTopology,
        /// Index count.
        index_count: u32,
        /// Index type.
        index_format: IndexFormat,
        /// Index buffer.
        index_buffer: MtlObject,
        /// Byte offset of the first index.
        index_offset: u64,
        /// Instance count.
        instance_count: u32,
        /// Added to every index.
        base_vertex: i32,
    },
    /// `dispatchThreadgroups:threadsPerThreadgroup:`
    Dispatch {
        /// Threadgroups per grid.
        groups: [u32; 3],
    },
    /// `memoryBarrierWithScope:` over buffers and textures.
    MemoryBarrier,
}

impl EncoderCommand {
    /// Stable name used by logs and call counters.
    pub fn name(&self) -> &'static str {
        match self {
            EncoderCommand::SetRenderPipeline(_) => "set_render_pipeline",
            EncoderCommand::SetComputePipeline(_) => "set_compute_pipeline",
            EncoderCommand::SetDepthStencilState(_) => "set_depth_stencil_state",
            EncoderCommand::SetRaster { .. } => "set_raster",
            EncoderCommand::SetDepthBias { .. } => "set_depth_bias",
            EncoderCommand::SetViewport(_) => "set_viewport",
            EncoderCommand::SetScissor(_) => "set_scissor",
            EncoderCommand::SetBuffer { .. } => "set_buffer",
            EncoderCommand::SetTexture { .. } => "set_texture",
            EncoderCommand::Draw { .. } => "draw",
            EncoderCommand::DrawIndexed { .. } => "draw_indexed",
            EncoderCommand::Dispatch { .. } => "dispatch",
            EncoderCommand::MemoryBarrier => "memory_barrier",
        }
    }
}

/// Metal entry points used by [`MetalDevice`](super::MetalDevice).
///
/// Creation calls return the framework's error description on failure.
pub trait MetalDriver: Debug {
    /// `newBufferWithLength:options:`; shared storage when `host_visible`.
    fn new_buffer(&mut self, size: u64, host_visible: bool) -> Result<MtlObject, String>;
    /// Copies into a buffer's contents (shared) or through a blit (private).
    fn buffer_write(&mut self, buffer: MtlObject, offset: u64, data: &[u8]);

    /// `newTextureWithDescriptor:`
    fn new_texture(&mut self, desc: &TextureDesc) -> Result<MtlObject, String>;
    /// `replaceRegion:` for one full mip level, every slice.
    fn replace_texture_level(&mut self, texture: MtlObject, desc: &TextureDesc, mip: u32, data: &[u8]);

    /// `newSamplerStateWithDescriptor:`; anisotropy already clamped.
    fn new_sampler(&mut self, desc: &SamplerDesc, max_anisotropy: f32) -> Result<MtlObject, String>;

    /// `newLibraryWithSource:options:error:`
    fn new_library(&mut self, source: &str) -> Result<MtlObject, String>;
    /// `newFunctionWithName:`
    fn new_function(&mut self, library: MtlObject, entry_point: &str) -> Result<MtlObject, String>;
    /// `newRenderPipelineStateWithDescriptor:error:`
    fn new_render_pipeline(&mut self, desc: &MtlRenderPipelineDesc<'_>) -> Result<MtlObject, String>;
    /// `newComputePipelineStateWithFunction:error:`
    fn new_compute_pipeline(&mut self, function: MtlObject) -> Result<MtlObject, String>;
    /// `newDepthStencilStateWithDescriptor:`
    fn new_depth_stencil_state(&mut self, state: &DepthStencilState) -> Result<MtlObject, String>;

    /// `newSharedEvent`
    fn new_shared_event(&mut self) -> Result<MtlObject, String>;
    /// Current `signaledValue` of a shared event.
    fn event_value(&mut self, event: MtlObject) -> u64;
    /// Blocks until the event reaches `value` or `timeout_ns` elapses.
    /// Returns `true` when the value was reached.
    fn wait_event(&mut self, event: MtlObject, value: u64, timeout_ns: u64) -> bool;

    /// A counter sample buffer with `samples` timestamp slots.
    fn new_counter_buffer(&mut self, samples: u32) -> Result<MtlObject, String>;
    /// Resolved timestamp in nanoseconds, `None` until the GPU wrote it.
    fn resolve_counter(&mut self, buffer: MtlObject, index: u32) -> Option<u64>;

    /// Releases any object created above.
    fn release(&mut self, object: MtlObject);

    /// `commandBuffer` on the device queue.
    fn new_command_buffer(&mut self) -> Result<MtlObject, String>;
    /// `renderCommandEncoderWithDescriptor:`
    fn new_render_encoder(&mut self, command_buffer: MtlObject, pass: &MtlRenderPass) -> Result<MtlObject, String>;
    /// `computeCommandEncoder`
    fn new_compute_encoder(&mut self, command_buffer: MtlObject) -> Result<MtlObject, String>;
    /// Records one command.
    fn encode(&mut self, encoder: MtlObject, command: EncoderCommand);
    /// `endEncoding`
    fn end_encoding(&mut self, encoder: MtlObject);
    /// `sampleCountersInBuffer:atSampleIndex:withBarrier:` between encoders.
    fn sample_counter(&mut self, command_buffer: MtlObject, buffer: MtlObject, index: u32);
    /// `encodeSignalEvent:value:`
    fn encode_signal_event(&mut self, command_buffer: MtlObject, event: MtlObject, value: u64);
    /// `presentDrawable:` (when requested) followed by `commit`.
    fn commit(&mut self, command_buffer: MtlObject, present: bool);
}
