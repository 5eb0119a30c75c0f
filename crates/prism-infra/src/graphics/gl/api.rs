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

//! The narrow slice of OpenGL the GL device is written against.
//!
//! Object names are plain `u32` GL names; `0` is never a valid object. The
//! `glow` feature provides an implementation over a live context, and
//! [`HeadlessGl`](super::HeadlessGl) emulates one in memory.

use prism_core::rhi::{
    BlendState, BufferUsage, Caps, DepthBiasState, DepthStencilState, Format, IndexFormat,
    PrimitiveTopology, RasterState, SamplerDesc, ScissorRect, ShaderCode, ShaderStage,
    TextureDesc, TextureKind, VertexLayout, Viewport,
};
use std::fmt::Debug;

/// A GL object name.
pub type GlName = u32;

/// A texture attached to a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlAttachment {
    /// Texture name.
    pub texture: GlName,
    /// Texture target.
    pub kind: TextureKind,
    /// Texel format.
    pub format: Format,
}

/// Outcome of `glClientWaitSync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlSyncStatus {
    /// Already signaled or signaled during the wait.
    Signaled,
    /// The timeout expired.
    TimedOut,
    /// The wait failed (`GL_WAIT_FAILED`).
    Failed,
}

/// OpenGL entry points used by [`GlDevice`](super::GlDevice).
///
/// Creation calls return the driver's info log as the error. State calls
/// are issued verbatim; redundancy filtering happens in the command list.
pub trait GlApi: Debug {
    /// Queries context capabilities.
    fn caps(&self) -> Caps;

    /// `glCreateBuffers` + `glNamedBufferData`.
    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        host_visible: bool,
    ) -> Result<GlName, String>;
    /// `glNamedBufferSubData`.
    fn buffer_sub_data(&mut self, buffer: GlName, offset: u64, data: &[u8]);
    /// `glDeleteBuffers`.
    fn delete_buffer(&mut self, buffer: GlName);

    /// Creates a texture with immutable storage for every mip level.
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<GlName, String>;
    /// Uploads one full mip level.
    fn texture_sub_image(&mut self, texture: GlName, desc: &TextureDesc, mip_level: u32, data: &[u8]);
    /// `glDeleteTextures`.
    fn delete_texture(&mut self, texture: GlName);

    /// Creates a sampler object; `max_anisotropy` is already clamped.
    fn create_sampler(&mut self, desc: &SamplerDesc, max_anisotropy: f32)
        -> Result<GlName, String>;
    /// `glDeleteSamplers`.
    fn delete_sampler(&mut self, sampler: GlName);

    /// Compiles a shader object. The error carries the info log.
    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        code: &ShaderCode,
        entry_point: &str,
    ) -> Result<GlName, String>;
    /// `glDeleteShader`.
    fn delete_shader(&mut self, shader: GlName);
    /// Links compiled shaders into a program. The error carries the info log.
    fn link_program(&mut self, shaders: &[GlName]) -> Result<GlName, String>;
    /// `glDeleteProgram`.
    fn delete_program(&mut self, program: GlName);

    /// Creates a vertex array object with the attribute formats of `layouts`,
    /// slot `i` using vertex buffer binding `i`.
    fn create_vertex_array(&mut self, layouts: &[VertexLayout]) -> Result<GlName, String>;
    /// `glDeleteVertexArrays`.
    fn delete_vertex_array(&mut self, vao: GlName);

    /// Creates a framebuffer and attaches the targets.
    fn create_framebuffer(
        &mut self,
        colors: &[GlAttachment],
        depth: Option<GlAttachment>,
    ) -> Result<GlName, String>;
    /// `glCheckNamedFramebufferStatus`; the error names the status.
    fn framebuffer_complete(&mut self, framebuffer: GlName) -> Result<(), String>;
    /// `glDeleteFramebuffers`.
    fn delete_framebuffer(&mut self, framebuffer: GlName);

    /// `glGenQueries`.
    fn create_query(&mut self) -> Result<GlName, String>;
    /// `glDeleteQueries`.
    fn delete_query(&mut self, query: GlName);
    /// `glBeginQuery(GL_TIME_ELAPSED)`.
    fn begin_time_query(&mut self, query: GlName);
    /// `glEndQuery(GL_TIME_ELAPSED)`.
    fn end_time_query(&mut self);
    /// `glQueryCounter(GL_TIMESTAMP)`.
    fn timestamp(&mut self, query: GlName);
    /// The result in nanoseconds if available.
    fn query_result(&mut self, query: GlName) -> Option<u64>;

    /// `glFenceSync`.
    fn fence_sync(&mut self) -> Result<GlName, String>;
    /// `glClientWaitSync` with flush.
    fn client_wait_sync(&mut self, sync: GlName, timeout_ns: u64) -> GlSyncStatus;
    /// `glDeleteSync`.
    fn delete_sync(&mut self, sync: GlName);

    /// Binds a draw framebuffer, `0` being the default one.
    fn bind_framebuffer(&mut self, framebuffer: GlName);
    /// Clears the bound framebuffer; `None` entries are left untouched.
    fn clear(&mut self, colors: &[Option<[f32; 4]>], depth: Option<f32>, stencil: Option<u32>);
    /// `glUseProgram`.
    fn use_program(&mut self, program: GlName);
    /// `glBindVertexArray`.
    fn bind_vertex_array(&mut self, vao: GlName);
    /// Blend enable, factors and equations.
    fn set_blend(&mut self, blend: &BlendState);
    /// Culling, winding and polygon mode.
    fn set_raster(&mut self, raster: &RasterState);
    /// Depth test, mask and function.
    fn set_depth_state(&mut self, state: &DepthStencilState);
    /// Polygon offset.
    fn set_depth_bias(&mut self, bias: &DepthBiasState);
    /// `glViewport` + `glDepthRange`.
    fn set_viewport(&mut self, viewport: &Viewport);
    /// Scissor test and rectangle.
    fn set_scissor(&mut self, rect: Option<&ScissorRect>);
    /// `glBindVertexBuffer`.
    fn bind_vertex_buffer(&mut self, slot: u32, buffer: GlName, offset: u64, stride: u32);
    /// Binds the element array buffer of the current vertex array.
    fn bind_index_buffer(&mut self, buffer: GlName);
    /// `glBindBufferRange(GL_UNIFORM_BUFFER)`.
    fn bind_uniform_range(&mut self, binding: u32, buffer: GlName, offset: u64, size: u64);
    /// Binds a texture and sampler to a texture unit.
    fn bind_texture(&mut self, unit: u32, kind: TextureKind, texture: GlName, sampler: GlName);
    /// `glDrawArraysInstanced`.
    fn draw_arrays(&mut self, topology: PrimitiveTopology, first: u32, count: u32, instances: u32);
    /// `glDrawElementsInstancedBaseVertex`.
    fn draw_elements(
        &mut self,
        topology: PrimitiveTopology,
        count: u32,
        format: IndexFormat,
        byte_offset: u64,
        instances: u32,
        base_vertex: i32,
    );
    /// `glDispatchCompute`.
    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32);
    /// `glMemoryBarrier(GL_ALL_BARRIER_BITS)`.
    fn memory_barrier(&mut self);
    /// `glFlush`.
    fn flush(&mut self);
}
