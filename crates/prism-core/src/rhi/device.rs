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

use super::caps::{Caps, GraphicsBackendType};
use super::cmd::CmdList;
use super::error::{RenderError, ResourceError};
use super::handle::{
    BufferHandle, FenceHandle, FramebufferHandle, PipelineHandle, QueryHandle, SamplerHandle,
    ShaderHandle, TextureHandle,
};
use super::types::{
    BufferDesc, FenceStatus, FramebufferDesc, PipelineDesc, QueryKind, SamplerDesc, ShaderDesc,
    TextureDesc,
};
use std::fmt::Debug;

/// The contract every graphics backend implements.
///
/// A device exclusively owns the native objects behind every handle it hands
/// out. Handles are plain values; resolving a handle that was destroyed, or
/// that came from another device, fails with [`ResourceError::InvalidHandle`].
pub trait Device: Debug {
    /// The API this device drives.
    fn backend(&self) -> GraphicsBackendType;

    /// Capabilities of this device, fixed for its lifetime.
    fn caps(&self) -> &Caps;

    /// Creates a new GPU buffer.
    /// ## Arguments
    /// * `desc` - Size, usage and memory placement of the buffer.
    /// ## Errors
    /// * `ResourceError::InvalidDescriptor` - If the size is zero.
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, ResourceError>;

    /// Destroys a buffer. The handle never resolves again.
    fn destroy_buffer(&mut self, buffer: BufferHandle) -> Result<(), ResourceError>;

    /// Writes `data` into a buffer at `offset`.
    /// ## Errors
    /// * `ResourceError::OutOfBounds` - If the write exceeds the buffer size.
    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), ResourceError>;

    /// Creates a texture.
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, ResourceError>;

    /// Destroys a texture.
    fn destroy_texture(&mut self, texture: TextureHandle) -> Result<(), ResourceError>;

    /// Uploads the full contents of one mip level (all layers).
    fn write_texture(
        &mut self,
        texture: TextureHandle,
        mip_level: u32,
        data: &[u8],
    ) -> Result<(), ResourceError>;

    /// Creates a sampler.
    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerHandle, ResourceError>;

    /// Destroys a sampler.
    fn destroy_sampler(&mut self, sampler: SamplerHandle) -> Result<(), ResourceError>;

    /// Compiles one shader stage.
    /// ## Errors
    /// * `ResourceError::Compilation` - If the backend compiler rejects the code.
    fn create_shader(&mut self, desc: &ShaderDesc) -> Result<ShaderHandle, ResourceError>;

    /// Destroys a shader stage. Pipelines built from it stay valid.
    fn destroy_shader(&mut self, shader: ShaderHandle) -> Result<(), ResourceError>;

    /// Builds a graphics or compute pipeline from previously created shaders.
    /// ## Errors
    /// * `ResourceError::InvalidHandle` - If a referenced shader does not resolve.
    /// * `ResourceError::PipelineCreation` - If linking or state creation fails.
    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineHandle, ResourceError>;

    /// Destroys a pipeline.
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), ResourceError>;

    /// Groups render targets into a framebuffer.
    /// ## Errors
    /// * `ResourceError::TooManyAttachments` - Above the device's attachment limit.
    /// * `ResourceError::InvalidHandle` - If an attachment does not resolve.
    /// * `ResourceError::IncompleteFramebuffer` - If the backend rejects the combination.
    fn create_framebuffer(
        &mut self,
        desc: &FramebufferDesc,
    ) -> Result<FramebufferHandle, ResourceError>;

    /// Destroys a framebuffer. The attached textures are not destroyed.
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle)
        -> Result<(), ResourceError>;

    /// Creates a GPU query object.
    fn create_query(&mut self, kind: QueryKind) -> Result<QueryHandle, ResourceError>;

    /// Destroys a query.
    fn destroy_query(&mut self, query: QueryHandle) -> Result<(), ResourceError>;

    /// Reads a query result in nanoseconds, or `None` if the GPU has not
    /// produced it yet.
    fn query_result(&mut self, query: QueryHandle) -> Result<Option<u64>, ResourceError>;

    /// Creates an unsignaled fence.
    fn create_fence(&mut self) -> Result<FenceHandle, ResourceError>;

    /// Destroys a fence.
    fn destroy_fence(&mut self, fence: FenceHandle) -> Result<(), ResourceError>;

    /// Blocks until `fence` is signaled or `timeout_ns` elapses.
    /// [`TIMEOUT_INFINITE`](super::types::TIMEOUT_INFINITE) waits forever.
    fn wait_fence(&mut self, fence: FenceHandle, timeout_ns: u64)
        -> Result<FenceStatus, RenderError>;

    /// Returns the immediate command list.
    ///
    /// The list borrows the device mutably, so no resource can be created or
    /// destroyed while it is alive and it can never outlive the device.
    fn immediate(&mut self) -> Box<dyn CmdList + '_>;

    /// Submits the recorded work and advances to the next frame's resources.
    fn present(&mut self) -> Result<(), RenderError>;
}
