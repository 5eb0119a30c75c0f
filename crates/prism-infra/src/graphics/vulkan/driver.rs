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

//! The Vulkan entry points the Vulkan device is written against.
//!
//! Handles are plain `ash` handles. Instance, physical device and surface
//! selection happen before a driver is handed to the device.

use ash::vk;
use prism_core::rhi::{BlendState, DepthStencilState, PrimitiveTopology, RasterState, TextureDesc, VertexLayout};
use std::fmt::Debug;

/// One attachment of a cached render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VkAttachmentKey {
    /// Pixel format.
    pub format: vk::Format,
    /// Load operation.
    pub load: vk::AttachmentLoadOp,
    /// Store operation.
    pub store: vk::AttachmentStoreOp,
    /// Layout the attachment is in when the pass begins.
    pub initial_layout: vk::ImageLayout,
    /// Layout the pass leaves it in.
    pub final_layout: vk::ImageLayout,
}

/// Everything a `VkRenderPass` is built from; also its cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VkRenderPassKey {
    /// Color attachments, in location order.
    pub colors: Vec<VkAttachmentKey>,
    /// Depth attachment.
    pub depth: Option<VkAttachmentKey>,
}

/// A shader stage of a graphics pipeline.
#[derive(Debug, Clone, Copy)]
pub struct VkStage<'a> {
    /// SPIR-V module.
    pub module: vk::ShaderModule,
    /// Entry point name.
    pub entry_point: &'a str,
}

/// Graphics pipeline creation parameters. Viewport, scissor and depth bias
/// are dynamic state.
#[derive(Debug, Clone, Copy)]
pub struct VkGraphicsPipelineDesc<'a> {
    /// Debug label.
    pub label: &'a str,
    /// Vertex stage.
    pub vertex: VkStage<'a>,
    /// Fragment stage.
    pub fragment: VkStage<'a>,
    /// A render pass compatible with the targets the pipeline draws into.
    pub render_pass: vk::RenderPass,
    /// Vertex input bindings, binding `i` for slot `i`.
    pub vertex_layouts: &'a [VertexLayout],
    /// Input assembly.
    pub topology: PrimitiveTopology,
    /// Rasterization.
    pub raster: RasterState,
    /// Depth test.
    pub depth_stencil: DepthStencilState,
    /// Blending applied to every color attachment.
    pub blend: BlendState,
    /// Number of color attachments.
    pub color_count: u32,
}

/// Vulkan entry points used by [`VulkanDevice`](super::VulkanDevice).
pub trait VulkanDriver: Debug {
    /// Creates a buffer with bound memory.
    fn create_buffer(&mut self, size: u64, usage: vk::BufferUsageFlags, host_visible: bool) -> Result<vk::Buffer, vk::Result>;
    /// Writes through the persistent mapping of a host visible buffer.
    fn write_buffer(&mut self, buffer: vk::Buffer, offset: u64, data: &[u8]);
    /// `vkDestroyBuffer` + free.
    fn destroy_buffer(&mut self, buffer: vk::Buffer);

    /// Creates an image, its memory and a view covering every subresource.
    fn create_image(
        &mut self,
        desc: &TextureDesc,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<(vk::Image, vk::ImageView), vk::Result>;
    /// Uploads one full mip level through a staging copy.
    fn upload_image(&mut self, image: vk::Image, desc: &TextureDesc, mip_level: u32, data: &[u8]) -> Result<(), vk::Result>;
    /// Destroys the view, the image and its memory.
    fn destroy_image(&mut self, image: vk::Image, view: vk::ImageView);

    /// `vkCreateShaderModule`
    fn create_shader_module(&mut self, code: &[u32]) -> Result<vk::ShaderModule, vk::Result>;
    /// `vkDestroyShaderModule`
    fn destroy_shader_module(&mut self, module: vk::ShaderModule);

    /// `vkCreateRenderPass`
    fn create_render_pass(&mut self, key: &VkRenderPassKey) -> Result<vk::RenderPass, vk::Result>;
    /// `vkDestroyRenderPass`
    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass);
    /// `vkCreateFramebuffer`
    fn create_framebuffer(
        &mut self,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer, vk::Result>;
    /// `vkDestroyFramebuffer`
    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer);

    /// `vkCreateGraphicsPipelines` with an empty pipeline layout.
    fn create_graphics_pipeline(&mut self, desc: &VkGraphicsPipelineDesc<'_>) -> Result<vk::Pipeline, vk::Result>;
    /// `vkCreateComputePipelines`
    fn create_compute_pipeline(&mut self, stage: VkStage<'_>) -> Result<vk::Pipeline, vk::Result>;
    /// `vkDestroyPipeline`
    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline);

    /// Format of the swapchain images.
    fn swapchain_format(&self) -> vk::Format;
    /// Current swapchain extent.
    fn swapchain_extent(&self) -> vk::Extent2D;
    /// View of swapchain image `index`.
    fn swapchain_view(&self, index: u32) -> vk::ImageView;
    /// View and format of the default depth buffer.
    fn default_depth(&self) -> (vk::ImageView, vk::Format);
    /// `vkAcquireNextImageKHR` signaling `semaphore`.
    fn acquire_next_image(&mut self, semaphore: vk::Semaphore) -> Result<u32, vk::Result>;
    /// Rebuilds the swapchain and the default depth buffer.
    fn recreate_swapchain(&mut self) -> Result<(), vk::Result>;
    /// `vkQueuePresentKHR`. Returns `true` when the swapchain is suboptimal.
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<bool, vk::Result>;

    /// `vkCreateFence`
    fn create_fence(&mut self, signaled: bool) -> Result<vk::Fence, vk::Result>;
    /// `vkWaitForFences`. `Ok(false)` on timeout.
    fn wait_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> Result<bool, vk::Result>;
    /// `vkResetFences`
    fn reset_fence(&mut self, fence: vk::Fence) -> Result<(), vk::Result>;
    /// `vkDestroyFence`
    fn destroy_fence(&mut self, fence: vk::Fence);
    /// `vkCreateSemaphore`
    fn create_semaphore(&mut self) -> Result<vk::Semaphore, vk::Result>;
    /// `vkDestroySemaphore`
    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore);
    /// `vkDeviceWaitIdle`
    fn device_wait_idle(&mut self);

    /// Allocates a primary command buffer from the device's pool.
    fn allocate_command_buffer(&mut self) -> Result<vk::CommandBuffer, vk::Result>;
    /// `vkBeginCommandBuffer` (one time submit).
    fn begin_command_buffer(&mut self, cb: vk::CommandBuffer) -> Result<(), vk::Result>;
    /// `vkEndCommandBuffer`
    fn end_command_buffer(&mut self, cb: vk::CommandBuffer) -> Result<(), vk::Result>;
    /// `vkQueueSubmit` waiting on `wait` at color output, signaling `signal` and `fence`.
    fn submit(
        &mut self,
        cb: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(), vk::Result>;

    /// `vkCmdBeginRenderPass` (inline contents).
    fn cmd_begin_render_pass(
        &mut self,
        cb: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    );
    /// `vkCmdEndRenderPass`
    fn cmd_end_render_pass(&mut self, cb: vk::CommandBuffer);
    /// `vkCmdBindPipeline`
    fn cmd_bind_pipeline(&mut self, cb: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);
    /// `vkCmdSetViewport`
    fn cmd_set_viewport(&mut self, cb: vk::CommandBuffer, viewport: vk::Viewport);
    /// `vkCmdSetScissor`
    fn cmd_set_scissor(&mut self, cb: vk::CommandBuffer, scissor: vk::Rect2D);
    /// `vkCmdSetDepthBias`
    fn cmd_set_depth_bias(&mut self, cb: vk::CommandBuffer, constant: f32, clamp: f32, slope: f32);
    /// `vkCmdBindVertexBuffers` for one binding.
    fn cmd_bind_vertex_buffer(&mut self, cb: vk::CommandBuffer, binding: u32, buffer: vk::Buffer, offset: u64);
    /// `vkCmdBindIndexBuffer`
    fn cmd_bind_index_buffer(&mut self, cb: vk::CommandBuffer, buffer: vk::Buffer, offset: u64, index_type: vk::IndexType);
    /// `vkCmdDraw`
    fn cmd_draw(&mut self, cb: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32);
    /// `vkCmdDrawIndexed`
    fn cmd_draw_indexed(
        &mut self,
        cb: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
    );
    /// `vkCmdDispatch`
    fn cmd_dispatch(&mut self, cb: vk::CommandBuffer, x: u32, y: u32, z: u32);
    /// `vkCmdPipelineBarrier`
    fn cmd_pipeline_barrier(
        &mut self,
        cb: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        buffers: &[vk::BufferMemoryBarrier<'_>],
        images: &[vk::ImageMemoryBarrier<'_>],
    );
}
