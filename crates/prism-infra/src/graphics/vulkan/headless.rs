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

//! An in-memory [`VulkanDriver`].
//!
//! Submitted work completes immediately, so fences signal at `submit`.
//! Recording errors (a draw outside a render pass, a nested pass) are
//! counted under `"violation:*"` names instead of panicking.

use super::driver::{VkGraphicsPipelineDesc, VkRenderPassKey, VkStage, VulkanDriver};
use crate::graphics::CallLog;
use ash::vk::{self, Handle};
use prism_core::rhi::TextureDesc;
use std::collections::{HashMap, HashSet};

const SWAPCHAIN_IMAGES: u32 = 3;

/// One recorded `vkCmdPipelineBarrier`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedBarrier {
    /// Source stage mask.
    pub src_stage: vk::PipelineStageFlags,
    /// Destination stage mask.
    pub dst_stage: vk::PipelineStageFlags,
    /// `(src_access, dst_access)` per buffer barrier.
    pub buffers: Vec<(vk::AccessFlags, vk::AccessFlags)>,
    /// `(old_layout, new_layout)` per image barrier.
    pub images: Vec<(vk::ImageLayout, vk::ImageLayout)>,
}

/// An emulated Vulkan device with a three image swapchain.
#[derive(Debug)]
pub struct HeadlessVulkan {
    next_id: u64,
    live: HashSet<u64>,
    buffers: HashMap<u64, Vec<u8>>,
    fences: HashMap<u64, bool>,
    recording: HashSet<u64>,
    in_render_pass: bool,
    extent: vk::Extent2D,
    swapchain_views: Vec<vk::ImageView>,
    depth_view: vk::ImageView,
    next_image: u32,
    out_of_date_acquires: u32,
    barriers: Vec<RecordedBarrier>,
    calls: CallLog,
}

impl HeadlessVulkan {
    /// A device whose swapchain is `width` x `height`.
    pub fn new(width: u32, height: u32) -> Self {
        let mut vk = Self {
            next_id: 1,
            live: HashSet::new(),
            buffers: HashMap::new(),
            fences: HashMap::new(),
            recording: HashSet::new(),
            in_render_pass: false,
            extent: vk::Extent2D { width, height },
            swapchain_views: Vec::new(),
            depth_view: vk::ImageView::null(),
            next_image: 0,
            out_of_date_acquires: 0,
            barriers: Vec::new(),
            calls: CallLog::default(),
        };
        vk.build_swapchain();
        vk
    }

    /// The shared call counters.
    pub fn call_log(&self) -> CallLog {
        self.calls.clone()
    }

    /// Makes the next `count` acquires fail with `ERROR_OUT_OF_DATE_KHR`.
    pub fn fail_next_acquires(&mut self, count: u32) {
        self.out_of_date_acquires = count;
    }

    /// Changes the surface size; takes effect at the next swapchain rebuild.
    pub fn resize_surface(&mut self, width: u32, height: u32) {
        self.extent = vk::Extent2D { width, height };
    }

    /// Every pipeline barrier recorded so far.
    pub fn barriers(&self) -> &[RecordedBarrier] {
        &self.barriers
    }

    /// Objects created through the driver and not yet destroyed, swapchain
    /// resources excluded.
    pub fn live_objects(&self) -> usize {
        self.live.len()
    }

    /// Contents of a buffer.
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<&[u8]> {
        self.buffers.get(&buffer.as_raw()).map(Vec::as_slice)
    }

    fn raw(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn alloc<H: Handle>(&mut self) -> H {
        let id = self.raw();
        self.live.insert(id);
        H::from_raw(id)
    }

    fn free<H: Handle>(&mut self, handle: H, what: &'static str) {
        self.calls.record(what);
        if !self.live.remove(&handle.as_raw()) {
            self.calls.record("violation:double_destroy");
        }
    }

    fn build_swapchain(&mut self) {
        self.swapchain_views = (0..SWAPCHAIN_IMAGES)
            .map(|_| vk::ImageView::from_raw(self.raw()))
            .collect();
        self.depth_view = vk::ImageView::from_raw(self.raw());
        self.next_image = 0;
    }

    fn check_recording(&self, cb: vk::CommandBuffer) {
        if !self.recording.contains(&cb.as_raw()) {
            self.calls.record("violation:not_recording");
        }
    }

    fn check_inside_pass(&self, cb: vk::CommandBuffer) {
        self.check_recording(cb);
        if !self.in_render_pass {
            self.calls.record("violation:draw_outside_pass");
        }
    }
}

impl VulkanDriver for HeadlessVulkan {
    fn create_buffer(&mut self, size: u64, _usage: vk::BufferUsageFlags, _host_visible: bool) -> Result<vk::Buffer, vk::Result> {
        self.calls.record("create_buffer");
        let size = usize::try_from(size).map_err(|_| vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)?;
        let buffer: vk::Buffer = self.alloc();
        self.buffers.insert(buffer.as_raw(), vec![0; size]);
        Ok(buffer)
    }

    fn write_buffer(&mut self, buffer: vk::Buffer, offset: u64, data: &[u8]) {
        self.calls.record("write_buffer");
        if let Some(storage) = self.buffers.get_mut(&buffer.as_raw()) {
            let start = offset as usize;
            if let Some(dst) = storage.get_mut(start..start + data.len()) {
                dst.copy_from_slice(data);
            }
        }
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        self.buffers.remove(&buffer.as_raw());
        self.free(buffer, "destroy_buffer");
    }

    fn create_image(
        &mut self,
        _desc: &TextureDesc,
        format: vk::Format,
        _usage: vk::ImageUsageFlags,
    ) -> Result<(vk::Image, vk::ImageView), vk::Result> {
        self.calls.record("create_image");
        if format == vk::Format::UNDEFINED {
            return Err(vk::Result::ERROR_FORMAT_NOT_SUPPORTED);
        }
        Ok((self.alloc(), self.alloc()))
    }

    fn upload_image(&mut self, _image: vk::Image, _desc: &TextureDesc, _mip: u32, _data: &[u8]) -> Result<(), vk::Result> {
        self.calls.record("upload_image");
        Ok(())
    }

    fn destroy_image(&mut self, image: vk::Image, view: vk::ImageView) {
        self.free(view, "destroy_image_view");
        self.free(image, "destroy_image");
    }

    fn create_shader_module(&mut self, code: &[u32]) -> Result<vk::ShaderModule, vk::Result> {
        self.calls.record("create_shader_module");
        if code.first() != Some(&0x0723_0203) {
            return Err(vk::Result::ERROR_INVALID_SHADER_NV);
        }
        Ok(self.alloc())
    }

    fn destroy_shader_module(&mut self, module: vk::ShaderModule) {
        self.free(module, "destroy_shader_module");
    }

    fn create_render_pass(&mut self, _key: &VkRenderPassKey) -> Result<vk::RenderPass, vk::Result> {
        self.calls.record("create_render_pass");
        Ok(self.alloc())
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        self.free(render_pass, "destroy_render_pass");
    }

    fn create_framebuffer(
        &mut self,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer, vk::Result> {
        self.calls.record("create_framebuffer");
        if render_pass == vk::RenderPass::null() || views.is_empty() {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        Ok(self.alloc())
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        self.free(framebuffer, "destroy_framebuffer");
    }

    fn create_graphics_pipeline(&mut self, desc: &VkGraphicsPipelineDesc<'_>) -> Result<vk::Pipeline, vk::Result> {
        self.calls.record("create_graphics_pipeline");
        let live = |m: vk::ShaderModule| self.live.contains(&m.as_raw());
        if !live(desc.vertex.module) || !live(desc.fragment.module) {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        Ok(self.alloc())
    }

    fn create_compute_pipeline(&mut self, stage: VkStage<'_>) -> Result<vk::Pipeline, vk::Result> {
        self.calls.record("create_compute_pipeline");
        if !self.live.contains(&stage.module.as_raw()) {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        Ok(self.alloc())
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.free(pipeline, "destroy_pipeline");
    }

    fn swapchain_format(&self) -> vk::Format {
        vk::Format::B8G8R8A8_UNORM
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn swapchain_view(&self, index: u32) -> vk::ImageView {
        self.swapchain_views
            .get(index as usize)
            .copied()
            .unwrap_or_else(vk::ImageView::null)
    }

    fn default_depth(&self) -> (vk::ImageView, vk::Format) {
        (self.depth_view, vk::Format::D32_SFLOAT)
    }

    fn acquire_next_image(&mut self, _semaphore: vk::Semaphore) -> Result<u32, vk::Result> {
        self.calls.record("acquire_next_image");
        if self.out_of_date_acquires > 0 {
            self.out_of_date_acquires -= 1;
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }
        let index = self.next_image;
        self.next_image = (self.next_image + 1) % SWAPCHAIN_IMAGES;
        Ok(index)
    }

    fn recreate_swapchain(&mut self) -> Result<(), vk::Result> {
        self.calls.record("recreate_swapchain");
        self.build_swapchain();
        Ok(())
    }

    fn present(&mut self, _image_index: u32, _wait: vk::Semaphore) -> Result<bool, vk::Result> {
        self.calls.record("present");
        Ok(false)
    }

    fn create_fence(&mut self, signaled: bool) -> Result<vk::Fence, vk::Result> {
        self.calls.record("create_fence");
        let fence: vk::Fence = self.alloc();
        self.fences.insert(fence.as_raw(), signaled);
        Ok(fence)
    }

    fn wait_fence(&mut self, fence: vk::Fence, _timeout_ns: u64) -> Result<bool, vk::Result> {
        self.calls.record("wait_fence");
        self.fences
            .get(&fence.as_raw())
            .copied()
            .ok_or(vk::Result::ERROR_DEVICE_LOST)
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<(), vk::Result> {
        self.calls.record("reset_fence");
        match self.fences.get_mut(&fence.as_raw()) {
            Some(state) => {
                *state = false;
                Ok(())
            }
            None => Err(vk::Result::ERROR_DEVICE_LOST),
        }
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        self.fences.remove(&fence.as_raw());
        self.free(fence, "destroy_fence");
    }

    fn create_semaphore(&mut self) -> Result<vk::Semaphore, vk::Result> {
        self.calls.record("create_semaphore");
        Ok(self.alloc())
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.free(semaphore, "destroy_semaphore");
    }

    fn device_wait_idle(&mut self) {
        self.calls.record("device_wait_idle");
    }

    fn allocate_command_buffer(&mut self) -> Result<vk::CommandBuffer, vk::Result> {
        self.calls.record("allocate_command_buffer");
        // Freed with the pool, so not tracked as a live object.
        Ok(vk::CommandBuffer::from_raw(self.raw()))
    }

    fn begin_command_buffer(&mut self, cb: vk::CommandBuffer) -> Result<(), vk::Result> {
        self.calls.record("begin_command_buffer");
        if !self.recording.insert(cb.as_raw()) {
            self.calls.record("violation:begin_recording");
        }
        Ok(())
    }

    fn end_command_buffer(&mut self, cb: vk::CommandBuffer) -> Result<(), vk::Result> {
        self.calls.record("end_command_buffer");
        if self.in_render_pass {
            self.calls.record("violation:end_inside_pass");
        }
        if !self.recording.remove(&cb.as_raw()) {
            self.calls.record("violation:not_recording");
        }
        Ok(())
    }

    fn submit(
        &mut self,
        cb: vk::CommandBuffer,
        _wait: vk::Semaphore,
        _signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(), vk::Result> {
        self.calls.record("submit");
        if self.recording.contains(&cb.as_raw()) {
            self.calls.record("violation:submit_recording");
        }
        match self.fences.get_mut(&fence.as_raw()) {
            Some(state) => {
                *state = true;
                Ok(())
            }
            None => Err(vk::Result::ERROR_DEVICE_LOST),
        }
    }

    fn cmd_begin_render_pass(
        &mut self,
        cb: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        _framebuffer: vk::Framebuffer,
        _extent: vk::Extent2D,
        _clear_values: &[vk::ClearValue],
    ) {
        self.calls.record("cmd_begin_render_pass");
        self.check_recording(cb);
        if self.in_render_pass {
            self.calls.record("violation:nested_render_pass");
        }
        self.in_render_pass = true;
    }

    fn cmd_end_render_pass(&mut self, cb: vk::CommandBuffer) {
        self.calls.record("cmd_end_render_pass");
        self.check_recording(cb);
        if !self.in_render_pass {
            self.calls.record("violation:end_without_pass");
        }
        self.in_render_pass = false;
    }

    fn cmd_bind_pipeline(&mut self, cb: vk::CommandBuffer, _bind_point: vk::PipelineBindPoint, _pipeline: vk::Pipeline) {
        self.calls.record("cmd_bind_pipeline");
        self.check_recording(cb);
    }

    fn cmd_set_viewport(&mut self, cb: vk::CommandBuffer, _viewport: vk::Viewport) {
        self.calls.record("cmd_set_viewport");
        self.check_recording(cb);
    }

    fn cmd_set_scissor(&mut self, cb: vk::CommandBuffer, _scissor: vk::Rect2D) {
        self.calls.record("cmd_set_scissor");
        self.check_recording(cb);
    }

    fn cmd_set_depth_bias(&mut self, cb: vk::CommandBuffer, _constant: f32, _clamp: f32, _slope: f32) {
        self.calls.record("cmd_set_depth_bias");
        self.check_recording(cb);
    }

    fn cmd_bind_vertex_buffer(&mut self, cb: vk::CommandBuffer, _binding: u32, _buffer: vk::Buffer, _offset: u64) {
        self.calls.record("cmd_bind_vertex_buffer");
        self.check_recording(cb);
    }

    fn cmd_bind_index_buffer(&mut self, cb: vk::CommandBuffer, _buffer: vk::Buffer, _offset: u64, _index_type: vk::IndexType) {
        self.calls.record("cmd_bind_index_buffer");
        self.check_recording(cb);
    }

    fn cmd_draw(&mut self, cb: vk::CommandBuffer, _vertex_count: u32, _instance_count: u32, _first_vertex: u32) {
        self.calls.record("cmd_draw");
        self.check_inside_pass(cb);
    }

    fn cmd_draw_indexed(&mut self, cb: vk::CommandBuffer, _index_count: u32, _instance_count: u32, _first_index: u32, _vertex_offset: i32) {
        self.calls.record("cmd_draw_indexed");
        self.check_inside_pass(cb);
    }

    fn cmd_dispatch(&mut self, cb: vk::CommandBuffer, _x: u32, _y: u32, _z: u32) {
        self.calls.record("cmd_dispatch");
        self.check_recording(cb);
        if self.in_render_pass {
            self.calls.record("violation:dispatch_inside_pass");
        }
    }

    fn cmd_pipeline_barrier(
        &mut self,
        cb: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        buffers: &[vk::BufferMemoryBarrier<'_>],
        images: &[vk::ImageMemoryBarrier<'_>],
    ) {
        self.calls.record("cmd_pipeline_barrier");
        self.check_recording(cb);
        self.barriers.push(RecordedBarrier {
            src_stage,
            dst_stage,
            buffers: buffers
                .iter()
                .map(|b| (b.src_access_mask, b.dst_access_mask))
                .collect(),
            images: images
                .iter()
                .map(|i| (i.old_layout, i.new_layout))
                .collect(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_is_injected_once_per_count() {
        let mut vk = HeadlessVulkan::new(64, 64);
        vk.fail_next_acquires(1);
        let sem = vk.create_semaphore().unwrap();
        assert_eq!(vk.acquire_next_image(sem), Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert_eq!(vk.acquire_next_image(sem), Ok(0));
        assert_eq!(vk.acquire_next_image(sem), Ok(1));
    }

    #[test]
    fn submit_signals_the_fence() {
        let mut vk = HeadlessVulkan::new(64, 64);
        let fence = vk.create_fence(false).unwrap();
        let cb = vk.allocate_command_buffer().unwrap();
        vk.begin_command_buffer(cb).unwrap();
        vk.end_command_buffer(cb).unwrap();
        assert_eq!(vk.wait_fence(fence, 0), Ok(false));
        vk.submit(cb, vk::Semaphore::null(), vk::Semaphore::null(), fence)
            .unwrap();
        assert_eq!(vk.wait_fence(fence, 0), Ok(true));
    }

    #[test]
    fn draw_outside_pass_is_flagged() {
        let mut vk = HeadlessVulkan::new(64, 64);
        let log = vk.call_log();
        let cb = vk.allocate_command_buffer().unwrap();
        vk.begin_command_buffer(cb).unwrap();
        vk.cmd_draw(cb, 3, 1, 0);
        assert_eq!(log.count("violation:draw_outside_pass"), 1);
    }
}
