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

//! Frames in flight: per-slot command buffer, fence and semaphores.

use super::driver::VulkanDriver;
use ash::vk;
use prism_core::rhi::{RenderError, TIMEOUT_INFINITE};

/// Number of frames the CPU may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

#[derive(Debug)]
pub(super) struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub in_flight: vk::Fence,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    /// Framebuffers built for passes recorded into this slot.
    pub framebuffers: Vec<vk::Framebuffer>,
}

/// The ring of frame slots and the swapchain image of the open frame.
#[derive(Debug)]
pub(super) struct FrameRing {
    slots: Vec<FrameSlot>,
    current: usize,
    image_index: Option<u32>,
}

fn native(what: &str) -> impl Fn(vk::Result) -> RenderError + '_ {
    move |e| match e {
        vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
        other => RenderError::Submission(format!("{what}: {other}")),
    }
}

impl FrameRing {
    pub fn new(driver: &mut dyn VulkanDriver) -> Result<Self, vk::Result> {
        let mut slots = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for _ in 0..FRAMES_IN_FLIGHT {
            slots.push(FrameSlot {
                command_buffer: driver.allocate_command_buffer()?,
                // Signaled so the first wait on each slot returns at once.
                in_flight: driver.create_fence(true)?,
                image_available: driver.create_semaphore()?,
                render_finished: driver.create_semaphore()?,
                framebuffers: Vec::new(),
            });
        }
        Ok(Self {
            slots,
            current: 0,
            image_index: None,
        })
    }

    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut FrameSlot {
        &mut self.slots[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Swapchain image of the open frame.
    pub fn image_index(&self) -> Option<u32> {
        self.image_index
    }

    /// Returns `true` between `begin_frame_if_needed` and `end_frame`.
    pub fn is_open(&self) -> bool {
        self.image_index.is_some()
    }

    /// Opens a frame unless one is open: waits for the slot's previous
    /// submission, releases its framebuffers, acquires a swapchain image and
    /// begins the slot's command buffer.
    ///
    /// An out-of-date swapchain is recreated and the acquire retried once.
    pub fn begin_frame_if_needed(&mut self, driver: &mut dyn VulkanDriver) -> Result<(), RenderError> {
        if self.is_open() {
            return Ok(());
        }
        let slot = &mut self.slots[self.current];
        let signaled = driver
            .wait_fence(slot.in_flight, TIMEOUT_INFINITE)
            .map_err(native("frame fence wait"))?;
        if !signaled {
            return Err(RenderError::Submission(format!(
                "frame slot {} never completed",
                self.current
            )));
        }
        for framebuffer in slot.framebuffers.drain(..) {
            driver.destroy_framebuffer(framebuffer);
        }

        let image_index = match driver.acquire_next_image(slot.image_available) {
            Ok(index) => index,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::info!("VulkanDevice: swapchain out of date, recreating");
                driver
                    .recreate_swapchain()
                    .map_err(|e| RenderError::Surface(format!("swapchain recreation: {e}")))?;
                driver
                    .acquire_next_image(slot.image_available)
                    .map_err(|e| RenderError::Surface(format!("acquire after recreation: {e}")))?
            }
            Err(e) => return Err(RenderError::Surface(format!("acquire: {e}"))),
        };

        driver
            .reset_fence(slot.in_flight)
            .map_err(native("frame fence reset"))?;
        driver
            .begin_command_buffer(slot.command_buffer)
            .map_err(native("begin command buffer"))?;
        self.image_index = Some(image_index);
        Ok(())
    }

    /// Ends, submits and presents the open frame, then moves to the next slot.
    pub fn end_frame(&mut self, driver: &mut dyn VulkanDriver) -> Result<(), RenderError> {
        let Some(image_index) = self.image_index.take() else {
            return Ok(());
        };
        let slot = &self.slots[self.current];
        self.current = (self.current + 1) % self.slots.len();

        driver
            .end_command_buffer(slot.command_buffer)
            .map_err(native("end command buffer"))?;
        driver
            .submit(
                slot.command_buffer,
                slot.image_available,
                slot.render_finished,
                slot.in_flight,
            )
            .map_err(native("queue submit"))?;
        match driver.present(image_index, slot.render_finished) {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::info!("VulkanDevice: swapchain suboptimal after present, recreating");
                driver
                    .recreate_swapchain()
                    .map_err(|e| RenderError::Surface(format!("swapchain recreation: {e}")))
            }
            Err(e) => Err(RenderError::Surface(format!("present: {e}"))),
        }
    }

    /// Waits for the GPU and destroys every slot object.
    pub fn destroy(&mut self, driver: &mut dyn VulkanDriver) {
        driver.device_wait_idle();
        for slot in self.slots.drain(..) {
            for framebuffer in slot.framebuffers {
                driver.destroy_framebuffer(framebuffer);
            }
            driver.destroy_fence(slot.in_flight);
            driver.destroy_semaphore(slot.image_available);
            driver.destroy_semaphore(slot.render_finished);
        }
    }
}
