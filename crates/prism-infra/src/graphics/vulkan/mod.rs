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

//! The Vulkan backend.
//!
//! [`VulkanDevice`] drives a swapchain with [`FRAMES_IN_FLIGHT`] frames in
//! flight through the [`VulkanDriver`] trait. Instance and surface creation
//! belong to the windowing layer; [`HeadlessVulkan`] emulates a device for
//! tests and `AshDriver` (behind the `vulkan` feature) drives a live one.

#[cfg(feature = "vulkan")]
mod ash_driver;
mod barrier;
mod cmd_list;
mod conversions;
mod device;
mod driver;
mod frame;
mod headless;

#[cfg(feature = "vulkan")]
pub use self::ash_driver::{AshDriver, AshDriverDesc};
pub use self::barrier::{vk_state, BarrierBatch, VkState};
pub use self::cmd_list::VulkanCmdList;
pub use self::conversions::{
    aspect_mask, attachment_description, blend_attachment, image_shape, mip_extent, vertex_input, IntoVk,
};
pub use self::device::VulkanDevice;
pub use self::driver::{VkAttachmentKey, VkGraphicsPipelineDesc, VkRenderPassKey, VkStage, VulkanDriver};
pub use self::frame::FRAMES_IN_FLIGHT;
pub use self::headless::{HeadlessVulkan, RecordedBarrier};
