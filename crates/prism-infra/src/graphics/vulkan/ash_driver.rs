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

//! [`VulkanDriver`] over a live `ash` device.
//!
//! The platform layer creates the instance, picks the physical device,
//! creates the logical device and the surface, and hands them over in an
//! [`AshDriverDesc`]. The driver owns everything it creates from there on
//! (swapchain, default depth buffer, command pool, memory) but never
//! destroys the device, the surface or the instance.

use super::conversions::{
    aspect_mask, attachment_description, blend_attachment, image_shape, mip_extent, vertex_input, IntoVk,
};
use super::driver::{VkGraphicsPipelineDesc, VkRenderPassKey, VkStage, VulkanDriver};
use ash::vk;
use prism_core::rhi::{Format, TextureDesc, TextureUsage};
use std::collections::HashMap;
use std::ffi::CString;
use std::fmt;
use vk_mem::Alloc;

const DEPTH_FORMAT: Format = Format::Depth32Float;

/// Objects the platform layer created for the driver.
pub struct AshDriverDesc {
    /// Instance the device was created from.
    pub instance: ash::Instance,
    /// Physical device backing `device`.
    pub physical_device: vk::PhysicalDevice,
    /// Logical device with the swapchain extension enabled.
    pub device: ash::Device,
    /// Family of a queue supporting graphics, compute and present.
    pub queue_family_index: u32,
    /// Surface extension loader.
    pub surface_loader: ash::khr::surface::Instance,
    /// Surface to present to.
    pub surface: vk::SurfaceKHR,
    /// Window size in pixels, used when the surface leaves the extent open.
    pub window_extent: vk::Extent2D,
    /// Presentation mode.
    pub present_mode: vk::PresentModeKHR,
}

struct BufferAllocation {
    allocation: vk_mem::Allocation,
    mapped: Option<*mut u8>,
    size: u64,
}

struct ImageAllocation {
    view: vk::ImageView,
    allocation: vk_mem::Allocation,
}

struct DepthTarget {
    image: vk::Image,
    view: vk::ImageView,
    allocation: vk_mem::Allocation,
}

/// A Vulkan device, its graphics queue and its swapchain.
pub struct AshDriver {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    swapchain_loader: ash::khr::swapchain::Device,
    allocator: vk_mem::Allocator,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    pipeline_layout: vk::PipelineLayout,
    buffers: HashMap<vk::Buffer, BufferAllocation>,
    images: HashMap<vk::Image, ImageAllocation>,
    swapchain: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    window_extent: vk::Extent2D,
    extent: vk::Extent2D,
    swapchain_views: Vec<vk::ImageView>,
    depth: Option<DepthTarget>,
}

impl fmt::Debug for AshDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AshDriver")
            .field("surface_format", &self.surface_format.format)
            .field("extent", &self.extent)
            .field("swapchain_images", &self.swapchain_views.len())
            .field("live_buffers", &self.buffers.len())
            .field("live_images", &self.images.len())
            .finish()
    }
}

impl AshDriver {
    /// Creates the allocator, the command pool and the swapchain.
    ///
    /// ## Errors
    /// Any error reported by Vulkan while creating them, or
    /// `ERROR_FORMAT_NOT_SUPPORTED` when the surface exposes no format.
    pub fn new(desc: AshDriverDesc) -> Result<Self, vk::Result> {
        let AshDriverDesc {
            instance,
            physical_device,
            device,
            queue_family_index,
            surface_loader,
            surface,
            window_extent,
            present_mode,
        } = desc;

        // SAFETY: the device was created from this instance and physical device.
        let allocator = unsafe {
            vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(&instance, &device, physical_device))?
        };
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        // SAFETY: the surface belongs to the instance the loader was built for.
        let formats = unsafe { surface_loader.get_physical_device_surface_formats(physical_device, surface)? };
        let surface_format = formats
            .iter()
            .copied()
            .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .or_else(|| formats.first().copied())
            .ok_or(vk::Result::ERROR_FORMAT_NOT_SUPPORTED)?;

        // SAFETY: plain object creation on a valid device.
        let (queue, command_pool, pipeline_layout) = unsafe {
            let queue = device.get_device_queue(queue_family_index, 0);
            let command_pool = device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(queue_family_index)
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
                None,
            )?;
            let pipeline_layout = device.create_pipeline_layout(&vk::PipelineLayoutCreateInfo::default(), None)?;
            (queue, command_pool, pipeline_layout)
        };

        let mut driver = Self {
            device,
            physical_device,
            surface_loader,
            surface,
            swapchain_loader,
            allocator,
            queue,
            command_pool,
            pipeline_layout,
            buffers: HashMap::new(),
            images: HashMap::new(),
            swapchain: vk::SwapchainKHR::null(),
            surface_format,
            present_mode,
            window_extent,
            extent: window_extent,
            swapchain_views: Vec::new(),
            depth: None,
        };
        driver.build_swapchain()?;
        log::info!(
            "AshDriver: swapchain {:?} {}x{} with {} images",
            driver.surface_format.format,
            driver.extent.width,
            driver.extent.height,
            driver.swapchain_views.len()
        );
        Ok(driver)
    }

    /// Records the new window size; the next recreation picks it up.
    pub fn set_window_extent(&mut self, extent: vk::Extent2D) {
        self.window_extent = extent;
    }

    fn swapchain_extent_for(&self, caps: &vk::SurfaceCapabilitiesKHR) -> vk::Extent2D {
        if caps.current_extent.width != u32::MAX && caps.current_extent.height != u32::MAX {
            return caps.current_extent;
        }
        vk::Extent2D {
            width: self
                .window_extent
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: self
                .window_extent
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }

    /// (Re)creates the swapchain, its views and the default depth buffer.
    fn build_swapchain(&mut self) -> Result<(), vk::Result> {
        // SAFETY: the surface and the physical device outlive the driver.
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)?
        };
        let extent = self.swapchain_extent_for(&caps);
        let image_count = if caps.max_image_count == 0 {
            caps.min_image_count + 1
        } else {
            (caps.min_image_count + 1).min(caps.max_image_count)
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.surface_format.format)
            .image_color_space(self.surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(self.swapchain);

        // SAFETY: the old swapchain is retired by the create call and only
        // destroyed once the new one exists.
        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None)? };
        self.destroy_swapchain_targets();
        self.swapchain = swapchain;
        self.extent = extent;

        // SAFETY: the images belong to the swapchain just created.
        let images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? };
        for image in images {
            let view = self.create_view(
                image,
                vk::ImageViewType::TYPE_2D,
                self.surface_format.format,
                vk::ImageAspectFlags::COLOR,
                1,
                1,
            )?;
            self.swapchain_views.push(view);
        }

        let depth_desc = TextureDesc::d2(extent.width, extent.height, DEPTH_FORMAT, TextureUsage::DEPTH_STENCIL);
        let (image, allocation) = self.allocate_image(&depth_desc, DEPTH_FORMAT.into_vk(), TextureUsage::DEPTH_STENCIL.into_vk())?;
        let view = self.create_view(
            image,
            vk::ImageViewType::TYPE_2D,
            DEPTH_FORMAT.into_vk(),
            aspect_mask(DEPTH_FORMAT),
            1,
            1,
        )?;
        self.depth = Some(DepthTarget { image, view, allocation });
        Ok(())
    }

    /// Destroys the swapchain views, the current swapchain and the default
    /// depth buffer.
    fn destroy_swapchain_targets(&mut self) {
        // SAFETY: callers wait for the device or retire the swapchain first.
        unsafe {
            for view in self.swapchain_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.swapchain_loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
            if let Some(mut depth) = self.depth.take() {
                self.device.destroy_image_view(depth.view, None);
                self.allocator.destroy_image(depth.image, &mut depth.allocation);
            }
        }
    }

    fn allocate_image(
        &self,
        desc: &TextureDesc,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<(vk::Image, vk_mem::Allocation), vk::Result> {
        let (image_type, _, flags, layers) = image_shape(desc);
        let info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(image_type)
            .format(format)
            .extent(mip_extent(desc, 0))
            .mip_levels(desc.mip_levels.max(1))
            .array_layers(layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        // SAFETY: the create info describes a valid image.
        unsafe { self.allocator.create_image(&info, &alloc_info) }
    }

    fn create_view(
        &self,
        image: vk::Image,
        view_type: vk::ImageViewType,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
        layers: u32,
    ) -> Result<vk::ImageView, vk::Result> {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(mip_levels)
                    .base_array_layer(0)
                    .layer_count(layers),
            );
        // SAFETY: the image is alive and the range lies inside it.
        unsafe { self.device.create_image_view(&info, None) }
    }

    fn create_host_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> Result<(vk::Buffer, BufferAllocation), vk::Result> {
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::Auto,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ..Default::default()
        };
        // SAFETY: the allocation is unmapped before it is destroyed.
        unsafe {
            let (buffer, mut allocation) = self.allocator.create_buffer(&info, &alloc_info)?;
            match self.allocator.map_memory(&mut allocation) {
                Ok(ptr) => Ok((
                    buffer,
                    BufferAllocation {
                        allocation,
                        mapped: Some(ptr),
                        size,
                    },
                )),
                Err(e) => {
                    self.allocator.destroy_buffer(buffer, &mut allocation);
                    Err(e)
                }
            }
        }
    }

    fn free_buffer(&self, buffer: vk::Buffer, mut entry: BufferAllocation) {
        // SAFETY: the buffer is no longer referenced by pending work.
        unsafe {
            if entry.mapped.is_some() {
                self.allocator.unmap_memory(&mut entry.allocation);
            }
            self.allocator.destroy_buffer(buffer, &mut entry.allocation);
        }
    }

    fn run_copy(
        &mut self,
        cb: vk::CommandBuffer,
        fence: vk::Fence,
        staging: vk::Buffer,
        image: vk::Image,
        region: vk::BufferImageCopy,
        [to_transfer, to_shader]: [vk::ImageMemoryBarrier<'_>; 2],
    ) -> Result<(), vk::Result> {
        self.begin_command_buffer(cb)?;
        // SAFETY: the command buffer is recording and private to this copy.
        unsafe {
            self.device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );
            self.device
                .cmd_copy_buffer_to_image(cb, staging, image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[region]);
            self.device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_shader],
            );
        }
        self.end_command_buffer(cb)?;
        self.submit(cb, vk::Semaphore::null(), vk::Semaphore::null(), fence)?;
        self.wait_fence(fence, u64::MAX).map(|_| ())
    }

    /// Records and runs a staging copy into one mip level, blocking until
    /// the queue finished it.
    fn copy_to_image(
        &mut self,
        staging: vk::Buffer,
        image: vk::Image,
        desc: &TextureDesc,
        mip_level: u32,
    ) -> Result<(), vk::Result> {
        let (_, _, _, layers) = image_shape(desc);
        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(aspect_mask(desc.format))
            .base_mip_level(mip_level)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(layers);
        let to_transfer = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range);
        let to_shader = to_transfer
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        let region = vk::BufferImageCopy::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(aspect_mask(desc.format))
                    .mip_level(mip_level)
                    .base_array_layer(0)
                    .layer_count(layers),
            )
            .image_extent(mip_extent(desc, mip_level));

        let cb = self.allocate_command_buffer()?;
        let result = match self.create_fence(false) {
            Ok(fence) => {
                let run = self.run_copy(cb, fence, staging, image, region, [to_transfer, to_shader]);
                self.destroy_fence(fence);
                run
            }
            Err(e) => Err(e),
        };
        // SAFETY: the copy finished or never reached the queue.
        unsafe { self.device.free_command_buffers(self.command_pool, &[cb]) };
        result
    }
}

fn entry_name(entry_point: &str) -> Result<CString, vk::Result> {
    CString::new(entry_point).map_err(|_| {
        log::error!("AshDriver: entry point {entry_point:?} contains a NUL byte");
        vk::Result::ERROR_INITIALIZATION_FAILED
    })
}

impl VulkanDriver for AshDriver {
    fn create_buffer(&mut self, size: u64, usage: vk::BufferUsageFlags, host_visible: bool) -> Result<vk::Buffer, vk::Result> {
        let (buffer, entry) = if host_visible {
            self.create_host_buffer(size, usage)?
        } else {
            let info = vk::BufferCreateInfo::default()
                .size(size)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            let alloc_info = vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            };
            // SAFETY: the create info describes a valid buffer.
            let (buffer, allocation) = unsafe { self.allocator.create_buffer(&info, &alloc_info)? };
            (
                buffer,
                BufferAllocation {
                    allocation,
                    mapped: None,
                    size,
                },
            )
        };
        self.buffers.insert(buffer, entry);
        Ok(buffer)
    }

    fn write_buffer(&mut self, buffer: vk::Buffer, offset: u64, data: &[u8]) {
        let Some(entry) = self.buffers.get(&buffer) else {
            log::warn!("AshDriver: write to unknown buffer {buffer:?}");
            return;
        };
        let Some(ptr) = entry.mapped else {
            log::warn!("AshDriver: write to device local buffer {buffer:?}");
            return;
        };
        let fits = offset
            .checked_add(data.len() as u64)
            .is_some_and(|end| end <= entry.size);
        if !fits {
            log::warn!("AshDriver: write of {} bytes at {offset} overflows {buffer:?}", data.len());
            return;
        }
        // SAFETY: the mapping covers `size` bytes and the range was checked.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        if let Some(entry) = self.buffers.remove(&buffer) {
            self.free_buffer(buffer, entry);
        }
    }

    fn create_image(
        &mut self,
        desc: &TextureDesc,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<(vk::Image, vk::ImageView), vk::Result> {
        let (image, mut allocation) = self.allocate_image(desc, format, usage)?;
        let (_, view_type, _, layers) = image_shape(desc);
        match self.create_view(image, view_type, format, aspect_mask(desc.format), desc.mip_levels.max(1), layers) {
            Ok(view) => {
                self.images.insert(image, ImageAllocation { view, allocation });
                Ok((image, view))
            }
            Err(e) => {
                // SAFETY: the image was never handed out.
                unsafe { self.allocator.destroy_image(image, &mut allocation) };
                Err(e)
            }
        }
    }

    fn upload_image(&mut self, image: vk::Image, desc: &TextureDesc, mip_level: u32, data: &[u8]) -> Result<(), vk::Result> {
        let (staging, entry) = self.create_host_buffer(data.len() as u64, vk::BufferUsageFlags::TRANSFER_SRC)?;
        if let Some(ptr) = entry.mapped {
            // SAFETY: the staging mapping is exactly `data.len()` bytes.
            unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len()) };
        }
        let result = self.copy_to_image(staging, image, desc, mip_level);
        self.free_buffer(staging, entry);
        result
    }

    fn destroy_image(&mut self, image: vk::Image, view: vk::ImageView) {
        // SAFETY: the device retired every frame using the image.
        unsafe {
            self.device.destroy_image_view(view, None);
            if let Some(mut entry) = self.images.remove(&image) {
                self.allocator.destroy_image(image, &mut entry.allocation);
            }
        }
    }

    fn create_shader_module(&mut self, code: &[u32]) -> Result<vk::ShaderModule, vk::Result> {
        // SAFETY: the code is a complete SPIR-V module.
        unsafe {
            self.device
                .create_shader_module(&vk::ShaderModuleCreateInfo::default().code(code), None)
        }
    }

    fn destroy_shader_module(&mut self, module: vk::ShaderModule) {
        // SAFETY: pipelines keep no reference to their modules.
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_render_pass(&mut self, key: &VkRenderPassKey) -> Result<vk::RenderPass, vk::Result> {
        let mut attachments: Vec<vk::AttachmentDescription> = key.colors.iter().map(attachment_description).collect();
        let color_refs: Vec<vk::AttachmentReference> = (0u32..)
            .zip(&key.colors)
            .map(|(i, _)| {
                vk::AttachmentReference::default()
                    .attachment(i)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            })
            .collect();
        let depth_ref = key.depth.map(|depth| {
            attachments.push(attachment_description(&depth));
            vk::AttachmentReference::default()
                .attachment(key.colors.len() as u32)
                .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        });

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .dst_stage_mask(stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));
        // SAFETY: every reference points into `attachments`.
        unsafe { self.device.create_render_pass(&info, None) }
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        // SAFETY: the device destroys passes only after their frames retired.
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_framebuffer(
        &mut self,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer, vk::Result> {
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        // SAFETY: the views match the pass attachments.
        unsafe { self.device.create_framebuffer(&info, None) }
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        // SAFETY: the frame using the framebuffer retired.
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_graphics_pipeline(&mut self, desc: &VkGraphicsPipelineDesc<'_>) -> Result<vk::Pipeline, vk::Result> {
        let vertex_entry = entry_name(desc.vertex.entry_point)?;
        let fragment_entry = entry_name(desc.fragment.entry_point)?;
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(desc.vertex.module)
                .name(&vertex_entry),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(desc.fragment.module)
                .name(&fragment_entry),
        ];

        let (bindings, attributes) = vertex_input(desc.vertex_layouts);
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default().topology(desc.topology.into_vk());
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let raster = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(if desc.raster.wireframe {
                vk::PolygonMode::LINE
            } else {
                vk::PolygonMode::FILL
            })
            .cull_mode(desc.raster.cull_mode.into_vk())
            .front_face(desc.raster.front_face.into_vk())
            .depth_bias_enable(true)
            .line_width(1.0);
        let multisample =
            vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_stencil.depth_test)
            .depth_write_enable(desc.depth_stencil.depth_write)
            .depth_compare_op(desc.depth_stencil.depth_compare.into_vk());
        let attachments = vec![blend_attachment(desc.blend); desc.color_count as usize];
        let blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&attachments);
        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::DEPTH_BIAS,
        ];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&raster)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&blend)
            .dynamic_state(&dynamic)
            .layout(self.pipeline_layout)
            .render_pass(desc.render_pass)
            .subpass(0);

        // SAFETY: every state struct lives until the call returns.
        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&info), None)
                .map_err(|(_, e)| e)?
        };
        log::debug!("AshDriver: created graphics pipeline '{}'", desc.label);
        pipelines.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn create_compute_pipeline(&mut self, stage: VkStage<'_>) -> Result<vk::Pipeline, vk::Result> {
        let entry = entry_name(stage.entry_point)?;
        let info = vk::ComputePipelineCreateInfo::default()
            .stage(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::COMPUTE)
                    .module(stage.module)
                    .name(&entry),
            )
            .layout(self.pipeline_layout);
        // SAFETY: the module is alive for the duration of the call.
        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&info), None)
                .map_err(|(_, e)| e)?
        };
        pipelines.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        // SAFETY: the frames binding the pipeline retired.
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn swapchain_format(&self) -> vk::Format {
        self.surface_format.format
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn swapchain_view(&self, index: u32) -> vk::ImageView {
        self.swapchain_views.get(index as usize).copied().unwrap_or_default()
    }

    fn default_depth(&self) -> (vk::ImageView, vk::Format) {
        let view = self.depth.as_ref().map(|d| d.view).unwrap_or_default();
        (view, DEPTH_FORMAT.into_vk())
    }

    fn acquire_next_image(&mut self, semaphore: vk::Semaphore) -> Result<u32, vk::Result> {
        // SAFETY: the semaphore is unsignaled and owned by the frame slot.
        let (index, suboptimal) = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())?
        };
        if suboptimal {
            log::warn!("AshDriver: acquired swapchain image {index} is suboptimal");
        }
        Ok(index)
    }

    fn recreate_swapchain(&mut self) -> Result<(), vk::Result> {
        self.device_wait_idle();
        self.build_swapchain()?;
        log::info!("AshDriver: swapchain recreated at {}x{}", self.extent.width, self.extent.height);
        Ok(())
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<bool, vk::Result> {
        let waits = [wait];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(std::slice::from_ref(&self.swapchain))
            .image_indices(&indices);
        // SAFETY: the image was acquired and rendered this frame.
        unsafe { self.swapchain_loader.queue_present(self.queue, &info) }
    }

    fn create_fence(&mut self, signaled: bool) -> Result<vk::Fence, vk::Result> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        // SAFETY: plain object creation.
        unsafe { self.device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None) }
    }

    fn wait_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> Result<bool, vk::Result> {
        // SAFETY: the fence is alive.
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<(), vk::Result> {
        // SAFETY: the fence is not part of a pending submission.
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        // SAFETY: the fence is not part of a pending submission.
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn create_semaphore(&mut self) -> Result<vk::Semaphore, vk::Result> {
        // SAFETY: plain object creation.
        unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        // SAFETY: no pending operation waits on the semaphore.
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn device_wait_idle(&mut self) {
        // SAFETY: the device is alive.
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::error!("AshDriver: vkDeviceWaitIdle failed: {e}");
        }
    }

    fn allocate_command_buffer(&mut self) -> Result<vk::CommandBuffer, vk::Result> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        // SAFETY: the pool is only used from this driver.
        let buffers = unsafe { self.device.allocate_command_buffers(&info)? };
        buffers.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn begin_command_buffer(&mut self, cb: vk::CommandBuffer) -> Result<(), vk::Result> {
        let info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        // SAFETY: the pool allows implicit resets and the buffer is not pending.
        unsafe { self.device.begin_command_buffer(cb, &info) }
    }

    fn end_command_buffer(&mut self, cb: vk::CommandBuffer) -> Result<(), vk::Result> {
        // SAFETY: the buffer is recording.
        unsafe { self.device.end_command_buffer(cb) }
    }

    fn submit(
        &mut self,
        cb: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(), vk::Result> {
        let command_buffers = [cb];
        let waits = [wait];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signals = [signal];
        let mut info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        if wait != vk::Semaphore::null() {
            info = info.wait_semaphores(&waits).wait_dst_stage_mask(&wait_stages);
        }
        if signal != vk::Semaphore::null() {
            info = info.signal_semaphores(&signals);
        }
        // SAFETY: the buffer finished recording.
        unsafe { self.device.queue_submit(self.queue, std::slice::from_ref(&info), fence) }
    }

    fn cmd_begin_render_pass(
        &mut self,
        cb: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(clear_values);
        // SAFETY: recording commands into a buffer in the recording state.
        unsafe { self.device.cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE) }
    }

    fn cmd_end_render_pass(&mut self, cb: vk::CommandBuffer) {
        // SAFETY: a render pass is open on the buffer.
        unsafe { self.device.cmd_end_render_pass(cb) }
    }

    fn cmd_bind_pipeline(&mut self, cb: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        // SAFETY: recording commands into a buffer in the recording state.
        unsafe { self.device.cmd_bind_pipeline(cb, bind_point, pipeline) }
    }

    fn cmd_set_viewport(&mut self, cb: vk::CommandBuffer, viewport: vk::Viewport) {
        // SAFETY: viewport is dynamic state of every pipeline.
        unsafe { self.device.cmd_set_viewport(cb, 0, &[viewport]) }
    }

    fn cmd_set_scissor(&mut self, cb: vk::CommandBuffer, scissor: vk::Rect2D) {
        // SAFETY: scissor is dynamic state of every pipeline.
        unsafe { self.device.cmd_set_scissor(cb, 0, &[scissor]) }
    }

    fn cmd_set_depth_bias(&mut self, cb: vk::CommandBuffer, constant: f32, clamp: f32, slope: f32) {
        // SAFETY: depth bias is dynamic state of every pipeline.
        unsafe { self.device.cmd_set_depth_bias(cb, constant, clamp, slope) }
    }

    fn cmd_bind_vertex_buffer(&mut self, cb: vk::CommandBuffer, binding: u32, buffer: vk::Buffer, offset: u64) {
        // SAFETY: recording commands into a buffer in the recording state.
        unsafe { self.device.cmd_bind_vertex_buffers(cb, binding, &[buffer], &[offset]) }
    }

    fn cmd_bind_index_buffer(&mut self, cb: vk::CommandBuffer, buffer: vk::Buffer, offset: u64, index_type: vk::IndexType) {
        // SAFETY: recording commands into a buffer in the recording state.
        unsafe { self.device.cmd_bind_index_buffer(cb, buffer, offset, index_type) }
    }

    fn cmd_draw(&mut self, cb: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32) {
        // SAFETY: a render pass and a pipeline are bound.
        unsafe { self.device.cmd_draw(cb, vertex_count, instance_count, first_vertex, 0) }
    }

    fn cmd_draw_indexed(
        &mut self,
        cb: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) {
        // SAFETY: a render pass, a pipeline and an index buffer are bound.
        unsafe {
            self.device
                .cmd_draw_indexed(cb, index_count, instance_count, first_index, vertex_offset, 0)
        }
    }

    fn cmd_dispatch(&mut self, cb: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        // SAFETY: a compute pipeline is bound outside any render pass.
        unsafe { self.device.cmd_dispatch(cb, x, y, z) }
    }

    fn cmd_pipeline_barrier(
        &mut self,
        cb: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        buffers: &[vk::BufferMemoryBarrier<'_>],
        images: &[vk::ImageMemoryBarrier<'_>],
    ) {
        // SAFETY: recording commands into a buffer in the recording state.
        unsafe {
            self.device
                .cmd_pipeline_barrier(cb, src_stage, dst_stage, vk::DependencyFlags::empty(), &[], buffers, images)
        }
    }
}

impl Drop for AshDriver {
    fn drop(&mut self) {
        self.device_wait_idle();
        for (buffer, entry) in std::mem::take(&mut self.buffers) {
            self.free_buffer(buffer, entry);
        }
        for (image, mut entry) in std::mem::take(&mut self.images) {
            // SAFETY: the device is idle.
            unsafe {
                self.device.destroy_image_view(entry.view, None);
                self.allocator.destroy_image(image, &mut entry.allocation);
            }
        }
        self.destroy_swapchain_targets();
        // SAFETY: the device is idle and nothing references the pool or layout.
        unsafe {
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.destroy_command_pool(self.command_pool, None);
        }
        log::info!("AshDriver: released every driver-owned object");
    }
}
