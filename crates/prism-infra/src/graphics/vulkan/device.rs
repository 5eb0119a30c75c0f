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

use super::cmd_list::{VkRecording, VulkanCmdList};
use super::conversions::IntoVk;
use super::driver::{VkAttachmentKey, VkGraphicsPipelineDesc, VkRenderPassKey, VkStage, VulkanDriver};
use super::frame::FrameRing;
use ash::vk;
use prism_core::config::RhiConfig;
use prism_core::rhi::validate::{self, label};
use prism_core::rhi::{
    BufferDesc, BufferHandle, Caps, CmdList, CmdListState, CommandError, CommandTracker, Device,
    FenceHandle, FenceStatus, Format, FramebufferDesc, FramebufferHandle, GraphicsBackendType, LoadOp,
    PipelineDesc, PipelineHandle, QueryHandle, QueryKind, RenderError, RenderPassDesc,
    ResourceError, ResourceTable, SamplerDesc, SamplerHandle, ShaderCode, ShaderDesc,
    ShaderHandle, ShaderStage, StoreOp, TextureDesc, TextureHandle,
};
use std::collections::HashMap;
use std::io::Cursor;

const BACKEND: &str = "Vulkan";

#[derive(Debug)]
pub(super) struct VkBuffer {
    pub buffer: vk::Buffer,
    pub size: u64,
    host_visible: bool,
}

#[derive(Debug)]
pub(super) struct VkTexture {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub desc: TextureDesc,
}

#[derive(Debug)]
struct VkShader {
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: String,
}

#[derive(Debug)]
pub(super) struct VkPipeline {
    pub pipeline: vk::Pipeline,
    pub is_compute: bool,
}

/// A render pass resolved at `begin_render`. The native pass and its
/// framebuffer are created when the first pipeline is bound, or at
/// `end_render` for passes that only clear.
#[derive(Debug, Clone)]
pub(super) struct PendingPass {
    pub key: VkRenderPassKey,
    pub views: Vec<vk::ImageView>,
    pub extent: vk::Extent2D,
    pub clear_colors: Vec<[f32; 4]>,
    pub clear_depth: Option<(f32, u32)>,
}

impl PendingPass {
    pub fn clear_values(&self) -> Vec<vk::ClearValue> {
        let colors = self.clear_colors.iter().map(|&float32| vk::ClearValue {
            color: vk::ClearColorValue { float32 },
        });
        let depth = self.clear_depth.map(|(depth, stencil)| vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        });
        colors.chain(depth).collect()
    }
}

fn resolve_shader(
    shaders: &ResourceTable<ShaderHandle, VkShader>,
    handle: ShaderHandle,
    expected: ShaderStage,
) -> Result<VkStage<'_>, ResourceError> {
    let shader = shaders
        .get(handle)
        .ok_or_else(|| ResourceError::invalid(handle))?;
    if shader.stage != expected {
        return Err(ResourceError::InvalidDescriptor(format!(
            "{handle} is a {:?} shader, expected {expected:?}",
            shader.stage
        )));
    }
    Ok(VkStage {
        module: shader.module,
        entry_point: &shader.entry_point,
    })
}

fn backend_error(e: vk::Result) -> ResourceError {
    ResourceError::Backend(e.to_string())
}

fn unsupported(operation: &'static str) -> ResourceError {
    ResourceError::Unsupported {
        backend: BACKEND,
        operation,
    }
}

/// A Vulkan device rendering to a swapchain with two frames in flight.
///
/// Only the parts of the RHI needed to draw into the swapchain or into
/// offscreen textures are implemented. Samplers, framebuffer objects,
/// queries, fences and descriptor bindings report `Unsupported`.
#[derive(Debug)]
pub struct VulkanDevice {
    pub(super) driver: Box<dyn VulkanDriver>,
    caps: Caps,
    pub(super) config: RhiConfig,
    pub(super) buffers: ResourceTable<BufferHandle, VkBuffer>,
    pub(super) textures: ResourceTable<TextureHandle, VkTexture>,
    shaders: ResourceTable<ShaderHandle, VkShader>,
    pub(super) pipelines: ResourceTable<PipelineHandle, VkPipeline>,
    render_passes: HashMap<VkRenderPassKey, vk::RenderPass>,
    pub(super) frames: FrameRing,
    pub(super) tracker: CommandTracker,
    pub(super) recording: VkRecording,
}

impl VulkanDevice {
    /// Wraps a Vulkan device and creates the per-frame objects.
    ///
    /// ## Errors
    /// * `RenderError::InitializationFailed` - If the configuration is invalid
    ///   or the frame objects cannot be created.
    pub fn new(mut driver: Box<dyn VulkanDriver>, config: &RhiConfig) -> Result<Self, RenderError> {
        config
            .validate()
            .map_err(|e| RenderError::InitializationFailed(e.to_string()))?;
        let frames = FrameRing::new(driver.as_mut())
            .map_err(|e| RenderError::InitializationFailed(format!("frame objects: {e}")))?;
        let extent = driver.swapchain_extent();
        log::info!(
            "VulkanDevice: initialized ({}x{} swapchain, {} frames in flight)",
            extent.width,
            extent.height,
            super::FRAMES_IN_FLIGHT
        );
        Ok(Self {
            driver,
            caps: Caps::vulkan(),
            config: config.clone(),
            buffers: ResourceTable::new(),
            textures: ResourceTable::new(),
            shaders: ResourceTable::new(),
            pipelines: ResourceTable::new(),
            render_passes: HashMap::new(),
            frames,
            tracker: CommandTracker::new(),
            recording: VkRecording::default(),
        })
    }

    /// The configuration the device was created with.
    pub fn config(&self) -> &RhiConfig {
        &self.config
    }

    /// Index of the frame slot the next frame records into.
    pub fn frame_slot(&self) -> usize {
        self.frames.current_index()
    }

    /// Number of distinct native render passes created so far.
    pub fn render_pass_count(&self) -> usize {
        self.render_passes.len()
    }

    fn log_lifetime(&self, action: &str, what: &dyn std::fmt::Display, name: &str) {
        if self.config.debug.log_resource_lifetimes {
            log::debug!("VulkanDevice: {action} {what} '{name}'");
        }
    }

    /// Returns the render pass for `key`, creating it once.
    pub(super) fn render_pass(&mut self, key: &VkRenderPassKey) -> Result<vk::RenderPass, vk::Result> {
        if let Some(&pass) = self.render_passes.get(key) {
            return Ok(pass);
        }
        let pass = self.driver.create_render_pass(key)?;
        self.render_passes.insert(key.clone(), pass);
        Ok(pass)
    }

    /// Translates a pass description into attachments of the open frame.
    /// Texture handle 0 selects the swapchain image or the default depth
    /// buffer.
    pub(super) fn resolve_pass(&self, op: &'static str, desc: &RenderPassDesc) -> Result<PendingPass, CommandError> {
        let Some(image_index) = self.frames.image_index() else {
            return Err(CommandError::InvalidState {
                op,
                state: self.tracker.state(),
            });
        };
        if desc.framebuffer.id != 0 {
            return Err(CommandError::Unsupported {
                backend: BACKEND,
                op: "begin_render with a framebuffer object",
            });
        }

        let attachment = |format, load: LoadOp, store: StoreOp, loaded, final_layout| VkAttachmentKey {
            format,
            load: load.into_vk(),
            store: store.into_vk(),
            initial_layout: if load == LoadOp::Load {
                loaded
            } else {
                vk::ImageLayout::UNDEFINED
            },
            final_layout,
        };
        let mut extent = None;
        let mut pass = PendingPass {
            key: VkRenderPassKey::default(),
            views: Vec::new(),
            extent: self.driver.swapchain_extent(),
            clear_colors: Vec::new(),
            clear_depth: None,
        };

        for a in &desc.color_attachments {
            let (view, format, layout) = if a.texture.id == 0 {
                let layout = vk::ImageLayout::PRESENT_SRC_KHR;
                (self.driver.swapchain_view(image_index), self.driver.swapchain_format(), layout)
            } else {
                let entry = self
                    .textures
                    .get(a.texture)
                    .ok_or_else(|| CommandError::invalid(op, a.texture))?;
                if entry.desc.format.is_depth() {
                    return Err(CommandError::Backend {
                        op,
                        message: format!("{} has a depth format but is bound as color", a.texture),
                    });
                }
                extent.get_or_insert((entry.desc.width, entry.desc.height));
                let format: vk::Format = entry.desc.format.into_vk();
                (entry.view, format, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            };
            pass.key.colors.push(attachment(format, a.load, a.store, layout, layout));
            pass.views.push(view);
            pass.clear_colors.push(a.clear_color);
        }

        if let Some(d) = desc.depth_attachment {
            let (view, format) = if d.texture.id == 0 {
                self.driver.default_depth()
            } else {
                let entry = self
                    .textures
                    .get(d.texture)
                    .ok_or_else(|| CommandError::invalid(op, d.texture))?;
                if !entry.desc.format.is_depth() {
                    return Err(CommandError::Backend {
                        op,
                        message: format!("{} is not a depth format", d.texture),
                    });
                }
                extent.get_or_insert((entry.desc.width, entry.desc.height));
                (entry.view, entry.desc.format.into_vk())
            };
            let layout = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
            pass.key.depth = Some(attachment(format, d.load, d.store, layout, layout));
            pass.views.push(view);
            pass.clear_depth = Some((d.clear_depth, d.clear_stencil));
        }

        if let Some((width, height)) = extent {
            pass.extent = vk::Extent2D { width, height };
        }
        Ok(pass)
    }

    /// A render pass with the attachment formats of `desc`, used to create
    /// pipelines. Load/store operations do not affect compatibility.
    fn compatible_pass(&mut self, color_formats: &[Format], depth_format: Option<Format>) -> Result<vk::RenderPass, vk::Result> {
        let attachment = |format: Format, layout| VkAttachmentKey {
            format: format.into_vk(),
            load: vk::AttachmentLoadOp::CLEAR,
            store: vk::AttachmentStoreOp::STORE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: layout,
        };
        let key = VkRenderPassKey {
            colors: color_formats
                .iter()
                .map(|&f| attachment(f, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
                .collect(),
            depth: depth_format.map(|f| attachment(f, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)),
        };
        self.render_pass(&key)
    }
}

impl Device for VulkanDevice {
    fn backend(&self) -> GraphicsBackendType {
        GraphicsBackendType::Vulkan
    }

    fn caps(&self) -> &Caps {
        &self.caps
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, ResourceError> {
        validate::buffer_desc(desc)?;
        let buffer = self
            .driver
            .create_buffer(desc.size, desc.usage.into_vk(), desc.host_visible)
            .map_err(backend_error)?;
        let handle = self.buffers.insert(VkBuffer {
            buffer,
            size: desc.size,
            host_visible: desc.host_visible,
        });
        self.log_lifetime("created", &handle, label(&desc.label));
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) -> Result<(), ResourceError> {
        let entry = self
            .buffers
            .remove(buffer)
            .ok_or_else(|| ResourceError::invalid(buffer))?;
        self.recording.forget_buffer(entry.buffer);
        self.driver.destroy_buffer(entry.buffer);
        self.log_lifetime("destroyed", &buffer, "");
        Ok(())
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let entry = self
            .buffers
            .get(buffer)
            .ok_or_else(|| ResourceError::invalid(buffer))?;
        validate::range(offset, data.len() as u64, entry.size)?;
        if !entry.host_visible {
            return Err(unsupported("write_buffer to device-local memory"));
        }
        let native = entry.buffer;
        self.driver.write_buffer(native, offset, data);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, ResourceError> {
        validate::texture_desc(desc)?;
        let (image, view) = self
            .driver
            .create_image(desc, desc.format.into_vk(), desc.usage.into_vk())
            .map_err(backend_error)?;
        let handle = self.textures.insert(VkTexture {
            image,
            view,
            desc: desc.clone(),
        });
        self.log_lifetime("created", &handle, label(&desc.label));
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) -> Result<(), ResourceError> {
        let entry = self
            .textures
            .remove(texture)
            .ok_or_else(|| ResourceError::invalid(texture))?;
        self.driver.destroy_image(entry.image, entry.view);
        self.log_lifetime("destroyed", &texture, label(&entry.desc.label));
        Ok(())
    }

    fn write_texture(&mut self, texture: TextureHandle, mip_level: u32, data: &[u8]) -> Result<(), ResourceError> {
        let entry = self
            .textures
            .get(texture)
            .ok_or_else(|| ResourceError::invalid(texture))?;
        validate::texture_upload(&entry.desc, mip_level, data.len())?;
        self.driver
            .upload_image(entry.image, &entry.desc, mip_level, data)
            .map_err(backend_error)
    }

    fn create_sampler(&mut self, _desc: &SamplerDesc) -> Result<SamplerHandle, ResourceError> {
        Err(unsupported("create_sampler"))
    }

    fn destroy_sampler(&mut self, _sampler: SamplerHandle) -> Result<(), ResourceError> {
        Err(unsupported("destroy_sampler"))
    }

    fn create_shader(&mut self, desc: &ShaderDesc) -> Result<ShaderHandle, ResourceError> {
        let name = label(&desc.label);
        let compilation = |log: String| {
            log::error!("VulkanDevice: {:?} shader '{name}' rejected:\n{log}", desc.stage);
            ResourceError::Compilation {
                label: name.to_string(),
                log,
            }
        };
        let ShaderCode::SpirV(bytes) = &desc.code else {
            return Err(compilation("the Vulkan backend only accepts SPIR-V".into()));
        };
        let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| compilation(e.to_string()))?;
        let module = self
            .driver
            .create_shader_module(&words)
            .map_err(|e| compilation(e.to_string()))?;
        let handle = self.shaders.insert(VkShader {
            module,
            stage: desc.stage,
            entry_point: desc.entry_point.clone(),
        });
        self.log_lifetime("created", &handle, name);
        Ok(handle)
    }

    fn destroy_shader(&mut self, shader: ShaderHandle) -> Result<(), ResourceError> {
        let entry = self
            .shaders
            .remove(shader)
            .ok_or_else(|| ResourceError::invalid(shader))?;
        self.driver.destroy_shader_module(entry.module);
        Ok(())
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineHandle, ResourceError> {
        validate::pipeline_desc(desc)?;
        let name = label(&desc.label);
        let creation = |e: vk::Result| {
            log::error!("VulkanDevice: pipeline '{name}' failed: {e}");
            ResourceError::PipelineCreation {
                label: name.to_string(),
                log: e.to_string(),
            }
        };

        let pipeline = if desc.is_compute() {
            let stage = resolve_shader(&self.shaders, desc.compute_shader, ShaderStage::Compute)?;
            self.driver
                .create_compute_pipeline(stage)
                .map_err(creation)?
        } else {
            let render_pass = self
                .compatible_pass(&desc.color_formats, desc.depth_format)
                .map_err(creation)?;
            let vertex = resolve_shader(&self.shaders, desc.vertex_shader, ShaderStage::Vertex)?;
            let fragment = resolve_shader(&self.shaders, desc.fragment_shader, ShaderStage::Fragment)?;
            let native = VkGraphicsPipelineDesc {
                label: name,
                vertex,
                fragment,
                render_pass,
                vertex_layouts: &desc.vertex_layouts,
                topology: desc.topology,
                raster: desc.raster,
                depth_stencil: desc.depth_stencil,
                blend: desc.blend,
                color_count: desc.color_formats.len() as u32,
            };
            self.driver
                .create_graphics_pipeline(&native)
                .map_err(creation)?
        };

        let handle = self.pipelines.insert(VkPipeline {
            pipeline,
            is_compute: desc.is_compute(),
        });
        self.log_lifetime("created", &handle, name);
        Ok(handle)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), ResourceError> {
        let entry = self
            .pipelines
            .remove(pipeline)
            .ok_or_else(|| ResourceError::invalid(pipeline))?;
        self.recording.forget_pipeline(entry.pipeline);
        self.driver.destroy_pipeline(entry.pipeline);
        Ok(())
    }

    fn create_framebuffer(&mut self, _desc: &FramebufferDesc) -> Result<FramebufferHandle, ResourceError> {
        Err(unsupported("create_framebuffer"))
    }

    fn destroy_framebuffer(&mut self, _framebuffer: FramebufferHandle) -> Result<(), ResourceError> {
        Err(unsupported("destroy_framebuffer"))
    }

    fn create_query(&mut self, _kind: QueryKind) -> Result<QueryHandle, ResourceError> {
        Err(unsupported("create_query"))
    }

    fn destroy_query(&mut self, _query: QueryHandle) -> Result<(), ResourceError> {
        Err(unsupported("destroy_query"))
    }

    fn query_result(&mut self, _query: QueryHandle) -> Result<Option<u64>, ResourceError> {
        Err(unsupported("query_result"))
    }

    fn create_fence(&mut self) -> Result<FenceHandle, ResourceError> {
        Err(unsupported("create_fence"))
    }

    fn destroy_fence(&mut self, _fence: FenceHandle) -> Result<(), ResourceError> {
        Err(unsupported("destroy_fence"))
    }

    fn wait_fence(&mut self, _fence: FenceHandle, _timeout_ns: u64) -> Result<FenceStatus, RenderError> {
        Err(unsupported("wait_fence").into())
    }

    fn immediate(&mut self) -> Box<dyn CmdList + '_> {
        Box::new(VulkanCmdList::new(self))
    }

    fn present(&mut self) -> Result<(), RenderError> {
        let state = self.tracker.state();
        if state != CmdListState::Idle {
            return Err(CommandError::InvalidState { op: "present", state }.into());
        }
        if !self.frames.is_open() {
            log::debug!("VulkanDevice: present without recorded work, skipped");
            return Ok(());
        }
        self.recording = VkRecording::default();
        self.frames.end_frame(self.driver.as_mut())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        let driver = &mut self.driver;
        self.frames.destroy(driver.as_mut());
        self.pipelines.drain_with(|_, p| driver.destroy_pipeline(p.pipeline));
        for (_, pass) in self.render_passes.drain() {
            driver.destroy_render_pass(pass);
        }
        self.shaders.drain_with(|_, s| driver.destroy_shader_module(s.module));
        self.textures.drain_with(|_, t| driver.destroy_image(t.image, t.view));
        self.buffers.drain_with(|_, b| driver.destroy_buffer(b.buffer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::vulkan::HeadlessVulkan;
    use crate::graphics::CallLog;
    use prism_core::rhi::{BufferUsage, TextureUsage};

    /// The smallest module `read_spv` accepts: a header with no instructions.
    fn spirv_header() -> Vec<u8> {
        [0x0723_0203u32, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    fn device() -> (VulkanDevice, CallLog) {
        let vk = HeadlessVulkan::new(800, 600);
        let log = vk.call_log();
        (VulkanDevice::new(Box::new(vk), &RhiConfig::default()).unwrap(), log)
    }

    #[test]
    fn only_spirv_is_accepted() {
        let (mut dev, _) = device();
        let glsl = dev.create_shader(&ShaderDesc {
            label: None,
            stage: ShaderStage::Vertex,
            code: ShaderCode::Glsl("void main() {}".into()),
            entry_point: "main".into(),
        });
        assert!(matches!(glsl, Err(ResourceError::Compilation { .. })));

        let truncated = dev.create_shader(&ShaderDesc {
            label: None,
            stage: ShaderStage::Vertex,
            code: ShaderCode::SpirV(vec![0x03, 0x02, 0x23]),
            entry_point: "main".into(),
        });
        assert!(matches!(truncated, Err(ResourceError::Compilation { .. })));

        let spv = dev.create_shader(&ShaderDesc {
            label: None,
            stage: ShaderStage::Vertex,
            code: ShaderCode::SpirV(spirv_header()),
            entry_point: "main".into(),
        });
        assert!(spv.is_ok());
    }

    #[test]
    fn unsupported_objects_report_unsupported() {
        let (mut dev, _) = device();
        assert!(matches!(
            dev.create_sampler(&SamplerDesc::default()),
            Err(ResourceError::Unsupported { backend: "Vulkan", .. })
        ));
        assert!(matches!(dev.create_fence(), Err(ResourceError::Unsupported { .. })));
        assert!(matches!(
            dev.create_query(QueryKind::Timestamp),
            Err(ResourceError::Unsupported { .. })
        ));
        assert!(matches!(
            dev.create_framebuffer(&FramebufferDesc::default()),
            Err(ResourceError::Unsupported { .. })
        ));
    }

    #[test]
    fn device_local_buffers_cannot_be_mapped() {
        let (mut dev, log) = device();
        let buffer = dev
            .create_buffer(&BufferDesc {
                label: None,
                size: 64,
                usage: BufferUsage::VERTEX,
                host_visible: false,
            })
            .unwrap();
        assert!(dev.write_buffer(buffer, 0, &[1, 2, 3, 4]).is_err());
        assert_eq!(log.count("write_buffer"), 0);
    }

    #[test]
    fn pipelines_sharing_formats_share_a_render_pass() {
        let (mut dev, _) = device();
        let shader = |dev: &mut VulkanDevice, stage| {
            dev.create_shader(&ShaderDesc {
                label: None,
                stage,
                code: ShaderCode::SpirV(spirv_header()),
                entry_point: "main".into(),
            })
            .unwrap()
        };
        let vs = shader(&mut dev, ShaderStage::Vertex);
        let fs = shader(&mut dev, ShaderStage::Fragment);
        dev.create_pipeline(&PipelineDesc::graphics(vs, fs)).unwrap();
        dev.create_pipeline(&PipelineDesc::graphics(vs, fs)).unwrap();
        assert_eq!(dev.render_pass_count(), 1);

        let swapped = dev.create_pipeline(&PipelineDesc::graphics(fs, vs));
        assert!(matches!(swapped, Err(ResourceError::InvalidDescriptor(_))));
    }

    #[test]
    fn dropping_the_device_releases_everything() {
        let vk = HeadlessVulkan::new(64, 64);
        let log = vk.call_log();
        let mut dev = VulkanDevice::new(Box::new(vk), &RhiConfig::default()).unwrap();
        dev.create_texture(&TextureDesc::d2(16, 16, Format::Rgba8Unorm, TextureUsage::SAMPLED))
            .unwrap();
        drop(dev);
        assert_eq!(log.count("destroy_image"), 1);
        assert_eq!(log.count("destroy_fence"), 2);
        assert_eq!(log.count("violation:double_destroy"), 0);
    }
}
