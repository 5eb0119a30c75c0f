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

use super::cmd_list::{MetalCmdList, MtlEncoderState};
use super::driver::{MetalDriver, MtlColorTarget, MtlDepthTarget, MtlObject, MtlRenderPass, MtlRenderPipelineDesc};
use super::pipeline_cache::{PipelineCache, PipelineKey};
use prism_core::config::RhiConfig;
use prism_core::rhi::validate::{self, label};
use prism_core::rhi::{
    BufferDesc, BufferHandle, Caps, CmdList, CmdListState, ColorAttachment, CommandError,
    CommandTracker, DepthAttachment, DepthStencilState, Device, FenceHandle, FenceStatus,
    FramebufferDesc, FramebufferHandle, GraphicsBackendType, LoadOp, PipelineDesc, PipelineHandle,
    PrimitiveTopology, QueryHandle, QueryKind, RasterState, RenderError, RenderPassDesc,
    ResourceError, ResourceTable, SamplerDesc, SamplerHandle, ShaderCode, ShaderDesc,
    ShaderHandle, ShaderStage, TextureDesc, TextureHandle, UniformAllocator,
    MAX_COLOR_ATTACHMENTS, TIMEOUT_INFINITE,
};
use std::collections::HashMap;

#[derive(Debug)]
pub(super) struct MtlBuffer {
    pub object: MtlObject,
    pub size: u64,
}

#[derive(Debug)]
pub(super) struct MtlTexture {
    pub object: MtlObject,
    pub desc: TextureDesc,
}

#[derive(Debug)]
struct MtlShader {
    library: MtlObject,
    function: MtlObject,
    stage: ShaderStage,
}

/// A cached PSO plus the state Metal sets on the encoder instead.
#[derive(Debug)]
pub(super) struct MtlPipeline {
    key: PipelineKey,
    pub pso: MtlObject,
    pub is_compute: bool,
    pub topology: PrimitiveTopology,
    pub raster: RasterState,
    pub depth_state: Option<MtlObject>,
}

#[derive(Debug)]
pub(super) struct MtlFramebuffer {
    pub colors: Vec<MtlObject>,
    pub depth: Option<MtlObject>,
    pub width: u32,
    pub height: u32,
}

/// Two timestamp slots: begin (or the timestamp) and end.
#[derive(Debug)]
pub(super) struct MtlQuery {
    pub kind: QueryKind,
    pub counters: MtlObject,
}

/// A shared event; `target` is the last value a command list asked it to
/// reach, 0 while it was never signaled.
#[derive(Debug)]
pub(super) struct MtlFence {
    pub event: MtlObject,
    pub target: u64,
}

/// A Metal device.
///
/// Per-draw uniforms come from one shared ring buffer split into
/// `frames_in_flight` slices. `present` signals a frame event after the
/// committed work, and a slice is only reused once the GPU has passed the
/// frame that last wrote it.
#[derive(Debug)]
pub struct MetalDevice {
    pub(super) driver: Box<dyn MetalDriver>,
    caps: Caps,
    pub(super) config: RhiConfig,
    pub(super) buffers: ResourceTable<BufferHandle, MtlBuffer>,
    pub(super) textures: ResourceTable<TextureHandle, MtlTexture>,
    pub(super) samplers: ResourceTable<SamplerHandle, MtlObject>,
    shaders: ResourceTable<ShaderHandle, MtlShader>,
    pub(super) pipelines: ResourceTable<PipelineHandle, MtlPipeline>,
    pub(super) framebuffers: ResourceTable<FramebufferHandle, MtlFramebuffer>,
    pub(super) queries: ResourceTable<QueryHandle, MtlQuery>,
    pub(super) fences: ResourceTable<FenceHandle, MtlFence>,
    pso_cache: PipelineCache,
    depth_states: HashMap<DepthStencilState, MtlObject>,
    pub(super) tracker: CommandTracker,
    pub(super) encoders: MtlEncoderState,
    pub(super) command_buffer: Option<MtlObject>,
    pub(super) uniforms: UniformAllocator,
    pub(super) uniform_ring: MtlObject,
    drawable_size: (u32, u32),
    frame_event: MtlObject,
    frame_serial: u64,
    // Frame serial that last wrote each ring slice.
    slice_serials: Vec<u64>,
    frame_index: u32,
}

impl MetalDevice {
    /// Wraps a Metal device and allocates the uniform ring and frame event.
    ///
    /// ## Errors
    /// * `RenderError::InitializationFailed` - If the configuration is invalid
    ///   or a device object cannot be created.
    pub fn new(mut driver: Box<dyn MetalDriver>, config: &RhiConfig) -> Result<Self, RenderError> {
        config
            .validate()
            .map_err(|e| RenderError::InitializationFailed(e.to_string()))?;
        let uniforms = UniformAllocator::from_config(config);
        let uniform_ring = driver
            .new_buffer(uniforms.total_size(), true)
            .map_err(|e| RenderError::InitializationFailed(format!("uniform ring allocation: {e}")))?;
        let frame_event = driver
            .new_shared_event()
            .map_err(|e| RenderError::InitializationFailed(format!("frame event: {e}")))?;
        log::info!(
            "MetalDevice: initialized ({} KiB uniform ring, {} frames in flight)",
            uniforms.total_size() / 1024,
            uniforms.frames_in_flight()
        );
        Ok(Self {
            driver,
            caps: Caps::metal(),
            config: config.clone(),
            buffers: ResourceTable::new(),
            textures: ResourceTable::new(),
            samplers: ResourceTable::new(),
            shaders: ResourceTable::new(),
            pipelines: ResourceTable::new(),
            framebuffers: ResourceTable::new(),
            queries: ResourceTable::new(),
            fences: ResourceTable::new(),
            pso_cache: PipelineCache::new(config.debug.log_pipeline_cache),
            depth_states: HashMap::new(),
            tracker: CommandTracker::new(),
            encoders: MtlEncoderState::default(),
            command_buffer: None,
            slice_serials: vec![0; uniforms.frames_in_flight() as usize],
            uniforms,
            uniform_ring,
            drawable_size: (0, 0),
            frame_event,
            frame_serial: 0,
            frame_index: 0,
        })
    }

    /// The configuration the device was created with.
    pub fn config(&self) -> &RhiConfig {
        &self.config
    }

    /// Records the size of the drawable, used for passes targeting it.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.drawable_size = (width, height);
    }

    /// `(hits, misses)` of the PSO cache.
    pub fn pipeline_cache_stats(&self) -> (u64, u64) {
        self.pso_cache.stats()
    }

    /// Number of distinct PSOs alive.
    pub fn pipeline_state_count(&self) -> usize {
        self.pso_cache.len()
    }

    fn log_lifetime(&self, action: &str, what: &dyn std::fmt::Display, name: &str) {
        if self.config.debug.log_resource_lifetimes {
            log::debug!("MetalDevice: {action} {what} '{name}'");
        }
    }

    fn resolve_shader(&self, handle: ShaderHandle, expected: ShaderStage) -> Result<MtlObject, ResourceError> {
        let shader = self
            .shaders
            .get(handle)
            .ok_or_else(|| ResourceError::invalid(handle))?;
        if shader.stage != expected {
            return Err(ResourceError::InvalidDescriptor(format!(
                "{handle} is a {:?} shader, expected {expected:?}",
                shader.stage
            )));
        }
        Ok(shader.function)
    }

    /// Returns the depth-stencil state object for `state`, creating it once.
    pub(super) fn depth_state(&mut self, state: &DepthStencilState) -> Result<MtlObject, String> {
        if let Some(&object) = self.depth_states.get(state) {
            return Ok(object);
        }
        let object = self.driver.new_depth_stencil_state(state)?;
        self.depth_states.insert(*state, object);
        Ok(object)
    }

    /// Translates a pass description into a native pass and its extent.
    pub(super) fn resolve_pass(
        &self,
        op: &'static str,
        desc: &RenderPassDesc,
    ) -> Result<(MtlRenderPass, (u32, u32)), CommandError> {
        let color = |i: usize| desc.color_attachments.get(i).copied().unwrap_or(ColorAttachment {
            load: LoadOp::Load,
            ..ColorAttachment::default()
        });
        let target = |texture: Option<MtlObject>, a: ColorAttachment| MtlColorTarget {
            texture,
            load: a.load,
            store: a.store,
            clear_color: a.clear_color,
        };
        let depth_target = |texture: Option<MtlObject>, d: DepthAttachment| MtlDepthTarget {
            texture,
            load: d.load,
            store: d.store,
            clear_depth: d.clear_depth,
        };

        if desc.framebuffer.id != 0 {
            let fb = self
                .framebuffers
                .get(desc.framebuffer)
                .ok_or_else(|| CommandError::invalid(op, desc.framebuffer))?;
            let colors = fb
                .colors
                .iter()
                .enumerate()
                .map(|(i, &object)| target(Some(object), color(i)))
                .collect();
            let depth = fb
                .depth
                .map(|object| depth_target(Some(object), desc.depth_attachment.unwrap_or_default()));
            return Ok((MtlRenderPass { colors, depth }, (fb.width, fb.height)));
        }

        let mut extent = None;
        let mut resolve = |texture: TextureHandle| -> Result<Option<MtlObject>, CommandError> {
            if texture.id == 0 {
                return Ok(None);
            }
            let entry = self
                .textures
                .get(texture)
                .ok_or_else(|| CommandError::invalid(op, texture))?;
            extent.get_or_insert((entry.desc.width, entry.desc.height));
            Ok(Some(entry.object))
        };
        let mut colors = Vec::with_capacity(desc.color_attachments.len());
        for a in &desc.color_attachments {
            colors.push(target(resolve(a.texture)?, *a));
        }
        let depth = match desc.depth_attachment {
            Some(d) => Some(depth_target(resolve(d.texture)?, d)),
            None => None,
        };
        Ok((
            MtlRenderPass { colors, depth },
            extent.unwrap_or(self.drawable_size),
        ))
    }

    /// Commits pending work so that waits on it can complete.
    fn flush_idle_work(&mut self) {
        if self.tracker.state() != CmdListState::Idle {
            return;
        }
        if let Some(cb) = self.command_buffer.take() {
            self.driver.commit(cb, false);
        }
    }
}

impl Device for MetalDevice {
    fn backend(&self) -> GraphicsBackendType {
        GraphicsBackendType::Metal
    }

    fn caps(&self) -> &Caps {
        &self.caps
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, ResourceError> {
        validate::buffer_desc(desc)?;
        let object = self
            .driver
            .new_buffer(desc.size, desc.host_visible)
            .map_err(ResourceError::Backend)?;
        let handle = self.buffers.insert(MtlBuffer {
            object,
            size: desc.size,
        });
        self.log_lifetime("created", &handle, label(&desc.label));
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) -> Result<(), ResourceError> {
        let entry = self
            .buffers
            .remove(buffer)
            .ok_or_else(|| ResourceError::invalid(buffer))?;
        self.driver.release(entry.object);
        self.log_lifetime("destroyed", &buffer, "");
        Ok(())
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let entry = self
            .buffers
            .get(buffer)
            .ok_or_else(|| ResourceError::invalid(buffer))?;
        validate::range(offset, data.len() as u64, entry.size)?;
        let object = entry.object;
        self.driver.buffer_write(object, offset, data);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, ResourceError> {
        validate::texture_desc(desc)?;
        let object = self
            .driver
            .new_texture(desc)
            .map_err(ResourceError::Backend)?;
        let handle = self.textures.insert(MtlTexture {
            object,
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
        self.driver.release(entry.object);
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
            .replace_texture_level(entry.object, &entry.desc, mip_level, data);
        Ok(())
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerHandle, ResourceError> {
        validate::sampler_desc(desc)?;
        let anisotropy = f32::from(desc.max_anisotropy.max(1)).min(self.caps.max_anisotropy);
        let object = self
            .driver
            .new_sampler(desc, anisotropy)
            .map_err(ResourceError::Backend)?;
        Ok(self.samplers.insert(object))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) -> Result<(), ResourceError> {
        let object = self
            .samplers
            .remove(sampler)
            .ok_or_else(|| ResourceError::invalid(sampler))?;
        self.driver.release(object);
        Ok(())
    }

    fn create_shader(&mut self, desc: &ShaderDesc) -> Result<ShaderHandle, ResourceError> {
        let name = label(&desc.label);
        let compilation = |log: String| {
            log::error!("MetalDevice: {:?} shader '{name}' failed to compile:\n{log}", desc.stage);
            ResourceError::Compilation {
                label: name.to_string(),
                log,
            }
        };
        let ShaderCode::Msl(source) = &desc.code else {
            return Err(compilation("the Metal backend only accepts MSL source".into()));
        };
        let library = self.driver.new_library(source).map_err(compilation)?;
        let function = match self.driver.new_function(library, &desc.entry_point) {
            Ok(function) => function,
            Err(log) => {
                self.driver.release(library);
                return Err(compilation(log));
            }
        };
        let handle = self.shaders.insert(MtlShader {
            library,
            function,
            stage: desc.stage,
        });
        self.log_lifetime("compiled", &handle, name);
        Ok(handle)
    }

    fn destroy_shader(&mut self, shader: ShaderHandle) -> Result<(), ResourceError> {
        let entry = self
            .shaders
            .remove(shader)
            .ok_or_else(|| ResourceError::invalid(shader))?;
        self.driver.release(entry.function);
        self.driver.release(entry.library);
        Ok(())
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineHandle, ResourceError> {
        validate::pipeline_desc(desc)?;
        let name = label(&desc.label);
        let key = PipelineKey {
            vs: desc.vertex_shader,
            fs: desc.fragment_shader,
            cs: desc.compute_shader,
            instanced: desc.instanced,
            color_formats: desc.color_formats.clone(),
            depth_format: desc.depth_format,
            blend: desc.blend,
            vertex_layouts: desc.vertex_layouts.clone(),
        };
        let creation = |log: String| {
            log::error!("MetalDevice: pipeline '{name}' failed:\n{log}");
            ResourceError::PipelineCreation {
                label: name.to_string(),
                log,
            }
        };

        let (pso, depth_state) = if desc.is_compute() {
            let function = self.resolve_shader(desc.compute_shader, ShaderStage::Compute)?;
            let driver = &mut self.driver;
            let pso = self
                .pso_cache
                .acquire(&key, || driver.new_compute_pipeline(function))
                .map_err(creation)?;
            (pso, None)
        } else {
            let vertex = self.resolve_shader(desc.vertex_shader, ShaderStage::Vertex)?;
            let fragment = self.resolve_shader(desc.fragment_shader, ShaderStage::Fragment)?;
            let depth_state = self.depth_state(&desc.depth_stencil).map_err(creation)?;
            let native = MtlRenderPipelineDesc {
                label: name,
                vertex,
                fragment,
                vertex_layouts: &desc.vertex_layouts,
                color_formats: &desc.color_formats,
                depth_format: desc.depth_format,
                blend: desc.blend,
            };
            let driver = &mut self.driver;
            let pso = self
                .pso_cache
                .acquire(&key, || driver.new_render_pipeline(&native))
                .map_err(creation)?;
            (pso, Some(depth_state))
        };

        let handle = self.pipelines.insert(MtlPipeline {
            key,
            pso,
            is_compute: desc.is_compute(),
            topology: desc.topology,
            raster: desc.raster,
            depth_state,
        });
        self.log_lifetime("created", &handle, name);
        Ok(handle)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), ResourceError> {
        let entry = self
            .pipelines
            .remove(pipeline)
            .ok_or_else(|| ResourceError::invalid(pipeline))?;
        if let Some(pso) = self.pso_cache.release(&entry.key) {
            self.encoders.forget_pipeline(pso);
            self.driver.release(pso);
        }
        Ok(())
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferHandle, ResourceError> {
        let max = (self.caps.max_color_attachments as usize).min(MAX_COLOR_ATTACHMENTS);
        let textures = &self.textures;
        let (width, height) = validate::framebuffer_desc(desc, max, |t| {
            textures.get(t).map(|e| (e.desc.width, e.desc.height))
        })?;

        let mut colors = Vec::with_capacity(desc.color_attachments.len());
        for &handle in &desc.color_attachments {
            let entry = textures
                .get(handle)
                .ok_or_else(|| ResourceError::invalid(handle))?;
            if entry.desc.format.is_depth() {
                return Err(ResourceError::IncompleteFramebuffer(format!(
                    "{handle} has depth format {:?} but is attached as color",
                    entry.desc.format
                )));
            }
            colors.push(entry.object);
        }
        let depth = if desc.depth_attachment.id != 0 {
            let entry = textures
                .get(desc.depth_attachment)
                .ok_or_else(|| ResourceError::invalid(desc.depth_attachment))?;
            if !entry.desc.format.is_depth() {
                return Err(ResourceError::IncompleteFramebuffer(format!(
                    "{} is not a depth format",
                    desc.depth_attachment
                )));
            }
            Some(entry.object)
        } else {
            None
        };
        Ok(self.framebuffers.insert(MtlFramebuffer {
            colors,
            depth,
            width,
            height,
        }))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) -> Result<(), ResourceError> {
        self.framebuffers
            .remove(framebuffer)
            .map(|_| ())
            .ok_or_else(|| ResourceError::invalid(framebuffer))
    }

    fn create_query(&mut self, kind: QueryKind) -> Result<QueryHandle, ResourceError> {
        let counters = self
            .driver
            .new_counter_buffer(2)
            .map_err(ResourceError::Backend)?;
        Ok(self.queries.insert(MtlQuery { kind, counters }))
    }

    fn destroy_query(&mut self, query: QueryHandle) -> Result<(), ResourceError> {
        let entry = self
            .queries
            .remove(query)
            .ok_or_else(|| ResourceError::invalid(query))?;
        self.driver.release(entry.counters);
        Ok(())
    }

    fn query_result(&mut self, query: QueryHandle) -> Result<Option<u64>, ResourceError> {
        let entry = self
            .queries
            .get(query)
            .ok_or_else(|| ResourceError::invalid(query))?;
        let (kind, counters) = (entry.kind, entry.counters);
        Ok(match kind {
            QueryKind::Timestamp => self.driver.resolve_counter(counters, 0),
            QueryKind::TimeElapsed => {
                let start = self.driver.resolve_counter(counters, 0);
                let end = self.driver.resolve_counter(counters, 1);
                start.zip(end).map(|(s, e)| e.saturating_sub(s))
            }
        })
    }

    fn create_fence(&mut self) -> Result<FenceHandle, ResourceError> {
        let event = self
            .driver
            .new_shared_event()
            .map_err(ResourceError::Backend)?;
        Ok(self.fences.insert(MtlFence { event, target: 0 }))
    }

    fn destroy_fence(&mut self, fence: FenceHandle) -> Result<(), ResourceError> {
        let entry = self
            .fences
            .remove(fence)
            .ok_or_else(|| ResourceError::invalid(fence))?;
        self.driver.release(entry.event);
        Ok(())
    }

    fn wait_fence(&mut self, fence: FenceHandle, timeout_ns: u64) -> Result<FenceStatus, RenderError> {
        let entry = self
            .fences
            .get(fence)
            .ok_or_else(|| ResourceError::invalid(fence))?;
        if entry.target == 0 {
            return Err(RenderError::Submission(format!("{fence} was never signaled")));
        }
        let (event, target) = (entry.event, entry.target);
        self.flush_idle_work();
        if self.driver.wait_event(event, target, timeout_ns) {
            Ok(FenceStatus::Signaled)
        } else {
            Ok(FenceStatus::TimedOut)
        }
    }

    fn immediate(&mut self) -> Box<dyn CmdList + '_> {
        Box::new(MetalCmdList::new(self))
    }

    fn present(&mut self) -> Result<(), RenderError> {
        let state = self.tracker.state();
        if state != CmdListState::Idle {
            return Err(CommandError::InvalidState { op: "present", state }.into());
        }
        let cb = match self.command_buffer.take() {
            Some(cb) => cb,
            None => self
                .driver
                .new_command_buffer()
                .map_err(RenderError::Submission)?,
        };
        self.frame_serial += 1;
        self.driver
            .encode_signal_event(cb, self.frame_event, self.frame_serial);
        self.driver.commit(cb, true);
        let slices = self.slice_serials.len();
        self.slice_serials[self.frame_index as usize % slices] = self.frame_serial;

        self.frame_index = self.frame_index.wrapping_add(1);
        let pending = self.slice_serials[self.frame_index as usize % slices];
        if pending != 0 && !self.driver.wait_event(self.frame_event, pending, TIMEOUT_INFINITE) {
            return Err(RenderError::Submission(format!(
                "GPU never completed frame {pending}"
            )));
        }
        self.uniforms.reset(self.frame_index);
        Ok(())
    }
}

impl Drop for MetalDevice {
    fn drop(&mut self) {
        let driver = &mut self.driver;
        if let Some(cb) = self.command_buffer.take() {
            self.encoders.close_all(driver.as_mut());
            driver.commit(cb, false);
        }
        for pso in self.pso_cache.drain() {
            driver.release(pso);
        }
        for (_, object) in self.depth_states.drain() {
            driver.release(object);
        }
        self.pipelines.drain_with(|_, _| {});
        self.framebuffers.drain_with(|_, _| {});
        self.shaders.drain_with(|_, s| {
            driver.release(s.function);
            driver.release(s.library);
        });
        self.textures.drain_with(|_, t| driver.release(t.object));
        self.samplers.drain_with(|_, s| driver.release(s));
        self.buffers.drain_with(|_, b| driver.release(b.object));
        self.queries.drain_with(|_, q| driver.release(q.counters));
        self.fences.drain_with(|_, f| driver.release(f.event));
        driver.release(self.frame_event);
        driver.release(self.uniform_ring);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::metal::HeadlessMetal;
    use prism_core::rhi::{BlendMode, BlendState, Format, TextureUsage};

    const SOURCE: &str = "vertex float4 vs_main() {} fragment float4 fs_main() {} kernel void cs_main() {}";

    fn device() -> MetalDevice {
        MetalDevice::new(Box::new(HeadlessMetal::new()), &RhiConfig::default()).unwrap()
    }

    fn msl(dev: &mut MetalDevice, stage: ShaderStage, entry: &str) -> Result<ShaderHandle, ResourceError> {
        dev.create_shader(&ShaderDesc {
            label: Some(entry.into()),
            stage,
            code: ShaderCode::Msl(SOURCE.into()),
            entry_point: entry.into(),
        })
    }

    #[test]
    fn only_msl_is_accepted() {
        let mut dev = device();
        let err = dev
            .create_shader(&ShaderDesc {
                label: None,
                stage: ShaderStage::Vertex,
                code: ShaderCode::Glsl("void main() {}".into()),
                entry_point: "main".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ResourceError::Compilation { .. }));
        assert!(msl(&mut dev, ShaderStage::Vertex, "vs_main").is_ok());
        assert!(msl(&mut dev, ShaderStage::Vertex, "missing_main").is_err());
    }

    #[test]
    fn equivalent_pipelines_share_one_pso() {
        let mut dev = device();
        let vs = msl(&mut dev, ShaderStage::Vertex, "vs_main").unwrap();
        let fs = msl(&mut dev, ShaderStage::Fragment, "fs_main").unwrap();
        let mut desc = PipelineDesc::graphics(vs, fs);
        let a = dev.create_pipeline(&desc).unwrap();
        desc.label = Some("same state, other name".into());
        desc.blend = BlendState {
            enabled: false,
            ..BlendMode::Alpha.blend_state()
        };
        let b = dev.create_pipeline(&desc).unwrap();
        assert_ne!(a, b);
        assert_eq!(dev.pipeline_state_count(), 1);
        assert_eq!(dev.pipeline_cache_stats(), (1, 1));

        desc.blend = BlendMode::Alpha.blend_state();
        dev.create_pipeline(&desc).unwrap();
        assert_eq!(dev.pipeline_state_count(), 2);

        dev.destroy_pipeline(a).unwrap();
        assert_eq!(dev.pipeline_state_count(), 2, "b still uses the PSO");
        dev.destroy_pipeline(b).unwrap();
        assert_eq!(dev.pipeline_state_count(), 1);
    }

    #[test]
    fn depth_texture_cannot_be_a_color_target() {
        let mut dev = device();
        let depth = dev
            .create_texture(&TextureDesc::d2(32, 32, Format::Depth32Float, TextureUsage::DEPTH_STENCIL))
            .unwrap();
        let err = dev
            .create_framebuffer(&FramebufferDesc {
                label: None,
                color_attachments: vec![depth],
                depth_attachment: TextureHandle::NONE,
            })
            .unwrap_err();
        assert!(matches!(err, ResourceError::IncompleteFramebuffer(_)));
    }

    #[test]
    fn present_cycles_the_uniform_slices() {
        let mut dev = device();
        for frame in 1..=4u32 {
            dev.present().unwrap();
            assert_eq!(dev.uniforms.current_frame(), frame % 3);
        }
        assert_eq!(dev.frame_serial, 4);
    }

    #[test]
    fn unsignaled_fence_cannot_be_waited() {
        let mut dev = device();
        let fence = dev.create_fence().unwrap();
        assert!(matches!(dev.wait_fence(fence, 0), Err(RenderError::Submission(_))));
    }
}
