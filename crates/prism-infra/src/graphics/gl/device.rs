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

use super::api::{GlApi, GlAttachment, GlName, GlSyncStatus};
use super::cmd_list::{GlCmdList, GlStateCache};
use prism_core::config::RhiConfig;
use prism_core::rhi::validate::{self, label};
use prism_core::rhi::{
    BlendState, BufferDesc, BufferHandle, BufferUsage, Caps, CmdList, CmdListState, CommandError,
    CommandTracker, DepthStencilState, Device, FenceHandle, FenceStatus, FramebufferDesc,
    FramebufferHandle, GraphicsBackendType, PipelineDesc, PipelineHandle, PrimitiveTopology,
    QueryHandle, QueryKind, RasterState, RenderError, ResourceError, ResourceTable, SamplerDesc,
    SamplerHandle, ShaderDesc, ShaderHandle, ShaderStage, TextureDesc, TextureHandle,
    UniformAllocator, MAX_COLOR_ATTACHMENTS,
};

#[derive(Debug)]
pub(super) struct GlBuffer {
    pub name: GlName,
    pub size: u64,
}

#[derive(Debug)]
pub(super) struct GlTexture {
    pub name: GlName,
    pub desc: TextureDesc,
}

#[derive(Debug)]
pub(super) struct GlShader {
    name: GlName,
    stage: ShaderStage,
}

/// A linked program plus the fixed-function state applied when it is bound.
#[derive(Debug)]
pub(super) struct GlPipeline {
    pub program: GlName,
    pub vao: Option<GlName>,
    pub is_compute: bool,
    pub topology: PrimitiveTopology,
    pub raster: RasterState,
    pub depth_stencil: DepthStencilState,
    pub blend: BlendState,
    pub strides: Vec<u32>,
}

#[derive(Debug)]
pub(super) struct GlFramebuffer {
    pub name: GlName,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
pub(super) struct GlQuery {
    pub name: GlName,
    pub kind: QueryKind,
}

/// `None` until a command list signals the fence.
#[derive(Debug, Default)]
pub(super) struct GlFence {
    pub sync: Option<GlName>,
}

/// An OpenGL device.
///
/// Owns every GL object it creates; dropping the device deletes them. The
/// context itself is provided by the [`GlApi`] implementation and must be
/// current on the calling thread.
#[derive(Debug)]
pub struct GlDevice {
    pub(super) api: Box<dyn GlApi>,
    caps: Caps,
    pub(super) config: RhiConfig,
    pub(super) buffers: ResourceTable<BufferHandle, GlBuffer>,
    pub(super) textures: ResourceTable<TextureHandle, GlTexture>,
    pub(super) samplers: ResourceTable<SamplerHandle, GlName>,
    shaders: ResourceTable<ShaderHandle, GlShader>,
    pub(super) pipelines: ResourceTable<PipelineHandle, GlPipeline>,
    pub(super) framebuffers: ResourceTable<FramebufferHandle, GlFramebuffer>,
    pub(super) queries: ResourceTable<QueryHandle, GlQuery>,
    pub(super) fences: ResourceTable<FenceHandle, GlFence>,
    pub(super) tracker: CommandTracker,
    pub(super) state: GlStateCache,
    pub(super) uniforms: UniformAllocator,
    pub(super) uniform_ring: GlName,
    frame_index: u32,
}

impl GlDevice {
    /// Wraps a GL context and allocates the per-draw uniform ring.
    ///
    /// ## Errors
    /// * `RenderError::InitializationFailed` - If the configuration is invalid
    ///   or the ring buffer cannot be allocated.
    pub fn new(mut api: Box<dyn GlApi>, config: &RhiConfig) -> Result<Self, RenderError> {
        config
            .validate()
            .map_err(|e| RenderError::InitializationFailed(e.to_string()))?;
        let caps = api.caps();
        let uniforms = UniformAllocator::from_config(config);
        let uniform_ring = api
            .create_buffer(uniforms.total_size(), BufferUsage::UNIFORM, true)
            .map_err(|log| {
                RenderError::InitializationFailed(format!("uniform ring allocation: {log}"))
            })?;
        log::info!(
            "GlDevice: initialized ({} KiB uniform ring, {} frames)",
            uniforms.total_size() / 1024,
            uniforms.frames_in_flight()
        );
        Ok(Self {
            api,
            caps,
            config: config.clone(),
            buffers: ResourceTable::new(),
            textures: ResourceTable::new(),
            samplers: ResourceTable::new(),
            shaders: ResourceTable::new(),
            pipelines: ResourceTable::new(),
            framebuffers: ResourceTable::new(),
            queries: ResourceTable::new(),
            fences: ResourceTable::new(),
            tracker: CommandTracker::new(),
            state: GlStateCache::default(),
            uniforms,
            uniform_ring,
            frame_index: 0,
        })
    }

    /// The configuration the device was created with.
    pub fn config(&self) -> &RhiConfig {
        &self.config
    }

    fn log_lifetime(&self, action: &str, what: &dyn std::fmt::Display, name: &str) {
        if self.config.debug.log_resource_lifetimes {
            log::debug!("GlDevice: {action} {what} '{name}'");
        }
    }

    fn resolve_shader(
        &self,
        handle: ShaderHandle,
        expected: ShaderStage,
    ) -> Result<GlName, ResourceError> {
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
        Ok(shader.name)
    }
}

impl Device for GlDevice {
    fn backend(&self) -> GraphicsBackendType {
        GraphicsBackendType::OpenGL
    }

    fn caps(&self) -> &Caps {
        &self.caps
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, ResourceError> {
        validate::buffer_desc(desc)?;
        let name = self
            .api
            .create_buffer(desc.size, desc.usage, desc.host_visible)
            .map_err(ResourceError::Backend)?;
        let handle = self.buffers.insert(GlBuffer {
            name,
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
        self.api.delete_buffer(entry.name);
        self.log_lifetime("destroyed", &buffer, "");
        Ok(())
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        let entry = self
            .buffers
            .get(buffer)
            .ok_or_else(|| ResourceError::invalid(buffer))?;
        validate::range(offset, data.len() as u64, entry.size)?;
        let name = entry.name;
        self.api.buffer_sub_data(name, offset, data);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, ResourceError> {
        validate::texture_desc(desc)?;
        let name = self
            .api
            .create_texture(desc)
            .map_err(ResourceError::Backend)?;
        let handle = self.textures.insert(GlTexture {
            name,
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
        self.api.delete_texture(entry.name);
        self.log_lifetime("destroyed", &texture, label(&entry.desc.label));
        Ok(())
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        mip_level: u32,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        let entry = self
            .textures
            .get(texture)
            .ok_or_else(|| ResourceError::invalid(texture))?;
        validate::texture_upload(&entry.desc, mip_level, data.len())?;
        self.api
            .texture_sub_image(entry.name, &entry.desc, mip_level, data);
        Ok(())
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerHandle, ResourceError> {
        validate::sampler_desc(desc)?;
        let anisotropy = if self.caps.anisotropic_filtering {
            f32::from(desc.max_anisotropy.max(1)).min(self.caps.max_anisotropy)
        } else {
            1.0
        };
        let name = self
            .api
            .create_sampler(desc, anisotropy)
            .map_err(ResourceError::Backend)?;
        Ok(self.samplers.insert(name))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) -> Result<(), ResourceError> {
        let name = self
            .samplers
            .remove(sampler)
            .ok_or_else(|| ResourceError::invalid(sampler))?;
        self.api.delete_sampler(name);
        Ok(())
    }

    fn create_shader(&mut self, desc: &ShaderDesc) -> Result<ShaderHandle, ResourceError> {
        let name = self
            .api
            .compile_shader(desc.stage, &desc.code, &desc.entry_point)
            .map_err(|log| {
                log::error!(
                    "GlDevice: {:?} shader '{}' failed to compile:\n{}",
                    desc.stage,
                    label(&desc.label),
                    log
                );
                ResourceError::Compilation {
                    label: label(&desc.label).to_string(),
                    log,
                }
            })?;
        let handle = self.shaders.insert(GlShader {
            name,
            stage: desc.stage,
        });
        self.log_lifetime("compiled", &handle, label(&desc.label));
        Ok(handle)
    }

    fn destroy_shader(&mut self, shader: ShaderHandle) -> Result<(), ResourceError> {
        let entry = self
            .shaders
            .remove(shader)
            .ok_or_else(|| ResourceError::invalid(shader))?;
        self.api.delete_shader(entry.name);
        Ok(())
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineHandle, ResourceError> {
        validate::pipeline_desc(desc)?;
        let name = label(&desc.label);
        let stages = if desc.is_compute() {
            vec![self.resolve_shader(desc.compute_shader, ShaderStage::Compute)?]
        } else {
            vec![
                self.resolve_shader(desc.vertex_shader, ShaderStage::Vertex)?,
                self.resolve_shader(desc.fragment_shader, ShaderStage::Fragment)?,
            ]
        };
        let program = self.api.link_program(&stages).map_err(|log| {
            log::error!("GlDevice: program '{name}' failed to link:\n{log}");
            ResourceError::PipelineCreation {
                label: name.to_string(),
                log,
            }
        })?;

        let vao = if desc.is_compute() {
            None
        } else {
            match self.api.create_vertex_array(&desc.vertex_layouts) {
                Ok(vao) => Some(vao),
                Err(log) => {
                    self.api.delete_program(program);
                    return Err(ResourceError::PipelineCreation {
                        label: name.to_string(),
                        log,
                    });
                }
            }
        };

        let handle = self.pipelines.insert(GlPipeline {
            program,
            vao,
            is_compute: desc.is_compute(),
            topology: desc.topology,
            raster: desc.raster,
            depth_stencil: desc.depth_stencil,
            blend: desc.blend,
            strides: desc.vertex_layouts.iter().map(|l| l.stride).collect(),
        });
        self.log_lifetime("linked", &handle, name);
        Ok(handle)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), ResourceError> {
        let entry = self
            .pipelines
            .remove(pipeline)
            .ok_or_else(|| ResourceError::invalid(pipeline))?;
        if let Some(vao) = entry.vao {
            self.api.delete_vertex_array(vao);
        }
        self.api.delete_program(entry.program);
        self.state.forget_program(entry.program, entry.vao);
        Ok(())
    }

    fn create_framebuffer(
        &mut self,
        desc: &FramebufferDesc,
    ) -> Result<FramebufferHandle, ResourceError> {
        let max = (self.caps.max_color_attachments as usize).min(MAX_COLOR_ATTACHMENTS);
        let textures = &self.textures;
        let (width, height) = validate::framebuffer_desc(desc, max, |t| {
            textures.get(t).map(|e| (e.desc.width, e.desc.height))
        })?;

        let attachment = |handle: TextureHandle| -> Result<GlAttachment, ResourceError> {
            let entry = textures
                .get(handle)
                .ok_or_else(|| ResourceError::invalid(handle))?;
            Ok(GlAttachment {
                texture: entry.name,
                kind: entry.desc.kind,
                format: entry.desc.format,
            })
        };
        let colors = desc
            .color_attachments
            .iter()
            .map(|&t| attachment(t))
            .collect::<Result<Vec<_>, _>>()?;
        let depth = if desc.depth_attachment.id != 0 {
            Some(attachment(desc.depth_attachment)?)
        } else {
            None
        };

        let name = self
            .api
            .create_framebuffer(&colors, depth)
            .map_err(ResourceError::Backend)?;
        if let Err(status) = self.api.framebuffer_complete(name) {
            self.api.delete_framebuffer(name);
            log::error!(
                "GlDevice: framebuffer '{}' is incomplete: {status}",
                label(&desc.label)
            );
            return Err(ResourceError::IncompleteFramebuffer(status));
        }
        Ok(self.framebuffers.insert(GlFramebuffer {
            name,
            width,
            height,
        }))
    }

    fn destroy_framebuffer(
        &mut self,
        framebuffer: FramebufferHandle,
    ) -> Result<(), ResourceError> {
        let entry = self
            .framebuffers
            .remove(framebuffer)
            .ok_or_else(|| ResourceError::invalid(framebuffer))?;
        self.api.delete_framebuffer(entry.name);
        self.state.forget_framebuffer(entry.name);
        Ok(())
    }

    fn create_query(&mut self, kind: QueryKind) -> Result<QueryHandle, ResourceError> {
        let name = self.api.create_query().map_err(ResourceError::Backend)?;
        Ok(self.queries.insert(GlQuery { name, kind }))
    }

    fn destroy_query(&mut self, query: QueryHandle) -> Result<(), ResourceError> {
        let entry = self
            .queries
            .remove(query)
            .ok_or_else(|| ResourceError::invalid(query))?;
        self.api.delete_query(entry.name);
        Ok(())
    }

    fn query_result(&mut self, query: QueryHandle) -> Result<Option<u64>, ResourceError> {
        let name = self
            .queries
            .get(query)
            .ok_or_else(|| ResourceError::invalid(query))?
            .name;
        Ok(self.api.query_result(name))
    }

    fn create_fence(&mut self) -> Result<FenceHandle, ResourceError> {
        Ok(self.fences.insert(GlFence::default()))
    }

    fn destroy_fence(&mut self, fence: FenceHandle) -> Result<(), ResourceError> {
        let entry = self
            .fences
            .remove(fence)
            .ok_or_else(|| ResourceError::invalid(fence))?;
        if let Some(sync) = entry.sync {
            self.api.delete_sync(sync);
        }
        Ok(())
    }

    fn wait_fence(
        &mut self,
        fence: FenceHandle,
        timeout_ns: u64,
    ) -> Result<FenceStatus, RenderError> {
        let entry = self
            .fences
            .get(fence)
            .ok_or_else(|| ResourceError::invalid(fence))?;
        let sync = entry
            .sync
            .ok_or_else(|| RenderError::Submission(format!("{fence} was never signaled")))?;
        match self.api.client_wait_sync(sync, timeout_ns) {
            GlSyncStatus::Signaled => Ok(FenceStatus::Signaled),
            GlSyncStatus::TimedOut => Ok(FenceStatus::TimedOut),
            GlSyncStatus::Failed => Err(RenderError::Submission(format!(
                "glClientWaitSync failed on {fence}"
            ))),
        }
    }

    fn immediate(&mut self) -> Box<dyn CmdList + '_> {
        Box::new(GlCmdList::new(self))
    }

    fn present(&mut self) -> Result<(), RenderError> {
        let state = self.tracker.state();
        if state != CmdListState::Idle {
            return Err(CommandError::InvalidState {
                op: "present",
                state,
            }
            .into());
        }
        self.api.flush();
        self.frame_index = self.frame_index.wrapping_add(1);
        self.uniforms.reset(self.frame_index);
        Ok(())
    }
}

impl Drop for GlDevice {
    fn drop(&mut self) {
        let api = &mut self.api;
        self.pipelines.drain_with(|_, p| {
            if let Some(vao) = p.vao {
                api.delete_vertex_array(vao);
            }
            api.delete_program(p.program);
        });
        self.shaders.drain_with(|_, s| api.delete_shader(s.name));
        self.framebuffers.drain_with(|_, f| api.delete_framebuffer(f.name));
        self.textures.drain_with(|_, t| api.delete_texture(t.name));
        self.samplers.drain_with(|_, s| api.delete_sampler(s));
        self.buffers.drain_with(|_, b| api.delete_buffer(b.name));
        self.queries.drain_with(|_, q| api.delete_query(q.name));
        self.fences.drain_with(|_, f| {
            if let Some(sync) = f.sync {
                api.delete_sync(sync);
            }
        });
        api.delete_buffer(self.uniform_ring);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::gl::HeadlessGl;
    use prism_core::rhi::{Format, ShaderCode, TextureUsage};

    fn device() -> GlDevice {
        GlDevice::new(Box::new(HeadlessGl::new()), &RhiConfig::default()).unwrap()
    }

    fn glsl(stage: ShaderStage, source: &str) -> ShaderDesc {
        ShaderDesc {
            label: Some(format!("{stage:?}")),
            stage,
            code: ShaderCode::Glsl(source.into()),
            entry_point: "main".into(),
        }
    }

    #[test]
    fn write_buffer_is_bounds_checked() {
        let mut dev = device();
        let buf = dev
            .create_buffer(&BufferDesc {
                label: None,
                size: 16,
                usage: BufferUsage::UNIFORM,
                host_visible: true,
            })
            .unwrap();
        assert!(dev.write_buffer(buf, 8, &[0; 8]).is_ok());
        assert!(matches!(
            dev.write_buffer(buf, 9, &[0; 8]),
            Err(ResourceError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn stale_handles_fail_to_resolve() {
        let mut dev = device();
        let desc = TextureDesc::d2(4, 4, Format::Rgba8Unorm, TextureUsage::SAMPLED);
        let first = dev.create_texture(&desc).unwrap();
        dev.destroy_texture(first).unwrap();
        let second = dev.create_texture(&desc).unwrap();
        assert_ne!(first, second);
        assert!(dev.destroy_texture(first).is_err());
    }

    #[test]
    fn compile_failure_reports_the_log() {
        let mut dev = device();
        let err = dev
            .create_shader(&glsl(ShaderStage::Vertex, "#error broken"))
            .unwrap_err();
        assert!(matches!(err, ResourceError::Compilation { .. }));
    }

    #[test]
    fn pipeline_stage_mismatch_is_rejected() {
        let mut dev = device();
        let vs = dev.create_shader(&glsl(ShaderStage::Vertex, "void main(){}")).unwrap();
        let err = dev
            .create_pipeline(&PipelineDesc::graphics(vs, vs))
            .unwrap_err();
        assert!(matches!(err, ResourceError::InvalidDescriptor(_)));
    }

    #[test]
    fn depth_only_framebuffer_is_complete() {
        let mut dev = device();
        let depth = dev
            .create_texture(&TextureDesc::d2(
                64,
                64,
                Format::Depth32Float,
                TextureUsage::DEPTH_STENCIL,
            ))
            .unwrap();
        let fb = dev.create_framebuffer(&FramebufferDesc {
            label: None,
            color_attachments: Vec::new(),
            depth_attachment: depth,
        });
        assert!(fb.is_ok());
    }

    #[test]
    fn unsignaled_fence_cannot_be_waited() {
        let mut dev = device();
        let fence = dev.create_fence().unwrap();
        assert!(matches!(
            dev.wait_fence(fence, 0),
            Err(RenderError::Submission(_))
        ));
    }
}
