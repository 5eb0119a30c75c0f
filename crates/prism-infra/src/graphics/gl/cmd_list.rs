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

use super::api::{GlApi, GlName};
use super::device::{GlDevice, GlPipeline};
use prism_core::rhi::{
    BlendState, BufferBarrier, BufferHandle, CmdList, CmdListState, CommandError,
    DepthBiasState, DepthStencilState, FenceHandle, IndexFormat, LoadOp, PipelineHandle,
    PrimitiveTopology, QueryHandle, QueryKind, RasterState, RenderPassDesc, ResourceError,
    ResourceState, SamplerHandle, ScissorRect, TextureBarrier, TextureHandle, Viewport,
};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq)]
struct IndexBinding {
    buffer: GlName,
    offset: u64,
    format: IndexFormat,
}

/// Mirror of the GL state last issued through a command list.
///
/// Lives on the device so it survives between `immediate()` calls, and is
/// wiped at every `begin()` since other code may have touched the context.
#[derive(Debug, Default)]
pub(super) struct GlStateCache {
    framebuffer: Option<GlName>,
    program: Option<GlName>,
    vao: Option<GlName>,
    blend: Option<BlendState>,
    raster: Option<RasterState>,
    depth_stencil: Option<DepthStencilState>,
    depth_bias: Option<DepthBiasState>,
    viewport: Option<Viewport>,
    scissor: Option<Option<ScissorRect>>,
    topology: PrimitiveTopology,
    strides: Vec<u32>,
    // Requested vertex buffers and what was actually issued to the VAO.
    vertex_requests: BTreeMap<u32, (GlName, u64)>,
    vertex_issued: HashMap<u32, (GlName, u64, u32)>,
    index: Option<IndexBinding>,
    index_issued: Option<GlName>,
    uniform_ranges: HashMap<u32, (GlName, u64, u64)>,
    textures: HashMap<u32, (GlName, GlName)>,
}

/// Stores `value` in `slot`, returning `true` if it changed.
fn update<T: PartialEq>(slot: &mut Option<T>, value: T) -> bool {
    if slot.as_ref() == Some(&value) {
        return false;
    }
    *slot = Some(value);
    true
}

impl GlStateCache {
    pub(super) fn forget_program(&mut self, program: GlName, vao: Option<GlName>) {
        if self.program == Some(program) {
            self.program = None;
        }
        if vao.is_some() && self.vao == vao {
            self.vao = None;
            self.vertex_issued.clear();
            self.index_issued = None;
        }
    }

    pub(super) fn forget_framebuffer(&mut self, framebuffer: GlName) {
        if self.framebuffer == Some(framebuffer) {
            self.framebuffer = None;
        }
    }

    fn bind_pipeline(&mut self, api: &mut dyn GlApi, pipeline: &GlPipeline, trace: bool) {
        if update(&mut self.program, pipeline.program) {
            if trace {
                log::trace!("GlCmdList: use_program({})", pipeline.program);
            }
            api.use_program(pipeline.program);
        }
        if pipeline.is_compute {
            return;
        }

        self.topology = pipeline.topology;
        self.strides.clone_from(&pipeline.strides);
        if let Some(vao) = pipeline.vao {
            if update(&mut self.vao, vao) {
                api.bind_vertex_array(vao);
                // Vertex and element bindings are VAO state.
                self.vertex_issued.clear();
                self.index_issued = None;
            }
        }
        self.flush_vertex_bindings(api);
        self.flush_index_binding(api);

        if update(&mut self.blend, pipeline.blend) {
            api.set_blend(&pipeline.blend);
        }
        if update(&mut self.raster, pipeline.raster) {
            api.set_raster(&pipeline.raster);
        }
        self.apply_depth_stencil(api, &pipeline.depth_stencil);
    }

    fn apply_depth_stencil(&mut self, api: &mut dyn GlApi, state: &DepthStencilState) {
        if update(&mut self.depth_stencil, *state) {
            api.set_depth_state(state);
        }
    }

    fn flush_vertex_bindings(&mut self, api: &mut dyn GlApi) {
        if self.vao.is_none() {
            return;
        }
        for (&slot, &(buffer, offset)) in &self.vertex_requests {
            let stride = self.strides.get(slot as usize).copied().unwrap_or(0);
            let binding = (buffer, offset, stride);
            if self.vertex_issued.get(&slot) != Some(&binding) {
                api.bind_vertex_buffer(slot, buffer, offset, stride);
                self.vertex_issued.insert(slot, binding);
            }
        }
    }

    fn flush_index_binding(&mut self, api: &mut dyn GlApi) {
        if self.vao.is_none() {
            return;
        }
        if let Some(index) = self.index {
            if update(&mut self.index_issued, index.buffer) {
                api.bind_index_buffer(index.buffer);
            }
        }
    }
}

/// The immediate command list of a [`GlDevice`].
///
/// GL executes commands as they are issued; recording only filters
/// redundant state changes and validates ordering.
pub struct GlCmdList<'a> {
    dev: &'a mut GlDevice,
}

impl<'a> GlCmdList<'a> {
    pub(super) fn new(dev: &'a mut GlDevice) -> Self {
        Self { dev }
    }

    fn trace(&self) -> bool {
        self.dev.config.debug.log_state_changes
    }

    fn buffer(&self, op: &'static str, handle: BufferHandle) -> Result<(GlName, u64), CommandError> {
        self.dev
            .buffers
            .get(handle)
            .map(|b| (b.name, b.size))
            .ok_or_else(|| CommandError::invalid(op, handle))
    }

    fn query(&self, op: &'static str, handle: QueryHandle, kind: QueryKind) -> Result<GlName, CommandError> {
        let query = self
            .dev
            .queries
            .get(handle)
            .ok_or_else(|| CommandError::invalid(op, handle))?;
        if query.kind != kind {
            return Err(CommandError::Backend {
                op,
                message: format!("{handle} is a {:?} query", query.kind),
            });
        }
        Ok(query.name)
    }
}

impl CmdList for GlCmdList<'_> {
    fn state(&self) -> CmdListState {
        self.dev.tracker.state()
    }

    fn begin(&mut self) -> Result<(), CommandError> {
        self.dev.tracker.begin()?;
        self.dev.state = GlStateCache::default();
        Ok(())
    }

    fn end(&mut self) -> Result<(), CommandError> {
        if self.dev.tracker.end()? {
            self.dev.api.memory_barrier();
        }
        Ok(())
    }

    fn begin_render(&mut self, desc: &RenderPassDesc) -> Result<(), CommandError> {
        const OP: &str = "begin_render";
        // Resolve before transitioning so a bad handle leaves the state intact.
        let target = if desc.framebuffer.id != 0 {
            let fb = self
                .dev
                .framebuffers
                .get(desc.framebuffer)
                .ok_or_else(|| CommandError::invalid(OP, desc.framebuffer))?;
            Some((fb.name, fb.width, fb.height))
        } else {
            None
        };
        if self.dev.tracker.begin_render()? {
            self.dev.api.memory_barrier();
        }

        let dev = &mut *self.dev;
        let name = target.map_or(0, |(name, _, _)| name);
        if update(&mut dev.state.framebuffer, name) {
            dev.api.bind_framebuffer(name);
        }
        if let Some((_, width, height)) = target {
            let viewport = Viewport::new(width as f32, height as f32);
            if update(&mut dev.state.viewport, viewport) {
                dev.api.set_viewport(&viewport);
            }
        }

        let colors: Vec<Option<[f32; 4]>> = desc
            .color_attachments
            .iter()
            .map(|a| (a.load == LoadOp::Clear).then_some(a.clear_color))
            .collect();
        let depth = desc
            .depth_attachment
            .filter(|d| d.load == LoadOp::Clear);
        if colors.iter().any(Option::is_some) || depth.is_some() {
            dev.api.clear(
                &colors,
                depth.map(|d| d.clear_depth),
                depth.map(|d| d.clear_stencil),
            );
            // Clearing forces the depth mask on and the scissor test off.
            dev.state.depth_stencil = None;
            dev.state.scissor = None;
        }
        Ok(())
    }

    fn end_render(&mut self) -> Result<(), CommandError> {
        self.dev.tracker.end_render()
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), CommandError> {
        const OP: &str = "set_pipeline";
        let trace = self.trace();
        let dev = &mut *self.dev;
        let entry = dev
            .pipelines
            .get(pipeline)
            .ok_or_else(|| CommandError::invalid(OP, pipeline))?;
        if dev.tracker.bind_pipeline(pipeline, entry.is_compute)? && trace {
            log::trace!("GlCmdList: compute work opened by {pipeline}");
        }
        dev.state.bind_pipeline(dev.api.as_mut(), entry, trace);
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<(), CommandError> {
        self.dev.tracker.require_recording("set_viewport")?;
        if update(&mut self.dev.state.viewport, viewport) {
            self.dev.api.set_viewport(&viewport);
        }
        Ok(())
    }

    fn set_scissor(&mut self, rect: Option<ScissorRect>) -> Result<(), CommandError> {
        self.dev.tracker.require_recording("set_scissor")?;
        if update(&mut self.dev.state.scissor, rect) {
            self.dev.api.set_scissor(rect.as_ref());
        }
        Ok(())
    }

    fn set_depth_stencil_state(&mut self, state: &DepthStencilState) -> Result<(), CommandError> {
        self.dev.tracker.require_recording("set_depth_stencil_state")?;
        let dev = &mut *self.dev;
        dev.state.apply_depth_stencil(dev.api.as_mut(), state);
        Ok(())
    }

    fn set_depth_bias(&mut self, bias: &DepthBiasState) -> Result<(), CommandError> {
        self.dev.tracker.require_recording("set_depth_bias")?;
        if update(&mut self.dev.state.depth_bias, *bias) {
            self.dev.api.set_depth_bias(bias);
        }
        Ok(())
    }

    fn set_vertex_buffer(
        &mut self,
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
    ) -> Result<(), CommandError> {
        const OP: &str = "set_vertex_buffer";
        self.dev.tracker.require_recording(OP)?;
        let (name, _) = self.buffer(OP, buffer)?;
        let dev = &mut *self.dev;
        dev.state.vertex_requests.insert(slot, (name, offset));
        dev.state.flush_vertex_bindings(dev.api.as_mut());
        Ok(())
    }

    fn set_index_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    ) -> Result<(), CommandError> {
        const OP: &str = "set_index_buffer";
        self.dev.tracker.require_recording(OP)?;
        let (name, _) = self.buffer(OP, buffer)?;
        let dev = &mut *self.dev;
        dev.state.index = Some(IndexBinding {
            buffer: name,
            offset,
            format,
        });
        dev.state.flush_index_binding(dev.api.as_mut());
        Ok(())
    }

    fn set_uniform_buffer(
        &mut self,
        binding: u32,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<(), CommandError> {
        const OP: &str = "set_uniform_buffer";
        self.dev.tracker.require_recording(OP)?;
        let (name, buffer_size) = self.buffer(OP, buffer)?;
        if offset.checked_add(size).map_or(true, |end| end > buffer_size) {
            return Err(CommandError::Backend {
                op: OP,
                message: ResourceError::OutOfBounds {
                    offset,
                    len: size,
                    size: buffer_size,
                }
                .to_string(),
            });
        }
        let range = (name, offset, size);
        let dev = &mut *self.dev;
        if dev.state.uniform_ranges.get(&binding) != Some(&range) {
            dev.api.bind_uniform_range(binding, name, offset, size);
            dev.state.uniform_ranges.insert(binding, range);
        }
        Ok(())
    }

    fn set_uniform_bytes(&mut self, binding: u32, data: &[u8]) -> Result<(), CommandError> {
        self.dev.tracker.require_recording("set_uniform_bytes")?;
        if data.is_empty() {
            return Ok(());
        }
        let dev = &mut *self.dev;
        let size = data.len() as u64;
        // Exhaustion is logged by the allocator; the previous binding stays.
        let Some(offset) = dev.uniforms.allocate(size, dev.config.uniform_alignment) else {
            return Ok(());
        };
        let ring = dev.uniform_ring;
        dev.api.buffer_sub_data(ring, offset, data);
        dev.api.bind_uniform_range(binding, ring, offset, size);
        dev.state.uniform_ranges.insert(binding, (ring, offset, size));
        Ok(())
    }

    fn set_texture(
        &mut self,
        binding: u32,
        texture: TextureHandle,
        sampler: SamplerHandle,
    ) -> Result<(), CommandError> {
        const OP: &str = "set_texture";
        self.dev.tracker.require_recording(OP)?;
        let dev = &mut *self.dev;
        let entry = dev
            .textures
            .get(texture)
            .ok_or_else(|| CommandError::invalid(OP, texture))?;
        let sampler_name = if sampler.id == 0 {
            0
        } else {
            *dev
                .samplers
                .get(sampler)
                .ok_or_else(|| CommandError::invalid(OP, sampler))?
        };
        let pair = (entry.name, sampler_name);
        if dev.state.textures.get(&binding) != Some(&pair) {
            dev.api
                .bind_texture(binding, entry.desc.kind, entry.name, sampler_name);
            dev.state.textures.insert(binding, pair);
        }
        Ok(())
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
    ) -> Result<(), CommandError> {
        self.dev.tracker.require_draw("draw")?;
        let topology = self.dev.state.topology;
        self.dev
            .api
            .draw_arrays(topology, first_vertex, vertex_count, instance_count);
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
    ) -> Result<(), CommandError> {
        const OP: &str = "draw_indexed";
        self.dev.tracker.require_draw(OP)?;
        let index = self.dev.state.index.ok_or(CommandError::MissingBinding {
            op: OP,
            what: "index buffer",
        })?;
        let byte_offset = index.offset + u64::from(first_index) * index.format.size();
        let topology = self.dev.state.topology;
        self.dev.api.draw_elements(
            topology,
            index_count,
            index.format,
            byte_offset,
            instance_count,
            base_vertex,
        );
        Ok(())
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), CommandError> {
        self.dev.tracker.require_dispatch("dispatch")?;
        self.dev.api.dispatch_compute(x, y, z);
        Ok(())
    }

    fn resource_barrier(
        &mut self,
        buffers: &[BufferBarrier],
        textures: &[TextureBarrier],
    ) -> Result<(), CommandError> {
        const OP: &str = "resource_barrier";
        self.dev.tracker.require_recording(OP)?;
        for b in buffers {
            self.buffer(OP, b.buffer)?;
        }
        for t in textures {
            if !self.dev.textures.contains(t.texture) {
                return Err(CommandError::invalid(OP, t.texture));
            }
        }
        // The driver tracks hazards itself except for shader writes.
        let shader_writes = buffers
            .iter()
            .map(|b| (b.before, b.after))
            .chain(textures.iter().map(|t| (t.before, t.after)))
            .any(|(before, after)| {
                before == ResourceState::UnorderedAccess || after == ResourceState::UnorderedAccess
            });
        if shader_writes {
            self.dev.api.memory_barrier();
        }
        Ok(())
    }

    fn begin_query(&mut self, query: QueryHandle) -> Result<(), CommandError> {
        const OP: &str = "begin_query";
        self.dev.tracker.require_recording(OP)?;
        let name = self.query(OP, query, QueryKind::TimeElapsed)?;
        self.dev.api.begin_time_query(name);
        Ok(())
    }

    fn end_query(&mut self, query: QueryHandle) -> Result<(), CommandError> {
        const OP: &str = "end_query";
        self.dev.tracker.require_recording(OP)?;
        self.query(OP, query, QueryKind::TimeElapsed)?;
        self.dev.api.end_time_query();
        Ok(())
    }

    fn write_timestamp(&mut self, query: QueryHandle) -> Result<(), CommandError> {
        const OP: &str = "write_timestamp";
        self.dev.tracker.require_recording(OP)?;
        let name = self.query(OP, query, QueryKind::Timestamp)?;
        self.dev.api.timestamp(name);
        Ok(())
    }

    fn signal_fence(&mut self, fence: FenceHandle) -> Result<(), CommandError> {
        const OP: &str = "signal_fence";
        self.dev.tracker.require_recording(OP)?;
        let dev = &mut *self.dev;
        let entry = dev
            .fences
            .get_mut(fence)
            .ok_or_else(|| CommandError::invalid(OP, fence))?;
        let sync = dev
            .api
            .fence_sync()
            .map_err(|message| CommandError::Backend { op: OP, message })?;
        if let Some(previous) = entry.sync.replace(sync) {
            dev.api.delete_sync(previous);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::gl::HeadlessGl;
    use crate::graphics::CallLog;
    use prism_core::config::RhiConfig;
    use prism_core::rhi::{
        BufferDesc, BufferUsage, Device, PipelineDesc, ShaderCode, ShaderDesc, ShaderStage,
    };

    fn setup() -> (GlDevice, CallLog, PipelineHandle) {
        let gl = HeadlessGl::new();
        let log = gl.call_log();
        let mut dev = GlDevice::new(Box::new(gl), &RhiConfig::default()).unwrap();
        let mut shader = |stage| {
            dev.create_shader(&ShaderDesc {
                label: None,
                stage,
                code: ShaderCode::Glsl("void main() {}".into()),
                entry_point: "main".into(),
            })
            .unwrap()
        };
        let vs = shader(ShaderStage::Vertex);
        let fs = shader(ShaderStage::Fragment);
        let pipeline = dev.create_pipeline(&PipelineDesc::graphics(vs, fs)).unwrap();
        (dev, log, pipeline)
    }

    #[test]
    fn draw_indexed_without_index_buffer_fails() {
        let (mut dev, _, pipeline) = setup();
        let mut cmd = dev.immediate();
        cmd.begin().unwrap();
        cmd.begin_render(&RenderPassDesc::to_default_target([0.0; 4]))
            .unwrap();
        cmd.set_pipeline(pipeline).unwrap();
        assert!(matches!(
            cmd.draw_indexed(3, 1, 0, 0),
            Err(CommandError::MissingBinding { .. })
        ));
    }

    #[test]
    fn vertex_buffers_are_rebound_after_vao_change() {
        let (mut dev, log, pipeline) = setup();
        let buffer = dev
            .create_buffer(&BufferDesc {
                label: None,
                size: 64,
                usage: BufferUsage::VERTEX,
                host_visible: true,
            })
            .unwrap();
        let mut cmd = dev.immediate();
        cmd.begin().unwrap();
        cmd.begin_render(&RenderPassDesc::to_default_target([0.0; 4]))
            .unwrap();
        // Requested before any VAO is bound; issued once the pipeline lands.
        cmd.set_vertex_buffer(0, buffer, 0).unwrap();
        assert_eq!(log.count("bind_vertex_buffer"), 0);
        cmd.set_pipeline(pipeline).unwrap();
        assert_eq!(log.count("bind_vertex_buffer"), 1);
        cmd.set_vertex_buffer(0, buffer, 0).unwrap();
        assert_eq!(log.count("bind_vertex_buffer"), 1);
    }

    #[test]
    fn uniform_bytes_stream_through_the_ring() {
        let (mut dev, log, _) = setup();
        let mut cmd = dev.immediate();
        cmd.begin().unwrap();
        cmd.set_uniform_bytes(0, &[1, 2, 3, 4]).unwrap();
        cmd.set_uniform_bytes(0, &[5, 6, 7, 8]).unwrap();
        assert_eq!(log.count("bind_uniform_range"), 2);
        drop(cmd);
        assert_eq!(dev.uniforms.used(), 256 + 4);
    }

    #[test]
    fn present_while_recording_is_rejected() {
        let (mut dev, _, _) = setup();
        dev.immediate().begin().unwrap();
        assert!(dev.present().is_err());
        dev.immediate().end().unwrap();
        assert!(dev.present().is_ok());
    }
}
