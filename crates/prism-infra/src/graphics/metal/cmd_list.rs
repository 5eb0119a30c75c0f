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

use super::device::MetalDevice;
use super::driver::{EncoderCommand, MetalDriver, MtlObject, MtlRenderPass};
use prism_core::rhi::{
    BufferBarrier, BufferHandle, CmdList, CmdListState, CommandError, DepthBiasState,
    DepthStencilState, FenceHandle, IndexFormat, PipelineHandle, PrimitiveTopology, QueryHandle,
    QueryKind, RasterState, RenderPassDesc, ResourceError, ResourceState, SamplerHandle,
    ScissorRect, ShaderStages, TextureBarrier, TextureHandle, Viewport,
};
use std::collections::{BTreeMap, HashMap};

/// First argument-table index used for vertex buffers; uniform bindings
/// must stay below it.
pub const VERTEX_BUFFER_BASE: u32 = 16;

/// What the open encoder has actually received. Every new encoder starts
/// from Metal's defaults.
#[derive(Debug, Default)]
struct Issued {
    pipeline: Option<MtlObject>,
    depth_state: Option<MtlObject>,
    raster: Option<RasterState>,
    depth_bias: DepthBiasState,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    buffers: HashMap<u32, (MtlObject, u64)>,
    textures: HashMap<u32, (MtlObject, Option<MtlObject>)>,
}

/// Encoder lifecycle and the requested binding state of the immediate list.
///
/// Bindings are requested eagerly and encoded at the next draw or dispatch,
/// filtered against what the open encoder already holds.
#[derive(Debug, Default)]
pub(super) struct MtlEncoderState {
    render: Option<MtlObject>,
    compute: Option<MtlObject>,
    pass: Option<MtlRenderPass>,
    extent: (u32, u32),
    issued: Issued,
    render_pipeline: Option<(MtlObject, PrimitiveTopology)>,
    compute_pipeline: Option<MtlObject>,
    depth_state: Option<MtlObject>,
    raster: RasterState,
    depth_bias: DepthBiasState,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    vertex_buffers: BTreeMap<u32, (MtlObject, u64)>,
    index: Option<(MtlObject, u64, IndexFormat)>,
    uniforms: BTreeMap<u32, (MtlObject, u64)>,
    textures: BTreeMap<u32, (MtlObject, Option<MtlObject>)>,
}

fn encode(driver: &mut dyn MetalDriver, encoder: MtlObject, command: EncoderCommand, trace: bool) {
    if trace {
        log::trace!("MetalCmdList: {:?}", command);
    }
    driver.encode(encoder, command);
}

impl MtlEncoderState {
    /// Ends every open encoder.
    pub(super) fn close_all(&mut self, driver: &mut dyn MetalDriver) {
        self.close_compute(driver);
        if let Some(encoder) = self.render.take() {
            driver.end_encoding(encoder);
        }
        self.pass = None;
    }

    /// Drops references to a released PSO.
    pub(super) fn forget_pipeline(&mut self, pso: MtlObject) {
        if self.render_pipeline.is_some_and(|(p, _)| p == pso) {
            self.render_pipeline = None;
        }
        if self.compute_pipeline == Some(pso) {
            self.compute_pipeline = None;
        }
        if self.issued.pipeline == Some(pso) {
            self.issued.pipeline = None;
        }
    }

    fn close_compute(&mut self, driver: &mut dyn MetalDriver) {
        if let Some(encoder) = self.compute.take() {
            driver.end_encoding(encoder);
        }
    }

    fn open_render(&mut self, driver: &mut dyn MetalDriver, command_buffer: MtlObject) -> Result<MtlObject, String> {
        if let Some(encoder) = self.render {
            return Ok(encoder);
        }
        let pass = self.pass.take().unwrap_or_default();
        let encoder = driver.new_render_encoder(command_buffer, &pass)?;
        self.render = Some(encoder);
        self.issued = Issued::default();
        Ok(encoder)
    }

    fn open_compute(&mut self, driver: &mut dyn MetalDriver, command_buffer: MtlObject) -> Result<MtlObject, String> {
        if let Some(encoder) = self.compute {
            return Ok(encoder);
        }
        let encoder = driver.new_compute_encoder(command_buffer)?;
        self.compute = Some(encoder);
        self.issued = Issued::default();
        Ok(encoder)
    }

    fn flush_render(&mut self, driver: &mut dyn MetalDriver, encoder: MtlObject, trace: bool) {
        if let Some((pso, _)) = self.render_pipeline {
            if self.issued.pipeline != Some(pso) {
                encode(driver, encoder, EncoderCommand::SetRenderPipeline(pso), trace);
                self.issued.pipeline = Some(pso);
            }
        }
        if let Some(state) = self.depth_state {
            if self.issued.depth_state != Some(state) {
                encode(driver, encoder, EncoderCommand::SetDepthStencilState(state), trace);
                self.issued.depth_state = Some(state);
            }
        }
        if self.issued.raster != Some(self.raster) {
            let r = self.raster;
            encode(
                driver,
                encoder,
                EncoderCommand::SetRaster {
                    cull_mode: r.cull_mode,
                    front_face: r.front_face,
                    wireframe: r.wireframe,
                },
                trace,
            );
            self.issued.raster = Some(r);
        }
        if self.issued.depth_bias != self.depth_bias {
            let b = self.depth_bias;
            encode(
                driver,
                encoder,
                EncoderCommand::SetDepthBias {
                    constant: b.constant,
                    slope_scale: b.slope_scale,
                    clamp: b.clamp,
                },
                trace,
            );
            self.issued.depth_bias = b;
        }
        if let Some(viewport) = self.viewport {
            if self.issued.viewport != Some(viewport) {
                encode(driver, encoder, EncoderCommand::SetViewport(viewport), trace);
                self.issued.viewport = Some(viewport);
            }
        }
        match (self.scissor, self.issued.scissor) {
            (Some(rect), issued) if issued != Some(rect) => {
                encode(driver, encoder, EncoderCommand::SetScissor(rect), trace);
                self.issued.scissor = Some(rect);
            }
            (None, Some(_)) => {
                let (width, height) = self.extent;
                let full = ScissorRect { x: 0, y: 0, width, height };
                encode(driver, encoder, EncoderCommand::SetScissor(full), trace);
                self.issued.scissor = None;
            }
            _ => {}
        }

        let vertex = self
            .vertex_buffers
            .iter()
            .map(|(&slot, &b)| (VERTEX_BUFFER_BASE + slot, ShaderStages::VERTEX, b));
        let uniforms = self
            .uniforms
            .iter()
            .map(|(&index, &b)| (index, ShaderStages::VERTEX | ShaderStages::FRAGMENT, b));
        for (index, stages, (buffer, offset)) in vertex.chain(uniforms) {
            if self.issued.buffers.get(&index) != Some(&(buffer, offset)) {
                encode(driver, encoder, EncoderCommand::SetBuffer { stages, index, buffer, offset }, trace);
                self.issued.buffers.insert(index, (buffer, offset));
            }
        }
        self.flush_textures(driver, encoder, ShaderStages::VERTEX | ShaderStages::FRAGMENT, trace);
    }

    fn flush_compute(&mut self, driver: &mut dyn MetalDriver, encoder: MtlObject, trace: bool) {
        if let Some(pso) = self.compute_pipeline {
            if self.issued.pipeline != Some(pso) {
                encode(driver, encoder, EncoderCommand::SetComputePipeline(pso), trace);
                self.issued.pipeline = Some(pso);
            }
        }
        for (&index, &(buffer, offset)) in &self.uniforms {
            if self.issued.buffers.get(&index) != Some(&(buffer, offset)) {
                let stages = ShaderStages::COMPUTE;
                encode(driver, encoder, EncoderCommand::SetBuffer { stages, index, buffer, offset }, trace);
                self.issued.buffers.insert(index, (buffer, offset));
            }
        }
        self.flush_textures(driver, encoder, ShaderStages::COMPUTE, trace);
    }

    fn flush_textures(&mut self, driver: &mut dyn MetalDriver, encoder: MtlObject, stages: ShaderStages, trace: bool) {
        for (&index, &(texture, sampler)) in &self.textures {
            if self.issued.textures.get(&index) != Some(&(texture, sampler)) {
                encode(driver, encoder, EncoderCommand::SetTexture { stages, index, texture, sampler }, trace);
                self.issued.textures.insert(index, (texture, sampler));
            }
        }
    }
}

/// The immediate command list of a [`MetalDevice`].
///
/// One command buffer collects everything recorded between `present`s.
/// Render encoders open at the first draw of a pass (or at `end_render` for
/// passes that only clear); compute encoders open at the first dispatch and
/// close when a pass begins or recording ends.
pub struct MetalCmdList<'a> {
    dev: &'a mut MetalDevice,
}

impl<'a> MetalCmdList<'a> {
    pub(super) fn new(dev: &'a mut MetalDevice) -> Self {
        Self { dev }
    }

    fn trace(&self) -> bool {
        self.dev.config.debug.log_state_changes
    }

    fn command_buffer(&self, op: &'static str) -> Result<MtlObject, CommandError> {
        self.dev.command_buffer.ok_or(CommandError::Backend {
            op,
            message: "no command buffer is open".into(),
        })
    }

    fn buffer(&self, op: &'static str, handle: BufferHandle) -> Result<(MtlObject, u64), CommandError> {
        self.dev
            .buffers
            .get(handle)
            .map(|b| (b.object, b.size))
            .ok_or_else(|| CommandError::invalid(op, handle))
    }

    fn check_uniform_binding(op: &'static str, binding: u32) -> Result<(), CommandError> {
        if binding >= VERTEX_BUFFER_BASE {
            return Err(CommandError::Backend {
                op,
                message: format!("uniform binding {binding} overlaps the vertex buffer range"),
            });
        }
        Ok(())
    }

    /// Command-buffer level work cannot happen while a render encoder is open.
    fn require_outside_pass(&mut self, op: &'static str) -> Result<MtlObject, CommandError> {
        match self.dev.tracker.state() {
            state @ (CmdListState::Idle | CmdListState::RenderPass) => {
                Err(CommandError::InvalidState { op, state })
            }
            _ => {
                let cb = self.command_buffer(op)?;
                let dev = &mut *self.dev;
                dev.encoders.close_compute(dev.driver.as_mut());
                Ok(cb)
            }
        }
    }

    fn sample(&mut self, op: &'static str, query: QueryHandle, kind: QueryKind, index: u32) -> Result<(), CommandError> {
        let cb = self.require_outside_pass(op)?;
        let entry = self
            .dev
            .queries
            .get(query)
            .ok_or_else(|| CommandError::invalid(op, query))?;
        if entry.kind != kind {
            return Err(CommandError::Backend {
                op,
                message: format!("{query} is a {:?} query", entry.kind),
            });
        }
        let counters = entry.counters;
        self.dev.driver.sample_counter(cb, counters, index);
        Ok(())
    }

    fn render_encoder(&mut self, op: &'static str) -> Result<MtlObject, CommandError> {
        let cb = self.command_buffer(op)?;
        let dev = &mut *self.dev;
        dev.encoders
            .open_render(dev.driver.as_mut(), cb)
            .map_err(|message| CommandError::Backend { op, message })
    }
}

impl CmdList for MetalCmdList<'_> {
    fn state(&self) -> CmdListState {
        self.dev.tracker.state()
    }

    fn begin(&mut self) -> Result<(), CommandError> {
        self.dev.tracker.begin()?;
        let dev = &mut *self.dev;
        if dev.command_buffer.is_none() {
            match dev.driver.new_command_buffer() {
                Ok(cb) => dev.command_buffer = Some(cb),
                Err(message) => {
                    dev.tracker.reset();
                    return Err(CommandError::Backend { op: "begin", message });
                }
            }
        }
        dev.encoders.close_all(dev.driver.as_mut());
        dev.encoders = MtlEncoderState::default();
        Ok(())
    }

    fn end(&mut self) -> Result<(), CommandError> {
        self.dev.tracker.end()?;
        let dev = &mut *self.dev;
        dev.encoders.close_all(dev.driver.as_mut());
        Ok(())
    }

    fn begin_render(&mut self, desc: &RenderPassDesc) -> Result<(), CommandError> {
        let (pass, extent) = self.dev.resolve_pass("begin_render", desc)?;
        self.dev.tracker.begin_render()?;
        let dev = &mut *self.dev;
        dev.encoders.close_compute(dev.driver.as_mut());
        let encoders = &mut dev.encoders;
        encoders.pass = Some(pass);
        encoders.extent = extent;
        // A new encoder covers the whole target.
        encoders.viewport = None;
        encoders.scissor = None;
        Ok(())
    }

    fn end_render(&mut self) -> Result<(), CommandError> {
        const OP: &str = "end_render";
        self.dev.tracker.end_render()?;
        // Passes without draws still need an encoder for their load actions.
        let encoder = self.render_encoder(OP)?;
        self.dev.driver.end_encoding(encoder);
        self.dev.encoders.render = None;
        Ok(())
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), CommandError> {
        const OP: &str = "set_pipeline";
        let dev = &mut *self.dev;
        let entry = dev
            .pipelines
            .get(pipeline)
            .ok_or_else(|| CommandError::invalid(OP, pipeline))?;
        dev.tracker.bind_pipeline(pipeline, entry.is_compute)?;
        let encoders = &mut dev.encoders;
        if entry.is_compute {
            encoders.compute_pipeline = Some(entry.pso);
        } else {
            encoders.render_pipeline = Some((entry.pso, entry.topology));
            encoders.raster = entry.raster;
            encoders.depth_state = entry.depth_state;
        }
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<(), CommandError> {
        self.dev.tracker.require_recording("set_viewport")?;
        self.dev.encoders.viewport = Some(viewport);
        Ok(())
    }

    fn set_scissor(&mut self, rect: Option<ScissorRect>) -> Result<(), CommandError> {
        self.dev.tracker.require_recording("set_scissor")?;
        self.dev.encoders.scissor = rect;
        Ok(())
    }

    fn set_depth_stencil_state(&mut self, state: &DepthStencilState) -> Result<(), CommandError> {
        const OP: &str = "set_depth_stencil_state";
        self.dev.tracker.require_recording(OP)?;
        let object = self
            .dev
            .depth_state(state)
            .map_err(|message| CommandError::Backend { op: OP, message })?;
        self.dev.encoders.depth_state = Some(object);
        Ok(())
    }

    fn set_depth_bias(&mut self, bias: &DepthBiasState) -> Result<(), CommandError> {
        self.dev.tracker.require_recording("set_depth_bias")?;
        self.dev.encoders.depth_bias = *bias;
        Ok(())
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) -> Result<(), CommandError> {
        const OP: &str = "set_vertex_buffer";
        self.dev.tracker.require_recording(OP)?;
        let (object, _) = self.buffer(OP, buffer)?;
        self.dev.encoders.vertex_buffers.insert(slot, (object, offset));
        Ok(())
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) -> Result<(), CommandError> {
        const OP: &str = "set_index_buffer";
        self.dev.tracker.require_recording(OP)?;
        let (object, _) = self.buffer(OP, buffer)?;
        self.dev.encoders.index = Some((object, offset, format));
        Ok(())
    }

    fn set_uniform_buffer(&mut self, binding: u32, buffer: BufferHandle, offset: u64, size: u64) -> Result<(), CommandError> {
        const OP: &str = "set_uniform_buffer";
        self.dev.tracker.require_recording(OP)?;
        Self::check_uniform_binding(OP, binding)?;
        let (object, buffer_size) = self.buffer(OP, buffer)?;
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
        self.dev.encoders.uniforms.insert(binding, (object, offset));
        Ok(())
    }

    fn set_uniform_bytes(&mut self, binding: u32, data: &[u8]) -> Result<(), CommandError> {
        const OP: &str = "set_uniform_bytes";
        self.dev.tracker.require_recording(OP)?;
        Self::check_uniform_binding(OP, binding)?;
        if data.is_empty() {
            return Ok(());
        }
        let dev = &mut *self.dev;
        // Exhaustion is logged by the allocator; the previous binding stays.
        let Some(offset) = dev.uniforms.allocate(data.len() as u64, dev.config.uniform_alignment) else {
            return Ok(());
        };
        let ring = dev.uniform_ring;
        dev.driver.buffer_write(ring, offset, data);
        dev.encoders.uniforms.insert(binding, (ring, offset));
        Ok(())
    }

    fn set_texture(&mut self, binding: u32, texture: TextureHandle, sampler: SamplerHandle) -> Result<(), CommandError> {
        const OP: &str = "set_texture";
        self.dev.tracker.require_recording(OP)?;
        let dev = &mut *self.dev;
        let object = dev
            .textures
            .get(texture)
            .ok_or_else(|| CommandError::invalid(OP, texture))?
            .object;
        let sampler_object = if sampler.id == 0 {
            None
        } else {
            Some(
                *dev.samplers
                    .get(sampler)
                    .ok_or_else(|| CommandError::invalid(OP, sampler))?,
            )
        };
        dev.encoders.textures.insert(binding, (object, sampler_object));
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32) -> Result<(), CommandError> {
        const OP: &str = "draw";
        self.dev.tracker.require_draw(OP)?;
        let trace = self.trace();
        let encoder = self.render_encoder(OP)?;
        let dev = &mut *self.dev;
        dev.encoders.flush_render(dev.driver.as_mut(), encoder, trace);
        let topology = dev.encoders.render_pipeline.map_or_else(PrimitiveTopology::default, |(_, t)| t);
        let command = EncoderCommand::Draw {
            topology,
            vertex_start: first_vertex,
            vertex_count,
            instance_count,
        };
        encode(dev.driver.as_mut(), encoder, command, trace);
        Ok(())
    }

    fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32, base_vertex: i32) -> Result<(), CommandError> {
        const OP: &str = "draw_indexed";
        self.dev.tracker.require_draw(OP)?;
        let (index_buffer, offset, index_format) = self.dev.encoders.index.ok_or(CommandError::MissingBinding {
            op: OP,
            what: "index buffer",
        })?;
        let trace = self.trace();
        let encoder = self.render_encoder(OP)?;
        let dev = &mut *self.dev;
        dev.encoders.flush_render(dev.driver.as_mut(), encoder, trace);
        let topology = dev.encoders.render_pipeline.map_or_else(PrimitiveTopology::default, |(_, t)| t);
        let command = EncoderCommand::DrawIndexed {
            topology,
            index_count,
            index_format,
            index_buffer,
            index_offset: offset + u64::from(first_index) * index_format.size(),
            instance_count,
            base_vertex,
        };
        encode(dev.driver.as_mut(), encoder, command, trace);
        Ok(())
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), CommandError> {
        const OP: &str = "dispatch";
        self.dev.tracker.require_dispatch(OP)?;
        let trace = self.trace();
        let cb = self.command_buffer(OP)?;
        let dev = &mut *self.dev;
        let encoder = dev
            .encoders
            .open_compute(dev.driver.as_mut(), cb)
            .map_err(|message| CommandError::Backend { op: OP, message })?;
        dev.encoders.flush_compute(dev.driver.as_mut(), encoder, trace);
        encode(dev.driver.as_mut(), encoder, EncoderCommand::Dispatch { groups: [x, y, z] }, trace);
        Ok(())
    }

    fn resource_barrier(&mut self, buffers: &[BufferBarrier], textures: &[TextureBarrier]) -> Result<(), CommandError> {
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
        // Tracked resources are ordered at encoder boundaries; only shader
        // writes inside one encoder need an explicit barrier.
        let shader_writes = buffers
            .iter()
            .map(|b| (b.before, b.after))
            .chain(textures.iter().map(|t| (t.before, t.after)))
            .any(|(before, after)| before == ResourceState::UnorderedAccess || after == ResourceState::UnorderedAccess);
        let encoders = &self.dev.encoders;
        if let Some(encoder) = shader_writes.then(|| encoders.compute.or(encoders.render)).flatten() {
            let trace = self.trace();
            encode(self.dev.driver.as_mut(), encoder, EncoderCommand::MemoryBarrier, trace);
        }
        Ok(())
    }

    fn begin_query(&mut self, query: QueryHandle) -> Result<(), CommandError> {
        self.sample("begin_query", query, QueryKind::TimeElapsed, 0)
    }

    fn end_query(&mut self, query: QueryHandle) -> Result<(), CommandError> {
        self.sample("end_query", query, QueryKind::TimeElapsed, 1)
    }

    fn write_timestamp(&mut self, query: QueryHandle) -> Result<(), CommandError> {
        self.sample("write_timestamp", query, QueryKind::Timestamp, 0)
    }

    fn signal_fence(&mut self, fence: FenceHandle) -> Result<(), CommandError> {
        const OP: &str = "signal_fence";
        let cb = self.require_outside_pass(OP)?;
        let dev = &mut *self.dev;
        let entry = dev
            .fences
            .get_mut(fence)
            .ok_or_else(|| CommandError::invalid(OP, fence))?;
        entry.target += 1;
        let (event, target) = (entry.event, entry.target);
        dev.driver.encode_signal_event(cb, event, target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::metal::HeadlessMetal;
    use crate::graphics::CallLog;
    use prism_core::config::RhiConfig;
    use prism_core::rhi::{Device, FenceStatus, PipelineDesc, ShaderCode, ShaderDesc, ShaderStage};

    const SOURCE: &str = "vertex float4 vs_main() {} fragment float4 fs_main() {} kernel void cs_main() {}";

    fn setup_with(config: &RhiConfig) -> (MetalDevice, CallLog, PipelineHandle, PipelineHandle) {
        let mtl = HeadlessMetal::new();
        let log = mtl.call_log();
        let mut dev = MetalDevice::new(Box::new(mtl), config).unwrap();
        let mut shader = |stage, entry: &str| {
            dev.create_shader(&ShaderDesc {
                label: None,
                stage,
                code: ShaderCode::Msl(SOURCE.into()),
                entry_point: entry.into(),
            })
            .unwrap()
        };
        let vs = shader(ShaderStage::Vertex, "vs_main");
        let fs = shader(ShaderStage::Fragment, "fs_main");
        let cs = shader(ShaderStage::Compute, "cs_main");
        let graphics = dev.create_pipeline(&PipelineDesc::graphics(vs, fs)).unwrap();
        let compute = dev.create_pipeline(&PipelineDesc::compute(cs)).unwrap();
        (dev, log, graphics, compute)
    }

    fn setup() -> (MetalDevice, CallLog, PipelineHandle, PipelineHandle) {
        setup_with(&RhiConfig::default())
    }

    #[test]
    fn redundant_pipeline_binds_are_filtered_per_encoder() {
        let (mut dev, log, pipeline, _) = setup();
        let mut cmd = dev.immediate();
        cmd.begin().unwrap();
        for _ in 0..2 {
            cmd.begin_render(&RenderPassDesc::to_default_target([0.0; 4])).unwrap();
            cmd.set_pipeline(pipeline).unwrap();
            cmd.draw(3, 1, 0).unwrap();
            cmd.set_pipeline(pipeline).unwrap();
            cmd.draw(3, 1, 0).unwrap();
            cmd.end_render().unwrap();
        }
        cmd.end().unwrap();
        assert_eq!(log.count("draw"), 4);
        // Once per encoder.
        assert_eq!(log.count("set_render_pipeline"), 2);
        assert_eq!(log.count("new_render_encoder"), 2);
    }

    #[test]
    fn clear_only_pass_still_opens_an_encoder() {
        let (mut dev, log, _, _) = setup();
        let mut cmd = dev.immediate();
        cmd.begin().unwrap();
        cmd.begin_render(&RenderPassDesc::to_default_target([1.0, 0.0, 0.0, 1.0])).unwrap();
        assert_eq!(log.count("new_render_encoder"), 0);
        cmd.end_render().unwrap();
        assert_eq!(log.count("new_render_encoder"), 1);
        assert_eq!(log.count("end_encoding"), 1);
    }

    #[test]
    fn compute_encoder_closes_before_a_pass() {
        let (mut dev, log, graphics, compute) = setup();
        {
            let mut cmd = dev.immediate();
            cmd.begin().unwrap();
            cmd.set_pipeline(compute).unwrap();
            cmd.dispatch(8, 8, 1).unwrap();
            cmd.begin_render(&RenderPassDesc::to_default_target([0.0; 4])).unwrap();
            cmd.set_pipeline(graphics).unwrap();
            cmd.draw(3, 1, 0).unwrap();
            cmd.end_render().unwrap();
            cmd.end().unwrap();
        }
        dev.present().unwrap();
        assert_eq!(log.count("new_compute_encoder"), 1);
        assert_eq!(log.count("violation:overlapping_encoders"), 0);
        assert_eq!(log.count("violation:commit_with_open_encoder"), 0);
        assert_eq!(log.count("present_drawable"), 1);
    }

    #[test]
    fn dispatch_inside_pass_is_rejected() {
        let (mut dev, _, _, compute) = setup();
        let mut cmd = dev.immediate();
        cmd.begin().unwrap();
        cmd.begin_render(&RenderPassDesc::to_default_target([0.0; 4])).unwrap();
        assert!(cmd.set_pipeline(compute).is_err());
        assert!(matches!(cmd.dispatch(1, 1, 1), Err(CommandError::InvalidState { .. })));
    }

    #[test]
    fn exhausted_ring_drops_the_upload() {
        let config = RhiConfig {
            max_draws_per_frame: 1,
            ..RhiConfig::default()
        };
        let (mut dev, log, _, _) = setup_with(&config);
        let mut cmd = dev.immediate();
        cmd.begin().unwrap();
        cmd.set_uniform_bytes(0, &[0; 16]).unwrap();
        assert!(cmd.set_uniform_bytes(0, &[0; 16]).is_ok());
        assert_eq!(log.count("buffer_write"), 1);
    }

    #[test]
    fn fence_signals_once_the_work_is_committed() {
        let (mut dev, _, _, _) = setup();
        let fence = dev.create_fence().unwrap();
        {
            let mut cmd = dev.immediate();
            cmd.begin().unwrap();
            cmd.signal_fence(fence).unwrap();
            cmd.end().unwrap();
        }
        assert_eq!(dev.wait_fence(fence, 0).unwrap(), FenceStatus::Signaled);
    }

    #[test]
    fn time_elapsed_query_resolves_after_present() {
        let (mut dev, _, _, _) = setup();
        let query = dev.create_query(QueryKind::TimeElapsed).unwrap();
        {
            let mut cmd = dev.immediate();
            cmd.begin().unwrap();
            cmd.begin_query(query).unwrap();
            cmd.end_query(query).unwrap();
            assert!(cmd.write_timestamp(query).is_err(), "kind mismatch");
            cmd.end().unwrap();
        }
        assert_eq!(dev.query_result(query).unwrap(), None);
        dev.present().unwrap();
        assert_eq!(dev.query_result(query).unwrap(), Some(1_000));
    }
}
