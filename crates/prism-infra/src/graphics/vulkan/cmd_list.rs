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

use super::barrier::BarrierBatch;
use super::conversions::IntoVk;
use super::device::{PendingPass, VulkanDevice};
use ash::vk;
use prism_core::rhi::{
    BufferBarrier, BufferHandle, CmdList, CmdListState, CommandError, DepthBiasState,
    DepthStencilState, FenceHandle, IndexFormat, PipelineHandle, QueryHandle, RenderPassDesc,
    SamplerHandle, ScissorRect, TextureBarrier, TextureHandle, Viewport,
};
use std::collections::HashMap;

const BACKEND: &str = "Vulkan";

/// Command buffer state of the immediate list.
///
/// Vulkan keeps bindings across render passes within one command buffer, so
/// the cache is only cleared when recording starts.
#[derive(Debug, Default)]
pub(super) struct VkRecording {
    pass: Option<PendingPass>,
    pass_started: bool,
    pipeline: Option<vk::Pipeline>,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    vertex_buffers: HashMap<u32, (vk::Buffer, u64)>,
    index: Option<(vk::Buffer, u64, IndexFormat)>,
}

impl VkRecording {
    /// Drops cached bindings of a pipeline that is being destroyed.
    pub fn forget_pipeline(&mut self, pipeline: vk::Pipeline) {
        if self.pipeline == Some(pipeline) {
            self.pipeline = None;
        }
    }

    /// Drops cached bindings of a buffer that is being destroyed.
    pub fn forget_buffer(&mut self, buffer: vk::Buffer) {
        self.vertex_buffers.retain(|_, (b, _)| *b != buffer);
        if self.index.is_some_and(|(b, _, _)| b == buffer) {
            self.index = None;
        }
    }
}

fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

fn native_viewport(v: Viewport) -> vk::Viewport {
    vk::Viewport {
        x: v.x,
        y: v.y,
        width: v.width,
        height: v.height,
        min_depth: v.min_depth,
        max_depth: v.max_depth,
    }
}

fn native_scissor(rect: Option<ScissorRect>, extent: vk::Extent2D) -> vk::Rect2D {
    match rect {
        Some(r) => vk::Rect2D {
            offset: vk::Offset2D { x: r.x, y: r.y },
            extent: vk::Extent2D {
                width: r.width,
                height: r.height,
            },
        },
        None => full_scissor(extent),
    }
}

/// The immediate command list of a [`VulkanDevice`]. Records into the
/// command buffer of the current frame slot.
pub struct VulkanCmdList<'a> {
    dev: &'a mut VulkanDevice,
}

impl<'a> VulkanCmdList<'a> {
    pub(super) fn new(dev: &'a mut VulkanDevice) -> Self {
        Self { dev }
    }

    fn cb(&self) -> vk::CommandBuffer {
        self.dev.frames.current().command_buffer
    }

    fn unsupported(op: &'static str) -> CommandError {
        CommandError::Unsupported { backend: BACKEND, op }
    }

    fn buffer(&self, op: &'static str, buffer: BufferHandle) -> Result<vk::Buffer, CommandError> {
        self.dev
            .buffers
            .get(buffer)
            .map(|b| b.buffer)
            .ok_or_else(|| CommandError::invalid(op, buffer))
    }

    /// Begins the pending native pass, building its framebuffer. Viewport
    /// and scissor are dynamic and set right after.
    fn start_pass(&mut self, op: &'static str) -> Result<(), CommandError> {
        let dev = &mut *self.dev;
        if dev.recording.pass_started {
            return Ok(());
        }
        let Some(pass) = dev.recording.pass.clone() else {
            return Err(CommandError::InvalidState {
                op,
                state: dev.tracker.state(),
            });
        };
        let backend = |e: vk::Result| CommandError::Backend {
            op,
            message: e.to_string(),
        };
        let render_pass = dev.render_pass(&pass.key).map_err(backend)?;
        let framebuffer = dev
            .driver
            .create_framebuffer(render_pass, &pass.views, pass.extent)
            .map_err(backend)?;
        dev.frames.current_mut().framebuffers.push(framebuffer);

        let cb = dev.frames.current().command_buffer;
        let driver = dev.driver.as_mut();
        driver.cmd_begin_render_pass(cb, render_pass, framebuffer, pass.extent, &pass.clear_values());
        let viewport = dev
            .recording
            .viewport
            .map_or_else(|| full_viewport(pass.extent), native_viewport);
        driver.cmd_set_viewport(cb, viewport);
        driver.cmd_set_scissor(cb, native_scissor(dev.recording.scissor, pass.extent));
        dev.recording.pass_started = true;
        if dev.config.debug.log_state_changes {
            log::trace!(
                "VulkanCmdList: render pass {:?} started ({}x{})",
                render_pass,
                pass.extent.width,
                pass.extent.height
            );
        }
        Ok(())
    }
}

impl CmdList for VulkanCmdList<'_> {
    fn state(&self) -> CmdListState {
        self.dev.tracker.state()
    }

    fn begin(&mut self) -> Result<(), CommandError> {
        self.dev.tracker.begin()?;
        let dev = &mut *self.dev;
        if let Err(e) = dev.frames.begin_frame_if_needed(dev.driver.as_mut()) {
            dev.tracker.reset();
            return Err(CommandError::Backend {
                op: "begin",
                message: e.to_string(),
            });
        }
        dev.recording = VkRecording::default();
        Ok(())
    }

    fn end(&mut self) -> Result<(), CommandError> {
        // Submission happens at present.
        self.dev.tracker.end()?;
        Ok(())
    }

    fn begin_render(&mut self, desc: &RenderPassDesc) -> Result<(), CommandError> {
        let pass = self.dev.resolve_pass("begin_render", desc)?;
        self.dev.tracker.begin_render()?;
        let recording = &mut self.dev.recording;
        recording.pass = Some(pass);
        recording.pass_started = false;
        recording.viewport = None;
        recording.scissor = None;
        Ok(())
    }

    fn end_render(&mut self) -> Result<(), CommandError> {
        const OP: &str = "end_render";
        self.dev.tracker.end_render()?;
        // Passes without draws still run their load operations.
        self.start_pass(OP)?;
        let cb = self.cb();
        self.dev.driver.cmd_end_render_pass(cb);
        let recording = &mut self.dev.recording;
        recording.pass = None;
        recording.pass_started = false;
        Ok(())
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), CommandError> {
        const OP: &str = "set_pipeline";
        let entry = self
            .dev
            .pipelines
            .get(pipeline)
            .ok_or_else(|| CommandError::invalid(OP, pipeline))?;
        let (native, is_compute) = (entry.pipeline, entry.is_compute);
        self.dev.tracker.bind_pipeline(pipeline, is_compute)?;
        let bind_point = if is_compute {
            vk::PipelineBindPoint::COMPUTE
        } else {
            self.start_pass(OP)?;
            vk::PipelineBindPoint::GRAPHICS
        };
        if self.dev.recording.pipeline == Some(native) {
            return Ok(());
        }
        let cb = self.cb();
        self.dev.driver.cmd_bind_pipeline(cb, bind_point, native);
        self.dev.recording.pipeline = Some(native);
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<(), CommandError> {
        self.dev.tracker.require_recording("set_viewport")?;
        self.dev.recording.viewport = Some(viewport);
        if self.dev.recording.pass_started {
            let cb = self.cb();
            self.dev.driver.cmd_set_viewport(cb, native_viewport(viewport));
        }
        Ok(())
    }

    fn set_scissor(&mut self, rect: Option<ScissorRect>) -> Result<(), CommandError> {
        self.dev.tracker.require_recording("set_scissor")?;
        let recording = &mut self.dev.recording;
        recording.scissor = rect;
        let started = recording
            .pass
            .as_ref()
            .filter(|_| recording.pass_started)
            .map(|p| p.extent);
        if let Some(extent) = started {
            let cb = self.cb();
            self.dev.driver.cmd_set_scissor(cb, native_scissor(rect, extent));
        }
        Ok(())
    }

    fn set_depth_stencil_state(&mut self, _state: &DepthStencilState) -> Result<(), CommandError> {
        // Depth state is baked into Vulkan pipelines.
        Err(Self::unsupported("set_depth_stencil_state"))
    }

    fn set_depth_bias(&mut self, bias: &DepthBiasState) -> Result<(), CommandError> {
        self.dev.tracker.require_recording("set_depth_bias")?;
        let cb = self.cb();
        self.dev
            .driver
            .cmd_set_depth_bias(cb, bias.constant, bias.clamp, bias.slope_scale);
        Ok(())
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) -> Result<(), CommandError> {
        const OP: &str = "set_vertex_buffer";
        self.dev.tracker.require_recording(OP)?;
        let native = self.buffer(OP, buffer)?;
        if self.dev.recording.vertex_buffers.get(&slot) == Some(&(native, offset)) {
            return Ok(());
        }
        let cb = self.cb();
        self.dev.driver.cmd_bind_vertex_buffer(cb, slot, native, offset);
        self.dev.recording.vertex_buffers.insert(slot, (native, offset));
        Ok(())
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) -> Result<(), CommandError> {
        const OP: &str = "set_index_buffer";
        self.dev.tracker.require_recording(OP)?;
        let native = self.buffer(OP, buffer)?;
        if self.dev.recording.index == Some((native, offset, format)) {
            return Ok(());
        }
        let cb = self.cb();
        self.dev
            .driver
            .cmd_bind_index_buffer(cb, native, offset, format.into_vk());
        self.dev.recording.index = Some((native, offset, format));
        Ok(())
    }

    fn set_uniform_buffer(&mut self, _binding: u32, _buffer: BufferHandle, _offset: u64, _size: u64) -> Result<(), CommandError> {
        Err(Self::unsupported("set_uniform_buffer"))
    }

    fn set_uniform_bytes(&mut self, _binding: u32, _data: &[u8]) -> Result<(), CommandError> {
        Err(Self::unsupported("set_uniform_bytes"))
    }

    fn set_texture(&mut self, _binding: u32, _texture: TextureHandle, _sampler: SamplerHandle) -> Result<(), CommandError> {
        Err(Self::unsupported("set_texture"))
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32) -> Result<(), CommandError> {
        self.dev.tracker.require_draw("draw")?;
        let cb = self.cb();
        self.dev
            .driver
            .cmd_draw(cb, vertex_count, instance_count, first_vertex);
        Ok(())
    }

    fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32, base_vertex: i32) -> Result<(), CommandError> {
        const OP: &str = "draw_indexed";
        self.dev.tracker.require_draw(OP)?;
        if self.dev.recording.index.is_none() {
            return Err(CommandError::MissingBinding {
                op: OP,
                what: "index buffer",
            });
        }
        let cb = self.cb();
        self.dev
            .driver
            .cmd_draw_indexed(cb, index_count, instance_count, first_index, base_vertex);
        Ok(())
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), CommandError> {
        self.dev.tracker.require_dispatch("dispatch")?;
        let cb = self.cb();
        self.dev.driver.cmd_dispatch(cb, x, y, z);
        Ok(())
    }

    fn resource_barrier(&mut self, buffers: &[BufferBarrier], textures: &[TextureBarrier]) -> Result<(), CommandError> {
        const OP: &str = "resource_barrier";
        match self.dev.tracker.state() {
            state @ (CmdListState::Idle | CmdListState::RenderPass) => {
                return Err(CommandError::InvalidState { op: OP, state });
            }
            _ => {}
        }
        let mut batch = BarrierBatch::new();
        for b in buffers {
            let native = self.buffer(OP, b.buffer)?;
            batch.add_buffer(native, b.stages, b.before, b.after);
        }
        for t in textures {
            let entry = self
                .dev
                .textures
                .get(t.texture)
                .ok_or_else(|| CommandError::invalid(OP, t.texture))?;
            batch.add_image(entry.image, &entry.desc, t.stages, t.before, t.after);
        }
        let cb = self.cb();
        batch.record(self.dev.driver.as_mut(), cb);
        Ok(())
    }

    fn begin_query(&mut self, _query: QueryHandle) -> Result<(), CommandError> {
        Err(Self::unsupported("begin_query"))
    }

    fn end_query(&mut self, _query: QueryHandle) -> Result<(), CommandError> {
        Err(Self::unsupported("end_query"))
    }

    fn write_timestamp(&mut self, _query: QueryHandle) -> Result<(), CommandError> {
        Err(Self::unsupported("write_timestamp"))
    }

    fn signal_fence(&mut self, _fence: FenceHandle) -> Result<(), CommandError> {
        Err(Self::unsupported("signal_fence"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::vulkan::HeadlessVulkan;
    use crate::graphics::CallLog;
    use prism_core::config::RhiConfig;
    use prism_core::rhi::{
        BufferDesc, BufferUsage, Device, PipelineDesc, ShaderCode, ShaderDesc, ShaderStage,
    };

    fn spirv_header() -> Vec<u8> {
        [0x0723_0203u32, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    fn setup() -> (VulkanDevice, CallLog, PipelineHandle, PipelineHandle) {
        let vk = HeadlessVulkan::new(320, 240);
        let log = vk.call_log();
        let mut dev = VulkanDevice::new(Box::new(vk), &RhiConfig::default()).unwrap();
        let mut shader = |stage| {
            dev.create_shader(&ShaderDesc {
                label: None,
                stage,
                code: ShaderCode::SpirV(spirv_header()),
                entry_point: "main".into(),
            })
            .unwrap()
        };
        let vs = shader(ShaderStage::Vertex);
        let fs = shader(ShaderStage::Fragment);
        let cs = shader(ShaderStage::Compute);
        let graphics = dev.create_pipeline(&PipelineDesc::graphics(vs, fs)).unwrap();
        let compute = dev.create_pipeline(&PipelineDesc::compute(cs)).unwrap();
        (dev, log, graphics, compute)
    }

    #[test]
    fn framebuffer_is_built_at_first_pipeline_bind() {
        let (mut dev, log, pipeline, _) = setup();
        let mut cmd = dev.immediate();
        cmd.begin().unwrap();
        cmd.begin_render(&RenderPassDesc::to_default_target([0.0; 4])).unwrap();
        assert_eq!(log.count("create_framebuffer"), 0);
        cmd.set_pipeline(pipeline).unwrap();
        assert_eq!(log.count("create_framebuffer"), 1);
        cmd.set_pipeline(pipeline).unwrap();
        cmd.draw(3, 1, 0).unwrap();
        cmd.end_render().unwrap();
        cmd.end().unwrap();
        assert_eq!(log.count("cmd_begin_render_pass"), 1);
        assert_eq!(log.count("cmd_bind_pipeline"), 1);
        assert_eq!(log.count("violation:draw_outside_pass"), 0);
    }

    #[test]
    fn clear_only_pass_still_begins_the_native_pass() {
        let (mut dev, log, _, _) = setup();
        let mut cmd = dev.immediate();
        cmd.begin().unwrap();
        cmd.begin_render(&RenderPassDesc::to_default_target([1.0, 0.0, 0.0, 1.0]))
            .unwrap();
        cmd.end_render().unwrap();
        cmd.end().unwrap();
        assert_eq!(log.count("cmd_begin_render_pass"), 1);
        assert_eq!(log.count("cmd_end_render_pass"), 1);
    }

    #[test]
    fn frame_framebuffers_are_released_when_the_slot_is_reused() {
        let (mut dev, log, pipeline, _) = setup();
        for _ in 0..3 {
            let mut cmd = dev.immediate();
            cmd.begin().unwrap();
            cmd.begin_render(&RenderPassDesc::to_default_target([0.0; 4])).unwrap();
            cmd.set_pipeline(pipeline).unwrap();
            cmd.end_render().unwrap();
            cmd.end().unwrap();
            drop(cmd);
            dev.present().unwrap();
        }
        // Slot 0 was reused by the third frame.
        assert_eq!(log.count("create_framebuffer"), 3);
        assert_eq!(log.count("destroy_framebuffer"), 1);
        assert_eq!(log.count("submit"), 3);
        assert_eq!(log.count("present"), 3);
        assert_eq!(dev.frame_slot(), 1);
    }

    #[test]
    fn binding_state_unsupported() {
        let (mut dev, _, _, _) = setup();
        let mut cmd = dev.immediate();
        cmd.begin().unwrap();
        assert!(matches!(
            cmd.set_uniform_bytes(0, &[0; 16]),
            Err(CommandError::Unsupported { backend: "Vulkan", .. })
        ));
        assert!(matches!(
            cmd.set_texture(0, TextureHandle { id: 1 }, SamplerHandle { id: 1 }),
            Err(CommandError::Unsupported { .. })
        ));
        assert!(matches!(
            cmd.signal_fence(FenceHandle { id: 1 }),
            Err(CommandError::Unsupported { .. })
        ));
    }

    #[test]
    fn barriers_are_rejected_inside_a_pass_and_batched_outside() {
        let (mut dev, log, _, compute) = setup();
        let buffer = dev
            .create_buffer(&BufferDesc {
                label: None,
                size: 256,
                usage: BufferUsage::STORAGE | BufferUsage::VERTEX,
                host_visible: false,
            })
            .unwrap();
        let barrier = BufferBarrier {
            buffer,
            stages: prism_core::rhi::ShaderStages::COMPUTE,
            before: prism_core::rhi::ResourceState::UnorderedAccess,
            after: prism_core::rhi::ResourceState::VertexBuffer,
        };
        let mut cmd = dev.immediate();
        cmd.begin().unwrap();
        cmd.set_pipeline(compute).unwrap();
        cmd.dispatch(8, 1, 1).unwrap();
        cmd.resource_barrier(&[barrier, barrier], &[]).unwrap();
        cmd.begin_render(&RenderPassDesc::to_default_target([0.0; 4])).unwrap();
        assert!(matches!(
            cmd.resource_barrier(&[barrier], &[]),
            Err(CommandError::InvalidState { .. })
        ));
        assert_eq!(log.count("cmd_pipeline_barrier"), 1);
    }
}
