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

//! The command list contract and the recording state machine shared by all
//! backends.
//!
//! ```text
//! Idle --begin()--> Recording --begin_render()--> RenderPass --end_render()--> Recording
//!                    |    ^
//!   set_pipeline(compute)  `--begin_render()/end()-- Compute
//!                    v
//!                 Compute
//! Recording/Compute --end()--> Idle
//! ```
//!
//! Every backend drives a [`CommandTracker`] so that misuse fails fast with
//! the same [`CommandError`] regardless of the native API underneath.

use super::error::CommandError;
use super::handle::{
    BufferHandle, FenceHandle, PipelineHandle, QueryHandle, SamplerHandle, TextureHandle,
};
use super::types::{
    BufferBarrier, DepthBiasState, DepthStencilState, IndexFormat, RenderPassDesc, ScissorRect,
    TextureBarrier, Viewport,
};

/// Recording state of a command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CmdListState {
    /// Not recording.
    #[default]
    Idle,
    /// Recording, outside any pass.
    Recording,
    /// Inside a render pass.
    RenderPass,
    /// Recording compute work.
    Compute,
}

/// The pipeline currently bound on a command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundPipeline {
    /// Nothing bound.
    #[default]
    None,
    /// A graphics pipeline.
    Graphics(PipelineHandle),
    /// A compute pipeline.
    Compute(PipelineHandle),
}

/// Validates command ordering for a command list.
#[derive(Debug, Default)]
pub struct CommandTracker {
    state: CmdListState,
    pipeline: BoundPipeline,
}

impl CommandTracker {
    /// A tracker in the `Idle` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> CmdListState {
        self.state
    }

    /// Currently bound pipeline.
    pub fn bound_pipeline(&self) -> BoundPipeline {
        self.pipeline
    }

    fn reject(&self, op: &'static str) -> CommandError {
        CommandError::InvalidState {
            op,
            state: self.state,
        }
    }

    /// `Idle -> Recording`.
    pub fn begin(&mut self) -> Result<(), CommandError> {
        if self.state != CmdListState::Idle {
            return Err(self.reject("begin"));
        }
        self.state = CmdListState::Recording;
        self.pipeline = BoundPipeline::None;
        Ok(())
    }

    /// `Recording | Compute -> Idle`. Returns `true` if compute work was open.
    pub fn end(&mut self) -> Result<bool, CommandError> {
        let closed_compute = match self.state {
            CmdListState::Recording => false,
            CmdListState::Compute => true,
            _ => return Err(self.reject("end")),
        };
        self.state = CmdListState::Idle;
        self.pipeline = BoundPipeline::None;
        Ok(closed_compute)
    }

    /// `Recording | Compute -> RenderPass`. Returns `true` if compute work
    /// was open and has been closed by this transition.
    pub fn begin_render(&mut self) -> Result<bool, CommandError> {
        let closed_compute = match self.state {
            CmdListState::Recording => false,
            CmdListState::Compute => true,
            _ => return Err(self.reject("begin_render")),
        };
        self.state = CmdListState::RenderPass;
        self.pipeline = BoundPipeline::None;
        Ok(closed_compute)
    }

    /// `RenderPass -> Recording`.
    pub fn end_render(&mut self) -> Result<(), CommandError> {
        if self.state != CmdListState::RenderPass {
            return Err(self.reject("end_render"));
        }
        self.state = CmdListState::Recording;
        self.pipeline = BoundPipeline::None;
        Ok(())
    }

    /// Fails unless the list is recording (in or out of a pass).
    pub fn require_recording(&self, op: &'static str) -> Result<(), CommandError> {
        match self.state {
            CmdListState::Idle => Err(self.reject(op)),
            _ => Ok(()),
        }
    }

    /// Fails unless a render pass is active.
    pub fn require_render_pass(&self, op: &'static str) -> Result<(), CommandError> {
        match self.state {
            CmdListState::RenderPass => Ok(()),
            _ => Err(self.reject(op)),
        }
    }

    /// Records a pipeline binding.
    ///
    /// Graphics pipelines may be bound while recording or inside a pass.
    /// Compute pipelines may not be bound inside a pass; binding one outside
    /// a pass opens compute work. Returns `true` when compute work was opened
    /// by this call.
    pub fn bind_pipeline(
        &mut self,
        pipeline: PipelineHandle,
        is_compute: bool,
    ) -> Result<bool, CommandError> {
        const OP: &str = "set_pipeline";
        match (self.state, is_compute) {
            (CmdListState::Idle, _) => Err(self.reject(OP)),
            (CmdListState::RenderPass, true) | (CmdListState::Compute, false) => {
                Err(self.reject(OP))
            }
            (CmdListState::Recording, true) => {
                self.state = CmdListState::Compute;
                self.pipeline = BoundPipeline::Compute(pipeline);
                Ok(true)
            }
            (CmdListState::Compute, true) => {
                self.pipeline = BoundPipeline::Compute(pipeline);
                Ok(false)
            }
            (_, false) => {
                self.pipeline = BoundPipeline::Graphics(pipeline);
                Ok(false)
            }
        }
    }

    /// Fails unless a pass is active and a graphics pipeline is bound.
    pub fn require_draw(&self, op: &'static str) -> Result<PipelineHandle, CommandError> {
        self.require_render_pass(op)?;
        match self.pipeline {
            BoundPipeline::Graphics(p) => Ok(p),
            _ => Err(CommandError::MissingPipeline {
                op,
                expected: "graphics",
            }),
        }
    }

    /// Fails unless compute work is open with a compute pipeline bound.
    pub fn require_dispatch(&self, op: &'static str) -> Result<PipelineHandle, CommandError> {
        if self.state == CmdListState::RenderPass || self.state == CmdListState::Idle {
            return Err(self.reject(op));
        }
        match self.pipeline {
            BoundPipeline::Compute(p) => Ok(p),
            _ => Err(CommandError::MissingPipeline {
                op,
                expected: "compute",
            }),
        }
    }

    /// Forces the tracker back to `Idle`, e.g. after device loss.
    pub fn reset(&mut self) {
        self.state = CmdListState::Idle;
        self.pipeline = BoundPipeline::None;
    }
}

/// A recorder of GPU commands bound to the device that created it.
///
/// The immediate command list is obtained from `Device::immediate` and borrows
/// the device, so it can never outlive the resource tables it refers to.
/// Every method validates the recording state first and returns a
/// [`CommandError`] on misuse instead of issuing native calls.
pub trait CmdList {
    /// Current recording state.
    fn state(&self) -> CmdListState;

    /// Starts recording a frame's commands.
    fn begin(&mut self) -> Result<(), CommandError>;

    /// Finishes recording.
    fn end(&mut self) -> Result<(), CommandError>;

    /// Opens a render pass.
    fn begin_render(&mut self, desc: &RenderPassDesc) -> Result<(), CommandError>;

    /// Closes the current render pass.
    fn end_render(&mut self) -> Result<(), CommandError>;

    /// Binds a graphics or compute pipeline.
    fn set_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), CommandError>;

    /// Sets the viewport.
    fn set_viewport(&mut self, viewport: Viewport) -> Result<(), CommandError>;

    /// Sets or disables (`None`) the scissor rectangle.
    fn set_scissor(&mut self, rect: Option<ScissorRect>) -> Result<(), CommandError>;

    /// Overrides the depth test state of the bound pipeline.
    fn set_depth_stencil_state(&mut self, state: &DepthStencilState) -> Result<(), CommandError>;

    /// Sets the rasterized depth bias.
    fn set_depth_bias(&mut self, bias: &DepthBiasState) -> Result<(), CommandError>;

    /// Binds a vertex buffer to `slot`.
    fn set_vertex_buffer(
        &mut self,
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
    ) -> Result<(), CommandError>;

    /// Binds the index buffer.
    fn set_index_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    ) -> Result<(), CommandError>;

    /// Binds a range of a uniform buffer to `binding`.
    fn set_uniform_buffer(
        &mut self,
        binding: u32,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<(), CommandError>;

    /// Uploads transient per-draw uniform data and binds it to `binding`.
    ///
    /// Backends stream the bytes through a per-frame ring. When the ring is
    /// exhausted the upload is dropped with a warning and the draw proceeds
    /// with whatever was bound before.
    fn set_uniform_bytes(&mut self, binding: u32, data: &[u8]) -> Result<(), CommandError>;

    /// Binds a texture and its sampler to `binding`.
    fn set_texture(
        &mut self,
        binding: u32,
        texture: TextureHandle,
        sampler: SamplerHandle,
    ) -> Result<(), CommandError>;

    /// Non-indexed draw.
    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
    ) -> Result<(), CommandError>;

    /// Indexed draw using the bound index buffer.
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
    ) -> Result<(), CommandError>;

    /// Compute dispatch using the bound compute pipeline.
    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), CommandError>;

    /// Transitions resources between usage states.
    fn resource_barrier(
        &mut self,
        buffers: &[BufferBarrier],
        textures: &[TextureBarrier],
    ) -> Result<(), CommandError>;

    /// Starts a time-elapsed query.
    fn begin_query(&mut self, query: QueryHandle) -> Result<(), CommandError>;

    /// Ends a time-elapsed query.
    fn end_query(&mut self, query: QueryHandle) -> Result<(), CommandError>;

    /// Writes a GPU timestamp into a timestamp query.
    fn write_timestamp(&mut self, query: QueryHandle) -> Result<(), CommandError>;

    /// Makes `fence` signal once all previously recorded work completes.
    fn signal_fence(&mut self, fence: FenceHandle) -> Result<(), CommandError>;
}

impl dyn CmdList + '_ {
    /// Uploads a plain-old-data value as per-draw uniform data.
    pub fn set_uniform_pod<T: bytemuck::Pod>(
        &mut self,
        binding: u32,
        value: &T,
    ) -> Result<(), CommandError> {
        self.set_uniform_bytes(binding, bytemuck::bytes_of(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPE: PipelineHandle = PipelineHandle { id: 1 };
    const COMPUTE: PipelineHandle = PipelineHandle { id: 2 };

    #[test]
    fn full_frame_transitions() {
        let mut t = CommandTracker::new();
        t.begin().unwrap();
        assert_eq!(t.begin_render().unwrap(), false);
        t.bind_pipeline(PIPE, false).unwrap();
        assert_eq!(t.require_draw("draw_indexed").unwrap(), PIPE);
        t.end_render().unwrap();
        assert_eq!(t.end().unwrap(), false);
        assert_eq!(t.state(), CmdListState::Idle);
    }

    #[test]
    fn recording_calls_fail_while_idle() {
        let t = CommandTracker::new();
        assert!(matches!(
            t.require_recording("set_vertex_buffer"),
            Err(CommandError::InvalidState {
                state: CmdListState::Idle,
                ..
            })
        ));
    }

    #[test]
    fn draw_requires_pass_and_graphics_pipeline() {
        let mut t = CommandTracker::new();
        t.begin().unwrap();
        t.bind_pipeline(PIPE, false).unwrap();
        assert!(t.require_draw("draw_indexed").is_err(), "no pass yet");

        t.begin_render().unwrap();
        assert!(matches!(
            t.require_draw("draw_indexed"),
            Err(CommandError::MissingPipeline { .. })
        ));
    }

    #[test]
    fn compute_pipeline_rejected_inside_pass() {
        let mut t = CommandTracker::new();
        t.begin().unwrap();
        t.begin_render().unwrap();
        assert!(t.bind_pipeline(COMPUTE, true).is_err());
    }

    #[test]
    fn compute_work_opens_and_closes() {
        let mut t = CommandTracker::new();
        t.begin().unwrap();
        assert!(t.require_dispatch("dispatch").is_err());
        assert_eq!(t.bind_pipeline(COMPUTE, true).unwrap(), true);
        assert_eq!(t.state(), CmdListState::Compute);
        assert_eq!(t.require_dispatch("dispatch").unwrap(), COMPUTE);

        // Starting a pass closes the compute work.
        assert_eq!(t.begin_render().unwrap(), true);
        assert!(t.require_dispatch("dispatch").is_err());
    }

    #[test]
    fn end_inside_pass_is_rejected() {
        let mut t = CommandTracker::new();
        t.begin().unwrap();
        t.begin_render().unwrap();
        assert!(t.end().is_err());
        assert!(t.begin().is_err());
    }

    #[test]
    fn pass_resets_bound_pipeline() {
        let mut t = CommandTracker::new();
        t.begin().unwrap();
        t.begin_render().unwrap();
        t.bind_pipeline(PIPE, false).unwrap();
        t.end_render().unwrap();
        t.begin_render().unwrap();
        assert_eq!(t.bound_pipeline(), BoundPipeline::None);
    }
}
