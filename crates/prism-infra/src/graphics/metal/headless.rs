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

//! An in-memory [`MetalDriver`].
//!
//! Command buffers execute at `commit`: event signals and counter samples
//! recorded into them take effect then. Lifecycle violations (encoding into a
//! closed encoder, committing with an open one) are counted under
//! `"violation:*"` names in the [`CallLog`] instead of panicking.

use super::driver::{EncoderCommand, MetalDriver, MtlObject, MtlRenderPass, MtlRenderPipelineDesc};
use crate::graphics::CallLog;
use prism_core::rhi::{DepthStencilState, SamplerDesc, TextureDesc};
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
enum Object {
    Buffer { data: Vec<u8> },
    Texture,
    Sampler,
    Library { source: String },
    Function,
    RenderPipeline,
    ComputePipeline,
    DepthStencil,
    Event { value: u64 },
    Counters { samples: Vec<Option<u64>> },
    CommandBuffer(PendingWork),
}

#[derive(Debug, Default)]
struct PendingWork {
    encoders: Vec<MtlObject>,
    signals: Vec<(MtlObject, u64)>,
    samples: Vec<(MtlObject, u32)>,
}

/// An emulated Apple GPU.
#[derive(Debug)]
pub struct HeadlessMetal {
    next_id: u64,
    objects: HashMap<u64, Object>,
    open_encoders: HashSet<MtlObject>,
    commands: Vec<EncoderCommand>,
    calls: CallLog,
    clock_ns: u64,
}

impl HeadlessMetal {
    /// An empty device.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            objects: HashMap::new(),
            open_encoders: HashSet::new(),
            commands: Vec::new(),
            calls: CallLog::default(),
            clock_ns: 0,
        }
    }

    /// The shared call counters.
    pub fn call_log(&self) -> CallLog {
        self.calls.clone()
    }

    /// Every command encoded so far, in order.
    pub fn commands(&self) -> &[EncoderCommand] {
        &self.commands
    }

    /// Contents of a shared buffer.
    pub fn buffer_contents(&self, buffer: MtlObject) -> Option<&[u8]> {
        match self.objects.get(&buffer.0) {
            Some(Object::Buffer { data }) => Some(data),
            _ => None,
        }
    }

    fn alloc(&mut self, object: Object) -> MtlObject {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, object);
        MtlObject(id)
    }

    fn pending(&mut self, command_buffer: MtlObject) -> Option<&mut PendingWork> {
        match self.objects.get_mut(&command_buffer.0) {
            Some(Object::CommandBuffer(work)) => Some(work),
            _ => None,
        }
    }
}

impl Default for HeadlessMetal {
    fn default() -> Self {
        Self::new()
    }
}

impl MetalDriver for HeadlessMetal {
    fn new_buffer(&mut self, size: u64, _host_visible: bool) -> Result<MtlObject, String> {
        self.calls.record("new_buffer");
        let size = usize::try_from(size).map_err(|_| "buffer too large".to_string())?;
        Ok(self.alloc(Object::Buffer {
            data: vec![0; size],
        }))
    }

    fn buffer_write(&mut self, buffer: MtlObject, offset: u64, data: &[u8]) {
        self.calls.record("buffer_write");
        if let Some(Object::Buffer { data: storage }) = self.objects.get_mut(&buffer.0) {
            let start = offset as usize;
            if let Some(dst) = storage.get_mut(start..start + data.len()) {
                dst.copy_from_slice(data);
            }
        }
    }

    fn new_texture(&mut self, _desc: &TextureDesc) -> Result<MtlObject, String> {
        self.calls.record("new_texture");
        Ok(self.alloc(Object::Texture))
    }

    fn replace_texture_level(&mut self, _t: MtlObject, _desc: &TextureDesc, _mip: u32, _data: &[u8]) {
        self.calls.record("replace_texture_level");
    }

    fn new_sampler(&mut self, _desc: &SamplerDesc, _aniso: f32) -> Result<MtlObject, String> {
        self.calls.record("new_sampler");
        Ok(self.alloc(Object::Sampler))
    }

    fn new_library(&mut self, source: &str) -> Result<MtlObject, String> {
        self.calls.record("new_library");
        if source.trim().is_empty() {
            return Err("program_source:1:1: error: empty source".into());
        }
        if source.contains("#error") {
            return Err("program_source: error: #error directive".into());
        }
        Ok(self.alloc(Object::Library {
            source: source.to_string(),
        }))
    }

    fn new_function(&mut self, library: MtlObject, entry_point: &str) -> Result<MtlObject, String> {
        self.calls.record("new_function");
        match self.objects.get(&library.0) {
            Some(Object::Library { source }) if source.contains(entry_point) => {
                Ok(self.alloc(Object::Function))
            }
            Some(Object::Library { .. }) => {
                Err(format!("function '{entry_point}' not found in library"))
            }
            _ => Err("not a library".into()),
        }
    }

    fn new_render_pipeline(&mut self, desc: &MtlRenderPipelineDesc<'_>) -> Result<MtlObject, String> {
        self.calls.record("new_render_pipeline");
        let is_function = |o: MtlObject| matches!(self.objects.get(&o.0), Some(Object::Function));
        if !is_function(desc.vertex) || !is_function(desc.fragment) {
            return Err(format!("pipeline '{}': missing vertex or fragment function", desc.label));
        }
        Ok(self.alloc(Object::RenderPipeline))
    }

    fn new_compute_pipeline(&mut self, function: MtlObject) -> Result<MtlObject, String> {
        self.calls.record("new_compute_pipeline");
        if !matches!(self.objects.get(&function.0), Some(Object::Function)) {
            return Err("not a function".into());
        }
        Ok(self.alloc(Object::ComputePipeline))
    }

    fn new_depth_stencil_state(&mut self, _state: &DepthStencilState) -> Result<MtlObject, String> {
        self.calls.record("new_depth_stencil_state");
        Ok(self.alloc(Object::DepthStencil))
    }

    fn new_shared_event(&mut self) -> Result<MtlObject, String> {
        self.calls.record("new_shared_event");
        Ok(self.alloc(Object::Event { value: 0 }))
    }

    fn event_value(&mut self, event: MtlObject) -> u64 {
        match self.objects.get(&event.0) {
            Some(Object::Event { value }) => *value,
            _ => 0,
        }
    }

    fn wait_event(&mut self, event: MtlObject, value: u64, _timeout_ns: u64) -> bool {
        self.calls.record("wait_event");
        // Committed work completes instantly, so waiting never makes progress.
        self.event_value(event) >= value
    }

    fn new_counter_buffer(&mut self, samples: u32) -> Result<MtlObject, String> {
        self.calls.record("new_counter_buffer");
        Ok(self.alloc(Object::Counters {
            samples: vec![None; samples as usize],
        }))
    }

    fn resolve_counter(&mut self, buffer: MtlObject, index: u32) -> Option<u64> {
        match self.objects.get(&buffer.0) {
            Some(Object::Counters { samples }) => samples.get(index as usize).copied().flatten(),
            _ => None,
        }
    }

    fn release(&mut self, object: MtlObject) {
        self.calls.record("release");
        self.objects.remove(&object.0);
    }

    fn new_command_buffer(&mut self) -> Result<MtlObject, String> {
        self.calls.record("new_command_buffer");
        Ok(self.alloc(Object::CommandBuffer(PendingWork::default())))
    }

    fn new_render_encoder(&mut self, command_buffer: MtlObject, _pass: &MtlRenderPass) -> Result<MtlObject, String> {
        self.calls.record("new_render_encoder");
        if !self.open_encoders.is_empty() {
            self.calls.record("violation:overlapping_encoders");
        }
        let encoder = MtlObject(self.next_id);
        self.next_id += 1;
        self.pending(command_buffer)
            .ok_or_else(|| "not a command buffer".to_string())?
            .encoders
            .push(encoder);
        self.open_encoders.insert(encoder);
        Ok(encoder)
    }

    fn new_compute_encoder(&mut self, command_buffer: MtlObject) -> Result<MtlObject, String> {
        self.calls.record("new_compute_encoder");
        if !self.open_encoders.is_empty() {
            self.calls.record("violation:overlapping_encoders");
        }
        let encoder = MtlObject(self.next_id);
        self.next_id += 1;
        self.pending(command_buffer)
            .ok_or_else(|| "not a command buffer".to_string())?
            .encoders
            .push(encoder);
        self.open_encoders.insert(encoder);
        Ok(encoder)
    }

    fn encode(&mut self, encoder: MtlObject, command: EncoderCommand) {
        if !self.open_encoders.contains(&encoder) {
            self.calls.record("violation:encode_closed");
            return;
        }
        self.calls.record(command.name());
        self.commands.push(command);
    }

    fn end_encoding(&mut self, encoder: MtlObject) {
        self.calls.record("end_encoding");
        if !self.open_encoders.remove(&encoder) {
            self.calls.record("violation:end_closed");
        }
    }

    fn sample_counter(&mut self, command_buffer: MtlObject, buffer: MtlObject, index: u32) {
        self.calls.record("sample_counter");
        if let Some(work) = self.pending(command_buffer) {
            work.samples.push((buffer, index));
        }
    }

    fn encode_signal_event(&mut self, command_buffer: MtlObject, event: MtlObject, value: u64) {
        self.calls.record("encode_signal_event");
        if let Some(work) = self.pending(command_buffer) {
            work.signals.push((event, value));
        }
    }

    fn commit(&mut self, command_buffer: MtlObject, present: bool) {
        self.calls.record("commit");
        if present {
            self.calls.record("present_drawable");
        }
        let Some(Object::CommandBuffer(work)) = self.objects.remove(&command_buffer.0) else {
            self.calls.record("violation:commit_unknown");
            return;
        };
        if work.encoders.iter().any(|e| self.open_encoders.contains(e)) {
            self.calls.record("violation:commit_with_open_encoder");
        }
        for (buffer, index) in work.samples {
            self.clock_ns += 1_000;
            if let Some(Object::Counters { samples }) = self.objects.get_mut(&buffer.0) {
                if let Some(slot) = samples.get_mut(index as usize) {
                    *slot = Some(self.clock_ns);
                }
            }
        }
        for (event, value) in work.signals {
            if let Some(Object::Event { value: current }) = self.objects.get_mut(&event.0) {
                *current = (*current).max(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_apply_at_commit() {
        let mut mtl = HeadlessMetal::new();
        let event = mtl.new_shared_event().unwrap();
        let cb = mtl.new_command_buffer().unwrap();
        mtl.encode_signal_event(cb, event, 3);
        assert!(!mtl.wait_event(event, 3, 0));
        mtl.commit(cb, false);
        assert!(mtl.wait_event(event, 3, 0));
    }

    #[test]
    fn missing_entry_point_fails() {
        let mut mtl = HeadlessMetal::new();
        let lib = mtl.new_library("vertex float4 vs_main() {}").unwrap();
        assert!(mtl.new_function(lib, "vs_main").is_ok());
        assert!(mtl.new_function(lib, "fs_main").is_err());
    }

    #[test]
    fn encoding_into_closed_encoder_is_flagged() {
        let mut mtl = HeadlessMetal::new();
        let log = mtl.call_log();
        let cb = mtl.new_command_buffer().unwrap();
        let enc = mtl.new_compute_encoder(cb).unwrap();
        mtl.end_encoding(enc);
        mtl.encode(enc, EncoderCommand::MemoryBarrier);
        assert_eq!(log.count("violation:encode_closed"), 1);
    }
}
