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

//! An in-memory [`GlApi`] for tests and offscreen tooling.
//!
//! Objects live in a name table, shader "compilation" checks the input
//! format, and every entry point bumps a counter in a shared [`CallLog`].

use super::api::{GlApi, GlAttachment, GlName, GlSyncStatus};
use prism_core::rhi::{
    BlendState, BufferUsage, Caps, DepthBiasState, DepthStencilState, IndexFormat,
    PrimitiveTopology, RasterState, SamplerDesc, ScissorRect, ShaderCode, ShaderStage,
    TextureDesc, TextureKind, VertexLayout, Viewport,
};
use crate::graphics::CallLog;
use std::collections::HashMap;

#[derive(Debug)]
enum Object {
    Buffer { data: Vec<u8> },
    Texture,
    Sampler,
    Shader { stage: ShaderStage },
    Program,
    VertexArray,
    Framebuffer { complete: bool },
    Query { result: Option<u64> },
    Sync,
}

/// An emulated OpenGL 4.5 context.
#[derive(Debug)]
pub struct HeadlessGl {
    next_name: GlName,
    objects: HashMap<GlName, Object>,
    calls: CallLog,
    caps: Caps,
    clock_ns: u64,
    active_query: Option<(GlName, u64)>,
}

impl HeadlessGl {
    /// A context reporting desktop GL capabilities.
    pub fn new() -> Self {
        Self::with_caps(Caps::opengl())
    }

    /// A context reporting `caps`.
    pub fn with_caps(caps: Caps) -> Self {
        Self {
            next_name: 1,
            objects: HashMap::new(),
            calls: CallLog::default(),
            caps,
            clock_ns: 0,
            active_query: None,
        }
    }

    /// The shared call counters.
    pub fn call_log(&self) -> CallLog {
        self.calls.clone()
    }

    /// Number of live GL objects.
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    fn alloc(&mut self, object: Object) -> GlName {
        let name = self.next_name;
        self.next_name += 1;
        self.objects.insert(name, object);
        name
    }

    fn delete(&mut self, call: &'static str, name: GlName) {
        self.calls.record(call);
        self.objects.remove(&name);
    }

    fn tick(&mut self) -> u64 {
        self.clock_ns += 1_000;
        self.clock_ns
    }
}

impl Default for HeadlessGl {
    fn default() -> Self {
        Self::new()
    }
}

fn check_spirv(bytes: &[u8]) -> Result<(), String> {
    if bytes.len() < 20 || bytes.len() % 4 != 0 {
        return Err(format!("invalid SPIR-V binary of {} bytes", bytes.len()));
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != spirv::MAGIC_NUMBER && magic.swap_bytes() != spirv::MAGIC_NUMBER {
        return Err(format!("bad SPIR-V magic {magic:#010x}"));
    }
    Ok(())
}

impl GlApi for HeadlessGl {
    fn caps(&self) -> Caps {
        self.caps
    }

    fn create_buffer(
        &mut self,
        size: u64,
        _usage: BufferUsage,
        _host_visible: bool,
    ) -> Result<GlName, String> {
        self.calls.record("create_buffer");
        let size = usize::try_from(size).map_err(|_| "GL_OUT_OF_MEMORY".to_string())?;
        Ok(self.alloc(Object::Buffer {
            data: vec![0; size],
        }))
    }

    fn buffer_sub_data(&mut self, buffer: GlName, offset: u64, data: &[u8]) {
        self.calls.record("buffer_sub_data");
        if let Some(Object::Buffer { data: storage }) = self.objects.get_mut(&buffer) {
            let start = offset as usize;
            if let Some(dst) = storage.get_mut(start..start + data.len()) {
                dst.copy_from_slice(data);
            }
        }
    }

    fn delete_buffer(&mut self, buffer: GlName) {
        self.delete("delete_buffer", buffer);
    }

    fn create_texture(&mut self, _desc: &TextureDesc) -> Result<GlName, String> {
        self.calls.record("create_texture");
        Ok(self.alloc(Object::Texture))
    }

    fn texture_sub_image(&mut self, _texture: GlName, _desc: &TextureDesc, _mip: u32, _data: &[u8]) {
        self.calls.record("texture_sub_image");
    }

    fn delete_texture(&mut self, texture: GlName) {
        self.delete("delete_texture", texture);
    }

    fn create_sampler(&mut self, _desc: &SamplerDesc, _aniso: f32) -> Result<GlName, String> {
        self.calls.record("create_sampler");
        Ok(self.alloc(Object::Sampler))
    }

    fn delete_sampler(&mut self, sampler: GlName) {
        self.delete("delete_sampler", sampler);
    }

    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        code: &ShaderCode,
        _entry_point: &str,
    ) -> Result<GlName, String> {
        self.calls.record("compile_shader");
        match code {
            ShaderCode::Glsl(source) if source.trim().is_empty() => {
                return Err("0:0: error: empty shader source".into())
            }
            ShaderCode::Glsl(source) if source.contains("#error") => {
                return Err("0:1: error: #error directive encountered".into())
            }
            ShaderCode::Glsl(_) => {}
            ShaderCode::SpirV(bytes) => check_spirv(bytes)?,
            ShaderCode::Msl(_) => return Err("Metal shading language is not accepted".into()),
        }
        Ok(self.alloc(Object::Shader { stage }))
    }

    fn delete_shader(&mut self, shader: GlName) {
        self.delete("delete_shader", shader);
    }

    fn link_program(&mut self, shaders: &[GlName]) -> Result<GlName, String> {
        self.calls.record("link_program");
        let mut stages = Vec::with_capacity(shaders.len());
        for name in shaders {
            match self.objects.get(name) {
                Some(Object::Shader { stage }) => stages.push(*stage),
                _ => return Err(format!("link error: {name} is not a shader object")),
            }
        }
        let linkable = matches!(
            stages.as_slice(),
            [ShaderStage::Compute]
                | [ShaderStage::Vertex, ShaderStage::Fragment]
                | [ShaderStage::Fragment, ShaderStage::Vertex]
        );
        if !linkable {
            return Err(format!("link error: incompatible stages {stages:?}"));
        }
        Ok(self.alloc(Object::Program))
    }

    fn delete_program(&mut self, program: GlName) {
        self.delete("delete_program", program);
    }

    fn create_vertex_array(&mut self, _layouts: &[VertexLayout]) -> Result<GlName, String> {
        self.calls.record("create_vertex_array");
        Ok(self.alloc(Object::VertexArray))
    }

    fn delete_vertex_array(&mut self, vao: GlName) {
        self.delete("delete_vertex_array", vao);
    }

    fn create_framebuffer(
        &mut self,
        colors: &[GlAttachment],
        depth: Option<GlAttachment>,
    ) -> Result<GlName, String> {
        self.calls.record("create_framebuffer");
        let attachments_exist = colors
            .iter()
            .chain(depth.iter())
            .all(|a| matches!(self.objects.get(&a.texture), Some(Object::Texture)));
        let complete = attachments_exist
            && (!colors.is_empty() || depth.is_some())
            && colors.iter().all(|a| !a.format.is_depth())
            && depth.map_or(true, |d| d.format.is_depth());
        Ok(self.alloc(Object::Framebuffer { complete }))
    }

    fn framebuffer_complete(&mut self, framebuffer: GlName) -> Result<(), String> {
        self.calls.record("framebuffer_complete");
        match self.objects.get(&framebuffer) {
            Some(Object::Framebuffer { complete: true }) => Ok(()),
            Some(Object::Framebuffer { complete: false }) => {
                Err("GL_FRAMEBUFFER_INCOMPLETE_ATTACHMENT".into())
            }
            _ => Err("GL_FRAMEBUFFER_UNDEFINED".into()),
        }
    }

    fn delete_framebuffer(&mut self, framebuffer: GlName) {
        self.delete("delete_framebuffer", framebuffer);
    }

    fn create_query(&mut self) -> Result<GlName, String> {
        self.calls.record("create_query");
        Ok(self.alloc(Object::Query { result: None }))
    }

    fn delete_query(&mut self, query: GlName) {
        self.delete("delete_query", query);
    }

    fn begin_time_query(&mut self, query: GlName) {
        self.calls.record("begin_time_query");
        let start = self.tick();
        self.active_query = Some((query, start));
    }

    fn end_time_query(&mut self) {
        self.calls.record("end_time_query");
        let end = self.tick();
        if let Some((query, start)) = self.active_query.take() {
            if let Some(Object::Query { result }) = self.objects.get_mut(&query) {
                *result = Some(end - start);
            }
        }
    }

    fn timestamp(&mut self, query: GlName) {
        self.calls.record("timestamp");
        let now = self.tick();
        if let Some(Object::Query { result }) = self.objects.get_mut(&query) {
            *result = Some(now);
        }
    }

    fn query_result(&mut self, query: GlName) -> Option<u64> {
        self.calls.record("query_result");
        match self.objects.get(&query) {
            Some(Object::Query { result }) => *result,
            _ => None,
        }
    }

    fn fence_sync(&mut self) -> Result<GlName, String> {
        self.calls.record("fence_sync");
        Ok(self.alloc(Object::Sync))
    }

    fn client_wait_sync(&mut self, sync: GlName, _timeout_ns: u64) -> GlSyncStatus {
        self.calls.record("client_wait_sync");
        match self.objects.get(&sync) {
            Some(Object::Sync) => GlSyncStatus::Signaled,
            _ => GlSyncStatus::Failed,
        }
    }

    fn delete_sync(&mut self, sync: GlName) {
        self.delete("delete_sync", sync);
    }

    fn bind_framebuffer(&mut self, _framebuffer: GlName) {
        self.calls.record("bind_framebuffer");
    }

    fn clear(&mut self, _colors: &[Option<[f32; 4]>], _depth: Option<f32>, _stencil: Option<u32>) {
        self.calls.record("clear");
    }

    fn use_program(&mut self, _program: GlName) {
        self.calls.record("use_program");
    }

    fn bind_vertex_array(&mut self, _vao: GlName) {
        self.calls.record("bind_vertex_array");
    }

    fn set_blend(&mut self, _blend: &BlendState) {
        self.calls.record("set_blend");
    }

    fn set_raster(&mut self, _raster: &RasterState) {
        self.calls.record("set_raster");
    }

    fn set_depth_state(&mut self, _state: &DepthStencilState) {
        self.calls.record("set_depth_state");
    }

    fn set_depth_bias(&mut self, _bias: &DepthBiasState) {
        self.calls.record("set_depth_bias");
    }

    fn set_viewport(&mut self, _viewport: &Viewport) {
        self.calls.record("set_viewport");
    }

    fn set_scissor(&mut self, _rect: Option<&ScissorRect>) {
        self.calls.record("set_scissor");
    }

    fn bind_vertex_buffer(&mut self, _slot: u32, _buffer: GlName, _offset: u64, _stride: u32) {
        self.calls.record("bind_vertex_buffer");
    }

    fn bind_index_buffer(&mut self, _buffer: GlName) {
        self.calls.record("bind_index_buffer");
    }

    fn bind_uniform_range(&mut self, _binding: u32, _buffer: GlName, _offset: u64, _size: u64) {
        self.calls.record("bind_uniform_range");
    }

    fn bind_texture(&mut self, _unit: u32, _kind: TextureKind, _texture: GlName, _sampler: GlName) {
        self.calls.record("bind_texture");
    }

    fn draw_arrays(&mut self, _t: PrimitiveTopology, _first: u32, _count: u32, _instances: u32) {
        self.calls.record("draw_arrays");
    }

    fn draw_elements(
        &mut self,
        _topology: PrimitiveTopology,
        _count: u32,
        _format: IndexFormat,
        _byte_offset: u64,
        _instances: u32,
        _base_vertex: i32,
    ) {
        self.calls.record("draw_elements");
    }

    fn dispatch_compute(&mut self, _x: u32, _y: u32, _z: u32) {
        self.calls.record("dispatch_compute");
    }

    fn memory_barrier(&mut self) {
        self.calls.record("memory_barrier");
    }

    fn flush(&mut self) {
        self.calls.record("flush");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::rhi::Format;

    #[test]
    fn link_requires_matching_stages() {
        let mut gl = HeadlessGl::new();
        let vs = gl
            .compile_shader(ShaderStage::Vertex, &ShaderCode::Glsl("void main(){}".into()), "main")
            .unwrap();
        let vs2 = gl
            .compile_shader(ShaderStage::Vertex, &ShaderCode::Glsl("void main(){}".into()), "main")
            .unwrap();
        assert!(gl.link_program(&[vs, vs2]).is_err());
    }

    #[test]
    fn error_directive_fails_compilation() {
        let mut gl = HeadlessGl::new();
        let err = gl
            .compile_shader(ShaderStage::Fragment, &ShaderCode::Glsl("#error nope".into()), "main")
            .unwrap_err();
        assert!(err.contains("#error"));
    }

    #[test]
    fn depth_texture_as_color_is_incomplete() {
        let mut gl = HeadlessGl::new();
        let tex = gl
            .create_texture(&TextureDesc::d2(
                4,
                4,
                Format::Depth32Float,
                prism_core::rhi::TextureUsage::DEPTH_STENCIL,
            ))
            .unwrap();
        let fb = gl
            .create_framebuffer(
                &[GlAttachment {
                    texture: tex,
                    kind: TextureKind::D2,
                    format: Format::Depth32Float,
                }],
                None,
            )
            .unwrap();
        assert!(gl.framebuffer_complete(fb).is_err());
    }

    #[test]
    fn call_log_is_shared() {
        let mut gl = HeadlessGl::new();
        let log = gl.call_log();
        gl.flush();
        gl.flush();
        assert_eq!(log.count("flush"), 2);
        log.reset();
        assert_eq!(log.total(), 0);
    }
}
