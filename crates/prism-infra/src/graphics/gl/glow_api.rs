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

//! [`GlApi`] over a live `glow` context.
//!
//! The platform layer creates the context and makes it current; every call
//! below assumes it stays current on the calling thread for the lifetime of
//! the [`GlowApi`].

use super::api::{GlApi, GlAttachment, GlName, GlSyncStatus};
use super::conversions::{min_filter, GlFormat, IntoGl};
use glow::HasContext;
use prism_core::rhi::{
    BlendState, BufferUsage, Caps, CullMode, DepthBiasState, DepthStencilState, FrontFace,
    IndexFormat, PrimitiveTopology, RasterState, SamplerDesc, ScissorRect, ShaderCode,
    ShaderStage, TextureDesc, TextureKind, VertexFormat, VertexLayout, VertexStepMode, Viewport,
};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;

/// Texture unit used while creating and uploading textures, so that the
/// units tracked by the command list are never disturbed.
const SCRATCH_UNIT: u32 = 31;

/// Wraps a name coming back from GL into the typed native handle.
macro_rules! native {
    ($ty:ident, $name:expr) => {
        NonZeroU32::new($name).map(glow::$ty)
    };
}

/// An OpenGL 4.5 core context driven through `glow`.
pub struct GlowApi {
    gl: glow::Context,
    caps: Caps,
    syncs: HashMap<GlName, glow::Fence>,
    next_sync: GlName,
    vao: Option<glow::NativeVertexArray>,
    framebuffer: Option<glow::NativeFramebuffer>,
}

impl fmt::Debug for GlowApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlowApi")
            .field("caps", &self.caps)
            .field("live_syncs", &self.syncs.len())
            .finish()
    }
}

impl GlowApi {
    /// Queries the context limits and wraps it.
    pub fn new(gl: glow::Context) -> Self {
        // SAFETY: the caller hands over a current context.
        let caps = unsafe {
            let version = gl.version();
            let anisotropic = version.major > 4
                || (version.major == 4 && version.minor >= 6)
                || gl
                    .supported_extensions()
                    .contains("GL_EXT_texture_filter_anisotropic");
            let max_anisotropy = if anisotropic {
                gl.get_parameter_f32(glow::MAX_TEXTURE_MAX_ANISOTROPY_EXT)
            } else {
                1.0
            };
            let max_color_attachments = gl.get_parameter_i32(glow::MAX_COLOR_ATTACHMENTS);
            log::info!(
                "GlowApi: OpenGL {}.{} ({})",
                version.major,
                version.minor,
                version.vendor_info
            );
            Caps {
                anisotropic_filtering: anisotropic,
                max_anisotropy,
                max_color_attachments: max_color_attachments.max(1) as u32,
                ..Caps::opengl()
            }
        };
        Self {
            gl,
            caps,
            syncs: HashMap::new(),
            next_sync: 1,
            vao: None,
            framebuffer: None,
        }
    }

    fn restore_bindings(&self) {
        // SAFETY: context is current; handles are ours.
        unsafe {
            self.gl.bind_vertex_array(self.vao);
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, self.framebuffer);
        }
    }
}

fn set_enabled(gl: &glow::Context, cap: u32, enabled: bool) {
    // SAFETY: plain state toggle on the current context.
    unsafe {
        if enabled {
            gl.enable(cap);
        } else {
            gl.disable(cap);
        }
    }
}

impl GlApi for GlowApi {
    fn caps(&self) -> Caps {
        self.caps
    }

    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        host_visible: bool,
    ) -> Result<GlName, String> {
        let size = i32::try_from(size).map_err(|_| format!("buffer size {size} exceeds GLsizei"))?;
        let hint = if host_visible || usage.contains(BufferUsage::UNIFORM) {
            glow::DYNAMIC_DRAW
        } else {
            glow::STATIC_DRAW
        };
        // SAFETY: context is current.
        unsafe {
            let buffer = self.gl.create_buffer()?;
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(buffer));
            self.gl.buffer_data_size(glow::COPY_WRITE_BUFFER, size, hint);
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
            Ok(buffer.0.get())
        }
    }

    fn buffer_sub_data(&mut self, buffer: GlName, offset: u64, data: &[u8]) {
        // SAFETY: the device bounds-checked the range.
        unsafe {
            self.gl
                .bind_buffer(glow::COPY_WRITE_BUFFER, native!(NativeBuffer, buffer));
            self.gl
                .buffer_sub_data_u8_slice(glow::COPY_WRITE_BUFFER, offset as i32, data);
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
        }
    }

    fn delete_buffer(&mut self, buffer: GlName) {
        if let Some(buffer) = native!(NativeBuffer, buffer) {
            // SAFETY: name came from create_buffer.
            unsafe { self.gl.delete_buffer(buffer) }
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<GlName, String> {
        let target: u32 = desc.kind.into_gl();
        let GlFormat { internal, .. } = desc.format.into_gl();
        let levels = desc.mip_levels as i32;
        let (w, h, d) = (desc.width as i32, desc.height as i32, desc.depth_or_layers as i32);
        // SAFETY: context is current; the descriptor was validated.
        unsafe {
            let texture = self.gl.create_texture()?;
            self.gl.active_texture(glow::TEXTURE0 + SCRATCH_UNIT);
            self.gl.bind_texture(target, Some(texture));
            match desc.kind {
                TextureKind::D1 => self.gl.tex_storage_1d(target, levels, internal, w),
                TextureKind::D2 | TextureKind::Cube => {
                    self.gl.tex_storage_2d(target, levels, internal, w, h)
                }
                TextureKind::D2Array | TextureKind::D3 => {
                    self.gl.tex_storage_3d(target, levels, internal, w, h, d)
                }
            }
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_MAX_LEVEL, levels - 1);
            self.gl.bind_texture(target, None);
            Ok(texture.0.get())
        }
    }

    fn texture_sub_image(&mut self, texture: GlName, desc: &TextureDesc, mip: u32, data: &[u8]) {
        let target: u32 = desc.kind.into_gl();
        let GlFormat { format, ty, .. } = desc.format.into_gl();
        let level = mip as i32;
        let extent = |v: u32| (v >> mip).max(1) as i32;
        let (w, h) = (extent(desc.width), extent(desc.height));
        // SAFETY: the device checked `data` against the mip size.
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + SCRATCH_UNIT);
            self.gl.bind_texture(target, native!(NativeTexture, texture));
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            match desc.kind {
                TextureKind::D1 => self.gl.tex_sub_image_1d(
                    target,
                    level,
                    0,
                    w,
                    format,
                    ty,
                    glow::PixelUnpackData::Slice(Some(data)),
                ),
                TextureKind::D2 => self.gl.tex_sub_image_2d(
                    target,
                    level,
                    0,
                    0,
                    w,
                    h,
                    format,
                    ty,
                    glow::PixelUnpackData::Slice(Some(data)),
                ),
                TextureKind::Cube => {
                    let face_size = data.len() / 6;
                    for (face, bytes) in data.chunks_exact(face_size.max(1)).enumerate() {
                        self.gl.tex_sub_image_2d(
                            glow::TEXTURE_CUBE_MAP_POSITIVE_X + face as u32,
                            level,
                            0,
                            0,
                            w,
                            h,
                            format,
                            ty,
                            glow::PixelUnpackData::Slice(Some(bytes)),
                        );
                    }
                }
                TextureKind::D2Array | TextureKind::D3 => {
                    let depth = if desc.kind == TextureKind::D3 {
                        extent(desc.depth_or_layers)
                    } else {
                        desc.depth_or_layers as i32
                    };
                    self.gl.tex_sub_image_3d(
                        target,
                        level,
                        0,
                        0,
                        0,
                        w,
                        h,
                        depth,
                        format,
                        ty,
                        glow::PixelUnpackData::Slice(Some(data)),
                    )
                }
            }
            self.gl.bind_texture(target, None);
        }
    }

    fn delete_texture(&mut self, texture: GlName) {
        if let Some(texture) = native!(NativeTexture, texture) {
            // SAFETY: name came from create_texture.
            unsafe { self.gl.delete_texture(texture) }
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDesc, max_anisotropy: f32) -> Result<GlName, String> {
        // SAFETY: context is current.
        unsafe {
            let sampler = self.gl.create_sampler()?;
            let has_mips = desc.lod_max > 0.0;
            let int = |pname, value: i32| self.gl.sampler_parameter_i32(sampler, pname, value);
            int(
                glow::TEXTURE_MIN_FILTER,
                min_filter(desc.min_filter, desc.mip_filter, has_mips),
            );
            int(glow::TEXTURE_MAG_FILTER, desc.mag_filter.into_gl());
            int(glow::TEXTURE_WRAP_S, desc.address_u.into_gl());
            int(glow::TEXTURE_WRAP_T, desc.address_v.into_gl());
            int(glow::TEXTURE_WRAP_R, desc.address_w.into_gl());
            if let Some(compare) = desc.compare {
                int(
                    glow::TEXTURE_COMPARE_MODE,
                    glow::COMPARE_REF_TO_TEXTURE as i32,
                );
                int(glow::TEXTURE_COMPARE_FUNC, compare.into_gl() as i32);
            }
            self.gl
                .sampler_parameter_f32(sampler, glow::TEXTURE_MIN_LOD, desc.lod_min);
            self.gl
                .sampler_parameter_f32(sampler, glow::TEXTURE_MAX_LOD, desc.lod_max);
            if max_anisotropy > 1.0 {
                self.gl.sampler_parameter_f32(
                    sampler,
                    glow::TEXTURE_MAX_ANISOTROPY_EXT,
                    max_anisotropy,
                );
            }
            Ok(sampler.0.get())
        }
    }

    fn delete_sampler(&mut self, sampler: GlName) {
        if let Some(sampler) = native!(NativeSampler, sampler) {
            // SAFETY: name came from create_sampler.
            unsafe { self.gl.delete_sampler(sampler) }
        }
    }

    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        code: &ShaderCode,
        _entry_point: &str,
    ) -> Result<GlName, String> {
        let source = match code {
            ShaderCode::Glsl(source) => source,
            ShaderCode::SpirV(_) => {
                return Err("SPIR-V modules need GL_ARB_gl_spirv, which GlowApi does not load".into())
            }
            ShaderCode::Msl(_) => return Err("Metal shading language is not accepted".into()),
        };
        // SAFETY: context is current.
        unsafe {
            let shader = self.gl.create_shader(stage.into_gl())?;
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            if !self.gl.get_shader_compile_status(shader) {
                let log = self.gl.get_shader_info_log(shader);
                self.gl.delete_shader(shader);
                return Err(log);
            }
            Ok(shader.0.get())
        }
    }

    fn delete_shader(&mut self, shader: GlName) {
        if let Some(shader) = native!(NativeShader, shader) {
            // SAFETY: name came from compile_shader.
            unsafe { self.gl.delete_shader(shader) }
        }
    }

    fn link_program(&mut self, shaders: &[GlName]) -> Result<GlName, String> {
        let shaders: Vec<glow::NativeShader> = shaders
            .iter()
            .map(|&s| native!(NativeShader, s).ok_or_else(|| "null shader name".to_string()))
            .collect::<Result<_, _>>()?;
        // SAFETY: context is current; shaders are live.
        unsafe {
            let program = self.gl.create_program()?;
            for &shader in &shaders {
                self.gl.attach_shader(program, shader);
            }
            self.gl.link_program(program);
            for &shader in &shaders {
                self.gl.detach_shader(program, shader);
            }
            if !self.gl.get_program_link_status(program) {
                let log = self.gl.get_program_info_log(program);
                self.gl.delete_program(program);
                return Err(log);
            }
            Ok(program.0.get())
        }
    }

    fn delete_program(&mut self, program: GlName) {
        if let Some(program) = native!(NativeProgram, program) {
            // SAFETY: name came from link_program.
            unsafe { self.gl.delete_program(program) }
        }
    }

    fn create_vertex_array(&mut self, layouts: &[VertexLayout]) -> Result<GlName, String> {
        // SAFETY: context is current; the previous VAO is restored below.
        unsafe {
            let vao = self.gl.create_vertex_array()?;
            self.gl.bind_vertex_array(Some(vao));
            for (slot, layout) in layouts.iter().enumerate() {
                let binding = slot as u32;
                for attr in &layout.attributes {
                    self.gl.enable_vertex_attrib_array(attr.location);
                    match attr.format {
                        VertexFormat::Uint32 => self.gl.vertex_attrib_format_i32(
                            attr.location,
                            1,
                            glow::UNSIGNED_INT,
                            attr.offset,
                        ),
                        VertexFormat::Unorm8x4 => self.gl.vertex_attrib_format_f32(
                            attr.location,
                            4,
                            glow::UNSIGNED_BYTE,
                            true,
                            attr.offset,
                        ),
                        other => self.gl.vertex_attrib_format_f32(
                            attr.location,
                            other.components() as i32,
                            glow::FLOAT,
                            false,
                            attr.offset,
                        ),
                    }
                    self.gl.vertex_attrib_binding(attr.location, binding);
                }
                let divisor = u32::from(layout.step_mode == VertexStepMode::Instance);
                self.gl.vertex_binding_divisor(binding, divisor);
            }
            self.restore_bindings();
            Ok(vao.0.get())
        }
    }

    fn delete_vertex_array(&mut self, vao: GlName) {
        if let Some(vao) = native!(NativeVertexArray, vao) {
            if self.vao == Some(vao) {
                self.vao = None;
            }
            // SAFETY: name came from create_vertex_array.
            unsafe { self.gl.delete_vertex_array(vao) }
        }
    }

    fn create_framebuffer(
        &mut self,
        colors: &[GlAttachment],
        depth: Option<GlAttachment>,
    ) -> Result<GlName, String> {
        // SAFETY: context is current; the previous framebuffer is restored.
        unsafe {
            let fb = self.gl.create_framebuffer()?;
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fb));
            let mut draw_buffers = Vec::with_capacity(colors.len());
            for (i, attachment) in colors.iter().enumerate() {
                let point = glow::COLOR_ATTACHMENT0 + i as u32;
                self.gl.framebuffer_texture(
                    glow::FRAMEBUFFER,
                    point,
                    native!(NativeTexture, attachment.texture),
                    0,
                );
                draw_buffers.push(point);
            }
            if let Some(depth) = depth {
                let point = if depth.format.has_stencil() {
                    glow::DEPTH_STENCIL_ATTACHMENT
                } else {
                    glow::DEPTH_ATTACHMENT
                };
                self.gl.framebuffer_texture(
                    glow::FRAMEBUFFER,
                    point,
                    native!(NativeTexture, depth.texture),
                    0,
                );
            }
            if draw_buffers.is_empty() {
                self.gl.draw_buffer(glow::NONE);
            } else {
                self.gl.draw_buffers(&draw_buffers);
            }
            self.restore_bindings();
            Ok(fb.0.get())
        }
    }

    fn framebuffer_complete(&mut self, framebuffer: GlName) -> Result<(), String> {
        // SAFETY: context is current.
        let status = unsafe {
            self.gl
                .bind_framebuffer(glow::FRAMEBUFFER, native!(NativeFramebuffer, framebuffer));
            let status = self.gl.check_framebuffer_status(glow::FRAMEBUFFER);
            self.restore_bindings();
            status
        };
        match status {
            glow::FRAMEBUFFER_COMPLETE => Ok(()),
            glow::FRAMEBUFFER_INCOMPLETE_ATTACHMENT => {
                Err("GL_FRAMEBUFFER_INCOMPLETE_ATTACHMENT".into())
            }
            glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT => {
                Err("GL_FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT".into())
            }
            glow::FRAMEBUFFER_UNSUPPORTED => Err("GL_FRAMEBUFFER_UNSUPPORTED".into()),
            other => Err(format!("framebuffer status {other:#06x}")),
        }
    }

    fn delete_framebuffer(&mut self, framebuffer: GlName) {
        if let Some(fb) = native!(NativeFramebuffer, framebuffer) {
            if self.framebuffer == Some(fb) {
                self.framebuffer = None;
            }
            // SAFETY: name came from create_framebuffer.
            unsafe { self.gl.delete_framebuffer(fb) }
        }
    }

    fn create_query(&mut self) -> Result<GlName, String> {
        // SAFETY: context is current.
        unsafe { self.gl.create_query().map(|q| q.0.get()) }
    }

    fn delete_query(&mut self, query: GlName) {
        if let Some(query) = native!(NativeQuery, query) {
            // SAFETY: name came from create_query.
            unsafe { self.gl.delete_query(query) }
        }
    }

    fn begin_time_query(&mut self, query: GlName) {
        if let Some(query) = native!(NativeQuery, query) {
            // SAFETY: context is current.
            unsafe { self.gl.begin_query(glow::TIME_ELAPSED, query) }
        }
    }

    fn end_time_query(&mut self) {
        // SAFETY: context is current.
        unsafe { self.gl.end_query(glow::TIME_ELAPSED) }
    }

    fn timestamp(&mut self, query: GlName) {
        if let Some(query) = native!(NativeQuery, query) {
            // SAFETY: context is current.
            unsafe { self.gl.query_counter(query, glow::TIMESTAMP) }
        }
    }

    fn query_result(&mut self, query: GlName) -> Option<u64> {
        let query = native!(NativeQuery, query)?;
        // SAFETY: context is current.
        unsafe {
            if self
                .gl
                .get_query_parameter_u32(query, glow::QUERY_RESULT_AVAILABLE)
                == 0
            {
                return None;
            }
            Some(u64::from(
                self.gl.get_query_parameter_u32(query, glow::QUERY_RESULT),
            ))
        }
    }

    fn fence_sync(&mut self) -> Result<GlName, String> {
        // SAFETY: context is current.
        let sync = unsafe { self.gl.fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0)? };
        let name = self.next_sync;
        self.next_sync += 1;
        self.syncs.insert(name, sync);
        Ok(name)
    }

    fn client_wait_sync(&mut self, sync: GlName, timeout_ns: u64) -> GlSyncStatus {
        let Some(&fence) = self.syncs.get(&sync) else {
            return GlSyncStatus::Failed;
        };
        let infinite = timeout_ns == u64::MAX;
        let step = timeout_ns.min(i32::MAX as u64) as i32;
        loop {
            // SAFETY: the fence is live until delete_sync.
            let status = unsafe {
                self.gl
                    .client_wait_sync(fence, glow::SYNC_FLUSH_COMMANDS_BIT, step)
            };
            match status {
                glow::ALREADY_SIGNALED | glow::CONDITION_SATISFIED => {
                    return GlSyncStatus::Signaled
                }
                glow::TIMEOUT_EXPIRED if infinite => continue,
                glow::TIMEOUT_EXPIRED => return GlSyncStatus::TimedOut,
                _ => return GlSyncStatus::Failed,
            }
        }
    }

    fn delete_sync(&mut self, sync: GlName) {
        if let Some(fence) = self.syncs.remove(&sync) {
            // SAFETY: removed from the table, never used again.
            unsafe { self.gl.delete_sync(fence) }
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: GlName) {
        self.framebuffer = native!(NativeFramebuffer, framebuffer);
        // SAFETY: context is current.
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, self.framebuffer) }
    }

    fn clear(&mut self, colors: &[Option<[f32; 4]>], depth: Option<f32>, stencil: Option<u32>) {
        // SAFETY: context is current.
        unsafe {
            self.gl.disable(glow::SCISSOR_TEST);
            for (i, color) in colors.iter().enumerate() {
                if let Some(color) = color {
                    self.gl
                        .clear_buffer_f32_slice(glow::COLOR, i as u32, color);
                }
            }
            if let Some(depth) = depth {
                self.gl.depth_mask(true);
                self.gl.clear_buffer_f32_slice(glow::DEPTH, 0, &[depth]);
            }
            if let Some(stencil) = stencil {
                self.gl
                    .clear_buffer_i32_slice(glow::STENCIL, 0, &[stencil as i32]);
            }
        }
    }

    fn use_program(&mut self, program: GlName) {
        // SAFETY: context is current.
        unsafe { self.gl.use_program(native!(NativeProgram, program)) }
    }

    fn bind_vertex_array(&mut self, vao: GlName) {
        self.vao = native!(NativeVertexArray, vao);
        // SAFETY: context is current.
        unsafe { self.gl.bind_vertex_array(self.vao) }
    }

    fn set_blend(&mut self, blend: &BlendState) {
        set_enabled(&self.gl, glow::BLEND, blend.enabled);
        if !blend.enabled {
            return;
        }
        // SAFETY: context is current.
        unsafe {
            self.gl.blend_func_separate(
                blend.src_color.into_gl(),
                blend.dst_color.into_gl(),
                blend.src_alpha.into_gl(),
                blend.dst_alpha.into_gl(),
            );
            self.gl
                .blend_equation_separate(blend.color_op.into_gl(), blend.alpha_op.into_gl());
        }
    }

    fn set_raster(&mut self, raster: &RasterState) {
        set_enabled(&self.gl, glow::CULL_FACE, raster.cull_mode != CullMode::None);
        // SAFETY: context is current.
        unsafe {
            match raster.cull_mode {
                CullMode::Front => self.gl.cull_face(glow::FRONT),
                CullMode::Back => self.gl.cull_face(glow::BACK),
                CullMode::None => {}
            }
            self.gl.front_face(match raster.front_face {
                FrontFace::Ccw => glow::CCW,
                FrontFace::Cw => glow::CW,
            });
            self.gl.polygon_mode(
                glow::FRONT_AND_BACK,
                if raster.wireframe { glow::LINE } else { glow::FILL },
            );
        }
    }

    fn set_depth_state(&mut self, state: &DepthStencilState) {
        set_enabled(&self.gl, glow::DEPTH_TEST, state.depth_test);
        // SAFETY: context is current.
        unsafe {
            self.gl.depth_mask(state.depth_write);
            self.gl.depth_func(state.depth_compare.into_gl());
        }
    }

    fn set_depth_bias(&mut self, bias: &DepthBiasState) {
        set_enabled(&self.gl, glow::POLYGON_OFFSET_FILL, bias.is_enabled());
        // SAFETY: context is current.
        unsafe { self.gl.polygon_offset(bias.slope_scale, bias.constant) }
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        // SAFETY: context is current.
        unsafe {
            self.gl.viewport(
                viewport.x as i32,
                viewport.y as i32,
                viewport.width as i32,
                viewport.height as i32,
            );
            self.gl
                .depth_range_f32(viewport.min_depth, viewport.max_depth);
        }
    }

    fn set_scissor(&mut self, rect: Option<&ScissorRect>) {
        set_enabled(&self.gl, glow::SCISSOR_TEST, rect.is_some());
        if let Some(rect) = rect {
            // SAFETY: context is current.
            unsafe {
                self.gl
                    .scissor(rect.x, rect.y, rect.width as i32, rect.height as i32)
            }
        }
    }

    fn bind_vertex_buffer(&mut self, slot: u32, buffer: GlName, offset: u64, stride: u32) {
        // SAFETY: context is current; a VAO is bound.
        unsafe {
            self.gl.bind_vertex_buffer(
                slot,
                native!(NativeBuffer, buffer),
                offset as i32,
                stride as i32,
            )
        }
    }

    fn bind_index_buffer(&mut self, buffer: GlName) {
        // SAFETY: context is current; a VAO is bound.
        unsafe {
            self.gl
                .bind_buffer(glow::ELEMENT_ARRAY_BUFFER, native!(NativeBuffer, buffer))
        }
    }

    fn bind_uniform_range(&mut self, binding: u32, buffer: GlName, offset: u64, size: u64) {
        // SAFETY: context is current; range checked by the caller.
        unsafe {
            self.gl.bind_buffer_range(
                glow::UNIFORM_BUFFER,
                binding,
                native!(NativeBuffer, buffer),
                offset as i32,
                size as i32,
            )
        }
    }

    fn bind_texture(&mut self, unit: u32, kind: TextureKind, texture: GlName, sampler: GlName) {
        // SAFETY: context is current.
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl
                .bind_texture(kind.into_gl(), native!(NativeTexture, texture));
            self.gl.bind_sampler(unit, native!(NativeSampler, sampler));
        }
    }

    fn draw_arrays(&mut self, topology: PrimitiveTopology, first: u32, count: u32, instances: u32) {
        // SAFETY: context is current.
        unsafe {
            self.gl.draw_arrays_instanced(
                topology.into_gl(),
                first as i32,
                count as i32,
                instances as i32,
            )
        }
    }

    fn draw_elements(
        &mut self,
        topology: PrimitiveTopology,
        count: u32,
        format: IndexFormat,
        byte_offset: u64,
        instances: u32,
        base_vertex: i32,
    ) {
        // SAFETY: context is current; an element buffer is bound.
        unsafe {
            self.gl.draw_elements_instanced_base_vertex(
                topology.into_gl(),
                count as i32,
                format.into_gl(),
                byte_offset as i32,
                instances as i32,
                base_vertex,
            )
        }
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        // SAFETY: context is current.
        unsafe { self.gl.dispatch_compute(x, y, z) }
    }

    fn memory_barrier(&mut self) {
        // SAFETY: context is current.
        unsafe { self.gl.memory_barrier(glow::ALL_BARRIER_BITS) }
    }

    fn flush(&mut self) {
        // SAFETY: context is current.
        unsafe { self.gl.flush() }
    }
}
