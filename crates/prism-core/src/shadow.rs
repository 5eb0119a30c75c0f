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

//! Directional shadow map resources and light-space matrices.

use crate::rhi::{
    AddressMode, Caps, CompareFunction, DepthAttachment, DepthBiasState, Device, FilterMode,
    Format, FramebufferDesc, FramebufferHandle, LoadOp, RenderPassDesc, ResourceError,
    SamplerDesc, SamplerHandle, StoreOp, TextureDesc, TextureHandle, TextureUsage,
};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Shadow map extent and light frustum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowSettings {
    /// Square depth texture size in texels.
    pub resolution: u32,
    /// Near plane of the light frustum.
    pub near: f32,
    /// Far plane of the light frustum.
    pub far: f32,
    /// Half extent of the orthographic frustum.
    pub ortho_size: f32,
    /// Depth bias applied while rendering the shadow pass.
    pub depth_bias: DepthBiasState,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            resolution: 2048,
            near: 1.0,
            far: 100.0,
            ortho_size: 25.0,
            depth_bias: DepthBiasState {
                constant: 1.25,
                slope_scale: 1.75,
                clamp: 0.0,
            },
        }
    }
}

/// The shadow-casting directional light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowLight {
    /// Eye position of the light frustum.
    pub position: Vec3,
    /// Direction the light travels.
    pub direction: Vec3,
}

impl Default for ShadowLight {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 20.0, 0.0),
            direction: Vec3::new(-0.3, -1.0, -0.2),
        }
    }
}

/// GPU layout of the shadow uniforms.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShadowUniforms {
    /// Light view-projection, column major.
    pub light_view_projection: [[f32; 4]; 4],
    /// `(1 / resolution, constant bias, slope bias, 0)`.
    pub params: [f32; 4],
}

/// A depth-only render target seen from a directional light.
#[derive(Debug)]
pub struct ShadowMap {
    settings: ShadowSettings,
    light: ShadowLight,
    correction: Mat4,
    depth_texture: TextureHandle,
    framebuffer: FramebufferHandle,
    sampler: SamplerHandle,
    light_view: Mat4,
    light_projection: Mat4,
    light_view_projection: Mat4,
}

impl ShadowMap {
    /// Format of the depth texture.
    pub const DEPTH_FORMAT: Format = Format::Depth32Float;

    /// Creates the depth texture, its framebuffer and, when the device
    /// supports depth comparison, a compare sampler; then derives the matrices.
    ///
    /// Backends that bind attachments per pass instead of through framebuffer
    /// objects may report framebuffer creation as unsupported; the map then
    /// renders through [`ShadowMap::render_pass`] attachments only.
    pub fn initialize(
        device: &mut dyn Device,
        settings: ShadowSettings,
        light: ShadowLight,
    ) -> Result<Self, ResourceError> {
        let mut map = Self {
            settings,
            light,
            correction: device.caps().clip_space_correction(),
            depth_texture: TextureHandle::NONE,
            framebuffer: FramebufferHandle::NONE,
            sampler: SamplerHandle::NONE,
            light_view: Mat4::IDENTITY,
            light_projection: Mat4::IDENTITY,
            light_view_projection: Mat4::IDENTITY,
        };
        map.create_resources(device)?;
        map.compute_matrices();
        Ok(map)
    }

    fn create_resources(&mut self, device: &mut dyn Device) -> Result<(), ResourceError> {
        if self.settings.resolution == 0 {
            return Err(ResourceError::InvalidDescriptor(
                "shadow map resolution must be > 0".into(),
            ));
        }
        let mut desc = TextureDesc::d2(
            self.settings.resolution,
            self.settings.resolution,
            Self::DEPTH_FORMAT,
            TextureUsage::DEPTH_STENCIL | TextureUsage::SAMPLED,
        );
        desc.label = Some("ShadowMap depth".into());
        self.depth_texture = device.create_texture(&desc)?;

        self.framebuffer = optional(device.create_framebuffer(&FramebufferDesc {
            label: Some("ShadowMap".into()),
            color_attachments: Vec::new(),
            depth_attachment: self.depth_texture,
        }))?;

        let caps: Caps = *device.caps();
        if caps.sampler_compare {
            self.sampler = optional(device.create_sampler(&SamplerDesc {
                label: Some("ShadowMap compare".into()),
                min_filter: FilterMode::Linear,
                mag_filter: FilterMode::Linear,
                mip_filter: FilterMode::Nearest,
                address_u: AddressMode::ClampToEdge,
                address_v: AddressMode::ClampToEdge,
                address_w: AddressMode::ClampToEdge,
                compare: Some(CompareFunction::LessEqual),
                lod_max: 0.0,
                ..Default::default()
            }))?;
        }
        Ok(())
    }

    /// Re-derives the light view and the corrected orthographic projection.
    pub fn compute_matrices(&mut self) {
        let direction = self.light.direction.try_normalize().unwrap_or(Vec3::NEG_Y);
        let up = if direction.dot(Vec3::Y).abs() > 0.99 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let eye = self.light.position;
        self.light_view = Mat4::look_at_rh(eye, eye + direction, up);

        let s = self.settings.ortho_size;
        let ortho = Mat4::orthographic_rh_gl(-s, s, -s, s, self.settings.near, self.settings.far);
        self.light_projection = self.correction * ortho;
        self.light_view_projection = self.light_projection * self.light_view;
    }

    /// Moves the light.
    pub fn set_light(&mut self, light: ShadowLight) {
        self.light = light;
        self.compute_matrices();
    }

    /// Replaces the settings, recreating the GPU resources when the
    /// resolution changes.
    pub fn set_settings(
        &mut self,
        device: &mut dyn Device,
        settings: ShadowSettings,
    ) -> Result<(), ResourceError> {
        let resize = settings.resolution != self.settings.resolution;
        self.settings = settings;
        if resize {
            self.destroy(device)?;
            self.create_resources(device)?;
        }
        self.compute_matrices();
        Ok(())
    }

    /// A depth-only pass clearing the shadow map to the far plane.
    pub fn render_pass(&self) -> RenderPassDesc {
        RenderPassDesc {
            label: Some("ShadowMap".into()),
            framebuffer: self.framebuffer,
            color_attachments: Vec::new(),
            depth_attachment: Some(DepthAttachment {
                texture: self.depth_texture,
                load: LoadOp::Clear,
                store: StoreOp::Store,
                clear_depth: 1.0,
                clear_stencil: 0,
            }),
        }
    }

    /// Values for the shader-side shadow lookup.
    pub fn uniforms(&self) -> ShadowUniforms {
        ShadowUniforms {
            light_view_projection: self.light_view_projection.to_cols_array_2d(),
            params: [
                1.0 / self.settings.resolution as f32,
                self.settings.depth_bias.constant,
                self.settings.depth_bias.slope_scale,
                0.0,
            ],
        }
    }

    /// Releases the GPU resources.
    pub fn destroy(&mut self, device: &mut dyn Device) -> Result<(), ResourceError> {
        if self.sampler.id != 0 {
            device.destroy_sampler(std::mem::take(&mut self.sampler))?;
        }
        if self.framebuffer.id != 0 {
            device.destroy_framebuffer(std::mem::take(&mut self.framebuffer))?;
        }
        if self.depth_texture.id != 0 {
            device.destroy_texture(std::mem::take(&mut self.depth_texture))?;
        }
        Ok(())
    }

    /// Current settings.
    pub fn settings(&self) -> &ShadowSettings {
        &self.settings
    }

    /// Current light.
    pub fn light(&self) -> &ShadowLight {
        &self.light
    }

    /// The depth texture.
    pub fn depth_texture(&self) -> TextureHandle {
        self.depth_texture
    }

    /// The framebuffer, or none on backends without framebuffer objects.
    pub fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffer
    }

    /// The compare sampler, or none when unsupported.
    pub fn sampler(&self) -> SamplerHandle {
        self.sampler
    }

    /// World to light view space.
    pub fn light_view(&self) -> Mat4 {
        self.light_view
    }

    /// Corrected light projection.
    pub fn light_projection(&self) -> Mat4 {
        self.light_projection
    }

    /// `light_projection * light_view`.
    pub fn light_view_projection(&self) -> Mat4 {
        self.light_view_projection
    }
}

/// Maps an `Unsupported` creation error to the none handle.
fn optional<H: Default>(result: Result<H, ResourceError>) -> Result<H, ResourceError> {
    match result {
        Err(ResourceError::Unsupported { backend, operation }) => {
            log::debug!("ShadowMap: {operation} unsupported on {backend}, continuing without it");
            Ok(H::default())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn matrices_for(caps: Caps, light: ShadowLight) -> (Mat4, Mat4) {
        let mut map = ShadowMap {
            settings: ShadowSettings::default(),
            light,
            correction: caps.clip_space_correction(),
            depth_texture: TextureHandle::NONE,
            framebuffer: FramebufferHandle::NONE,
            sampler: SamplerHandle::NONE,
            light_view: Mat4::IDENTITY,
            light_projection: Mat4::IDENTITY,
            light_view_projection: Mat4::IDENTITY,
        };
        map.compute_matrices();
        (map.light_projection(), map.light_view_projection())
    }

    const DOWN_Z: ShadowLight = ShadowLight {
        position: Vec3::ZERO,
        direction: Vec3::NEG_Z,
    };

    #[test]
    fn gl_projection_is_plain_orthographic() {
        let (proj, _) = matrices_for(Caps::opengl(), DOWN_Z);
        assert_relative_eq!(proj.col(1).y, 0.04, epsilon = 1e-6);
        assert_relative_eq!(proj.col(2).z, -2.0 / 99.0, epsilon = 1e-6);
        assert_relative_eq!(proj.col(3).z, -101.0 / 99.0, epsilon = 1e-6);
    }

    #[test]
    fn y_down_zero_to_one_correction_is_applied() {
        let (proj, view_proj) = matrices_for(Caps::vulkan(), DOWN_Z);
        assert_relative_eq!(proj.col(1).y, -0.04, epsilon = 1e-6);
        assert_relative_eq!(proj.col(2).z, -1.0 / 99.0, epsilon = 1e-6);
        assert_relative_eq!(proj.col(3).z, -1.0 / 99.0, epsilon = 1e-6);
        // Looking down -Z from the origin the view is the identity.
        assert!(view_proj.abs_diff_eq(proj, 1e-6));
    }

    #[test]
    fn vertical_light_uses_alternate_up() {
        let light = ShadowLight {
            position: Vec3::new(0.0, 50.0, 0.0),
            direction: Vec3::NEG_Y,
        };
        let (_, view_proj) = matrices_for(Caps::opengl(), light);
        assert!(view_proj.is_finite());
        // The light's own position projects to the center of the map.
        let center = view_proj.project_point3(light.position + Vec3::NEG_Y * 10.0);
        assert_relative_eq!(center.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(center.y, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn uniforms_are_pod() {
        let u = ShadowUniforms::zeroed();
        assert_eq!(bytemuck::bytes_of(&u).len(), 80);
    }
}
