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

//! Capabilities reported by the active backend.

use glam::{Mat4, Vec4};
use std::fmt;

/// The graphics API a device drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicsBackendType {
    /// OpenGL 4.x core profile.
    OpenGL,
    /// Apple Metal.
    Metal,
    /// Vulkan 1.x.
    Vulkan,
    /// Direct3D 12 (not implemented).
    Dx12,
}

impl fmt::Display for GraphicsBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GraphicsBackendType::OpenGL => "OpenGL",
            GraphicsBackendType::Metal => "Metal",
            GraphicsBackendType::Vulkan => "Vulkan",
            GraphicsBackendType::Dx12 => "DirectX 12",
        };
        f.write_str(name)
    }
}

/// Feature flags discovered from the active backend.
///
/// A `Caps` value is fixed for the lifetime of its device. Code computing
/// projection matrices must go through [`Caps::clip_space_correction`],
/// because backends disagree on the clip-space Y direction and depth range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Caps {
    /// Instanced drawing is available.
    pub instancing: bool,
    /// Anisotropic filtering is available.
    pub anisotropic_filtering: bool,
    /// Largest accepted anisotropy.
    pub max_anisotropy: f32,
    /// Uniform buffer objects are available.
    pub uniform_buffers: bool,
    /// Clip-space Y points down (framebuffer origin top-left).
    pub clip_space_y_down: bool,
    /// Depth-compare samplers are available.
    pub sampler_compare: bool,
    /// Clip-space depth is `[0, 1]` instead of `[-1, 1]`.
    pub depth_zero_to_one: bool,
    /// Maximum simultaneous color attachments.
    pub max_color_attachments: u32,
}

impl Caps {
    /// Typical capabilities of a desktop GL 4.5 context.
    pub fn opengl() -> Self {
        Self {
            instancing: true,
            anisotropic_filtering: true,
            max_anisotropy: 16.0,
            uniform_buffers: true,
            clip_space_y_down: false,
            sampler_compare: true,
            depth_zero_to_one: false,
            max_color_attachments: 8,
        }
    }

    /// Capabilities of an Apple GPU family device.
    pub fn metal() -> Self {
        Self {
            clip_space_y_down: true,
            depth_zero_to_one: true,
            ..Self::opengl()
        }
    }

    /// Capabilities of a Vulkan 1.x device.
    pub fn vulkan() -> Self {
        Self {
            clip_space_y_down: true,
            depth_zero_to_one: true,
            ..Self::opengl()
        }
    }

    /// The matrix to premultiply onto a projection computed with GL
    /// conventions (Y up, depth in `[-1, 1]`) so that it matches this
    /// backend's clip space.
    pub fn clip_space_correction(&self) -> Mat4 {
        let y = if self.clip_space_y_down { -1.0 } else { 1.0 };
        let (z_scale, z_offset) = if self.depth_zero_to_one {
            (0.5, 0.5)
        } else {
            (1.0, 0.0)
        };
        Mat4::from_cols(
            Vec4::new(1.0, 0.0, 0.0, 0.0),
            Vec4::new(0.0, y, 0.0, 0.0),
            Vec4::new(0.0, 0.0, z_scale, 0.0),
            Vec4::new(0.0, 0.0, z_offset, 1.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn gl_correction_is_identity() {
        assert_eq!(Caps::opengl().clip_space_correction(), Mat4::IDENTITY);
    }

    #[test]
    fn metal_correction_flips_y_and_remaps_depth() {
        let m = Caps::metal().clip_space_correction();
        let near = m.project_point3(Vec3::new(0.5, 0.5, -1.0));
        let far = m.project_point3(Vec3::new(0.5, 0.5, 1.0));
        assert_eq!(near, Vec3::new(0.5, -0.5, 0.0));
        assert_eq!(far, Vec3::new(0.5, -0.5, 1.0));
    }
}
