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

//! Shader reflection, loading and variant systems.
//!
//! Two families are provided. The SPIR-V family reflects and loads
//! pre-compiled modules and serves the GL and Vulkan devices. The Metal
//! family compiles MSL source on the device and takes its reflection from
//! SPIR-V siblings or a cached reflection file.

mod loader;
mod msl;
mod spirv;
mod variant_metal;
mod variant_spirv;

pub use self::loader::FsShaderLoader;
pub use self::msl::MslReflectionSystem;
pub use self::spirv::SpirvReflectionSystem;
pub use self::variant_metal::{inject_defines, MetalVariantSystem};
pub use self::variant_spirv::SpirvVariantSystem;

use prism_core::config::RhiConfig;
use prism_core::reflection::{ShaderReflection, ShaderReflectionSystem};
use prism_core::rhi::{Device, ShaderHandle};
use prism_core::variant::{
    create_blend_pipelines, ShaderLoader, ShaderVariantData, ShaderVariantSystem,
    VariantBuildContext, VariantError,
};
use std::sync::Arc;

/// Creates the SPIR-V reflection system.
pub fn create_spirv_reflection_system() -> Box<dyn ShaderReflectionSystem> {
    Box::new(SpirvReflectionSystem::new())
}

/// Creates the MSL source reflection system.
pub fn create_metal_reflection_system() -> Box<dyn ShaderReflectionSystem> {
    Box::new(MslReflectionSystem::new())
}

/// Creates the variant system for devices consuming SPIR-V.
///
/// ## Arguments
/// * `loader` - Source of the `spirv/` variant modules.
/// * `config` - Decides whether merged reflection is written to disk.
pub fn create_spirv_variant_system(
    loader: Arc<dyn ShaderLoader>,
    config: &RhiConfig,
) -> Box<dyn ShaderVariantSystem> {
    Box::new(SpirvVariantSystem::new(loader, config.write_reflection_cache))
}

/// Creates the variant system for the Metal device.
///
/// ## Arguments
/// * `loader` - Source of the SPIR-V siblings and reflection caches.
/// * `config` - Decides whether merged reflection is written to disk.
pub fn create_metal_variant_system(
    loader: Arc<dyn ShaderLoader>,
    config: &RhiConfig,
) -> Box<dyn ShaderVariantSystem> {
    Box::new(MetalVariantSystem::new(loader, config.write_reflection_cache))
}

/// Builds the four blend pipelines over an already created shader pair.
/// The shaders are destroyed if pipeline creation fails.
fn assemble_variant(
    device: &mut dyn Device,
    context: &VariantBuildContext<'_>,
    vertex_shader: ShaderHandle,
    fragment_shader: ShaderHandle,
    reflection: ShaderReflection,
) -> Result<ShaderVariantData, VariantError> {
    match create_blend_pipelines(device, context.pipeline, vertex_shader, fragment_shader) {
        Ok(pipelines) => Ok(ShaderVariantData {
            pipelines,
            vertex_shader,
            fragment_shader,
            reflection,
        }),
        Err(e) => {
            let _ = device.destroy_shader(vertex_shader);
            let _ = device.destroy_shader(fragment_shader);
            Err(e.into())
        }
    }
}
