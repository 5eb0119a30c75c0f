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

//! Variant system for devices consuming SPIR-V.

use super::assemble_variant;
use super::spirv::SpirvReflectionSystem;
use prism_core::reflection::cache::write_reflection_cache;
use prism_core::reflection::{ShaderReflection, ShaderReflectionSystem};
use prism_core::rhi::{Device, ShaderCode, ShaderDesc, ShaderStage};
use prism_core::variant::{
    reflection_cache_path, spirv_path, ShaderLoader, ShaderVariantData, ShaderVariantKey,
    ShaderVariantSystem, VariantBuildContext, VariantError,
};
use std::sync::Arc;

/// Loads `spirv/<file>[__<suffix>].spv` modules, creates the four blend
/// pipelines and persists the merged reflection next to the modules.
pub struct SpirvVariantSystem {
    loader: Arc<dyn ShaderLoader>,
    reflector: SpirvReflectionSystem,
    write_cache: bool,
}

impl SpirvVariantSystem {
    /// Creates the system. `write_cache` enables the reflection cache file.
    pub fn new(loader: Arc<dyn ShaderLoader>, write_cache: bool) -> Self {
        Self {
            loader,
            reflector: SpirvReflectionSystem::new(),
            write_cache,
        }
    }
}

impl ShaderVariantSystem for SpirvVariantSystem {
    fn build_variant(
        &self,
        device: &mut dyn Device,
        context: &VariantBuildContext<'_>,
        key: &ShaderVariantKey,
    ) -> Result<ShaderVariantData, VariantError> {
        let vertex_path = spirv_path(context.vertex_path, key);
        let fragment_path = spirv_path(context.fragment_path, key);
        let vertex_code = self.loader.load_shader_bytecode(&vertex_path)?;
        let fragment_code = self.loader.load_shader_bytecode(&fragment_path)?;

        // Reflect before touching the device so a bad module leaks nothing.
        let mut reflection: ShaderReflection =
            self.reflector.reflect(&vertex_code, ShaderStage::Vertex)?;
        reflection.merge(&self.reflector.reflect(&fragment_code, ShaderStage::Fragment)?);

        let vertex_shader = device.create_shader(&ShaderDesc {
            label: Some(vertex_path.display().to_string()),
            stage: ShaderStage::Vertex,
            code: ShaderCode::SpirV(vertex_code),
            entry_point: context.vertex_entry.to_string(),
        })?;
        let fragment_shader = match device.create_shader(&ShaderDesc {
            label: Some(fragment_path.display().to_string()),
            stage: ShaderStage::Fragment,
            code: ShaderCode::SpirV(fragment_code),
            entry_point: context.fragment_entry.to_string(),
        }) {
            Ok(handle) => handle,
            Err(e) => {
                let _ = device.destroy_shader(vertex_shader);
                return Err(e.into());
            }
        };

        let data = assemble_variant(device, context, vertex_shader, fragment_shader, reflection)?;
        if self.write_cache {
            let cache = self
                .loader
                .resolve(&reflection_cache_path(context.vertex_path, key));
            if let Err(e) = write_reflection_cache(&data.reflection, &cache) {
                log::warn!(
                    "SpirvVariantSystem: failed to write reflection cache {}: {}",
                    cache.display(),
                    e
                );
            }
        }

        log::info!(
            "SpirvVariantSystem: built variant {} of {}",
            key,
            context.vertex_path.display()
        );
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::gl::{GlDevice, HeadlessGl};
    use crate::shader::FsShaderLoader;
    use prism_core::config::RhiConfig;
    use prism_core::rhi::{PipelineDesc, ShaderHandle};
    use prism_core::variant::LoadError;
    use std::path::Path;

    #[test]
    fn missing_module_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let system = SpirvVariantSystem::new(Arc::new(FsShaderLoader::new(dir.path())), true);
        let gl = HeadlessGl::new();
        let calls = gl.call_log();
        let mut device = GlDevice::new(Box::new(gl), &RhiConfig::default()).unwrap();
        let template = PipelineDesc::graphics(ShaderHandle::NONE, ShaderHandle::NONE);
        let context = VariantBuildContext {
            vertex_path: Path::new("basic.vert"),
            fragment_path: Path::new("basic.frag"),
            vertex_entry: "main",
            fragment_entry: "main",
            source: None,
            pipeline: &template,
        };

        let err = system
            .build_variant(&mut device, &context, &ShaderVariantKey::new())
            .unwrap_err();
        assert!(matches!(err, VariantError::Load(LoadError::Io { .. })));
        assert_eq!(calls.count("compile_shader"), 0);
        assert!(!dir.path().join("spirv").exists());
    }
}
