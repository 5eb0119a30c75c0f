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

//! Variant system for the Metal device.

use super::assemble_variant;
use super::spirv::SpirvReflectionSystem;
use prism_core::reflection::cache::{load_reflection_cache, write_reflection_cache};
use prism_core::reflection::{ShaderReflection, ShaderReflectionSystem};
use prism_core::rhi::{Device, ShaderCode, ShaderDesc, ShaderStage};
use prism_core::variant::{
    reflection_cache_path, spirv_path, ShaderLoader, ShaderVariantData, ShaderVariantKey,
    ShaderVariantSystem, VariantBuildContext, VariantError,
};
use std::fmt::Write;
use std::sync::Arc;

/// Prepends one `#define` line per key entry to `source`.
///
/// The source is returned unchanged when it is empty or the key is the base
/// variant. Entries with an empty value become name-only defines.
pub fn inject_defines(source: &str, key: &ShaderVariantKey) -> String {
    if source.is_empty() || key.is_empty() {
        return source.to_string();
    }
    let mut out = String::with_capacity(source.len() + 32);
    for (name, value) in key.defines() {
        if value.is_empty() {
            let _ = writeln!(out, "#define {name}");
        } else {
            let _ = writeln!(out, "#define {name} {value}");
        }
    }
    out.push_str(source);
    out
}

/// Compiles both entry points from one MSL source and builds the four blend
/// pipelines.
///
/// Reflection comes from the variant's SPIR-V siblings when they load, in
/// which case it is re-persisted, and from the reflection cache otherwise.
pub struct MetalVariantSystem {
    loader: Arc<dyn ShaderLoader>,
    reflector: SpirvReflectionSystem,
    write_cache: bool,
}

impl MetalVariantSystem {
    /// Creates the system. `write_cache` enables re-persisting reflection
    /// obtained from SPIR-V.
    pub fn new(loader: Arc<dyn ShaderLoader>, write_cache: bool) -> Self {
        Self {
            loader,
            reflector: SpirvReflectionSystem::new(),
            write_cache,
        }
    }

    fn reflect_siblings(
        &self,
        context: &VariantBuildContext<'_>,
        key: &ShaderVariantKey,
    ) -> Result<ShaderReflection, VariantError> {
        let vertex = self
            .loader
            .load_shader_bytecode(&spirv_path(context.vertex_path, key))?;
        let fragment = self
            .loader
            .load_shader_bytecode(&spirv_path(context.fragment_path, key))?;
        let mut reflection = self.reflector.reflect(&vertex, ShaderStage::Vertex)?;
        reflection.merge(&self.reflector.reflect(&fragment, ShaderStage::Fragment)?);
        Ok(reflection)
    }

    /// Returns the variant's reflection and whether it came from the SPIR-V
    /// siblings rather than the cache.
    fn reflection(
        &self,
        context: &VariantBuildContext<'_>,
        key: &ShaderVariantKey,
    ) -> Result<(ShaderReflection, bool), VariantError> {
        match self.reflect_siblings(context, key) {
            Ok(reflection) => Ok((reflection, true)),
            Err(e) => {
                log::debug!("MetalVariantSystem: no SPIR-V reflection ({e}), trying the cache");
                let cache = self
                    .loader
                    .resolve(&reflection_cache_path(context.vertex_path, key));
                load_reflection_cache(&cache)
                    .map(|reflection| (reflection, false))
                    .ok_or_else(|| VariantError::MissingReflection {
                        shader: context.vertex_path.display().to_string(),
                        variant: key.to_string(),
                    })
            }
        }
    }

    fn persist(&self, reflection: &ShaderReflection, context: &VariantBuildContext<'_>, key: &ShaderVariantKey) {
        let cache = self
            .loader
            .resolve(&reflection_cache_path(context.vertex_path, key));
        if let Err(e) = write_reflection_cache(reflection, &cache) {
            log::warn!(
                "MetalVariantSystem: failed to write reflection cache {}: {}",
                cache.display(),
                e
            );
        }
    }
}

impl ShaderVariantSystem for MetalVariantSystem {
    fn build_variant(
        &self,
        device: &mut dyn Device,
        context: &VariantBuildContext<'_>,
        key: &ShaderVariantKey,
    ) -> Result<ShaderVariantData, VariantError> {
        let source = context
            .source
            .ok_or_else(|| VariantError::MissingSource(context.vertex_path.display().to_string()))?;
        let (reflection, from_siblings) = self.reflection(context, key)?;
        let source = inject_defines(source, key);

        let label = key.decorate(&context.vertex_path.display().to_string());
        let vertex_shader = device.create_shader(&ShaderDesc {
            label: Some(format!("{label} (vertex)")),
            stage: ShaderStage::Vertex,
            code: ShaderCode::Msl(source.clone()),
            entry_point: context.vertex_entry.to_string(),
        })?;
        let fragment_shader = match device.create_shader(&ShaderDesc {
            label: Some(format!("{label} (fragment)")),
            stage: ShaderStage::Fragment,
            code: ShaderCode::Msl(source),
            entry_point: context.fragment_entry.to_string(),
        }) {
            Ok(handle) => handle,
            Err(e) => {
                let _ = device.destroy_shader(vertex_shader);
                return Err(e.into());
            }
        };

        let data = assemble_variant(device, context, vertex_shader, fragment_shader, reflection)?;
        if from_siblings && self.write_cache {
            self.persist(&data.reflection, context, key);
        }
        log::info!("MetalVariantSystem: built variant {key} of {label}");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defines_are_prepended_in_key_order() {
        let key = ShaderVariantKey::new()
            .with_define("USE_FOG", "1")
            .with_define("ALPHA_TEST", "");
        assert_eq!(
            inject_defines("void f();\n", &key),
            "#define ALPHA_TEST\n#define USE_FOG 1\nvoid f();\n"
        );
    }

    #[test]
    fn base_variant_and_empty_source_are_untouched() {
        let key = ShaderVariantKey::new().with_define("A", "1");
        assert_eq!(inject_defines("", &key), "");
        assert_eq!(inject_defines("x", &ShaderVariantKey::new()), "x");
    }
}
