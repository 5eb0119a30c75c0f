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

//! Shader variants: one specialization of a vertex/fragment pair selected by a
//! set of preprocessor defines, built into four blend-mode pipelines.

mod loader;

pub use self::loader::{LoadError, ShaderLoader};

use crate::reflection::{ReflectionError, ShaderReflection};
use crate::rhi::{
    BlendMode, Device, PipelineDesc, PipelineHandle, ResourceError, ShaderHandle,
};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory, next to the shader sources, that holds compiled variants.
pub const SPIRV_DIR: &str = "spirv";

/// A set of `NAME -> VALUE` defines identifying one variant.
///
/// Defines are kept sorted by name, so two keys built from the same pairs in a
/// different order are equal and produce the same [`suffix`](Self::suffix).
/// Redefining a name replaces its value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderVariantKey {
    defines: BTreeMap<String, String>,
}

impl ShaderVariantKey {
    /// The base variant.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a define, builder style.
    pub fn with_define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.define(name, value);
        self
    }

    /// Adds or replaces a define.
    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.defines.insert(name.into(), value.into());
    }

    /// Returns `true` for the base variant.
    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }

    /// Defines in canonical order.
    pub fn defines(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defines.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// File name suffix, e.g. `"USE_FOG_1__SHADOWS_0"`. Empty for the base variant.
    pub fn suffix(&self) -> String {
        self.defines
            .iter()
            .map(|(name, value)| format!("{}_{}", sanitize_token(name), sanitize_token(value)))
            .collect::<Vec<_>>()
            .join("__")
    }

    /// `<stem>` or `<stem>__<suffix>`.
    pub fn decorate(&self, stem: &str) -> String {
        if self.is_empty() {
            stem.to_string()
        } else {
            format!("{stem}__{}", self.suffix())
        }
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for ShaderVariantKey {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut key = Self::new();
        for (name, value) in iter {
            key.define(name, value);
        }
        key
    }
}

impl fmt::Display for ShaderVariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("<base>")
        } else {
            f.write_str(&self.suffix())
        }
    }
}

/// Replaces characters outside `[A-Za-z0-9_]` with `_`; an empty token becomes `"0"`.
pub fn sanitize_token(token: &str) -> String {
    if token.is_empty() {
        return "0".to_string();
    }
    token
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn variant_artifact(source: &Path, key: &ShaderVariantKey, extension: &str) -> PathBuf {
    let dir = source.parent().unwrap_or_else(|| Path::new(""));
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(SPIRV_DIR)
        .join(format!("{}.{extension}", key.decorate(&file_name)))
}

/// `<dir>/spirv/<file_name>[__<suffix>].spv` for the shader at `source`.
pub fn spirv_path(source: &Path, key: &ShaderVariantKey) -> PathBuf {
    variant_artifact(source, key, "spv")
}

/// `<dir>/spirv/<file_name>[__<suffix>].reflection.bin` for the vertex shader
/// at `vertex_source`.
pub fn reflection_cache_path(vertex_source: &Path, key: &ShaderVariantKey) -> PathBuf {
    variant_artifact(vertex_source, key, "reflection.bin")
}

/// Everything needed to draw with one shader variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderVariantData {
    /// One pipeline per [`BlendMode`], indexed by [`BlendMode::index`].
    pub pipelines: [PipelineHandle; 4],
    /// Vertex stage.
    pub vertex_shader: ShaderHandle,
    /// Fragment stage.
    pub fragment_shader: ShaderHandle,
    /// Merged vertex + fragment reflection.
    pub reflection: ShaderReflection,
}

impl ShaderVariantData {
    /// The pipeline for a blend mode.
    pub fn pipeline(&self, mode: BlendMode) -> PipelineHandle {
        self.pipelines[mode.index()]
    }

    /// Destroys the pipelines and shaders.
    pub fn destroy(&self, device: &mut dyn Device) -> Result<(), ResourceError> {
        for pipeline in self.pipelines {
            device.destroy_pipeline(pipeline)?;
        }
        device.destroy_shader(self.vertex_shader)?;
        device.destroy_shader(self.fragment_shader)
    }
}

/// Inputs of a variant build.
#[derive(Debug, Clone)]
pub struct VariantBuildContext<'a> {
    /// Vertex shader source path, relative to the loader root.
    pub vertex_path: &'a Path,
    /// Fragment shader source path, relative to the loader root.
    pub fragment_path: &'a Path,
    /// Vertex entry point.
    pub vertex_entry: &'a str,
    /// Fragment entry point.
    pub fragment_entry: &'a str,
    /// Combined source holding both entry points, for source-compiled backends.
    pub source: Option<&'a str>,
    /// Fixed-function state shared by the four pipelines. Its shader handles
    /// and blend state are overwritten.
    pub pipeline: &'a PipelineDesc,
}

/// An error raised while building a variant.
#[derive(Debug, Error)]
pub enum VariantError {
    /// Bytecode could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// A stage could not be reflected.
    #[error(transparent)]
    Reflection(#[from] ReflectionError),
    /// The device rejected a shader or pipeline.
    #[error("Device rejected variant resources: {0}")]
    Resource(#[from] ResourceError),
    /// The backend compiles from source but none was provided.
    #[error("No shader source provided for '{0}'")]
    MissingSource(String),
    /// Neither SPIR-V siblings nor a cache file provide reflection.
    #[error("No reflection available for '{shader}' (variant {variant})")]
    MissingReflection {
        /// Vertex shader path.
        shader: String,
        /// Variant suffix.
        variant: String,
    },
}

/// Builds [`ShaderVariantData`] for a shader pair and a key.
pub trait ShaderVariantSystem {
    /// Loads or compiles both stages, creates the four blend pipelines and
    /// produces the merged reflection.
    fn build_variant(
        &self,
        device: &mut dyn Device,
        context: &VariantBuildContext<'_>,
        key: &ShaderVariantKey,
    ) -> Result<ShaderVariantData, VariantError>;
}

/// Creates one pipeline per blend mode from `template`.
///
/// Pipelines created before a failure are destroyed before the error is
/// returned.
pub fn create_blend_pipelines(
    device: &mut dyn Device,
    template: &PipelineDesc,
    vertex_shader: ShaderHandle,
    fragment_shader: ShaderHandle,
) -> Result<[PipelineHandle; 4], ResourceError> {
    let mut pipelines = [PipelineHandle::NONE; 4];
    for mode in BlendMode::ALL {
        let desc = PipelineDesc {
            label: template
                .label
                .as_ref()
                .map(|label| format!("{label} [{mode:?}]")),
            vertex_shader,
            fragment_shader,
            compute_shader: ShaderHandle::NONE,
            blend: mode.blend_state(),
            ..template.clone()
        };
        match device.create_pipeline(&desc) {
            Ok(handle) => pipelines[mode.index()] = handle,
            Err(e) => {
                for created in pipelines.iter().filter(|p| p.id != 0) {
                    let _ = device.destroy_pipeline(*created);
                }
                return Err(e);
            }
        }
    }
    Ok(pipelines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_order_independent() {
        let a = ShaderVariantKey::new()
            .with_define("USE_FOG", "1")
            .with_define("SHADOWS", "pcf");
        let b = ShaderVariantKey::new()
            .with_define("SHADOWS", "pcf")
            .with_define("USE_FOG", "1");
        assert_eq!(a, b);
        assert_eq!(a.suffix(), b.suffix());
        assert_eq!(a.suffix(), "SHADOWS_pcf__USE_FOG_1");
    }

    #[test]
    fn tokens_are_sanitized() {
        assert_eq!(sanitize_token("a-b.c"), "a_b_c");
        assert_eq!(sanitize_token(""), "0");
        let key: ShaderVariantKey = [("MAX LIGHTS", "")].into_iter().collect();
        assert_eq!(key.suffix(), "MAX_LIGHTS_0");
    }

    #[test]
    fn redefinition_replaces_value() {
        let mut key = ShaderVariantKey::new();
        key.define("A", "1");
        key.define("A", "2");
        assert_eq!(key.defines().collect::<Vec<_>>(), vec![("A", "2")]);
    }

    #[test]
    fn base_variant_paths_have_no_suffix() {
        let key = ShaderVariantKey::new();
        let source = Path::new("shaders/basic.vert");
        assert_eq!(spirv_path(source, &key), Path::new("shaders/spirv/basic.vert.spv"));
        assert_eq!(
            reflection_cache_path(source, &key),
            Path::new("shaders/spirv/basic.vert.reflection.bin")
        );
    }

    #[test]
    fn variant_paths_carry_the_suffix() {
        let key = ShaderVariantKey::new().with_define("SKINNED", "1");
        assert_eq!(
            spirv_path(Path::new("lit.frag"), &key),
            Path::new("spirv/lit.frag__SKINNED_1.spv")
        );
    }
}
