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

//! Device configuration.
//!
//! [`RhiConfig`] is passed to the backend factory and from there to every
//! device. It replaces process-wide debug toggles: verbose diagnostics are
//! switched on per device through [`DebugSettings`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which backend the factory should create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendPreference {
    /// Metal on macOS when `prefer_metal` is set, OpenGL otherwise.
    #[default]
    Auto,
    /// OpenGL.
    OpenGL,
    /// Metal.
    Metal,
    /// Vulkan.
    Vulkan,
    /// Direct3D 12.
    Dx12,
}

/// Opt-in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    /// Log every native state change issued by command lists.
    pub log_state_changes: bool,
    /// Log pipeline cache hits and misses.
    pub log_pipeline_cache: bool,
    /// Log resource creation and destruction.
    pub log_resource_lifetimes: bool,
}

/// An error raised while loading or validating a [`RhiConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The RON text could not be parsed.
    #[error("Failed to parse RHI configuration: {0}")]
    Parse(String),
    /// A value is out of range.
    #[error("Invalid RHI configuration: {0}")]
    Invalid(String),
}

/// Construction parameters shared by every device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RhiConfig {
    /// Requested backend.
    pub backend: BackendPreference,
    /// On macOS, pick Metal over OpenGL when `backend` is `Auto`.
    pub prefer_metal: bool,
    /// Frames the CPU may record ahead of the GPU (uniform ring slices).
    pub frames_in_flight: u32,
    /// Per-draw uniform uploads budgeted per frame.
    pub max_draws_per_frame: u32,
    /// Bytes reserved per per-draw uniform upload.
    pub uniform_slot_size: u64,
    /// Alignment of uniform ring allocations.
    pub uniform_alignment: u64,
    /// Persist merged reflection next to the variant bytecode.
    pub write_reflection_cache: bool,
    /// Diagnostics.
    pub debug: DebugSettings,
}

impl Default for RhiConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            prefer_metal: true,
            frames_in_flight: 3,
            max_draws_per_frame: 4096,
            uniform_slot_size: 256,
            uniform_alignment: 256,
            write_reflection_cache: true,
            debug: DebugSettings::default(),
        }
    }
}

impl RhiConfig {
    /// Parses a configuration from RON and validates it. Missing fields take
    /// their default value.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_in_flight == 0 {
            return Err(ConfigError::Invalid("frames_in_flight must be > 0".into()));
        }
        if self.max_draws_per_frame == 0 {
            return Err(ConfigError::Invalid("max_draws_per_frame must be > 0".into()));
        }
        if self.uniform_slot_size == 0 {
            return Err(ConfigError::Invalid("uniform_slot_size must be > 0".into()));
        }
        if !self.uniform_alignment.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "uniform_alignment {} is not a power of two",
                self.uniform_alignment
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RhiConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.max_draws_per_frame, 4096);
    }

    #[test]
    fn partial_ron_keeps_defaults() {
        let config = RhiConfig::from_ron(
            "(backend: Vulkan, debug: (log_state_changes: true), uniform_slot_size: 512)",
        )
        .unwrap();
        assert_eq!(config.backend, BackendPreference::Vulkan);
        assert!(config.debug.log_state_changes);
        assert!(!config.debug.log_pipeline_cache);
        assert_eq!(config.uniform_slot_size, 512);
        assert_eq!(config.uniform_alignment, 256);
    }

    #[test]
    fn bad_alignment_is_rejected() {
        let err = RhiConfig::from_ron("(uniform_alignment: 48)").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_frames_is_rejected() {
        assert!(RhiConfig::from_ron("(frames_in_flight: 0)").is_err());
    }

    #[test]
    fn garbage_fails_to_parse() {
        assert!(matches!(
            RhiConfig::from_ron("not ron at all ("),
            Err(ConfigError::Parse(_))
        ));
    }
}
