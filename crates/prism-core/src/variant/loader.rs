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

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// An error raised while loading shader bytecode.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error("Failed to read shader '{path}': {source}")]
    Io {
        /// Resolved path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The file exists but holds no bytes.
    #[error("Shader '{0}' is empty")]
    Empty(PathBuf),
}

/// Source of compiled shader stages.
pub trait ShaderLoader: Send + Sync {
    /// Reads the bytecode at `relative`. Empty files are an error.
    fn load_shader_bytecode(&self, relative: &Path) -> Result<Vec<u8>, LoadError>;

    /// Maps a relative path to the on-disk location, used to place the
    /// reflection cache next to the bytecode.
    fn resolve(&self, relative: &Path) -> PathBuf;
}
