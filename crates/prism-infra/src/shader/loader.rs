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

//! Filesystem shader loader.

use prism_core::variant::{LoadError, ShaderLoader};
use std::fs;
use std::path::{Path, PathBuf};

/// Loads shader bytecode from an asset directory.
#[derive(Debug, Clone)]
pub struct FsShaderLoader {
    root: PathBuf,
}

impl FsShaderLoader {
    /// Creates a loader resolving relative paths against `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The asset directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ShaderLoader for FsShaderLoader {
    fn load_shader_bytecode(&self, relative: &Path) -> Result<Vec<u8>, LoadError> {
        let path = self.resolve(relative);
        let bytes = fs::read(&path).map_err(|source| LoadError::Io {
            path: path.clone(),
            source,
        })?;
        if bytes.is_empty() {
            return Err(LoadError::Empty(path));
        }
        log::debug!("FsShaderLoader: read {} bytes from {}", bytes.len(), path.display());
        Ok(bytes)
    }

    fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_empty_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("empty.spv"), b"").unwrap();
        fs::write(dir.path().join("ok.spv"), b"\x03\x02\x23\x07").unwrap();
        let loader = FsShaderLoader::new(dir.path());

        assert!(matches!(
            loader.load_shader_bytecode(Path::new("missing.spv")),
            Err(LoadError::Io { .. })
        ));
        assert!(matches!(
            loader.load_shader_bytecode(Path::new("empty.spv")),
            Err(LoadError::Empty(_))
        ));
        assert_eq!(loader.load_shader_bytecode(Path::new("ok.spv")).unwrap().len(), 4);
        assert_eq!(loader.resolve(Path::new("a/b.spv")), dir.path().join("a/b.spv"));
    }
}
