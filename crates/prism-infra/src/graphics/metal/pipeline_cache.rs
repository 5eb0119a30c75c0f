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

//! Deduplication of Metal pipeline state objects.
//!
//! Building a PSO is expensive, and variant systems routinely create
//! pipelines that differ only in ways that do not reach the PSO (labels,
//! blend factors while blending is off). Every RHI pipeline handle maps to a
//! shared, reference counted cache entry.

use super::driver::MtlObject;
use prism_core::rhi::{BlendState, Format, ShaderHandle, VertexLayout};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Everything that is baked into a Metal PSO.
#[derive(Debug, Clone)]
pub struct PipelineKey {
    /// Vertex shader.
    pub vs: ShaderHandle,
    /// Fragment shader.
    pub fs: ShaderHandle,
    /// Compute shader, none for graphics pipelines.
    pub cs: ShaderHandle,
    /// Instanced vertex fetch.
    pub instanced: bool,
    /// Color attachment formats.
    pub color_formats: Vec<Format>,
    /// Depth attachment format.
    pub depth_format: Option<Format>,
    /// Blend state.
    pub blend: BlendState,
    /// Vertex descriptor.
    pub vertex_layouts: Vec<VertexLayout>,
}

impl PipelineKey {
    /// Blend factors and ops only matter while blending is enabled.
    fn effective_blend(&self) -> Option<&BlendState> {
        self.blend.enabled.then_some(&self.blend)
    }
}

impl PartialEq for PipelineKey {
    fn eq(&self, other: &Self) -> bool {
        self.vs == other.vs
            && self.fs == other.fs
            && self.cs == other.cs
            && self.instanced == other.instanced
            && self.color_formats == other.color_formats
            && self.depth_format == other.depth_format
            && self.effective_blend() == other.effective_blend()
            && self.vertex_layouts == other.vertex_layouts
    }
}

impl Eq for PipelineKey {}

impl Hash for PipelineKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.vs.hash(state);
        self.fs.hash(state);
        self.cs.hash(state);
        self.instanced.hash(state);
        self.color_formats.hash(state);
        self.depth_format.hash(state);
        self.effective_blend().hash(state);
        self.vertex_layouts.hash(state);
    }
}

#[derive(Debug)]
struct CachedPso {
    object: MtlObject,
    refs: usize,
}

/// Reference counted PSO cache.
#[derive(Debug, Default)]
pub struct PipelineCache {
    entries: HashMap<PipelineKey, CachedPso>,
    hits: u64,
    misses: u64,
    verbose: bool,
}

impl PipelineCache {
    /// An empty cache; `verbose` logs every hit and miss.
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            ..Self::default()
        }
    }

    /// Returns the PSO for `key`, building it with `create` on a miss.
    pub fn acquire(
        &mut self,
        key: &PipelineKey,
        create: impl FnOnce() -> Result<MtlObject, String>,
    ) -> Result<MtlObject, String> {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.refs += 1;
            self.hits += 1;
            if self.verbose {
                log::debug!("PipelineCache: hit for {:?}/{:?} ({} refs)", key.vs, key.fs, entry.refs);
            }
            return Ok(entry.object);
        }
        let object = create()?;
        self.misses += 1;
        if self.verbose {
            log::debug!("PipelineCache: miss for {:?}/{:?}, built {:?}", key.vs, key.fs, object);
        }
        self.entries
            .insert(key.clone(), CachedPso { object, refs: 1 });
        Ok(object)
    }

    /// Drops one reference. Returns the PSO once nothing uses it anymore.
    pub fn release(&mut self, key: &PipelineKey) -> Option<MtlObject> {
        let entry = self.entries.get_mut(key)?;
        entry.refs -= 1;
        if entry.refs > 0 {
            return None;
        }
        self.entries.remove(key).map(|e| e.object)
    }

    /// Removes every entry, returning the PSOs to release.
    pub fn drain(&mut self) -> Vec<MtlObject> {
        self.entries.drain().map(|(_, e)| e.object).collect()
    }

    /// Number of distinct PSOs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no PSO is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::rhi::BlendMode;
    use std::collections::hash_map::DefaultHasher;

    fn key(blend: BlendState) -> PipelineKey {
        PipelineKey {
            vs: ShaderHandle { id: 1 },
            fs: ShaderHandle { id: 2 },
            cs: ShaderHandle::NONE,
            instanced: false,
            color_formats: vec![Format::Bgra8Unorm],
            depth_format: Some(Format::Depth32Float),
            blend,
            vertex_layouts: Vec::new(),
        }
    }

    fn hash_of(key: &PipelineKey) -> u64 {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        h.finish()
    }

    #[test]
    fn disabled_blend_factors_do_not_split_entries() {
        let a = key(BlendState::REPLACE);
        let b = key(BlendState {
            enabled: false,
            ..BlendMode::Additive.blend_state()
        });
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, key(BlendMode::Additive.blend_state()));
    }

    #[test]
    fn entries_are_reference_counted() {
        let mut cache = PipelineCache::new(false);
        let k = key(BlendState::REPLACE);
        let first = cache.acquire(&k, || Ok(MtlObject(7))).unwrap();
        let second = cache
            .acquire(&k, || panic!("must hit the cache"))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.stats(), (1, 1));
        assert_eq!(cache.release(&k), None);
        assert_eq!(cache.release(&k), Some(MtlObject(7)));
        assert!(cache.is_empty());
    }
}
