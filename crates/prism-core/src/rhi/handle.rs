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

//! Opaque resource handles and the arena that backs them.
//!
//! A handle is a plain `{ id: u32 }` value. The id `0` means "none"; every
//! other id is handed out by a [`ResourceTable`] in strictly increasing order
//! and is never reused, even after the resource it named has been destroyed.
//! A stale handle therefore always fails to resolve instead of silently
//! aliasing a newer resource.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Common behaviour shared by every typed handle.
pub trait ResourceHandle: Copy + Eq + fmt::Debug {
    /// Human readable resource category, used in errors and logs.
    const KIND: &'static str;

    /// Builds a handle from a raw id.
    fn from_id(id: u32) -> Self;

    /// Returns the raw id.
    fn id(self) -> u32;

    /// Returns `true` unless this is the "none" handle.
    fn is_valid(self) -> bool {
        self.id() != 0
    }
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            /// Raw id, `0` meaning "none".
            pub id: u32,
        }

        impl $name {
            /// The "none" handle.
            pub const NONE: Self = Self { id: 0 };
        }

        impl ResourceHandle for $name {
            const KIND: &'static str = $kind;

            fn from_id(id: u32) -> Self {
                Self { id }
            }

            fn id(self) -> u32 {
                self.id
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $kind, self.id)
            }
        }
    };
}

define_handle!(
    /// An opaque handle to a GPU buffer.
    BufferHandle,
    "buffer"
);
define_handle!(
    /// An opaque handle to a GPU texture.
    TextureHandle,
    "texture"
);
define_handle!(
    /// An opaque handle to a sampler object.
    SamplerHandle,
    "sampler"
);
define_handle!(
    /// An opaque handle to a compiled shader stage.
    ShaderHandle,
    "shader"
);
define_handle!(
    /// An opaque handle to a graphics or compute pipeline.
    PipelineHandle,
    "pipeline"
);
define_handle!(
    /// An opaque handle to a framebuffer (a set of render targets).
    FramebufferHandle,
    "framebuffer"
);
define_handle!(
    /// An opaque handle to a GPU query object.
    QueryHandle,
    "query"
);
define_handle!(
    /// An opaque handle to a CPU/GPU fence.
    FenceHandle,
    "fence"
);

/// An arena of backend-native resources indexed by a typed handle.
///
/// Ids are assigned monotonically starting at 1 and are never recycled.
pub struct ResourceTable<H: ResourceHandle, T> {
    next_id: u32,
    slots: HashMap<u32, T>,
    _marker: PhantomData<H>,
}

impl<H: ResourceHandle, T> ResourceTable<H, T> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            slots: HashMap::new(),
            _marker: PhantomData,
        }
    }

    /// Stores `value` and returns the freshly allocated handle.
    ///
    /// # Panics
    ///
    /// Panics if the 32-bit id space is exhausted.
    pub fn insert(&mut self, value: T) -> H {
        let id = self.next_id;
        self.next_id = id
            .checked_add(1)
            .unwrap_or_else(|| panic!("{} id space exhausted", H::KIND));
        self.slots.insert(id, value);
        H::from_id(id)
    }

    /// Resolves a handle. The "none" handle never resolves.
    pub fn get(&self, handle: H) -> Option<&T> {
        self.slots.get(&handle.id())
    }

    /// Resolves a handle mutably.
    pub fn get_mut(&mut self, handle: H) -> Option<&mut T> {
        self.slots.get_mut(&handle.id())
    }

    /// Returns `true` if the handle currently names a live resource.
    pub fn contains(&self, handle: H) -> bool {
        self.slots.contains_key(&handle.id())
    }

    /// Removes a resource. Its id is retired, not recycled.
    pub fn remove(&mut self, handle: H) -> Option<T> {
        self.slots.remove(&handle.id())
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` when no resource is alive.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterates over live resources in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> {
        self.slots.iter().map(|(id, value)| (H::from_id(*id), value))
    }

    /// Removes every resource, handing each one to `f` for native cleanup.
    pub fn drain_with(&mut self, mut f: impl FnMut(H, T)) {
        for (id, value) in self.slots.drain() {
            f(H::from_id(id), value);
        }
    }
}

impl<H: ResourceHandle, T> Default for ResourceTable<H, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ResourceHandle, T> fmt::Debug for ResourceTable<H, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTable")
            .field("kind", &H::KIND)
            .field("live", &self.slots.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_handle_is_invalid() {
        assert!(!BufferHandle::NONE.is_valid());
        assert!(!TextureHandle::default().is_valid());
        assert!(PipelineHandle { id: 3 }.is_valid());
    }

    #[test]
    fn ids_are_monotonic_and_start_at_one() {
        let mut table: ResourceTable<BufferHandle, &str> = ResourceTable::new();
        let a = table.insert("a");
        let b = table.insert("b");
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(table.get(a), Some(&"a"));
    }

    #[test]
    fn destroyed_ids_are_never_reused() {
        let mut table: ResourceTable<TextureHandle, u32> = ResourceTable::new();
        let first = table.insert(10);
        assert_eq!(table.remove(first), Some(10));
        let second = table.insert(20);
        assert_ne!(first, second);
        assert!(table.get(first).is_none(), "stale handle must not resolve");
        assert_eq!(table.get(second), Some(&20));
    }

    #[test]
    fn none_handle_never_resolves() {
        let mut table: ResourceTable<ShaderHandle, u8> = ResourceTable::new();
        table.insert(1);
        assert!(table.get(ShaderHandle::NONE).is_none());
        assert!(!table.contains(ShaderHandle::NONE));
    }

    #[test]
    fn drain_visits_every_live_entry() {
        let mut table: ResourceTable<FenceHandle, u32> = ResourceTable::new();
        table.insert(1);
        let gone = table.insert(2);
        table.insert(3);
        table.remove(gone);

        let mut seen = Vec::new();
        table.drain_with(|_, v| seen.push(v));
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 3]);
        assert!(table.is_empty());
    }

    #[test]
    fn handle_display_names_the_category() {
        assert_eq!(format!("{}", QueryHandle { id: 7 }), "query#7");
    }
}
