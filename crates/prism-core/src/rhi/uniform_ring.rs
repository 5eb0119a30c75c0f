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

//! Per-frame bump allocator over one persistent uniform ring buffer.
//!
//! The ring is split into one slice per frame in flight. Each frame the
//! backend calls [`UniformAllocator::reset`] with its frame index, which moves
//! the cursor to the start of that frame's slice; the GPU may still be reading
//! the other slices.
//!
//! ```text
//! | frame 0 slice | frame 1 slice | frame 2 slice |
//!   ^ cursor after reset(0)
//! ```
//!
//! Allocation never blocks: once the current slice is full,
//! [`UniformAllocator::allocate`] returns `None` and the caller drops the
//! upload.

use crate::config::RhiConfig;

/// Bookkeeping for a ring of `frames_in_flight` equally sized slices.
#[derive(Debug, Clone)]
pub struct UniformAllocator {
    frames_in_flight: u32,
    slice_size: u64,
    frame: u32,
    cursor: u64,
    overflowed: bool,
}

impl UniformAllocator {
    /// Creates an allocator for `frames_in_flight * max_draws_per_frame * slot_size` bytes.
    pub fn new(frames_in_flight: u32, max_draws_per_frame: u32, slot_size: u64) -> Self {
        let frames_in_flight = frames_in_flight.max(1);
        Self {
            frames_in_flight,
            slice_size: u64::from(max_draws_per_frame) * slot_size,
            frame: 0,
            cursor: 0,
            overflowed: false,
        }
    }

    /// Sizes the ring from the device configuration. Each slice is padded to
    /// a multiple of `uniform_alignment` so every slice starts aligned.
    pub fn from_config(config: &RhiConfig) -> Self {
        let mut ring = Self::new(
            config.frames_in_flight,
            config.max_draws_per_frame,
            config.uniform_slot_size,
        );
        let align = config.uniform_alignment.max(1);
        ring.slice_size = ring.slice_size.next_multiple_of(align);
        ring
    }

    /// Total size of the backing buffer in bytes.
    pub fn total_size(&self) -> u64 {
        self.slice_size * u64::from(self.frames_in_flight)
    }

    /// Size of one frame's slice in bytes.
    pub fn slice_size(&self) -> u64 {
        self.slice_size
    }

    /// Number of slices.
    pub fn frames_in_flight(&self) -> u32 {
        self.frames_in_flight
    }

    /// The slice currently allocated from.
    pub fn current_frame(&self) -> u32 {
        self.frame
    }

    /// Bytes consumed in the current slice, padding included.
    pub fn used(&self) -> u64 {
        self.cursor
    }

    /// Moves the cursor to the start of `frame_index`'s slice.
    pub fn reset(&mut self, frame_index: u32) {
        self.frame = frame_index % self.frames_in_flight;
        self.cursor = 0;
        self.overflowed = false;
    }

    /// Reserves `size` bytes inside the current slice and returns the absolute
    /// offset into the ring buffer. The absolute offset is a multiple of
    /// `align`, whatever the slice size.
    ///
    /// Returns `None` when the slice cannot fit the request. `align` values of
    /// 0 or 1 mean unaligned; other values must be powers of two.
    pub fn allocate(&mut self, size: u64, align: u64) -> Option<u64> {
        let align = align.max(1);
        debug_assert!(align.is_power_of_two(), "alignment {align} is not a power of two");
        let base = u64::from(self.frame) * self.slice_size;
        let start = base.checked_add(self.cursor)?.checked_next_multiple_of(align)? - base;
        let end = start.checked_add(size)?;
        if end > self.slice_size {
            if !self.overflowed {
                log::warn!(
                    "UniformAllocator: frame {} slice exhausted ({} of {} bytes used, {} requested)",
                    self.frame,
                    self.cursor,
                    self.slice_size,
                    size
                );
                self.overflowed = true;
            }
            return None;
        }
        self.cursor = end;
        Some(base + start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_size_covers_every_frame() {
        let ring = UniformAllocator::new(3, 4096, 256);
        assert_eq!(ring.slice_size(), 4096 * 256);
        assert_eq!(ring.total_size(), 3 * 4096 * 256);
    }

    #[test]
    fn allocations_are_aligned_and_sequential() {
        let mut ring = UniformAllocator::new(2, 4, 256);
        assert_eq!(ring.allocate(64, 256), Some(0));
        assert_eq!(ring.allocate(64, 256), Some(256));
        assert_eq!(ring.allocate(16, 16), Some(256 + 64));
    }

    #[test]
    fn reset_moves_to_the_frame_slice() {
        let mut ring = UniformAllocator::new(3, 2, 256);
        ring.reset(1);
        assert_eq!(ring.allocate(32, 256), Some(512));
        ring.reset(4);
        assert_eq!(ring.current_frame(), 1, "frame index wraps around");
        assert_eq!(ring.allocate(32, 256), Some(512), "reset rewinds the cursor");
    }

    #[test]
    fn exhausted_slice_fails_closed() {
        let mut ring = UniformAllocator::new(2, 2, 256);
        assert!(ring.allocate(256, 256).is_some());
        assert!(ring.allocate(256, 256).is_some());
        assert_eq!(ring.allocate(1, 256), None);
        assert_eq!(ring.allocate(1, 1), None);

        // The next frame starts fresh.
        ring.reset(1);
        assert_eq!(ring.allocate(256, 256), Some(512));
    }

    #[test]
    fn offsets_stay_aligned_when_slots_are_not() {
        let config = RhiConfig {
            frames_in_flight: 2,
            max_draws_per_frame: 3,
            uniform_slot_size: 100,
            uniform_alignment: 256,
            ..RhiConfig::default()
        };
        let mut ring = UniformAllocator::from_config(&config);
        assert_eq!(ring.slice_size(), 512);
        ring.reset(1);
        let offset = ring.allocate(16, 256).unwrap();
        assert_eq!(offset % 256, 0);
        assert_eq!(offset, 512);

        // Unpadded slices still hand out aligned absolute offsets.
        let mut raw = UniformAllocator::new(2, 3, 100);
        raw.reset(1);
        assert_eq!(raw.allocate(16, 256), Some(512));
        assert_eq!(raw.used(), 212 + 16);
        assert_eq!(raw.allocate(16, 256), None);
    }

    #[test]
    fn oversized_request_is_rejected() {
        let mut ring = UniformAllocator::new(1, 1, 256);
        assert_eq!(ring.allocate(257, 1), None);
        assert_eq!(ring.used(), 0);
    }
}
