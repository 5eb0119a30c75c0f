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

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Per-entry-point call counters shared between a headless driver and
/// whoever inspects it (usually a test).
///
/// Cloning is cheap; all clones observe the same counters.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    counts: Arc<Mutex<HashMap<&'static str, usize>>>,
}

impl CallLog {
    fn lock(&self) -> MutexGuard<'_, HashMap<&'static str, usize>> {
        // A panicking test must not hide the counters from the others.
        self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn record(&self, call: &'static str) {
        *self.lock().entry(call).or_insert(0) += 1;
    }

    /// Number of times `call` was issued.
    pub fn count(&self, call: &str) -> usize {
        self.lock().get(call).copied().unwrap_or(0)
    }

    /// Number of calls across all entry points.
    pub fn total(&self) -> usize {
        self.lock().values().sum()
    }

    /// Clears every counter.
    pub fn reset(&self) {
        self.lock().clear();
    }
}
