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

//! Concrete RHI devices.
//!
//! Every backend is written against a narrow native-driver trait so that
//! the device logic (state tracking, caching, frame pacing) runs the same
//! over a live API and over the headless drivers used by tests.

mod call_log;
pub mod factory;
pub mod gl;
pub mod metal;
pub mod vulkan;

pub use self::call_log::CallLog;
pub use self::factory::{create_device, is_backend_supported, select_backend, NativeDrivers};
