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

//! The backend-agnostic render-hardware-interface contracts.
//!
//! This module defines the "common language" shared by all backends: typed
//! handles, creation descriptors, capabilities, the [`Device`] and [`CmdList`]
//! traits and the error types. Concrete devices live in `prism-infra`.

pub mod caps;
pub mod cmd;
pub mod device;
pub mod error;
pub mod handle;
pub mod types;
pub mod uniform_ring;
pub mod validate;

pub use self::caps::{Caps, GraphicsBackendType};
pub use self::cmd::{BoundPipeline, CmdList, CmdListState, CommandTracker};
pub use self::device::Device;
pub use self::error::{CommandError, RenderError, ResourceError};
pub use self::handle::*;
pub use self::types::*;
pub use self::uniform_ring::UniformAllocator;
