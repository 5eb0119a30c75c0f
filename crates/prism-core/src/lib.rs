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

//! # Prism Core
//!
//! Foundational crate of the Prism render-hardware-interface. It contains the
//! opaque handle model, resource descriptors, the [`rhi::Device`] /
//! [`rhi::CmdList`] contracts every backend implements, the backend-agnostic
//! shader reflection model and the shader variant types.
//!
//! Concrete backends (GL, Metal, Vulkan) and the reflection / variant systems
//! live in `prism-infra`.

#![warn(missing_docs)]

pub mod config;
pub mod reflection;
pub mod rhi;
pub mod shadow;
pub mod variant;

pub use config::{DebugSettings, RhiConfig};
pub use rhi::{Caps, CmdList, Device};
