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

//! # Prism Infra
//!
//! Concrete implementations of the contracts defined in `prism-core`: the
//! OpenGL, Metal and Vulkan devices, the SPIR-V and MSL reflection systems,
//! the shader loader and the variant systems that combine them.
//!
//! Start with [`graphics::create_device`] to obtain a device and with the
//! factories in [`shader`] to build reflection and variant systems.

#![warn(missing_docs)]

pub mod graphics;
pub mod shader;

pub use graphics::{create_device, select_backend, NativeDrivers};
pub use shader::{
    create_metal_reflection_system, create_metal_variant_system, create_spirv_reflection_system,
    create_spirv_variant_system,
};
