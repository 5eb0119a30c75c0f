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

//! The Metal backend.
//!
//! [`MetalDevice`] is written against the [`MetalDriver`] trait.
//! [`HeadlessMetal`] emulates an Apple GPU for tests and offscreen tooling;
//! `NativeMetal` (macOS, behind the `metal` feature) drives the system
//! device through `objc2-metal`.

mod cmd_list;
mod device;
mod driver;
mod headless;
#[cfg(all(feature = "metal", target_os = "macos"))]
mod native;
mod pipeline_cache;

pub use self::cmd_list::{MetalCmdList, VERTEX_BUFFER_BASE};
pub use self::device::MetalDevice;
pub use self::driver::{
    EncoderCommand, MetalDriver, MtlColorTarget, MtlDepthTarget, MtlObject, MtlRenderPass,
    MtlRenderPipelineDesc,
};
pub use self::headless::HeadlessMetal;
#[cfg(all(feature = "metal", target_os = "macos"))]
pub use self::native::NativeMetal;
pub use self::pipeline_cache::{PipelineCache, PipelineKey};
