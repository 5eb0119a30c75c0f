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

//! OpenGL 4.5 backend.
//!
//! [`GlDevice`] implements the RHI device on top of the [`GlApi`] seam.
//! Two implementations of the seam ship: [`HeadlessGl`] (always available,
//! in-memory) and `GlowApi` (behind the `glow` feature, over a live context).

mod api;
mod cmd_list;
#[cfg(feature = "glow")]
mod conversions;
mod device;
#[cfg(feature = "glow")]
mod glow_api;
mod headless;

pub use self::api::{GlApi, GlAttachment, GlName, GlSyncStatus};
pub use self::cmd_list::GlCmdList;
pub use self::device::GlDevice;
#[cfg(feature = "glow")]
pub use self::glow_api::GlowApi;
pub use self::headless::HeadlessGl;
