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

//! Defines the hierarchy of error types for the RHI.
//!
//! Resource creation reports [`ResourceError`], misuse of a command list
//! reports [`CommandError`], and device-level operations such as presenting
//! wrap both into [`RenderError`].

use super::cmd::CmdListState;
use thiserror::Error;

/// An error raised while creating, updating or resolving a GPU resource.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The descriptor is malformed (zero size, bad extent, ...).
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),
    /// A referenced handle does not name a live resource.
    #[error("Invalid {kind} handle {id}")]
    InvalidHandle {
        /// Resource category.
        kind: &'static str,
        /// The offending id.
        id: u32,
    },
    /// Too many attachments were requested.
    #[error("Too many color attachments: {count} (max {max})")]
    TooManyAttachments {
        /// Requested attachments.
        count: usize,
        /// Supported maximum.
        max: usize,
    },
    /// The backend compiler rejected a shader.
    #[error("Shader compilation failed for '{label}': {log}")]
    Compilation {
        /// Shader label.
        label: String,
        /// Compiler output.
        log: String,
    },
    /// Program link or pipeline state creation failed.
    #[error("Pipeline creation failed for '{label}': {log}")]
    PipelineCreation {
        /// Pipeline label.
        label: String,
        /// Linker / driver output.
        log: String,
    },
    /// A framebuffer is not complete.
    #[error("Incomplete framebuffer: {0}")]
    IncompleteFramebuffer(String),
    /// A write or read is outside the resource bounds.
    #[error("Access out of bounds: offset {offset} + {len} exceeds {size}")]
    OutOfBounds {
        /// Start offset.
        offset: u64,
        /// Length of the access.
        len: u64,
        /// Resource size.
        size: u64,
    },
    /// The backend does not implement this operation.
    #[error("Operation not supported by the {backend} backend: {operation}")]
    Unsupported {
        /// Backend name.
        backend: &'static str,
        /// Operation name.
        operation: &'static str,
    },
    /// An error reported by the native API.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl ResourceError {
    /// Convenience constructor for a stale or foreign handle.
    pub fn invalid<H: super::handle::ResourceHandle>(handle: H) -> Self {
        ResourceError::InvalidHandle {
            kind: H::KIND,
            id: handle.id(),
        }
    }
}

/// An error raised while recording commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The call is not valid in the command list's current state.
    #[error("'{op}' is not valid while the command list is {state:?}")]
    InvalidState {
        /// The rejected operation.
        op: &'static str,
        /// State at the time of the call.
        state: CmdListState,
    },
    /// The call needs a bound pipeline of the given kind.
    #[error("'{op}' requires a bound {expected} pipeline")]
    MissingPipeline {
        /// The rejected operation.
        op: &'static str,
        /// "graphics" or "compute".
        expected: &'static str,
    },
    /// The call needs a binding that was never made (e.g. an index buffer).
    #[error("'{op}' requires a bound {what}")]
    MissingBinding {
        /// The rejected operation.
        op: &'static str,
        /// What is missing.
        what: &'static str,
    },
    /// A handle passed to the command list does not resolve.
    #[error("'{op}' received an invalid {kind} handle {id}")]
    InvalidHandle {
        /// The rejected operation.
        op: &'static str,
        /// Resource category.
        kind: &'static str,
        /// The offending id.
        id: u32,
    },
    /// The backend does not implement this command.
    #[error("Command '{op}' is not supported by the {backend} backend")]
    Unsupported {
        /// Backend name.
        backend: &'static str,
        /// The rejected operation.
        op: &'static str,
    },
    /// The native API failed while recording.
    #[error("Backend error during '{op}': {message}")]
    Backend {
        /// The failing operation.
        op: &'static str,
        /// Native error text.
        message: String,
    },
}

impl CommandError {
    /// Convenience constructor for a handle that does not resolve.
    pub fn invalid<H: super::handle::ResourceHandle>(op: &'static str, handle: H) -> Self {
        CommandError::InvalidHandle {
            op,
            kind: H::KIND,
            id: handle.id(),
        }
    }
}

/// A device-level error.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The backend failed to initialize.
    #[error("Failed to initialize graphics backend: {0}")]
    InitializationFailed(String),
    /// The requested backend is not available in this build or platform.
    #[error("Backend not supported: {0}")]
    Unsupported(String),
    /// Acquiring or presenting a swapchain image failed.
    #[error("Surface error: {0}")]
    Surface(String),
    /// Submission failed.
    #[error("Submission failed: {0}")]
    Submission(String),
    /// A recording error surfaced at frame boundaries.
    #[error("Command recording failed: {0}")]
    Command(#[from] CommandError),
    /// A resource error surfaced at frame boundaries.
    #[error("Graphics resource operation failed: {0}")]
    Resource(#[from] ResourceError),
    /// The device was lost and must be recreated.
    #[error("The graphics device was lost and needs to be reinitialized.")]
    DeviceLost,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::handle::BufferHandle;
    use std::error::Error;

    #[test]
    fn invalid_handle_display() {
        let err = ResourceError::invalid(BufferHandle { id: 42 });
        assert_eq!(format!("{err}"), "Invalid buffer handle 42");
    }

    #[test]
    fn command_error_display_names_state() {
        let err = CommandError::InvalidState {
            op: "draw_indexed",
            state: CmdListState::Idle,
        };
        assert_eq!(
            format!("{err}"),
            "'draw_indexed' is not valid while the command list is Idle"
        );
    }

    #[test]
    fn render_error_wraps_resource_error() {
        let res_err = ResourceError::Backend("out of memory".to_string());
        let render_err: RenderError = res_err.into();
        assert_eq!(
            format!("{render_err}"),
            "Graphics resource operation failed: Backend error: out of memory"
        );
        assert!(render_err.source().is_some());
    }
}
