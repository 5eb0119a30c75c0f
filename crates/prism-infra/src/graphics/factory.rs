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

//! Backend selection and device creation.
//!
//! The factory never opens windows or contexts itself: the platform layer
//! hands it the native drivers it managed to create, and the factory picks
//! one according to the [`RhiConfig`].

use super::gl::{GlApi, GlDevice, HeadlessGl};
use super::metal::{HeadlessMetal, MetalDevice, MetalDriver};
use super::vulkan::{HeadlessVulkan, VulkanDevice, VulkanDriver};
use prism_core::config::{BackendPreference, RhiConfig};
use prism_core::rhi::{Device, GraphicsBackendType, RenderError};

/// Native drivers available to [`create_device`]. Missing entries are
/// backends the platform could not initialize.
#[derive(Debug, Default)]
pub struct NativeDrivers {
    /// An OpenGL context.
    pub gl: Option<Box<dyn GlApi>>,
    /// A Metal device.
    pub metal: Option<Box<dyn MetalDriver>>,
    /// A Vulkan device and swapchain.
    pub vulkan: Option<Box<dyn VulkanDriver>>,
}

impl NativeDrivers {
    /// Headless drivers for every backend; the Vulkan swapchain is
    /// `width` x `height`.
    pub fn headless(width: u32, height: u32) -> Self {
        Self {
            gl: Some(Box::new(HeadlessGl::new())),
            metal: Some(Box::new(HeadlessMetal::new())),
            vulkan: Some(Box::new(HeadlessVulkan::new(width, height))),
        }
    }
}

/// Returns `true` if `backend` can exist on the platform this crate was
/// built for.
pub fn is_backend_supported(backend: GraphicsBackendType) -> bool {
    match backend {
        GraphicsBackendType::OpenGL => true,
        GraphicsBackendType::Metal => cfg!(any(target_os = "macos", target_os = "ios")),
        GraphicsBackendType::Vulkan => !cfg!(target_arch = "wasm32"),
        GraphicsBackendType::Dx12 => false,
    }
}

/// Resolves the configured preference to a concrete backend.
///
/// `Auto` picks Metal on macOS when `prefer_metal` is set and OpenGL
/// otherwise. Explicit choices are honored as long as a device for them can
/// be built at all.
///
/// ## Errors
/// * `RenderError::Unsupported` - For Direct3D 12, which has no device.
pub fn select_backend(config: &RhiConfig) -> Result<GraphicsBackendType, RenderError> {
    select_backend_for(config, cfg!(target_os = "macos"))
}

fn select_backend_for(config: &RhiConfig, macos: bool) -> Result<GraphicsBackendType, RenderError> {
    match config.backend {
        BackendPreference::Auto if macos && config.prefer_metal => Ok(GraphicsBackendType::Metal),
        BackendPreference::Auto | BackendPreference::OpenGL => Ok(GraphicsBackendType::OpenGL),
        BackendPreference::Metal => Ok(GraphicsBackendType::Metal),
        BackendPreference::Vulkan => Ok(GraphicsBackendType::Vulkan),
        BackendPreference::Dx12 => Err(RenderError::Unsupported(format!(
            "{} has no device implementation",
            GraphicsBackendType::Dx12
        ))),
    }
}

/// Creates the device selected by `config` from the matching native driver.
///
/// ## Arguments
/// * `config` - Backend preference and device parameters.
/// * `drivers` - The native drivers the platform layer created.
///
/// ## Errors
/// * `RenderError::Unsupported` - If the selected backend has no device.
/// * `RenderError::InitializationFailed` - If the selected backend's driver
///   is missing or the device fails to initialize.
pub fn create_device(config: &RhiConfig, drivers: NativeDrivers) -> Result<Box<dyn Device>, RenderError> {
    let backend = select_backend(config)?;
    create_device_for(backend, config, drivers)
}

fn create_device_for(
    backend: GraphicsBackendType,
    config: &RhiConfig,
    drivers: NativeDrivers,
) -> Result<Box<dyn Device>, RenderError> {
    let missing = || RenderError::InitializationFailed(format!("no {backend} driver available"));
    log::info!("Prism: creating {backend} device");
    let device: Box<dyn Device> = match backend {
        GraphicsBackendType::OpenGL => {
            Box::new(GlDevice::new(drivers.gl.ok_or_else(missing)?, config)?)
        }
        GraphicsBackendType::Metal => {
            Box::new(MetalDevice::new(drivers.metal.ok_or_else(missing)?, config)?)
        }
        GraphicsBackendType::Vulkan => {
            Box::new(VulkanDevice::new(drivers.vulkan.ok_or_else(missing)?, config)?)
        }
        GraphicsBackendType::Dx12 => {
            return Err(RenderError::Unsupported(format!("{backend} has no device implementation")));
        }
    };
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(backend: BackendPreference, prefer_metal: bool) -> RhiConfig {
        RhiConfig {
            backend,
            prefer_metal,
            ..RhiConfig::default()
        }
    }

    #[test]
    fn auto_prefers_metal_only_on_macos() {
        let auto = config(BackendPreference::Auto, true);
        assert_eq!(select_backend_for(&auto, true).unwrap(), GraphicsBackendType::Metal);
        assert_eq!(select_backend_for(&auto, false).unwrap(), GraphicsBackendType::OpenGL);
        let no_pref = config(BackendPreference::Auto, false);
        assert_eq!(select_backend_for(&no_pref, true).unwrap(), GraphicsBackendType::OpenGL);
    }

    #[test]
    fn dx12_is_unsupported() {
        let dx = config(BackendPreference::Dx12, false);
        assert!(matches!(select_backend(&dx), Err(RenderError::Unsupported(_))));
        assert!(!is_backend_supported(GraphicsBackendType::Dx12));
        assert!(is_backend_supported(GraphicsBackendType::OpenGL));
    }

    #[test]
    fn missing_driver_fails_initialization() {
        let vulkan = config(BackendPreference::Vulkan, false);
        let result = create_device(&vulkan, NativeDrivers::default());
        assert!(matches!(result, Err(RenderError::InitializationFailed(_))));
    }

    #[test]
    fn explicit_backends_come_from_their_driver() {
        for (pref, expected) in [
            (BackendPreference::OpenGL, GraphicsBackendType::OpenGL),
            (BackendPreference::Metal, GraphicsBackendType::Metal),
            (BackendPreference::Vulkan, GraphicsBackendType::Vulkan),
        ] {
            let device = create_device(&config(pref, false), NativeDrivers::headless(64, 64)).unwrap();
            assert_eq!(device.backend(), expected);
        }
    }
}
