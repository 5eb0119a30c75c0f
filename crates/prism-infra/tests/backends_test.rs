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

mod common;

use approx::assert_relative_eq;
use glam::{Vec3, Vec4};
use prism_core::config::{BackendPreference, RhiConfig};
use prism_core::rhi::{
    Device, GraphicsBackendType, PipelineDesc, RenderError, RenderPassDesc, ShaderCode,
    ShaderDesc, ShaderHandle, ShaderStage,
};
use prism_core::shadow::{ShadowLight, ShadowMap, ShadowSettings};
use prism_infra::graphics::metal::{HeadlessMetal, MetalDevice};
use prism_infra::graphics::vulkan::HeadlessVulkan;
use prism_infra::graphics::{create_device, NativeDrivers};

fn config(backend: BackendPreference) -> RhiConfig {
    RhiConfig {
        backend,
        ..RhiConfig::default()
    }
}

fn msl_shader(device: &mut dyn Device, stage: ShaderStage, entry: &str) -> ShaderHandle {
    device
        .create_shader(&ShaderDesc {
            label: None,
            stage,
            code: ShaderCode::Msl(format!("{entry}() {{}}")),
            entry_point: entry.into(),
        })
        .unwrap()
}

#[test]
fn dx12_is_rejected_by_the_factory() {
    common::init_logging();
    let result = create_device(&config(BackendPreference::Dx12), NativeDrivers::headless(64, 64));
    assert!(matches!(result, Err(RenderError::Unsupported(_))));
}

#[test]
fn factory_devices_report_their_backend() {
    let device = create_device(&config(BackendPreference::Vulkan), NativeDrivers::headless(64, 64)).unwrap();
    assert_eq!(device.backend(), GraphicsBackendType::Vulkan);
    assert!(device.caps().clip_space_y_down);
}

#[test]
fn vulkan_recovers_from_an_out_of_date_swapchain() {
    common::init_logging();
    let mut vk = HeadlessVulkan::new(320, 240);
    vk.fail_next_acquires(1);
    let calls = vk.call_log();
    let drivers = NativeDrivers {
        vulkan: Some(Box::new(vk)),
        ..NativeDrivers::default()
    };
    let mut device = create_device(&config(BackendPreference::Vulkan), drivers).unwrap();

    for _ in 0..3 {
        let mut cmd = device.immediate();
        cmd.begin().unwrap();
        cmd.begin_render(&RenderPassDesc::to_default_target([0.1, 0.1, 0.1, 1.0]))
            .unwrap();
        cmd.end_render().unwrap();
        cmd.end().unwrap();
        drop(cmd);
        device.present().unwrap();
    }

    assert_eq!(calls.count("recreate_swapchain"), 1);
    assert_eq!(calls.count("acquire_next_image"), 4);
    assert_eq!(calls.count("submit"), 3);
    assert_eq!(calls.count("present"), 3);
    assert_eq!(calls.count("violation:not_recording"), 0);
}

#[test]
fn metal_pipeline_states_are_shared() {
    let mut device = MetalDevice::new(Box::new(HeadlessMetal::new()), &RhiConfig::default()).unwrap();
    let vs = msl_shader(&mut device, ShaderStage::Vertex, "vs_main");
    let fs = msl_shader(&mut device, ShaderStage::Fragment, "fs_main");
    let desc = PipelineDesc::graphics(vs, fs);

    let a = device.create_pipeline(&desc).unwrap();
    let b = device.create_pipeline(&desc).unwrap();
    assert_ne!(a, b);
    assert_eq!(device.pipeline_state_count(), 1);
    assert_eq!(device.pipeline_cache_stats(), (1, 1));

    device.destroy_pipeline(a).unwrap();
    assert_eq!(device.pipeline_state_count(), 1);
    device.destroy_pipeline(b).unwrap();
    assert_eq!(device.pipeline_state_count(), 0);
}

#[test]
fn shadow_projection_follows_device_clip_space() {
    let light = ShadowLight {
        position: Vec3::new(0.0, 20.0, 0.0),
        direction: Vec3::NEG_Y,
    };
    let settings = ShadowSettings {
        resolution: 512,
        ..ShadowSettings::default()
    };
    // In front of the light, towards the top of its frustum.
    let point = Vec4::new(0.0, 10.0, 5.0, 1.0);

    let mut metal = MetalDevice::new(Box::new(HeadlessMetal::new()), &RhiConfig::default()).unwrap();
    let mut y_down = ShadowMap::initialize(&mut metal, settings, light).unwrap();
    let clip_down = y_down.light_view_projection() * point;

    let mut gl = create_device(&config(BackendPreference::OpenGL), NativeDrivers::headless(64, 64)).unwrap();
    let mut y_up = ShadowMap::initialize(gl.as_mut(), settings, light).unwrap();
    let clip_up = y_up.light_view_projection() * point;

    assert_relative_eq!(clip_up.y, 0.2, epsilon = 1e-5);
    assert_relative_eq!(clip_down.y, -clip_up.y, epsilon = 1e-5);
    assert_relative_eq!(clip_down.x, clip_up.x, epsilon = 1e-5);
    // Depth remapped from [-1, 1] to [0, 1].
    assert_relative_eq!(clip_down.z, clip_up.z * 0.5 + 0.5, epsilon = 1e-5);
    assert_ne!(y_down.sampler().id, 0);

    let uniforms = y_down.uniforms();
    assert_relative_eq!(uniforms.params[0], 1.0 / 512.0);

    y_down.destroy(&mut metal).unwrap();
    y_up.destroy(gl.as_mut()).unwrap();
}

#[test]
fn shadow_matrix_terms_carry_the_correction() {
    // Looking down -Z keeps the view a pure translation, so the corrected
    // projection terms show up unmixed.
    let light = ShadowLight {
        position: Vec3::new(0.0, 0.0, 20.0),
        direction: Vec3::NEG_Z,
    };
    let settings = ShadowSettings {
        resolution: 2048,
        near: 1.0,
        far: 100.0,
        ortho_size: 25.0,
        ..ShadowSettings::default()
    };

    let mut metal = MetalDevice::new(Box::new(HeadlessMetal::new()), &RhiConfig::default()).unwrap();
    assert!(metal.caps().clip_space_y_down);
    let mut shadow = ShadowMap::initialize(&mut metal, settings, light).unwrap();
    let m = shadow.light_view_projection().to_cols_array_2d();
    assert_relative_eq!(m[1][1], -2.0 / 50.0, epsilon = 1e-6);
    assert_relative_eq!(m[2][2], -1.0 / 99.0, epsilon = 1e-6);
    assert_relative_eq!(m[3][2], 19.0 / 99.0, epsilon = 1e-6);

    let mut gl = create_device(&config(BackendPreference::OpenGL), NativeDrivers::headless(64, 64)).unwrap();
    let mut reference = ShadowMap::initialize(gl.as_mut(), settings, light).unwrap();
    let g = reference.light_view_projection().to_cols_array_2d();
    assert_relative_eq!(g[1][1], 2.0 / 50.0, epsilon = 1e-6);
    assert_relative_eq!(g[2][2], -2.0 / 99.0, epsilon = 1e-6);
    assert_relative_eq!(g[3][2], -61.0 / 99.0, epsilon = 1e-6);

    shadow.destroy(&mut metal).unwrap();
    reference.destroy(gl.as_mut()).unwrap();
}
