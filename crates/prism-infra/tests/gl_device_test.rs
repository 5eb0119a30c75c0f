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

use prism_core::config::RhiConfig;
use prism_core::rhi::{
    BlendMode, BufferDesc, BufferUsage, CompareFunction, DepthBiasState, DepthStencilState, Device,
    PipelineDesc, PipelineHandle, RenderPassDesc, ResourceError, ScissorRect, ShaderCode,
    ShaderDesc, ShaderStage, Viewport,
};
use prism_infra::graphics::gl::{GlDevice, HeadlessGl};
use prism_infra::graphics::CallLog;

fn device() -> (GlDevice, CallLog) {
    common::init_logging();
    let gl = HeadlessGl::new();
    let calls = gl.call_log();
    (GlDevice::new(Box::new(gl), &RhiConfig::default()).unwrap(), calls)
}

fn pipelines(dev: &mut GlDevice) -> (PipelineHandle, PipelineHandle) {
    let mut shader = |stage| {
        dev.create_shader(&ShaderDesc {
            label: None,
            stage,
            code: ShaderCode::Glsl("void main() {}".into()),
            entry_point: "main".into(),
        })
        .unwrap()
    };
    let vs = shader(ShaderStage::Vertex);
    let fs = shader(ShaderStage::Fragment);
    let opaque = dev.create_pipeline(&PipelineDesc::graphics(vs, fs)).unwrap();
    let alpha = dev
        .create_pipeline(&PipelineDesc {
            blend: BlendMode::Alpha.blend_state(),
            ..PipelineDesc::graphics(vs, fs)
        })
        .unwrap();
    (opaque, alpha)
}

#[test]
fn buffers_are_created_written_and_released() {
    let (mut dev, calls) = device();
    let created = calls.count("create_buffer");
    let buffer = dev
        .create_buffer(&BufferDesc {
            label: Some("vertices".into()),
            size: 48,
            usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
            host_visible: false,
        })
        .unwrap();
    assert_ne!(buffer.id, 0);
    assert_eq!(calls.count("create_buffer"), created + 1);

    dev.write_buffer(buffer, 16, &[0u8; 32]).unwrap();
    assert_eq!(calls.count("buffer_sub_data"), 1);
    assert!(matches!(
        dev.write_buffer(buffer, 32, &[0u8; 32]),
        Err(ResourceError::OutOfBounds { .. })
    ));

    let zero = dev.create_buffer(&BufferDesc {
        label: None,
        size: 0,
        usage: BufferUsage::VERTEX,
        host_visible: true,
    });
    assert!(matches!(zero, Err(ResourceError::InvalidDescriptor(_))));

    dev.destroy_buffer(buffer).unwrap();
    assert!(matches!(
        dev.destroy_buffer(buffer),
        Err(ResourceError::InvalidHandle { .. })
    ));
    let next = dev
        .create_buffer(&BufferDesc {
            label: None,
            size: 4,
            usage: BufferUsage::UNIFORM,
            host_visible: true,
        })
        .unwrap();
    assert!(next.id > buffer.id);
}

#[test]
fn redundant_state_is_not_reissued() {
    let (mut dev, calls) = device();
    let (opaque, alpha) = pipelines(&mut dev);
    let mut cmd = dev.immediate();
    cmd.begin().unwrap();
    cmd.begin_render(&RenderPassDesc::to_default_target([0.0, 0.0, 0.0, 1.0]))
        .unwrap();

    cmd.set_pipeline(opaque).unwrap();
    cmd.set_pipeline(opaque).unwrap();
    assert_eq!(calls.count("use_program"), 1);
    assert_eq!(calls.count("set_blend"), 1);

    cmd.set_pipeline(alpha).unwrap();
    cmd.set_pipeline(opaque).unwrap();
    assert_eq!(calls.count("use_program"), 3);
    assert_eq!(calls.count("set_blend"), 3);
    // Raster and depth state are identical across the two pipelines.
    assert_eq!(calls.count("set_raster"), 1);
    assert_eq!(calls.count("set_depth_state"), 1);

    let viewports = calls.count("set_viewport");
    cmd.set_viewport(Viewport::new(640.0, 480.0)).unwrap();
    cmd.set_viewport(Viewport::new(640.0, 480.0)).unwrap();
    assert_eq!(calls.count("set_viewport"), viewports + 1);
    let scissors = calls.count("set_scissor");
    let rect = ScissorRect {
        x: 8,
        y: 8,
        width: 100,
        height: 50,
    };
    cmd.set_scissor(Some(rect)).unwrap();
    cmd.set_scissor(Some(rect)).unwrap();
    assert_eq!(calls.count("set_scissor"), scissors + 1);

    cmd.draw(3, 1, 0).unwrap();
    assert_eq!(calls.count("draw_arrays"), 1);
    cmd.end_render().unwrap();
    cmd.end().unwrap();
    drop(cmd);
    dev.present().unwrap();
}

#[test]
fn identical_depth_state_is_issued_once() {
    let (mut dev, calls) = device();
    let (opaque, _) = pipelines(&mut dev);
    let mut cmd = dev.immediate();
    cmd.begin().unwrap();
    cmd.begin_render(&RenderPassDesc::to_default_target([0.0, 0.0, 0.0, 1.0]))
        .unwrap();
    cmd.set_pipeline(opaque).unwrap();

    let read_only = DepthStencilState {
        depth_test: true,
        depth_write: false,
        depth_compare: CompareFunction::LessEqual,
    };
    let depth_calls = calls.count("set_depth_state");
    cmd.set_depth_stencil_state(&read_only).unwrap();
    cmd.set_depth_stencil_state(&read_only).unwrap();
    assert_eq!(calls.count("set_depth_state"), depth_calls + 1);

    let shadow_bias = DepthBiasState {
        constant: 1.25,
        slope_scale: 1.75,
        clamp: 0.0,
    };
    cmd.set_depth_bias(&shadow_bias).unwrap();
    cmd.set_depth_bias(&shadow_bias).unwrap();
    assert_eq!(calls.count("set_depth_bias"), 1);

    // A different bias goes through, and switching back does too.
    cmd.set_depth_bias(&DepthBiasState::default()).unwrap();
    assert_eq!(calls.count("set_depth_bias"), 2);
    cmd.set_depth_bias(&shadow_bias).unwrap();
    cmd.set_depth_bias(&shadow_bias).unwrap();
    assert_eq!(calls.count("set_depth_bias"), 3);

    cmd.end_render().unwrap();
    cmd.end().unwrap();
}
