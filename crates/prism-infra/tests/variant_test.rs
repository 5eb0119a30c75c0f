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
use prism_core::reflection::cache::load_reflection_cache;
use prism_core::rhi::{BlendMode, Device, Format, PipelineDesc, ShaderHandle};
use prism_core::variant::{ShaderVariantKey, VariantBuildContext, VariantError};
use prism_infra::graphics::gl::{GlDevice, HeadlessGl};
use prism_infra::graphics::metal::{HeadlessMetal, MetalDevice};
use prism_infra::shader::{create_metal_variant_system, create_spirv_variant_system, FsShaderLoader};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MSL: &str = r#"
vertex float4 vs_main(constant float4x4& mvp [[buffer(1)]]) { return float4(0); }
fragment float4 fs_main(texture2d<float> albedo [[texture(1)]]) { return float4(1); }
"#;

struct Assets {
    dir: tempfile::TempDir,
}

impl Assets {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn loader(&self) -> Arc<FsShaderLoader> {
        Arc::new(FsShaderLoader::new(self.dir.path()))
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    fn write_modules(&self, suffix: &str) {
        let spirv = self.path("shaders/spirv");
        fs::create_dir_all(&spirv).unwrap();
        fs::write(spirv.join(format!("lit.vert{suffix}.spv")), common::vertex_module()).unwrap();
        fs::write(spirv.join(format!("lit.frag{suffix}.spv")), common::fragment_module()).unwrap();
    }
}

fn context<'a>(template: &'a PipelineDesc, source: Option<&'a str>) -> VariantBuildContext<'a> {
    VariantBuildContext {
        vertex_path: Path::new("shaders/lit.vert"),
        fragment_path: Path::new("shaders/lit.frag"),
        vertex_entry: "vs_main",
        fragment_entry: "fs_main",
        source,
        pipeline: template,
    }
}

#[test]
fn spirv_variant_builds_four_pipelines_and_caches_reflection() {
    common::init_logging();
    let assets = Assets::new();
    assets.write_modules("__SKINNED_1");
    let gl = HeadlessGl::new();
    let calls = gl.call_log();
    let mut device = GlDevice::new(Box::new(gl), &RhiConfig::default()).unwrap();
    let system = create_spirv_variant_system(assets.loader(), &RhiConfig::default());
    let template = PipelineDesc::graphics(ShaderHandle::NONE, ShaderHandle::NONE);
    let key = ShaderVariantKey::new().with_define("SKINNED", "1");

    let data = system
        .build_variant(&mut device, &context(&template, None), &key)
        .unwrap();

    assert_eq!(calls.count("compile_shader"), 2);
    assert_eq!(calls.count("link_program"), 4);
    let mut ids: Vec<_> = data.pipelines.iter().map(|p| p.id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4);
    assert!(ids.iter().all(|id| *id != 0));
    assert_ne!(data.pipeline(BlendMode::Opaque), data.pipeline(BlendMode::Alpha));

    assert!(data.reflection.block("Camera").is_some());
    assert!(data.reflection.uniform("albedo").is_some());
    let cached = load_reflection_cache(&assets.path("shaders/spirv/lit.vert__SKINNED_1.reflection.bin"));
    assert_eq!(cached.as_ref(), Some(&data.reflection));

    data.destroy(&mut device).unwrap();
}

#[test]
fn spirv_variant_respects_disabled_cache() {
    let assets = Assets::new();
    assets.write_modules("");
    let mut device = GlDevice::new(Box::new(HeadlessGl::new()), &RhiConfig::default()).unwrap();
    let config = RhiConfig {
        write_reflection_cache: false,
        ..RhiConfig::default()
    };
    let system = create_spirv_variant_system(assets.loader(), &config);
    let template = PipelineDesc::graphics(ShaderHandle::NONE, ShaderHandle::NONE);

    system
        .build_variant(&mut device, &context(&template, None), &ShaderVariantKey::new())
        .unwrap();
    assert!(!assets.path("shaders/spirv/lit.vert.reflection.bin").exists());
}

#[test]
fn corrupt_spirv_module_is_a_reflection_error() {
    let assets = Assets::new();
    assets.write_modules("");
    fs::write(assets.path("shaders/spirv/lit.frag.spv"), [0u8; 24]).unwrap();
    let gl = HeadlessGl::new();
    let calls = gl.call_log();
    let mut device = GlDevice::new(Box::new(gl), &RhiConfig::default()).unwrap();
    let system = create_spirv_variant_system(assets.loader(), &RhiConfig::default());
    let template = PipelineDesc::graphics(ShaderHandle::NONE, ShaderHandle::NONE);

    let err = system
        .build_variant(&mut device, &context(&template, None), &ShaderVariantKey::new())
        .unwrap_err();
    assert!(matches!(err, VariantError::Reflection(_)));
    assert_eq!(calls.count("compile_shader"), 0);
}

#[test]
fn metal_variant_prefers_spirv_then_cache() {
    common::init_logging();
    let assets = Assets::new();
    let metal = HeadlessMetal::new();
    let calls = metal.call_log();
    let mut device = MetalDevice::new(Box::new(metal), &RhiConfig::default()).unwrap();
    let system = create_metal_variant_system(assets.loader(), &RhiConfig::default());
    let template = PipelineDesc::graphics(ShaderHandle::NONE, ShaderHandle::NONE);
    let key = ShaderVariantKey::new().with_define("USE_FOG", "1");
    let cache = assets.path("shaders/spirv/lit.vert__USE_FOG_1.reflection.bin");

    // Neither SPIR-V siblings nor a cache: nothing is compiled.
    let err = system
        .build_variant(&mut device, &context(&template, Some(MSL)), &key)
        .unwrap_err();
    assert!(matches!(err, VariantError::MissingReflection { .. }));
    assert_eq!(calls.count("new_library"), 0);

    // Siblings present: reflection comes from them and is persisted.
    assets.write_modules("__USE_FOG_1");
    let first = system
        .build_variant(&mut device, &context(&template, Some(MSL)), &key)
        .unwrap();
    assert_eq!(calls.count("new_library"), 2);
    assert_eq!(device.pipeline_state_count(), 4);
    assert_eq!(load_reflection_cache(&cache).as_ref(), Some(&first.reflection));

    // Siblings gone: the cache answers and is left as is.
    fs::remove_dir_all(assets.path("shaders/spirv")).unwrap();
    fs::create_dir_all(cache.parent().unwrap()).unwrap();
    fs::write(&cache, prism_core::reflection::cache::encode(&first.reflection)).unwrap();
    let modified = fs::metadata(&cache).unwrap().modified().unwrap();
    let second = system
        .build_variant(&mut device, &context(&template, Some(MSL)), &key)
        .unwrap();
    assert_eq!(second.reflection, first.reflection);
    assert_eq!(fs::metadata(&cache).unwrap().modified().unwrap(), modified);

    first.destroy(&mut device).unwrap();
    second.destroy(&mut device).unwrap();
}

#[test]
fn metal_variant_needs_source() {
    let assets = Assets::new();
    assets.write_modules("");
    let mut device = MetalDevice::new(Box::new(HeadlessMetal::new()), &RhiConfig::default()).unwrap();
    let system = create_metal_variant_system(assets.loader(), &RhiConfig::default());
    let template = PipelineDesc::graphics(ShaderHandle::NONE, ShaderHandle::NONE);

    let err = system
        .build_variant(&mut device, &context(&template, None), &ShaderVariantKey::new())
        .unwrap_err();
    assert!(matches!(err, VariantError::MissingSource(_)));
}

#[test]
fn metal_compile_failure_leaks_nothing() {
    let assets = Assets::new();
    assets.write_modules("");
    let mut device = MetalDevice::new(Box::new(HeadlessMetal::new()), &RhiConfig::default()).unwrap();
    let system = create_metal_variant_system(assets.loader(), &RhiConfig::default());
    let template = PipelineDesc::graphics(ShaderHandle::NONE, ShaderHandle::NONE);
    let source = "vertex float4 vs_main() { return float4(0); }";

    let err = system
        .build_variant(&mut device, &context(&template, Some(source)), &ShaderVariantKey::new())
        .unwrap_err();
    assert!(matches!(err, VariantError::Resource(_)));
    assert_eq!(device.pipeline_state_count(), 0);
}

#[test]
fn failed_pipelines_leave_no_reflection_cache() {
    let assets = Assets::new();
    assets.write_modules("");
    let cache = assets.path("shaders/spirv/lit.vert.reflection.bin");
    let broken = PipelineDesc {
        color_formats: vec![Format::Depth32Float],
        ..PipelineDesc::graphics(ShaderHandle::NONE, ShaderHandle::NONE)
    };

    let gl = HeadlessGl::new();
    let calls = gl.call_log();
    let mut device = GlDevice::new(Box::new(gl), &RhiConfig::default()).unwrap();
    let system = create_spirv_variant_system(assets.loader(), &RhiConfig::default());
    let err = system
        .build_variant(&mut device, &context(&broken, None), &ShaderVariantKey::new())
        .unwrap_err();
    assert!(matches!(err, VariantError::Resource(_)));
    assert_eq!(calls.count("compile_shader"), 2);
    assert_eq!(calls.count("delete_shader"), 2);
    assert!(!cache.exists());

    let mut metal = MetalDevice::new(Box::new(HeadlessMetal::new()), &RhiConfig::default()).unwrap();
    let system = create_metal_variant_system(assets.loader(), &RhiConfig::default());
    let err = system
        .build_variant(&mut metal, &context(&broken, Some(MSL)), &ShaderVariantKey::new())
        .unwrap_err();
    assert!(matches!(err, VariantError::Resource(_)));
    assert_eq!(metal.pipeline_state_count(), 0);
    assert!(!cache.exists());
}
