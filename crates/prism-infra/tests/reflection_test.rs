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

use prism_core::reflection::cache::{self, load_reflection_cache, write_reflection_cache};
use prism_core::reflection::{BlockKind, ShaderReflection, UniformType};
use prism_core::rhi::{ShaderStage, ShaderStages};
use prism_core::variant::ShaderVariantKey;
use prism_infra::shader::{create_metal_reflection_system, create_spirv_reflection_system};

fn reflect_pair() -> ShaderReflection {
    let sys = create_spirv_reflection_system();
    let mut vs = sys.reflect(&common::vertex_module(), ShaderStage::Vertex).unwrap();
    let fs = sys
        .reflect(&common::fragment_module(), ShaderStage::Fragment)
        .unwrap();
    vs.merge(&fs);
    vs
}

#[test]
fn spirv_bindings_and_types_are_preserved() {
    common::init_logging();
    let sys = create_spirv_reflection_system();
    let vs = sys.reflect(&common::vertex_module(), ShaderStage::Vertex).unwrap();

    let camera = vs.block("Camera").unwrap();
    assert_eq!(camera.kind, BlockKind::Uniform);
    assert_eq!(camera.instance_name, "camera");
    assert_eq!(camera.binding, Some(0));
    assert_eq!(camera.stage_mask, ShaderStages::VERTEX);
    let names: Vec<_> = camera.members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(
        names,
        ["view_proj", "position", "light.color", "light.intensity", "member3"]
    );
    assert_eq!(camera.member("view_proj").unwrap().ty, UniformType::Mat4);
    assert_eq!(camera.member("light.color").unwrap().ty, UniformType::Vec3);
    assert_eq!(camera.member("member3").unwrap().ty, UniformType::Float);

    let bones = vs.block("bones").unwrap();
    assert_eq!(bones.kind, BlockKind::Storage);
    assert_eq!(bones.binding, Some(2));
    let matrices = bones.member("matrices").unwrap();
    assert_eq!(matrices.ty, UniformType::Mat4);
    assert_eq!(matrices.array_size, 0);

    let fs = sys
        .reflect(&common::fragment_module(), ShaderStage::Fragment)
        .unwrap();
    let albedo = fs.uniform("albedo").unwrap();
    assert_eq!((albedo.ty, albedo.binding), (UniformType::Sampler2D, Some(1)));
    let shadow = fs.uniform("shadow_map").unwrap();
    assert_eq!((shadow.ty, shadow.binding), (UniformType::Sampler2DShadow, Some(3)));
    let probes = fs.uniform("probes").unwrap();
    assert_eq!(probes.ty, UniformType::SamplerCube);
    assert_eq!(probes.array_size, 4);
}

#[test]
fn merged_stages_share_blocks() {
    let merged = reflect_pair();
    let camera = merged.block("Camera").unwrap();
    assert_eq!(camera.stage_mask, ShaderStages::VERTEX | ShaderStages::FRAGMENT);
    assert_eq!(camera.members.len(), 5);
    assert_eq!(merged.blocks().len(), 2);
    assert_eq!(merged.uniforms().len(), 3);
}

#[test]
fn merging_with_itself_changes_nothing() {
    let merged = reflect_pair();
    let mut again = merged.clone();
    again.merge(&merged);
    assert_eq!(again, merged);
}

#[test]
fn cache_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spirv/lit.vert.reflection.bin");
    let merged = reflect_pair();
    write_reflection_cache(&merged, &path).unwrap();
    assert_eq!(load_reflection_cache(&path), Some(merged));
}

#[test]
fn corrupt_cache_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lit.reflection.bin");
    let mut bytes = cache::encode(&reflect_pair());

    bytes.truncate(bytes.len() - 3);
    std::fs::write(&path, &bytes).unwrap();
    assert_eq!(load_reflection_cache(&path), None);

    std::fs::write(&path, b"PRSMREFL\x02\x00\x00\x00").unwrap();
    assert_eq!(load_reflection_cache(&path), None);

    assert_eq!(load_reflection_cache(&dir.path().join("absent.bin")), None);
}

#[test]
fn variant_keys_compare_by_content() {
    let a: ShaderVariantKey = [("SHADOWS", "1"), ("FOG", "exp2")].into_iter().collect();
    let b = ShaderVariantKey::new()
        .with_define("FOG", "exp2")
        .with_define("SHADOWS", "1");
    assert_eq!(a, b);
    assert_eq!(a.decorate("lit.vert"), "lit.vert__FOG_exp2__SHADOWS_1");
    assert_ne!(a, b.with_define("SHADOWS", "0"));
}

#[test]
fn metal_and_spirv_reflect_the_same_sampler() {
    let msl = r#"
fragment float4 fs_main(texture2d<float> albedo [[texture(1)]], sampler s [[sampler(0)]]) {
    return albedo.sample(s, float2(0));
}
"#;
    let from_msl = create_metal_reflection_system()
        .reflect(msl.as_bytes(), ShaderStage::Fragment)
        .unwrap();
    let from_spirv = create_spirv_reflection_system()
        .reflect(&common::fragment_module(), ShaderStage::Fragment)
        .unwrap();
    assert_eq!(from_msl.uniform("albedo"), from_spirv.uniform("albedo"));
}
