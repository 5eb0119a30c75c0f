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

#![allow(dead_code)]

use spirv::{Decoration, Dim, Op, StorageClass};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Packs a nul-terminated literal string into words.
pub fn string_words(s: &str) -> Vec<u32> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// A minimal SPIR-V assembler: enough instructions to describe shader
/// interfaces, no function bodies.
#[derive(Debug)]
pub struct ModuleBuilder {
    words: Vec<u32>,
    next_id: u32,
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self {
            words: vec![spirv::MAGIC_NUMBER, 0x0001_0000, 0, 0, 0],
            next_id: 1,
        }
    }

    pub fn id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn inst(&mut self, op: Op, operands: &[u32]) {
        self.words.push(((operands.len() as u32 + 1) << 16) | op as u32);
        self.words.extend_from_slice(operands);
    }

    pub fn name(&mut self, target: u32, name: &str) {
        let mut ops = vec![target];
        ops.extend(string_words(name));
        self.inst(Op::Name, &ops);
    }

    pub fn member_name(&mut self, ty: u32, index: u32, name: &str) {
        let mut ops = vec![ty, index];
        ops.extend(string_words(name));
        self.inst(Op::MemberName, &ops);
    }

    pub fn decorate(&mut self, target: u32, decoration: Decoration, extra: &[u32]) {
        let mut ops = vec![target, decoration as u32];
        ops.extend_from_slice(extra);
        self.inst(Op::Decorate, &ops);
    }

    pub fn binding(&mut self, target: u32, set: u32, binding: u32) {
        self.decorate(target, Decoration::DescriptorSet, &[set]);
        self.decorate(target, Decoration::Binding, &[binding]);
    }

    pub fn float(&mut self) -> u32 {
        let id = self.id();
        self.inst(Op::TypeFloat, &[id, 32]);
        id
    }

    pub fn int(&mut self, signed: bool) -> u32 {
        let id = self.id();
        self.inst(Op::TypeInt, &[id, 32, signed as u32]);
        id
    }

    pub fn vector(&mut self, component: u32, count: u32) -> u32 {
        let id = self.id();
        self.inst(Op::TypeVector, &[id, component, count]);
        id
    }

    pub fn matrix(&mut self, column: u32, count: u32) -> u32 {
        let id = self.id();
        self.inst(Op::TypeMatrix, &[id, column, count]);
        id
    }

    pub fn structure(&mut self, members: &[u32]) -> u32 {
        let id = self.id();
        let mut ops = vec![id];
        ops.extend_from_slice(members);
        self.inst(Op::TypeStruct, &ops);
        id
    }

    pub fn array(&mut self, element: u32, length: u32) -> u32 {
        let uint = self.int(false);
        let constant = self.id();
        self.inst(Op::Constant, &[uint, constant, length]);
        let id = self.id();
        self.inst(Op::TypeArray, &[id, element, constant]);
        id
    }

    pub fn runtime_array(&mut self, element: u32) -> u32 {
        let id = self.id();
        self.inst(Op::TypeRuntimeArray, &[id, element]);
        id
    }

    pub fn sampled_image(&mut self, dim: Dim, depth: bool, arrayed: bool) -> u32 {
        let float = self.float();
        let image = self.id();
        self.inst(
            Op::TypeImage,
            &[image, float, dim as u32, depth as u32, arrayed as u32, 0, 1, 0],
        );
        let id = self.id();
        self.inst(Op::TypeSampledImage, &[id, image]);
        id
    }

    pub fn variable(&mut self, class: StorageClass, pointee: u32) -> u32 {
        let pointer = self.id();
        self.inst(Op::TypePointer, &[pointer, class as u32, pointee]);
        let id = self.id();
        self.inst(Op::Variable, &[pointer, id, class as u32]);
        id
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut words = self.words.clone();
        words[3] = self.next_id;
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

/// Declares `uniform Camera { mat4 view_proj; vec3 position; Light light;
/// float <unnamed>; } camera;` at binding 0, with
/// `struct Light { vec3 color; float intensity; }`.
pub fn declare_camera(m: &mut ModuleBuilder) {
    let float = m.float();
    let vec3 = m.vector(float, 3);
    let vec4 = m.vector(float, 4);
    let mat4 = m.matrix(vec4, 4);
    let light = m.structure(&[vec3, float]);
    m.name(light, "Light");
    m.member_name(light, 0, "color");
    m.member_name(light, 1, "intensity");
    let camera = m.structure(&[mat4, vec3, light, float]);
    m.name(camera, "Camera");
    m.member_name(camera, 0, "view_proj");
    m.member_name(camera, 1, "position");
    m.member_name(camera, 2, "light");
    m.decorate(camera, Decoration::Block, &[]);
    let var = m.variable(StorageClass::Uniform, camera);
    m.name(var, "camera");
    m.binding(var, 0, 0);
}

/// Vertex stage: the camera block and `buffer Bones { mat4 matrices[]; }`
/// at binding 2.
pub fn vertex_module() -> Vec<u8> {
    let mut m = ModuleBuilder::new();
    declare_camera(&mut m);
    let float = m.float();
    let vec4 = m.vector(float, 4);
    let mat4 = m.matrix(vec4, 4);
    let matrices = m.runtime_array(mat4);
    let bones = m.structure(&[matrices]);
    m.name(bones, "Bones");
    m.member_name(bones, 0, "matrices");
    m.decorate(bones, Decoration::BufferBlock, &[]);
    let var = m.variable(StorageClass::Uniform, bones);
    m.name(var, "bones");
    m.binding(var, 0, 2);
    m.bytes()
}

/// Fragment stage: the camera block, `sampler2D albedo` (1),
/// `sampler2DShadow shadow_map` (3) and `samplerCube probes[4]` (4).
pub fn fragment_module() -> Vec<u8> {
    let mut m = ModuleBuilder::new();
    declare_camera(&mut m);

    let albedo_ty = m.sampled_image(Dim::Dim2D, false, false);
    let albedo = m.variable(StorageClass::UniformConstant, albedo_ty);
    m.name(albedo, "albedo");
    m.binding(albedo, 0, 1);

    let shadow_ty = m.sampled_image(Dim::Dim2D, true, false);
    let shadow = m.variable(StorageClass::UniformConstant, shadow_ty);
    m.name(shadow, "shadow_map");
    m.binding(shadow, 0, 3);

    let cube = m.sampled_image(Dim::DimCube, false, false);
    let probes_ty = m.array(cube, 4);
    let probes = m.variable(StorageClass::UniformConstant, probes_ty);
    m.name(probes, "probes");
    m.binding(probes, 0, 4);
    m.bytes()
}
