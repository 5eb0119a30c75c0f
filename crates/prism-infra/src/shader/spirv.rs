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

//! SPIR-V module reflection.
//!
//! The reflector makes a single pass over the instruction stream, recording
//! debug names, decorations, type declarations, integer constants and
//! global variables, then resolves every `Uniform`, `UniformConstant` and
//! `StorageBuffer` variable into a uniform or a block.

use prism_core::reflection::{
    BlockKind, BlockMember, ReflectionError, ShaderBlock, ShaderReflection, ShaderReflectionSystem,
    UniformInfo, UniformType,
};
use prism_core::rhi::{ShaderStage, ShaderStages};
use spirv::{Decoration, Dim, Op, StorageClass};
use std::collections::{HashMap, HashSet};

const HEADER_WORDS: usize = 5;
const MAX_STRUCT_DEPTH: u32 = 16;

/// Reflects pre-compiled SPIR-V modules.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpirvReflectionSystem;

impl SpirvReflectionSystem {
    /// Creates the reflector.
    pub fn new() -> Self {
        Self
    }
}

impl ShaderReflectionSystem for SpirvReflectionSystem {
    fn name(&self) -> &'static str {
        "SPIR-V"
    }

    fn reflect(&self, code: &[u8], stage: ShaderStage) -> Result<ShaderReflection, ReflectionError> {
        let words = decode_words(code)?;
        let module = Module::parse(&words)?;
        let reflection = module.reflect(stage.into());
        log::debug!(
            "SpirvReflectionSystem: {:?} stage has {} uniforms and {} blocks",
            stage,
            reflection.uniforms().len(),
            reflection.blocks().len()
        );
        Ok(reflection)
    }
}

/// Splits the byte stream into host-order words, byte-swapping when the
/// magic shows the module was written with the other endianness.
fn decode_words(code: &[u8]) -> Result<Vec<u32>, ReflectionError> {
    if code.is_empty() {
        return Err(ReflectionError::Decode("empty SPIR-V module".into()));
    }
    if code.len() % 4 != 0 {
        return Err(ReflectionError::Decode(format!(
            "SPIR-V size {} is not a multiple of 4",
            code.len()
        )));
    }
    if code.len() < HEADER_WORDS * 4 {
        return Err(ReflectionError::Decode("truncated SPIR-V header".into()));
    }
    let words: Vec<u32> = bytemuck::pod_collect_to_vec(code);
    match words[0] {
        spirv::MAGIC_NUMBER => Ok(words),
        word if word.swap_bytes() == spirv::MAGIC_NUMBER => {
            Ok(words.into_iter().map(u32::swap_bytes).collect())
        }
        word => Err(ReflectionError::Decode(format!(
            "bad SPIR-V magic {word:#010x}"
        ))),
    }
}

/// Decodes a nul-terminated literal string packed into words.
fn literal_string(words: &[u32]) -> String {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    'outer: for word in words {
        for byte in word.to_le_bytes() {
            if byte == 0 {
                break 'outer;
            }
            bytes.push(byte);
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[derive(Debug, Clone)]
enum SpvType {
    Bool,
    Int { width: u32, signed: bool },
    Float { width: u32 },
    Vector { component: u32, count: u32 },
    Matrix { column: u32, count: u32 },
    Array { element: u32, length: u32 },
    RuntimeArray { element: u32 },
    Struct { members: Vec<u32> },
    Image { dim: Option<Dim>, depth: bool, arrayed: bool },
    SampledImage { image: u32 },
    Sampler,
    Pointer { pointee: u32 },
}

#[derive(Debug)]
struct Variable {
    id: u32,
    pointer: u32,
    class: StorageClass,
}

#[derive(Debug, Default)]
struct Module {
    names: HashMap<u32, String>,
    member_names: HashMap<(u32, u32), String>,
    bindings: HashMap<u32, u32>,
    blocks: HashSet<u32>,
    buffer_blocks: HashSet<u32>,
    types: HashMap<u32, SpvType>,
    constants: HashMap<u32, u32>,
    variables: Vec<Variable>,
}

fn operand(ops: &[u32], index: usize, op: Op) -> Result<u32, ReflectionError> {
    ops.get(index)
        .copied()
        .ok_or_else(|| ReflectionError::Decode(format!("Op{op:?} is missing operand {index}")))
}

impl Module {
    fn parse(words: &[u32]) -> Result<Self, ReflectionError> {
        let mut module = Module::default();
        let mut cursor = HEADER_WORDS;
        while cursor < words.len() {
            let head = words[cursor];
            let count = (head >> 16) as usize;
            if count == 0 || cursor + count > words.len() {
                return Err(ReflectionError::Decode(format!(
                    "malformed instruction at word {cursor}"
                )));
            }
            let ops = &words[cursor + 1..cursor + count];
            if let Some(op) = Op::from_u32(head & 0xffff) {
                module.record(op, ops)?;
            }
            cursor += count;
        }
        Ok(module)
    }

    fn record(&mut self, op: Op, ops: &[u32]) -> Result<(), ReflectionError> {
        let at = |index| operand(ops, index, op);
        match op {
            Op::Name => {
                self.names.insert(at(0)?, literal_string(&ops[1..]));
            }
            Op::MemberName => {
                let name = literal_string(ops.get(2..).unwrap_or_default());
                self.member_names.insert((at(0)?, at(1)?), name);
            }
            Op::Decorate => {
                let target = at(0)?;
                match Decoration::from_u32(at(1)?) {
                    Some(Decoration::Binding) => {
                        self.bindings.insert(target, at(2)?);
                    }
                    Some(Decoration::Block) => {
                        self.blocks.insert(target);
                    }
                    Some(Decoration::BufferBlock) => {
                        self.buffer_blocks.insert(target);
                    }
                    // Descriptor sets have no place in the reflection model;
                    // bindings are assumed unique across sets.
                    Some(Decoration::DescriptorSet) => {}
                    _ => {}
                }
            }
            Op::TypeBool => {
                self.types.insert(at(0)?, SpvType::Bool);
            }
            Op::TypeInt => {
                let ty = SpvType::Int {
                    width: at(1)?,
                    signed: at(2)? != 0,
                };
                self.types.insert(at(0)?, ty);
            }
            Op::TypeFloat => {
                self.types.insert(at(0)?, SpvType::Float { width: at(1)? });
            }
            Op::TypeVector => {
                let ty = SpvType::Vector {
                    component: at(1)?,
                    count: at(2)?,
                };
                self.types.insert(at(0)?, ty);
            }
            Op::TypeMatrix => {
                let ty = SpvType::Matrix {
                    column: at(1)?,
                    count: at(2)?,
                };
                self.types.insert(at(0)?, ty);
            }
            Op::TypeImage => {
                let ty = SpvType::Image {
                    dim: Dim::from_u32(at(2)?),
                    depth: at(3)? == 1,
                    arrayed: at(4)? != 0,
                };
                self.types.insert(at(0)?, ty);
            }
            Op::TypeSampledImage => {
                self.types.insert(at(0)?, SpvType::SampledImage { image: at(1)? });
            }
            Op::TypeSampler => {
                self.types.insert(at(0)?, SpvType::Sampler);
            }
            Op::TypeArray => {
                let ty = SpvType::Array {
                    element: at(1)?,
                    length: at(2)?,
                };
                self.types.insert(at(0)?, ty);
            }
            Op::TypeRuntimeArray => {
                self.types.insert(at(0)?, SpvType::RuntimeArray { element: at(1)? });
            }
            Op::TypeStruct => {
                let members = ops.get(1..).unwrap_or_default().to_vec();
                self.types.insert(at(0)?, SpvType::Struct { members });
            }
            Op::TypePointer => {
                self.types.insert(at(0)?, SpvType::Pointer { pointee: at(2)? });
            }
            Op::Constant => {
                self.constants.insert(at(1)?, at(2)?);
            }
            Op::Variable => {
                let class = StorageClass::from_u32(at(2)?);
                if let Some(class) = class {
                    self.variables.push(Variable {
                        id: at(1)?,
                        pointer: at(0)?,
                        class,
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Peels array wrappers, returning the innermost type and the outermost
    /// element count. Runtime arrays report a count of 0.
    fn strip_arrays(&self, mut id: u32) -> (u32, u32) {
        let mut size = None;
        for _ in 0..MAX_STRUCT_DEPTH {
            match self.types.get(&id) {
                Some(SpvType::Array { element, length }) => {
                    size.get_or_insert(self.constants.get(length).copied().unwrap_or(1));
                    id = *element;
                }
                Some(SpvType::RuntimeArray { element }) => {
                    size.get_or_insert(0);
                    id = *element;
                }
                _ => break,
            }
        }
        (id, size.unwrap_or(1))
    }

    fn scalar_kind(&self, id: u32) -> Option<&SpvType> {
        self.types.get(&id).filter(|t| {
            matches!(t, SpvType::Bool | SpvType::Int { .. } | SpvType::Float { .. })
        })
    }

    fn uniform_type(&self, id: u32) -> UniformType {
        match self.types.get(&id) {
            Some(SpvType::Bool) => UniformType::Bool,
            Some(SpvType::Float { width: 32 }) => UniformType::Float,
            Some(SpvType::Int { width: 32, signed: true }) => UniformType::Int,
            Some(SpvType::Int { width: 32, signed: false }) => UniformType::UInt,
            Some(SpvType::Vector { component, count }) => match self.scalar_kind(*component) {
                Some(SpvType::Float { width: 32 }) => UniformType::float_vector(*count),
                Some(SpvType::Int { width: 32, signed: true }) => UniformType::int_vector(*count),
                Some(SpvType::Int { width: 32, signed: false }) => UniformType::uint_vector(*count),
                _ => UniformType::Unknown,
            },
            Some(SpvType::Matrix { column, count }) => match self.types.get(column) {
                Some(SpvType::Vector { component, count: rows })
                    if matches!(self.scalar_kind(*component), Some(SpvType::Float { width: 32 })) =>
                {
                    UniformType::float_matrix(*count, *rows)
                }
                _ => UniformType::Unknown,
            },
            Some(SpvType::SampledImage { image }) => self.sampler_type(*image),
            Some(SpvType::Image { .. }) => self.sampler_type(id),
            _ => UniformType::Unknown,
        }
    }

    fn sampler_type(&self, image: u32) -> UniformType {
        let Some(SpvType::Image { dim, depth, arrayed }) = self.types.get(&image) else {
            return UniformType::Unknown;
        };
        match (dim, depth, arrayed) {
            (Some(Dim::Dim1D), _, false) => UniformType::Sampler1D,
            (Some(Dim::Dim2D), true, false) => UniformType::Sampler2DShadow,
            (Some(Dim::Dim2D), _, false) => UniformType::Sampler2D,
            (Some(Dim::Dim2D), _, true) => UniformType::Sampler2DArray,
            (Some(Dim::Dim3D), _, _) => UniformType::Sampler3D,
            (Some(Dim::DimCube), _, false) => UniformType::SamplerCube,
            _ => UniformType::Unknown,
        }
    }

    fn flatten_members(&self, struct_id: u32, prefix: &str, depth: u32, out: &mut Vec<BlockMember>) {
        let Some(SpvType::Struct { members }) = self.types.get(&struct_id) else {
            return;
        };
        for (index, member_type) in members.iter().enumerate() {
            let name = self
                .member_names
                .get(&(struct_id, index as u32))
                .filter(|n| !n.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("member{index}"));
            let name = format!("{prefix}{name}");
            let (inner, array_size) = self.strip_arrays(*member_type);
            match self.types.get(&inner) {
                Some(SpvType::Struct { .. }) if depth < MAX_STRUCT_DEPTH => {
                    self.flatten_members(inner, &format!("{name}."), depth + 1, out);
                }
                _ => out.push(BlockMember {
                    name,
                    ty: self.uniform_type(inner),
                    array_size,
                }),
            }
        }
    }

    fn reflect(&self, stage_mask: ShaderStages) -> ShaderReflection {
        let mut reflection = ShaderReflection::new();
        for variable in &self.variables {
            if !matches!(
                variable.class,
                StorageClass::Uniform | StorageClass::UniformConstant | StorageClass::StorageBuffer
            ) {
                continue;
            }
            let Some(SpvType::Pointer { pointee }) = self.types.get(&variable.pointer) else {
                continue;
            };
            let (inner, array_size) = self.strip_arrays(*pointee);
            let instance_name = self.names.get(&variable.id).cloned().unwrap_or_default();
            // Only descriptor-bound resources are reflected.
            let Some(binding) = self.bindings.get(&variable.id).copied() else {
                log::debug!(
                    "SpirvReflectionSystem: skipping variable %{} '{instance_name}' without a binding",
                    variable.id
                );
                continue;
            };

            if let Some(SpvType::Struct { .. }) = self.types.get(&inner) {
                let storage = variable.class == StorageClass::StorageBuffer
                    || self.buffer_blocks.contains(&inner);
                let block_name = self
                    .names
                    .get(&inner)
                    .filter(|n| !n.is_empty())
                    .cloned()
                    .or_else(|| Some(instance_name.clone()).filter(|n| !n.is_empty()))
                    .unwrap_or_else(|| format!("block{inner}"));
                if !storage && !self.blocks.contains(&inner) {
                    log::debug!("SpirvReflectionSystem: struct '{block_name}' lacks a Block decoration");
                }
                let mut members = Vec::new();
                self.flatten_members(inner, "", 0, &mut members);
                reflection.add_block(ShaderBlock {
                    kind: if storage { BlockKind::Storage } else { BlockKind::Uniform },
                    block_name,
                    instance_name,
                    stage_mask,
                    binding: Some(binding),
                    members,
                });
            } else {
                let name = if instance_name.is_empty() {
                    format!("uniform{}", variable.id)
                } else {
                    instance_name
                };
                reflection.add_uniform(
                    name,
                    UniformInfo {
                        ty: self.uniform_type(inner),
                        array_size,
                        stage_mask,
                        binding: Some(binding),
                    },
                );
            }
        }
        reflection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn header() -> Vec<u32> {
        vec![spirv::MAGIC_NUMBER, 0x0001_0000, 0, 64, 0]
    }

    fn inst(op: Op, operands: &[u32]) -> Vec<u32> {
        let mut out = vec![((operands.len() as u32 + 1) << 16) | op as u32];
        out.extend_from_slice(operands);
        out
    }

    fn string(s: &str) -> Vec<u32> {
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

    #[test]
    fn rejects_malformed_input() {
        let sys = SpirvReflectionSystem::new();
        assert!(matches!(sys.reflect(&[], ShaderStage::Vertex), Err(ReflectionError::Decode(_))));
        assert!(matches!(sys.reflect(&[1, 2, 3], ShaderStage::Vertex), Err(ReflectionError::Decode(_))));
        assert!(matches!(
            sys.reflect(&[0u8; 20], ShaderStage::Vertex),
            Err(ReflectionError::Decode(_))
        ));

        // A zero word count would loop forever if accepted.
        let mut words = header();
        words.push(Op::Nop as u32);
        assert!(sys.reflect(&word_bytes(&words), ShaderStage::Vertex).is_err());
    }

    #[test]
    fn header_only_module_is_empty() {
        let sys = SpirvReflectionSystem::new();
        let reflection = sys.reflect(&word_bytes(&header()), ShaderStage::Fragment).unwrap();
        assert!(reflection.is_empty());
    }

    #[test]
    fn big_endian_modules_are_accepted() {
        let mut words = header();
        words.extend(inst(Op::Name, &[vec![10], string("shadow_map")].concat()));
        words.extend(inst(Op::Decorate, &[10, Decoration::Binding as u32, 3]));
        words.extend(inst(Op::TypeFloat, &[1, 32]));
        words.extend(inst(Op::TypeImage, &[2, 1, Dim::Dim2D as u32, 1, 0, 0, 1, 0]));
        words.extend(inst(Op::TypeSampledImage, &[3, 2]));
        words.extend(inst(Op::TypePointer, &[4, StorageClass::UniformConstant as u32, 3]));
        words.extend(inst(Op::Variable, &[4, 10, StorageClass::UniformConstant as u32]));
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();

        let reflection = SpirvReflectionSystem::new()
            .reflect(&bytes, ShaderStage::Fragment)
            .unwrap();
        let shadow = reflection.uniform("shadow_map").unwrap();
        assert_eq!(shadow.ty, UniformType::Sampler2DShadow);
        assert_eq!(shadow.binding, Some(3));
        assert_eq!(shadow.stage_mask, ShaderStages::FRAGMENT);
    }

    #[test]
    fn variables_without_a_binding_are_ignored() {
        let mut words = header();
        words.extend(inst(Op::Name, &[vec![10], string("albedo")].concat()));
        words.extend(inst(Op::Name, &[vec![11], string("loose")].concat()));
        words.extend(inst(Op::Decorate, &[10, Decoration::Binding as u32, 1]));
        words.extend(inst(Op::TypeFloat, &[1, 32]));
        words.extend(inst(Op::TypeImage, &[2, 1, Dim::Dim2D as u32, 0, 0, 0, 1, 0]));
        words.extend(inst(Op::TypeSampledImage, &[3, 2]));
        words.extend(inst(Op::TypePointer, &[4, StorageClass::UniformConstant as u32, 3]));
        words.extend(inst(Op::Variable, &[4, 10, StorageClass::UniformConstant as u32]));
        words.extend(inst(Op::Variable, &[4, 11, StorageClass::UniformConstant as u32]));
        words.extend(inst(Op::Variable, &[4, 12, StorageClass::UniformConstant as u32]));

        let reflection = SpirvReflectionSystem::new()
            .reflect(&word_bytes(&words), ShaderStage::Fragment)
            .unwrap();
        assert_eq!(reflection.uniforms().len(), 1);
        assert_eq!(reflection.uniform("albedo").unwrap().ty, UniformType::Sampler2D);
        assert!(reflection.uniform("loose").is_none());
        assert!(reflection.uniform("uniform12").is_none());
    }

    #[test]
    fn unknown_opcodes_are_skipped() {
        let mut words = header();
        words.extend([(2 << 16) | 0xfff0, 7]);
        assert!(SpirvReflectionSystem::new()
            .reflect(&word_bytes(&words), ShaderStage::Vertex)
            .unwrap()
            .is_empty());
    }
}
