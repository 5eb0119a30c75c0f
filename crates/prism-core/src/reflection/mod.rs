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

//! Backend-agnostic shader interface metadata.
//!
//! A [`ShaderReflection`] describes the uniforms, samplers and uniform/storage
//! blocks of one shader stage or of a merged stage pair. Reflection systems in
//! `prism-infra` extract it from SPIR-V or Metal source; the variant systems
//! merge the vertex and fragment reflections and persist the result with the
//! binary format in [`cache`].

pub mod cache;

use crate::rhi::{ShaderStage, ShaderStages};
use std::collections::BTreeMap;
use thiserror::Error;

/// Type of a uniform or block member.
///
/// The discriminants are part of the reflection cache format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum UniformType {
    /// A type the reflector could not classify.
    #[default]
    Unknown = 0,
    Float = 1,
    Vec2 = 2,
    Vec3 = 3,
    Vec4 = 4,
    Int = 5,
    IVec2 = 6,
    IVec3 = 7,
    IVec4 = 8,
    UInt = 9,
    UVec2 = 10,
    UVec3 = 11,
    UVec4 = 12,
    Bool = 13,
    Mat2 = 14,
    Mat3 = 15,
    Mat4 = 16,
    Sampler1D = 17,
    Sampler2D = 18,
    Sampler2DArray = 19,
    Sampler3D = 20,
    SamplerCube = 21,
    Sampler2DShadow = 22,
}

impl UniformType {
    /// Decodes a cache type code.
    pub fn from_u8(code: u8) -> Option<Self> {
        use UniformType::*;
        const ALL: [UniformType; 23] = [
            Unknown,
            Float,
            Vec2,
            Vec3,
            Vec4,
            Int,
            IVec2,
            IVec3,
            IVec4,
            UInt,
            UVec2,
            UVec3,
            UVec4,
            Bool,
            Mat2,
            Mat3,
            Mat4,
            Sampler1D,
            Sampler2D,
            Sampler2DArray,
            Sampler3D,
            SamplerCube,
            Sampler2DShadow,
        ];
        ALL.get(code as usize).copied()
    }

    /// Returns `true` for sampler-family types.
    pub fn is_sampler(self) -> bool {
        matches!(
            self,
            UniformType::Sampler1D
                | UniformType::Sampler2D
                | UniformType::Sampler2DArray
                | UniformType::Sampler3D
                | UniformType::SamplerCube
                | UniformType::Sampler2DShadow
        )
    }

    /// Float vector type with `n` components.
    pub fn float_vector(n: u32) -> Self {
        match n {
            1 => UniformType::Float,
            2 => UniformType::Vec2,
            3 => UniformType::Vec3,
            4 => UniformType::Vec4,
            _ => UniformType::Unknown,
        }
    }

    /// Signed integer vector type with `n` components.
    pub fn int_vector(n: u32) -> Self {
        match n {
            1 => UniformType::Int,
            2 => UniformType::IVec2,
            3 => UniformType::IVec3,
            4 => UniformType::IVec4,
            _ => UniformType::Unknown,
        }
    }

    /// Unsigned integer vector type with `n` components.
    pub fn uint_vector(n: u32) -> Self {
        match n {
            1 => UniformType::UInt,
            2 => UniformType::UVec2,
            3 => UniformType::UVec3,
            4 => UniformType::UVec4,
            _ => UniformType::Unknown,
        }
    }

    /// Square float matrix with `columns` columns of `rows` rows. Non-square
    /// matrices are not classified.
    pub fn float_matrix(columns: u32, rows: u32) -> Self {
        match (columns, rows) {
            (2, 2) => UniformType::Mat2,
            (3, 3) => UniformType::Mat3,
            (4, 4) => UniformType::Mat4,
            _ => UniformType::Unknown,
        }
    }
}

/// Metadata of one loose uniform (typically a sampler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformInfo {
    /// Value type.
    pub ty: UniformType,
    /// Element count, 1 for non-arrays.
    pub array_size: u32,
    /// Stages that declare the uniform.
    pub stage_mask: ShaderStages,
    /// Binding slot, if the shader declares one.
    pub binding: Option<u32>,
}

/// Whether a block is a uniform buffer or a storage buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockKind {
    /// Read-only uniform block.
    Uniform = 0,
    /// Read/write storage block.
    Storage = 1,
}

/// One member of a block. Nested struct members are flattened to dotted names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMember {
    /// Member name, e.g. `"light.color"`.
    pub name: String,
    /// Member type.
    pub ty: UniformType,
    /// Element count, 1 for non-arrays.
    pub array_size: u32,
}

/// A uniform or storage block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBlock {
    /// Uniform or storage.
    pub kind: BlockKind,
    /// Name of the block type.
    pub block_name: String,
    /// Name of the block instance variable, possibly empty.
    pub instance_name: String,
    /// Stages that declare the block.
    pub stage_mask: ShaderStages,
    /// Binding slot, if the shader declares one.
    pub binding: Option<u32>,
    /// Members in declaration order.
    pub members: Vec<BlockMember>,
}

impl ShaderBlock {
    /// Looks up a member by name.
    pub fn member(&self, name: &str) -> Option<&BlockMember> {
        self.members.iter().find(|m| m.name == name)
    }

    fn fuse(&mut self, other: &ShaderBlock) {
        self.stage_mask |= other.stage_mask;
        if self.binding.is_none() {
            self.binding = other.binding;
        }
        if self.instance_name.is_empty() {
            self.instance_name.clone_from(&other.instance_name);
        }
        for member in &other.members {
            match self.members.iter_mut().find(|m| m.name == member.name) {
                Some(existing) => {
                    if existing.ty == UniformType::Unknown {
                        existing.ty = member.ty;
                    }
                    existing.array_size = existing.array_size.max(member.array_size);
                }
                None => self.members.push(member.clone()),
            }
        }
    }
}

/// The uniform / sampler / block interface of a shader.
///
/// Uniform names and block names are unique inside one reflection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderReflection {
    uniforms: BTreeMap<String, UniformInfo>,
    blocks: Vec<ShaderBlock>,
}

impl ShaderReflection {
    /// An empty reflection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if nothing was reflected.
    pub fn is_empty(&self) -> bool {
        self.uniforms.is_empty() && self.blocks.is_empty()
    }

    /// Loose uniforms, ordered by name.
    pub fn uniforms(&self) -> &BTreeMap<String, UniformInfo> {
        &self.uniforms
    }

    /// Looks up a loose uniform.
    pub fn uniform(&self, name: &str) -> Option<&UniformInfo> {
        self.uniforms.get(name)
    }

    /// Blocks in discovery order.
    pub fn blocks(&self) -> &[ShaderBlock] {
        &self.blocks
    }

    /// Looks up a block by block name, then by instance name.
    pub fn block(&self, name: &str) -> Option<&ShaderBlock> {
        self.blocks
            .iter()
            .find(|b| b.block_name == name)
            .or_else(|| {
                self.blocks
                    .iter()
                    .find(|b| !b.instance_name.is_empty() && b.instance_name == name)
            })
    }

    /// Inserts or updates a uniform.
    ///
    /// An existing entry keeps its type unless it is `Unknown`, its binding
    /// unless it has none, takes the larger array size and ORs stage masks.
    pub fn add_uniform(&mut self, name: impl Into<String>, info: UniformInfo) {
        use std::collections::btree_map::Entry;
        match self.uniforms.entry(name.into()) {
            Entry::Vacant(slot) => {
                slot.insert(info);
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if existing.ty == UniformType::Unknown {
                    existing.ty = info.ty;
                }
                existing.array_size = existing.array_size.max(info.array_size);
                existing.stage_mask |= info.stage_mask;
                if existing.binding.is_none() {
                    existing.binding = info.binding;
                }
            }
        }
    }

    /// Inserts a block, fusing it into an existing block matched by block
    /// name first and instance name second.
    pub fn add_block(&mut self, block: ShaderBlock) {
        let position = self
            .blocks
            .iter()
            .position(|b| b.block_name == block.block_name)
            .or_else(|| {
                if block.instance_name.is_empty() {
                    return None;
                }
                self.blocks
                    .iter()
                    .position(|b| b.instance_name == block.instance_name)
            });
        match position {
            Some(index) => self.blocks[index].fuse(&block),
            None => self.blocks.push(block),
        }
    }

    /// Merges `other` into `self` (typically fragment into vertex).
    pub fn merge(&mut self, other: &ShaderReflection) {
        for (name, info) in &other.uniforms {
            self.add_uniform(name.clone(), *info);
        }
        for block in &other.blocks {
            self.add_block(block.clone());
        }
    }

    /// Returns the merge of `a` and `b` without modifying either.
    pub fn merged(a: &ShaderReflection, b: &ShaderReflection) -> ShaderReflection {
        let mut out = a.clone();
        out.merge(b);
        out
    }
}

/// An error raised while reflecting a shader.
#[derive(Debug, Error)]
pub enum ReflectionError {
    /// The input is empty, truncated or otherwise malformed.
    #[error("Failed to decode shader module: {0}")]
    Decode(String),
    /// The reflector cannot handle this input.
    #[error("Unsupported shader input: {0}")]
    Unsupported(String),
}

/// Extracts a [`ShaderReflection`] from compiled or source shader code.
pub trait ShaderReflectionSystem: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Reflects one stage. Pure given its input.
    /// ## Errors
    /// * `ReflectionError::Decode` - If `code` is empty or malformed.
    fn reflect(&self, code: &[u8], stage: ShaderStage)
        -> Result<ShaderReflection, ReflectionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler(stage: ShaderStages, binding: Option<u32>) -> UniformInfo {
        UniformInfo {
            ty: UniformType::Sampler2D,
            array_size: 1,
            stage_mask: stage,
            binding,
        }
    }

    fn camera_block(stage: ShaderStages) -> ShaderBlock {
        ShaderBlock {
            kind: BlockKind::Uniform,
            block_name: "Camera".into(),
            instance_name: "camera".into(),
            stage_mask: stage,
            binding: Some(0),
            members: vec![
                BlockMember {
                    name: "view_proj".into(),
                    ty: UniformType::Mat4,
                    array_size: 1,
                },
                BlockMember {
                    name: "position".into(),
                    ty: UniformType::Vec3,
                    array_size: 1,
                },
            ],
        }
    }

    #[test]
    fn merge_ors_stage_masks_and_keeps_first_binding() {
        let mut vs = ShaderReflection::new();
        vs.add_uniform("albedo", sampler(ShaderStages::VERTEX, Some(1)));
        let mut fs = ShaderReflection::new();
        fs.add_uniform("albedo", sampler(ShaderStages::FRAGMENT, Some(5)));

        vs.merge(&fs);
        let albedo = vs.uniform("albedo").unwrap();
        assert_eq!(albedo.stage_mask, ShaderStages::VERTEX | ShaderStages::FRAGMENT);
        assert_eq!(albedo.binding, Some(1));
    }

    #[test]
    fn merge_fills_unknown_type_and_missing_binding() {
        let mut a = ShaderReflection::new();
        a.add_uniform(
            "shadow",
            UniformInfo {
                ty: UniformType::Unknown,
                array_size: 1,
                stage_mask: ShaderStages::VERTEX,
                binding: None,
            },
        );
        let mut b = ShaderReflection::new();
        b.add_uniform(
            "shadow",
            UniformInfo {
                ty: UniformType::Sampler2DShadow,
                array_size: 4,
                stage_mask: ShaderStages::FRAGMENT,
                binding: Some(3),
            },
        );
        a.merge(&b);
        let shadow = a.uniform("shadow").unwrap();
        assert_eq!(shadow.ty, UniformType::Sampler2DShadow);
        assert_eq!(shadow.array_size, 4);
        assert_eq!(shadow.binding, Some(3));
    }

    #[test]
    fn blocks_match_by_instance_name() {
        let mut a = ShaderReflection::new();
        a.add_block(camera_block(ShaderStages::VERTEX));
        let mut renamed = camera_block(ShaderStages::FRAGMENT);
        renamed.block_name = "CameraFs".into();
        renamed.members.push(BlockMember {
            name: "exposure".into(),
            ty: UniformType::Float,
            array_size: 1,
        });
        let mut b = ShaderReflection::new();
        b.add_block(renamed);

        a.merge(&b);
        assert_eq!(a.blocks().len(), 1);
        let camera = a.block("camera").unwrap();
        assert_eq!(camera.block_name, "Camera");
        assert_eq!(camera.members.len(), 3);
        assert_eq!(camera.stage_mask, ShaderStages::VERTEX | ShaderStages::FRAGMENT);
    }

    #[test]
    fn unmatched_block_is_appended() {
        let mut a = ShaderReflection::new();
        a.add_block(camera_block(ShaderStages::VERTEX));
        let mut other = camera_block(ShaderStages::FRAGMENT);
        other.block_name = "Material".into();
        other.instance_name = "material".into();
        a.add_block(other);
        assert_eq!(a.blocks().len(), 2);
        assert_eq!(a.blocks()[1].block_name, "Material");
    }

    #[test]
    fn self_merge_is_idempotent() {
        let mut a = ShaderReflection::new();
        a.add_uniform("albedo", sampler(ShaderStages::FRAGMENT, Some(1)));
        a.add_block(camera_block(ShaderStages::VERTEX));
        let merged = ShaderReflection::merged(&a, &a);
        assert_eq!(merged, a);
    }

    #[test]
    fn type_codes_round_trip() {
        for code in 0..=22u8 {
            let ty = UniformType::from_u8(code).unwrap();
            assert_eq!(ty as u8, code);
        }
        assert_eq!(UniformType::from_u8(23), None);
    }
}
