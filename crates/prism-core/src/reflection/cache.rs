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

//! Versioned binary persistence of a [`ShaderReflection`].
//!
//! Layout (all integers little-endian, strings as `u32` length + UTF-8):
//!
//! ```text
//! magic "PRSMREFL" | u32 version
//! u32 uniform_count
//!   { name | u8 type | u32 array_size | u32 stage_mask | i32 binding or -1 }
//! u32 block_count
//!   { u8 kind | block_name | instance_name | u32 stage_mask | i32 binding or -1
//!     | u32 member_count | { name | u8 type | u32 array_size } }
//! ```
//!
//! Decoding is all-or-nothing: any inconsistency yields `None` so the caller
//! treats the file as absent.

use super::{BlockKind, BlockMember, ShaderBlock, ShaderReflection, UniformInfo, UniformType};
use crate::rhi::ShaderStages;
use std::fs;
use std::io;
use std::path::Path;

/// File magic.
pub const MAGIC: &[u8; 8] = b"PRSMREFL";
/// Current format version.
pub const VERSION: u32 = 1;

/// Serializes a reflection.
pub fn encode(reflection: &ShaderReflection) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(MAGIC);
    put_u32(&mut out, VERSION);

    put_u32(&mut out, reflection.uniforms().len() as u32);
    for (name, info) in reflection.uniforms() {
        put_str(&mut out, name);
        out.push(info.ty as u8);
        put_u32(&mut out, info.array_size);
        put_u32(&mut out, info.stage_mask.bits());
        put_binding(&mut out, info.binding);
    }

    put_u32(&mut out, reflection.blocks().len() as u32);
    for block in reflection.blocks() {
        out.push(block.kind as u8);
        put_str(&mut out, &block.block_name);
        put_str(&mut out, &block.instance_name);
        put_u32(&mut out, block.stage_mask.bits());
        put_binding(&mut out, block.binding);
        put_u32(&mut out, block.members.len() as u32);
        for member in &block.members {
            put_str(&mut out, &member.name);
            out.push(member.ty as u8);
            put_u32(&mut out, member.array_size);
        }
    }
    out
}

/// Deserializes a reflection, returning `None` on any malformation.
pub fn decode(bytes: &[u8]) -> Option<ShaderReflection> {
    let mut r = Reader { bytes, pos: 0 };
    if r.take(MAGIC.len())? != MAGIC || r.u32()? != VERSION {
        return None;
    }

    let mut reflection = ShaderReflection::new();
    let uniform_count = r.u32()?;
    for _ in 0..uniform_count {
        let name = r.string()?;
        let info = UniformInfo {
            ty: UniformType::from_u8(r.u8()?)?,
            array_size: r.u32()?,
            stage_mask: ShaderStages::from_bits(r.u32()?)?,
            binding: r.binding()?,
        };
        if reflection.uniform(&name).is_some() {
            return None;
        }
        reflection.add_uniform(name, info);
    }

    let block_count = r.u32()?;
    for _ in 0..block_count {
        let kind = match r.u8()? {
            0 => BlockKind::Uniform,
            1 => BlockKind::Storage,
            _ => return None,
        };
        let block_name = r.string()?;
        let instance_name = r.string()?;
        let stage_mask = ShaderStages::from_bits(r.u32()?)?;
        let binding = r.binding()?;
        let member_count = r.u32()?;
        let mut members = Vec::new();
        for _ in 0..member_count {
            members.push(BlockMember {
                name: r.string()?,
                ty: UniformType::from_u8(r.u8()?)?,
                array_size: r.u32()?,
            });
        }
        if reflection.blocks().iter().any(|b| b.block_name == block_name) {
            return None;
        }
        reflection.add_block(ShaderBlock {
            kind,
            block_name,
            instance_name,
            stage_mask,
            binding,
            members,
        });
    }

    if r.pos != bytes.len() {
        return None;
    }
    Some(reflection)
}

/// Writes `reflection` to `path`, creating parent directories.
pub fn write_reflection_cache(reflection: &ShaderReflection, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, encode(reflection))
}

/// Loads a cache file. Missing, unreadable or corrupt files yield `None`.
pub fn load_reflection_cache(path: &Path) -> Option<ShaderReflection> {
    let bytes = fs::read(path).ok()?;
    let reflection = decode(&bytes);
    if reflection.is_none() {
        log::warn!("Ignoring invalid reflection cache {}", path.display());
    }
    reflection
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_str(out: &mut Vec<u8>, value: &str) {
    put_u32(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}

fn put_binding(out: &mut Vec<u8>, binding: Option<u32>) {
    let raw = binding.map_or(-1, |b| b as i32);
    out.extend_from_slice(&raw.to_le_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        let raw = self.take(4)?;
        Some(u32::from_le_bytes(raw.try_into().ok()?))
    }

    fn binding(&mut self) -> Option<Option<u32>> {
        let raw = self.take(4)?;
        match i32::from_le_bytes(raw.try_into().ok()?) {
            -1 => Some(None),
            b if b >= 0 => Some(Some(b as u32)),
            _ => None,
        }
    }

    fn string(&mut self) -> Option<String> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ShaderReflection {
        let mut r = ShaderReflection::new();
        r.add_uniform(
            "u_albedo",
            UniformInfo {
                ty: UniformType::Sampler2D,
                array_size: 1,
                stage_mask: ShaderStages::FRAGMENT,
                binding: Some(2),
            },
        );
        r.add_uniform(
            "u_tint",
            UniformInfo {
                ty: UniformType::Vec4,
                array_size: 3,
                stage_mask: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                binding: None,
            },
        );
        r.add_block(ShaderBlock {
            kind: BlockKind::Uniform,
            block_name: "Globals".into(),
            instance_name: "globals".into(),
            stage_mask: ShaderStages::VERTEX,
            binding: Some(0),
            members: vec![
                BlockMember {
                    name: "view_proj".into(),
                    ty: UniformType::Mat4,
                    array_size: 1,
                },
                BlockMember {
                    name: "time".into(),
                    ty: UniformType::Float,
                    array_size: 1,
                },
            ],
        });
        r.add_block(ShaderBlock {
            kind: BlockKind::Storage,
            block_name: "Particles".into(),
            instance_name: String::new(),
            stage_mask: ShaderStages::COMPUTE,
            binding: None,
            members: vec![],
        });
        r
    }

    #[test]
    fn encode_decode_preserves_everything() {
        let original = sample();
        let decoded = decode(&encode(&original)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn header_is_magic_then_version() {
        let bytes = encode(&ShaderReflection::new());
        assert_eq!(&bytes[..8], b"PRSMREFL");
        assert_eq!(&bytes[8..12], &1u32.to_le_bytes());
        assert_eq!(bytes.len(), 20);
    }

    #[test]
    fn every_truncation_is_rejected() {
        let bytes = encode(&sample());
        for len in 0..bytes.len() {
            assert!(decode(&bytes[..len]).is_none(), "prefix of {len} bytes decoded");
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = encode(&sample());
        bytes.push(0);
        assert!(decode(&bytes).is_none());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut bytes = encode(&sample());
        bytes[8..12].copy_from_slice(&2u32.to_le_bytes());
        assert!(decode(&bytes).is_none());
    }

    #[test]
    fn unknown_type_code_is_rejected() {
        let mut r = ShaderReflection::new();
        r.add_uniform(
            "a",
            UniformInfo {
                ty: UniformType::Float,
                array_size: 1,
                stage_mask: ShaderStages::VERTEX,
                binding: None,
            },
        );
        let mut bytes = encode(&r);
        // magic + version + count + name(4 + 1) puts the type byte at 21.
        bytes[21] = 200;
        assert!(decode(&bytes).is_none());
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/basic.vert.reflection.bin");
        write_reflection_cache(&sample(), &path).unwrap();
        assert_eq!(load_reflection_cache(&path), Some(sample()));
        assert_eq!(load_reflection_cache(&dir.path().join("missing.bin")), None);
    }
}
