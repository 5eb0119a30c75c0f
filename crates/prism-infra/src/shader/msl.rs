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

//! Metal Shading Language source reflection.
//!
//! MSL has no binary interface description, so the reflector scans the
//! source: struct declarations give block layouts, and the parameters of the
//! requested stage's entry points give bindings. `[[buffer(n)]]` parameters
//! in the `constant` address space become uniform blocks, `device` ones
//! storage blocks, and `[[texture(n)]]` parameters sampler uniforms.
//!
//! Preprocessor conditionals are not evaluated.

use prism_core::reflection::{
    BlockKind, BlockMember, ReflectionError, ShaderBlock, ShaderReflection, ShaderReflectionSystem,
    UniformInfo, UniformType,
};
use prism_core::rhi::{ShaderStage, ShaderStages};
use std::collections::HashMap;

const MAX_STRUCT_DEPTH: u32 = 16;

/// Reflects MSL source text.
#[derive(Debug, Default, Clone, Copy)]
pub struct MslReflectionSystem;

impl MslReflectionSystem {
    /// Creates the reflector.
    pub fn new() -> Self {
        Self
    }
}

impl ShaderReflectionSystem for MslReflectionSystem {
    fn name(&self) -> &'static str {
        "MSL"
    }

    fn reflect(&self, code: &[u8], stage: ShaderStage) -> Result<ShaderReflection, ReflectionError> {
        let source = std::str::from_utf8(code)
            .map_err(|e| ReflectionError::Decode(format!("MSL source is not UTF-8: {e}")))?;
        let source = strip_comments_and_directives(source);
        if source.trim().is_empty() {
            return Err(ReflectionError::Decode("empty MSL source".into()));
        }

        let structs = parse_structs(&source);
        let keyword = stage_keyword(stage);
        let entries = find_entry_points(&source, keyword);
        if entries.is_empty() {
            return Err(ReflectionError::Decode(format!(
                "no '{keyword}' entry point in MSL source"
            )));
        }

        let stage_mask = ShaderStages::from(stage);
        let mut reflection = ShaderReflection::new();
        for entry in &entries {
            log::debug!("MslReflectionSystem: reflecting {keyword} function '{}'", entry.name);
            for param in split_top_level(&entry.params, ',') {
                reflect_param(param, &structs, stage_mask, &mut reflection);
            }
        }
        Ok(reflection)
    }
}

fn stage_keyword(stage: ShaderStage) -> &'static str {
    match stage {
        ShaderStage::Vertex => "vertex",
        ShaderStage::Fragment => "fragment",
        ShaderStage::Compute => "kernel",
    }
}

/// Removes `//` and `/* */` comments and preprocessor lines.
fn strip_comments_and_directives(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut line_start = true;
    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
                line_start = true;
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                for c in chars.by_ref() {
                    if previous == '*' && c == '/' {
                        break;
                    }
                    previous = c;
                }
                out.push(' ');
            }
            '#' if line_start => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '\n' => {
                out.push(c);
                line_start = true;
            }
            c => {
                if !c.is_whitespace() {
                    line_start = false;
                }
                out.push(c);
            }
        }
    }
    out
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Byte offsets of `word` occurring as a whole identifier.
fn word_positions<'a>(source: &'a str, word: &'a str) -> impl Iterator<Item = usize> + 'a {
    source.match_indices(word).filter_map(move |(at, _)| {
        let before = source[..at].chars().next_back();
        let after = source[at + word.len()..].chars().next();
        let bounded = !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char);
        bounded.then_some(at)
    })
}

/// Returns the text between the bracket opening at `open` and its match.
fn balanced(source: &str, open: usize, left: char, right: char) -> Option<(&str, usize)> {
    let mut depth = 0usize;
    for (offset, c) in source[open..].char_indices() {
        if c == left {
            depth += 1;
        } else if c == right {
            depth -= 1;
            if depth == 0 {
                let end = open + offset;
                return Some((&source[open + left.len_utf8()..end], end + right.len_utf8()));
            }
        }
    }
    None
}

/// Splits on `separator` outside of `()`, `<>`, `[]` and `{}` nesting.
fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (at, c) in text.char_indices() {
        match c {
            '(' | '<' | '[' | '{' => depth += 1,
            ')' | '>' | ']' | '}' => depth -= 1,
            c if c == separator && depth == 0 => {
                parts.push(text[start..at].trim());
                start = at + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(text[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// Splits a declaration into its `[[...]]` attribute bodies and the rest.
fn split_attributes(text: &str) -> (String, Vec<String>) {
    let mut rest = String::with_capacity(text.len());
    let mut attributes = Vec::new();
    let mut remaining = text;
    while let Some(open) = remaining.find("[[") {
        rest.push_str(&remaining[..open]);
        match remaining[open + 2..].find("]]") {
            Some(close) => {
                attributes.push(remaining[open + 2..open + 2 + close].trim().to_string());
                remaining = &remaining[open + 2 + close + 2..];
            }
            None => {
                remaining = "";
            }
        }
    }
    rest.push_str(remaining);
    (rest, attributes)
}

/// Parses `name(n)` in an attribute body.
fn attribute_index(attribute: &str, name: &str) -> Option<u32> {
    let body = attribute.strip_prefix(name)?.trim_start();
    let body = body.strip_prefix('(')?;
    let end = body.find(')')?;
    body[..end].trim().parse().ok()
}

/// Splits a trailing `[N]` off a declarator name.
fn declarator(name: &str) -> (&str, u32) {
    match name.find('[') {
        Some(open) => {
            let size = name[open + 1..]
                .trim_end_matches(']')
                .trim()
                .parse()
                .unwrap_or(1);
            (name[..open].trim(), size)
        }
        None => (name, 1),
    }
}

#[derive(Debug, Clone)]
struct StructMember {
    ty: String,
    name: String,
    array_size: u32,
}

/// `struct Name { members };` declarations by name.
fn parse_structs(source: &str) -> HashMap<String, Vec<StructMember>> {
    let mut structs = HashMap::new();
    for at in word_positions(source, "struct") {
        let after = &source[at + "struct".len()..];
        let Some(brace) = after.find(['{', ';', '(']) else {
            continue;
        };
        if !after[brace..].starts_with('{') {
            continue;
        }
        let name = after[..brace].trim();
        if name.is_empty() || !name.chars().all(is_ident_char) {
            continue;
        }
        let Some((body, _)) = balanced(after, brace, '{', '}') else {
            continue;
        };
        let members = split_top_level(body, ';')
            .into_iter()
            .filter_map(parse_member)
            .collect();
        structs.insert(name.to_string(), members);
    }
    structs
}

fn parse_member(declaration: &str) -> Option<StructMember> {
    let (text, _) = split_attributes(declaration);
    let text = text.trim();
    if text.contains('(') || text.contains('*') || text.contains('&') {
        return None;
    }
    let split = text.rfind(|c: char| c.is_whitespace())?;
    let (ty, name) = (text[..split].trim(), text[split..].trim());
    let ty = ty
        .split_whitespace()
        .filter(|t| !matches!(*t, "const" | "constant" | "device" | "thread" | "threadgroup"))
        .collect::<Vec<_>>()
        .join(" ");
    let (name, array_size) = declarator(name);
    Some(StructMember {
        ty,
        name: name.to_string(),
        array_size,
    })
}

/// Maps an MSL scalar, vector or matrix type name.
fn value_type(name: &str) -> UniformType {
    let name = name.trim().strip_prefix("packed_").unwrap_or(name.trim());
    let (base, shape) = match name.find(|c: char| c.is_ascii_digit()) {
        Some(at) => (&name[..at], &name[at..]),
        None => (name, ""),
    };
    let float = matches!(base, "float" | "half");
    let signed = matches!(base, "int" | "short" | "char");
    let unsigned = matches!(base, "uint" | "ushort" | "uchar");
    if let Some((columns, rows)) = shape.split_once('x') {
        return match (float, columns.parse(), rows.parse()) {
            (true, Ok(columns), Ok(rows)) => UniformType::float_matrix(columns, rows),
            _ => UniformType::Unknown,
        };
    }
    let count = if shape.is_empty() { 1 } else { shape.parse().unwrap_or(0) };
    match base {
        "bool" if count == 1 => UniformType::Bool,
        _ if float => UniformType::float_vector(count),
        _ if signed => UniformType::int_vector(count),
        _ if unsigned => UniformType::uint_vector(count),
        _ => UniformType::Unknown,
    }
}

/// Maps an MSL texture type, unwrapping `array<T, N>`.
fn texture_type(ty: &str) -> (UniformType, u32) {
    let ty = ty.trim();
    if let Some(inner) = ty.strip_prefix("array<").and_then(|t| t.strip_suffix('>')) {
        let parts = split_top_level(inner, ',');
        if let [element, count] = parts.as_slice() {
            let (kind, _) = texture_type(element);
            return (kind, count.trim().parse().unwrap_or(1));
        }
    }
    let base = ty.split('<').next().unwrap_or(ty).trim();
    let kind = match base {
        "texture1d" => UniformType::Sampler1D,
        "texture2d" => UniformType::Sampler2D,
        "texture2d_array" => UniformType::Sampler2DArray,
        "texture3d" => UniformType::Sampler3D,
        "texturecube" => UniformType::SamplerCube,
        "depth2d" => UniformType::Sampler2DShadow,
        _ => UniformType::Unknown,
    };
    (kind, 1)
}

fn flatten(
    structs: &HashMap<String, Vec<StructMember>>,
    members: &[StructMember],
    prefix: &str,
    depth: u32,
    out: &mut Vec<BlockMember>,
) {
    for member in members {
        let name = format!("{prefix}{}", member.name);
        match structs.get(&member.ty) {
            Some(nested) if depth < MAX_STRUCT_DEPTH => {
                flatten(structs, nested, &format!("{name}."), depth + 1, out);
            }
            _ => out.push(BlockMember {
                name,
                ty: value_type(&member.ty),
                array_size: member.array_size,
            }),
        }
    }
}

#[derive(Debug)]
struct EntryPoint {
    name: String,
    params: String,
}

/// Functions introduced by the stage keyword, e.g. `fragment float4 fs_main(...)`.
fn find_entry_points(source: &str, keyword: &str) -> Vec<EntryPoint> {
    let mut entries = Vec::new();
    for at in word_positions(source, keyword) {
        let after = &source[at + keyword.len()..];
        let Some(paren) = after.find(['(', ';', '{']) else {
            continue;
        };
        if !after[paren..].starts_with('(') {
            continue;
        }
        let head = after[..paren].trim_end();
        let name: String = head
            .chars()
            .rev()
            .take_while(|c| is_ident_char(*c))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if name.is_empty() || head.len() == name.len() {
            continue;
        }
        let Some((params, _)) = balanced(after, paren, '(', ')') else {
            continue;
        };
        entries.push(EntryPoint {
            name,
            params: params.to_string(),
        });
    }
    entries
}

/// Splits a leading `const` or address-space keyword off a parameter type.
fn leading_qualifier(ty: &str) -> Option<(&'static str, &str)> {
    ["const", "constant", "device", "thread", "threadgroup"]
        .into_iter()
        .find_map(|qualifier| {
            let rest = ty.strip_prefix(qualifier)?;
            rest.starts_with(|c: char| c.is_ascii_whitespace())
                .then(|| (qualifier, rest.trim_start()))
        })
}

fn reflect_param(
    param: &str,
    structs: &HashMap<String, Vec<StructMember>>,
    stage_mask: ShaderStages,
    reflection: &mut ShaderReflection,
) {
    let (text, attributes) = split_attributes(param);
    let text = text.trim();
    let Some(split) = text.rfind(|c: char| c.is_ascii_whitespace() || c == '&' || c == '*') else {
        return;
    };
    let name = text[split + 1..].trim();
    let mut ty = text[..split + 1].trim().trim_end_matches(['&', '*']).trim();
    let mut address_space = "";
    while let Some((qualifier, rest)) = leading_qualifier(ty) {
        if qualifier != "const" {
            address_space = qualifier;
        }
        ty = rest;
    }

    for attribute in &attributes {
        if let Some(binding) = attribute_index(attribute, "buffer") {
            let kind = match address_space {
                "device" => BlockKind::Storage,
                _ => BlockKind::Uniform,
            };
            let mut members = Vec::new();
            let block_name = match structs.get(ty) {
                Some(fields) => {
                    flatten(structs, fields, "", 0, &mut members);
                    ty.to_string()
                }
                None => {
                    members.push(BlockMember {
                        name: name.to_string(),
                        ty: value_type(ty),
                        array_size: 1,
                    });
                    name.to_string()
                }
            };
            reflection.add_block(ShaderBlock {
                kind,
                block_name,
                instance_name: name.to_string(),
                stage_mask,
                binding: Some(binding),
                members,
            });
        } else if let Some(binding) = attribute_index(attribute, "texture") {
            let (ty, array_size) = texture_type(ty);
            reflection.add_uniform(
                name,
                UniformInfo {
                    ty,
                    array_size,
                    stage_mask,
                    binding: Some(binding),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
#include <metal_stdlib>
using namespace metal;

struct Light { float3 color; float intensity; };

struct Camera {
    float4x4 view_proj;
    packed_float3 position; // world space
    Light lights[4];
};

struct Particle { float4 position; };

/* vertex stage */
vertex float4 vs_main(uint vid [[vertex_id]],
                      constant Camera& camera [[buffer(1)]],
                      device Particle* particles [[buffer(2)]]) {
    return camera.view_proj * particles[vid].position;
}

fragment float4 fs_main(float4 pos [[stage_in]],
                        texture2d<float> albedo [[texture(0)]],
                        depth2d<float> shadow_map [[texture(1)]],
                        array<texturecube<float>, 2> probes [[texture(2)]],
                        sampler s [[sampler(0)]],
                        constant float& exposure [[buffer(0)]]) {
    return albedo.sample(s, pos.xy);
}
"#;

    #[test]
    fn vertex_buffers_become_blocks() {
        let r = MslReflectionSystem::new()
            .reflect(SOURCE.as_bytes(), ShaderStage::Vertex)
            .unwrap();
        let camera = r.block("Camera").unwrap();
        assert_eq!(camera.kind, BlockKind::Uniform);
        assert_eq!(camera.instance_name, "camera");
        assert_eq!(camera.binding, Some(1));
        assert_eq!(camera.member("view_proj").unwrap().ty, UniformType::Mat4);
        assert_eq!(camera.member("position").unwrap().ty, UniformType::Vec3);
        assert_eq!(camera.member("lights.color").unwrap().ty, UniformType::Vec3);

        let particles = r.block("Particle").unwrap();
        assert_eq!(particles.kind, BlockKind::Storage);
        assert_eq!(particles.binding, Some(2));
        assert!(r.uniforms().is_empty());
    }

    #[test]
    fn read_only_device_buffers_keep_their_struct() {
        let source = r#"
struct Particle { float4 position; float size; };
vertex float4 vs_main(uint vid [[vertex_id]],
                      const device Particle* particles [[buffer(2)]],
                      constant float4x4& constantMatrix [[buffer(3)]]) {
    return particles[vid].position;
}
"#;
        let r = MslReflectionSystem::new()
            .reflect(source.as_bytes(), ShaderStage::Vertex)
            .unwrap();
        let particles = r.block("Particle").unwrap();
        assert_eq!(particles.kind, BlockKind::Storage);
        assert_eq!(particles.instance_name, "particles");
        assert_eq!(particles.binding, Some(2));
        assert_eq!(particles.member("position").unwrap().ty, UniformType::Vec4);
        assert_eq!(particles.member("size").unwrap().ty, UniformType::Float);

        let matrix = r.block("constantMatrix").unwrap();
        assert_eq!(matrix.kind, BlockKind::Uniform);
        assert_eq!(matrix.member("constantMatrix").unwrap().ty, UniformType::Mat4);
    }

    #[test]
    fn fragment_textures_become_samplers() {
        let r = MslReflectionSystem::new()
            .reflect(SOURCE.as_bytes(), ShaderStage::Fragment)
            .unwrap();
        assert_eq!(r.uniform("albedo").unwrap().ty, UniformType::Sampler2D);
        assert_eq!(r.uniform("shadow_map").unwrap().ty, UniformType::Sampler2DShadow);
        let probes = r.uniform("probes").unwrap();
        assert_eq!(probes.ty, UniformType::SamplerCube);
        assert_eq!(probes.array_size, 2);
        assert_eq!(probes.binding, Some(2));
        assert!(r.uniform("s").is_none());

        let exposure = r.block("exposure").unwrap();
        assert_eq!(exposure.member("exposure").unwrap().ty, UniformType::Float);
        assert_eq!(exposure.stage_mask, ShaderStages::FRAGMENT);
    }

    #[test]
    fn missing_stage_or_source_is_a_decode_error() {
        let sys = MslReflectionSystem::new();
        assert!(matches!(sys.reflect(b"", ShaderStage::Vertex), Err(ReflectionError::Decode(_))));
        assert!(matches!(
            sys.reflect(b"// only a comment\n", ShaderStage::Vertex),
            Err(ReflectionError::Decode(_))
        ));
        assert!(matches!(
            sys.reflect(SOURCE.as_bytes(), ShaderStage::Compute),
            Err(ReflectionError::Decode(_))
        ));
    }

    #[test]
    fn value_types() {
        assert_eq!(value_type("half2"), UniformType::Vec2);
        assert_eq!(value_type("uint4"), UniformType::UVec4);
        assert_eq!(value_type("int"), UniformType::Int);
        assert_eq!(value_type("float3x3"), UniformType::Mat3);
        assert_eq!(value_type("float2x4"), UniformType::Unknown);
        assert_eq!(value_type("MyThing"), UniformType::Unknown);
    }
}
