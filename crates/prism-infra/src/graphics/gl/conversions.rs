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

//! Conversions from RHI enums to GL enum values.

use prism_core::rhi::{
    AddressMode, BlendFactor, BlendOp, CompareFunction, FilterMode, Format, IndexFormat,
    PrimitiveTopology, ShaderStage, TextureKind,
};

/// A local extension trait converting RHI types into GL constants.
/// Keeps the `.into_gl()` call syntax without running into orphan rules.
pub trait IntoGl<T> {
    /// Consumes self and converts it into its GL counterpart.
    fn into_gl(self) -> T;
}

/// `(internal format, pixel format, pixel type)` used for storage and uploads.
pub struct GlFormat {
    pub internal: u32,
    pub format: u32,
    pub ty: u32,
}

impl IntoGl<GlFormat> for Format {
    fn into_gl(self) -> GlFormat {
        let (internal, format, ty) = match self {
            Format::R8Unorm => (glow::R8, glow::RED, glow::UNSIGNED_BYTE),
            Format::Rg8Unorm => (glow::RG8, glow::RG, glow::UNSIGNED_BYTE),
            Format::Rgba8Unorm => (glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE),
            Format::Rgba8UnormSrgb => (glow::SRGB8_ALPHA8, glow::RGBA, glow::UNSIGNED_BYTE),
            Format::Bgra8Unorm => (glow::RGBA8, glow::BGRA, glow::UNSIGNED_BYTE),
            Format::Bgra8UnormSrgb => (glow::SRGB8_ALPHA8, glow::BGRA, glow::UNSIGNED_BYTE),
            Format::R16Float => (glow::R16F, glow::RED, glow::HALF_FLOAT),
            Format::Rg16Float => (glow::RG16F, glow::RG, glow::HALF_FLOAT),
            Format::Rgba16Float => (glow::RGBA16F, glow::RGBA, glow::HALF_FLOAT),
            Format::R32Float => (glow::R32F, glow::RED, glow::FLOAT),
            Format::Rg32Float => (glow::RG32F, glow::RG, glow::FLOAT),
            Format::Rgba32Float => (glow::RGBA32F, glow::RGBA, glow::FLOAT),
            Format::R32Uint => (glow::R32UI, glow::RED_INTEGER, glow::UNSIGNED_INT),
            Format::Depth16Unorm => (
                glow::DEPTH_COMPONENT16,
                glow::DEPTH_COMPONENT,
                glow::UNSIGNED_SHORT,
            ),
            Format::Depth24PlusStencil8 => (
                glow::DEPTH24_STENCIL8,
                glow::DEPTH_STENCIL,
                glow::UNSIGNED_INT_24_8,
            ),
            Format::Depth32Float => (
                glow::DEPTH_COMPONENT32F,
                glow::DEPTH_COMPONENT,
                glow::FLOAT,
            ),
        };
        GlFormat {
            internal,
            format,
            ty,
        }
    }
}

impl IntoGl<u32> for TextureKind {
    fn into_gl(self) -> u32 {
        match self {
            TextureKind::D1 => glow::TEXTURE_1D,
            TextureKind::D2 => glow::TEXTURE_2D,
            TextureKind::D2Array => glow::TEXTURE_2D_ARRAY,
            TextureKind::D3 => glow::TEXTURE_3D,
            TextureKind::Cube => glow::TEXTURE_CUBE_MAP,
        }
    }
}

impl IntoGl<u32> for ShaderStage {
    fn into_gl(self) -> u32 {
        match self {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
            ShaderStage::Compute => glow::COMPUTE_SHADER,
        }
    }
}

impl IntoGl<u32> for CompareFunction {
    fn into_gl(self) -> u32 {
        match self {
            CompareFunction::Never => glow::NEVER,
            CompareFunction::Less => glow::LESS,
            CompareFunction::Equal => glow::EQUAL,
            CompareFunction::LessEqual => glow::LEQUAL,
            CompareFunction::Greater => glow::GREATER,
            CompareFunction::NotEqual => glow::NOTEQUAL,
            CompareFunction::GreaterEqual => glow::GEQUAL,
            CompareFunction::Always => glow::ALWAYS,
        }
    }
}

impl IntoGl<u32> for BlendFactor {
    fn into_gl(self) -> u32 {
        match self {
            BlendFactor::Zero => glow::ZERO,
            BlendFactor::One => glow::ONE,
            BlendFactor::SrcColor => glow::SRC_COLOR,
            BlendFactor::OneMinusSrcColor => glow::ONE_MINUS_SRC_COLOR,
            BlendFactor::DstColor => glow::DST_COLOR,
            BlendFactor::OneMinusDstColor => glow::ONE_MINUS_DST_COLOR,
            BlendFactor::SrcAlpha => glow::SRC_ALPHA,
            BlendFactor::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
            BlendFactor::DstAlpha => glow::DST_ALPHA,
            BlendFactor::OneMinusDstAlpha => glow::ONE_MINUS_DST_ALPHA,
        }
    }
}

impl IntoGl<u32> for BlendOp {
    fn into_gl(self) -> u32 {
        match self {
            BlendOp::Add => glow::FUNC_ADD,
            BlendOp::Subtract => glow::FUNC_SUBTRACT,
            BlendOp::ReverseSubtract => glow::FUNC_REVERSE_SUBTRACT,
            BlendOp::Min => glow::MIN,
            BlendOp::Max => glow::MAX,
        }
    }
}

impl IntoGl<u32> for PrimitiveTopology {
    fn into_gl(self) -> u32 {
        match self {
            PrimitiveTopology::PointList => glow::POINTS,
            PrimitiveTopology::LineList => glow::LINES,
            PrimitiveTopology::LineStrip => glow::LINE_STRIP,
            PrimitiveTopology::TriangleList => glow::TRIANGLES,
            PrimitiveTopology::TriangleStrip => glow::TRIANGLE_STRIP,
        }
    }
}

impl IntoGl<u32> for IndexFormat {
    fn into_gl(self) -> u32 {
        match self {
            IndexFormat::Uint16 => glow::UNSIGNED_SHORT,
            IndexFormat::Uint32 => glow::UNSIGNED_INT,
        }
    }
}

impl IntoGl<i32> for AddressMode {
    fn into_gl(self) -> i32 {
        (match self {
            AddressMode::Repeat => glow::REPEAT,
            AddressMode::MirrorRepeat => glow::MIRRORED_REPEAT,
            AddressMode::ClampToEdge => glow::CLAMP_TO_EDGE,
            AddressMode::ClampToBorder => glow::CLAMP_TO_BORDER,
        }) as i32
    }
}

/// Minification filter combining texel and mip filtering.
pub fn min_filter(min: FilterMode, mip: FilterMode, has_mips: bool) -> i32 {
    (match (min, mip, has_mips) {
        (FilterMode::Nearest, _, false) => glow::NEAREST,
        (FilterMode::Linear, _, false) => glow::LINEAR,
        (FilterMode::Nearest, FilterMode::Nearest, true) => glow::NEAREST_MIPMAP_NEAREST,
        (FilterMode::Nearest, FilterMode::Linear, true) => glow::NEAREST_MIPMAP_LINEAR,
        (FilterMode::Linear, FilterMode::Nearest, true) => glow::LINEAR_MIPMAP_NEAREST,
        (FilterMode::Linear, FilterMode::Linear, true) => glow::LINEAR_MIPMAP_LINEAR,
    }) as i32
}

impl IntoGl<i32> for FilterMode {
    fn into_gl(self) -> i32 {
        (match self {
            FilterMode::Nearest => glow::NEAREST,
            FilterMode::Linear => glow::LINEAR,
        }) as i32
    }
}
