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

//! Descriptor checks shared by every backend, run before any native call.

use super::error::ResourceError;
use super::handle::{ResourceHandle, TextureHandle};
use super::types::{BufferDesc, FramebufferDesc, PipelineDesc, SamplerDesc, TextureDesc, TextureKind};

/// Rejects zero-sized buffers.
pub fn buffer_desc(desc: &BufferDesc) -> Result<(), ResourceError> {
    if desc.size == 0 {
        return Err(ResourceError::InvalidDescriptor(format!(
            "buffer '{}' has zero size",
            label(&desc.label)
        )));
    }
    Ok(())
}

/// Rejects empty extents, bad mip counts and malformed cube maps.
pub fn texture_desc(desc: &TextureDesc) -> Result<(), ResourceError> {
    let name = label(&desc.label);
    if desc.width == 0 || desc.height == 0 || desc.depth_or_layers == 0 {
        return Err(ResourceError::InvalidDescriptor(format!(
            "texture '{name}' has an empty extent {}x{}x{}",
            desc.width, desc.height, desc.depth_or_layers
        )));
    }
    if desc.mip_levels == 0 || desc.mip_levels > desc.max_mip_levels() {
        return Err(ResourceError::InvalidDescriptor(format!(
            "texture '{name}' requests {} mip levels (max {})",
            desc.mip_levels,
            desc.max_mip_levels()
        )));
    }
    match desc.kind {
        TextureKind::Cube if desc.depth_or_layers != 6 || desc.width != desc.height => {
            Err(ResourceError::InvalidDescriptor(format!(
                "cube texture '{name}' must be square with 6 layers"
            )))
        }
        TextureKind::D1 if desc.height != 1 => Err(ResourceError::InvalidDescriptor(format!(
            "1D texture '{name}' must have a height of 1"
        ))),
        _ => Ok(()),
    }
}

/// Rejects inverted LOD ranges.
pub fn sampler_desc(desc: &SamplerDesc) -> Result<(), ResourceError> {
    if desc.lod_min > desc.lod_max {
        return Err(ResourceError::InvalidDescriptor(format!(
            "sampler '{}' has lod_min {} > lod_max {}",
            label(&desc.label),
            desc.lod_min,
            desc.lod_max
        )));
    }
    Ok(())
}

/// Rejects depth formats among the color targets and color formats as the
/// depth target.
pub fn pipeline_desc(desc: &PipelineDesc) -> Result<(), ResourceError> {
    let name = label(&desc.label);
    if let Some(format) = desc.color_formats.iter().find(|f| f.is_depth()) {
        return Err(ResourceError::InvalidDescriptor(format!(
            "pipeline '{name}' uses depth format {format:?} as a color target"
        )));
    }
    match desc.depth_format {
        Some(format) if !format.is_depth() => Err(ResourceError::InvalidDescriptor(format!(
            "pipeline '{name}' uses color format {format:?} as its depth target"
        ))),
        _ => Ok(()),
    }
}

/// Checks attachment count against `max` and that every attachment resolves.
///
/// `resolve` returns the `(width, height)` of a live texture. Size mismatches
/// between attachments are logged but accepted. Returns the extent of the
/// first attachment.
pub fn framebuffer_desc(
    desc: &FramebufferDesc,
    max: usize,
    resolve: impl Fn(TextureHandle) -> Option<(u32, u32)>,
) -> Result<(u32, u32), ResourceError> {
    let count = desc.color_attachments.len();
    if count > max {
        return Err(ResourceError::TooManyAttachments { count, max });
    }
    if count == 0 && !desc.depth_attachment.is_valid() {
        return Err(ResourceError::InvalidDescriptor(format!(
            "framebuffer '{}' has no attachments",
            label(&desc.label)
        )));
    }

    let mut extent = None;
    let depth = desc
        .depth_attachment
        .is_valid()
        .then_some(desc.depth_attachment);
    for texture in desc.color_attachments.iter().copied().chain(depth) {
        let size = resolve(texture).ok_or_else(|| ResourceError::invalid(texture))?;
        match extent {
            None => extent = Some(size),
            Some(first) if first != size => log::warn!(
                "Framebuffer '{}': attachment {} is {}x{}, expected {}x{}",
                label(&desc.label),
                texture,
                size.0,
                size.1,
                first.0,
                first.1
            ),
            Some(_) => {}
        }
    }
    // At least one attachment was resolved above.
    Ok(extent.unwrap_or((0, 0)))
}

/// Byte size of one full mip level, all layers included.
pub fn mip_level_size(desc: &TextureDesc, mip_level: u32) -> u64 {
    let extent = |v: u32| u64::from((v >> mip_level).max(1));
    let depth = match desc.kind {
        TextureKind::D3 => extent(desc.depth_or_layers),
        _ => u64::from(desc.depth_or_layers),
    };
    extent(desc.width) * extent(desc.height) * depth * u64::from(desc.format.bytes_per_pixel())
}

/// Checks a full mip level upload of `len` bytes.
pub fn texture_upload(desc: &TextureDesc, mip_level: u32, len: usize) -> Result<(), ResourceError> {
    if mip_level >= desc.mip_levels {
        return Err(ResourceError::InvalidDescriptor(format!(
            "texture '{}' has no mip level {mip_level}",
            label(&desc.label)
        )));
    }
    let expected = mip_level_size(desc, mip_level);
    if len as u64 != expected {
        return Err(ResourceError::InvalidDescriptor(format!(
            "texture '{}' mip {mip_level} expects {expected} bytes, got {len}",
            label(&desc.label)
        )));
    }
    Ok(())
}

/// Checks that `[offset, offset + len)` lies inside a resource of `size` bytes.
pub fn range(offset: u64, len: u64, size: u64) -> Result<(), ResourceError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(ResourceError::OutOfBounds { offset, len, size }),
    }
}

/// Display form of an optional debug label.
pub fn label(label: &Option<String>) -> &str {
    label.as_deref().unwrap_or("<unnamed>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::handle::ShaderHandle;
    use crate::rhi::types::{BufferUsage, Format, TextureUsage};

    #[test]
    fn zero_sized_buffer_is_rejected() {
        let desc = BufferDesc {
            label: Some("empty".into()),
            size: 0,
            usage: BufferUsage::VERTEX,
            host_visible: true,
        };
        assert!(matches!(
            buffer_desc(&desc),
            Err(ResourceError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn cube_needs_six_square_layers() {
        let mut desc = TextureDesc::d2(64, 64, Format::Rgba8Unorm, TextureUsage::SAMPLED);
        desc.kind = TextureKind::Cube;
        assert!(texture_desc(&desc).is_err());
        desc.depth_or_layers = 6;
        assert!(texture_desc(&desc).is_ok());
    }

    #[test]
    fn too_many_mips_are_rejected() {
        let mut desc = TextureDesc::d2(4, 4, Format::Rgba8Unorm, TextureUsage::SAMPLED);
        desc.mip_levels = 4;
        assert!(texture_desc(&desc).is_err());
        desc.mip_levels = 3;
        assert!(texture_desc(&desc).is_ok());
    }

    #[test]
    fn pipeline_targets_must_match_their_aspect() {
        let mut desc = PipelineDesc::graphics(ShaderHandle::NONE, ShaderHandle::NONE);
        assert!(pipeline_desc(&desc).is_ok());
        desc.color_formats = vec![Format::Rgba8Unorm, Format::Depth32Float];
        assert!(pipeline_desc(&desc).is_err());
        desc.color_formats = vec![Format::Rgba8Unorm];
        desc.depth_format = Some(Format::R32Float);
        assert!(pipeline_desc(&desc).is_err());
    }

    #[test]
    fn framebuffer_attachment_limit() {
        let desc = FramebufferDesc {
            label: None,
            color_attachments: vec![TextureHandle { id: 1 }; 3],
            depth_attachment: TextureHandle::NONE,
        };
        let err = framebuffer_desc(&desc, 2, |_| Some((8, 8))).unwrap_err();
        assert!(matches!(
            err,
            ResourceError::TooManyAttachments { count: 3, max: 2 }
        ));
    }

    #[test]
    fn framebuffer_with_unknown_texture_fails() {
        let desc = FramebufferDesc {
            label: None,
            color_attachments: vec![TextureHandle { id: 9 }],
            depth_attachment: TextureHandle::NONE,
        };
        assert!(matches!(
            framebuffer_desc(&desc, 8, |_| None),
            Err(ResourceError::InvalidHandle { id: 9, .. })
        ));
    }

    #[test]
    fn mismatched_sizes_are_tolerated() {
        let desc = FramebufferDesc {
            label: None,
            color_attachments: vec![TextureHandle { id: 1 }],
            depth_attachment: TextureHandle { id: 2 },
        };
        let extent = framebuffer_desc(&desc, 8, |t| {
            Some(if t.id == 1 { (64, 64) } else { (32, 32) })
        })
        .unwrap();
        assert_eq!(extent, (64, 64));
    }

    #[test]
    fn upload_size_follows_mip_chain() {
        let mut desc = TextureDesc::d2(8, 4, Format::Rgba8Unorm, TextureUsage::SAMPLED);
        desc.mip_levels = 4;
        assert_eq!(mip_level_size(&desc, 0), 128);
        assert_eq!(mip_level_size(&desc, 3), 4, "extent clamps at one texel");
        assert!(texture_upload(&desc, 1, 32).is_ok());
        assert!(texture_upload(&desc, 1, 31).is_err());
        assert!(texture_upload(&desc, 4, 4).is_err());
    }

    #[test]
    fn range_checks_overflow() {
        assert!(range(0, 256, 256).is_ok());
        assert!(range(1, 256, 256).is_err());
        assert!(range(u64::MAX, 2, 256).is_err());
    }
}
