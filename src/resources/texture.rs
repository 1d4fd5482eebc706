//! Texture records and host-side pixel data

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::FrameResult;
use crate::resources::allocator::ImageAllocation;
use image::{DynamicImage, GenericImageView};
use std::path::Path;

/// Index of a texture registered with the texture manager
pub type TextureIndex = u32;

/// Decoded pixel data ready for upload
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub format: Format,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Load an 8-bit texture from file, expanded to RGBA
    pub fn from_file<P: AsRef<Path>>(path: P) -> FrameResult<Self> {
        let path = path.as_ref();
        let img = image::open(path)?;
        Ok(Self::from_image(img, &file_name(path)))
    }

    /// Load a high dynamic range texture from file as RGBA32F
    pub fn from_hdr_file<P: AsRef<Path>>(path: P) -> FrameResult<Self> {
        let path = path.as_ref();
        let img = image::open(path)?;
        Ok(Self::from_hdr_image(img, &file_name(path)))
    }

    /// Load an 8-bit texture from encoded bytes
    pub fn from_bytes(bytes: &[u8], name: &str) -> FrameResult<Self> {
        let img = image::load_from_memory(bytes)?;
        Ok(Self::from_image(img, name))
    }

    fn from_image(img: DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        let channels = u32::from(img.color().channel_count());
        let data = img.to_rgba8().into_raw();

        Self {
            width,
            height,
            channels,
            format: Format::Rgba8Unorm,
            data,
            name: name.to_string(),
        }
    }

    fn from_hdr_image(img: DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        let channels = u32::from(img.color().channel_count());
        let pixels = img.to_rgba32f().into_raw();

        Self {
            width,
            height,
            channels,
            format: Format::Rgba32Float,
            data: bytemuck::cast_slice(&pixels).to_vec(),
            name: name.to_string(),
        }
    }

    /// Create a 1x1 texture of a single color
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            channels: 4,
            format: Format::Rgba8Unorm,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    /// Create a default white texture
    pub fn white() -> Self {
        Self::solid_color([255, 255, 255, 255], "white")
    }

    /// Create a default black texture
    pub fn black() -> Self {
        Self::solid_color([0, 0, 0, 255], "black")
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

/// GPU texture owned by the texture manager
///
/// Destroyed exactly once, by the manager that registered it.
#[derive(Debug)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub channels: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: Format,
    pub image: ImageAllocation,
    pub view: ImageViewHandle,
    pub sampler: Option<SamplerHandle>,
}

impl Texture {
    pub fn handle(&self) -> ImageHandle {
        self.image.handle
    }

    pub fn extent(&self) -> Extent3d {
        Extent3d::new(self.width, self.height, self.depth)
    }

    pub fn is_cube(&self) -> bool {
        self.array_layers == 6
    }

    /// Range covering every mip level and layer
    pub fn full_range(&self) -> ImageSubresourceRange {
        ImageSubresourceRange::new(self.format.aspect(), self.mip_levels, self.array_layers)
    }
}

/// Number of levels in a full mip chain down to 1x1
pub fn mip_levels_for(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_levels_for() {
        assert_eq!(mip_levels_for(1, 1), 1);
        assert_eq!(mip_levels_for(512, 512), 10);
        assert_eq!(mip_levels_for(640, 480), 10);
        assert_eq!(mip_levels_for(5, 3), 3);
    }

    #[test]
    fn test_solid_color() {
        let data = TextureData::solid_color([1, 2, 3, 4], "c");
        assert_eq!((data.width, data.height), (1, 1));
        assert_eq!(data.data, vec![1, 2, 3, 4]);
    }
}
