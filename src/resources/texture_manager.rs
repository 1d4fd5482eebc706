//! Texture creation, staging uploads and layout transitions
//!
//! Uploaded textures follow the same protocol as buffers: the staging copy is
//! queued and [`TextureManager::execute_operations`] performs every pending
//! copy in one blocking submission. Textures that ask for mipmaps get their
//! chain blitted in the same command buffer.

use crate::backend::command::*;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{FrameGraphError, FrameResult};
use crate::resources::allocator::{ImageAllocation, ResourceAllocator, StagingBuffer, UploadQueue};
use crate::resources::texture::{mip_levels_for, Texture, TextureData, TextureIndex};
use crate::resources::transfer::TransferContext;
use std::path::Path;
use std::sync::Arc;

/// Sampler configurations used by the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplerPreset {
    /// Linear filtering, repeat addressing, 16x anisotropy
    Default { mip_levels: u32 },
    /// Cube maps: linear, clamped
    Cube,
    /// Prefiltered environment maps, sampled across the whole mip chain
    PrefilteredEnv { mip_levels: u32 },
    /// Equirectangular HDR sources
    Hdr,
    /// BRDF integration lookup table
    Brdf,
}

impl SamplerPreset {
    pub fn desc(&self) -> SamplerDesc {
        match *self {
            SamplerPreset::Default { mip_levels } => SamplerDesc {
                label: Some("default".into()),
                mipmap_filter: FilterMode::Nearest,
                address_mode: AddressMode::Repeat,
                max_anisotropy: Some(16.0),
                max_lod: mip_levels as f32,
                ..Default::default()
            },
            SamplerPreset::Cube => SamplerDesc {
                label: Some("cube".into()),
                mipmap_filter: FilterMode::Linear,
                address_mode: AddressMode::ClampToEdge,
                max_lod: 1.0,
                ..Default::default()
            },
            SamplerPreset::PrefilteredEnv { mip_levels } => SamplerDesc {
                label: Some("prefiltered env".into()),
                mipmap_filter: FilterMode::Linear,
                address_mode: AddressMode::ClampToEdge,
                max_lod: mip_levels as f32,
                border_color: BorderColor::FloatOpaqueWhite,
                ..Default::default()
            },
            SamplerPreset::Hdr => SamplerDesc {
                label: Some("hdr".into()),
                mipmap_filter: FilterMode::Linear,
                address_mode: AddressMode::Repeat,
                max_lod: 1.0,
                ..Default::default()
            },
            SamplerPreset::Brdf => SamplerDesc {
                label: Some("brdf".into()),
                mipmap_filter: FilterMode::Linear,
                address_mode: AddressMode::ClampToEdge,
                max_lod: 1.0,
                border_color: BorderColor::FloatOpaqueWhite,
                ..Default::default()
            },
        }
    }
}

/// Access and stage masks of a supported layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: Access,
    pub dst_access: Access,
    pub src_stage: PipelineStage,
    pub dst_stage: PipelineStage,
}

/// Masks for the transitions the engine performs; anything else is rejected
pub fn layout_transition_masks(old: ImageLayout, new: ImageLayout) -> FrameResult<TransitionMasks> {
    use ImageLayout as L;
    let masks = |src_access, dst_access, src_stage, dst_stage| TransitionMasks {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    };
    let masks = match (old, new) {
        (L::Undefined, L::TransferDst) => masks(
            Access::empty(),
            Access::TRANSFER_WRITE,
            PipelineStage::TOP_OF_PIPE,
            PipelineStage::TRANSFER,
        ),
        (L::TransferDst, L::ShaderReadOnly) => masks(
            Access::TRANSFER_WRITE,
            Access::SHADER_READ,
            PipelineStage::TRANSFER,
            PipelineStage::FRAGMENT_SHADER,
        ),
        (L::Undefined, L::DepthStencilAttachment) => masks(
            Access::empty(),
            Access::DEPTH_STENCIL_ATTACHMENT_READ | Access::DEPTH_STENCIL_ATTACHMENT_WRITE,
            PipelineStage::TOP_OF_PIPE,
            PipelineStage::EARLY_FRAGMENT_TESTS,
        ),
        (L::TransferDst, L::TransferSrc) => masks(
            Access::TRANSFER_WRITE,
            Access::TRANSFER_READ,
            PipelineStage::TRANSFER,
            PipelineStage::TRANSFER,
        ),
        (L::TransferSrc, L::ShaderReadOnly) => masks(
            Access::TRANSFER_READ,
            Access::SHADER_READ,
            PipelineStage::TRANSFER,
            PipelineStage::FRAGMENT_SHADER,
        ),
        (L::ColorAttachment, L::TransferSrc) => masks(
            Access::COLOR_ATTACHMENT_WRITE,
            Access::TRANSFER_READ,
            PipelineStage::COLOR_ATTACHMENT_OUTPUT,
            PipelineStage::TRANSFER,
        ),
        (L::TransferSrc, L::ColorAttachment) => masks(
            Access::TRANSFER_READ,
            Access::COLOR_ATTACHMENT_WRITE,
            PipelineStage::TRANSFER,
            PipelineStage::COLOR_ATTACHMENT_OUTPUT,
        ),
        (from, to) => return Err(FrameGraphError::UnsupportedLayoutTransition { from, to }),
    };
    Ok(masks)
}

/// Record a supported layout transition into `recorder`
pub fn record_layout_transition(
    recorder: &mut CommandRecorder,
    image: ImageHandle,
    old: ImageLayout,
    new: ImageLayout,
    range: ImageSubresourceRange,
) -> FrameResult<()> {
    let masks = layout_transition_masks(old, new)?;
    recorder.pipeline_barrier(
        masks.src_stage,
        masks.dst_stage,
        vec![ImageBarrier {
            image,
            old_layout: old,
            new_layout: new,
            src_access: masks.src_access,
            dst_access: masks.dst_access,
            range,
        }],
    );
    Ok(())
}

fn barrier(image: ImageHandle, old: ImageLayout, new: ImageLayout, range: ImageSubresourceRange) -> FrameResult<ImageBarrier> {
    let masks = layout_transition_masks(old, new)?;
    Ok(ImageBarrier {
        image,
        old_layout: old,
        new_layout: new,
        src_access: masks.src_access,
        dst_access: masks.dst_access,
        range,
    })
}

/// Blit each level from the one above it; every level ends in shader-read layout.
/// Expects all levels in transfer-destination layout with level 0 populated.
fn record_mip_chain(recorder: &mut CommandRecorder, texture: &Texture) -> FrameResult<()> {
    let image = texture.handle();
    let layers = texture.array_layers;
    let extent = texture.extent();

    for level in 1..texture.mip_levels {
        let src = level - 1;
        let src_range = ImageSubresourceRange::mip(ImageAspect::COLOR, src, layers);
        record_layout_transition(recorder, image, ImageLayout::TransferDst, ImageLayout::TransferSrc, src_range)?;
        recorder.blit_image(
            image,
            ImageLayout::TransferSrc,
            image,
            ImageLayout::TransferDst,
            ImageBlit {
                src_subresource: ImageSubresourceLayers::color(src, 0, layers),
                src_extent: extent.mip_level(src),
                dst_subresource: ImageSubresourceLayers::color(level, 0, layers),
                dst_extent: extent.mip_level(level),
            },
            FilterMode::Linear,
        );
        record_layout_transition(recorder, image, ImageLayout::TransferSrc, ImageLayout::ShaderReadOnly, src_range)?;
    }

    let last = ImageSubresourceRange::mip(ImageAspect::COLOR, texture.mip_levels - 1, layers);
    record_layout_transition(recorder, image, ImageLayout::TransferDst, ImageLayout::ShaderReadOnly, last)
}

struct UploadRequest {
    texture: TextureIndex,
    staging: StagingBuffer,
    generate_mips: bool,
}

pub struct TextureManager {
    allocator: Arc<ResourceAllocator>,
    textures: Vec<Option<Texture>>,
    requests: UploadQueue<UploadRequest>,
    transfer: TransferContext,
}

impl TextureManager {
    pub fn new(allocator: Arc<ResourceAllocator>) -> FrameResult<Self> {
        let transfer = TransferContext::new(allocator.device().as_ref())?;
        Ok(Self {
            allocator,
            textures: Vec::new(),
            requests: UploadQueue::new(),
            transfer,
        })
    }

    fn device(&self) -> &dyn GpuDevice {
        self.allocator.device().as_ref()
    }

    /// Load an 8-bit texture from disk and queue its upload
    pub fn load_texture_2d<P: AsRef<Path>>(&mut self, path: P, generate_mips: bool) -> FrameResult<TextureIndex> {
        let data = TextureData::from_file(path)?;
        self.create_texture_from_data(&data, generate_mips)
    }

    /// Load an HDR texture from disk as RGBA32F and queue its upload
    pub fn load_texture_hdr<P: AsRef<Path>>(&mut self, path: P) -> FrameResult<TextureIndex> {
        let data = TextureData::from_hdr_file(path)?;
        self.create_texture_from_pixels(&data, false, SamplerPreset::Hdr)
    }

    pub fn create_texture_from_data(&mut self, data: &TextureData, generate_mips: bool) -> FrameResult<TextureIndex> {
        let mip_levels = if generate_mips {
            mip_levels_for(data.width, data.height)
        } else {
            1
        };
        self.create_texture_from_pixels(data, generate_mips, SamplerPreset::Default { mip_levels })
    }

    /// A 1x1 RGBA8 texture of a single color
    pub fn create_texture_from_color(&mut self, color: [u8; 4]) -> FrameResult<TextureIndex> {
        self.create_texture_from_data(&TextureData::solid_color(color, "color"), false)
    }

    fn create_texture_from_pixels(
        &mut self,
        data: &TextureData,
        generate_mips: bool,
        sampler: SamplerPreset,
    ) -> FrameResult<TextureIndex> {
        let mip_levels = if generate_mips {
            mip_levels_for(data.width, data.height)
        } else {
            1
        };
        let mut usage = ImageUsage::SAMPLED | ImageUsage::COPY_DST;
        if mip_levels > 1 {
            usage |= ImageUsage::COPY_SRC;
        }

        let staging = self.allocator.create_staging_buffer(&data.data)?;
        let mut texture = match self.create_texture_2d(data.width, data.height, mip_levels, data.format, usage) {
            Ok(texture) => texture,
            Err(e) => {
                self.allocator.destroy_staging_buffer(staging);
                return Err(e);
            }
        };
        texture.channels = data.channels;
        match self.device().create_sampler(&sampler.desc()) {
            Ok(handle) => texture.sampler = Some(handle),
            Err(e) => {
                self.allocator.destroy_staging_buffer(staging);
                self.destroy_unregistered(texture);
                return Err(e.into());
            }
        }

        let index = self.register_texture(texture);
        self.requests.push(UploadRequest {
            texture: index,
            staging,
            generate_mips: mip_levels > 1,
        });
        Ok(index)
    }

    pub fn create_image_2d(
        &self,
        width: u32,
        height: u32,
        mip_levels: u32,
        format: Format,
        usage: ImageUsage,
    ) -> FrameResult<ImageAllocation> {
        let desc = ImageDesc::new_2d(width, height, format, usage).with_mip_levels(mip_levels);
        self.allocator.create_image(&desc)
    }

    /// Six-layer cube-compatible image
    pub fn create_cube_map(&self, dim: u32, mip_levels: u32, format: Format, usage: ImageUsage) -> FrameResult<ImageAllocation> {
        let desc = ImageDesc::new_cube(dim, format, usage).with_mip_levels(mip_levels);
        self.allocator.create_image(&desc)
    }

    pub fn create_image_view_2d(&self, image: &ImageAllocation, aspect: ImageAspect) -> FrameResult<ImageViewHandle> {
        let desc = ImageViewDesc::new_2d(image.handle, image.format, aspect, image.mip_levels);
        Ok(self.device().create_image_view(&desc)?)
    }

    pub fn create_cube_map_view(&self, image: &ImageAllocation) -> FrameResult<ImageViewHandle> {
        let desc = ImageViewDesc::new_cube(image.handle, image.format, image.mip_levels);
        Ok(self.device().create_image_view(&desc)?)
    }

    /// Image plus view without a sampler. Not registered; see [`register_texture`](Self::register_texture).
    pub fn create_texture_2d(
        &self,
        width: u32,
        height: u32,
        mip_levels: u32,
        format: Format,
        usage: ImageUsage,
    ) -> FrameResult<Texture> {
        let image = self.create_image_2d(width, height, mip_levels, format, usage)?;
        let view = match self.create_image_view_2d(&image, format.aspect()) {
            Ok(view) => view,
            Err(e) => {
                self.allocator.destroy_image(image);
                return Err(e);
            }
        };
        Ok(Texture {
            width,
            height,
            depth: 1,
            channels: 4,
            mip_levels: image.mip_levels,
            array_layers: 1,
            format,
            image,
            view,
            sampler: None,
        })
    }

    pub fn create_cube_map_texture(
        &self,
        dim: u32,
        mip_levels: u32,
        format: Format,
        usage: ImageUsage,
    ) -> FrameResult<Texture> {
        let image = self.create_cube_map(dim, mip_levels, format, usage)?;
        let view = match self.create_cube_map_view(&image) {
            Ok(view) => view,
            Err(e) => {
                self.allocator.destroy_image(image);
                return Err(e);
            }
        };
        Ok(Texture {
            width: dim,
            height: dim,
            depth: 1,
            channels: 4,
            mip_levels: image.mip_levels,
            array_layers: 6,
            format,
            image,
            view,
            sampler: None,
        })
    }

    pub fn create_sampler(&self, preset: SamplerPreset) -> FrameResult<SamplerHandle> {
        Ok(self.device().create_sampler(&preset.desc())?)
    }

    /// Hand ownership of a texture to the manager
    pub fn register_texture(&mut self, texture: Texture) -> TextureIndex {
        let index = self.textures.len() as TextureIndex;
        self.textures.push(Some(texture));
        index
    }

    pub fn texture(&self, index: TextureIndex) -> FrameResult<&Texture> {
        self.textures
            .get(index as usize)
            .and_then(Option::as_ref)
            .ok_or(FrameGraphError::UnknownTexture(index))
    }

    /// Replace a texture's sampler, destroying the previous one
    pub fn set_sampler(&mut self, index: TextureIndex, preset: SamplerPreset) -> FrameResult<SamplerHandle> {
        let sampler = self.create_sampler(preset)?;
        let device = self.allocator.device().clone();
        let texture = match self.textures.get_mut(index as usize).and_then(Option::as_mut) {
            Some(texture) => texture,
            None => {
                device.destroy_sampler(sampler);
                return Err(FrameGraphError::UnknownTexture(index));
            }
        };
        if let Some(previous) = texture.sampler.replace(sampler) {
            device.destroy_sampler(previous);
        }
        Ok(sampler)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.iter().filter(|t| t.is_some()).count()
    }

    pub fn pending_uploads(&self) -> usize {
        self.requests.len()
    }

    /// Transition an image right away with a one-time submission and a short-lived fence
    pub fn transition_image_layout(
        &self,
        image: ImageHandle,
        format: Format,
        old: ImageLayout,
        new: ImageLayout,
        mip_levels: u32,
        array_layers: u32,
    ) -> FrameResult<()> {
        let range = ImageSubresourceRange::new(format.aspect(), mip_levels, array_layers);
        let mut recorder = CommandRecorder::new();
        record_layout_transition(&mut recorder, image, old, new, range)?;
        self.transfer.submit_with_transient_fence(self.device(), recorder.commands())
    }

    /// Perform every pending texture upload in one blocking submission.
    /// Returns the number of textures uploaded.
    pub fn execute_operations(&mut self) -> FrameResult<usize> {
        if self.requests.is_empty() {
            return Ok(0);
        }
        let requests = self.requests.take_all();
        log::info!("Texture upload start: {} textures", requests.len());

        let result = self
            .record_uploads(&requests)
            .and_then(|recorder| self.transfer.submit_and_wait(self.device(), recorder.commands()));

        let count = requests.len();
        for request in requests {
            self.allocator.destroy_staging_buffer(request.staging);
        }
        result?;

        log::info!("Texture upload end");
        Ok(count)
    }

    fn record_uploads(&self, requests: &[UploadRequest]) -> FrameResult<CommandRecorder> {
        let mut recorder = CommandRecorder::new();

        let mut pre = Vec::with_capacity(requests.len());
        for request in requests {
            let texture = self.texture(request.texture)?;
            pre.push(barrier(
                texture.handle(),
                ImageLayout::Undefined,
                ImageLayout::TransferDst,
                texture.full_range(),
            )?);
        }
        recorder.pipeline_barrier(PipelineStage::TOP_OF_PIPE, PipelineStage::TRANSFER, pre);

        for request in requests {
            let texture = self.texture(request.texture)?;
            recorder.copy_buffer_to_image(
                request.staging.handle,
                texture.handle(),
                ImageLayout::TransferDst,
                vec![BufferImageCopy {
                    buffer_offset: 0,
                    subresource: ImageSubresourceLayers::color(0, 0, texture.array_layers),
                    extent: texture.extent(),
                }],
            );
        }

        let mut post = Vec::new();
        for request in requests.iter().filter(|r| !r.generate_mips) {
            let texture = self.texture(request.texture)?;
            post.push(barrier(
                texture.handle(),
                ImageLayout::TransferDst,
                ImageLayout::ShaderReadOnly,
                texture.full_range(),
            )?);
        }
        if !post.is_empty() {
            recorder.pipeline_barrier(PipelineStage::TRANSFER, PipelineStage::FRAGMENT_SHADER, post);
        }

        for request in requests.iter().filter(|r| r.generate_mips) {
            record_mip_chain(&mut recorder, self.texture(request.texture)?)?;
        }
        Ok(recorder)
    }

    /// Destroy a registered texture and cancel its queued upload; its index stays reserved
    pub fn destroy_texture(&mut self, index: TextureIndex) -> FrameResult<()> {
        let texture = self
            .textures
            .get_mut(index as usize)
            .and_then(Option::take)
            .ok_or(FrameGraphError::UnknownTexture(index))?;
        for request in self.requests.take_matching(|request| request.texture == index) {
            self.allocator.destroy_staging_buffer(request.staging);
        }
        self.destroy_unregistered(texture);
        Ok(())
    }

    /// Destroy a texture that was never registered
    pub fn destroy_unregistered(&self, texture: Texture) {
        if let Some(sampler) = texture.sampler {
            self.device().destroy_sampler(sampler);
        }
        self.device().destroy_image_view(texture.view);
        self.allocator.destroy_image(texture.image);
    }

    pub fn destroy(&mut self) {
        for request in self.requests.take_all() {
            self.allocator.destroy_staging_buffer(request.staging);
        }
        let textures: Vec<Texture> = self.textures.drain(..).flatten().collect();
        for texture in textures {
            self.destroy_unregistered(texture);
        }
        self.transfer.destroy(self.device());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn setup() -> (Arc<DummyBackend>, Arc<ResourceAllocator>, TextureManager) {
        let backend = Arc::new(DummyBackend::new());
        let allocator = Arc::new(ResourceAllocator::new(backend.clone()));
        let manager = TextureManager::new(allocator.clone()).unwrap();
        (backend, allocator, manager)
    }

    #[test]
    fn test_unsupported_transition_rejected() {
        let result = layout_transition_masks(ImageLayout::ShaderReadOnly, ImageLayout::PresentSrc);
        assert!(matches!(
            result,
            Err(FrameGraphError::UnsupportedLayoutTransition {
                from: ImageLayout::ShaderReadOnly,
                to: ImageLayout::PresentSrc
            })
        ));
    }

    #[test]
    fn test_depth_transition_masks() {
        let masks = layout_transition_masks(ImageLayout::Undefined, ImageLayout::DepthStencilAttachment).unwrap();
        assert_eq!(masks.dst_stage, PipelineStage::EARLY_FRAGMENT_TESTS);
        assert!(masks.dst_access.contains(Access::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn test_immediate_depth_transition() {
        let (backend, _, manager) = setup();
        let depth = manager
            .create_texture_2d(8, 8, 1, Format::Depth24PlusStencil8, ImageUsage::DEPTH_STENCIL_ATTACHMENT)
            .unwrap();
        manager
            .transition_image_layout(
                depth.handle(),
                depth.format,
                ImageLayout::Undefined,
                ImageLayout::DepthStencilAttachment,
                1,
                1,
            )
            .unwrap();
        assert_eq!(backend.image_layouts(depth.handle()), vec![ImageLayout::DepthStencilAttachment]);
        // short-lived fence is gone, only the manager's own remains
        assert_eq!(backend.live_fence_count(), 1);
        manager.destroy_unregistered(depth);
    }

    #[test]
    fn test_color_upload_lands_in_shader_read() {
        let (backend, allocator, mut manager) = setup();
        let index = manager.create_texture_from_color([10, 20, 30, 255]).unwrap();
        assert_eq!(manager.pending_uploads(), 1);

        assert_eq!(manager.execute_operations().unwrap(), 1);
        let texture = manager.texture(index).unwrap();
        assert_eq!(backend.image_layouts(texture.handle()), vec![ImageLayout::ShaderReadOnly]);
        assert_eq!(backend.image_texels(texture.handle(), 0, 0), vec![10, 20, 30, 255]);
        assert!(texture.sampler.is_some());
        assert_eq!(allocator.live_staging_count(), 0);
    }

    #[test]
    fn test_destroyed_texture_is_unknown() {
        let (_, _, mut manager) = setup();
        let index = manager.create_texture_from_color([0, 0, 0, 0]).unwrap();
        manager.execute_operations().unwrap();
        manager.destroy_texture(index).unwrap();
        assert!(matches!(manager.texture(index), Err(FrameGraphError::UnknownTexture(_))));
        assert!(matches!(manager.destroy_texture(index), Err(FrameGraphError::UnknownTexture(_))));
    }

    #[test]
    fn test_destroying_queued_texture_cancels_its_upload() {
        let (backend, allocator, mut manager) = setup();
        let kept = manager.create_texture_from_color([1, 2, 3, 4]).unwrap();
        let dropped = manager.create_texture_from_color([5, 6, 7, 8]).unwrap();
        let last = manager.create_texture_from_color([9, 10, 11, 12]).unwrap();
        manager.destroy_texture(dropped).unwrap();
        assert_eq!(manager.pending_uploads(), 2);
        assert_eq!(allocator.live_staging_count(), 2);

        assert_eq!(manager.execute_operations().unwrap(), 2);
        for (index, texels) in [(kept, vec![1, 2, 3, 4]), (last, vec![9, 10, 11, 12])] {
            let image = manager.texture(index).unwrap().handle();
            assert_eq!(backend.image_layouts(image), vec![ImageLayout::ShaderReadOnly]);
            assert_eq!(backend.image_texels(image, 0, 0), texels);
        }
        assert_eq!(allocator.live_staging_count(), 0);
        assert!(backend.validation_errors().is_empty());
    }
}
