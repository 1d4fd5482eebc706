//! Interfaces to the collaborators that feed the frame graph
//!
//! Pipelines and materials come from the asset layer, drawables from the
//! world, overlay geometry from the UI. The engine only sees the narrow
//! traits below.

use crate::backend::command::CommandRecorder;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{FrameGraphError, FrameResult};
use crate::resources::{pool_sizes_for, DescriptorAllocator, TextureIndex, TextureManager, MATERIAL_SET_SLOT};
use glam::Mat4;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Native pipeline and its layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineBinding {
    pub pipeline: PipelineHandle,
    pub layout: PipelineLayoutHandle,
}

/// A pipeline plus the textures bound to it
pub trait Material: Send {
    fn pipeline(&self) -> PipelineBinding;

    /// Material descriptor set, if the pipeline has one
    fn descriptor_set(&self) -> Option<DescriptorSetHandle> {
        None
    }

    /// Point a texture binding of the material set at a registered texture
    fn set_texture(&mut self, binding: u32, texture: TextureIndex) -> FrameResult<()>;

    /// Record pipeline and descriptor binds
    fn bind(&mut self, device: &dyn GpuDevice, textures: &TextureManager, recorder: &mut CommandRecorder) -> FrameResult<()>;
}

/// Lookup of already-built pipelines by name
pub trait PipelineLibrary: Send + Sync {
    fn pipeline(&self, name: &str) -> FrameResult<PipelineBinding>;

    /// A fresh material instance for the named pipeline
    fn new_material(&self, name: &str) -> FrameResult<Box<dyn Material>>;
}

/// Descriptor allocator shared with the materials it hands sets to
type SharedAllocator = Arc<Mutex<DescriptorAllocator>>;

struct MaterialLayout {
    layout: DescriptorSetLayoutHandle,
    texture_count: u32,
    allocator: SharedAllocator,
}

struct PipelineEntry {
    binding: PipelineBinding,
    material: Option<MaterialLayout>,
}

/// In-memory [`PipelineLibrary`]
///
/// Pipelines registered with a material layout hand out materials with their
/// own descriptor set, allocated from a per-pipeline [`DescriptorAllocator`].
/// A dropped material returns its set for reuse.
pub struct PipelineRegistry {
    device: Arc<dyn GpuDevice>,
    sets_per_pool: u32,
    pipelines: Mutex<HashMap<String, PipelineEntry>>,
}

impl PipelineRegistry {
    pub fn new(device: Arc<dyn GpuDevice>, sets_per_pool: u32) -> Self {
        Self {
            device,
            sets_per_pool,
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    /// Register a pipeline whose materials bind no textures
    pub fn register(&self, name: &str, binding: PipelineBinding) {
        self.pipelines.lock().insert(
            name.to_string(),
            PipelineEntry {
                binding,
                material: None,
            },
        );
    }

    /// Register a pipeline with `texture_count` combined image samplers in its material set
    pub fn register_with_textures(&self, name: &str, binding: PipelineBinding, texture_count: u32) -> FrameResult<()> {
        let bindings: Vec<DescriptorSetLayoutBinding> = (0..texture_count)
            .map(|binding| DescriptorSetLayoutBinding {
                binding,
                ty: DescriptorType::CombinedImageSampler,
                count: 1,
                stages: ShaderStage::FRAGMENT,
            })
            .collect();
        let layout = self.device.create_descriptor_set_layout(&bindings)?;
        let allocator = match DescriptorAllocator::with_pool_capacity(
            self.device.clone(),
            &pool_sizes_for(&bindings),
            layout,
            self.sets_per_pool,
        ) {
            Ok(allocator) => allocator,
            Err(e) => {
                self.device.destroy_descriptor_set_layout(layout);
                return Err(e);
            }
        };

        let previous = self.pipelines.lock().insert(
            name.to_string(),
            PipelineEntry {
                binding,
                material: Some(MaterialLayout {
                    layout,
                    texture_count,
                    allocator: Arc::new(Mutex::new(allocator)),
                }),
            },
        );
        if let Some(entry) = previous {
            self.release(entry);
        }
        Ok(())
    }

    /// Material set layout of a pipeline, if it has one
    pub fn material_layout(&self, name: &str) -> Option<DescriptorSetLayoutHandle> {
        self.pipelines
            .lock()
            .get(name)
            .and_then(|entry| entry.material.as_ref().map(|m| m.layout))
    }

    /// Descriptor sets currently held by live materials of a pipeline
    pub fn material_sets_in_use(&self, name: &str) -> Option<usize> {
        self.pipelines
            .lock()
            .get(name)
            .and_then(|entry| entry.material.as_ref().map(|m| m.allocator.lock().used_count()))
    }

    fn release(&self, entry: PipelineEntry) {
        if let Some(material) = entry.material {
            material.allocator.lock().destroy();
            self.device.destroy_descriptor_set_layout(material.layout);
        }
    }
}

impl PipelineLibrary for PipelineRegistry {
    fn pipeline(&self, name: &str) -> FrameResult<PipelineBinding> {
        self.pipelines
            .lock()
            .get(name)
            .map(|entry| entry.binding)
            .ok_or_else(|| FrameGraphError::MissingPipeline(name.to_string()))
    }

    fn new_material(&self, name: &str) -> FrameResult<Box<dyn Material>> {
        let mut pipelines = self.pipelines.lock();
        let entry = pipelines
            .get_mut(name)
            .ok_or_else(|| FrameGraphError::MissingMaterial(name.to_string()))?;

        let material = match entry.material.as_ref() {
            Some(layout) => {
                let set = layout.allocator.lock().allocate_descriptor_set()?;
                SimpleMaterial::new(entry.binding, Some(set), layout.texture_count)
                    .with_owner(Arc::downgrade(&layout.allocator))
            }
            None => SimpleMaterial::new(entry.binding, None, 0),
        };
        Ok(Box::new(material))
    }
}

impl Drop for PipelineRegistry {
    fn drop(&mut self) {
        let entries: Vec<PipelineEntry> = self.pipelines.lock().drain().map(|(_, entry)| entry).collect();
        for entry in entries {
            self.release(entry);
        }
    }
}

/// Material with one optional descriptor set of combined image samplers
pub struct SimpleMaterial {
    binding: PipelineBinding,
    set: Option<DescriptorSetHandle>,
    textures: Vec<Option<TextureIndex>>,
    dirty: bool,
    /// Allocator the set goes back to on drop
    owner: Option<Weak<Mutex<DescriptorAllocator>>>,
}

impl SimpleMaterial {
    pub fn new(binding: PipelineBinding, set: Option<DescriptorSetHandle>, texture_count: u32) -> Self {
        Self {
            binding,
            set,
            textures: vec![None; texture_count as usize],
            dirty: false,
            owner: None,
        }
    }

    fn with_owner(mut self, owner: Weak<Mutex<DescriptorAllocator>>) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn texture(&self, binding: u32) -> Option<TextureIndex> {
        self.textures.get(binding as usize).copied().flatten()
    }
}

impl Material for SimpleMaterial {
    fn pipeline(&self) -> PipelineBinding {
        self.binding
    }

    fn descriptor_set(&self) -> Option<DescriptorSetHandle> {
        self.set
    }

    fn set_texture(&mut self, binding: u32, texture: TextureIndex) -> FrameResult<()> {
        let count = self.textures.len() as u32;
        let slot = self
            .textures
            .get_mut(binding as usize)
            .ok_or(FrameGraphError::InvalidMaterialBinding { binding, count })?;
        *slot = Some(texture);
        self.dirty = true;
        Ok(())
    }

    fn bind(&mut self, device: &dyn GpuDevice, textures: &TextureManager, recorder: &mut CommandRecorder) -> FrameResult<()> {
        recorder.bind_pipeline(self.binding.pipeline);
        let Some(set) = self.set else {
            return Ok(());
        };

        if self.dirty {
            for (binding, index) in self.textures.iter().enumerate() {
                let Some(index) = index else { continue };
                let texture = textures.texture(*index)?;
                if let Some(sampler) = texture.sampler {
                    device.write_image_descriptor(set, binding as u32, texture.view, sampler)?;
                }
            }
            self.dirty = false;
        }
        recorder.bind_descriptor_sets(self.binding.layout, MATERIAL_SET_SLOT, &[set]);
        Ok(())
    }
}

impl Drop for SimpleMaterial {
    fn drop(&mut self) {
        // The allocator is gone once its pipeline was re-registered or the registry dropped
        let (Some(set), Some(allocator)) = (self.set, self.owner.as_ref().and_then(Weak::upgrade)) else {
            return;
        };
        if let Err(e) = allocator.lock().release_descriptor_set(set) {
            log::warn!("Material descriptor set release failed: {}", e);
        };
    }
}

/// Render target handed to the world when it records its draws
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldTarget {
    pub render_pass: RenderPassHandle,
    pub framebuffer: FramebufferHandle,
    pub extent: Extent2d,
    pub image_index: u32,
}

/// Environment the sky and probe passes render
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkySettings {
    /// Equirectangular HDR source, if the world has one
    pub hdr_texture: Option<TextureIndex>,
    pub view: Mat4,
    pub projection: Mat4,
}

impl Default for SkySettings {
    fn default() -> Self {
        Self {
            hdr_texture: None,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

/// Scene subsystem that records the opaque draws of the frame pass
///
/// Draws go into per-image secondary command buffers that the frame pass
/// executes inside its own render pass.
pub trait World: Send {
    fn create_world_command_buffers(&mut self, device: &dyn GpuDevice, image_count: u32) -> FrameResult<()>;

    fn free_world_command_buffers(&mut self, device: &dyn GpuDevice);

    fn record_world_command_buffers(&mut self, device: &dyn GpuDevice, target: &WorldTarget) -> FrameResult<()>;

    fn world_command_buffer(&self, image_index: u32) -> Option<CommandBufferHandle>;

    /// Force every image's buffer to be re-recorded
    fn mark_dirty(&mut self);

    fn sky(&self) -> SkySettings {
        SkySettings::default()
    }

    /// Release everything the world holds on the device
    fn destroy(&mut self, device: &dyn GpuDevice) {
        self.free_world_command_buffers(device);
    }
}

/// Pre-culled draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drawable {
    pub pipeline: PipelineBinding,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: Option<(BufferHandle, u64, IndexFormat)>,
    pub count: u32,
}

/// [`World`] over a flat draw list
#[derive(Default)]
pub struct DrawListWorld {
    drawables: Vec<Drawable>,
    sky: SkySettings,
    pool: Option<CommandPoolHandle>,
    command_buffers: Vec<CommandBufferHandle>,
    dirty: Vec<bool>,
    recordings: u64,
}

impl DrawListWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_drawable(&mut self, drawable: Drawable) {
        self.drawables.push(drawable);
        self.mark_dirty();
    }

    pub fn set_sky(&mut self, sky: SkySettings) {
        self.sky = sky;
    }

    /// Secondary buffers recorded so far
    pub fn recordings(&self) -> u64 {
        self.recordings
    }
}

impl World for DrawListWorld {
    fn create_world_command_buffers(&mut self, device: &dyn GpuDevice, image_count: u32) -> FrameResult<()> {
        let pool = match self.pool {
            Some(pool) => pool,
            None => {
                let pool = device.create_command_pool(CommandPoolFlags::RESET_COMMAND_BUFFER)?;
                self.pool = Some(pool);
                pool
            }
        };
        self.command_buffers = device.allocate_command_buffers(pool, CommandBufferLevel::Secondary, image_count)?;
        self.dirty = vec![true; image_count as usize];
        Ok(())
    }

    fn free_world_command_buffers(&mut self, device: &dyn GpuDevice) {
        if let Some(pool) = self.pool {
            device.free_command_buffers(pool, &self.command_buffers);
        }
        self.command_buffers.clear();
        self.dirty.clear();
    }

    fn record_world_command_buffers(&mut self, device: &dyn GpuDevice, target: &WorldTarget) -> FrameResult<()> {
        let index = target.image_index as usize;
        let Some(&cmd) = self.command_buffers.get(index) else {
            return Ok(());
        };
        if !self.dirty[index] {
            return Ok(());
        }

        let mut recorder = CommandRecorder::new();
        recorder
            .set_viewport(Viewport::from_extent(target.extent))
            .set_scissor(Rect2d::from_extent(target.extent));
        for drawable in &self.drawables {
            recorder
                .bind_pipeline(drawable.pipeline.pipeline)
                .bind_vertex_buffer(0, drawable.vertex_buffer, 0);
            match drawable.index_buffer {
                Some((buffer, offset, format)) => {
                    recorder.bind_index_buffer(buffer, offset, format).draw_indexed(drawable.count, 1, 0, 0);
                }
                None => {
                    recorder.draw(drawable.count, 1);
                }
            }
        }

        let begin = CommandBufferBeginInfo {
            usage: CommandBufferUsage::RENDER_PASS_CONTINUE | CommandBufferUsage::SIMULTANEOUS_USE,
            inheritance: Some(CommandBufferInheritance {
                render_pass: target.render_pass,
                subpass: 0,
                framebuffer: Some(target.framebuffer),
            }),
        };
        device.record_command_buffer(cmd, &begin, recorder.commands())?;
        self.dirty[index] = false;
        self.recordings += 1;
        Ok(())
    }

    fn world_command_buffer(&self, image_index: u32) -> Option<CommandBufferHandle> {
        self.command_buffers.get(image_index as usize).copied()
    }

    fn mark_dirty(&mut self) {
        self.dirty.iter_mut().for_each(|d| *d = true);
    }

    fn sky(&self) -> SkySettings {
        self.sky
    }

    fn destroy(&mut self, device: &dyn GpuDevice) {
        self.free_world_command_buffers(device);
        if let Some(pool) = self.pool.take() {
            device.destroy_command_pool(pool);
        }
    }
}

/// Overlay drawn by the UI pass on top of the frame
pub trait UiOverlay: Send {
    fn draw(&mut self, recorder: &mut CommandRecorder, extent: Extent2d) -> FrameResult<()>;
}

/// Overlay that draws nothing
pub struct NoOverlay;

impl UiOverlay for NoOverlay {
    fn draw(&mut self, _recorder: &mut CommandRecorder, _extent: Extent2d) -> FrameResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn binding(id: u64) -> PipelineBinding {
        PipelineBinding {
            pipeline: PipelineHandle::from_raw(id),
            layout: PipelineLayoutHandle::from_raw(id),
        }
    }

    #[test]
    fn test_missing_pipeline_and_material() {
        let registry = PipelineRegistry::new(Arc::new(DummyBackend::new()), 4);
        assert!(matches!(registry.pipeline("sky"), Err(FrameGraphError::MissingPipeline(_))));
        assert!(matches!(registry.new_material("sky"), Err(FrameGraphError::MissingMaterial(_))));
    }

    #[test]
    fn test_material_binding_bounds() {
        let registry = PipelineRegistry::new(Arc::new(DummyBackend::new()), 4);
        registry.register_with_textures("prenv", binding(7), 1).unwrap();
        let mut material = registry.new_material("prenv").unwrap();
        assert_eq!(material.pipeline(), binding(7));
        assert!(material.set_texture(0, 3).is_ok());
        assert!(matches!(
            material.set_texture(1, 3),
            Err(FrameGraphError::InvalidMaterialBinding { binding: 1, count: 1 })
        ));
    }

    #[test]
    fn test_materials_grow_descriptor_pools() {
        let backend = Arc::new(DummyBackend::new());
        let registry = PipelineRegistry::new(backend.clone(), 2);
        registry.register_with_textures("mesh", binding(1), 2).unwrap();
        let materials: Vec<_> = (0..3).map(|_| registry.new_material("mesh").unwrap()).collect();
        assert_eq!(materials.len(), 3);
        assert_eq!(backend.live_descriptor_pool_count(), 2);
        assert_eq!(registry.material_sets_in_use("mesh"), Some(3));
    }

    #[test]
    fn test_dropped_material_set_is_reused() {
        let backend = Arc::new(DummyBackend::new());
        let registry = PipelineRegistry::new(backend.clone(), 1);
        registry.register_with_textures("sky", binding(2), 1).unwrap();

        let first = registry.new_material("sky").unwrap();
        let set = first.descriptor_set();
        drop(first);
        assert_eq!(registry.material_sets_in_use("sky"), Some(0));

        let second = registry.new_material("sky").unwrap();
        assert_eq!(second.descriptor_set(), set);
        assert_eq!(backend.live_descriptor_pool_count(), 1);
        assert_eq!(registry.material_sets_in_use("sky"), Some(1));
    }

    #[test]
    fn test_material_outliving_registry() {
        let backend = Arc::new(DummyBackend::new());
        let registry = PipelineRegistry::new(backend.clone(), 4);
        registry.register_with_textures("sky", binding(2), 1).unwrap();
        let material = registry.new_material("sky").unwrap();
        drop(registry);
        assert_eq!(backend.live_descriptor_pool_count(), 0);
        drop(material);
    }
}
