//! Main engine orchestrator
//!
//! [`Engine`] owns every service of the frame graph and hands them to the
//! passes as an explicit [`PassContext`]. One call to [`Engine::update`] runs
//! the pending uploads, bakes pending IBL probes and renders one frame.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::FrameGraphConfig;
use crate::error::FrameResult;
use crate::external::{NoOverlay, PipelineLibrary, UiOverlay, World};
use crate::render_graph::{PassContext, PassHandle, PassKind, ProbeIndex, RenderPassManager};
use crate::resources::{BufferManager, DescriptorLayouts, ResourceAllocator, TextureManager};
use crate::swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
use glam::Vec3;
use std::sync::Arc;

/// Result of one trip through the frame loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented { image_index: u32 },
    /// The swapchain was rebuilt and the frame skipped
    Recreated,
}

/// Work done by one [`Engine::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateReport {
    pub buffer_uploads: usize,
    pub texture_uploads: usize,
    pub probes_baked: usize,
    pub frame: FrameStatus,
}

pub struct Engine {
    config: FrameGraphConfig,
    device: Arc<dyn GpuDevice>,
    allocator: Arc<ResourceAllocator>,
    buffers: BufferManager,
    textures: TextureManager,
    layouts: DescriptorLayouts,
    passes: RenderPassManager,
    swapchain: Swapchain,
    pipelines: Box<dyn PipelineLibrary>,
    world: Box<dyn World>,
    ui: Box<dyn UiOverlay>,
    frame_count: u64,
    destroyed: bool,
}

/// Borrow the services a pass needs next to the manager and swapchain
macro_rules! split_context {
    ($engine:expr) => {{
        let Engine {
            config,
            device,
            buffers,
            textures,
            pipelines,
            world,
            ui,
            passes,
            swapchain,
            ..
        } = &mut *$engine;
        let ctx = PassContext {
            device: &**device,
            config,
            buffers,
            textures,
            pipelines: &**pipelines,
            world: &mut **world,
            ui: &mut **ui,
        };
        (ctx, passes, swapchain)
    }};
}

impl Engine {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        config: FrameGraphConfig,
        pipelines: Box<dyn PipelineLibrary>,
        world: Box<dyn World>,
    ) -> FrameResult<Self> {
        log::info!("Initializing frame graph engine");
        let allocator = Arc::new(ResourceAllocator::new(device.clone()));
        let buffers = BufferManager::new(allocator.clone())?;
        let textures = TextureManager::new(allocator.clone())?;
        let layouts = DescriptorLayouts::new(device.clone(), config.descriptor_sets_per_pool);
        let swapchain = Swapchain::new(device.as_ref(), &config)?;

        let mut engine = Self {
            config,
            device,
            allocator,
            buffers,
            textures,
            layouts,
            passes: RenderPassManager::new(),
            swapchain,
            pipelines,
            world,
            ui: Box::new(NoOverlay),
            frame_count: 0,
            destroyed: false,
        };
        engine.initialize_render_state()?;
        log::info!("Frame graph engine initialized");
        Ok(engine)
    }

    fn initialize_render_state(&mut self) -> FrameResult<()> {
        let targets = self.swapchain.targets()?;
        self.world
            .create_world_command_buffers(self.device.as_ref(), targets.image_count())?;
        let (mut ctx, passes, _) = split_context!(self);
        passes.init_passes(&mut ctx, &targets)
    }

    pub fn set_ui_overlay(&mut self, ui: Box<dyn UiOverlay>) {
        self.ui = ui;
    }

    /// Acquire materials and pass geometry once the pipeline library is populated
    pub fn post_shader_load_init(&mut self) -> FrameResult<()> {
        let (mut ctx, passes, _) = split_context!(self);
        passes.post_shader_load_init(&mut ctx)
    }

    /// Flush uploads, bake pending probes, then render and present one frame
    pub fn update(&mut self) -> FrameResult<UpdateReport> {
        let buffer_uploads = self.buffers.execute_operations()?;
        let texture_uploads = self.textures.execute_operations()?;
        let probes_baked = self.execute_ibl_passes()?;
        let frame = self.render_frame()?;
        Ok(UpdateReport {
            buffer_uploads,
            texture_uploads,
            probes_baked,
            frame,
        })
    }

    /// Acquire, wait on the image's fence, record, submit the chain and present.
    /// Out-of-date swapchains are rebuilt here and never reach the caller.
    pub fn render_frame(&mut self) -> FrameResult<FrameStatus> {
        // Draws may bind anything still queued for upload
        self.buffers.execute_operations()?;
        self.textures.execute_operations()?;

        let image_index = match self.swapchain.acquire(self.device.as_ref())? {
            AcquireOutcome::Image(index) => index,
            AcquireOutcome::OutOfDate => {
                self.recreate_swapchain()?;
                return Ok(FrameStatus::Recreated);
            }
        };

        let image_available = self.swapchain.image_available()?;
        let render_finished = self.swapchain.render_finished()?;
        {
            let (mut ctx, passes, _) = split_context!(self);
            passes.wait_for_image(ctx.device, image_index)?;
            passes.setup_passes(&mut ctx, image_index)?;
            passes.render_passes(
                ctx.device,
                image_index,
                image_available,
                PipelineStage::COLOR_ATTACHMENT_OUTPUT,
                render_finished,
            )?;
        }

        match self.swapchain.present(self.device.as_ref())? {
            PresentOutcome::Presented => {
                self.frame_count += 1;
                Ok(FrameStatus::Presented { image_index })
            }
            PresentOutcome::NeedsRecreate => {
                self.recreate_swapchain()?;
                Ok(FrameStatus::Recreated)
            }
        }
    }

    /// Drain the device, rebuild the swapchain and everything sized by it
    pub fn recreate_swapchain(&mut self) -> FrameResult<()> {
        log::info!("Swapchain recreate");
        self.device.wait_idle()?;
        self.world.free_world_command_buffers(self.device.as_ref());
        self.swapchain.rebuild(self.device.as_ref())?;

        let targets = self.swapchain.targets()?;
        {
            let (mut ctx, passes, _) = split_context!(self);
            passes.recreate_passes(&mut ctx, &targets)?;
        }
        self.world
            .create_world_command_buffers(self.device.as_ref(), targets.image_count())?;
        self.world.mark_dirty();
        Ok(())
    }

    /// Append a per-frame pass after the built-in ones; it becomes the presenting pass
    pub fn add_pass(&mut self, name: &str, kind: PassKind) -> FrameResult<PassHandle> {
        let (mut ctx, passes, _) = split_context!(self);
        passes.add_pass(&mut ctx, name, kind)
    }

    /// Register a probe; it is baked on the next [`update`](Self::update)
    pub fn add_ibl_probe(&mut self, position: Vec3) -> FrameResult<ProbeIndex> {
        let (mut ctx, passes, _) = split_context!(self);
        passes.add_ibl_probe(&mut ctx, position)
    }

    pub fn execute_ibl_passes(&mut self) -> FrameResult<usize> {
        let (mut ctx, passes, _) = split_context!(self);
        passes.execute_ibl_passes(&mut ctx)
    }

    pub fn config(&self) -> &FrameGraphConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    pub fn allocator(&self) -> &Arc<ResourceAllocator> {
        &self.allocator
    }

    pub fn passes(&self) -> &RenderPassManager {
        &self.passes
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn buffers(&self) -> &BufferManager {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut BufferManager {
        &mut self.buffers
    }

    pub fn textures(&self) -> &TextureManager {
        &self.textures
    }

    pub fn textures_mut(&mut self) -> &mut TextureManager {
        &mut self.textures
    }

    pub fn layouts_mut(&mut self) -> &mut DescriptorLayouts {
        &mut self.layouts
    }

    pub fn world(&self) -> &dyn World {
        self.world.as_ref()
    }

    pub fn world_mut(&mut self) -> &mut dyn World {
        self.world.as_mut()
    }

    /// Frames presented so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Tear down in dependency order. Called by `Drop` if not called explicitly.
    pub fn destroy(&mut self) -> FrameResult<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        log::info!("Destroying frame graph engine");

        let result = {
            let (mut ctx, passes, _) = split_context!(self);
            passes.destroy(&mut ctx)
        };
        self.world.destroy(self.device.as_ref());
        self.swapchain.destroy(self.device.as_ref());
        self.textures.destroy();
        self.buffers.destroy();
        self.layouts.destroy();
        result
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            log::error!("Engine teardown failed: {}", e);
        }
    }
}
