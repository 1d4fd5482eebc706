//! Common utilities for frame graph integration tests.
//!
//! Every test runs the engine against the dummy device, which simulates
//! memory, image layouts and fences on the CPU.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use frame_graph_engine::backend::{
    CommandBufferHandle, CommandRecorder, Extent2d, GpuDevice, PipelineHandle, PipelineLayoutHandle, SemaphoreHandle,
    SubmitInfo,
};
use frame_graph_engine::render_graph::{BRDF_PIPELINE, PRENV_PIPELINE, SKY_PIPELINE};
use frame_graph_engine::{
    DrawListWorld, DummyBackend, Engine, FrameGraphConfig, FrameGraphError, FrameResult, PipelineBinding,
    PipelineRegistry, SkySettings, UiOverlay, World, WorldTarget,
};

pub const SURFACE: Extent2d = Extent2d {
    width: 800,
    height: 600,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Small targets so the dummy device does little work per bake
pub fn test_config() -> FrameGraphConfig {
    FrameGraphConfig {
        width: SURFACE.width,
        height: SURFACE.height,
        env_map_dim: 8,
        brdf_lut_dim: 8,
        prenv_sample_count: 4,
        descriptor_sets_per_pool: 4,
        ..Default::default()
    }
}

pub fn binding(id: u64) -> PipelineBinding {
    PipelineBinding {
        pipeline: PipelineHandle::from_raw(0x1000 + id),
        layout: PipelineLayoutHandle::from_raw(0x2000 + id),
    }
}

/// Registry holding the sky, prefilter and BRDF pipelines the passes ask for
pub fn test_pipelines(device: Arc<dyn GpuDevice>, sets_per_pool: u32) -> PipelineRegistry {
    let registry = PipelineRegistry::new(device, sets_per_pool);
    registry
        .register_with_textures(SKY_PIPELINE, binding(1), 1)
        .expect("sky pipeline");
    registry
        .register_with_textures(PRENV_PIPELINE, binding(2), 1)
        .expect("prenv pipeline");
    registry.register(BRDF_PIPELINE, binding(3));
    registry
}

// ============================================================================
// Counting collaborators
// ============================================================================

#[derive(Debug, Default)]
pub struct WorldCounters {
    pub created: AtomicU64,
    pub freed: AtomicU64,
    pub recorded: AtomicU64,
    pub last_image_count: AtomicU64,
}

impl WorldCounters {
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn freed(&self) -> u64 {
        self.freed.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::SeqCst)
    }

    pub fn last_image_count(&self) -> u64 {
        self.last_image_count.load(Ordering::SeqCst)
    }
}

/// [`DrawListWorld`] that reports its lifecycle to shared counters
pub struct CountingWorld {
    inner: DrawListWorld,
    counters: Arc<WorldCounters>,
}

impl CountingWorld {
    pub fn new(counters: Arc<WorldCounters>) -> Self {
        Self {
            inner: DrawListWorld::new(),
            counters,
        }
    }
}

impl World for CountingWorld {
    fn create_world_command_buffers(&mut self, device: &dyn GpuDevice, image_count: u32) -> FrameResult<()> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        self.counters
            .last_image_count
            .store(u64::from(image_count), Ordering::SeqCst);
        self.inner.create_world_command_buffers(device, image_count)
    }

    fn free_world_command_buffers(&mut self, device: &dyn GpuDevice) {
        self.counters.freed.fetch_add(1, Ordering::SeqCst);
        self.inner.free_world_command_buffers(device);
    }

    fn record_world_command_buffers(&mut self, device: &dyn GpuDevice, target: &WorldTarget) -> FrameResult<()> {
        let before = self.inner.recordings();
        self.inner.record_world_command_buffers(device, target)?;
        let recorded = self.inner.recordings() - before;
        self.counters.recorded.fetch_add(recorded, Ordering::SeqCst);
        Ok(())
    }

    fn world_command_buffer(&self, image_index: u32) -> Option<CommandBufferHandle> {
        self.inner.world_command_buffer(image_index)
    }

    fn mark_dirty(&mut self) {
        self.inner.mark_dirty();
    }

    fn sky(&self) -> SkySettings {
        self.inner.sky()
    }

    fn destroy(&mut self, device: &dyn GpuDevice) {
        self.inner.destroy(device);
    }
}

/// Overlay that counts its draws
pub struct CountingOverlay {
    pub draws: Arc<AtomicU64>,
}

impl UiOverlay for CountingOverlay {
    fn draw(&mut self, recorder: &mut CommandRecorder, extent: Extent2d) -> FrameResult<()> {
        self.draws.fetch_add(1, Ordering::SeqCst);
        if extent.width > 0 {
            recorder.draw(6, 1);
        }
        Ok(())
    }
}

/// Overlay whose recording always fails
pub struct FailingOverlay;

impl UiOverlay for FailingOverlay {
    fn draw(&mut self, _recorder: &mut CommandRecorder, _extent: Extent2d) -> FrameResult<()> {
        Err(FrameGraphError::MissingMaterial("overlay".to_string()))
    }
}

// ============================================================================
// Test context
// ============================================================================

pub struct TestContext {
    pub backend: Arc<DummyBackend>,
    pub engine: Engine,
    pub world: Arc<WorldCounters>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(SURFACE, 3, test_config())
    }

    pub fn with_surface(extent: Extent2d, image_count: u32) -> Self {
        Self::with_config(extent, image_count, test_config())
    }

    pub fn with_config(extent: Extent2d, image_count: u32, config: FrameGraphConfig) -> Self {
        init_logger();
        let backend = Arc::new(DummyBackend::with_surface(extent, image_count));
        let device: Arc<dyn GpuDevice> = backend.clone();
        let pipelines = test_pipelines(device.clone(), config.descriptor_sets_per_pool);
        let world = Arc::new(WorldCounters::default());
        let engine = Engine::new(
            device,
            config,
            Box::new(pipelines),
            Box::new(CountingWorld::new(world.clone())),
        )
        .expect("engine");
        Self {
            backend,
            engine,
            world,
        }
    }

    /// Batches submitted since `from` batches had been recorded
    pub fn batches_since(&self, from: usize) -> Vec<SubmitInfo> {
        self.backend.submitted_batches().split_off(from)
    }

    pub fn batch_count(&self) -> usize {
        self.backend.submitted_batches().len()
    }

    pub fn image_available(&self) -> SemaphoreHandle {
        self.engine.swapchain().image_available().expect("image available semaphore")
    }

    pub fn render_finished(&self) -> SemaphoreHandle {
        self.engine.swapchain().render_finished().expect("render finished semaphore")
    }

    pub fn assert_valid(&self) {
        let errors = self.backend.validation_errors();
        assert!(errors.is_empty(), "validation errors: {:#?}", errors);
    }
}
