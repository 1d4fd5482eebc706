//! Core backend abstraction traits
//!
//! [`GpuDevice`] is the seam between the frame graph and a concrete device.
//! The Vulkan backend implements it over ash, the dummy backend simulates it
//! in memory for tests.

use crate::backend::command::GpuCommand;
use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create swapchain: {0}")]
    SwapchainCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to present: {0}")]
    PresentFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create image: {0}")]
    ImageCreationFailed(String),
    #[error("Failed to create render pass: {0}")]
    RenderPassCreationFailed(String),
    #[error("Failed to create framebuffer: {0}")]
    FramebufferCreationFailed(String),
    #[error("Failed to create command objects: {0}")]
    CommandCreationFailed(String),
    #[error("Failed to record command buffer: {0}")]
    RecordingFailed(String),
    #[error("Failed to create synchronization object: {0}")]
    SyncCreationFailed(String),
    #[error("Failed to create descriptor objects: {0}")]
    DescriptorCreationFailed(String),
    #[error("Queue submission failed: {0}")]
    SubmitFailed(String),
    #[error("Fence wait failed: {0}")]
    WaitFailed(String),
    #[error("Descriptor pool out of memory")]
    OutOfPoolMemory,
    #[error("Swapchain out of date")]
    OutOfDate,
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
    #[error("Fence wait timed out")]
    Timeout,
    #[error("Unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u64 },
    #[error("Buffer {0} is not host visible")]
    NotHostVisible(u64),
}

pub type BackendResult<T> = Result<T, BackendError>;

macro_rules! define_handles {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub(crate) u64);

            impl $name {
                /// Wraps a backend-assigned id
                pub const fn from_raw(raw: u64) -> Self {
                    Self(raw)
                }

                pub const fn raw(self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

define_handles! {
    /// Handle to a GPU buffer
    BufferHandle,
    /// Handle to a GPU image
    ImageHandle,
    /// Handle to an image view
    ImageViewHandle,
    /// Handle to a sampler
    SamplerHandle,
    /// Handle to a binary semaphore
    SemaphoreHandle,
    /// Handle to a fence
    FenceHandle,
    /// Handle to a command pool
    CommandPoolHandle,
    /// Handle to a command buffer
    CommandBufferHandle,
    /// Handle to a native render pass object
    RenderPassHandle,
    /// Handle to a framebuffer
    FramebufferHandle,
    /// Handle to a descriptor pool
    DescriptorPoolHandle,
    /// Handle to a descriptor set
    DescriptorSetHandle,
    /// Handle to a descriptor set layout
    DescriptorSetLayoutHandle,
    /// Handle to a graphics pipeline
    PipelineHandle,
    /// Handle to a pipeline layout
    PipelineLayoutHandle,
    /// Handle to a swapchain
    SwapchainHandle,
}

/// Unbounded timeout for fence waits
pub const WAIT_FOREVER: u64 = u64::MAX;

/// Device and queue abstraction consumed by the frame graph
///
/// All methods take `&self`; implementations keep their object tables behind
/// interior mutability so one device can be shared by every manager.
/// `destroy_*` calls on unknown handles are ignored.
pub trait GpuDevice: Send + Sync {
    /// Get the backend name
    fn name(&self) -> &'static str;

    fn wait_idle(&self) -> BackendResult<()>;

    // === Synchronization ===

    fn create_semaphore(&self) -> BackendResult<SemaphoreHandle>;
    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);
    fn create_fence(&self, signaled: bool) -> BackendResult<FenceHandle>;
    fn destroy_fence(&self, fence: FenceHandle);
    /// Wait until every fence is signaled. Returns [`BackendError::Timeout`] on expiry.
    fn wait_for_fences(&self, fences: &[FenceHandle], timeout_ns: u64) -> BackendResult<()>;
    fn reset_fences(&self, fences: &[FenceHandle]) -> BackendResult<()>;
    fn is_fence_signaled(&self, fence: FenceHandle) -> BackendResult<bool>;

    // === Memory objects ===

    fn create_buffer(&self, desc: &BufferDesc) -> BackendResult<BufferHandle>;
    fn destroy_buffer(&self, buffer: BufferHandle);
    /// Write into a host-visible buffer
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()>;
    /// Read back a host-visible buffer
    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>>;
    fn create_image(&self, desc: &ImageDesc) -> BackendResult<ImageHandle>;
    fn destroy_image(&self, image: ImageHandle);
    fn create_image_view(&self, desc: &ImageViewDesc) -> BackendResult<ImageViewHandle>;
    fn destroy_image_view(&self, view: ImageViewHandle);
    fn create_sampler(&self, desc: &SamplerDesc) -> BackendResult<SamplerHandle>;
    fn destroy_sampler(&self, sampler: SamplerHandle);

    // === Render passes ===

    fn create_render_pass(&self, desc: &RenderPassDesc) -> BackendResult<RenderPassHandle>;
    fn destroy_render_pass(&self, render_pass: RenderPassHandle);
    fn create_framebuffer(&self, desc: &FramebufferDesc) -> BackendResult<FramebufferHandle>;
    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);

    // === Commands ===

    fn create_command_pool(&self, flags: CommandPoolFlags) -> BackendResult<CommandPoolHandle>;
    /// Destroys the pool and every command buffer allocated from it
    fn destroy_command_pool(&self, pool: CommandPoolHandle);
    fn allocate_command_buffers(
        &self,
        pool: CommandPoolHandle,
        level: CommandBufferLevel,
        count: u32,
    ) -> BackendResult<Vec<CommandBufferHandle>>;
    fn free_command_buffers(&self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]);
    /// Begin, record and end a command buffer. Re-recording implicitly resets it.
    fn record_command_buffer(
        &self,
        buffer: CommandBufferHandle,
        begin: &CommandBufferBeginInfo,
        commands: &[GpuCommand],
    ) -> BackendResult<()>;
    /// Submit every batch in one call; `fence` is signaled when all of them retire
    fn queue_submit(&self, submits: &[SubmitInfo], fence: Option<FenceHandle>) -> BackendResult<()>;

    // === Descriptors ===

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle>;
    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle);
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[DescriptorPoolSize],
    ) -> BackendResult<DescriptorPoolHandle>;
    /// Destroys the pool and frees every set allocated from it
    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle);
    /// Fails with [`BackendError::OutOfPoolMemory`] once the pool is exhausted
    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle>;
    fn write_image_descriptor(
        &self,
        set: DescriptorSetHandle,
        binding: u32,
        view: ImageViewHandle,
        sampler: SamplerHandle,
    ) -> BackendResult<()>;

    // === Presentation ===

    fn create_swapchain(&self, desc: &SwapchainDesc) -> BackendResult<SwapchainInfo>;
    /// Destroys the swapchain together with its image views
    fn destroy_swapchain(&self, swapchain: SwapchainHandle);
    /// Returns [`BackendError::OutOfDate`] when the swapchain must be recreated
    fn acquire_next_image(&self, swapchain: SwapchainHandle, signal: SemaphoreHandle) -> BackendResult<u32>;
    fn queue_present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> BackendResult<()>;
}
