//! Frame Graph Engine - GPU pass scheduling, synchronization and resource upload
//!
//! The engine turns a fixed set of render passes into ordered, semaphore-chained
//! queue submissions once per frame, bounded by one fence per swapchain image.
//!
//! Two device implementations are provided:
//! - **Vulkan**: direct Vulkan API via ash and gpu-allocator (native only)
//! - **Dummy**: an in-memory device that simulates memory, layouts and fences
//!
//! # Features
//! - Frame, sky and UI passes chained through per-pass semaphores
//! - One-shot IBL probe baking (prefiltered environment and BRDF lookup table)
//! - Staged buffer and texture uploads with mip chain generation
//! - Growable descriptor set pools
//! - Swapchain recreation on surface invalidation

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod external;
pub mod render_graph;
pub mod resources;
pub mod swapchain;

pub use backend::{DummyBackend, GpuDevice};
#[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
pub use backend::vulkan::VulkanBackend;
pub use config::FrameGraphConfig;
pub use engine::{Engine, FrameStatus, UpdateReport};
pub use error::{FrameGraphError, FrameResult};
pub use external::{
    DrawListWorld, Drawable, Material, NoOverlay, PipelineBinding, PipelineLibrary, PipelineRegistry, SimpleMaterial,
    SkySettings, UiOverlay, World, WorldTarget,
};
pub use render_graph::{RenderPass, RenderPassManager};
pub use swapchain::{Swapchain, SwapchainState, SwapchainTargets};

/// Names under which the built-in passes are registered
pub mod pass_names {
    pub use crate::render_graph::manager::{BRDF_PASS, FRAME_PASS, PRENV_PASS, SKY_PASS, UI_PASS};
}
