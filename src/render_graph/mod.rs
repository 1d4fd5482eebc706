//! Frame graph
//!
//! Per-frame render passes chained through semaphores, out-of-band task
//! passes for IBL baking, and the manager that owns both.

pub mod arena;
pub mod brdf_pass;
pub mod frame_pass;
pub mod ibl;
pub mod manager;
pub mod pass;
pub mod prenv_pass;
pub mod primitives;
pub mod sky_pass;
pub mod ui_pass;

pub use arena::{PassArena, PassHandle};
pub use brdf_pass::{BrdfLutBakePass, BrdfLutResources, BRDF_PIPELINE};
pub use frame_pass::FramePass;
pub use ibl::{probe_submissions, IblProbe, ProbeIndex};
pub use manager::*;
pub use pass::{FrameTargets, PassContext, PassCore, PassKind, PassState, RenderPass};
pub use prenv_pass::{EnvProbeBakePass, EnvProbeResources, PrenvPushConstants, PRENV_PIPELINE};
pub use sky_pass::{SkyPass, SkyPushConstants, SKY_PIPELINE};
pub use ui_pass::UiPass;
