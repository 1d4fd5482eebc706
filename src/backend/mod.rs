//! Backend abstraction layer
//!
//! Provides the device trait, the command stream and the common types that the
//! dummy and Vulkan backends implement.

pub mod command;
pub mod dummy;
pub mod traits;
pub mod types;

// Vulkan backend is only available on native platforms
#[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
pub mod vulkan;

pub use command::*;
pub use dummy::{DummyBackend, DummyStats};
pub use traits::*;
pub use types::*;
