//! Resource management
//!
//! Device memory allocation, staging uploads for buffers and textures, and
//! descriptor set allocation.

mod allocator;
mod buffer_manager;
mod descriptor_allocator;
mod descriptor_layouts;
mod texture;
mod texture_manager;
mod transfer;

pub use allocator::*;
pub use buffer_manager::*;
pub use descriptor_allocator::*;
pub use descriptor_layouts::*;
pub use texture::*;
pub use texture_manager::*;
pub use transfer::*;
