//! Error types for the frame-graph engine

use crate::backend::traits::BackendError;
use crate::backend::types::ImageLayout;
use thiserror::Error;

/// Errors surfaced by the frame graph and its resource managers
#[derive(Error, Debug)]
pub enum FrameGraphError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    // Configuration errors
    #[error("Render pass '{0}' is already registered")]
    DuplicatePass(String),
    #[error("Render pass '{0}' is not registered")]
    UnknownPass(String),
    #[error("Descriptor set {0} is not in use by this allocator")]
    InvalidHandle(u64),
    #[error("Pipeline '{0}' not found")]
    MissingPipeline(String),
    #[error("Material '{0}' not found")]
    MissingMaterial(String),
    #[error("Descriptor set slot {0} is out of range (0..=7)")]
    InvalidDescriptorSlot(u32),
    #[error("Descriptor set slot 0 is reserved for materials")]
    ReservedDescriptorSlot,
    #[error("No descriptor set layout registered at slot {0}")]
    MissingDescriptorLayout(u32),
    #[error("Material binding {binding} is out of range ({count} bindings)")]
    InvalidMaterialBinding { binding: u32, count: u32 },
    #[error("Texture index {0} not found")]
    UnknownTexture(u32),
    #[error("Buffer index {0} not found")]
    UnknownBuffer(u32),
    #[error("IBL probe {0} not found")]
    UnknownProbe(u32),
    #[error("Upload of zero bytes requested")]
    EmptyUpload,

    // Resource exhaustion
    #[error("Descriptor pool exhausted after growing to {pools} pools")]
    DescriptorPoolExhausted { pools: usize },

    // Fatal conditions
    #[error("Unsupported layout transition: {from:?} -> {to:?}")]
    UnsupportedLayoutTransition { from: ImageLayout, to: ImageLayout },
    #[error("Render pass '{pass}' cannot {operation} while {state}")]
    InvalidPassState {
        pass: String,
        state: &'static str,
        operation: &'static str,
    },
    #[error("Failed to load image: {0}")]
    ImageLoad(#[from] image::ImageError),
}

pub type FrameResult<T> = Result<T, FrameGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FrameGraphError::DuplicatePass("framePass".into());
        assert_eq!(err.to_string(), "Render pass 'framePass' is already registered");

        let err = FrameGraphError::UnsupportedLayoutTransition {
            from: ImageLayout::ShaderReadOnly,
            to: ImageLayout::PresentSrc,
        };
        assert!(err.to_string().contains("ShaderReadOnly"));

        let err = FrameGraphError::InvalidPassState {
            pass: "skyPass".into(),
            state: "uninitialized",
            operation: "setup",
        };
        assert_eq!(err.to_string(), "Render pass 'skyPass' cannot setup while uninitialized");
    }

    #[test]
    fn test_backend_error_converts() {
        let err: FrameGraphError = BackendError::OutOfDate.into();
        assert!(matches!(err, FrameGraphError::Backend(BackendError::OutOfDate)));
    }
}
