//! Engine configuration

use crate::backend::types::Format;

/// Configuration for the frame graph and the passes it registers
#[derive(Debug, Clone)]
pub struct FrameGraphConfig {
    /// Requested surface width, used when the surface does not dictate its extent
    pub width: u32,
    /// Requested surface height
    pub height: u32,
    /// Enable vsync (FIFO presentation)
    pub vsync: bool,
    /// Preferred swapchain format
    pub swapchain_format: Format,
    /// Format of the frame pass depth target
    pub depth_format: Format,
    /// Clear color of the frame pass
    pub clear_color: [f32; 4],
    /// Capacity of each descriptor pool, in sets
    pub descriptor_sets_per_pool: u32,
    /// Face size of the prefiltered environment cube map
    pub env_map_dim: u32,
    pub env_map_format: Format,
    /// Importance samples per texel during env-map prefiltering
    pub prenv_sample_count: u32,
    /// Size of the BRDF integration lookup table
    pub brdf_lut_dim: u32,
    pub brdf_lut_format: Format,
    pub sky_exposure: f32,
    pub sky_gamma: f32,
    /// Register the sky pass after the frame pass
    pub enable_sky_pass: bool,
    /// Register the UI overlay pass last in the chain
    pub enable_ui_pass: bool,
}

impl Default for FrameGraphConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            vsync: true,
            swapchain_format: Format::Bgra8Unorm,
            depth_format: Format::Depth32Float,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            descriptor_sets_per_pool: 1 << 14,
            env_map_dim: 512,
            env_map_format: Format::Rgba16Float,
            prenv_sample_count: 32,
            brdf_lut_dim: 512,
            brdf_lut_format: Format::Rg16Float,
            sky_exposure: 16.0,
            sky_gamma: 2.2,
            enable_sky_pass: true,
            enable_ui_pass: true,
        }
    }
}
