//! Common types shared between backends

use crate::backend::traits::*;

/// Implements the bit operations shared by every flag newtype.
macro_rules! impl_flags {
    ($name:ident) => {
        impl $name {
            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn bits(&self) -> u32 {
                self.0
            }

            pub fn contains(&self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            pub fn intersects(&self, other: Self) -> bool {
                (self.0 & other.0) != 0
            }

            pub fn is_empty(&self) -> bool {
                self.0 == 0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::empty()
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self::Output {
                Self(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

/// Texel format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rg16Float,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
    Depth24PlusStencil8,
    Depth32FloatStencil8,
}

impl Format {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            Format::Depth32Float | Format::Depth24PlusStencil8 | Format::Depth32FloatStencil8
        )
    }

    pub fn has_stencil(&self) -> bool {
        matches!(self, Format::Depth24PlusStencil8 | Format::Depth32FloatStencil8)
    }

    /// Aspect mask covering every plane of the format
    pub fn aspect(&self) -> ImageAspect {
        if self.has_stencil() {
            ImageAspect::DEPTH | ImageAspect::STENCIL
        } else if self.is_depth() {
            ImageAspect::DEPTH
        } else {
            ImageAspect::COLOR
        }
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Format::Rgba8Unorm
            | Format::Rgba8UnormSrgb
            | Format::Bgra8Unorm
            | Format::Bgra8UnormSrgb
            | Format::Rg16Float
            | Format::Depth32Float
            | Format::Depth24PlusStencil8 => 4,
            Format::Rgba16Float | Format::Depth32FloatStencil8 => 8,
            Format::Rgba32Float => 16,
        }
    }
}

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const COPY_DST: Self = Self(1 << 1);
    pub const INDEX: Self = Self(1 << 2);
    pub const VERTEX: Self = Self(1 << 3);
    pub const UNIFORM: Self = Self(1 << 4);
    pub const STORAGE: Self = Self(1 << 5);
}

impl_flags!(BufferUsage);

/// Where a resource's backing memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryLocation {
    /// Device-local, not host visible
    #[default]
    GpuOnly,
    /// Host visible, written by the CPU and read by the GPU
    CpuToGpu,
    /// Host visible, written by the GPU and read back by the CPU
    GpuToCpu,
}

impl MemoryLocation {
    pub fn is_host_visible(&self) -> bool {
        !matches!(self, MemoryLocation::GpuOnly)
    }
}

/// Image usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageUsage(u32);

impl ImageUsage {
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const COPY_DST: Self = Self(1 << 1);
    pub const SAMPLED: Self = Self(1 << 2);
    pub const STORAGE: Self = Self(1 << 3);
    pub const COLOR_ATTACHMENT: Self = Self(1 << 4);
    pub const DEPTH_STENCIL_ATTACHMENT: Self = Self(1 << 5);
}

impl_flags!(ImageUsage);

/// Image aspect flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageAspect(u32);

impl ImageAspect {
    pub const COLOR: Self = Self(1 << 0);
    pub const DEPTH: Self = Self(1 << 1);
    pub const STENCIL: Self = Self(1 << 2);
}

impl_flags!(ImageAspect);

/// Pipeline stage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineStage(u32);

impl PipelineStage {
    pub const TOP_OF_PIPE: Self = Self(1 << 0);
    pub const VERTEX_SHADER: Self = Self(1 << 1);
    pub const FRAGMENT_SHADER: Self = Self(1 << 2);
    pub const EARLY_FRAGMENT_TESTS: Self = Self(1 << 3);
    pub const LATE_FRAGMENT_TESTS: Self = Self(1 << 4);
    pub const COLOR_ATTACHMENT_OUTPUT: Self = Self(1 << 5);
    pub const TRANSFER: Self = Self(1 << 6);
    pub const BOTTOM_OF_PIPE: Self = Self(1 << 7);
    pub const ALL_COMMANDS: Self = Self(1 << 8);
}

impl_flags!(PipelineStage);

/// Memory access flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Access(u32);

impl Access {
    pub const SHADER_READ: Self = Self(1 << 0);
    pub const COLOR_ATTACHMENT_READ: Self = Self(1 << 1);
    pub const COLOR_ATTACHMENT_WRITE: Self = Self(1 << 2);
    pub const DEPTH_STENCIL_ATTACHMENT_READ: Self = Self(1 << 3);
    pub const DEPTH_STENCIL_ATTACHMENT_WRITE: Self = Self(1 << 4);
    pub const TRANSFER_READ: Self = Self(1 << 5);
    pub const TRANSFER_WRITE: Self = Self(1 << 6);
    pub const MEMORY_READ: Self = Self(1 << 7);
}

impl_flags!(Access);

/// Shader stage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderStage(u32);

impl ShaderStage {
    pub const VERTEX: Self = Self(1 << 0);
    pub const FRAGMENT: Self = Self(1 << 1);
    pub const COMPUTE: Self = Self(1 << 2);
    pub const VERTEX_FRAGMENT: Self = Self((1 << 0) | (1 << 1));
}

impl_flags!(ShaderStage);

/// Command pool creation flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandPoolFlags(u32);

impl CommandPoolFlags {
    /// Buffers are short-lived
    pub const TRANSIENT: Self = Self(1 << 0);
    /// Buffers may be reset individually, including implicitly on begin
    pub const RESET_COMMAND_BUFFER: Self = Self(1 << 1);
}

impl_flags!(CommandPoolFlags);

/// Command buffer begin flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandBufferUsage(u32);

impl CommandBufferUsage {
    pub const ONE_TIME_SUBMIT: Self = Self(1 << 0);
    pub const RENDER_PASS_CONTINUE: Self = Self(1 << 1);
    pub const SIMULTANEOUS_USE: Self = Self(1 << 2);
}

impl_flags!(CommandBufferUsage);

/// Image layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    #[default]
    Undefined,
    General,
    ColorAttachment,
    DepthStencilAttachment,
    TransferSrc,
    TransferDst,
    ShaderReadOnly,
    PresentSrc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadOp {
    Load,
    #[default]
    Clear,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirrorRepeat,
    ClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BorderColor {
    FloatTransparentBlack,
    #[default]
    FloatOpaqueBlack,
    FloatOpaqueWhite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageViewType {
    #[default]
    D2,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandBufferLevel {
    #[default]
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    UniformBuffer,
    StorageBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexFormat {
    Uint16,
    #[default]
    Uint32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self { width, height, depth }
    }

    /// Extent of the given mip level, never smaller than one texel
    pub fn mip_level(&self, level: u32) -> Self {
        Self {
            width: (self.width >> level).max(1),
            height: (self.height >> level).max(1),
            depth: (self.depth >> level).max(1),
        }
    }

    pub fn texel_count(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }
}

impl From<Extent2d> for Extent3d {
    fn from(extent: Extent2d) -> Self {
        Self::new(extent.width, extent.height, 1)
    }
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    pub location: MemoryLocation,
}

impl BufferDesc {
    pub fn new(size: u64, usage: BufferUsage, location: MemoryLocation) -> Self {
        Self {
            label: None,
            size,
            usage,
            location,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Image descriptor
#[derive(Debug, Clone)]
pub struct ImageDesc {
    pub label: Option<String>,
    pub extent: Extent3d,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: Format,
    pub usage: ImageUsage,
    /// Allows cube views over six array layers
    pub cube_compatible: bool,
}

impl ImageDesc {
    pub fn new_2d(width: u32, height: u32, format: Format, usage: ImageUsage) -> Self {
        Self {
            label: None,
            extent: Extent3d::new(width, height, 1),
            mip_levels: 1,
            array_layers: 1,
            format,
            usage,
            cube_compatible: false,
        }
    }

    pub fn new_cube(dim: u32, format: Format, usage: ImageUsage) -> Self {
        Self {
            label: None,
            extent: Extent3d::new(dim, dim, 1),
            mip_levels: 1,
            array_layers: 6,
            format,
            usage,
            cube_compatible: true,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    /// Number of (mip, layer) subresources
    pub fn subresource_count(&self) -> u32 {
        self.mip_levels * self.array_layers
    }
}

/// Range of mip levels and array layers within an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSubresourceRange {
    pub aspect: ImageAspect,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl ImageSubresourceRange {
    pub fn new(aspect: ImageAspect, level_count: u32, layer_count: u32) -> Self {
        Self {
            aspect,
            base_mip_level: 0,
            level_count,
            base_array_layer: 0,
            layer_count,
        }
    }

    pub fn color() -> Self {
        Self::new(ImageAspect::COLOR, 1, 1)
    }

    pub fn mip(aspect: ImageAspect, level: u32, layer_count: u32) -> Self {
        Self {
            aspect,
            base_mip_level: level,
            level_count: 1,
            base_array_layer: 0,
            layer_count,
        }
    }
}

/// A single mip level of a set of array layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSubresourceLayers {
    pub aspect: ImageAspect,
    pub mip_level: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl ImageSubresourceLayers {
    pub fn color(mip_level: u32, base_array_layer: u32, layer_count: u32) -> Self {
        Self {
            aspect: ImageAspect::COLOR,
            mip_level,
            base_array_layer,
            layer_count,
        }
    }
}

/// Image view descriptor
#[derive(Debug, Clone)]
pub struct ImageViewDesc {
    pub image: ImageHandle,
    pub view_type: ImageViewType,
    pub format: Format,
    pub range: ImageSubresourceRange,
}

impl ImageViewDesc {
    pub fn new_2d(image: ImageHandle, format: Format, aspect: ImageAspect, mip_levels: u32) -> Self {
        Self {
            image,
            view_type: ImageViewType::D2,
            format,
            range: ImageSubresourceRange::new(aspect, mip_levels, 1),
        }
    }

    pub fn new_cube(image: ImageHandle, format: Format, mip_levels: u32) -> Self {
        Self {
            image,
            view_type: ImageViewType::Cube,
            format,
            range: ImageSubresourceRange::new(ImageAspect::COLOR, mip_levels, 6),
        }
    }
}

/// Sampler descriptor
#[derive(Debug, Clone)]
pub struct SamplerDesc {
    pub label: Option<String>,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub address_mode: AddressMode,
    pub max_anisotropy: Option<f32>,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: BorderColor,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            label: None,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Nearest,
            address_mode: AddressMode::Repeat,
            max_anisotropy: None,
            min_lod: 0.0,
            max_lod: 0.0,
            border_color: BorderColor::FloatOpaqueBlack,
        }
    }
}

/// Attachment of a render pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachmentDesc {
    pub format: Format,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub initial_layout: ImageLayout,
    pub final_layout: ImageLayout,
}

/// Execution dependency between subpasses; `None` denotes the external scope
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubpassDependency {
    pub src_subpass: Option<u32>,
    pub dst_subpass: Option<u32>,
    pub src_stage: PipelineStage,
    pub dst_stage: PipelineStage,
    pub src_access: Access,
    pub dst_access: Access,
    pub by_region: bool,
}

/// Single-subpass render pass descriptor
#[derive(Debug, Clone, Default)]
pub struct RenderPassDesc {
    pub label: Option<String>,
    pub color_attachments: Vec<AttachmentDesc>,
    pub depth_attachment: Option<AttachmentDesc>,
    pub dependencies: Vec<SubpassDependency>,
}

impl RenderPassDesc {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn attachment_count(&self) -> usize {
        self.color_attachments.len() + usize::from(self.depth_attachment.is_some())
    }
}

/// Framebuffer descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct FramebufferDesc {
    pub render_pass: RenderPassHandle,
    pub attachments: Vec<ImageViewHandle>,
    pub extent: Extent2d,
    pub layers: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn from_extent(extent: Extent2d) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect2d {
    pub x: i32,
    pub y: i32,
    pub extent: Extent2d,
}

impl Rect2d {
    pub fn from_extent(extent: Extent2d) -> Self {
        Self { x: 0, y: 0, extent }
    }
}

/// Per-type descriptor count in a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolSize {
    pub ty: DescriptorType,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub ty: DescriptorType,
    pub count: u32,
    pub stages: ShaderStage,
}

/// Inheritance info for secondary command buffers recorded inside a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBufferInheritance {
    pub render_pass: RenderPassHandle,
    pub subpass: u32,
    pub framebuffer: Option<FramebufferHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandBufferBeginInfo {
    pub usage: CommandBufferUsage,
    pub inheritance: Option<CommandBufferInheritance>,
}

impl CommandBufferBeginInfo {
    pub fn one_time() -> Self {
        Self {
            usage: CommandBufferUsage::ONE_TIME_SUBMIT,
            inheritance: None,
        }
    }
}

/// One batch of a queue submission
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitInfo {
    pub wait_semaphores: Vec<SemaphoreHandle>,
    pub wait_stages: Vec<PipelineStage>,
    pub command_buffers: Vec<CommandBufferHandle>,
    pub signal_semaphores: Vec<SemaphoreHandle>,
}

/// Swapchain creation request
#[derive(Debug, Clone)]
pub struct SwapchainDesc {
    /// Requested extent, used only when the surface leaves it to the application
    pub extent: Extent2d,
    pub vsync: bool,
    pub preferred_format: Format,
}

/// Created swapchain and its per-image views
#[derive(Debug, Clone)]
pub struct SwapchainInfo {
    pub handle: SwapchainHandle,
    pub format: Format,
    pub extent: Extent2d,
    pub image_views: Vec<ImageViewHandle>,
}

impl SwapchainInfo {
    pub fn image_count(&self) -> u32 {
        self.image_views.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_ops() {
        let usage = ImageUsage::SAMPLED | ImageUsage::COPY_DST;
        assert!(usage.contains(ImageUsage::SAMPLED));
        assert!(!usage.contains(ImageUsage::COPY_SRC));
        assert!(usage.intersects(ImageUsage::COPY_DST | ImageUsage::STORAGE));
        assert!(PipelineStage::default().is_empty());
    }

    #[test]
    fn test_mip_extent_clamps() {
        let extent = Extent3d::new(512, 256, 1);
        assert_eq!(extent.mip_level(1), Extent3d::new(256, 128, 1));
        assert_eq!(extent.mip_level(9), Extent3d::new(1, 1, 1));
    }

    #[test]
    fn test_depth_aspect() {
        assert_eq!(Format::Depth32Float.aspect(), ImageAspect::DEPTH);
        assert_eq!(
            Format::Depth24PlusStencil8.aspect(),
            ImageAspect::DEPTH | ImageAspect::STENCIL
        );
        assert_eq!(Format::Rgba16Float.aspect(), ImageAspect::COLOR);
    }
}
