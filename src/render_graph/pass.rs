//! Render pass state machine
//!
//! A [`RenderPass`] wraps one native render pass with its framebuffers,
//! command pool, command buffers and the semaphore later passes in the chain
//! wait on. The set of passes is closed: [`PassKind`] enumerates them and
//! every lifecycle call dispatches on it.
//!
//! ```text
//! Uninitialized -> Ready -> (Recorded -> Submitted)* -> Recreating -> Ready
//!                                                    \-> Destroyed
//! ```

use crate::backend::command::CommandRecorder;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::FrameGraphConfig;
use crate::error::{FrameGraphError, FrameResult};
use crate::external::{PipelineLibrary, UiOverlay, World};
use crate::render_graph::brdf_pass::BrdfLutBakePass;
use crate::render_graph::frame_pass::FramePass;
use crate::render_graph::prenv_pass::EnvProbeBakePass;
use crate::render_graph::sky_pass::SkyPass;
use crate::render_graph::ui_pass::UiPass;
use crate::resources::{BufferManager, TextureManager};

/// Lifecycle state of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Uninitialized,
    Ready,
    /// Command buffer recorded for the current image
    Recorded,
    Submitted,
    Recreating,
    Destroyed,
}

impl PassState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassState::Uninitialized => "uninitialized",
            PassState::Ready => "ready",
            PassState::Recorded => "recorded",
            PassState::Submitted => "submitted",
            PassState::Recreating => "recreating",
            PassState::Destroyed => "destroyed",
        }
    }
}

/// Attachments shared by the per-frame passes
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTargets {
    pub color_format: Format,
    pub extent: Extent2d,
    /// One view per swapchain image
    pub image_views: Vec<ImageViewHandle>,
    pub depth_format: Format,
    pub depth_view: ImageViewHandle,
}

impl FrameTargets {
    pub fn image_count(&self) -> u32 {
        self.image_views.len() as u32
    }
}

/// Services a pass may use while it initialises or records
pub struct PassContext<'a> {
    pub device: &'a dyn GpuDevice,
    pub config: &'a FrameGraphConfig,
    pub buffers: &'a mut BufferManager,
    pub textures: &'a mut TextureManager,
    pub pipelines: &'a dyn PipelineLibrary,
    pub world: &'a mut dyn World,
    pub ui: &'a mut dyn UiOverlay,
}

/// Native objects every pass owns
#[derive(Debug)]
pub struct PassCore {
    pub render_pass: Option<RenderPassHandle>,
    pub framebuffers: Vec<FramebufferHandle>,
    pub command_pool: Option<CommandPoolHandle>,
    pub command_buffers: Vec<CommandBufferHandle>,
    /// Signaled when this pass is not the last in a chain
    pub semaphore: Option<SemaphoreHandle>,
    /// Where a consumer of this pass's output waits
    pub wait_stage: PipelineStage,
    pub extent: Extent2d,
}

impl PassCore {
    pub fn new(wait_stage: PipelineStage) -> Self {
        Self {
            render_pass: None,
            framebuffers: Vec::new(),
            command_pool: None,
            command_buffers: Vec::new(),
            semaphore: None,
            wait_stage,
            extent: Extent2d::default(),
        }
    }

    fn ensure_semaphore(&mut self, device: &dyn GpuDevice) -> FrameResult<()> {
        if self.semaphore.is_none() {
            self.semaphore = Some(device.create_semaphore()?);
        }
        Ok(())
    }

    pub fn create_render_pass(&mut self, device: &dyn GpuDevice, desc: &RenderPassDesc) -> FrameResult<RenderPassHandle> {
        let render_pass = device.create_render_pass(desc)?;
        self.render_pass = Some(render_pass);
        Ok(render_pass)
    }

    /// One framebuffer per attachment list
    pub fn create_framebuffers(
        &mut self,
        device: &dyn GpuDevice,
        attachments: impl IntoIterator<Item = Vec<ImageViewHandle>>,
        extent: Extent2d,
    ) -> FrameResult<()> {
        let render_pass = self.render_pass()?;
        for attachments in attachments {
            let framebuffer = device.create_framebuffer(&FramebufferDesc {
                render_pass,
                attachments,
                extent,
                layers: 1,
            })?;
            self.framebuffers.push(framebuffer);
        }
        self.extent = extent;
        Ok(())
    }

    /// Dedicated pool with `count` primary buffers, re-recorded every use
    pub fn create_command_buffers(&mut self, device: &dyn GpuDevice, count: u32) -> FrameResult<()> {
        let pool = device.create_command_pool(CommandPoolFlags::RESET_COMMAND_BUFFER | CommandPoolFlags::TRANSIENT)?;
        self.command_pool = Some(pool);
        self.command_buffers = device.allocate_command_buffers(pool, CommandBufferLevel::Primary, count)?;
        Ok(())
    }

    pub fn render_pass(&self) -> FrameResult<RenderPassHandle> {
        self.render_pass
            .ok_or_else(|| BackendError::UnknownHandle { kind: "render pass", id: 0 }.into())
    }

    pub fn framebuffer(&self, index: u32) -> FrameResult<FramebufferHandle> {
        self.framebuffers
            .get(index as usize)
            .copied()
            .ok_or_else(|| BackendError::UnknownHandle { kind: "framebuffer", id: u64::from(index) }.into())
    }

    pub fn command_buffer(&self, index: u32) -> FrameResult<CommandBufferHandle> {
        self.command_buffers
            .get(index as usize)
            .copied()
            .ok_or_else(|| BackendError::UnknownHandle { kind: "command buffer", id: u64::from(index) }.into())
    }

    /// Re-record command buffer `index` for one-time submission
    pub fn record(&self, device: &dyn GpuDevice, index: u32, recorder: &CommandRecorder) -> FrameResult<()> {
        let cmd = self.command_buffer(index)?;
        device.record_command_buffer(cmd, &CommandBufferBeginInfo::one_time(), recorder.commands())?;
        Ok(())
    }

    /// Destroy everything `init` builds; the semaphore survives
    fn teardown(&mut self, device: &dyn GpuDevice) {
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer);
        }
        if let Some(pool) = self.command_pool.take() {
            device.free_command_buffers(pool, &self.command_buffers);
            device.destroy_command_pool(pool);
        }
        self.command_buffers.clear();
        if let Some(render_pass) = self.render_pass.take() {
            device.destroy_render_pass(render_pass);
        }
    }

    fn destroy(&mut self, device: &dyn GpuDevice) {
        self.teardown(device);
        if let Some(semaphore) = self.semaphore.take() {
            device.destroy_semaphore(semaphore);
        }
    }
}

/// The closed set of passes
pub enum PassKind {
    Frame(FramePass),
    Ui(UiPass),
    Sky(SkyPass),
    EnvProbeBake(EnvProbeBakePass),
    BrdfLutBake(BrdfLutBakePass),
}

impl PassKind {
    fn wait_stage(&self) -> PipelineStage {
        match self {
            PassKind::Frame(_) => PipelineStage::COLOR_ATTACHMENT_OUTPUT | PipelineStage::EARLY_FRAGMENT_TESTS,
            _ => PipelineStage::COLOR_ATTACHMENT_OUTPUT,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            PassKind::Frame(_) => "FramePass",
            PassKind::Ui(_) => "UiPass",
            PassKind::Sky(_) => "SkyPass",
            PassKind::EnvProbeBake(_) => "EnvProbeBakePass",
            PassKind::BrdfLutBake(_) => "BrdfLutBakePass",
        }
    }
}

pub struct RenderPass {
    name: String,
    state: PassState,
    core: PassCore,
    kind: PassKind,
}

impl RenderPass {
    pub fn new(name: impl Into<String>, kind: PassKind) -> Self {
        Self {
            name: name.into(),
            state: PassState::Uninitialized,
            core: PassCore::new(kind.wait_stage()),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    pub fn core(&self) -> &PassCore {
        &self.core
    }

    pub fn kind(&self) -> &PassKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut PassKind {
        &mut self.kind
    }

    /// Core and variant borrowed together
    pub fn parts_mut(&mut self) -> (&PassCore, &mut PassKind) {
        (&self.core, &mut self.kind)
    }

    pub fn semaphore(&self) -> Option<SemaphoreHandle> {
        self.core.semaphore
    }

    pub fn wait_stage(&self) -> PipelineStage {
        self.core.wait_stage
    }

    pub fn framebuffers(&self) -> &[FramebufferHandle] {
        &self.core.framebuffers
    }

    /// Task passes run out of band and target fixed-size offscreen images
    pub fn is_task(&self) -> bool {
        matches!(self.kind, PassKind::EnvProbeBake(_) | PassKind::BrdfLutBake(_))
    }

    fn invalid(&self, operation: &'static str) -> FrameGraphError {
        FrameGraphError::InvalidPassState {
            pass: self.name.clone(),
            state: self.state.as_str(),
            operation,
        }
    }

    /// Whether the pass hands the swapchain image to presentation.
    /// Takes effect at the next `init` or `recreate`.
    pub fn set_final_pass(&mut self, is_final: bool) {
        match &mut self.kind {
            PassKind::Frame(pass) => pass.set_present(is_final),
            PassKind::Sky(pass) => pass.set_present(is_final),
            PassKind::Ui(pass) => pass.set_present(is_final),
            PassKind::EnvProbeBake(_) | PassKind::BrdfLutBake(_) => {}
        }
    }

    pub fn init(&mut self, ctx: &mut PassContext<'_>, targets: &FrameTargets) -> FrameResult<()> {
        if !matches!(self.state, PassState::Uninitialized | PassState::Recreating) {
            return Err(self.invalid("init"));
        }
        self.core.ensure_semaphore(ctx.device)?;
        match &mut self.kind {
            PassKind::Frame(pass) => pass.init(&mut self.core, ctx, targets)?,
            PassKind::Ui(pass) => pass.init(&mut self.core, ctx, targets)?,
            PassKind::Sky(pass) => pass.init(&mut self.core, ctx, targets)?,
            PassKind::EnvProbeBake(pass) => pass.init(&mut self.core, ctx)?,
            PassKind::BrdfLutBake(pass) => pass.init(&mut self.core, ctx)?,
        }
        self.state = PassState::Ready;
        log::info!("{} '{}' init", self.kind.label(), self.name);
        Ok(())
    }

    /// Acquire pipeline-dependent resources once shaders are loaded
    pub fn post_shader_load_init(&mut self, ctx: &mut PassContext<'_>) -> FrameResult<()> {
        if matches!(self.state, PassState::Uninitialized | PassState::Destroyed) {
            return Err(self.invalid("post-shader-load init"));
        }
        match &mut self.kind {
            PassKind::Sky(pass) => pass.post_shader_load_init(ctx),
            PassKind::EnvProbeBake(pass) => pass.post_shader_load_init(ctx),
            PassKind::BrdfLutBake(pass) => pass.post_shader_load_init(ctx),
            PassKind::Frame(_) | PassKind::Ui(_) => Ok(()),
        }
    }

    /// Re-record the command buffer of `image_index`
    pub fn setup(&mut self, ctx: &mut PassContext<'_>, image_index: u32) -> FrameResult<()> {
        if self.is_task() || !matches!(self.state, PassState::Ready | PassState::Recorded | PassState::Submitted) {
            return Err(self.invalid("setup"));
        }
        match &mut self.kind {
            PassKind::Frame(pass) => pass.setup(&self.core, ctx, image_index)?,
            PassKind::Ui(pass) => pass.setup(&self.core, ctx, image_index)?,
            PassKind::Sky(pass) => pass.setup(&self.core, ctx, image_index)?,
            PassKind::EnvProbeBake(_) | PassKind::BrdfLutBake(_) => {}
        }
        self.state = PassState::Recorded;
        Ok(())
    }

    /// Submission of this pass's buffer for `image_index`. Does not submit.
    pub fn submit_info(
        &self,
        image_index: u32,
        wait: SemaphoreHandle,
        wait_stage: PipelineStage,
        signal: SemaphoreHandle,
    ) -> SubmitInfo {
        SubmitInfo {
            wait_semaphores: vec![wait],
            wait_stages: vec![wait_stage],
            command_buffers: self.core.command_buffers.get(image_index as usize).copied().into_iter().collect(),
            signal_semaphores: vec![signal],
        }
    }

    pub fn mark_submitted(&mut self) {
        if matches!(self.state, PassState::Ready | PassState::Recorded) {
            self.state = PassState::Submitted;
        }
    }

    fn teardown(&mut self, ctx: &mut PassContext<'_>) {
        match &mut self.kind {
            PassKind::Frame(_) | PassKind::Ui(_) | PassKind::Sky(_) => {}
            PassKind::EnvProbeBake(pass) => pass.destroy(ctx),
            PassKind::BrdfLutBake(pass) => pass.destroy(ctx),
        }
        self.core.teardown(ctx.device);
    }

    /// Rebuild against new targets after the fences of in-flight work retire
    pub fn recreate(&mut self, ctx: &mut PassContext<'_>, targets: &FrameTargets, in_flight: &[FenceHandle]) -> FrameResult<()> {
        if self.is_task() {
            return Ok(());
        }
        if matches!(self.state, PassState::Uninitialized | PassState::Destroyed) {
            return Err(self.invalid("recreate"));
        }
        if !in_flight.is_empty() {
            ctx.device.wait_for_fences(in_flight, WAIT_FOREVER)?;
        }
        self.state = PassState::Recreating;
        self.core.teardown(ctx.device);
        self.init(ctx, targets)?;
        log::info!("{} '{}' recreate", self.kind.label(), self.name);
        Ok(())
    }

    pub fn destroy(&mut self, ctx: &mut PassContext<'_>, in_flight: &[FenceHandle]) -> FrameResult<()> {
        if self.state == PassState::Destroyed {
            return Ok(());
        }
        if !in_flight.is_empty() {
            ctx.device.wait_for_fences(in_flight, WAIT_FOREVER)?;
        }
        self.teardown(ctx);
        self.core.destroy(ctx.device);
        self.state = PassState::Destroyed;
        log::info!("{} '{}' destroy", self.kind.label(), self.name);
        Ok(())
    }
}

/// Subpass dependency from outside the pass on color (and optionally depth) output
pub(crate) fn external_dependency(depth: bool) -> SubpassDependency {
    let mut stages = PipelineStage::COLOR_ATTACHMENT_OUTPUT;
    let mut access = Access::COLOR_ATTACHMENT_READ | Access::COLOR_ATTACHMENT_WRITE;
    if depth {
        stages |= PipelineStage::EARLY_FRAGMENT_TESTS;
        access |= Access::DEPTH_STENCIL_ATTACHMENT_READ | Access::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    SubpassDependency {
        src_subpass: None,
        dst_subpass: Some(0),
        src_stage: stages,
        dst_stage: stages,
        src_access: Access::empty(),
        dst_access: access,
        by_region: false,
    }
}

/// Final layout of a swapchain color attachment
pub(crate) fn color_final_layout(present: bool) -> ImageLayout {
    if present {
        ImageLayout::PresentSrc
    } else {
        ImageLayout::ColorAttachment
    }
}

/// Per-image attachment lists of a pass that renders into the swapchain and depth
pub(crate) fn swapchain_attachments(targets: &FrameTargets, depth: bool) -> Vec<Vec<ImageViewHandle>> {
    targets
        .image_views
        .iter()
        .map(|&view| {
            if depth {
                vec![view, targets.depth_view]
            } else {
                vec![view]
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_info_is_pure() {
        let pass = RenderPass::new("uiPass", PassKind::Ui(UiPass::new()));
        let wait = SemaphoreHandle::from_raw(1);
        let signal = SemaphoreHandle::from_raw(2);
        let info = pass.submit_info(0, wait, PipelineStage::COLOR_ATTACHMENT_OUTPUT, signal);
        assert_eq!(info.wait_semaphores, vec![wait]);
        assert_eq!(info.signal_semaphores, vec![signal]);
        assert!(info.command_buffers.is_empty());
        assert_eq!(pass.state(), PassState::Uninitialized);
    }

    #[test]
    fn test_task_pass_flags() {
        let pass = RenderPass::new("brdfPass", PassKind::BrdfLutBake(BrdfLutBakePass::new()));
        assert!(pass.is_task());
        let frame = RenderPass::new("framePass", PassKind::Frame(FramePass::new()));
        assert!(!frame.is_task());
        assert!(frame.wait_stage().contains(PipelineStage::EARLY_FRAGMENT_TESTS));
    }

    #[test]
    fn test_final_layout() {
        assert_eq!(color_final_layout(true), ImageLayout::PresentSrc);
        assert_eq!(color_final_layout(false), ImageLayout::ColorAttachment);
    }
}
