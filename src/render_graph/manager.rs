//! Render pass manager
//!
//! Owns the per-frame passes in submission order, the task passes, the
//! shared depth target, the IBL probes and one fence per swapchain image.
//! The per-frame passes are submitted as one semaphore-chained batch; the
//! fence of the acquired image is the only thing bounding how far the CPU
//! runs ahead of the GPU.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{FrameGraphError, FrameResult};
use crate::render_graph::arena::{PassArena, PassHandle};
use crate::render_graph::brdf_pass::BrdfLutBakePass;
use crate::render_graph::frame_pass::FramePass;
use crate::render_graph::ibl::{probe_submissions, IblProbe, ProbeIndex};
use crate::render_graph::pass::{FrameTargets, PassContext, PassKind, RenderPass};
use crate::render_graph::prenv_pass::EnvProbeBakePass;
use crate::render_graph::sky_pass::SkyPass;
use crate::render_graph::ui_pass::UiPass;
use crate::resources::Texture;
use crate::swapchain::SwapchainTargets;
use glam::Vec3;
use std::collections::HashMap;

pub const FRAME_PASS: &str = "framePass";
pub const SKY_PASS: &str = "skyPass";
pub const UI_PASS: &str = "uiPass";
pub const PRENV_PASS: &str = "prenvPass";
pub const BRDF_PASS: &str = "brdfPass";

/// Submissions for `passes` chained between an external wait and signal.
///
/// A single pass waits on `wait` and signals `signal`. With more passes the
/// first waits on `wait`, each later pass waits on its predecessor's
/// semaphore at the predecessor's stage, and only the last signals `signal`.
pub fn build_submission_chain(
    passes: &[&RenderPass],
    image_index: u32,
    wait: SemaphoreHandle,
    wait_stage: PipelineStage,
    signal: SemaphoreHandle,
) -> FrameResult<Vec<SubmitInfo>> {
    let count = passes.len();
    let mut submits = Vec::with_capacity(count);
    let mut previous: Option<(SemaphoreHandle, PipelineStage)> = None;

    for (i, pass) in passes.iter().enumerate() {
        let (wait_on, stage) = previous.unwrap_or((wait, wait_stage));
        let signal_on = if i + 1 == count {
            signal
        } else {
            pass.semaphore().ok_or_else(|| FrameGraphError::InvalidPassState {
                pass: pass.name().to_string(),
                state: pass.state().as_str(),
                operation: "chain",
            })?
        };
        submits.push(pass.submit_info(image_index, wait_on, stage, signal_on));
        previous = Some((signal_on, pass.wait_stage()));
    }
    Ok(submits)
}

pub struct RenderPassManager {
    passes: PassArena<RenderPass>,
    order: Vec<PassHandle>,
    tasks: Vec<PassHandle>,
    names: HashMap<String, PassHandle>,
    fences: Vec<FenceHandle>,
    depth: Option<Texture>,
    targets: Option<FrameTargets>,
    probes: Vec<IblProbe>,
    post_shader: bool,
}

impl RenderPassManager {
    pub fn new() -> Self {
        log::info!("RenderPassManager init");
        Self {
            passes: PassArena::new(),
            order: Vec::new(),
            tasks: Vec::new(),
            names: HashMap::new(),
            fences: Vec::new(),
            depth: None,
            targets: None,
            probes: Vec::new(),
            post_shader: false,
        }
    }

    /// Depth target, fences and frame targets for a new swapchain
    fn create_frame_targets(&mut self, ctx: &mut PassContext<'_>, swapchain: &SwapchainTargets) -> FrameResult<()> {
        let extent = swapchain.extent;
        let format = ctx.config.depth_format;
        let depth = ctx.textures.create_texture_2d(
            extent.width,
            extent.height,
            1,
            format,
            ImageUsage::DEPTH_STENCIL_ATTACHMENT,
        )?;
        if let Err(e) = ctx.textures.transition_image_layout(
            depth.handle(),
            format,
            ImageLayout::Undefined,
            ImageLayout::DepthStencilAttachment,
            1,
            1,
        ) {
            ctx.textures.destroy_unregistered(depth);
            return Err(e);
        }

        self.targets = Some(FrameTargets {
            color_format: swapchain.format,
            extent,
            image_views: swapchain.image_views.clone(),
            depth_format: format,
            depth_view: depth.view,
        });
        self.depth = Some(depth);

        let image_count = swapchain.image_views.len();
        if self.fences.len() != image_count {
            self.destroy_fences(ctx.device);
            for _ in 0..image_count {
                self.fences.push(ctx.device.create_fence(true)?);
            }
        }
        Ok(())
    }

    fn destroy_frame_targets(&mut self, ctx: &mut PassContext<'_>) {
        self.targets = None;
        if let Some(depth) = self.depth.take() {
            ctx.textures.destroy_unregistered(depth);
        }
    }

    fn destroy_fences(&mut self, device: &dyn GpuDevice) {
        for fence in self.fences.drain(..) {
            device.destroy_fence(fence);
        }
    }

    fn register(&mut self, ctx: &mut PassContext<'_>, name: &str, kind: PassKind, is_final: bool) -> FrameResult<PassHandle> {
        if self.names.contains_key(name) {
            return Err(FrameGraphError::DuplicatePass(name.to_string()));
        }
        let targets = self.targets.as_ref().ok_or_else(|| FrameGraphError::InvalidPassState {
            pass: name.to_string(),
            state: "uninitialized",
            operation: "register before the swapchain targets exist",
        })?;

        let mut pass = RenderPass::new(name, kind);
        pass.set_final_pass(is_final);
        pass.init(ctx, targets)?;
        if self.post_shader {
            pass.post_shader_load_init(ctx)?;
        }

        let is_task = pass.is_task();
        let handle = self.passes.insert(pass);
        self.names.insert(name.to_string(), handle);
        if is_task {
            self.tasks.push(handle);
        } else {
            self.order.push(handle);
        }
        Ok(handle)
    }

    /// Register the fixed passes for `swapchain`: frame, sky and UI in
    /// submission order, then the probe and LUT bake tasks
    pub fn init_passes(&mut self, ctx: &mut PassContext<'_>, swapchain: &SwapchainTargets) -> FrameResult<()> {
        if self.targets.is_none() {
            self.create_frame_targets(ctx, swapchain)?;
        }

        let mut frame_passes = vec![(FRAME_PASS, PassKind::Frame(FramePass::new()))];
        if ctx.config.enable_sky_pass {
            frame_passes.push((SKY_PASS, PassKind::Sky(SkyPass::new())));
        }
        if ctx.config.enable_ui_pass {
            frame_passes.push((UI_PASS, PassKind::Ui(UiPass::new())));
        }
        let last = frame_passes.len() - 1;
        for (i, (name, kind)) in frame_passes.into_iter().enumerate() {
            self.register(ctx, name, kind, i == last)?;
        }

        self.add_task_pass(ctx, PRENV_PASS, PassKind::EnvProbeBake(EnvProbeBakePass::new()))?;
        self.add_task_pass(ctx, BRDF_PASS, PassKind::BrdfLutBake(BrdfLutBakePass::new()))?;
        Ok(())
    }

    /// Append a per-frame pass to the end of the chain. The previous last pass
    /// is rebuilt so that only the new one hands the image to presentation.
    pub fn add_pass(&mut self, ctx: &mut PassContext<'_>, name: &str, kind: PassKind) -> FrameResult<PassHandle> {
        let previous = self.order.last().copied();
        let handle = self.register(ctx, name, kind, true)?;
        if let (Some(previous), Some(targets)) = (previous, self.targets.as_ref()) {
            if let Some(pass) = self.passes.get_mut(previous) {
                pass.set_final_pass(false);
                pass.recreate(ctx, targets, &self.fences)?;
            }
        }
        Ok(handle)
    }

    /// Register a pass that runs out of band
    pub fn add_task_pass(&mut self, ctx: &mut PassContext<'_>, name: &str, kind: PassKind) -> FrameResult<PassHandle> {
        self.register(ctx, name, kind, false)
    }

    pub fn post_shader_load_init(&mut self, ctx: &mut PassContext<'_>) -> FrameResult<()> {
        for &handle in self.order.iter().chain(self.tasks.iter()) {
            if let Some(pass) = self.passes.get_mut(handle) {
                pass.post_shader_load_init(ctx)?;
            }
        }
        self.post_shader = true;
        Ok(())
    }

    pub fn pass(&self, name: &str) -> FrameResult<&RenderPass> {
        self.names
            .get(name)
            .and_then(|&handle| self.passes.get(handle))
            .ok_or_else(|| FrameGraphError::UnknownPass(name.to_string()))
    }

    pub fn pass_mut(&mut self, name: &str) -> FrameResult<&mut RenderPass> {
        let handle = *self
            .names
            .get(name)
            .ok_or_else(|| FrameGraphError::UnknownPass(name.to_string()))?;
        self.passes
            .get_mut(handle)
            .ok_or_else(|| FrameGraphError::UnknownPass(name.to_string()))
    }

    /// A registered task pass; per-frame passes are not found here
    pub fn task_pass(&self, name: &str) -> FrameResult<&RenderPass> {
        self.pass(name)
            .ok()
            .filter(|pass| pass.is_task())
            .ok_or_else(|| FrameGraphError::UnknownPass(name.to_string()))
    }

    /// Per-frame pass names in submission order
    pub fn pass_names(&self) -> Vec<&str> {
        self.frame_passes().iter().map(|pass| pass.name()).collect()
    }

    pub fn pass_count(&self) -> usize {
        self.order.len()
    }

    fn frame_passes(&self) -> Vec<&RenderPass> {
        self.order.iter().filter_map(|&handle| self.passes.get(handle)).collect()
    }

    pub fn fence_at(&self, index: u32) -> Option<FenceHandle> {
        self.fences.get(index as usize).copied()
    }

    pub fn fence_count(&self) -> usize {
        self.fences.len()
    }

    pub fn targets(&self) -> Option<&FrameTargets> {
        self.targets.as_ref()
    }

    fn fence(&self, image_index: u32) -> FrameResult<FenceHandle> {
        self.fence_at(image_index).ok_or_else(|| {
            BackendError::UnknownHandle {
                kind: "frame fence",
                id: u64::from(image_index),
            }
            .into()
        })
    }

    /// Block until the previous submission for `image_index` retired.
    /// The fence stays signaled until [`render_passes`](Self::render_passes) resets it.
    pub fn wait_for_image(&self, device: &dyn GpuDevice, image_index: u32) -> FrameResult<()> {
        let fence = self.fence(image_index)?;
        device.wait_for_fences(&[fence], WAIT_FOREVER)?;
        Ok(())
    }

    /// Record every per-frame pass for `image_index`, in registration order
    pub fn setup_passes(&mut self, ctx: &mut PassContext<'_>, image_index: u32) -> FrameResult<()> {
        for &handle in &self.order {
            if let Some(pass) = self.passes.get_mut(handle) {
                pass.setup(ctx, image_index)?;
            }
        }
        Ok(())
    }

    pub fn submission_chain(
        &self,
        image_index: u32,
        wait: SemaphoreHandle,
        wait_stage: PipelineStage,
        signal: SemaphoreHandle,
    ) -> FrameResult<Vec<SubmitInfo>> {
        build_submission_chain(&self.frame_passes(), image_index, wait, wait_stage, signal)
    }

    /// Reset the fence of `image_index` and submit the chain in one call that
    /// signals it again. Without passes an empty batch still links `wait` to `signal`.
    pub fn render_passes(
        &mut self,
        device: &dyn GpuDevice,
        image_index: u32,
        wait: SemaphoreHandle,
        wait_stage: PipelineStage,
        signal: SemaphoreHandle,
    ) -> FrameResult<()> {
        let fence = self.fence(image_index)?;
        let mut submits = self.submission_chain(image_index, wait, wait_stage, signal)?;
        if submits.is_empty() {
            submits.push(SubmitInfo {
                wait_semaphores: vec![wait],
                wait_stages: vec![wait_stage],
                command_buffers: Vec::new(),
                signal_semaphores: vec![signal],
            });
        }
        log::trace!("Submitting {} passes for image {}", submits.len(), image_index);
        device.reset_fences(&[fence])?;
        device.queue_submit(&submits, Some(fence))?;

        for &handle in &self.order {
            if let Some(pass) = self.passes.get_mut(handle) {
                pass.mark_submitted();
            }
        }
        Ok(())
    }

    /// Rebuild the depth target, fences and per-frame passes for a new swapchain
    pub fn recreate_passes(&mut self, ctx: &mut PassContext<'_>, swapchain: &SwapchainTargets) -> FrameResult<()> {
        if !self.fences.is_empty() {
            ctx.device.wait_for_fences(&self.fences, WAIT_FOREVER)?;
        }
        self.destroy_frame_targets(ctx);
        self.create_frame_targets(ctx, swapchain)?;

        let targets = self.targets.as_ref().ok_or_else(|| FrameGraphError::InvalidPassState {
            pass: FRAME_PASS.to_string(),
            state: "recreating",
            operation: "recreate without frame targets",
        })?;
        for &handle in &self.order {
            if let Some(pass) = self.passes.get_mut(handle) {
                pass.recreate(ctx, targets, &self.fences)?;
            }
        }
        log::info!(
            "Render passes recreated for {}x{} with {} images",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.image_views.len()
        );
        Ok(())
    }

    fn task_handle(&self, name: &str) -> FrameResult<PassHandle> {
        self.names
            .get(name)
            .copied()
            .filter(|&handle| self.passes.get(handle).is_some_and(RenderPass::is_task))
            .ok_or_else(|| FrameGraphError::UnknownPass(name.to_string()))
    }

    /// Create a probe with its own bake resources. It is baked by the next
    /// [`execute_ibl_passes`](Self::execute_ibl_passes).
    pub fn add_ibl_probe(&mut self, ctx: &mut PassContext<'_>, position: Vec3) -> FrameResult<ProbeIndex> {
        let env_pass = self
            .passes
            .get(self.task_handle(PRENV_PASS)?)
            .ok_or_else(|| FrameGraphError::UnknownPass(PRENV_PASS.to_string()))?;
        let env = match env_pass.kind() {
            PassKind::EnvProbeBake(pass) => pass.create_probe_resources(env_pass.core(), ctx)?,
            _ => return Err(FrameGraphError::UnknownPass(PRENV_PASS.to_string())),
        };

        let brdf_pass = self
            .passes
            .get(self.task_handle(BRDF_PASS)?)
            .ok_or_else(|| FrameGraphError::UnknownPass(BRDF_PASS.to_string()))?;
        let brdf = match brdf_pass.kind() {
            PassKind::BrdfLutBake(pass) => pass.create_probe_resources(brdf_pass.core(), ctx)?,
            _ => return Err(FrameGraphError::UnknownPass(BRDF_PASS.to_string())),
        };

        let index = self.probes.len() as ProbeIndex;
        self.probes.push(IblProbe {
            position,
            env,
            brdf,
            baked: false,
        });
        Ok(index)
    }

    /// Whether both bake passes hold their materials and geometry
    fn bake_passes_loaded(&self, env_handle: PassHandle, brdf_handle: PassHandle) -> bool {
        let env = self.passes.get(env_handle).is_some_and(|pass| match pass.kind() {
            PassKind::EnvProbeBake(env) => env.is_loaded(),
            _ => false,
        });
        let brdf = self.passes.get(brdf_handle).is_some_and(|pass| match pass.kind() {
            PassKind::BrdfLutBake(brdf) => brdf.is_loaded(),
            _ => false,
        });
        env && brdf
    }

    /// Bake every probe not yet baked, in one submission guarded by a
    /// short-lived fence. Blocks until done. Returns the number of probes baked.
    ///
    /// With nothing pending it returns 0 without touching the device. Probes
    /// stay pending until the bake passes are post-shader-load initialised.
    /// Queued uploads are flushed first so the bake never reads unfilled buffers.
    pub fn execute_ibl_passes(&mut self, ctx: &mut PassContext<'_>) -> FrameResult<usize> {
        let pending: Vec<usize> = (0..self.probes.len()).filter(|&i| !self.probes[i].baked).collect();
        if pending.is_empty() {
            return Ok(0);
        }
        let env_handle = self.task_handle(PRENV_PASS)?;
        let brdf_handle = self.task_handle(BRDF_PASS)?;
        if !self.bake_passes_loaded(env_handle, brdf_handle) {
            log::debug!("{} IBL probes wait for shader load", pending.len());
            return Ok(0);
        }
        ctx.buffers.execute_operations()?;
        ctx.textures.execute_operations()?;

        if let Some(pass) = self.passes.get_mut(env_handle) {
            let (core, kind) = pass.parts_mut();
            if let PassKind::EnvProbeBake(env) = kind {
                for &i in &pending {
                    env.record_probe(core, ctx, &self.probes[i].env)?;
                }
            }
        }
        if let Some(pass) = self.passes.get_mut(brdf_handle) {
            let (core, kind) = pass.parts_mut();
            if let PassKind::BrdfLutBake(brdf) = kind {
                for &i in &pending {
                    brdf.record_probe(core, ctx, &self.probes[i].brdf)?;
                }
            }
        }

        let probes: Vec<&IblProbe> = pending.iter().map(|&i| &self.probes[i]).collect();
        let submits = probe_submissions(&probes);
        let fence = ctx.device.create_fence(false)?;
        let result = ctx
            .device
            .queue_submit(&submits, Some(fence))
            .and_then(|()| ctx.device.wait_for_fences(&[fence], WAIT_FOREVER));
        ctx.device.destroy_fence(fence);
        result?;

        for &i in &pending {
            self.probes[i].baked = true;
        }
        for handle in [env_handle, brdf_handle] {
            if let Some(pass) = self.passes.get_mut(handle) {
                pass.mark_submitted();
            }
        }
        log::info!("IBL passes executed for {} probes", pending.len());
        Ok(pending.len())
    }

    pub fn probe(&self, index: ProbeIndex) -> FrameResult<&IblProbe> {
        self.probes
            .get(index as usize)
            .ok_or(FrameGraphError::UnknownProbe(index))
    }

    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    /// Wait for all frames, then destroy probes, passes, the depth target and fences
    pub fn destroy(&mut self, ctx: &mut PassContext<'_>) -> FrameResult<()> {
        if !self.fences.is_empty() {
            ctx.device.wait_for_fences(&self.fences, WAIT_FOREVER)?;
        }

        let pool_of = |name: &str| {
            self.names
                .get(name)
                .and_then(|&handle| self.passes.get(handle))
                .and_then(|pass| pass.core().command_pool)
        };
        let env_pool = pool_of(PRENV_PASS);
        let brdf_pool = pool_of(BRDF_PASS);
        for probe in self.probes.drain(..) {
            probe.env.destroy(ctx, env_pool);
            probe.brdf.destroy(ctx, brdf_pool);
        }

        for handle in self.order.drain(..).chain(self.tasks.drain(..)).collect::<Vec<_>>() {
            if let Some(mut pass) = self.passes.remove(handle) {
                pass.destroy(ctx, &[])?;
            }
        }
        self.names.clear();
        self.destroy_frame_targets(ctx);
        self.destroy_fences(ctx.device);
        log::info!("RenderPassManager destroy");
        Ok(())
    }
}

impl Default for RenderPassManager {
    fn default() -> Self {
        Self::new()
    }
}
