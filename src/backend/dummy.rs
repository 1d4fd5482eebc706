//! Dummy GPU device for testing and development.
//!
//! This backend doesn't talk to a GPU. Buffer and image memory live in host
//! vectors and submitted command streams are executed on the CPU at submit
//! time: copies, blits and image copies move real bytes, barriers and render
//! pass attachments update per-subresource layouts. Mismatches (a barrier
//! whose old layout is wrong, a wait on a semaphore nobody signaled, a submit
//! of a buffer that was never recorded) are collected as validation errors.
//!
//! Fences either signal at submit time or stay pending until the test
//! completes them, which makes CPU/GPU backpressure observable.

use crate::backend::command::*;
use crate::backend::traits::*;
use crate::backend::types::*;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Counters over the lifetime of a [`DummyBackend`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStats {
    /// Number of `queue_submit` calls
    pub submit_calls: u64,
    /// Number of submit batches across all calls
    pub submitted_batches: u64,
    pub command_buffers_recorded: u64,
    pub descriptor_pools_created: u64,
    pub swapchains_created: u64,
    pub presents: u64,
}

struct DummyBuffer {
    desc: BufferDesc,
    data: Vec<u8>,
}

struct DummyImage {
    desc: ImageDesc,
    layouts: Vec<ImageLayout>,
    texels: HashMap<usize, Vec<u8>>,
}

impl DummyImage {
    fn new(desc: ImageDesc) -> Self {
        let count = desc.subresource_count() as usize;
        Self {
            desc,
            layouts: vec![ImageLayout::Undefined; count],
            texels: HashMap::new(),
        }
    }

    fn slot(&self, mip: u32, layer: u32) -> Option<usize> {
        if mip >= self.desc.mip_levels || layer >= self.desc.array_layers {
            return None;
        }
        Some((mip * self.desc.array_layers + layer) as usize)
    }

    fn mip_extent(&self, mip: u32) -> Extent3d {
        self.desc.extent.mip_level(mip)
    }

    fn level_size(&self, mip: u32) -> usize {
        self.mip_extent(mip).texel_count() as usize * self.desc.format.bytes_per_pixel() as usize
    }

    fn texels(&self, mip: u32, layer: u32) -> Vec<u8> {
        let size = self.level_size(mip);
        self.slot(mip, layer)
            .and_then(|slot| self.texels.get(&slot).cloned())
            .unwrap_or_else(|| vec![0; size])
    }

    fn store(&mut self, mip: u32, layer: u32, data: Vec<u8>) {
        if let Some(slot) = self.slot(mip, layer) {
            self.texels.insert(slot, data);
        }
    }
}

struct DummyCommandBuffer {
    pool: u64,
    level: CommandBufferLevel,
    commands: Vec<GpuCommand>,
    recorded: bool,
}

struct DummyDescriptorPool {
    max_sets: u32,
    sets: Vec<u64>,
}

struct DummySwapchain {
    extent: Extent2d,
    images: Vec<u64>,
    views: Vec<u64>,
    next_image: u32,
}

struct DummyState {
    next_id: u64,
    semaphores: HashSet<u64>,
    signaled_semaphores: HashSet<u64>,
    fences: HashMap<u64, bool>,
    pending_fences: VecDeque<u64>,
    auto_signal: bool,
    buffers: HashMap<u64, DummyBuffer>,
    images: HashMap<u64, DummyImage>,
    image_views: HashMap<u64, ImageViewDesc>,
    samplers: HashMap<u64, SamplerDesc>,
    render_passes: HashMap<u64, RenderPassDesc>,
    framebuffers: HashMap<u64, FramebufferDesc>,
    command_pools: HashMap<u64, Vec<u64>>,
    command_buffers: HashMap<u64, DummyCommandBuffer>,
    descriptor_layouts: HashMap<u64, Vec<DescriptorSetLayoutBinding>>,
    descriptor_pools: HashMap<u64, DummyDescriptorPool>,
    descriptor_sets: HashMap<u64, u64>,
    descriptor_writes: HashMap<(u64, u32), (u64, u64)>,
    swapchains: HashMap<u64, DummySwapchain>,
    surface_extent: Extent2d,
    surface_image_count: u32,
    out_of_date_acquires: u32,
    present_failures: u32,
    descriptor_failures: u32,
    active_pass: Option<(u64, u64)>,
    submissions: Vec<SubmitInfo>,
    stats: DummyStats,
    validation_errors: Vec<String>,
}

impl DummyState {
    fn id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn error(&mut self, message: String) {
        log::trace!("DummyBackend: validation error: {}", message);
        self.validation_errors.push(message);
    }

    fn transition(&mut self, image: ImageHandle, range: &ImageSubresourceRange, old: ImageLayout, new: ImageLayout) {
        let Some(img) = self.images.get_mut(&image.0) else {
            self.error(format!("barrier on unknown image {}", image.0));
            return;
        };
        let mut mismatches = Vec::new();
        for mip in range.base_mip_level..range.base_mip_level + range.level_count {
            for layer in range.base_array_layer..range.base_array_layer + range.layer_count {
                let Some(slot) = img.slot(mip, layer) else {
                    mismatches.push(format!("image {} has no subresource mip {} layer {}", image.0, mip, layer));
                    continue;
                };
                let current = img.layouts[slot];
                if old != ImageLayout::Undefined && current != old {
                    mismatches.push(format!(
                        "image {} mip {} layer {}: expected {:?}, found {:?}",
                        image.0, mip, layer, old, current
                    ));
                }
                img.layouts[slot] = new;
            }
        }
        for message in mismatches {
            self.error(message);
        }
    }

    fn expect_layout(&mut self, image: ImageHandle, sub: &ImageSubresourceLayers, expected: ImageLayout, op: &str) {
        let Some(img) = self.images.get(&image.0) else {
            self.error(format!("{} on unknown image {}", op, image.0));
            return;
        };
        let mut mismatches = Vec::new();
        for layer in sub.base_array_layer..sub.base_array_layer + sub.layer_count {
            match img.slot(sub.mip_level, layer) {
                Some(slot) if img.layouts[slot] == expected => {}
                Some(slot) => mismatches.push(format!(
                    "{}: image {} mip {} layer {} is {:?}, expected {:?}",
                    op, image.0, sub.mip_level, layer, img.layouts[slot], expected
                )),
                None => mismatches.push(format!("{}: image {} subresource out of range", op, image.0)),
            }
        }
        for message in mismatches {
            self.error(message);
        }
    }

    fn attachment_targets(&self, framebuffer: u64) -> Vec<(ImageHandle, ImageSubresourceRange)> {
        self.framebuffers
            .get(&framebuffer)
            .map(|fb| {
                fb.attachments
                    .iter()
                    .filter_map(|view| self.image_views.get(&view.0))
                    .map(|view| (view.image, view.range))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn pass_attachments(&self, render_pass: u64) -> Vec<AttachmentDesc> {
        self.render_passes
            .get(&render_pass)
            .map(|rp| {
                rp.color_attachments
                    .iter()
                    .copied()
                    .chain(rp.depth_attachment)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn begin_render_pass(&mut self, render_pass: RenderPassHandle, framebuffer: FramebufferHandle) {
        if self.active_pass.is_some() {
            self.error("render pass begun inside another render pass".into());
        }
        if !self.render_passes.contains_key(&render_pass.0) || !self.framebuffers.contains_key(&framebuffer.0) {
            self.error(format!(
                "begin render pass with unknown render pass {} or framebuffer {}",
                render_pass.0, framebuffer.0
            ));
            return;
        }
        let attachments = self.pass_attachments(render_pass.0);
        let targets = self.attachment_targets(framebuffer.0);
        for (desc, (image, range)) in attachments.iter().zip(targets.iter()) {
            if desc.initial_layout == ImageLayout::Undefined {
                continue;
            }
            let sub = ImageSubresourceLayers {
                aspect: range.aspect,
                mip_level: range.base_mip_level,
                base_array_layer: range.base_array_layer,
                layer_count: range.layer_count,
            };
            self.expect_layout(*image, &sub, desc.initial_layout, "render pass attachment");
        }
        self.active_pass = Some((render_pass.0, framebuffer.0));
    }

    fn end_render_pass(&mut self) {
        let Some((render_pass, framebuffer)) = self.active_pass.take() else {
            self.error("end render pass without an active render pass".into());
            return;
        };
        let attachments = self.pass_attachments(render_pass);
        let targets = self.attachment_targets(framebuffer);
        for (desc, (image, range)) in attachments.iter().zip(targets.iter()) {
            self.transition(*image, range, ImageLayout::Undefined, desc.final_layout);
        }
    }

    fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, regions: &[BufferCopy]) {
        for region in regions {
            let bytes = match self.buffers.get(&src.0) {
                Some(buffer) => {
                    let start = region.src_offset as usize;
                    let end = start + region.size as usize;
                    if end > buffer.data.len() {
                        self.error(format!("copy reads past the end of buffer {}", src.0));
                        continue;
                    }
                    buffer.data[start..end].to_vec()
                }
                None => {
                    self.error(format!("copy from unknown buffer {}", src.0));
                    continue;
                }
            };
            match self.buffers.get_mut(&dst.0) {
                Some(buffer) => {
                    let start = region.dst_offset as usize;
                    let end = start + bytes.len();
                    if end > buffer.data.len() {
                        self.error(format!("copy writes past the end of buffer {}", dst.0));
                        continue;
                    }
                    buffer.data[start..end].copy_from_slice(&bytes);
                }
                None => self.error(format!("copy into unknown buffer {}", dst.0)),
            }
        }
    }

    fn copy_buffer_to_image(&mut self, src: BufferHandle, dst: ImageHandle, dst_layout: ImageLayout, regions: &[BufferImageCopy]) {
        if dst_layout != ImageLayout::TransferDst {
            self.error(format!("buffer-to-image copy into image {} declared in {:?}", dst.0, dst_layout));
        }
        for region in regions {
            self.expect_layout(dst, &region.subresource, ImageLayout::TransferDst, "buffer-to-image copy");
            let Some(source) = self.buffers.get(&src.0).map(|b| b.data.clone()) else {
                self.error(format!("buffer-to-image copy from unknown buffer {}", src.0));
                continue;
            };
            let Some(image) = self.images.get_mut(&dst.0) else {
                continue;
            };
            let size = image.level_size(region.subresource.mip_level);
            for i in 0..region.subresource.layer_count {
                let start = region.buffer_offset as usize + i as usize * size;
                let end = start + size;
                if end > source.len() {
                    self.validation_errors
                        .push(format!("buffer-to-image copy reads past the end of buffer {}", src.0));
                    break;
                }
                image.store(
                    region.subresource.mip_level,
                    region.subresource.base_array_layer + i,
                    source[start..end].to_vec(),
                );
            }
        }
    }

    fn blit_image(&mut self, src: ImageHandle, dst: ImageHandle, regions: &[ImageBlit]) {
        for region in regions {
            self.expect_layout(src, &region.src_subresource, ImageLayout::TransferSrc, "blit source");
            self.expect_layout(dst, &region.dst_subresource, ImageLayout::TransferDst, "blit destination");
            let Some(source) = self.images.get(&src.0) else {
                continue;
            };
            let bpp = source.desc.format.bytes_per_pixel() as usize;
            let src_extent = source.mip_extent(region.src_subresource.mip_level);
            let layers: Vec<Vec<u8>> = (0..region.src_subresource.layer_count)
                .map(|i| source.texels(region.src_subresource.mip_level, region.src_subresource.base_array_layer + i))
                .collect();
            let Some(target) = self.images.get_mut(&dst.0) else {
                continue;
            };
            let dst_extent = target.mip_extent(region.dst_subresource.mip_level);
            let (sw, sh) = (region.src_extent.width.max(1), region.src_extent.height.max(1));
            let (dw, dh) = (region.dst_extent.width.min(dst_extent.width), region.dst_extent.height.min(dst_extent.height));
            for (i, texels) in layers.into_iter().enumerate() {
                let layer = region.dst_subresource.base_array_layer + i as u32;
                let mut out = target.texels(region.dst_subresource.mip_level, layer);
                for y in 0..dh {
                    let sy = ((y * sh) / dh.max(1)).min(src_extent.height - 1);
                    for x in 0..dw {
                        let sx = ((x * sw) / dw.max(1)).min(src_extent.width - 1);
                        let from = (sy * src_extent.width + sx) as usize * bpp;
                        let to = (y * dst_extent.width + x) as usize * bpp;
                        if from + bpp <= texels.len() && to + bpp <= out.len() {
                            out[to..to + bpp].copy_from_slice(&texels[from..from + bpp]);
                        }
                    }
                }
                target.store(region.dst_subresource.mip_level, layer, out);
            }
        }
    }

    fn copy_image(&mut self, src: ImageHandle, dst: ImageHandle, regions: &[ImageCopy]) {
        for region in regions {
            self.expect_layout(src, &region.src_subresource, ImageLayout::TransferSrc, "image copy source");
            self.expect_layout(dst, &region.dst_subresource, ImageLayout::TransferDst, "image copy destination");
            let Some(source) = self.images.get(&src.0) else {
                continue;
            };
            let bpp = source.desc.format.bytes_per_pixel() as usize;
            let src_extent = source.mip_extent(region.src_subresource.mip_level);
            let layers: Vec<Vec<u8>> = (0..region.src_subresource.layer_count)
                .map(|i| source.texels(region.src_subresource.mip_level, region.src_subresource.base_array_layer + i))
                .collect();
            let Some(target) = self.images.get_mut(&dst.0) else {
                continue;
            };
            let dst_extent = target.mip_extent(region.dst_subresource.mip_level);
            let width = region.extent.width.min(src_extent.width).min(dst_extent.width) as usize;
            let height = region.extent.height.min(src_extent.height).min(dst_extent.height);
            for (i, texels) in layers.into_iter().enumerate() {
                let layer = region.dst_subresource.base_array_layer + i as u32;
                let mut out = target.texels(region.dst_subresource.mip_level, layer);
                for y in 0..height {
                    let from = (y * src_extent.width) as usize * bpp;
                    let to = (y * dst_extent.width) as usize * bpp;
                    out[to..to + width * bpp].copy_from_slice(&texels[from..from + width * bpp]);
                }
                target.store(region.dst_subresource.mip_level, layer, out);
            }
        }
    }

    fn execute(&mut self, commands: &[GpuCommand]) {
        for command in commands {
            match command {
                GpuCommand::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    ..
                } => self.begin_render_pass(*render_pass, *framebuffer),
                GpuCommand::EndRenderPass => self.end_render_pass(),
                GpuCommand::ExecuteCommands(buffers) => {
                    for buffer in buffers {
                        let nested = match self.command_buffers.get(&buffer.0) {
                            Some(cb) if cb.recorded && cb.level == CommandBufferLevel::Secondary => {
                                Some(cb.commands.clone())
                            }
                            _ => None,
                        };
                        match nested {
                            Some(nested) => self.execute(&nested),
                            None => self.error(format!(
                                "executed command buffer {} is not a recorded secondary buffer",
                                buffer.0
                            )),
                        }
                    }
                }
                GpuCommand::PipelineBarrier { image_barriers, .. } => {
                    for barrier in image_barriers {
                        self.transition(barrier.image, &barrier.range, barrier.old_layout, barrier.new_layout);
                    }
                }
                GpuCommand::CopyBuffer { src, dst, regions } => self.copy_buffer(*src, *dst, regions),
                GpuCommand::CopyBufferToImage {
                    src,
                    dst,
                    dst_layout,
                    regions,
                } => self.copy_buffer_to_image(*src, *dst, *dst_layout, regions),
                GpuCommand::BlitImage { src, dst, regions, .. } => self.blit_image(*src, *dst, regions),
                GpuCommand::CopyImage { src, dst, regions, .. } => self.copy_image(*src, *dst, regions),
                _ => {}
            }
        }
    }
}

/// In-memory simulated device
pub struct DummyBackend {
    state: Mutex<DummyState>,
    fence_signaled: Condvar,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    /// Create a dummy device with a 1280x720 surface and three swapchain images
    pub fn new() -> Self {
        Self::with_surface(Extent2d::new(1280, 720), 3)
    }

    /// Create a dummy device with the given surface extent and swapchain image count
    pub fn with_surface(extent: Extent2d, image_count: u32) -> Self {
        Self {
            state: Mutex::new(DummyState {
                next_id: 1,
                semaphores: HashSet::new(),
                signaled_semaphores: HashSet::new(),
                fences: HashMap::new(),
                pending_fences: VecDeque::new(),
                auto_signal: true,
                buffers: HashMap::new(),
                images: HashMap::new(),
                image_views: HashMap::new(),
                samplers: HashMap::new(),
                render_passes: HashMap::new(),
                framebuffers: HashMap::new(),
                command_pools: HashMap::new(),
                command_buffers: HashMap::new(),
                descriptor_layouts: HashMap::new(),
                descriptor_pools: HashMap::new(),
                descriptor_sets: HashMap::new(),
                descriptor_writes: HashMap::new(),
                swapchains: HashMap::new(),
                surface_extent: extent,
                surface_image_count: image_count.max(1),
                out_of_date_acquires: 0,
                present_failures: 0,
                descriptor_failures: 0,
                active_pass: None,
                submissions: Vec::new(),
                stats: DummyStats::default(),
                validation_errors: Vec::new(),
            }),
            fence_signaled: Condvar::new(),
        }
    }

    /// Change the surface. Existing swapchains with a different extent report out-of-date.
    pub fn set_surface(&self, extent: Extent2d, image_count: u32) {
        let mut state = self.state.lock();
        state.surface_extent = extent;
        state.surface_image_count = image_count.max(1);
    }

    /// Fail the next `count` acquires with [`BackendError::OutOfDate`]
    pub fn inject_out_of_date(&self, count: u32) {
        self.state.lock().out_of_date_acquires += count;
    }

    /// Fail the next `count` presents with [`BackendError::PresentFailed`]
    pub fn inject_present_failures(&self, count: u32) {
        self.state.lock().present_failures += count;
    }

    /// Fail the next `count` descriptor set allocations as if their pool were full
    pub fn inject_descriptor_pool_exhaustion(&self, count: u32) {
        self.state.lock().descriptor_failures += count;
    }

    /// When disabled, submitted fences stay pending until completed explicitly
    pub fn set_auto_signal(&self, enabled: bool) {
        self.state.lock().auto_signal = enabled;
    }

    /// Retire the oldest pending submission. Returns false when nothing is pending.
    pub fn complete_next_submission(&self) -> bool {
        let mut state = self.state.lock();
        let Some(fence) = state.pending_fences.pop_front() else {
            return false;
        };
        if let Some(signaled) = state.fences.get_mut(&fence) {
            *signaled = true;
        }
        log::trace!("DummyBackend: completed submission signaling fence {}", fence);
        self.fence_signaled.notify_all();
        true
    }

    /// Retire every pending submission, returning how many there were
    pub fn complete_all_submissions(&self) -> usize {
        let mut count = 0;
        while self.complete_next_submission() {
            count += 1;
        }
        count
    }

    pub fn pending_submission_count(&self) -> usize {
        self.state.lock().pending_fences.len()
    }

    pub fn stats(&self) -> DummyStats {
        self.state.lock().stats
    }

    /// Number of `queue_submit` calls so far
    pub fn submission_count(&self) -> u64 {
        self.state.lock().stats.submit_calls
    }

    /// Every batch submitted so far, in order
    pub fn submitted_batches(&self) -> Vec<SubmitInfo> {
        self.state.lock().submissions.clone()
    }

    pub fn validation_errors(&self) -> Vec<String> {
        self.state.lock().validation_errors.clone()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn live_image_count(&self) -> usize {
        self.state.lock().images.len()
    }

    pub fn live_framebuffer_count(&self) -> usize {
        self.state.lock().framebuffers.len()
    }

    pub fn live_semaphore_count(&self) -> usize {
        self.state.lock().semaphores.len()
    }

    pub fn live_fence_count(&self) -> usize {
        self.state.lock().fences.len()
    }

    pub fn live_descriptor_pool_count(&self) -> usize {
        self.state.lock().descriptor_pools.len()
    }

    pub fn buffer_exists(&self, buffer: BufferHandle) -> bool {
        self.state.lock().buffers.contains_key(&buffer.0)
    }

    /// Contents of any buffer, host visible or not
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&buffer.0).map(|b| b.data.clone())
    }

    pub fn image_desc(&self, image: ImageHandle) -> Option<ImageDesc> {
        self.state.lock().images.get(&image.0).map(|i| i.desc.clone())
    }

    /// Current layout of every subresource, mip-major
    pub fn image_layouts(&self, image: ImageHandle) -> Vec<ImageLayout> {
        self.state
            .lock()
            .images
            .get(&image.0)
            .map(|i| i.layouts.clone())
            .unwrap_or_default()
    }

    pub fn image_texels(&self, image: ImageHandle, mip: u32, layer: u32) -> Vec<u8> {
        self.state
            .lock()
            .images
            .get(&image.0)
            .map(|i| i.texels(mip, layer))
            .unwrap_or_default()
    }

    pub fn view_image(&self, view: ImageViewHandle) -> Option<ImageHandle> {
        self.state.lock().image_views.get(&view.0).map(|v| v.image)
    }

    pub fn framebuffer_desc(&self, framebuffer: FramebufferHandle) -> Option<FramebufferDesc> {
        self.state.lock().framebuffers.get(&framebuffer.0).cloned()
    }

    pub fn render_pass_desc(&self, render_pass: RenderPassHandle) -> Option<RenderPassDesc> {
        self.state.lock().render_passes.get(&render_pass.0).cloned()
    }

    pub fn recorded_commands(&self, buffer: CommandBufferHandle) -> Option<Vec<GpuCommand>> {
        self.state
            .lock()
            .command_buffers
            .get(&buffer.0)
            .filter(|cb| cb.recorded)
            .map(|cb| cb.commands.clone())
    }

    /// Image view and sampler last written to a descriptor binding
    pub fn descriptor_write(&self, set: DescriptorSetHandle, binding: u32) -> Option<(ImageViewHandle, SamplerHandle)> {
        self.state
            .lock()
            .descriptor_writes
            .get(&(set.0, binding))
            .map(|&(view, sampler)| (ImageViewHandle(view), SamplerHandle(sampler)))
    }
}

impl GpuDevice for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn wait_idle(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        while !state.pending_fences.is_empty() {
            self.fence_signaled.wait(&mut state);
        }
        log::trace!("DummyBackend: device idle");
        Ok(())
    }

    fn create_semaphore(&self) -> BackendResult<SemaphoreHandle> {
        let mut state = self.state.lock();
        let id = state.id();
        state.semaphores.insert(id);
        log::trace!("DummyBackend: creating semaphore {}", id);
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        let mut state = self.state.lock();
        state.semaphores.remove(&semaphore.0);
        state.signaled_semaphores.remove(&semaphore.0);
    }

    fn create_fence(&self, signaled: bool) -> BackendResult<FenceHandle> {
        let mut state = self.state.lock();
        let id = state.id();
        state.fences.insert(id, signaled);
        log::trace!("DummyBackend: creating fence {} (signaled: {})", id, signaled);
        Ok(FenceHandle(id))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let mut state = self.state.lock();
        if state.pending_fences.contains(&fence.0) {
            state.error(format!("fence {} destroyed while its submission is pending", fence.0));
            state.pending_fences.retain(|&f| f != fence.0);
        }
        state.fences.remove(&fence.0);
    }

    fn wait_for_fences(&self, fences: &[FenceHandle], timeout_ns: u64) -> BackendResult<()> {
        let deadline = (timeout_ns != WAIT_FOREVER).then(|| Instant::now() + Duration::from_nanos(timeout_ns));
        let mut state = self.state.lock();
        loop {
            let mut all_signaled = true;
            for fence in fences {
                match state.fences.get(&fence.0) {
                    Some(true) => {}
                    Some(false) => all_signaled = false,
                    None => {
                        return Err(BackendError::UnknownHandle {
                            kind: "fence",
                            id: fence.0,
                        })
                    }
                }
            }
            if all_signaled {
                return Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if self.fence_signaled.wait_until(&mut state, deadline).timed_out() {
                        return Err(BackendError::Timeout);
                    }
                }
                None => self.fence_signaled.wait(&mut state),
            }
        }
    }

    fn reset_fences(&self, fences: &[FenceHandle]) -> BackendResult<()> {
        let mut state = self.state.lock();
        for fence in fences {
            match state.fences.get_mut(&fence.0) {
                Some(signaled) => *signaled = false,
                None => {
                    return Err(BackendError::UnknownHandle {
                        kind: "fence",
                        id: fence.0,
                    })
                }
            }
        }
        Ok(())
    }

    fn is_fence_signaled(&self, fence: FenceHandle) -> BackendResult<bool> {
        self.state
            .lock()
            .fences
            .get(&fence.0)
            .copied()
            .ok_or(BackendError::UnknownHandle {
                kind: "fence",
                id: fence.0,
            })
    }

    fn create_buffer(&self, desc: &BufferDesc) -> BackendResult<BufferHandle> {
        let mut state = self.state.lock();
        let id = state.id();
        log::trace!(
            "DummyBackend: creating buffer {} {:?} (size: {})",
            id,
            desc.label,
            desc.size
        );
        state.buffers.insert(
            id,
            DummyBuffer {
                desc: desc.clone(),
                data: vec![0; desc.size as usize],
            },
        );
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.state.lock().buffers.remove(&buffer.0);
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let mut state = self.state.lock();
        let target = state.buffers.get_mut(&buffer.0).ok_or(BackendError::UnknownHandle {
            kind: "buffer",
            id: buffer.0,
        })?;
        if !target.desc.location.is_host_visible() {
            return Err(BackendError::NotHostVisible(buffer.0));
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > target.data.len() {
            return Err(BackendError::OutOfMemory);
        }
        target.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>> {
        let state = self.state.lock();
        let source = state.buffers.get(&buffer.0).ok_or(BackendError::UnknownHandle {
            kind: "buffer",
            id: buffer.0,
        })?;
        if !source.desc.location.is_host_visible() {
            return Err(BackendError::NotHostVisible(buffer.0));
        }
        let start = (offset as usize).min(source.data.len());
        let end = (start + size as usize).min(source.data.len());
        Ok(source.data[start..end].to_vec())
    }

    fn create_image(&self, desc: &ImageDesc) -> BackendResult<ImageHandle> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(BackendError::ImageCreationFailed("zero-sized image".into()));
        }
        let mut state = self.state.lock();
        let id = state.id();
        log::trace!(
            "DummyBackend: creating image {} {:?} ({}x{}x{}, {} mips, {} layers)",
            id,
            desc.label,
            desc.extent.width,
            desc.extent.height,
            desc.extent.depth,
            desc.mip_levels,
            desc.array_layers
        );
        state.images.insert(id, DummyImage::new(desc.clone()));
        Ok(ImageHandle(id))
    }

    fn destroy_image(&self, image: ImageHandle) {
        self.state.lock().images.remove(&image.0);
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> BackendResult<ImageViewHandle> {
        let mut state = self.state.lock();
        if !state.images.contains_key(&desc.image.0) {
            return Err(BackendError::UnknownHandle {
                kind: "image",
                id: desc.image.0,
            });
        }
        let id = state.id();
        state.image_views.insert(id, desc.clone());
        Ok(ImageViewHandle(id))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        self.state.lock().image_views.remove(&view.0);
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> BackendResult<SamplerHandle> {
        let mut state = self.state.lock();
        let id = state.id();
        log::trace!("DummyBackend: creating sampler {} {:?}", id, desc.label);
        state.samplers.insert(id, desc.clone());
        Ok(SamplerHandle(id))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.state.lock().samplers.remove(&sampler.0);
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> BackendResult<RenderPassHandle> {
        let mut state = self.state.lock();
        let id = state.id();
        log::trace!("DummyBackend: creating render pass {} {:?}", id, desc.label);
        state.render_passes.insert(id, desc.clone());
        Ok(RenderPassHandle(id))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        self.state.lock().render_passes.remove(&render_pass.0);
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> BackendResult<FramebufferHandle> {
        let mut state = self.state.lock();
        let expected = state
            .render_passes
            .get(&desc.render_pass.0)
            .map(|rp| rp.attachment_count())
            .ok_or(BackendError::UnknownHandle {
                kind: "render pass",
                id: desc.render_pass.0,
            })?;
        if expected != desc.attachments.len() {
            return Err(BackendError::FramebufferCreationFailed(format!(
                "render pass expects {} attachments, got {}",
                expected,
                desc.attachments.len()
            )));
        }
        if let Some(view) = desc.attachments.iter().find(|v| !state.image_views.contains_key(&v.0)) {
            return Err(BackendError::UnknownHandle {
                kind: "image view",
                id: view.0,
            });
        }
        let id = state.id();
        state.framebuffers.insert(id, desc.clone());
        Ok(FramebufferHandle(id))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        self.state.lock().framebuffers.remove(&framebuffer.0);
    }

    fn create_command_pool(&self, flags: CommandPoolFlags) -> BackendResult<CommandPoolHandle> {
        let mut state = self.state.lock();
        let id = state.id();
        log::trace!("DummyBackend: creating command pool {} ({:?})", id, flags);
        state.command_pools.insert(id, Vec::new());
        Ok(CommandPoolHandle(id))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        let mut state = self.state.lock();
        if let Some(buffers) = state.command_pools.remove(&pool.0) {
            for buffer in buffers {
                state.command_buffers.remove(&buffer);
            }
        }
    }

    fn allocate_command_buffers(
        &self,
        pool: CommandPoolHandle,
        level: CommandBufferLevel,
        count: u32,
    ) -> BackendResult<Vec<CommandBufferHandle>> {
        let mut state = self.state.lock();
        if !state.command_pools.contains_key(&pool.0) {
            return Err(BackendError::UnknownHandle {
                kind: "command pool",
                id: pool.0,
            });
        }
        let mut handles = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = state.id();
            state.command_buffers.insert(
                id,
                DummyCommandBuffer {
                    pool: pool.0,
                    level,
                    commands: Vec::new(),
                    recorded: false,
                },
            );
            if let Some(buffers) = state.command_pools.get_mut(&pool.0) {
                buffers.push(id);
            }
            handles.push(CommandBufferHandle(id));
        }
        Ok(handles)
    }

    fn free_command_buffers(&self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]) {
        let mut state = self.state.lock();
        for buffer in buffers {
            if state.command_buffers.get(&buffer.0).map(|cb| cb.pool) == Some(pool.0) {
                state.command_buffers.remove(&buffer.0);
            }
        }
        if let Some(owned) = state.command_pools.get_mut(&pool.0) {
            owned.retain(|id| !buffers.iter().any(|b| b.0 == *id));
        }
    }

    fn record_command_buffer(
        &self,
        buffer: CommandBufferHandle,
        begin: &CommandBufferBeginInfo,
        commands: &[GpuCommand],
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        let target = state
            .command_buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::UnknownHandle {
                kind: "command buffer",
                id: buffer.0,
            })?;
        let missing_inheritance = target.level == CommandBufferLevel::Secondary && begin.inheritance.is_none();
        target.commands = commands.to_vec();
        target.recorded = true;
        state.stats.command_buffers_recorded += 1;
        if missing_inheritance {
            state.error(format!("secondary command buffer {} recorded without inheritance", buffer.0));
        }
        log::trace!(
            "DummyBackend: recorded command buffer {} ({} commands)",
            buffer.0,
            commands.len()
        );
        Ok(())
    }

    fn queue_submit(&self, submits: &[SubmitInfo], fence: Option<FenceHandle>) -> BackendResult<()> {
        let mut state = self.state.lock();
        if let Some(fence) = fence {
            match state.fences.get(&fence.0).copied() {
                Some(true) => state.error(format!("submit with already signaled fence {}", fence.0)),
                Some(false) => {}
                None => {
                    return Err(BackendError::UnknownHandle {
                        kind: "fence",
                        id: fence.0,
                    })
                }
            }
        }

        state.stats.submit_calls += 1;
        for submit in submits {
            state.stats.submitted_batches += 1;
            if submit.wait_semaphores.len() != submit.wait_stages.len() {
                state.error("wait semaphore and wait stage counts differ".into());
            }
            for semaphore in &submit.wait_semaphores {
                if !state.signaled_semaphores.remove(&semaphore.0) {
                    state.error(format!("submit waits on unsignaled semaphore {}", semaphore.0));
                }
            }
            for buffer in &submit.command_buffers {
                let commands = match state.command_buffers.get(&buffer.0) {
                    Some(cb) if cb.recorded && cb.level == CommandBufferLevel::Primary => Some(cb.commands.clone()),
                    _ => None,
                };
                match commands {
                    Some(commands) => state.execute(&commands),
                    None => state.error(format!(
                        "submitted command buffer {} is not a recorded primary buffer",
                        buffer.0
                    )),
                }
            }
            for semaphore in &submit.signal_semaphores {
                if !state.signaled_semaphores.insert(semaphore.0) {
                    state.error(format!("semaphore {} signaled twice without a wait", semaphore.0));
                }
            }
            state.submissions.push(submit.clone());
        }

        if let Some(fence) = fence {
            if state.auto_signal {
                state.fences.insert(fence.0, true);
                self.fence_signaled.notify_all();
            } else {
                state.pending_fences.push_back(fence.0);
            }
        }
        log::trace!(
            "DummyBackend: submitted {} batches (fence: {:?})",
            submits.len(),
            fence.map(|f| f.0)
        );
        Ok(())
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let mut state = self.state.lock();
        let id = state.id();
        state.descriptor_layouts.insert(id, bindings.to_vec());
        Ok(DescriptorSetLayoutHandle(id))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        self.state.lock().descriptor_layouts.remove(&layout.0);
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[DescriptorPoolSize],
    ) -> BackendResult<DescriptorPoolHandle> {
        let mut state = self.state.lock();
        let id = state.id();
        log::trace!(
            "DummyBackend: creating descriptor pool {} ({} sets, {} sizes)",
            id,
            max_sets,
            sizes.len()
        );
        state.descriptor_pools.insert(
            id,
            DummyDescriptorPool {
                max_sets,
                sets: Vec::new(),
            },
        );
        state.stats.descriptor_pools_created += 1;
        Ok(DescriptorPoolHandle(id))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        let mut state = self.state.lock();
        if let Some(removed) = state.descriptor_pools.remove(&pool.0) {
            for set in removed.sets {
                state.descriptor_sets.remove(&set);
            }
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        let mut state = self.state.lock();
        if !state.descriptor_layouts.contains_key(&layout.0) {
            return Err(BackendError::UnknownHandle {
                kind: "descriptor set layout",
                id: layout.0,
            });
        }
        if state.descriptor_failures > 0 {
            state.descriptor_failures -= 1;
            return Err(BackendError::OutOfPoolMemory);
        }
        let id = state.next_id;
        let target = state
            .descriptor_pools
            .get_mut(&pool.0)
            .ok_or(BackendError::UnknownHandle {
                kind: "descriptor pool",
                id: pool.0,
            })?;
        if target.sets.len() as u32 >= target.max_sets {
            return Err(BackendError::OutOfPoolMemory);
        }
        target.sets.push(id);
        state.next_id += 1;
        state.descriptor_sets.insert(id, pool.0);
        Ok(DescriptorSetHandle(id))
    }

    fn write_image_descriptor(
        &self,
        set: DescriptorSetHandle,
        binding: u32,
        view: ImageViewHandle,
        sampler: SamplerHandle,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        if !state.descriptor_sets.contains_key(&set.0) {
            return Err(BackendError::UnknownHandle {
                kind: "descriptor set",
                id: set.0,
            });
        }
        state.descriptor_writes.insert((set.0, binding), (view.0, sampler.0));
        Ok(())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> BackendResult<SwapchainInfo> {
        let mut state = self.state.lock();
        let extent = state.surface_extent;
        let count = state.surface_image_count;
        let mut images = Vec::with_capacity(count as usize);
        let mut views = Vec::with_capacity(count as usize);
        for i in 0..count {
            let image_id = state.id();
            let image_desc = ImageDesc::new_2d(
                extent.width,
                extent.height,
                desc.preferred_format,
                ImageUsage::COLOR_ATTACHMENT,
            )
            .with_label(format!("swapchain image {}", i));
            state.images.insert(image_id, DummyImage::new(image_desc));
            let view_id = state.id();
            state.image_views.insert(
                view_id,
                ImageViewDesc::new_2d(ImageHandle(image_id), desc.preferred_format, ImageAspect::COLOR, 1),
            );
            images.push(image_id);
            views.push(view_id);
        }
        let id = state.id();
        state.swapchains.insert(
            id,
            DummySwapchain {
                extent,
                images,
                views: views.clone(),
                next_image: 0,
            },
        );
        state.stats.swapchains_created += 1;
        log::trace!(
            "DummyBackend: creating swapchain {} ({}x{}, {} images)",
            id,
            extent.width,
            extent.height,
            count
        );
        Ok(SwapchainInfo {
            handle: SwapchainHandle(id),
            format: desc.preferred_format,
            extent,
            image_views: views.into_iter().map(ImageViewHandle).collect(),
        })
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        let mut state = self.state.lock();
        if let Some(removed) = state.swapchains.remove(&swapchain.0) {
            for view in removed.views {
                state.image_views.remove(&view);
            }
            for image in removed.images {
                state.images.remove(&image);
            }
        }
    }

    fn acquire_next_image(&self, swapchain: SwapchainHandle, signal: SemaphoreHandle) -> BackendResult<u32> {
        let mut state = self.state.lock();
        if state.out_of_date_acquires > 0 {
            state.out_of_date_acquires -= 1;
            log::trace!("DummyBackend: acquire reports out of date");
            return Err(BackendError::OutOfDate);
        }
        let surface_extent = state.surface_extent;
        let target = state
            .swapchains
            .get_mut(&swapchain.0)
            .ok_or(BackendError::UnknownHandle {
                kind: "swapchain",
                id: swapchain.0,
            })?;
        if target.extent != surface_extent {
            return Err(BackendError::OutOfDate);
        }
        let index = target.next_image;
        target.next_image = (index + 1) % target.images.len() as u32;
        if !state.signaled_semaphores.insert(signal.0) {
            state.error(format!("acquire signals already signaled semaphore {}", signal.0));
        }
        Ok(index)
    }

    fn queue_present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        if !state.signaled_semaphores.remove(&wait.0) {
            state.error(format!("present waits on unsignaled semaphore {}", wait.0));
        }
        if state.present_failures > 0 {
            state.present_failures -= 1;
            return Err(BackendError::PresentFailed("injected failure".into()));
        }
        let surface_extent = state.surface_extent;
        let (image, extent) = {
            let target = state
                .swapchains
                .get(&swapchain.0)
                .ok_or(BackendError::UnknownHandle {
                    kind: "swapchain",
                    id: swapchain.0,
                })?;
            let image = target.images.get(image_index as usize).copied();
            (image, target.extent)
        };
        let Some(image) = image else {
            return Err(BackendError::PresentFailed(format!("image index {} out of range", image_index)));
        };
        state.expect_layout(
            ImageHandle(image),
            &ImageSubresourceLayers::color(0, 0, 1),
            ImageLayout::PresentSrc,
            "present",
        );
        state.stats.presents += 1;
        if extent != surface_extent {
            return Err(BackendError::OutOfDate);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fence_wait_timeout() {
        let backend = DummyBackend::new();
        let fence = backend.create_fence(false).unwrap();
        let result = backend.wait_for_fences(&[fence], 1_000_000);
        assert!(matches!(result, Err(BackendError::Timeout)));
    }

    #[test]
    fn test_deferred_fence_completion() {
        let backend = Arc::new(DummyBackend::new());
        backend.set_auto_signal(false);
        let fence = backend.create_fence(false).unwrap();
        backend.queue_submit(&[], Some(fence)).unwrap();
        assert!(!backend.is_fence_signaled(fence).unwrap());

        let worker = {
            let backend = Arc::clone(&backend);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                backend.complete_next_submission()
            })
        };
        backend.wait_for_fences(&[fence], WAIT_FOREVER).unwrap();
        assert!(worker.join().unwrap());
        assert!(backend.is_fence_signaled(fence).unwrap());
    }

    #[test]
    fn test_descriptor_pool_capacity() {
        let backend = DummyBackend::new();
        let layout = backend.create_descriptor_set_layout(&[]).unwrap();
        let pool = backend.create_descriptor_pool(2, &[]).unwrap();
        backend.allocate_descriptor_set(pool, layout).unwrap();
        backend.allocate_descriptor_set(pool, layout).unwrap();
        assert!(matches!(
            backend.allocate_descriptor_set(pool, layout),
            Err(BackendError::OutOfPoolMemory)
        ));
    }

    #[test]
    fn test_buffer_copy_executes_on_submit() {
        let backend = DummyBackend::new();
        let src = backend
            .create_buffer(&BufferDesc::new(4, BufferUsage::COPY_SRC, MemoryLocation::CpuToGpu))
            .unwrap();
        let dst = backend
            .create_buffer(&BufferDesc::new(4, BufferUsage::COPY_DST, MemoryLocation::GpuOnly))
            .unwrap();
        backend.write_buffer(src, 0, &[1, 2, 3, 4]).unwrap();
        assert!(matches!(
            backend.write_buffer(dst, 0, &[0]),
            Err(BackendError::NotHostVisible(_))
        ));

        let pool = backend.create_command_pool(CommandPoolFlags::TRANSIENT).unwrap();
        let cmd = backend
            .allocate_command_buffers(pool, CommandBufferLevel::Primary, 1)
            .unwrap()[0];
        let mut recorder = CommandRecorder::new();
        recorder.copy_buffer(src, dst, 4);
        backend
            .record_command_buffer(cmd, &CommandBufferBeginInfo::one_time(), recorder.commands())
            .unwrap();
        backend
            .queue_submit(
                &[SubmitInfo {
                    command_buffers: vec![cmd],
                    ..Default::default()
                }],
                None,
            )
            .unwrap();

        assert_eq!(backend.buffer_contents(dst).unwrap(), vec![1, 2, 3, 4]);
        assert!(backend.validation_errors().is_empty());
    }

    #[test]
    fn test_unsignaled_semaphore_wait_is_reported() {
        let backend = DummyBackend::new();
        let semaphore = backend.create_semaphore().unwrap();
        backend
            .queue_submit(
                &[SubmitInfo {
                    wait_semaphores: vec![semaphore],
                    wait_stages: vec![PipelineStage::TRANSFER],
                    ..Default::default()
                }],
                None,
            )
            .unwrap();
        assert_eq!(backend.validation_errors().len(), 1);
    }
}
