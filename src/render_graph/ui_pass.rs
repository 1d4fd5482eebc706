//! UI overlay pass, drawn over the finished frame

use crate::backend::command::{CommandRecorder, SubpassContents};
use crate::backend::types::*;
use crate::error::FrameResult;
use crate::render_graph::pass::{color_final_layout, external_dependency, swapchain_attachments, FrameTargets, PassContext, PassCore};

#[derive(Debug)]
pub struct UiPass {
    present: bool,
}

impl UiPass {
    pub fn new() -> Self {
        Self { present: true }
    }

    pub(crate) fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    pub(crate) fn init(&mut self, core: &mut PassCore, ctx: &mut PassContext<'_>, targets: &FrameTargets) -> FrameResult<()> {
        let desc = RenderPassDesc {
            label: None,
            color_attachments: vec![AttachmentDesc {
                format: targets.color_format,
                load_op: LoadOp::Load,
                store_op: StoreOp::Store,
                initial_layout: ImageLayout::ColorAttachment,
                final_layout: color_final_layout(self.present),
            }],
            depth_attachment: None,
            dependencies: vec![external_dependency(false)],
        }
        .with_label("ui pass");
        core.create_render_pass(ctx.device, &desc)?;
        core.create_framebuffers(ctx.device, swapchain_attachments(targets, false), targets.extent)?;
        core.create_command_buffers(ctx.device, targets.image_count())
    }

    pub(crate) fn setup(&mut self, core: &PassCore, ctx: &mut PassContext<'_>, image_index: u32) -> FrameResult<()> {
        let mut recorder = CommandRecorder::new();
        recorder
            .begin_render_pass(
                core.render_pass()?,
                core.framebuffer(image_index)?,
                Rect2d::from_extent(core.extent),
                &[],
                SubpassContents::Inline,
            )
            .set_viewport(Viewport::from_extent(core.extent))
            .set_scissor(Rect2d::from_extent(core.extent));
        ctx.ui.draw(&mut recorder, core.extent)?;
        recorder.end_render_pass();
        core.record(ctx.device, image_index, &recorder)
    }
}

impl Default for UiPass {
    fn default() -> Self {
        Self::new()
    }
}
