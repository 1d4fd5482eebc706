//! Opaque scene pass
//!
//! Clears the swapchain image and depth target, then executes the world's
//! secondary command buffer for the image inside its own render pass.

use crate::backend::command::{CommandRecorder, SubpassContents};
use crate::backend::types::*;
use crate::error::FrameResult;
use crate::external::WorldTarget;
use crate::render_graph::pass::{color_final_layout, external_dependency, swapchain_attachments, FrameTargets, PassContext, PassCore};

#[derive(Debug, Default)]
pub struct FramePass {
    present: bool,
}

impl FramePass {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    fn render_pass_desc(&self, targets: &FrameTargets) -> RenderPassDesc {
        RenderPassDesc {
            label: None,
            color_attachments: vec![AttachmentDesc {
                format: targets.color_format,
                load_op: LoadOp::Clear,
                store_op: StoreOp::Store,
                initial_layout: ImageLayout::Undefined,
                final_layout: color_final_layout(self.present),
            }],
            depth_attachment: Some(AttachmentDesc {
                format: targets.depth_format,
                load_op: LoadOp::Clear,
                store_op: StoreOp::Store,
                initial_layout: ImageLayout::Undefined,
                final_layout: ImageLayout::DepthStencilAttachment,
            }),
            dependencies: vec![external_dependency(true)],
        }
        .with_label("frame pass")
    }

    pub(crate) fn init(&mut self, core: &mut PassCore, ctx: &mut PassContext<'_>, targets: &FrameTargets) -> FrameResult<()> {
        core.create_render_pass(ctx.device, &self.render_pass_desc(targets))?;
        core.create_framebuffers(ctx.device, swapchain_attachments(targets, true), targets.extent)?;
        core.create_command_buffers(ctx.device, targets.image_count())
    }

    pub(crate) fn setup(&mut self, core: &PassCore, ctx: &mut PassContext<'_>, image_index: u32) -> FrameResult<()> {
        let render_pass = core.render_pass()?;
        let framebuffer = core.framebuffer(image_index)?;
        ctx.world.record_world_command_buffers(
            ctx.device,
            &WorldTarget {
                render_pass,
                framebuffer,
                extent: core.extent,
                image_index,
            },
        )?;

        let clear_values = [
            ClearValue::Color(ctx.config.clear_color),
            ClearValue::DepthStencil { depth: 1.0, stencil: 0 },
        ];
        let mut recorder = CommandRecorder::new();
        recorder.begin_render_pass(
            render_pass,
            framebuffer,
            Rect2d::from_extent(core.extent),
            &clear_values,
            SubpassContents::SecondaryCommandBuffers,
        );
        if let Some(world) = ctx.world.world_command_buffer(image_index) {
            recorder.execute_commands(&[world]);
        }
        recorder.end_render_pass();
        core.record(ctx.device, image_index, &recorder)
    }
}
