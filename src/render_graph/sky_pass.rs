//! Skybox pass
//!
//! Draws the environment behind the opaque scene, testing against the depth
//! the frame pass left behind.

use crate::backend::command::{CommandRecorder, SubpassContents};
use crate::backend::types::*;
use crate::error::FrameResult;
use crate::external::{Material, SkySettings};
use crate::render_graph::pass::{color_final_layout, external_dependency, swapchain_attachments, FrameTargets, PassContext, PassCore};
use crate::render_graph::primitives::{skybox_vertices, SKYBOX_VERTEX_COUNT};
use crate::resources::{BufferIndex, TextureIndex};
use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4};

/// Pipeline name of the sky material
pub const SKY_PIPELINE: &str = "sky";

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SkyPushConstants {
    pub view_proj: Mat4,
    pub exposure: f32,
    pub gamma: f32,
    _padding: [f32; 2],
}

impl SkyPushConstants {
    pub fn new(view_proj: Mat4, exposure: f32, gamma: f32) -> Self {
        Self {
            view_proj,
            exposure,
            gamma,
            _padding: [0.0; 2],
        }
    }

    /// Camera rotation only, so the box stays centred on the eye
    pub fn from_sky(sky: &SkySettings, exposure: f32, gamma: f32) -> Self {
        let rotation = Mat4::from_mat3(Mat3::from_mat4(sky.view));
        Self::new(sky.projection * rotation, exposure, gamma)
    }
}

pub struct SkyPass {
    present: bool,
    vertex_buffer: Option<BufferIndex>,
    material: Option<Box<dyn Material>>,
    bound_hdr: Option<TextureIndex>,
}

impl SkyPass {
    pub fn new() -> Self {
        Self {
            present: false,
            vertex_buffer: None,
            material: None,
            bound_hdr: None,
        }
    }

    pub(crate) fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    pub fn vertex_buffer(&self) -> Option<BufferIndex> {
        self.vertex_buffer
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
            depth_attachment: Some(AttachmentDesc {
                format: targets.depth_format,
                load_op: LoadOp::Load,
                store_op: StoreOp::DontCare,
                initial_layout: ImageLayout::DepthStencilAttachment,
                final_layout: ImageLayout::DepthStencilAttachment,
            }),
            dependencies: vec![external_dependency(false)],
        }
        .with_label("sky pass");
        core.create_render_pass(ctx.device, &desc)?;
        core.create_framebuffers(ctx.device, swapchain_attachments(targets, true), targets.extent)?;
        core.create_command_buffers(ctx.device, targets.image_count())
    }

    pub(crate) fn post_shader_load_init(&mut self, ctx: &mut PassContext<'_>) -> FrameResult<()> {
        if self.vertex_buffer.is_none() {
            self.vertex_buffer = Some(ctx.buffers.allocate(&skybox_vertices(), BufferUsage::VERTEX)?);
        }
        self.material = Some(ctx.pipelines.new_material(SKY_PIPELINE)?);
        self.bound_hdr = None;
        Ok(())
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

        // Nothing to draw until shaders are loaded
        if let (Some(material), Some(vertex_buffer)) = (self.material.as_mut(), self.vertex_buffer) {
            let sky = ctx.world.sky();
            if let Some(hdr) = sky.hdr_texture {
                if self.bound_hdr != Some(hdr) {
                    material.set_texture(0, hdr)?;
                    self.bound_hdr = Some(hdr);
                }
            }

            let constants = SkyPushConstants::from_sky(&sky, ctx.config.sky_exposure, ctx.config.sky_gamma);
            material.bind(ctx.device, ctx.textures, &mut recorder)?;
            recorder
                .push_constants(material.pipeline().layout, ShaderStage::VERTEX_FRAGMENT, 0, &constants)
                .bind_vertex_buffer(0, ctx.buffers.buffer(vertex_buffer)?, 0)
                .draw(SKYBOX_VERTEX_COUNT, 1);
        }

        recorder.end_render_pass();
        core.record(ctx.device, image_index, &recorder)
    }
}

impl Default for SkyPass {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_push_constants_layout() {
        assert_eq!(std::mem::size_of::<SkyPushConstants>(), 80);
    }

    #[test]
    fn test_sky_ignores_camera_translation() {
        let projection = Mat4::perspective_rh(1.0, 1.5, 0.1, 100.0);
        let at_origin = SkySettings {
            hdr_texture: None,
            view: Mat4::look_at_rh(Vec3::ZERO, Vec3::Z, Vec3::Y),
            projection,
        };
        let moved = SkySettings {
            view: Mat4::look_at_rh(Vec3::new(5.0, 2.0, 1.0), Vec3::new(5.0, 2.0, 2.0), Vec3::Y),
            ..at_origin
        };
        let a = SkyPushConstants::from_sky(&at_origin, 1.0, 2.2);
        let b = SkyPushConstants::from_sky(&moved, 1.0, 2.2);
        assert!(a.view_proj.abs_diff_eq(b.view_proj, 1e-5));
    }
}
