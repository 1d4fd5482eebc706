//! Prefiltered environment map bake
//!
//! Renders the sky into an offscreen target once per cube face and mip level,
//! with roughness rising along the chain, and copies each result into the
//! probe's cube map. Every probe owns its cube map, offscreen target,
//! framebuffer, command buffer and semaphore.

use crate::backend::command::{CommandRecorder, ImageCopy, SubpassContents};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::FrameResult;
use crate::external::Material;
use crate::render_graph::pass::{external_dependency, PassContext, PassCore};
use crate::render_graph::primitives::{skybox_vertices, SKYBOX_VERTEX_COUNT};
use crate::resources::{mip_levels_for, record_layout_transition, BufferIndex, SamplerPreset, Texture, TextureIndex};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Pipeline name of the prefilter material
pub const PRENV_PIPELINE: &str = "prenv";

const PRENV_CLEAR: [f32; 4] = [0.0, 0.0, 0.2, 0.0];

/// Byte offset of the fragment-stage constants
const FRAGMENT_CONSTANTS_OFFSET: u32 = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PrenvPushConstants {
    pub roughness: f32,
    pub sample_count: u32,
    _padding: [u32; 2],
}

impl PrenvPushConstants {
    pub fn new(roughness: f32, sample_count: u32) -> Self {
        Self {
            roughness,
            sample_count,
            _padding: [0; 2],
        }
    }
}

/// Roughness baked into `mip` of a chain of `mip_levels`
pub fn mip_roughness(mip: u32, mip_levels: u32) -> f32 {
    if mip_levels <= 1 {
        0.0
    } else {
        mip as f32 / (mip_levels - 1) as f32
    }
}

/// View-projection of each cube face, in layer order +X, -X, +Y, -Y, +Z, -Z.
/// Only the environment is rendered, so the matrices look out from the origin.
pub fn cube_face_view_projections() -> [Mat4; 6] {
    let projection = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 512.0);
    let faces = [
        (Vec3::X, Vec3::NEG_Y),
        (Vec3::NEG_X, Vec3::NEG_Y),
        (Vec3::Y, Vec3::Z),
        (Vec3::NEG_Y, Vec3::NEG_Z),
        (Vec3::Z, Vec3::NEG_Y),
        (Vec3::NEG_Z, Vec3::NEG_Y),
    ];
    faces.map(|(direction, up)| projection * Mat4::look_at_rh(Vec3::ZERO, direction, up))
}

/// Per-probe resources of the environment bake
pub struct EnvProbeResources {
    /// Registered cube map holding the prefiltered chain
    pub prefiltered: TextureIndex,
    offscreen: Texture,
    framebuffer: FramebufferHandle,
    command_buffer: CommandBufferHandle,
    semaphore: SemaphoreHandle,
    face_view_proj: [Mat4; 6],
    dim: u32,
    mip_levels: u32,
}

impl EnvProbeResources {
    pub fn command_buffer(&self) -> CommandBufferHandle {
        self.command_buffer
    }

    /// Signaled when the bake completes
    pub fn semaphore(&self) -> SemaphoreHandle {
        self.semaphore
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub(crate) fn destroy(self, ctx: &mut PassContext<'_>, pool: Option<CommandPoolHandle>) {
        if let Some(pool) = pool {
            ctx.device.free_command_buffers(pool, &[self.command_buffer]);
        }
        ctx.device.destroy_framebuffer(self.framebuffer);
        ctx.device.destroy_semaphore(self.semaphore);
        ctx.textures.destroy_unregistered(self.offscreen);
    }
}

pub struct EnvProbeBakePass {
    vertex_buffer: Option<BufferIndex>,
    material: Option<Box<dyn Material>>,
    bound_hdr: Option<TextureIndex>,
}

impl EnvProbeBakePass {
    pub fn new() -> Self {
        Self {
            vertex_buffer: None,
            material: None,
            bound_hdr: None,
        }
    }

    pub(crate) fn init(&mut self, core: &mut PassCore, ctx: &mut PassContext<'_>) -> FrameResult<()> {
        let desc = RenderPassDesc {
            label: None,
            color_attachments: vec![AttachmentDesc {
                format: ctx.config.env_map_format,
                load_op: LoadOp::Clear,
                store_op: StoreOp::Store,
                initial_layout: ImageLayout::Undefined,
                final_layout: ImageLayout::ColorAttachment,
            }],
            depth_attachment: None,
            dependencies: vec![
                external_dependency(false),
                SubpassDependency {
                    src_subpass: Some(0),
                    dst_subpass: None,
                    src_stage: PipelineStage::COLOR_ATTACHMENT_OUTPUT,
                    dst_stage: PipelineStage::TRANSFER,
                    src_access: Access::COLOR_ATTACHMENT_WRITE,
                    dst_access: Access::TRANSFER_READ,
                    by_region: true,
                },
            ],
        }
        .with_label("prefiltered env pass");
        core.create_render_pass(ctx.device, &desc)?;
        core.extent = Extent2d::new(ctx.config.env_map_dim, ctx.config.env_map_dim);
        core.create_command_buffers(ctx.device, 1)
    }

    /// Material and skybox geometry exist
    pub fn is_loaded(&self) -> bool {
        self.material.is_some() && self.vertex_buffer.is_some()
    }

    pub(crate) fn post_shader_load_init(&mut self, ctx: &mut PassContext<'_>) -> FrameResult<()> {
        if self.vertex_buffer.is_none() {
            self.vertex_buffer = Some(ctx.buffers.allocate(&skybox_vertices(), BufferUsage::VERTEX)?);
        }
        self.material = Some(ctx.pipelines.new_material(PRENV_PIPELINE)?);
        self.bound_hdr = None;
        Ok(())
    }

    /// Build the resource bundle of one probe
    pub(crate) fn create_probe_resources(&self, core: &PassCore, ctx: &mut PassContext<'_>) -> FrameResult<EnvProbeResources> {
        let dim = ctx.config.env_map_dim;
        let format = ctx.config.env_map_format;
        let mip_levels = mip_levels_for(dim, dim);
        let render_pass = core.render_pass()?;
        let pool = core.command_pool.ok_or(BackendError::UnknownHandle {
            kind: "command pool",
            id: 0,
        })?;

        let mut cube = ctx.textures.create_cube_map_texture(
            dim,
            mip_levels,
            format,
            ImageUsage::SAMPLED | ImageUsage::COPY_DST,
        )?;
        match ctx.textures.create_sampler(SamplerPreset::PrefilteredEnv { mip_levels }) {
            Ok(sampler) => cube.sampler = Some(sampler),
            Err(e) => {
                ctx.textures.destroy_unregistered(cube);
                return Err(e);
            }
        }
        let prefiltered = ctx.textures.register_texture(cube);

        let offscreen = ctx.textures.create_texture_2d(
            dim,
            dim,
            1,
            format,
            ImageUsage::COLOR_ATTACHMENT | ImageUsage::COPY_SRC,
        )?;
        let framebuffer = ctx.device.create_framebuffer(&FramebufferDesc {
            render_pass,
            attachments: vec![offscreen.view],
            extent: Extent2d::new(dim, dim),
            layers: 1,
        })?;
        let command_buffer = ctx
            .device
            .allocate_command_buffers(pool, CommandBufferLevel::Primary, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::CommandCreationFailed("no probe command buffer allocated".into()))?;
        let semaphore = ctx.device.create_semaphore()?;

        Ok(EnvProbeResources {
            prefiltered,
            offscreen,
            framebuffer,
            command_buffer,
            semaphore,
            face_view_proj: cube_face_view_projections(),
            dim,
            mip_levels,
        })
    }

    /// Record the whole bake of one probe into its command buffer
    pub(crate) fn record_probe(&mut self, core: &PassCore, ctx: &mut PassContext<'_>, probe: &EnvProbeResources) -> FrameResult<()> {
        let render_pass = core.render_pass()?;
        let (cube_image, cube_range) = {
            let cube = ctx.textures.texture(probe.prefiltered)?;
            (cube.handle(), cube.full_range())
        };
        let offscreen_image = probe.offscreen.handle();
        let offscreen_range = probe.offscreen.full_range();
        let full_area = Rect2d::from_extent(Extent2d::new(probe.dim, probe.dim));

        if let (Some(material), Some(hdr)) = (self.material.as_mut(), ctx.world.sky().hdr_texture) {
            if self.bound_hdr != Some(hdr) {
                material.set_texture(0, hdr)?;
                self.bound_hdr = Some(hdr);
            }
        }

        let mut recorder = CommandRecorder::new();
        record_layout_transition(&mut recorder, cube_image, ImageLayout::Undefined, ImageLayout::TransferDst, cube_range)?;

        for mip in 0..probe.mip_levels {
            let size = (probe.dim >> mip).max(1);
            let extent = Extent2d::new(size, size);
            let fragment = PrenvPushConstants::new(mip_roughness(mip, probe.mip_levels), ctx.config.prenv_sample_count);

            for (face, view_proj) in probe.face_view_proj.iter().enumerate() {
                recorder
                    .begin_render_pass(
                        render_pass,
                        probe.framebuffer,
                        full_area,
                        &[ClearValue::Color(PRENV_CLEAR)],
                        SubpassContents::Inline,
                    )
                    .set_viewport(Viewport::from_extent(extent))
                    .set_scissor(Rect2d::from_extent(extent));

                if let (Some(material), Some(vertex_buffer)) = (self.material.as_mut(), self.vertex_buffer) {
                    let layout = material.pipeline().layout;
                    material.bind(ctx.device, ctx.textures, &mut recorder)?;
                    recorder
                        .push_constants(layout, ShaderStage::VERTEX, 0, view_proj)
                        .push_constants(layout, ShaderStage::FRAGMENT, FRAGMENT_CONSTANTS_OFFSET, &fragment)
                        .bind_vertex_buffer(0, ctx.buffers.buffer(vertex_buffer)?, 0)
                        .draw(SKYBOX_VERTEX_COUNT, 1);
                }
                recorder.end_render_pass();

                record_layout_transition(
                    &mut recorder,
                    offscreen_image,
                    ImageLayout::ColorAttachment,
                    ImageLayout::TransferSrc,
                    offscreen_range,
                )?;
                recorder.copy_image(
                    offscreen_image,
                    ImageLayout::TransferSrc,
                    cube_image,
                    ImageLayout::TransferDst,
                    ImageCopy {
                        src_subresource: ImageSubresourceLayers::color(0, 0, 1),
                        dst_subresource: ImageSubresourceLayers::color(mip, face as u32, 1),
                        extent: Extent3d::new(size, size, 1),
                    },
                );
                record_layout_transition(
                    &mut recorder,
                    offscreen_image,
                    ImageLayout::TransferSrc,
                    ImageLayout::ColorAttachment,
                    offscreen_range,
                )?;
            }
        }

        record_layout_transition(&mut recorder, cube_image, ImageLayout::TransferDst, ImageLayout::ShaderReadOnly, cube_range)?;
        ctx.device
            .record_command_buffer(probe.command_buffer, &CommandBufferBeginInfo::one_time(), recorder.commands())?;
        Ok(())
    }

    pub(crate) fn destroy(&mut self, _ctx: &mut PassContext<'_>) {
        self.material = None;
        self.bound_hdr = None;
    }
}

impl Default for EnvProbeBakePass {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_roughness_spans_chain() {
        assert_eq!(mip_roughness(0, 10), 0.0);
        assert_eq!(mip_roughness(9, 10), 1.0);
        assert_eq!(mip_roughness(0, 1), 0.0);
    }

    #[test]
    fn test_face_matrices_distinct() {
        let faces = cube_face_view_projections();
        for i in 0..6 {
            for j in i + 1..6 {
                assert!(!faces[i].abs_diff_eq(faces[j], 1e-4));
            }
        }
    }

    #[test]
    fn test_push_constant_sizes() {
        assert_eq!(std::mem::size_of::<PrenvPushConstants>(), 16);
        assert_eq!(std::mem::size_of::<Mat4>() as u32, FRAGMENT_CONSTANTS_OFFSET);
    }
}
