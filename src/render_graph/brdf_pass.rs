//! BRDF integration lookup table bake
//!
//! A single full-screen triangle renders the split-sum BRDF terms straight
//! into the probe's lookup texture, which the render pass leaves in
//! shader-read layout.

use crate::backend::command::{CommandRecorder, SubpassContents};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::FrameResult;
use crate::external::Material;
use crate::render_graph::pass::{external_dependency, PassContext, PassCore};
use crate::resources::{SamplerPreset, TextureIndex};

/// Pipeline name of the BRDF integration material
pub const BRDF_PIPELINE: &str = "brdf";

const BRDF_CLEAR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Per-probe resources of the lookup table bake
pub struct BrdfLutResources {
    /// Registered lookup texture
    pub lut: TextureIndex,
    framebuffer: FramebufferHandle,
    command_buffer: CommandBufferHandle,
    semaphore: SemaphoreHandle,
}

impl BrdfLutResources {
    pub fn command_buffer(&self) -> CommandBufferHandle {
        self.command_buffer
    }

    pub fn semaphore(&self) -> SemaphoreHandle {
        self.semaphore
    }

    pub(crate) fn destroy(self, ctx: &mut PassContext<'_>, pool: Option<CommandPoolHandle>) {
        if let Some(pool) = pool {
            ctx.device.free_command_buffers(pool, &[self.command_buffer]);
        }
        ctx.device.destroy_framebuffer(self.framebuffer);
        ctx.device.destroy_semaphore(self.semaphore);
    }
}

pub struct BrdfLutBakePass {
    material: Option<Box<dyn Material>>,
}

impl BrdfLutBakePass {
    pub fn new() -> Self {
        Self { material: None }
    }

    pub(crate) fn init(&mut self, core: &mut PassCore, ctx: &mut PassContext<'_>) -> FrameResult<()> {
        let desc = RenderPassDesc {
            label: None,
            color_attachments: vec![AttachmentDesc {
                format: ctx.config.brdf_lut_format,
                load_op: LoadOp::Clear,
                store_op: StoreOp::Store,
                initial_layout: ImageLayout::Undefined,
                final_layout: ImageLayout::ShaderReadOnly,
            }],
            depth_attachment: None,
            dependencies: vec![
                external_dependency(false),
                SubpassDependency {
                    src_subpass: Some(0),
                    dst_subpass: None,
                    src_stage: PipelineStage::COLOR_ATTACHMENT_OUTPUT,
                    dst_stage: PipelineStage::FRAGMENT_SHADER,
                    src_access: Access::COLOR_ATTACHMENT_WRITE,
                    dst_access: Access::SHADER_READ,
                    by_region: true,
                },
            ],
        }
        .with_label("brdf lut pass");
        core.create_render_pass(ctx.device, &desc)?;
        core.extent = Extent2d::new(ctx.config.brdf_lut_dim, ctx.config.brdf_lut_dim);
        core.create_command_buffers(ctx.device, 1)
    }

    pub fn is_loaded(&self) -> bool {
        self.material.is_some()
    }

    pub(crate) fn post_shader_load_init(&mut self, ctx: &mut PassContext<'_>) -> FrameResult<()> {
        self.material = Some(ctx.pipelines.new_material(BRDF_PIPELINE)?);
        Ok(())
    }

    pub(crate) fn create_probe_resources(&self, core: &PassCore, ctx: &mut PassContext<'_>) -> FrameResult<BrdfLutResources> {
        let dim = ctx.config.brdf_lut_dim;
        let render_pass = core.render_pass()?;
        let pool = core.command_pool.ok_or(BackendError::UnknownHandle {
            kind: "command pool",
            id: 0,
        })?;

        let mut lut = ctx.textures.create_texture_2d(
            dim,
            dim,
            1,
            ctx.config.brdf_lut_format,
            ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED,
        )?;
        match ctx.textures.create_sampler(SamplerPreset::Brdf) {
            Ok(sampler) => lut.sampler = Some(sampler),
            Err(e) => {
                ctx.textures.destroy_unregistered(lut);
                return Err(e);
            }
        }
        let view = lut.view;
        let lut = ctx.textures.register_texture(lut);

        let framebuffer = ctx.device.create_framebuffer(&FramebufferDesc {
            render_pass,
            attachments: vec![view],
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

        Ok(BrdfLutResources {
            lut,
            framebuffer,
            command_buffer,
            semaphore,
        })
    }

    pub(crate) fn record_probe(&mut self, core: &PassCore, ctx: &mut PassContext<'_>, probe: &BrdfLutResources) -> FrameResult<()> {
        let extent = core.extent;
        let mut recorder = CommandRecorder::new();
        recorder
            .begin_render_pass(
                core.render_pass()?,
                probe.framebuffer,
                Rect2d::from_extent(extent),
                &[ClearValue::Color(BRDF_CLEAR)],
                SubpassContents::Inline,
            )
            .set_viewport(Viewport::from_extent(extent))
            .set_scissor(Rect2d::from_extent(extent));
        if let Some(material) = self.material.as_mut() {
            material.bind(ctx.device, ctx.textures, &mut recorder)?;
            recorder.draw(3, 1);
        }
        recorder.end_render_pass();
        ctx.device
            .record_command_buffer(probe.command_buffer, &CommandBufferBeginInfo::one_time(), recorder.commands())?;
        Ok(())
    }

    pub(crate) fn destroy(&mut self, _ctx: &mut PassContext<'_>) {
        self.material = None;
    }
}

impl Default for BrdfLutBakePass {
    fn default() -> Self {
        Self::new()
    }
}
