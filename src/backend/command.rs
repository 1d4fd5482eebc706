//! Backend-agnostic command stream
//!
//! Passes and managers build a list of [`GpuCommand`]s with a [`CommandRecorder`]
//! and hand it to [`GpuDevice::record_command_buffer`], which translates it into
//! native commands. Nothing here touches the device.

use crate::backend::traits::*;
use crate::backend::types::*;
use bytemuck::Pod;

/// Whether a render pass instance records its draws inline or via secondary buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubpassContents {
    #[default]
    Inline,
    SecondaryCommandBuffers,
}

/// Layout transition of an image subresource range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: ImageHandle,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub src_access: Access,
    pub dst_access: Access,
    pub range: ImageSubresourceRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

/// Tightly packed buffer data copied into one mip level at the image origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferImageCopy {
    pub buffer_offset: u64,
    pub subresource: ImageSubresourceLayers,
    pub extent: Extent3d,
}

/// Blit of the full `src_extent` region onto the full `dst_extent` region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBlit {
    pub src_subresource: ImageSubresourceLayers,
    pub src_extent: Extent3d,
    pub dst_subresource: ImageSubresourceLayers,
    pub dst_extent: Extent3d,
}

/// Image-to-image copy of `extent` texels starting at the origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageCopy {
    pub src_subresource: ImageSubresourceLayers,
    pub dst_subresource: ImageSubresourceLayers,
    pub extent: Extent3d,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    BeginRenderPass {
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        render_area: Rect2d,
        clear_values: Vec<ClearValue>,
        contents: SubpassContents,
    },
    EndRenderPass,
    SetViewport(Viewport),
    SetScissor(Rect2d),
    BindPipeline(PipelineHandle),
    BindDescriptorSets {
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: Vec<DescriptorSetHandle>,
    },
    PushConstants {
        layout: PipelineLayoutHandle,
        stages: ShaderStage,
        offset: u32,
        data: Vec<u8>,
    },
    BindVertexBuffer {
        binding: u32,
        buffer: BufferHandle,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    ExecuteCommands(Vec<CommandBufferHandle>),
    PipelineBarrier {
        src_stage: PipelineStage,
        dst_stage: PipelineStage,
        image_barriers: Vec<ImageBarrier>,
    },
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        regions: Vec<BufferCopy>,
    },
    CopyBufferToImage {
        src: BufferHandle,
        dst: ImageHandle,
        dst_layout: ImageLayout,
        regions: Vec<BufferImageCopy>,
    },
    BlitImage {
        src: ImageHandle,
        src_layout: ImageLayout,
        dst: ImageHandle,
        dst_layout: ImageLayout,
        regions: Vec<ImageBlit>,
        filter: FilterMode,
    },
    CopyImage {
        src: ImageHandle,
        src_layout: ImageLayout,
        dst: ImageHandle,
        dst_layout: ImageLayout,
        regions: Vec<ImageCopy>,
    },
}

/// Builder collecting commands for one command buffer
#[derive(Debug, Default)]
pub struct CommandRecorder {
    commands: Vec<GpuCommand>,
}

impl CommandRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: GpuCommand) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn begin_render_pass(
        &mut self,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        render_area: Rect2d,
        clear_values: &[ClearValue],
        contents: SubpassContents,
    ) -> &mut Self {
        self.push(GpuCommand::BeginRenderPass {
            render_pass,
            framebuffer,
            render_area,
            clear_values: clear_values.to_vec(),
            contents,
        })
    }

    pub fn end_render_pass(&mut self) -> &mut Self {
        self.push(GpuCommand::EndRenderPass)
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> &mut Self {
        self.push(GpuCommand::SetViewport(viewport))
    }

    pub fn set_scissor(&mut self, scissor: Rect2d) -> &mut Self {
        self.push(GpuCommand::SetScissor(scissor))
    }

    pub fn bind_pipeline(&mut self, pipeline: PipelineHandle) -> &mut Self {
        self.push(GpuCommand::BindPipeline(pipeline))
    }

    pub fn bind_descriptor_sets(
        &mut self,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    ) -> &mut Self {
        self.push(GpuCommand::BindDescriptorSets {
            layout,
            first_set,
            sets: sets.to_vec(),
        })
    }

    pub fn push_constants<T: Pod>(
        &mut self,
        layout: PipelineLayoutHandle,
        stages: ShaderStage,
        offset: u32,
        value: &T,
    ) -> &mut Self {
        self.push(GpuCommand::PushConstants {
            layout,
            stages,
            offset,
            data: bytemuck::bytes_of(value).to_vec(),
        })
    }

    pub fn bind_vertex_buffer(&mut self, binding: u32, buffer: BufferHandle, offset: u64) -> &mut Self {
        self.push(GpuCommand::BindVertexBuffer {
            binding,
            buffer,
            offset,
        })
    }

    pub fn bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) -> &mut Self {
        self.push(GpuCommand::BindIndexBuffer {
            buffer,
            offset,
            format,
        })
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) -> &mut Self {
        self.push(GpuCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex: 0,
            first_instance: 0,
        })
    }

    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32) -> &mut Self {
        self.push(GpuCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance: 0,
        })
    }

    pub fn execute_commands(&mut self, buffers: &[CommandBufferHandle]) -> &mut Self {
        self.push(GpuCommand::ExecuteCommands(buffers.to_vec()))
    }

    pub fn pipeline_barrier(
        &mut self,
        src_stage: PipelineStage,
        dst_stage: PipelineStage,
        image_barriers: Vec<ImageBarrier>,
    ) -> &mut Self {
        self.push(GpuCommand::PipelineBarrier {
            src_stage,
            dst_stage,
            image_barriers,
        })
    }

    pub fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, size: u64) -> &mut Self {
        self.push(GpuCommand::CopyBuffer {
            src,
            dst,
            regions: vec![BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            }],
        })
    }

    pub fn copy_buffer_to_image(
        &mut self,
        src: BufferHandle,
        dst: ImageHandle,
        dst_layout: ImageLayout,
        regions: Vec<BufferImageCopy>,
    ) -> &mut Self {
        self.push(GpuCommand::CopyBufferToImage {
            src,
            dst,
            dst_layout,
            regions,
        })
    }

    pub fn blit_image(
        &mut self,
        src: ImageHandle,
        src_layout: ImageLayout,
        dst: ImageHandle,
        dst_layout: ImageLayout,
        region: ImageBlit,
        filter: FilterMode,
    ) -> &mut Self {
        self.push(GpuCommand::BlitImage {
            src,
            src_layout,
            dst,
            dst_layout,
            regions: vec![region],
            filter,
        })
    }

    pub fn copy_image(
        &mut self,
        src: ImageHandle,
        src_layout: ImageLayout,
        dst: ImageHandle,
        dst_layout: ImageLayout,
        region: ImageCopy,
    ) -> &mut Self {
        self.push(GpuCommand::CopyImage {
            src,
            src_layout,
            dst,
            dst_layout,
            regions: vec![region],
        })
    }

    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn into_commands(self) -> Vec<GpuCommand> {
        self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_constants_bytes() {
        let mut recorder = CommandRecorder::new();
        let layout = PipelineLayoutHandle::from_raw(7);
        recorder.push_constants(layout, ShaderStage::FRAGMENT, 0, &[1.0f32, 2.0f32]);

        match &recorder.commands()[0] {
            GpuCommand::PushConstants { data, offset, .. } => {
                assert_eq!(*offset, 0);
                assert_eq!(data.len(), 8);
                assert_eq!(&data[..4], &1.0f32.to_ne_bytes());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_chained_recording() {
        let mut recorder = CommandRecorder::new();
        recorder
            .set_viewport(Viewport::from_extent(Extent2d::new(4, 4)))
            .set_scissor(Rect2d::from_extent(Extent2d::new(4, 4)))
            .draw(3, 1);
        assert_eq!(recorder.len(), 3);
        assert!(matches!(
            recorder.into_commands().last(),
            Some(GpuCommand::Draw { vertex_count: 3, .. })
        ));
    }
}
