//! Translation of the recorded command stream into native Vulkan commands

use super::conversion::*;
use super::VkObjects;
use crate::backend::command::{GpuCommand, SubpassContents};
use crate::backend::traits::*;
use ash::vk;

fn convert_contents(contents: SubpassContents) -> vk::SubpassContents {
    match contents {
        SubpassContents::Inline => vk::SubpassContents::INLINE,
        SubpassContents::SecondaryCommandBuffers => vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
    }
}

/// Emit `commands` into `cmd`, which must be in the recording state.
///
/// Every handle is resolved before its command is emitted; an unknown handle
/// stops the encoding and leaves the buffer to be ended by the caller.
pub(super) unsafe fn encode_commands(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    commands: &[GpuCommand],
    objects: &VkObjects,
) -> BackendResult<()> {
    for command in commands {
        match command {
            GpuCommand::BeginRenderPass {
                render_pass,
                framebuffer,
                render_area,
                clear_values,
                contents,
            } => {
                let clear_values: Vec<vk::ClearValue> = clear_values.iter().map(convert_clear_value).collect();
                let begin_info = vk::RenderPassBeginInfo::default()
                    .render_pass(objects.render_pass(*render_pass)?)
                    .framebuffer(objects.framebuffer(*framebuffer)?)
                    .render_area(convert_rect(*render_area))
                    .clear_values(&clear_values);
                device.cmd_begin_render_pass(cmd, &begin_info, convert_contents(*contents));
            }
            GpuCommand::EndRenderPass => device.cmd_end_render_pass(cmd),
            GpuCommand::SetViewport(viewport) => {
                let viewport = vk::Viewport {
                    x: viewport.x,
                    y: viewport.y,
                    width: viewport.width,
                    height: viewport.height,
                    min_depth: viewport.min_depth,
                    max_depth: viewport.max_depth,
                };
                device.cmd_set_viewport(cmd, 0, &[viewport]);
            }
            GpuCommand::SetScissor(rect) => device.cmd_set_scissor(cmd, 0, &[convert_rect(*rect)]),
            GpuCommand::BindPipeline(pipeline) => {
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, objects.pipeline(*pipeline)?);
            }
            GpuCommand::BindDescriptorSets { layout, first_set, sets } => {
                let sets = sets
                    .iter()
                    .map(|&set| objects.descriptor_set(set))
                    .collect::<BackendResult<Vec<_>>>()?;
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    objects.pipeline_layout(*layout)?,
                    *first_set,
                    &sets,
                    &[],
                );
            }
            GpuCommand::PushConstants {
                layout,
                stages,
                offset,
                data,
            } => {
                device.cmd_push_constants(
                    cmd,
                    objects.pipeline_layout(*layout)?,
                    convert_shader_stage(*stages),
                    *offset,
                    data,
                );
            }
            GpuCommand::BindVertexBuffer { binding, buffer, offset } => {
                device.cmd_bind_vertex_buffers(cmd, *binding, &[objects.buffer(*buffer)?], &[*offset]);
            }
            GpuCommand::BindIndexBuffer { buffer, offset, format } => {
                device.cmd_bind_index_buffer(cmd, objects.buffer(*buffer)?, *offset, convert_index_type(*format));
            }
            GpuCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => device.cmd_draw(cmd, *vertex_count, *instance_count, *first_vertex, *first_instance),
            GpuCommand::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => device.cmd_draw_indexed(
                cmd,
                *index_count,
                *instance_count,
                *first_index,
                *vertex_offset,
                *first_instance,
            ),
            GpuCommand::ExecuteCommands(buffers) => {
                let buffers = buffers
                    .iter()
                    .map(|&buffer| objects.command_buffer(buffer))
                    .collect::<BackendResult<Vec<_>>>()?;
                device.cmd_execute_commands(cmd, &buffers);
            }
            GpuCommand::PipelineBarrier {
                src_stage,
                dst_stage,
                image_barriers,
            } => {
                let barriers = image_barriers
                    .iter()
                    .map(|barrier| {
                        Ok(vk::ImageMemoryBarrier::default()
                            .src_access_mask(convert_access(barrier.src_access))
                            .dst_access_mask(convert_access(barrier.dst_access))
                            .old_layout(convert_layout(barrier.old_layout))
                            .new_layout(convert_layout(barrier.new_layout))
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .image(objects.image(barrier.image)?)
                            .subresource_range(convert_subresource_range(&barrier.range)))
                    })
                    .collect::<BackendResult<Vec<_>>>()?;
                device.cmd_pipeline_barrier(
                    cmd,
                    convert_stage(*src_stage),
                    convert_stage(*dst_stage),
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &barriers,
                );
            }
            GpuCommand::CopyBuffer { src, dst, regions } => {
                let regions: Vec<vk::BufferCopy> = regions
                    .iter()
                    .map(|region| vk::BufferCopy {
                        src_offset: region.src_offset,
                        dst_offset: region.dst_offset,
                        size: region.size,
                    })
                    .collect();
                device.cmd_copy_buffer(cmd, objects.buffer(*src)?, objects.buffer(*dst)?, &regions);
            }
            GpuCommand::CopyBufferToImage {
                src,
                dst,
                dst_layout,
                regions,
            } => {
                let regions: Vec<vk::BufferImageCopy> = regions
                    .iter()
                    .map(|region| vk::BufferImageCopy {
                        buffer_offset: region.buffer_offset,
                        buffer_row_length: 0,
                        buffer_image_height: 0,
                        image_subresource: convert_subresource_layers(&region.subresource),
                        image_offset: vk::Offset3D::default(),
                        image_extent: convert_extent_3d(region.extent),
                    })
                    .collect();
                device.cmd_copy_buffer_to_image(
                    cmd,
                    objects.buffer(*src)?,
                    objects.image(*dst)?,
                    convert_layout(*dst_layout),
                    &regions,
                );
            }
            GpuCommand::BlitImage {
                src,
                src_layout,
                dst,
                dst_layout,
                regions,
                filter,
            } => {
                let regions: Vec<vk::ImageBlit> = regions
                    .iter()
                    .map(|region| vk::ImageBlit {
                        src_subresource: convert_subresource_layers(&region.src_subresource),
                        src_offsets: [vk::Offset3D::default(), extent_offset(region.src_extent)],
                        dst_subresource: convert_subresource_layers(&region.dst_subresource),
                        dst_offsets: [vk::Offset3D::default(), extent_offset(region.dst_extent)],
                    })
                    .collect();
                device.cmd_blit_image(
                    cmd,
                    objects.image(*src)?,
                    convert_layout(*src_layout),
                    objects.image(*dst)?,
                    convert_layout(*dst_layout),
                    &regions,
                    convert_filter(*filter),
                );
            }
            GpuCommand::CopyImage {
                src,
                src_layout,
                dst,
                dst_layout,
                regions,
            } => {
                let regions: Vec<vk::ImageCopy> = regions
                    .iter()
                    .map(|region| vk::ImageCopy {
                        src_subresource: convert_subresource_layers(&region.src_subresource),
                        src_offset: vk::Offset3D::default(),
                        dst_subresource: convert_subresource_layers(&region.dst_subresource),
                        dst_offset: vk::Offset3D::default(),
                        extent: convert_extent_3d(region.extent),
                    })
                    .collect();
                device.cmd_copy_image(
                    cmd,
                    objects.image(*src)?,
                    convert_layout(*src_layout),
                    objects.image(*dst)?,
                    convert_layout(*dst_layout),
                    &regions,
                );
            }
        }
    }
    Ok(())
}
