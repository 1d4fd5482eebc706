//! Blocking one-time command submission

use crate::backend::command::GpuCommand;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::FrameResult;

/// Transient command pool plus a dedicated fence for synchronous transfers
pub struct TransferContext {
    pool: CommandPoolHandle,
    fence: FenceHandle,
}

impl TransferContext {
    pub fn new(device: &dyn GpuDevice) -> FrameResult<Self> {
        let pool = device.create_command_pool(CommandPoolFlags::TRANSIENT | CommandPoolFlags::RESET_COMMAND_BUFFER)?;
        let fence = match device.create_fence(false) {
            Ok(fence) => fence,
            Err(e) => {
                device.destroy_command_pool(pool);
                return Err(e.into());
            }
        };
        Ok(Self { pool, fence })
    }

    /// Record `commands` into a fresh command buffer, submit it and block until it retires
    pub fn submit_and_wait(&self, device: &dyn GpuDevice, commands: &[GpuCommand]) -> FrameResult<()> {
        submit_one_time(device, self.pool, self.fence, commands)?;
        device.reset_fences(&[self.fence])?;
        Ok(())
    }

    /// Same as [`submit_and_wait`](Self::submit_and_wait) with a fence that lives only for this call
    pub fn submit_with_transient_fence(&self, device: &dyn GpuDevice, commands: &[GpuCommand]) -> FrameResult<()> {
        let fence = device.create_fence(false)?;
        let result = submit_one_time(device, self.pool, fence, commands);
        device.destroy_fence(fence);
        result
    }

    pub fn destroy(&self, device: &dyn GpuDevice) {
        device.destroy_fence(self.fence);
        device.destroy_command_pool(self.pool);
    }
}

fn submit_one_time(
    device: &dyn GpuDevice,
    pool: CommandPoolHandle,
    fence: FenceHandle,
    commands: &[GpuCommand],
) -> FrameResult<()> {
    let cmd = device
        .allocate_command_buffers(pool, CommandBufferLevel::Primary, 1)?
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::CommandCreationFailed("no command buffer allocated".into()))?;
    let result = (|| -> FrameResult<()> {
        device.record_command_buffer(cmd, &CommandBufferBeginInfo::one_time(), commands)?;
        device.queue_submit(
            &[SubmitInfo {
                command_buffers: vec![cmd],
                ..Default::default()
            }],
            Some(fence),
        )?;
        device.wait_for_fences(&[fence], WAIT_FOREVER)?;
        Ok(())
    })();
    device.free_command_buffers(pool, &[cmd]);
    result
}
