//! Device-local buffers filled through staging uploads

use crate::backend::command::CommandRecorder;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{FrameGraphError, FrameResult};
use crate::resources::allocator::{BufferAllocation, ResourceAllocator, StagingBuffer, UploadQueue};
use crate::resources::transfer::TransferContext;
use bytemuck::Pod;
use std::sync::Arc;

/// Index of a buffer registered with the buffer manager
pub type BufferIndex = u32;

/// Combined vertex and index buffer; indices start at `index_offset` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOffset {
    pub buffer: BufferIndex,
    pub index_offset: u64,
}

struct CopyRequest {
    buffer: BufferIndex,
    staging: StagingBuffer,
}

pub struct BufferManager {
    allocator: Arc<ResourceAllocator>,
    buffers: Vec<BufferAllocation>,
    requests: UploadQueue<CopyRequest>,
    transfer: TransferContext,
}

impl BufferManager {
    pub fn new(allocator: Arc<ResourceAllocator>) -> FrameResult<Self> {
        let transfer = TransferContext::new(allocator.device().as_ref())?;
        Ok(Self {
            allocator,
            buffers: Vec::new(),
            requests: UploadQueue::new(),
            transfer,
        })
    }

    /// Stage `data` and create its device-local destination. The data is
    /// visible to the GPU after the next [`execute_operations`](Self::execute_operations).
    pub fn allocate<T: Pod>(&mut self, data: &[T], usage: BufferUsage) -> FrameResult<BufferIndex> {
        self.allocate_bytes(bytemuck::cast_slice(data), usage)
    }

    pub fn allocate_bytes(&mut self, bytes: &[u8], usage: BufferUsage) -> FrameResult<BufferIndex> {
        let staging = self.allocator.create_staging_buffer(bytes)?;
        let desc = BufferDesc::new(staging.size, usage | BufferUsage::COPY_DST, MemoryLocation::GpuOnly);
        let allocation = match self.allocator.create_buffer(&desc) {
            Ok(allocation) => allocation,
            Err(e) => {
                self.allocator.destroy_staging_buffer(staging);
                return Err(e);
            }
        };

        let index = self.buffers.len() as BufferIndex;
        self.buffers.push(allocation);
        self.requests.push(CopyRequest { buffer: index, staging });
        Ok(index)
    }

    /// Upload vertices followed by indices into one buffer
    pub fn allocate_indexed<V: Pod, I: Pod>(
        &mut self,
        vertices: &[V],
        indices: &[I],
        usage: BufferUsage,
    ) -> FrameResult<IndexOffset> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        let mut bytes = Vec::with_capacity(vertex_bytes.len() + index_bytes.len());
        bytes.extend_from_slice(vertex_bytes);
        bytes.extend_from_slice(index_bytes);

        let buffer = self.allocate_bytes(&bytes, usage | BufferUsage::VERTEX | BufferUsage::INDEX)?;
        Ok(IndexOffset {
            buffer,
            index_offset: vertex_bytes.len() as u64,
        })
    }

    /// Create a buffer that is not registered with the manager; the caller destroys it
    pub fn create_buffer(
        &self,
        size: u64,
        usage: BufferUsage,
        location: MemoryLocation,
    ) -> FrameResult<BufferAllocation> {
        self.allocator.create_buffer(&BufferDesc::new(size, usage, location))
    }

    pub fn destroy_buffer(&self, allocation: BufferAllocation) {
        self.allocator.destroy_buffer(allocation);
    }

    pub fn buffer(&self, index: BufferIndex) -> FrameResult<BufferHandle> {
        self.buffers
            .get(index as usize)
            .map(|b| b.handle)
            .ok_or(FrameGraphError::UnknownBuffer(index))
    }

    pub fn buffer_size(&self, index: BufferIndex) -> FrameResult<u64> {
        self.buffers
            .get(index as usize)
            .map(|b| b.size)
            .ok_or(FrameGraphError::UnknownBuffer(index))
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn pending_uploads(&self) -> usize {
        self.requests.len()
    }

    /// Staging buffers referenced by pending requests
    pub fn pending_staging_buffers(&self) -> Vec<BufferHandle> {
        self.requests.iter().map(|r| r.staging.handle).collect()
    }

    /// Copy every pending request in one submission, wait for it, then destroy the staging buffers.
    /// Returns the number of copies performed.
    pub fn execute_operations(&mut self) -> FrameResult<usize> {
        if self.requests.is_empty() {
            return Ok(0);
        }
        let requests = self.requests.take_all();
        log::info!("Buffer upload start: {} copies", requests.len());

        let mut recorder = CommandRecorder::new();
        for request in &requests {
            let dst = self.buffers[request.buffer as usize].handle;
            recorder.copy_buffer(request.staging.handle, dst, request.staging.size);
        }
        let result = self
            .transfer
            .submit_and_wait(self.allocator.device().as_ref(), recorder.commands());

        let count = requests.len();
        for request in requests {
            self.allocator.destroy_staging_buffer(request.staging);
        }
        result?;

        log::info!("Buffer upload end");
        Ok(count)
    }

    pub fn destroy(&mut self) {
        for request in self.requests.take_all() {
            self.allocator.destroy_staging_buffer(request.staging);
        }
        for buffer in self.buffers.drain(..) {
            self.allocator.destroy_buffer(buffer);
        }
        self.transfer.destroy(self.allocator.device().as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn setup() -> (Arc<DummyBackend>, Arc<ResourceAllocator>, BufferManager) {
        let backend = Arc::new(DummyBackend::new());
        let allocator = Arc::new(ResourceAllocator::new(backend.clone()));
        let manager = BufferManager::new(allocator.clone()).unwrap();
        (backend, allocator, manager)
    }

    #[test]
    fn test_execute_empty_queue_is_noop() {
        let (backend, _, mut manager) = setup();
        assert_eq!(manager.execute_operations().unwrap(), 0);
        assert_eq!(backend.submission_count(), 0);
    }

    #[test]
    fn test_one_submission_per_batch() {
        let (backend, allocator, mut manager) = setup();
        manager.allocate(&[1u32, 2, 3], BufferUsage::VERTEX).unwrap();
        manager.allocate(&[4u16, 5], BufferUsage::INDEX).unwrap();
        assert_eq!(allocator.live_staging_count(), 2);

        assert_eq!(manager.execute_operations().unwrap(), 2);
        assert_eq!(backend.submission_count(), 1);
        assert_eq!(allocator.live_staging_count(), 0);
        assert_eq!(manager.pending_uploads(), 0);
    }

    #[test]
    fn test_indexed_allocation_offset() {
        let (backend, _, mut manager) = setup();
        let vertices = [[0.0f32, 1.0, 2.0], [3.0, 4.0, 5.0]];
        let indices = [0u32, 1, 1];
        let combined = manager.allocate_indexed(&vertices, &indices, BufferUsage::empty()).unwrap();
        assert_eq!(combined.index_offset, 24);
        manager.execute_operations().unwrap();

        let contents = backend.buffer_contents(manager.buffer(combined.buffer).unwrap()).unwrap();
        assert_eq!(&contents[24..], bytemuck::cast_slice::<u32, u8>(&indices));
    }

    #[test]
    fn test_unknown_index() {
        let (_, _, manager) = setup();
        assert!(matches!(manager.buffer(3), Err(FrameGraphError::UnknownBuffer(3))));
    }
}
