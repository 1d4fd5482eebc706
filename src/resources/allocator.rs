//! Memory-backed resource allocation
//!
//! [`ResourceAllocator`] creates and destroys buffers, images and host-visible
//! staging copies on a shared device. Allocations are move-only so each one is
//! destroyed exactly once by whoever owns it.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{FrameGraphError, FrameResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Device-side buffer and its creation parameters
#[derive(Debug)]
pub struct BufferAllocation {
    pub handle: BufferHandle,
    pub size: u64,
    pub usage: BufferUsage,
    pub location: MemoryLocation,
}

/// Device-side image and its creation parameters
#[derive(Debug)]
pub struct ImageAllocation {
    pub handle: ImageHandle,
    pub extent: Extent3d,
    pub format: Format,
    pub mip_levels: u32,
    pub array_layers: u32,
}

/// Host-visible transfer source holding one upload's bytes
#[derive(Debug)]
pub struct StagingBuffer {
    pub handle: BufferHandle,
    pub size: u64,
}

pub struct ResourceAllocator {
    device: Arc<dyn GpuDevice>,
    live_buffers: AtomicUsize,
    live_images: AtomicUsize,
    live_staging: AtomicUsize,
}

impl ResourceAllocator {
    pub fn new(device: Arc<dyn GpuDevice>) -> Self {
        Self {
            device,
            live_buffers: AtomicUsize::new(0),
            live_images: AtomicUsize::new(0),
            live_staging: AtomicUsize::new(0),
        }
    }

    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    pub fn create_buffer(&self, desc: &BufferDesc) -> FrameResult<BufferAllocation> {
        let handle = self.device.create_buffer(desc)?;
        self.live_buffers.fetch_add(1, Ordering::Relaxed);
        Ok(BufferAllocation {
            handle,
            size: desc.size,
            usage: desc.usage,
            location: desc.location,
        })
    }

    pub fn destroy_buffer(&self, allocation: BufferAllocation) {
        self.device.destroy_buffer(allocation.handle);
        self.live_buffers.fetch_sub(1, Ordering::Relaxed);
    }

    /// Create a host-visible transfer source and copy `data` into it
    pub fn create_staging_buffer(&self, data: &[u8]) -> FrameResult<StagingBuffer> {
        if data.is_empty() {
            return Err(FrameGraphError::EmptyUpload);
        }
        let size = data.len() as u64;
        let desc = BufferDesc::new(size, BufferUsage::COPY_SRC, MemoryLocation::CpuToGpu).with_label("staging");
        let handle = self.device.create_buffer(&desc)?;
        if let Err(e) = self.device.write_buffer(handle, 0, data) {
            self.device.destroy_buffer(handle);
            return Err(e.into());
        }
        self.live_staging.fetch_add(1, Ordering::Relaxed);
        Ok(StagingBuffer { handle, size })
    }

    pub fn destroy_staging_buffer(&self, staging: StagingBuffer) {
        self.device.destroy_buffer(staging.handle);
        self.live_staging.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn create_image(&self, desc: &ImageDesc) -> FrameResult<ImageAllocation> {
        let handle = self.device.create_image(desc)?;
        self.live_images.fetch_add(1, Ordering::Relaxed);
        Ok(ImageAllocation {
            handle,
            extent: desc.extent,
            format: desc.format,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
        })
    }

    pub fn destroy_image(&self, allocation: ImageAllocation) {
        self.device.destroy_image(allocation.handle);
        self.live_images.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn live_buffer_count(&self) -> usize {
        self.live_buffers.load(Ordering::Relaxed)
    }

    pub fn live_image_count(&self) -> usize {
        self.live_images.load(Ordering::Relaxed)
    }

    /// Staging buffers created and not yet destroyed
    pub fn live_staging_count(&self) -> usize {
        self.live_staging.load(Ordering::Relaxed)
    }
}

/// FIFO of pending host-to-device copy requests
#[derive(Debug)]
pub struct UploadQueue<R> {
    pending: VecDeque<R>,
}

impl<R> Default for UploadQueue<R> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }
}

impl<R> UploadQueue<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: R) {
        self.pending.push_back(request);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.pending.iter()
    }

    /// Remove every pending request in submission order
    pub fn take_all(&mut self) -> Vec<R> {
        self.pending.drain(..).collect()
    }

    /// Remove the requests matching `cancel`, keeping the rest in order
    pub fn take_matching(&mut self, mut cancel: impl FnMut(&R) -> bool) -> Vec<R> {
        let (taken, kept): (Vec<R>, Vec<R>) = self.pending.drain(..).partition(|request| cancel(request));
        self.pending = kept.into();
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    #[test]
    fn test_staging_roundtrip_and_counts() {
        let backend = Arc::new(DummyBackend::new());
        let allocator = ResourceAllocator::new(backend.clone());

        let staging = allocator.create_staging_buffer(&[9, 8, 7]).unwrap();
        assert_eq!(allocator.live_staging_count(), 1);
        assert_eq!(backend.read_buffer(staging.handle, 0, 3).unwrap(), vec![9, 8, 7]);

        allocator.destroy_staging_buffer(staging);
        assert_eq!(allocator.live_staging_count(), 0);
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    fn test_empty_staging_rejected() {
        let allocator = ResourceAllocator::new(Arc::new(DummyBackend::new()));
        assert!(matches!(
            allocator.create_staging_buffer(&[]),
            Err(FrameGraphError::EmptyUpload)
        ));
        assert_eq!(allocator.live_staging_count(), 0);
    }

    #[test]
    fn test_upload_queue_is_fifo() {
        let mut queue = UploadQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.take_all(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_upload_queue_cancel_keeps_order() {
        let mut queue = UploadQueue::new();
        for i in 1..=5 {
            queue.push(i);
        }
        assert_eq!(queue.take_matching(|&i| i % 2 == 0), vec![2, 4]);
        assert_eq!(queue.take_all(), vec![1, 3, 5]);
    }
}
