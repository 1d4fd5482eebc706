//! Growable descriptor set allocation for a single set layout
//!
//! Sets are recycled, never freed back to a pool: a released set moves to the
//! free list and is handed out again by the next allocation. When the current
//! pool is exhausted a new pool is appended and the allocation is retried once.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{FrameGraphError, FrameResult};
use std::collections::HashSet;
use std::sync::Arc;

/// Sets per pool unless configured otherwise
pub const MAX_SETS_PER_POOL: u32 = 1 << 14;

/// Pool list capacity reserved on creation
const INITIAL_POOL_CAPACITY: usize = 4;

pub struct DescriptorAllocator {
    device: Arc<dyn GpuDevice>,
    layout: DescriptorSetLayoutHandle,
    pool_sizes: Vec<DescriptorPoolSize>,
    max_sets_per_pool: u32,
    pools: Vec<DescriptorPoolHandle>,
    pool_index: usize,
    free: Vec<DescriptorSetHandle>,
    used: HashSet<DescriptorSetHandle>,
}

impl DescriptorAllocator {
    /// Record the layout's descriptor histogram and eagerly create the first pool
    pub fn new(
        device: Arc<dyn GpuDevice>,
        pool_sizes: &[DescriptorPoolSize],
        layout: DescriptorSetLayoutHandle,
    ) -> FrameResult<Self> {
        Self::with_pool_capacity(device, pool_sizes, layout, MAX_SETS_PER_POOL)
    }

    pub fn with_pool_capacity(
        device: Arc<dyn GpuDevice>,
        pool_sizes: &[DescriptorPoolSize],
        layout: DescriptorSetLayoutHandle,
        max_sets_per_pool: u32,
    ) -> FrameResult<Self> {
        let mut allocator = Self {
            device,
            layout,
            pool_sizes: pool_sizes.to_vec(),
            max_sets_per_pool: max_sets_per_pool.max(1),
            pools: Vec::with_capacity(INITIAL_POOL_CAPACITY),
            pool_index: 0,
            free: Vec::new(),
            used: HashSet::new(),
        };
        allocator.grow()?;
        allocator.pool_index = 0;
        Ok(allocator)
    }

    /// Append a pool and make it current
    fn grow(&mut self) -> FrameResult<()> {
        let sizes: Vec<DescriptorPoolSize> = self
            .pool_sizes
            .iter()
            .map(|size| DescriptorPoolSize {
                ty: size.ty,
                count: size.count.saturating_mul(self.max_sets_per_pool),
            })
            .collect();
        let pool = self.device.create_descriptor_pool(self.max_sets_per_pool, &sizes)?;
        self.pool_index = self.pools.len();
        self.pools.push(pool);
        Ok(())
    }

    pub fn allocate_descriptor_set(&mut self) -> FrameResult<DescriptorSetHandle> {
        if let Some(set) = self.free.pop() {
            log::info!("Descriptor set reused from free list");
            self.used.insert(set);
            return Ok(set);
        }

        let pool = self.pools[self.pool_index];
        let set = match self.device.allocate_descriptor_set(pool, self.layout) {
            Ok(set) => set,
            Err(BackendError::OutOfPoolMemory) => {
                log::error!("Descriptor pool allocation failed!");
                self.grow()?;
                let pool = self.pools[self.pool_index];
                match self.device.allocate_descriptor_set(pool, self.layout) {
                    Ok(set) => set,
                    Err(BackendError::OutOfPoolMemory) => {
                        return Err(FrameGraphError::DescriptorPoolExhausted {
                            pools: self.pools.len(),
                        })
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        log::info!("Descriptor set allocation successful!");
        self.used.insert(set);
        Ok(set)
    }

    /// Move a set from used to free. Fails for sets this allocator does not have in use.
    pub fn release_descriptor_set(&mut self, set: DescriptorSetHandle) -> FrameResult<()> {
        if !self.used.remove(&set) {
            return Err(FrameGraphError::InvalidHandle(set.raw()));
        }
        self.free.push(set);
        Ok(())
    }

    pub fn layout(&self) -> DescriptorSetLayoutHandle {
        self.layout
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn used_count(&self) -> usize {
        self.used.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn is_in_use(&self, set: DescriptorSetHandle) -> bool {
        self.used.contains(&set)
    }

    /// Destroy every pool; all sets become invalid
    pub fn destroy(&mut self) {
        for pool in self.pools.drain(..) {
            self.device.destroy_descriptor_pool(pool);
        }
        self.pool_index = 0;
        self.free.clear();
        self.used.clear();
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn setup(capacity: u32) -> (Arc<DummyBackend>, DescriptorAllocator) {
        let backend = Arc::new(DummyBackend::new());
        let layout = backend.create_descriptor_set_layout(&[]).unwrap();
        let sizes = [DescriptorPoolSize {
            ty: DescriptorType::CombinedImageSampler,
            count: 1,
        }];
        let allocator = DescriptorAllocator::with_pool_capacity(backend.clone(), &sizes, layout, capacity).unwrap();
        (backend, allocator)
    }

    #[test]
    fn test_first_pool_created_eagerly() {
        let (backend, allocator) = setup(4);
        assert_eq!(allocator.pool_count(), 1);
        assert_eq!(backend.stats().descriptor_pools_created, 1);
    }

    #[test]
    fn test_released_sets_are_recycled() {
        let (backend, mut allocator) = setup(2);
        let a = allocator.allocate_descriptor_set().unwrap();
        allocator.release_descriptor_set(a).unwrap();
        assert_eq!(allocator.free_count(), 1);

        let b = allocator.allocate_descriptor_set().unwrap();
        assert_eq!(a, b);
        assert_eq!(allocator.free_count(), 0);
        assert_eq!(allocator.used_count(), 1);
        assert_eq!(backend.stats().descriptor_pools_created, 1);
    }

    #[test]
    fn test_destroy_releases_pools() {
        let (backend, mut allocator) = setup(1);
        allocator.allocate_descriptor_set().unwrap();
        allocator.allocate_descriptor_set().unwrap();
        assert_eq!(backend.live_descriptor_pool_count(), 2);
        allocator.destroy();
        assert_eq!(backend.live_descriptor_pool_count(), 0);
    }
}
