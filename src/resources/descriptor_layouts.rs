//! Global descriptor set layout slots
//!
//! Pipelines share up to eight set layouts. Slot 0 is reserved for the
//! per-material set, slots 1 to 7 hold global resource layouts.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{FrameGraphError, FrameResult};
use crate::resources::DescriptorAllocator;
use std::sync::Arc;

pub const MAX_DESCRIPTOR_SET_SLOTS: u32 = 8;

/// Slot of the per-material descriptor set
pub const MATERIAL_SET_SLOT: u32 = 0;

struct LayoutSlot {
    layout: DescriptorSetLayoutHandle,
    allocator: DescriptorAllocator,
}

pub struct DescriptorLayouts {
    device: Arc<dyn GpuDevice>,
    sets_per_pool: u32,
    slots: Vec<Option<LayoutSlot>>,
}

impl DescriptorLayouts {
    pub fn new(device: Arc<dyn GpuDevice>, sets_per_pool: u32) -> Self {
        Self {
            device,
            sets_per_pool,
            slots: (0..MAX_DESCRIPTOR_SET_SLOTS).map(|_| None).collect(),
        }
    }

    fn check_slot(index: u32) -> FrameResult<usize> {
        if index >= MAX_DESCRIPTOR_SET_SLOTS {
            return Err(FrameGraphError::InvalidDescriptorSlot(index));
        }
        if index == MATERIAL_SET_SLOT {
            return Err(FrameGraphError::ReservedDescriptorSlot);
        }
        Ok(index as usize)
    }

    /// Create the layout for a global slot together with its descriptor allocator
    pub fn register(&mut self, index: u32, bindings: &[DescriptorSetLayoutBinding]) -> FrameResult<DescriptorSetLayoutHandle> {
        let slot = Self::check_slot(index)?;
        let layout = self.device.create_descriptor_set_layout(bindings)?;
        let pool_sizes = pool_sizes_for(bindings);
        let allocator = match DescriptorAllocator::with_pool_capacity(
            self.device.clone(),
            &pool_sizes,
            layout,
            self.sets_per_pool,
        ) {
            Ok(allocator) => allocator,
            Err(e) => {
                self.device.destroy_descriptor_set_layout(layout);
                return Err(e);
            }
        };
        if let Some(previous) = self.slots[slot].replace(LayoutSlot { layout, allocator }) {
            self.release(previous);
        }
        Ok(layout)
    }

    pub fn layout_at(&self, index: u32) -> FrameResult<DescriptorSetLayoutHandle> {
        let slot = Self::check_slot(index)?;
        self.slots[slot]
            .as_ref()
            .map(|s| s.layout)
            .ok_or(FrameGraphError::MissingDescriptorLayout(index))
    }

    pub fn allocator_at(&mut self, index: u32) -> FrameResult<&mut DescriptorAllocator> {
        let slot = Self::check_slot(index)?;
        self.slots[slot]
            .as_mut()
            .map(|s| &mut s.allocator)
            .ok_or(FrameGraphError::MissingDescriptorLayout(index))
    }

    fn release(&self, mut slot: LayoutSlot) {
        slot.allocator.destroy();
        self.device.destroy_descriptor_set_layout(slot.layout);
    }

    pub fn destroy(&mut self) {
        let slots: Vec<LayoutSlot> = self.slots.iter_mut().filter_map(Option::take).collect();
        for slot in slots {
            self.release(slot);
        }
    }
}

impl Drop for DescriptorLayouts {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Descriptor-type histogram of one set of the given layout
pub fn pool_sizes_for(bindings: &[DescriptorSetLayoutBinding]) -> Vec<DescriptorPoolSize> {
    let mut sizes: Vec<DescriptorPoolSize> = Vec::new();
    for binding in bindings {
        match sizes.iter_mut().find(|s| s.ty == binding.ty) {
            Some(size) => size.count += binding.count,
            None => sizes.push(DescriptorPoolSize {
                ty: binding.ty,
                count: binding.count,
            }),
        }
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn texture_binding(binding: u32) -> DescriptorSetLayoutBinding {
        DescriptorSetLayoutBinding {
            binding,
            ty: DescriptorType::CombinedImageSampler,
            count: 1,
            stages: ShaderStage::FRAGMENT,
        }
    }

    #[test]
    fn test_slot_bounds() {
        let mut layouts = DescriptorLayouts::new(Arc::new(DummyBackend::new()), 8);
        assert!(matches!(layouts.layout_at(8), Err(FrameGraphError::InvalidDescriptorSlot(8))));
        assert!(matches!(layouts.layout_at(0), Err(FrameGraphError::ReservedDescriptorSlot)));
        assert!(matches!(layouts.layout_at(3), Err(FrameGraphError::MissingDescriptorLayout(3))));

        let layout = layouts.register(3, &[texture_binding(0)]).unwrap();
        assert_eq!(layouts.layout_at(3).unwrap(), layout);
        assert!(layouts.allocator_at(3).unwrap().allocate_descriptor_set().is_ok());
    }

    #[test]
    fn test_pool_sizes_histogram() {
        let mut bindings = vec![texture_binding(0), texture_binding(1)];
        bindings.push(DescriptorSetLayoutBinding {
            binding: 2,
            ty: DescriptorType::UniformBuffer,
            count: 1,
            stages: ShaderStage::VERTEX,
        });
        let sizes = pool_sizes_for(&bindings);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].count, 2);
        assert_eq!(sizes[1].ty, DescriptorType::UniformBuffer);
    }
}
