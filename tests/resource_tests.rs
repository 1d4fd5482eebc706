//! Resource upload and descriptor allocation integration tests.
//!
//! Uploads are checked byte for byte against the dummy device's simulated
//! memory; descriptor pools against its per-pool set capacity.

mod common;

use std::sync::Arc;

use rstest::rstest;

use common::{init_logger, TestContext};
use frame_graph_engine::backend::{
    BufferUsage, DescriptorPoolSize, DescriptorSetHandle, DescriptorType, Format, GpuDevice, ImageLayout,
};
use frame_graph_engine::resources::{mip_levels_for, DescriptorAllocator, TextureData};
use frame_graph_engine::{DummyBackend, FrameGraphError};

// ============================================================================
// Buffer uploads
// ============================================================================

#[test]
fn test_buffer_upload_lands_in_device_memory() {
    let mut ctx = TestContext::new();
    let vertices: [f32; 6] = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
    let index = ctx.engine.buffers_mut().allocate(&vertices, BufferUsage::VERTEX).unwrap();
    let staging = ctx.engine.buffers().pending_staging_buffers();
    assert_eq!(staging.len(), 1);

    let report = ctx.engine.update().unwrap();
    assert_eq!(report.buffer_uploads, 1);
    assert_eq!(ctx.engine.buffers().pending_uploads(), 0);

    let handle = ctx.engine.buffers().buffer(index).unwrap();
    let contents = ctx.backend.buffer_contents(handle).unwrap();
    assert_eq!(contents, bytemuck::cast_slice::<f32, u8>(&vertices));
    assert!(staging.iter().all(|&buffer| !ctx.backend.buffer_exists(buffer)));
    assert_eq!(ctx.engine.allocator().live_staging_count(), 0);
    ctx.assert_valid();
}

#[test]
fn test_batched_uploads_share_one_submission() {
    let mut ctx = TestContext::new();
    let indices: Vec<_> = (0..4u32)
        .map(|i| {
            ctx.engine
                .buffers_mut()
                .allocate(&[i; 16], BufferUsage::UNIFORM)
                .unwrap()
        })
        .collect();

    let submissions = ctx.backend.submission_count();
    assert_eq!(ctx.engine.buffers_mut().execute_operations().unwrap(), 4);
    assert_eq!(ctx.backend.submission_count(), submissions + 1);

    for (i, index) in indices.into_iter().enumerate() {
        let handle = ctx.engine.buffers().buffer(index).unwrap();
        let contents = ctx.backend.buffer_contents(handle).unwrap();
        assert_eq!(contents, bytemuck::cast_slice::<u32, u8>(&[i as u32; 16]));
    }
}

#[test]
fn test_indexed_upload_keeps_index_offset() {
    let mut ctx = TestContext::new();
    let vertices: [[f32; 3]; 3] = [[0.0; 3], [1.0; 3], [2.0; 3]];
    let indices: [u16; 3] = [0, 1, 2];
    let offset = ctx
        .engine
        .buffers_mut()
        .allocate_indexed(&vertices, &indices, BufferUsage::empty())
        .unwrap();
    ctx.engine.update().unwrap();

    let handle = ctx.engine.buffers().buffer(offset.buffer).unwrap();
    let contents = ctx.backend.buffer_contents(handle).unwrap();
    let start = offset.index_offset as usize;
    assert_eq!(start, 36);
    assert_eq!(&contents[start..], bytemuck::cast_slice::<u16, u8>(&indices));
}

// ============================================================================
// Texture uploads
// ============================================================================

fn gradient(width: u32, height: u32) -> TextureData {
    let data = (0..width * height)
        .flat_map(|i| [(i * 7) as u8, (i * 13) as u8, (i * 29) as u8, 255])
        .collect();
    TextureData {
        width,
        height,
        channels: 4,
        format: Format::Rgba8Unorm,
        data,
        name: "gradient".to_string(),
    }
}

#[rstest]
#[case::square(8, 8)]
#[case::wide(16, 4)]
#[case::tall(2, 8)]
fn test_mip_chain_generated(#[case] width: u32, #[case] height: u32) {
    let mut ctx = TestContext::new();
    let data = gradient(width, height);
    let index = ctx.engine.textures_mut().create_texture_from_data(&data, true).unwrap();

    let report = ctx.engine.update().unwrap();
    assert_eq!(report.texture_uploads, 1);

    let texture = ctx.engine.textures().texture(index).unwrap();
    let levels = mip_levels_for(width, height);
    assert_eq!(texture.mip_levels, levels);

    let image = texture.handle();
    let layouts = ctx.backend.image_layouts(image);
    assert_eq!(layouts.len(), levels as usize);
    assert!(layouts.iter().all(|&layout| layout == ImageLayout::ShaderReadOnly));

    assert_eq!(ctx.backend.image_texels(image, 0, 0), data.data);
    // Every level samples its top-left texel from the level above
    let last = ctx.backend.image_texels(image, levels - 1, 0);
    assert_eq!(&last[..4], &data.data[..4]);
    ctx.assert_valid();
}

#[test]
fn test_texture_without_mips() {
    let mut ctx = TestContext::new();
    let index = ctx.engine.textures_mut().create_texture_from_color([10, 20, 30, 40]).unwrap();
    assert_eq!(ctx.engine.textures().pending_uploads(), 1);
    ctx.engine.update().unwrap();

    let texture = ctx.engine.textures().texture(index).unwrap();
    assert_eq!(texture.mip_levels, 1);
    assert!(texture.sampler.is_some());
    assert_eq!(ctx.backend.image_layouts(texture.handle()), vec![ImageLayout::ShaderReadOnly]);
    assert_eq!(ctx.backend.image_texels(texture.handle(), 0, 0), vec![10, 20, 30, 40]);
    assert_eq!(ctx.engine.allocator().live_staging_count(), 0);
}

#[test]
fn test_uploads_before_frame_in_one_update() {
    let mut ctx = TestContext::new();
    ctx.engine.buffers_mut().allocate(&[1u32, 2, 3], BufferUsage::VERTEX).unwrap();
    ctx.engine.textures_mut().create_texture_from_color([1, 2, 3, 4]).unwrap();
    ctx.engine.textures_mut().create_texture_from_data(&gradient(4, 4), true).unwrap();

    let report = ctx.engine.update().unwrap();
    assert_eq!(report.buffer_uploads, 1);
    assert_eq!(report.texture_uploads, 2);
    assert_eq!(report.frame, frame_graph_engine::FrameStatus::Presented { image_index: 0 });

    let report = ctx.engine.update().unwrap();
    assert_eq!((report.buffer_uploads, report.texture_uploads), (0, 0));
    ctx.assert_valid();
}

#[test]
fn test_unknown_texture_and_buffer() {
    let ctx = TestContext::new();
    assert!(matches!(ctx.engine.textures().texture(42), Err(FrameGraphError::UnknownTexture(42))));
    assert!(matches!(ctx.engine.buffers().buffer(7), Err(FrameGraphError::UnknownBuffer(7))));
}

// ============================================================================
// Descriptor allocation
// ============================================================================

fn descriptor_allocator(capacity: u32) -> (Arc<DummyBackend>, DescriptorAllocator) {
    init_logger();
    let backend = Arc::new(DummyBackend::new());
    let layout = backend.create_descriptor_set_layout(&[]).unwrap();
    let sizes = [DescriptorPoolSize {
        ty: DescriptorType::CombinedImageSampler,
        count: 1,
    }];
    let allocator = DescriptorAllocator::with_pool_capacity(backend.clone(), &sizes, layout, capacity).unwrap();
    (backend, allocator)
}

#[rstest]
#[case::fits(4, 4, 1)]
#[case::one_over(4, 5, 2)]
#[case::single_set_pools(1, 3, 3)]
#[case::many(2, 9, 5)]
fn test_pools_grow_on_exhaustion(#[case] capacity: u32, #[case] sets: usize, #[case] pools: usize) {
    let (backend, mut allocator) = descriptor_allocator(capacity);
    let handles: Vec<DescriptorSetHandle> = (0..sets).map(|_| allocator.allocate_descriptor_set().unwrap()).collect();

    assert_eq!(allocator.pool_count(), pools);
    assert_eq!(backend.live_descriptor_pool_count(), pools);
    assert_eq!(allocator.used_count(), sets);
    assert!(handles.iter().all(|&set| allocator.is_in_use(set)));
}

#[test]
fn test_allocation_retried_once_in_new_pool() {
    let (backend, mut allocator) = descriptor_allocator(8);
    backend.inject_descriptor_pool_exhaustion(1);

    let set = allocator.allocate_descriptor_set().unwrap();
    assert!(allocator.is_in_use(set));
    assert_eq!(allocator.pool_count(), 2);
    assert_eq!(backend.stats().descriptor_pools_created, 2);
}

#[test]
fn test_second_failure_is_exhaustion() {
    let (backend, mut allocator) = descriptor_allocator(8);
    backend.inject_descriptor_pool_exhaustion(2);

    let err = allocator.allocate_descriptor_set().unwrap_err();
    assert!(matches!(err, FrameGraphError::DescriptorPoolExhausted { pools: 2 }));
    assert_eq!(allocator.used_count(), 0);

    // The grown pool serves the next request
    allocator.allocate_descriptor_set().unwrap();
    assert_eq!(allocator.pool_count(), 2);
}

#[test]
fn test_release_rejects_foreign_and_double_release() {
    let (_backend, mut allocator) = descriptor_allocator(4);
    let set = allocator.allocate_descriptor_set().unwrap();
    allocator.release_descriptor_set(set).unwrap();

    let err = allocator.release_descriptor_set(set).unwrap_err();
    assert!(matches!(err, FrameGraphError::InvalidHandle(raw) if raw == set.raw()));

    let foreign = DescriptorSetHandle::from_raw(0xdead);
    assert!(matches!(
        allocator.release_descriptor_set(foreign),
        Err(FrameGraphError::InvalidHandle(0xdead))
    ));
    assert_eq!(allocator.free_count(), 1);
}

#[test]
fn test_reinit_reuses_material_sets() {
    // Four sets per pool in the test registry; replaced materials hand their sets back
    let mut ctx = TestContext::new();
    ctx.engine.post_shader_load_init().unwrap();
    let pools = ctx.backend.live_descriptor_pool_count();
    let created = ctx.backend.stats().descriptor_pools_created;
    for _ in 0..8 {
        ctx.engine.post_shader_load_init().unwrap();
    }
    assert_eq!(ctx.backend.live_descriptor_pool_count(), pools);
    assert_eq!(ctx.backend.stats().descriptor_pools_created, created);
    ctx.assert_valid();
}
