//! IBL probe bake integration tests.
//!
//! Probes are baked out of band by the prefiltered environment and BRDF
//! lookup table task passes, once per probe.

mod common;

use glam::Vec3;
use rstest::rstest;

use common::TestContext;
use frame_graph_engine::backend::{ImageHandle, ImageLayout};
use frame_graph_engine::pass_names::{BRDF_PASS, PRENV_PASS, SKY_PASS};
use frame_graph_engine::render_graph::primitives::skybox_vertices;
use frame_graph_engine::render_graph::PassKind;
use frame_graph_engine::resources::mip_levels_for;
use frame_graph_engine::FrameGraphError;

/// Probe outputs: texture indices, image handles and base-level texels
fn probe_outputs(ctx: &TestContext, probe: u32) -> Vec<(u32, ImageHandle, Vec<u8>)> {
    let probe = ctx.engine.passes().probe(probe).unwrap();
    [probe.prefiltered_env_map(), probe.brdf_map()]
        .into_iter()
        .map(|index| {
            let image = ctx.engine.textures().texture(index).unwrap().handle();
            (index, image, ctx.backend.image_texels(image, 0, 0))
        })
        .collect()
}

fn assert_shader_readable(ctx: &TestContext, texture: u32) {
    let handle = ctx.engine.textures().texture(texture).unwrap().handle();
    let layouts = ctx.backend.image_layouts(handle);
    assert!(!layouts.is_empty());
    assert!(
        layouts.iter().all(|&layout| layout == ImageLayout::ShaderReadOnly),
        "layouts: {:?}",
        layouts
    );
}

#[test]
fn test_probe_bake_is_idempotent() {
    let mut ctx = TestContext::new();
    ctx.engine.post_shader_load_init().unwrap();
    let probe = ctx.engine.add_ibl_probe(Vec3::new(0.0, 2.0, 0.0)).unwrap();
    assert!(!ctx.engine.passes().probe(probe).unwrap().is_baked());

    let report = ctx.engine.update().unwrap();
    assert_eq!(report.probes_baked, 1);
    // Skybox geometry of the sky and prefilter passes
    assert_eq!(report.buffer_uploads, 2);
    assert!(ctx.engine.passes().probe(probe).unwrap().is_baked());
    let outputs = probe_outputs(&ctx, probe);

    let submissions = ctx.backend.submission_count();
    assert_eq!(ctx.engine.execute_ibl_passes().unwrap(), 0);
    assert_eq!(ctx.backend.submission_count(), submissions);
    assert_eq!(probe_outputs(&ctx, probe), outputs);

    let report = ctx.engine.update().unwrap();
    assert_eq!(report.probes_baked, 0);
    ctx.assert_valid();
}

#[test]
fn test_baked_maps_are_shader_readable() {
    let mut ctx = TestContext::new();
    ctx.engine.post_shader_load_init().unwrap();
    let probe = ctx.engine.add_ibl_probe(Vec3::ZERO).unwrap();
    ctx.engine.execute_ibl_passes().unwrap();

    let (env, brdf) = {
        let probe = ctx.engine.passes().probe(probe).unwrap();
        assert!(probe.irradiance_map().is_none());
        (probe.prefiltered_env_map(), probe.brdf_map())
    };

    let cube = ctx.engine.textures().texture(env).unwrap();
    assert!(cube.is_cube());
    assert_eq!(cube.mip_levels, mip_levels_for(8, 8));
    assert!(cube.sampler.is_some());
    assert_shader_readable(&ctx, env);

    let lut = ctx.engine.textures().texture(brdf).unwrap();
    assert_eq!((lut.width, lut.height), (8, 8));
    assert_shader_readable(&ctx, brdf);
    ctx.assert_valid();
}

/// Pending probes bake in one submission: env then BRDF per probe, each
/// stage waiting on the one before it.
#[rstest]
#[case::single(1)]
#[case::pair(2)]
#[case::several(4)]
fn test_pending_probes_chain_in_one_submission(#[case] count: usize) {
    let mut ctx = TestContext::new();
    ctx.engine.post_shader_load_init().unwrap();
    for i in 0..count {
        ctx.engine.add_ibl_probe(Vec3::splat(i as f32)).unwrap();
    }

    let submissions = ctx.backend.submission_count();
    let before = ctx.batch_count();
    assert_eq!(ctx.engine.execute_ibl_passes().unwrap(), count);
    assert_eq!(ctx.backend.submission_count(), submissions + 1);

    let batches = ctx.batches_since(before);
    assert_eq!(batches.len(), count * 2);
    assert!(batches[0].wait_semaphores.is_empty());
    for pair in batches.windows(2) {
        assert_eq!(pair[1].wait_semaphores, pair[0].signal_semaphores);
    }
    assert!(batches[count * 2 - 1].signal_semaphores.is_empty());
    ctx.assert_valid();
}

#[test]
fn test_only_new_probes_are_baked() {
    let mut ctx = TestContext::new();
    ctx.engine.post_shader_load_init().unwrap();
    ctx.engine.add_ibl_probe(Vec3::ZERO).unwrap();
    assert_eq!(ctx.engine.execute_ibl_passes().unwrap(), 1);

    let second = ctx.engine.add_ibl_probe(Vec3::X).unwrap();
    let before = ctx.batch_count();
    assert_eq!(ctx.engine.execute_ibl_passes().unwrap(), 1);
    assert_eq!(ctx.batches_since(before).len(), 2);
    assert_eq!(ctx.engine.passes().probe_count(), 2);
    assert!(ctx.engine.passes().probe(second).unwrap().is_baked());

    // Each probe owns its maps
    let passes = ctx.engine.passes();
    let first = passes.probe(0).unwrap();
    let second = passes.probe(second).unwrap();
    assert_ne!(first.prefiltered_env_map(), second.prefiltered_env_map());
    assert_ne!(first.brdf_map(), second.brdf_map());
}

#[test]
fn test_probes_wait_for_shader_load() {
    let mut ctx = TestContext::new();
    let probe = ctx.engine.add_ibl_probe(Vec3::ZERO).unwrap();
    let submissions = ctx.backend.submission_count();
    assert_eq!(ctx.engine.execute_ibl_passes().unwrap(), 0);
    assert_eq!(ctx.backend.submission_count(), submissions);
    assert!(!ctx.engine.passes().probe(probe).unwrap().is_baked());

    // Frames keep running while the probe waits
    assert_eq!(ctx.engine.update().unwrap().probes_baked, 0);

    ctx.engine.post_shader_load_init().unwrap();
    assert_eq!(ctx.engine.execute_ibl_passes().unwrap(), 1);
    assert!(ctx.engine.passes().probe(probe).unwrap().is_baked());
    let env = ctx.engine.passes().probe(probe).unwrap().prefiltered_env_map();
    assert_shader_readable(&ctx, env);
    ctx.assert_valid();
}

#[test]
fn test_bake_flushes_queued_geometry() {
    let mut ctx = TestContext::new();
    ctx.engine.post_shader_load_init().unwrap();
    assert!(ctx.engine.buffers().pending_uploads() > 0);
    ctx.engine.add_ibl_probe(Vec3::ZERO).unwrap();

    assert_eq!(ctx.engine.execute_ibl_passes().unwrap(), 1);
    assert_eq!(ctx.engine.buffers().pending_uploads(), 0);
    assert_eq!(ctx.engine.allocator().live_staging_count(), 0);

    let vertex_buffer = match ctx.engine.passes().pass(SKY_PASS).unwrap().kind() {
        PassKind::Sky(sky) => sky.vertex_buffer().unwrap(),
        _ => unreachable!("sky pass kind"),
    };
    let handle = ctx.engine.buffers().buffer(vertex_buffer).unwrap();
    let contents = ctx.backend.buffer_contents(handle).unwrap();
    assert_eq!(contents, bytemuck::cast_slice::<[f32; 3], u8>(&skybox_vertices()));
    ctx.assert_valid();
}

#[test]
fn test_frames_render_after_bake() {
    let mut ctx = TestContext::new();
    ctx.engine.post_shader_load_init().unwrap();
    ctx.engine.add_ibl_probe(Vec3::ZERO).unwrap();
    for _ in 0..4 {
        ctx.engine.update().unwrap();
    }
    assert_eq!(ctx.engine.frame_count(), 4);
    ctx.assert_valid();
}

#[test]
fn test_unknown_probe() {
    let ctx = TestContext::new();
    assert!(matches!(ctx.engine.passes().probe(3), Err(FrameGraphError::UnknownProbe(3))));
    assert_eq!(ctx.engine.passes().probe_count(), 0);
}

#[test]
fn test_task_passes_registered() {
    let ctx = TestContext::new();
    let passes = ctx.engine.passes();
    for name in [PRENV_PASS, BRDF_PASS] {
        let pass = passes.task_pass(name).unwrap();
        assert!(pass.is_task());
        assert!(pass.core().render_pass.is_some());
    }
    assert_eq!(passes.pass_count(), 3);
}
