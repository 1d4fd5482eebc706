//! Frame loop integration tests.
//!
//! These tests drive [`Engine::render_frame`] against the dummy device and
//! check the submissions it produces, the fence backpressure between CPU and
//! GPU, and swapchain recreation.
//!
//! ```bash
//! cargo test --test frame_loop_tests
//! ```

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rstest::rstest;

use common::{test_config, CountingOverlay, FailingOverlay, TestContext, SURFACE};
use frame_graph_engine::backend::{Extent2d, GpuDevice, PipelineStage};
use frame_graph_engine::pass_names::{FRAME_PASS, PRENV_PASS, SKY_PASS, UI_PASS};
use frame_graph_engine::render_graph::{PassKind, UiPass};
use frame_graph_engine::{FrameGraphConfig, FrameGraphError, FrameStatus, World};

const OVERLAY_PASS: &str = "overlayPass";

fn context_with_passes(sky: bool, ui: bool, extra: bool) -> TestContext {
    let config = FrameGraphConfig {
        enable_sky_pass: sky,
        enable_ui_pass: ui,
        ..test_config()
    };
    let mut ctx = TestContext::with_config(SURFACE, 3, config);
    if extra {
        ctx.engine
            .add_pass(OVERLAY_PASS, PassKind::Ui(UiPass::new()))
            .expect("overlay pass");
    }
    ctx
}

// ============================================================================
// Submission chain
// ============================================================================

/// The per-frame passes of one frame go out as one semaphore chain:
/// the first waits on acquisition, each later one on its predecessor,
/// and only the last signals the semaphore presentation waits on.
#[rstest]
#[case::frame_only(false, false, false, 1)]
#[case::frame_and_sky(true, false, false, 2)]
#[case::builtin(true, true, false, 3)]
#[case::with_overlay(true, true, true, 4)]
fn test_submission_chain_links_passes(
    #[case] sky: bool,
    #[case] ui: bool,
    #[case] extra: bool,
    #[case] expected: usize,
) {
    let mut ctx = context_with_passes(sky, ui, extra);
    assert_eq!(ctx.engine.passes().pass_count(), expected);

    let submits_before = ctx.backend.submission_count();
    let before = ctx.batch_count();
    let status = ctx.engine.render_frame().unwrap();
    assert_eq!(status, FrameStatus::Presented { image_index: 0 });
    assert_eq!(ctx.backend.submission_count(), submits_before + 1);

    let batches = ctx.batches_since(before);
    assert_eq!(batches.len(), expected);
    assert_eq!(batches[0].wait_semaphores, vec![ctx.image_available()]);
    assert_eq!(batches[0].wait_stages, vec![PipelineStage::COLOR_ATTACHMENT_OUTPUT]);
    for pair in batches.windows(2) {
        assert_eq!(pair[1].wait_semaphores, pair[0].signal_semaphores);
    }
    assert_eq!(batches[expected - 1].signal_semaphores, vec![ctx.render_finished()]);
    for batch in &batches {
        assert_eq!(batch.command_buffers.len(), 1);
        assert_eq!(batch.signal_semaphores.len(), 1);
    }

    let signaled: HashSet<_> = batches.iter().map(|b| b.signal_semaphores[0]).collect();
    assert_eq!(signaled.len(), expected);
    ctx.assert_valid();
}

#[test]
fn test_pass_order_and_final_pass() {
    let ctx = context_with_passes(true, true, true);
    assert_eq!(
        ctx.engine.passes().pass_names(),
        vec![FRAME_PASS, SKY_PASS, UI_PASS, OVERLAY_PASS]
    );
    // Only the appended pass hands the image to presentation
    let frame = ctx.engine.passes().pass(FRAME_PASS).unwrap();
    assert!(frame.semaphore().is_some());
    assert_eq!(frame.framebuffers().len(), 3);
}

#[test]
fn test_frame_pass_waits_on_depth_tests() {
    let mut ctx = context_with_passes(true, false, false);
    let before = ctx.batch_count();
    ctx.engine.render_frame().unwrap();

    let batches = ctx.batches_since(before);
    let stage = batches[1].wait_stages[0];
    assert!(stage.contains(PipelineStage::COLOR_ATTACHMENT_OUTPUT));
    assert!(stage.contains(PipelineStage::EARLY_FRAGMENT_TESTS));
}

// ============================================================================
// Frame loop
// ============================================================================

#[test]
fn test_frames_cycle_through_images() {
    let mut ctx = TestContext::new();
    let indices: Vec<u32> = (0..6)
        .map(|_| match ctx.engine.render_frame().unwrap() {
            FrameStatus::Presented { image_index } => image_index,
            FrameStatus::Recreated => panic!("unexpected swapchain recreation"),
        })
        .collect();

    assert_eq!(indices, vec![0, 1, 2, 0, 1, 2]);
    assert_eq!(ctx.engine.frame_count(), 6);
    assert_eq!(ctx.backend.stats().presents, 6);
    ctx.assert_valid();
}

#[test]
fn test_update_reports_idle_frame() {
    let mut ctx = TestContext::new();
    let report = ctx.engine.update().unwrap();
    assert_eq!(report.buffer_uploads, 0);
    assert_eq!(report.texture_uploads, 0);
    assert_eq!(report.probes_baked, 0);
    assert_eq!(report.frame, FrameStatus::Presented { image_index: 0 });
}

#[test]
fn test_world_recorded_once_per_image() {
    let mut ctx = TestContext::new();
    for _ in 0..6 {
        ctx.engine.render_frame().unwrap();
    }
    assert_eq!(ctx.world.recorded(), 3);

    ctx.engine.world_mut().mark_dirty();
    ctx.engine.render_frame().unwrap();
    assert_eq!(ctx.world.recorded(), 4);
}

#[test]
fn test_ui_overlay_draws_every_frame() {
    let mut ctx = TestContext::new();
    let draws = Arc::new(AtomicU64::new(0));
    ctx.engine.set_ui_overlay(Box::new(CountingOverlay { draws: draws.clone() }));

    for _ in 0..4 {
        ctx.engine.render_frame().unwrap();
    }
    assert_eq!(draws.load(Ordering::SeqCst), 4);
}

/// A pass failing to record leaves the image fence signaled, so later
/// waits on it (here the teardown) still return.
#[test]
fn test_failed_recording_keeps_fence_signaled() {
    let mut ctx = TestContext::new();
    ctx.engine.set_ui_overlay(Box::new(FailingOverlay));
    let submissions = ctx.backend.submission_count();

    let err = ctx.engine.render_frame().unwrap_err();
    assert!(matches!(err, FrameGraphError::MissingMaterial(_)));
    assert_eq!(ctx.backend.submission_count(), submissions);

    let fence = ctx.engine.passes().fence_at(0).unwrap();
    assert!(ctx.backend.is_fence_signaled(fence).unwrap());
    ctx.engine.destroy().unwrap();
    assert_eq!(ctx.backend.live_fence_count(), 0);
}

/// With two images and no GPU progress, the third frame must wait for the
/// fence of image 0 and only proceeds once that submission retires.
#[test]
fn test_fence_bounds_frames_in_flight() {
    let mut ctx = TestContext::with_surface(SURFACE, 2);
    ctx.backend.set_auto_signal(false);

    assert_eq!(
        ctx.engine.render_frame().unwrap(),
        FrameStatus::Presented { image_index: 0 }
    );
    assert_eq!(
        ctx.engine.render_frame().unwrap(),
        FrameStatus::Presented { image_index: 1 }
    );
    assert_eq!(ctx.backend.pending_submission_count(), 2);

    let frame_done = Arc::new(AtomicBool::new(false));
    let released = Arc::new(AtomicBool::new(false));
    let gpu = {
        let backend = ctx.backend.clone();
        let frame_done = frame_done.clone();
        let released = released.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            assert!(!frame_done.load(Ordering::SeqCst), "frame ran ahead of its fence");
            released.store(true, Ordering::SeqCst);
            assert!(backend.complete_next_submission());
        })
    };

    let status = ctx.engine.render_frame().unwrap();
    frame_done.store(true, Ordering::SeqCst);
    gpu.join().expect("gpu thread");

    assert!(released.load(Ordering::SeqCst));
    assert_eq!(status, FrameStatus::Presented { image_index: 0 });
    assert_eq!(ctx.backend.pending_submission_count(), 2);

    ctx.backend.complete_all_submissions();
    ctx.backend.set_auto_signal(true);
    ctx.assert_valid();
}

// ============================================================================
// Swapchain recreation
// ============================================================================

#[test]
fn test_out_of_date_acquire_recreates() {
    let mut ctx = TestContext::new();
    ctx.backend.inject_out_of_date(1);

    assert_eq!(ctx.engine.render_frame().unwrap(), FrameStatus::Recreated);
    assert_eq!(ctx.engine.swapchain().recreate_count(), 1);
    assert_eq!(ctx.engine.frame_count(), 0);
    assert_eq!(ctx.world.freed(), 1);
    assert_eq!(ctx.world.created(), 2);

    assert_eq!(
        ctx.engine.render_frame().unwrap(),
        FrameStatus::Presented { image_index: 0 }
    );
    ctx.assert_valid();
}

#[rstest]
#[case::grow(Extent2d::new(1024, 768), 3)]
#[case::fewer_images(Extent2d::new(640, 480), 2)]
#[case::more_images(Extent2d::new(1920, 1080), 4)]
fn test_surface_change_rebuilds_targets(#[case] extent: Extent2d, #[case] image_count: u32) {
    let mut ctx = TestContext::new();
    ctx.engine.render_frame().unwrap();
    ctx.backend.set_surface(extent, image_count);

    assert_eq!(ctx.engine.render_frame().unwrap(), FrameStatus::Recreated);
    assert_eq!(ctx.engine.swapchain().extent(), Some(extent));
    assert_eq!(ctx.engine.swapchain().image_count(), image_count);
    assert_eq!(ctx.engine.passes().fence_count(), image_count as usize);
    assert_eq!(ctx.engine.passes().targets().map(|t| t.extent), Some(extent));
    assert_eq!(ctx.world.last_image_count(), u64::from(image_count));

    for name in ctx.engine.passes().pass_names() {
        let pass = ctx.engine.passes().pass(name).unwrap();
        assert_eq!(pass.framebuffers().len(), image_count as usize, "{}", name);
        for &framebuffer in pass.framebuffers() {
            let desc = ctx.backend.framebuffer_desc(framebuffer).unwrap();
            assert_eq!(desc.extent, extent, "{}", name);
        }
    }

    let recorded = ctx.world.recorded();
    let indices: Vec<FrameStatus> = (0..image_count).map(|_| ctx.engine.render_frame().unwrap()).collect();
    let expected: Vec<FrameStatus> = (0..image_count)
        .map(|image_index| FrameStatus::Presented { image_index })
        .collect();
    assert_eq!(indices, expected);
    assert_eq!(ctx.world.recorded(), recorded + u64::from(image_count));
    ctx.assert_valid();
}

#[test]
fn test_present_failure_recreates() {
    let mut ctx = TestContext::new();
    ctx.backend.inject_present_failures(1);

    assert_eq!(ctx.engine.render_frame().unwrap(), FrameStatus::Recreated);
    assert_eq!(ctx.engine.swapchain().recreate_count(), 1);
    assert_eq!(ctx.engine.frame_count(), 0);

    assert_eq!(
        ctx.engine.render_frame().unwrap(),
        FrameStatus::Presented { image_index: 0 }
    );
    assert_eq!(ctx.engine.frame_count(), 1);
}

#[test]
fn test_recreation_keeps_task_passes() {
    let mut ctx = TestContext::new();
    let prenv = ctx.engine.passes().task_pass(PRENV_PASS).unwrap().core().render_pass;
    ctx.backend.inject_out_of_date(1);
    ctx.engine.render_frame().unwrap();

    let after = ctx.engine.passes().task_pass(PRENV_PASS).unwrap().core().render_pass;
    assert_eq!(prenv, after);
}

// ============================================================================
// Registration errors
// ============================================================================

#[test]
fn test_unknown_pass_lookup() {
    let ctx = TestContext::new();
    let passes = ctx.engine.passes();

    assert!(matches!(passes.pass("bogusPass"), Err(FrameGraphError::UnknownPass(name)) if name == "bogusPass"));
    assert!(matches!(passes.task_pass(FRAME_PASS), Err(FrameGraphError::UnknownPass(_))));
    assert!(passes.task_pass(PRENV_PASS).unwrap().is_task());
    assert!(!passes.pass_names().contains(&PRENV_PASS));
}

#[test]
fn test_duplicate_pass_rejected() {
    let mut ctx = TestContext::new();
    let err = ctx
        .engine
        .add_pass(UI_PASS, PassKind::Ui(UiPass::new()))
        .unwrap_err();
    assert!(matches!(err, FrameGraphError::DuplicatePass(name) if name == UI_PASS));
    assert_eq!(ctx.engine.passes().pass_count(), 3);
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn test_teardown_releases_device_objects() {
    let mut ctx = TestContext::new();
    ctx.engine.post_shader_load_init().unwrap();
    ctx.engine.add_ibl_probe(glam::Vec3::ZERO).unwrap();
    for _ in 0..3 {
        ctx.engine.update().unwrap();
    }

    ctx.engine.destroy().unwrap();
    // A second call is a no-op
    ctx.engine.destroy().unwrap();

    let backend = ctx.backend.clone();
    drop(ctx);
    assert_eq!(backend.live_buffer_count(), 0);
    assert_eq!(backend.live_image_count(), 0);
    assert_eq!(backend.live_framebuffer_count(), 0);
    assert_eq!(backend.live_semaphore_count(), 0);
    assert_eq!(backend.live_fence_count(), 0);
    assert_eq!(backend.live_descriptor_pool_count(), 0);
}
