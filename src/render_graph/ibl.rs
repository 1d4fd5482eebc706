//! Image-based lighting probes

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::brdf_pass::BrdfLutResources;
use crate::render_graph::prenv_pass::EnvProbeResources;
use crate::resources::TextureIndex;
use glam::Vec3;

/// Index of a probe registered with the render pass manager
pub type ProbeIndex = u32;

/// A probe with its own bake resources; outputs are usable once baked
pub struct IblProbe {
    pub position: Vec3,
    pub(crate) env: EnvProbeResources,
    pub(crate) brdf: BrdfLutResources,
    pub(crate) baked: bool,
}

impl IblProbe {
    pub fn is_baked(&self) -> bool {
        self.baked
    }

    pub fn prefiltered_env_map(&self) -> TextureIndex {
        self.env.prefiltered
    }

    pub fn brdf_map(&self) -> TextureIndex {
        self.brdf.lut
    }

    /// Irradiance is not baked separately
    pub fn irradiance_map(&self) -> Option<TextureIndex> {
        None
    }
}

/// Submissions baking `probes` in order. Each env bake signals its
/// semaphore for the BRDF bake of the same probe; each BRDF bake but the
/// last signals the env bake of the next probe.
pub fn probe_submissions(probes: &[&IblProbe]) -> Vec<SubmitInfo> {
    let stage = PipelineStage::COLOR_ATTACHMENT_OUTPUT;
    let mut submits = Vec::with_capacity(probes.len() * 2);
    let mut previous: Option<SemaphoreHandle> = None;

    for (i, probe) in probes.iter().enumerate() {
        let has_next = i + 1 < probes.len();
        submits.push(SubmitInfo {
            wait_semaphores: previous.into_iter().collect(),
            wait_stages: previous.map(|_| stage).into_iter().collect(),
            command_buffers: vec![probe.env.command_buffer()],
            signal_semaphores: vec![probe.env.semaphore()],
        });
        submits.push(SubmitInfo {
            wait_semaphores: vec![probe.env.semaphore()],
            wait_stages: vec![stage],
            command_buffers: vec![probe.brdf.command_buffer()],
            signal_semaphores: if has_next { vec![probe.brdf.semaphore()] } else { Vec::new() },
        });
        previous = has_next.then(|| probe.brdf.semaphore());
    }
    submits
}
