//! Swapchain ownership and the acquire / present half of the frame loop
//!
//! The swapchain owns the presentable images and the two semaphores that
//! bracket a frame: `image_available` is signaled by acquisition and waited
//! on by the first pass, `render_finished` is signaled by the last pass and
//! waited on by presentation.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::FrameGraphConfig;
use crate::error::{FrameGraphError, FrameResult};

/// Where the swapchain is within the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    Ready,
    Acquiring,
    Rendering,
    Presenting,
    Recreating,
}

impl SwapchainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapchainState::Ready => "ready",
            SwapchainState::Acquiring => "acquiring",
            SwapchainState::Rendering => "rendering",
            SwapchainState::Presenting => "presenting",
            SwapchainState::Recreating => "recreating",
        }
    }
}

/// What the passes need to know about the presentable images
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainTargets {
    pub format: Format,
    pub extent: Extent2d,
    pub image_views: Vec<ImageViewHandle>,
}

impl SwapchainTargets {
    pub fn image_count(&self) -> u32 {
        self.image_views.len() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Image(u32),
    /// The surface changed, the swapchain must be rebuilt before rendering
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    NeedsRecreate,
}

pub struct Swapchain {
    desc: SwapchainDesc,
    info: Option<SwapchainInfo>,
    image_available: Option<SemaphoreHandle>,
    render_finished: Option<SemaphoreHandle>,
    state: SwapchainState,
    current_image: Option<u32>,
    recreate_count: u64,
}

impl Swapchain {
    pub fn new(device: &dyn GpuDevice, config: &FrameGraphConfig) -> FrameResult<Self> {
        let mut swapchain = Self {
            desc: SwapchainDesc {
                extent: Extent2d::new(config.width, config.height),
                vsync: config.vsync,
                preferred_format: config.swapchain_format,
            },
            info: None,
            image_available: None,
            render_finished: None,
            state: SwapchainState::Ready,
            current_image: None,
            recreate_count: 0,
        };
        if let Err(e) = swapchain.create(device) {
            swapchain.destroy(device);
            return Err(e);
        }
        Ok(swapchain)
    }

    fn create(&mut self, device: &dyn GpuDevice) -> FrameResult<()> {
        self.image_available = Some(device.create_semaphore()?);
        self.render_finished = Some(device.create_semaphore()?);
        let info = device.create_swapchain(&self.desc)?;
        log::info!(
            "Swapchain created: {}x{} {:?}, {} images",
            info.extent.width,
            info.extent.height,
            info.format,
            info.image_count()
        );
        self.info = Some(info);
        self.state = SwapchainState::Ready;
        self.current_image = None;
        Ok(())
    }

    fn info(&self) -> FrameResult<&SwapchainInfo> {
        self.info.as_ref().ok_or(FrameGraphError::InvalidPassState {
            pass: "swapchain".to_string(),
            state: self.state.as_str(),
            operation: "use without a live swapchain",
        })
    }

    fn semaphore(slot: Option<SemaphoreHandle>) -> FrameResult<SemaphoreHandle> {
        slot.ok_or_else(|| {
            BackendError::UnknownHandle {
                kind: "swapchain semaphore",
                id: 0,
            }
            .into()
        })
    }

    pub fn targets(&self) -> FrameResult<SwapchainTargets> {
        let info = self.info()?;
        Ok(SwapchainTargets {
            format: info.format,
            extent: info.extent,
            image_views: info.image_views.clone(),
        })
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn image_count(&self) -> u32 {
        self.info.as_ref().map_or(0, SwapchainInfo::image_count)
    }

    pub fn extent(&self) -> Option<Extent2d> {
        self.info.as_ref().map(|info| info.extent)
    }

    pub fn format(&self) -> Option<Format> {
        self.info.as_ref().map(|info| info.format)
    }

    pub fn image_available(&self) -> FrameResult<SemaphoreHandle> {
        Self::semaphore(self.image_available)
    }

    pub fn render_finished(&self) -> FrameResult<SemaphoreHandle> {
        Self::semaphore(self.render_finished)
    }

    /// Image acquired by the frame in flight
    pub fn current_image(&self) -> Option<u32> {
        self.current_image
    }

    /// Number of rebuilds since creation
    pub fn recreate_count(&self) -> u64 {
        self.recreate_count
    }

    /// Resize target used when the surface leaves the extent to the application
    pub fn set_requested_extent(&mut self, extent: Extent2d) {
        self.desc.extent = extent;
    }

    pub fn acquire(&mut self, device: &dyn GpuDevice) -> FrameResult<AcquireOutcome> {
        let handle = self.info()?.handle;
        let signal = self.image_available()?;
        self.state = SwapchainState::Acquiring;
        match device.acquire_next_image(handle, signal) {
            Ok(index) => {
                self.current_image = Some(index);
                self.state = SwapchainState::Rendering;
                Ok(AcquireOutcome::Image(index))
            }
            Err(BackendError::OutOfDate) => {
                log::debug!("Swapchain out of date on acquire");
                self.state = SwapchainState::Recreating;
                Ok(AcquireOutcome::OutOfDate)
            }
            Err(e) => {
                self.state = SwapchainState::Ready;
                Err(e.into())
            }
        }
    }

    /// Present the acquired image once `render_finished` is signaled.
    /// Any failure short of a lost device asks for a rebuild.
    pub fn present(&mut self, device: &dyn GpuDevice) -> FrameResult<PresentOutcome> {
        let handle = self.info()?.handle;
        let wait = self.render_finished()?;
        let index = self.current_image.ok_or(FrameGraphError::InvalidPassState {
            pass: "swapchain".to_string(),
            state: self.state.as_str(),
            operation: "present without an acquired image",
        })?;
        self.state = SwapchainState::Presenting;
        match device.queue_present(handle, index, wait) {
            Ok(()) => {
                self.state = SwapchainState::Ready;
                Ok(PresentOutcome::Presented)
            }
            Err(BackendError::DeviceLost) => Err(BackendError::DeviceLost.into()),
            Err(e) => {
                log::warn!("Present failed, recreating swapchain: {}", e);
                self.state = SwapchainState::Recreating;
                Ok(PresentOutcome::NeedsRecreate)
            }
        }
    }

    /// Destroy and create again at the current surface size.
    /// The caller must have drained the device.
    pub fn rebuild(&mut self, device: &dyn GpuDevice) -> FrameResult<()> {
        self.state = SwapchainState::Recreating;
        self.destroy(device);
        self.create(device)?;
        self.recreate_count += 1;
        Ok(())
    }

    pub fn destroy(&mut self, device: &dyn GpuDevice) {
        if let Some(info) = self.info.take() {
            device.destroy_swapchain(info.handle);
        }
        for semaphore in [self.image_available.take(), self.render_finished.take()].into_iter().flatten() {
            device.destroy_semaphore(semaphore);
        }
        self.current_image = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn swapchain(backend: &DummyBackend) -> Swapchain {
        Swapchain::new(backend, &FrameGraphConfig::default()).unwrap()
    }

    #[test]
    fn test_targets_follow_surface() {
        let backend = DummyBackend::with_surface(Extent2d::new(800, 600), 3);
        let swapchain = swapchain(&backend);
        let targets = swapchain.targets().unwrap();
        assert_eq!(targets.extent, Extent2d::new(800, 600));
        assert_eq!(targets.image_count(), 3);
        assert_eq!(swapchain.state(), SwapchainState::Ready);
    }

    #[test]
    fn test_acquire_out_of_date() {
        let backend = DummyBackend::with_surface(Extent2d::new(64, 64), 2);
        let mut swapchain = swapchain(&backend);
        backend.inject_out_of_date(1);
        assert_eq!(swapchain.acquire(&backend).unwrap(), AcquireOutcome::OutOfDate);
        assert_eq!(swapchain.state(), SwapchainState::Recreating);
        assert_eq!(swapchain.current_image(), None);
    }

    #[test]
    fn test_present_without_acquire_is_rejected() {
        let backend = DummyBackend::with_surface(Extent2d::new(64, 64), 2);
        let mut swapchain = swapchain(&backend);
        assert!(matches!(
            swapchain.present(&backend),
            Err(FrameGraphError::InvalidPassState { .. })
        ));
    }

    #[test]
    fn test_rebuild_picks_up_new_extent() {
        let backend = DummyBackend::with_surface(Extent2d::new(64, 64), 2);
        let mut swapchain = swapchain(&backend);
        backend.set_surface(Extent2d::new(128, 32), 3);
        swapchain.rebuild(&backend).unwrap();
        assert_eq!(swapchain.extent(), Some(Extent2d::new(128, 32)));
        assert_eq!(swapchain.image_count(), 3);
        assert_eq!(swapchain.recreate_count(), 1);
        swapchain.destroy(&backend);
        assert_eq!(backend.live_semaphore_count(), 0);
    }
}
