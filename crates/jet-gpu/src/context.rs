//! The render device.
//!
//! [`RenderDevice`] owns everything the frame loop needs: the backend, the
//! selected queues, the swapchain, the frame semaphores and the frame
//! engine. It is constructed explicitly and passed to whoever draws; there
//! is no global device.

use crate::backend::GpuBackend;
use crate::device::{DeviceQueues, QueueSelection};
use crate::error::{GpuError, Result};
use crate::frame::{DrawRequest, FrameConfig, FrameEngine, FrameReport, FrameState, FrameTargets};
use crate::memory::{self, GraphicsBuffer};
use crate::swapchain::{rebuild_swapchain, Swapchain};
use crate::sync::FrameSemaphores;
use crate::vulkan::VulkanBackend;
use ash::vk;
use jet_core::constants;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::time::Duration;

/// Result of [`RenderDevice::draw_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was presented; the swapchain may have been rebuilt after it.
    Presented {
        image_index: u32,
        swapchain_rebuilt: bool,
    },
    /// The swapchain was out of date and has been rebuilt; nothing was drawn.
    Rebuilt,
    /// No image was available in time; nothing was drawn.
    Skipped,
}

/// Render device configuration.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Application name reported to the driver
    pub app_name: String,
    /// Enable the Khronos validation layer
    pub validation: bool,
    /// Extent used when the surface leaves the swapchain size open
    pub design_extent: vk::Extent2D,
    pub frame: FrameConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            app_name: constants::APP_NAME.to_string(),
            validation: cfg!(debug_assertions),
            design_extent: vk::Extent2D {
                width: constants::DESIGN_WIDTH,
                height: constants::DESIGN_HEIGHT,
            },
            frame: FrameConfig::default(),
        }
    }
}

/// Graphics device with its presentation state.
pub struct RenderDevice<B: GpuBackend> {
    backend: B,
    selection: QueueSelection,
    queues: DeviceQueues,
    swapchain: Option<Swapchain>,
    semaphores: FrameSemaphores,
    engine: FrameEngine,
    design_extent: vk::Extent2D,
    shut_down: bool,
}

impl<B: GpuBackend> RenderDevice<B> {
    /// Take over `backend`, retrieve the queues of `selection` and create
    /// the semaphores and the swapchain.
    pub fn new(backend: B, selection: QueueSelection, config: &DeviceConfig) -> Result<Self> {
        let queues = DeviceQueues {
            graphics: backend.queue(selection.family_index, selection.graphics_queue_index),
            present: backend.queue(selection.family_index, selection.present_queue_index),
        };

        let mut semaphores = FrameSemaphores::new(&backend)?;

        let swapchain = match rebuild_swapchain(&backend, config.design_extent, None) {
            Ok(swapchain) => swapchain,
            Err(e) => {
                semaphores.destroy(&backend);
                return Err(e);
            }
        };

        tracing::info!(
            "Render device ready: family {} ({} swapchain images)",
            selection.family_index,
            swapchain.images.len()
        );

        Ok(Self {
            backend,
            selection,
            queues,
            swapchain: Some(swapchain),
            semaphores,
            engine: FrameEngine::new(config.frame),
            design_extent: config.design_extent,
            shut_down: false,
        })
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The queue selection the device was created with.
    pub fn selection(&self) -> &QueueSelection {
        &self.selection
    }

    /// Graphics and present queues.
    pub fn queues(&self) -> DeviceQueues {
        self.queues
    }

    /// The current swapchain, if one exists.
    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    /// The frame semaphores.
    pub fn semaphores(&self) -> &FrameSemaphores {
        &self.semaphores
    }

    /// State of the frame protocol.
    pub fn frame_state(&self) -> FrameState {
        self.engine.state()
    }

    /// Number of frames presented so far.
    pub fn frames_presented(&self) -> u64 {
        self.engine.frames_presented()
    }

    /// Extent used when the surface leaves the swapchain size open.
    pub fn design_extent(&self) -> vk::Extent2D {
        self.design_extent
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down {
            return Err(GpuError::InvalidState("Render device is shut down".to_string()));
        }
        Ok(())
    }

    /// Draw and present one frame.
    ///
    /// Out-of-date and suboptimal swapchains are rebuilt automatically. A
    /// frame that fails after acquiring an image is abandoned and the
    /// swapchain rebuilt before the error is returned.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn draw_frame(&mut self, request: &DrawRequest<'_>) -> Result<FrameOutcome> {
        self.ensure_running()?;

        if self.semaphores.is_destroyed() {
            self.semaphores = FrameSemaphores::new(&self.backend)?;
        }
        if self.swapchain.is_none() {
            self.rebuild_swapchain()?;
        }
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("No swapchain".to_string()))?;

        let targets = FrameTargets {
            swapchain,
            semaphores: &self.semaphores,
            queues: self.queues,
        };
        let report = match self.engine.run(&self.backend, &targets, request) {
            Ok(report) => report,
            Err(e) => {
                self.recover_abandoned_frame();
                return Err(e);
            }
        };

        let outcome = match report {
            FrameReport::Presented { image_index, .. } => {
                let swapchain_rebuilt = report.needs_rebuild();
                if swapchain_rebuilt {
                    self.rebuild_swapchain()?;
                }
                FrameOutcome::Presented {
                    image_index,
                    swapchain_rebuilt,
                }
            }
            FrameReport::OutOfDate => {
                self.rebuild_swapchain()?;
                FrameOutcome::Rebuilt
            }
            FrameReport::TimedOut => FrameOutcome::Skipped,
        };

        Ok(outcome)
    }

    /// Give back the image of an abandoned frame by rebuilding the swapchain,
    /// replacing the semaphores first if one could not be unsignaled.
    fn recover_abandoned_frame(&mut self) {
        let Some(abandoned) = self.engine.take_abandoned() else {
            return;
        };

        if abandoned.semaphore_signaled {
            if let Err(e) = self.backend.wait_idle() {
                tracing::warn!("Wait before replacing semaphores failed: {e}");
            }
            self.semaphores.destroy(&self.backend);
            match FrameSemaphores::new(&self.backend) {
                Ok(semaphores) => self.semaphores = semaphores,
                Err(e) => tracing::warn!("Semaphore re-creation failed, retrying next frame: {e}"),
            }
        }

        if let Err(e) = self.rebuild_swapchain() {
            tracing::warn!("Swapchain rebuild after abandoned frame failed: {e}");
        }
    }

    /// Rebuild the swapchain against the current surface.
    pub fn rebuild_swapchain(&mut self) -> Result<()> {
        self.ensure_running()?;
        let previous = self.swapchain.take();
        self.swapchain = Some(rebuild_swapchain(&self.backend, self.design_extent, previous)?);
        Ok(())
    }

    /// Change the design extent and rebuild the swapchain.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.design_extent = vk::Extent2D { width, height };
        self.rebuild_swapchain()
    }

    /// Create a host-visible vertex buffer.
    pub fn create_buffer(&self, size: vk::DeviceSize) -> Result<GraphicsBuffer> {
        self.ensure_running()?;
        memory::create_buffer(&self.backend, size)
    }

    /// Copy `data` into `buffer`.
    pub fn upload(&self, buffer: &GraphicsBuffer, data: &[u8]) -> Result<()> {
        self.ensure_running()?;
        memory::upload(&self.backend, buffer, data)
    }

    /// Destroy a buffer created by this device. Calling this again is a no-op.
    pub fn destroy_buffer(&self, buffer: &mut GraphicsBuffer) {
        if let Err(e) = self.backend.wait_idle() {
            tracing::warn!("wait_idle before buffer destruction failed: {e}");
        }
        memory::destroy_buffer(&self.backend, buffer);
    }

    /// Block until the device is idle.
    pub fn wait_idle(&self) -> Result<()> {
        self.backend.wait_idle()
    }

    /// Release the swapchain, semaphores and cached command buffers.
    ///
    /// Runs automatically on drop. Calling it again is a no-op.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if let Err(e) = self.backend.wait_idle() {
            tracing::warn!("wait_idle during shutdown failed: {e}");
        }

        self.engine.release(&self.backend);
        if let Some(mut swapchain) = self.swapchain.take() {
            swapchain.destroy(&self.backend);
        }
        self.semaphores.destroy(&self.backend);

        tracing::info!(
            "Render device shut down after {} frames",
            self.engine.frames_presented()
        );
    }
}

impl<B: GpuBackend> Drop for RenderDevice<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for a Vulkan-backed [`RenderDevice`].
#[derive(Debug, Clone, Default)]
pub struct RenderDeviceBuilder {
    config: DeviceConfig,
}

impl RenderDeviceBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.config.validation = enable;
        self
    }

    /// Set the design extent.
    pub fn design_extent(mut self, width: u32, height: u32) -> Self {
        self.config.design_extent = vk::Extent2D { width, height };
        self
    }

    /// Set how long to wait for a swapchain image.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.frame.acquire_timeout = timeout;
        self
    }

    /// Set how many timeouts in a row count as device loss.
    pub fn max_acquire_timeouts(mut self, count: u32) -> Self {
        self.config.frame.max_acquire_timeouts = count.max(1);
        self
    }

    /// The configuration built so far.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Load Vulkan and create the device for `window`.
    ///
    /// # Safety
    /// The window must outlive the returned device.
    pub unsafe fn build<W>(self, window: &W) -> Result<RenderDevice<VulkanBackend>>
    where
        W: HasDisplayHandle + HasWindowHandle + ?Sized,
    {
        let (backend, selection) = unsafe { VulkanBackend::bootstrap(&self.config, window) }?;
        RenderDevice::new(backend, selection, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let builder = RenderDeviceBuilder::new();
        let config = builder.config();
        assert_eq!(config.app_name, "Tech Demo");
        assert_eq!(config.design_extent.width, 1000);
        assert_eq!(config.design_extent.height, 800);
        assert_eq!(config.frame.acquire_timeout, Duration::from_secs(1));
    }

    #[test]
    fn builder_overrides() {
        let builder = RenderDeviceBuilder::new()
            .app_name("Other")
            .validation(false)
            .design_extent(640, 480)
            .acquire_timeout(Duration::from_millis(250))
            .max_acquire_timeouts(0);
        let config = builder.config();
        assert_eq!(config.app_name, "Other");
        assert!(!config.validation);
        assert_eq!(config.design_extent.width, 640);
        assert_eq!(config.frame.acquire_timeout, Duration::from_millis(250));
        assert_eq!(config.frame.max_acquire_timeouts, 1);
    }
}
