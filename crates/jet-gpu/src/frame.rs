//! The per-frame acquire / record / submit / present protocol.
//!
//! Exactly one frame is in flight at a time. A frame moves through
//! [`FrameState`] in a fixed order and always ends back in
//! [`FrameState::Idle`]: whatever was created for the frame is released
//! after the queue drains, whether the frame succeeded or not.

use crate::backend::{FramePresentation, FrameSubmission, GpuBackend};
use crate::command::{clear_sequence, geometry_sequence, GeometryTargets, GpuCommand, GEOMETRY_CLEAR_COLOR};
use crate::device::DeviceQueues;
use crate::error::{GpuError, Result};
use crate::memory::GraphicsBuffer;
use crate::pipeline::{FrameResources, ShaderProgram};
use crate::swapchain::{classify_acquire, classify_present, AcquireOutcome, Swapchain, SwapchainStatus};
use crate::sync::FrameSemaphores;
use ash::vk;
use std::time::Duration;

/// How long to wait for a swapchain image before skipping the frame.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(1);

/// Consecutive acquire timeouts after which the device is considered lost.
pub const DEFAULT_MAX_ACQUIRE_TIMEOUTS: u32 = 10;

/// Where the frame currently is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameState {
    Idle,
    Acquired,
    Recording,
    Submitted,
    Presented,
}

impl FrameState {
    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Any state may fall back to `Idle`, which is how a failed or
    /// abandoned frame is cleaned up.
    pub fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Acquired)
                | (Self::Acquired, Self::Recording)
                | (Self::Recording, Self::Submitted)
                | (Self::Submitted, Self::Presented)
                | (_, Self::Idle)
        )
    }
}

/// Geometry drawn by a [`DrawRequest::Geometry`] frame.
#[derive(Debug, Clone, Copy)]
pub struct GeometryPass<'a> {
    pub program: &'a ShaderProgram,
    pub vertex_buffer: &'a GraphicsBuffer,
    pub vertex_count: u32,
    pub topology: vk::PrimitiveTopology,
    pub clear_color: [f32; 4],
}

impl<'a> GeometryPass<'a> {
    /// A triangle-strip pass with the default clear colour.
    pub fn strip(program: &'a ShaderProgram, vertex_buffer: &'a GraphicsBuffer, vertex_count: u32) -> Self {
        Self {
            program,
            vertex_buffer,
            vertex_count,
            topology: vk::PrimitiveTopology::TRIANGLE_STRIP,
            clear_color: GEOMETRY_CLEAR_COLOR,
        }
    }

    /// Draw as a triangle list instead.
    pub fn with_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }
}

/// What a frame draws.
#[derive(Debug, Clone, Copy)]
pub enum DrawRequest<'a> {
    /// Clear the acquired image with a colour depending on its index.
    ClearColor,
    /// Draw a vertex buffer inside a render pass.
    Geometry(GeometryPass<'a>),
}

/// Objects a frame runs against.
#[derive(Debug, Clone, Copy)]
pub struct FrameTargets<'a> {
    pub swapchain: &'a Swapchain,
    pub semaphores: &'a FrameSemaphores,
    pub queues: DeviceQueues,
}

/// What happened to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameReport {
    /// The frame was presented.
    Presented {
        image_index: u32,
        /// Acquire reported the swapchain as suboptimal
        suboptimal_acquire: bool,
        status: SwapchainStatus,
    },
    /// Acquire reported the swapchain out of date; nothing was drawn.
    OutOfDate,
    /// No image was available in time; the frame was skipped.
    TimedOut,
}

impl FrameReport {
    /// Whether the swapchain should be rebuilt before the next frame.
    pub fn needs_rebuild(&self) -> bool {
        match *self {
            Self::Presented {
                suboptimal_acquire,
                status,
                ..
            } => suboptimal_acquire || status.needs_rebuild(),
            Self::OutOfDate => true,
            Self::TimedOut => false,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    pub acquire_timeout: Duration,
    pub max_acquire_timeouts: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            max_acquire_timeouts: DEFAULT_MAX_ACQUIRE_TIMEOUTS,
        }
    }
}

/// Left behind by a frame that failed after its image was acquired.
///
/// The image was never presented, so the swapchain has to be rebuilt to get
/// it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbandonedFrame {
    /// The frame's semaphore could not be waited on and is still signaled
    pub semaphore_signaled: bool,
}

/// Per-frame objects released during cleanup.
#[derive(Debug, Default)]
struct FrameScratch {
    command_buffer: Option<vk::CommandBuffer>,
    resources: FrameResources,
    /// Semaphore signaled by this frame that nothing has waited on yet
    unwaited: Option<vk::Semaphore>,
}

/// Drives one frame at a time through the protocol.
#[derive(Debug)]
pub struct FrameEngine {
    state: FrameState,
    config: FrameConfig,
    /// Command buffer of the last clear frame, freed when the next clear
    /// frame starts or when the engine is released
    clear_command_buffer: Option<vk::CommandBuffer>,
    consecutive_timeouts: u32,
    frames_presented: u64,
    abandoned: Option<AbandonedFrame>,
}

impl FrameEngine {
    /// Create an idle engine.
    pub fn new(config: FrameConfig) -> Self {
        Self {
            state: FrameState::Idle,
            config,
            clear_command_buffer: None,
            consecutive_timeouts: 0,
            frames_presented: 0,
            abandoned: None,
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Engine configuration.
    pub fn config(&self) -> FrameConfig {
        self.config
    }

    /// Number of frames presented so far.
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// The cached clear-path command buffer, if any.
    pub fn cached_clear_command_buffer(&self) -> Option<vk::CommandBuffer> {
        self.clear_command_buffer
    }

    /// Take the record of the last frame that failed after acquire.
    pub fn take_abandoned(&mut self) -> Option<AbandonedFrame> {
        self.abandoned.take()
    }

    fn advance(&mut self, next: FrameState) -> Result<()> {
        if !self.state.can_transition(next) {
            return Err(GpuError::InvalidState(format!(
                "Frame cannot move from {:?} to {next:?}",
                self.state
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Run one complete frame.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn run<B: GpuBackend>(
        &mut self,
        backend: &B,
        targets: &FrameTargets<'_>,
        request: &DrawRequest<'_>,
    ) -> Result<FrameReport> {
        if self.state != FrameState::Idle {
            return Err(GpuError::InvalidState(format!(
                "Frame started while {:?}",
                self.state
            )));
        }

        if matches!(request, DrawRequest::ClearColor)
            && !targets.swapchain.usage.contains(vk::ImageUsageFlags::TRANSFER_DST)
        {
            return Err(GpuError::MissingImageUsage(vk::ImageUsageFlags::TRANSFER_DST));
        }

        let timeout_ns = u64::try_from(self.config.acquire_timeout.as_nanos()).unwrap_or(u64::MAX);
        let acquired = classify_acquire(backend.acquire_next_image(
            targets.swapchain.handle,
            targets.semaphores.image_available,
            timeout_ns,
        ))?;

        let (image_index, suboptimal_acquire) = match acquired {
            AcquireOutcome::Acquired { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::OutOfDate => {
                tracing::warn!("Swapchain out of date on acquire");
                self.consecutive_timeouts = 0;
                return Ok(FrameReport::OutOfDate);
            }
            AcquireOutcome::TimedOut => {
                self.consecutive_timeouts += 1;
                tracing::warn!(
                    "Swapchain image not available after {:?} ({} in a row)",
                    self.config.acquire_timeout,
                    self.consecutive_timeouts
                );
                if self.consecutive_timeouts >= self.config.max_acquire_timeouts {
                    return Err(GpuError::DeviceLost);
                }
                return Ok(FrameReport::TimedOut);
            }
        };
        self.consecutive_timeouts = 0;
        self.advance(FrameState::Acquired)?;

        let mut scratch = FrameScratch {
            unwaited: Some(targets.semaphores.image_available),
            ..FrameScratch::default()
        };
        let result = self.execute(backend, targets, request, image_index, &mut scratch);
        if let Err(e) = &result {
            self.abandon_image(backend, targets.queues.graphics, &mut scratch, e);
        }
        let cleanup = self.cleanup(backend, targets.queues, &mut scratch);

        self.state = FrameState::Idle;

        let status = result?;
        cleanup?;

        self.frames_presented += 1;

        Ok(FrameReport::Presented {
            image_index,
            suboptimal_acquire,
            status,
        })
    }

    fn execute<B: GpuBackend>(
        &mut self,
        backend: &B,
        targets: &FrameTargets<'_>,
        request: &DrawRequest<'_>,
        image_index: u32,
        scratch: &mut FrameScratch,
    ) -> Result<SwapchainStatus> {
        let swapchain = targets.swapchain;
        let image = swapchain.image(image_index).ok_or_else(|| {
            GpuError::InvalidState(format!("Acquired image {image_index} out of range"))
        })?;

        self.advance(FrameState::Recording)?;

        let usage = vk::CommandBufferUsageFlags::SIMULTANEOUS_USE;
        let command_buffer = match request {
            DrawRequest::ClearColor => {
                if let Some(previous) = self.clear_command_buffer.take() {
                    backend.free_command_buffer(previous);
                }
                let cmd = backend.allocate_command_buffer()?;
                self.clear_command_buffer = Some(cmd);
                backend.record(cmd, usage, &clear_sequence(image, image_index))?;
                cmd
            }
            DrawRequest::Geometry(pass) => {
                scratch.resources =
                    FrameResources::build(backend, swapchain, image_index, pass.program, pass.topology)?;
                let cmd = backend.allocate_command_buffer()?;
                scratch.command_buffer = Some(cmd);

                let commands: Vec<GpuCommand> = geometry_sequence(&GeometryTargets {
                    image,
                    render_pass: scratch.resources.render_pass,
                    framebuffer: scratch.resources.framebuffer,
                    pipeline: scratch.resources.pipeline,
                    extent: swapchain.extent,
                    vertex_buffer: pass.vertex_buffer.buffer,
                    vertex_count: pass.vertex_count,
                    clear_color: pass.clear_color,
                });
                backend.record(cmd, usage, &commands)?;
                cmd
            }
        };

        backend.queue_submit(
            targets.queues.graphics,
            &FrameSubmission {
                command_buffer,
                wait_semaphore: targets.semaphores.image_available,
                wait_stage: vk::PipelineStageFlags::TRANSFER,
                signal_semaphore: targets.semaphores.rendering_finished,
            },
        )?;
        scratch.unwaited = Some(targets.semaphores.rendering_finished);
        self.advance(FrameState::Submitted)?;

        let presented = backend.queue_present(
            targets.queues.present,
            &FramePresentation {
                swapchain: swapchain.handle,
                image_index,
                wait_semaphore: targets.semaphores.rendering_finished,
            },
        );
        // Out-of-date and lost surfaces still execute the semaphore wait.
        if matches!(
            presented,
            Ok(_) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR)
        ) {
            scratch.unwaited = None;
        }
        let status = classify_present(presented)?;
        self.advance(FrameState::Presented)?;

        if status.needs_rebuild() {
            tracing::warn!("Swapchain {status:?} on present");
        }

        Ok(status)
    }

    /// Wait on the semaphore a failed frame left signaled and record the
    /// acquired image as abandoned.
    fn abandon_image<B: GpuBackend>(
        &mut self,
        backend: &B,
        queue: vk::Queue,
        scratch: &mut FrameScratch,
        error: &GpuError,
    ) {
        let Some(semaphore) = scratch.unwaited.take() else {
            return;
        };
        if matches!(error, GpuError::DeviceLost) {
            return;
        }

        let drain = FrameSubmission::wait_only(semaphore, vk::PipelineStageFlags::ALL_COMMANDS);
        let semaphore_signaled = match backend.queue_submit(queue, &drain) {
            Ok(()) => false,
            Err(e) => {
                tracing::error!("Failed to wait on the semaphore of an abandoned frame: {e}");
                true
            }
        };

        tracing::warn!("Frame abandoned after acquire: {error}");
        self.abandoned = Some(AbandonedFrame { semaphore_signaled });
    }

    fn cleanup<B: GpuBackend>(
        &mut self,
        backend: &B,
        queues: DeviceQueues,
        scratch: &mut FrameScratch,
    ) -> Result<()> {
        let mut drained = backend.queue_wait_idle(queues.graphics);
        if queues.present != queues.graphics {
            drained = drained.and(backend.queue_wait_idle(queues.present));
        }

        if let Some(cmd) = scratch.command_buffer.take() {
            backend.free_command_buffer(cmd);
        }
        scratch.resources.destroy(backend);

        drained
    }

    /// Free the cached clear command buffer.
    ///
    /// The queue must be idle.
    pub fn release<B: GpuBackend>(&mut self, backend: &B) {
        if let Some(cmd) = self.clear_command_buffer.take() {
            backend.free_command_buffer(cmd);
        }
        self.state = FrameState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_order_is_enforced() {
        use FrameState::*;
        assert!(Idle.can_transition(Acquired));
        assert!(Acquired.can_transition(Recording));
        assert!(Recording.can_transition(Submitted));
        assert!(Submitted.can_transition(Presented));
        assert!(Presented.can_transition(Idle));

        assert!(!Idle.can_transition(Recording));
        assert!(!Acquired.can_transition(Submitted));
        assert!(!Presented.can_transition(Acquired));
        assert!(!Submitted.can_transition(Recording));
    }

    #[test]
    fn every_state_can_fall_back_to_idle() {
        use FrameState::*;
        for state in [Idle, Acquired, Recording, Submitted, Presented] {
            assert!(state.can_transition(Idle));
        }
    }

    #[test]
    fn rebuild_is_needed_after_suboptimal_or_out_of_date() {
        let presented = |suboptimal_acquire, status| FrameReport::Presented {
            image_index: 0,
            suboptimal_acquire,
            status,
        };
        assert!(!presented(false, SwapchainStatus::Optimal).needs_rebuild());
        assert!(presented(true, SwapchainStatus::Optimal).needs_rebuild());
        assert!(presented(false, SwapchainStatus::Suboptimal).needs_rebuild());
        assert!(presented(false, SwapchainStatus::OutOfDate).needs_rebuild());
        assert!(FrameReport::OutOfDate.needs_rebuild());
        assert!(!FrameReport::TimedOut.needs_rebuild());
    }

    #[test]
    fn default_timeout_is_one_second() {
        let config = FrameConfig::default();
        assert_eq!(config.acquire_timeout, Duration::from_secs(1));
        let engine = FrameEngine::new(config);
        assert_eq!(engine.state(), FrameState::Idle);
        assert_eq!(engine.frames_presented(), 0);
    }
}
