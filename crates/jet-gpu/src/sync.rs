//! Synchronization primitives.
//!
//! The frame protocol uses exactly two binary semaphores and no fences:
//! acquire signals `image_available`, the submission waits on it and
//! signals `rendering_finished`, and presentation waits on that.

use crate::backend::GpuBackend;
use crate::error::Result;
use ash::vk;

/// The two semaphores chaining acquire, submit and present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSemaphores {
    /// Signaled when the acquired image is available
    pub image_available: vk::Semaphore,
    /// Signaled when the frame's commands have executed
    pub rendering_finished: vk::Semaphore,
}

impl FrameSemaphores {
    /// Create both semaphores.
    pub fn new<B: GpuBackend>(backend: &B) -> Result<Self> {
        let image_available = backend.create_semaphore()?;
        let rendering_finished = match backend.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                backend.destroy_semaphore(image_available);
                return Err(e);
            }
        };

        Ok(Self {
            image_available,
            rendering_finished,
        })
    }

    /// Whether both semaphores have been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.image_available == vk::Semaphore::null()
            && self.rendering_finished == vk::Semaphore::null()
    }

    /// Destroy both semaphores. Calling this again is a no-op.
    ///
    /// The semaphores must not be referenced by pending GPU work.
    pub fn destroy<B: GpuBackend>(&mut self, backend: &B) {
        for semaphore in [&mut self.image_available, &mut self.rendering_finished] {
            if *semaphore != vk::Semaphore::null() {
                backend.destroy_semaphore(*semaphore);
                *semaphore = vk::Semaphore::null();
            }
        }
    }
}
