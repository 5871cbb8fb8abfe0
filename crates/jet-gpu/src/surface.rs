//! Surface binding for windowed rendering.
//!
//! Binds the native handles of a window to a `VkSurfaceKHR`. The surface
//! must outlive the swapchain and the device, and is destroyed right before
//! the instance.

use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// A window surface and the extension loader used to query it.
pub struct SurfaceBinding {
    surface: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl SurfaceBinding {
    /// Create a surface for `window`.
    ///
    /// # Safety
    /// The instance must be valid and outlive the binding, and the window
    /// must stay alive until the surface is destroyed.
    pub unsafe fn bind<W>(entry: &ash::Entry, instance: &ash::Instance, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle + ?Sized,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        let surface = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        let loader = ash::khr::surface::Instance::new(entry, instance);

        tracing::info!("Window surface created");

        Ok(Self { surface, loader })
    }

    /// The raw surface handle; null once destroyed.
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Whether `family` of `physical_device` can present to this surface.
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, family: u32) -> Result<bool> {
        let supported = unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.surface)
        }?;
        Ok(supported)
    }

    /// Surface capabilities for `physical_device`.
    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> Result<vk::SurfaceCapabilitiesKHR> {
        let caps = unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }?;
        Ok(caps)
    }

    /// Surface formats offered for `physical_device`.
    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        let formats = unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.surface)
        }?;
        Ok(formats)
    }

    /// Present modes offered for `physical_device`.
    pub fn present_modes(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::PresentModeKHR>> {
        let modes = unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }?;
        Ok(modes)
    }

    /// Destroy the surface. Calling this again is a no-op.
    ///
    /// # Safety
    /// No swapchain created on this surface may still exist.
    pub unsafe fn destroy(&mut self) {
        if self.surface != vk::SurfaceKHR::null() {
            unsafe { self.loader.destroy_surface(self.surface, None) };
            self.surface = vk::SurfaceKHR::null();
            tracing::debug!("Window surface destroyed");
        }
    }
}
