//! Platform abstraction for the Jet engine.
//!
//! Provides the window collaborator the render device binds its surface to.
//! The device only needs the native handles; window messages stay with the
//! event loop that owns the window.

use jet_core::constants;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;
use winit::dpi::PhysicalSize;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes};

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Window creation failed: {0}")]
    WindowCreation(String),
    #[error("Event loop error: {0}")]
    EventLoop(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// A window the render device can present into.
pub trait WindowContext: HasDisplayHandle + HasWindowHandle {
    /// Inner size of the window in physical pixels.
    fn dimensions(&self) -> (u32, u32);

    /// Replace the window title.
    fn set_title(&self, title: &str);
}

impl WindowContext for Window {
    fn dimensions(&self) -> (u32, u32) {
        let size = self.inner_size();
        (size.width, size.height)
    }

    fn set_title(&self, title: &str) {
        Window::set_title(self, title);
    }
}

/// Create the event loop, polling continuously so every iteration can draw.
pub fn create_event_loop() -> Result<EventLoop<()>> {
    let event_loop = EventLoop::new().map_err(|e| PlatformError::EventLoop(e.to_string()))?;
    event_loop.set_control_flow(ControlFlow::Poll);
    Ok(event_loop)
}

/// Platform configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            title: format!("[Vulkan] {}", constants::ENGINE_NAME),
            width: constants::DESIGN_WIDTH,
            height: constants::DESIGN_HEIGHT,
            resizable: true,
        }
    }
}

impl PlatformConfig {
    /// Window attributes matching this configuration.
    pub fn window_attributes(&self) -> WindowAttributes {
        Window::default_attributes()
            .with_title(&self.title)
            .with_inner_size(PhysicalSize::new(self.width, self.height))
            .with_resizable(self.resizable)
    }

    /// Create a window on the active event loop.
    pub fn create_window(&self, event_loop: &ActiveEventLoop) -> Result<Window> {
        let window = event_loop
            .create_window(self.window_attributes())
            .map_err(|e| PlatformError::WindowCreation(e.to_string()))?;

        tracing::info!(
            "Window created: \"{}\" {}x{}",
            self.title,
            self.width,
            self.height
        );

        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_design_resolution() {
        let config = PlatformConfig::default();
        assert_eq!(config.width, constants::DESIGN_WIDTH);
        assert_eq!(config.height, constants::DESIGN_HEIGHT);
        assert!(config.title.contains(constants::ENGINE_NAME));
    }
}
