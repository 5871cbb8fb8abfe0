//! GPU error types.

use crate::loader::LoaderTier;
use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader library could not be loaded.
    #[error("Failed to load Vulkan library: {0}")]
    LibraryLoad(String),

    /// A required entry point could not be resolved.
    #[error("Missing {tier} entry point: {name}")]
    MissingEntryPoint { tier: LoaderTier, name: String },

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Required layer not present.
    #[error("Required layer not present: {0}")]
    LayerNotPresent(String),

    /// No suitable GPU found.
    #[error("No physical device with a graphics queue that can present to the surface")]
    NoSuitableDevice,

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// The surface does not offer the preferred format.
    #[error("Unsupported surface format: {0}")]
    UnsupportedSurfaceFormat(String),

    /// None of mailbox, immediate or FIFO is offered.
    #[error("No supported present mode")]
    UnsupportedPresentMode,

    /// Swapchain images cannot be used as color attachments.
    #[error("Surface does not support color attachment usage")]
    UnsupportedImageUsage,

    /// The swapchain was created without a usage the request needs.
    #[error("Swapchain images lack {0:?} usage")]
    MissingImageUsage(vk::ImageUsageFlags),

    /// The driver returned a different number of swapchain images.
    #[error("Expected {expected} swapchain images, got {actual}")]
    SwapchainImageCount { expected: usize, actual: usize },

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader binary could not be loaded.
    #[error("Shader load failed: {0}")]
    ShaderLoad(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// The device was lost.
    #[error("Device lost")]
    DeviceLost,

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<jet_core::Error> for GpuError {
    fn from(e: jet_core::Error) -> Self {
        Self::ShaderLoad(e.to_string())
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
