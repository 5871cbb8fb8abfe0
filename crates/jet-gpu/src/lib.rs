//! Vulkan render device for the Jet engine.
//!
//! This crate provides:
//! - Dynamic loading of the Vulkan loader with verified entry-point tiers
//! - Instance, surface and logical device bring-up
//! - Swapchain creation and rebuilds
//! - The per-frame acquire / record / submit / present protocol
//! - Per-frame pipeline objects and host-visible vertex buffers
//!
//! All device-level calls go through the [`GpuBackend`] trait so the frame
//! protocol can be exercised without a GPU.

pub mod backend;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod loader;
pub mod memory;
pub mod pipeline;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

pub use backend::{FramePresentation, FrameSubmission, GpuBackend, SwapchainDesc};
pub use capabilities::{DeviceSummary, GpuVendor};
pub use command::{GpuCommand, ImageBarrier};
pub use context::{DeviceConfig, FrameOutcome, RenderDevice, RenderDeviceBuilder};
pub use device::{DeviceQueues, QueueSelection};
pub use error::{GpuError, Result};
pub use frame::{AbandonedFrame, DrawRequest, FrameConfig, FrameEngine, FrameReport, FrameState, GeometryPass};
pub use loader::{LoaderTier, ProcTable, VulkanLibrary};
pub use memory::GraphicsBuffer;
pub use pipeline::{FrameResources, ShaderProgram, QUAD_STRIP, TRIANGLE_LIST};
pub use surface::SurfaceBinding;
pub use swapchain::{AcquireOutcome, Swapchain, SwapchainStatus, SWAPCHAIN_IMAGE_COUNT};
pub use sync::FrameSemaphores;
pub use vulkan::VulkanBackend;
