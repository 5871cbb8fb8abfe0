//! The device-level seam between the engine and the driver.
//!
//! Every call the swapchain manager, resource factory and frame engine make
//! against the logical device goes through [`GpuBackend`]. [`VulkanBackend`]
//! forwards to ash; tests drive the same code through a recording mock.
//!
//! Handles passed to a backend must have been created by that same backend
//! and not yet destroyed. Implementations do not track this.
//!
//! [`VulkanBackend`]: crate::vulkan::VulkanBackend

use crate::command::GpuCommand;
use crate::error::Result;
use ash::prelude::VkResult;
use ash::vk;

/// Parameters for (re)creating the swapchain on the backend's surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub min_image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
    /// Swapchain being replaced, or null
    pub old_swapchain: vk::SwapchainKHR,
}

/// One queue submission of the frame protocol.
///
/// A null command buffer submits an empty batch and a null signal semaphore
/// signals nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSubmission {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
}

impl FrameSubmission {
    /// An empty batch that only unsignals `semaphore`.
    pub fn wait_only(semaphore: vk::Semaphore, stage: vk::PipelineStageFlags) -> Self {
        Self {
            command_buffer: vk::CommandBuffer::null(),
            wait_semaphore: semaphore,
            wait_stage: stage,
            signal_semaphore: vk::Semaphore::null(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.command_buffer == vk::CommandBuffer::null()
    }
}

/// One presentation of the frame protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePresentation {
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
    pub wait_semaphore: vk::Semaphore,
}

/// Device-level operations used by the render device.
pub trait GpuBackend {
    // Device and queues

    /// Block until the device is idle.
    fn wait_idle(&self) -> Result<()>;

    /// Retrieve queue `index` of `family`.
    fn queue(&self, family: u32, index: u32) -> vk::Queue;

    /// Block until `queue` has drained.
    fn queue_wait_idle(&self, queue: vk::Queue) -> Result<()>;

    // Surface

    fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>>;
    fn surface_present_modes(&self) -> Result<Vec<vk::PresentModeKHR>>;

    // Swapchain

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>>;
    /// Create a 2D colour view covering one mip level and one layer.
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    /// Raw acquire result; classification is left to the caller.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> VkResult<(u32, bool)>;

    /// Raw present result; `Ok(true)` means suboptimal.
    fn queue_present(&self, queue: vk::Queue, presentation: &FramePresentation) -> VkResult<bool>;

    // Submission and synchronisation

    fn queue_submit(&self, queue: vk::Queue, submission: &FrameSubmission) -> Result<()>;
    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // Commands

    /// Allocate one primary command buffer from the backend's pool.
    fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer>;
    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer);
    /// Begin `command_buffer`, record `commands` in order, and end it.
    fn record(
        &self,
        command_buffer: vk::CommandBuffer,
        usage: vk::CommandBufferUsageFlags,
        commands: &[GpuCommand],
    ) -> Result<()>;

    // Pipeline objects

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>) -> Result<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo<'_>) -> Result<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> Result<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> Result<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // Memory

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;
    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> Result<vk::Buffer>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    fn allocate_memory(&self, size: vk::DeviceSize, memory_type_index: u32) -> Result<vk::DeviceMemory>;
    fn free_memory(&self, memory: vk::DeviceMemory);
    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> Result<()>;
    /// Map `size` bytes from the start of `memory`.
    fn map_memory(&self, memory: vk::DeviceMemory, size: vk::DeviceSize) -> Result<*mut u8>;
    /// Flush the whole mapped range of `memory`.
    fn flush_memory(&self, memory: vk::DeviceMemory) -> Result<()>;
    fn unmap_memory(&self, memory: vk::DeviceMemory);
}
