//! The ash-backed [`GpuBackend`].

use crate::backend::{FramePresentation, FrameSubmission, GpuBackend, SwapchainDesc};
use crate::capabilities::DeviceSummary;
use crate::command::{color_subresource_range, record_commands, CommandPool, GpuCommand};
use crate::context::DeviceConfig;
use crate::device::{create_logical_device, enumerate_candidates, select_queue_family, QueueSelection};
use crate::error::{GpuError, Result};
use crate::instance::create_instance;
use crate::loader::VulkanLibrary;
use crate::surface::SurfaceBinding;
use ash::prelude::VkResult;
use ash::vk;
use jet_core::constants;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Vulkan objects owned for the lifetime of the process.
///
/// Dropped in reverse creation order: command pool, device, surface,
/// instance, and finally the loader library.
pub struct VulkanBackend {
    command_pool: CommandPool,
    swapchain_loader: ash::khr::swapchain::Device,
    device: ash::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    physical_device: vk::PhysicalDevice,
    surface: SurfaceBinding,
    instance: ash::Instance,
    // Keeps the loader mapped until everything above is destroyed.
    _library: VulkanLibrary,
}

/// Destroy what bootstrap created so far, newest first.
unsafe fn abandon(instance: &ash::Instance, surface: Option<&mut SurfaceBinding>, device: Option<&ash::Device>) {
    unsafe {
        if let Some(device) = device {
            device.destroy_device(None);
        }
        if let Some(surface) = surface {
            surface.destroy();
        }
        instance.destroy_instance(None);
    }
}

impl VulkanBackend {
    /// Run the whole bring-up: library, instance, surface, device
    /// selection, logical device and command pool.
    ///
    /// # Safety
    /// The window must outlive the backend.
    pub unsafe fn bootstrap<W>(config: &DeviceConfig, window: &W) -> Result<(Self, QueueSelection)>
    where
        W: HasDisplayHandle + HasWindowHandle + ?Sized,
    {
        let library = VulkanLibrary::load()?;

        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?
            .as_raw();

        let (instance, instance_table) = create_instance(
            &library,
            &config.app_name,
            constants::ENGINE_NAME,
            config.validation,
            display,
        )?;

        let mut surface = match unsafe { SurfaceBinding::bind(library.entry(), &instance, window) } {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { abandon(&instance, None, None) };
                return Err(e);
            }
        };

        let selection = match enumerate_candidates(&instance, &surface)
            .and_then(|candidates| select_queue_family(&candidates).ok_or(GpuError::NoSuitableDevice))
        {
            Ok(selection) => selection,
            Err(e) => {
                unsafe { abandon(&instance, Some(&mut surface), None) };
                return Err(e);
            }
        };

        let summary = unsafe { DeviceSummary::query(&instance, selection.physical_device) };
        tracing::info!("Selected GPU: {}", summary.summary());

        let (device, device_table) = match unsafe { create_logical_device(&instance, &selection) } {
            Ok(created) => created,
            Err(e) => {
                unsafe { abandon(&instance, Some(&mut surface), None) };
                return Err(e);
            }
        };

        let command_pool = match unsafe {
            CommandPool::new(&device, selection.family_index, vk::CommandPoolCreateFlags::empty())
        } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { abandon(&instance, Some(&mut surface), Some(&device)) };
                return Err(e);
            }
        };

        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(selection.physical_device) };
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        tracing::info!(
            "Entry points verified: {} global, {} instance, {} device",
            library.global_table().len(),
            instance_table.len(),
            device_table.len()
        );

        let backend = Self {
            command_pool,
            swapchain_loader,
            device,
            memory_properties,
            physical_device: selection.physical_device,
            surface,
            instance,
            _library: library,
        };

        Ok((backend, selection))
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.command_pool.destroy(&self.device);
            self.device.destroy_device(None);
            self.surface.destroy();
            self.instance.destroy_instance(None);
        }
        tracing::info!("Vulkan backend destroyed");
    }
}

// SAFETY (all methods): handles come from this backend's device and the
// caller upholds the lifetime contract documented on `GpuBackend`.
impl GpuBackend for VulkanBackend {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }

    fn queue(&self, family: u32, index: u32) -> vk::Queue {
        unsafe { self.device.get_device_queue(family, index) }
    }

    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn queue_wait_idle(&self, queue: vk::Queue) -> Result<()> {
        unsafe { self.device.queue_wait_idle(queue) }?;
        Ok(())
    }

    fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        self.surface.capabilities(self.physical_device)
    }

    fn surface_formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>> {
        self.surface.formats(self.physical_device)
    }

    fn surface_present_modes(&self) -> Result<Vec<vk::PresentModeKHR>> {
        self.surface.present_modes(self.physical_device)
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR> {
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.handle())
            .min_image_count(desc.min_image_count)
            .image_format(desc.surface_format.format)
            .image_color_space(desc.surface_format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(desc.usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true)
            .old_swapchain(desc.old_swapchain);

        unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        let images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }?;
        Ok(images)
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(color_subresource_range());

        let view = unsafe { self.device.create_image_view(&view_info, None) }?;
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, semaphore, vk::Fence::null())
        }
    }

    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn queue_present(&self, queue: vk::Queue, presentation: &FramePresentation) -> VkResult<bool> {
        let wait_semaphores = [presentation.wait_semaphore];
        let swapchains = [presentation.swapchain];
        let image_indices = [presentation.image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }

    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn queue_submit(&self, queue: vk::Queue, submission: &FrameSubmission) -> Result<()> {
        let command_buffers = [submission.command_buffer];
        let wait_semaphores = [submission.wait_semaphore];
        let wait_stages = [submission.wait_stage];
        let signal_semaphores = [submission.signal_semaphore];

        let command_buffers = if submission.is_empty() { &command_buffers[..0] } else { &command_buffers[..] };
        let signal_semaphores = if submission.signal_semaphore == vk::Semaphore::null() {
            &signal_semaphores[..0]
        } else {
            &signal_semaphores[..]
        };

        let submit_info = vk::SubmitInfo::default()
            .command_buffers(command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(signal_semaphores);

        unsafe {
            self.device
                .queue_submit(queue, &[submit_info], vk::Fence::null())
        }?;
        Ok(())
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { self.device.create_semaphore(&create_info, None) }?;
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer> {
        unsafe { self.command_pool.allocate_command_buffer(&self.device) }
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.command_pool.free_command_buffer(&self.device, command_buffer) };
    }

    fn record(
        &self,
        command_buffer: vk::CommandBuffer,
        usage: vk::CommandBufferUsageFlags,
        commands: &[GpuCommand],
    ) -> Result<()> {
        unsafe { record_commands(&self.device, command_buffer, usage, commands) }
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>) -> Result<vk::RenderPass> {
        unsafe { self.device.create_render_pass(info, None) }
            .map_err(|e| GpuError::PipelineCreation(format!("Render pass: {e}")))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo<'_>) -> Result<vk::Framebuffer> {
        unsafe { self.device.create_framebuffer(info, None) }
            .map_err(|e| GpuError::PipelineCreation(format!("Framebuffer: {e}")))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe { self.device.create_shader_module(&info, None) }?;
        Ok(module)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) };
    }

    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> Result<vk::PipelineLayout> {
        unsafe { self.device.create_pipeline_layout(info, None) }
            .map_err(|e| GpuError::PipelineCreation(format!("Pipeline layout: {e}")))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> Result<vk::Pipeline> {
        let result = unsafe {
            self.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(info),
                None,
            )
        };

        match result {
            Ok(pipelines) => pipelines
                .into_iter()
                .next()
                .ok_or_else(|| GpuError::PipelineCreation("No pipeline returned".to_string())),
            Err((pipelines, e)) => {
                for pipeline in pipelines.into_iter().filter(|p| *p != vk::Pipeline::null()) {
                    unsafe { self.device.destroy_pipeline(pipeline, None) };
                }
                Err(GpuError::PipelineCreation(e.to_string()))
            }
        }
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_properties
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> Result<vk::Buffer> {
        let buffer = unsafe { self.device.create_buffer(info, None) }?;
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) };
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    fn allocate_memory(&self, size: vk::DeviceSize, memory_type_index: u32) -> Result<vk::DeviceMemory> {
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        unsafe { self.device.allocate_memory(&info, None) }
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) };
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> Result<()> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, 0) }?;
        Ok(())
    }

    fn map_memory(&self, memory: vk::DeviceMemory, size: vk::DeviceSize) -> Result<*mut u8> {
        let ptr = unsafe {
            self.device
                .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())
        }?;
        Ok(ptr.cast::<u8>())
    }

    fn flush_memory(&self, memory: vk::DeviceMemory) -> Result<()> {
        let range = vk::MappedMemoryRange::default()
            .memory(memory)
            .offset(0)
            .size(vk::WHOLE_SIZE);
        unsafe { self.device.flush_mapped_memory_ranges(&[range]) }?;
        Ok(())
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) };
    }
}
