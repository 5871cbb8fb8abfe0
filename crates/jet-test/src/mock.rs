//! A recording [`GpuBackend`] that needs no GPU.
//!
//! Handles are fabricated from a counter. Every object the engine creates is
//! tracked until it is destroyed, so tests can assert that nothing leaks and
//! that nothing is destroyed twice. Binary semaphores are modeled too:
//! signaling a semaphore that is already signaled, or waiting on one that is
//! not, panics. Acquire and present results can be scripted to drive the
//! rebuild paths.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use jet_core::constants;
use jet_gpu::{FramePresentation, FrameSubmission, GpuBackend, GpuCommand, GpuError, QueueSelection, Result, SwapchainDesc};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

/// Kinds of objects the mock tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Swapchain,
    ImageView,
    Semaphore,
    CommandBuffer,
    RenderPass,
    Framebuffer,
    ShaderModule,
    PipelineLayout,
    Pipeline,
    Buffer,
    Memory,
}

impl ObjectKind {
    /// Objects that only ever live for one frame.
    pub const PER_FRAME: [Self; 5] = [
        Self::RenderPass,
        Self::Framebuffer,
        Self::ShaderModule,
        Self::PipelineLayout,
        Self::Pipeline,
    ];
}

/// Something the engine asked the backend to do.
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    WaitIdle,
    GetQueue { family: u32, index: u32 },
    QueueWaitIdle(vk::Queue),
    Create(ObjectKind, u64),
    Destroy(ObjectKind, u64),
    CreateSwapchain { handle: vk::SwapchainKHR, desc: SwapchainDesc },
    /// `signaled` is whether the acquire succeeded and signaled `semaphore`
    Acquire { swapchain: vk::SwapchainKHR, semaphore: vk::Semaphore, timeout_ns: u64, signaled: bool },
    Record { command_buffer: vk::CommandBuffer, usage: vk::CommandBufferUsageFlags, commands: Vec<GpuCommand> },
    Submit { queue: vk::Queue, submission: FrameSubmission },
    Present { queue: vk::Queue, presentation: FramePresentation },
    AllocateMemory { memory_type_index: u32, size: vk::DeviceSize },
    BindBufferMemory { buffer: vk::Buffer, memory: vk::DeviceMemory },
    MapMemory { memory: vk::DeviceMemory, size: vk::DeviceSize },
    FlushMemory(vk::DeviceMemory),
    UnmapMemory(vk::DeviceMemory),
}

#[derive(Debug)]
struct MockState {
    next_handle: u64,
    live: HashMap<u64, ObjectKind>,
    events: Vec<MockEvent>,

    capabilities: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    image_count: usize,
    swapchain_images: HashMap<u64, Vec<vk::Image>>,
    fail_swapchain_creation: bool,
    fail_pipeline_creation: bool,
    fail_submissions: bool,
    signaled: HashSet<u64>,

    acquire_script: VecDeque<VkResult<(u32, bool)>>,
    next_image: u32,
    present_script: VecDeque<VkResult<bool>>,

    memory_properties: vk::PhysicalDeviceMemoryProperties,
    buffer_memory_type_bits: u32,
    failing_memory_types: HashSet<u32>,
    buffer_sizes: HashMap<u64, vk::DeviceSize>,
    memory_contents: HashMap<u64, Vec<u8>>,
    mapped: HashSet<u64>,
}

impl MockState {
    fn new() -> Self {
        let mut memory_properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        memory_properties.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        memory_properties.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        memory_properties.memory_types[2].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED;

        Self {
            next_handle: 0x1000,
            live: HashMap::new(),
            events: Vec::new(),
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: constants::DESIGN_WIDTH,
                    height: constants::DESIGN_HEIGHT,
                },
                min_image_extent: vk::Extent2D { width: 1, height: 1 },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_DST,
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            image_count: 2,
            swapchain_images: HashMap::new(),
            fail_swapchain_creation: false,
            fail_pipeline_creation: false,
            fail_submissions: false,
            signaled: HashSet::new(),
            acquire_script: VecDeque::new(),
            next_image: 0,
            present_script: VecDeque::new(),
            memory_properties,
            buffer_memory_type_bits: 0b111,
            failing_memory_types: HashSet::new(),
            buffer_sizes: HashMap::new(),
            memory_contents: HashMap::new(),
            mapped: HashSet::new(),
        }
    }

    fn fresh(&mut self) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        raw
    }

    fn create(&mut self, kind: ObjectKind) -> u64 {
        let raw = self.fresh();
        self.live.insert(raw, kind);
        self.events.push(MockEvent::Create(kind, raw));
        raw
    }

    fn destroy(&mut self, kind: ObjectKind, raw: u64) {
        match self.live.remove(&raw) {
            Some(live_kind) if live_kind == kind => {}
            Some(live_kind) => panic!("{raw:#x} is a {live_kind:?}, destroyed as {kind:?}"),
            None => panic!("{kind:?} {raw:#x} destroyed twice or never created"),
        }
        self.signaled.remove(&raw);
        self.events.push(MockEvent::Destroy(kind, raw));
    }

    fn signal(&mut self, semaphore: vk::Semaphore) {
        assert!(
            self.signaled.insert(semaphore.as_raw()),
            "semaphore {:#x} signaled while already signaled",
            semaphore.as_raw()
        );
    }

    fn unsignal(&mut self, semaphore: vk::Semaphore) {
        assert!(
            self.signaled.remove(&semaphore.as_raw()),
            "wait on semaphore {:#x} that nothing signaled",
            semaphore.as_raw()
        );
    }

    fn expect_live(&self, kind: ObjectKind, raw: u64) {
        assert_eq!(
            self.live.get(&raw),
            Some(&kind),
            "{kind:?} {raw:#x} used while not alive"
        );
    }
}

/// Shared view of a [`MockBackend`]'s state.
///
/// Stays usable after the backend has been moved into (and dropped with) a
/// render device.
#[derive(Debug, Clone)]
pub struct MockLog {
    state: Rc<RefCell<MockState>>,
}

impl MockLog {
    /// Every event recorded so far.
    pub fn events(&self) -> Vec<MockEvent> {
        self.state.borrow().events.clone()
    }

    /// Forget recorded events; live objects are kept.
    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    /// Number of live objects of `kind`.
    pub fn outstanding(&self, kind: ObjectKind) -> usize {
        self.state.borrow().live.values().filter(|k| **k == kind).count()
    }

    /// Number of live objects of any kind.
    pub fn outstanding_total(&self) -> usize {
        self.state.borrow().live.len()
    }

    /// Number of live objects that should only exist during a frame.
    pub fn outstanding_per_frame(&self) -> usize {
        ObjectKind::PER_FRAME
            .iter()
            .map(|&kind| self.outstanding(kind))
            .sum()
    }

    /// Every command list recorded so far, in order.
    pub fn recordings(&self) -> Vec<(vk::CommandBuffer, vk::CommandBufferUsageFlags, Vec<GpuCommand>)> {
        self.state
            .borrow()
            .events
            .iter()
            .filter_map(|event| match event {
                MockEvent::Record {
                    command_buffer,
                    usage,
                    commands,
                } => Some((*command_buffer, *usage, commands.clone())),
                _ => None,
            })
            .collect()
    }

    /// Every submission so far.
    pub fn submissions(&self) -> Vec<(vk::Queue, FrameSubmission)> {
        self.state
            .borrow()
            .events
            .iter()
            .filter_map(|event| match event {
                MockEvent::Submit { queue, submission } => Some((*queue, *submission)),
                _ => None,
            })
            .collect()
    }

    /// Every presentation so far.
    pub fn presentations(&self) -> Vec<(vk::Queue, FramePresentation)> {
        self.state
            .borrow()
            .events
            .iter()
            .filter_map(|event| match event {
                MockEvent::Present {
                    queue,
                    presentation,
                } => Some((*queue, *presentation)),
                _ => None,
            })
            .collect()
    }

    /// Number of semaphores currently signaled.
    pub fn signaled_semaphores(&self) -> usize {
        self.state.borrow().signaled.len()
    }

    /// Acquires that signaled `semaphore` without a submission waiting on it
    /// before the next acquire, including a trailing one.
    pub fn unwaited_acquires(&self, semaphore: vk::Semaphore) -> usize {
        let mut pending = false;
        let mut unwaited = 0;
        for event in &self.state.borrow().events {
            match event {
                MockEvent::Acquire {
                    semaphore: acquired,
                    signaled: true,
                    ..
                } if *acquired == semaphore => {
                    if pending {
                        unwaited += 1;
                    }
                    pending = true;
                }
                MockEvent::Submit { submission, .. } if submission.wait_semaphore == semaphore => {
                    pending = false;
                }
                _ => {}
            }
        }
        unwaited + usize::from(pending)
    }

    /// Bytes currently stored in `memory`.
    pub fn memory_contents(&self, memory: vk::DeviceMemory) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .memory_contents
            .get(&memory.as_raw())
            .cloned()
    }

    /// Queue the result of the next acquire calls.
    pub fn push_acquire(&self, result: VkResult<(u32, bool)>) {
        self.state.borrow_mut().acquire_script.push_back(result);
    }

    /// Queue the result of the next present calls.
    pub fn push_present(&self, result: VkResult<bool>) {
        self.state.borrow_mut().present_script.push_back(result);
    }

    /// Number of images the next swapchain will report.
    pub fn set_image_count(&self, count: usize) {
        self.state.borrow_mut().image_count = count;
    }

    /// Replace the surface capabilities.
    pub fn set_capabilities(&self, capabilities: vk::SurfaceCapabilitiesKHR) {
        self.state.borrow_mut().capabilities = capabilities;
    }

    /// Replace the surface formats.
    pub fn set_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.state.borrow_mut().formats = formats;
    }

    /// Replace the present modes.
    pub fn set_present_modes(&self, modes: Vec<vk::PresentModeKHR>) {
        self.state.borrow_mut().present_modes = modes;
    }

    /// Make swapchain creation fail.
    pub fn fail_swapchain_creation(&self, fail: bool) {
        self.state.borrow_mut().fail_swapchain_creation = fail;
    }

    /// Make graphics pipeline creation fail.
    pub fn fail_pipeline_creation(&self, fail: bool) {
        self.state.borrow_mut().fail_pipeline_creation = fail;
    }

    /// Make queue submissions fail.
    pub fn fail_submissions(&self, fail: bool) {
        self.state.borrow_mut().fail_submissions = fail;
    }

    /// Make allocations from `memory_type_index` fail.
    pub fn fail_memory_type(&self, memory_type_index: u32) {
        self.state
            .borrow_mut()
            .failing_memory_types
            .insert(memory_type_index);
    }

    /// Memory types new buffers may be bound to.
    pub fn set_buffer_memory_type_bits(&self, bits: u32) {
        self.state.borrow_mut().buffer_memory_type_bits = bits;
    }
}

/// The recording backend.
#[derive(Debug)]
pub struct MockBackend {
    state: Rc<RefCell<MockState>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// A backend with a 1000x800 surface offering the preferred format.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState::new())),
        }
    }

    /// A handle on this backend's state.
    pub fn log(&self) -> MockLog {
        MockLog {
            state: Rc::clone(&self.state),
        }
    }

    /// A queue selection as device selection would report it.
    pub fn selection(family_index: u32) -> QueueSelection {
        QueueSelection {
            device_index: 0,
            physical_device: vk::PhysicalDevice::from_raw(0xD0),
            family_index,
            graphics_queue_index: 0,
            present_queue_index: 0,
        }
    }

    /// The queue handle the mock hands out for `family` / `index`.
    pub fn queue_handle(family: u32, index: u32) -> vk::Queue {
        vk::Queue::from_raw(0x100 + u64::from(family) * 0x10 + u64::from(index))
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.borrow_mut())
    }
}

impl GpuBackend for MockBackend {
    fn wait_idle(&self) -> Result<()> {
        self.with(|s| s.events.push(MockEvent::WaitIdle));
        Ok(())
    }

    fn queue(&self, family: u32, index: u32) -> vk::Queue {
        self.with(|s| s.events.push(MockEvent::GetQueue { family, index }));
        Self::queue_handle(family, index)
    }

    fn queue_wait_idle(&self, queue: vk::Queue) -> Result<()> {
        self.with(|s| s.events.push(MockEvent::QueueWaitIdle(queue)));
        Ok(())
    }

    fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        Ok(self.with(|s| s.capabilities))
    }

    fn surface_formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.with(|s| s.formats.clone()))
    }

    fn surface_present_modes(&self) -> Result<Vec<vk::PresentModeKHR>> {
        Ok(self.with(|s| s.present_modes.clone()))
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR> {
        self.with(|s| {
            if s.fail_swapchain_creation {
                return Err(GpuError::SwapchainCreation(
                    vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR.to_string(),
                ));
            }
            if desc.old_swapchain != vk::SwapchainKHR::null() {
                s.expect_live(ObjectKind::Swapchain, desc.old_swapchain.as_raw());
            }

            let handle = vk::SwapchainKHR::from_raw(s.create(ObjectKind::Swapchain));
            let images = (0..s.image_count)
                .map(|_| vk::Image::from_raw(s.fresh()))
                .collect();
            s.swapchain_images.insert(handle.as_raw(), images);
            s.events.push(MockEvent::CreateSwapchain { handle, desc: *desc });
            Ok(handle)
        })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.with(|s| {
            s.destroy(ObjectKind::Swapchain, swapchain.as_raw());
            s.swapchain_images.remove(&swapchain.as_raw());
        });
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        self.with(|s| {
            s.expect_live(ObjectKind::Swapchain, swapchain.as_raw());
            Ok(s.swapchain_images
                .get(&swapchain.as_raw())
                .cloned()
                .unwrap_or_default())
        })
    }

    fn create_image_view(&self, _image: vk::Image, _format: vk::Format) -> Result<vk::ImageView> {
        Ok(vk::ImageView::from_raw(self.with(|s| s.create(ObjectKind::ImageView))))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.with(|s| s.destroy(ObjectKind::ImageView, view.as_raw()));
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> VkResult<(u32, bool)> {
        self.with(|s| {
            s.expect_live(ObjectKind::Swapchain, swapchain.as_raw());
            s.expect_live(ObjectKind::Semaphore, semaphore.as_raw());
            let result = s.acquire_script.pop_front().unwrap_or_else(|| {
                let index = s.next_image;
                s.next_image = (index + 1) % s.image_count.max(1) as u32;
                Ok((index, false))
            });
            let signaled = result.is_ok();
            if signaled {
                s.signal(semaphore);
            }
            s.events.push(MockEvent::Acquire {
                swapchain,
                semaphore,
                timeout_ns,
                signaled,
            });
            result
        })
    }

    fn queue_present(&self, queue: vk::Queue, presentation: &FramePresentation) -> VkResult<bool> {
        self.with(|s| {
            s.expect_live(ObjectKind::Swapchain, presentation.swapchain.as_raw());
            s.events.push(MockEvent::Present {
                queue,
                presentation: *presentation,
            });
            let result = s.present_script.pop_front().unwrap_or(Ok(false));
            // Only these results guarantee the wait was executed.
            if matches!(
                result,
                Ok(_) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR)
            ) {
                s.unsignal(presentation.wait_semaphore);
            }
            result
        })
    }

    fn queue_submit(&self, queue: vk::Queue, submission: &FrameSubmission) -> Result<()> {
        self.with(|s| {
            if s.fail_submissions {
                return Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            if !submission.is_empty() {
                s.expect_live(ObjectKind::CommandBuffer, submission.command_buffer.as_raw());
            }
            s.unsignal(submission.wait_semaphore);
            if submission.signal_semaphore != vk::Semaphore::null() {
                s.signal(submission.signal_semaphore);
            }
            s.events.push(MockEvent::Submit {
                queue,
                submission: *submission,
            });
            Ok(())
        })
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        Ok(vk::Semaphore::from_raw(self.with(|s| s.create(ObjectKind::Semaphore))))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.with(|s| s.destroy(ObjectKind::Semaphore, semaphore.as_raw()));
    }

    fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer> {
        Ok(vk::CommandBuffer::from_raw(self.with(|s| s.create(ObjectKind::CommandBuffer))))
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        self.with(|s| s.destroy(ObjectKind::CommandBuffer, command_buffer.as_raw()));
    }

    fn record(
        &self,
        command_buffer: vk::CommandBuffer,
        usage: vk::CommandBufferUsageFlags,
        commands: &[GpuCommand],
    ) -> Result<()> {
        self.with(|s| {
            s.expect_live(ObjectKind::CommandBuffer, command_buffer.as_raw());
            s.events.push(MockEvent::Record {
                command_buffer,
                usage,
                commands: commands.to_vec(),
            });
        });
        Ok(())
    }

    fn create_render_pass(&self, _info: &vk::RenderPassCreateInfo<'_>) -> Result<vk::RenderPass> {
        Ok(vk::RenderPass::from_raw(self.with(|s| s.create(ObjectKind::RenderPass))))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.with(|s| s.destroy(ObjectKind::RenderPass, render_pass.as_raw()));
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo<'_>) -> Result<vk::Framebuffer> {
        self.with(|s| {
            s.expect_live(ObjectKind::RenderPass, info.render_pass.as_raw());
            Ok(vk::Framebuffer::from_raw(s.create(ObjectKind::Framebuffer)))
        })
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.with(|s| s.destroy(ObjectKind::Framebuffer, framebuffer.as_raw()));
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        if code.is_empty() {
            return Err(GpuError::Vulkan(vk::Result::ERROR_INVALID_SHADER_NV));
        }
        Ok(vk::ShaderModule::from_raw(self.with(|s| s.create(ObjectKind::ShaderModule))))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.with(|s| s.destroy(ObjectKind::ShaderModule, module.as_raw()));
    }

    fn create_pipeline_layout(
        &self,
        _info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> Result<vk::PipelineLayout> {
        Ok(vk::PipelineLayout::from_raw(self.with(|s| s.create(ObjectKind::PipelineLayout))))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.with(|s| s.destroy(ObjectKind::PipelineLayout, layout.as_raw()));
    }

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> Result<vk::Pipeline> {
        self.with(|s| {
            if s.fail_pipeline_creation {
                return Err(GpuError::PipelineCreation(
                    vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.to_string(),
                ));
            }
            s.expect_live(ObjectKind::PipelineLayout, info.layout.as_raw());
            s.expect_live(ObjectKind::RenderPass, info.render_pass.as_raw());
            Ok(vk::Pipeline::from_raw(s.create(ObjectKind::Pipeline)))
        })
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.with(|s| s.destroy(ObjectKind::Pipeline, pipeline.as_raw()));
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.with(|s| s.memory_properties)
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> Result<vk::Buffer> {
        assert!(info.usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        self.with(|s| {
            let raw = s.create(ObjectKind::Buffer);
            s.buffer_sizes.insert(raw, info.size);
            Ok(vk::Buffer::from_raw(raw))
        })
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.with(|s| {
            s.destroy(ObjectKind::Buffer, buffer.as_raw());
            s.buffer_sizes.remove(&buffer.as_raw());
        });
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        self.with(|s| vk::MemoryRequirements {
            // The mock rounds every buffer up to a multiple of 64 bytes.
            size: s.buffer_sizes.get(&buffer.as_raw()).copied().unwrap_or(0).max(1).div_ceil(64) * 64,
            alignment: 16,
            memory_type_bits: s.buffer_memory_type_bits,
        })
    }

    fn allocate_memory(&self, size: vk::DeviceSize, memory_type_index: u32) -> Result<vk::DeviceMemory> {
        self.with(|s| {
            s.events.push(MockEvent::AllocateMemory {
                memory_type_index,
                size,
            });
            if s.failing_memory_types.contains(&memory_type_index) {
                return Err(GpuError::AllocationFailed(
                    vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.to_string(),
                ));
            }
            let raw = s.create(ObjectKind::Memory);
            s.memory_contents.insert(raw, vec![0; size as usize]);
            Ok(vk::DeviceMemory::from_raw(raw))
        })
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.with(|s| {
            assert!(!s.mapped.contains(&memory.as_raw()), "memory freed while mapped");
            s.destroy(ObjectKind::Memory, memory.as_raw());
            s.memory_contents.remove(&memory.as_raw());
        });
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> Result<()> {
        self.with(|s| {
            s.expect_live(ObjectKind::Buffer, buffer.as_raw());
            s.expect_live(ObjectKind::Memory, memory.as_raw());
            s.events.push(MockEvent::BindBufferMemory { buffer, memory });
        });
        Ok(())
    }

    fn map_memory(&self, memory: vk::DeviceMemory, size: vk::DeviceSize) -> Result<*mut u8> {
        self.with(|s| {
            s.events.push(MockEvent::MapMemory { memory, size });
            assert_ne!(size, 0, "zero-sized memory map");
            let contents = s
                .memory_contents
                .get_mut(&memory.as_raw())
                .ok_or(GpuError::Vulkan(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
            if size != vk::WHOLE_SIZE && size > contents.len() as vk::DeviceSize {
                return Err(GpuError::Vulkan(vk::Result::ERROR_MEMORY_MAP_FAILED));
            }
            let ptr = contents.as_mut_ptr();
            assert!(s.mapped.insert(memory.as_raw()), "memory mapped twice");
            Ok(ptr)
        })
    }

    fn flush_memory(&self, memory: vk::DeviceMemory) -> Result<()> {
        self.with(|s| {
            assert!(s.mapped.contains(&memory.as_raw()), "flush of unmapped memory");
            s.events.push(MockEvent::FlushMemory(memory));
        });
        Ok(())
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        self.with(|s| {
            assert!(s.mapped.remove(&memory.as_raw()), "unmap of unmapped memory");
            s.events.push(MockEvent::UnmapMemory(memory));
        });
    }
}
