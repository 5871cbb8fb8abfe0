//! Command buffer management and the per-frame command sequences.
//!
//! A frame records `barrier -> work -> barrier` into a single primary
//! command buffer. The sequences are built as plain [`GpuCommand`] lists so
//! they can be inspected without a device; [`record_commands`] replays them
//! through ash.

use crate::error::Result;
use ash::vk;

/// Clear colour of the geometry pass.
pub const GEOMETRY_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

/// Colour used by the clear path for swapchain image `image_index`.
///
/// Image 0 is cleared to blue, every other image to cyan, which makes the
/// alternation between the two swapchain images visible.
pub fn clear_color_for_image(image_index: u32) -> [f32; 4] {
    let green = if image_index == 0 { 0.0 } else { 1.0 };
    [0.0, green, 1.0, 1.0]
}

/// A layout transition of one swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl ImageBarrier {
    fn to_vk(self) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(color_subresource_range())
    }
}

/// Colour aspect, one mip level, one array layer.
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// One recorded command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GpuCommand {
    ImageBarrier(ImageBarrier),
    ClearColorImage {
        image: vk::Image,
        layout: vk::ImageLayout,
        color: [f32; 4],
    },
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    },
    BindPipeline(vk::Pipeline),
    BindVertexBuffer(vk::Buffer),
    Draw {
        vertex_count: u32,
    },
    EndRenderPass,
}

/// Clear `image` directly with a transfer command.
pub fn clear_sequence(image: vk::Image, image_index: u32) -> Vec<GpuCommand> {
    vec![
        GpuCommand::ImageBarrier(ImageBarrier {
            image,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            src_access: vk::AccessFlags::MEMORY_READ,
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        GpuCommand::ClearColorImage {
            image,
            layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            color: clear_color_for_image(image_index),
        },
        GpuCommand::ImageBarrier(ImageBarrier {
            image,
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::MEMORY_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        }),
    ]
}

/// Objects a geometry pass draws with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryTargets {
    pub image: vk::Image,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub pipeline: vk::Pipeline,
    pub extent: vk::Extent2D,
    pub vertex_buffer: vk::Buffer,
    pub vertex_count: u32,
    pub clear_color: [f32; 4],
}

/// Draw one vertex buffer inside a render pass.
///
/// The render pass itself moves the image to `PRESENT_SRC_KHR`; the trailing
/// barrier orders the colour writes before presentation.
pub fn geometry_sequence(targets: &GeometryTargets) -> Vec<GpuCommand> {
    vec![
        GpuCommand::ImageBarrier(ImageBarrier {
            image: targets.image,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            src_access: vk::AccessFlags::MEMORY_READ,
            dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        }),
        GpuCommand::BeginRenderPass {
            render_pass: targets.render_pass,
            framebuffer: targets.framebuffer,
            extent: targets.extent,
            clear_color: targets.clear_color,
        },
        GpuCommand::BindPipeline(targets.pipeline),
        GpuCommand::BindVertexBuffer(targets.vertex_buffer),
        GpuCommand::Draw {
            vertex_count: targets.vertex_count,
        },
        GpuCommand::EndRenderPass,
        GpuCommand::ImageBarrier(ImageBarrier {
            image: targets.image,
            old_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access: vk::AccessFlags::MEMORY_READ,
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        }),
    ]
}

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = unsafe { device.create_command_pool(&create_info, None) }?;

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate a single primary command buffer.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffer(&self, device: &ash::Device) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }?;
        buffers
            .into_iter()
            .next()
            .ok_or(crate::error::GpuError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY))
    }

    /// Return a command buffer to the pool.
    ///
    /// # Safety
    /// The command buffer must not be pending execution.
    pub unsafe fn free_command_buffer(&self, device: &ash::Device, command_buffer: vk::CommandBuffer) {
        unsafe { device.free_command_buffers(self.pool, &[command_buffer]) };
    }

    /// Destroy the command pool.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_command_pool(self.pool, None) };
    }
}

/// Begin `cmd`, replay `commands` and end it.
///
/// # Safety
/// The device and command buffer must be valid and every handle referenced
/// by `commands` must be alive.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn record_commands(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    usage: vk::CommandBufferUsageFlags,
    commands: &[GpuCommand],
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(usage);
    unsafe { device.begin_command_buffer(cmd, &begin_info) }?;

    for command in commands {
        match *command {
            GpuCommand::ImageBarrier(barrier) => unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    barrier.src_stage,
                    barrier.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier.to_vk()],
                );
            },
            GpuCommand::ClearColorImage {
                image,
                layout,
                color,
            } => unsafe {
                let clear = vk::ClearColorValue { float32: color };
                device.cmd_clear_color_image(cmd, image, layout, &clear, &[color_subresource_range()]);
            },
            GpuCommand::BeginRenderPass {
                render_pass,
                framebuffer,
                extent,
                clear_color,
            } => unsafe {
                let clear_values = [vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: clear_color,
                    },
                }];
                let begin = vk::RenderPassBeginInfo::default()
                    .render_pass(render_pass)
                    .framebuffer(framebuffer)
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent,
                    })
                    .clear_values(&clear_values);
                device.cmd_begin_render_pass(cmd, &begin, vk::SubpassContents::INLINE);
            },
            GpuCommand::BindPipeline(pipeline) => unsafe {
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            },
            GpuCommand::BindVertexBuffer(buffer) => unsafe {
                device.cmd_bind_vertex_buffers(cmd, 0, &[buffer], &[0]);
            },
            GpuCommand::Draw { vertex_count } => unsafe {
                device.cmd_draw(cmd, vertex_count, 1, 0, 0);
            },
            GpuCommand::EndRenderPass => unsafe {
                device.cmd_end_render_pass(cmd);
            },
        }
    }

    unsafe { device.end_command_buffer(cmd) }?;
    Ok(())
}
