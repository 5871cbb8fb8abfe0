//! Per-frame pipeline objects.
//!
//! Render pass, framebuffer, shader modules, pipeline layout and pipeline
//! are created at the start of every geometry frame and destroyed before the
//! frame returns. Nothing is cached between frames.

use crate::backend::GpuBackend;
use crate::error::{GpuError, Result};
use crate::swapchain::Swapchain;
use ash::vk;
use glam::Vec2;
use jet_core::{AccessMode, FileContents};
use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;

/// Unit quad drawn as a triangle strip.
pub const QUAD_STRIP: [Vec2; 4] = [
    Vec2::new(-0.5, -0.5),
    Vec2::new(-0.5, 0.5),
    Vec2::new(0.5, -0.5),
    Vec2::new(0.5, 0.5),
];

/// Single triangle drawn as a triangle list.
pub const TRIANGLE_LIST: [Vec2; 3] = [
    Vec2::new(-0.5, -0.5),
    Vec2::new(-0.5, 0.5),
    Vec2::new(0.5, -0.5),
];

/// Default vertex shader entry point.
pub const VERTEX_ENTRY_POINT: &CStr = c"VS_main";
/// Default pixel shader entry point.
pub const FRAGMENT_ENTRY_POINT: &CStr = c"PS_main";

/// A pair of pre-compiled SPIR-V stages.
#[derive(Debug, Clone)]
pub struct ShaderProgram {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
    pub vertex_entry: &'static CStr,
    pub fragment_entry: &'static CStr,
}

impl ShaderProgram {
    /// Load both stages from disk.
    pub fn load(vertex_path: impl AsRef<Path>, fragment_path: impl AsRef<Path>) -> Result<Self> {
        let vertex = read_spirv(vertex_path.as_ref())?;
        let fragment = read_spirv(fragment_path.as_ref())?;

        Ok(Self::from_words(vertex, fragment))
    }

    /// Build a program from SPIR-V words already in memory.
    pub fn from_words(vertex: Vec<u32>, fragment: Vec<u32>) -> Self {
        Self {
            vertex,
            fragment,
            vertex_entry: VERTEX_ENTRY_POINT,
            fragment_entry: FRAGMENT_ENTRY_POINT,
        }
    }

    /// Override the entry point names.
    pub fn with_entry_points(mut self, vertex: &'static CStr, fragment: &'static CStr) -> Self {
        self.vertex_entry = vertex;
        self.fragment_entry = fragment;
        self
    }
}

fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let file = FileContents::open(path, AccessMode::READ)?;
    let words = ash::util::read_spv(&mut Cursor::new(file.data()))
        .map_err(|e| GpuError::ShaderLoad(format!("{}: {e}", path.display())))?;
    tracing::debug!("Loaded shader {} ({} words)", path.display(), words.len());
    Ok(words)
}

/// Colour attachment: cleared on load, stored, `UNDEFINED -> PRESENT_SRC_KHR`.
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
}

/// One `vec2` position per vertex, tightly packed.
pub fn vertex_input_layout() -> (vk::VertexInputBindingDescription, vk::VertexInputAttributeDescription) {
    let binding = vk::VertexInputBindingDescription::default()
        .binding(0)
        .stride(std::mem::size_of::<Vec2>() as u32)
        .input_rate(vk::VertexInputRate::VERTEX);
    let attribute = vk::VertexInputAttributeDescription::default()
        .location(0)
        .binding(0)
        .format(vk::Format::R32G32_SFLOAT)
        .offset(0);
    (binding, attribute)
}

/// Viewport covering `extent`.
pub fn viewport_for(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor covering `extent`.
pub fn scissor_for(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Everything created for one geometry frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameResources {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub vertex_module: vk::ShaderModule,
    pub fragment_module: vk::ShaderModule,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl Default for FrameResources {
    fn default() -> Self {
        Self {
            render_pass: vk::RenderPass::null(),
            framebuffer: vk::Framebuffer::null(),
            vertex_module: vk::ShaderModule::null(),
            fragment_module: vk::ShaderModule::null(),
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
        }
    }
}

impl FrameResources {
    /// Create the render pass, framebuffer and pipeline for drawing into
    /// swapchain image `image_index`.
    ///
    /// Anything created before a failure is destroyed again.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn build<B: GpuBackend>(
        backend: &B,
        swapchain: &Swapchain,
        image_index: u32,
        program: &ShaderProgram,
        topology: vk::PrimitiveTopology,
    ) -> Result<Self> {
        let mut resources = Self::default();
        match resources.create_all(backend, swapchain, image_index, program, topology) {
            Ok(()) => Ok(resources),
            Err(e) => {
                resources.destroy(backend);
                Err(e)
            }
        }
    }

    fn create_all<B: GpuBackend>(
        &mut self,
        backend: &B,
        swapchain: &Swapchain,
        image_index: u32,
        program: &ShaderProgram,
        topology: vk::PrimitiveTopology,
    ) -> Result<()> {
        let view = swapchain.view(image_index).ok_or_else(|| {
            GpuError::InvalidState(format!("Swapchain image {image_index} out of range"))
        })?;
        let extent = swapchain.extent;

        // Render pass
        let attachments = [color_attachment(swapchain.format.format)];
        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];
        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses);
        self.render_pass = backend.create_render_pass(&render_pass_info)?;

        // Framebuffer
        let views = [view];
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(self.render_pass)
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        self.framebuffer = backend.create_framebuffer(&framebuffer_info)?;

        // Shader modules
        self.vertex_module = backend
            .create_shader_module(&program.vertex)
            .map_err(|e| GpuError::PipelineCreation(format!("Vertex module: {e}")))?;
        self.fragment_module = backend
            .create_shader_module(&program.fragment)
            .map_err(|e| GpuError::PipelineCreation(format!("Fragment module: {e}")))?;

        // Layout without descriptor sets or push constants
        self.layout = backend.create_pipeline_layout(&vk::PipelineLayoutCreateInfo::default())?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(self.vertex_module)
                .name(program.vertex_entry),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(self.fragment_module)
                .name(program.fragment_entry),
        ];

        let (binding, attribute) = vertex_input_layout();
        let bindings = [binding];
        let attributes = [attribute];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology)
            .primitive_restart_enable(false);

        let viewports = [viewport_for(extent)];
        let scissors = [scissor_for(extent)];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(false)
            .depth_write_enable(false)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .layout(self.layout)
            .render_pass(self.render_pass)
            .subpass(0);

        self.pipeline = backend.create_graphics_pipeline(&pipeline_info)?;

        Ok(())
    }

    /// Destroy every object that was created. Calling this again is a no-op.
    ///
    /// The GPU must have finished with the objects.
    pub fn destroy<B: GpuBackend>(&mut self, backend: &B) {
        if self.pipeline != vk::Pipeline::null() {
            backend.destroy_pipeline(self.pipeline);
        }
        if self.layout != vk::PipelineLayout::null() {
            backend.destroy_pipeline_layout(self.layout);
        }
        if self.fragment_module != vk::ShaderModule::null() {
            backend.destroy_shader_module(self.fragment_module);
        }
        if self.vertex_module != vk::ShaderModule::null() {
            backend.destroy_shader_module(self.vertex_module);
        }
        if self.framebuffer != vk::Framebuffer::null() {
            backend.destroy_framebuffer(self.framebuffer);
        }
        if self.render_pass != vk::RenderPass::null() {
            backend.destroy_render_pass(self.render_pass);
        }
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_clears_and_transitions_to_present() {
        let attachment = color_attachment(vk::Format::B8G8R8A8_UNORM);
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachment.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(attachment.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn vertex_layout_is_one_vec2() {
        let (binding, attribute) = vertex_input_layout();
        assert_eq!(binding.stride, 8);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
        assert_eq!(attribute.format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attribute.offset, 0);
    }

    #[test]
    fn viewport_and_scissor_cover_extent() {
        let extent = vk::Extent2D {
            width: 1000,
            height: 800,
        };
        let viewport = viewport_for(extent);
        assert_eq!((viewport.width, viewport.height), (1000.0, 800.0));
        assert_eq!(scissor_for(extent).extent, extent);
    }

    #[test]
    fn quad_is_a_strip_of_four() {
        assert_eq!(bytemuck::cast_slice::<Vec2, u8>(&QUAD_STRIP).len(), 32);
        assert_eq!(QUAD_STRIP[0], Vec2::new(-0.5, -0.5));
        assert_eq!(QUAD_STRIP[3], Vec2::new(0.5, 0.5));
    }

    #[test]
    fn default_entry_points() {
        let program = ShaderProgram::from_words(vec![0x0723_0203], vec![0x0723_0203]);
        assert_eq!(program.vertex_entry, c"VS_main");
        assert_eq!(program.fragment_entry, c"PS_main");
    }

    #[test]
    fn missing_shader_file_is_a_load_error() {
        let err = ShaderProgram::load("missing.vs.spirv", "missing.ps.spirv").unwrap_err();
        assert!(matches!(err, GpuError::ShaderLoad(_)));
    }
}
