//! Event loop handler owning the window and the render device.

use std::time::{Duration, Instant};

use glam::Vec2;
use jet_core::constants;
use jet_gpu::{
    DrawRequest, FrameOutcome, GeometryPass, GpuError, GraphicsBuffer, RenderDevice,
    RenderDeviceBuilder, ShaderProgram, VulkanBackend, QUAD_STRIP, TRIANGLE_LIST,
};
use jet_platform::{PlatformConfig, WindowContext};
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowId};

use crate::{AppConfig, DrawMode};

const TITLE_REFRESH: Duration = Duration::from_secs(1);

/// Drives the render device from winit events.
pub struct DemoRunner {
    config: AppConfig,
    state: Option<DemoState>,
    fatal: Option<anyhow::Error>,
}

/// Geometry uploaded once and drawn every frame.
struct Geometry {
    program: ShaderProgram,
    buffer: GraphicsBuffer,
    vertex_count: u32,
    topology: ash::vk::PrimitiveTopology,
}

struct DemoState {
    // Dropped before the window it presents into.
    device: RenderDevice<VulkanBackend>,
    geometry: Option<Geometry>,
    window: Window,
    base_title: String,
    frames_since_title: u32,
    title_updated: Instant,
}

impl DemoRunner {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            state: None,
            fatal: None,
        }
    }

    /// The error that stopped the event loop, if any.
    pub fn exit_status(&mut self) -> anyhow::Result<()> {
        self.fatal.take().map_or(Ok(()), Err)
    }

    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<DemoState> {
        let platform = PlatformConfig::default();
        let window = platform.create_window(event_loop)?;
        let (width, height) = window.dimensions();

        // SAFETY: the device is a field of the same state as the window and
        // is shut down before the window is dropped.
        let device = unsafe {
            RenderDeviceBuilder::new()
                .app_name(constants::APP_NAME)
                .validation(self.config.validation)
                .design_extent(width, height)
                .build(&window)?
        };

        let geometry = match self.config.draw_mode {
            DrawMode::Clear => None,
            DrawMode::Quad => {
                load_geometry(&device, &self.config, &QUAD_STRIP, ash::vk::PrimitiveTopology::TRIANGLE_STRIP)
            }
            DrawMode::Triangle => {
                load_geometry(&device, &self.config, &TRIANGLE_LIST, ash::vk::PrimitiveTopology::TRIANGLE_LIST)
            }
        };

        Ok(DemoState {
            device,
            geometry,
            window,
            base_title: platform.title,
            frames_since_title: 0,
            title_updated: Instant::now(),
        })
    }

    fn stop(&mut self, event_loop: &ActiveEventLoop, fatal: Option<anyhow::Error>) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        if fatal.is_some() {
            self.fatal = fatal;
        }
        event_loop.exit();
    }
}

/// Upload `vertices` and load the hello-triangle shaders.
///
/// Missing shaders are not fatal: the demo falls back to clearing.
fn load_geometry(
    device: &RenderDevice<VulkanBackend>,
    config: &AppConfig,
    vertices: &[Vec2],
    topology: ash::vk::PrimitiveTopology,
) -> Option<Geometry> {
    let vs = config.shader_dir.join(constants::HELLO_TRIANGLE_VS);
    let ps = config.shader_dir.join(constants::HELLO_TRIANGLE_PS);
    let program = match ShaderProgram::load(&vs, &ps) {
        Ok(program) => program,
        Err(e) => {
            warn!("{e}; falling back to clear-colour frames");
            return None;
        }
    };

    let bytes: &[u8] = bytemuck::cast_slice(vertices);
    let mut buffer = match device.create_buffer(bytes.len() as u64) {
        Ok(buffer) => buffer,
        Err(e) => {
            warn!("Vertex buffer creation failed: {e}; falling back to clear-colour frames");
            return None;
        }
    };
    if let Err(e) = device.upload(&buffer, bytes) {
        warn!("Vertex upload failed: {e}; falling back to clear-colour frames");
        device.destroy_buffer(&mut buffer);
        return None;
    }

    info!("Drawing {} vertices as {topology:?}", vertices.len());

    Some(Geometry {
        program,
        buffer,
        vertex_count: vertices.len() as u32,
        topology,
    })
}

impl ApplicationHandler for DemoRunner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match self.create_state(event_loop) {
            Ok(state) => {
                info!("Demo ready");
                self.state = Some(state);
            }
            Err(e) => {
                error!("Failed to initialize: {e}");
                self.stop(event_loop, Some(e));
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.stop(event_loop, None);
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                match state.render_frame() {
                    Ok(()) => state.window.request_redraw(),
                    Err(GpuError::DeviceLost) => {
                        error!("Device lost");
                        self.stop(event_loop, Some(GpuError::DeviceLost.into()));
                    }
                    Err(e) => {
                        error!("Render error: {e}");
                        state.window.request_redraw();
                    }
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.handle_resize(size.width, size.height) {
                        error!("Resize error: {e}");
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}

impl DemoState {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> jet_gpu::Result<()> {
        let request = match &self.geometry {
            Some(geometry) => DrawRequest::Geometry(
                GeometryPass::strip(&geometry.program, &geometry.buffer, geometry.vertex_count)
                    .with_topology(geometry.topology),
            ),
            None => DrawRequest::ClearColor,
        };

        if let FrameOutcome::Presented { .. } = self.device.draw_frame(&request)? {
            self.frames_since_title += 1;
        }

        let elapsed = self.title_updated.elapsed();
        if elapsed >= TITLE_REFRESH {
            let fps = f64::from(self.frames_since_title) / elapsed.as_secs_f64();
            WindowContext::set_title(&self.window, &format!("{} - {fps:.0} fps", self.base_title));
            self.frames_since_title = 0;
            self.title_updated = Instant::now();
        }

        Ok(())
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> jet_gpu::Result<()> {
        // Minimised windows report a zero size; keep the old swapchain.
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.device.resize(width, height)
    }

    fn cleanup(&mut self) {
        if let Some(mut geometry) = self.geometry.take() {
            self.device.destroy_buffer(&mut geometry.buffer);
        }
        self.device.shutdown();
        info!("Presented {} frames", self.device.frames_presented());
    }
}
