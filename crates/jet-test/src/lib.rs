//! Test harness for the Jet engine.
//!
//! Provides a recording GPU backend so the render device can be driven
//! headless, plus fixtures for shader binaries and vertex data.

pub mod mock;

pub use mock::{MockBackend, MockEvent, MockLog, ObjectKind};

use jet_gpu::{DeviceConfig, GeometryPass, GraphicsBuffer, RenderDevice, ShaderProgram};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("GPU error: {0}")]
    Gpu(#[from] jet_gpu::GpuError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TestError>;

/// SPIR-V module header: magic, version 1.0, generator, bound, schema.
pub const SPIRV_HEADER: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];

/// A device on the mock backend with the queue family at `family_index`.
pub fn mock_device(family_index: u32) -> Result<(RenderDevice<MockBackend>, MockLog)> {
    mock_device_with(family_index, &DeviceConfig::default())
}

/// Like [`mock_device`] with an explicit configuration.
pub fn mock_device_with(
    family_index: u32,
    config: &DeviceConfig,
) -> Result<(RenderDevice<MockBackend>, MockLog)> {
    let backend = MockBackend::new();
    let log = backend.log();
    let device = RenderDevice::new(backend, MockBackend::selection(family_index), config)?;
    tracing::debug!("Mock device ready on family {family_index}");
    Ok((device, log))
}

/// A program whose stages are a bare SPIR-V header.
pub fn stub_program() -> ShaderProgram {
    ShaderProgram::from_words(SPIRV_HEADER.to_vec(), SPIRV_HEADER.to_vec())
}

/// Write a SPIR-V header to `dir/name` and return its path.
pub fn write_spirv_fixture(dir: &Path, name: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, bytemuck::cast_slice::<u32, u8>(&SPIRV_HEADER))?;
    Ok(path)
}

/// A scratch directory under the system temp dir, unique to `test_name`.
pub fn scratch_dir(test_name: &str) -> Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("jet-test-{}-{test_name}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Create and fill a vertex buffer holding `vertices`.
pub fn upload_vertices(
    device: &RenderDevice<MockBackend>,
    vertices: &[glam::Vec2],
) -> Result<GraphicsBuffer> {
    let bytes: &[u8] = bytemuck::cast_slice(vertices);
    let buffer = device.create_buffer(bytes.len() as u64)?;
    device.upload(&buffer, bytes)?;
    Ok(buffer)
}

/// A strip pass over the whole of `vertices`.
pub fn strip_pass<'a>(
    program: &'a ShaderProgram,
    buffer: &'a GraphicsBuffer,
    vertices: &[glam::Vec2],
) -> GeometryPass<'a> {
    GeometryPass::strip(program, buffer, vertices.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jet_gpu::QUAD_STRIP;

    #[test]
    fn fixture_round_trips_through_shader_loading() {
        let dir = scratch_dir("fixture").unwrap();
        let vs = write_spirv_fixture(&dir, "quad.vs.spirv").unwrap();
        let ps = write_spirv_fixture(&dir, "quad.ps.spirv").unwrap();

        let program = ShaderProgram::load(&vs, &ps).unwrap();
        assert_eq!(program.vertex, SPIRV_HEADER);
        assert_eq!(program.fragment, SPIRV_HEADER);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn mock_device_starts_with_two_images() {
        let (device, log) = mock_device(0).unwrap();
        assert_eq!(device.swapchain().unwrap().images.len(), 2);
        assert_eq!(log.outstanding(ObjectKind::Swapchain), 1);
        assert_eq!(log.outstanding(ObjectKind::ImageView), 2);
        assert_eq!(log.outstanding(ObjectKind::Semaphore), 2);
    }

    #[test]
    fn uploaded_vertices_land_in_memory() {
        let (device, log) = mock_device(0).unwrap();
        let buffer = upload_vertices(&device, &QUAD_STRIP).unwrap();
        let contents = log.memory_contents(buffer.memory).unwrap();
        let expected: &[u8] = bytemuck::cast_slice(&QUAD_STRIP);
        assert_eq!(&contents[..expected.len()], expected);
    }
}
