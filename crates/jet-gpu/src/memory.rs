//! Host-visible buffers with manual memory-type selection.

use crate::backend::GpuBackend;
use crate::error::{GpuError, Result};
use ash::vk;

/// A buffer and the memory bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    /// Requested size in bytes
    pub size: vk::DeviceSize,
    pub memory_type_index: u32,
}

impl GraphicsBuffer {
    /// Whether the buffer has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.buffer == vk::Buffer::null() && self.memory == vk::DeviceMemory::null()
    }
}

/// Host-visible memory types permitted by `type_bits`, in index order.
pub fn host_visible_memory_types(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
) -> Vec<u32> {
    let count = (properties.memory_type_count as usize).min(properties.memory_types.len());
    properties.memory_types[..count]
        .iter()
        .enumerate()
        .filter(|&(i, ty)| {
            type_bits & (1 << i) != 0
                && ty.property_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        })
        .map(|(i, _)| i as u32)
        .collect()
}

/// Create a vertex buffer of `size` bytes backed by host-visible memory.
///
/// Candidate memory types are tried in index order; the first allocation
/// that succeeds is bound.
pub fn create_buffer<B: GpuBackend>(backend: &B, size: vk::DeviceSize) -> Result<GraphicsBuffer> {
    if size == 0 {
        return Err(GpuError::AllocationFailed("Zero-sized buffer".to_string()));
    }

    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(vk::BufferUsageFlags::VERTEX_BUFFER)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = backend.create_buffer(&buffer_info)?;

    let requirements = backend.buffer_memory_requirements(buffer);
    let candidates = host_visible_memory_types(&backend.memory_properties(), requirements.memory_type_bits);

    let mut allocation = None;
    for &index in &candidates {
        match backend.allocate_memory(requirements.size, index) {
            Ok(memory) => {
                allocation = Some((memory, index));
                break;
            }
            Err(e) => tracing::debug!("Allocation from memory type {index} failed: {e}"),
        }
    }

    let Some((memory, memory_type_index)) = allocation else {
        backend.destroy_buffer(buffer);
        return Err(GpuError::AllocationFailed(format!(
            "No host-visible memory type could hold {} bytes ({} candidates)",
            requirements.size,
            candidates.len()
        )));
    };

    if let Err(e) = backend.bind_buffer_memory(buffer, memory) {
        backend.free_memory(memory);
        backend.destroy_buffer(buffer);
        return Err(e);
    }

    tracing::debug!("Created {size} byte vertex buffer in memory type {memory_type_index}");

    Ok(GraphicsBuffer {
        buffer,
        memory,
        size,
        memory_type_index,
    })
}

/// Copy `data` to the start of `buffer`.
///
/// Maps the whole allocation, copies, flushes it and unmaps. Empty data
/// leaves the buffer untouched.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub fn upload<B: GpuBackend>(backend: &B, buffer: &GraphicsBuffer, data: &[u8]) -> Result<()> {
    if buffer.is_destroyed() {
        return Err(GpuError::InvalidState("Upload to a destroyed buffer".to_string()));
    }
    if data.len() as vk::DeviceSize > buffer.size {
        return Err(GpuError::InvalidState(format!(
            "Upload of {} bytes exceeds buffer size {}",
            data.len(),
            buffer.size
        )));
    }

    if data.is_empty() {
        return Ok(());
    }

    let ptr = backend.map_memory(buffer.memory, vk::WHOLE_SIZE)?;

    // SAFETY: the mapping covers the allocation, which holds at least
    // `buffer.size >= data.len()` bytes, and cannot overlap `data`.
    unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len()) };

    let flushed = backend.flush_memory(buffer.memory);
    backend.unmap_memory(buffer.memory);
    flushed
}

/// Free the memory and destroy the buffer. Calling this again is a no-op.
///
/// The GPU must have finished reading from the buffer.
pub fn destroy_buffer<B: GpuBackend>(backend: &B, buffer: &mut GraphicsBuffer) {
    if buffer.memory != vk::DeviceMemory::null() {
        backend.free_memory(buffer.memory);
        buffer.memory = vk::DeviceMemory::null();
    }
    if buffer.buffer != vk::Buffer::null() {
        backend.destroy_buffer(buffer.buffer);
        buffer.buffer = vk::Buffer::null();
    }
}
