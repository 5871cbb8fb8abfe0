//! Host-visible vertex buffers: memory-type choice and uploads.

use ash::vk;
use jet_gpu::{GpuError, QUAD_STRIP};
use jet_test::{mock_device, upload_vertices, MockEvent, ObjectKind};

#[test]
fn buffer_lands_in_the_first_host_visible_type() {
    let (device, _log) = mock_device(0).unwrap();
    let buffer = device.create_buffer(32).unwrap();

    // Type 0 is device-local only.
    assert_eq!(buffer.memory_type_index, 1);
    assert_eq!(buffer.size, 32);
}

#[test]
fn failed_allocation_falls_back_to_the_next_type() {
    let (device, log) = mock_device(0).unwrap();
    log.fail_memory_type(1);

    let buffer = device.create_buffer(32).unwrap();
    assert_eq!(buffer.memory_type_index, 2);

    let tried: Vec<u32> = log
        .events()
        .into_iter()
        .filter_map(|e| match e {
            MockEvent::AllocateMemory { memory_type_index, .. } => Some(memory_type_index),
            _ => None,
        })
        .collect();
    assert_eq!(tried, vec![1, 2]);
}

#[test]
fn memory_type_bits_are_respected() {
    let (device, log) = mock_device(0).unwrap();
    log.set_buffer_memory_type_bits(0b101);

    let buffer = device.create_buffer(32).unwrap();
    assert_eq!(buffer.memory_type_index, 2);
}

#[test]
fn exhausted_memory_types_leave_nothing_behind() {
    let (device, log) = mock_device(0).unwrap();
    log.fail_memory_type(1);
    log.fail_memory_type(2);

    assert!(matches!(device.create_buffer(32), Err(GpuError::AllocationFailed(_))));
    assert_eq!(log.outstanding(ObjectKind::Buffer), 0);
    assert_eq!(log.outstanding(ObjectKind::Memory), 0);
}

#[test]
fn zero_sized_buffers_are_rejected() {
    let (device, log) = mock_device(0).unwrap();
    assert!(matches!(device.create_buffer(0), Err(GpuError::AllocationFailed(_))));
    assert_eq!(log.outstanding(ObjectKind::Buffer), 0);
}

#[test]
fn upload_maps_copies_flushes_and_unmaps() {
    let (device, log) = mock_device(0).unwrap();
    let buffer = device.create_buffer(32).unwrap();
    log.clear_events();

    let bytes: &[u8] = bytemuck::cast_slice(&QUAD_STRIP);
    device.upload(&buffer, bytes).unwrap();

    assert_eq!(
        log.events(),
        vec![
            MockEvent::MapMemory {
                memory: buffer.memory,
                size: vk::WHOLE_SIZE
            },
            MockEvent::FlushMemory(buffer.memory),
            MockEvent::UnmapMemory(buffer.memory),
        ]
    );
    assert_eq!(&log.memory_contents(buffer.memory).unwrap()[..32], bytes);
}

#[test]
fn empty_upload_does_not_map() {
    let (device, log) = mock_device(0).unwrap();
    let buffer = device.create_buffer(32).unwrap();
    log.clear_events();

    device.upload(&buffer, &[]).unwrap();
    assert!(log.events().is_empty());
    assert!(log.memory_contents(buffer.memory).unwrap().iter().all(|&b| b == 0));
}

#[test]
fn upload_fills_buffers_larger_than_one_block() {
    let (device, log) = mock_device(0).unwrap();
    let buffer = device.create_buffer(200).unwrap();
    let bytes: Vec<u8> = (0..200).map(|i| i as u8).collect();

    device.upload(&buffer, &bytes).unwrap();
    let contents = log.memory_contents(buffer.memory).unwrap();
    assert_eq!(contents.len(), 256);
    assert_eq!(&contents[..200], &bytes[..]);
}

#[test]
fn oversized_upload_is_rejected_before_mapping() {
    let (device, log) = mock_device(0).unwrap();
    let buffer = device.create_buffer(8).unwrap();
    log.clear_events();

    let result = device.upload(&buffer, &[0u8; 16]);
    assert!(matches!(result, Err(GpuError::InvalidState(_))));
    assert!(log.events().is_empty());
}

#[test]
fn upload_to_a_destroyed_buffer_is_rejected() {
    let (device, _log) = mock_device(0).unwrap();
    let mut buffer = upload_vertices(&device, &QUAD_STRIP).unwrap();
    device.destroy_buffer(&mut buffer);

    assert!(matches!(
        device.upload(&buffer, &[1, 2, 3]),
        Err(GpuError::InvalidState(_))
    ));
}
