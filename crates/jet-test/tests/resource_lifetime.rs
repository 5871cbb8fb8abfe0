//! Creation and teardown of device-owned objects.

use jet_gpu::{DrawRequest, GpuError, QUAD_STRIP};
use jet_test::{mock_device, strip_pass, stub_program, upload_vertices, ObjectKind};

#[test]
fn shutdown_releases_swapchain_semaphores_and_command_buffers() {
    let (mut device, log) = mock_device(0).unwrap();
    device.draw_frame(&DrawRequest::ClearColor).unwrap();
    assert!(log.outstanding_total() > 0);

    device.shutdown();

    assert!(device.is_shut_down());
    assert!(device.semaphores().is_destroyed());
    assert!(device.swapchain().is_none());
    assert_eq!(log.outstanding_total(), 0);
}

#[test]
fn shutdown_twice_is_harmless() {
    let (mut device, log) = mock_device(0).unwrap();
    device.shutdown();
    log.clear_events();

    device.shutdown();
    assert!(log.events().is_empty());
}

#[test]
fn drop_shuts_down() {
    let (mut device, log) = mock_device(0).unwrap();
    device.draw_frame(&DrawRequest::ClearColor).unwrap();

    drop(device);
    assert_eq!(log.outstanding_total(), 0);
}

#[test]
fn operations_after_shutdown_are_rejected() {
    let (mut device, _log) = mock_device(0).unwrap();
    device.shutdown();

    assert!(matches!(
        device.draw_frame(&DrawRequest::ClearColor),
        Err(GpuError::InvalidState(_))
    ));
    assert!(matches!(device.rebuild_swapchain(), Err(GpuError::InvalidState(_))));
    assert!(matches!(device.create_buffer(64), Err(GpuError::InvalidState(_))));
}

#[test]
fn caller_owned_buffers_survive_frames_until_destroyed() {
    let (mut device, log) = mock_device(0).unwrap();
    let program = stub_program();
    let mut buffer = upload_vertices(&device, &QUAD_STRIP).unwrap();

    for _ in 0..2 {
        device
            .draw_frame(&DrawRequest::Geometry(strip_pass(&program, &buffer, &QUAD_STRIP)))
            .unwrap();
    }
    assert_eq!(log.outstanding(ObjectKind::Buffer), 1);
    assert_eq!(log.outstanding(ObjectKind::Memory), 1);

    device.destroy_buffer(&mut buffer);
    assert!(buffer.is_destroyed());
    assert_eq!(log.outstanding(ObjectKind::Buffer), 0);
    assert_eq!(log.outstanding(ObjectKind::Memory), 0);

    // A second destroy must not touch the backend again.
    device.destroy_buffer(&mut buffer);

    device.shutdown();
    assert_eq!(log.outstanding_total(), 0);
}

#[test]
fn mixed_frames_never_accumulate_objects() {
    let (mut device, log) = mock_device(0).unwrap();
    let program = stub_program();
    let buffer = upload_vertices(&device, &QUAD_STRIP).unwrap();
    let baseline = log.outstanding_total();

    for i in 0..6 {
        if i % 2 == 0 {
            device.draw_frame(&DrawRequest::ClearColor).unwrap();
        } else {
            device
                .draw_frame(&DrawRequest::Geometry(strip_pass(&program, &buffer, &QUAD_STRIP)))
                .unwrap();
        }
        // At most the cached clear command buffer on top of the baseline.
        assert!(log.outstanding_total() <= baseline + 1);
        assert_eq!(log.outstanding_per_frame(), 0);
    }
}
