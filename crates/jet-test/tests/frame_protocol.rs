//! The acquire / record / submit / present protocol against the mock backend.

use ash::vk::{self, Handle};
use jet_gpu::command::{clear_color_for_image, GEOMETRY_CLEAR_COLOR};
use jet_gpu::{
    DeviceConfig, DrawRequest, FrameConfig, FrameOutcome, FrameState, FrameSubmission, GpuCommand, GpuError,
    QUAD_STRIP, TRIANGLE_LIST,
};
use jet_test::{mock_device, mock_device_with, strip_pass, stub_program, upload_vertices, MockBackend, MockEvent, ObjectKind};
use std::time::Duration;

fn position(events: &[MockEvent], pred: impl Fn(&MockEvent) -> bool) -> usize {
    events
        .iter()
        .position(pred)
        .unwrap_or_else(|| panic!("event not found in {events:#?}"))
}

#[test]
fn clear_frame_runs_steps_in_order() {
    let (mut device, log) = mock_device(0).unwrap();
    log.clear_events();

    let outcome = device.draw_frame(&DrawRequest::ClearColor).unwrap();
    assert_eq!(
        outcome,
        FrameOutcome::Presented {
            image_index: 0,
            swapchain_rebuilt: false
        }
    );

    let events = log.events();
    let acquire = position(&events, |e| matches!(e, MockEvent::Acquire { .. }));
    let record = position(&events, |e| matches!(e, MockEvent::Record { .. }));
    let submit = position(&events, |e| matches!(e, MockEvent::Submit { .. }));
    let present = position(&events, |e| matches!(e, MockEvent::Present { .. }));
    let drain = position(&events, |e| matches!(e, MockEvent::QueueWaitIdle(_)));
    assert!(acquire < record && record < submit && submit < present && present < drain);

    assert_eq!(device.frame_state(), FrameState::Idle);
    assert_eq!(device.frames_presented(), 1);
}

#[test]
fn semaphores_chain_acquire_submit_and_present() {
    let (mut device, log) = mock_device(0).unwrap();
    let semaphores = *device.semaphores();

    device.draw_frame(&DrawRequest::ClearColor).unwrap();

    let acquire_semaphore = log
        .events()
        .into_iter()
        .find_map(|e| match e {
            MockEvent::Acquire { semaphore, timeout_ns, .. } => Some((semaphore, timeout_ns)),
            _ => None,
        })
        .unwrap();
    assert_eq!(acquire_semaphore, (semaphores.image_available, 1_000_000_000));

    let (_, submission) = log.submissions()[0];
    assert_eq!(submission.wait_semaphore, semaphores.image_available);
    assert_eq!(submission.wait_stage, vk::PipelineStageFlags::TRANSFER);
    assert_eq!(submission.signal_semaphore, semaphores.rendering_finished);

    let (_, presentation) = log.presentations()[0];
    assert_eq!(presentation.wait_semaphore, semaphores.rendering_finished);
    assert_eq!(presentation.swapchain, device.swapchain().unwrap().handle);
}

#[test]
fn clear_colour_depends_on_image_index() {
    let (mut device, log) = mock_device(0).unwrap();

    device.draw_frame(&DrawRequest::ClearColor).unwrap();
    device.draw_frame(&DrawRequest::ClearColor).unwrap();

    let colours: Vec<[f32; 4]> = log
        .recordings()
        .iter()
        .flat_map(|(_, _, commands)| commands.clone())
        .filter_map(|c| match c {
            GpuCommand::ClearColorImage { color, .. } => Some(color),
            _ => None,
        })
        .collect();
    assert_eq!(colours, vec![clear_color_for_image(0), clear_color_for_image(1)]);
    assert_eq!(colours[0], [0.0, 0.0, 1.0, 1.0]);
    assert_eq!(colours[1], [0.0, 1.0, 1.0, 1.0]);
}

#[test]
fn clear_command_buffer_is_replaced_not_leaked() {
    let (mut device, log) = mock_device(0).unwrap();

    for _ in 0..5 {
        device.draw_frame(&DrawRequest::ClearColor).unwrap();
        assert_eq!(log.outstanding(ObjectKind::CommandBuffer), 1);
    }
    for (_, usage, _) in log.recordings() {
        assert_eq!(usage, vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
    }

    device.shutdown();
    assert_eq!(log.outstanding(ObjectKind::CommandBuffer), 0);
}

#[test]
fn geometry_frame_releases_everything_it_created() {
    let (mut device, log) = mock_device(0).unwrap();
    let program = stub_program();
    let buffer = upload_vertices(&device, &QUAD_STRIP).unwrap();

    for _ in 0..3 {
        let pass = strip_pass(&program, &buffer, &QUAD_STRIP);
        device.draw_frame(&DrawRequest::Geometry(pass)).unwrap();
        assert_eq!(log.outstanding_per_frame(), 0);
        assert_eq!(log.outstanding(ObjectKind::CommandBuffer), 0);
    }
    assert_eq!(device.frames_presented(), 3);
}

#[test]
fn geometry_frame_records_render_pass_and_draw() {
    let (mut device, log) = mock_device(0).unwrap();
    let program = stub_program();
    let buffer = upload_vertices(&device, &QUAD_STRIP).unwrap();

    device
        .draw_frame(&DrawRequest::Geometry(strip_pass(&program, &buffer, &QUAD_STRIP)))
        .unwrap();

    let (_, _, commands) = log.recordings().pop().unwrap();
    let image = device.swapchain().unwrap().images[0];

    let GpuCommand::ImageBarrier(first) = commands[0] else {
        panic!("expected a barrier first, got {:?}", commands[0]);
    };
    assert_eq!(first.image, image);
    assert_eq!(first.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    assert!(commands.iter().any(|c| matches!(
        c,
        GpuCommand::BeginRenderPass { clear_color, .. } if *clear_color == GEOMETRY_CLEAR_COLOR
    )));
    assert!(commands.contains(&GpuCommand::BindVertexBuffer(buffer.buffer)));
    assert!(commands.contains(&GpuCommand::Draw { vertex_count: 4 }));

    let GpuCommand::ImageBarrier(last) = commands[commands.len() - 1] else {
        panic!("expected a barrier last");
    };
    assert_eq!(last.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
}

#[test]
fn triangle_list_draws_three_vertices() {
    let (mut device, log) = mock_device(0).unwrap();
    let program = stub_program();
    let buffer = upload_vertices(&device, &TRIANGLE_LIST).unwrap();

    let pass = strip_pass(&program, &buffer, &TRIANGLE_LIST)
        .with_topology(vk::PrimitiveTopology::TRIANGLE_LIST);
    device.draw_frame(&DrawRequest::Geometry(pass)).unwrap();

    let (_, _, commands) = log.recordings().pop().unwrap();
    assert!(commands.contains(&GpuCommand::Draw { vertex_count: 3 }));
}

#[test]
fn queues_come_from_the_selected_family() {
    let (mut device, log) = mock_device(3).unwrap();

    let requested: Vec<_> = log
        .events()
        .into_iter()
        .filter_map(|e| match e {
            MockEvent::GetQueue { family, index } => Some((family, index)),
            _ => None,
        })
        .collect();
    assert_eq!(requested, vec![(3, 0), (3, 0)]);

    device.draw_frame(&DrawRequest::ClearColor).unwrap();
    let expected = MockBackend::queue_handle(3, 0);
    assert_eq!(log.submissions()[0].0, expected);
    assert_eq!(log.presentations()[0].0, expected);
    assert!(log.events().contains(&MockEvent::QueueWaitIdle(expected)));
}

#[test]
fn timed_out_acquire_skips_the_frame() {
    let (mut device, log) = mock_device(0).unwrap();
    log.clear_events();
    log.push_acquire(Err(vk::Result::TIMEOUT));

    let outcome = device.draw_frame(&DrawRequest::ClearColor).unwrap();
    assert_eq!(outcome, FrameOutcome::Skipped);
    assert!(log.submissions().is_empty());
    assert!(log.presentations().is_empty());
    assert_eq!(device.frames_presented(), 0);

    let outcome = device.draw_frame(&DrawRequest::ClearColor).unwrap();
    assert!(matches!(outcome, FrameOutcome::Presented { .. }));
}

#[test]
fn repeated_timeouts_are_reported_as_device_loss() {
    let config = DeviceConfig {
        frame: FrameConfig {
            acquire_timeout: Duration::from_millis(10),
            max_acquire_timeouts: 3,
        },
        ..DeviceConfig::default()
    };
    let (mut device, log) = mock_device_with(0, &config).unwrap();
    for _ in 0..3 {
        log.push_acquire(Err(vk::Result::NOT_READY));
    }

    assert_eq!(device.draw_frame(&DrawRequest::ClearColor).unwrap(), FrameOutcome::Skipped);
    assert_eq!(device.draw_frame(&DrawRequest::ClearColor).unwrap(), FrameOutcome::Skipped);
    assert!(matches!(
        device.draw_frame(&DrawRequest::ClearColor),
        Err(GpuError::DeviceLost)
    ));
}

#[test]
fn a_presented_frame_resets_the_timeout_count() {
    let config = DeviceConfig {
        frame: FrameConfig {
            acquire_timeout: Duration::from_millis(10),
            max_acquire_timeouts: 2,
        },
        ..DeviceConfig::default()
    };
    let (mut device, log) = mock_device_with(0, &config).unwrap();
    log.push_acquire(Err(vk::Result::TIMEOUT));
    log.push_acquire(Ok((0, false)));
    log.push_acquire(Err(vk::Result::TIMEOUT));

    assert_eq!(device.draw_frame(&DrawRequest::ClearColor).unwrap(), FrameOutcome::Skipped);
    assert!(matches!(
        device.draw_frame(&DrawRequest::ClearColor).unwrap(),
        FrameOutcome::Presented { .. }
    ));
    assert_eq!(device.draw_frame(&DrawRequest::ClearColor).unwrap(), FrameOutcome::Skipped);
}

#[test]
fn device_loss_on_present_still_cleans_up() {
    let (mut device, log) = mock_device(0).unwrap();
    let program = stub_program();
    let buffer = upload_vertices(&device, &QUAD_STRIP).unwrap();
    log.clear_events();
    log.push_present(Err(vk::Result::ERROR_DEVICE_LOST));

    let result = device.draw_frame(&DrawRequest::Geometry(strip_pass(&program, &buffer, &QUAD_STRIP)));
    assert!(matches!(result, Err(GpuError::DeviceLost)));
    assert_eq!(device.frame_state(), FrameState::Idle);
    assert_eq!(log.outstanding_per_frame(), 0);
    assert_eq!(log.outstanding(ObjectKind::CommandBuffer), 0);

    // A lost device gets no further submissions.
    let events = log.events();
    let submit = position(&events, |e| matches!(e, MockEvent::Submit { .. }));
    let present = position(&events, |e| matches!(e, MockEvent::Present { .. }));
    assert!(submit < present);
    assert_eq!(log.submissions().len(), 1);
}

#[test]
fn failed_pipeline_creation_waits_on_the_acquire_and_releases_the_image() {
    let (mut device, log) = mock_device(0).unwrap();
    let program = stub_program();
    let buffer = upload_vertices(&device, &QUAD_STRIP).unwrap();
    let semaphores = *device.semaphores();
    let old_swapchain = device.swapchain().unwrap().handle;
    log.clear_events();
    log.fail_pipeline_creation(true);

    let result = device.draw_frame(&DrawRequest::Geometry(strip_pass(&program, &buffer, &QUAD_STRIP)));
    assert!(matches!(result, Err(GpuError::PipelineCreation(_))));
    assert_eq!(device.frame_state(), FrameState::Idle);
    assert_eq!(log.outstanding_per_frame(), 0);
    assert!(log.presentations().is_empty());

    // The acquire is followed by an empty batch waiting on its semaphore,
    // then the swapchain holding the unpresented image is replaced.
    let events = log.events();
    let acquire = position(&events, |e| matches!(e, MockEvent::Acquire { signaled: true, .. }));
    let drain = position(&events, |e| matches!(e, MockEvent::Submit { .. }));
    let release = position(&events, |e| *e == MockEvent::Destroy(ObjectKind::Swapchain, old_swapchain.as_raw()));
    assert!(acquire < drain && drain < release);
    assert_eq!(
        log.submissions(),
        vec![(
            MockBackend::queue_handle(0, 0),
            FrameSubmission::wait_only(semaphores.image_available, vk::PipelineStageFlags::ALL_COMMANDS)
        )]
    );
    assert_ne!(device.swapchain().unwrap().handle, old_swapchain);
    assert_eq!(log.signaled_semaphores(), 0);

    log.fail_pipeline_creation(false);
    for _ in 0..2 {
        let outcome = device
            .draw_frame(&DrawRequest::Geometry(strip_pass(&program, &buffer, &QUAD_STRIP)))
            .unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { .. }));
    }
    assert_eq!(log.unwaited_acquires(semaphores.image_available), 0);
    assert_eq!(log.signaled_semaphores(), 0);
    assert_eq!(device.semaphores(), &semaphores);
}

#[test]
fn failed_present_waits_on_rendering_finished() {
    let (mut device, log) = mock_device(0).unwrap();
    let semaphores = *device.semaphores();
    log.clear_events();
    log.push_present(Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY));

    let result = device.draw_frame(&DrawRequest::ClearColor);
    assert!(matches!(result, Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY))));
    assert_eq!(device.frame_state(), FrameState::Idle);

    let submissions = log.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].1.signal_semaphore, semaphores.rendering_finished);
    assert_eq!(
        submissions[1].1,
        FrameSubmission::wait_only(semaphores.rendering_finished, vk::PipelineStageFlags::ALL_COMMANDS)
    );
    let events = log.events();
    let present = position(&events, |e| matches!(e, MockEvent::Present { .. }));
    let drain = events
        .iter()
        .rposition(|e| matches!(e, MockEvent::Submit { submission, .. } if submission.is_empty()))
        .unwrap();
    assert!(present < drain);
    assert_eq!(log.signaled_semaphores(), 0);

    let outcome = device.draw_frame(&DrawRequest::ClearColor).unwrap();
    assert!(matches!(outcome, FrameOutcome::Presented { .. }));
    assert_eq!(log.unwaited_acquires(semaphores.image_available), 0);
}

#[test]
fn failed_submission_replaces_the_semaphores() {
    let (mut device, log) = mock_device(0).unwrap();
    let old = *device.semaphores();
    let old_swapchain = device.swapchain().unwrap().handle;
    log.fail_submissions(true);

    let result = device.draw_frame(&DrawRequest::ClearColor);
    assert!(matches!(result, Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))));
    assert_eq!(device.frame_state(), FrameState::Idle);

    let new = *device.semaphores();
    assert_ne!(new.image_available, old.image_available);
    assert_ne!(new.rendering_finished, old.rendering_finished);
    assert_eq!(log.outstanding(ObjectKind::Semaphore), 2);
    assert_eq!(log.signaled_semaphores(), 0);
    assert_ne!(device.swapchain().unwrap().handle, old_swapchain);

    log.fail_submissions(false);
    let outcome = device.draw_frame(&DrawRequest::ClearColor).unwrap();
    assert!(matches!(outcome, FrameOutcome::Presented { .. }));
    assert_eq!(log.unwaited_acquires(new.image_available), 0);
}

#[test]
fn empty_shader_is_rejected_without_leaks() {
    let (mut device, log) = mock_device(0).unwrap();
    let program = jet_gpu::ShaderProgram::from_words(Vec::new(), Vec::new());
    let buffer = upload_vertices(&device, &QUAD_STRIP).unwrap();
    let semaphores = *device.semaphores();

    let result = device.draw_frame(&DrawRequest::Geometry(strip_pass(&program, &buffer, &QUAD_STRIP)));
    assert!(matches!(result, Err(GpuError::PipelineCreation(_))));
    assert_eq!(log.outstanding_per_frame(), 0);
    assert!(log.recordings().is_empty());
    assert_eq!(log.unwaited_acquires(semaphores.image_available), 0);
    assert_eq!(log.signaled_semaphores(), 0);
}
