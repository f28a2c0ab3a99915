//! Two-queue uploads against the host device.

use std::thread;
use std::time::Duration;

use samples_renderer::{COPY_COMPLETE, RenderError, StagingUploader, UPLOAD_COMPLETE};
use samples_rhi::host::{CommandRecord, HostDevice, HostResource, JournalEvent};
use samples_rhi::{
    BufferDesc, Device, Format, QueueKind, Resource, ResourceId, ResourceState, RhiError,
    TextureDesc,
};

fn executed(events: &[JournalEvent]) -> Vec<(usize, QueueKind, CommandRecord)> {
    events
        .iter()
        .enumerate()
        .filter_map(|(position, event)| match event {
            JournalEvent::Executed { queue, command } => Some((position, *queue, command.clone())),
            _ => None,
        })
        .collect()
}

fn last_copy_to(events: &[JournalEvent], id: ResourceId) -> usize {
    executed(events)
        .into_iter()
        .filter(|(_, _, command)| command.is_copy() && command.destination() == id)
        .map(|(position, _, _)| position)
        .max()
        .unwrap()
}

fn barrier_on(events: &[JournalEvent], id: ResourceId) -> (usize, QueueKind) {
    executed(events)
        .into_iter()
        .find(|(_, _, command)| {
            matches!(command, CommandRecord::Barrier { resource, .. } if *resource == id)
        })
        .map(|(position, queue, _)| (position, queue))
        .unwrap()
}

#[test]
fn test_buffer_round_trip() {
    let device = HostDevice::new();
    let destination = device.create_buffer(&BufferDesc::gpu(256)).unwrap();
    let data: Vec<u8> = (0..=255).collect();

    let mut uploader = StagingUploader::new(&device).unwrap();
    uploader.record_copy_data(&destination, &data).unwrap();
    let report = uploader.execute().unwrap();

    assert_eq!(report.bytes, 256);
    assert_eq!(destination.read_bytes(0).unwrap(), data);
    assert_eq!(destination.state(), ResourceState::GenericRead);
    assert!(device.journal().validation_messages().is_empty());
}

#[test]
fn test_texture_receives_first_mip() {
    let device = HostDevice::new();
    let desc = TextureDesc::new(2, 2, Format::Rgba8Unorm).with_mip_levels(2);
    let texture = device.create_texture(&desc).unwrap();
    let texels = [255, 0, 0, 255, 0, 255, 0, 255, 0, 0, 255, 255, 255, 255, 255, 255];

    let mut uploader = StagingUploader::new(&device).unwrap();
    uploader.record_copy_data(&texture, &texels).unwrap();
    uploader.execute().unwrap();

    assert_eq!(texture.read_bytes(0).unwrap(), texels.to_vec());
    assert!(device.journal().contains(|event| matches!(
        event,
        JournalEvent::Executed {
            queue: QueueKind::Copy,
            command: CommandRecord::CopyBufferToTexture { subresource: 0, .. },
        }
    )));
}

#[test]
fn test_transitions_wait_for_copies() {
    let device = HostDevice::new();
    let vertices = device.create_buffer(&BufferDesc::gpu(48)).unwrap();
    let indices = device.create_buffer(&BufferDesc::gpu(12)).unwrap();

    device.pause_queues(QueueKind::Copy);
    device.pause_queues(QueueKind::Direct);

    thread::scope(|scope| {
        let worker = scope.spawn(|| {
            let mut uploader = StagingUploader::new(&device).unwrap();
            uploader.record_copy_data(&vertices, &[7; 48]).unwrap();
            uploader.record_copy_data(&indices, &[9; 12]).unwrap();
            uploader.execute().unwrap()
        });

        // Let the direct queue run first: it must still hold back until the
        // copy queue has signaled.
        thread::sleep(Duration::from_millis(50));
        device.resume_queues(QueueKind::Direct);
        thread::sleep(Duration::from_millis(50));
        assert!(
            executed(&device.journal().events()).is_empty(),
            "direct queue ran before the copies"
        );

        device.resume_queues(QueueKind::Copy);
        let report = worker.join().unwrap();
        assert_eq!(report.uploads, 2);
        assert_eq!(report.fence_value, UPLOAD_COMPLETE);
    });

    let events = device.journal().events();
    for resource in [&vertices, &indices] {
        let id = resource.id();
        let (barrier, queue) = barrier_on(&events, id);
        assert_eq!(queue, QueueKind::Direct);
        assert!(last_copy_to(&events, id) < barrier);
    }

    let copy_signal = events
        .iter()
        .position(|event| {
            matches!(
                event,
                JournalEvent::Signaled {
                    queue: Some(QueueKind::Copy),
                    value: COPY_COMPLETE,
                    ..
                }
            )
        })
        .unwrap();
    let direct_wait = events
        .iter()
        .position(|event| {
            matches!(
                event,
                JournalEvent::WaitSatisfied {
                    queue: QueueKind::Direct,
                    value: COPY_COMPLETE,
                    ..
                }
            )
        })
        .unwrap();
    assert!(copy_signal < direct_wait);

    assert_eq!(vertices.read_bytes(0).unwrap(), vec![7; 48]);
    assert_eq!(indices.read_bytes(0).unwrap(), vec![9; 12]);
    assert!(device.journal().validation_messages().is_empty());
}

#[test]
fn test_zero_size_upload() {
    let device = HostDevice::new();
    let destination = device.create_buffer(&BufferDesc::gpu(0)).unwrap();

    let mut uploader = StagingUploader::new(&device).unwrap();
    uploader.record_copy_data(&destination, &[]).unwrap();
    let report = uploader.execute().unwrap();

    assert_eq!(report.uploads, 1);
    assert_eq!(report.bytes, 0);
    assert!(device.journal().contains(|event| matches!(
        event,
        JournalEvent::Executed {
            command: CommandRecord::CopyBuffer { size: 0, .. },
            ..
        }
    )));
    assert_eq!(destination.state(), ResourceState::GenericRead);
}

#[test]
fn test_repeated_destination_is_transitioned_once() {
    let device = HostDevice::new();
    let destination = device.create_buffer(&BufferDesc::gpu(8)).unwrap();

    let mut uploader = StagingUploader::new(&device).unwrap();
    uploader.record_copy_data(&destination, &[1; 8]).unwrap();
    uploader.record_copy_data(&destination, &[2; 8]).unwrap();
    let report = uploader.execute().unwrap();

    assert_eq!(report.uploads, 2);
    assert_eq!(report.transitions, 1);
    // Copies land in recording order.
    assert_eq!(destination.read_bytes(0).unwrap(), vec![2; 8]);
    assert!(device.journal().validation_messages().is_empty());
}

#[test]
fn test_staging_allocation_failure() {
    let device = HostDevice::new();
    let destination: HostResource = device.create_buffer(&BufferDesc::gpu(16)).unwrap();

    let mut uploader = StagingUploader::new(&device).unwrap();
    device.fail_buffer_creation_after(1);
    uploader.record_copy_data(&destination, &[3; 16]).unwrap();
    assert!(uploader.record_copy_data(&destination, &[4; 16]).is_err());
    assert_eq!(uploader.pending_uploads(), 1);
}

#[test]
fn test_uploaders_are_independent() {
    let device = HostDevice::new();
    let first = device.create_buffer(&BufferDesc::gpu(4)).unwrap();
    let second = device.create_buffer(&BufferDesc::gpu(4)).unwrap();

    let mut uploader = StagingUploader::new(&device).unwrap();
    uploader.record_copy_data(&first, &[1; 4]).unwrap();
    uploader.execute().unwrap();

    let mut uploader = StagingUploader::new(&device).unwrap();
    uploader.record_copy_data(&second, &[2; 4]).unwrap();
    let report = uploader.execute().unwrap();

    // Each batch has its own fence, so both wait for the same values.
    assert_eq!(report.fence_value, UPLOAD_COMPLETE);
    assert_eq!(first.read_bytes(0).unwrap(), vec![1; 4]);
    assert_eq!(second.read_bytes(0).unwrap(), vec![2; 4]);
}

#[test]
fn test_oversized_buffer_upload_is_rejected() {
    let device = HostDevice::new();
    let destination = device.create_buffer(&BufferDesc::gpu(16)).unwrap();

    let mut uploader = StagingUploader::new(&device).unwrap();
    let result = uploader.record_copy_data(&destination, &[7; 64]);
    assert!(matches!(
        result,
        Err(RenderError::Rhi(RhiError::InvalidArgument(_)))
    ));
    assert_eq!(uploader.pending_uploads(), 0);

    // A shorter upload only fills the front of the buffer.
    uploader.record_copy_data(&destination, &[7; 8]).unwrap();
    uploader.execute().unwrap();
    assert_eq!(&destination.read_bytes(0).unwrap()[..8], &[7; 8]);
    assert!(device.journal().validation_messages().is_empty());
}

#[test]
fn test_mip_uploads_must_match_the_level() {
    let device = HostDevice::new();
    let desc = TextureDesc::new(4, 4, Format::Rgba8Unorm).with_mip_levels(2);
    let texture = device.create_texture(&desc).unwrap();
    let buffer = device.create_buffer(&BufferDesc::gpu(64)).unwrap();

    let mut uploader = StagingUploader::new(&device).unwrap();
    let short = vec![1; desc.subresource_size(1) as usize - 4];
    let full = vec![1; desc.subresource_size(1) as usize];
    let rejected = [
        uploader.record_copy_data_to_subresource(&texture, 1, &short),
        uploader.record_copy_data_to_subresource(&texture, 2, &full),
        uploader.record_copy_data_to_subresource(&buffer, 0, &[1; 16]),
        uploader.record_copy_data(&texture, &full),
    ];
    for result in rejected {
        assert!(matches!(
            result,
            Err(RenderError::Rhi(RhiError::InvalidArgument(_)))
        ));
    }
    assert_eq!(uploader.pending_uploads(), 0);
    assert!(
        !device
            .journal()
            .contains(|event| matches!(event, JournalEvent::Executed { .. }))
    );
}

#[test]
fn test_failed_transition_still_waits_for_copies() {
    let device = HostDevice::new();
    let destination = device.create_buffer(&BufferDesc::gpu(16)).unwrap();

    let mut uploader = StagingUploader::new(&device).unwrap();
    uploader.record_copy_data(&destination, &[6; 16]).unwrap();
    device.pause_queues(QueueKind::Copy);
    device.fail_next_execute(QueueKind::Direct);

    thread::scope(|scope| {
        let worker = scope.spawn(move || uploader.execute());

        thread::sleep(Duration::from_millis(50));
        assert!(!worker.is_finished(), "returned before the copies landed");

        device.resume_queues(QueueKind::Copy);
        let result = worker.join().unwrap();
        assert!(matches!(result, Err(RenderError::Rhi(RhiError::DeviceLost))));
    });

    assert!(device.journal().contains(|event| matches!(
        event,
        JournalEvent::CpuWait {
            value: COPY_COMPLETE,
            ..
        }
    )));
    assert_eq!(destination.read_bytes(0).unwrap(), vec![6; 16]);
}
