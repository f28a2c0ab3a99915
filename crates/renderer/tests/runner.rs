//! Sample lifecycle through the runner.

use std::sync::Arc;
use std::time::Duration;

use samples_renderer::{
    FrameContext, FrameTiming, RenderError, RenderResult, Sample, SampleRunner, StagingUploader,
};
use samples_rhi::host::{HostDevice, HostResource, JournalEvent};
use samples_rhi::{BufferDesc, Device, Resource, ResourceState};

#[derive(Default)]
struct Recorder {
    vertices: Option<HostResource>,
    updates: Vec<(usize, u64)>,
    rendered: Vec<usize>,
    resizes: Vec<(u32, u32)>,
    fail_at: Option<u64>,
}

impl Sample<HostDevice> for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn on_init(
        &mut self,
        device: &HostDevice,
        uploader: &mut StagingUploader<'_, HostDevice>,
    ) -> RenderResult<()> {
        let vertices = device.create_buffer(&BufferDesc::gpu(12))?;
        uploader.record_copy_data(&vertices, &[5; 12])?;
        self.vertices = Some(vertices);
        Ok(())
    }

    fn on_resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.resizes.push((width, height));
        Ok(())
    }

    fn on_update(&mut self, frame_index: usize, timing: &FrameTiming) -> RenderResult<()> {
        if self.fail_at == Some(timing.frame_number) {
            return Err(RenderError::Sample("update failed".to_string()));
        }
        self.updates.push((frame_index, timing.frame_number));
        Ok(())
    }

    fn on_render(&mut self, frame: &mut FrameContext<'_, HostDevice>) -> RenderResult<()> {
        self.rendered.push(frame.frame_index());
        frame.clear_target([0.0, 0.0, 0.0, 1.0]);
        Ok(())
    }
}

fn runner(device: &Arc<HostDevice>, sample: Recorder) -> SampleRunner<HostDevice, Recorder> {
    let swap_chain = device.create_swap_chain(2, 4, 4).unwrap();
    SampleRunner::new(device.clone(), swap_chain, sample, Some(Duration::from_secs(5))).unwrap()
}

#[test]
fn test_runner_initializes_and_renders() {
    let device = Arc::new(HostDevice::new());
    let mut runner = runner(&device, Recorder::default());

    let report = runner.init_report();
    assert_eq!(report.uploads, 1);
    assert_eq!(report.bytes, 12);

    runner.run_frames(4).unwrap();
    assert_eq!(runner.frames_rendered(), 4);

    let sample = runner.shutdown().unwrap();
    assert_eq!(sample.rendered, vec![0, 1, 0, 1]);
    assert_eq!(sample.updates, vec![(0, 0), (1, 1), (0, 2), (1, 3)]);

    let vertices = sample.vertices.unwrap();
    assert_eq!(vertices.state(), ResourceState::GenericRead);
    assert_eq!(vertices.read_bytes(0).unwrap(), vec![5; 12]);
    assert!(device.journal().validation_messages().is_empty());
}

#[test]
fn test_resize_is_applied_before_the_next_frame() {
    let device = Arc::new(HostDevice::new());
    let mut runner = runner(&device, Recorder::default());

    runner.run_frames(1).unwrap();
    runner.resize(0, 0);
    runner.resize(32, 16);
    assert!(runner.sample().resizes.is_empty());

    runner.run_frames(1).unwrap();
    assert_eq!(runner.sample().resizes, vec![(32, 16)]);
    // The recreated swap chain starts over at buffer 0.
    assert_eq!(runner.sample().rendered, vec![0, 0]);

    runner.shutdown().unwrap();
    assert!(device.journal().validation_messages().is_empty());
}

#[test]
fn test_sample_error_stops_the_frame() {
    let device = Arc::new(HostDevice::new());
    let sample = Recorder {
        fail_at: Some(1),
        ..Recorder::default()
    };
    let mut runner = runner(&device, sample);

    assert!(runner.run_frames(3).is_err());
    assert_eq!(runner.frames_rendered(), 1);

    let sample = runner.shutdown().unwrap();
    assert_eq!(sample.rendered, vec![0]);
    assert_eq!(
        device
            .journal()
            .events()
            .iter()
            .filter(|event| matches!(event, JournalEvent::Presented { .. }))
            .count(),
        1
    );
}
