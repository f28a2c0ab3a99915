//! Sample lifecycle hooks.

use std::time::Duration;

use samples_rhi::Device;

use crate::error::RenderResult;
use crate::frame::FrameContext;
use crate::staging_uploader::StagingUploader;

/// Timing handed to [`Sample::on_update`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameTiming {
    /// Frames rendered before this one.
    pub frame_number: u64,
    /// Time since the previous frame.
    pub delta: Duration,
    /// Running time of the sample.
    pub elapsed: Duration,
    /// Frames per second over the last full second.
    pub fps: u32,
}

/// A sample program driven by [`SampleRunner`](crate::SampleRunner).
///
/// Only [`on_render`](Sample::on_render) is required.
pub trait Sample<D: Device> {
    fn name(&self) -> &str;

    /// Creates resources and records their initial contents. The uploader
    /// is executed once this returns.
    fn on_init(&mut self, device: &D, uploader: &mut StagingUploader<'_, D>) -> RenderResult<()> {
        let _ = (device, uploader);
        Ok(())
    }

    /// The swap chain was resized; the GPU is idle.
    fn on_resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        let _ = (width, height);
        Ok(())
    }

    /// CPU-side update before the frame is recorded.
    fn on_update(&mut self, frame_index: usize, timing: &FrameTiming) -> RenderResult<()> {
        let _ = (frame_index, timing);
        Ok(())
    }

    /// Records the frame's commands.
    fn on_render(&mut self, frame: &mut FrameContext<'_, D>) -> RenderResult<()>;
}
