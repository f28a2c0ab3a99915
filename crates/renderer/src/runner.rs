//! Main loop shared by every sample.
//!
//! [`SampleRunner`] initializes a [`Sample`] through a one-shot
//! [`StagingUploader`], then drives it frame by frame through a
//! [`FrameScheduler`]. Resizes are deferred to the start of the next frame,
//! where the GPU is drained before the swap chain is recreated.

use std::sync::Arc;
use std::time::Duration;

use samples_core::{FpsCounter, Timer};
use samples_rhi::{Device, RhiError, SwapChain};
use tracing::{debug, info};

use crate::error::{RenderError, RenderResult};
use crate::frame_scheduler::FrameScheduler;
use crate::sample::{FrameTiming, Sample};
use crate::staging_uploader::{StagingUploader, UploadReport};

/// Owns a sample and the frame scheduler that renders it.
pub struct SampleRunner<D: Device, S: Sample<D>> {
    scheduler: FrameScheduler<D>,
    sample: S,
    timer: Timer,
    fps: FpsCounter,
    frames_rendered: u64,
    pending_resize: Option<(u32, u32)>,
    init_report: UploadReport,
}

impl<D: Device, S: Sample<D>> SampleRunner<D, S> {
    /// Builds the scheduler and runs the sample's initialization, including
    /// its uploads.
    pub fn new(
        device: Arc<D>,
        swap_chain: D::SwapChain,
        mut sample: S,
        wait_timeout: Option<Duration>,
    ) -> RenderResult<Self> {
        let scheduler =
            FrameScheduler::new(device.clone(), swap_chain)?.with_wait_timeout(wait_timeout);

        let mut uploader = StagingUploader::new(device.as_ref())?;
        sample.on_init(device.as_ref(), &mut uploader)?;
        let init_report = uploader.execute()?;

        info!(
            "Sample '{}' initialized on '{}' ({} upload(s))",
            sample.name(),
            device.name(),
            init_report.uploads
        );

        Ok(Self {
            scheduler,
            sample,
            timer: Timer::new(),
            fps: FpsCounter::new(),
            frames_rendered: 0,
            pending_resize: None,
            init_report,
        })
    }

    /// Requests a resize, applied before the next frame. Zero sizes (a
    /// minimized window) are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            debug!("Ignoring resize to zero dimensions");
            return;
        }
        self.pending_resize = Some((width, height));
    }

    fn apply_resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.scheduler.resize(width, height)?;
        let (width, height) = self.scheduler.swap_chain().extent();
        self.sample.on_resize(width, height)
    }

    /// Renders one frame: begin, update, record and submit, present.
    pub fn render_frame(&mut self) -> RenderResult<()> {
        if let Some((width, height)) = self.pending_resize.take() {
            self.apply_resize(width, height)?;
        }

        let delta = self.timer.tick();
        if let Some(fps) = self.fps.frame(delta) {
            debug!("{}: {} fps", self.sample.name(), fps);
        }

        let index = match self.scheduler.begin_frame() {
            Ok(index) => index,
            Err(RenderError::Rhi(RhiError::SwapchainOutOfDate)) => {
                debug!("Swapchain out of date, recreating before the next frame");
                self.pending_resize = Some(self.scheduler.swap_chain().extent());
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let timing = FrameTiming {
            frame_number: self.frames_rendered,
            delta,
            elapsed: self.timer.elapsed(),
            fps: self.fps.fps(),
        };
        self.sample.on_update(index, &timing)?;

        let sample = &mut self.sample;
        self.scheduler
            .record_and_submit(index, |frame| sample.on_render(frame))?;

        match self.scheduler.present() {
            Ok(()) => {}
            Err(RenderError::Rhi(RhiError::SwapchainOutOfDate)) => {
                debug!("Swapchain out of date after present");
                self.pending_resize = Some(self.scheduler.swap_chain().extent());
            }
            Err(e) => return Err(e),
        }

        self.frames_rendered += 1;
        Ok(())
    }

    /// Renders `frames` frames.
    pub fn run_frames(&mut self, frames: u64) -> RenderResult<()> {
        for _ in 0..frames {
            self.render_frame()?;
        }
        Ok(())
    }

    /// Drains the GPU and hands the sample back.
    pub fn shutdown(mut self) -> RenderResult<S> {
        self.scheduler.wait_idle()?;
        info!(
            "Sample '{}' finished after {} frame(s)",
            self.sample.name(),
            self.frames_rendered
        );
        Ok(self.sample)
    }

    #[inline]
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    #[inline]
    pub fn sample(&self) -> &S {
        &self.sample
    }

    #[inline]
    pub fn scheduler(&self) -> &FrameScheduler<D> {
        &self.scheduler
    }

    /// Uploads performed during initialization.
    #[inline]
    pub fn init_report(&self) -> UploadReport {
        self.init_report
    }
}
