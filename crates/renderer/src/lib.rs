//! Frame pacing and resource uploads for the GPU samples.
//!
//! This crate provides:
//! - [`FrameScheduler`] - a ring of frame slots paced by one fence
//! - [`StagingUploader`] - copy-queue uploads handed to the direct queue
//! - [`Sample`] and [`SampleRunner`] - the per-sample hooks and main loop
//!
//! Everything is generic over [`samples_rhi::Device`], so the same code runs
//! on the host device in tests and on Vulkan in the sample binaries.

mod error;
pub mod frame;
pub mod frame_scheduler;
pub mod runner;
pub mod sample;
pub mod staging_uploader;

pub use error::{RenderError, RenderResult};
pub use frame::{FrameContext, FrameSlot, SlotState};
pub use frame_scheduler::FrameScheduler;
pub use runner::SampleRunner;
pub use sample::{FrameTiming, Sample};
pub use staging_uploader::{COPY_COMPLETE, StagingUploader, UPLOAD_COMPLETE, UploadReport};

/// Number of frame slots every sample uses unless configured otherwise.
pub const FRAME_COUNT: usize = 2;
