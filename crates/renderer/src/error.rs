//! Renderer error types.

use samples_rhi::RhiError;
use thiserror::Error;

/// Errors raised by the frame scheduler, the uploader and sample code.
#[derive(Error, Debug)]
pub enum RenderError {
    /// A device call failed. Never retried.
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// The swap chain reported a frame index with no matching slot
    #[error("Frame index {index} out of range for {slots} slot(s)")]
    SlotOutOfRange { index: usize, slots: usize },

    /// A bounded fence wait expired
    #[error("Timed out waiting for fence value {value}")]
    WaitTimedOut { value: u64 },

    /// Sample-specific failure
    #[error("Sample error: {0}")]
    Sample(String),
}

/// Result type alias for renderer operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;
