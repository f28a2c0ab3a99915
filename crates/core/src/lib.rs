//! Core utilities shared by every GPU sample.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing and FPS counting
//! - Sample configuration
//! - File lookup across asset directories

mod config;
mod error;
mod file_system;
mod logging;
mod timer;

pub use config::SampleConfig;
pub use error::{Error, Result};
pub use file_system::FileResolver;
pub use logging::init_logging;
pub use timer::{FpsCounter, Timer};
