//! Sample configuration.
//!
//! Configuration is read from an optional TOML file; every key has a
//! default so an empty file (or no file) is valid.
//!
//! ```toml
//! title = "Upload"
//! width = 1280
//! height = 720
//! frame_count = 2
//! asset_dirs = ["assets"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};

/// Settings shared by every sample binary.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SampleConfig {
    /// Sample to run.
    pub sample: String,
    /// Window title.
    pub title: String,
    /// Initial surface width in pixels.
    pub width: u32,
    /// Initial surface height in pixels.
    pub height: u32,
    /// Number of swap chain buffers, and therefore of frame slots.
    pub frame_count: usize,
    /// Enable the Vulkan validation layer when available.
    pub validation: bool,
    /// Run on the host device without a window.
    pub headless: bool,
    /// Stop after this many frames. Headless runs default to 120.
    pub frames: Option<u64>,
    /// Directories searched for relative asset paths, in order.
    pub asset_dirs: Vec<PathBuf>,
    /// Upper bound for CPU fence waits. Unset means wait forever.
    pub wait_timeout_ms: Option<u64>,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            sample: "clear".to_string(),
            title: "GPU Sample".to_string(),
            width: 1280,
            height: 720,
            frame_count: 2,
            validation: cfg!(debug_assertions),
            headless: false,
            frames: None,
            asset_dirs: Vec::new(),
            wait_timeout_ms: None,
        }
    }
}

impl SampleConfig {
    /// Most frame slots a sample may ask for.
    pub const MAX_FRAME_COUNT: usize = 4;

    /// Parses a configuration from TOML text and validates it.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config(format!(
                "surface size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }

        if !(1..=Self::MAX_FRAME_COUNT).contains(&self.frame_count) {
            return Err(Error::Config(format!(
                "frame_count must be between 1 and {}, got {}",
                Self::MAX_FRAME_COUNT,
                self.frame_count
            )));
        }

        Ok(())
    }

    /// Fence wait bound, if one is configured.
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }

    /// Number of frames to run before exiting, if bounded.
    pub fn frame_limit(&self) -> Option<u64> {
        match self.frames {
            Some(frames) => Some(frames),
            None if self.headless => Some(120),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = SampleConfig::from_toml_str("").unwrap();
        assert_eq!(config, SampleConfig::default());
        assert_eq!(config.frame_count, 2);
        assert_eq!(config.wait_timeout(), None);
    }

    #[test]
    fn test_parse_overrides() {
        let config = SampleConfig::from_toml_str(
            r#"
            sample = "upload"
            width = 640
            height = 480
            frame_count = 3
            asset_dirs = ["assets", "/opt/assets"]
            wait_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.sample, "upload");
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.frame_count, 3);
        assert_eq!(config.asset_dirs.len(), 2);
        assert_eq!(config.wait_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_rejects_bad_frame_count() {
        let err = SampleConfig::from_toml_str("frame_count = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let err = SampleConfig::from_toml_str("frame_count = 9").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let err = SampleConfig::from_toml_str("frame_cuont = 2").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_headless_frame_limit() {
        let config = SampleConfig {
            headless: true,
            ..SampleConfig::default()
        };
        assert_eq!(config.frame_limit(), Some(120));
        assert_eq!(SampleConfig::default().frame_limit(), None);
    }
}
