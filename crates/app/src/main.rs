//! GPU sample launcher.
//!
//! Runs one of the demo samples either in a window on Vulkan or headless on
//! the host device:
//!
//! ```text
//! gpu-samples [--config <file>] [--sample clear|upload] [--headless] [--frames <n>]
//! ```

mod headless;
mod samples;
mod windowed;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use samples_core::{FileResolver, SampleConfig};
use tracing::info;

/// Command line overrides.
#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    sample: Option<String>,
    headless: bool,
    frames: Option<u64>,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = Args::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let path = args.next().context("--config needs a path")?;
                    parsed.config = Some(PathBuf::from(path));
                }
                "--sample" => {
                    parsed.sample = Some(args.next().context("--sample needs a name")?);
                }
                "--headless" => parsed.headless = true,
                "--frames" => {
                    let count = args.next().context("--frames needs a count")?;
                    parsed.frames = Some(
                        count
                            .parse()
                            .with_context(|| format!("invalid frame count '{}'", count))?,
                    );
                }
                other => bail!("unknown argument '{}'", other),
            }
        }
        Ok(parsed)
    }

    /// Loads the configuration file, if any, and applies the overrides.
    fn into_config(self) -> Result<SampleConfig> {
        let mut config = match &self.config {
            Some(path) => SampleConfig::load(path)?,
            None => SampleConfig::default(),
        };
        if let Some(sample) = self.sample {
            config.sample = sample;
        }
        if self.headless {
            config.headless = true;
        }
        if self.frames.is_some() {
            config.frames = self.frames;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    samples_core::init_logging();

    let config = Args::parse(std::env::args().skip(1))?.into_config()?;
    if !samples::SAMPLE_NAMES.contains(&config.sample.as_str()) {
        bail!(
            "unknown sample '{}', expected one of {:?}",
            config.sample,
            samples::SAMPLE_NAMES
        );
    }

    let resolver = FileResolver::with_directories(config.asset_dirs.iter().cloned());
    info!(
        "Starting sample '{}' ({})",
        config.sample,
        if config.headless { "headless" } else { "windowed" }
    );

    if config.headless {
        headless::run(&config, &resolver)
    } else {
        windowed::run(config, resolver)
    }
}
