//! Headless mode: the sample runs on the host device for a fixed number of
//! frames and the host device's validation findings decide the exit status.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use samples_core::{FileResolver, SampleConfig};
use samples_renderer::{Sample, SampleRunner};
use samples_rhi::host::HostDevice;
use tracing::{info, warn};

use crate::samples::Demo;

pub fn run(config: &SampleConfig, resolver: &FileResolver) -> Result<()> {
    let device = Arc::new(HostDevice::new());
    let swap_chain = device.create_swap_chain(config.frame_count, config.width, config.height)?;
    let sample = Demo::by_name(&config.sample, resolver)
        .with_context(|| format!("unknown sample '{}'", config.sample))?;

    let mut runner = SampleRunner::new(device.clone(), swap_chain, sample, config.wait_timeout())?;
    let frames = config.frame_limit().unwrap_or(1);
    runner.run_frames(frames)?;
    let sample = runner.shutdown()?;

    let findings = device.journal().validation_messages();
    for message in &findings {
        warn!("{}", message);
    }
    if !findings.is_empty() {
        bail!(
            "sample '{}' produced {} validation error(s)",
            sample.name(),
            findings.len()
        );
    }

    info!("Rendered {} frame(s) without validation errors", frames);
    Ok(())
}
