//! Host swap chain: a ring of textures that are "presented" by journaling
//! which buffer reached the screen.

use std::sync::Arc;

use tracing::{debug, info};

use super::queue::QueueOp;
use super::resource::HostResource;
use super::{DeviceShared, HostDevice, HostQueue};
use crate::device::{Queue, SwapChain};
use crate::error::{RhiError, RhiResult};
use crate::types::{Format, QueueKind, ResourceDesc, ResourceState, TextureDesc};

/// Format of host swap chain buffers.
pub const HOST_SWAP_CHAIN_FORMAT: Format = Format::Bgra8Unorm;

/// Round-robin ring of presentable host textures.
pub struct HostSwapChain {
    device: Arc<DeviceShared>,
    buffers: Vec<HostResource>,
    buffer_count: usize,
    current: usize,
    index_override: Option<usize>,
    extent: (u32, u32),
}

impl HostSwapChain {
    pub(crate) fn new(
        device: Arc<DeviceShared>,
        buffer_count: usize,
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        if buffer_count == 0 {
            return Err(RhiError::InvalidArgument(
                "swap chain needs at least one buffer".to_string(),
            ));
        }

        let buffers = create_buffers(&device, buffer_count, width, height);
        info!(
            "Created host swap chain: {} buffer(s), {}x{}",
            buffer_count, width, height
        );

        Ok(Self {
            device,
            buffers,
            buffer_count,
            current: 0,
            index_override: None,
            extent: (width, height),
        })
    }

    /// Overrides the index reported by [`SwapChain::current_index`], the
    /// way a misbehaving presentation engine might.
    pub fn set_current_index(&mut self, index: Option<usize>) {
        self.index_override = index;
    }
}

fn create_buffers(
    device: &DeviceShared,
    buffer_count: usize,
    width: u32,
    height: u32,
) -> Vec<HostResource> {
    let desc = ResourceDesc::Texture(TextureDesc::new(width, height, HOST_SWAP_CHAIN_FORMAT));
    (0..buffer_count)
        .map(|_| HostResource::new(device.next_resource_id(), desc, ResourceState::Present))
        .collect()
}

impl SwapChain<HostDevice> for HostSwapChain {
    fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    fn current_index(&mut self) -> RhiResult<usize> {
        Ok(self.index_override.unwrap_or(self.current))
    }

    fn buffer(&self, index: usize) -> Option<&HostResource> {
        self.buffers.get(index)
    }

    fn present(&mut self, queue: &HostQueue) -> RhiResult<()> {
        if self.device.take_present_failure() {
            return Err(RhiError::SwapchainError("present failed".to_string()));
        }
        if queue.kind() != QueueKind::Direct {
            return Err(RhiError::InvalidArgument(
                "present requires a direct queue".to_string(),
            ));
        }

        queue.shared().push(QueueOp::Present {
            target: self.buffers[self.current].clone(),
            index: self.current,
        });
        self.current = (self.current + 1) % self.buffer_count;
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> RhiResult<()> {
        self.buffers = create_buffers(&self.device, self.buffer_count, width, height);
        self.current = 0;
        self.extent = (width, height);
        debug!("Host swap chain resized to {}x{}", width, height);
        Ok(())
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn format(&self) -> Format {
        HOST_SWAP_CHAIN_FORMAT
    }
}
