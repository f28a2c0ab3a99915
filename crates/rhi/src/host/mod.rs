//! Software device running GPU queues on host threads.
//!
//! Resources are plain host memory, queues are worker threads and fences are
//! counters guarded by a mutex. Everything the device does is recorded in a
//! [`Journal`], which makes cross-queue ordering observable in tests. Queues
//! can be paused per kind to hold GPU work back, and failures can be
//! injected into buffer creation, execution and present.
//!
//! # Example
//!
//! ```
//! use samples_rhi::host::HostDevice;
//! use samples_rhi::{Device, Fence, Queue, QueueKind};
//!
//! # fn example() -> Result<(), samples_rhi::RhiError> {
//! let device = HostDevice::new();
//! let queue = device.create_queue(QueueKind::Direct)?;
//! let fence = device.create_fence(0)?;
//!
//! queue.signal(&fence, 1)?;
//! fence.wait(1)?;
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

mod command;
mod fence;
mod journal;
mod queue;
mod resource;
mod swapchain;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info};

pub use command::{HostCommandAllocator, HostCommandList};
pub use fence::HostFence;
pub use journal::{CommandRecord, Journal, JournalEvent};
pub use queue::HostQueue;
pub use resource::HostResource;
pub use swapchain::{HOST_SWAP_CHAIN_FORMAT, HostSwapChain};

use crate::device::{Device, Resource, ResourceId};
use crate::error::{RhiError, RhiResult};
use crate::types::{BufferDesc, QueueKind, ResourceDesc, TextureDesc};

#[derive(Default)]
struct DeviceControl {
    queues: Vec<Weak<queue::QueueShared>>,
    paused: Vec<QueueKind>,
    buffers_remaining: Option<usize>,
}

pub(crate) struct DeviceShared {
    journal: Journal,
    next_id: AtomicU64,
    fail_next_present: AtomicBool,
    control: Mutex<DeviceControl>,
}

impl DeviceShared {
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_resource_id(&self) -> ResourceId {
        ResourceId(self.next_id())
    }

    pub(crate) fn take_present_failure(&self) -> bool {
        self.fail_next_present.swap(false, Ordering::SeqCst)
    }

    fn control(&self) -> MutexGuard<'_, DeviceControl> {
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Host implementation of [`Device`].
pub struct HostDevice {
    shared: Arc<DeviceShared>,
}

impl HostDevice {
    pub fn new() -> Self {
        info!("Created host device");
        Self {
            shared: Arc::new(DeviceShared {
                journal: Journal::new(),
                next_id: AtomicU64::new(1),
                fail_next_present: AtomicBool::new(false),
                control: Mutex::new(DeviceControl::default()),
            }),
        }
    }

    /// Event record shared by every object of this device.
    pub fn journal(&self) -> &Journal {
        &self.shared.journal
    }

    /// Creates a swap chain of `buffer_count` textures.
    pub fn create_swap_chain(
        &self,
        buffer_count: usize,
        width: u32,
        height: u32,
    ) -> RhiResult<HostSwapChain> {
        HostSwapChain::new(self.shared.clone(), buffer_count, width, height)
    }

    /// Stops every queue of `kind`, present and future, from starting new
    /// operations.
    pub fn pause_queues(&self, kind: QueueKind) {
        self.set_paused(kind, true);
    }

    /// Lets queues of `kind` run again.
    pub fn resume_queues(&self, kind: QueueKind) {
        self.set_paused(kind, false);
    }

    /// Lets the next `count` buffer creations succeed and fails every one
    /// after that.
    pub fn fail_buffer_creation_after(&self, count: usize) {
        self.shared.control().buffers_remaining = Some(count);
    }

    /// Makes the next swap chain present fail.
    pub fn fail_next_present(&self) {
        self.shared.fail_next_present.store(true, Ordering::SeqCst);
    }

    /// Makes the next `execute` on each existing queue of `kind` fail with
    /// [`RhiError::DeviceLost`].
    pub fn fail_next_execute(&self, kind: QueueKind) {
        let mut control = self.shared.control();
        control.queues.retain(|queue| queue.strong_count() > 0);
        for queue in control.queues.iter().filter_map(Weak::upgrade) {
            if queue.kind() == kind {
                queue.fail_next_execute();
            }
        }
    }

    fn set_paused(&self, kind: QueueKind, paused: bool) {
        let mut control = self.shared.control();
        control.paused.retain(|&k| k != kind);
        if paused {
            control.paused.push(kind);
        }

        control.queues.retain(|queue| queue.strong_count() > 0);
        for queue in control.queues.iter().filter_map(Weak::upgrade) {
            if queue.kind() == kind {
                queue.set_paused(paused);
            }
        }
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for HostDevice {
    type Queue = HostQueue;
    type CommandAllocator = HostCommandAllocator;
    type CommandList = HostCommandList;
    type Fence = HostFence;
    type Resource = HostResource;
    type SwapChain = HostSwapChain;

    fn name(&self) -> &str {
        "host"
    }

    fn create_queue(&self, kind: QueueKind) -> RhiResult<HostQueue> {
        let mut control = self.shared.control();
        let paused = control.paused.contains(&kind);
        let queue = HostQueue::new(kind, self.shared.journal.clone(), paused)?;
        control.queues.push(Arc::downgrade(queue.shared()));
        Ok(queue)
    }

    fn create_command_allocator(&self, kind: QueueKind) -> RhiResult<HostCommandAllocator> {
        Ok(HostCommandAllocator::new(
            self.shared.next_id(),
            kind,
            self.shared.journal.clone(),
        ))
    }

    fn create_command_list(
        &self,
        kind: QueueKind,
        allocator: &HostCommandAllocator,
    ) -> RhiResult<HostCommandList> {
        HostCommandList::new(kind, allocator)
    }

    fn create_fence(&self, initial: u64) -> RhiResult<HostFence> {
        Ok(HostFence::new(
            self.shared.next_id(),
            initial,
            self.shared.journal.clone(),
        ))
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<HostResource> {
        {
            let mut control = self.shared.control();
            if let Some(remaining) = control.buffers_remaining.as_mut() {
                if *remaining == 0 {
                    return Err(RhiError::ResourceError(format!(
                        "failed to create buffer of {} bytes",
                        desc.size
                    )));
                }
                *remaining -= 1;
            }
        }

        let desc = ResourceDesc::Buffer(*desc);
        let resource = HostResource::new(self.shared.next_resource_id(), desc, desc.initial_state());
        debug!("Created host buffer {:?}: {:?}", resource.id(), desc);
        Ok(resource)
    }

    fn create_texture(&self, desc: &TextureDesc) -> RhiResult<HostResource> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "invalid texture description: {:?}",
                desc
            )));
        }

        let desc = ResourceDesc::Texture(*desc);
        let resource = HostResource::new(self.shared.next_resource_id(), desc, desc.initial_state());
        debug!("Created host texture {:?}: {:?}", resource.id(), desc);
        Ok(resource)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::device::{CommandAllocator, CommandList, Fence, Queue, Resource, SwapChain};
    use crate::types::{Format, ResourceBarrier, ResourceState};

    #[test]
    fn test_host_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HostDevice>();
        assert_send_sync::<HostQueue>();
        assert_send_sync::<HostFence>();
        assert_send_sync::<HostResource>();
    }

    #[test]
    fn test_copy_then_read_back() {
        let device = HostDevice::new();
        let queue = device.create_queue(QueueKind::Copy).unwrap();
        let mut allocator = device.create_command_allocator(QueueKind::Copy).unwrap();
        let mut list = device
            .create_command_list(QueueKind::Copy, &allocator)
            .unwrap();
        let fence = device.create_fence(0).unwrap();

        let src = device.create_buffer(&BufferDesc::upload(4)).unwrap();
        let dst = device.create_buffer(&BufferDesc::gpu(4)).unwrap();
        src.write_bytes(0, &[9, 8, 7, 6]).unwrap();

        allocator.reset().unwrap();
        list.reset(&allocator).unwrap();
        list.copy_buffer(&dst, &src, 4);
        list.close().unwrap();
        queue.execute(&list).unwrap();
        queue.signal(&fence, 1).unwrap();
        fence.wait(1).unwrap();

        assert_eq!(dst.read_bytes(0).unwrap(), vec![9, 8, 7, 6]);
        assert!(device.journal().validation_messages().is_empty());
    }

    #[test]
    fn test_open_list_cannot_execute() {
        let device = HostDevice::new();
        let queue = device.create_queue(QueueKind::Direct).unwrap();
        let allocator = device.create_command_allocator(QueueKind::Direct).unwrap();
        let mut list = device
            .create_command_list(QueueKind::Direct, &allocator)
            .unwrap();
        list.reset(&allocator).unwrap();

        assert!(matches!(
            queue.execute(&list),
            Err(RhiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_pause_applies_to_queues_created_later() {
        let device = HostDevice::new();
        device.pause_queues(QueueKind::Copy);

        let queue = device.create_queue(QueueKind::Copy).unwrap();
        let fence = device.create_fence(0).unwrap();
        queue.signal(&fence, 1).unwrap();

        assert!(!fence.wait_timeout(1, Duration::from_millis(30)).unwrap());
        device.resume_queues(QueueKind::Copy);
        fence.wait(1).unwrap();
    }

    #[test]
    fn test_buffer_creation_failure_injection() {
        let device = HostDevice::new();
        device.fail_buffer_creation_after(1);

        assert!(device.create_buffer(&BufferDesc::upload(1)).is_ok());
        assert!(matches!(
            device.create_buffer(&BufferDesc::upload(1)),
            Err(RhiError::ResourceError(_))
        ));
    }

    #[test]
    fn test_execute_failure_injection() {
        let device = HostDevice::new();
        let direct = device.create_queue(QueueKind::Direct).unwrap();
        let copy = device.create_queue(QueueKind::Copy).unwrap();
        let allocator = device.create_command_allocator(QueueKind::Copy).unwrap();
        let mut list = device
            .create_command_list(QueueKind::Copy, &allocator)
            .unwrap();
        list.reset(&allocator).unwrap();
        list.close().unwrap();

        device.fail_next_execute(QueueKind::Direct);
        assert!(copy.execute(&list).is_ok());
        assert!(matches!(direct.execute(&list), Err(RhiError::DeviceLost)));
        assert!(direct.execute(&list).is_ok());
    }

    #[test]
    fn test_clear_and_present() {
        let device = HostDevice::new();
        let queue = device.create_queue(QueueKind::Direct).unwrap();
        let mut allocator = device.create_command_allocator(QueueKind::Direct).unwrap();
        let mut list = device
            .create_command_list(QueueKind::Direct, &allocator)
            .unwrap();
        let fence = device.create_fence(0).unwrap();
        let mut swap_chain = device.create_swap_chain(2, 2, 2).unwrap();

        let index = swap_chain.current_index().unwrap();
        let target = swap_chain.buffer(index).unwrap().clone();

        allocator.reset().unwrap();
        list.reset(&allocator).unwrap();
        list.resource_barrier(&[ResourceBarrier::transition(
            &target,
            ResourceState::Present,
            ResourceState::RenderTarget,
        )]);
        list.clear_texture(&target, [0.0, 0.0, 1.0, 1.0]);
        list.resource_barrier(&[ResourceBarrier::transition(
            &target,
            ResourceState::RenderTarget,
            ResourceState::Present,
        )]);
        list.close().unwrap();
        queue.execute(&list).unwrap();
        swap_chain.present(&queue).unwrap();
        queue.signal(&fence, 1).unwrap();
        fence.wait(1).unwrap();

        let texel = HOST_SWAP_CHAIN_FORMAT.encode_color([0.0, 0.0, 1.0, 1.0]);
        assert_eq!(&target.read_bytes(0).unwrap()[..4], texel.as_slice());
        assert_eq!(swap_chain.current_index().unwrap(), 1);
        assert!(device
            .journal()
            .contains(|event| *event == JournalEvent::Presented { index: 0 }));
        assert!(device.journal().validation_messages().is_empty());
    }

    #[test]
    fn test_present_failure_injection() {
        let device = HostDevice::new();
        let queue = device.create_queue(QueueKind::Direct).unwrap();
        let mut swap_chain = device.create_swap_chain(2, 4, 4).unwrap();

        device.fail_next_present();
        assert!(matches!(
            swap_chain.present(&queue),
            Err(RhiError::SwapchainError(_))
        ));
        assert!(swap_chain.present(&queue).is_ok());
    }

    #[test]
    fn test_swap_chain_resize_keeps_buffer_count() {
        let device = HostDevice::new();
        let mut swap_chain = device.create_swap_chain(3, 4, 4).unwrap();
        swap_chain.resize(8, 2).unwrap();

        assert_eq!(swap_chain.buffer_count(), 3);
        assert_eq!(swap_chain.extent(), (8, 2));
        assert_eq!(swap_chain.format(), Format::Bgra8Unorm);
        let desc = swap_chain.buffer(2).unwrap().desc();
        assert_eq!(desc.subresource_size(0), 8 * 2 * 4);
    }
}
