//! Synchronization primitives for Vulkan.
//!
//! - [`VulkanFence`] - a timeline semaphore, the backend's [`Fence`]
//! - [`Semaphore`] - binary semaphore ordering rendering before present
//! - [`HostFence`] - VkFence the CPU waits on after image acquisition

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::debug;

use super::device::DeviceShared;
use crate::device::Fence;
use crate::error::RhiResult;

struct TimelineInner {
    device: Arc<DeviceShared>,
    semaphore: vk::Semaphore,
}

impl Drop for TimelineInner {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed timeline semaphore");
    }
}

/// Timeline semaphore used as a monotonic fence.
///
/// Clones refer to the same semaphore.
#[derive(Clone)]
pub struct VulkanFence {
    inner: Arc<TimelineInner>,
}

impl VulkanFence {
    pub(crate) fn new(device: Arc<DeviceShared>, initial: u64) -> RhiResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        debug!("Created timeline semaphore (initial value {})", initial);

        Ok(Self {
            inner: Arc::new(TimelineInner { device, semaphore }),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.inner.semaphore
    }

    fn wait_nanos(&self, value: u64, timeout: u64) -> RhiResult<bool> {
        let semaphores = [self.inner.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        match unsafe { self.inner.device.handle().wait_semaphores(&wait_info, timeout) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl Fence for VulkanFence {
    fn completed_value(&self) -> RhiResult<u64> {
        let value = unsafe {
            self.inner
                .device
                .handle()
                .get_semaphore_counter_value(self.inner.semaphore)?
        };
        Ok(value)
    }

    fn wait(&self, value: u64) -> RhiResult<()> {
        self.wait_nanos(value, u64::MAX)?;
        Ok(())
    }

    fn wait_timeout(&self, value: u64, timeout: Duration) -> RhiResult<bool> {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        self.wait_nanos(value, nanos)
    }
}

/// Binary semaphore for GPU-to-GPU ordering.
pub struct Semaphore {
    device: Arc<DeviceShared>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates an unsignaled binary semaphore.
    pub(crate) fn new(device: Arc<DeviceShared>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        debug!("Created semaphore");
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed semaphore");
    }
}

/// VkFence the CPU blocks on.
pub struct HostFence {
    device: Arc<DeviceShared>,
    fence: vk::Fence,
}

impl HostFence {
    pub(crate) fn new(device: Arc<DeviceShared>) -> RhiResult<Self> {
        let create_info = vk::FenceCreateInfo::default();
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };
        debug!("Created fence");
        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Waits for the fence, then resets it for reuse.
    pub fn wait_and_reset(&self) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe {
            self.device.handle().wait_for_fences(&fences, true, u64::MAX)?;
            self.device.handle().reset_fences(&fences)?;
        }
        Ok(())
    }
}

impl Drop for HostFence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
        debug!("Destroyed fence");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VulkanFence>();
        assert_send_sync::<Semaphore>();
        assert_send_sync::<HostFence>();
    }
}
