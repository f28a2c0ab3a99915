//! Vulkan logical device.
//!
//! [`VulkanDevice`] implements [`Device`] on top of a VkDevice with one
//! graphics queue (the direct queue) and, when the GPU has one, a queue from
//! a dedicated transfer family (the copy queue). Memory comes from
//! gpu-allocator.
//!
//! # Example
//!
//! ```no_run
//! use samples_rhi::vulkan::{Instance, VulkanDevice};
//! use samples_rhi::{BufferDesc, Device};
//!
//! # fn example() -> Result<(), samples_rhi::RhiError> {
//! let instance = Instance::new("upload", false, None)?;
//! let device = VulkanDevice::new(&instance, None)?;
//! let staging = device.create_buffer(&BufferDesc::upload(1024))?;
//! # Ok(())
//! # }
//! ```

use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use super::command::{VulkanCommandAllocator, VulkanCommandList};
use super::instance::Instance;
use super::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, select_physical_device};
use super::queue::VulkanQueue;
use super::resource::VulkanResource;
use super::surface::Surface;
use super::swapchain::VulkanSwapChain;
use super::sync::VulkanFence;
use crate::device::{Device, ResourceId};
use crate::error::{RhiError, RhiResult};
use crate::types::{BufferDesc, QueueKind, TextureDesc};

/// Required device extensions when presenting.
const PRESENT_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Everything device-level objects need to outlive.
pub(crate) struct DeviceShared {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    queue_families: QueueFamilyIndices,
    graphics_queue: Mutex<vk::Queue>,
    transfer_queue: Option<Mutex<vk::Queue>>,
    next_id: AtomicU64,
    instance: Arc<Instance>,
}

impl DeviceShared {
    #[inline]
    pub(crate) fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub(crate) fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    #[inline]
    pub(crate) fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub(crate) fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    pub(crate) fn allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator
            .lock()
            .map_err(|_| RhiError::ResourceError("allocator lock poisoned".to_string()))
    }

    pub(crate) fn next_resource_id(&self) -> ResourceId {
        ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Queue family backing queues of `kind`.
    pub(crate) fn family(&self, kind: QueueKind) -> u32 {
        let families = &self.queue_families;
        let family = match kind {
            QueueKind::Direct => families.graphics_family,
            QueueKind::Copy => families.transfer_family,
        };
        family.unwrap_or_default()
    }

    /// VkQueue for `kind`, locked for submission.
    pub(crate) fn lock_queue(&self, kind: QueueKind) -> RhiResult<MutexGuard<'_, vk::Queue>> {
        let queue = match (kind, &self.transfer_queue) {
            (QueueKind::Copy, Some(transfer)) => transfer,
            _ => &self.graphics_queue,
        };
        queue
            .lock()
            .map_err(|_| RhiError::InvalidArgument("queue lock poisoned".to_string()))
    }

    /// Sharing parameters for resources touched by both queues.
    pub(crate) fn sharing_families(&self) -> Vec<u32> {
        self.queue_families.unique_families()
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
            // The allocator frees its memory blocks and must go before the device.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: DeviceShared is Send+Sync because:
// - ash::Device is Send+Sync
// - vk::PhysicalDevice is a Copy handle
// - the allocator and both VkQueues are only reached through a Mutex
unsafe impl Send for DeviceShared {}
unsafe impl Sync for DeviceShared {}

/// Vulkan implementation of [`Device`].
pub struct VulkanDevice {
    shared: Arc<DeviceShared>,
    name: String,
}

impl VulkanDevice {
    /// Selects a GPU and creates the logical device.
    ///
    /// Pass the window surface when the device will present; the direct
    /// queue is then guaranteed to support presentation to it.
    ///
    /// # Errors
    ///
    /// Returns an error if no suitable GPU exists, or device or allocator
    /// creation fails.
    pub fn new(instance: &Arc<Instance>, surface: Option<&Surface>) -> RhiResult<Self> {
        let physical_device_info = select_physical_device(instance.handle(), surface)?;
        Self::with_physical_device(instance, &physical_device_info, surface.is_some())
    }

    fn with_physical_device(
        instance: &Arc<Instance>,
        physical_device_info: &PhysicalDeviceInfo,
        present: bool,
    ) -> RhiResult<Self> {
        let queue_families = physical_device_info.queue_families;
        let (Some(graphics_family), Some(transfer_family)) =
            (queue_families.graphics_family, queue_families.transfer_family)
        else {
            return Err(RhiError::NoSuitableGpu);
        };

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true);

        let extension_names: Vec<*const std::ffi::c_char> = if present {
            PRESENT_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect()
        } else {
            Vec::new()
        };

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!(
            "Logical device created with {} extension(s)",
            extension_names.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        debug!("Direct queue retrieved from family {}", graphics_family);

        let transfer_queue = queue_families.has_dedicated_transfer().then(|| {
            debug!("Copy queue retrieved from family {}", transfer_family);
            Mutex::new(unsafe { device.get_device_queue(transfer_family, 0) })
        });
        if transfer_queue.is_none() {
            debug!("No dedicated transfer family, copies share the direct queue");
        }

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("GPU memory allocator initialized");

        Ok(Self {
            shared: Arc::new(DeviceShared {
                device,
                physical_device: physical_device_info.device,
                allocator: ManuallyDrop::new(Mutex::new(allocator)),
                queue_families,
                graphics_queue: Mutex::new(graphics_queue),
                transfer_queue,
                next_id: AtomicU64::new(1),
                instance: instance.clone(),
            }),
            name: physical_device_info.device_name().to_string(),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.shared.device
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.shared.queue_families
    }

    /// Validation errors reported by the instance's debug messenger.
    pub fn validation_error_count(&self) -> u64 {
        self.shared.instance.validation_error_count()
    }

    /// Creates a swap chain presenting to `surface`.
    ///
    /// At least `buffer_count` images are requested; the driver may hand out
    /// more, see [`crate::SwapChain::buffer_count`].
    pub fn create_swap_chain(
        &self,
        surface: Surface,
        buffer_count: usize,
        width: u32,
        height: u32,
    ) -> RhiResult<VulkanSwapChain> {
        VulkanSwapChain::new(self.shared.clone(), surface, buffer_count, width, height)
    }

    /// Blocks until every queue is idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.shared.device.device_wait_idle()? };
        Ok(())
    }
}

impl Device for VulkanDevice {
    type Queue = VulkanQueue;
    type CommandAllocator = VulkanCommandAllocator;
    type CommandList = VulkanCommandList;
    type Fence = VulkanFence;
    type Resource = VulkanResource;
    type SwapChain = VulkanSwapChain;

    fn name(&self) -> &str {
        &self.name
    }

    fn create_queue(&self, kind: QueueKind) -> RhiResult<VulkanQueue> {
        Ok(VulkanQueue::new(self.shared.clone(), kind))
    }

    fn create_command_allocator(&self, kind: QueueKind) -> RhiResult<VulkanCommandAllocator> {
        VulkanCommandAllocator::new(self.shared.clone(), kind)
    }

    fn create_command_list(
        &self,
        kind: QueueKind,
        allocator: &VulkanCommandAllocator,
    ) -> RhiResult<VulkanCommandList> {
        VulkanCommandList::new(self.shared.clone(), kind, allocator)
    }

    fn create_fence(&self, initial: u64) -> RhiResult<VulkanFence> {
        VulkanFence::new(self.shared.clone(), initial)
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<VulkanResource> {
        VulkanResource::new_buffer(self.shared.clone(), desc)
    }

    fn create_texture(&self, desc: &TextureDesc) -> RhiResult<VulkanResource> {
        VulkanResource::new_texture(self.shared.clone(), desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_extensions_defined() {
        assert!(PRESENT_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VulkanDevice>();
    }
}
