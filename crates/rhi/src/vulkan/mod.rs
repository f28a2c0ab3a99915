//! Vulkan backend.
//!
//! Requires Vulkan 1.3 with timeline semaphores and dynamic rendering.
//! Fences are timeline semaphores; the direct queue comes from a graphics
//! family and the copy queue from a dedicated transfer family when the GPU
//! has one.

mod command;
mod device;
mod instance;
mod physical_device;
mod queue;
mod resource;
mod surface;
mod swapchain;
mod sync;

pub use command::{VulkanCommandAllocator, VulkanCommandList};
pub use device::VulkanDevice;
pub use instance::Instance;
pub use physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, select_physical_device};
pub use queue::VulkanQueue;
pub use resource::{VulkanResource, from_vk_format, to_vk_format};
pub use surface::Surface;
pub use swapchain::{SwapchainSupportDetails, VulkanSwapChain};
pub use sync::{Semaphore, VulkanFence};
