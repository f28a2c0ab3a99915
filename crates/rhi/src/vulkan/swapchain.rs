//! Swapchain management.
//!
//! [`VulkanSwapChain`] acquires images lazily: the first call to
//! [`SwapChain::current_index`] after a present acquires the next image and
//! blocks until the presentation engine has released it. Presenting submits
//! an empty batch on the direct queue that signals a per-image semaphore,
//! carrying any pending GPU waits, and queues the present behind it.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use super::device::DeviceShared;
use super::queue::{Submission, VulkanQueue};
use super::resource::{VulkanResource, from_vk_format};
use super::surface::Surface;
use super::sync::{HostFence, Semaphore};
use crate::device::{Queue, SwapChain};
use crate::error::{RhiError, RhiResult};
use crate::types::{Format, QueueKind};

/// Surface capabilities, formats and present modes.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(physical_device: vk::PhysicalDevice, surface: &Surface) -> RhiResult<Self> {
        let loader = surface.loader();
        let handle = surface.handle();
        let capabilities =
            unsafe { loader.get_physical_device_surface_capabilities(physical_device, handle)? };
        let formats =
            unsafe { loader.get_physical_device_surface_formats(physical_device, handle)? };
        let present_modes =
            unsafe { loader.get_physical_device_surface_present_modes(physical_device, handle)? };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Vulkan implementation of [`SwapChain`].
pub struct VulkanSwapChain {
    device: Arc<DeviceShared>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    buffers: Vec<VulkanResource>,
    render_finished: Vec<Semaphore>,
    acquire_fence: HostFence,
    current: Option<usize>,
    requested_count: usize,
    format: Format,
    extent: vk::Extent2D,
    surface: Surface,
}

impl VulkanSwapChain {
    pub(crate) fn new(
        device: Arc<DeviceShared>,
        surface: Surface,
        buffer_count: usize,
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        if buffer_count == 0 {
            return Err(RhiError::InvalidArgument(
                "a swap chain needs at least one buffer".to_string(),
            ));
        }

        let loader = ash::khr::swapchain::Device::new(device.instance().handle(), device.handle());
        let acquire_fence = HostFence::new(device.clone())?;

        let mut swap_chain = Self {
            device,
            loader,
            swapchain: vk::SwapchainKHR::null(),
            buffers: Vec::new(),
            render_finished: Vec::new(),
            acquire_fence,
            current: None,
            requested_count: buffer_count,
            format: Format::Bgra8Srgb,
            extent: vk::Extent2D { width, height },
            surface,
        };
        swap_chain.create(width, height)?;
        Ok(swap_chain)
    }

    /// Creates the swapchain, retiring the current one if any.
    fn create(&mut self, width: u32, height: u32) -> RhiResult<()> {
        let support = SwapchainSupportDetails::query(self.device.physical_device(), &self.surface)?;
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        let (surface_format, format) = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = determine_image_count(&support.capabilities, self.requested_count);

        info!(
            "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images",
            extent.width, extent.height, surface_format.format, present_mode, image_count
        );

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None)? };

        // Views of the retired images go before the retired swapchain.
        self.buffers.clear();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;

        let images = unsafe { self.loader.get_swapchain_images(swapchain)? };
        let buffers = images
            .iter()
            .map(|&image| {
                VulkanResource::from_swapchain_image(self.device.clone(), image, format, extent)
            })
            .collect::<RhiResult<Vec<_>>>()?;
        let mut render_finished = Vec::with_capacity(images.len());
        for _ in &images {
            render_finished.push(Semaphore::new(self.device.clone())?);
        }

        info!("Swapchain created with {} images", buffers.len());

        self.buffers = buffers;
        self.render_finished = render_finished;
        self.format = format;
        self.extent = extent;
        self.current = None;
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    fn acquire(&mut self) -> RhiResult<usize> {
        let acquired = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                vk::Semaphore::null(),
                self.acquire_fence.handle(),
            )
        };
        let (index, suboptimal) = match acquired {
            Ok(acquired) => acquired,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Err(RhiError::SwapchainOutOfDate),
            Err(e) => return Err(e.into()),
        };
        if suboptimal {
            debug!("Acquired image {} from a suboptimal swapchain", index);
        }

        self.acquire_fence.wait_and_reset()?;
        let index = index as usize;
        self.current = Some(index);
        Ok(index)
    }
}

impl SwapChain<super::VulkanDevice> for VulkanSwapChain {
    fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    fn current_index(&mut self) -> RhiResult<usize> {
        match self.current {
            Some(index) => Ok(index),
            None => self.acquire(),
        }
    }

    fn buffer(&self, index: usize) -> Option<&VulkanResource> {
        self.buffers.get(index)
    }

    fn present(&mut self, queue: &VulkanQueue) -> RhiResult<()> {
        if queue.kind() != QueueKind::Direct {
            return Err(RhiError::InvalidArgument(format!(
                "cannot present from the {} queue",
                queue.kind()
            )));
        }

        let index = self.current_index()?;
        let Some(render_finished) = self.render_finished.get(index) else {
            return Err(RhiError::SwapchainError(format!(
                "image index {} out of range",
                index
            )));
        };
        let wait_semaphore = render_finished.handle();

        queue.submit(Submission {
            binary_signal: Some(wait_semaphore),
            ..Default::default()
        })?;

        let swapchains = [self.swapchain];
        let image_indices = [index as u32];
        let wait_semaphores = [wait_semaphore];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        self.current = None;
        let presented = {
            let vk_queue = queue.lock()?;
            unsafe { self.loader.queue_present(*vk_queue, &present_info) }
        };
        match presented {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                warn!("Swapchain out of date after present");
                Err(RhiError::SwapchainOutOfDate)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn resize(&mut self, width: u32, height: u32) -> RhiResult<()> {
        unsafe { self.device.handle().device_wait_idle()? };
        info!("Recreating swapchain for new size: {}x{}", width, height);
        self.create(width, height)
    }

    fn extent(&self) -> (u32, u32) {
        (self.extent.width, self.extent.height)
    }

    fn format(&self) -> Format {
        self.format
    }
}

impl Drop for VulkanSwapChain {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.handle().device_wait_idle() {
                warn!("Failed to wait for device idle before destroying swapchain: {:?}", e);
            }
        }
        let image_count = self.buffers.len();
        self.buffers.clear();
        self.render_finished.clear();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
            info!(
                "Swapchain destroyed (was {}x{}, {} images)",
                self.extent.width, self.extent.height, image_count
            );
        }
    }
}

/// Picks a surface format the samples can describe, preferring sRGB.
fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> RhiResult<(vk::SurfaceFormatKHR, Format)> {
    let preferred = [
        vk::Format::B8G8R8A8_SRGB,
        vk::Format::B8G8R8A8_UNORM,
        vk::Format::R8G8B8A8_UNORM,
    ];

    for wanted in preferred {
        if let Some(&surface_format) = formats.iter().find(|f| {
            f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        }) && let Some(format) = from_vk_format(wanted)
        {
            if wanted != vk::Format::B8G8R8A8_SRGB {
                warn!("Using fallback surface format: {:?}", wanted);
            }
            return Ok((surface_format, format));
        }
    }

    Err(RhiError::SwapchainError(format!(
        "No supported surface format among {:?}",
        formats.iter().map(|f| f.format).collect::<Vec<_>>()
    )))
}

fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        debug!("Selected MAILBOX present mode");
        return vk::PresentModeKHR::MAILBOX;
    }

    // FIFO is always available.
    debug!("Selected FIFO present mode (vsync)");
    vk::PresentModeKHR::FIFO
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// At least `requested` images and never fewer than the surface minimum.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: usize) -> u32 {
    let requested = u32::try_from(requested).unwrap_or(u32::MAX);
    let count = requested.max(capabilities.min_image_count);

    // A max of 0 means unlimited.
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        let (selected, format) = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(format, Format::Bgra8Srgb);
    }

    #[test]
    fn test_choose_surface_format_fallback() {
        let formats = [surface_format(vk::Format::R8G8B8A8_UNORM)];
        let (_, format) = choose_surface_format(&formats).unwrap();
        assert_eq!(format, Format::Rgba8Unorm);
    }

    #[test]
    fn test_choose_surface_format_unknown() {
        let formats = [surface_format(vk::Format::A2B10G10R10_UNORM_PACK32)];
        assert!(matches!(
            choose_surface_format(&formats),
            Err(RhiError::SwapchainError(_))
        ));
    }

    #[test]
    fn test_choose_present_mode() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 1920, 1080);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_choose_extent_clamps() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 1000,
                height: 1000,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 5000, 50);
        assert_eq!((extent.width, extent.height), (1000, 100));
    }

    #[test]
    fn test_image_count_respects_surface_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 4,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities, 2), 3);
        assert_eq!(determine_image_count(&capabilities, 4), 4);
        assert_eq!(determine_image_count(&capabilities, 8), 4);

        let unlimited = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&unlimited, 6), 6);
    }
}
