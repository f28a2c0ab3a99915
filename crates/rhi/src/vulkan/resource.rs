//! Buffers and images with gpu-allocator memory.
//!
//! Resources touched by both queues are created with `CONCURRENT` sharing
//! between the graphics and transfer families, so handing them from the
//! copy queue to the direct queue needs no ownership transfer.

use std::fmt;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use super::device::DeviceShared;
use crate::device::{Resource, ResourceId};
use crate::error::{RhiError, RhiResult};
use crate::types::{BufferDesc, Format, HeapKind, ResourceDesc, TextureDesc};

/// Converts a [`Format`] to its Vulkan equivalent.
pub fn to_vk_format(format: Format) -> vk::Format {
    match format {
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::R32Float => vk::Format::R32_SFLOAT,
    }
}

/// Converts a Vulkan format back, for formats the samples know.
pub fn from_vk_format(format: vk::Format) -> Option<Format> {
    match format {
        vk::Format::R8G8B8A8_UNORM => Some(Format::Rgba8Unorm),
        vk::Format::B8G8R8A8_UNORM => Some(Format::Bgra8Unorm),
        vk::Format::B8G8R8A8_SRGB => Some(Format::Bgra8Srgb),
        vk::Format::R32_SFLOAT => Some(Format::R32Float),
        _ => None,
    }
}

fn memory_location(heap: HeapKind) -> MemoryLocation {
    match heap {
        HeapKind::Upload => MemoryLocation::CpuToGpu,
        HeapKind::Default => MemoryLocation::GpuOnly,
    }
}

pub(crate) enum Backing {
    Buffer {
        buffer: vk::Buffer,
    },
    Image {
        image: vk::Image,
        view: vk::ImageView,
        /// Swap chain images belong to the swap chain.
        owned: bool,
    },
}

struct ResourceInner {
    device: Arc<DeviceShared>,
    id: ResourceId,
    desc: ResourceDesc,
    backing: Backing,
    allocation: Option<Allocation>,
}

impl Drop for ResourceInner {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free allocation of {:?}: {:?}", self.id, e);
                    }
                }
                Err(e) => error!("Leaking allocation of {:?}: {}", self.id, e),
            }
        }

        let device = self.device.handle();
        unsafe {
            match self.backing {
                Backing::Buffer { buffer } => device.destroy_buffer(buffer, None),
                Backing::Image { image, view, owned } => {
                    device.destroy_image_view(view, None);
                    if owned {
                        device.destroy_image(image, None);
                    }
                }
            }
        }
        debug!("Destroyed resource {:?}", self.id);
    }
}

/// Vulkan buffer or image. Clones refer to the same object.
#[derive(Clone)]
pub struct VulkanResource {
    inner: Arc<ResourceInner>,
}

impl VulkanResource {
    pub(crate) fn new_buffer(device: Arc<DeviceShared>, desc: &BufferDesc) -> RhiResult<Self> {
        // Vulkan has no empty buffers; zero-sized ones get one byte of backing.
        let size = desc.size.max(1);
        let families = device.sharing_families();

        let mut buffer_info = vk::BufferCreateInfo::default().size(size).usage(
            vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::UNIFORM_BUFFER,
        );
        buffer_info = if families.len() > 1 {
            buffer_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        } else {
            buffer_info.sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: "buffer",
                    requirements,
                    location: memory_location(desc.heap),
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // From here on Drop releases both the buffer and its memory.
        let resource = Self {
            inner: Arc::new(ResourceInner {
                id: device.next_resource_id(),
                desc: ResourceDesc::Buffer(*desc),
                backing: Backing::Buffer { buffer },
                allocation: Some(allocation),
                device: device.clone(),
            }),
        };
        if let Some(allocation) = &resource.inner.allocation {
            unsafe {
                device
                    .handle()
                    .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
            }
        }

        debug!("Created {:?} buffer: {} bytes", desc.heap, desc.size);
        Ok(resource)
    }

    pub(crate) fn new_texture(device: Arc<DeviceShared>, desc: &TextureDesc) -> RhiResult<Self> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "invalid texture description: {:?}",
                desc
            )));
        }

        let families = device.sharing_families();
        let format = to_vk_format(desc.format);
        let mut image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            )
            .initial_layout(vk::ImageLayout::UNDEFINED);
        image_info = if families.len() > 1 {
            image_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        } else {
            image_info.sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let bound = device
            .allocator()
            .and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name: "texture",
                        requirements,
                        location: MemoryLocation::GpuOnly,
                        linear: false,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(RhiError::from)
            })
            .and_then(|allocation| {
                unsafe {
                    device
                        .handle()
                        .bind_image_memory(image, allocation.memory(), allocation.offset())?;
                }
                let view = create_view(&device, image, format, desc.mip_levels)?;
                Ok((allocation, view))
            });
        let (allocation, view) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        debug!(
            "Created texture: {}x{}, {} mip(s), {:?}",
            desc.width, desc.height, desc.mip_levels, desc.format
        );

        Ok(Self {
            inner: Arc::new(ResourceInner {
                id: device.next_resource_id(),
                desc: ResourceDesc::Texture(*desc),
                backing: Backing::Image {
                    image,
                    view,
                    owned: true,
                },
                allocation: Some(allocation),
                device,
            }),
        })
    }

    /// Wraps a swap chain image. The image itself stays owned by the swap
    /// chain; the view is owned by the returned resource.
    pub(crate) fn from_swapchain_image(
        device: Arc<DeviceShared>,
        image: vk::Image,
        format: Format,
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let view = create_view(&device, image, to_vk_format(format), 1)?;
        Ok(Self {
            inner: Arc::new(ResourceInner {
                id: device.next_resource_id(),
                desc: ResourceDesc::Texture(TextureDesc::new(extent.width, extent.height, format)),
                backing: Backing::Image {
                    image,
                    view,
                    owned: false,
                },
                allocation: None,
                device,
            }),
        })
    }

    pub(crate) fn backing(&self) -> &Backing {
        &self.inner.backing
    }

    /// Buffer handle, if this is a buffer.
    pub fn buffer_handle(&self) -> Option<vk::Buffer> {
        match self.inner.backing {
            Backing::Buffer { buffer } => Some(buffer),
            Backing::Image { .. } => None,
        }
    }

    /// Image handle, if this is a texture.
    pub fn image_handle(&self) -> Option<vk::Image> {
        match self.inner.backing {
            Backing::Image { image, .. } => Some(image),
            Backing::Buffer { .. } => None,
        }
    }

    fn mapped(&self) -> RhiResult<std::ptr::NonNull<std::ffi::c_void>> {
        self.inner
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| {
                RhiError::InvalidArgument(format!("{:?} is not host visible", self.inner.id))
            })
    }
}

fn create_view(
    device: &DeviceShared,
    image: vk::Image,
    format: vk::Format,
    mip_levels: u32,
) -> RhiResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(mip_levels)
                .base_array_layer(0)
                .layer_count(1),
        );
    Ok(unsafe { device.handle().create_image_view(&create_info, None)? })
}

impl fmt::Debug for VulkanResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanResource")
            .field("id", &self.inner.id)
            .field("desc", &self.inner.desc)
            .finish()
    }
}

impl Resource for VulkanResource {
    fn id(&self) -> ResourceId {
        self.inner.id
    }

    fn desc(&self) -> ResourceDesc {
        self.inner.desc
    }

    fn write_bytes(&self, offset: u64, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.inner.desc.heap() != HeapKind::Upload {
            return Err(RhiError::InvalidArgument(format!(
                "{:?} is not in the upload heap",
                self.inner.id
            )));
        }

        let size = self.inner.desc.subresource_size(0);
        let end = offset.checked_add(data.len() as u64).filter(|&end| end <= size);
        if end.is_none() {
            return Err(RhiError::InvalidArgument(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                size
            )));
        }

        let mapped_ptr = self.mapped()?;
        // SAFETY: the range was checked against the buffer size and the
        // allocation stays mapped for the lifetime of the resource.
        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    fn read_bytes(&self, subresource: u32) -> RhiResult<Vec<u8>> {
        if subresource != 0 || self.inner.desc.is_texture() {
            return Err(RhiError::InvalidArgument(format!(
                "{:?} cannot be read back directly",
                self.inner.id
            )));
        }

        let size = self.inner.desc.subresource_size(0) as usize;
        let mapped_ptr = self.mapped()?;
        let mut bytes = vec![0u8; size];
        // SAFETY: the mapping covers at least `size` bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(mapped_ptr.as_ptr().cast::<u8>(), bytes.as_mut_ptr(), size);
        }
        Ok(bytes)
    }
}

// Safety: VulkanResource is Send+Sync because the handles are plain values,
// the allocation is only mutated on drop, and writes through the mapping are
// ordered by the fences guarding GPU use.
unsafe impl Send for ResourceInner {}
unsafe impl Sync for ResourceInner {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_round_trip() {
        for format in [
            Format::Rgba8Unorm,
            Format::Bgra8Unorm,
            Format::Bgra8Srgb,
            Format::R32Float,
        ] {
            assert_eq!(from_vk_format(to_vk_format(format)), Some(format));
        }
        assert_eq!(from_vk_format(vk::Format::D32_SFLOAT), None);
    }

    #[test]
    fn test_memory_location() {
        assert_eq!(memory_location(HeapKind::Upload), MemoryLocation::CpuToGpu);
        assert_eq!(memory_location(HeapKind::Default), MemoryLocation::GpuOnly);
    }

    #[test]
    fn test_resource_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VulkanResource>();
    }
}
