//! GPU selection.
//!
//! A GPU qualifies when it runs Vulkan 1.3 with timeline semaphores and
//! dynamic rendering, and has a graphics family that can present to the
//! surface (if any). Among qualifying GPUs, discrete beats integrated beats
//! the rest; ties go to the one with a dedicated transfer family, then to
//! the one with more device-local memory.

use std::cmp::Reverse;
use std::fmt;

use ash::vk;
use tracing::{debug, info};

use super::surface::Surface;
use crate::error::{RhiError, RhiResult};

/// Queue families backing the direct and copy queues.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    /// A transfer-only family when the GPU has one, the graphics family
    /// otherwise.
    pub transfer_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Chooses the first graphics family accepted by `can_present` and the
    /// first family that does nothing but transfers.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        can_present: impl Fn(u32) -> bool,
    ) -> Self {
        let usable = || {
            families
                .iter()
                .zip(0u32..)
                .filter(|(family, _)| family.queue_count > 0)
        };

        let graphics_family = usable()
            .find(|(family, index)| {
                family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && can_present(*index)
            })
            .map(|(_, index)| index);
        let transfer_only = usable()
            .find(|(family, _)| {
                family.queue_flags.contains(vk::QueueFlags::TRANSFER)
                    && !family
                        .queue_flags
                        .intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            })
            .map(|(_, index)| index);

        Self {
            graphics_family,
            transfer_family: transfer_only.or(graphics_family),
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.transfer_family.is_some()
    }

    pub fn has_dedicated_transfer(&self) -> bool {
        self.transfer_family.is_some() && self.transfer_family != self.graphics_family
    }

    /// Distinct families, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families: Vec<u32> = self.graphics_family.into_iter().collect();
        if let Some(transfer) = self.transfer_family
            && !families.contains(&transfer)
        {
            families.push(transfer);
        }
        families
    }
}

/// A GPU that qualified.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub queue_families: QueueFamilyIndices,
    /// Sum of the device-local heaps, in bytes.
    pub device_local_memory: u64,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        device_name(&self.properties)
    }

    /// Sort key; greater is better.
    fn rank(&self) -> (u8, bool, u64) {
        let kind = match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 3,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
            _ => 0,
        };
        (
            kind,
            self.queue_families.has_dedicated_transfer(),
            self.device_local_memory,
        )
    }
}

impl fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.properties.device_type)
            .field("queue_families", &self.queue_families)
            .field("device_local_mb", &(self.device_local_memory >> 20))
            .finish()
    }
}

/// Why a GPU was passed over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Rejection {
    ApiVersion(u32, u32),
    NoGraphicsFamily,
    MissingFeatures,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::ApiVersion(major, minor) => {
                write!(f, "supports Vulkan {}.{}, needs 1.3", major, minor)
            }
            Rejection::NoGraphicsFamily => f.write_str("no graphics family that can present"),
            Rejection::MissingFeatures => {
                f.write_str("timeline semaphores or dynamic rendering missing")
            }
        }
    }
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> &str {
    properties
        .device_name_as_c_str()
        .ok()
        .and_then(|name| name.to_str().ok())
        .unwrap_or("Unknown Device")
}

/// Picks the best qualifying GPU.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if none qualifies.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: Option<&Surface>,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    let selected = devices
        .into_iter()
        .filter_map(|device| match inspect(instance, device, surface) {
            Ok(info) => {
                debug!("GPU '{}' qualifies: {:?}", info.device_name(), info.rank());
                Some(info)
            }
            Err(rejection) => {
                let properties = unsafe { instance.get_physical_device_properties(device) };
                debug!("GPU '{}' skipped: {}", device_name(&properties), rejection);
                None
            }
        })
        .min_by_key(|info| Reverse(info.rank()))
        .ok_or(RhiError::NoSuitableGpu)?;

    info!("Selected GPU: {:?}", selected);
    Ok(selected)
}

fn inspect(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: Option<&Surface>,
) -> Result<PhysicalDeviceInfo, Rejection> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let version = properties.api_version;
    if version < vk::API_VERSION_1_3 {
        return Err(Rejection::ApiVersion(
            vk::api_version_major(version),
            vk::api_version_minor(version),
        ));
    }

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let queue_families = QueueFamilyIndices::find(&families, |family| {
        surface.is_none_or(|surface| surface.supports_present(device, family))
    });
    if !queue_families.is_complete() {
        return Err(Rejection::NoGraphicsFamily);
    }

    let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut features_1_2)
        .push_next(&mut features_1_3);
    unsafe { instance.get_physical_device_features2(device, &mut features) };
    if features_1_2.timeline_semaphore == vk::FALSE || features_1_3.dynamic_rendering == vk::FALSE
    {
        return Err(Rejection::MissingFeatures);
    }

    let memory = unsafe { instance.get_physical_device_memory_properties(device) };
    let device_local_memory = memory
        .memory_heaps_as_slice()
        .iter()
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum();

    Ok(PhysicalDeviceInfo {
        device,
        properties,
        queue_families,
        device_local_memory,
    })
}
