//! Vulkan instance.
//!
//! The samples need Vulkan 1.3 for timeline semaphores, synchronization2-era
//! barriers and dynamic rendering, so instance creation fails early on older
//! loaders. With validation enabled, every message of error severity is
//! counted so that a run can fail on validation errors the same way a host
//! run fails on its journal's findings.
//!
//! ```no_run
//! use samples_rhi::vulkan::Instance;
//!
//! let instance = Instance::new("upload", true, None)?;
//! // ... render ...
//! assert_eq!(instance.validation_error_count(), 0);
//! # Ok::<(), samples_rhi::RhiError>(())
//! ```

use std::borrow::Cow;
use std::ffi::{CStr, CString, c_char, c_void};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::{Entry, vk};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, warn};

use crate::error::{RhiError, RhiResult};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const REQUIRED_API_VERSION: u32 = vk::API_VERSION_1_3;

/// Debug messenger plus the error counter its callback writes to.
struct Validation {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    // Boxed so the address handed to the callback stays put.
    errors: Box<AtomicU64>,
}

/// Vulkan instance, shared through `Arc` by the device and surfaces so that
/// it is destroyed last.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    api_version: u32,
    validation: Option<Validation>,
}

impl Instance {
    /// Loads Vulkan and creates an instance.
    ///
    /// `display` selects the surface extensions; pass `None` for an
    /// instance that never presents. The validation layer is enabled when
    /// `enable_validation` is set and the layer is installed.
    ///
    /// # Errors
    ///
    /// Fails if the loader is missing, reports a version below 1.3, or
    /// lacks the surface extensions `display` needs.
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        display: Option<RawDisplayHandle>,
    ) -> RhiResult<Arc<Self>> {
        let entry = unsafe { Entry::load()? };

        let api_version = unsafe { entry.try_enumerate_instance_version()? }
            .unwrap_or(vk::API_VERSION_1_0);
        if api_version < REQUIRED_API_VERSION {
            return Err(RhiError::InvalidArgument(format!(
                "Vulkan 1.3 required, loader supports {}.{}",
                vk::api_version_major(api_version),
                vk::api_version_minor(api_version)
            )));
        }

        let with_validation = enable_validation && has_layer(&entry, VALIDATION_LAYER)?;
        if enable_validation && !with_validation {
            warn!("Validation layer requested but not installed");
        }

        let mut extensions = surface_extensions(display)?;
        let mut layers: Vec<*const c_char> = Vec::new();
        if with_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        let app_name = CString::new(app_name)
            .map_err(|e| RhiError::InvalidArgument(format!("Invalid application name: {}", e)))?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .engine_name(c"gpu-samples")
            .api_version(REQUIRED_API_VERSION);
        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        info!(
            "Vulkan instance created for '{}' ({} extension(s), validation {})",
            app_name.to_string_lossy(),
            extensions.len(),
            if with_validation { "on" } else { "off" }
        );

        let validation = if with_validation {
            match create_validation(&entry, &instance) {
                Ok(validation) => Some(validation),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Arc::new(Self {
            entry,
            instance,
            api_version: REQUIRED_API_VERSION,
            validation,
        }))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// API version the instance was created for.
    #[inline]
    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    #[inline]
    pub fn has_validation(&self) -> bool {
        self.validation.is_some()
    }

    /// Error-severity validation messages received so far. Always 0
    /// without validation.
    pub fn validation_error_count(&self) -> u64 {
        self.validation
            .as_ref()
            .map_or(0, |validation| validation.errors.load(Ordering::Relaxed))
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some(validation) = &self.validation {
                validation
                    .loader
                    .destroy_debug_utils_messenger(validation.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("Vulkan instance destroyed");
    }
}

fn has_layer(entry: &Entry, name: &CStr) -> RhiResult<bool> {
    let layers = unsafe { entry.enumerate_instance_layer_properties()? };
    Ok(layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str().is_ok_and(|layer| layer == name)))
}

/// Surface extensions for `display`; none when there is no display.
fn surface_extensions(display: Option<RawDisplayHandle>) -> RhiResult<Vec<*const c_char>> {
    match display {
        Some(display) => Ok(ash_window::enumerate_required_extensions(display)?.to_vec()),
        None => Ok(Vec::new()),
    }
}

fn create_validation(entry: &Entry, instance: &ash::Instance) -> RhiResult<Validation> {
    let loader = ash::ext::debug_utils::Instance::new(entry, instance);
    let errors = Box::new(AtomicU64::new(0));

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(on_validation_message))
        .user_data(errors.as_ref() as *const AtomicU64 as *mut c_void);

    let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None)? };
    Ok(Validation {
        loader,
        messenger,
        errors,
    })
}

/// Logs a layer message and counts errors into the `AtomicU64` behind
/// `user_data`.
unsafe extern "system" fn on_validation_message(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user_data: *mut c_void,
) -> vk::Bool32 {
    let message = match unsafe { data.as_ref() } {
        Some(data) if !data.p_message.is_null() => unsafe {
            CStr::from_ptr(data.p_message).to_string_lossy()
        },
        _ => Cow::Borrowed("(no message)"),
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        if let Some(errors) = unsafe { (user_data as *const AtomicU64).as_ref() } {
            errors.fetch_add(1, Ordering::Relaxed);
        }
        error!("[vulkan] {}", message);
    } else {
        warn!("[vulkan] {}", message);
    }

    vk::FALSE
}
