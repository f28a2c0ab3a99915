//! RHI-specific error types.

use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[cfg(feature = "vulkan")]
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan
    #[cfg(feature = "vulkan")]
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[cfg(feature = "vulkan")]
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// The swap chain no longer matches the surface and must be resized
    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,

    /// A call was made with arguments the device cannot accept
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Resource creation error
    #[error("Resource error: {0}")]
    ResourceError(String),

    /// The device stopped responding
    #[error("Device lost")]
    DeviceLost,

    /// Debug-layer style usage error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Shader compilation error, carrying the compiler diagnostic
    #[error("Shader error: {0}")]
    ShaderError(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
