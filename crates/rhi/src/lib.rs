//! Render hardware interface for the GPU samples.
//!
//! Backends implement the traits in [`device`]:
//! - [`host`] runs queues on worker threads and journals every command,
//!   which makes synchronization observable in tests
//! - `vulkan` (feature `vulkan`, on by default) drives a real GPU through `ash`
//!
//! The vocabulary shared by both lives in [`types`].

mod error;

pub mod device;
pub mod host;
pub mod shader;
pub mod types;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use device::{
    CommandAllocator, CommandList, Device, Fence, Queue, Resource, ResourceId, SwapChain,
};
pub use error::{RhiError, RhiResult};
pub use types::{
    BufferDesc, Format, HeapKind, QueueKind, ResourceBarrier, ResourceDesc, ResourceState,
    TextureDesc,
};

// Re-export ash types that users might need
#[cfg(feature = "vulkan")]
pub use ash::vk;
