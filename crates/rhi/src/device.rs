//! Device abstraction traits.
//!
//! A backend implements [`Device`] and names its queue, command, fence,
//! resource and swap chain types through associated types. Code written
//! against these traits runs unchanged on the host backend and on Vulkan.
//!
//! Fences are monotonic `u64` counters. A queue signal sets the fence to a
//! value once all work submitted before it has finished; a queue wait holds
//! back all work submitted after it until the fence reaches a value.

use std::fmt::Debug;
use std::time::Duration;

use crate::error::RhiResult;
use crate::types::{BufferDesc, Format, QueueKind, ResourceBarrier, ResourceDesc, TextureDesc};

/// Opaque identifier of a resource, unique within a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

/// A GPU device and the factory for everything that runs on it.
pub trait Device: Send + Sync + Sized + 'static {
    type Queue: Queue<Self>;
    type CommandAllocator: CommandAllocator;
    type CommandList: CommandList<Self>;
    type Fence: Fence + Clone;
    type Resource: Resource + Clone;
    type SwapChain: SwapChain<Self>;

    /// Human-readable adapter name.
    fn name(&self) -> &str;

    /// Creates a queue of the given kind.
    fn create_queue(&self, kind: QueueKind) -> RhiResult<Self::Queue>;

    /// Creates backing memory for command lists of the given kind.
    fn create_command_allocator(&self, kind: QueueKind) -> RhiResult<Self::CommandAllocator>;

    /// Creates a command list in the closed state. Call
    /// [`CommandList::reset`] to start recording.
    fn create_command_list(
        &self,
        kind: QueueKind,
        allocator: &Self::CommandAllocator,
    ) -> RhiResult<Self::CommandList>;

    /// Creates a fence whose completed value starts at `initial`.
    fn create_fence(&self, initial: u64) -> RhiResult<Self::Fence>;

    /// Creates a buffer. Upload-heap buffers start in `GenericRead`,
    /// default-heap buffers in `CopyDest`.
    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<Self::Resource>;

    /// Creates a 2D texture in the default heap, starting in `CopyDest`.
    fn create_texture(&self, desc: &TextureDesc) -> RhiResult<Self::Resource>;
}

/// A hardware queue executing command lists in submission order.
pub trait Queue<D: Device>: Send + Sync {
    fn kind(&self) -> QueueKind;

    /// Submits a closed command list.
    fn execute(&self, list: &D::CommandList) -> RhiResult<()>;

    /// Sets `fence` to `value` once all previously submitted work is done.
    fn signal(&self, fence: &D::Fence, value: u64) -> RhiResult<()>;

    /// Holds back work submitted after this call until `fence` reaches
    /// `value`. Never blocks the calling thread.
    fn wait(&self, fence: &D::Fence, value: u64) -> RhiResult<()>;
}

/// Backing memory for recorded commands.
pub trait CommandAllocator: Send {
    /// Reclaims the memory of every list recorded from this allocator.
    ///
    /// The caller must ensure no such list is still executing.
    fn reset(&mut self) -> RhiResult<()>;
}

/// A list of GPU commands.
///
/// Recording methods panic if the list is not open; they never fail
/// otherwise, errors surface on [`CommandList::close`] or on submission.
pub trait CommandList<D: Device>: Send {
    /// Reopens the list for recording with memory from `allocator`.
    fn reset(&mut self, allocator: &D::CommandAllocator) -> RhiResult<()>;

    /// Ends recording.
    fn close(&mut self) -> RhiResult<()>;

    fn is_open(&self) -> bool;

    /// Copies `size` bytes from the start of `src` to the start of `dst`.
    fn copy_buffer(&mut self, dst: &D::Resource, src: &D::Resource, size: u64);

    /// Copies tightly packed texels from `src` into one mip of `dst`.
    fn copy_buffer_to_texture(&mut self, dst: &D::Resource, subresource: u32, src: &D::Resource);

    fn resource_barrier(&mut self, barriers: &[ResourceBarrier<'_, D::Resource>]);

    /// Fills a render target with a color. The target must be in the
    /// `RenderTarget` state.
    fn clear_texture(&mut self, target: &D::Resource, color: [f32; 4]);
}

/// A monotonic GPU timeline.
pub trait Fence: Send + Sync {
    /// Highest value the GPU has reached.
    fn completed_value(&self) -> RhiResult<u64>;

    /// Blocks the calling thread until the fence reaches `value`.
    fn wait(&self, value: u64) -> RhiResult<()>;

    /// Like [`Fence::wait`] but gives up after `timeout`. Returns whether
    /// the value was reached.
    fn wait_timeout(&self, value: u64, timeout: Duration) -> RhiResult<bool>;
}

/// A buffer or texture.
pub trait Resource: Send + Sync + Debug {
    fn id(&self) -> ResourceId;

    fn desc(&self) -> ResourceDesc;

    /// Writes bytes into an upload-heap buffer.
    fn write_bytes(&self, offset: u64, data: &[u8]) -> RhiResult<()>;

    /// Reads one subresource back to the CPU. Only resources the CPU can
    /// see support this; the host backend supports it for every resource.
    fn read_bytes(&self, subresource: u32) -> RhiResult<Vec<u8>>;
}

/// A ring of presentable images.
pub trait SwapChain<D: Device>: Send {
    fn buffer_count(&self) -> usize;

    /// Index of the buffer the next frame renders into.
    fn current_index(&mut self) -> RhiResult<usize>;

    /// Returns the buffer at `index`, or `None` when out of range.
    fn buffer(&self, index: usize) -> Option<&D::Resource>;

    /// Presents the current buffer once all work submitted to `queue` so far
    /// has finished.
    fn present(&mut self, queue: &D::Queue) -> RhiResult<()>;

    /// Recreates the buffers at a new size. No buffer may be in use.
    fn resize(&mut self, width: u32, height: u32) -> RhiResult<()>;

    fn extent(&self) -> (u32, u32);

    fn format(&self) -> Format;
}
