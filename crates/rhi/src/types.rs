//! Backend independent descriptor types.
//!
//! These describe queues, memory heaps, resource states and resources in the
//! vocabulary every backend translates from.

use std::fmt;

/// Kind of hardware queue a command list or queue belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Transfer-only queue.
    Copy,
    /// Graphics queue; accepts copies, barriers, clears and presents.
    Direct,
}

impl QueueKind {
    /// Returns a human-readable name for the queue kind.
    pub fn name(self) -> &'static str {
        match self {
            QueueKind::Copy => "copy",
            QueueKind::Direct => "direct",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Memory heap a resource lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// GPU-resident memory, not mappable.
    Default,
    /// CPU-writable memory read by the GPU. Resources here start in
    /// [`ResourceState::GenericRead`].
    Upload,
}

/// Usage state of a resource as seen by the GPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    /// Destination of copy commands. Default-heap resources start here.
    CopyDest,
    /// Readable by any shader stage or as a copy source.
    GenericRead,
    RenderTarget,
    /// Owned by the presentation engine. Swap chain buffers start here.
    Present,
}

/// Texel formats understood by every backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Rgba8Unorm,
    Bgra8Unorm,
    Bgra8Srgb,
    R32Float,
}

impl Format {
    /// Size of one texel in bytes.
    pub fn bytes_per_pixel(self) -> u64 {
        match self {
            Format::Rgba8Unorm | Format::Bgra8Unorm | Format::Bgra8Srgb | Format::R32Float => 4,
        }
    }

    /// Encodes a linear RGBA color as one texel of this format.
    pub fn encode_color(self, color: [f32; 4]) -> Vec<u8> {
        let unorm = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        match self {
            Format::Rgba8Unorm => color.iter().map(|&c| unorm(c)).collect(),
            Format::Bgra8Unorm | Format::Bgra8Srgb => {
                vec![unorm(color[2]), unorm(color[1]), unorm(color[0]), unorm(color[3])]
            }
            Format::R32Float => bytemuck::bytes_of(&color[0]).to_vec(),
        }
    }
}

/// Describes a linear buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    /// Size in bytes. Zero is allowed.
    pub size: u64,
    pub heap: HeapKind,
}

impl BufferDesc {
    /// Buffer in the upload heap.
    pub fn upload(size: u64) -> Self {
        Self {
            size,
            heap: HeapKind::Upload,
        }
    }

    /// GPU-resident buffer.
    pub fn gpu(size: u64) -> Self {
        Self {
            size,
            heap: HeapKind::Default,
        }
    }
}

/// Describes a 2D texture with a mip chain. Textures always live in the
/// default heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: Format,
}

impl TextureDesc {
    /// Texture with a single mip level.
    pub fn new(width: u32, height: u32, format: Format) -> Self {
        Self {
            width,
            height,
            mip_levels: 1,
            format,
        }
    }

    /// Sets the number of mip levels.
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// Extent of a mip level, never smaller than one texel per side.
    pub fn mip_extent(&self, mip: u32) -> (u32, u32) {
        ((self.width >> mip).max(1), (self.height >> mip).max(1))
    }

    /// Tightly packed byte size of one mip level.
    pub fn subresource_size(&self, mip: u32) -> u64 {
        let (width, height) = self.mip_extent(mip);
        u64::from(width) * u64::from(height) * self.format.bytes_per_pixel()
    }
}

/// Description of any resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceDesc {
    Buffer(BufferDesc),
    Texture(TextureDesc),
}

impl ResourceDesc {
    /// Number of independently addressable subresources.
    pub fn subresource_count(&self) -> u32 {
        match self {
            ResourceDesc::Buffer(_) => 1,
            ResourceDesc::Texture(texture) => texture.mip_levels,
        }
    }

    /// Byte size of a subresource.
    pub fn subresource_size(&self, subresource: u32) -> u64 {
        match self {
            ResourceDesc::Buffer(buffer) => buffer.size,
            ResourceDesc::Texture(texture) => texture.subresource_size(subresource),
        }
    }

    pub fn heap(&self) -> HeapKind {
        match self {
            ResourceDesc::Buffer(buffer) => buffer.heap,
            ResourceDesc::Texture(_) => HeapKind::Default,
        }
    }

    /// State a freshly created resource starts in.
    pub fn initial_state(&self) -> ResourceState {
        match self.heap() {
            HeapKind::Upload => ResourceState::GenericRead,
            HeapKind::Default => ResourceState::CopyDest,
        }
    }

    pub fn is_texture(&self) -> bool {
        matches!(self, ResourceDesc::Texture(_))
    }
}

/// Whole-resource state transition.
#[derive(Debug)]
pub struct ResourceBarrier<'a, R> {
    pub resource: &'a R,
    pub before: ResourceState,
    pub after: ResourceState,
}

impl<'a, R> ResourceBarrier<'a, R> {
    pub fn transition(resource: &'a R, before: ResourceState, after: ResourceState) -> Self {
        Self {
            resource,
            before,
            after,
        }
    }
}

impl<R> Clone for ResourceBarrier<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for ResourceBarrier<'_, R> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subresource_size_halves_per_mip() {
        let desc = TextureDesc::new(256, 128, Format::Rgba8Unorm).with_mip_levels(4);
        assert_eq!(desc.subresource_size(0), 256 * 128 * 4);
        assert_eq!(desc.subresource_size(1), 128 * 64 * 4);
        assert_eq!(desc.subresource_size(3), 32 * 16 * 4);
    }

    #[test]
    fn test_mip_extent_clamps_to_one() {
        let desc = TextureDesc::new(4, 1, Format::R32Float).with_mip_levels(3);
        assert_eq!(desc.mip_extent(2), (1, 1));
        assert_eq!(desc.subresource_size(2), 4);
    }

    #[test]
    fn test_initial_states() {
        assert_eq!(
            ResourceDesc::Buffer(BufferDesc::upload(16)).initial_state(),
            ResourceState::GenericRead
        );
        assert_eq!(
            ResourceDesc::Buffer(BufferDesc::gpu(16)).initial_state(),
            ResourceState::CopyDest
        );
        assert_eq!(
            ResourceDesc::Texture(TextureDesc::new(1, 1, Format::Rgba8Unorm)).initial_state(),
            ResourceState::CopyDest
        );
    }

    #[test]
    fn test_encode_color_swizzles_bgra() {
        let color = [1.0, 0.0, 0.5, 1.0];
        assert_eq!(Format::Rgba8Unorm.encode_color(color), vec![255, 0, 128, 255]);
        assert_eq!(Format::Bgra8Unorm.encode_color(color), vec![128, 0, 255, 255]);
        assert_eq!(Format::R32Float.encode_color(color), 1.0f32.to_ne_bytes().to_vec());
    }
}
