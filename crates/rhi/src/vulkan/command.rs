//! Command pools and command buffers.
//!
//! A [`VulkanCommandAllocator`] owns a VkCommandPool. A
//! [`VulkanCommandList`] is a primary command buffer allocated from one pool
//! and stays bound to it: resetting the list against a different allocator
//! is rejected.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use super::device::DeviceShared;
use super::resource::{Backing, VulkanResource};
use crate::device::{CommandAllocator, CommandList, Resource};
use crate::error::{RhiError, RhiResult};
use crate::types::{QueueKind, ResourceBarrier, ResourceDesc, ResourceState};

struct PoolInner {
    device: Arc<DeviceShared>,
    pool: vk::CommandPool,
    kind: QueueKind,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!("Command pool destroyed for {} queue", self.kind);
    }
}

/// VkCommandPool wrapper.
pub struct VulkanCommandAllocator {
    pool: Arc<PoolInner>,
}

impl VulkanCommandAllocator {
    pub(crate) fn new(device: Arc<DeviceShared>, kind: QueueKind) -> RhiResult<Self> {
        let family = device.family(kind);
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        info!("Command pool created for {} queue (family {})", kind, family);

        Ok(Self {
            pool: Arc::new(PoolInner { device, pool, kind }),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool.pool
    }

    #[inline]
    pub fn kind(&self) -> QueueKind {
        self.pool.kind
    }
}

impl CommandAllocator for VulkanCommandAllocator {
    fn reset(&mut self) -> RhiResult<()> {
        unsafe {
            self.pool
                .device
                .handle()
                .reset_command_pool(self.pool.pool, vk::CommandPoolResetFlags::empty())?;
        }
        Ok(())
    }
}

/// Layout, access mask and pipeline stage a resource state maps to.
struct StateInfo {
    layout: vk::ImageLayout,
    access: vk::AccessFlags,
    stage: vk::PipelineStageFlags,
}

fn state_info(state: ResourceState) -> StateInfo {
    match state {
        ResourceState::Common => StateInfo {
            layout: vk::ImageLayout::GENERAL,
            access: vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            stage: vk::PipelineStageFlags::ALL_COMMANDS,
        },
        ResourceState::CopyDest => StateInfo {
            layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            access: vk::AccessFlags::TRANSFER_WRITE,
            stage: vk::PipelineStageFlags::TRANSFER,
        },
        ResourceState::GenericRead => StateInfo {
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            access: vk::AccessFlags::SHADER_READ
                | vk::AccessFlags::TRANSFER_READ
                | vk::AccessFlags::UNIFORM_READ
                | vk::AccessFlags::VERTEX_ATTRIBUTE_READ
                | vk::AccessFlags::INDEX_READ,
            stage: vk::PipelineStageFlags::ALL_COMMANDS,
        },
        ResourceState::RenderTarget => StateInfo {
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            access: vk::AccessFlags::COLOR_ATTACHMENT_READ
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        },
        ResourceState::Present => StateInfo {
            layout: vk::ImageLayout::PRESENT_SRC_KHR,
            access: vk::AccessFlags::empty(),
            stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        },
    }
}

/// Old layout used when leaving `state`. Presented images are acquired with
/// undefined contents.
fn source_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Present => vk::ImageLayout::UNDEFINED,
        other => state_info(other).layout,
    }
}

fn color_range(base_mip: u32, mip_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(base_mip)
        .level_count(mip_count)
        .base_array_layer(0)
        .layer_count(1)
}

/// Primary command buffer.
///
/// Resources referenced by recorded commands are kept alive until the list
/// is reset or dropped.
pub struct VulkanCommandList {
    device: Arc<DeviceShared>,
    kind: QueueKind,
    buffer: vk::CommandBuffer,
    pool: Arc<PoolInner>,
    open: bool,
    retained: Vec<VulkanResource>,
    /// First misuse seen while recording, reported by `close`.
    deferred_error: Option<RhiError>,
}

impl VulkanCommandList {
    pub(crate) fn new(
        device: Arc<DeviceShared>,
        kind: QueueKind,
        allocator: &VulkanCommandAllocator,
    ) -> RhiResult<Self> {
        if allocator.kind() != kind {
            return Err(RhiError::InvalidArgument(format!(
                "{} command list needs a {} allocator, got {}",
                kind,
                kind,
                allocator.kind()
            )));
        }

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(allocator.handle())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { device.handle().allocate_command_buffers(&alloc_info)? };
        let buffer = buffers
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::ResourceError("no command buffer allocated".to_string()))?;

        Ok(Self {
            device,
            kind,
            buffer,
            pool: allocator.pool.clone(),
            open: false,
            retained: Vec::new(),
            deferred_error: None,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    #[inline]
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    fn assert_open(&self) {
        assert!(self.open, "recording into a closed command list");
    }

    fn defer(&mut self, error: RhiError) {
        if self.deferred_error.is_none() {
            self.deferred_error = Some(error);
        }
    }

    fn image_barrier(
        &self,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
        old_layout: vk::ImageLayout,
        before: &StateInfo,
        after: &StateInfo,
    ) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .src_access_mask(before.access)
            .dst_access_mask(after.access)
            .old_layout(old_layout)
            .new_layout(after.layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range)
    }
}

impl CommandList<super::VulkanDevice> for VulkanCommandList {
    fn reset(&mut self, allocator: &VulkanCommandAllocator) -> RhiResult<()> {
        if self.open {
            return Err(RhiError::Validation(
                "resetting a command list that is still open".to_string(),
            ));
        }
        if !Arc::ptr_eq(&self.pool, &allocator.pool) {
            return Err(RhiError::InvalidArgument(
                "command list reset with an allocator other than its own".to_string(),
            ));
        }

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }

        self.retained.clear();
        self.deferred_error = None;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> RhiResult<()> {
        if !self.open {
            return Err(RhiError::Validation(
                "closing a command list that is not open".to_string(),
            ));
        }
        self.open = false;
        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }
        match self.deferred_error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn copy_buffer(&mut self, dst: &VulkanResource, src: &VulkanResource, size: u64) {
        self.assert_open();
        if size == 0 {
            return;
        }
        let (Some(dst_buffer), Some(src_buffer)) = (dst.buffer_handle(), src.buffer_handle())
        else {
            self.defer(RhiError::InvalidArgument(
                "copy_buffer needs two buffers".to_string(),
            ));
            return;
        };
        let dst_size = dst.desc().subresource_size(0);
        let src_size = src.desc().subresource_size(0);
        if size > dst_size || size > src_size {
            self.defer(RhiError::InvalidArgument(format!(
                "copy of {} bytes from {:?} ({} bytes) into {:?} ({} bytes) is out of bounds",
                size,
                src.id(),
                src_size,
                dst.id(),
                dst_size
            )));
            return;
        }

        let region = vk::BufferCopy::default().size(size);
        unsafe {
            self.device.handle().cmd_copy_buffer(
                self.buffer,
                src_buffer,
                dst_buffer,
                std::slice::from_ref(&region),
            );
        }
        self.retained.extend([dst.clone(), src.clone()]);
    }

    fn copy_buffer_to_texture(&mut self, dst: &VulkanResource, subresource: u32, src: &VulkanResource) {
        self.assert_open();
        let (ResourceDesc::Texture(texture), Some(image), Some(src_buffer)) =
            (dst.desc(), dst.image_handle(), src.buffer_handle())
        else {
            self.defer(RhiError::InvalidArgument(
                "copy_buffer_to_texture needs a texture and a buffer".to_string(),
            ));
            return;
        };
        if subresource >= texture.mip_levels {
            self.defer(RhiError::InvalidArgument(format!(
                "mip {} out of range for {:?}",
                subresource,
                dst.id()
            )));
            return;
        }
        let needed = texture.subresource_size(subresource);
        let available = src.desc().subresource_size(0);
        if available < needed {
            self.defer(RhiError::InvalidArgument(format!(
                "{:?} holds {} bytes, mip {} of {:?} needs {}",
                src.id(),
                available,
                subresource,
                dst.id(),
                needed
            )));
            return;
        }

        let copy_dest = state_info(ResourceState::CopyDest);
        let untouched = StateInfo {
            layout: vk::ImageLayout::UNDEFINED,
            access: vk::AccessFlags::empty(),
            stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        };
        let barrier = self.image_barrier(
            image,
            color_range(subresource, 1),
            vk::ImageLayout::UNDEFINED,
            &untouched,
            &copy_dest,
        );

        let (width, height) = texture.mip_extent(subresource);
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(subresource)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });

        unsafe {
            let device = self.device.handle();
            device.cmd_pipeline_barrier(
                self.buffer,
                untouched.stage,
                copy_dest.stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&barrier),
            );
            device.cmd_copy_buffer_to_image(
                self.buffer,
                src_buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
        }
        self.retained.extend([dst.clone(), src.clone()]);
    }

    fn resource_barrier(&mut self, barriers: &[ResourceBarrier<'_, VulkanResource>]) {
        self.assert_open();
        if barriers.is_empty() {
            return;
        }

        let mut src_stage = vk::PipelineStageFlags::empty();
        let mut dst_stage = vk::PipelineStageFlags::empty();
        let mut buffer_barriers = Vec::new();
        let mut image_barriers = Vec::new();

        for barrier in barriers {
            let before = state_info(barrier.before);
            let after = state_info(barrier.after);
            src_stage |= before.stage;
            dst_stage |= after.stage;

            match (barrier.resource.backing(), barrier.resource.desc()) {
                (Backing::Buffer { buffer }, _) => {
                    buffer_barriers.push(
                        vk::BufferMemoryBarrier::default()
                            .src_access_mask(before.access)
                            .dst_access_mask(after.access)
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .buffer(*buffer)
                            .offset(0)
                            .size(vk::WHOLE_SIZE),
                    );
                }
                (Backing::Image { image, .. }, desc) => {
                    image_barriers.push(self.image_barrier(
                        *image,
                        color_range(0, desc.subresource_count()),
                        source_layout(barrier.before),
                        &before,
                        &after,
                    ));
                }
            }
            self.retained.push(barrier.resource.clone());
        }

        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &buffer_barriers,
                &image_barriers,
            );
        }
    }

    fn clear_texture(&mut self, target: &VulkanResource, color: [f32; 4]) {
        self.assert_open();
        let (Backing::Image { view, .. }, ResourceDesc::Texture(texture)) =
            (target.backing(), target.desc())
        else {
            self.defer(RhiError::InvalidArgument(format!(
                "cannot clear buffer {:?}",
                target.id()
            )));
            return;
        };

        let attachment = vk::RenderingAttachmentInfo::default()
            .image_view(*view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            });
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: texture.width,
                    height: texture.height,
                },
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&attachment));

        unsafe {
            let device = self.device.handle();
            device.cmd_begin_rendering(self.buffer, &rendering_info);
            device.cmd_end_rendering(self.buffer);
        }
        self.retained.push(target.clone());
    }
}

impl Drop for VulkanCommandList {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .free_command_buffers(self.pool.pool, std::slice::from_ref(&self.buffer));
        }
    }
}
