//! Two-queue staging uploads.
//!
//! [`StagingUploader`] copies CPU bytes into GPU-resident resources. Each
//! upload gets its own upload-heap staging buffer; the copies run on a copy
//! queue and the state transitions that make the destinations readable run
//! on a direct queue. One fence orders the two:
//!
//! ```text
//! copy queue:    execute(copies) ─ signal(1)
//!                                      │
//! direct queue:               wait(1) ─┴─ execute(transitions) ─ signal(2)
//!                                                                   │
//! CPU:                                                      wait(2) ┘
//! ```
//!
//! An uploader is used for one burst of uploads and consumed by
//! [`StagingUploader::execute`].

use samples_rhi::{
    BufferDesc, CommandList, Device, Fence, Queue, QueueKind, Resource, ResourceBarrier,
    ResourceState, RhiError,
};
use tracing::{debug, info, warn};

use crate::error::{RenderError, RenderResult};

/// Fence value the copy queue signals once every copy has landed.
pub const COPY_COMPLETE: u64 = 1;
/// Fence value the direct queue signals once every transition has run.
pub const UPLOAD_COMPLETE: u64 = 2;

/// Summary of an executed upload batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Number of recorded uploads, one staging buffer each.
    pub uploads: usize,
    /// Number of distinct destinations transitioned.
    pub transitions: usize,
    /// Total bytes staged.
    pub bytes: u64,
    /// Fence value waited for.
    pub fence_value: u64,
}

/// One-shot batch of uploads through a copy queue and a direct queue.
pub struct StagingUploader<'a, D: Device> {
    device: &'a D,
    copy_queue: D::Queue,
    direct_queue: D::Queue,
    /// Backing memory of the two lists.
    _copy_allocator: D::CommandAllocator,
    _direct_allocator: D::CommandAllocator,
    copy_list: D::CommandList,
    direct_list: D::CommandList,
    fence: D::Fence,
    /// Kept alive until the batch's fence wait returns.
    staging: Vec<D::Resource>,
    /// Destinations awaiting `CopyDest → GenericRead`, at most once each.
    transitions: Vec<D::Resource>,
    bytes: u64,
}

impl<'a, D: Device> StagingUploader<'a, D> {
    /// Creates both queues, their command lists (open) and the fence.
    pub fn new(device: &'a D) -> RenderResult<Self> {
        let copy_queue = device.create_queue(QueueKind::Copy)?;
        let direct_queue = device.create_queue(QueueKind::Direct)?;

        let copy_allocator = device.create_command_allocator(QueueKind::Copy)?;
        let direct_allocator = device.create_command_allocator(QueueKind::Direct)?;
        let mut copy_list = device.create_command_list(QueueKind::Copy, &copy_allocator)?;
        let mut direct_list = device.create_command_list(QueueKind::Direct, &direct_allocator)?;
        copy_list.reset(&copy_allocator)?;
        direct_list.reset(&direct_allocator)?;

        let fence = device.create_fence(0)?;

        debug!("Staging uploader created on '{}'", device.name());

        Ok(Self {
            device,
            copy_queue,
            direct_queue,
            _copy_allocator: copy_allocator,
            _direct_allocator: direct_allocator,
            copy_list,
            direct_list,
            fence,
            staging: Vec::new(),
            transitions: Vec::new(),
            bytes: 0,
        })
    }

    /// Uploads `data` to the start of `destination`.
    ///
    /// Textures receive the data in their first mip level. `destination`
    /// must be in the `CopyDest` state.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] if `data` does not fit a buffer
    /// destination or is not exactly one mip of a texture destination; in
    /// that case nothing is recorded. Any other error comes from creating or
    /// writing the staging buffer and leaves the batch unusable.
    pub fn record_copy_data(&mut self, destination: &D::Resource, data: &[u8]) -> RenderResult<()> {
        check_fits(destination, 0, data.len())?;
        let staging = self.stage(data)?;
        if destination.desc().is_texture() {
            self.copy_list
                .copy_buffer_to_texture(destination, 0, &staging);
        } else {
            self.copy_list
                .copy_buffer(destination, &staging, data.len() as u64);
        }
        self.finish_record(destination, staging);
        Ok(())
    }

    /// Uploads tightly packed texels into mip level `subresource` of a
    /// texture.
    ///
    /// # Errors
    ///
    /// Same as [`record_copy_data`](Self::record_copy_data); `subresource`
    /// must also exist.
    pub fn record_copy_data_to_subresource(
        &mut self,
        destination: &D::Resource,
        subresource: u32,
        data: &[u8],
    ) -> RenderResult<()> {
        if !destination.desc().is_texture() {
            return Err(invalid(format!(
                "{:?} is a buffer, not a texture",
                destination.id()
            )));
        }
        check_fits(destination, subresource, data.len())?;
        let staging = self.stage(data)?;
        self.copy_list
            .copy_buffer_to_texture(destination, subresource, &staging);
        self.finish_record(destination, staging);
        Ok(())
    }

    fn stage(&self, data: &[u8]) -> RenderResult<D::Resource> {
        let staging = self
            .device
            .create_buffer(&BufferDesc::upload(data.len() as u64))?;
        staging.write_bytes(0, data)?;
        Ok(staging)
    }

    fn finish_record(&mut self, destination: &D::Resource, staging: D::Resource) {
        let size = staging.desc().subresource_size(0);
        self.bytes += size;
        self.staging.push(staging);

        let id = destination.id();
        if !self.transitions.iter().any(|pending| pending.id() == id) {
            self.transitions.push(destination.clone());
        }
        debug!("Recorded upload of {} bytes to {:?}", size, id);
    }

    /// Number of uploads recorded so far.
    #[inline]
    pub fn pending_uploads(&self) -> usize {
        self.staging.len()
    }

    /// Bytes staged so far.
    #[inline]
    pub fn pending_bytes(&self) -> u64 {
        self.bytes
    }

    /// Destinations that will be transitioned by [`execute`](Self::execute).
    #[inline]
    pub fn pending_transitions(&self) -> usize {
        self.transitions.len()
    }

    /// Runs the batch and blocks until every destination is readable.
    ///
    /// Staging buffers are released only after the wait returns. If a step
    /// fails once the copies were submitted, the copies are still waited
    /// for before the error is returned.
    pub fn execute(mut self) -> RenderResult<UploadReport> {
        let barriers: Vec<ResourceBarrier<'_, D::Resource>> = self
            .transitions
            .iter()
            .map(|resource| {
                ResourceBarrier::transition(
                    resource,
                    ResourceState::CopyDest,
                    ResourceState::GenericRead,
                )
            })
            .collect();
        if !barriers.is_empty() {
            self.direct_list.resource_barrier(&barriers);
        }

        self.copy_list.close()?;
        self.direct_list.close()?;

        self.copy_queue.execute(&self.copy_list)?;
        self.copy_queue.signal(&self.fence, COPY_COMPLETE)?;

        if let Err(e) = self.transition_and_wait() {
            warn!("Upload failed, draining the copy queue: {}", e);
            if let Err(drain) = self.fence.wait(COPY_COMPLETE) {
                warn!("Copy queue did not drain: {}", drain);
            }
            return Err(e);
        }

        let report = UploadReport {
            uploads: self.staging.len(),
            transitions: self.transitions.len(),
            bytes: self.bytes,
            fence_value: UPLOAD_COMPLETE,
        };
        info!(
            "Uploaded {} bytes in {} upload(s), {} transition(s)",
            report.bytes, report.uploads, report.transitions
        );
        Ok(report)
    }

    fn transition_and_wait(&self) -> RenderResult<()> {
        self.direct_queue.wait(&self.fence, COPY_COMPLETE)?;
        self.direct_queue.execute(&self.direct_list)?;
        self.direct_queue.signal(&self.fence, UPLOAD_COMPLETE)?;
        self.fence.wait(UPLOAD_COMPLETE)?;
        Ok(())
    }
}

/// Buffers take at most their size; a texture mip takes exactly its size.
fn check_fits<R: Resource>(destination: &R, subresource: u32, len: usize) -> RenderResult<()> {
    let desc = destination.desc();
    if subresource >= desc.subresource_count() {
        return Err(invalid(format!(
            "subresource {} out of range for {:?} ({} subresource(s))",
            subresource,
            destination.id(),
            desc.subresource_count()
        )));
    }

    let capacity = desc.subresource_size(subresource);
    let len = len as u64;
    let fits = if desc.is_texture() {
        len == capacity
    } else {
        len <= capacity
    };
    if !fits {
        return Err(invalid(format!(
            "{} bytes do not fit subresource {} of {:?} ({} bytes)",
            len,
            subresource,
            destination.id(),
            capacity
        )));
    }
    Ok(())
}

fn invalid(message: String) -> RenderError {
    RhiError::InvalidArgument(message).into()
}

#[cfg(test)]
mod tests {
    use samples_rhi::host::HostDevice;
    use samples_rhi::{Format, TextureDesc};

    use super::*;

    #[test]
    fn test_counts_uploads_and_bytes() {
        let device = HostDevice::new();
        let vertices = device.create_buffer(&BufferDesc::gpu(64)).unwrap();
        let indices = device.create_buffer(&BufferDesc::gpu(16)).unwrap();

        let mut uploader = StagingUploader::new(&device).unwrap();
        uploader.record_copy_data(&vertices, &[1; 64]).unwrap();
        uploader.record_copy_data(&indices, &[2; 16]).unwrap();

        assert_eq!(uploader.pending_uploads(), 2);
        assert_eq!(uploader.pending_bytes(), 80);
        assert_eq!(uploader.pending_transitions(), 2);

        let report = uploader.execute().unwrap();
        assert_eq!(
            report,
            UploadReport {
                uploads: 2,
                transitions: 2,
                bytes: 80,
                fence_value: UPLOAD_COMPLETE,
            }
        );
    }

    #[test]
    fn test_mips_of_one_texture_share_a_transition() {
        let device = HostDevice::new();
        let desc = TextureDesc::new(4, 4, Format::Rgba8Unorm).with_mip_levels(3);
        let texture = device.create_texture(&desc).unwrap();

        let mut uploader = StagingUploader::new(&device).unwrap();
        for mip in 0..3 {
            let data = vec![mip as u8; desc.subresource_size(mip) as usize];
            uploader
                .record_copy_data_to_subresource(&texture, mip, &data)
                .unwrap();
        }
        assert_eq!(uploader.pending_transitions(), 1);

        let report = uploader.execute().unwrap();
        assert_eq!(report.uploads, 3);
        assert_eq!(report.transitions, 1);
        assert_eq!(texture.read_bytes(2).unwrap(), vec![2; 4]);
    }

    #[test]
    fn test_empty_batch_executes() {
        let device = HostDevice::new();
        let report = StagingUploader::new(&device).unwrap().execute().unwrap();
        assert_eq!(report.uploads, 0);
        assert_eq!(report.fence_value, UPLOAD_COMPLETE);
    }
}
