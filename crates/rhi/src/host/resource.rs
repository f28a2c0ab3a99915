//! Host-memory buffers and textures.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::device::{Resource, ResourceId};
use crate::error::{RhiError, RhiResult};
use crate::types::{HeapKind, ResourceDesc, ResourceState};

#[derive(Debug)]
struct ResourceContents {
    state: ResourceState,
    subresources: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct ResourceShared {
    id: ResourceId,
    desc: ResourceDesc,
    contents: Mutex<ResourceContents>,
}

impl Drop for ResourceShared {
    fn drop(&mut self) {
        debug!("Released host resource {:?}", self.id);
    }
}

/// A resource backed by host memory, one byte vector per subresource.
///
/// Clones share the same memory.
#[derive(Clone, Debug)]
pub struct HostResource {
    shared: Arc<ResourceShared>,
}

impl HostResource {
    pub(crate) fn new(id: ResourceId, desc: ResourceDesc, state: ResourceState) -> Self {
        let subresources = (0..desc.subresource_count())
            .map(|subresource| vec![0u8; desc.subresource_size(subresource) as usize])
            .collect();

        Self {
            shared: Arc::new(ResourceShared {
                id,
                desc,
                contents: Mutex::new(ResourceContents {
                    state,
                    subresources,
                }),
            }),
        }
    }

    /// State as last left by executed GPU work.
    pub fn state(&self) -> ResourceState {
        self.lock().state
    }

    pub(crate) fn set_state(&self, state: ResourceState) {
        self.lock().state = state;
    }

    /// Overwrites a prefix of one subresource. Returns the number of bytes
    /// actually written.
    pub(crate) fn store(&self, subresource: u32, data: &[u8]) -> usize {
        let mut contents = self.lock();
        let Some(target) = contents.subresources.get_mut(subresource as usize) else {
            return 0;
        };
        let len = data.len().min(target.len());
        target[..len].copy_from_slice(&data[..len]);
        len
    }

    /// Fills one subresource with a repeated texel.
    pub(crate) fn fill(&self, subresource: u32, texel: &[u8]) {
        let mut contents = self.lock();
        if let Some(target) = contents.subresources.get_mut(subresource as usize) {
            for chunk in target.chunks_mut(texel.len().max(1)) {
                let len = chunk.len();
                chunk.copy_from_slice(&texel[..len]);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResourceContents> {
        self.shared
            .contents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Resource for HostResource {
    fn id(&self) -> ResourceId {
        self.shared.id
    }

    fn desc(&self) -> ResourceDesc {
        self.shared.desc
    }

    fn write_bytes(&self, offset: u64, data: &[u8]) -> RhiResult<()> {
        if self.shared.desc.heap() != HeapKind::Upload {
            return Err(RhiError::InvalidArgument(format!(
                "resource {:?} is not in the upload heap",
                self.shared.id
            )));
        }

        let mut contents = self.lock();
        let target = &mut contents.subresources[0];
        let start = offset as usize;
        let end = start
            .checked_add(data.len())
            .filter(|&end| end <= target.len())
            .ok_or_else(|| {
                RhiError::InvalidArgument(format!(
                    "write of {} bytes at offset {} overflows buffer of {} bytes",
                    data.len(),
                    offset,
                    target.len()
                ))
            })?;
        target[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_bytes(&self, subresource: u32) -> RhiResult<Vec<u8>> {
        self.lock()
            .subresources
            .get(subresource as usize)
            .cloned()
            .ok_or_else(|| {
                RhiError::InvalidArgument(format!(
                    "subresource {} out of range for {:?}",
                    subresource, self.shared.id
                ))
            })
    }
}
