//! Host command allocators and command lists.
//!
//! A list records commands holding clones of the resources they touch, so a
//! submission keeps its resources alive until the queue has run it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, trace};

use super::journal::{CommandRecord, Journal, JournalEvent};
use super::resource::HostResource;
use super::HostDevice;
use crate::device::{CommandAllocator, CommandList, Resource};
use crate::error::{RhiError, RhiResult};
use crate::types::{QueueKind, ResourceBarrier, ResourceDesc, ResourceState};

#[derive(Debug)]
pub(crate) struct AllocatorShared {
    id: u64,
    kind: QueueKind,
    in_flight: AtomicUsize,
}

impl AllocatorShared {
    pub(crate) fn submitted(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn retired(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Command allocator tracking how many of its submissions are unfinished.
#[derive(Debug)]
pub struct HostCommandAllocator {
    shared: Arc<AllocatorShared>,
    journal: Journal,
}

impl HostCommandAllocator {
    pub(crate) fn new(id: u64, kind: QueueKind, journal: Journal) -> Self {
        Self {
            shared: Arc::new(AllocatorShared {
                id,
                kind,
                in_flight: AtomicUsize::new(0),
            }),
            journal,
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn kind(&self) -> QueueKind {
        self.shared.kind
    }

    /// Submissions recorded from this allocator that have not finished.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }
}

impl CommandAllocator for HostCommandAllocator {
    fn reset(&mut self) -> RhiResult<()> {
        let in_flight = self.in_flight();
        if in_flight > 0 {
            let message = format!(
                "allocator {} reset while {} submission(s) are still executing",
                self.shared.id, in_flight
            );
            self.journal.validation(message.clone());
            return Err(RhiError::Validation(message));
        }

        self.journal.push(JournalEvent::AllocatorReset {
            allocator: self.shared.id,
        });
        trace!("Allocator {} reset", self.shared.id);
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub(crate) enum HostCommand {
    CopyBuffer {
        dst: HostResource,
        src: HostResource,
        size: u64,
    },
    CopyBufferToTexture {
        dst: HostResource,
        subresource: u32,
        src: HostResource,
    },
    Barrier {
        resource: HostResource,
        before: ResourceState,
        after: ResourceState,
    },
    Clear {
        target: HostResource,
        color: [f32; 4],
    },
}

impl HostCommand {
    pub(crate) fn record(&self) -> CommandRecord {
        match self {
            HostCommand::CopyBuffer { dst, src, size } => CommandRecord::CopyBuffer {
                dst: dst.id(),
                src: src.id(),
                size: *size,
            },
            HostCommand::CopyBufferToTexture {
                dst,
                subresource,
                src,
            } => CommandRecord::CopyBufferToTexture {
                dst: dst.id(),
                subresource: *subresource,
                src: src.id(),
            },
            HostCommand::Barrier {
                resource,
                before,
                after,
            } => CommandRecord::Barrier {
                resource: resource.id(),
                before: *before,
                after: *after,
            },
            HostCommand::Clear { target, color } => CommandRecord::Clear {
                target: target.id(),
                color: *color,
            },
        }
    }

    /// Applies the command to host memory, reporting misuse to `journal`.
    pub(crate) fn run(&self, journal: &Journal) {
        match self {
            HostCommand::CopyBuffer { dst, src, size } => {
                expect_state(journal, dst, ResourceState::CopyDest, "copy destination");
                let data = src.read_bytes(0).unwrap_or_default();
                let dst_size = dst.desc().subresource_size(0);
                if *size > data.len() as u64 || *size > dst_size {
                    journal.validation(format!(
                        "copy of {} bytes from {:?} ({} bytes) into {:?} ({} bytes) is out of bounds",
                        size,
                        src.id(),
                        data.len(),
                        dst.id(),
                        dst_size
                    ));
                }
                let len = (*size).min(data.len() as u64) as usize;
                dst.store(0, &data[..len]);
            }
            HostCommand::CopyBufferToTexture {
                dst,
                subresource,
                src,
            } => {
                expect_state(journal, dst, ResourceState::CopyDest, "copy destination");
                let data = src.read_bytes(0).unwrap_or_default();
                let desc = dst.desc();
                if *subresource >= desc.subresource_count() {
                    journal.validation(format!(
                        "subresource {} out of range for {:?}",
                        subresource,
                        dst.id()
                    ));
                    return;
                }
                let expected = desc.subresource_size(*subresource);
                if (data.len() as u64) < expected {
                    journal.validation(format!(
                        "source {:?} holds {} bytes, subresource {} of {:?} needs {}",
                        src.id(),
                        data.len(),
                        subresource,
                        dst.id(),
                        expected
                    ));
                }
                dst.store(*subresource, &data);
            }
            HostCommand::Barrier {
                resource,
                before,
                after,
            } => {
                let current = resource.state();
                if current != *before {
                    journal.validation(format!(
                        "barrier on {:?} expects {:?} but the resource is in {:?}",
                        resource.id(),
                        before,
                        current
                    ));
                }
                resource.set_state(*after);
            }
            HostCommand::Clear { target, color } => {
                expect_state(journal, target, ResourceState::RenderTarget, "clear target");
                match target.desc() {
                    ResourceDesc::Texture(desc) => {
                        target.fill(0, &desc.format.encode_color(*color));
                    }
                    ResourceDesc::Buffer(_) => {
                        journal.validation(format!("clear target {:?} is a buffer", target.id()));
                    }
                }
            }
        }
    }
}

fn expect_state(journal: &Journal, resource: &HostResource, expected: ResourceState, role: &str) {
    let state = resource.state();
    if state != expected {
        journal.validation(format!(
            "{} {:?} is in {:?}, expected {:?}",
            role,
            resource.id(),
            state,
            expected
        ));
    }
}

/// Command list recording into a plain vector.
#[derive(Debug)]
pub struct HostCommandList {
    kind: QueueKind,
    allocator: Arc<AllocatorShared>,
    commands: Vec<HostCommand>,
    open: bool,
}

impl HostCommandList {
    pub(crate) fn new(kind: QueueKind, allocator: &HostCommandAllocator) -> RhiResult<Self> {
        check_kind(kind, allocator)?;
        Ok(Self {
            kind,
            allocator: allocator.shared.clone(),
            commands: Vec::new(),
            open: false,
        })
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Number of commands recorded since the last reset.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn submission(&self) -> (Vec<HostCommand>, Arc<AllocatorShared>) {
        (self.commands.clone(), self.allocator.clone())
    }

    fn push(&mut self, command: HostCommand) {
        assert!(self.open, "recording into a closed command list");
        self.commands.push(command);
    }
}

fn check_kind(kind: QueueKind, allocator: &HostCommandAllocator) -> RhiResult<()> {
    if allocator.kind() != kind {
        return Err(RhiError::InvalidArgument(format!(
            "{} command list cannot use a {} allocator",
            kind,
            allocator.kind()
        )));
    }
    Ok(())
}

impl CommandList<HostDevice> for HostCommandList {
    fn reset(&mut self, allocator: &HostCommandAllocator) -> RhiResult<()> {
        if self.open {
            return Err(RhiError::Validation(
                "command list reset while still open".to_string(),
            ));
        }
        check_kind(self.kind, allocator)?;
        self.allocator = allocator.shared.clone();
        self.commands.clear();
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> RhiResult<()> {
        if !self.open {
            return Err(RhiError::Validation(
                "command list closed twice".to_string(),
            ));
        }
        self.open = false;
        debug!(
            "Closed {} command list with {} command(s)",
            self.kind,
            self.commands.len()
        );
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn copy_buffer(&mut self, dst: &HostResource, src: &HostResource, size: u64) {
        self.push(HostCommand::CopyBuffer {
            dst: dst.clone(),
            src: src.clone(),
            size,
        });
    }

    fn copy_buffer_to_texture(&mut self, dst: &HostResource, subresource: u32, src: &HostResource) {
        self.push(HostCommand::CopyBufferToTexture {
            dst: dst.clone(),
            subresource,
            src: src.clone(),
        });
    }

    fn resource_barrier(&mut self, barriers: &[ResourceBarrier<'_, HostResource>]) {
        for barrier in barriers {
            self.push(HostCommand::Barrier {
                resource: barrier.resource.clone(),
                before: barrier.before,
                after: barrier.after,
            });
        }
    }

    fn clear_texture(&mut self, target: &HostResource, color: [f32; 4]) {
        self.push(HostCommand::Clear {
            target: target.clone(),
            color,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ResourceId;
    use crate::types::BufferDesc;

    fn buffer(id: u64, desc: BufferDesc) -> HostResource {
        let desc = ResourceDesc::Buffer(desc);
        HostResource::new(ResourceId(id), desc, desc.initial_state())
    }

    #[test]
    fn test_list_starts_closed() {
        let allocator = HostCommandAllocator::new(1, QueueKind::Copy, Journal::new());
        let list = HostCommandList::new(QueueKind::Copy, &allocator).unwrap();
        assert!(!list.is_open());
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let allocator = HostCommandAllocator::new(1, QueueKind::Copy, Journal::new());
        assert!(matches!(
            HostCommandList::new(QueueKind::Direct, &allocator),
            Err(RhiError::InvalidArgument(_))
        ));
    }

    #[test]
    #[should_panic(expected = "closed command list")]
    fn test_recording_into_closed_list_panics() {
        let allocator = HostCommandAllocator::new(1, QueueKind::Copy, Journal::new());
        let mut list = HostCommandList::new(QueueKind::Copy, &allocator).unwrap();
        let src = buffer(1, BufferDesc::upload(4));
        let dst = buffer(2, BufferDesc::gpu(4));
        list.copy_buffer(&dst, &src, 4);
    }

    #[test]
    fn test_reset_clears_commands() {
        let allocator = HostCommandAllocator::new(1, QueueKind::Direct, Journal::new());
        let mut list = HostCommandList::new(QueueKind::Direct, &allocator).unwrap();
        let src = buffer(1, BufferDesc::upload(4));
        let dst = buffer(2, BufferDesc::gpu(4));

        list.reset(&allocator).unwrap();
        list.copy_buffer(&dst, &src, 4);
        list.close().unwrap();
        assert_eq!(list.len(), 1);

        list.reset(&allocator).unwrap();
        assert!(list.is_empty());
        assert!(list.is_open());
    }

    #[test]
    fn test_allocator_reset_refused_while_in_flight() {
        let journal = Journal::new();
        let mut allocator = HostCommandAllocator::new(7, QueueKind::Direct, journal.clone());

        allocator.shared.submitted();
        assert!(matches!(allocator.reset(), Err(RhiError::Validation(_))));
        assert_eq!(journal.validation_messages().len(), 1);

        allocator.shared.retired();
        allocator.reset().unwrap();
        assert!(journal.contains(|event| *event == JournalEvent::AllocatorReset { allocator: 7 }));
    }

    #[test]
    fn test_copy_runs_against_host_memory() {
        let journal = Journal::new();
        let src = buffer(1, BufferDesc::upload(3));
        let dst = buffer(2, BufferDesc::gpu(3));
        src.write_bytes(0, &[1, 2, 3]).unwrap();

        HostCommand::CopyBuffer {
            dst: dst.clone(),
            src,
            size: 3,
        }
        .run(&journal);

        assert_eq!(dst.read_bytes(0).unwrap(), vec![1, 2, 3]);
        assert!(journal.validation_messages().is_empty());
    }

    #[test]
    fn test_barrier_state_mismatch_reported() {
        let journal = Journal::new();
        let dst = buffer(1, BufferDesc::gpu(4));

        HostCommand::Barrier {
            resource: dst.clone(),
            before: ResourceState::RenderTarget,
            after: ResourceState::GenericRead,
        }
        .run(&journal);

        assert_eq!(dst.state(), ResourceState::GenericRead);
        assert_eq!(journal.validation_messages().len(), 1);
    }
}
