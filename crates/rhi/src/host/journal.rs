//! Ordered record of everything the host device did.
//!
//! Events are appended under one lock, and every event is appended before
//! its effect becomes visible to other threads. The order of the journal is
//! therefore a valid happens-before order.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::device::ResourceId;
use crate::types::{QueueKind, ResourceState};

/// A command as executed by a host queue.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandRecord {
    CopyBuffer {
        dst: ResourceId,
        src: ResourceId,
        size: u64,
    },
    CopyBufferToTexture {
        dst: ResourceId,
        subresource: u32,
        src: ResourceId,
    },
    Barrier {
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    },
    Clear {
        target: ResourceId,
        color: [f32; 4],
    },
}

impl CommandRecord {
    /// Resource the command writes to.
    pub fn destination(&self) -> ResourceId {
        match self {
            CommandRecord::CopyBuffer { dst, .. } => *dst,
            CommandRecord::CopyBufferToTexture { dst, .. } => *dst,
            CommandRecord::Barrier { resource, .. } => *resource,
            CommandRecord::Clear { target, .. } => *target,
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(
            self,
            CommandRecord::CopyBuffer { .. } | CommandRecord::CopyBufferToTexture { .. }
        )
    }
}

/// One journal entry.
#[derive(Clone, Debug, PartialEq)]
pub enum JournalEvent {
    /// A queue executed a command.
    Executed {
        queue: QueueKind,
        command: CommandRecord,
    },
    /// A fence was set to a value, by a queue or by the host (`queue: None`).
    Signaled {
        queue: Option<QueueKind>,
        fence: u64,
        value: u64,
    },
    /// A queue finished waiting on a fence.
    WaitSatisfied {
        queue: QueueKind,
        fence: u64,
        value: u64,
    },
    AllocatorReset {
        allocator: u64,
    },
    /// The CPU blocked on a fence that had not reached `value` yet.
    CpuWait {
        fence: u64,
        value: u64,
    },
    Presented {
        index: usize,
    },
    /// Usage error found by the host device's checks.
    Validation(String),
}

/// Shared, append-only event list.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    events: Arc<Mutex<Vec<JournalEvent>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, event: JournalEvent) {
        self.lock().push(event);
    }

    pub(crate) fn validation(&self, message: String) {
        warn!("[host validation] {}", message);
        self.push(JournalEvent::Validation(message));
    }

    /// Copy of every event so far.
    pub fn events(&self) -> Vec<JournalEvent> {
        self.lock().clone()
    }

    /// Messages recorded by the validation checks.
    pub fn validation_messages(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                JournalEvent::Validation(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Position of the first event matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&JournalEvent) -> bool) -> Option<usize> {
        self.lock().iter().position(predicate)
    }

    pub fn contains(&self, predicate: impl Fn(&JournalEvent) -> bool) -> bool {
        self.position(predicate).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JournalEvent>> {
        // A panicking test thread must not hide the events from the others.
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_messages_are_filtered() {
        let journal = Journal::new();
        journal.push(JournalEvent::Presented { index: 0 });
        journal.validation("bad barrier".to_string());
        journal.push(JournalEvent::AllocatorReset { allocator: 3 });

        assert_eq!(journal.events().len(), 3);
        assert_eq!(journal.validation_messages(), vec!["bad barrier".to_string()]);
    }

    #[test]
    fn test_position_finds_first_match() {
        let journal = Journal::new();
        journal.push(JournalEvent::CpuWait { fence: 1, value: 1 });
        journal.push(JournalEvent::CpuWait { fence: 1, value: 2 });

        let index = journal.position(|event| matches!(event, JournalEvent::CpuWait { value: 2, .. }));
        assert_eq!(index, Some(1));
        assert!(!journal.contains(|event| matches!(event, JournalEvent::Presented { .. })));
    }

    #[test]
    fn test_clones_share_events() {
        let journal = Journal::new();
        let other = journal.clone();
        other.push(JournalEvent::Presented { index: 1 });
        assert_eq!(journal.events(), vec![JournalEvent::Presented { index: 1 }]);
    }
}
