//! Host fence: a counter guarded by a mutex, with a condition variable for
//! waiters.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::trace;

use super::journal::{Journal, JournalEvent};
use crate::device::Fence;
use crate::error::RhiResult;
use crate::types::QueueKind;

#[derive(Debug)]
struct FenceShared {
    id: u64,
    value: Mutex<u64>,
    reached: Condvar,
    journal: Journal,
}

/// Monotonic fence of the host device.
#[derive(Clone, Debug)]
pub struct HostFence {
    shared: Arc<FenceShared>,
}

impl HostFence {
    pub(crate) fn new(id: u64, initial: u64, journal: Journal) -> Self {
        Self {
            shared: Arc::new(FenceShared {
                id,
                value: Mutex::new(initial),
                reached: Condvar::new(),
                journal,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Sets the completed value from the CPU, bypassing every queue.
    pub fn signal(&self, value: u64) {
        self.set(None, value);
    }

    /// Advances the counter to `value`. A lower value leaves the counter
    /// where it is and is reported to the journal.
    pub(crate) fn set(&self, queue: Option<QueueKind>, value: u64) {
        self.shared.journal.push(JournalEvent::Signaled {
            queue,
            fence: self.shared.id,
            value,
        });
        let previous = {
            let mut current = self.lock();
            let previous = *current;
            *current = previous.max(value);
            previous
        };
        if value < previous {
            self.shared.journal.validation(format!(
                "fence {} signaled to {} after reaching {}",
                self.shared.id, value, previous
            ));
            return;
        }
        self.shared.reached.notify_all();
        trace!("Fence {} signaled to {}", self.shared.id, value);
    }

    /// Current value without recording anything.
    pub(crate) fn value(&self) -> u64 {
        *self.lock()
    }

    /// Waits until `value` is reached or `deadline` passes, without
    /// journaling. Returns whether the value was reached.
    pub(crate) fn wait_until(&self, value: u64, deadline: Instant) -> bool {
        let mut current = self.lock();
        while *current < value {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            current = self
                .shared
                .reached
                .wait_timeout(current, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        self.shared
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_cpu_wait(&self, value: u64) -> bool {
        if self.value() >= value {
            return false;
        }
        self.shared.journal.push(JournalEvent::CpuWait {
            fence: self.shared.id,
            value,
        });
        true
    }
}

impl Fence for HostFence {
    fn completed_value(&self) -> RhiResult<u64> {
        Ok(self.value())
    }

    fn wait(&self, value: u64) -> RhiResult<()> {
        if !self.record_cpu_wait(value) {
            return Ok(());
        }
        let mut current = self.lock();
        while *current < value {
            current = self
                .shared
                .reached
                .wait(current)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        Ok(())
    }

    fn wait_timeout(&self, value: u64, timeout: Duration) -> RhiResult<bool> {
        if !self.record_cpu_wait(value) {
            return Ok(true);
        }
        Ok(self.wait_until(value, Instant::now() + timeout))
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_wait_returns_immediately_when_reached() {
        let journal = Journal::new();
        let fence = HostFence::new(1, 5, journal.clone());

        fence.wait(3).unwrap();
        assert_eq!(fence.completed_value().unwrap(), 5);
        assert!(journal.events().is_empty());
    }

    #[test]
    fn test_wait_blocks_until_signal() {
        let journal = Journal::new();
        let fence = HostFence::new(1, 0, journal.clone());
        let signaler = fence.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaler.signal(2);
        });

        fence.wait(2).unwrap();
        handle.join().unwrap();

        let events = journal.events();
        assert_eq!(events[0], JournalEvent::CpuWait { fence: 1, value: 2 });
        assert_eq!(
            events[1],
            JournalEvent::Signaled {
                queue: None,
                fence: 1,
                value: 2
            }
        );
    }

    #[test]
    fn test_lower_signal_keeps_value() {
        let journal = Journal::new();
        let fence = HostFence::new(1, 0, journal.clone());

        fence.signal(5);
        fence.set(Some(QueueKind::Direct), 1);

        assert_eq!(fence.completed_value().unwrap(), 5);
        let messages = journal.validation_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("signaled to 1 after reaching 5"));
    }

    #[test]
    fn test_equal_signal_is_accepted() {
        let journal = Journal::new();
        let fence = HostFence::new(1, 3, journal.clone());
        fence.signal(3);
        assert_eq!(fence.completed_value().unwrap(), 3);
        assert!(journal.validation_messages().is_empty());
    }

    #[test]
    fn test_wait_timeout_expires() {
        let fence = HostFence::new(1, 0, Journal::new());
        let reached = fence.wait_timeout(1, Duration::from_millis(10)).unwrap();
        assert!(!reached);
    }
}
