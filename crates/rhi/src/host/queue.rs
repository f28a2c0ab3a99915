//! Host queues.
//!
//! Each queue owns a worker thread that drains its operations in order,
//! asynchronously to the submitting thread and to the other queues.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

use super::command::{AllocatorShared, HostCommand, HostCommandList};
use super::fence::HostFence;
use super::journal::{Journal, JournalEvent};
use super::resource::HostResource;
use super::HostDevice;
use crate::device::{CommandList, Queue};
use crate::error::{RhiError, RhiResult};
use crate::types::{QueueKind, ResourceState};

/// Granularity at which a blocked GPU wait rechecks for shutdown.
const WAIT_SLICE: Duration = Duration::from_millis(10);

pub(crate) enum QueueOp {
    Execute {
        commands: Vec<HostCommand>,
        allocator: Arc<AllocatorShared>,
    },
    Signal {
        fence: HostFence,
        value: u64,
    },
    Wait {
        fence: HostFence,
        value: u64,
    },
    Present {
        target: HostResource,
        index: usize,
    },
}

#[derive(Default)]
struct QueueState {
    ops: VecDeque<QueueOp>,
    paused: bool,
    shutdown: bool,
}

pub(crate) struct QueueShared {
    kind: QueueKind,
    state: Mutex<QueueState>,
    wake: Condvar,
    journal: Journal,
    fail_next_execute: AtomicBool,
}

impl QueueShared {
    pub(crate) fn kind(&self) -> QueueKind {
        self.kind
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
        self.wake.notify_all();
        debug!("{} queue {}", self.kind, if paused { "paused" } else { "resumed" });
    }

    pub(crate) fn fail_next_execute(&self) {
        self.fail_next_execute.store(true, Ordering::SeqCst);
    }

    pub(crate) fn push(&self, op: QueueOp) {
        self.lock().ops.push_back(op);
        self.wake.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_shutting_down(&self) -> bool {
        self.lock().shutdown
    }

    /// Blocks until an operation may run. `None` means the worker must exit.
    fn next_op(&self) -> Option<QueueOp> {
        let mut state = self.lock();
        loop {
            if state.shutdown && (state.paused || state.ops.is_empty()) {
                return None;
            }
            if !state.paused
                && let Some(op) = state.ops.pop_front()
            {
                return Some(op);
            }
            state = self
                .wake
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Returns false when the worker should stop.
    fn perform(&self, op: QueueOp) -> bool {
        match op {
            QueueOp::Execute {
                commands,
                allocator,
            } => {
                for command in &commands {
                    self.journal.push(JournalEvent::Executed {
                        queue: self.kind,
                        command: command.record(),
                    });
                    command.run(&self.journal);
                }
                allocator.retired();
                trace!("{} queue executed {} command(s)", self.kind, commands.len());
            }
            QueueOp::Signal { fence, value } => {
                fence.set(Some(self.kind), value);
            }
            QueueOp::Wait { fence, value } => {
                while !fence.wait_until(value, Instant::now() + WAIT_SLICE) {
                    if self.is_shutting_down() {
                        return false;
                    }
                }
                self.journal.push(JournalEvent::WaitSatisfied {
                    queue: self.kind,
                    fence: fence.id(),
                    value,
                });
            }
            QueueOp::Present { target, index } => {
                let state = target.state();
                if state != ResourceState::Present {
                    self.journal.validation(format!(
                        "presenting swap chain buffer {} in state {:?}",
                        index, state
                    ));
                }
                self.journal.push(JournalEvent::Presented { index });
            }
        }
        true
    }
}

fn run_worker(shared: Arc<QueueShared>) {
    while let Some(op) = shared.next_op() {
        if !shared.perform(op) {
            break;
        }
    }
    debug!("{} queue worker stopped", shared.kind);
}

/// Queue of the host device.
pub struct HostQueue {
    shared: Arc<QueueShared>,
    worker: Option<JoinHandle<()>>,
}

impl HostQueue {
    pub(crate) fn new(kind: QueueKind, journal: Journal, paused: bool) -> RhiResult<Self> {
        let shared = Arc::new(QueueShared {
            kind,
            state: Mutex::new(QueueState {
                paused,
                ..QueueState::default()
            }),
            wake: Condvar::new(),
            journal,
            fail_next_execute: AtomicBool::new(false),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(format!("host-{}-queue", kind))
            .spawn(move || run_worker(worker_shared))
            .map_err(|e| RhiError::ResourceError(format!("failed to spawn queue worker: {}", e)))?;

        debug!("Created host {} queue", kind);

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<QueueShared> {
        &self.shared
    }

    /// Operations submitted but not yet started.
    pub fn pending_ops(&self) -> usize {
        self.shared.lock().ops.len()
    }
}

impl Queue<HostDevice> for HostQueue {
    fn kind(&self) -> QueueKind {
        self.shared.kind
    }

    fn execute(&self, list: &HostCommandList) -> RhiResult<()> {
        if self.shared.fail_next_execute.swap(false, Ordering::SeqCst) {
            error!("{} queue lost on execute", self.shared.kind);
            return Err(RhiError::DeviceLost);
        }
        if list.is_open() {
            return Err(RhiError::InvalidArgument(
                "command list must be closed before execution".to_string(),
            ));
        }
        if self.shared.kind == QueueKind::Copy && list.kind() == QueueKind::Direct {
            return Err(RhiError::InvalidArgument(
                "direct command list submitted to a copy queue".to_string(),
            ));
        }

        let (commands, allocator) = list.submission();
        allocator.submitted();
        self.shared.push(QueueOp::Execute {
            commands,
            allocator,
        });
        Ok(())
    }

    fn signal(&self, fence: &HostFence, value: u64) -> RhiResult<()> {
        self.shared.push(QueueOp::Signal {
            fence: fence.clone(),
            value,
        });
        Ok(())
    }

    fn wait(&self, fence: &HostFence, value: u64) -> RhiResult<()> {
        self.shared.push(QueueOp::Wait {
            fence: fence.clone(),
            value,
        });
        Ok(())
    }
}

impl Drop for HostQueue {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            error!("{} queue worker panicked", self.shared.kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_runs_in_order() {
        let journal = Journal::new();
        let queue = HostQueue::new(QueueKind::Direct, journal.clone(), false).unwrap();
        let fence = HostFence::new(1, 0, journal.clone());

        queue.signal(&fence, 1).unwrap();
        queue.signal(&fence, 2).unwrap();
        crate::device::Fence::wait(&fence, 2).unwrap();

        let signals: Vec<u64> = journal
            .events()
            .into_iter()
            .filter_map(|event| match event {
                JournalEvent::Signaled { value, .. } => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(signals, vec![1, 2]);
    }

    #[test]
    fn test_paused_queue_holds_work() {
        let journal = Journal::new();
        let queue = HostQueue::new(QueueKind::Copy, journal.clone(), true).unwrap();
        let fence = HostFence::new(1, 0, journal.clone());

        queue.signal(&fence, 1).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(crate::device::Fence::completed_value(&fence).unwrap(), 0);
        assert_eq!(queue.pending_ops(), 1);

        queue.shared().set_paused(false);
        crate::device::Fence::wait(&fence, 1).unwrap();
    }

    #[test]
    fn test_gpu_wait_blocks_later_work() {
        let journal = Journal::new();
        let queue = HostQueue::new(QueueKind::Direct, journal.clone(), false).unwrap();
        let gate = HostFence::new(1, 0, journal.clone());
        let done = HostFence::new(2, 0, journal.clone());

        queue.wait(&gate, 1).unwrap();
        queue.signal(&done, 1).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(done.value(), 0);

        gate.signal(1);
        crate::device::Fence::wait(&done, 1).unwrap();
    }

    #[test]
    fn test_drop_with_unsatisfied_wait_does_not_hang() {
        let journal = Journal::new();
        let queue = HostQueue::new(QueueKind::Direct, journal.clone(), false).unwrap();
        let gate = HostFence::new(1, 0, journal);
        queue.wait(&gate, 1).unwrap();
        drop(queue);
    }
}
