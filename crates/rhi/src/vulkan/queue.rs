//! Queue submission.
//!
//! Vulkan has no standalone "wait" command: a GPU-side wait is attached to
//! the next submission. [`VulkanQueue`] therefore keeps waits pending and
//! adds them to whatever is submitted next, including empty signal batches.

use std::sync::{Arc, Mutex};

use ash::vk;
use tracing::trace;

use super::command::VulkanCommandList;
use super::device::DeviceShared;
use super::sync::VulkanFence;
use crate::device::{CommandList, Queue};
use crate::error::{RhiError, RhiResult};
use crate::types::QueueKind;

/// A direct or copy queue.
pub struct VulkanQueue {
    device: Arc<DeviceShared>,
    kind: QueueKind,
    pending_waits: Mutex<Vec<(vk::Semaphore, u64)>>,
}

/// One batch handed to `vkQueueSubmit`.
#[derive(Default)]
pub(crate) struct Submission {
    pub command_buffer: Option<vk::CommandBuffer>,
    pub timeline_signal: Option<(vk::Semaphore, u64)>,
    pub binary_signal: Option<vk::Semaphore>,
}

impl VulkanQueue {
    pub(crate) fn new(device: Arc<DeviceShared>, kind: QueueKind) -> Self {
        Self {
            device,
            kind,
            pending_waits: Mutex::new(Vec::new()),
        }
    }

    /// Submits one batch, consuming every pending wait.
    pub(crate) fn submit(&self, submission: Submission) -> RhiResult<()> {
        let mut pending = self
            .pending_waits
            .lock()
            .map_err(|_| RhiError::InvalidArgument("queue wait list poisoned".to_string()))?;

        let wait_semaphores: Vec<vk::Semaphore> = pending.iter().map(|(s, _)| *s).collect();
        let wait_values: Vec<u64> = pending.iter().map(|(_, v)| *v).collect();
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait_semaphores.len()];

        // Binary semaphores ignore their entry in the value array.
        let mut signal_semaphores = Vec::with_capacity(2);
        let mut signal_values = Vec::with_capacity(2);
        if let Some((semaphore, value)) = submission.timeline_signal {
            signal_semaphores.push(semaphore);
            signal_values.push(value);
        }
        if let Some(semaphore) = submission.binary_signal {
            signal_semaphores.push(semaphore);
            signal_values.push(0);
        }

        let command_buffers: Vec<vk::CommandBuffer> =
            submission.command_buffer.into_iter().collect();

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        let queue = self.device.lock_queue(self.kind)?;
        unsafe {
            self.device.handle().queue_submit(
                *queue,
                std::slice::from_ref(&submit_info),
                vk::Fence::null(),
            )?;
        }

        trace!(
            "Submitted to {} queue: {} command buffer(s), {} wait(s), {} signal(s)",
            self.kind,
            command_buffers.len(),
            wait_semaphores.len(),
            signal_semaphores.len()
        );

        pending.clear();
        Ok(())
    }

    /// Locked VkQueue handle, for presentation.
    pub(crate) fn lock(&self) -> RhiResult<std::sync::MutexGuard<'_, vk::Queue>> {
        self.device.lock_queue(self.kind)
    }
}

impl Queue<super::VulkanDevice> for VulkanQueue {
    fn kind(&self) -> QueueKind {
        self.kind
    }

    fn execute(&self, list: &VulkanCommandList) -> RhiResult<()> {
        if list.is_open() {
            return Err(RhiError::Validation(
                "executing a command list that is still open".to_string(),
            ));
        }
        if list.kind() == QueueKind::Direct && self.kind == QueueKind::Copy {
            return Err(RhiError::InvalidArgument(
                "direct command list submitted to a copy queue".to_string(),
            ));
        }

        self.submit(Submission {
            command_buffer: Some(list.handle()),
            ..Default::default()
        })
    }

    fn signal(&self, fence: &VulkanFence, value: u64) -> RhiResult<()> {
        self.submit(Submission {
            timeline_signal: Some((fence.handle(), value)),
            ..Default::default()
        })
    }

    fn wait(&self, fence: &VulkanFence, value: u64) -> RhiResult<()> {
        self.pending_waits
            .lock()
            .map_err(|_| RhiError::InvalidArgument("queue wait list poisoned".to_string()))?
            .push((fence.handle(), value));
        Ok(())
    }
}
