//! Frame pacing.
//!
//! [`FrameScheduler`] keeps the CPU at most one ring's worth of frames ahead
//! of the GPU. Every submission signals one fence with the next value of a
//! monotonically increasing counter and stamps that value on the submitting
//! slot; before a slot is recorded again, the CPU waits for the fence to
//! reach the slot's stamp.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use samples_renderer::FrameScheduler;
//! use samples_rhi::host::HostDevice;
//!
//! # fn example() -> samples_renderer::RenderResult<()> {
//! let device = Arc::new(HostDevice::new());
//! let swap_chain = device.create_swap_chain(2, 64, 64)?;
//! let mut scheduler = FrameScheduler::new(device, swap_chain)?;
//!
//! for _ in 0..4 {
//!     let index = scheduler.begin_frame()?;
//!     scheduler.record_and_submit(index, |frame| {
//!         frame.clear_target([0.1, 0.2, 0.3, 1.0]);
//!         Ok(())
//!     })?;
//!     scheduler.present()?;
//! }
//! scheduler.wait_idle()?;
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::sync::Arc;
use std::time::Duration;

use samples_rhi::{
    CommandAllocator, CommandList, Device, Fence, Queue, QueueKind, RhiError, SwapChain,
};
use tracing::{debug, info, trace};

use crate::error::{RenderError, RenderResult};
use crate::frame::{FrameContext, FrameSlot, SlotState};

/// Ring of frame slots driven by one fence.
pub struct FrameScheduler<D: Device> {
    device: Arc<D>,
    queue: D::Queue,
    fence: D::Fence,
    /// Last value handed to `queue.signal`.
    fence_value: u64,
    slots: Vec<FrameSlot<D>>,
    swap_chain: D::SwapChain,
    current: Option<usize>,
    wait_timeout: Option<Duration>,
    /// Whether anything was submitted since the last `wait_idle`.
    dirty: bool,
}

impl<D: Device> FrameScheduler<D> {
    /// Creates the direct queue, the fence and one slot per swap chain
    /// buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if any device object cannot be created.
    pub fn new(device: Arc<D>, swap_chain: D::SwapChain) -> RenderResult<Self> {
        let queue = device.create_queue(QueueKind::Direct)?;
        let fence = device.create_fence(0)?;

        let mut scheduler = Self {
            device,
            queue,
            fence,
            fence_value: 0,
            slots: Vec::new(),
            swap_chain,
            current: None,
            wait_timeout: None,
            dirty: true,
        };
        scheduler.rebuild_slots()?;

        info!(
            "Frame scheduler created with {} slot(s) on '{}'",
            scheduler.slots.len(),
            scheduler.device.name()
        );
        Ok(scheduler)
    }

    /// Bounds every CPU fence wait. A wait that expires fails with
    /// [`RenderError::WaitTimedOut`].
    pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Matches the slot ring to the swap chain: refreshes targets, adds
    /// slots for new buffers and drops slots whose buffer went away.
    fn rebuild_slots(&mut self) -> RenderResult<()> {
        let count = self.swap_chain.buffer_count();
        self.slots.truncate(count);

        for (index, slot) in self.slots.iter_mut().enumerate() {
            slot.set_target(self.swap_chain.buffer(index).cloned());
        }

        for index in self.slots.len()..count {
            let allocator = self.device.create_command_allocator(QueueKind::Direct)?;
            let command_list = self
                .device
                .create_command_list(QueueKind::Direct, &allocator)?;
            let target = self.swap_chain.buffer(index).cloned();
            self.slots
                .push(FrameSlot::new(index, allocator, command_list, target));
            debug!("Created frame slot {}", index);
        }

        Ok(())
    }

    /// Blocks until the fence reaches `value`.
    fn wait_for(&self, value: u64) -> RenderResult<()> {
        if self.fence.completed_value()? >= value {
            return Ok(());
        }

        trace!("Waiting for fence value {}", value);
        match self.wait_timeout {
            None => self.fence.wait(value)?,
            Some(timeout) => {
                if !self.fence.wait_timeout(value, timeout)? {
                    return Err(RenderError::WaitTimedOut { value });
                }
            }
        }
        Ok(())
    }

    /// Selects the next frame and waits until its slot is free.
    ///
    /// Returns the frame index, which is also the swap chain buffer index.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::SlotOutOfRange`] if the swap chain reports an
    /// index without a slot, or any error of the fence wait.
    pub fn begin_frame(&mut self) -> RenderResult<usize> {
        let index = self.swap_chain.current_index()?;
        let slots = self.slots.len();
        let Some(slot) = self.slots.get(index) else {
            return Err(RenderError::SlotOutOfRange { index, slots });
        };

        self.wait_for(slot.fence_value())?;

        if let Some(slot) = self.slots.get_mut(index) {
            slot.set_state(SlotState::Idle);
        }
        self.current = Some(index);
        trace!("Began frame {}", index);
        Ok(index)
    }

    /// Records and submits the frame selected by [`begin_frame`](Self::begin_frame).
    ///
    /// Resets the slot's allocator and command list, lets `record` fill the
    /// list, closes it, executes it on the direct queue and signals the
    /// fence with the next counter value. Returns that value.
    ///
    /// # Panics
    ///
    /// Panics if `frame_index` is not the frame returned by the last
    /// `begin_frame`. A frame is submitted at most once per `begin_frame`.
    pub fn record_and_submit<F>(&mut self, frame_index: usize, record: F) -> RenderResult<u64>
    where
        F: FnOnce(&mut FrameContext<'_, D>) -> RenderResult<()>,
    {
        assert_eq!(
            self.current,
            Some(frame_index),
            "frame {} was not started with begin_frame",
            frame_index
        );
        let extent = self.swap_chain.extent();
        let slot = &mut self.slots[frame_index];
        debug_assert_eq!(slot.state(), SlotState::Idle);

        slot.set_state(SlotState::Recording);
        if let Err(e) = record_slot(slot, frame_index, extent, record) {
            slot.set_state(SlotState::Idle);
            return Err(e);
        }

        self.queue.execute(slot.command_list())?;
        self.fence_value += 1;
        self.queue.signal(&self.fence, self.fence_value)?;
        slot.stamp(self.fence_value);
        self.current = None;
        self.dirty = true;

        trace!(
            "Submitted frame {} with fence value {}",
            frame_index, self.fence_value
        );
        Ok(self.fence_value)
    }

    /// Presents the buffer the swap chain currently points at. Failures are
    /// returned as is.
    pub fn present(&mut self) -> RenderResult<()> {
        self.swap_chain.present(&self.queue)?;
        Ok(())
    }

    /// Blocks until all submitted work has finished.
    ///
    /// Signals the fence with the next counter value and waits for it. A
    /// second call with nothing submitted in between does nothing.
    pub fn wait_idle(&mut self) -> RenderResult<()> {
        if !self.dirty && self.fence.completed_value()? >= self.fence_value {
            return Ok(());
        }

        self.fence_value += 1;
        self.queue.signal(&self.fence, self.fence_value)?;
        self.wait_for(self.fence_value)?;
        self.dirty = false;

        for slot in &mut self.slots {
            slot.set_state(SlotState::Idle);
        }
        debug!("GPU idle at fence value {}", self.fence_value);
        Ok(())
    }

    /// Waits for the GPU, then resizes the swap chain and refreshes the
    /// slots' targets.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.wait_idle()?;
        self.swap_chain.resize(width, height)?;
        self.current = None;
        self.rebuild_slots()?;
        info!("Frame scheduler resized to {}x{}", width, height);
        Ok(())
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn slot(&self, index: usize) -> Option<&FrameSlot<D>> {
        self.slots.get(index)
    }

    /// Last value the fence was asked to reach.
    #[inline]
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    /// Value the fence has actually reached.
    pub fn completed_value(&self) -> RenderResult<u64> {
        Ok(self.fence.completed_value()?)
    }

    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    #[inline]
    pub fn queue(&self) -> &D::Queue {
        &self.queue
    }

    #[inline]
    pub fn swap_chain(&self) -> &D::SwapChain {
        &self.swap_chain
    }

    #[inline]
    pub fn swap_chain_mut(&mut self) -> &mut D::SwapChain {
        &mut self.swap_chain
    }
}

/// Resets the slot's allocator and list, runs `record` and closes the list.
fn record_slot<D, F>(
    slot: &mut FrameSlot<D>,
    frame_index: usize,
    extent: (u32, u32),
    record: F,
) -> RenderResult<()>
where
    D: Device,
    F: FnOnce(&mut FrameContext<'_, D>) -> RenderResult<()>,
{
    let Some((allocator, command_list, target)) = slot.parts_mut() else {
        return Err(RhiError::SwapchainError(format!(
            "no swap chain buffer for frame {}",
            frame_index
        ))
        .into());
    };

    allocator.reset()?;
    command_list.reset(allocator)?;

    let recorded = {
        let mut context = FrameContext::new(frame_index, target, command_list, extent);
        record(&mut context)
    };
    // Close even when recording failed so the list can be reset next time.
    let closed = command_list.close();
    recorded?;
    closed?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use samples_rhi::host::HostDevice;

    use super::*;

    fn scheduler(slots: usize) -> FrameScheduler<HostDevice> {
        let device = Arc::new(HostDevice::new());
        let swap_chain = device.create_swap_chain(slots, 8, 8).unwrap();
        FrameScheduler::new(device, swap_chain).unwrap()
    }

    #[test]
    fn test_new_creates_one_slot_per_buffer() {
        let scheduler = scheduler(3);
        assert_eq!(scheduler.slot_count(), 3);
        assert_eq!(scheduler.fence_value(), 0);
        for i in 0..3 {
            let slot = scheduler.slot(i).unwrap();
            assert_eq!(slot.index(), i);
            assert_eq!(slot.fence_value(), 0);
            assert_eq!(slot.state(), SlotState::Idle);
            assert!(slot.target().is_some());
        }
        assert!(scheduler.slot(3).is_none());
    }

    #[test]
    fn test_submit_stamps_slot() {
        let mut scheduler = scheduler(2);
        let index = scheduler.begin_frame().unwrap();
        let value = scheduler
            .record_and_submit(index, |frame| {
                frame.clear_target([1.0, 0.0, 0.0, 1.0]);
                Ok(())
            })
            .unwrap();

        assert_eq!(value, 1);
        let slot = scheduler.slot(index).unwrap();
        assert_eq!(slot.fence_value(), 1);
        assert_eq!(slot.state(), SlotState::Submitted);
        scheduler.present().unwrap();
        scheduler.wait_idle().unwrap();
        assert_eq!(scheduler.completed_value().unwrap(), 2);
    }

    #[test]
    fn test_callback_error_propagates_and_frees_slot() {
        let mut scheduler = scheduler(2);
        let index = scheduler.begin_frame().unwrap();
        let result = scheduler.record_and_submit(index, |_| {
            Err(RenderError::Sample("recording failed".to_string()))
        });

        assert!(matches!(result, Err(RenderError::Sample(_))));
        assert_eq!(scheduler.fence_value(), 0);
        assert_eq!(scheduler.slot(index).unwrap().state(), SlotState::Idle);
    }

    #[test]
    #[should_panic(expected = "was not started with begin_frame")]
    fn test_record_without_begin_panics() {
        let mut scheduler = scheduler(2);
        let _ = scheduler.record_and_submit(0, |_| Ok(()));
    }

    #[test]
    #[should_panic(expected = "was not started with begin_frame")]
    fn test_double_submit_panics() {
        let mut scheduler = scheduler(2);
        let index = scheduler.begin_frame().unwrap();
        scheduler.record_and_submit(index, |_| Ok(())).unwrap();
        let _ = scheduler.record_and_submit(index, |_| Ok(()));
    }

    #[test]
    #[should_panic(expected = "was not started with begin_frame")]
    fn test_wait_idle_does_not_reopen_a_submitted_frame() {
        let mut scheduler = scheduler(2);
        let index = scheduler.begin_frame().unwrap();
        scheduler.record_and_submit(index, |_| Ok(())).unwrap();
        scheduler.wait_idle().unwrap();
        let _ = scheduler.record_and_submit(index, |_| Ok(()));
    }

    #[test]
    fn test_failed_recording_can_be_retried() {
        let mut scheduler = scheduler(2);
        let index = scheduler.begin_frame().unwrap();
        assert!(
            scheduler
                .record_and_submit(index, |_| Err(RenderError::Sample("retry".to_string())))
                .is_err()
        );
        assert_eq!(scheduler.record_and_submit(index, |_| Ok(())).unwrap(), 1);
        scheduler.present().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires_on_stalled_queue() {
        let device = Arc::new(HostDevice::new());
        device.pause_queues(QueueKind::Direct);
        let swap_chain = device.create_swap_chain(1, 8, 8).unwrap();
        let mut scheduler = FrameScheduler::new(device.clone(), swap_chain)
            .unwrap()
            .with_wait_timeout(Some(Duration::from_millis(20)));

        let index = scheduler.begin_frame().unwrap();
        scheduler.record_and_submit(index, |_| Ok(())).unwrap();

        let result = scheduler.begin_frame();
        assert!(matches!(result, Err(RenderError::WaitTimedOut { value: 1 })));

        device.resume_queues(QueueKind::Direct);
        assert_eq!(scheduler.begin_frame().unwrap(), 0);
    }
}
