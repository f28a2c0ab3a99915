//! Per-frame resources.
//!
//! Each slot of the frame ring owns a command allocator and a command list,
//! refers to its swap chain buffer, and remembers the fence value stamped on
//! its last submission.
//!
//! # Slot lifecycle
//!
//! ```text
//! Idle ──record_and_submit──▶ Recording ──close + execute──▶ Submitted
//!  ▲                                                             │
//!  └──────────── begin_frame (fence reached the stamp) ──────────┘
//! ```

use samples_rhi::{CommandList, Device, ResourceBarrier, ResourceState};

/// Where a slot is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// The GPU is done with the slot; it may be recorded.
    Idle,
    /// The recording callback is running.
    Recording,
    /// Work is in flight until the fence reaches the slot's stamp.
    Submitted,
}

/// One element of the frame ring.
pub struct FrameSlot<D: Device> {
    index: usize,
    allocator: D::CommandAllocator,
    command_list: D::CommandList,
    target: Option<D::Resource>,
    fence_value: u64,
    state: SlotState,
}

impl<D: Device> FrameSlot<D> {
    pub(crate) fn new(
        index: usize,
        allocator: D::CommandAllocator,
        command_list: D::CommandList,
        target: Option<D::Resource>,
    ) -> Self {
        Self {
            index,
            allocator,
            command_list,
            target,
            fence_value: 0,
            state: SlotState::Idle,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn allocator(&self) -> &D::CommandAllocator {
        &self.allocator
    }

    #[inline]
    pub fn command_list(&self) -> &D::CommandList {
        &self.command_list
    }

    /// Swap chain buffer this slot renders into.
    #[inline]
    pub fn target(&self) -> Option<&D::Resource> {
        self.target.as_ref()
    }

    /// Fence value of the slot's last submission, 0 if never submitted.
    #[inline]
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    #[inline]
    pub fn state(&self) -> SlotState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SlotState) {
        self.state = state;
    }

    pub(crate) fn set_target(&mut self, target: Option<D::Resource>) {
        self.target = target;
    }

    pub(crate) fn stamp(&mut self, value: u64) {
        self.fence_value = value;
        self.state = SlotState::Submitted;
    }

    /// Allocator, command list and target, borrowed together. `None` when
    /// the slot has no target.
    pub(crate) fn parts_mut(
        &mut self,
    ) -> Option<(&mut D::CommandAllocator, &mut D::CommandList, &D::Resource)> {
        let target = self.target.as_ref()?;
        Some((&mut self.allocator, &mut self.command_list, target))
    }
}

/// What a recording callback gets to work with.
pub struct FrameContext<'a, D: Device> {
    frame_index: usize,
    target: &'a D::Resource,
    command_list: &'a mut D::CommandList,
    extent: (u32, u32),
}

impl<'a, D: Device> FrameContext<'a, D> {
    pub(crate) fn new(
        frame_index: usize,
        target: &'a D::Resource,
        command_list: &'a mut D::CommandList,
        extent: (u32, u32),
    ) -> Self {
        Self {
            frame_index,
            target,
            command_list,
            extent,
        }
    }

    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Swap chain buffer of this frame. It is in the `Present` state when
    /// recording starts and must be back in it when recording ends.
    #[inline]
    pub fn target(&self) -> &'a D::Resource {
        self.target
    }

    /// Open command list of this frame.
    #[inline]
    pub fn command_list(&mut self) -> &mut D::CommandList {
        self.command_list
    }

    /// Swap chain extent in pixels.
    #[inline]
    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    /// Records a whole-resource transition of the target.
    pub fn transition_target(&mut self, before: ResourceState, after: ResourceState) {
        let barrier = ResourceBarrier::transition(self.target, before, after);
        self.command_list.resource_barrier(&[barrier]);
    }

    /// Clears the target: `Present → RenderTarget`, clear, `RenderTarget → Present`.
    pub fn clear_target(&mut self, color: [f32; 4]) {
        self.transition_target(ResourceState::Present, ResourceState::RenderTarget);
        self.command_list.clear_texture(self.target, color);
        self.transition_target(ResourceState::RenderTarget, ResourceState::Present);
    }
}
