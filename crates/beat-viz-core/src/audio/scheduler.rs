//! Frame callback scheduling.
//!
//! The manager never waits on display timing directly. It asks a
//! [`FrameScheduler`] for the next frame and the host fires due frames from
//! its own update loop.

/// Identifies one requested frame callback
pub type FrameId = u64;

pub trait FrameScheduler {
    /// Ask for a callback on the next frame
    fn request_frame(&mut self) -> FrameId;

    /// Withdraw a request; unknown or already fired ids are ignored
    fn cancel_frame(&mut self, id: FrameId);

    /// Requests that are due now, in request order
    fn take_due(&mut self) -> Vec<FrameId>;
}

/// Fires every pending request on the next pump
#[derive(Debug, Default)]
pub struct FrameQueue {
    next_id: FrameId,
    pending: Vec<FrameId>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl FrameScheduler for FrameQueue {
    fn request_frame(&mut self) -> FrameId {
        self.next_id += 1;
        self.pending.push(self.next_id);
        self.next_id
    }

    fn cancel_frame(&mut self, id: FrameId) {
        self.pending.retain(|&p| p != id);
    }

    fn take_due(&mut self) -> Vec<FrameId> {
        std::mem::take(&mut self.pending)
    }
}
