//! Door timer.

use std::time::{Duration, Instant};

/// Absolute-deadline door timer.
///
/// Obstruction pauses the timer by deactivating it; resuming always re-arms
/// the full door-open duration, so a blocked door never times out mid-hold.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoorTimer {
    deadline: Option<Instant>,
}

impl DoorTimer {
    pub fn new() -> Self {
        Self { deadline: None }
    }

    pub fn start(&mut self, duration: Duration, now: Instant) {
        self.deadline = Some(now + duration);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn active(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn timed_out(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if now > deadline)
    }
}
