use std::time::{Duration, Instant};

/// Caps frame submission to a fixed rate. Callers that arrive early are told
/// when the next frame is allowed; nothing is queued.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    interval: Duration,
    last_frame: Option<Instant>,
}

impl FrameThrottle {
    pub fn new(max_fps: u32) -> Self {
        let interval = if max_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / max_fps
        };
        Self {
            interval,
            last_frame: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Earliest instant at which the next frame may be submitted.
    pub fn next_allowed(&self) -> Option<Instant> {
        self.last_frame.map(|last| last + self.interval)
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.next_allowed().is_none_or(|at| now >= at)
    }

    /// Claims the current slot. Returns false when called too early.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if !self.is_ready(now) {
            return false;
        }
        self.last_frame = Some(now);
        true
    }
}
