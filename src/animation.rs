use std::time::{Duration, Instant};

use tracing::debug;

use crate::transform::Transform;

/// Cubic ease-in/ease-out over `[0, 1]`.
pub fn ease_in_out_cubic(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Animation {
    started_at: Instant,
    from: Transform,
    to: Transform,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationFrame {
    pub transform: Transform,
    pub finished: bool,
}

/// Drives one transform transition at a time. Starting a new transition
/// replaces the running one; nothing is queued.
#[derive(Debug)]
pub struct AnimationScheduler {
    duration: Duration,
    smooth: bool,
    active: Option<Animation>,
}

impl AnimationScheduler {
    pub fn new(duration: Duration, smooth: bool) -> Self {
        Self {
            duration,
            smooth,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn target(&self) -> Option<Transform> {
        self.active.map(|anim| anim.to)
    }

    /// Begins a transition from `from` (the caller's current transform) to `to`.
    pub fn start(&mut self, from: Transform, to: Transform, now: Instant) {
        if self.active.is_some() {
            debug!("superseding running animation");
        }
        self.active = Some(Animation {
            started_at: now,
            from,
            to,
        });
    }

    /// Returns whether an animation was running.
    pub fn cancel(&mut self) -> bool {
        self.active.take().is_some()
    }

    pub fn sample(&mut self, now: Instant) -> Option<AnimationFrame> {
        let anim = self.active?;
        let progress = if self.duration.is_zero() {
            1.0
        } else {
            let elapsed = now.saturating_duration_since(anim.started_at);
            (elapsed.as_secs_f32() / self.duration.as_secs_f32()).clamp(0.0, 1.0)
        };

        if progress >= 1.0 {
            self.active = None;
            return Some(AnimationFrame {
                transform: anim.to,
                finished: true,
            });
        }

        let eased = if self.smooth {
            ease_in_out_cubic(progress)
        } else {
            progress
        };
        Some(AnimationFrame {
            transform: anim.from.lerp(&anim.to, eased),
            finished: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn easing_is_symmetric_and_anchored() {
        assert_eq!(ease_in_out_cubic(0.0), 0.0);
        assert_eq!(ease_in_out_cubic(1.0), 1.0);
        assert!((ease_in_out_cubic(0.5) - 0.5).abs() < 1e-6);
        assert!((ease_in_out_cubic(0.25) + ease_in_out_cubic(0.75) - 1.0).abs() < 1e-6);
        assert!((ease_in_out_cubic(0.25) - 0.0625).abs() < 1e-6);
    }

    #[test]
    fn runs_to_target_then_goes_idle() {
        let t0 = Instant::now();
        let mut sched = AnimationScheduler::new(300 * MS, true);
        let from = Transform::new(1.0, 0.0, 0.0);
        let to = Transform::new(2.0, 100.0, -50.0);
        sched.start(from, to, t0);

        let mid = sched.sample(t0 + 150 * MS).unwrap();
        assert!(!mid.finished);
        assert!(mid.transform.approx_eq(&Transform::new(1.5, 50.0, -25.0), 1e-3));

        let end = sched.sample(t0 + 300 * MS).unwrap();
        assert!(end.finished);
        assert_eq!(end.transform, to);
        assert!(!sched.is_active());
        assert!(sched.sample(t0 + 400 * MS).is_none());
    }

    #[test]
    fn linear_progress_without_smoothing() {
        let t0 = Instant::now();
        let mut sched = AnimationScheduler::new(100 * MS, false);
        sched.start(Transform::new(1.0, 0.0, 0.0), Transform::new(2.0, 0.0, 0.0), t0);
        let frame = sched.sample(t0 + 25 * MS).unwrap();
        assert!((frame.transform.scale - 1.25).abs() < 1e-4);
    }

    #[test]
    fn new_start_supersedes_previous_target() {
        let t0 = Instant::now();
        let mut sched = AnimationScheduler::new(300 * MS, true);
        let a = Transform::new(3.0, 0.0, 0.0);
        let b = Transform::new(0.5, 0.0, 0.0);
        sched.start(Transform::default(), a, t0);
        sched.start(Transform::default(), b, t0);
        assert_eq!(sched.target(), Some(b));

        let last = sched.sample(t0 + 300 * MS).unwrap();
        assert_eq!(last.transform, b);
    }

    #[test]
    fn zero_duration_finishes_immediately() {
        let t0 = Instant::now();
        let mut sched = AnimationScheduler::new(Duration::ZERO, true);
        let to = Transform::new(4.0, 1.0, 1.0);
        sched.start(Transform::default(), to, t0);
        let frame = sched.sample(t0).unwrap();
        assert!(frame.finished);
        assert_eq!(frame.transform, to);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut sched = AnimationScheduler::new(300 * MS, true);
        sched.start(Transform::default(), Transform::new(2.0, 0.0, 0.0), Instant::now());
        assert!(sched.cancel());
        assert!(!sched.cancel());
        assert!(!sched.is_active());
    }
}
