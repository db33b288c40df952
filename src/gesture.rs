//! Turns normalized pointer, touch and wheel input into transform intents.
//!
//! The recognizer never touches the transform itself; it reports what the
//! user asked for and the engine applies it through the constrained setters.

use std::time::{Duration, Instant};

use crate::config::WheelOptions;
use crate::events::{InputEvent, PointerButton, WheelDelta, WheelDeltaMode};
use crate::transform::Point;

/// Max distance between the two presses of a double tap.
const DOUBLE_TAP_SLOP: f32 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureState {
    Idle,
    Dragging { anchor: Point },
    Pinching { last_distance: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureAction {
    DragStart,
    /// New absolute translation requested by a drag.
    Pan { translate: Point },
    DragEnd,
    PinchStart,
    PinchEnd,
    /// Non-animated zoom around `anchor` (pinch or wheel).
    Zoom { anchor: Point, factor: f32 },
    DoubleTap { at: Point },
}

/// Wheel zoom factor for a delta, or `None` when there is nothing to do.
pub fn wheel_zoom_factor(delta: &WheelDelta, options: &WheelOptions) -> Option<f32> {
    let unit = match delta.mode {
        WheelDeltaMode::Pixel => 1.0,
        WheelDeltaMode::Line => options.line_height,
        WheelDeltaMode::Page => options.page_height,
    };
    let dy = delta.y * unit;
    if !dy.is_finite() || dy == 0.0 {
        return None;
    }
    let limit = options.max_delta.abs();
    let dy = dy.max(-limit).min(limit);
    let headroom = (options.max_step - options.base_step).max(0.0);
    let step = options.base_step + (dy.abs() * options.speed_multiplier).min(headroom);
    if dy < 0.0 {
        Some(1.0 + step)
    } else {
        Some(1.0 / (1.0 + step))
    }
}

#[derive(Debug)]
struct TapTracker {
    window: Duration,
    last: Option<(Instant, Point)>,
}

impl TapTracker {
    /// Records a press; true when it completes a double tap.
    fn register(&mut self, at: Point, now: Instant) -> bool {
        if let Some((when, where_)) = self.last.take() {
            if now.saturating_duration_since(when) <= self.window
                && at.distance(where_) <= DOUBLE_TAP_SLOP
            {
                return true;
            }
        }
        self.last = Some((now, at));
        false
    }
}

#[derive(Debug)]
pub struct GestureRecognizer {
    state: GestureState,
    contacts: Vec<(u64, Point)>,
    taps: TapTracker,
    wheel: WheelOptions,
}

impl GestureRecognizer {
    pub fn new(wheel: WheelOptions, double_tap_window: Duration) -> Self {
        Self {
            state: GestureState::Idle,
            contacts: Vec::with_capacity(2),
            taps: TapTracker {
                window: double_tap_window,
                last: None,
            },
            wheel,
        }
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = GestureState::Idle;
        self.contacts.clear();
        self.taps.last = None;
    }

    /// Re-anchors a running drag after the translation changed underneath
    /// it, so the next move continues from `translate` at `cursor`.
    pub fn rebase(&mut self, cursor: Point, translate: Point) {
        if let GestureState::Dragging { .. } = self.state {
            self.state = GestureState::Dragging {
                anchor: cursor - translate,
            };
        }
    }

    /// Feeds one event. `translate` is the transform's current translation,
    /// used to anchor drags.
    pub fn handle(
        &mut self,
        event: &InputEvent,
        translate: Point,
        now: Instant,
    ) -> Option<GestureAction> {
        match *event {
            InputEvent::PointerDown { position, button } => {
                if button != PointerButton::Primary || !self.contacts.is_empty() {
                    return None;
                }
                self.press(position, translate, now)
            }
            InputEvent::PointerMove { position } => match self.state {
                GestureState::Dragging { anchor } if self.contacts.is_empty() => {
                    Some(GestureAction::Pan {
                        translate: position - anchor,
                    })
                }
                _ => None,
            },
            InputEvent::PointerUp { button, .. } => {
                if button != PointerButton::Primary || !self.contacts.is_empty() {
                    return None;
                }
                self.release_drag()
            }
            InputEvent::TouchStart { id, position } => self.touch_start(id, position, translate, now),
            InputEvent::TouchMove { id, position } => self.touch_move(id, position),
            InputEvent::TouchEnd { id, .. } | InputEvent::TouchCancel { id } => self.touch_end(id),
            InputEvent::Wheel { position, delta } => {
                wheel_zoom_factor(&delta, &self.wheel).map(|factor| GestureAction::Zoom {
                    anchor: position,
                    factor,
                })
            }
            InputEvent::DoubleClick { position } => {
                self.state = GestureState::Idle;
                Some(GestureAction::DoubleTap { at: position })
            }
        }
    }

    fn press(&mut self, position: Point, translate: Point, now: Instant) -> Option<GestureAction> {
        if self.taps.register(position, now) {
            self.state = GestureState::Idle;
            return Some(GestureAction::DoubleTap { at: position });
        }
        self.state = GestureState::Dragging {
            anchor: position - translate,
        };
        Some(GestureAction::DragStart)
    }

    fn release_drag(&mut self) -> Option<GestureAction> {
        match self.state {
            GestureState::Dragging { .. } => {
                self.state = GestureState::Idle;
                Some(GestureAction::DragEnd)
            }
            _ => None,
        }
    }

    fn touch_start(
        &mut self,
        id: u64,
        position: Point,
        translate: Point,
        now: Instant,
    ) -> Option<GestureAction> {
        if let Some(contact) = self.contacts.iter_mut().find(|(cid, _)| *cid == id) {
            contact.1 = position;
            return None;
        }
        self.contacts.push((id, position));
        match self.contacts.len() {
            1 => self.press(position, translate, now),
            2 => {
                let distance = self.contacts[0].1.distance(self.contacts[1].1);
                self.state = GestureState::Pinching {
                    last_distance: distance,
                };
                Some(GestureAction::PinchStart)
            }
            _ => None,
        }
    }

    fn touch_move(&mut self, id: u64, position: Point) -> Option<GestureAction> {
        let contact = self.contacts.iter_mut().find(|(cid, _)| *cid == id)?;
        contact.1 = position;

        match self.state {
            GestureState::Dragging { anchor } if self.contacts.len() == 1 => {
                Some(GestureAction::Pan {
                    translate: position - anchor,
                })
            }
            GestureState::Pinching { last_distance } if self.contacts.len() >= 2 => {
                let (a, b) = (self.contacts[0].1, self.contacts[1].1);
                let distance = a.distance(b);
                self.state = GestureState::Pinching {
                    last_distance: distance,
                };
                if last_distance <= f32::EPSILON || distance <= f32::EPSILON {
                    return None;
                }
                Some(GestureAction::Zoom {
                    anchor: a.midpoint(b),
                    factor: distance / last_distance,
                })
            }
            _ => None,
        }
    }

    fn touch_end(&mut self, id: u64) -> Option<GestureAction> {
        let before = self.contacts.len();
        self.contacts.retain(|(cid, _)| *cid != id);
        if self.contacts.len() == before {
            return None;
        }

        match self.state {
            GestureState::Pinching { .. } if self.contacts.len() < 2 => {
                self.state = GestureState::Idle;
                Some(GestureAction::PinchEnd)
            }
            GestureState::Dragging { .. } if self.contacts.is_empty() => self.release_drag(),
            _ => None,
        }
    }
}
