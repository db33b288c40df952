//! Per-instance viewer state.
//!
//! [`Engine`] owns the transform and every piece of machinery that mutates
//! it. All mutation goes through [`constrain`], so the scale range and the
//! centring rule hold after any sequence of calls. Time is passed in by the
//! caller; nothing here reads the clock.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::animation::AnimationScheduler;
use crate::config::ViewerOptions;
use crate::error::RenderError;
use crate::events::{InputEvent, RasterImage};
use crate::gesture::{GestureAction, GestureRecognizer, GestureState};
use crate::gpu::{ContextState, GpuResourceManager, RenderBackend, quad_matrix};
use crate::transform::{Point, Size, Transform, Viewport, constrain, zoom_at_point};

/// Above this multiple of the fit scale a double tap zooms back out.
const DOUBLE_TAP_RESET_THRESHOLD: f32 = 1.1;

const TRANSFORM_EPSILON: f32 = 1e-4;

/// When the host should call [`Engine::render_frame`] next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSchedule {
    Idle,
    Now,
    At(Instant),
}

type TransformListener = Box<dyn FnMut(&Transform)>;

pub struct Engine<B> {
    options: ViewerOptions,
    transform: Transform,
    surface: Size,
    image: Option<Size>,
    animation: AnimationScheduler,
    gestures: GestureRecognizer,
    gpu: GpuResourceManager<B>,
    listeners: Vec<TransformListener>,
    dirty: bool,
    destroyed: bool,
}

impl<B: RenderBackend> Engine<B> {
    /// `surface` is in logical units. The host follows up with
    /// [`Engine::resize`] once it knows the physical size.
    pub fn new(backend: B, surface: Size, options: ViewerOptions) -> Self {
        let animation = AnimationScheduler::new(options.animation_duration, options.smooth);
        let gestures = GestureRecognizer::new(options.wheel.clone(), options.double_tap_window);
        let gpu = GpuResourceManager::new(backend, options.max_fps);
        Self {
            transform: Transform::new(options.initial_scale, 0.0, 0.0),
            surface,
            image: None,
            animation,
            gestures,
            gpu,
            listeners: Vec::new(),
            dirty: true,
            destroyed: false,
            options,
        }
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn surface(&self) -> Size {
        self.surface
    }

    pub fn image_size(&self) -> Option<Size> {
        self.image
    }

    pub fn options(&self) -> &ViewerOptions {
        &self.options
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::new(
            self.image.unwrap_or(Size::new(0.0, 0.0)),
            self.surface,
            self.options.initial_scale,
            self.options.scale_limits(),
            self.options.limit_to_bounds,
        )
    }

    pub fn fit_scale(&self) -> f32 {
        self.viewport().fit_scale
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_active()
    }

    pub fn gesture_state(&self) -> GestureState {
        self.gestures.state()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn gpu(&self) -> &GpuResourceManager<B> {
        &self.gpu
    }

    pub fn backend(&self) -> &B {
        self.gpu.backend()
    }

    /// Registers a callback run after every committed transform change,
    /// including each animation frame.
    pub fn on_transform_change(&mut self, listener: impl FnMut(&Transform) + 'static) {
        if self.destroyed {
            return;
        }
        self.listeners.push(Box::new(listener));
    }

    /// Uploads `raster`, then shows it at the fit transform. On upload
    /// failure the previous image and transform stay in place.
    pub fn set_image(&mut self, raster: Arc<RasterImage>) -> Result<(), RenderError> {
        if self.destroyed {
            return Ok(());
        }
        let size = Size::new(raster.width as f32, raster.height as f32);
        self.gpu.upload(raster)?;
        self.image = Some(size);
        self.animation.cancel();
        self.gestures.reset();
        self.transform = self.viewport().fit_transform();
        debug!(width = size.width, height = size.height, fit_scale = self.transform.scale, "image set");
        self.dirty = true;
        self.notify();
        Ok(())
    }

    pub fn zoom_in(&mut self, animated: bool, now: Instant) {
        self.zoom_by(self.options.zoom_step, animated, now);
    }

    pub fn zoom_out(&mut self, animated: bool, now: Instant) {
        self.zoom_by(1.0 / self.options.zoom_step, animated, now);
    }

    fn zoom_by(&mut self, factor: f32, animated: bool, now: Instant) {
        if self.destroyed || self.image.is_none() {
            return;
        }
        let viewport = self.viewport();
        let center = self.surface.center();
        let target = constrain(
            zoom_at_point(self.transform, center, factor, &viewport),
            &viewport,
        );
        self.transition(target, animated, now);
    }

    pub fn reset_view(&mut self, now: Instant) {
        if self.destroyed || self.image.is_none() {
            return;
        }
        let fit = self.viewport().fit_transform();
        self.transition(fit, self.options.smooth, now);
    }

    /// Updates the surface size. The zoom ratio relative to the fit scale is
    /// kept across the change.
    pub fn resize(&mut self, logical: Size, physical: (u32, u32)) {
        if self.destroyed {
            return;
        }
        if logical.is_degenerate() {
            debug!(?logical, "ignoring degenerate surface size");
            return;
        }
        let ratio = self.transform.scale / self.fit_scale();
        self.surface = logical;
        self.gpu.resize(physical.0, physical.1);

        // a running transition was aimed at the old geometry
        self.animation.cancel();
        let fit_scale = self.fit_scale();
        let ratio = if ratio.is_finite() && ratio > 0.0 { ratio } else { 1.0 };
        let refit = Transform::new(
            fit_scale * ratio,
            self.transform.translate_x,
            self.transform.translate_y,
        );
        debug!(width = logical.width, height = logical.height, fit_scale, "surface resized");
        self.commit(refit);
        self.dirty = true;
    }

    pub fn handle_input(&mut self, event: &InputEvent, now: Instant) {
        if self.destroyed {
            return;
        }
        let Some(action) = self.gestures.handle(event, self.transform.translation(), now) else {
            return;
        };
        match action {
            GestureAction::DragStart | GestureAction::PinchStart => {
                self.animation.cancel();
            }
            GestureAction::Pan { translate } => {
                self.animation.cancel();
                self.commit(self.transform.with_translation(translate));
            }
            GestureAction::DragEnd => {
                let at_or_below_fit = self.transform.scale <= self.fit_scale();
                if at_or_below_fit && !self.transform.is_centered() {
                    let centred = self.transform.with_translation(Point::ZERO);
                    self.transition(centred, true, now);
                } else {
                    self.commit(self.transform);
                }
            }
            GestureAction::PinchEnd => {
                self.commit(self.transform);
            }
            GestureAction::Zoom { anchor, factor } => {
                self.animation.cancel();
                let viewport = self.viewport();
                self.commit(zoom_at_point(self.transform, anchor, factor, &viewport));
                // a wheel zoom mid-drag moves the image under the cursor
                self.gestures.rebase(anchor, self.transform.translation());
            }
            GestureAction::DoubleTap { at } => {
                let viewport = self.viewport();
                let target = if self.transform.scale > viewport.fit_scale * DOUBLE_TAP_RESET_THRESHOLD
                {
                    viewport.fit_transform()
                } else {
                    let wanted = viewport.fit_scale * self.options.double_tap_scale;
                    let factor = wanted / self.transform.scale;
                    constrain(zoom_at_point(self.transform, at, factor, &viewport), &viewport)
                };
                self.transition(target, true, now);
            }
        }
    }

    /// Suspends rendering. A running animation jumps to its target so the
    /// view is settled when the context comes back.
    pub fn on_context_lost(&mut self) {
        if self.destroyed {
            return;
        }
        if let Some(target) = self.animation.target() {
            self.animation.cancel();
            self.commit(target);
        }
        self.gestures.reset();
        self.gpu.context_lost();
    }

    pub fn on_context_restored(&mut self) -> Result<(), RenderError> {
        if self.destroyed {
            return Ok(());
        }
        self.gpu.context_restored()?;
        self.dirty = true;
        Ok(())
    }

    pub fn frame_schedule(&self, now: Instant) -> FrameSchedule {
        if self.destroyed || self.gpu.state() == ContextState::Suspended {
            return FrameSchedule::Idle;
        }
        if !self.dirty && !self.animation.is_active() {
            return FrameSchedule::Idle;
        }
        if self.gpu.can_draw(now) {
            FrameSchedule::Now
        } else {
            FrameSchedule::At(self.gpu.next_frame_at().unwrap_or(now))
        }
    }

    /// Advances the animation and draws one frame if the throttle allows.
    /// Returns whether a frame was presented.
    pub fn render_frame(&mut self, now: Instant) -> Result<bool, RenderError> {
        if self.destroyed || !self.gpu.can_draw(now) {
            return Ok(false);
        }
        if let Some(frame) = self.animation.sample(now) {
            self.transform = frame.transform;
            self.notify();
            if frame.finished {
                debug!(scale = frame.transform.scale, "animation finished");
            }
        }

        let matrix = self
            .image
            .map(|image| quad_matrix(&self.transform, image, self.surface));
        let presented = self.gpu.draw(matrix.as_ref(), now)?;
        if presented {
            self.dirty = false;
        }
        Ok(presented)
    }

    /// Releases GPU resources and detaches listeners. Later calls on the
    /// engine do nothing.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.animation.cancel();
        self.gestures.reset();
        self.gpu.release();
        self.listeners.clear();
        self.dirty = false;
        info!("viewer engine destroyed");
    }

    /// Animated transitions always run; `smooth` only picks the easing.
    fn transition(&mut self, target: Transform, animated: bool, now: Instant) {
        if animated {
            if target.approx_eq(&self.transform, TRANSFORM_EPSILON) {
                self.animation.cancel();
                return;
            }
            self.animation.start(self.transform, target, now);
            self.dirty = true;
        } else {
            self.animation.cancel();
            self.commit(target);
        }
    }

    fn commit(&mut self, transform: Transform) {
        let constrained = constrain(transform, &self.viewport());
        if constrained == self.transform {
            return;
        }
        self.transform = constrained;
        self.dirty = true;
        self.notify();
    }

    fn notify(&mut self) {
        let transform = self.transform;
        for listener in &mut self.listeners {
            listener(&transform);
        }
    }
}
