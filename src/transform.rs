//! Viewport transform math.
//!
//! Scale is measured in surface units per image pixel and translation is the
//! offset of the image centre from the surface centre (x right, y down). All
//! functions here are pure and total: malformed input is clamped to a safe
//! value instead of being reported.

use std::ops::{Add, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// True when either side is zero, negative or not finite.
    pub fn is_degenerate(&self) -> bool {
        !(self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0)
    }

    pub fn center(&self) -> Point {
        Point::new(self.width / 2.0, self.height / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn midpoint(self, other: Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub scale: f32,
    pub translate_x: f32,
    pub translate_y: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self::new(1.0, 0.0, 0.0)
    }
}

impl Transform {
    pub const fn new(scale: f32, translate_x: f32, translate_y: f32) -> Self {
        Self {
            scale,
            translate_x,
            translate_y,
        }
    }

    pub fn translation(&self) -> Point {
        Point::new(self.translate_x, self.translate_y)
    }

    pub fn with_translation(self, translation: Point) -> Self {
        Self::new(self.scale, translation.x, translation.y)
    }

    pub fn is_centered(&self) -> bool {
        self.translate_x == 0.0 && self.translate_y == 0.0
    }

    /// Component-wise linear interpolation; `t` is not clamped.
    pub fn lerp(&self, to: &Transform, t: f32) -> Transform {
        let mix = |a: f32, b: f32| a + (b - a) * t;
        Transform::new(
            mix(self.scale, to.scale),
            mix(self.translate_x, to.translate_x),
            mix(self.translate_y, to.translate_y),
        )
    }

    pub fn approx_eq(&self, other: &Transform, epsilon: f32) -> bool {
        (self.scale - other.scale).abs() <= epsilon
            && (self.translate_x - other.translate_x).abs() <= epsilon
            && (self.translate_y - other.translate_y).abs() <= epsilon
    }

    /// Image-space coordinates (pixels from the image centre) of a surface point.
    pub fn image_point_at(&self, surface_point: Point, surface: Size) -> Point {
        let center = surface.center();
        Point::new(
            (surface_point.x - center.x - self.translate_x) / self.scale,
            (surface_point.y - center.y - self.translate_y) / self.scale,
        )
    }
}

/// Zoom range expressed as multiples of the fit scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleLimits {
    pub min_factor: f32,
    pub max_factor: f32,
}

impl Default for ScaleLimits {
    fn default() -> Self {
        Self {
            min_factor: 0.1,
            max_factor: 10.0,
        }
    }
}

/// Everything the constraint and zoom math needs to know about the scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub image: Size,
    pub surface: Size,
    pub fit_scale: f32,
    pub limits: ScaleLimits,
    pub limit_to_bounds: bool,
}

impl Viewport {
    pub fn new(
        image: Size,
        surface: Size,
        initial_scale: f32,
        limits: ScaleLimits,
        limit_to_bounds: bool,
    ) -> Self {
        Self {
            image,
            surface,
            fit_scale: fit_to_surface(image, surface, initial_scale).scale,
            limits,
            limit_to_bounds,
        }
    }

    pub fn min_scale(&self) -> f32 {
        self.fit_scale * positive_or(self.limits.min_factor, 1.0)
    }

    pub fn max_scale(&self) -> f32 {
        (self.fit_scale * positive_or(self.limits.max_factor, 1.0)).max(self.min_scale())
    }

    pub fn clamp_scale(&self, scale: f32) -> f32 {
        if !scale.is_finite() {
            return self.fit_scale;
        }
        scale.max(self.min_scale()).min(self.max_scale())
    }

    /// Largest translation per axis that keeps the scaled image covering the
    /// surface centre line.
    pub fn max_translation(&self, scale: f32) -> Point {
        if self.image.is_degenerate() || self.surface.is_degenerate() {
            return Point::ZERO;
        }
        Point::new(
            ((self.image.width * scale - self.surface.width) / 2.0).max(0.0),
            ((self.image.height * scale - self.surface.height) / 2.0).max(0.0),
        )
    }

    pub fn fit_transform(&self) -> Transform {
        Transform::new(self.fit_scale, 0.0, 0.0)
    }
}

fn positive_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        fallback
    }
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() { value } else { 0.0 }
}

/// Scale at which `image` fits inside `surface` on its limiting axis, times
/// `initial_scale`. Degenerate sizes yield `initial_scale` unchanged.
pub fn fit_to_surface(image: Size, surface: Size, initial_scale: f32) -> Transform {
    let initial = positive_or(initial_scale, 1.0);
    if image.is_degenerate() || surface.is_degenerate() {
        return Transform::new(initial, 0.0, 0.0);
    }
    let scale = (surface.width / image.width).min(surface.height / image.height) * initial;
    Transform::new(positive_or(scale, initial), 0.0, 0.0)
}

/// Clamps scale into the viewport's range and translation into its bounds.
/// At or below the fit scale the image is always centred.
pub fn constrain(transform: Transform, viewport: &Viewport) -> Transform {
    let scale = viewport.clamp_scale(transform.scale);
    if scale <= viewport.fit_scale {
        return Transform::new(scale, 0.0, 0.0);
    }

    let tx = finite_or_zero(transform.translate_x);
    let ty = finite_or_zero(transform.translate_y);
    if !viewport.limit_to_bounds {
        return Transform::new(scale, tx, ty);
    }

    let max = viewport.max_translation(scale);
    Transform::new(scale, tx.max(-max.x).min(max.x), ty.max(-max.y).min(max.y))
}

/// Scales by `factor` around `anchor` (surface coordinates) so the image
/// point under the anchor stays put. The returned translation is not
/// bounds-constrained.
pub fn zoom_at_point(
    transform: Transform,
    anchor: Point,
    factor: f32,
    viewport: &Viewport,
) -> Transform {
    if !factor.is_finite() || factor <= 0.0 || !anchor.is_finite() {
        return transform;
    }
    let scale = positive_or(transform.scale, viewport.fit_scale);
    let new_scale = viewport.clamp_scale(scale * factor);
    if new_scale == scale {
        return transform;
    }

    let center = viewport.surface.center();
    let ax = anchor.x - center.x;
    let ay = anchor.y - center.y;
    let ratio = new_scale / scale;
    let tx = finite_or_zero(transform.translate_x);
    let ty = finite_or_zero(transform.translate_y);

    Transform::new(new_scale, ax - (ax - tx) * ratio, ay - (ay - ty) * ratio)
}
