//! GPU resource ownership.
//!
//! [`GpuResourceManager`] holds the policy: which raster is current, whether
//! the context is usable, and when a frame may be submitted. The actual
//! device work sits behind [`RenderBackend`] so the policy can be exercised
//! without a GPU.

mod mipmap;
mod renderer;
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
mod throttle;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

pub use renderer::WgpuRenderer;
pub use throttle::FrameThrottle;

use crate::error::RenderError;
use crate::events::RasterImage;
use crate::transform::{Size, Transform};

/// Column-major 3×3 affine matrix mapping the unit quad to clip space.
pub type QuadMatrix = [f32; 9];

pub const IDENTITY_MATRIX: QuadMatrix = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

/// Device-level operations the manager needs.
pub trait RenderBackend {
    /// Reconfigures the presentation surface, in physical pixels.
    fn resize(&mut self, width: u32, height: u32);

    /// Creates and binds a texture for `raster`, then drops the previous one.
    /// On failure the previous texture stays bound.
    fn upload_texture(&mut self, raster: &RasterImage) -> Result<(), RenderError>;

    /// Draws one frame; `None` only clears. `Ok(false)` means the frame was
    /// skipped and should be retried.
    fn draw(&mut self, matrix: Option<&QuadMatrix>) -> Result<bool, RenderError>;

    /// Recreates device, pipeline and buffers after a context loss. The
    /// texture is not restored.
    fn rebuild(&mut self) -> Result<(), RenderError>;

    /// Drops every GPU resource.
    fn release(&mut self);
}

/// Matrix for drawing `image` under `transform` on `surface`.
///
/// Each axis is scaled by its own image/surface ratio, so at the fit scale
/// the limiting axis spans the surface and the other is letterboxed.
pub fn quad_matrix(transform: &Transform, image: Size, surface: Size) -> QuadMatrix {
    if image.is_degenerate() || surface.is_degenerate() || !transform.scale.is_finite() {
        return IDENTITY_MATRIX;
    }
    let sx = transform.scale * image.width / surface.width;
    let sy = transform.scale * image.height / surface.height;
    let tx = transform.translate_x / (surface.width / 2.0);
    let ty = -transform.translate_y / (surface.height / 2.0);
    [sx, 0.0, 0.0, 0.0, sy, 0.0, tx, ty, 1.0]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinFilter {
    Linear,
    LinearMipmapLinear,
}

/// Sampling setup for a texture of a given size. Magnification is always
/// linear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureFiltering {
    pub min_filter: MinFilter,
    pub mip_levels: u32,
}

impl TextureFiltering {
    pub fn for_size(width: u32, height: u32) -> Self {
        if width.is_power_of_two() && height.is_power_of_two() {
            Self {
                min_filter: MinFilter::LinearMipmapLinear,
                mip_levels: mip_level_count(width, height),
            }
        } else {
            Self {
                min_filter: MinFilter::Linear,
                mip_levels: 1,
            }
        }
    }

    pub fn has_mipmaps(&self) -> bool {
        self.mip_levels > 1
    }
}

pub fn mip_level_count(width: u32, height: u32) -> u32 {
    u32::BITS - width.max(height).max(1).leading_zeros()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Active,
    Suspended,
}

pub struct GpuResourceManager<B> {
    backend: B,
    state: ContextState,
    raster: Option<Arc<RasterImage>>,
    throttle: FrameThrottle,
    physical: (u32, u32),
    released: bool,
}

impl<B: RenderBackend> GpuResourceManager<B> {
    pub fn new(backend: B, max_fps: u32) -> Self {
        Self {
            backend,
            state: ContextState::Active,
            raster: None,
            throttle: FrameThrottle::new(max_fps),
            physical: (0, 0),
            released: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn raster(&self) -> Option<&Arc<RasterImage>> {
        self.raster.as_ref()
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.physical = (width.max(1), height.max(1));
        if self.state == ContextState::Active && !self.released {
            self.backend.resize(self.physical.0, self.physical.1);
        }
    }

    /// Makes `raster` the displayed image. While suspended it is only
    /// retained and uploaded on restore.
    pub fn upload(&mut self, raster: Arc<RasterImage>) -> Result<(), RenderError> {
        if self.released {
            return Ok(());
        }
        if self.state == ContextState::Active {
            self.backend.upload_texture(&raster)?;
        }
        debug!(width = raster.width, height = raster.height, "raster bound");
        self.raster = Some(raster);
        Ok(())
    }

    pub fn next_frame_at(&self) -> Option<Instant> {
        self.throttle.next_allowed()
    }

    pub fn can_draw(&self, now: Instant) -> bool {
        !self.released && self.state == ContextState::Active && self.throttle.is_ready(now)
    }

    /// Submits a frame if the context is active and the throttle allows it.
    pub fn draw(&mut self, matrix: Option<&QuadMatrix>, now: Instant) -> Result<bool, RenderError> {
        if self.released || self.state != ContextState::Active {
            return Ok(false);
        }
        if !self.throttle.try_acquire(now) {
            return Ok(false);
        }
        match self.backend.draw(matrix) {
            Err(RenderError::ContextLost) => {
                self.context_lost();
                Err(RenderError::ContextLost)
            }
            other => other,
        }
    }

    /// `Active -> Suspended`. Returns false if already suspended.
    pub fn context_lost(&mut self) -> bool {
        if self.released || self.state == ContextState::Suspended {
            return false;
        }
        warn!("rendering context lost; suspending");
        self.state = ContextState::Suspended;
        true
    }

    /// `Suspended -> Active`: rebuilds everything and re-uploads the retained
    /// raster. Any failure is reported as an init error.
    pub fn context_restored(&mut self) -> Result<(), RenderError> {
        if self.released || self.state == ContextState::Active {
            return Ok(());
        }
        self.backend.rebuild().map_err(as_init_error)?;
        if self.physical.0 > 0 && self.physical.1 > 0 {
            self.backend.resize(self.physical.0, self.physical.1);
        }
        if let Some(raster) = self.raster.as_ref() {
            self.backend.upload_texture(raster).map_err(as_init_error)?;
        }
        self.state = ContextState::Active;
        info!(
            restored_texture = self.raster.is_some(),
            "rendering context rebuilt"
        );
        Ok(())
    }

    /// Drops all GPU resources. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.backend.release();
        self.raster = None;
        self.released = true;
        debug!("gpu resources released");
    }
}

fn as_init_error(err: RenderError) -> RenderError {
    match err {
        RenderError::Init(_) => err,
        other => RenderError::Init(format!("context rebuild failed: {other}")),
    }
}
