//! In-memory [`RenderBackend`] that records every call, for tests.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use super::{QuadMatrix, RenderBackend};
use crate::error::RenderError;
use crate::events::RasterImage;

#[derive(Debug, Default)]
pub struct Recording {
    pub uploads: Vec<(u32, u32)>,
    pub draws: Vec<Option<QuadMatrix>>,
    pub resizes: Vec<(u32, u32)>,
    pub rebuilds: usize,
    pub releases: usize,
    pub fail_next_upload: bool,
    pub fail_rebuild: bool,
    pub lose_context_on_next_draw: bool,
}

/// Cloning shares the recording, so a test can keep a handle after moving
/// the backend into an engine.
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    log: Rc<RefCell<Recording>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recording(&self) -> Ref<'_, Recording> {
        self.log.borrow()
    }

    pub fn with_recording<R>(&self, f: impl FnOnce(&mut Recording) -> R) -> R {
        f(&mut self.log.borrow_mut())
    }

    /// Scale components of every drawn quad, `(sx, sy)`.
    pub fn drawn_scales(&self) -> Vec<(f32, f32)> {
        self.log
            .borrow()
            .draws
            .iter()
            .flatten()
            .map(|m| (m[0], m[4]))
            .collect()
    }
}

impl RenderBackend for RecordingBackend {
    fn resize(&mut self, width: u32, height: u32) {
        self.log.borrow_mut().resizes.push((width, height));
    }

    fn upload_texture(&mut self, raster: &RasterImage) -> Result<(), RenderError> {
        let mut log = self.log.borrow_mut();
        if std::mem::take(&mut log.fail_next_upload) {
            return Err(RenderError::Upload("texture allocation refused".into()));
        }
        log.uploads.push((raster.width, raster.height));
        Ok(())
    }

    fn draw(&mut self, matrix: Option<&QuadMatrix>) -> Result<bool, RenderError> {
        let mut log = self.log.borrow_mut();
        if std::mem::take(&mut log.lose_context_on_next_draw) {
            return Err(RenderError::ContextLost);
        }
        log.draws.push(matrix.copied());
        Ok(true)
    }

    fn rebuild(&mut self) -> Result<(), RenderError> {
        let mut log = self.log.borrow_mut();
        if log.fail_rebuild {
            return Err(RenderError::Init("device request refused".into()));
        }
        log.rebuilds += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.log.borrow_mut().releases += 1;
    }
}
