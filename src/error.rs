use thiserror::Error;

/// Why an image load did not produce a raster.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// Transport failure: connection, HTTP status or local I/O.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// Bytes arrived but no decoder accepted them.
    #[error("decode error: {0}")]
    Decode(String),

    /// The load session was cancelled or superseded.
    #[error("load cancelled")]
    Cancelled,
}

impl LoadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LoadError::Cancelled)
    }
}

/// GPU-side failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// Adapter, device, surface or pipeline setup failed. Also reported
    /// when rebuilding after a context loss fails.
    #[error("failed to initialize renderer: {0}")]
    Init(String),

    /// The device or surface went away; recovered by a rebuild.
    #[error("rendering context lost")]
    ContextLost,

    /// A raster could not be turned into a texture.
    #[error("texture upload failed: {0}")]
    Upload(String),

    /// The surface refused a frame in an unrecoverable way.
    #[error("surface error: {0}")]
    Surface(String),
}
