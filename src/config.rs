use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::transform::ScaleLimits;

/// One entry of the image sequence. Accepts either a bare string or a map
/// with `src` and an optional `title`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawImageEntry")]
pub struct ImageEntry {
    pub src: String,
    pub title: Option<String>,
}

impl ImageEntry {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            title: None,
        }
    }

    /// Title if set, else the last path segment of the source.
    pub fn display_name(&self) -> &str {
        if let Some(title) = self.title.as_deref() {
            return title;
        }
        let trimmed = self.src.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawImageEntry {
    Bare(String),
    #[serde(rename_all = "kebab-case")]
    Full { src: String, title: Option<String> },
}

impl From<RawImageEntry> for ImageEntry {
    fn from(raw: RawImageEntry) -> Self {
        match raw {
            RawImageEntry::Bare(src) => Self { src, title: None },
            RawImageEntry::Full { src, title } => Self { src, title },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct WheelOptions {
    /// Zoom step applied for the smallest wheel movement.
    pub base_step: f32,
    /// Upper bound on the zoom step of a single wheel event.
    pub max_step: f32,
    /// Extra step per normalized delta unit.
    pub speed_multiplier: f32,
    /// Normalized deltas are clamped to +/- this value.
    pub max_delta: f32,
    /// Pixels per line for line-mode deltas.
    pub line_height: f32,
    /// Pixels per page for page-mode deltas.
    pub page_height: f32,
}

impl Default for WheelOptions {
    fn default() -> Self {
        Self {
            base_step: 0.15,
            max_step: 0.3,
            speed_multiplier: 0.01,
            max_delta: 100.0,
            line_height: 16.0,
            page_height: 800.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ViewerOptions {
    /// Multiplier applied to the fit scale when an image is first shown.
    pub initial_scale: f32,
    /// Lowest zoom, as a multiple of the fit scale.
    pub min_scale: f32,
    /// Highest zoom, as a multiple of the fit scale.
    pub max_scale: f32,
    /// Ease animated transitions with a cubic curve.
    pub smooth: bool,
    /// Keep the zoomed image from being dragged off the surface.
    pub limit_to_bounds: bool,
    #[serde(with = "humantime_serde")]
    pub animation_duration: Duration,
    /// Factor used by zoom-in / zoom-out.
    pub zoom_step: f32,
    /// Zoom (relative to fit) reached by a double tap.
    pub double_tap_scale: f32,
    #[serde(with = "humantime_serde")]
    pub double_tap_window: Duration,
    /// Frame rate cap for render submission.
    pub max_fps: u32,
    pub wheel: WheelOptions,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            initial_scale: 1.0,
            min_scale: 0.1,
            max_scale: 10.0,
            smooth: true,
            limit_to_bounds: true,
            animation_duration: Duration::from_millis(300),
            zoom_step: 1.2,
            double_tap_scale: 2.0,
            double_tap_window: Duration::from_millis(300),
            max_fps: 60,
            wheel: WheelOptions::default(),
        }
    }
}

impl ViewerOptions {
    pub fn scale_limits(&self) -> ScaleLimits {
        ScaleLimits {
            min_factor: self.min_scale,
            max_factor: self.max_scale,
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.initial_scale.is_finite() && self.initial_scale > 0.0,
            "viewer.initial-scale must be positive"
        );
        ensure!(
            self.min_scale.is_finite() && self.min_scale > 0.0,
            "viewer.min-scale must be positive"
        );
        ensure!(
            self.max_scale.is_finite() && self.max_scale >= self.min_scale,
            "viewer.max-scale must be at least viewer.min-scale"
        );
        ensure!(
            self.initial_scale >= self.min_scale && self.initial_scale <= self.max_scale,
            "viewer.initial-scale must lie between min-scale and max-scale"
        );
        ensure!(self.zoom_step > 1.0, "viewer.zoom-step must be greater than 1");
        ensure!(
            self.double_tap_scale >= 1.0,
            "viewer.double-tap-scale must be at least 1"
        );
        ensure!(self.max_fps > 0, "viewer.max-fps must be positive");

        let wheel = &self.wheel;
        ensure!(
            wheel.base_step > 0.0 && wheel.max_step >= wheel.base_step,
            "viewer.wheel.base-step must be positive and not exceed max-step"
        );
        ensure!(
            wheel.speed_multiplier >= 0.0,
            "viewer.wheel.speed-multiplier must not be negative"
        );
        ensure!(wheel.max_delta > 0.0, "viewer.wheel.max-delta must be positive");
        ensure!(
            wheel.line_height > 0.0 && wheel.page_height > 0.0,
            "viewer.wheel line-height and page-height must be positive"
        );
        Ok(())
    }
}

/// Credentials sent by the `use-credentials` fallback attempt.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Credentials {
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Bearer { .. } => f.write_str("Bearer(<redacted>)"),
            Credentials::Basic { username, .. } => {
                write!(f, "Basic({username}, <redacted>)")
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct LoaderOptions {
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    pub user_agent: String,
    /// Read size for local files.
    pub read_chunk_size: usize,
    pub credentials: Option<Credentials>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("rust-photo-viewer/", env!("CARGO_PKG_VERSION")).to_string(),
            read_chunk_size: 64 * 1024,
            credentials: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct WindowOptions {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            title: "Photo Viewer".to_string(),
            width: 1280,
            height: 800,
            fullscreen: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    pub images: Vec<ImageEntry>,
    pub start_index: usize,
    /// Fixed text shown while an image loads; a per-image label is used when unset.
    pub loading_label: Option<String>,
    pub viewer: ViewerOptions,
    pub loader: LoaderOptions,
    pub window: WindowOptions,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse YAML in {}", path.display()))
    }

    pub fn validated(self) -> Result<Self> {
        ensure!(!self.images.is_empty(), "at least one image must be configured");
        ensure!(
            self.images.iter().all(|entry| !entry.src.trim().is_empty()),
            "image sources must not be empty"
        );
        ensure!(
            self.start_index < self.images.len(),
            "start-index {} is out of range for {} image(s)",
            self.start_index,
            self.images.len()
        );
        self.viewer.validate().context("invalid viewer options")?;
        ensure!(
            !self.loader.request_timeout.is_zero() && !self.loader.connect_timeout.is_zero(),
            "loader timeouts must be non-zero"
        );
        ensure!(
            self.loader.read_chunk_size > 0,
            "loader.read-chunk-size must be positive"
        );
        ensure!(
            self.window.width > 0 && self.window.height > 0,
            "window dimensions must be positive"
        );
        Ok(self)
    }
}
