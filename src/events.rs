use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::error::LoadError;
use crate::transform::Point;

/// Decoded RGBA8 image, rows top to bottom.
#[derive(Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RasterImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }
}

impl fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
    Other,
}

/// Unit of a wheel delta, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelDeltaMode {
    Pixel,
    Line,
    Page,
}

/// Positive `y` scrolls down (content moves up), which zooms out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelDelta {
    pub x: f32,
    pub y: f32,
    pub mode: WheelDeltaMode,
}

/// Input normalized from the host. Positions are logical surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    PointerDown { position: Point, button: PointerButton },
    PointerMove { position: Point },
    PointerUp { position: Point, button: PointerButton },
    TouchStart { id: u64, position: Point },
    TouchMove { id: u64, position: Point },
    TouchEnd { id: u64, position: Point },
    TouchCancel { id: u64 },
    Wheel { position: Point, delta: WheelDelta },
    /// For hosts with a native double-click event. Hosts that only report
    /// presses get double taps from press timing instead.
    DoubleClick { position: Point },
}

/// Events delivered to the event-loop thread from background tasks.
#[derive(Debug)]
pub enum ViewerEvent {
    LoadProgress {
        session: u64,
        loaded: u64,
        total: u64,
    },
    LoadFinished {
        session: u64,
        result: Result<Arc<RasterImage>, LoadError>,
    },
    ContextLost,
    ContextRestored,
    Cancelled,
}

/// Where background tasks post their `ViewerEvent`s.
pub trait EventSink: Clone + Send + 'static {
    fn send(&self, event: ViewerEvent);
}

impl EventSink for UnboundedSender<ViewerEvent> {
    fn send(&self, event: ViewerEvent) {
        if UnboundedSender::send(self, event).is_err() {
            tracing::debug!("viewer event dropped; receiver closed");
        }
    }
}
