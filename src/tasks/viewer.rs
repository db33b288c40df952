use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use winit::{
    application::ApplicationHandler,
    dpi::{LogicalSize, PhysicalPosition, PhysicalSize},
    event::{ElementState, MouseButton, MouseScrollDelta, Touch, TouchPhase, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop, EventLoopProxy},
    keyboard::{Key, NamedKey},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

use crate::config::{Configuration, ImageEntry};
use crate::engine::{Engine, FrameSchedule};
use crate::error::RenderError;
use crate::events::{
    EventSink, InputEvent, PointerButton, ViewerEvent, WheelDelta, WheelDeltaMode,
};
use crate::gallery::{Gallery, LoadStatus};
use crate::gpu::WgpuRenderer;
use crate::loading::LoadingIndicator;
use crate::tasks::loader::ImageLoader;
use crate::transform::{Point, Size};

type ViewerProxy = EventLoopProxy<ViewerEvent>;
type WindowGallery = Gallery<WgpuRenderer, ViewerProxy, String>;

impl EventSink for ViewerProxy {
    fn send(&self, event: ViewerEvent) {
        if self.send_event(event).is_err() {
            debug!("event loop closed; dropping viewer event");
        }
    }
}

struct ViewerApp {
    cfg: Configuration,
    cancel: CancellationToken,
    runtime: Handle,
    proxy: ViewerProxy,
    loader: Arc<ImageLoader>,
    window: Option<Arc<Window>>,
    gallery: Option<WindowGallery>,
    cursor: Point,
    title: String,
    fatal: Option<anyhow::Error>,
}

impl ViewerApp {
    fn new(
        cfg: Configuration,
        cancel: CancellationToken,
        runtime: Handle,
        proxy: ViewerProxy,
        loader: Arc<ImageLoader>,
    ) -> Self {
        Self {
            cfg,
            cancel,
            runtime,
            proxy,
            loader,
            window: None,
            gallery: None,
            cursor: Point::ZERO,
            title: String::new(),
            fatal: None,
        }
    }

    fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Option<Arc<Window>> {
        if let Some(window) = self.window.as_ref() {
            return Some(window.clone());
        }

        let opts = &self.cfg.window;
        let mut attrs = WindowAttributes::default()
            .with_title(opts.title.clone())
            .with_inner_size(LogicalSize::new(opts.width, opts.height));
        if opts.fullscreen {
            attrs = attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        match event_loop.create_window(attrs) {
            Ok(window) => {
                let window = Arc::new(window);
                self.window = Some(window.clone());
                Some(window)
            }
            Err(err) => {
                error!(error = %err, "failed to create viewer window");
                None
            }
        }
    }

    fn init_gallery(&mut self, window: Arc<Window>) -> Result<()> {
        let lost = Mutex::new(self.proxy.clone());
        let renderer = WgpuRenderer::new(window.clone(), move || {
            if let Ok(proxy) = lost.lock() {
                let _ = proxy.send_event(ViewerEvent::ContextLost);
            }
        })
        .context("failed to initialize renderer")?;

        let (logical, physical) = surface_sizes(&window);
        let mut engine = Engine::new(renderer, logical, self.cfg.viewer.clone());
        engine.resize(logical, physical);

        let count = self.cfg.images.len();
        let indicator = match self.cfg.loading_label.clone() {
            Some(label) => LoadingIndicator::Fixed(label),
            None => LoadingIndicator::factory(move |entry: &ImageEntry, index| {
                format!("Loading {} ({}/{count})", entry.display_name(), index + 1)
            }),
        };
        let mut gallery = Gallery::new(
            engine,
            self.cfg.images.clone(),
            self.loader.clone(),
            self.runtime.clone(),
            self.proxy.clone(),
        )
        .with_loading_indicator(indicator);

        if gallery.open(self.cfg.start_index).is_none() {
            return Err(anyhow!(
                "start index {} is out of range",
                self.cfg.start_index
            ));
        }
        info!(
            images = count,
            start = self.cfg.start_index,
            width = physical.0,
            height = physical.1,
            "viewer ready"
        );
        self.gallery = Some(gallery);
        Ok(())
    }

    fn handle_resize(&mut self) {
        let (Some(window), Some(gallery)) = (self.window.as_ref(), self.gallery.as_mut()) else {
            return;
        };
        let (logical, physical) = surface_sizes(window);
        gallery.engine_mut().resize(logical, physical);
        debug!(width = physical.0, height = physical.1, "viewer surface resized");
    }

    fn dispatch_input(&mut self, event: InputEvent) {
        if let Some(gallery) = self.gallery.as_mut() {
            gallery.engine_mut().handle_input(&event, Instant::now());
        }
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: &Key) {
        let Some(gallery) = self.gallery.as_mut() else {
            return;
        };
        let now = Instant::now();
        match key {
            Key::Named(NamedKey::Escape) => {
                info!("escape pressed; closing viewer");
                event_loop.exit();
            }
            Key::Named(NamedKey::ArrowLeft) => {
                if gallery.previous().is_none() {
                    debug!("already at the first image");
                }
            }
            Key::Named(NamedKey::ArrowRight) => {
                if gallery.next().is_none() {
                    debug!("already at the last image");
                }
            }
            Key::Character(text) => match text.as_str() {
                "+" | "=" => gallery.engine_mut().zoom_in(true, now),
                "-" => gallery.engine_mut().zoom_out(true, now),
                "0" => gallery.engine_mut().reset_view(now),
                _ => {}
            },
            _ => {}
        }
    }

    fn draw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(gallery) = self.gallery.as_mut() else {
            return;
        };
        match gallery.engine_mut().render_frame(Instant::now()) {
            Ok(_) => {}
            Err(RenderError::ContextLost) => {
                warn!("rendering context lost during draw; scheduling rebuild");
                self.route(event_loop, ViewerEvent::ContextLost);
            }
            Err(err) => {
                error!(error = %err, "fatal rendering error; exiting event loop");
                self.fatal = Some(anyhow::Error::new(err).context("rendering failed"));
                event_loop.exit();
            }
        }
    }

    fn route(&mut self, event_loop: &ActiveEventLoop, event: ViewerEvent) {
        let Some(gallery) = self.gallery.as_mut() else {
            return;
        };
        let lost = matches!(event, ViewerEvent::ContextLost);
        if let Err(err) = gallery.handle_event(event) {
            error!(error = %err, "could not recover rendering context");
            self.fatal = Some(anyhow::Error::new(err).context("context restore failed"));
            event_loop.exit();
            return;
        }
        if lost {
            self.proxy.send(ViewerEvent::ContextRestored);
        }
    }

    fn refresh_title(&mut self) {
        let (Some(window), Some(gallery)) = (self.window.as_ref(), self.gallery.as_ref()) else {
            return;
        };
        let base = &self.cfg.window.title;
        let name = gallery
            .current_entry()
            .map(ImageEntry::display_name)
            .unwrap_or_default();
        let title = match (gallery.loading_node(), gallery.status()) {
            (Some(label), _) => format!("{base} - {label}"),
            (None, LoadStatus::Failed(err)) => format!("{base} - {name}: {err}"),
            (None, _) => format!(
                "{base} - {name} ({}/{})",
                gallery.index() + 1,
                gallery.len()
            ),
        };
        if title != self.title {
            window.set_title(&title);
            self.title = title;
        }
    }
}

impl ApplicationHandler<ViewerEvent> for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.cancel.is_cancelled() {
            event_loop.exit();
            return;
        }

        let Some(window) = self.ensure_window(event_loop) else {
            event_loop.exit();
            return;
        };

        if self.gallery.is_none() {
            if let Err(err) = self.init_gallery(window.clone()) {
                error!(error = ?err, "failed to initialize viewer");
                self.fatal = Some(err);
                event_loop.exit();
                return;
            }
        }

        self.refresh_title();
        window.request_redraw();
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(window) = self.window.clone() else {
            return;
        };
        if window.id() != window_id {
            return;
        }
        let scale = window.scale_factor();

        match event {
            WindowEvent::CloseRequested => {
                info!("viewer window close requested");
                event_loop.exit();
            }
            WindowEvent::Resized(_) => self.handle_resize(),
            WindowEvent::ScaleFactorChanged {
                mut inner_size_writer,
                ..
            } => {
                let _ = inner_size_writer.request_inner_size(window.inner_size());
                self.handle_resize();
            }
            WindowEvent::RedrawRequested => self.draw(event_loop),
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = logical_point(position, scale);
                let position = self.cursor;
                self.dispatch_input(InputEvent::PointerMove { position });
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let position = self.cursor;
                let button = pointer_button(button);
                self.dispatch_input(match state {
                    ElementState::Pressed => InputEvent::PointerDown { position, button },
                    ElementState::Released => InputEvent::PointerUp { position, button },
                });
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let position = self.cursor;
                self.dispatch_input(InputEvent::Wheel {
                    position,
                    delta: wheel_delta(delta, scale),
                });
            }
            WindowEvent::Touch(touch) => self.dispatch_input(touch_event(touch, scale)),
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                self.handle_key(event_loop, &event.logical_key);
            }
            _ => {}
        }
        self.refresh_title();
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: ViewerEvent) {
        match event {
            ViewerEvent::Cancelled => {
                info!("viewer received cancellation event");
                event_loop.exit();
            }
            other => self.route(event_loop, other),
        }
        self.refresh_title();
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(window), Some(gallery)) = (self.window.as_ref(), self.gallery.as_ref()) else {
            return;
        };
        match gallery.engine().frame_schedule(Instant::now()) {
            FrameSchedule::Idle => event_loop.set_control_flow(ControlFlow::Wait),
            FrameSchedule::Now => {
                window.request_redraw();
                event_loop.set_control_flow(ControlFlow::Wait);
            }
            FrameSchedule::At(deadline) => {
                event_loop.set_control_flow(ControlFlow::WaitUntil(deadline));
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(gallery) = self.gallery.as_mut() {
            gallery.destroy();
        }
    }
}

fn surface_sizes(window: &Window) -> (Size, (u32, u32)) {
    let physical: PhysicalSize<u32> = window.inner_size();
    let logical: LogicalSize<f32> = physical.to_logical(window.scale_factor());
    (
        Size::new(logical.width, logical.height),
        (physical.width.max(1), physical.height.max(1)),
    )
}

fn logical_point(position: PhysicalPosition<f64>, scale: f64) -> Point {
    let logical = position.to_logical::<f32>(scale);
    Point::new(logical.x, logical.y)
}

fn pointer_button(button: MouseButton) -> PointerButton {
    match button {
        MouseButton::Left => PointerButton::Primary,
        MouseButton::Right => PointerButton::Secondary,
        MouseButton::Middle => PointerButton::Middle,
        _ => PointerButton::Other,
    }
}

// winit reports positive y for scrolling up; wheel deltas here are positive
// for scrolling down.
fn wheel_delta(delta: MouseScrollDelta, scale: f64) -> WheelDelta {
    match delta {
        MouseScrollDelta::LineDelta(x, y) => WheelDelta {
            x,
            y: -y,
            mode: WheelDeltaMode::Line,
        },
        MouseScrollDelta::PixelDelta(offset) => {
            let logical = offset.to_logical::<f32>(scale);
            WheelDelta {
                x: logical.x,
                y: -logical.y,
                mode: WheelDeltaMode::Pixel,
            }
        }
    }
}

fn touch_event(touch: Touch, scale: f64) -> InputEvent {
    let Touch {
        id,
        phase,
        location,
        ..
    } = touch;
    let position = logical_point(location, scale);
    match phase {
        TouchPhase::Started => InputEvent::TouchStart { id, position },
        TouchPhase::Moved => InputEvent::TouchMove { id, position },
        TouchPhase::Ended => InputEvent::TouchEnd { id, position },
        TouchPhase::Cancelled => InputEvent::TouchCancel { id },
    }
}

/// Runs the windowed viewer on the calling thread until the window closes or
/// `cancel` fires. Must be called from within a tokio runtime.
pub fn run_windowed(cfg: Configuration, cancel: CancellationToken) -> Result<()> {
    let runtime = Handle::try_current().context("viewer must run inside a tokio runtime")?;
    let loader = Arc::new(ImageLoader::new(cfg.loader.clone())?);

    let event_loop = EventLoop::<ViewerEvent>::with_user_event()
        .build()
        .context("failed to build viewer event loop")?;
    let proxy = event_loop.create_proxy();

    let cancel_task = {
        let cancel = cancel.clone();
        let proxy = proxy.clone();
        runtime.spawn(async move {
            cancel.cancelled().await;
            let _ = proxy.send_event(ViewerEvent::Cancelled);
        })
    };

    let mut app = ViewerApp::new(cfg, cancel, runtime, proxy, loader);
    let run_result = event_loop.run_app(&mut app);
    cancel_task.abort();

    run_result.context("viewer event loop failed")?;
    match app.fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
