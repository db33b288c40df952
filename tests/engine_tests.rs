use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_photo_viewer::config::ViewerOptions;
use rust_photo_viewer::engine::{Engine, FrameSchedule};
use rust_photo_viewer::error::RenderError;
use rust_photo_viewer::events::{
    InputEvent, PointerButton, RasterImage, WheelDelta, WheelDeltaMode,
};
use rust_photo_viewer::gesture::GestureState;
use rust_photo_viewer::gpu::ContextState;
use rust_photo_viewer::gpu::testkit::RecordingBackend;
use rust_photo_viewer::transform::{Point, Size, Transform};

const SURFACE: Size = Size::new(800.0, 600.0);

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn raster(width: u32, height: u32) -> Arc<RasterImage> {
    Arc::new(RasterImage::new(
        width,
        height,
        vec![0; (width * height * 4) as usize],
    ))
}

fn engine_with(options: ViewerOptions) -> (Engine<RecordingBackend>, RecordingBackend) {
    let backend = RecordingBackend::new();
    let mut engine = Engine::new(backend.clone(), SURFACE, options);
    engine.resize(SURFACE, (800, 600));
    engine.set_image(raster(1600, 1200)).unwrap();
    (engine, backend)
}

fn linear_options() -> ViewerOptions {
    ViewerOptions {
        smooth: false,
        ..ViewerOptions::default()
    }
}

/// Renders one frame late enough to finish any running animation.
fn settle(engine: &mut Engine<RecordingBackend>, at: Instant) {
    engine.render_frame(at).unwrap();
    assert!(!engine.is_animating());
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-3
}

#[test]
fn superseded_animation_target_is_never_drawn() {
    let (mut engine, backend) = engine_with(ViewerOptions::default());
    let t0 = Instant::now();
    assert_eq!(engine.render_frame(t0), Ok(true));

    // A: zoom in to 0.6, whose quad would be drawn with sx = 1.2
    engine.zoom_in(true, t0 + ms(20));
    engine.render_frame(t0 + ms(40)).unwrap();
    engine.render_frame(t0 + ms(100)).unwrap();

    // B: back to fit before A completes
    engine.reset_view(t0 + ms(110));
    for step in 0..40 {
        engine.render_frame(t0 + ms(120 + step * 20)).unwrap();
    }

    assert!(!engine.is_animating());
    assert!(engine.transform().approx_eq(&Transform::new(0.5, 0.0, 0.0), 1e-5));
    let scales = backend.drawn_scales();
    assert!(scales.len() > 10);
    assert!(scales.iter().all(|(sx, _)| (sx - 1.2).abs() > 1e-3), "{scales:?}");
    let (last_sx, last_sy) = *scales.last().unwrap();
    assert!(close(last_sx, 1.0) && close(last_sy, 1.0));
}

#[test]
fn non_animated_zoom_is_immediate() {
    let (mut engine, _) = engine_with(ViewerOptions::default());
    let now = Instant::now();
    engine.zoom_in(false, now);
    assert!(!engine.is_animating());
    assert!(close(engine.transform().scale, 0.6));
    engine.zoom_out(false, now);
    assert!(close(engine.transform().scale, 0.5));
}

#[test]
fn double_tap_zooms_in_then_back_to_fit() {
    let (mut engine, _) = engine_with(ViewerOptions::default());
    let t0 = Instant::now();
    let center = Point::new(400.0, 300.0);

    engine.handle_input(&InputEvent::DoubleClick { position: center }, t0);
    assert!(engine.is_animating());
    for step in 1..=20 {
        engine.render_frame(t0 + ms(step * 20)).unwrap();
    }
    assert!(close(engine.transform().scale, 1.0));

    let t1 = t0 + ms(1000);
    engine.handle_input(&InputEvent::DoubleClick { position: center }, t1);
    for step in 1..=20 {
        engine.render_frame(t1 + ms(step * 20)).unwrap();
    }
    assert!(close(engine.transform().scale, 0.5));
}

#[test]
fn two_quick_presses_count_as_double_tap() {
    let (mut engine, _) = engine_with(linear_options());
    let t0 = Instant::now();
    let at = Point::new(400.0, 300.0);
    let button = PointerButton::Primary;

    engine.handle_input(&InputEvent::PointerDown { position: at, button }, t0);
    engine.handle_input(&InputEvent::PointerUp { position: at, button }, t0 + ms(50));
    engine.handle_input(&InputEvent::PointerDown { position: at, button }, t0 + ms(150));
    assert!(engine.is_animating());
    settle(&mut engine, t0 + ms(600));
    assert!(close(engine.transform().scale, 1.0));
}

#[test]
fn without_smoothing_double_tap_still_animates_linearly() {
    let (mut engine, backend) = engine_with(linear_options());
    let t0 = Instant::now();
    engine.handle_input(
        &InputEvent::DoubleClick {
            position: Point::new(400.0, 300.0),
        },
        t0,
    );
    assert!(engine.is_animating());
    assert!(close(engine.transform().scale, 0.5));

    // 300ms from 0.5 to 1.0: a quarter of the way in is 0.625, not eased
    engine.render_frame(t0 + ms(75)).unwrap();
    assert!(close(engine.transform().scale, 0.625), "{:?}", engine.transform());
    engine.render_frame(t0 + ms(225)).unwrap();
    assert!(close(engine.transform().scale, 0.875), "{:?}", engine.transform());
    settle(&mut engine, t0 + ms(400));
    assert!(close(engine.transform().scale, 1.0));

    let scales: Vec<f32> = backend.drawn_scales().iter().map(|(sx, _)| *sx).collect();
    assert!(scales.len() >= 3);
    assert!(scales.windows(2).all(|w| w[0] < w[1]), "{scales:?}");
}

#[test]
fn without_smoothing_reset_view_is_immediate() {
    let (mut engine, _) = engine_with(linear_options());
    let now = Instant::now();
    engine.zoom_in(true, now);
    assert!(engine.is_animating());
    settle(&mut engine, now + ms(400));
    assert!(close(engine.transform().scale, 0.6));

    engine.reset_view(now + ms(500));
    assert!(!engine.is_animating());
    assert_eq!(engine.transform(), Transform::new(0.5, 0.0, 0.0));
}

#[test]
fn wheel_during_drag_keeps_the_cursor_point() {
    let (mut engine, _) = engine_with(ViewerOptions::default());
    let now = Instant::now();
    let cursor = Point::new(600.0, 300.0);
    let button = PointerButton::Primary;
    engine.handle_input(&InputEvent::PointerDown { position: cursor, button }, now);

    engine.handle_input(
        &InputEvent::Wheel {
            position: cursor,
            delta: WheelDelta {
                x: 0.0,
                y: -100.0,
                mode: WheelDeltaMode::Pixel,
            },
        },
        now + ms(10),
    );
    let zoomed = engine.transform();
    assert!(close(zoomed.scale, 0.65));
    assert!(close(zoomed.translate_x, -60.0) && close(zoomed.translate_y, 0.0), "{zoomed:?}");
    assert!(matches!(engine.gesture_state(), GestureState::Dragging { .. }));

    // moving 10px right continues from the zoomed translation
    engine.handle_input(
        &InputEvent::PointerMove {
            position: Point::new(610.0, 300.0),
        },
        now + ms(20),
    );
    let t = engine.transform();
    assert!(close(t.translate_x, -50.0) && close(t.translate_y, 0.0), "{t:?}");
}

#[test]
fn drag_is_clamped_to_scaled_image_bounds() {
    let (mut engine, _) = engine_with(linear_options());
    let now = Instant::now();
    let center = Point::new(400.0, 300.0);
    engine.handle_input(&InputEvent::DoubleClick { position: center }, now);
    settle(&mut engine, now + ms(400));
    assert!(close(engine.transform().scale, 1.0));

    let button = PointerButton::Primary;
    engine.handle_input(&InputEvent::PointerDown { position: center, button }, now + ms(500));
    assert!(matches!(engine.gesture_state(), GestureState::Dragging { .. }));
    engine.handle_input(
        &InputEvent::PointerMove {
            position: Point::new(1400.0, -700.0),
        },
        now + ms(520),
    );
    let t = engine.transform();
    assert!(close(t.translate_x, 400.0) && close(t.translate_y, -300.0), "{t:?}");

    engine.handle_input(
        &InputEvent::PointerUp {
            position: Point::new(1400.0, -700.0),
            button,
        },
        now + ms(540),
    );
    assert_eq!(engine.gesture_state(), GestureState::Idle);
    assert_eq!(engine.transform(), t);
}

#[test]
fn drag_at_fit_stays_centred() {
    let (mut engine, _) = engine_with(ViewerOptions::default());
    let now = Instant::now();
    let button = PointerButton::Primary;
    engine.handle_input(
        &InputEvent::PointerDown {
            position: Point::new(100.0, 100.0),
            button,
        },
        now,
    );
    engine.handle_input(
        &InputEvent::PointerMove {
            position: Point::new(300.0, 250.0),
        },
        now + ms(10),
    );
    assert!(engine.transform().is_centered());
    engine.handle_input(
        &InputEvent::PointerUp {
            position: Point::new(300.0, 250.0),
            button,
        },
        now + ms(20),
    );
    assert!(!engine.is_animating());
    assert_eq!(engine.transform(), Transform::new(0.5, 0.0, 0.0));
}

#[test]
fn extreme_wheel_delta_zooms_like_moderate_one() {
    let wheel = |y: f32| InputEvent::Wheel {
        position: Point::new(400.0, 300.0),
        delta: WheelDelta {
            x: 0.0,
            y,
            mode: WheelDeltaMode::Pixel,
        },
    };
    let now = Instant::now();

    let (mut moderate, _) = engine_with(ViewerOptions::default());
    moderate.handle_input(&wheel(-100.0), now);
    let (mut extreme, _) = engine_with(ViewerOptions::default());
    extreme.handle_input(&wheel(-10000.0), now);

    assert!(close(moderate.transform().scale, 0.65));
    assert_eq!(moderate.transform(), extreme.transform());
    assert!(!moderate.is_animating());

    moderate.handle_input(&wheel(0.0), now);
    assert!(close(moderate.transform().scale, 0.65));
}

#[test]
fn pinch_zooms_around_the_midpoint() {
    let (mut engine, _) = engine_with(ViewerOptions::default());
    let now = Instant::now();
    engine.handle_input(
        &InputEvent::TouchStart {
            id: 1,
            position: Point::new(300.0, 300.0),
        },
        now,
    );
    engine.handle_input(
        &InputEvent::TouchStart {
            id: 2,
            position: Point::new(500.0, 300.0),
        },
        now + ms(10),
    );
    assert!(matches!(engine.gesture_state(), GestureState::Pinching { .. }));

    engine.handle_input(
        &InputEvent::TouchMove {
            id: 2,
            position: Point::new(700.0, 300.0),
        },
        now + ms(20),
    );
    let t = engine.transform();
    assert!(close(t.scale, 1.0));
    assert!(close(t.translate_x, -100.0) && close(t.translate_y, 0.0), "{t:?}");

    engine.handle_input(
        &InputEvent::TouchEnd {
            id: 2,
            position: Point::new(700.0, 300.0),
        },
        now + ms(30),
    );
    assert_eq!(engine.gesture_state(), GestureState::Idle);
}

#[test]
fn context_loss_suspends_and_restore_reuploads() {
    let (mut engine, backend) = engine_with(ViewerOptions::default());
    let t0 = Instant::now();
    backend.with_recording(|rec| rec.lose_context_on_next_draw = true);

    assert_eq!(engine.render_frame(t0), Err(RenderError::ContextLost));
    assert_eq!(engine.gpu().state(), ContextState::Suspended);
    assert_eq!(engine.frame_schedule(t0 + ms(50)), FrameSchedule::Idle);

    engine.on_context_lost();
    engine.on_context_restored().unwrap();
    assert_eq!(engine.gpu().state(), ContextState::Active);
    assert_eq!(engine.frame_schedule(t0 + ms(50)), FrameSchedule::Now);
    assert_eq!(engine.render_frame(t0 + ms(50)), Ok(true));

    let rec = backend.recording();
    assert_eq!(rec.rebuilds, 1);
    assert_eq!(rec.uploads, vec![(1600, 1200), (1600, 1200)]);
}

#[test]
fn context_loss_settles_running_animation() {
    let (mut engine, _) = engine_with(ViewerOptions::default());
    let now = Instant::now();
    engine.zoom_in(true, now);
    assert!(engine.is_animating());
    engine.on_context_lost();
    assert!(!engine.is_animating());
    assert!(close(engine.transform().scale, 0.6));
}

#[test]
fn frames_are_throttled_not_queued() {
    let (mut engine, backend) = engine_with(linear_options());
    let t0 = Instant::now();
    engine.render_frame(t0).unwrap();

    engine.zoom_in(false, t0 + ms(1));
    assert!(matches!(engine.frame_schedule(t0 + ms(1)), FrameSchedule::At(_)));
    assert_eq!(engine.render_frame(t0 + ms(2)), Ok(false));
    engine.zoom_in(false, t0 + ms(3));

    assert_eq!(engine.frame_schedule(t0 + ms(20)), FrameSchedule::Now);
    assert_eq!(engine.render_frame(t0 + ms(20)), Ok(true));
    assert_eq!(engine.frame_schedule(t0 + ms(40)), FrameSchedule::Idle);
    assert_eq!(backend.recording().draws.len(), 2);
}

#[test]
fn failed_upload_keeps_previous_image() {
    let (mut engine, backend) = engine_with(linear_options());
    backend.with_recording(|rec| rec.fail_next_upload = true);
    let err = engine.set_image(raster(10, 10)).unwrap_err();
    assert!(matches!(err, RenderError::Upload(_)));
    assert_eq!(engine.image_size(), Some(Size::new(1600.0, 1200.0)));
}

#[test]
fn listeners_see_changes_until_destroy() {
    let (mut engine, backend) = engine_with(linear_options());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    engine.on_transform_change(move |t| sink.borrow_mut().push(t.scale));

    let now = Instant::now();
    engine.zoom_in(false, now);
    engine.zoom_in(false, now);
    assert_eq!(seen.borrow().len(), 2);

    engine.destroy();
    engine.zoom_in(false, now);
    engine.handle_input(
        &InputEvent::DoubleClick {
            position: Point::new(1.0, 1.0),
        },
        now,
    );
    assert_eq!(seen.borrow().len(), 2);
    assert_eq!(backend.recording().releases, 1);
    assert_eq!(engine.frame_schedule(now), FrameSchedule::Idle);
}

#[test]
fn resize_refits_and_keeps_translation_in_bounds() {
    let (mut engine, _) = engine_with(linear_options());
    let now = Instant::now();
    engine.handle_input(
        &InputEvent::DoubleClick {
            position: Point::new(400.0, 300.0),
        },
        now,
    );
    settle(&mut engine, now + ms(400));
    engine.handle_input(
        &InputEvent::PointerDown {
            position: Point::new(400.0, 300.0),
            button: PointerButton::Primary,
        },
        now + ms(500),
    );
    engine.handle_input(
        &InputEvent::PointerMove {
            position: Point::new(800.0, 600.0),
        },
        now + ms(510),
    );

    engine.resize(Size::new(1600.0, 1200.0), (1600, 1200));
    let t = engine.transform();
    assert!(close(engine.fit_scale(), 1.0));
    assert!(close(t.scale, 2.0));
    // scaled image 3200x2400 on 1600x1200: bounds are (800, 600)
    assert!(t.translate_x <= 800.0 && t.translate_y <= 600.0);
}
