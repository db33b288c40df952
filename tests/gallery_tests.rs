use std::cell::RefCell;
use std::io::Cursor;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use rust_photo_viewer::config::{ImageEntry, LoaderOptions, ViewerOptions};
use rust_photo_viewer::engine::Engine;
use rust_photo_viewer::error::LoadError;
use rust_photo_viewer::events::{RasterImage, ViewerEvent};
use rust_photo_viewer::gallery::{Gallery, LoadStatus};
use rust_photo_viewer::gpu::testkit::RecordingBackend;
use rust_photo_viewer::loading::LoadingIndicator;
use rust_photo_viewer::tasks::loader::ImageLoader;
use rust_photo_viewer::transform::Size;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

type TestGallery = Gallery<RecordingBackend, UnboundedSender<ViewerEvent>, String>;

fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> String {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 100, 50, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, out.into_inner()).unwrap();
    path.to_string_lossy().into_owned()
}

fn gallery(
    images: Vec<String>,
    options: LoaderOptions,
) -> (TestGallery, RecordingBackend, UnboundedReceiver<ViewerEvent>) {
    let backend = RecordingBackend::new();
    let surface = Size::new(800.0, 600.0);
    let mut engine = Engine::new(backend.clone(), surface, ViewerOptions::default());
    engine.resize(surface, (800, 600));
    let (tx, rx) = mpsc::unbounded_channel();
    let loader = Arc::new(ImageLoader::new(options).unwrap());
    let entries = images.into_iter().map(ImageEntry::new).collect();
    let gallery = Gallery::new(engine, entries, loader, Handle::current(), tx);
    (gallery, backend, rx)
}

/// Feeds events into the gallery until `session` finishes.
async fn pump(gallery: &mut TestGallery, rx: &mut UnboundedReceiver<ViewerEvent>, session: u64) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for viewer events")
            .expect("event channel closed");
        let done = matches!(&event, ViewerEvent::LoadFinished { session: s, .. } if *s == session);
        gallery.handle_event(event).unwrap();
        if done {
            return;
        }
    }
}

#[tokio::test]
async fn open_displays_image_and_resolves_handle() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_png(dir.path(), "a.png", 16, 8);
    let (mut gallery, backend, mut rx) = gallery(vec![a], LoaderOptions::default());

    let handle = gallery.open(0).unwrap();
    let session = handle.session();
    assert!(matches!(gallery.status(), LoadStatus::Loading { .. }));
    pump(&mut gallery, &mut rx, session).await;

    assert_eq!(handle.wait().await, Ok(()));
    assert_eq!(*gallery.status(), LoadStatus::Ready);
    assert_eq!(gallery.engine().image_size(), Some(Size::new(16.0, 8.0)));
    assert_eq!(backend.recording().uploads, vec![(16, 8)]);
}

#[tokio::test]
async fn only_the_latest_navigation_reaches_the_screen() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_png(dir.path(), "a.png", 16, 8);
    let b = write_png(dir.path(), "b.png", 4, 4);
    let (mut gallery, backend, mut rx) = gallery(vec![a, b], LoaderOptions::default());

    let first = gallery.open(0).unwrap();
    let stale_session = first.session();
    let second = gallery.next().unwrap();
    assert_eq!(first.wait().await, Err(LoadError::Cancelled));

    pump(&mut gallery, &mut rx, second.session()).await;
    assert_eq!(second.wait().await, Ok(()));

    // a late result for the superseded session changes nothing
    gallery
        .handle_event(ViewerEvent::LoadFinished {
            session: stale_session,
            result: Ok(Arc::new(RasterImage::new(2, 2, vec![0; 16]))),
        })
        .unwrap();
    gallery
        .handle_event(ViewerEvent::LoadProgress {
            session: stale_session,
            loaded: 1,
            total: 2,
        })
        .unwrap();

    assert_eq!(gallery.index(), 1);
    assert_eq!(*gallery.status(), LoadStatus::Ready);
    assert_eq!(backend.recording().uploads, vec![(4, 4)]);
    assert_eq!(gallery.engine().image_size(), Some(Size::new(4.0, 4.0)));
}

#[tokio::test]
async fn failed_load_keeps_previous_image() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_png(dir.path(), "a.png", 16, 8);
    let missing = dir.path().join("gone.png").to_string_lossy().into_owned();
    let (mut gallery, backend, mut rx) = gallery(vec![a, missing], LoaderOptions::default());

    let handle = gallery.open(0).unwrap();
    pump(&mut gallery, &mut rx, handle.session()).await;

    let handle = gallery.next().unwrap();
    pump(&mut gallery, &mut rx, handle.session()).await;
    assert!(matches!(handle.wait().await, Err(LoadError::Network(_))));
    assert!(matches!(gallery.status(), LoadStatus::Failed(LoadError::Network(_))));
    assert_eq!(gallery.engine().image_size(), Some(Size::new(16.0, 8.0)));
    assert_eq!(backend.recording().uploads, vec![(16, 8)]);
}

#[tokio::test]
async fn navigation_is_bounds_checked() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_png(dir.path(), "a.png", 2, 2);
    let (mut gallery, _, _rx) = gallery(vec![a], LoaderOptions::default());

    assert!(gallery.previous().is_none());
    assert!(gallery.open(3).is_none());
    assert!(gallery.open(0).is_some());
    assert!(gallery.next().is_none());
    assert_eq!(gallery.index(), 0);
}

#[tokio::test]
async fn load_image_reports_progress_to_the_caller() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_png(dir.path(), "a.png", 32, 32);
    let len = std::fs::metadata(&a).unwrap().len();
    let options = LoaderOptions {
        read_chunk_size: 16,
        ..LoaderOptions::default()
    };
    let (mut gallery, _, mut rx) = gallery(vec![a.clone()], options);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let handle = gallery.load_image(&a, move |loaded, total| {
        sink.borrow_mut().push((loaded, total))
    });
    pump(&mut gallery, &mut rx, handle.session()).await;

    assert_eq!(handle.wait().await, Ok(()));
    let seen = seen.borrow();
    assert!(seen.len() > 1);
    assert_eq!(seen.last(), Some(&(len, len)));
}

#[tokio::test]
async fn fixed_indicator_is_shown_while_loading() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_png(dir.path(), "a.png", 2, 2);
    let (gallery, _, mut rx) = gallery(vec![a], LoaderOptions::default());
    let mut gallery = gallery.with_loading_indicator(LoadingIndicator::Fixed("Loading".into()));

    let handle = gallery.open(0).unwrap();
    assert_eq!(gallery.loading_node().map(String::as_str), Some("Loading"));
    pump(&mut gallery, &mut rx, handle.session()).await;
    assert_eq!(gallery.loading_node(), None);
}

#[tokio::test]
async fn cancel_load_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_png(dir.path(), "a.png", 2, 2);
    let (mut gallery, backend, mut rx) = gallery(vec![a], LoaderOptions::default());

    let handle = gallery.open(0).unwrap();
    gallery.cancel_load();
    gallery.cancel_load();
    assert_eq!(handle.wait().await, Err(LoadError::Cancelled));
    assert_eq!(*gallery.status(), LoadStatus::Idle);

    // whatever the task still reports is ignored
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        gallery.handle_event(event).unwrap();
    }
    assert!(backend.recording().uploads.is_empty());
    assert_eq!(*gallery.status(), LoadStatus::Idle);
}

#[tokio::test]
async fn destroy_releases_and_stops_navigation() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_png(dir.path(), "a.png", 2, 2);
    let (mut gallery, backend, _rx) = gallery(vec![a], LoaderOptions::default());

    let mut handle = gallery.open(0).unwrap();
    gallery.destroy();
    gallery.destroy();

    assert_eq!(handle.try_result(), Some(Err(LoadError::Cancelled)));
    assert!(gallery.is_destroyed());
    assert!(gallery.engine().is_destroyed());
    assert!(gallery.open(0).is_none());
    assert_eq!(backend.recording().releases, 1);
}
