//! Image sequence, navigation and load sessions.
//!
//! Loads run on the tokio runtime and report back through the
//! [`EventSink`] as [`ViewerEvent`]s, which the host feeds into
//! [`Gallery::handle_event`] on the event-loop thread. Every load belongs to
//! a session; events from anything but the current session are dropped.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::ImageEntry;
use crate::engine::Engine;
use crate::error::{LoadError, RenderError};
use crate::events::{EventSink, ViewerEvent};
use crate::gpu::RenderBackend;
use crate::loading::{LoadingIndicator, LoadingPresenter};
use crate::session::SessionTracker;
use crate::tasks::loader::ImageLoader;

type ProgressCallback = Box<dyn FnMut(u64, u64)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Idle,
    Loading { session: u64, loaded: u64, total: u64 },
    Ready,
    Failed(LoadError),
}

/// Resolves once the load is on screen, failed, or was superseded.
#[derive(Debug)]
pub struct LoadHandle {
    session: u64,
    completion: oneshot::Receiver<Result<(), LoadError>>,
}

impl LoadHandle {
    pub fn session(&self) -> u64 {
        self.session
    }

    pub async fn wait(self) -> Result<(), LoadError> {
        self.completion.await.unwrap_or(Err(LoadError::Cancelled))
    }

    /// Non-blocking poll; `None` while the load is still running.
    pub fn try_result(&mut self) -> Option<Result<(), LoadError>> {
        match self.completion.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(LoadError::Cancelled)),
        }
    }

    fn settled(session: u64, result: Result<(), LoadError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self {
            session,
            completion: rx,
        }
    }
}

struct PendingLoad {
    session: u64,
    on_progress: Option<ProgressCallback>,
    completion: oneshot::Sender<Result<(), LoadError>>,
}

pub struct Gallery<B, S, N> {
    engine: Engine<B>,
    images: Vec<ImageEntry>,
    index: usize,
    sessions: SessionTracker,
    loader: Arc<ImageLoader>,
    runtime: Handle,
    sink: S,
    pending: Option<PendingLoad>,
    loading: LoadingPresenter<N>,
    status: LoadStatus,
    destroyed: bool,
}

impl<B, S, N> Gallery<B, S, N>
where
    B: RenderBackend,
    S: EventSink,
    N: Clone,
{
    pub fn new(
        engine: Engine<B>,
        images: Vec<ImageEntry>,
        loader: Arc<ImageLoader>,
        runtime: Handle,
        sink: S,
    ) -> Self {
        Self {
            engine,
            images,
            index: 0,
            sessions: SessionTracker::new(),
            loader,
            runtime,
            sink,
            pending: None,
            loading: LoadingPresenter::new(None),
            status: LoadStatus::Idle,
            destroyed: false,
        }
    }

    pub fn with_loading_indicator(mut self, indicator: LoadingIndicator<N>) -> Self {
        self.loading.set_indicator(Some(indicator));
        self
    }

    pub fn engine(&self) -> &Engine<B> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine<B> {
        &mut self.engine
    }

    pub fn status(&self) -> &LoadStatus {
        &self.status
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn current_entry(&self) -> Option<&ImageEntry> {
        self.images.get(self.index)
    }

    pub fn loading_node(&self) -> Option<&N> {
        self.loading.visible()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Loads `src` into the viewer outside the configured sequence.
    pub fn load_image(
        &mut self,
        src: &str,
        on_progress: impl FnMut(u64, u64) + 'static,
    ) -> LoadHandle {
        let entry = ImageEntry::new(src);
        self.start_load(entry, self.index, Some(Box::new(on_progress)))
    }

    /// Shows the entry at `index`. `None` when out of range.
    pub fn open(&mut self, index: usize) -> Option<LoadHandle> {
        if self.destroyed {
            return None;
        }
        let Some(entry) = self.images.get(index).cloned() else {
            debug!(index, len = self.images.len(), "open out of range");
            return None;
        };
        self.index = index;
        Some(self.start_load(entry, index, None))
    }

    pub fn next(&mut self) -> Option<LoadHandle> {
        let next = self.index.checked_add(1)?;
        self.open(next)
    }

    pub fn previous(&mut self) -> Option<LoadHandle> {
        let previous = self.index.checked_sub(1)?;
        self.open(previous)
    }

    fn start_load(
        &mut self,
        entry: ImageEntry,
        index: usize,
        on_progress: Option<ProgressCallback>,
    ) -> LoadHandle {
        if self.destroyed {
            return LoadHandle::settled(0, Err(LoadError::Cancelled));
        }
        self.abandon_pending();
        let session = self.sessions.begin();
        let (completion, rx) = oneshot::channel();
        self.pending = Some(PendingLoad {
            session: session.id,
            on_progress,
            completion,
        });
        self.status = LoadStatus::Loading {
            session: session.id,
            loaded: 0,
            total: 0,
        };
        self.loading.show(&entry, index);
        info!(session = session.id, index, src = %entry.src, "loading image");

        let loader = Arc::clone(&self.loader);
        let sink = self.sink.clone();
        let id = session.id;
        self.runtime.spawn(async move {
            let progress = sink.clone();
            let result = loader
                .load(
                    &entry.src,
                    move |loaded, total| {
                        progress.send(ViewerEvent::LoadProgress {
                            session: id,
                            loaded,
                            total,
                        })
                    },
                    &session.token,
                )
                .await;
            sink.send(ViewerEvent::LoadFinished {
                session: id,
                result: result.map(Arc::new),
            });
        });

        LoadHandle {
            session: id,
            completion: rx,
        }
    }

    /// Routes one event from the background side. Only a failed context
    /// rebuild is reported as an error.
    pub fn handle_event(&mut self, event: ViewerEvent) -> Result<(), RenderError> {
        if self.destroyed {
            return Ok(());
        }
        match event {
            ViewerEvent::LoadProgress {
                session,
                loaded,
                total,
            } => {
                if !self.sessions.is_current(session) {
                    debug!(session, "dropping progress from stale session");
                    return Ok(());
                }
                self.status = LoadStatus::Loading {
                    session,
                    loaded,
                    total,
                };
                if let Some(callback) = self
                    .pending
                    .as_mut()
                    .filter(|pending| pending.session == session)
                    .and_then(|pending| pending.on_progress.as_mut())
                {
                    callback(loaded, total);
                }
            }
            ViewerEvent::LoadFinished { session, result } => {
                if !self.sessions.is_current(session) {
                    debug!(session, "dropping result from stale session");
                    return Ok(());
                }
                self.sessions.complete(session);
                let outcome = match result {
                    Ok(raster) => self.engine.set_image(raster).map_err(|err| {
                        warn!(session, error = %err, "could not display decoded image");
                        LoadError::Decode(err.to_string())
                    }),
                    Err(err) => {
                        warn!(session, error = %err, "image load failed");
                        Err(err)
                    }
                };
                self.status = match &outcome {
                    Ok(()) => LoadStatus::Ready,
                    Err(err) => LoadStatus::Failed(err.clone()),
                };
                self.loading.settle(outcome.clone());
                if let Some(pending) = self.pending.take() {
                    let _ = pending.completion.send(outcome);
                }
            }
            ViewerEvent::ContextLost => self.engine.on_context_lost(),
            ViewerEvent::ContextRestored => self.engine.on_context_restored()?,
            ViewerEvent::Cancelled => self.cancel_load(),
        }
        Ok(())
    }

    /// Cancels the in-flight load, if any. The displayed image is kept.
    pub fn cancel_load(&mut self) {
        if self.pending.is_none() && self.sessions.current_id().is_none() {
            return;
        }
        self.abandon_pending();
        self.status = if self.engine.image_size().is_some() {
            LoadStatus::Ready
        } else {
            LoadStatus::Idle
        };
    }

    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.cancel_load();
        self.loading.clear();
        self.engine.destroy();
        self.destroyed = true;
    }

    fn abandon_pending(&mut self) {
        self.sessions.cancel();
        if let Some(pending) = self.pending.take() {
            debug!(session = pending.session, "load superseded");
            self.loading.settle(Err(LoadError::Cancelled));
            let _ = pending.completion.send(Err(LoadError::Cancelled));
        }
    }
}
