//! What the host shows while an image loads.
//!
//! The automatic variants are hidden as soon as the load settles. A
//! controllable indicator stays up until its owner calls
//! [`LoadingCloser::close`], typically from the `done` callback.

use std::cell::Cell;
use std::rc::Rc;

use tracing::debug;

use crate::config::ImageEntry;
use crate::error::LoadError;

/// Hides a controllable indicator. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct LoadingCloser {
    closed: Rc<Cell<bool>>,
}

impl LoadingCloser {
    pub fn close(&self) {
        self.closed.set(true);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

/// Handed to a controllable indicator once its load settles.
#[derive(Debug, Clone)]
pub struct LoadingContext {
    pub index: usize,
    pub entry: ImageEntry,
    pub outcome: Result<(), LoadError>,
    pub closer: LoadingCloser,
}

pub struct ControlledLoading<N> {
    pub node: N,
    pub done: Box<dyn FnOnce(LoadingContext)>,
}

impl<N> ControlledLoading<N> {
    pub fn new(node: N, done: impl FnOnce(LoadingContext) + 'static) -> Self {
        Self {
            node,
            done: Box::new(done),
        }
    }
}

pub enum LoadingIndicator<N> {
    /// The same node for every load.
    Fixed(N),
    /// A fresh node per load, built from the entry and its index.
    Factory(Box<dyn Fn(&ImageEntry, usize) -> N>),
    /// A node whose dismissal is left to the caller.
    Controllable(Box<dyn Fn(&ImageEntry, usize) -> ControlledLoading<N>>),
}

impl<N> LoadingIndicator<N> {
    pub fn factory(build: impl Fn(&ImageEntry, usize) -> N + 'static) -> Self {
        Self::Factory(Box::new(build))
    }

    pub fn controllable(build: impl Fn(&ImageEntry, usize) -> ControlledLoading<N> + 'static) -> Self {
        Self::Controllable(Box::new(build))
    }
}

struct Pending {
    index: usize,
    entry: ImageEntry,
    done: Box<dyn FnOnce(LoadingContext)>,
}

struct Shown<N> {
    node: N,
    closer: Option<LoadingCloser>,
    pending: Option<Pending>,
}

/// Tracks the indicator for the current load, at most one at a time.
pub struct LoadingPresenter<N> {
    indicator: Option<LoadingIndicator<N>>,
    shown: Option<Shown<N>>,
}

impl<N: Clone> LoadingPresenter<N> {
    pub fn new(indicator: Option<LoadingIndicator<N>>) -> Self {
        Self {
            indicator,
            shown: None,
        }
    }

    pub fn set_indicator(&mut self, indicator: Option<LoadingIndicator<N>>) {
        self.clear();
        self.indicator = indicator;
    }

    /// Shows the indicator for a new load, replacing any previous one. A
    /// controllable indicator still waiting for its outcome is told it was
    /// cancelled first.
    pub fn show(&mut self, entry: &ImageEntry, index: usize) {
        self.settle(Err(LoadError::Cancelled));
        let shown = match self.indicator.as_ref() {
            None => None,
            Some(LoadingIndicator::Fixed(node)) => Some(Shown {
                node: node.clone(),
                closer: None,
                pending: None,
            }),
            Some(LoadingIndicator::Factory(build)) => Some(Shown {
                node: build(entry, index),
                closer: None,
                pending: None,
            }),
            Some(LoadingIndicator::Controllable(build)) => {
                let ControlledLoading { node, done } = build(entry, index);
                Some(Shown {
                    node,
                    closer: Some(LoadingCloser::default()),
                    pending: Some(Pending {
                        index,
                        entry: entry.clone(),
                        done,
                    }),
                })
            }
        };
        self.shown = shown;
    }

    /// Reports the load outcome. Automatic indicators are hidden; a
    /// controllable one gets its `done` callback, once.
    pub fn settle(&mut self, outcome: Result<(), LoadError>) {
        let Some(shown) = self.shown.as_mut() else {
            return;
        };
        let Some(closer) = shown.closer.clone() else {
            self.shown = None;
            return;
        };
        if let Some(pending) = shown.pending.take() {
            debug!(index = pending.index, ok = outcome.is_ok(), "notifying loading indicator");
            (pending.done)(LoadingContext {
                index: pending.index,
                entry: pending.entry,
                outcome,
                closer,
            });
        }
    }

    /// The node currently on screen, if any.
    pub fn visible(&self) -> Option<&N> {
        let shown = self.shown.as_ref()?;
        match &shown.closer {
            Some(closer) if closer.is_closed() => None,
            _ => Some(&shown.node),
        }
    }

    /// Drops the current indicator without reporting an outcome.
    pub fn clear(&mut self) {
        self.shown = None;
    }
}
