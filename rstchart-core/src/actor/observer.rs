//! Snapshot observers.

use super::actor_ref::ActorCell;
use super::logic::ActorSnapshot;
use crate::error::ActorError;
use std::fmt;
use std::sync::{Arc, Weak};

type NextFn = Arc<dyn Fn(&ActorSnapshot) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&ActorError) + Send + Sync>;
type CompleteFn = Arc<dyn Fn() + Send + Sync>;

/// Callbacks invoked as an actor's snapshot changes.
///
/// An actor that fails with at least one `error` callback registered reports
/// the failure there instead of to the caller of `send`.
#[derive(Clone, Default)]
pub struct Observer {
    next: Option<NextFn>,
    error: Option<ErrorFn>,
    complete: Option<CompleteFn>,
}

impl Observer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_next<F>(mut self, f: F) -> Self
    where
        F: Fn(&ActorSnapshot) + Send + Sync + 'static,
    {
        self.next = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ActorError) + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(f));
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.complete = Some(Arc::new(f));
        self
    }

    pub(crate) fn handles_errors(&self) -> bool {
        self.error.is_some()
    }

    pub(crate) fn notify_next(&self, snapshot: &ActorSnapshot) {
        if let Some(f) = &self.next {
            f(snapshot);
        }
    }

    pub(crate) fn notify_error(&self, error: &ActorError) {
        if let Some(f) = &self.error {
            f(error);
        }
    }

    pub(crate) fn notify_complete(&self) {
        if let Some(f) = &self.complete {
            f();
        }
    }
}

impl<F> From<F> for Observer
where
    F: Fn(&ActorSnapshot) + Send + Sync + 'static,
{
    fn from(f: F) -> Self {
        Observer::new().on_next(f)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("next", &self.next.is_some())
            .field("error", &self.error.is_some())
            .field("complete", &self.complete.is_some())
            .finish()
    }
}

/// Handle returned by `subscribe`.
#[derive(Debug)]
pub struct Subscription {
    actor: Weak<ActorCell>,
    id: u64,
}

impl Subscription {
    pub(crate) fn new(actor: Weak<ActorCell>, id: u64) -> Self {
        Self { actor, id }
    }

    /// A subscription to an actor that had already stopped.
    pub(crate) fn closed() -> Self {
        Self {
            actor: Weak::new(),
            id: 0,
        }
    }

    pub fn unsubscribe(self) {
        if let Some(cell) = self.actor.upgrade() {
            cell.remove_observer(self.id);
        }
    }
}
