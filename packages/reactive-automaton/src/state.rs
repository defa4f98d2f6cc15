//! Observable current state.

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Read-only view of an automaton's current state.
///
/// Always holds a value: the initial state until the first successful
/// transition. Cheap to clone; every clone observes the same automaton.
#[derive(Clone)]
pub struct StateProperty<S> {
    receiver: watch::Receiver<S>,
}

impl<S: Clone + Send + Sync + 'static> StateProperty<S> {
    pub(crate) fn new(receiver: watch::Receiver<S>) -> Self {
        Self { receiver }
    }

    /// The current state.
    pub fn value(&self) -> S {
        self.receiver.borrow().clone()
    }

    /// The current state, then every later one.
    ///
    /// Intermediate values may be skipped by a slow consumer; the latest one
    /// is always delivered. Use [`Replies`](crate::Replies) for a lossless
    /// record of transitions.
    pub fn changes(&self) -> BoxStream<'static, S> {
        WatchStream::new(self.receiver.clone()).boxed()
    }

    /// Wait until the state satisfies `predicate`.
    ///
    /// Returns `None` if the automaton is gone before that happens.
    pub async fn wait_for<F>(&self, predicate: F) -> Option<S>
    where
        F: FnMut(&S) -> bool,
    {
        let mut receiver = self.receiver.clone();
        let matched = receiver.wait_for(predicate).await.ok()?;
        Some(matched.clone())
    }

    /// Whether the owning automaton has been dropped.
    pub fn is_closed(&self) -> bool {
        self.receiver.has_changed().is_err()
    }
}
