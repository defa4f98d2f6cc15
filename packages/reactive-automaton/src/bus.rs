//! Reply bus: fan-out of [`Reply`] values to every subscriber.
//!
//! # Guarantees
//!
//! - **Lossless**: every subscriber sees every reply published after it
//!   subscribed, in publication order (unbounded per-subscriber channels)
//! - **No replay**: replies published before a subscription are not delivered
//! - **Terminal**: after [`ReplyBus::terminate`] no reply is ever published
//!   again, and every subscriber (including later ones) observes the
//!   [`Termination`] kind once its stream ends

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::reply::Reply;

/// How an automaton's reply stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The input stream finished, or the automaton was dropped or shut down.
    Completed,
    /// The input stream was interrupted.
    Interrupted,
}

enum Signal<I, S> {
    Reply(Reply<I, S>),
    Terminated(Termination),
}

struct BusState<I, S> {
    subscribers: Vec<mpsc::UnboundedSender<Signal<I, S>>>,
    terminated: Option<Termination>,
}

/// Broadcast channel for replies.
pub(crate) struct ReplyBus<I, S> {
    inner: Arc<Mutex<BusState<I, S>>>,
}

impl<I, S> Clone for ReplyBus<I, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<I: Clone, S: Clone> ReplyBus<I, S> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusState {
                subscribers: Vec::new(),
                terminated: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState<I, S>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("reply bus mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn subscribe(&self) -> Replies<I, S> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        match state.terminated {
            Some(termination) => {
                let _ = tx.send(Signal::Terminated(termination));
            }
            None => state.subscribers.push(tx),
        }
        Replies {
            receiver: rx,
            termination: None,
        }
    }

    /// Deliver `reply` to every live subscriber. Dropped subscribers are pruned.
    pub fn publish(&self, reply: Reply<I, S>) {
        let mut state = self.lock();
        if state.terminated.is_some() {
            return;
        }
        state
            .subscribers
            .retain(|subscriber| subscriber.send(Signal::Reply(reply.clone())).is_ok());
    }

    /// Close every subscriber with `termination`. Only the first call counts.
    pub fn terminate(&self, termination: Termination) -> bool {
        let mut state = self.lock();
        if state.terminated.is_some() {
            return false;
        }
        state.terminated = Some(termination);
        for subscriber in state.subscribers.drain(..) {
            let _ = subscriber.send(Signal::Terminated(termination));
        }
        true
    }

    pub fn termination(&self) -> Option<Termination> {
        self.lock().terminated
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

/// Stream of replies from one automaton.
///
/// Ends when the automaton terminates; [`Replies::termination`] then reports
/// how. A stream whose automaton vanished without a signal counts as
/// [`Termination::Completed`].
pub struct Replies<I, S> {
    receiver: mpsc::UnboundedReceiver<Signal<I, S>>,
    termination: Option<Termination>,
}

impl<I, S> Replies<I, S> {
    /// `None` while the stream is still open.
    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }
}

impl<I, S> Stream for Replies<I, S> {
    type Item = Reply<I, S>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.termination.is_some() {
            return Poll::Ready(None);
        }

        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(Signal::Reply(reply))) => Poll::Ready(Some(reply)),
            Poll::Ready(Some(Signal::Terminated(termination))) => {
                this.termination = Some(termination);
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                this.termination = Some(Termination::Completed);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
