//! Effects: descriptions of deferred asynchronous work.
//!
//! A mapping never runs anything itself. It returns an [`Effect`] value and the
//! scheduler decides when (and whether) the work runs:
//!
//! - [`Effect::Produce`]: a cold stream of follow-up inputs, routed to a queue
//!   and optionally tagged with an id for targeted cancellation
//! - [`Effect::Cancel`]: stop every running effect whose id matches a predicate
//! - [`Effect::None`]: nothing to do
//!
//! Producers are lazy. Building one inside a mapping costs nothing until the
//! scheduler starts polling it, and dropping it is the stop signal.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::queue::QueueId;

/// A boxed, sendable stream of inputs.
pub type InputStream<I> = BoxStream<'static, I>;

/// A producer ready to run on a queue.
pub struct EffectTask<I, Q, Id> {
    pub(crate) producer: InputStream<I>,
    pub(crate) queue: QueueId<Q>,
    pub(crate) id: Option<Id>,
}

impl<I, Q, Id> EffectTask<I, Q, Id> {
    pub fn queue(&self) -> &QueueId<Q> {
        &self.queue
    }

    pub fn id(&self) -> Option<&Id> {
        self.id.as_ref()
    }
}

/// Predicate selecting which running effects a cancel applies to.
pub struct CancelPredicate<Id> {
    predicate: Arc<dyn Fn(&Id) -> bool + Send + Sync>,
}

impl<Id> CancelPredicate<Id> {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Id) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    pub fn matches(&self, id: &Id) -> bool {
        (self.predicate)(id)
    }
}

impl<Id> Clone for CancelPredicate<Id> {
    fn clone(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
        }
    }
}

/// Deferred work emitted by a transition.
///
/// `Q` is the queue enumeration and `Id` the effect identifier type. Both
/// default to [`Infallible`] for machines that only use the default queue and
/// never cancel.
pub enum Effect<I, Q = Infallible, Id = Infallible> {
    Produce(EffectTask<I, Q, Id>),
    Cancel(CancelPredicate<Id>),
    None,
}

impl<I: Send + 'static, Q, Id> Effect<I, Q, Id> {
    /// Run `producer` on the default queue, without an id.
    pub fn new<St>(producer: St) -> Self
    where
        St: Stream<Item = I> + Send + 'static,
    {
        Effect::Produce(EffectTask {
            producer: producer.boxed(),
            queue: QueueId::Default,
            id: None,
        })
    }

    /// Run a single future whose output becomes the next input.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = I> + Send + 'static,
    {
        Self::new(stream::once(future))
    }

    /// A producer that yields nothing.
    ///
    /// Unlike [`Effect::none`] it is still routed, so on a `Latest` queue it
    /// supersedes whatever was running there.
    pub fn empty() -> Self {
        Self::new(stream::empty())
    }

    pub fn none() -> Self {
        Effect::None
    }

    /// Cancel every running effect whose id satisfies `predicate`.
    pub fn cancel_where<F>(predicate: F) -> Self
    where
        F: Fn(&Id) -> bool + Send + Sync + 'static,
    {
        Effect::Cancel(CancelPredicate::new(predicate))
    }

    /// Route the producer to a custom queue. No-op for cancels.
    pub fn on_queue(self, queue: Q) -> Self {
        match self {
            Effect::Produce(task) => Effect::Produce(EffectTask {
                queue: QueueId::Custom(queue),
                ..task
            }),
            other => other,
        }
    }

    /// Tag the producer so it can be targeted by a cancel. No-op for cancels.
    ///
    /// Cancels only compare ids, but the automaton also requires
    /// `Id: Debug` so scheduling and cancellation logs can name the effect.
    pub fn with_id(self, id: Id) -> Self {
        match self {
            Effect::Produce(task) => Effect::Produce(EffectTask {
                id: Some(id),
                ..task
            }),
            other => other,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Effect::None)
    }

    /// Transform the inputs a producer yields. Queue and id are preserved.
    pub fn map_input<I2, F>(self, transform: F) -> Effect<I2, Q, Id>
    where
        I2: Send + 'static,
        F: FnMut(I) -> I2 + Send + 'static,
    {
        match self {
            Effect::Produce(task) => Effect::Produce(EffectTask {
                producer: task.producer.map(transform).boxed(),
                queue: task.queue,
                id: task.id,
            }),
            Effect::Cancel(predicate) => Effect::Cancel(predicate),
            Effect::None => Effect::None,
        }
    }
}

impl<I: Send + 'static, Q, Id> Effect<I, Q, Id>
where
    Id: PartialEq + Send + Sync + 'static,
{
    /// Cancel the running effect tagged with `id`.
    pub fn cancel(id: Id) -> Self {
        Self::cancel_where(move |candidate| *candidate == id)
    }
}

impl<I, Q, Id> Default for Effect<I, Q, Id> {
    fn default() -> Self {
        Effect::None
    }
}

impl<I, Q: fmt::Debug, Id: fmt::Debug> fmt::Debug for Effect<I, Q, Id> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Produce(task) => f
                .debug_struct("Produce")
                .field("queue", &task.queue)
                .field("id", &task.id)
                .finish_non_exhaustive(),
            Effect::Cancel(_) => f.write_str("Cancel(..)"),
            Effect::None => f.write_str("None"),
        }
    }
}
