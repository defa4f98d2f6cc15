//! Effect scheduler: per-queue lanes feeding inputs back into the automaton.
//!
//! Each [`QueueId`] gets its own lane, created the first time an effect is
//! routed to it:
//!
//! - `Merge` lanes spawn every producer immediately
//! - `Concat` lanes hand producers to a single worker that drains them in order
//! - `Latest` lanes cancel the previous producer before spawning the new one
//!
//! Every producer output is tagged with the producer's token before it is sent
//! on the feedback channel. The core drops tagged inputs whose token was
//! cancelled while they sat in the channel, so nothing from a cancelled or
//! superseded effect is evaluated after the cancellation.
//!
//! A producer that panics is logged and treated as finished: its guard is
//! released and, on a `Concat` lane, the next job starts.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::cancel::{CancellationRegistry, EffectGuard};
use crate::effect::{Effect, EffectTask, InputStream};
use crate::error::extract_panic_message;
use crate::queue::{EffectQueue, FlattenStrategy, QueueId};

/// An input produced by an effect, tagged with the token of its producer.
pub(crate) struct FeedbackInput<I> {
    pub input: I,
    pub token: CancellationToken,
}

impl<I> FeedbackInput<I> {
    /// Whether the producer was cancelled after this input was emitted.
    pub fn is_stale(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct Job<I, Id: Send + Sync + 'static> {
    producer: InputStream<I>,
    guard: EffectGuard<Id>,
}

enum Lane<I, Id: Send + Sync + 'static> {
    Merge,
    Concat(mpsc::UnboundedSender<Job<I, Id>>),
    Latest(Option<CancellationToken>),
}

/// Routes effects onto queues and tracks them for cancellation.
pub(crate) struct EffectScheduler<I, Q, Id: Send + Sync + 'static> {
    name: Arc<str>,
    registry: Arc<CancellationRegistry<Id>>,
    lanes: HashMap<QueueId<Q>, Lane<I, Id>>,
    feedback: mpsc::UnboundedSender<FeedbackInput<I>>,
}

impl<I, Q, Id> EffectScheduler<I, Q, Id>
where
    I: Send + 'static,
    Q: EffectQueue,
    Id: fmt::Debug + Send + Sync + 'static,
{
    pub fn new(name: Arc<str>, feedback: mpsc::UnboundedSender<FeedbackInput<I>>) -> Self {
        Self {
            name,
            registry: Arc::new(CancellationRegistry::new()),
            lanes: HashMap::new(),
            feedback,
        }
    }

    /// Counter of effects currently queued or running.
    pub fn in_flight(&self) -> Arc<AtomicUsize> {
        self.registry.in_flight()
    }

    pub fn schedule(&mut self, effect: Effect<I, Q, Id>) {
        match effect {
            Effect::None => {}
            Effect::Cancel(predicate) => {
                let cancelled = self.registry.cancel_matching(&predicate);
                debug!(automaton = %self.name, cancelled, "cancel effect applied");
            }
            Effect::Produce(task) => self.route(task),
        }
    }

    /// Run a producer that lives as long as the automaton and is never
    /// targeted by id. Used for the feedback pipeline.
    pub fn spawn_detached(&self, producer: InputStream<I>) {
        if self.registry.is_shut_down() {
            return;
        }
        let token = self.registry.detached_token();
        let feedback = self.feedback.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            run_producer(&name, producer, token, feedback).await;
        });
    }

    /// Cancel every effect, with or without an id, and forget all lanes.
    pub fn shutdown(&mut self) {
        self.registry.shutdown();
        self.lanes.clear();
        debug!(automaton = %self.name, "effect scheduler shut down");
    }

    fn route(&mut self, task: EffectTask<I, Q, Id>) {
        if self.registry.is_shut_down() {
            return;
        }

        let EffectTask {
            producer,
            queue,
            id,
        } = task;
        let strategy = queue.flatten_strategy();
        debug!(
            automaton = %self.name,
            queue = %queue,
            strategy = %strategy,
            id = ?id,
            "scheduling effect"
        );

        let guard = self.registry.register(id);
        let feedback = self.feedback.clone();
        let name = self.name.clone();
        let lane = self.lanes.entry(queue).or_insert_with(|| {
            Lane::open(
                name.clone(),
                strategy,
                self.registry.detached_token(),
                feedback.clone(),
            )
        });

        match lane {
            Lane::Merge => spawn_guarded(name, producer, guard, feedback),
            Lane::Concat(jobs) => {
                if jobs.send(Job { producer, guard }).is_err() {
                    warn!(automaton = %name, queue = %queue, "concat worker is gone, effect dropped");
                }
            }
            Lane::Latest(current) => {
                if let Some(previous) = current.replace(guard.token().clone()) {
                    previous.cancel();
                }
                spawn_guarded(name, producer, guard, feedback);
            }
        }
    }
}

fn spawn_guarded<I, Id>(
    name: Arc<str>,
    producer: InputStream<I>,
    guard: EffectGuard<Id>,
    feedback: mpsc::UnboundedSender<FeedbackInput<I>>,
) where
    I: Send + 'static,
    Id: Send + Sync + 'static,
{
    tokio::spawn(async move {
        let token = guard.token().clone();
        run_producer(&name, producer, token, feedback).await;
        drop(guard);
    });
}

impl<I, Id> Lane<I, Id>
where
    I: Send + 'static,
    Id: Send + Sync + 'static,
{
    fn open(
        name: Arc<str>,
        strategy: FlattenStrategy,
        shutdown: CancellationToken,
        feedback: mpsc::UnboundedSender<FeedbackInput<I>>,
    ) -> Self {
        match strategy {
            FlattenStrategy::Merge => Lane::Merge,
            FlattenStrategy::Latest => Lane::Latest(None),
            FlattenStrategy::Concat => {
                let (jobs, mut pending) = mpsc::unbounded_channel::<Job<I, Id>>();
                tokio::spawn(async move {
                    loop {
                        let job = tokio::select! {
                            _ = shutdown.cancelled() => break,
                            job = pending.recv() => match job {
                                Some(job) => job,
                                None => break,
                            },
                        };

                        // Cancelled while waiting its turn.
                        if job.guard.token().is_cancelled() {
                            continue;
                        }

                        let token = job.guard.token().clone();
                        run_producer(&name, job.producer, token, feedback.clone()).await;
                        drop(job.guard);
                    }
                });
                Lane::Concat(jobs)
            }
        }
    }
}

/// [`pump`] with panics caught, so a failing producer never takes down the
/// task that runs it.
async fn run_producer<I>(
    name: &str,
    producer: InputStream<I>,
    token: CancellationToken,
    feedback: mpsc::UnboundedSender<FeedbackInput<I>>,
) {
    let result = AssertUnwindSafe(pump(producer, token, feedback))
        .catch_unwind()
        .await;

    if let Err(panic_info) = result {
        error!(
            automaton = %name,
            panic = %extract_panic_message(&panic_info),
            "effect panicked"
        );
    }
}

/// Drive `producer` to completion or until `token` is cancelled.
async fn pump<I>(
    mut producer: InputStream<I>,
    token: CancellationToken,
    feedback: mpsc::UnboundedSender<FeedbackInput<I>>,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = producer.next() => match next {
                Some(input) => {
                    let tagged = FeedbackInput {
                        input,
                        token: token.clone(),
                    };
                    if feedback.send(tagged).is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}
