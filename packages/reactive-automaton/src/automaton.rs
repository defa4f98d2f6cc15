//! The automaton: a serialized loop over external and effect-produced inputs.
//!
//! # Loop
//!
//! A single spawned task owns the current state. It waits on three sources:
//!
//! - the external [`InputSource`]
//! - the feedback channel, fed by effect tasks and [`Feedback`] transforms
//! - the shutdown token, cancelled by [`AutomatonHandle::shutdown`] or drop
//!
//! Inputs from the first two are evaluated one at a time, in arrival order,
//! against the latest state. A success replaces the state, then publishes its
//! [`Reply`], then hands the effect to the scheduler. No `.await` separates
//! these steps, so observers never see one without the other.
//!
//! # Termination
//!
//! When the input source completes or is interrupted, or on shutdown:
//!
//! 1. every in-flight effect is cancelled (with or without an id)
//! 2. the reply stream ends with the matching [`Termination`]
//! 3. the feedback channel is closed; inputs still queued there are discarded
//!
//! # Example
//!
//! ```ignore
//! let (sender, inputs) = InputSource::pipe();
//! let automaton = Automaton::builder(State::LoggedOut, mapping)
//!     .with_name("session")
//!     .build(inputs);
//!
//! let mut replies = automaton.replies();
//! let handle = automaton.start();
//!
//! sender.send(Input::Login)?;
//! let reply = replies.next().await;
//! ```

use std::convert::Infallible;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::bus::{Replies, ReplyBus, Termination};
use crate::config::AutomatonConfig;
use crate::effect::Effect;
use crate::error::{extract_panic_message, AutomatonError, Result};
use crate::feedback::{Feedback, SuccessSink};
use crate::input::{InputSignal, InputSource};
use crate::mapping::EffectMapping;
use crate::queue::EffectQueue;
use crate::reply::{Reply, Success};
use crate::scheduler::{EffectScheduler, FeedbackInput};
use crate::state::StateProperty;

// =============================================================================
// Builder
// =============================================================================

/// Configures an [`Automaton`] before it is built.
pub struct AutomatonBuilder<I, S, Q = Infallible, Id = Infallible> {
    initial_state: S,
    mapping: EffectMapping<I, S, Q, Id>,
    initial_effect: Effect<I, Q, Id>,
    feedbacks: Vec<Feedback<I, S>>,
    config: AutomatonConfig,
}

impl<I, S, Q, Id> AutomatonBuilder<I, S, Q, Id>
where
    I: Clone + fmt::Debug + Send + Sync + 'static,
    S: Clone + fmt::Debug + Send + Sync + 'static,
    Q: EffectQueue,
    Id: fmt::Debug + Send + Sync + 'static,
{
    pub fn new(initial_state: S, mapping: impl Into<EffectMapping<I, S, Q, Id>>) -> Self {
        Self {
            initial_state,
            mapping: mapping.into(),
            initial_effect: Effect::None,
            feedbacks: Vec::new(),
            config: AutomatonConfig::default(),
        }
    }

    /// Effect scheduled before the first input is read.
    pub fn with_initial_effect(mut self, effect: Effect<I, Q, Id>) -> Self {
        self.initial_effect = effect;
        self
    }

    /// Add a feedback transform. Repeated calls combine with
    /// [`Feedback::reduce`].
    pub fn with_feedback(mut self, feedback: Feedback<I, S>) -> Self {
        self.feedbacks.push(feedback);
        self
    }

    pub fn with_config(mut self, config: AutomatonConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Build the automaton over `inputs`. Nothing runs until
    /// [`Automaton::start`].
    pub fn build(self, inputs: impl Into<InputSource<I>>) -> Automaton<I, S, Q, Id> {
        let name: Arc<str> = Arc::from(self.config.name.as_str());
        let (state_tx, state_rx) = watch::channel(self.initial_state);
        let bus = ReplyBus::new();
        let feedback = Feedback::reduce(self.feedbacks);

        let core = Core {
            name: name.clone(),
            config: self.config,
            mapping: self.mapping,
            state: state_tx,
            bus: bus.clone(),
        };

        Automaton {
            pending: Some(Pending {
                core,
                inputs: inputs.into(),
                initial_effect: self.initial_effect,
                feedback: (!feedback.is_empty()).then_some(feedback),
            }),
            name,
            state: StateProperty::new(state_rx),
            bus,
        }
    }
}

// =============================================================================
// Automaton
// =============================================================================

/// A built, not yet running automaton.
///
/// Subscribe to [`replies`](Self::replies) here to observe the very first
/// reply, including any caused by the initial effect. Dropping an automaton
/// that was never started completes its reply stream.
pub struct Automaton<I, S, Q = Infallible, Id = Infallible>
where
    I: Clone + fmt::Debug + Send + Sync + 'static,
    S: Clone + fmt::Debug + Send + Sync + 'static,
    Q: EffectQueue,
    Id: fmt::Debug + Send + Sync + 'static,
{
    pending: Option<Pending<I, S, Q, Id>>,
    name: Arc<str>,
    state: StateProperty<S>,
    bus: ReplyBus<I, S>,
}

struct Pending<I, S, Q, Id> {
    core: Core<I, S, Q, Id>,
    inputs: InputSource<I>,
    initial_effect: Effect<I, Q, Id>,
    feedback: Option<Feedback<I, S>>,
}

impl<I, S, Q, Id> Automaton<I, S, Q, Id>
where
    I: Clone + fmt::Debug + Send + Sync + 'static,
    S: Clone + fmt::Debug + Send + Sync + 'static,
    Q: EffectQueue,
    Id: fmt::Debug + Send + Sync + 'static,
{
    pub fn builder(
        initial_state: S,
        mapping: impl Into<EffectMapping<I, S, Q, Id>>,
    ) -> AutomatonBuilder<I, S, Q, Id> {
        AutomatonBuilder::new(initial_state, mapping)
    }

    /// Build and start in one go.
    pub fn create(
        initial_state: S,
        initial_effect: Option<Effect<I, Q, Id>>,
        inputs: impl Into<InputSource<I>>,
        mapping: impl Into<EffectMapping<I, S, Q, Id>>,
    ) -> AutomatonHandle<I, S> {
        AutomatonBuilder::new(initial_state, mapping)
            .with_initial_effect(initial_effect.unwrap_or_default())
            .build(inputs)
            .start()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> StateProperty<S> {
        self.state.clone()
    }

    pub fn replies(&self) -> Replies<I, S> {
        self.bus.subscribe()
    }

    /// Spawn the event loop on the current tokio runtime.
    pub fn start(mut self) -> AutomatonHandle<I, S> {
        let shutdown = CancellationToken::new();
        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
        let scheduler = EffectScheduler::new(self.name.clone(), feedback_tx);
        let running = scheduler.in_flight();

        let task = self.pending.take().map(|pending| {
            info!(automaton = %self.name, "starting automaton");
            tokio::spawn(pending.run(scheduler, feedback_rx, shutdown.clone()))
        });

        AutomatonHandle {
            name: self.name.clone(),
            state: self.state.clone(),
            bus: self.bus.clone(),
            running,
            shutdown,
            task,
        }
    }
}

impl<I, S, Q, Id> Drop for Automaton<I, S, Q, Id>
where
    I: Clone + fmt::Debug + Send + Sync + 'static,
    S: Clone + fmt::Debug + Send + Sync + 'static,
    Q: EffectQueue,
    Id: fmt::Debug + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.pending.is_some() {
            debug!(automaton = %self.name, "automaton dropped before start");
            self.bus.terminate(Termination::Completed);
        }
    }
}

impl<I, S, Q, Id> fmt::Debug for Automaton<I, S, Q, Id>
where
    I: Clone + fmt::Debug + Send + Sync + 'static,
    S: Clone + fmt::Debug + Send + Sync + 'static,
    Q: EffectQueue,
    Id: fmt::Debug + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Automaton")
            .field("name", &self.name)
            .field("state", &self.state.value())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Event Loop
// =============================================================================

struct Core<I, S, Q, Id> {
    name: Arc<str>,
    config: AutomatonConfig,
    mapping: EffectMapping<I, S, Q, Id>,
    state: watch::Sender<S>,
    bus: ReplyBus<I, S>,
}

impl<I, S, Q, Id> Pending<I, S, Q, Id>
where
    I: Clone + fmt::Debug + Send + Sync + 'static,
    S: Clone + fmt::Debug + Send + Sync + 'static,
    Q: EffectQueue,
    Id: fmt::Debug + Send + Sync + 'static,
{
    async fn run(
        self,
        mut scheduler: EffectScheduler<I, Q, Id>,
        mut feedback_rx: mpsc::UnboundedReceiver<FeedbackInput<I>>,
        shutdown: CancellationToken,
    ) -> Termination {
        let Pending {
            core,
            inputs,
            initial_effect,
            feedback,
        } = self;
        let mut signals = inputs.signals;

        let successes = feedback.map(|feedback| {
            let (sink, outputs) = feedback.connect();
            scheduler.spawn_detached(outputs);
            sink
        });
        scheduler.schedule(initial_effect);

        let termination = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Termination::Completed,
                signal = signals.next() => match signal {
                    Some(InputSignal::Value(input)) => {
                        core.step(input, &mut scheduler, successes.as_ref());
                    }
                    Some(InputSignal::Interrupted) => break Termination::Interrupted,
                    None => break Termination::Completed,
                },
                Some(fed) = feedback_rx.recv() => {
                    if fed.is_stale() {
                        trace!(automaton = %core.name, "discarding input from cancelled effect");
                        continue;
                    }
                    core.step(fed.input, &mut scheduler, successes.as_ref());
                }
            }
        };

        scheduler.shutdown();
        core.bus.terminate(termination);
        feedback_rx.close();
        let mut discarded = 0usize;
        while feedback_rx.try_recv().is_ok() {
            discarded += 1;
        }

        info!(
            automaton = %core.name,
            termination = ?termination,
            discarded,
            "automaton terminated"
        );
        termination
    }
}

impl<I, S, Q, Id> Core<I, S, Q, Id>
where
    I: Clone + fmt::Debug + Send + Sync + 'static,
    S: Clone + fmt::Debug + Send + Sync + 'static,
    Q: EffectQueue,
    Id: fmt::Debug + Send + Sync + 'static,
{
    fn step(
        &self,
        input: I,
        scheduler: &mut EffectScheduler<I, Q, Id>,
        successes: Option<&SuccessSink<I, S>>,
    ) {
        let from_state = self.state.borrow().clone();

        let Some((to_state, effect)) = self.evaluate(&input, &from_state) else {
            if self.config.trace_replies {
                debug!(
                    automaton = %self.name,
                    input = ?input,
                    state = ?from_state,
                    "transition rejected"
                );
            }
            self.bus.publish(Reply::new_failure(input, from_state));
            return;
        };

        self.state.send_replace(to_state.clone());

        let success = Success {
            input,
            from_state,
            to_state,
        };
        if self.config.trace_replies {
            debug!(
                automaton = %self.name,
                input = ?success.input,
                from = ?success.from_state,
                to = ?success.to_state,
                effect = ?effect,
                "transition succeeded"
            );
        }
        if let Some(successes) = successes {
            successes.send(&success);
        }
        self.bus.publish(Reply::Success(success));

        scheduler.schedule(effect);
    }

    fn evaluate(&self, input: &I, state: &S) -> Option<(S, Effect<I, Q, Id>)> {
        if !self.config.catch_mapping_panics {
            return self.mapping.evaluate(input, state);
        }

        match catch_unwind(AssertUnwindSafe(|| self.mapping.evaluate(input, state))) {
            Ok(result) => result,
            Err(panic_info) => {
                error!(
                    automaton = %self.name,
                    input = ?input,
                    state = ?state,
                    panic = %extract_panic_message(&panic_info),
                    "mapping panicked, treating input as rejected"
                );
                None
            }
        }
    }
}

// =============================================================================
// Automaton Handle
// =============================================================================

/// Handle to a running automaton.
///
/// Dropping the handle shuts the automaton down: effects are cancelled and
/// the reply stream completes. Keep it alive for as long as inputs should be
/// processed.
pub struct AutomatonHandle<I, S> {
    name: Arc<str>,
    state: StateProperty<S>,
    bus: ReplyBus<I, S>,
    running: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<Termination>>,
}

impl<I, S> AutomatonHandle<I, S>
where
    I: Clone + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> StateProperty<S> {
        self.state.clone()
    }

    pub fn current_state(&self) -> S {
        self.state.value()
    }

    /// Subscribe to replies from now on.
    pub fn replies(&self) -> Replies<I, S> {
        self.bus.subscribe()
    }

    /// Effects currently queued or running.
    pub fn running_effects(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_terminated(&self) -> bool {
        self.bus.termination().is_some()
    }

    /// Terminate as if the input source had completed.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the loop to terminate.
    pub async fn join(mut self) -> Result<Termination> {
        let Some(task) = self.task.take() else {
            return Ok(self.bus.termination().unwrap_or(Termination::Completed));
        };
        task.await.map_err(loop_failure)
    }
}

fn loop_failure(err: JoinError) -> AutomatonError {
    if err.is_panic() {
        let panic_info = err.into_panic();
        AutomatonError::LoopPanicked {
            message: extract_panic_message(&panic_info),
        }
    } else {
        AutomatonError::LoopAborted
    }
}

impl<I, S> Drop for AutomatonHandle<I, S> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<I, S> fmt::Debug for AutomatonHandle<I, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutomatonHandle")
            .field("name", &self.name)
            .field("running_effects", &self.running.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{when, PureMapping};
    use futures::stream;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Door {
        Closed,
        Open,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Push {
        Open,
        Close,
        Jam,
    }

    fn door_mapping() -> PureMapping<Push, Door> {
        PureMapping::reduce([
            when(Push::Open).from(Door::Closed).to(Door::Open),
            when(Push::Close).from(Door::Open).to(Door::Closed),
        ])
    }

    #[tokio::test]
    async fn test_every_input_gets_one_reply() {
        let automaton: Automaton<Push, Door> = Automaton::builder(Door::Closed, door_mapping())
            .build(InputSource::from_stream(stream::iter(vec![
                Push::Open,
                Push::Open,
                Push::Close,
            ])));
        let replies = automaton.replies();
        let handle = automaton.start();

        let replies: Vec<_> = replies.collect().await;
        assert_eq!(
            replies,
            vec![
                Reply::new_success(Push::Open, Door::Closed, Door::Open),
                Reply::new_failure(Push::Open, Door::Open),
                Reply::new_success(Push::Close, Door::Open, Door::Closed),
            ]
        );
        assert_eq!(handle.current_state(), Door::Closed);
        assert_eq!(handle.join().await.unwrap(), Termination::Completed);
    }

    #[tokio::test]
    async fn test_state_matches_reply_when_observed() {
        let (sender, inputs) = InputSource::pipe();
        let automaton: Automaton<Push, Door> =
            Automaton::builder(Door::Closed, door_mapping()).build(inputs);
        let mut replies = automaton.replies();
        let handle = automaton.start();

        sender.send(Push::Open).unwrap();
        let reply = replies.next().await.unwrap();
        assert_eq!(reply.to_state(), Some(&handle.current_state()));
    }

    #[tokio::test]
    async fn test_interrupt_mirrors_into_replies() {
        let (sender, inputs) = InputSource::pipe();
        let automaton: Automaton<Push, Door> =
            Automaton::builder(Door::Closed, door_mapping()).build(inputs);
        let mut replies = automaton.replies();
        let handle = automaton.start();

        sender.interrupt();
        assert_eq!(replies.next().await, None);
        assert_eq!(replies.termination(), Some(Termination::Interrupted));
        assert_eq!(handle.join().await.unwrap(), Termination::Interrupted);
    }

    #[tokio::test]
    async fn test_panicking_mapping_is_a_failure() {
        let mapping: PureMapping<Push, Door> = PureMapping::new(|input, state| match input {
            Push::Jam => panic!("door jammed"),
            _ => door_mapping().evaluate(input, state),
        });
        let automaton: Automaton<Push, Door> = Automaton::builder(Door::Closed, mapping)
            .build(InputSource::from_stream(stream::iter(vec![Push::Jam, Push::Open])));
        let replies = automaton.replies();
        let _handle = automaton.start();

        let replies: Vec<_> = replies.collect().await;
        assert_eq!(
            replies,
            vec![
                Reply::new_failure(Push::Jam, Door::Closed),
                Reply::new_success(Push::Open, Door::Closed, Door::Open),
            ]
        );
    }

    #[tokio::test]
    async fn test_drop_before_start_completes_replies() {
        let (_sender, inputs) = InputSource::pipe();
        let automaton: Automaton<Push, Door> =
            Automaton::builder(Door::Closed, door_mapping()).build(inputs);
        let mut replies = automaton.replies();
        drop(automaton);

        assert_eq!(replies.next().await, None);
        assert_eq!(replies.termination(), Some(Termination::Completed));
    }

    #[tokio::test]
    async fn test_dropping_handle_terminates() {
        let (sender, inputs) = InputSource::pipe();
        let automaton: Automaton<Push, Door> =
            Automaton::builder(Door::Closed, door_mapping()).build(inputs);
        let mut replies = automaton.replies();
        let state = automaton.state();
        drop(automaton.start());

        assert_eq!(replies.next().await, None);
        assert_eq!(replies.termination(), Some(Termination::Completed));

        // The loop owns the state sender; once it is gone the property closes.
        assert_eq!(state.wait_for(|door| *door == Door::Open).await, None);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(sender.send(Push::Open).is_err());
    }

    #[tokio::test]
    async fn test_create_runs_initial_effect_first() {
        let handle = Automaton::<Push, Door>::create(
            Door::Closed,
            Some(Effect::new(stream::iter(vec![Push::Open]))),
            InputSource::from_stream(stream::pending::<Push>()),
            door_mapping(),
        );

        let state = handle.state();
        assert_eq!(state.wait_for(|door| *door == Door::Open).await, Some(Door::Open));
        assert!(!handle.is_terminated());
    }
}
