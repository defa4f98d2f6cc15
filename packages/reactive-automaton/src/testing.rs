//! Testing utilities for mappings and running automatons.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! reactive-automaton = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ## Using `assert_transitions!`
//!
//! ```ignore
//! use reactive_automaton::assert_transitions;
//!
//! assert_transitions!(
//!     mapping,
//!     Input::Login, State::LoggedOut => Some(State::LoggingIn),
//!     Input::Logout, State::LoggedOut => None,
//! );
//! ```
//!
//! ## Using the fluent builder
//!
//! ```ignore
//! use reactive_automaton::testing::MappingTest;
//!
//! MappingTest::new(mapping, State::LoggedOut)
//!     .given(Input::Login)
//!     .expect_state(State::LoggingIn)
//!     .expect_effect(|effect| !effect.is_none())
//!     .then(Input::Logout)
//!     .expect_rejected();
//! ```
//!
//! ## Waiting on replies
//!
//! ```ignore
//! let latch = ReplyLatch::new(2);
//! latch.observe(handle.replies(), |reply| reply.is_success());
//! sender.send(Input::Login)?;
//! latch.wait().await;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::Notify;

use crate::bus::Replies;
use crate::effect::{Effect, InputStream};
use crate::mapping::EffectMapping;
use crate::reply::Reply;

/// Asserts `(input, state) => expected next state` rows against a mapping.
///
/// Works with anything exposing `next_state(&input, &state) -> Option<S>`,
/// i.e. both [`PureMapping`](crate::PureMapping) and
/// [`EffectMapping`](crate::EffectMapping).
///
/// # Panics
///
/// Panics on the first row whose result differs.
#[macro_export]
macro_rules! assert_transitions {
    ($mapping:expr, $($input:expr, $state:expr => $expected:expr),+ $(,)?) => {
        $({
            let expected = $expected;
            let actual = $mapping.next_state(&$input, &$state);
            assert_eq!(
                actual, expected,
                "Unexpected transition for {:?} in {:?}\n  expected: {:?}\n  actual: {:?}",
                $input, $state, expected, actual
            );
        })+
    };
}

pub use assert_transitions;

// =============================================================================
// Mapping Test
// =============================================================================

/// Fluent test builder that walks a mapping through a sequence of inputs.
///
/// The tracked state advances on every match, exactly as the automaton would,
/// but effects are only inspected, never run.
pub struct MappingTest<I, S, Q = std::convert::Infallible, Id = std::convert::Infallible> {
    mapping: EffectMapping<I, S, Q, Id>,
    state: S,
    last: Option<Effect<I, Q, Id>>,
}

impl<I, S, Q, Id> MappingTest<I, S, Q, Id>
where
    I: fmt::Debug + 'static,
    S: Clone + fmt::Debug + PartialEq + 'static,
    Q: 'static,
    Id: 'static,
{
    pub fn new(mapping: impl Into<EffectMapping<I, S, Q, Id>>, initial_state: S) -> Self {
        Self {
            mapping: mapping.into(),
            state: initial_state,
            last: None,
        }
    }

    /// Evaluate `input` against the tracked state.
    pub fn given(mut self, input: I) -> Self {
        self.last = match self.mapping.evaluate(&input, &self.state) {
            Some((to_state, effect)) => {
                self.state = to_state;
                Some(effect)
            }
            None => None,
        };
        self
    }

    /// Alias of [`given`](Self::given) for follow-up steps.
    pub fn then(self, input: I) -> Self {
        self.given(input)
    }

    /// Assert the last input matched and led to `expected`.
    pub fn expect_state(self, expected: S) -> Self {
        assert!(
            self.last.is_some(),
            "Expected transition to {:?}, but the input was rejected in {:?}",
            expected,
            self.state
        );
        assert_eq!(
            self.state, expected,
            "State mismatch\n  expected: {:?}\n  actual: {:?}",
            expected, self.state
        );
        self
    }

    /// Assert the last input matched no mapping.
    pub fn expect_rejected(self) -> Self {
        assert!(
            self.last.is_none(),
            "Expected rejection, but transitioned to {:?}",
            self.state
        );
        self
    }

    /// Assert the effect of the last transition satisfies `predicate`.
    pub fn expect_effect<F>(self, predicate: F) -> Self
    where
        F: FnOnce(&Effect<I, Q, Id>) -> bool,
    {
        let effect = self
            .last
            .as_ref()
            .unwrap_or_else(|| panic!("Expected an effect, but the input was rejected"));
        assert!(predicate(effect), "Effect predicate failed in {:?}", self.state);
        self
    }

    /// Assert the tracked state satisfies `predicate`.
    pub fn assert_state<F>(self, predicate: F) -> Self
    where
        F: FnOnce(&S) -> bool,
    {
        assert!(predicate(&self.state), "State predicate failed for {:?}", self.state);
        self
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Take the effect of the last transition, e.g. to run its producer.
    pub fn take_effect(&mut self) -> Option<Effect<I, Q, Id>> {
        self.last.take()
    }

    pub fn into_state(self) -> S {
        self.state
    }
}

// =============================================================================
// Reply Latch
// =============================================================================

/// Waits for a specific number of replies.
///
/// Tests should wait for meaning, not time: count down on the replies you
/// expect, then [`wait`](Self::wait) instead of sleeping. Clones share the
/// same counter.
///
/// For tests that might hang, wrap `wait` in `tokio::time::timeout`.
#[derive(Clone)]
pub struct ReplyLatch {
    inner: Arc<LatchInner>,
}

struct LatchInner {
    remaining: AtomicUsize,
    notify: Notify,
}

impl ReplyLatch {
    pub fn new(expected: usize) -> Self {
        Self {
            inner: Arc::new(LatchInner {
                remaining: AtomicUsize::new(expected),
                notify: Notify::new(),
            }),
        }
    }

    /// Count one expected reply.
    ///
    /// # Panics
    ///
    /// Panics if called more times than expected.
    pub fn count_down(&self) {
        let prev = self.inner.remaining.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            panic!("ReplyLatch counted below zero - more replies than expected");
        }
        if prev == 1 {
            self.inner.notify.notify_waiters();
        }
    }

    /// Wait for the count to reach zero. Returns immediately if it already has.
    pub async fn wait(&self) {
        loop {
            // Register before checking to not miss the final notification.
            let notified = self.inner.notify.notified();

            if self.remaining() == 0 {
                return;
            }

            notified.await;
        }
    }

    pub fn remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// Count down on every reply matching `predicate` until the latch opens.
    pub fn observe<I, S, F>(&self, replies: Replies<I, S>, mut predicate: F)
    where
        I: Send + 'static,
        S: Send + 'static,
        F: FnMut(&Reply<I, S>) -> bool + Send + 'static,
    {
        let latch = self.clone();
        tokio::spawn(async move {
            let mut replies = replies;
            while !latch.is_complete() {
                match replies.next().await {
                    Some(reply) if predicate(&reply) => latch.count_down(),
                    Some(_) => {}
                    None => break,
                }
            }
        });
    }
}

impl fmt::Debug for ReplyLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyLatch")
            .field("remaining", &self.remaining())
            .finish()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Read up to `count` replies, giving up after `timeout`.
pub async fn collect_replies<I, S>(
    replies: &mut Replies<I, S>,
    count: usize,
    timeout: Duration,
) -> Vec<Reply<I, S>> {
    let mut collected = Vec::with_capacity(count);
    let _ = tokio::time::timeout(timeout, async {
        while collected.len() < count {
            match replies.next().await {
                Some(reply) => collected.push(reply),
                None => break,
            }
        }
    })
    .await;
    collected
}

/// A producer yielding `input` once, after `delay`.
pub fn after<I: Send + 'static>(delay: Duration, input: I) -> InputStream<I> {
    stream::once(async move {
        tokio::time::sleep(delay).await;
        input
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{ReplyBus, Termination};
    use crate::mapping::{when, PureMapping};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Phase {
        Idle,
        Running,
        Done,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Cmd {
        Start,
        Finish,
    }

    fn mapping() -> PureMapping<Cmd, Phase> {
        PureMapping::reduce([
            when(Cmd::Start).from(Phase::Idle).to(Phase::Running),
            when(Cmd::Finish).from(Phase::Running).to(Phase::Done),
        ])
    }

    #[test]
    fn test_assert_transitions_macro() {
        let mapping = mapping();
        assert_transitions!(
            mapping,
            Cmd::Start, Phase::Idle => Some(Phase::Running),
            Cmd::Finish, Phase::Idle => None,
            Cmd::Finish, Phase::Running => Some(Phase::Done),
        );
    }

    #[test]
    fn test_assert_transitions_evaluates_expected_once() {
        let mapping = mapping();
        let mut evaluated = 0;
        assert_transitions!(
            mapping,
            Cmd::Start, Phase::Idle => {
                evaluated += 1;
                Some(Phase::Running)
            },
        );
        assert_eq!(evaluated, 1);
    }

    #[test]
    fn test_mapping_test_walks_states() {
        let done = MappingTest::<Cmd, Phase>::new(mapping(), Phase::Idle)
            .given(Cmd::Finish)
            .expect_rejected()
            .then(Cmd::Start)
            .expect_state(Phase::Running)
            .expect_effect(|effect| effect.is_none())
            .then(Cmd::Finish)
            .assert_state(|phase| *phase == Phase::Done)
            .into_state();

        assert_eq!(done, Phase::Done);
    }

    #[test]
    #[should_panic(expected = "Expected rejection")]
    fn test_mapping_test_reports_unexpected_match() {
        MappingTest::<Cmd, Phase>::new(mapping(), Phase::Idle)
            .given(Cmd::Start)
            .expect_rejected();
    }

    #[tokio::test]
    async fn test_latch_observes_matching_replies() {
        let bus: ReplyBus<Cmd, Phase> = ReplyBus::new();
        let latch = ReplyLatch::new(2);
        latch.observe(bus.subscribe(), |reply| reply.is_success());

        bus.publish(Reply::new_success(Cmd::Start, Phase::Idle, Phase::Running));
        bus.publish(Reply::new_failure(Cmd::Start, Phase::Running));
        bus.publish(Reply::new_success(Cmd::Finish, Phase::Running, Phase::Done));

        latch.wait().await;
        assert!(latch.is_complete());
    }

    #[test]
    #[should_panic(expected = "below zero")]
    fn test_latch_panics_on_extra_count() {
        let latch = ReplyLatch::new(0);
        latch.count_down();
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_replies_stops_at_timeout() {
        let bus: ReplyBus<Cmd, Phase> = ReplyBus::new();
        let mut replies = bus.subscribe();
        bus.publish(Reply::new_failure(Cmd::Finish, Phase::Idle));

        let collected = collect_replies(&mut replies, 3, Duration::from_millis(100)).await;
        assert_eq!(collected.len(), 1);

        bus.terminate(Termination::Completed);
        assert!(collect_replies(&mut replies, 1, Duration::from_millis(100))
            .await
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_after_delays_input() {
        let start = tokio::time::Instant::now();
        let values: Vec<Cmd> = after(Duration::from_millis(40), Cmd::Start).collect().await;

        assert_eq!(values, vec![Cmd::Start]);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
