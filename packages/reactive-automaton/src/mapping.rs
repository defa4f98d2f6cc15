//! Transition mappings: pure functions deciding the next state.
//!
//! Two shapes exist:
//! - [`PureMapping`]: `(input, state) -> Option<state>`
//! - [`EffectMapping`]: `(input, state) -> Option<(state, effect)>`
//!
//! `None` means "no transition for this input in this state", which the
//! automaton reports as a failure. Mappings must not perform IO or block;
//! asynchronous work is only ever described by the returned [`Effect`].
//!
//! # Priority
//!
//! [`PureMapping::reduce`] and [`EffectMapping::reduce`] fold an ordered list
//! into one mapping. Entries are tried in order and the first match wins, so
//! registration order is significant.
//!
//! # Table builder
//!
//! ```ignore
//! use reactive_automaton::{when, Effect, EffectMapping};
//!
//! let mapping = EffectMapping::reduce([
//!     when(Input::Login)
//!         .from(State::LoggedOut)
//!         .to(State::LoggingIn)
//!         .with_effect(|| Effect::from_future(login()).on_queue(Queue::Session)),
//!     when(Input::LoginOk)
//!         .from(State::LoggingIn)
//!         .to(State::LoggedIn)
//!         .into_effect_mapping(),
//! ]);
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use crate::effect::Effect;

type PureFn<I, S> = dyn Fn(&I, &S) -> Option<S> + Send + Sync;
type EffectFn<I, S, Q, Id> = dyn Fn(&I, &S) -> Option<(S, Effect<I, Q, Id>)> + Send + Sync;
type Predicate<T> = dyn Fn(&T) -> bool + Send + Sync;

// =============================================================================
// Pure Mapping
// =============================================================================

/// A transition function without side effects.
pub struct PureMapping<I, S> {
    f: Arc<PureFn<I, S>>,
}

impl<I: 'static, S: 'static> PureMapping<I, S> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&I, &S) -> Option<S> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    pub fn evaluate(&self, input: &I, state: &S) -> Option<S> {
        (self.f)(input, state)
    }

    /// Same as [`evaluate`](Self::evaluate); mirrors [`EffectMapping::next_state`].
    pub fn next_state(&self, input: &I, state: &S) -> Option<S> {
        self.evaluate(input, state)
    }

    /// Fold mappings into one. The first mapping that matches wins.
    pub fn reduce<M>(mappings: M) -> Self
    where
        M: IntoIterator<Item = PureMapping<I, S>>,
    {
        let mappings: Vec<_> = mappings.into_iter().collect();
        Self::new(move |input, state| {
            mappings
                .iter()
                .find_map(|mapping| mapping.evaluate(input, state))
        })
    }

    /// Lift into an effect mapping that never emits an effect.
    pub fn into_effect_mapping<Q: 'static, Id: 'static>(self) -> EffectMapping<I, S, Q, Id> {
        EffectMapping::new(move |input, state| {
            self.evaluate(input, state)
                .map(|to_state| (to_state, Effect::None))
        })
    }

    /// Attach an effect built fresh by `make` on every successful match.
    pub fn with_effect<Q, Id, F>(self, make: F) -> EffectMapping<I, S, Q, Id>
    where
        Q: 'static,
        Id: 'static,
        F: Fn() -> Effect<I, Q, Id> + Send + Sync + 'static,
    {
        EffectMapping::new(move |input, state| {
            self.evaluate(input, state)
                .map(|to_state| (to_state, make()))
        })
    }
}

impl<I, S> Clone for PureMapping<I, S> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<I, S> std::fmt::Debug for PureMapping<I, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PureMapping").finish_non_exhaustive()
    }
}

// =============================================================================
// Effect Mapping
// =============================================================================

/// A transition function that may also describe follow-up work.
pub struct EffectMapping<I, S, Q = Infallible, Id = Infallible> {
    f: Arc<EffectFn<I, S, Q, Id>>,
}

impl<I: 'static, S: 'static, Q: 'static, Id: 'static> EffectMapping<I, S, Q, Id> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&I, &S) -> Option<(S, Effect<I, Q, Id>)> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    pub fn evaluate(&self, input: &I, state: &S) -> Option<(S, Effect<I, Q, Id>)> {
        (self.f)(input, state)
    }

    /// Evaluate and discard the effect.
    pub fn next_state(&self, input: &I, state: &S) -> Option<S> {
        self.evaluate(input, state).map(|(to_state, _)| to_state)
    }

    /// Fold mappings into one. The first mapping that matches wins.
    pub fn reduce<M>(mappings: M) -> Self
    where
        M: IntoIterator<Item = EffectMapping<I, S, Q, Id>>,
    {
        let mappings: Vec<_> = mappings.into_iter().collect();
        Self::new(move |input, state| {
            mappings
                .iter()
                .find_map(|mapping| mapping.evaluate(input, state))
        })
    }

    /// Demote to a pure mapping by dropping effects.
    pub fn into_pure(self) -> PureMapping<I, S> {
        PureMapping::new(move |input, state| self.next_state(input, state))
    }
}

impl<I: 'static, S: 'static, Q: 'static, Id: 'static> From<PureMapping<I, S>>
    for EffectMapping<I, S, Q, Id>
{
    fn from(mapping: PureMapping<I, S>) -> Self {
        mapping.into_effect_mapping()
    }
}

impl<I, S, Q, Id> Clone for EffectMapping<I, S, Q, Id> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<I, S, Q, Id> std::fmt::Debug for EffectMapping<I, S, Q, Id> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectMapping").finish_non_exhaustive()
    }
}

// =============================================================================
// Table Builder
// =============================================================================

/// Start a table row matching inputs equal to `input`.
pub fn when<I>(input: I) -> When<I>
where
    I: PartialEq + Send + Sync + 'static,
{
    when_input(move |candidate: &I| *candidate == input)
}

/// Start a table row matching inputs that satisfy `predicate`.
pub fn when_input<I, F>(predicate: F) -> When<I>
where
    F: Fn(&I) -> bool + Send + Sync + 'static,
{
    When {
        input: Arc::new(predicate),
    }
}

/// Start a table row matching every input.
pub fn any_input<I: 'static>() -> When<I> {
    When {
        input: Arc::new(|_: &I| true),
    }
}

/// Input half of a table row.
pub struct When<I> {
    input: Arc<Predicate<I>>,
}

impl<I: 'static> When<I> {
    /// Match only when the current state equals `state`.
    pub fn from<S>(self, state: S) -> FromState<I, S>
    where
        S: PartialEq + Send + Sync + 'static,
    {
        self.from_where(move |candidate: &S| *candidate == state)
    }

    /// Match only when the current state satisfies `predicate`.
    pub fn from_where<S, F>(self, predicate: F) -> FromState<I, S>
    where
        F: Fn(&S) -> bool + Send + Sync + 'static,
    {
        FromState {
            input: self.input,
            state: Arc::new(predicate),
        }
    }

    /// Match in every state.
    pub fn from_any<S: 'static>(self) -> FromState<I, S> {
        self.from_where(|_: &S| true)
    }

    /// Compute the next state from the current one.
    pub fn map_state<S, F>(self, transition: F) -> PureMapping<I, S>
    where
        S: 'static,
        F: Fn(&S) -> S + Send + Sync + 'static,
    {
        let input = self.input;
        PureMapping::new(move |candidate, state| input(candidate).then(|| transition(state)))
    }
}

/// Input and source-state halves of a table row.
pub struct FromState<I, S> {
    input: Arc<Predicate<I>>,
    state: Arc<Predicate<S>>,
}

impl<I: 'static, S: Clone + Send + Sync + 'static> FromState<I, S> {
    /// Finish the row with a fixed target state.
    pub fn to(self, to_state: S) -> PureMapping<I, S> {
        let FromState { input, state } = self;
        PureMapping::new(move |candidate, from_state| {
            (input(candidate) && state(from_state)).then(|| to_state.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[derive(Debug, Clone, PartialEq)]
    enum Light {
        Red,
        Green,
        Yellow,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Signal {
        Next,
        Reset,
        Emergency,
    }

    fn cycle() -> PureMapping<Signal, Light> {
        PureMapping::reduce([
            when(Signal::Next).from(Light::Red).to(Light::Green),
            when(Signal::Next).from(Light::Green).to(Light::Yellow),
            when(Signal::Next).from(Light::Yellow).to(Light::Red),
            when(Signal::Reset).from_any().to(Light::Red),
        ])
    }

    #[test]
    fn test_table_rows_match_input_and_state() {
        let mapping = cycle();
        assert_eq!(mapping.evaluate(&Signal::Next, &Light::Red), Some(Light::Green));
        assert_eq!(mapping.evaluate(&Signal::Next, &Light::Yellow), Some(Light::Red));
        assert_eq!(mapping.evaluate(&Signal::Reset, &Light::Green), Some(Light::Red));
    }

    #[test]
    fn test_no_match_is_none() {
        let mapping = cycle();
        assert_eq!(mapping.evaluate(&Signal::Emergency, &Light::Red), None);
    }

    #[test]
    fn test_reduce_first_match_wins() {
        let mapping = PureMapping::reduce([
            when(Signal::Emergency).from_any().to(Light::Red),
            when(Signal::Emergency).from_any().to(Light::Yellow),
        ]);
        assert_eq!(
            mapping.evaluate(&Signal::Emergency, &Light::Green),
            Some(Light::Red)
        );
    }

    #[test]
    fn test_reduce_empty_never_matches() {
        let mapping: PureMapping<Signal, Light> = PureMapping::reduce(Vec::new());
        assert_eq!(mapping.evaluate(&Signal::Next, &Light::Red), None);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let mapping = cycle();
        for _ in 0..10 {
            assert_eq!(mapping.evaluate(&Signal::Next, &Light::Green), Some(Light::Yellow));
        }
    }

    #[test]
    fn test_from_where_and_map_state() {
        let counter: PureMapping<Signal, u32> = PureMapping::reduce([
            when(Signal::Reset).from_where(|n: &u32| *n > 0).to(0),
            when(Signal::Next).map_state(|n: &u32| n + 1),
        ]);

        assert_eq!(counter.evaluate(&Signal::Next, &4), Some(5));
        assert_eq!(counter.evaluate(&Signal::Reset, &4), Some(0));
        assert_eq!(counter.evaluate(&Signal::Reset, &0), None);
    }

    #[test]
    fn test_any_input() {
        let mapping: PureMapping<Signal, Light> = any_input().from(Light::Yellow).to(Light::Red);
        assert_eq!(mapping.evaluate(&Signal::Emergency, &Light::Yellow), Some(Light::Red));
        assert_eq!(mapping.evaluate(&Signal::Emergency, &Light::Green), None);
    }

    #[test]
    fn test_lift_pairs_with_no_effect() {
        let mapping: EffectMapping<Signal, Light> = cycle().into();
        let (to_state, effect) = mapping.evaluate(&Signal::Next, &Light::Red).unwrap();
        assert_eq!(to_state, Light::Green);
        assert!(effect.is_none());
    }

    #[test]
    fn test_demote_discards_effect() {
        let mapping: EffectMapping<Signal, Light> = when(Signal::Next)
            .from(Light::Red)
            .to(Light::Green)
            .with_effect(|| Effect::new(stream::iter(vec![Signal::Next])));

        let pure = mapping.clone().into_pure();
        assert_eq!(pure.evaluate(&Signal::Next, &Light::Red), Some(Light::Green));
        assert_eq!(pure.evaluate(&Signal::Reset, &Light::Red), None);

        let (_, effect) = mapping.evaluate(&Signal::Next, &Light::Red).unwrap();
        assert!(matches!(effect, Effect::Produce(_)));
    }

    #[test]
    fn test_effect_reduce_priority() {
        let first: EffectMapping<Signal, Light> = when(Signal::Next)
            .from_any()
            .to(Light::Green)
            .with_effect(Effect::empty);
        let second: EffectMapping<Signal, Light> =
            when(Signal::Next).from_any().to(Light::Yellow).into();

        let mapping = EffectMapping::reduce([first, second]);
        let (to_state, effect) = mapping.evaluate(&Signal::Next, &Light::Red).unwrap();
        assert_eq!(to_state, Light::Green);
        assert!(!effect.is_none());
    }
}
