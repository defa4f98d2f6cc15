//! Replies: the record of one transition attempt.
//!
//! Every input the automaton evaluates produces exactly one [`Reply`]:
//! - [`Reply::Success`] when a mapping matched, carrying the new state
//! - [`Reply::Failure`] when nothing matched, leaving the state untouched
//!
//! A failure is an ordinary outcome ("this input is invalid in this state"),
//! not an error.

use serde::{Deserialize, Serialize};

/// A successful transition `(input, from_state, to_state)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Success<I, S> {
    pub input: I,
    pub from_state: S,
    pub to_state: S,
}

/// A rejected input `(input, from_state)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure<I, S> {
    pub input: I,
    pub from_state: S,
}

/// Outcome of evaluating one input against the current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Reply<I, S> {
    Success(Success<I, S>),
    Failure(Failure<I, S>),
}

impl<I, S> Reply<I, S> {
    pub fn new_success(input: I, from_state: S, to_state: S) -> Self {
        Reply::Success(Success {
            input,
            from_state,
            to_state,
        })
    }

    pub fn new_failure(input: I, from_state: S) -> Self {
        Reply::Failure(Failure { input, from_state })
    }

    pub fn success(&self) -> Option<&Success<I, S>> {
        match self {
            Reply::Success(success) => Some(success),
            Reply::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure<I, S>> {
        match self {
            Reply::Success(_) => None,
            Reply::Failure(failure) => Some(failure),
        }
    }

    /// Consume the reply, keeping only a success.
    pub fn into_success(self) -> Option<Success<I, S>> {
        match self {
            Reply::Success(success) => Some(success),
            Reply::Failure(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Reply::Success(_))
    }

    pub fn input(&self) -> &I {
        match self {
            Reply::Success(success) => &success.input,
            Reply::Failure(failure) => &failure.input,
        }
    }

    pub fn from_state(&self) -> &S {
        match self {
            Reply::Success(success) => &success.from_state,
            Reply::Failure(failure) => &failure.from_state,
        }
    }

    /// The state after the transition. `Some` iff this is a success.
    pub fn to_state(&self) -> Option<&S> {
        self.success().map(|success| &success.to_state)
    }
}

impl<I, S> From<Success<I, S>> for Reply<I, S> {
    fn from(success: Success<I, S>) -> Self {
        Reply::Success(success)
    }
}

impl<I, S> From<Failure<I, S>> for Reply<I, S> {
    fn from(failure: Failure<I, S>) -> Self {
        Reply::Failure(failure)
    }
}
