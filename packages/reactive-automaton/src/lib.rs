//! # Reactive Automaton
//!
//! A finite state machine whose transitions may describe asynchronous work.
//!
//! ## Core Principle
//!
//! > **Mappings decide, effects execute, the loop serializes.**
//!
//! ## Architecture
//!
//! ```text
//! InputSource ─┐
//!              ├─► Automaton loop ─► EffectMapping(input, state)
//! feedback ────┘        │                    │
//!     ▲                 │                    ├─► Reply ─► Replies subscribers
//!     │                 │                    └─► new state ─► StateProperty
//!     │                 ▼
//!     └──── EffectScheduler (per-queue Merge / Concat / Latest lanes)
//! ```
//!
//! ## Key Concepts
//!
//! - **Mapping**: pure `(input, state) -> Option<(state, effect)>`; `None` is
//!   reported as [`Reply::Failure`], never as an error
//! - **Effect**: a lazy stream of follow-up inputs, routed to a queue and
//!   optionally tagged with an id for cancellation
//! - **Queue**: an execution lane with one [`FlattenStrategy`]
//! - **Feedback**: follow-up inputs derived from the stream of successes
//!
//! ## Guarantees
//!
//! - Inputs are evaluated one at a time against the latest state
//! - Every input produces exactly one [`Reply`]
//! - A cancelled or superseded effect never delivers another input
//! - Termination cancels every effect and ends every reply stream once
//!
//! ## Example
//!
//! ```ignore
//! use futures::StreamExt;
//! use reactive_automaton::{when, Automaton, Effect, EffectMapping, InputSource};
//!
//! #[derive(Debug, Clone, Copy, PartialEq)]
//! enum State { LoggedOut, LoggingIn, LoggedIn }
//!
//! #[derive(Debug, Clone, Copy, PartialEq)]
//! enum Input { Login, LoginOk }
//!
//! let mapping = EffectMapping::reduce([
//!     when(Input::Login)
//!         .from(State::LoggedOut)
//!         .to(State::LoggingIn)
//!         .with_effect(|| Effect::from_future(async { Input::LoginOk })),
//!     when(Input::LoginOk)
//!         .from(State::LoggingIn)
//!         .to(State::LoggedIn)
//!         .into_effect_mapping(),
//! ]);
//!
//! let (sender, inputs) = InputSource::pipe();
//! let automaton = Automaton::builder(State::LoggedOut, mapping).build(inputs);
//! let mut replies = automaton.replies();
//! let handle = automaton.start();
//!
//! sender.send(Input::Login)?;
//! while let Some(reply) = replies.next().await {
//!     println!("{:?}", reply);
//! }
//! ```

mod automaton;
mod bus;
mod cancel;
mod config;
mod effect;
mod error;
mod feedback;
mod flatten;
mod input;
mod mapping;
mod queue;
mod reply;
mod scheduler;
mod state;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;



pub use crate::automaton::{Automaton, AutomatonBuilder, AutomatonHandle};
pub use crate::bus::{Replies, Termination};
pub use crate::config::AutomatonConfig;
pub use crate::effect::{CancelPredicate, Effect, EffectTask, InputStream};
pub use crate::error::{AutomatonError, Result};
pub use crate::feedback::{Feedback, SuccessStream};
pub use crate::flatten::flatten_with;
pub use crate::input::{InputSender, InputSource};
pub use crate::mapping::{any_input, when, when_input, EffectMapping, FromState, PureMapping, When};
pub use crate::queue::{EffectQueue, FlattenStrategy, QueueId};
pub use crate::reply::{Failure, Reply, Success};
pub use crate::state::StateProperty;
