//! Effect queues and their flatten strategies.
//!
//! A queue is a named execution lane. Each lane has exactly one
//! [`FlattenStrategy`] deciding what happens when several effects are
//! scheduled on it at once. Lanes are independent of each other.
//!
//! Queues are user-defined closed enumerations implementing [`EffectQueue`]:
//!
//! ```ignore
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Lane {
//!     Session,
//!     Prefetch,
//! }
//!
//! impl EffectQueue for Lane {
//!     fn all_cases() -> Vec<Self> {
//!         vec![Lane::Session, Lane::Prefetch]
//!     }
//!
//!     fn flatten_strategy(&self) -> FlattenStrategy {
//!         match self {
//!             Lane::Session => FlattenStrategy::Latest,
//!             Lane::Prefetch => FlattenStrategy::Concat,
//!         }
//!     }
//! }
//! ```

use std::convert::Infallible;
use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Policy for several effects running in the same queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlattenStrategy {
    /// Start every effect immediately and interleave their outputs.
    Merge,
    /// Run effects strictly one after another, in emission order.
    Concat,
    /// A new effect supersedes the running one; only its output is observed.
    Latest,
}

impl fmt::Display for FlattenStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlattenStrategy::Merge => write!(f, "merge"),
            FlattenStrategy::Concat => write!(f, "concat"),
            FlattenStrategy::Latest => write!(f, "latest"),
        }
    }
}

/// A user-defined, enumerable set of effect queues.
///
/// The strategy bound to each case is fixed for the lifetime of an automaton.
pub trait EffectQueue: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Every case of the enumeration.
    fn all_cases() -> Vec<Self>;

    /// The flatten strategy of this queue.
    fn flatten_strategy(&self) -> FlattenStrategy;
}

/// No custom queues: every effect runs on the default queue.
impl EffectQueue for Infallible {
    fn all_cases() -> Vec<Self> {
        Vec::new()
    }

    fn flatten_strategy(&self) -> FlattenStrategy {
        match *self {}
    }
}

/// Routing target of an effect: the implicit default queue or a custom one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueId<Q> {
    Default,
    Custom(Q),
}

impl<Q: EffectQueue> QueueId<Q> {
    /// The default queue followed by every custom case.
    pub fn all() -> Vec<Self> {
        std::iter::once(QueueId::Default)
            .chain(Q::all_cases().into_iter().map(QueueId::Custom))
            .collect()
    }

    /// The default queue always merges.
    pub fn flatten_strategy(&self) -> FlattenStrategy {
        match self {
            QueueId::Default => FlattenStrategy::Merge,
            QueueId::Custom(queue) => queue.flatten_strategy(),
        }
    }
}

impl<Q> Default for QueueId<Q> {
    fn default() -> Self {
        QueueId::Default
    }
}

impl<Q: fmt::Debug> fmt::Display for QueueId<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueId::Default => write!(f, "default"),
            QueueId::Custom(queue) => write!(f, "{:?}", queue),
        }
    }
}
