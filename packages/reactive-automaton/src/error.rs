//! Structured error types for the automaton.
//!
//! Rejected inputs are not errors: they surface as
//! [`Reply::Failure`](crate::Reply::Failure). [`AutomatonError`] only covers
//! misuse of a terminated automaton and failures of the driving task itself.

use thiserror::Error;

/// Pattern-matchable automaton errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AutomatonError {
    /// The automaton has terminated and no longer accepts inputs.
    #[error("automaton input is closed")]
    InputClosed,

    /// The event loop task panicked.
    #[error("automaton loop panicked: {message}")]
    LoopPanicked {
        /// Panic payload, if it was a string.
        message: String,
    },

    /// The event loop task was aborted before it could terminate.
    #[error("automaton loop was aborted")]
    LoopAborted,
}

/// Result alias for fallible automaton operations.
pub type Result<T> = std::result::Result<T, AutomatonError>;

/// Extract a human-readable message from a panic payload.
pub(crate) fn extract_panic_message(panic_info: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
