//! Automaton runtime configuration.

use serde::Deserialize;
use uuid::Uuid;

/// Knobs for a single automaton instance.
///
/// Deserializable so hosts can keep it next to the rest of their config.
/// Missing fields fall back to [`Default`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutomatonConfig {
    /// Name attached to every log line of this automaton.
    pub name: String,
    /// Turn a panicking mapping into a [`Reply::Failure`](crate::Reply::Failure)
    /// instead of tearing down the loop.
    pub catch_mapping_panics: bool,
    /// Log every reply at `debug` level.
    pub trace_replies: bool,
}

impl Default for AutomatonConfig {
    fn default() -> Self {
        Self {
            name: format!("automaton-{}", Uuid::new_v4()),
            catch_mapping_panics: true,
            trace_replies: true,
        }
    }
}

impl AutomatonConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}
