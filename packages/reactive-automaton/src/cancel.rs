//! Registry of running effects and their cancellation tokens.
//!
//! Every produced effect gets a child token of the automaton's root token.
//! The token is the only way an effect is ever stopped:
//!
//! - a matching [`Effect::Cancel`](crate::Effect::Cancel) cancels tokens whose
//!   effect id satisfies the predicate (effects without an id never match)
//! - a `Latest` queue cancels the token of the task it supersedes
//! - termination cancels the root, and with it every child
//!
//! Tasks hold an [`EffectGuard`] that deregisters on drop, so the registry only
//! ever lists effects that are queued or running.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::effect::CancelPredicate;

struct RunningEffect<Id> {
    id: Option<Id>,
    token: CancellationToken,
}

/// Tracks the cancellation token of every queued or running effect.
pub(crate) struct CancellationRegistry<Id> {
    root: CancellationToken,
    running: DashMap<u64, RunningEffect<Id>>,
    next_key: AtomicU64,
    /// Shared with handles so they can report activity without knowing `Id`.
    in_flight: Arc<AtomicUsize>,
}

impl<Id: Send + Sync + 'static> CancellationRegistry<Id> {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            running: DashMap::new(),
            next_key: AtomicU64::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register an effect and hand back its guard.
    pub fn register(self: &Arc<Self>, id: Option<Id>) -> EffectGuard<Id> {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        self.running.insert(
            key,
            RunningEffect {
                id,
                token: token.clone(),
            },
        );
        self.in_flight.fetch_add(1, Ordering::AcqRel);

        EffectGuard {
            registry: self.clone(),
            key,
            token,
        }
    }

    /// A token that only dies with the automaton. Not listed as running.
    pub fn detached_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Cancel every effect whose id matches. Returns how many were stopped.
    pub fn cancel_matching(&self, predicate: &CancelPredicate<Id>) -> usize {
        let mut cancelled = 0;
        self.running.retain(|_, effect| {
            let matched = effect.id.as_ref().is_some_and(|id| predicate.matches(id));
            if matched {
                effect.token.cancel();
                cancelled += 1;
            }
            !matched
        });
        self.in_flight.fetch_sub(cancelled, Ordering::AcqRel);
        cancelled
    }

    /// Cancel everything, including effects without an id.
    pub fn shutdown(&self) {
        self.root.cancel();
        let stopped = self.running.len();
        self.running.clear();
        self.in_flight.store(0, Ordering::Release);
        if stopped > 0 {
            tracing::debug!(stopped, "cancelled in-flight effects on shutdown");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    pub fn in_flight(&self) -> Arc<AtomicUsize> {
        self.in_flight.clone()
    }

    fn release(&self, key: u64) {
        if self.running.remove(&key).is_some() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// RAII registration of one effect.
///
/// Dropping the guard removes the effect from the registry. It does not cancel
/// the token; cancellation is always an explicit decision.
pub(crate) struct EffectGuard<Id: Send + Sync + 'static> {
    registry: Arc<CancellationRegistry<Id>>,
    key: u64,
    token: CancellationToken,
}

impl<Id: Send + Sync + 'static> EffectGuard<Id> {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl<Id: Send + Sync + 'static> Drop for EffectGuard<Id> {
    fn drop(&mut self) {
        self.registry.release(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<CancellationRegistry<&'static str>> {
        Arc::new(CancellationRegistry::new())
    }

    #[test]
    fn test_register_and_release() {
        let registry = registry();
        let guard = registry.register(Some("a"));
        assert_eq!(registry.in_flight().load(Ordering::Acquire), 1);

        drop(guard);
        assert_eq!(registry.in_flight().load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_cancel_matching_only_hits_tagged_effects() {
        let registry = registry();
        let tagged = registry.register(Some("fetch"));
        let other = registry.register(Some("poll"));
        let untagged = registry.register(None);

        let stopped = registry.cancel_matching(&CancelPredicate::new(|_| true));

        // The predicate matches any id, but an effect without one is immune.
        assert_eq!(stopped, 2);
        assert!(tagged.token().is_cancelled());
        assert!(other.token().is_cancelled());
        assert!(!untagged.token().is_cancelled());
        assert_eq!(registry.in_flight().load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_cancel_unknown_id_is_noop() {
        let registry = registry();
        let guard = registry.register(Some("fetch"));

        let stopped = registry.cancel_matching(&CancelPredicate::new(|id| *id == "missing"));

        assert_eq!(stopped, 0);
        assert!(!guard.token().is_cancelled());
    }

    #[test]
    fn test_release_after_cancel_does_not_underflow() {
        let registry = registry();
        let guard = registry.register(Some("fetch"));
        registry.cancel_matching(&CancelPredicate::new(|id| *id == "fetch"));
        drop(guard);

        assert_eq!(registry.in_flight().load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_shutdown_cancels_everything() {
        let registry = registry();
        let untagged = registry.register(None);
        let detached = registry.detached_token();

        registry.shutdown();

        assert!(registry.is_shut_down());
        assert!(untagged.token().is_cancelled());
        assert!(detached.is_cancelled());
        assert_eq!(registry.in_flight().load(Ordering::Acquire), 0);

        drop(untagged);
        assert_eq!(registry.in_flight().load(Ordering::Acquire), 0);
    }
}
