//! Owner Context
//!
//! The owner context tracks which reaction is currently running and
//! whether reads are being sampled (untracked). Signal reads consult it to
//! decide whether to register a dependency edge; cleanup and error handler
//! registration consult it to find their owner.
//!
//! # Implementation
//!
//! Two thread-local cells hold the current owner and the sampling flag.
//! Entering a scope saves the previous values into a guard, and the guard
//! restores them when dropped. Nesting therefore behaves like a stack
//! without allocating one, and state is restored even if the body panics.

use std::cell::Cell;

use crate::graph::NodeId;

thread_local! {
    static OWNER: Cell<Option<NodeId>> = const { Cell::new(None) };
    static SAMPLING: Cell<bool> = const { Cell::new(false) };
}

/// Guard that restores the previous owner and sampling flag when dropped.
#[must_use = "the scope ends as soon as the guard is dropped"]
pub struct OwnerScope {
    prev_owner: Option<NodeId>,
    prev_sampling: bool,
}

impl OwnerScope {
    /// Make `owner` the current owner with the given sampling flag.
    pub fn enter(owner: Option<NodeId>, sampling: bool) -> Self {
        let prev_owner = OWNER.with(|cell| cell.replace(owner));
        let prev_sampling = SAMPLING.with(|cell| cell.replace(sampling));
        Self {
            prev_owner,
            prev_sampling,
        }
    }

    /// Keep the current owner but stop registering dependencies.
    pub fn sampling() -> Self {
        Self::enter(current(), true)
    }

    /// Get the current owner, if any.
    pub fn current() -> Option<NodeId> {
        current()
    }

    /// Whether reads are currently untracked.
    pub fn is_sampling() -> bool {
        SAMPLING.with(Cell::get)
    }
}

impl Drop for OwnerScope {
    fn drop(&mut self) {
        OWNER.with(|cell| cell.set(self.prev_owner));
        SAMPLING.with(|cell| cell.set(self.prev_sampling));
    }
}

fn current() -> Option<NodeId> {
    OWNER.with(Cell::get)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_sets_and_restores_owner() {
        let id = NodeId::new();

        assert!(OwnerScope::current().is_none());

        {
            let _scope = OwnerScope::enter(Some(id), false);
            assert_eq!(OwnerScope::current(), Some(id));
            assert!(!OwnerScope::is_sampling());
        }

        // Scope should be cleaned up after drop
        assert!(OwnerScope::current().is_none());
    }

    #[test]
    fn nested_scopes() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();

        {
            let _outer = OwnerScope::enter(Some(id1), false);

            {
                let _inner = OwnerScope::enter(Some(id2), false);
                assert_eq!(OwnerScope::current(), Some(id2));
            }

            // After inner scope drops, outer should be current
            assert_eq!(OwnerScope::current(), Some(id1));
        }

        assert!(OwnerScope::current().is_none());
    }

    #[test]
    fn sampling_keeps_owner() {
        let id = NodeId::new();
        let _outer = OwnerScope::enter(Some(id), false);

        {
            let _sample = OwnerScope::sampling();
            assert!(OwnerScope::is_sampling());
            assert_eq!(OwnerScope::current(), Some(id));

            // A reaction running inside the sampled region tracks again
            let _run = OwnerScope::enter(Some(NodeId::new()), false);
            assert!(!OwnerScope::is_sampling());
        }

        assert!(!OwnerScope::is_sampling());
    }

    #[test]
    fn scope_restores_after_panic() {
        let id = NodeId::new();
        let result = std::panic::catch_unwind(|| {
            let _scope = OwnerScope::enter(Some(id), true);
            panic!("body failed");
        });

        assert!(result.is_err());
        assert!(OwnerScope::current().is_none());
        assert!(!OwnerScope::is_sampling());
    }
}
