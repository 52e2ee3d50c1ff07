//! Owners and Roots
//!
//! Every effect and computed is owned by the reaction or root that was
//! current when it was created. Disposing an owner disposes everything it
//! owns, depth first, before running its own cleanups.
//!
//! A root is an owner that is not itself reactive. It never tracks
//! dependencies and only exists to scope disposal: everything created
//! beneath it shares its disposal token, so disposing the root silences
//! the whole subgraph even where handles are still held elsewhere.

use std::rc::Rc;

use super::context::OwnerScope;
use super::runtime::Runtime;
use crate::error::EvalError;
use crate::graph::{NodeId, ReactionKind};

/// Handle to an owner scope.
///
/// Handed to the body of [`create_root`], and returned by
/// [`current_owner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Owner {
    id: NodeId,
}

impl Owner {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Dispose this owner and everything created beneath it.
    pub fn dispose(&self) {
        Runtime::with(|rt| rt.dispose_owner(self.id));
    }

    pub fn is_disposed(&self) -> bool {
        Runtime::with(|rt| rt.reaction_is_disposed(self.id))
    }
}

/// Run `body` inside a new root and return its result.
///
/// The root stays alive until it is disposed through the [`Owner`] handed
/// to `body`. It is not disposed along with the owner that created it.
///
/// ```rust
/// use cascade_core::{create_root, Effect, Signal};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let count = Signal::new(0);
/// let runs = Rc::new(Cell::new(0));
///
/// let root = create_root(|root| {
///     let (count, runs) = (count.clone(), runs.clone());
///     Effect::new(move || {
///         count.get();
///         runs.set(runs.get() + 1);
///     });
///     root
/// });
///
/// count.set(1).unwrap();
/// assert_eq!(runs.get(), 2);
///
/// root.dispose();
/// count.set(2).unwrap();
/// assert_eq!(runs.get(), 2);
/// ```
pub fn create_root<R>(body: impl FnOnce(Owner) -> R) -> R {
    let id = NodeId::new();
    Runtime::with(|rt| rt.create_reaction(id, ReactionKind::Root, None));

    let _scope = OwnerScope::enter(Some(id), false);
    body(Owner { id })
}

/// Dispose an owner. Same as [`Owner::dispose`].
pub fn dispose(owner: &Owner) {
    owner.dispose();
}

/// The owner currently running, if any.
pub fn current_owner() -> Option<Owner> {
    OwnerScope::current().map(|id| Owner { id })
}

/// Run `f` without registering dependencies.
///
/// The current owner is unchanged, so cleanups and error handlers
/// registered inside still attach to it.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _scope = OwnerScope::sampling();
    f()
}

/// Register a callback to run before the current reaction re-runs, and
/// when it is disposed.
///
/// Ignored outside a reaction, and directly inside a root.
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    Runtime::with(|rt| rt.register_cleanup(Box::new(f)));
}

/// Register a handler for errors raised by the current reaction or
/// anything it owns.
///
/// Handlers are cleared when the reaction re-runs. Ignored outside a
/// reaction, and directly inside a root.
pub fn on_error(f: impl Fn(&EvalError) + 'static) {
    Runtime::with(|rt| rt.register_error_handler(Rc::new(f)));
}
