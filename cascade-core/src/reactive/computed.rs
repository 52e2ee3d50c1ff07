//! Computed Implementation
//!
//! A Computed is a derived value. It wraps a derivation function and
//! republishes its result through an output signal that it owns.
//!
//! # How Computeds Work
//!
//! 1. On construction the derivation runs immediately, so the first read
//!    already sees a derived value.
//!
//! 2. When an upstream signal changes, the computed is marked stale and
//!    forwards the stale mark to its own observers.
//!
//! 3. Once every upstream path has settled, the computed re-runs (only if
//!    something actually changed) and publishes the result. Observers are
//!    released with the freshness of the published value, so a computed
//!    that lands on an equal result stops propagation there.
//!
//! 4. A read of a computed that is still stale refreshes it on the spot.
//!
//! The derivation receives the previous output value.

use std::fmt::{self, Debug};
use std::rc::Rc;

use tracing::error;

use super::context::OwnerScope;
use super::runtime::Runtime;
use super::signal::{Comparator, Signal, SignalOptions};
use crate::error::{Error, EvalError, Result};
use crate::graph::{NodeId, ReactionKind, RunFn};

/// A read-only derived value.
///
/// # Example
///
/// ```rust
/// use cascade_core::{Computed, Signal};
///
/// let a = Signal::new(1);
/// let b = Signal::new(2);
///
/// let sum = Computed::new({
///     let (a, b) = (a.clone(), b.clone());
///     move |_| a.get() + b.get()
/// });
/// assert_eq!(sum.get(), 3);
///
/// a.set(5).unwrap();
/// assert_eq!(sum.get(), 7);
/// ```
pub struct Computed<T: 'static> {
    id: NodeId,
    output: Signal<T>,
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Create a computed whose output starts at `T::default()`.
    ///
    /// The placeholder is only observable from inside the first run.
    pub fn new<F>(derive: F) -> Self
    where
        T: Default,
        F: Fn(&T) -> T + 'static,
    {
        Self::with_initial(T::default(), derive)
    }

    /// Create a computed with an explicit initial value, handed to the
    /// first run as its previous value.
    pub fn with_initial<F>(initial: T, derive: F) -> Self
    where
        F: Fn(&T) -> T + 'static,
    {
        Self::with_options(initial, SignalOptions::new(), derive)
    }

    /// Create a computed whose output uses the given options.
    pub fn with_options<F>(initial: T, options: SignalOptions<T>, derive: F) -> Self
    where
        F: Fn(&T) -> T + 'static,
    {
        let (computed, err) = Self::build(initial, options, move |prev| Ok(derive(prev)));
        if let Some(err) = err {
            error!(computed = %computed.id, error = %err, "unhandled error during first run");
        }
        computed
    }

    /// Create a computed from a fallible derivation.
    ///
    /// An error from any run is routed to the nearest error handler. If the
    /// first run fails and nothing handles it, the computed is disposed and
    /// the error is returned.
    pub fn try_new<F, E>(initial: T, derive: F) -> Result<Self>
    where
        F: Fn(&T) -> std::result::Result<T, E> + 'static,
        E: Into<Box<dyn std::error::Error + 'static>>,
    {
        let (computed, err) = Self::build(initial, SignalOptions::new(), move |prev| {
            derive(prev).map_err(EvalError::new)
        });
        match err {
            Some(err) => {
                computed.dispose();
                Err(Error::Evaluation(err))
            }
            None => Ok(computed),
        }
    }

    fn build<F>(initial: T, options: SignalOptions<T>, derive: F) -> (Self, Option<EvalError>)
    where
        F: Fn(&T) -> std::result::Result<T, EvalError> + 'static,
    {
        let id = NodeId::new();
        let equals: Comparator<T> = options
            .into_comparator()
            .unwrap_or_else(|| Rc::new(|a: &T, b: &T| a == b));
        let output = Signal::for_computed(initial, equals, id);

        let run: RunFn = {
            let output = output.clone();
            Rc::new(move |me: NodeId| -> std::result::Result<(), EvalError> {
                let prev = output.snapshot();
                let next = {
                    let _scope = OwnerScope::enter(Some(me), false);
                    derive(&*prev)?
                };
                output.publish(next);
                Ok(())
            })
        };

        let ((), err) = Runtime::with(|rt| {
            rt.create_reaction(id, ReactionKind::Computed { output: output.id() }, Some(run));
            rt.episode(|| rt.update(id))
        });

        (Self { id, output }, err)
    }

    /// Get the current value, registering a dependency if inside a reaction.
    pub fn get(&self) -> T {
        self.output.get()
    }

    /// Like [`Computed::get`], surfacing an unhandled refresh error.
    pub fn try_get(&self) -> Result<T> {
        self.output.try_get()
    }

    /// Get the current value without registering a dependency.
    ///
    /// A dirty computed is still refreshed first.
    pub fn get_untracked(&self) -> T {
        self.output.get_untracked()
    }

    /// Borrow the current value. `f` may write any signal, including
    /// this computed's inputs.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.output.with(f)
    }

    /// Get the computed's unique ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Dispose of the computed. Its last value stays readable.
    pub fn dispose(&self) {
        Runtime::with(|rt| rt.dispose_owner(self.id));
    }

    pub fn is_disposed(&self) -> bool {
        Runtime::with(|rt| rt.reaction_is_disposed(self.id))
    }

    /// Whether the computed has pending stale notifications.
    pub fn is_dirty(&self) -> bool {
        Runtime::with(|rt| rt.is_dirty(self.id))
    }

    /// Get the number of signals read during the last run.
    pub fn dependency_count(&self) -> usize {
        Runtime::with(|rt| rt.dependency_count(self.id))
    }

    /// Get the number of reactions observing this computed.
    pub fn observer_count(&self) -> usize {
        self.output.observer_count()
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            output: self.output.clone(),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.id)
            .field("value", &*self.output.peek())
            .field("dirty", &self.is_dirty())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
