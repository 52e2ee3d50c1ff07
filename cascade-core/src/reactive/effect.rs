//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect re-runs once every upstream
//!    path has settled.
//!
//! 3. Before re-running, the effect releases its old dependencies, disposes
//!    reactions it created during the previous run and runs its cleanups.
//!    Dependencies are then tracked again from scratch, so they may differ
//!    from one run to the next.
//!
//! # Cleanup
//!
//! Cleanups are registered from inside the body with
//! [`on_cleanup`](crate::on_cleanup). They run before the next run and when
//! the effect is disposed.

use std::rc::Rc;

use tracing::error;

use super::context::OwnerScope;
use super::runtime::Runtime;
use crate::error::{Error, EvalError, Result};
use crate::graph::{NodeId, ReactionKind, RunFn};

/// A side-effecting computation that runs when dependencies change.
///
/// Effects stay alive after the handle is dropped. They are disposed by
/// their owner or by [`Effect::dispose`].
///
/// # Example
///
/// ```rust
/// use cascade_core::{Effect, Signal};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let count = Signal::new(0);
/// let seen = Rc::new(Cell::new(-1));
///
/// let _effect = Effect::new({
///     let (count, seen) = (count.clone(), seen.clone());
///     move || seen.set(count.get())
/// });
/// assert_eq!(seen.get(), 0);
///
/// count.set(5).unwrap();
/// assert_eq!(seen.get(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct Effect {
    id: NodeId,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + 'static,
    {
        let (effect, err) = Self::build(move || {
            run();
            Ok(())
        });
        if let Some(err) = err {
            error!(effect = %effect.id, error = %err, "unhandled error during first run");
        }
        effect
    }

    /// Create an effect from a fallible body.
    ///
    /// Errors are routed to the nearest error handler. If the first run
    /// fails and nothing handles it, the effect is disposed and the error
    /// is returned.
    pub fn try_new<F, E>(run: F) -> Result<Self>
    where
        F: Fn() -> std::result::Result<(), E> + 'static,
        E: Into<Box<dyn std::error::Error + 'static>>,
    {
        let (effect, err) = Self::build(move || run().map_err(EvalError::new));
        match err {
            Some(err) => {
                effect.dispose();
                Err(Error::Evaluation(err))
            }
            None => Ok(effect),
        }
    }

    fn build<F>(body: F) -> (Self, Option<EvalError>)
    where
        F: Fn() -> std::result::Result<(), EvalError> + 'static,
    {
        let id = NodeId::new();
        let run: RunFn = Rc::new(move |me: NodeId| -> std::result::Result<(), EvalError> {
            let _scope = OwnerScope::enter(Some(me), false);
            body()
        });

        let ((), err) = Runtime::with(|rt| {
            rt.create_reaction(id, ReactionKind::Effect, Some(run));
            rt.episode(|| rt.update(id))
        });

        (Self { id }, err)
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Dispose of the effect.
    ///
    /// Runs its cleanups and nested disposals; the effect will not run
    /// again.
    pub fn dispose(&self) {
        Runtime::with(|rt| rt.dispose_owner(self.id));
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        Runtime::with(|rt| rt.reaction_is_disposed(self.id))
    }

    /// Get the number of signals read during the last run.
    pub fn dependency_count(&self) -> usize {
        Runtime::with(|rt| rt.dependency_count(self.id))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::reactive::owner::on_cleanup;
    use crate::reactive::signal::Signal;

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Rc::new(Cell::new(0));
        let run_count_clone = run_count.clone();

        let _effect = Effect::new(move || {
            run_count_clone.set(run_count_clone.get() + 1);
        });

        // Effect should have run once on creation
        assert_eq!(run_count.get(), 1);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let signal = Signal::new(0);
        let observed = Rc::new(Cell::new(-1));

        let effect = Effect::new({
            let (signal, observed) = (signal.clone(), observed.clone());
            move || observed.set(signal.get())
        });
        assert_eq!(effect.dependency_count(), 1);

        signal.set(42).unwrap();
        assert_eq!(observed.get(), 42);
    }

    #[test]
    fn equal_write_does_not_rerun() {
        let signal = Signal::new(1);
        let runs = Rc::new(Cell::new(0));

        let _effect = Effect::new({
            let (signal, runs) = (signal.clone(), runs.clone());
            move || {
                signal.get();
                runs.set(runs.get() + 1);
            }
        });

        signal.set(1).unwrap();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let signal = Signal::new(0);
        let run_count = Rc::new(Cell::new(0));

        let effect = Effect::new({
            let (signal, run_count) = (signal.clone(), run_count.clone());
            move || {
                signal.get();
                run_count.set(run_count.get() + 1);
            }
        });

        // Ran once on creation
        assert_eq!(run_count.get(), 1);

        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(signal.observer_count(), 0);

        signal.set(1).unwrap();
        signal.set(2).unwrap();
        assert_eq!(run_count.get(), 1);
    }

    #[test]
    fn cleanups_run_before_rerun_and_on_dispose() {
        let signal = Signal::new(0);
        let log = Rc::new(std::cell::RefCell::new(Vec::new()));

        let effect = Effect::new({
            let (signal, log) = (signal.clone(), log.clone());
            move || {
                let value = signal.get();
                log.borrow_mut().push(format!("run {value}"));
                let log = log.clone();
                on_cleanup(move || log.borrow_mut().push(format!("cleanup {value}")));
            }
        });

        signal.set(1).unwrap();
        effect.dispose();

        assert_eq!(
            *log.borrow(),
            vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]
        );
    }

    #[test]
    fn effect_writing_its_own_dependency_settles() {
        let signal = Signal::new(0);
        let runs = Rc::new(Cell::new(0));

        let _effect = Effect::new({
            let (signal, runs) = (signal.clone(), runs.clone());
            move || {
                runs.set(runs.get() + 1);
                let value = signal.get();
                if value < 3 {
                    signal.set(value + 1).unwrap();
                }
            }
        });

        assert_eq!(signal.get(), 3);
        assert_eq!(runs.get(), 4);
    }

    #[test]
    fn try_new_returns_unhandled_error() {
        let result = Effect::try_new(|| Err("setup failed"));
        assert!(matches!(result, Err(Error::Evaluation(_))));
    }
}
