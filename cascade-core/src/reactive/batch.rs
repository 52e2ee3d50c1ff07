//! Batching
//!
//! A batch defers signal writes until it ends, then applies them all in a
//! single propagation pass. Reactions that depend on several written
//! signals run once per batch, and never see a value that was overwritten
//! inside the same batch.
//!
//! Nested batches collapse into the outermost one. Writes to the same
//! signal keep only the latest value, at the position of the first write.

use tracing::debug;

use super::runtime::{PendingWrite, PendingWrites, Runtime};
use crate::error::{Error, EvalError, Result};
use crate::graph::NodeId;

/// Run `f` with signal writes deferred until it returns.
///
/// Returns `f`'s result once the writes have been applied, or the first
/// unhandled error raised by a reaction during the flush. Inside another
/// batch this simply runs `f`.
///
/// # Example
///
/// ```rust
/// use cascade_core::{batch, Effect, Signal};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let a = Signal::new(1);
/// let b = Signal::new(2);
/// let runs = Rc::new(Cell::new(0));
///
/// let _effect = Effect::new({
///     let (a, b, runs) = (a.clone(), b.clone(), runs.clone());
///     move || {
///         let _ = a.get() + b.get();
///         runs.set(runs.get() + 1);
///     }
/// });
///
/// batch(|| {
///     a.set(10).unwrap();
///     b.set(20).unwrap();
/// })
/// .unwrap();
///
/// // Ran once on creation, once for the whole batch
/// assert_eq!(runs.get(), 2);
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> Result<R> {
    if !Runtime::with(|rt| rt.open_batch()) {
        return Ok(f());
    }

    let guard = BatchGuard { armed: true };
    let value = f();
    let writes = guard.close();

    match flush(writes) {
        Some(err) => Err(Error::Evaluation(err)),
        None => Ok(value),
    }
}

/// Check if a batch is currently open.
pub fn is_batching() -> bool {
    Runtime::with(|rt| rt.is_batching())
}

/// Closes the batch if the body unwinds, dropping its queued writes.
struct BatchGuard {
    armed: bool,
}

impl BatchGuard {
    fn close(mut self) -> PendingWrites {
        self.armed = false;
        Runtime::with(|rt| rt.close_batch())
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if self.armed {
            let discarded = Runtime::try_with(|rt| rt.close_batch());
            debug!(
                writes = discarded.as_ref().map_or(0, PendingWrites::len),
                "batch abandoned, queued writes discarded"
            );
        }
    }
}

/// Apply queued writes: stale every changed signal, install every value,
/// then release them in first-queued order.
fn flush(writes: PendingWrites) -> Option<EvalError> {
    Runtime::with(|rt| {
        let queued = writes.len();
        let fresh: Vec<Box<dyn PendingWrite>> = writes
            .into_values()
            .filter(|write| !rt.signal_is_disposed(write.signal()) && write.is_fresh())
            .collect();
        let ids: Vec<NodeId> = fresh.iter().map(|write| write.signal()).collect();

        debug!(queued, fresh = ids.len(), "batch flush");
        if ids.is_empty() {
            return None;
        }

        let ((), err) = rt.episode(|| {
            for id in &ids {
                rt.stale_signal(*id, true);
            }
            for write in fresh {
                write.install();
            }
            for id in &ids {
                rt.unstale_signal(*id, true);
            }
        });
        err
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;
    use crate::reactive::computed::Computed;
    use crate::reactive::effect::Effect;
    use crate::reactive::signal::Signal;

    #[test]
    fn is_batching_tracks_scope() {
        assert!(!is_batching());
        batch(|| assert!(is_batching())).unwrap();
        assert!(!is_batching());
    }

    #[test]
    fn writes_are_deferred_until_the_batch_ends() {
        let signal = Signal::new(1);
        batch(|| {
            signal.set(2).unwrap();
            assert_eq!(signal.get(), 1);
        })
        .unwrap();
        assert_eq!(signal.get(), 2);
    }

    #[test]
    fn last_write_wins() {
        let signal = Signal::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let _effect = Effect::new({
            let (signal, seen) = (signal.clone(), seen.clone());
            move || seen.borrow_mut().push(signal.get())
        });

        batch(|| {
            signal.set(10).unwrap();
            signal.set(20).unwrap();
        })
        .unwrap();

        assert_eq!(*seen.borrow(), vec![0, 20]);
    }

    #[test]
    fn nested_batches_flush_once_at_the_outermost() {
        let a = Signal::new(0);
        let b = Signal::new(0);
        let runs = Rc::new(Cell::new(0));

        let _effect = Effect::new({
            let (a, b, runs) = (a.clone(), b.clone(), runs.clone());
            move || {
                let _ = a.get() + b.get();
                runs.set(runs.get() + 1);
            }
        });

        let result = batch(|| {
            a.set(1).unwrap();
            batch(|| b.set(2).unwrap()).unwrap();
            assert_eq!(runs.get(), 1);
            "done"
        });

        assert_eq!(result.unwrap(), "done");
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn write_restoring_the_original_value_is_not_a_change() {
        let signal = Signal::new(5);
        let runs = Rc::new(Cell::new(0));

        let _effect = Effect::new({
            let (signal, runs) = (signal.clone(), runs.clone());
            move || {
                signal.get();
                runs.set(runs.get() + 1);
            }
        });

        batch(|| {
            signal.set(6).unwrap();
            signal.set(5).unwrap();
        })
        .unwrap();

        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn computed_sees_all_batched_writes_at_once() {
        let first = Signal::new(String::from("Ada"));
        let last = Signal::new(String::from("Lovelace"));
        let full = Computed::new({
            let (first, last) = (first.clone(), last.clone());
            move |_: &String| format!("{} {}", first.get(), last.get())
        });
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _effect = Effect::new({
            let (full, seen) = (full.clone(), seen.clone());
            move || seen.borrow_mut().push(full.get())
        });

        batch(|| {
            first.set("Grace".into()).unwrap();
            last.set("Hopper".into()).unwrap();
        })
        .unwrap();

        assert_eq!(*seen.borrow(), vec!["Ada Lovelace", "Grace Hopper"]);
    }

    #[test]
    fn disposed_signal_fails_inside_batch() {
        let signal = Signal::new(0);
        signal.dispose();
        let result = batch(|| signal.set(1)).unwrap();
        assert!(matches!(result, Err(Error::Disposed)));
    }

    #[test]
    fn panicking_body_discards_queued_writes() {
        let signal = Signal::new(0);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            batch(|| {
                signal.set(1).unwrap();
                panic!("body failed");
            })
        }));

        assert!(outcome.is_err());
        assert!(!is_batching());
        assert_eq!(signal.get(), 0);

        // Writes propagate normally afterwards
        signal.set(2).unwrap();
        assert_eq!(signal.get(), 2);
    }

    #[test]
    fn flush_error_is_returned() {
        let signal = Signal::new(0);
        let _effect = Effect::try_new({
            let signal = signal.clone();
            move || {
                if signal.get() > 0 {
                    Err("positive")
                } else {
                    Ok(())
                }
            }
        })
        .unwrap();

        let result = batch(|| signal.set(1).unwrap());
        assert!(matches!(result, Err(Error::Evaluation(_))));
    }
}
