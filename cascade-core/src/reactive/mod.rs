//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computeds,
//! effects, owners and batches.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a running reaction (a computed or effect), the signal registers
//! that reaction as an observer. When the value changes, observers are
//! notified.
//!
//! ## Computeds
//!
//! A Computed is a derived value. It re-evaluates only when one of its
//! dependencies changes, and notifies its own observers only when the
//! result is different.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! ## Owners
//!
//! Every reaction is owned by whatever was running when it was created.
//! Disposing an owner disposes everything it owns. Roots are owners that
//! exist only to scope disposal.
//!
//! # Implementation Notes
//!
//! Change propagation is two-phase (stale, then unstale) with a dirty
//! counter per reaction, which keeps updates glitch-free: a reaction never
//! runs while one of its inputs is still settling, and runs at most once
//! per write. See [`runtime`](self::runtime) for details.

mod batch;
mod computed;
mod context;
mod effect;
mod owner;
mod runtime;
mod signal;

pub use batch::{batch, is_batching};
pub use computed::Computed;
pub use effect::Effect;
pub use owner::{create_root, current_owner, dispose, on_cleanup, on_error, untrack, Owner};
pub use signal::{Comparator, Signal, SignalOptions};
