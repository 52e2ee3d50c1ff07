//! Cascade Core
//!
//! A fine-grained reactive engine. It provides:
//!
//! - Signals: observable value cells
//! - Computeds: cached derivations that re-run only when an input changed
//! - Effects: side-effecting reactions
//! - Owners and roots: scoped, cascading disposal
//! - Batches: deferred, coalesced writes
//!
//! Propagation is synchronous and glitch-free. For a diamond
//! `s -> (a, b) -> c`, a write to `s` re-runs `c` exactly once, after both
//! `a` and `b` have settled.
//!
//! # Architecture
//!
//! - `reactive`: the public primitives and the propagation runtime
//! - `graph`: the node arena that records dependency and ownership edges
//! - `error`: error types surfaced by writes, batches and constructors
//!
//! The runtime is thread-local. Handles are `!Send` and every thread works
//! on its own independent graph.
//!
//! # Example
//!
//! ```rust
//! use cascade_core::{Computed, Effect, Signal};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let doubled = Computed::new({
//!     let count = count.clone();
//!     move |_| count.get() * 2
//! });
//!
//! // Create an effect
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let _effect = Effect::new({
//!     let (count, doubled, log) = (count.clone(), doubled.clone(), log.clone());
//!     move || log.borrow_mut().push(format!("{} {}", count.get(), doubled.get()))
//! });
//!
//! // Update the signal
//! count.set(5).unwrap();
//! assert_eq!(*log.borrow(), vec!["0 0", "5 10"]);
//! ```

pub mod error;
pub mod graph;
pub mod reactive;

pub use error::{Error, EvalError, Result};
pub use graph::NodeId;
pub use reactive::{
    batch, create_root, current_owner, dispose, is_batching, on_cleanup, on_error, untrack,
    Comparator, Computed, Effect, Owner, Signal, SignalOptions,
};
