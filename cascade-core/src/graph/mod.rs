//! Dependency Graph
//!
//! This module implements the arena that stores the reactive graph.
//!
//! # Overview
//!
//! The graph has two kinds of nodes:
//!
//! - Signal nodes: value cells. Each knows its observers and, if it is the
//!   output of a computed, the computed that produces it.
//! - Reaction nodes: effects, computeds and roots. Each knows the signals it
//!   read during its last run, its dirty counter, and its place in the
//!   owner tree.
//!
//! Edges are kept in both directions so a reaction can release all of its
//! subscriptions before re-running, and a signal can notify its observers
//! without a global lookup.
//!
//! # Design Decisions
//!
//! 1. Nodes are addressed by [`NodeId`] rather than by reference. Signals
//!    never own the reactions that observe them, so there are no reference
//!    cycles between mutually dependent nodes.
//!
//! 2. The graph holds structure only. Typed values stay in the handles,
//!    which keeps the arena free of `dyn Any` downcasts.
//!
//! 3. Disposal walks children depth-first by id.

mod arena;
mod node;

pub use arena::Graph;
pub use node::{
    Cleanup, DisposalToken, ErrorHandler, NodeId, Observers, ReactionKind, ReactionNode, RunFn,
    RunState, SignalNode,
};
