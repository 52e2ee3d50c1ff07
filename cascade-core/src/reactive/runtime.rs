//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, computeds
//! and effects. It owns the graph arena and implements change propagation.
//!
//! # How It Works
//!
//! A write to a signal walks its observers twice:
//!
//! 1. Stale: every reaction reachable from the signal bumps its dirty
//!    counter. A reaction forwards the stale notification downstream only
//!    on its first one (counter 0 -> 1), so a diamond notifies its shared
//!    descendant once per path but propagates beyond it only once.
//!
//! 2. Unstale: each path delivers a matching unstale. When a reaction's
//!    counter drops back to zero it either re-runs (something upstream
//!    actually changed) or releases its own observers without running.
//!
//! Every stale is paired with exactly one unstale, which is what makes the
//! shared descendant of a diamond run exactly once, after all of its
//! inputs have settled.
//!
//! Reads keep the graph pull-consistent: reading the output of a computed
//! whose counter is non-zero refreshes it synchronously first.
//!
//! # Thread Safety
//!
//! The runtime is thread-local. Each thread gets its own graph and owner
//! context, and handles are `!Send`, so nodes can never be shared across
//! runtimes.
//!
//! # Borrowing
//!
//! User code (bodies, cleanups, error handlers) is never invoked while the
//! graph is borrowed. Anything that may own user closures is moved out of
//! the arena first and dropped after the borrow ends.

use std::cell::{Cell, RefCell};
use std::mem;

use indexmap::IndexMap;
use tracing::{debug, error, trace, warn};

use super::context::OwnerScope;
use crate::error::EvalError;
use crate::graph::{
    Cleanup, DisposalToken, ErrorHandler, Graph, NodeId, ReactionKind, ReactionNode, RunFn,
    RunState, SignalNode,
};

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

/// A write deferred by an open batch.
pub(crate) trait PendingWrite {
    /// The signal being written.
    fn signal(&self) -> NodeId;

    /// Whether the queued value differs from the installed one.
    fn is_fresh(&self) -> bool;

    /// Install the queued value without propagating.
    fn install(self: Box<Self>);
}

/// Latest queued write per signal, in first-queued order.
pub(crate) type PendingWrites = IndexMap<NodeId, Box<dyn PendingWrite>>;

/// The per-thread reactive runtime.
pub(crate) struct Runtime {
    graph: RefCell<Graph>,

    /// Token inherited by nodes created outside any root. Never disposed.
    default_token: DisposalToken,

    /// Open batch, if any.
    pending: RefCell<Option<PendingWrites>>,

    /// First unhandled evaluation error of the current episode.
    unhandled: RefCell<Option<EvalError>>,

    /// Number of open propagation episodes.
    episodes: Cell<usize>,
}

impl Runtime {
    fn new() -> Self {
        Self {
            graph: RefCell::new(Graph::new()),
            default_token: DisposalToken::new(),
            pending: RefCell::new(None),
            unhandled: RefCell::new(None),
            episodes: Cell::new(0),
        }
    }

    /// Run `f` against this thread's runtime.
    pub fn with<R>(f: impl FnOnce(&Runtime) -> R) -> R {
        RUNTIME.with(f)
    }

    /// Like [`Runtime::with`], but tolerates thread teardown.
    pub fn try_with<R>(f: impl FnOnce(&Runtime) -> R) -> Option<R> {
        RUNTIME.try_with(f).ok()
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    /// Token of the current owner, or the thread-wide default.
    fn ambient_token(&self) -> DisposalToken {
        OwnerScope::current()
            .and_then(|owner| self.graph.borrow().reaction(owner).map(|n| n.token.clone()))
            .unwrap_or_else(|| self.default_token.clone())
    }

    pub fn create_signal(&self, id: NodeId, parent: Option<NodeId>) {
        let token = self.ambient_token();
        self.graph
            .borrow_mut()
            .insert_signal(id, SignalNode::new(parent, token));
        trace!(signal = %id, ?parent, "signal created");
    }

    /// Insert a reaction owned by the current owner.
    ///
    /// Roots mint a fresh token and are not adopted: they record their
    /// creator only so error handlers above them stay reachable.
    pub fn create_reaction(&self, id: NodeId, kind: ReactionKind, run: Option<RunFn>) {
        let parent = OwnerScope::current();
        let token = if kind.is_root() {
            DisposalToken::new()
        } else {
            self.ambient_token()
        };

        let mut graph = self.graph.borrow_mut();
        graph.insert_reaction(id, ReactionNode::new(kind, run, parent, token));
        if let Some(parent) = parent.filter(|_| !kind.is_root()) {
            graph.adopt(parent, id);
        }
        debug!(reaction = %id, ?kind, ?parent, "reaction created");
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Register a read of `signal` and bring it up to date.
    ///
    /// Returns an unhandled error from a pull refresh when no episode is
    /// open to receive it.
    pub fn observe(&self, signal: NodeId) -> Option<EvalError> {
        let stale_parent = {
            let mut graph = self.graph.borrow_mut();
            let node = graph.signal(signal)?;
            if !node.is_live() {
                return None;
            }
            let parent = node.parent;

            if !OwnerScope::is_sampling() {
                if let Some(owner) = OwnerScope::current() {
                    let tracks = graph.reaction(owner).is_some_and(|n| !n.kind.is_root());
                    if tracks && graph.link(signal, owner) {
                        trace!(signal = %signal, reaction = %owner, "dependency registered");
                    }
                }
            }

            parent.filter(|id| {
                graph
                    .reaction(*id)
                    .is_some_and(|n| n.is_live() && n.is_dirty())
            })
        };

        let parent = stale_parent?;
        let ((), err) = self.episode(|| self.refresh(parent));
        let err = err?;
        if self.episodes.get() > 0 {
            self.report(err);
            None
        } else {
            Some(err)
        }
    }

    /// The current owner, if it accepts cleanups and error handlers.
    ///
    /// Roots are pure disposal scopes and accept neither.
    fn accepting_owner(&self) -> Option<NodeId> {
        let owner = OwnerScope::current()?;
        let graph = self.graph.borrow();
        let node = graph.reaction(owner)?;
        let accepts = !node.kind.is_root() && !node.disposed;
        accepts.then_some(owner)
    }

    pub fn register_cleanup(&self, cleanup: Cleanup) {
        let Some(owner) = self.accepting_owner() else {
            trace!("cleanup registered outside a reaction, ignored");
            return;
        };
        if let Some(node) = self.graph.borrow_mut().reaction_mut(owner) {
            node.cleanups.push(cleanup);
        }
    }

    pub fn register_error_handler(&self, handler: ErrorHandler) {
        let Some(owner) = self.accepting_owner() else {
            trace!("error handler registered outside a reaction, ignored");
            return;
        };
        if let Some(node) = self.graph.borrow_mut().reaction_mut(owner) {
            node.error_handlers.push(handler);
        }
    }

    // ------------------------------------------------------------------------
    // Propagation
    // ------------------------------------------------------------------------

    pub fn stale_signal(&self, signal: NodeId, fresh: bool) {
        let observers = {
            let graph = self.graph.borrow();
            match graph.signal(signal) {
                Some(node) if node.is_live() => node.observers.snapshot(),
                _ => return,
            }
        };
        for observer in observers {
            self.stale_reaction(observer, fresh);
        }
    }

    pub fn unstale_signal(&self, signal: NodeId, fresh: bool) {
        let observers = {
            let graph = self.graph.borrow();
            match graph.signal(signal) {
                Some(node) if node.is_live() => node.observers.snapshot(),
                _ => return,
            }
        };
        for observer in observers {
            self.unstale_reaction(observer, fresh);
        }
    }

    fn stale_reaction(&self, id: NodeId, fresh: bool) {
        let forward = {
            let mut graph = self.graph.borrow_mut();
            let Some(node) = graph.reaction_mut(id) else {
                return;
            };
            if !node.is_live() {
                return;
            }
            node.dirty_count += 1;
            node.dirty_fresh |= fresh;
            if node.dirty_count > 1 {
                return;
            }
            node.kind.output()
        };

        trace!(reaction = %id, fresh, "stale");

        // Downstream freshness is decided by the computed's own output
        // comparison once it settles.
        if let Some(output) = forward {
            self.stale_signal(output, false);
        }
    }

    fn unstale_reaction(&self, id: NodeId, fresh: bool) {
        let (changed, output) = {
            let mut graph = self.graph.borrow_mut();
            let Some(node) = graph.reaction_mut(id) else {
                return;
            };
            // A zero counter here means a pull refresh already settled it.
            if !node.is_live() || node.dirty_count == 0 {
                return;
            }
            node.dirty_count -= 1;
            node.dirty_fresh |= fresh;
            if node.dirty_count > 0 {
                return;
            }
            (mem::take(&mut node.dirty_fresh), node.kind.output())
        };

        trace!(reaction = %id, changed, "unstale");

        if changed {
            self.update(id);
        } else if let Some(output) = output {
            self.unstale_signal(output, false);
        }
    }

    /// Pull-refresh a dirty computed, discarding its in-flight notifications.
    fn refresh(&self, id: NodeId) {
        if let Some(node) = self.graph.borrow_mut().reaction_mut(id) {
            node.dirty_count = 0;
            node.dirty_fresh = false;
        }
        trace!(reaction = %id, "pull refresh");
        self.update(id);
    }

    /// Run a reaction's body, re-subscribing from scratch.
    pub fn update(&self, id: NodeId) {
        let (run, first, output) = {
            let mut graph = self.graph.borrow_mut();
            let Some(node) = graph.reaction_mut(id) else {
                return;
            };
            if !node.is_live() {
                return;
            }
            let Some(run) = node.run.clone() else {
                return;
            };
            let first = node.state == RunState::Pending;
            node.state = RunState::Ready;
            (run, first, node.kind.output())
        };

        if !first {
            self.reset(id);
        }

        trace!(reaction = %id, first, "run");

        if let Err(err) = run(id) {
            self.handle_error(id, err);
            // The failed computed never published, so release the
            // observers it staled.
            if let Some(output) = output {
                self.unstale_signal(output, false);
            }
        }
    }

    /// Release dependencies, dispose children and run cleanups.
    fn reset(&self, id: NodeId) {
        let (children, cleanups, handlers) = {
            let mut graph = self.graph.borrow_mut();
            graph.unlink_all(id);
            let Some(node) = graph.reaction_mut(id) else {
                return;
            };
            (
                mem::take(&mut node.children),
                mem::take(&mut node.cleanups),
                mem::take(&mut node.error_handlers),
            )
        };
        drop(handlers);

        let _scope = OwnerScope::enter(None, false);
        for child in children {
            self.dispose_owner(child);
        }
        for cleanup in cleanups {
            cleanup();
        }
    }

    // ------------------------------------------------------------------------
    // Disposal
    // ------------------------------------------------------------------------

    /// Dispose an owner and everything beneath it.
    pub fn dispose_owner(&self, id: NodeId) {
        let (children, cleanups, handlers, release, root_token) = {
            let mut graph = self.graph.borrow_mut();
            let Some(node) = graph.reaction_mut(id) else {
                return;
            };
            if node.disposed {
                return;
            }
            node.disposed = true;
            let release = node.kind.output().map(|output| (output, node.is_dirty()));
            node.dirty_count = 0;
            node.dirty_fresh = false;
            (
                mem::take(&mut node.children),
                mem::take(&mut node.cleanups),
                mem::take(&mut node.error_handlers),
                release,
                node.kind.is_root().then(|| node.token.clone()),
            )
        };
        drop(handlers);

        debug!(owner = %id, children = children.len(), "dispose");

        let _scope = OwnerScope::enter(None, false);
        for child in children {
            self.dispose_owner(child);
        }
        for cleanup in cleanups {
            cleanup();
        }

        let removed = {
            let mut graph = self.graph.borrow_mut();
            graph.unlink_all(id);
            graph.orphan(id);
            graph.remove_reaction(id)
        };

        if let Some((output, dirty)) = release {
            // Observers still waiting on this computed must not stay dirty.
            if dirty {
                self.unstale_signal(output, false);
            }
            self.dispose_signal(output);
        }

        if let Some(token) = root_token {
            token.dispose();
            debug!(root = %id, "root token disposed");
        }

        drop(removed);
    }

    pub fn dispose_signal(&self, id: NodeId) {
        if let Some(node) = self.graph.borrow_mut().signal_mut(id) {
            node.disposed = true;
        }
    }

    /// Free a signal's node once its last handle is gone.
    pub fn release_signal(id: NodeId) {
        let _ = Self::try_with(|rt| {
            let removed = match rt.graph.try_borrow_mut() {
                Ok(mut graph) => graph.remove_signal(id),
                Err(_) => {
                    warn!(signal = %id, "signal dropped while the graph was busy, node leaked");
                    None
                }
            };
            drop(removed);
        });
    }

    // ------------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------------

    fn handle_error(&self, id: NodeId, err: EvalError) {
        let handlers = self.graph.borrow().error_handlers_for(id);
        match handlers {
            Some(handlers) => {
                debug!(reaction = %id, error = %err, "evaluation error handled");
                let _scope = OwnerScope::enter(None, false);
                for handler in handlers {
                    handler(&err);
                }
            }
            None => self.report(err),
        }
    }

    /// Record an unhandled error for the current episode. The first one wins.
    fn report(&self, err: EvalError) {
        if self.episodes.get() == 0 {
            error!(error = %err, "unhandled evaluation error outside any write");
            return;
        }
        let mut slot = self.unhandled.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        } else {
            debug!(error = %err, "additional unhandled error in the same episode");
        }
    }

    /// Run `f` as its own propagation episode, collecting the first
    /// unhandled error it raised. Errors of an enclosing episode are set
    /// aside and restored afterwards.
    pub fn episode<R>(&self, f: impl FnOnce() -> R) -> (R, Option<EvalError>) {
        let guard = Episode::open(self);
        let value = f();
        let err = self.unhandled.borrow_mut().take();
        drop(guard);
        (value, err)
    }

    #[cfg(test)]
    pub fn in_episode(&self) -> bool {
        self.episodes.get() > 0
    }

    // ------------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------------

    pub fn is_batching(&self) -> bool {
        self.pending.borrow().is_some()
    }

    /// Open a batch. Returns `false` if one is already open.
    pub fn open_batch(&self) -> bool {
        let mut pending = self.pending.borrow_mut();
        if pending.is_some() {
            return false;
        }
        *pending = Some(PendingWrites::new());
        true
    }

    /// Close the open batch and hand back its writes.
    pub fn close_batch(&self) -> PendingWrites {
        self.pending.borrow_mut().take().unwrap_or_default()
    }

    /// Queue a write into the open batch. Last write per signal wins but
    /// keeps its first-queued position.
    pub fn queue(&self, write: Box<dyn PendingWrite>) {
        let replaced = match self.pending.borrow_mut().as_mut() {
            Some(pending) => pending.insert(write.signal(), write),
            None => {
                debug_assert!(false, "queue called without an open batch");
                Some(write)
            }
        };
        drop(replaced);
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn signal_is_disposed(&self, id: NodeId) -> bool {
        self.graph.borrow().signal(id).map_or(true, |n| n.disposed)
    }

    pub fn observer_count(&self, id: NodeId) -> usize {
        self.graph.borrow().signal(id).map_or(0, |n| n.observers.len())
    }

    pub fn dependency_count(&self, id: NodeId) -> usize {
        self.graph.borrow().reaction(id).map_or(0, |n| n.dependencies.len())
    }

    pub fn reaction_is_disposed(&self, id: NodeId) -> bool {
        self.graph.borrow().reaction(id).map_or(true, |n| !n.is_live())
    }

    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.graph.borrow().reaction(id).is_some_and(ReactionNode::is_dirty)
    }

    #[cfg(test)]
    pub fn node_counts(&self) -> (usize, usize) {
        let graph = self.graph.borrow();
        (graph.signal_count(), graph.reaction_count())
    }
}

/// Guard for an open episode. Restores the enclosing episode's error slot
/// even if the body unwinds.
struct Episode<'a> {
    runtime: &'a Runtime,
    outer: Option<EvalError>,
}

impl<'a> Episode<'a> {
    fn open(runtime: &'a Runtime) -> Self {
        let outer = runtime.unhandled.borrow_mut().take();
        runtime.episodes.set(runtime.episodes.get() + 1);
        Self { runtime, outer }
    }
}

impl Drop for Episode<'_> {
    fn drop(&mut self) {
        self.runtime.episodes.set(self.runtime.episodes.get() - 1);
        let leftover = self.runtime.unhandled.replace(self.outer.take());
        drop(leftover);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    fn effect_node(rt: &Runtime, runs: Rc<Cell<u32>>, reads: Vec<NodeId>) -> NodeId {
        let id = NodeId::new();
        let run: RunFn = Rc::new(move |me: NodeId| -> std::result::Result<(), EvalError> {
            let _scope = OwnerScope::enter(Some(me), false);
            for signal in &reads {
                Runtime::with(|rt| rt.observe(*signal));
            }
            runs.set(runs.get() + 1);
            Ok(())
        });
        rt.create_reaction(id, ReactionKind::Effect, Some(run));
        id
    }

    #[test]
    fn diamond_counter_runs_shared_reaction_once() {
        Runtime::with(|rt| {
            let (a, b) = (NodeId::new(), NodeId::new());
            rt.create_signal(a, None);
            rt.create_signal(b, None);

            let runs = Rc::new(Cell::new(0));
            let effect = effect_node(rt, runs.clone(), vec![a, b]);
            rt.update(effect);
            assert_eq!(runs.get(), 1);
            assert_eq!(rt.dependency_count(effect), 2);

            rt.stale_signal(a, true);
            rt.stale_signal(b, true);
            assert!(rt.is_dirty(effect));

            rt.unstale_signal(a, true);
            assert_eq!(runs.get(), 1, "must wait for the second path");

            rt.unstale_signal(b, true);
            assert_eq!(runs.get(), 2);
            assert!(!rt.is_dirty(effect));
        });
    }

    #[test]
    fn unchanged_notifications_do_not_rerun() {
        Runtime::with(|rt| {
            let a = NodeId::new();
            rt.create_signal(a, None);
            let runs = Rc::new(Cell::new(0));
            let effect = effect_node(rt, runs.clone(), vec![a]);
            rt.update(effect);

            rt.stale_signal(a, false);
            rt.unstale_signal(a, false);
            assert_eq!(runs.get(), 1);
        });
    }

    #[test]
    fn stray_unstale_is_ignored() {
        Runtime::with(|rt| {
            let a = NodeId::new();
            rt.create_signal(a, None);
            let runs = Rc::new(Cell::new(0));
            let effect = effect_node(rt, runs.clone(), vec![a]);
            rt.update(effect);

            rt.unstale_signal(a, true);
            assert_eq!(runs.get(), 1);
            assert!(!rt.is_dirty(effect));
        });
    }

    #[test]
    fn dispose_releases_edges_and_node() {
        Runtime::with(|rt| {
            let a = NodeId::new();
            rt.create_signal(a, None);
            let effect = effect_node(rt, Rc::new(Cell::new(0)), vec![a]);
            rt.update(effect);
            assert_eq!(rt.observer_count(a), 1);

            rt.dispose_owner(effect);
            assert_eq!(rt.observer_count(a), 0);
            assert!(rt.reaction_is_disposed(effect));

            // Disposing twice is harmless
            rt.dispose_owner(effect);
        });
    }

    #[test]
    fn episodes_isolate_nested_errors() {
        Runtime::with(|rt| {
            let ((), outer) = rt.episode(|| {
                rt.report(EvalError::new("outer"));
                let ((), inner) = rt.episode(|| rt.report(EvalError::new("inner")));
                assert_eq!(inner.map(|e| e.inner().to_string()), Some("inner".into()));
            });
            assert_eq!(outer.map(|e| e.inner().to_string()), Some("outer".into()));
            assert!(!rt.in_episode());
        });
    }

    #[test]
    fn first_unhandled_error_wins() {
        Runtime::with(|rt| {
            let ((), err) = rt.episode(|| {
                rt.report(EvalError::new("first"));
                rt.report(EvalError::new("second"));
            });
            assert_eq!(err.map(|e| e.inner().to_string()), Some("first".into()));
        });
    }

    #[test]
    fn batch_open_close() {
        Runtime::with(|rt| {
            assert!(!rt.is_batching());
            assert!(rt.open_batch());
            assert!(!rt.open_batch());
            assert!(rt.is_batching());
            assert!(rt.close_batch().is_empty());
            assert!(!rt.is_batching());
        });
    }
}
