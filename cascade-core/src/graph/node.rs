//! Graph Nodes
//!
//! This module defines the node types that live in the reactive arena.
//! Nodes only hold structure (edges, counters, owner links). Typed values
//! live in the signal handles, so the arena never needs to know `T`.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::error::EvalError;

/// Unique identifier for a node in the reactive graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shared kill switch minted by a root.
///
/// Every signal and reaction created beneath a root keeps a clone. Once the
/// root is disposed the whole subgraph stops registering and propagating,
/// even if user code still holds handles into it.
#[derive(Clone, Default)]
pub struct DisposalToken(Rc<Cell<bool>>);

impl DisposalToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispose(&self) {
        self.0.set(true);
    }

    pub fn is_disposed(&self) -> bool {
        self.0.get()
    }

    pub fn ptr_eq(&self, other: &DisposalToken) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for DisposalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DisposalToken").field(&self.is_disposed()).finish()
    }
}

/// Observer storage for a signal.
///
/// Most signals have zero or one observer, so the single case is stored
/// inline and a set is only allocated on the second registration. Once
/// promoted the set is kept even if it drains back down to one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Observers {
    #[default]
    None,
    One(NodeId),
    Many(IndexSet<NodeId>),
}

impl Observers {
    /// Add an observer. Returns `true` if it was not registered yet.
    pub fn insert(&mut self, id: NodeId) -> bool {
        match self {
            Observers::None => {
                *self = Observers::One(id);
                true
            }
            Observers::One(existing) if *existing == id => false,
            Observers::One(existing) => {
                let mut set = IndexSet::with_capacity(2);
                set.insert(*existing);
                set.insert(id);
                *self = Observers::Many(set);
                true
            }
            Observers::Many(set) => set.insert(id),
        }
    }

    /// Remove an observer. Returns `true` if it was registered.
    pub fn remove(&mut self, id: NodeId) -> bool {
        match self {
            Observers::One(existing) if *existing == id => {
                *self = Observers::None;
                true
            }
            Observers::Many(set) => set.shift_remove(&id),
            _ => false,
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        match self {
            Observers::None => false,
            Observers::One(existing) => *existing == id,
            Observers::Many(set) => set.contains(&id),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Observers::None => 0,
            Observers::One(_) => 1,
            Observers::Many(set) => set.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the current observers out so they can be notified without
    /// holding a borrow of the graph.
    pub fn snapshot(&self) -> SmallVec<[NodeId; 4]> {
        match self {
            Observers::None => SmallVec::new(),
            Observers::One(id) => smallvec::smallvec![*id],
            Observers::Many(set) => set.iter().copied().collect(),
        }
    }
}

/// Structural half of a signal.
#[derive(Debug)]
pub struct SignalNode {
    /// The computed that publishes through this signal, if any.
    pub parent: Option<NodeId>,
    pub observers: Observers,
    pub token: DisposalToken,
    pub disposed: bool,
}

impl SignalNode {
    pub fn new(parent: Option<NodeId>, token: DisposalToken) -> Self {
        Self {
            parent,
            observers: Observers::None,
            token,
            disposed: false,
        }
    }

    /// Whether reads may register and writes may propagate.
    pub fn is_live(&self) -> bool {
        !self.disposed && !self.token.is_disposed()
    }
}

/// What kind of owner a reaction node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    /// Side-effecting body with no output.
    Effect,

    /// Derivation that republishes through `output`.
    Computed { output: NodeId },

    /// Pure disposal scope. Never tracks dependencies.
    Root,
}

impl ReactionKind {
    pub fn output(&self) -> Option<NodeId> {
        match self {
            ReactionKind::Computed { output } => Some(*output),
            _ => None,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, ReactionKind::Root)
    }
}

/// Whether a reaction has executed its body yet.
///
/// The first run skips unsubscribing, since there is nothing to release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Ready,
}

/// A reaction's body. Receives its own id so it can enter a tracking scope.
pub type RunFn = Rc<dyn Fn(NodeId) -> Result<(), EvalError>>;
pub type Cleanup = Box<dyn FnOnce()>;
pub type ErrorHandler = Rc<dyn Fn(&EvalError)>;

/// An owner in the arena: an effect, a computed, or a root scope.
pub struct ReactionNode {
    pub kind: ReactionKind,
    pub run: Option<RunFn>,
    pub state: RunState,

    /// Signals read during the most recent run.
    pub dependencies: IndexSet<NodeId>,

    /// Stale notifications not yet matched by an unstale.
    pub dirty_count: u32,

    /// OR of the freshness carried by in-flight notifications.
    pub dirty_fresh: bool,

    pub cleanups: SmallVec<[Cleanup; 1]>,
    pub error_handlers: SmallVec<[ErrorHandler; 1]>,
    pub children: IndexSet<NodeId>,
    pub parent: Option<NodeId>,
    pub token: DisposalToken,
    pub disposed: bool,
}

impl ReactionNode {
    pub fn new(
        kind: ReactionKind,
        run: Option<RunFn>,
        parent: Option<NodeId>,
        token: DisposalToken,
    ) -> Self {
        Self {
            kind,
            run,
            state: RunState::Pending,
            dependencies: IndexSet::new(),
            dirty_count: 0,
            dirty_fresh: false,
            cleanups: SmallVec::new(),
            error_handlers: SmallVec::new(),
            children: IndexSet::new(),
            parent,
            token,
            disposed: false,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.disposed && !self.token.is_disposed()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_count > 0
    }
}

impl fmt::Debug for ReactionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactionNode")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("dependencies", &self.dependencies.len())
            .field("dirty_count", &self.dirty_count)
            .field("dirty_fresh", &self.dirty_fresh)
            .field("cleanups", &self.cleanups.len())
            .field("error_handlers", &self.error_handlers.len())
            .field("children", &self.children.len())
            .field("parent", &self.parent)
            .field("disposed", &self.disposed)
            .finish()
    }
}
