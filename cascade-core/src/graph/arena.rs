//! Node Arena
//!
//! The arena stores every signal and reaction node, indexed by [`NodeId`].
//! Edges are maintained in both directions: a signal knows its observers
//! and a reaction knows the signals it depends on. Owner links (parent and
//! children) are kept here too, so disposal can walk the tree by id rather
//! than by reference.
//!
//! Nothing in this module runs user code. Methods that remove nodes hand the
//! node back to the caller so closures captured inside it are dropped after
//! the arena borrow is released.

use std::collections::HashMap;

use smallvec::SmallVec;

use super::node::{ErrorHandler, NodeId, ReactionNode, SignalNode};

/// The reactive graph.
#[derive(Debug, Default)]
pub struct Graph {
    signals: HashMap<NodeId, SignalNode>,
    reactions: HashMap<NodeId, ReactionNode>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_signal(&mut self, id: NodeId, node: SignalNode) {
        self.signals.insert(id, node);
    }

    pub fn insert_reaction(&mut self, id: NodeId, node: ReactionNode) {
        self.reactions.insert(id, node);
    }

    pub fn signal(&self, id: NodeId) -> Option<&SignalNode> {
        self.signals.get(&id)
    }

    pub fn signal_mut(&mut self, id: NodeId) -> Option<&mut SignalNode> {
        self.signals.get_mut(&id)
    }

    pub fn reaction(&self, id: NodeId) -> Option<&ReactionNode> {
        self.reactions.get(&id)
    }

    pub fn reaction_mut(&mut self, id: NodeId) -> Option<&mut ReactionNode> {
        self.reactions.get_mut(&id)
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    pub fn reaction_count(&self) -> usize {
        self.reactions.len()
    }

    /// Remove a signal node and drop it from its observers' dependency sets.
    pub fn remove_signal(&mut self, id: NodeId) -> Option<SignalNode> {
        let node = self.signals.remove(&id)?;
        for observer in node.observers.snapshot() {
            if let Some(reaction) = self.reactions.get_mut(&observer) {
                reaction.dependencies.shift_remove(&id);
            }
        }
        Some(node)
    }

    /// Remove a reaction node. Edges must already be released.
    pub fn remove_reaction(&mut self, id: NodeId) -> Option<ReactionNode> {
        let node = self.reactions.remove(&id)?;
        debug_assert!(
            node.dependencies.is_empty(),
            "reaction {id} removed while still subscribed"
        );
        Some(node)
    }

    /// Record that `reaction` read `signal`.
    ///
    /// Returns `true` only when the edge is new. A repeated read in the same
    /// run is detected from the observer insert alone.
    pub fn link(&mut self, signal: NodeId, reaction: NodeId) -> bool {
        if !self.reactions.contains_key(&reaction) {
            return false;
        }
        let Some(source) = self.signals.get_mut(&signal) else {
            return false;
        };
        if !source.is_live() || !source.observers.insert(reaction) {
            return false;
        }
        if let Some(node) = self.reactions.get_mut(&reaction) {
            node.dependencies.insert(signal);
        }
        true
    }

    /// Release every dependency edge of `reaction`.
    pub fn unlink_all(&mut self, reaction: NodeId) {
        let Some(node) = self.reactions.get_mut(&reaction) else {
            return;
        };
        let dependencies = std::mem::take(&mut node.dependencies);
        for signal in dependencies {
            if let Some(source) = self.signals.get_mut(&signal) {
                source.observers.remove(reaction);
            }
        }
    }

    /// Make `child` part of `parent`'s disposal subtree.
    pub fn adopt(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.reactions.get_mut(&parent) {
            node.children.insert(child);
        }
    }

    /// Detach `child` from its parent's children.
    pub fn orphan(&mut self, child: NodeId) {
        let Some(parent) = self.reactions.get(&child).and_then(|node| node.parent) else {
            return;
        };
        if let Some(node) = self.reactions.get_mut(&parent) {
            node.children.shift_remove(&child);
        }
    }

    /// The nearest owner, starting at `start` and walking up, that has
    /// registered error handlers. Returns clones of its handlers.
    pub fn error_handlers_for(&self, start: NodeId) -> Option<SmallVec<[ErrorHandler; 1]>> {
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let node = self.reactions.get(&id)?;
            if !node.error_handlers.is_empty() {
                return Some(node.error_handlers.iter().cloned().collect());
            }
            cursor = node.parent;
        }
        None
    }
}
