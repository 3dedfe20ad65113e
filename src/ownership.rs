//! Ownership graph
//!
//! Forward-only registry of keep-alive edges. Every native object gets a
//! node when its handle is created; a composite links to the nodes of the
//! wrappers it was built from. Dependencies always exist before their
//! composite, so an edge must point to a strictly older node. Anything else
//! means the registry is corrupted and is treated as a programming error.
//!
//! The registry records structure only. Keeping dependencies alive is done by
//! the composite holding `Arc`s to them (see [`crate::index::Dependency`]).
//!
//! Node ids are monotonic and never reused. A released node leaves the
//! registry as soon as nothing links to it; one still referenced by a live
//! composite stays as a dead entry until that composite is released too.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Registry key of a native object. Ordered by creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct Node {
    label: &'static str,
    deps: Vec<NodeId>,
    // reverse edges, so release is O(degree)
    dependents: Vec<NodeId>,
    live: bool,
}

#[derive(Debug, Default)]
struct Registry {
    next: usize,
    nodes: HashMap<NodeId, Node>,
}

#[derive(Debug, Default)]
pub struct OwnershipGraph {
    inner: Mutex<Registry>,
}

impl OwnershipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, label: &'static str) -> NodeId {
        let mut reg = self.inner.lock();
        let id = NodeId(reg.next);
        reg.next += 1;
        reg.nodes.insert(
            id,
            Node { label, deps: Vec::new(), dependents: Vec::new(), live: true },
        );
        id
    }

    /// Records that `owner` keeps `dep` alive.
    ///
    /// # Panics
    ///
    /// When the edge does not point to an older live node, which would allow
    /// a cycle.
    pub fn link(&self, owner: NodeId, dep: NodeId) {
        let mut reg = self.inner.lock();
        let valid = dep < owner
            && reg.nodes.get(&owner).map_or(false, |n| n.live)
            && reg.nodes.get(&dep).map_or(false, |n| n.live);
        assert!(
            valid,
            "ownership graph corrupted: edge {} -> {} is not forward-only",
            owner,
            dep
        );
        if let Some(node) = reg.nodes.get_mut(&owner) {
            if node.deps.contains(&dep) {
                return;
            }
            node.deps.push(dep);
        }
        if let Some(node) = reg.nodes.get_mut(&dep) {
            node.dependents.push(owner);
        }
    }

    pub fn dependencies(&self, id: NodeId) -> Vec<NodeId> {
        self.inner
            .lock()
            .nodes
            .get(&id)
            .map(|n| n.deps.clone())
            .unwrap_or_default()
    }

    /// Live nodes that keep `id` alive.
    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = self
            .inner
            .lock()
            .nodes
            .get(&id)
            .map(|n| n.dependents.clone())
            .unwrap_or_default();
        out.sort_unstable();
        out
    }

    pub fn label(&self, id: NodeId) -> Option<&'static str> {
        self.inner.lock().nodes.get(&id).map(|n| n.label)
    }

    /// Marks `id` dead and detaches its outgoing edges. Nodes left dead and
    /// unreferenced are dropped from the registry.
    pub fn mark_released(&self, id: NodeId) {
        let mut reg = self.inner.lock();
        let Some(node) = reg.nodes.get_mut(&id) else {
            return;
        };
        if !node.live {
            return;
        }
        node.live = false;
        let deps = std::mem::take(&mut node.deps);
        if node.dependents.is_empty() {
            reg.nodes.remove(&id);
        } else {
            tracing::warn!("{} released while still referenced by {:?}", id, node.dependents);
        }

        for dep in deps {
            let prune = match reg.nodes.get_mut(&dep) {
                Some(d) => {
                    d.dependents.retain(|o| *o != id);
                    !d.live && d.dependents.is_empty()
                }
                None => false,
            };
            if prune {
                reg.nodes.remove(&dep);
            }
        }
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.inner.lock().nodes.get(&id).map_or(false, |n| n.live)
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().nodes.values().filter(|n| n.live).count()
    }

    /// Nodes currently tracked: live ones plus dead ones still referenced.
    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
