//! Hierarchy index: parent pointers, ancestor walks and subtree membership.
//!
//! `is_in_tree` is the predicate behind both security scoping and query
//! pruning. All backends answer it through `walk_is_in_tree`, an iterative walk
//! bounded by a maximum depth so that a corrupted or cyclic parent chain can
//! never loop: exceeding the bound answers `false`.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::model::{Node, NodeId};

/// Default bound on ancestor walks.
pub const DEFAULT_MAX_TREE_DEPTH: usize = 1_000;

/// Bounded subtree membership test over an arbitrary parent lookup.
///
/// `parent` returns `Ok(None)` for the root and for unknown ids. Backend
/// errors propagate; they are never turned into `true`.
pub fn walk_is_in_tree<F>(id: &NodeId, base: &NodeId, max_depth: usize, mut parent: F) -> AppResult<bool>
where
    F: FnMut(&NodeId) -> AppResult<Option<NodeId>>,
{
    if id == base { return Ok(true); }
    let mut cur = id.clone();
    for _ in 0..max_depth {
        match parent(&cur)? {
            Some(p) if &p == base => return Ok(true),
            Some(p) => cur = p,
            None => return Ok(false),
        }
    }
    warn!(target: "strata::hierarchy", "is_in_tree: depth bound {} exceeded from id={} base={}; failing closed", max_depth, id, base);
    Ok(false)
}

/// Bounded ancestor list (parent first, root last) over a parent lookup.
pub fn walk_ancestors<F>(id: &NodeId, max_depth: usize, mut parent: F) -> AppResult<Vec<NodeId>>
where
    F: FnMut(&NodeId) -> AppResult<Option<NodeId>>,
{
    let mut out = Vec::new();
    let mut cur = id.clone();
    while let Some(p) = parent(&cur)? {
        if out.len() >= max_depth {
            return Err(AppError::internal("tree_depth_exceeded", &format!("ancestor chain of {} exceeds depth {}", id, max_depth)));
        }
        out.push(p.clone());
        cur = p;
    }
    Ok(out)
}

/// Read access to a node tree, implemented by every hierarchy backend.
pub trait Hierarchy: Send + Sync {
    fn get_node(&self, id: &NodeId) -> AppResult<Option<Node>>;

    /// Maximum walk depth for this backend.
    fn max_depth(&self) -> usize { DEFAULT_MAX_TREE_DEPTH }

    fn parent_of(&self, id: &NodeId) -> AppResult<Option<NodeId>> {
        Ok(self.get_node(id)?.and_then(|n| n.parent_id))
    }

    fn is_in_tree(&self, id: &NodeId, base: &NodeId) -> AppResult<bool> {
        walk_is_in_tree(id, base, self.max_depth(), |n| self.parent_of(n))
    }

    fn ancestors(&self, id: &NodeId) -> AppResult<Vec<NodeId>> {
        walk_ancestors(id, self.max_depth(), |n| self.parent_of(n))
    }
}

#[derive(Default)]
struct Arena {
    nodes: HashMap<NodeId, Node>,
    children: HashMap<NodeId, Vec<NodeId>>,
}

/// In-process arena of nodes keyed by id.
pub struct HierarchyIndex {
    inner: RwLock<Arena>,
    max_depth: usize,
}

impl Default for HierarchyIndex {
    fn default() -> Self { Self::new(DEFAULT_MAX_TREE_DEPTH) }
}

impl HierarchyIndex {
    pub fn new(max_depth: usize) -> Self { Self { inner: RwLock::new(Arena::default()), max_depth } }

    pub fn len(&self) -> usize { self.inner.read().nodes.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Insert a node. Its parent (if any) must already exist.
    pub fn add_node(&self, node: Node) -> AppResult<()> {
        let mut w = self.inner.write();
        if w.nodes.contains_key(&node.id) {
            return Err(AppError::conflict("node_exists", &format!("node {} already exists", node.id)));
        }
        if let Some(p) = &node.parent_id {
            if !w.nodes.contains_key(p) {
                return Err(AppError::not_found("parent_not_found", &format!("parent {} of {} not found", p, node.id)));
            }
            w.children.entry(p.clone()).or_default().push(node.id.clone());
        }
        debug!(target: "strata::hierarchy", "add_node id={} parent={:?}", node.id, node.parent_id);
        w.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Re-parent a node. Moving a node under itself or one of its descendants is rejected.
    pub fn move_node(&self, id: &NodeId, new_parent: &NodeId) -> AppResult<()> {
        let mut w = self.inner.write();
        if !w.nodes.contains_key(new_parent) {
            return Err(AppError::not_found("parent_not_found", &format!("parent {} not found", new_parent)));
        }
        let Some(old_parent) = w.nodes.get(id).map(|n| n.parent_id.clone()) else {
            return Err(AppError::not_found("node_not_found", &format!("node {} not found", id)));
        };
        let depth = self.bound(&w);
        let under_self = walk_is_in_tree(new_parent, id, depth, |n| Ok(w.nodes.get(n).and_then(|x| x.parent_id.clone())))?;
        if under_self {
            return Err(AppError::malformed("move_into_descendant", &format!("cannot move {} under its own subtree {}", id, new_parent)));
        }
        if let Some(op) = old_parent {
            if let Some(siblings) = w.children.get_mut(&op) { siblings.retain(|c| c != id); }
        }
        w.children.entry(new_parent.clone()).or_default().push(id.clone());
        if let Some(n) = w.nodes.get_mut(id) { n.parent_id = Some(new_parent.clone()); }
        debug!(target: "strata::hierarchy", "move_node id={} new_parent={}", id, new_parent);
        Ok(())
    }

    /// Remove a node and its whole subtree. Returns the removed ids.
    pub fn remove_node(&self, id: &NodeId) -> AppResult<Vec<NodeId>> {
        let mut w = self.inner.write();
        let Some(node) = w.nodes.get(id).cloned() else { return Ok(Vec::new()); };
        if let Some(p) = &node.parent_id {
            if let Some(siblings) = w.children.get_mut(p) { siblings.retain(|c| c != id); }
        }
        let mut removed = Vec::new();
        let mut todo = vec![id.clone()];
        let mut seen = HashSet::new();
        while let Some(cur) = todo.pop() {
            if !seen.insert(cur.clone()) { continue; }
            if let Some(kids) = w.children.remove(&cur) { todo.extend(kids); }
            if w.nodes.remove(&cur).is_some() { removed.push(cur); }
        }
        debug!(target: "strata::hierarchy", "remove_node id={} removed={}", id, removed.len());
        Ok(removed)
    }

    pub fn children(&self, id: &NodeId) -> Vec<NodeId> {
        self.inner.read().children.get(id).cloned().unwrap_or_default()
    }

    /// Overwrite a parent pointer without any check. Used for repair and
    /// bulk-restore paths that load pointers verbatim.
    pub fn set_parent_unchecked(&self, id: &NodeId, parent: Option<NodeId>) {
        let mut w = self.inner.write();
        if let Some(n) = w.nodes.get_mut(id) { n.parent_id = parent; }
    }

    // The deepest possible chain cannot be longer than the number of nodes.
    fn bound(&self, arena: &Arena) -> usize { self.max_depth.min(arena.nodes.len() + 1) }
}

impl Hierarchy for HierarchyIndex {
    fn get_node(&self, id: &NodeId) -> AppResult<Option<Node>> { Ok(self.inner.read().nodes.get(id).cloned()) }

    fn max_depth(&self) -> usize { self.bound(&self.inner.read()) }

    fn parent_of(&self, id: &NodeId) -> AppResult<Option<NodeId>> {
        Ok(self.inner.read().nodes.get(id).and_then(|n| n.parent_id.clone()))
    }

    fn is_in_tree(&self, id: &NodeId, base: &NodeId) -> AppResult<bool> {
        let r = self.inner.read();
        walk_is_in_tree(id, base, self.bound(&r), |n| Ok(r.nodes.get(n).and_then(|x| x.parent_id.clone())))
    }
}

#[cfg(test)]
#[path = "hierarchy_tests.rs"]
mod hierarchy_tests;
