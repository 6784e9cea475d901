//! ACL store: per-node ordered ACLs and their aggregation into a merged ACP.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::hierarchy::{walk_ancestors, Hierarchy};
use crate::model::{Node, NodeId};

/// Principal matched by every request.
pub const EVERYONE: &str = "Everyone";
/// ACL set directly on a node by its editors.
pub const LOCAL_ACL: &str = "local";
/// ACL set by workflow or other automated processes.
pub const INHERITED_ACL: &str = "inherited";

/// One access control entry. Lower `position` wins within its ACL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ace {
    pub principal: String,
    pub permission: String,
    pub grant: bool,
    #[serde(default)]
    pub position: u32,
}

impl Ace {
    pub fn granting(principal: &str, permission: &str) -> Self {
        Self { principal: principal.to_string(), permission: permission.to_string(), grant: true, position: 0 }
    }

    pub fn denying(principal: &str, permission: &str) -> Self {
        Self { principal: principal.to_string(), permission: permission.to_string(), grant: false, position: 0 }
    }

    /// ACE that blocks everything inherited from ancestors.
    pub fn block_inheritance() -> Self { Self::denying(EVERYONE, super::permissions::EVERYTHING) }
}

/// Named ordered list of ACEs attached to one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    name: String,
    aces: Vec<Ace>,
}

impl Acl {
    pub fn new(name: &str) -> AppResult<Self> {
        if name.trim().is_empty() { return Err(AppError::malformed("bad_acl_name", "ACL name must not be empty")); }
        Ok(Self { name: name.to_string(), aces: Vec::new() })
    }

    pub fn name(&self) -> &str { &self.name }

    /// Entries in position order.
    pub fn aces(&self) -> &[Ace] { &self.aces }

    pub fn len(&self) -> usize { self.aces.len() }
    pub fn is_empty(&self) -> bool { self.aces.is_empty() }

    /// Append with the lowest priority.
    pub fn add(&mut self, mut ace: Ace) {
        ace.position = self.aces.last().map(|a| a.position + 1).unwrap_or(0);
        self.aces.push(ace);
    }

    /// Insert at `index` (clamped) and renumber positions.
    pub fn insert(&mut self, index: usize, ace: Ace) {
        let at = index.min(self.aces.len());
        self.aces.insert(at, ace);
        self.renumber();
    }

    /// Remove every entry for `principal`. Returns how many were removed.
    pub fn remove_principal(&mut self, principal: &str) -> usize {
        let before = self.aces.len();
        self.aces.retain(|a| a.principal != principal);
        let removed = before - self.aces.len();
        if removed > 0 { self.renumber(); }
        removed
    }

    fn renumber(&mut self) {
        for (i, a) in self.aces.iter_mut().enumerate() { a.position = i as u32; }
    }
}

/// Ordered list of ACLs of one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acp {
    acls: Vec<Acl>,
}

impl Acp {
    pub fn new() -> Self { Self::default() }

    pub fn acls(&self) -> &[Acl] { &self.acls }

    pub fn acl(&self, name: &str) -> Option<&Acl> { self.acls.iter().find(|a| a.name == name) }

    /// Existing ACL with that name, or a new one appended at the end.
    pub fn acl_mut(&mut self, name: &str) -> AppResult<&mut Acl> {
        let idx = match self.acls.iter().position(|a| a.name == name) {
            Some(i) => i,
            None => { self.acls.push(Acl::new(name)?); self.acls.len() - 1 }
        };
        Ok(&mut self.acls[idx])
    }

    /// Replace the ACL of the same name in place, or append it.
    pub fn set_acl(&mut self, acl: Acl) {
        match self.acls.iter_mut().find(|a| a.name == acl.name) {
            Some(slot) => *slot = acl,
            None => self.acls.push(acl),
        }
    }

    pub fn remove_acl(&mut self, name: &str) -> bool {
        let before = self.acls.len();
        self.acls.retain(|a| a.name != name);
        before != self.acls.len()
    }

    pub fn ace_count(&self) -> usize { self.acls.iter().map(|a| a.len()).sum() }
}

/// One entry of a merged ACP with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedAce {
    pub node: NodeId,
    pub acl: String,
    pub ace: Ace,
}

/// ACEs of a node and all its ancestors, nearest first then by position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedAcp {
    entries: Vec<MergedAce>,
}

impl MergedAcp {
    pub fn new() -> Self { Self::default() }

    pub fn push_acp(&mut self, node: &NodeId, acp: &Acp) {
        for acl in acp.acls() {
            for ace in acl.aces() {
                self.entries.push(MergedAce { node: node.clone(), acl: acl.name().to_string(), ace: ace.clone() });
            }
        }
    }

    pub fn entries(&self) -> &[MergedAce] { &self.entries }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

/// Per-node ACP lookup, implemented by every ACL backend.
pub trait AclSource: Send + Sync {
    fn get_acp(&self, id: &NodeId) -> AppResult<Option<Acp>>;
}

/// Build the merged ACP of `id` from its own ACP and those of its ancestors.
///
/// A version has no parent; its chain continues from the live document it
/// points at. Only the starting node gets this fallback.
pub fn merged_acp(hierarchy: &dyn Hierarchy, acls: &dyn AclSource, id: &NodeId) -> AppResult<MergedAcp> {
    merged_acp_with(id, hierarchy.max_depth(), |n| hierarchy.get_node(n), |n| acls.get_acp(n))
}

/// [`merged_acp`] over plain lookups, for callers holding a raw connection.
pub fn merged_acp_with<N, A>(id: &NodeId, max_depth: usize, mut node: N, mut acp: A) -> AppResult<MergedAcp>
where
    N: FnMut(&NodeId) -> AppResult<Option<Node>>,
    A: FnMut(&NodeId) -> AppResult<Option<Acp>>,
{
    let mut chain = vec![id.clone()];
    let start = match node(id)? {
        Some(n) if n.is_version && n.parent_id.is_none() => n.target,
        Some(_) => Some(id.clone()),
        None => None,
    };
    if let Some(start) = start {
        if start != *id { chain.push(start.clone()); }
        chain.extend(walk_ancestors(&start, max_depth, |n| Ok(node(n)?.and_then(|x| x.parent_id)))?);
    }
    let mut merged = MergedAcp::new();
    for n in &chain {
        if let Some(a) = acp(n)? { merged.push_acp(n, &a); }
    }
    Ok(merged)
}

/// In-process ACL store.
#[derive(Default)]
pub struct AclStore {
    map: RwLock<HashMap<NodeId, Acp>>,
}

impl AclStore {
    pub fn new() -> Self { Self::default() }

    pub fn set_acp(&self, id: &NodeId, acp: Acp) {
        debug!(target: "strata::security", "set_acp node={} acls={}", id, acp.acls().len());
        self.map.write().insert(id.clone(), acp);
    }

    pub fn remove_acp(&self, id: &NodeId) -> bool { self.map.write().remove(id).is_some() }

    /// Append an ACE to the named ACL of a node, creating both when missing.
    pub fn add_ace(&self, id: &NodeId, acl: &str, ace: Ace) -> AppResult<()> {
        let mut w = self.map.write();
        w.entry(id.clone()).or_default().acl_mut(acl)?.add(ace);
        debug!(target: "strata::security", "add_ace node={} acl={}", id, acl);
        Ok(())
    }
}

impl AclSource for AclStore {
    fn get_acp(&self, id: &NodeId) -> AppResult<Option<Acp>> { Ok(self.map.read().get(id).cloned()) }
}

#[cfg(test)]
#[path = "acl_tests.rs"]
mod acl_tests;
