//! Read ACLs: the read-relevant part of a merged ACP flattened to a compact
//! string such as `alice,-bob,members`, shared between nodes by id.
//!
//! Tokens keep merged-ACP order and each principal appears once (its first
//! ACE wins). A `-` prefix marks a deny. Everything after `-Everyone` is
//! unreachable and dropped.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use super::acl::{merged_acp, AclSource, MergedAcp, EVERYONE};
use crate::error::AppResult;
use crate::hierarchy::Hierarchy;
use crate::model::NodeId;

pub fn read_acl_string(acp: &MergedAcp, read_permissions: &[String]) -> String {
    let mut seen: Vec<&str> = Vec::new();
    let mut tokens: Vec<String> = Vec::new();
    for e in acp.entries() {
        if !read_permissions.iter().any(|p| *p == e.ace.permission) { continue; }
        let who = e.ace.principal.as_str();
        if seen.contains(&who) { continue; }
        seen.push(who);
        if e.ace.grant {
            tokens.push(who.to_string());
        } else {
            tokens.push(format!("-{}", who));
            if who == EVERYONE { break; }
        }
    }
    tokens.join(",")
}

/// Whether a read ACL string lets any of `principals` read.
pub fn is_readable(read_acl: &str, principals: &[&str]) -> bool {
    for tok in read_acl.split(',').filter(|t| !t.is_empty()) {
        let (deny, who) = match tok.strip_prefix('-') { Some(w) => (true, w), None => (false, tok) };
        if who == EVERYONE || principals.contains(&who) { return !deny; }
    }
    false
}

pub fn read_acl_id(read_acl: &str) -> u64 { xxh3_64(read_acl.as_bytes()) }

#[derive(Default)]
struct Inner {
    /// read ACL id -> (string, number of nodes using it)
    acls: HashMap<u64, (String, usize)>,
    by_node: HashMap<NodeId, u64>,
}

impl Inner {
    fn attach(&mut self, node: &NodeId, id: u64, s: String) {
        self.acls.entry(id).or_insert((s, 0)).1 += 1;
        if let Some(old) = self.by_node.insert(node.clone(), id) { self.release(old); }
    }

    // Unused read ACLs are dropped.
    fn release(&mut self, id: u64) {
        if let Some(e) = self.acls.get_mut(&id) {
            e.1 -= 1;
            if e.1 == 0 { self.acls.remove(&id); }
        }
    }
}

/// Node -> shared read ACL id, used to prune bulk results.
pub struct ReadAclIndex {
    read_permissions: Vec<String>,
    inner: RwLock<Inner>,
}

impl ReadAclIndex {
    /// `read_permissions` is the resolved Read permission (Read and its compounds).
    pub fn new(read_permissions: Vec<String>) -> Self { Self { read_permissions, inner: RwLock::new(Inner::default()) } }

    /// Recompute the read ACL of one node. Returns its id.
    pub fn update(&self, node: &NodeId, acp: &MergedAcp) -> u64 {
        let s = read_acl_string(acp, &self.read_permissions);
        let id = read_acl_id(&s);
        self.inner.write().attach(node, id, s);
        id
    }

    /// Recompute read ACLs for the given nodes from live ACL data.
    pub fn rebuild(&self, hierarchy: &dyn Hierarchy, acls: &dyn AclSource, nodes: &[NodeId]) -> AppResult<usize> {
        for n in nodes {
            let acp = merged_acp(hierarchy, acls, n)?;
            self.update(n, &acp);
        }
        debug!(target: "strata::security", "read ACLs rebuilt for {} nodes ({} distinct)", nodes.len(), self.acl_count());
        Ok(nodes.len())
    }

    pub fn remove(&self, node: &NodeId) {
        let mut w = self.inner.write();
        if let Some(id) = w.by_node.remove(node) { w.release(id); }
    }

    pub fn acl_id(&self, node: &NodeId) -> Option<u64> { self.inner.read().by_node.get(node).copied() }

    pub fn acl(&self, id: u64) -> Option<String> { self.inner.read().acls.get(&id).map(|(s, _)| s.clone()) }

    /// Number of distinct read ACLs in use.
    pub fn acl_count(&self) -> usize { self.inner.read().acls.len() }

    /// Keep the nodes readable by `principals`. Nodes without a read ACL are dropped.
    pub fn filter_readable(&self, nodes: &[NodeId], principals: &[&str]) -> Vec<NodeId> {
        let r = self.inner.read();
        let mut verdicts: HashMap<u64, bool> = HashMap::new();
        nodes
            .iter()
            .filter(|n| {
                let Some(id) = r.by_node.get(*n) else { return false; };
                *verdicts.entry(*id).or_insert_with(|| r.acls.get(id).map(|(s, _)| is_readable(s, principals)).unwrap_or(false))
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
#[path = "read_acl_tests.rs"]
mod read_acl_tests;
