//! Permission registry with compound permissions.
//!
//! A compound permission contains others: granting `ReadWrite` grants `Read`.
//! Checking a permission therefore matches ACEs carrying the permission itself
//! or any compound that contains it (`resolve`).

use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;

pub const EVERYTHING: &str = "Everything";
pub const READ_WRITE: &str = "ReadWrite";
pub const READ: &str = "Read";
pub const WRITE: &str = "Write";
pub const BROWSE: &str = "Browse";
pub const READ_PROPERTIES: &str = "ReadProperties";
pub const READ_CHILDREN: &str = "ReadChildren";
pub const ADD_CHILDREN: &str = "AddChildren";
pub const REMOVE_CHILDREN: &str = "RemoveChildren";
pub const WRITE_PROPERTIES: &str = "WriteProperties";
pub const REMOVE: &str = "Remove";
pub const READ_SECURITY: &str = "ReadSecurity";
pub const WRITE_SECURITY: &str = "WriteSecurity";
pub const UNLOCK: &str = "Unlock";

/// Standard registry shared by default-configured resolvers.
pub static DEFAULT_PERMISSIONS: Lazy<PermissionRegistry> = Lazy::new(PermissionRegistry::standard);

#[derive(Debug, Clone, Default)]
pub struct PermissionRegistry {
    /// compound -> directly contained permissions
    contains: HashMap<String, Vec<String>>,
}

impl PermissionRegistry {
    pub fn empty() -> Self { Self::default() }

    pub fn standard() -> Self {
        let mut r = Self::empty();
        r.register_compound(READ, &[BROWSE, READ_PROPERTIES, READ_CHILDREN]);
        r.register_compound(WRITE, &[ADD_CHILDREN, REMOVE_CHILDREN, WRITE_PROPERTIES, REMOVE]);
        r.register_compound(READ_WRITE, &[READ, WRITE]);
        r.register_compound(EVERYTHING, &[READ_WRITE, READ_SECURITY, WRITE_SECURITY, UNLOCK]);
        r
    }

    pub fn register(&mut self, name: &str) { self.contains.entry(name.to_string()).or_default(); }

    /// Register `name` as containing `subs`. Unknown subs are registered as simple permissions.
    pub fn register_compound(&mut self, name: &str, subs: &[&str]) {
        for s in subs { self.register(s); }
        let e = self.contains.entry(name.to_string()).or_default();
        for s in subs {
            if !e.iter().any(|x| x == s) { e.push(s.to_string()); }
        }
    }

    pub fn is_known(&self, name: &str) -> bool { self.contains.contains_key(name) }

    /// `name` plus every compound containing it, transitively. Unknown -> empty.
    pub fn resolve(&self, name: &str) -> Vec<String> {
        if !self.is_known(name) { return Vec::new(); }
        let mut out = BTreeSet::new();
        let mut todo = vec![name.to_string()];
        while let Some(p) = todo.pop() {
            if !out.insert(p.clone()) { continue; }
            for (compound, subs) in &self.contains {
                if subs.iter().any(|s| *s == p) { todo.push(compound.clone()); }
            }
        }
        out.into_iter().collect()
    }

    /// `name` plus every permission it contains, transitively. Unknown -> empty.
    pub fn expand(&self, name: &str) -> Vec<String> {
        if !self.is_known(name) { return Vec::new(); }
        let mut out = BTreeSet::new();
        let mut todo = vec![name.to_string()];
        while let Some(p) = todo.pop() {
            if !out.insert(p.clone()) { continue; }
            if let Some(subs) = self.contains.get(&p) { todo.extend(subs.iter().cloned()); }
        }
        out.into_iter().collect()
    }

    pub fn names(&self) -> Vec<String> {
        let mut v: Vec<String> = self.contains.keys().cloned().collect();
        v.sort();
        v
    }
}
