//! Document locks: at most one per node, owner plus creation time, never expiring.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::model::{Lock, NodeId};

/// Who is clearing a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockAs {
    Owner(String),
    /// Administrative override; may clear any lock.
    Administrator(String),
}

impl UnlockAs {
    pub fn owner(name: &str) -> Self { UnlockAs::Owner(name.to_string()) }
    pub fn admin(name: &str) -> Self { UnlockAs::Administrator(name.to_string()) }

    pub fn name(&self) -> &str {
        match self { UnlockAs::Owner(n) | UnlockAs::Administrator(n) => n }
    }
}

/// Whether `who` may clear `existing`.
pub fn check_unlock(node: &NodeId, existing: &Lock, who: &UnlockAs) -> AppResult<()> {
    match who {
        UnlockAs::Administrator(_) => Ok(()),
        UnlockAs::Owner(name) if *name == existing.owner => Ok(()),
        UnlockAs::Owner(name) => Err(AppError::denied(
            "unlock_denied",
            format!("{} cannot unlock node {} locked by {}", name, node, existing.owner),
        )),
    }
}

pub trait LockManager: Send + Sync {
    /// Current lock, if any. Never blocks on other lock operations for long.
    fn get_lock(&self, node: &NodeId) -> AppResult<Option<Lock>>;

    /// Lock an unlocked node. A locked node yields a Conflict naming the
    /// holder, even when the holder is `owner` itself.
    fn set_lock(&self, node: &NodeId, owner: &str) -> AppResult<Lock>;

    /// Clear a lock. Returns the removed lock, `None` if the node was unlocked.
    fn clear_lock(&self, node: &NodeId, who: &UnlockAs) -> AppResult<Option<Lock>>;
}

/// Privileged bulk-restore path. Overwrites without conflict checking.
pub trait LockRestore: Send + Sync {
    fn restore_lock(&self, node: &NodeId, owner: &str, created: DateTime<Utc>) -> AppResult<()>;
}

#[derive(Default)]
pub struct MemoryLockManager {
    locks: Mutex<HashMap<NodeId, Lock>>,
}

impl MemoryLockManager {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.locks.lock().len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl LockManager for MemoryLockManager {
    fn get_lock(&self, node: &NodeId) -> AppResult<Option<Lock>> { Ok(self.locks.lock().get(node).cloned()) }

    fn set_lock(&self, node: &NodeId, owner: &str) -> AppResult<Lock> {
        let mut g = self.locks.lock();
        if let Some(existing) = g.get(node) { return Err(AppError::lock_conflict(node, existing.owner.clone())); }
        let lock = Lock::new(owner);
        g.insert(node.clone(), lock.clone());
        debug!(target: "strata::locks", "set_lock node={} owner={}", node, owner);
        Ok(lock)
    }

    fn clear_lock(&self, node: &NodeId, who: &UnlockAs) -> AppResult<Option<Lock>> {
        let mut g = self.locks.lock();
        let Some(existing) = g.get(node) else { return Ok(None); };
        check_unlock(node, existing, who)?;
        if let UnlockAs::Administrator(admin) = who {
            info!(target: "strata::locks", "administrator {} cleared lock of {} on node {}", admin, existing.owner, node);
        }
        debug!(target: "strata::locks", "clear_lock node={} by={}", node, who.name());
        Ok(g.remove(node))
    }
}

impl LockRestore for MemoryLockManager {
    fn restore_lock(&self, node: &NodeId, owner: &str, created: DateTime<Utc>) -> AppResult<()> {
        self.locks.lock().insert(node.clone(), Lock { owner: owner.to_string(), created });
        debug!(target: "strata::locks", "restore_lock node={} owner={}", node, owner);
        Ok(())
    }
}
