//! Repository facade: scope check, then security, then the lock or mutation.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::hierarchy::Hierarchy;
use crate::locks::{LockManager, UnlockAs};
use crate::model::{Lock, Node, NodeId};
use crate::security::permissions::{UNLOCK, WRITE_PROPERTIES};
use crate::security::{merged_acp, AclSource, CheckOptions, Decision, DecisionReason, LockedDocumentPolicy, PolicyRequest, SecurityResolver};
use crate::sql::SqlRepository;

/// Who is asking: a principal and the groups it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    pub principal: String,
    pub groups: Vec<String>,
}

impl Subject {
    pub fn new(principal: &str) -> Self { Self { principal: principal.to_string(), groups: Vec::new() } }

    pub fn with_group(mut self, group: &str) -> Self { self.groups.push(group.to_string()); self }

    /// Principal followed by groups.
    pub fn principals(&self) -> Vec<String> { std::iter::once(self.principal.clone()).chain(self.groups.iter().cloned()).collect() }
}

pub struct Repository {
    hierarchy: Arc<dyn Hierarchy>,
    acls: Arc<dyn AclSource>,
    locks: Arc<dyn LockManager>,
    resolver: Arc<SecurityResolver>,
}

impl Repository {
    pub fn new(hierarchy: Arc<dyn Hierarchy>, acls: Arc<dyn AclSource>, locks: Arc<dyn LockManager>, resolver: Arc<SecurityResolver>) -> Self {
        Self { hierarchy, acls, locks, resolver }
    }

    /// Everything backed by one SQL repository.
    pub fn from_sql(sql: Arc<SqlRepository>, resolver: Arc<SecurityResolver>) -> Self {
        Self { hierarchy: sql.clone(), acls: sql.clone(), locks: sql, resolver }
    }

    pub fn hierarchy(&self) -> &dyn Hierarchy { self.hierarchy.as_ref() }
    pub fn resolver(&self) -> &SecurityResolver { &self.resolver }

    pub fn is_in_scope(&self, id: &NodeId, base: &NodeId) -> AppResult<bool> { self.hierarchy.is_in_tree(id, base) }

    fn node(&self, id: &NodeId) -> AppResult<Node> {
        self.hierarchy.get_node(id)?.ok_or_else(|| AppError::not_found("node_not_found", format!("node {} not found", id)))
    }

    pub fn check(&self, id: &NodeId, subject: &Subject, permission: &str, options: &CheckOptions) -> AppResult<Decision> {
        let node = self.node(id)?;
        let acp = merged_acp(self.hierarchy.as_ref(), self.acls.as_ref(), id)?;
        let lock = self.locks.get_lock(id)?;
        let resolved = self.resolver.resolve_permission(permission);
        let req = PolicyRequest {
            node: &node,
            acp: &acp,
            principal: &subject.principal,
            permission,
            resolved_permissions: &resolved,
            additional_principals: &subject.groups,
            lock: lock.as_ref(),
        };
        Ok(self.resolver.check_permission(&req, options))
    }

    /// [`Repository::check`] where any failure is a logged Deny.
    pub fn check_or_deny(&self, id: &NodeId, subject: &Subject, permission: &str, options: &CheckOptions) -> Decision {
        match self.check(id, subject, permission, options) {
            Ok(d) => d,
            Err(e) => {
                warn!(target: "strata::repository", "permission check on {} for {} failed, denying: {}", id, subject.principal, e);
                Decision::deny(DecisionReason::Failed { code: e.code_str().to_string() })
            }
        }
    }

    fn require(&self, id: &NodeId, subject: &Subject, permission: &str, options: &CheckOptions) -> AppResult<()> {
        if self.check_or_deny(id, subject, permission, options).allow { return Ok(()); }
        Err(AppError::denied("permission_denied", format!("{} lacks {} on {}", subject.principal, permission, id)))
    }

    /// Lock a document. A lock held by anyone, the caller included, is a
    /// Conflict naming the holder.
    pub fn lock(&self, id: &NodeId, subject: &Subject) -> AppResult<Lock> {
        // the lock policy would hide the holder behind a plain deny
        let options = CheckOptions::default().bypassing(LockedDocumentPolicy::NAME);
        self.require(id, subject, WRITE_PROPERTIES, &options)?;
        let lock = self.locks.set_lock(id, &subject.principal)?;
        debug!(target: "strata::repository", "{} locked {}", subject.principal, id);
        Ok(lock)
    }

    /// Unlock as owner, or as administrator when the subject holds Unlock.
    pub fn unlock(&self, id: &NodeId, subject: &Subject) -> AppResult<Option<Lock>> {
        let who = if self.check_or_deny(id, subject, UNLOCK, &CheckOptions::default()).allow {
            UnlockAs::admin(&subject.principal)
        } else {
            UnlockAs::owner(&subject.principal)
        };
        self.locks.clear_lock(id, &who)
    }

    /// Apply the policies a query could not express to `ids`, keeping order.
    /// Ids that cannot be checked are dropped.
    pub fn post_filter(&self, ids: &[NodeId], subject: &Subject, permission: &str, options: &CheckOptions) -> Vec<NodeId> {
        let chain = self.resolver.chain();
        if !chain.needs_post_filter(permission) { return ids.to_vec(); }
        let resolved = self.resolver.resolve_permission(permission);
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let keep = (|| -> AppResult<bool> {
                let node = self.node(id)?;
                let acp = merged_acp(self.hierarchy.as_ref(), self.acls.as_ref(), id)?;
                let lock = self.locks.get_lock(id)?;
                let req = PolicyRequest {
                    node: &node,
                    acp: &acp,
                    principal: &subject.principal,
                    permission,
                    resolved_permissions: &resolved,
                    additional_principals: &subject.groups,
                    lock: lock.as_ref(),
                };
                Ok(chain.post_filter(&req, options))
            })();
            match keep {
                Ok(true) => out.push(id.clone()),
                Ok(false) => {}
                Err(e) => warn!(target: "strata::repository", "post-filter dropped {}: {}", id, e),
            }
        }
        out
    }
}

#[cfg(test)]
#[path = "repository_tests.rs"]
mod repository_tests;
