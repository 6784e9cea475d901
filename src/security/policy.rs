//! Security policies consulted before ACLs, and the ordered chain holding them.
//!
//! The chain is built once (see `config::CoreConfig::policy_chain`) and passed
//! into the resolver; it is never mutated afterwards.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::acl::MergedAcp;
use super::permissions::{PermissionRegistry, WRITE};
use crate::model::{Lock, Node};

/// Verdict of a single policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Grant,
    Deny,
    Unknown,
}

/// Everything a policy may look at for one check.
#[derive(Debug, Clone, Copy)]
pub struct PolicyRequest<'a> {
    pub node: &'a Node,
    pub acp: &'a MergedAcp,
    pub principal: &'a str,
    pub permission: &'a str,
    /// `permission` plus every compound containing it.
    pub resolved_permissions: &'a [String],
    pub additional_principals: &'a [String],
    pub lock: Option<&'a Lock>,
}

impl<'a> PolicyRequest<'a> {
    /// Principal plus additional principals (groups).
    pub fn principals(&self) -> impl Iterator<Item = &'a str> + 'a {
        let extra = self.additional_principals;
        std::iter::once(self.principal).chain(extra.iter().map(|s| s.as_str()))
    }
}

/// Per-call options. Bypassing replaces ambient per-thread toggles: the
/// caller names the policies to skip for this call only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOptions {
    #[serde(default)]
    pub bypass: Vec<String>,
}

impl CheckOptions {
    pub fn bypassing(mut self, policy: &str) -> Self { self.bypass.push(policy.to_string()); self }
    pub fn is_bypassed(&self, policy: &str) -> bool { self.bypass.iter().any(|b| b == policy) }
}

pub trait SecurityPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn check_permission(&self, req: &PolicyRequest<'_>) -> Access;

    /// Whether this policy may deny `permission`. Used to decide which
    /// policies a bulk post-filter must run.
    fn restricts(&self, _permission: &str) -> bool { true }

    /// Whether the policy can be translated into a query predicate. Others are
    /// applied as a post-filter on bulk results.
    fn is_query_expressible(&self) -> bool { false }
}

/// Ordered policies. The first Grant or Deny wins.
#[derive(Clone, Default)]
pub struct PolicyChain {
    policies: Vec<Arc<dyn SecurityPolicy>>,
}

impl PolicyChain {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, policy: Arc<dyn SecurityPolicy>) -> Self { self.policies.push(policy); self }

    pub fn len(&self) -> usize { self.policies.len() }
    pub fn is_empty(&self) -> bool { self.policies.is_empty() }

    pub fn names(&self) -> Vec<&str> { self.policies.iter().map(|p| p.name()).collect() }

    /// First definite verdict in registration order, with the deciding policy name.
    pub fn evaluate(&self, req: &PolicyRequest<'_>, options: &CheckOptions) -> Option<(&str, Access)> {
        for p in &self.policies {
            if options.is_bypassed(p.name()) { continue; }
            match p.check_permission(req) {
                Access::Unknown => continue,
                verdict => return Some((p.name(), verdict)),
            }
        }
        None
    }

    /// Whether some policy must be applied after a query for `permission`.
    pub fn needs_post_filter(&self, permission: &str) -> bool {
        self.policies.iter().any(|p| !p.is_query_expressible() && p.restricts(permission))
    }

    /// Re-run the chain over a query result row. A row survives unless a
    /// non-expressible policy denies it before any policy grants it; denials by
    /// expressible policies were already applied by the query.
    pub fn post_filter(&self, req: &PolicyRequest<'_>, options: &CheckOptions) -> bool {
        for p in &self.policies {
            if options.is_bypassed(p.name()) { continue; }
            match p.check_permission(req) {
                Access::Deny if !p.is_query_expressible() => return false,
                Access::Deny | Access::Grant => return true,
                Access::Unknown => {}
            }
        }
        true
    }
}

/// Grants everything to administrator principals.
pub struct AdministratorPolicy {
    administrators: HashSet<String>,
}

impl AdministratorPolicy {
    pub const NAME: &'static str = "administrators";

    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(administrators: I) -> Self {
        Self { administrators: administrators.into_iter().map(Into::into).collect() }
    }
}

impl SecurityPolicy for AdministratorPolicy {
    fn name(&self) -> &str { Self::NAME }

    fn check_permission(&self, req: &PolicyRequest<'_>) -> Access {
        if req.principals().any(|p| self.administrators.contains(p)) { Access::Grant } else { Access::Unknown }
    }

    fn restricts(&self, _permission: &str) -> bool { false }

    // Expressed by searching without a security clause.
    fn is_query_expressible(&self) -> bool { true }
}

/// Denies some permissions on every node of a primary type, whatever the ACL
/// says. Compounds of a denied permission are denied with it, and so are the
/// permissions a denied compound contains. Bulk results go through `post_filter`.
pub struct TypeDenyPolicy {
    name: String,
    primary_type: String,
    denied: HashSet<String>,
    restricted: HashSet<String>,
}

impl TypeDenyPolicy {
    pub fn new(primary_type: &str, denied: &[&str], registry: &PermissionRegistry) -> Self {
        let denied: HashSet<String> = denied.iter().map(|s| s.to_string()).collect();
        // compounds above and permissions below both reach a denied one
        let restricted = registry
            .names()
            .into_iter()
            .filter(|p| registry.resolve(p).iter().chain(registry.expand(p).iter()).any(|r| denied.contains(r)))
            .collect();
        Self { name: format!("type-deny:{}", primary_type), primary_type: primary_type.to_string(), denied, restricted }
    }
}

impl SecurityPolicy for TypeDenyPolicy {
    fn name(&self) -> &str { &self.name }

    fn check_permission(&self, req: &PolicyRequest<'_>) -> Access {
        if req.node.primary_type != self.primary_type { return Access::Unknown; }
        if self.restricted.contains(req.permission) || req.resolved_permissions.iter().any(|p| self.denied.contains(p)) {
            Access::Deny
        } else {
            Access::Unknown
        }
    }

    fn restricts(&self, permission: &str) -> bool { self.restricted.contains(permission) }
}

/// Denies write-family permissions on a node locked by someone else.
pub struct LockedDocumentPolicy {
    write_family: HashSet<String>,
}

impl LockedDocumentPolicy {
    pub const NAME: &'static str = "locked-document";

    pub fn new(registry: &PermissionRegistry) -> Self {
        let mut write_family: HashSet<String> = registry.expand(WRITE).into_iter().collect();
        write_family.extend(registry.resolve(WRITE));
        Self { write_family }
    }
}

impl SecurityPolicy for LockedDocumentPolicy {
    fn name(&self) -> &str { Self::NAME }

    fn check_permission(&self, req: &PolicyRequest<'_>) -> Access {
        let Some(lock) = req.lock else { return Access::Unknown; };
        if lock.owner == req.principal || !self.write_family.contains(req.permission) { return Access::Unknown; }
        Access::Deny
    }

    fn restricts(&self, permission: &str) -> bool { self.write_family.contains(permission) }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod policy_tests;
