//! Security resolver: policy chain first, then the merged ACP, then deny.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::acl::{MergedAcp, EVERYONE};
use super::permissions::PermissionRegistry;
use super::policy::{Access, CheckOptions, PolicyChain, PolicyRequest};
use crate::model::NodeId;

/// Why a decision was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionReason {
    Policy { name: String },
    Ace { node: NodeId, acl: String, principal: String, permission: String },
    NoMatch,
    /// Empty resolved permission set (unknown or malformed permission).
    NoPermissions,
    /// The check itself failed; denied without evaluation.
    Failed { code: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allow: bool,
    pub reason: DecisionReason,
}

impl Decision {
    pub fn deny(reason: DecisionReason) -> Self { Self { allow: false, reason } }
}

/// ACL-only evaluation: first ACE (nearest node, then position) whose
/// principal is one of `principals` or Everyone and whose permission is in
/// `permissions` decides.
pub fn evaluate_acp(acp: &MergedAcp, principals: &[&str], permissions: &[&str]) -> Decision {
    if permissions.is_empty() { return Decision::deny(DecisionReason::NoPermissions); }
    for e in acp.entries() {
        let who = e.ace.principal.as_str();
        if who != EVERYONE && !principals.contains(&who) { continue; }
        if !permissions.contains(&e.ace.permission.as_str()) { continue; }
        return Decision {
            allow: e.ace.grant,
            reason: DecisionReason::Ace { node: e.node.clone(), acl: e.acl.clone(), principal: e.ace.principal.clone(), permission: e.ace.permission.clone() },
        };
    }
    Decision::deny(DecisionReason::NoMatch)
}

pub struct SecurityResolver {
    chain: Arc<PolicyChain>,
    registry: Arc<PermissionRegistry>,
}

impl SecurityResolver {
    pub fn new(chain: Arc<PolicyChain>, registry: Arc<PermissionRegistry>) -> Self { Self { chain, registry } }

    pub fn chain(&self) -> &PolicyChain { &self.chain }
    pub fn registry(&self) -> &PermissionRegistry { &self.registry }

    /// Permission plus every compound containing it.
    pub fn resolve_permission(&self, permission: &str) -> Vec<String> { self.registry.resolve(permission) }

    pub fn check_permission(&self, req: &PolicyRequest<'_>, options: &CheckOptions) -> Decision {
        if let Some((name, verdict)) = self.chain.evaluate(req, options) {
            let d = Decision { allow: verdict == Access::Grant, reason: DecisionReason::Policy { name: name.to_string() } };
            debug!(target: "strata::security", "node={} principal={} permission={} decided by policy {}: allow={}", req.node.id, req.principal, req.permission, name, d.allow);
            return d;
        }
        let principals: Vec<&str> = req.principals().collect();
        let permissions: Vec<&str> = req.resolved_permissions.iter().map(|s| s.as_str()).collect();
        let d = evaluate_acp(req.acp, &principals, &permissions);
        debug!(target: "strata::security", "node={} principal={} permission={} allow={} reason={:?}", req.node.id, req.principal, req.permission, d.allow, d.reason);
        d
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod resolver_tests;
