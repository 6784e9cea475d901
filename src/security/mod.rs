//! Tree-scoped security: ACL store, permission registry, policy chain and the
//! resolver combining them. Keep each concern in its own small sub-module.

pub mod acl;
pub mod permissions;
pub mod policy;
pub mod read_acl;
pub mod resolver;

// Re-exports for a thin public surface
pub use acl::{merged_acp, Ace, Acl, AclSource, AclStore, Acp, MergedAcp, EVERYONE};
pub use permissions::{PermissionRegistry, DEFAULT_PERMISSIONS};
pub use policy::{Access, AdministratorPolicy, CheckOptions, LockedDocumentPolicy, PolicyChain, PolicyRequest, SecurityPolicy, TypeDenyPolicy};
pub use read_acl::ReadAclIndex;
pub use resolver::{evaluate_acp, Decision, DecisionReason, SecurityResolver};
