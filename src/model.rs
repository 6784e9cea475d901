//! Core data model: node identifiers, nodes and locks.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Node identifier. Repositories use either string ids (UUID-like) or integer
/// ids; both are supported everywhere and never compare equal to each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeId {
    Int(i64),
    Str(String),
}

impl NodeId {
    /// Parse a string-form id. Empty ids are rejected.
    pub fn parse(s: &str) -> AppResult<Self> {
        if s.trim().is_empty() { return Err(AppError::malformed("bad_node_id", "node id must not be empty")); }
        Ok(NodeId::Str(s.to_string()))
    }

    /// Fresh random string id.
    pub fn random() -> Self { NodeId::Str(uuid::Uuid::new_v4().to_string()) }

    pub fn as_str(&self) -> Option<&str> {
        match self { NodeId::Str(s) => Some(s), NodeId::Int(_) => None }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self { NodeId::Int(i) => Some(*i), NodeId::Str(_) => None }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Int(i) => write!(f, "{}", i),
            NodeId::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for NodeId { fn from(s: &str) -> Self { NodeId::Str(s.to_string()) } }
impl From<String> for NodeId { fn from(s: String) -> Self { NodeId::Str(s) } }
impl From<i64> for NodeId { fn from(i: i64) -> Self { NodeId::Int(i) } }

/// A repository node. Versions and proxies point at a `target` which is not
/// part of their ancestor chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub primary_type: String,
    #[serde(default)]
    pub mixin_types: BTreeSet<String>,
    #[serde(default)]
    pub is_version: bool,
    #[serde(default)]
    pub is_proxy: bool,
    /// Live document of a version, or target of a proxy.
    #[serde(default)]
    pub target: Option<NodeId>,
    #[serde(default = "Node::default_lifecycle")]
    pub lifecycle_state: String,
}

impl Node {
    fn default_lifecycle() -> String { "project".to_string() }

    pub fn root(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            name: String::new(),
            primary_type: "Root".to_string(),
            mixin_types: BTreeSet::new(),
            is_version: false,
            is_proxy: false,
            target: None,
            lifecycle_state: Self::default_lifecycle(),
        }
    }

    pub fn child(id: impl Into<NodeId>, parent: impl Into<NodeId>, name: &str, primary_type: &str) -> Self {
        Self { parent_id: Some(parent.into()), name: name.to_string(), primary_type: primary_type.to_string(), ..Self::root(id) }
    }

    /// A version snapshot of `live`. Versions have no parent.
    pub fn version_of(id: impl Into<NodeId>, live: impl Into<NodeId>, primary_type: &str) -> Self {
        Self { is_version: true, target: Some(live.into()), primary_type: primary_type.to_string(), ..Self::root(id) }
    }

    pub fn with_mixin(mut self, mixin: &str) -> Self { self.mixin_types.insert(mixin.to_string()); self }

    pub fn is_root(&self) -> bool { self.parent_id.is_none() && !self.is_version }
}

/// Exclusive document lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub owner: String,
    pub created: DateTime<Utc>,
}

impl Lock {
    pub fn new(owner: impl Into<String>) -> Self { Self { owner: owner.into(), created: Utc::now() } }
}
