//! Relational adapter on SQLite.
//!
//! Every connection opened here gets the stored functions of [`functions`]
//! registered, so subtree, security and fulltext pruning can run inside SQL.

use std::collections::BTreeMap;
use std::time::Duration;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Connection;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::hierarchy::DEFAULT_MAX_TREE_DEPTH;
use crate::model::NodeId;

pub mod functions;
pub mod kv;
pub mod properties;
pub mod repository;

pub use kv::{SqlKeyValueStore, SqlKvSettings};
pub use properties::{format_properties, parse_properties};
pub use repository::SqlRepository;

impl ToSql for NodeId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            NodeId::Int(i) => ToSqlOutput::from(*i),
            NodeId::Str(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl FromSql for NodeId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(i) => Ok(NodeId::Int(i)),
            ValueRef::Text(t) => std::str::from_utf8(t).map(|s| NodeId::Str(s.to_string())).map_err(|e| FromSqlError::Other(Box::new(e))),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// Settings read from a connection property string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Database file, or `:memory:`.
    pub path: String,
    pub max_tree_depth: usize,
    pub busy_timeout: Duration,
    pub journal_mode: Option<String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self { path: ":memory:".to_string(), max_tree_depth: DEFAULT_MAX_TREE_DEPTH, busy_timeout: Duration::from_secs(5), journal_mode: None }
    }
}

impl ConnectionSettings {
    pub fn from_properties(props: &BTreeMap<String, String>) -> AppResult<Self> {
        let mut s = Self::default();
        for (k, v) in props {
            match k.as_str() {
                "path" => s.path = v.clone(),
                "max_tree_depth" => s.max_tree_depth = parse_num(k, v)?,
                "busy_timeout_ms" => s.busy_timeout = Duration::from_millis(parse_num(k, v)? as u64),
                "journal_mode" => s.journal_mode = Some(v.clone()),
                other => debug!(target: "strata::sql", "ignoring connection property {}", other),
            }
        }
        Ok(s)
    }

    pub fn parse(props: &str) -> AppResult<Self> { Self::from_properties(&parse_properties(props)?) }
}

fn parse_num(key: &str, v: &str) -> AppResult<usize> {
    v.trim().parse::<usize>().map_err(|_| AppError::malformed("bad_properties", format!("property {} is not a number: {:?}", key, v)))
}

/// Open a connection, apply pragmas and register the stored functions.
pub fn open_connection(settings: &ConnectionSettings) -> AppResult<Connection> {
    let conn = if settings.path == ":memory:" { Connection::open_in_memory()? } else { Connection::open(&settings.path)? };
    conn.busy_timeout(settings.busy_timeout)?;
    if let Some(mode) = &settings.journal_mode {
        // journal_mode returns the resulting mode as a row
        let _: String = conn.query_row(&format!("PRAGMA journal_mode={}", mode.replace('\'', "")), [], |r| r.get(0))?;
    }
    functions::register(&conn, settings.max_tree_depth)?;
    debug!(target: "strata::sql", "opened connection path={}", settings.path);
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_from_property_string() {
        let s = ConnectionSettings::parse("path=/tmp/a.db;max_tree_depth=50;busy_timeout_ms=250;other=x").unwrap();
        assert_eq!(s.path, "/tmp/a.db");
        assert_eq!(s.max_tree_depth, 50);
        assert_eq!(s.busy_timeout, Duration::from_millis(250));
        assert!(ConnectionSettings::parse("max_tree_depth=deep").is_err());
        assert_eq!(ConnectionSettings::parse("").unwrap(), ConnectionSettings::default());
    }

    #[test]
    fn node_ids_keep_their_sql_type() {
        let conn = Connection::open_in_memory().unwrap();
        let (a, b): (NodeId, NodeId) = conn.query_row("SELECT ?1, ?2", rusqlite::params![NodeId::Int(5), NodeId::from("5")], |r| Ok((r.get(0)?, r.get(1)?))).unwrap();
        assert_eq!(a, NodeId::Int(5));
        assert_eq!(b, NodeId::from("5"));
        let same: i64 = conn.query_row("SELECT ?1 = ?2", rusqlite::params![NodeId::Int(5), NodeId::from("5")], |r| r.get(0)).unwrap();
        assert_eq!(same, 0);
    }
}
