//! SQLite-backed repository: hierarchy, ACLs, locks and fulltext in one
//! database, queried through the stored functions.
//!
//! Id columns are declared without a type so that INTEGER and TEXT ids keep
//! their storage class and never compare equal.

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use super::functions::{self, in_tree};
use super::{open_connection, ConnectionSettings};
use crate::error::{AppError, AppResult};
use crate::hierarchy::{walk_ancestors, Hierarchy};
use crate::locks::{check_unlock, LockManager, LockRestore, UnlockAs};
use crate::model::{Lock, Node, NodeId};
use crate::security::acl::{Ace, Acl, AclSource, Acp};

pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS hierarchy (
    id PRIMARY KEY,
    parent_id,
    name TEXT NOT NULL,
    primary_type TEXT NOT NULL,
    mixin_types TEXT NOT NULL DEFAULT '',
    is_version INTEGER NOT NULL DEFAULT 0,
    is_proxy INTEGER NOT NULL DEFAULT 0,
    target,
    lifecycle_state TEXT NOT NULL DEFAULT 'project'
);
CREATE INDEX IF NOT EXISTS hierarchy_parent_idx ON hierarchy(parent_id);
CREATE TABLE IF NOT EXISTS acls (
    node_id NOT NULL,
    acl_pos INTEGER NOT NULL,
    acl_name TEXT NOT NULL,
    pos INTEGER NOT NULL,
    principal TEXT NOT NULL,
    permission TEXT NOT NULL,
    is_grant INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS acls_node_idx ON acls(node_id);
CREATE TABLE IF NOT EXISTS locks (
    node_id PRIMARY KEY,
    owner TEXT NOT NULL,
    created TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS fulltext (
    node_id PRIMARY KEY,
    body TEXT NOT NULL
);
";

fn mixins_to_sql(m: &BTreeSet<String>) -> String { m.iter().cloned().collect::<Vec<_>>().join(",") }

fn mixins_from_sql(s: &str) -> BTreeSet<String> { s.split(',').filter(|x| !x.is_empty()).map(str::to_string).collect() }

fn ts_to_sql(t: &DateTime<Utc>) -> String { t.to_rfc3339_opts(SecondsFormat::Nanos, true) }

fn ts_from_sql(s: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc)).map_err(|e| AppError::internal("bad_timestamp", format!("{}: {}", s, e)))
}

pub(crate) fn load_node(conn: &Connection, id: &NodeId) -> AppResult<Option<Node>> {
    let mut st = conn.prepare_cached(
        "SELECT id, parent_id, name, primary_type, mixin_types, is_version, is_proxy, target, lifecycle_state FROM hierarchy WHERE id = ?1",
    )?;
    let node = st
        .query_row([id], |r| {
            Ok(Node {
                id: r.get(0)?,
                parent_id: r.get(1)?,
                name: r.get(2)?,
                primary_type: r.get(3)?,
                mixin_types: mixins_from_sql(&r.get::<_, String>(4)?),
                is_version: r.get(5)?,
                is_proxy: r.get(6)?,
                target: r.get(7)?,
                lifecycle_state: r.get(8)?,
            })
        })
        .optional()?;
    Ok(node)
}

pub(crate) fn load_acp(conn: &Connection, id: &NodeId) -> AppResult<Option<Acp>> {
    let mut st = conn.prepare_cached("SELECT acl_name, principal, permission, is_grant FROM acls WHERE node_id = ?1 ORDER BY acl_pos, pos")?;
    let rows = st.query_map([id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?, r.get::<_, bool>(3)?)))?;
    let mut acp: Option<Acp> = None;
    for row in rows {
        let (acl, principal, permission, grant) = row?;
        let ace = if grant { Ace::granting(&principal, &permission) } else { Ace::denying(&principal, &permission) };
        acp.get_or_insert_with(Acp::new).acl_mut(&acl)?.add(ace);
    }
    Ok(acp)
}

fn store_acp(conn: &Connection, id: &NodeId, acp: &Acp) -> AppResult<()> {
    conn.execute("DELETE FROM acls WHERE node_id = ?1", [id])?;
    let mut st = conn.prepare_cached("INSERT INTO acls (node_id, acl_pos, acl_name, pos, principal, permission, is_grant) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)")?;
    for (acl_pos, acl) in acp.acls().iter().enumerate() {
        for ace in acl.aces() {
            st.execute(params![id, acl_pos as i64, acl.name(), ace.position as i64, ace.principal, ace.permission, ace.grant])?;
        }
    }
    Ok(())
}

fn load_lock(conn: &Connection, node: &NodeId) -> AppResult<Option<Lock>> {
    let row = conn
        .query_row("SELECT owner, created FROM locks WHERE node_id = ?1", [node], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .optional()?;
    match row {
        Some((owner, created)) => Ok(Some(Lock { owner, created: ts_from_sql(&created)? })),
        None => Ok(None),
    }
}

pub struct SqlRepository {
    conn: Mutex<Connection>,
    max_depth: usize,
}

impl SqlRepository {
    pub fn open(settings: &ConnectionSettings) -> AppResult<Self> {
        let conn = open_connection(settings)?;
        conn.execute_batch(SCHEMA)?;
        info!(target: "strata::sql", "repository opened at {}", settings.path);
        Ok(Self { conn: Mutex::new(conn), max_depth: settings.max_tree_depth })
    }

    /// Open from a connection property string such as `path=/var/lib/strata.db`.
    pub fn open_with_properties(props: &str) -> AppResult<Self> { Self::open(&ConnectionSettings::parse(props)?) }

    pub fn open_in_memory() -> AppResult<Self> { Self::open(&ConnectionSettings::default()) }

    pub fn node_count(&self) -> AppResult<usize> {
        let n: i64 = self.conn.lock().query_row("SELECT COUNT(*) FROM hierarchy", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub fn add_node(&self, node: &Node) -> AppResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if load_node(&tx, &node.id)?.is_some() {
            return Err(AppError::conflict("node_exists", format!("node {} already exists", node.id)));
        }
        if let Some(p) = &node.parent_id {
            if load_node(&tx, p)?.is_none() {
                return Err(AppError::not_found("parent_not_found", format!("parent {} of {} not found", p, node.id)));
            }
        }
        tx.execute(
            "INSERT INTO hierarchy (id, parent_id, name, primary_type, mixin_types, is_version, is_proxy, target, lifecycle_state) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![node.id, node.parent_id, node.name, node.primary_type, mixins_to_sql(&node.mixin_types), node.is_version, node.is_proxy, node.target, node.lifecycle_state],
        )?;
        tx.commit()?;
        debug!(target: "strata::sql", "add_node id={} parent={:?}", node.id, node.parent_id);
        Ok(())
    }

    pub fn move_node(&self, id: &NodeId, new_parent: &NodeId) -> AppResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if load_node(&tx, new_parent)?.is_none() {
            return Err(AppError::not_found("parent_not_found", format!("parent {} not found", new_parent)));
        }
        if load_node(&tx, id)?.is_none() {
            return Err(AppError::not_found("node_not_found", format!("node {} not found", id)));
        }
        if in_tree(&tx, new_parent, id, self.max_depth)? {
            return Err(AppError::malformed("move_into_descendant", format!("cannot move {} under its own subtree {}", id, new_parent)));
        }
        tx.execute("UPDATE hierarchy SET parent_id = ?1 WHERE id = ?2", params![new_parent, id])?;
        tx.commit()?;
        debug!(target: "strata::sql", "move_node id={} new_parent={}", id, new_parent);
        Ok(())
    }

    /// Remove a node with its subtree, ACLs, locks and fulltext. Returns removed ids.
    pub fn remove_node(&self, id: &NodeId) -> AppResult<Vec<NodeId>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut removed = Vec::new();
        if load_node(&tx, id)?.is_none() { return Ok(removed); }
        let mut todo = vec![id.clone()];
        while let Some(cur) = todo.pop() {
            if removed.contains(&cur) { continue; }
            {
                let mut st = tx.prepare_cached("SELECT id FROM hierarchy WHERE parent_id = ?1")?;
                let kids = st.query_map([&cur], |r| r.get::<_, NodeId>(0))?;
                for k in kids { todo.push(k?); }
            }
            for sql in ["DELETE FROM acls WHERE node_id = ?1", "DELETE FROM locks WHERE node_id = ?1", "DELETE FROM fulltext WHERE node_id = ?1", "DELETE FROM hierarchy WHERE id = ?1"] {
                tx.execute(sql, [&cur])?;
            }
            removed.push(cur);
        }
        tx.commit()?;
        debug!(target: "strata::sql", "remove_node id={} removed={}", id, removed.len());
        Ok(removed)
    }

    pub fn set_acp(&self, id: &NodeId, acp: &Acp) -> AppResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        store_acp(&tx, id, acp)?;
        tx.commit()?;
        debug!(target: "strata::sql", "set_acp node={} aces={}", id, acp.ace_count());
        Ok(())
    }

    /// Append an ACE to the named ACL of a node.
    pub fn add_ace(&self, id: &NodeId, acl: &str, ace: Ace) -> AppResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut acp = load_acp(&tx, id)?.unwrap_or_default();
        acp.acl_mut(acl)?.add(ace);
        store_acp(&tx, id, &acp)?;
        tx.commit()?;
        Ok(())
    }

    pub fn replace_acl(&self, id: &NodeId, acl: Acl) -> AppResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut acp = load_acp(&tx, id)?.unwrap_or_default();
        acp.set_acl(acl);
        store_acp(&tx, id, &acp)?;
        tx.commit()?;
        Ok(())
    }

    pub fn set_fulltext(&self, id: &NodeId, body: &str) -> AppResult<()> {
        self.conn.lock().execute("INSERT OR REPLACE INTO fulltext (node_id, body) VALUES (?1, ?2)", params![id, body])?;
        Ok(())
    }

    /// Nodes under `base` (inclusive) that pass the security and fulltext
    /// clauses, in insertion order.
    ///
    /// `principals = None` searches without a security clause (administrators).
    /// `permissions` is a resolved permission set (the permission and its
    /// compounds). Only the ACL check happens here; callers post-filter with
    /// the policy chain.
    pub fn search(&self, base: &NodeId, principals: Option<&[String]>, permissions: &[String], fulltext: Option<&str>) -> AppResult<Vec<NodeId>> {
        let principals = principals.map(|p| p.join("|"));
        let permissions = permissions.join("|");
        let conn = self.conn.lock();
        let mut st = conn.prepare_cached(
            "SELECT h.id FROM hierarchy h LEFT JOIN fulltext f ON f.node_id = h.id \
             WHERE nx_in_tree(h.id, ?1) = 1 \
               AND (?2 IS NULL OR nx_access_allowed(h.id, ?2, ?3) = 1) \
               AND (?4 IS NULL OR nx_matches_fulltext(COALESCE(f.body, ''), ?4) = 1) \
             ORDER BY h.rowid",
        )?;
        let rows = st.query_map(params![base, principals, permissions, fulltext], |r| r.get::<_, NodeId>(0))?;
        let mut out = Vec::new();
        for r in rows { out.push(r?); }
        Ok(out)
    }

    /// `nx_access_allowed` for one node, outside a query.
    pub fn access_allowed(&self, id: &NodeId, principals: &[&str], permissions: &[&str]) -> AppResult<bool> {
        functions::access_allowed(&self.conn.lock(), id, principals, permissions, self.max_depth)
    }
}

impl Hierarchy for SqlRepository {
    fn get_node(&self, id: &NodeId) -> AppResult<Option<Node>> { load_node(&self.conn.lock(), id) }

    fn max_depth(&self) -> usize { self.max_depth }

    fn parent_of(&self, id: &NodeId) -> AppResult<Option<NodeId>> { functions::parent_of(&self.conn.lock(), id) }

    // Answered by the stored function so SQL and API callers agree.
    fn is_in_tree(&self, id: &NodeId, base: &NodeId) -> AppResult<bool> {
        let v: i64 = self.conn.lock().query_row("SELECT nx_in_tree(?1, ?2)", params![id, base], |r| r.get(0))?;
        Ok(v == 1)
    }

    fn ancestors(&self, id: &NodeId) -> AppResult<Vec<NodeId>> {
        let conn = self.conn.lock();
        walk_ancestors(id, self.max_depth, |n| functions::parent_of(&conn, n))
    }
}

impl AclSource for SqlRepository {
    fn get_acp(&self, id: &NodeId) -> AppResult<Option<Acp>> { load_acp(&self.conn.lock(), id) }
}

impl LockManager for SqlRepository {
    fn get_lock(&self, node: &NodeId) -> AppResult<Option<Lock>> { load_lock(&self.conn.lock(), node) }

    fn set_lock(&self, node: &NodeId, owner: &str) -> AppResult<Lock> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let lock = Lock::new(owner);
        let inserted = tx.execute("INSERT INTO locks (node_id, owner, created) VALUES (?1, ?2, ?3) ON CONFLICT(node_id) DO NOTHING", params![node, owner, ts_to_sql(&lock.created)])?;
        if inserted == 0 {
            let holder = load_lock(&tx, node)?.map(|l| l.owner).unwrap_or_default();
            return Err(AppError::lock_conflict(node, holder));
        }
        tx.commit()?;
        debug!(target: "strata::locks", "set_lock node={} owner={}", node, owner);
        Ok(lock)
    }

    fn clear_lock(&self, node: &NodeId, who: &UnlockAs) -> AppResult<Option<Lock>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(existing) = load_lock(&tx, node)? else { return Ok(None); };
        check_unlock(node, &existing, who)?;
        tx.execute("DELETE FROM locks WHERE node_id = ?1", [node])?;
        tx.commit()?;
        if let UnlockAs::Administrator(admin) = who {
            info!(target: "strata::locks", "administrator {} cleared lock of {} on node {}", admin, existing.owner, node);
        }
        Ok(Some(existing))
    }
}

impl LockRestore for SqlRepository {
    fn restore_lock(&self, node: &NodeId, owner: &str, created: DateTime<Utc>) -> AppResult<()> {
        self.conn.lock().execute("INSERT OR REPLACE INTO locks (node_id, owner, created) VALUES (?1, ?2, ?3)", params![node, owner, ts_to_sql(&created)])?;
        debug!(target: "strata::locks", "restore_lock node={} owner={}", node, owner);
        Ok(())
    }
}

#[cfg(test)]
#[path = "repository_tests.rs"]
mod repository_tests;
