//! Stored functions registered on every connection. All return 0 or 1.
//!
//! - `nx_in_tree(id, base_id)`
//! - `nx_access_allowed(id, principals, permissions)` with `|`-separated lists
//! - `nx_matches_fulltext(text, query)`
//!
//! Each is a thin shim: it converts SQL values, then calls the same code the
//! in-process backends use (`walk_is_in_tree`, `merged_acp_with` plus
//! `evaluate_acp`, `fulltext::matches`).

use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension};

use super::repository::{load_acp, load_node};
use crate::error::{AppError, AppResult};
use crate::fulltext;
use crate::hierarchy::walk_is_in_tree;
use crate::model::NodeId;
use crate::security::acl::merged_acp_with;
use crate::security::resolver::evaluate_acp;

fn user_err(e: AppError) -> rusqlite::Error { rusqlite::Error::UserFunctionError(Box::new(e)) }

/// TEXT or INTEGER id argument. NULL yields `None`.
fn id_arg(ctx: &Context<'_>, idx: usize) -> rusqlite::Result<Option<NodeId>> {
    match ctx.get_raw(idx) {
        ValueRef::Null => Ok(None),
        ValueRef::Integer(i) => Ok(Some(NodeId::Int(i))),
        ValueRef::Text(t) => std::str::from_utf8(t).map(|s| Some(NodeId::Str(s.to_string()))).map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e))),
        _ => Err(user_err(AppError::malformed("bad_node_id", format!("argument {} is neither TEXT nor INTEGER", idx)))),
    }
}

fn text_arg(ctx: &Context<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    match ctx.get_raw(idx) {
        ValueRef::Null => Ok(None),
        ValueRef::Text(t) => Ok(Some(String::from_utf8_lossy(t).into_owned())),
        ValueRef::Integer(i) => Ok(Some(i.to_string())),
        _ => Err(user_err(AppError::malformed("bad_argument", format!("argument {} is not TEXT", idx)))),
    }
}

/// `a|b|c` to a list, empty items dropped.
pub fn split_list(s: &str) -> Vec<&str> { s.split('|').map(str::trim).filter(|x| !x.is_empty()).collect() }

pub(crate) fn parent_of(conn: &Connection, id: &NodeId) -> AppResult<Option<NodeId>> {
    let mut st = conn.prepare_cached("SELECT parent_id FROM hierarchy WHERE id = ?1")?;
    Ok(st.query_row([id], |r| r.get::<_, Option<NodeId>>(0)).optional()?.flatten())
}

pub fn in_tree(conn: &Connection, id: &NodeId, base: &NodeId, max_depth: usize) -> AppResult<bool> {
    walk_is_in_tree(id, base, max_depth, |n| parent_of(conn, n))
}

pub fn access_allowed(conn: &Connection, id: &NodeId, principals: &[&str], permissions: &[&str], max_depth: usize) -> AppResult<bool> {
    let acp = merged_acp_with(id, max_depth, |n| load_node(conn, n), |n| load_acp(conn, n))?;
    Ok(evaluate_acp(&acp, principals, permissions).allow)
}

pub fn register(conn: &Connection, max_depth: usize) -> AppResult<()> {
    let flags = FunctionFlags::SQLITE_UTF8;
    conn.create_scalar_function("nx_in_tree", 2, flags, move |ctx| {
        let (Some(id), Some(base)) = (id_arg(ctx, 0)?, id_arg(ctx, 1)?) else { return Ok(0i64) };
        // SAFETY: read-only queries on the calling connection; the connection outlives this call.
        let conn = unsafe { ctx.get_connection()? };
        in_tree(&conn, &id, &base, max_depth).map(i64::from).map_err(user_err)
    })?;
    conn.create_scalar_function("nx_access_allowed", 3, flags, move |ctx| {
        let Some(id) = id_arg(ctx, 0)? else { return Ok(0i64) };
        let principals = text_arg(ctx, 1)?.unwrap_or_default();
        let permissions = text_arg(ctx, 2)?.unwrap_or_default();
        // SAFETY: as above
        let conn = unsafe { ctx.get_connection()? };
        access_allowed(&conn, &id, &split_list(&principals), &split_list(&permissions), max_depth).map(i64::from).map_err(user_err)
    })?;
    conn.create_scalar_function("nx_matches_fulltext", 2, flags | FunctionFlags::SQLITE_DETERMINISTIC, |ctx| {
        let text = text_arg(ctx, 0)?.unwrap_or_default();
        let query = text_arg(ctx, 1)?.unwrap_or_default();
        Ok(i64::from(fulltext::matches(&text, &query)))
    })?;
    Ok(())
}

#[cfg(test)]
#[path = "functions_tests.rs"]
mod functions_tests;
