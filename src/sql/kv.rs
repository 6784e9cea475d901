//! Key-value store in a SQLite table.
//!
//! Expiry is an epoch-millisecond column. Reads return expired rows until the
//! cleanup thread deletes them, so the store declares slow TTL expiration.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{open_connection, ConnectionSettings};
use crate::error::{AppError, AppResult};
use crate::kv::sweeper::Sweeper;
use crate::kv::{expiry_millis, parse_counter, KeyValueStore, KvCapabilities};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value BLOB NOT NULL, ttl INTEGER)";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlKvSettings {
    #[serde(default = "SqlKvSettings::default_cleanup_interval", with = "crate::config::duration_ms")]
    pub cleanup_interval: Duration,
    #[serde(default = "SqlKvSettings::default_latency", with = "crate::config::duration_ms")]
    pub ttl_expiration_latency: Duration,
}

impl SqlKvSettings {
    fn default_cleanup_interval() -> Duration { Duration::from_secs(60) }
    fn default_latency() -> Duration { Duration::from_secs(70) }
}

impl Default for SqlKvSettings {
    fn default() -> Self { Self { cleanup_interval: Self::default_cleanup_interval(), ttl_expiration_latency: Self::default_latency() } }
}

struct Inner {
    name: String,
    conn: Mutex<Connection>,
}

impl Inner {
    fn cleanup(&self) -> AppResult<usize> {
        let now = Utc::now().timestamp_millis();
        Ok(self.conn.lock().execute("DELETE FROM kv WHERE ttl IS NOT NULL AND ttl <= ?1", [now])?)
    }
}

fn current(conn: &Connection, key: &str) -> AppResult<Option<(Vec<u8>, Option<i64>)>> {
    let row = conn
        .query_row("SELECT value, ttl FROM kv WHERE key = ?1", [key], |r| Ok((r.get::<_, Vec<u8>>(0)?, r.get::<_, Option<i64>>(1)?)))
        .optional()?;
    Ok(row)
}

fn write(conn: &Connection, key: &str, value: &[u8], ttl_ms: Option<i64>) -> AppResult<()> {
    conn.execute("INSERT OR REPLACE INTO kv (key, value, ttl) VALUES (?1, ?2, ?3)", params![key, value, ttl_ms])?;
    Ok(())
}

pub struct SqlKeyValueStore {
    _cleanup: Sweeper,
    inner: Arc<Inner>,
    latency: Duration,
}

impl SqlKeyValueStore {
    pub fn open(conn: &ConnectionSettings, name: &str, settings: &SqlKvSettings) -> AppResult<Self> {
        let c = open_connection(conn)?;
        c.execute_batch(SCHEMA)?;
        let inner = Arc::new(Inner { name: name.to_string(), conn: Mutex::new(c) });
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let cleanup = Sweeper::spawn(name, settings.cleanup_interval, move || {
            let inner = weak.upgrade()?;
            match inner.cleanup() {
                Ok(n) => Some(n),
                Err(e) => { warn!(target: "strata::kv", "{}: TTL cleanup failed: {}", inner.name, e); Some(0) }
            }
        })?;
        info!(target: "strata::kv", "sql store {} opened at {}", name, conn.path);
        Ok(Self { _cleanup: cleanup, inner, latency: settings.ttl_expiration_latency.max(settings.cleanup_interval) })
    }
}

impl KeyValueStore for SqlKeyValueStore {
    fn name(&self) -> &str { &self.inner.name }

    fn capabilities(&self) -> KvCapabilities { KvCapabilities::slow(self.latency) }

    fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> AppResult<()> { write(&self.inner.conn.lock(), key, value, expiry_millis(ttl)) }

    fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> { Ok(current(&self.inner.conn.lock(), key)?.map(|(v, _)| v)) }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.inner.conn.lock().execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(())
    }

    fn compare_and_set(&self, key: &str, expected: Option<&[u8]>, new_value: Option<&[u8]>, ttl: Option<Duration>) -> AppResult<bool> {
        let mut conn = self.inner.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let cur = current(&tx, key)?;
        if cur.as_ref().map(|(v, _)| v.as_slice()) != expected {
            debug!(target: "strata::kv", "{}: compare_and_set key={} applied=false", self.inner.name, key);
            return Ok(false);
        }
        match (cur.is_some(), new_value) {
            (_, Some(v)) => write(&tx, key, v, expiry_millis(ttl))?,
            (true, None) => { tx.execute("DELETE FROM kv WHERE key = ?1", [key])?; }
            (false, None) => {}
        }
        tx.commit()?;
        debug!(target: "strata::kv", "{}: compare_and_set key={} applied=true", self.inner.name, key);
        Ok(true)
    }

    fn set_ttl(&self, key: &str, ttl: Option<Duration>) -> AppResult<bool> {
        let n = self.inner.conn.lock().execute("UPDATE kv SET ttl = ?1 WHERE key = ?2", params![expiry_millis(ttl), key])?;
        Ok(n > 0)
    }

    fn keys(&self, prefix: &str) -> AppResult<Vec<String>> {
        let conn = self.inner.conn.lock();
        let mut st = conn.prepare_cached("SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")?;
        let rows = st.query_map([prefix], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows { out.push(r?); }
        Ok(out)
    }

    fn clear(&self) -> AppResult<()> {
        self.inner.conn.lock().execute("DELETE FROM kv", [])?;
        Ok(())
    }

    /// One cleanup pass, outside the schedule.
    fn purge_expired(&self) -> AppResult<usize> { self.inner.cleanup() }

    // One transaction; the row's expiry is kept.
    fn add_and_get(&self, key: &str, delta: i64) -> AppResult<i64> {
        let mut conn = self.inner.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let (base, ttl) = match current(&tx, key)? { Some((v, ttl)) => (parse_counter(key, &v)?, ttl), None => (0, None) };
        let next = base.checked_add(delta).ok_or_else(|| AppError::malformed("counter_overflow", format!("counter {} overflows", key)))?;
        write(&tx, key, next.to_string().as_bytes(), ttl)?;
        tx.commit()?;
        Ok(next)
    }
}
