//! Document-oriented key-value store on redb.
//!
//! Each key holds one bincode document `{value, expires_at_ms}`. Reads do not
//! look at the expiry: expired documents stay visible until the TTL monitor
//! thread deletes them, so the store declares slow TTL expiration.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::sweeper::Sweeper;
use super::{expiry_millis, parse_counter, KeyValueStore, KvCapabilities};
use crate::error::{AppError, AppResult};

const DOCS: TableDefinition<&str, &[u8]> = TableDefinition::new("kv_documents");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentKvSettings {
    /// Period of the TTL monitor.
    #[serde(default = "DocumentKvSettings::default_monitor_interval", with = "crate::config::duration_ms")]
    pub monitor_interval: Duration,
    /// Declared worst-case expiration latency. Must cover at least one monitor period.
    #[serde(default = "DocumentKvSettings::default_latency", with = "crate::config::duration_ms")]
    pub ttl_expiration_latency: Duration,
}

impl DocumentKvSettings {
    fn default_monitor_interval() -> Duration { Duration::from_secs(60) }
    fn default_latency() -> Duration { Duration::from_secs(70) }
}

impl Default for DocumentKvSettings {
    fn default() -> Self { Self { monitor_interval: Self::default_monitor_interval(), ttl_expiration_latency: Self::default_latency() } }
}

#[derive(Serialize, Deserialize)]
struct Doc {
    value: Vec<u8>,
    expires_at_ms: Option<i64>,
}

fn db<E: std::fmt::Display>(e: E) -> AppError { AppError::backend("redb", e) }

fn encode(doc: &Doc) -> AppResult<Vec<u8>> { bincode::serialize(doc).map_err(|e| AppError::internal("kv_encode", e.to_string())) }

fn decode(key: &str, bytes: &[u8]) -> AppResult<Doc> {
    bincode::deserialize(bytes).map_err(|e| AppError::internal("kv_decode", format!("document {}: {}", key, e)))
}

struct Inner {
    name: String,
    db: Database,
}

impl Inner {
    /// Delete documents whose expiry has passed. Returns number removed.
    fn purge_expired(&self) -> AppResult<usize> {
        let now = Utc::now().timestamp_millis();
        let tx = self.db.begin_write().map_err(db)?;
        let removed = {
            let mut t = tx.open_table(DOCS).map_err(db)?;
            let mut expired: Vec<String> = Vec::new();
            for entry in t.range::<&str>(..).map_err(db)? {
                let (k, v) = entry.map_err(db)?;
                let doc = decode(k.value(), v.value())?;
                if doc.expires_at_ms.map(|e| e <= now).unwrap_or(false) { expired.push(k.value().to_string()); }
            }
            for k in &expired { t.remove(k.as_str()).map_err(db)?; }
            expired.len()
        };
        tx.commit().map_err(db)?;
        Ok(removed)
    }

    fn read_doc(&self, key: &str) -> AppResult<Option<Doc>> {
        let rtx = self.db.begin_read().map_err(db)?;
        let t = rtx.open_table(DOCS).map_err(db)?;
        let bytes = t.get(key).map_err(db)?.map(|g| g.value().to_vec());
        bytes.map(|b| decode(key, &b)).transpose()
    }

    /// Run `f` on the current document inside one write transaction. `f`
    /// returns the document to store (`None` deletes) and the result.
    fn update<T>(&self, key: &str, f: impl FnOnce(Option<Doc>) -> AppResult<(Option<Option<Doc>>, T)>) -> AppResult<T> {
        let tx = self.db.begin_write().map_err(db)?;
        let out = {
            let mut t = tx.open_table(DOCS).map_err(db)?;
            let current = t.get(key).map_err(db)?.map(|g| g.value().to_vec());
            let current = current.map(|b| decode(key, &b)).transpose()?;
            let (write, out) = f(current)?;
            match write {
                Some(Some(doc)) => { t.insert(key, encode(&doc)?.as_slice()).map_err(db)?; }
                Some(None) => { t.remove(key).map_err(db)?; }
                None => {}
            }
            out
        };
        tx.commit().map_err(db)?;
        Ok(out)
    }
}

pub struct DocumentKeyValueStore {
    // dropped first: stops the monitor before the database closes
    _monitor: Sweeper,
    inner: Arc<Inner>,
    latency: Duration,
}

impl DocumentKeyValueStore {
    pub fn open(path: &Path, name: &str, settings: &DocumentKvSettings) -> AppResult<Self> {
        let database = Database::create(path).map_err(db)?;
        {
            let tx = database.begin_write().map_err(db)?;
            tx.open_table(DOCS).map_err(db)?;
            tx.commit().map_err(db)?;
        }
        let inner = Arc::new(Inner { name: name.to_string(), db: database });
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let monitor = Sweeper::spawn(name, settings.monitor_interval, move || {
            let inner = weak.upgrade()?;
            match inner.purge_expired() {
                Ok(n) => Some(n),
                Err(e) => { warn!(target: "strata::kv", "{}: TTL monitor pass failed: {}", inner.name, e); Some(0) }
            }
        })?;
        info!(target: "strata::kv", "document store {} opened at {}", name, path.display());
        Ok(Self { _monitor: monitor, inner, latency: settings.ttl_expiration_latency.max(settings.monitor_interval) })
    }
}

impl KeyValueStore for DocumentKeyValueStore {
    fn name(&self) -> &str { &self.inner.name }

    fn capabilities(&self) -> KvCapabilities { KvCapabilities::slow(self.latency) }

    fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> AppResult<()> {
        let doc = Doc { value: value.to_vec(), expires_at_ms: expiry_millis(ttl) };
        self.inner.update(key, |_| Ok((Some(Some(doc)), ())))
    }

    fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> { Ok(self.inner.read_doc(key)?.map(|d| d.value)) }

    fn remove(&self, key: &str) -> AppResult<()> { self.inner.update(key, |_| Ok((Some(None), ()))) }

    fn compare_and_set(&self, key: &str, expected: Option<&[u8]>, new_value: Option<&[u8]>, ttl: Option<Duration>) -> AppResult<bool> {
        let applied = self.inner.update(key, |cur| {
            if cur.as_ref().map(|d| d.value.as_slice()) != expected { return Ok((None, false)); }
            let write = match (cur.is_some(), new_value) {
                (_, Some(v)) => Some(Some(Doc { value: v.to_vec(), expires_at_ms: expiry_millis(ttl) })),
                (true, None) => Some(None),
                (false, None) => None,
            };
            Ok((write, true))
        })?;
        debug!(target: "strata::kv", "{}: compare_and_set key={} applied={}", self.inner.name, key, applied);
        Ok(applied)
    }

    fn set_ttl(&self, key: &str, ttl: Option<Duration>) -> AppResult<bool> {
        self.inner.update(key, |cur| match cur {
            Some(mut d) => { d.expires_at_ms = expiry_millis(ttl); Ok((Some(Some(d)), true)) }
            None => Ok((None, false)),
        })
    }

    fn keys(&self, prefix: &str) -> AppResult<Vec<String>> {
        let rtx = self.inner.db.begin_read().map_err(db)?;
        let t = rtx.open_table(DOCS).map_err(db)?;
        let mut out = Vec::new();
        for entry in t.range(prefix..).map_err(db)? {
            let (k, _) = entry.map_err(db)?;
            if !k.value().starts_with(prefix) { break; }
            out.push(k.value().to_string());
        }
        Ok(out)
    }

    fn clear(&self) -> AppResult<()> {
        let tx = self.inner.db.begin_write().map_err(db)?;
        tx.delete_table(DOCS).map_err(db)?;
        tx.open_table(DOCS).map_err(db)?;
        tx.commit().map_err(db)?;
        Ok(())
    }

    /// One TTL monitor pass, outside the schedule.
    fn purge_expired(&self) -> AppResult<usize> { self.inner.purge_expired() }

    // One write transaction; the document's expiry is kept.
    fn add_and_get(&self, key: &str, delta: i64) -> AppResult<i64> {
        self.inner.update(key, |cur| {
            let (base, expires_at_ms) = match &cur { Some(d) => (parse_counter(key, &d.value)?, d.expires_at_ms), None => (0, None) };
            let next = base.checked_add(delta).ok_or_else(|| AppError::malformed("counter_overflow", format!("counter {} overflows", key)))?;
            Ok((Some(Some(Doc { value: next.to_string().into_bytes(), expires_at_ms })), next))
        })
    }
}
