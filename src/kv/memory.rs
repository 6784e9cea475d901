//! In-process key-value store. Expiry is checked on every read.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::{expiry_after, is_expired, parse_counter, KeyValueStore, KvCapabilities};
use crate::error::{AppError, AppResult};

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn live(&self, now: DateTime<Utc>) -> bool { !is_expired(self.expires_at, now) }
}

pub struct MemoryKeyValueStore {
    name: String,
    map: RwLock<HashMap<String, Entry>>,
}

impl MemoryKeyValueStore {
    pub fn new(name: &str) -> Self { Self { name: name.to_string(), map: RwLock::new(HashMap::new()) } }

    /// Number of physically stored entries, expired ones included.
    pub fn len(&self) -> usize { self.map.read().len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Remove expired keys. Returns number removed.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut w = self.map.write();
        let before = w.len();
        w.retain(|_, e| e.live(now));
        before - w.len()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn name(&self) -> &str { &self.name }

    fn capabilities(&self) -> KvCapabilities { KvCapabilities::eager() }

    fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> AppResult<()> {
        let ent = Entry { value: value.to_vec(), expires_at: expiry_after(ttl) };
        self.map.write().insert(key.to_string(), ent);
        Ok(())
    }

    fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        let now = Utc::now();
        {
            let r = self.map.read();
            match r.get(key) {
                None => return Ok(None),
                Some(e) if e.live(now) => return Ok(Some(e.value.clone())),
                Some(_) => {}
            }
        }
        // expired: drop it, unless it was rewritten in between
        let mut w = self.map.write();
        if w.get(key).map(|e| !e.live(now)).unwrap_or(false) { w.remove(key); }
        Ok(w.get(key).filter(|e| e.live(now)).map(|e| e.value.clone()))
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn compare_and_set(&self, key: &str, expected: Option<&[u8]>, new_value: Option<&[u8]>, ttl: Option<Duration>) -> AppResult<bool> {
        let now = Utc::now();
        let mut w = self.map.write();
        let current = w.get(key).filter(|e| e.live(now)).map(|e| e.value.as_slice());
        if current != expected { return Ok(false); }
        match new_value {
            Some(v) => { w.insert(key.to_string(), Entry { value: v.to_vec(), expires_at: expiry_after(ttl) }); }
            None => { w.remove(key); }
        }
        debug!(target: "strata::kv", "{}: compare_and_set key={} applied", self.name, key);
        Ok(true)
    }

    fn set_ttl(&self, key: &str, ttl: Option<Duration>) -> AppResult<bool> {
        let now = Utc::now();
        let mut w = self.map.write();
        match w.get_mut(key) {
            Some(e) if e.live(now) => { e.expires_at = expiry_after(ttl); Ok(true) }
            _ => Ok(false),
        }
    }

    fn keys(&self, prefix: &str) -> AppResult<Vec<String>> {
        let now = Utc::now();
        let mut out: Vec<String> = self.map.read().iter().filter(|(k, e)| k.starts_with(prefix) && e.live(now)).map(|(k, _)| k.clone()).collect();
        out.sort();
        Ok(out)
    }

    fn purge_expired(&self) -> AppResult<usize> { Ok(self.sweep()) }

    fn clear(&self) -> AppResult<()> {
        self.map.write().clear();
        Ok(())
    }

    // Single write lock; the expiry of an existing counter is kept.
    fn add_and_get(&self, key: &str, delta: i64) -> AppResult<i64> {
        let now = Utc::now();
        let mut w = self.map.write();
        let (base, expires_at) = match w.get(key).filter(|e| e.live(now)) {
            Some(e) => (parse_counter(key, &e.value)?, e.expires_at),
            None => (0, None),
        };
        let next = base.checked_add(delta).ok_or_else(|| AppError::malformed("counter_overflow", format!("counter {} overflows", key)))?;
        w.insert(key.to_string(), Entry { value: next.to_string().into_bytes(), expires_at });
        Ok(next)
    }
}
