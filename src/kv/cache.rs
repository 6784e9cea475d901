//! Cache-oriented key-value store on a sharded concurrent map.
//!
//! Reads check expiry like the in-process store; a periodic sweep keeps
//! expired entries that are never read again from piling up.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::sweeper::Sweeper;
use super::{expiry_after, is_expired, parse_counter, KeyValueStore, KvCapabilities};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheKvSettings {
    #[serde(default = "CacheKvSettings::default_sweep_interval", with = "crate::config::duration_ms")]
    pub sweep_interval: Duration,
}

impl CacheKvSettings {
    fn default_sweep_interval() -> Duration { Duration::from_secs(30) }
}

impl Default for CacheKvSettings {
    fn default() -> Self { Self { sweep_interval: Self::default_sweep_interval() } }
}

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

type Map = DashMap<String, Entry>;

fn sweep(map: &Map) -> usize {
    let now = Utc::now();
    let before = map.len();
    map.retain(|_, e| !is_expired(e.expires_at, now));
    before.saturating_sub(map.len())
}

pub struct CacheKeyValueStore {
    _sweeper: Sweeper,
    name: String,
    map: Arc<Map>,
}

impl CacheKeyValueStore {
    pub fn new(name: &str, settings: &CacheKvSettings) -> AppResult<Self> {
        let map: Arc<Map> = Arc::new(DashMap::new());
        let weak: Weak<Map> = Arc::downgrade(&map);
        let sweeper = Sweeper::spawn(name, settings.sweep_interval, move || weak.upgrade().map(|m| sweep(&m)))?;
        Ok(Self { _sweeper: sweeper, name: name.to_string(), map })
    }

    /// Physically stored entries, expired ones included.
    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }

    pub fn sweep(&self) -> usize { sweep(&self.map) }
}

impl KeyValueStore for CacheKeyValueStore {
    fn name(&self) -> &str { &self.name }

    fn capabilities(&self) -> KvCapabilities { KvCapabilities::eager() }

    fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> AppResult<()> {
        self.map.insert(key.to_string(), Entry { value: value.to_vec(), expires_at: expiry_after(ttl) });
        Ok(())
    }

    fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        let now = Utc::now();
        if let Some(e) = self.map.get(key) {
            if !is_expired(e.expires_at, now) { return Ok(Some(e.value.clone())); }
        }
        self.map.remove_if(key, |_, e| is_expired(e.expires_at, now));
        Ok(None)
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.map.remove(key);
        Ok(())
    }

    fn compare_and_set(&self, key: &str, expected: Option<&[u8]>, new_value: Option<&[u8]>, ttl: Option<Duration>) -> AppResult<bool> {
        let now = Utc::now();
        // the entry guard holds the shard lock for the whole check-and-write
        match self.map.entry(key.to_string()) {
            MapEntry::Occupied(mut o) => {
                let live = !is_expired(o.get().expires_at, now);
                let current = if live { Some(o.get().value.as_slice()) } else { None };
                if current != expected { return Ok(false); }
                match new_value {
                    Some(v) => { o.insert(Entry { value: v.to_vec(), expires_at: expiry_after(ttl) }); }
                    None => { o.remove(); }
                }
                Ok(true)
            }
            MapEntry::Vacant(v) => {
                if expected.is_some() { return Ok(false); }
                if let Some(nv) = new_value { v.insert(Entry { value: nv.to_vec(), expires_at: expiry_after(ttl) }); }
                Ok(true)
            }
        }
    }

    fn set_ttl(&self, key: &str, ttl: Option<Duration>) -> AppResult<bool> {
        let now = Utc::now();
        match self.map.get_mut(key) {
            Some(mut e) if !is_expired(e.expires_at, now) => { e.expires_at = expiry_after(ttl); Ok(true) }
            _ => Ok(false),
        }
    }

    fn keys(&self, prefix: &str) -> AppResult<Vec<String>> {
        let now = Utc::now();
        let mut out: Vec<String> = self.map.iter().filter(|r| r.key().starts_with(prefix) && !is_expired(r.value().expires_at, now)).map(|r| r.key().clone()).collect();
        out.sort();
        Ok(out)
    }

    fn purge_expired(&self) -> AppResult<usize> { Ok(self.sweep()) }

    fn clear(&self) -> AppResult<()> {
        self.map.clear();
        Ok(())
    }

    fn add_and_get(&self, key: &str, delta: i64) -> AppResult<i64> {
        let now = Utc::now();
        let mut slot = self.map.entry(key.to_string()).or_insert_with(|| Entry { value: b"0".to_vec(), expires_at: None });
        if is_expired(slot.expires_at, now) { *slot = Entry { value: b"0".to_vec(), expires_at: None }; }
        let next = parse_counter(key, &slot.value)?
            .checked_add(delta)
            .ok_or_else(|| AppError::malformed("counter_overflow", format!("counter {} overflows", key)))?;
        slot.value = next.to_string().into_bytes();
        Ok(next)
    }
}
