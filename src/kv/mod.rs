//! Key-value abstraction with TTL semantics shared by every backend.
//!
//! Backends differ only in how fast expired entries disappear. Eager backends
//! check expiry on every read. Slow backends leave expired entries readable
//! until a background sweep removes them, and declare it through
//! [`KvCapabilities`] so callers and tests can wait out the latency.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

pub mod cache;
pub mod document;
pub mod memory;
pub mod sweeper;

pub use cache::CacheKeyValueStore;
pub use document::DocumentKeyValueStore;
pub use memory::MemoryKeyValueStore;

/// Declared TTL behavior of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvCapabilities {
    /// Expired entries may stay readable until a background sweep runs.
    pub slow_ttl_expiration: bool,
    /// Worst-case delay between expiry and removal. A lower bound for waits.
    pub ttl_expiration_latency: Duration,
}

impl KvCapabilities {
    pub fn eager() -> Self { Self { slow_ttl_expiration: false, ttl_expiration_latency: Duration::ZERO } }
    pub fn slow(latency: Duration) -> Self { Self { slow_ttl_expiration: true, ttl_expiration_latency: latency } }
}

pub trait KeyValueStore: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> KvCapabilities;

    /// Store `value`. A TTL replaces any previous expiry; `None` clears it.
    fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> AppResult<()>;

    fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>>;

    /// Idempotent.
    fn remove(&self, key: &str) -> AppResult<()>;

    /// Atomic per key.
    /// - `expected = None`: set only if absent.
    /// - `new_value = None`: delete only if the current value equals `expected`.
    /// - both `None`: succeed only if absent, without writing.
    fn compare_and_set(&self, key: &str, expected: Option<&[u8]>, new_value: Option<&[u8]>, ttl: Option<Duration>) -> AppResult<bool>;

    /// Replace the expiry of an existing key. False if the key is absent.
    fn set_ttl(&self, key: &str, ttl: Option<Duration>) -> AppResult<bool>;

    /// Keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> AppResult<Vec<String>>;

    fn clear(&self) -> AppResult<()>;

    /// Add `delta` to a counter stored as decimal text. An absent key starts at 0.
    fn add_and_get(&self, key: &str, delta: i64) -> AppResult<i64> {
        loop {
            let current = self.get(key)?;
            let base = match &current { Some(b) => parse_counter(key, b)?, None => 0 };
            let next = base.checked_add(delta).ok_or_else(|| AppError::malformed("counter_overflow", format!("counter {} overflows", key)))?;
            if self.compare_and_set(key, current.as_deref(), Some(next.to_string().as_bytes()), None)? { return Ok(next); }
        }
    }

    fn get_many(&self, keys: &[&str]) -> AppResult<HashMap<String, Vec<u8>>> {
        let mut out = HashMap::new();
        for k in keys {
            if let Some(v) = self.get(k)? { out.insert(k.to_string(), v); }
        }
        Ok(out)
    }

    /// Physically remove expired entries now. Returns how many were removed.
    fn purge_expired(&self) -> AppResult<usize> { Ok(0) }

    fn has_slow_ttl_expiration(&self) -> bool { self.capabilities().slow_ttl_expiration }

    /// Block for the declared worst-case expiration latency. Test harness use only.
    fn sleep_for_ttl_expiration(&self) {
        let caps = self.capabilities();
        if caps.slow_ttl_expiration { std::thread::sleep(caps.ttl_expiration_latency); }
    }
}

/// String and counter helpers over the byte-level API.
pub trait KeyValueStoreExt: KeyValueStore {
    fn put_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> { self.put(key, value.as_bytes(), ttl) }

    fn get_string(&self, key: &str) -> AppResult<Option<String>> {
        match self.get(key)? {
            None => Ok(None),
            Some(b) => String::from_utf8(b).map(Some).map_err(|_| AppError::malformed("not_a_string", format!("value of {} is not UTF-8", key))),
        }
    }

    fn get_long(&self, key: &str) -> AppResult<Option<i64>> {
        match self.get(key)? {
            None => Ok(None),
            Some(b) => parse_counter(key, &b).map(Some),
        }
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStoreExt for T {}

/// Decimal text to i64, MalformedInput otherwise.
pub fn parse_counter(key: &str, bytes: &[u8]) -> AppResult<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| AppError::malformed("not_a_number", format!("value of {} is not a number", key)))
}

/// Absolute expiry for a TTL from now. Out-of-range TTLs never expire.
pub fn expiry_after(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    let d = chrono::Duration::from_std(ttl?).ok()?;
    Utc::now().checked_add_signed(d)
}

pub fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool { expires_at.map(|e| e <= now).unwrap_or(false) }

/// Millisecond epoch form used by persistent backends.
pub fn expiry_millis(ttl: Option<Duration>) -> Option<i64> { expiry_after(ttl).map(|t| t.timestamp_millis()) }
