//! Behavior every key-value backend must share. Slow backends run with short
//! declared latencies so expiry can be waited out.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use strata::kv::cache::CacheKvSettings;
use strata::kv::document::DocumentKvSettings;
use strata::kv::{CacheKeyValueStore, DocumentKeyValueStore, KeyValueStore, KeyValueStoreExt, MemoryKeyValueStore};
use strata::sql::{ConnectionSettings, SqlKeyValueStore, SqlKvSettings};

const SWEEP: Duration = Duration::from_millis(50);
const LATENCY: Duration = Duration::from_millis(250);

// keeps database files alive as long as the stores
struct Backends {
    _dir: TempDir,
    stores: Vec<Arc<dyn KeyValueStore>>,
}

fn backends() -> Backends {
    let dir = tempfile::tempdir().unwrap();
    let document = DocumentKvSettings { monitor_interval: SWEEP, ttl_expiration_latency: LATENCY };
    let sql = SqlKvSettings { cleanup_interval: SWEEP, ttl_expiration_latency: LATENCY };
    let sql_conn = ConnectionSettings { path: dir.path().join("kv.db").to_string_lossy().into_owned(), ..ConnectionSettings::default() };
    let stores: Vec<Arc<dyn KeyValueStore>> = vec![
        Arc::new(MemoryKeyValueStore::new("memory")),
        Arc::new(CacheKeyValueStore::new("cache", &CacheKvSettings { sweep_interval: SWEEP }).unwrap()),
        Arc::new(DocumentKeyValueStore::open(&dir.path().join("kv.redb"), "document", &document).unwrap()),
        Arc::new(SqlKeyValueStore::open(&sql_conn, "sql", &sql).unwrap()),
    ];
    Backends { _dir: dir, stores }
}

#[test]
fn put_get_remove() {
    let b = backends();
    for kv in &b.stores {
        assert_eq!(kv.get("a").unwrap(), None, "{}", kv.name());
        kv.put("a", b"1", None).unwrap();
        kv.put("a", b"2", None).unwrap();
        assert_eq!(kv.get("a").unwrap(), Some(b"2".to_vec()), "{}", kv.name());
        kv.remove("a").unwrap();
        kv.remove("a").unwrap();
        assert_eq!(kv.get("a").unwrap(), None, "{}", kv.name());
        kv.put_string("s", "héllo", None).unwrap();
        assert_eq!(kv.get_string("s").unwrap().as_deref(), Some("héllo"));
    }
}

#[test]
fn compare_and_set_semantics() {
    let b = backends();
    for kv in &b.stores {
        let n = kv.name().to_string();
        assert!(kv.compare_and_set("k", None, None, None).unwrap(), "{}: absent check", n);
        assert!(kv.compare_and_set("k", None, Some(b"v1"), None).unwrap(), "{}", n);
        assert!(!kv.compare_and_set("k", None, Some(b"x"), None).unwrap(), "{}: set-if-absent on present key", n);
        assert!(!kv.compare_and_set("k", None, None, None).unwrap(), "{}", n);
        assert!(!kv.compare_and_set("k", Some(b"nope"), Some(b"x"), None).unwrap(), "{}", n);
        assert!(kv.compare_and_set("k", Some(b"v1"), Some(b"v2"), None).unwrap(), "{}", n);
        assert!(!kv.compare_and_set("k", Some(b"v1"), None, None).unwrap(), "{}", n);
        assert!(kv.compare_and_set("k", Some(b"v2"), None, None).unwrap(), "{}: delete on match", n);
        assert_eq!(kv.get("k").unwrap(), None, "{}", n);
        assert!(!kv.compare_and_set("k", Some(b"v2"), Some(b"v3"), None).unwrap(), "{}", n);
    }
}

#[test]
fn expired_entries_are_gone_after_declared_latency() {
    let b = backends();
    for kv in &b.stores {
        kv.put("short", b"x", Some(Duration::from_millis(10))).unwrap();
        kv.put("long", b"y", Some(Duration::from_secs(3600))).unwrap();
        kv.put("reset", b"z", Some(Duration::from_millis(10))).unwrap();
        kv.put("reset", b"z", None).unwrap();
    }
    std::thread::sleep(Duration::from_millis(30));
    for kv in &b.stores {
        if !kv.has_slow_ttl_expiration() {
            assert_eq!(kv.get("short").unwrap(), None, "{} expires eagerly", kv.name());
        }
    }
    for kv in &b.stores {
        kv.sleep_for_ttl_expiration();
        assert_eq!(kv.get("short").unwrap(), None, "{}", kv.name());
        assert_eq!(kv.get("long").unwrap(), Some(b"y".to_vec()), "{}", kv.name());
        assert_eq!(kv.get("reset").unwrap(), Some(b"z".to_vec()), "{}: put without ttl clears expiry", kv.name());
    }
}

#[test]
fn capabilities_are_declared() {
    let b = backends();
    let slow: Vec<&str> = b.stores.iter().filter(|kv| kv.has_slow_ttl_expiration()).map(|kv| kv.name()).collect();
    assert_eq!(slow, vec!["document", "sql"]);
    for kv in &b.stores {
        let caps = kv.capabilities();
        if caps.slow_ttl_expiration {
            assert!(caps.ttl_expiration_latency >= LATENCY);
        } else {
            assert_eq!(caps.ttl_expiration_latency, Duration::ZERO);
        }
    }
}

#[test]
fn set_ttl_on_present_and_absent_keys() {
    let b = backends();
    for kv in &b.stores {
        assert!(!kv.set_ttl("missing", Some(Duration::from_millis(5))).unwrap(), "{}", kv.name());
        kv.put("k", b"v", None).unwrap();
        assert!(kv.set_ttl("k", Some(Duration::from_millis(5))).unwrap(), "{}", kv.name());
        kv.put("keep", b"v", Some(Duration::from_millis(5))).unwrap();
        assert!(kv.set_ttl("keep", None).unwrap());
    }
    std::thread::sleep(Duration::from_millis(20));
    for kv in &b.stores {
        kv.sleep_for_ttl_expiration();
        assert_eq!(kv.get("k").unwrap(), None, "{}", kv.name());
        assert_eq!(kv.get("keep").unwrap(), Some(b"v".to_vec()), "{}", kv.name());
    }
}

#[test]
fn counters_are_atomic_across_threads() {
    let b = backends();
    for kv in &b.stores {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let kv = kv.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 { kv.add_and_get("counter", 1).unwrap(); }
                })
            })
            .collect();
        for h in handles { h.join().unwrap(); }
        assert_eq!(kv.get_long("counter").unwrap(), Some(200), "{}", kv.name());
        assert_eq!(kv.add_and_get("counter", -201).unwrap(), -1);
        kv.put_string("word", "abc", None).unwrap();
        assert_eq!(kv.add_and_get("word", 1).unwrap_err().code_str(), "not_a_number", "{}", kv.name());
    }
}

#[test]
fn keys_get_many_and_clear() {
    let b = backends();
    for kv in &b.stores {
        for k in ["user/2", "user/1", "group/1", "user"] { kv.put(k, k.as_bytes(), None).unwrap(); }
        assert_eq!(kv.keys("user/").unwrap(), vec!["user/1", "user/2"], "{}", kv.name());
        assert_eq!(kv.keys("").unwrap(), vec!["group/1", "user", "user/1", "user/2"], "{}", kv.name());
        let many = kv.get_many(&["user/1", "nope", "group/1"]).unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many["group/1"], b"group/1".to_vec());
        kv.clear().unwrap();
        assert!(kv.keys("").unwrap().is_empty(), "{}", kv.name());
    }
}
