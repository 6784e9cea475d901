//! Runtime configuration: a JSON file with `STRATA_*` environment overrides.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::hierarchy::DEFAULT_MAX_TREE_DEPTH;
use crate::kv::cache::CacheKvSettings;
use crate::kv::document::DocumentKvSettings;
use crate::kv::{CacheKeyValueStore, DocumentKeyValueStore, KeyValueStore, MemoryKeyValueStore};
use crate::security::{AdministratorPolicy, LockedDocumentPolicy, PermissionRegistry, PolicyChain, SecurityResolver, TypeDenyPolicy, DEFAULT_PERMISSIONS};
use crate::sql::{ConnectionSettings, SqlKeyValueStore, SqlKvSettings};

/// Serde adapter storing a `Duration` as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> { s.serialize_u64(d.as_millis() as u64) }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> { Ok(Duration::from_millis(u64::deserialize(d)?)) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvBackend {
    #[default]
    Memory,
    Cache,
    Document,
    Sql,
}

impl KvBackend {
    pub fn parse(s: &str) -> AppResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(KvBackend::Memory),
            "cache" => Ok(KvBackend::Cache),
            "document" | "redb" => Ok(KvBackend::Document),
            "sql" | "sqlite" => Ok(KvBackend::Sql),
            other => Err(AppError::malformed("bad_kv_backend", format!("unknown key-value backend {:?}", other))),
        }
    }
}

/// A primary type whose listed permissions are denied regardless of ACLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeniedType {
    pub primary_type: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    #[serde(default)]
    pub backend: KvBackend,
    #[serde(default = "KvConfig::default_name")]
    pub name: String,
    /// Database file for the document and sql backends.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub cache: CacheKvSettings,
    #[serde(default)]
    pub document: DocumentKvSettings,
    #[serde(default)]
    pub sql: SqlKvSettings,
}

impl KvConfig {
    fn default_name() -> String { "default".to_string() }
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            backend: KvBackend::default(),
            name: Self::default_name(),
            path: None,
            cache: CacheKvSettings::default(),
            document: DocumentKvSettings::default(),
            sql: SqlKvSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "CoreConfig::default_max_tree_depth")]
    pub max_tree_depth: usize,
    #[serde(default)]
    pub administrators: Vec<String>,
    #[serde(default)]
    pub denied_types: Vec<DeniedType>,
    /// Deny write permissions on documents locked by someone else.
    #[serde(default = "CoreConfig::default_true")]
    pub lock_policy: bool,
    #[serde(default)]
    pub kv: KvConfig,
    /// Connection property string of the SQL repository.
    #[serde(default)]
    pub sql_properties: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_tree_depth: Self::default_max_tree_depth(),
            administrators: Vec::new(),
            denied_types: Vec::new(),
            lock_policy: true,
            kv: KvConfig::default(),
            sql_properties: String::new(),
        }
    }
}

fn env_list(v: &str) -> Vec<String> { v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect() }

impl CoreConfig {
    fn default_max_tree_depth() -> usize { DEFAULT_MAX_TREE_DEPTH }
    fn default_true() -> bool { true }

    pub fn from_json(text: &str) -> AppResult<Self> {
        serde_json::from_str(text).map_err(|e| AppError::malformed("bad_config", format!("invalid configuration: {}", e)))
    }

    /// Read a JSON file then apply environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let mut cfg = Self::from_json(&text).with_context(|| format!("parsing config {}", path.display()))?;
        cfg.apply_env()?;
        info!(target: "strata::config", "loaded configuration from {}", path.display());
        Ok(cfg)
    }

    pub fn apply_env(&mut self) -> AppResult<()> { self.apply_overrides(|k| std::env::var(k).ok()) }

    /// Apply `STRATA_*` overrides from `lookup`.
    pub fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) -> AppResult<()> {
        if let Some(v) = lookup("STRATA_MAX_TREE_DEPTH") {
            self.max_tree_depth = v.trim().parse().map_err(|_| AppError::malformed("bad_config", format!("STRATA_MAX_TREE_DEPTH is not a number: {:?}", v)))?;
        }
        if let Some(v) = lookup("STRATA_ADMINISTRATORS") { self.administrators = env_list(&v); }
        if let Some(v) = lookup("STRATA_KV_BACKEND") { self.kv.backend = KvBackend::parse(&v)?; }
        if let Some(v) = lookup("STRATA_KV_PATH") { self.kv.path = Some(PathBuf::from(v)); }
        if let Some(v) = lookup("STRATA_KV_TTL_LATENCY_MS") {
            let ms: u64 = v.trim().parse().map_err(|_| AppError::malformed("bad_config", format!("STRATA_KV_TTL_LATENCY_MS is not a number: {:?}", v)))?;
            self.kv.document.ttl_expiration_latency = Duration::from_millis(ms);
            self.kv.sql.ttl_expiration_latency = Duration::from_millis(ms);
        }
        if let Some(v) = lookup("STRATA_SQL_PROPERTIES") { self.sql_properties = v; }
        if self.max_tree_depth == 0 { return Err(AppError::malformed("bad_config", "max_tree_depth must be positive")); }
        Ok(())
    }

    /// Policies in evaluation order: administrators, denied types, locks.
    pub fn policy_chain(&self, registry: &PermissionRegistry) -> PolicyChain {
        let mut chain = PolicyChain::new();
        if !self.administrators.is_empty() { chain = chain.with(Arc::new(AdministratorPolicy::new(self.administrators.iter().cloned()))); }
        for d in &self.denied_types {
            let perms: Vec<&str> = d.permissions.iter().map(String::as_str).collect();
            chain = chain.with(Arc::new(TypeDenyPolicy::new(&d.primary_type, &perms, registry)));
        }
        if self.lock_policy { chain = chain.with(Arc::new(LockedDocumentPolicy::new(registry))); }
        debug!(target: "strata::config", "policy chain: {:?}", chain.names());
        chain
    }

    pub fn resolver(&self) -> SecurityResolver {
        let registry = DEFAULT_PERMISSIONS.clone();
        let chain = self.policy_chain(&registry);
        SecurityResolver::new(Arc::new(chain), Arc::new(registry))
    }

    /// SQL repository settings; the configured tree depth applies unless the
    /// property string sets its own.
    pub fn connection_settings(&self) -> AppResult<ConnectionSettings> {
        let props = crate::sql::parse_properties(&self.sql_properties)?;
        let mut s = ConnectionSettings::from_properties(&props)?;
        if !props.contains_key("max_tree_depth") { s.max_tree_depth = self.max_tree_depth; }
        Ok(s)
    }

    pub fn open_kv(&self) -> AppResult<Arc<dyn KeyValueStore>> {
        let kv = &self.kv;
        let path = || kv.path.clone().ok_or_else(|| AppError::malformed("bad_config", format!("kv backend {:?} needs a path", kv.backend)));
        let store: Arc<dyn KeyValueStore> = match kv.backend {
            KvBackend::Memory => Arc::new(MemoryKeyValueStore::new(&kv.name)),
            KvBackend::Cache => Arc::new(CacheKeyValueStore::new(&kv.name, &kv.cache)?),
            KvBackend::Document => Arc::new(DocumentKeyValueStore::open(&path()?, &kv.name, &kv.document)?),
            KvBackend::Sql => {
                let conn = ConnectionSettings { path: path()?.to_string_lossy().into_owned(), ..ConnectionSettings::default() };
                Arc::new(SqlKeyValueStore::open(&conn, &kv.name, &kv.sql)?)
            }
        };
        info!(target: "strata::config", "opened {:?} key-value store {}", kv.backend, kv.name);
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_json_gives_defaults() {
        let cfg = CoreConfig::from_json("{}").unwrap();
        assert_eq!(cfg.max_tree_depth, DEFAULT_MAX_TREE_DEPTH);
        assert_eq!(cfg.kv.backend, KvBackend::Memory);
        assert_eq!(cfg.kv.document.ttl_expiration_latency, Duration::from_secs(70));
        assert!(cfg.lock_policy);
    }

    #[test]
    fn json_fields_and_millisecond_durations() {
        let cfg = CoreConfig::from_json(
            r#"{"max_tree_depth": 20, "administrators": ["admin"],
                "denied_types": [{"primary_type": "Template", "permissions": ["Write"]}],
                "kv": {"backend": "sql", "path": "/tmp/kv.db", "sql": {"cleanup_interval": 500, "ttl_expiration_latency": 900}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.max_tree_depth, 20);
        assert_eq!(cfg.kv.backend, KvBackend::Sql);
        assert_eq!(cfg.kv.sql.cleanup_interval, Duration::from_millis(500));
        assert_eq!(cfg.kv.sql.ttl_expiration_latency, Duration::from_millis(900));
        let chain = cfg.policy_chain(&DEFAULT_PERMISSIONS);
        assert_eq!(chain.names(), vec![AdministratorPolicy::NAME, "type-deny:Template", LockedDocumentPolicy::NAME]);
        let resolver = cfg.resolver();
        assert_eq!(resolver.resolve_permission("Browse"), DEFAULT_PERMISSIONS.resolve("Browse"));
        assert_eq!(resolver.chain().names(), chain.names());
        assert_eq!(CoreConfig::from_json("{\"max_tree_depth\": \"x\"}").unwrap_err().code_str(), "bad_config");
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("STRATA_MAX_TREE_DEPTH", "7"),
            ("STRATA_ADMINISTRATORS", "root, ops ,"),
            ("STRATA_KV_BACKEND", "redb"),
            ("STRATA_KV_TTL_LATENCY_MS", "1500"),
            ("STRATA_SQL_PROPERTIES", "path=/tmp/r.db"),
        ]);
        let mut cfg = CoreConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.max_tree_depth, 7);
        assert_eq!(cfg.administrators, vec!["root", "ops"]);
        assert_eq!(cfg.kv.backend, KvBackend::Document);
        assert_eq!(cfg.kv.document.ttl_expiration_latency, Duration::from_millis(1500));
        let conn = cfg.connection_settings().unwrap();
        assert_eq!(conn.path, "/tmp/r.db");
        assert_eq!(conn.max_tree_depth, 7);
    }

    #[test]
    fn bad_overrides_are_rejected() {
        let mut cfg = CoreConfig::default();
        assert!(cfg.apply_overrides(|k| (k == "STRATA_KV_BACKEND").then(|| "mongo".to_string())).is_err());
        assert!(cfg.apply_overrides(|k| (k == "STRATA_MAX_TREE_DEPTH").then(|| "0".to_string())).is_err());
    }

    #[test]
    fn persistent_backends_need_a_path() {
        let mut cfg = CoreConfig::default();
        cfg.kv.backend = KvBackend::Document;
        assert!(cfg.open_kv().is_err());
        let dir = tempfile::tempdir().unwrap();
        cfg.kv.path = Some(dir.path().join("kv.redb"));
        let kv = cfg.open_kv().unwrap();
        assert!(kv.has_slow_ttl_expiration());
        cfg.kv.backend = KvBackend::Memory;
        assert!(!cfg.open_kv().unwrap().has_slow_ttl_expiration());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.json");
        std::fs::write(&path, r#"{"administrators": ["admin"]}"#).unwrap();
        let cfg = CoreConfig::load(&path).unwrap();
        assert_eq!(cfg.administrators, vec!["admin"]);
        assert!(CoreConfig::load(&dir.path().join("missing.json")).is_err());
    }
}
