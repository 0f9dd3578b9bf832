//! Persistent per-plugin configuration.
//!
//! A plugin's config is a JSON object stored as a string under
//! `<pluginName>_config` in a [`ConfigStore`]. Reads never fail: a missing,
//! unreadable or malformed entry reads as an empty object.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::error::ResolverError;

/// A plugin's configuration object.
pub type PluginConfig = Map<String, Value>;

/// Key-value persistence for plugin configs.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, ResolverError>;
    fn put(&self, key: &str, value: String) -> Result<(), ResolverError>;
}

/// Store key holding `plugin_name`'s config.
pub fn config_key(plugin_name: &str) -> String {
    format!("{plugin_name}_config")
}

/// Read `plugin_name`'s config, or an empty object.
pub fn read_plugin_config(store: &dyn ConfigStore, plugin_name: &str) -> PluginConfig {
    let key = config_key(plugin_name);
    let raw = match store.get(&key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return PluginConfig::new(),
        Err(e) => {
            tracing::warn!(plugin = %plugin_name, error = %e, "failed to read plugin config");
            return PluginConfig::new();
        }
    };

    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(config)) => config,
        Ok(_) | Err(_) => {
            tracing::warn!(plugin = %plugin_name, "stored plugin config is not a JSON object, ignoring");
            PluginConfig::new()
        }
    }
}

/// Persist `config` as `plugin_name`'s config.
pub fn write_plugin_config(
    store: &dyn ConfigStore,
    plugin_name: &str,
    config: &PluginConfig,
) -> Result<(), ResolverError> {
    let raw = serde_json::to_string(config)?;
    store.put(&config_key(plugin_name), raw)
}

// ─── In-memory store ────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &str) -> Result<Option<String>, ResolverError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> Result<(), ResolverError> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }
}

// ─── JSON file store ────────────────────────────────────────────────────

/// Store backed by a single JSON object file.
///
/// Every `put` rewrites the whole file through a temporary sibling and a
/// rename, so a crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct JsonFileConfigStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl JsonFileConfigStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ResolverError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                ResolverError::ConfigStore(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), ResolverError> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ConfigStore for JsonFileConfigStore {
    fn get(&self, key: &str) -> Result<Option<String>, ResolverError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> Result<(), ResolverError> {
        // Held across the write so concurrent puts reach the file in order.
        let mut entries = self.entries.write();
        let previous = entries.insert(key.to_string(), value);
        if let Err(e) = self.flush(&entries) {
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FailingStore;

    impl ConfigStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<String>, ResolverError> {
            Err(ResolverError::ConfigStore("disk on fire".into()))
        }

        fn put(&self, _key: &str, _value: String) -> Result<(), ResolverError> {
            Err(ResolverError::ConfigStore("disk on fire".into()))
        }
    }

    fn sample_config() -> PluginConfig {
        json!({"username": "alice", "quality": 2, "_enabled_": true})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_config_key() {
        assert_eq!(config_key("spotify"), "spotify_config");
    }

    // ── Plugin config helpers ───────────────────────────────────────

    #[test]
    fn test_read_absent_config_is_empty() {
        let store = MemoryConfigStore::new();
        assert!(read_plugin_config(&store, "spotify").is_empty());
    }

    #[test]
    fn test_config_round_trip() {
        let store = MemoryConfigStore::new();
        write_plugin_config(&store, "spotify", &sample_config()).unwrap();
        assert_eq!(read_plugin_config(&store, "spotify"), sample_config());
        // Other plugins are unaffected
        assert!(read_plugin_config(&store, "jamendo").is_empty());
    }

    #[test]
    fn test_read_malformed_config_is_empty() {
        let store = MemoryConfigStore::new();
        store.put("spotify_config", "{not json".into()).unwrap();
        assert!(read_plugin_config(&store, "spotify").is_empty());

        store.put("spotify_config", "[1, 2]".into()).unwrap();
        assert!(read_plugin_config(&store, "spotify").is_empty());
    }

    #[test]
    fn test_read_with_failing_store_is_empty() {
        assert!(read_plugin_config(&FailingStore, "spotify").is_empty());
    }

    #[test]
    fn test_write_with_failing_store_errors() {
        let err = write_plugin_config(&FailingStore, "spotify", &sample_config()).unwrap_err();
        assert!(matches!(err, ResolverError::ConfigStore(_)));
    }

    // ── File store ──────────────────────────────────────────────────

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileConfigStore::open(dir.path().join("prefs.json")).unwrap();
        assert_eq!(store.get("anything").unwrap(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let store = JsonFileConfigStore::open(&path).unwrap();
        write_plugin_config(&store, "spotify", &sample_config()).unwrap();
        drop(store);

        let reopened = JsonFileConfigStore::open(&path).unwrap();
        assert_eq!(read_plugin_config(&reopened, "spotify"), sample_config());
        assert!(!dir.path().join("prefs.json.tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "garbage").unwrap();

        let err = JsonFileConfigStore::open(&path).unwrap_err();
        assert!(matches!(err, ResolverError::ConfigStore(_)));
    }

    #[test]
    fn test_file_store_failed_write_keeps_old_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("prefs.json");
        let store = JsonFileConfigStore::open(&path).unwrap();

        assert!(store.put("k", "v".into()).is_err());
        assert_eq!(store.get("k").unwrap(), None);
    }
}
