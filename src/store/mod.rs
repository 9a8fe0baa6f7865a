use crate::error::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Durable key/value contract behind the online-learning state.
///
/// Writes are synchronous and write-through: an operation is not complete
/// until its state is committed, since bandit convergence is sensitive to
/// lost updates. `load(save(x)) == x` must hold exactly, including entries
/// that are all zeros.
pub trait StateStore: Send + Sync {
    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()>;
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;
    fn scan(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>>;
    fn delete(&self, namespace: &str, key: &str) -> Result<()>;
    fn clear(&self, namespace: &str) -> Result<()>;
}

/// File-backed store: one JSON object per namespace, values stored as raw
/// JSON. Read-modify-write runs under a mutex and lands via a temp-file
/// rename so a crash never leaves a half-written namespace behind.
pub struct JsonFileStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{}.json", namespace))
    }

    fn read_namespace(&self, namespace: &str) -> Result<BTreeMap<String, serde_json::Value>> {
        let path = self.namespace_path(namespace);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_namespace(
        &self,
        namespace: &str,
        entries: &BTreeMap<String, serde_json::Value>,
    ) -> Result<()> {
        let path = self.namespace_path(namespace);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let _guard = self.lock.lock();
        let mut entries = self.read_namespace(namespace)?;
        entries.insert(key.to_string(), serde_json::from_slice(value)?);
        self.write_namespace(namespace, &entries)?;
        debug!(namespace, key, "state committed");
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let _guard = self.lock.lock();
        let entries = self.read_namespace(namespace)?;
        match entries.get(key) {
            Some(value) => Ok(Some(serde_json::to_vec(value)?)),
            None => Ok(None),
        }
    }

    fn scan(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let _guard = self.lock.lock();
        let entries = self.read_namespace(namespace)?;
        entries
            .into_iter()
            .map(|(key, value)| Ok((key, serde_json::to_vec(&value)?)))
            .collect()
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut entries = self.read_namespace(namespace)?;
        if entries.remove(key).is_some() {
            self.write_namespace(namespace, &entries)?;
        }
        Ok(())
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let path = self.namespace_path(namespace);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// In-memory store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .lock()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .lock()
            .get(namespace)
            .and_then(|ns| ns.get(key).cloned()))
    }

    fn scan(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .entries
            .lock()
            .get(namespace)
            .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        if let Some(ns) = self.entries.lock().get_mut(namespace) {
            ns.remove(key);
        }
        Ok(())
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        self.entries.lock().remove(namespace);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BanditArmState;

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();

        let mut state = BanditArmState::new(5);
        state.record(1, 0.75);
        let encoded = serde_json::to_vec(&state).unwrap();
        store.put("bandit", "weather=sunny", &encoded).unwrap();

        let loaded = store.get("bandit", "weather=sunny").unwrap().unwrap();
        let decoded: BanditArmState = serde_json::from_slice(&loaded).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn file_store_round_trips_zero_pull_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();

        let state = BanditArmState::new(11);
        let encoded = serde_json::to_vec(&state).unwrap();
        store.put("bandit", "empty", &encoded).unwrap();

        let decoded: BanditArmState =
            serde_json::from_slice(&store.get("bandit", "empty").unwrap().unwrap()).unwrap();
        assert_eq!(decoded, state);
        assert_eq!(decoded.total_pulls, 0);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonFileStore::new(dir.path()).unwrap();
            store.put("popularity", "42", b"{\"hits\":3}").unwrap();
        }
        let reopened = JsonFileStore::new(dir.path()).unwrap();
        let entries = reopened.scan("popularity").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "42");
    }

    #[test]
    fn delete_and_clear() {
        let store = MemoryStore::new();
        store.put("ns", "a", b"1").unwrap();
        store.put("ns", "b", b"2").unwrap();
        store.delete("ns", "a").unwrap();
        assert!(store.get("ns", "a").unwrap().is_none());
        store.clear("ns").unwrap();
        assert!(store.scan("ns").unwrap().is_empty());
    }
}
