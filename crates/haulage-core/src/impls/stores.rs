//! StateStore implementations.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::depot::{DepotSnapshot, SNAPSHOT_VERSION};
use crate::ports::{StateStore, StoreError};

/// Keeps the latest snapshot in memory. Can be told to fail saves.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    latest: Mutex<Option<DepotSnapshot>>,
    saves: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self) -> Result<Option<DepotSnapshot>, StoreError> {
        Ok(self.latest.lock().await.clone())
    }

    async fn save(&self, snapshot: &DepotSnapshot) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io("in-memory store set to fail".into()));
        }
        *self.latest.lock().await = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One JSON document on disk, replaced atomically through a sibling temp file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<Option<DepotSnapshot>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };
        let snapshot: DepotSnapshot =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Codec(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Version {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &DepotSnapshot) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec_pretty(snapshot).map_err(|e| StoreError::Codec(e.to_string()))?;
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("haulage-store-{}-{}", std::process::id(), ulid::Ulid::new()))
            .join(name)
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let store = JsonFileStore::new(scratch("absent.json"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn json_file_round_trips_a_snapshot() {
        let store = JsonFileStore::new(scratch("depot.json"));
        let snapshot = DepotSnapshot::empty(1_700_000_000);
        store.save(&snapshot).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.clock_reference, 1_700_000_000);
        let _ = tokio::fs::remove_dir_all(store.path().parent().unwrap()).await;
    }

    #[tokio::test]
    async fn unknown_version_is_refused() {
        let store = JsonFileStore::new(scratch("old.json"));
        let mut snapshot = DepotSnapshot::empty(0);
        snapshot.version = SNAPSHOT_VERSION + 1;
        store.save(&snapshot).await.unwrap();
        assert!(matches!(store.load().await, Err(StoreError::Version { .. })));
        let _ = tokio::fs::remove_dir_all(store.path().parent().unwrap()).await;
    }

    #[tokio::test]
    async fn failing_memory_store_keeps_previous_snapshot() {
        let store = InMemoryStateStore::new();
        store.save(&DepotSnapshot::empty(1)).await.unwrap();
        store.set_failing(true);
        assert!(store.save(&DepotSnapshot::empty(2)).await.is_err());
        assert_eq!(store.load().await.unwrap().unwrap().clock_reference, 1);
        assert_eq!(store.saves(), 1);
    }
}
