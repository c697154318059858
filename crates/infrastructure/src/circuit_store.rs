//! Circuit state persistence
//!
//! The on-disk format is a single JSON object mapping `"trigger_type:action_id"`
//! to a [`CircuitSnapshot`]. Writes replace the file through a temporary file
//! and a rename, so a crash leaves either the old or the new map.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use resilient_core::{CircuitSnapshot, SchedulerError, SchedulerResult};
use tokio::sync::Mutex;
use tracing::debug;

#[async_trait]
pub trait CircuitStateStore: Send + Sync {
    async fn load(&self) -> SchedulerResult<BTreeMap<String, CircuitSnapshot>>;

    async fn save(&self, key: &str, snapshot: &CircuitSnapshot) -> SchedulerResult<()>;

    async fn clear(&self) -> SchedulerResult<()>;
}

#[derive(Default)]
pub struct InMemoryCircuitStateStore {
    snapshots: Mutex<BTreeMap<String, CircuitSnapshot>>,
}

impl InMemoryCircuitStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<CircuitSnapshot> {
        self.snapshots.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.snapshots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.lock().await.is_empty()
    }
}

#[async_trait]
impl CircuitStateStore for InMemoryCircuitStateStore {
    async fn load(&self) -> SchedulerResult<BTreeMap<String, CircuitSnapshot>> {
        Ok(self.snapshots.lock().await.clone())
    }

    async fn save(&self, key: &str, snapshot: &CircuitSnapshot) -> SchedulerResult<()> {
        self.snapshots
            .lock()
            .await
            .insert(key.to_string(), snapshot.clone());
        Ok(())
    }

    async fn clear(&self) -> SchedulerResult<()> {
        self.snapshots.lock().await.clear();
        Ok(())
    }
}

pub struct FileCircuitStateStore {
    path: PathBuf,
    /// Last written map; the lock also serializes file writes
    cache: Mutex<Option<BTreeMap<String, CircuitSnapshot>>>,
}

impl FileCircuitStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> SchedulerResult<BTreeMap<String, CircuitSnapshot>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                SchedulerError::Serialization(format!(
                    "熔断状态文件解析失败 {}: {e}",
                    self.path.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, snapshots: &BTreeMap<String, CircuitSnapshot>) -> SchedulerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let body = serde_json::to_vec_pretty(snapshots)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), circuits = snapshots.len(), "熔断状态已持久化");
        Ok(())
    }
}

#[async_trait]
impl CircuitStateStore for FileCircuitStateStore {
    async fn load(&self) -> SchedulerResult<BTreeMap<String, CircuitSnapshot>> {
        let mut cache = self.cache.lock().await;
        let snapshots = self.read_file().await?;
        *cache = Some(snapshots.clone());
        Ok(snapshots)
    }

    async fn save(&self, key: &str, snapshot: &CircuitSnapshot) -> SchedulerResult<()> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.read_file().await?);
        }
        let snapshots = cache.get_or_insert_with(BTreeMap::new);
        snapshots.insert(key.to_string(), snapshot.clone());
        self.write_file(snapshots).await
    }

    async fn clear(&self) -> SchedulerResult<()> {
        let mut cache = self.cache.lock().await;
        let empty = BTreeMap::new();
        self.write_file(&empty).await?;
        *cache = Some(empty);
        Ok(())
    }
}
