//! Dead-letter queue
//!
//! Work items that exhausted every provider. Entries live behind one lock;
//! when a log path is configured each new entry is appended to a JSONL file
//! before `push` returns, and replay bookkeeping rewrites the file under the
//! same lock. In-memory entries change only after the file write succeeded.

use std::path::{Path, PathBuf};

use resilient_core::{DeadLetterEntry, SchedulerError, SchedulerResult};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct DeadLetterQueue {
    entries: Mutex<Vec<DeadLetterEntry>>,
    log_path: Option<PathBuf>,
    max_retries: u32,
}

impl DeadLetterQueue {
    pub fn in_memory(max_retries: u32) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            log_path: None,
            max_retries,
        }
    }

    /// Opens (or creates) a JSONL log and loads its entries. Unparsable
    /// lines, such as a torn final write, are skipped with a warning.
    pub async fn open(path: impl Into<PathBuf>, max_retries: u32) -> SchedulerResult<Self> {
        let path = path.into();
        let mut entries = Vec::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                for (line_no, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<DeadLetterEntry>(line) {
                        Ok(entry) => entries.push(entry),
                        Err(e) => warn!(
                            path = %path.display(),
                            line = line_no + 1,
                            error = %e,
                            "跳过无法解析的死信记录"
                        ),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(path = %path.display(), entries = entries.len(), "死信队列已加载");
        Ok(Self {
            entries: Mutex::new(entries),
            log_path: Some(path),
            max_retries,
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub async fn push(
        &self,
        kind: &str,
        payload: serde_json::Value,
        error: &str,
    ) -> SchedulerResult<DeadLetterEntry> {
        let entry = DeadLetterEntry::new(kind, payload, error, self.max_retries);
        let mut entries = self.entries.lock().await;
        if let Some(path) = &self.log_path {
            append_line(path, &entry).await?;
        }
        entries.push(entry.clone());
        Ok(entry)
    }

    pub async fn list(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<DeadLetterEntry> {
        self.entries.lock().await.iter().find(|e| e.id == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Claims one replay attempt: fails with `RetriesExhausted` without
    /// touching the entry once its budget is spent, otherwise increments
    /// `retry_count` durably and returns the updated entry.
    pub async fn begin_replay(&self, id: &str) -> SchedulerResult<DeadLetterEntry> {
        let mut entries = self.entries.lock().await;
        let mut staged = entries.clone();
        let entry = staged
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| SchedulerError::DeadLetterNotFound { id: id.to_string() })?;

        if !entry.can_replay() {
            return Err(SchedulerError::RetriesExhausted {
                id: entry.id.clone(),
                retry_count: entry.retry_count,
                max_retries: entry.max_retries,
            });
        }

        entry.retry_count += 1;
        let updated = entry.clone();
        self.rewrite(&staged).await?;
        *entries = staged;
        Ok(updated)
    }

    pub async fn record_replay_failure(&self, id: &str, error: &str) -> SchedulerResult<()> {
        let mut entries = self.entries.lock().await;
        let mut staged = entries.clone();
        let entry = staged
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| SchedulerError::DeadLetterNotFound { id: id.to_string() })?;
        entry.error = error.to_string();
        entry.failed_at = chrono::Utc::now();
        self.rewrite(&staged).await?;
        *entries = staged;
        Ok(())
    }

    /// Full read-modify-write under the queue lock
    pub async fn remove(&self, id: &str) -> SchedulerResult<bool> {
        let mut entries = self.entries.lock().await;
        if !entries.iter().any(|e| e.id == id) {
            return Ok(false);
        }
        let staged: Vec<DeadLetterEntry> =
            entries.iter().filter(|e| e.id != id).cloned().collect();
        self.rewrite(&staged).await?;
        *entries = staged;
        Ok(true)
    }

    async fn rewrite(&self, entries: &[DeadLetterEntry]) -> SchedulerResult<()> {
        let Some(path) = &self.log_path else {
            return Ok(());
        };
        let mut body = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut body, entry)?;
            body.push(b'\n');
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

async fn append_line(path: &Path, entry: &DeadLetterEntry) -> SchedulerResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut line = serde_json::to_vec(entry)?;
    line.push(b'\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.sync_data().await?;
    Ok(())
}
