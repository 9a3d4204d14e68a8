//! File-based stores using append-only JSONL.
//!
//! Every save or update appends a full record snapshot as one JSON line;
//! current state is derived by replaying the file with last-write-wins per
//! id. The format is deliberately plain for debugging and inspection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{OutboxEvent, OutboxEventStatus, SagaExecution, SagaStatus};

use super::{ExecutionStore, OutboxStore};

/// Append one serialized record as a JSON line
async fn append_line<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open store file: {}", path.display()))?;

    let json = serde_json::to_string(record).context("Failed to serialize record")?;
    file.write_all(format!("{}\n", json).as_bytes())
        .await
        .context("Failed to write record")?;
    file.flush().await.context("Failed to flush record")?;

    Ok(())
}

/// Replay all lines into snapshots, in file order
async fn replay_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open store file: {}", path.display()))?;

    let reader = BufReader::new(file);
    let mut lines = reader.lines();
    let mut records = Vec::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let record: T = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse record: {}", line))?;
        records.push(record);
    }

    Ok(records)
}

/// JSONL-backed execution store
pub struct FileExecutionStore {
    /// Path to the executions.jsonl file
    path: PathBuf,
}

impl FileExecutionStore {
    /// Create or open a store under `dir`
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create store directory: {}", dir.display()))?;

        Ok(Self {
            path: dir.join("executions.jsonl"),
        })
    }

    /// Path to the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest snapshot per execution id
    async fn replay(&self) -> Result<HashMap<Uuid, SagaExecution>> {
        let snapshots: Vec<SagaExecution> = replay_lines(&self.path).await?;

        let mut current = HashMap::new();
        for snapshot in snapshots {
            current.insert(snapshot.id, snapshot);
        }

        Ok(current)
    }
}

#[async_trait]
impl ExecutionStore for FileExecutionStore {
    async fn save_execution(&self, exec: &SagaExecution) -> Result<()> {
        append_line(&self.path, exec).await
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<SagaExecution>> {
        Ok(self.replay().await?.remove(&id))
    }

    async fn update_execution(&self, exec: &SagaExecution) -> Result<()> {
        if !self.replay().await?.contains_key(&exec.id) {
            return Err(anyhow!("Execution not found: {}", exec.id));
        }

        append_line(&self.path, exec).await
    }

    async fn list_executions(
        &self,
        saga_id: Option<&str>,
        status: Option<SagaStatus>,
    ) -> Result<Vec<SagaExecution>> {
        let mut matching: Vec<SagaExecution> = self
            .replay()
            .await?
            .into_values()
            .filter(|e| saga_id.map_or(true, |id| e.saga_id == id))
            .filter(|e| status.map_or(true, |s| e.status == s))
            .collect();

        matching.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(matching)
    }
}

/// JSONL-backed outbox store
pub struct FileOutboxStore {
    /// Path to the outbox.jsonl file
    path: PathBuf,
}

impl FileOutboxStore {
    /// Create or open a store under `dir`
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create store directory: {}", dir.display()))?;

        Ok(Self {
            path: dir.join("outbox.jsonl"),
        })
    }

    /// Path to the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest snapshot per event id, with a tombstone set for deletions
    async fn replay(&self) -> Result<HashMap<Uuid, Option<OutboxEvent>>> {
        let snapshots: Vec<OutboxRecord> = replay_lines(&self.path).await?;

        let mut current = HashMap::new();
        for snapshot in snapshots {
            match snapshot {
                OutboxRecord::Event(event) => {
                    current.insert(event.id, Some(event));
                }
                OutboxRecord::Deleted { id } => {
                    current.insert(id, None);
                }
            }
        }

        Ok(current)
    }

    async fn load(&self, id: Uuid) -> Result<OutboxEvent> {
        self.replay()
            .await?
            .remove(&id)
            .flatten()
            .ok_or_else(|| anyhow!("Outbox event not found: {}", id))
    }
}

/// One line in the outbox file: an event snapshot or a deletion marker
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", tag = "record")]
enum OutboxRecord {
    Event(OutboxEvent),
    Deleted { id: Uuid },
}

#[async_trait]
impl OutboxStore for FileOutboxStore {
    async fn save_event(&self, event: &OutboxEvent) -> Result<()> {
        append_line(&self.path, &OutboxRecord::Event(event.clone())).await
    }

    async fn get_pending_events(&self) -> Result<Vec<OutboxEvent>> {
        let mut pending: Vec<OutboxEvent> = self
            .replay()
            .await?
            .into_values()
            .flatten()
            .filter(|e| e.status == OutboxEventStatus::Pending)
            .collect();

        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn mark_event_published(&self, id: Uuid) -> Result<()> {
        let mut event = self.load(id).await?;
        event.status = OutboxEventStatus::Published;
        event.published_at = Some(Utc::now());

        append_line(&self.path, &OutboxRecord::Event(event)).await
    }

    async fn mark_event_failed(&self, id: Uuid, reason: &str) -> Result<()> {
        let mut event = self.load(id).await?;
        event.status = OutboxEventStatus::Failed;
        event.last_error = Some(reason.to_string());

        append_line(&self.path, &OutboxRecord::Event(event)).await
    }

    async fn record_failure(&self, id: Uuid, reason: &str) -> Result<()> {
        let mut event = self.load(id).await?;
        event.retry_count += 1;
        event.last_error = Some(reason.to_string());

        append_line(&self.path, &OutboxRecord::Event(event)).await
    }

    async fn delete_event(&self, id: Uuid) -> Result<()> {
        append_line(&self.path, &OutboxRecord::Deleted { id }).await
    }

    async fn list_events(&self, status: Option<OutboxEventStatus>) -> Result<Vec<OutboxEvent>> {
        let mut matching: Vec<OutboxEvent> = self
            .replay()
            .await?
            .into_values()
            .flatten()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .collect();

        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }
}
