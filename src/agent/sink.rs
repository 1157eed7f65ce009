//! Run sinks
//!
//! A sink receives each finished run exactly once: the conversation plus the
//! outcome. Sinks never see a run in progress.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::agent::outcome::ExecutionOutcome;
use crate::core::{AgentflowError, Message, Result};

/// Persistence hook for finished runs
#[async_trait]
pub trait RunSink: Send + Sync {
    async fn record(&self, conversation: &[Message], outcome: &ExecutionOutcome) -> Result<()>;
}

/// One persisted run
///
/// The conversation is not stored separately; it is `outcome.trace`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub recorded_at: DateTime<Utc>,
    pub outcome: ExecutionOutcome,
}

impl RunRecord {
    fn new(conversation: &[Message], outcome: &ExecutionOutcome) -> Self {
        let mut outcome = outcome.clone();
        if outcome.trace.as_slice() != conversation {
            outcome.trace = conversation.to_vec();
        }
        Self {
            recorded_at: Utc::now(),
            outcome,
        }
    }

    /// Messages of the recorded run
    pub fn conversation(&self) -> &[Message] {
        &self.outcome.trace
    }
}

/// Keeps the most recent runs in memory
#[derive(Debug)]
pub struct MemorySink {
    capacity: usize,
    records: Mutex<VecDeque<RunRecord>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::new()),
        }
    }

    /// Snapshot of the stored runs, oldest first
    pub fn records(&self) -> Vec<RunRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl RunSink for MemorySink {
    async fn record(&self, conversation: &[Message], outcome: &ExecutionOutcome) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.push_back(RunRecord::new(conversation, outcome));
        while records.len() > self.capacity {
            records.pop_front();
        }
        Ok(())
    }
}

/// Appends one JSON line per run to a file
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    /// Serializes writers so lines never interleave
    lock: tokio::sync::Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back
    pub async fn read_all(&self) -> Result<Vec<RunRecord>> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(AgentflowError::from))
            .collect()
    }
}

#[async_trait]
impl RunSink for JsonlSink {
    async fn record(&self, conversation: &[Message], outcome: &ExecutionOutcome) -> Result<()> {
        let mut line = serde_json::to_string(&RunRecord::new(conversation, outcome))?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AgentflowError::with_context(format!("creating {}", parent.display()), e)
            })?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                AgentflowError::with_context(format!("opening {}", self.path.display()), e)
            })?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
