//! Storage Module
//!
//! Durable, append-only audit trail of every attempted operation. Writers go
//! through a single gate; readers take point-in-time snapshots.

pub mod audit;

pub use audit::{AuditEntry, AuditStatus, JsonlAuditStore, MemoryAuditStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("record (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("could not acquire exclusive lock on {0}")]
    LockContention(PathBuf),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io { path: path.into(), source }
    }
}

/// Immutable copy of the log at one instant. Analysis runs on this, never on
/// the live file.
#[derive(Debug, Clone)]
pub struct AuditSnapshot {
    entries: Arc<[AuditEntry]>,
    taken_at: DateTime<Utc>,
}

impl AuditSnapshot {
    pub fn new(entries: Vec<AuditEntry>) -> Self {
        Self {
            entries: entries.into(),
            taken_at: Utc::now(),
        }
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn failures(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter().filter(|e| e.is_failure())
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Append-only outcome log. Only the orchestrator writes; analysis reads snapshots.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StorageError>;

    /// All entries in append order; empty if nothing was ever written.
    async fn read_all(&self) -> Result<Vec<AuditEntry>, StorageError>;

    async fn read_failures(&self) -> Result<Vec<AuditEntry>, StorageError> {
        let entries = self.read_all().await?;
        Ok(entries.into_iter().filter(AuditEntry::is_failure).collect())
    }

    /// Keep the most recent `keep` entries (the store's cap when `None`, a
    /// no-op for an uncapped store); returns how many were discarded.
    async fn truncate(&self, keep: Option<usize>) -> Result<usize, StorageError>;

    async fn snapshot(&self) -> Result<AuditSnapshot, StorageError> {
        Ok(AuditSnapshot::new(self.read_all().await?))
    }
}
