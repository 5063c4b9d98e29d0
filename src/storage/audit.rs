//! Append-only audit log persistence
//!
//! JSONL audit trail with an in-process single-writer gate, advisory file
//! locking across processes, and size-based compaction.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs as tokio_fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use super::{AuditStore, StorageError};

/// Default file that stores the audit trail
const AUDIT_FILENAME: &str = "audit.jsonl";

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// When the log exceeds its cap, compact it down to this fraction of the cap.
const AUDIT_SOFT_CAP_RATIO: f64 = 0.8;

const MAX_LOCK_RETRIES: usize = 10;
const LOCK_RETRY_SLEEP: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failure,
}

/// One attempted operation and how it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub status: AuditStatus,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub suggestion: Option<String>,
}

impl AuditEntry {
    pub fn success(action: impl Into<String>, details: Map<String, Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            status: AuditStatus::Success,
            details,
            error: None,
            suggestion: None,
        }
    }

    pub fn failure(
        action: impl Into<String>,
        error: impl Into<String>,
        suggestion: Option<String>,
        details: Map<String, Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            status: AuditStatus::Failure,
            details,
            error: Some(error.into()),
            suggestion,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == AuditStatus::Failure
    }
}

/// Bookkeeping guarded by the write gate.
#[derive(Debug, Default)]
struct WriterState {
    /// Valid records on disk, once known.
    entry_count: Option<usize>,
    #[cfg(test)]
    fail_next_compaction: bool,
}

pub struct JsonlAuditStore {
    path: PathBuf,
    max_entries: usize,
    gate: Mutex<WriterState>,
}

impl JsonlAuditStore {
    /// `max_entries == 0` disables automatic compaction.
    pub fn new(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        Self {
            path: path.into(),
            max_entries,
            gate: Mutex::new(WriterState::default()),
        }
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from(AUDIT_FILENAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    async fn ensure_parent(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio_fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }
        Ok(())
    }

    async fn load(&self) -> Result<Vec<AuditEntry>, StorageError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_entries(&path)).await?
    }

    async fn compact(&self, writer: &mut WriterState, keep: usize) -> Result<(usize, usize), StorageError> {
        #[cfg(test)]
        if std::mem::take(&mut writer.fail_next_compaction) {
            return Err(StorageError::LockContention(self.path.clone()));
        }
        #[cfg(not(test))]
        let _ = writer;
        self.rewrite_tail(keep).await
    }

    async fn rewrite_tail(&self, keep: usize) -> Result<(usize, usize), StorageError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || rewrite_keeping(&path, keep)).await?
    }
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StorageError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut writer = self.gate.lock().await;
        self.ensure_parent().await?;

        // Nothing after the write may fail the append.
        let before = match writer.entry_count {
            Some(n) => n,
            None => self.load().await?.len(),
        };

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_line(&path, &line)).await??;

        let count = before + 1;
        writer.entry_count = Some(count);
        debug!(action = %entry.action, status = ?entry.status, "appended audit entry");

        if self.max_entries > 0 && count > self.max_entries {
            let target = ((self.max_entries as f64) * AUDIT_SOFT_CAP_RATIO) as usize;
            match self.compact(&mut writer, target.max(1)).await {
                Ok((removed, kept)) => {
                    writer.entry_count = Some(kept);
                    info!(removed, kept, cap = self.max_entries, "compacted audit log");
                }
                // The record stays written; the next append retries compaction.
                Err(e) => warn!(error = %e, count, cap = self.max_entries, "audit compaction failed"),
            }
        }
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<AuditEntry>, StorageError> {
        let _writer = self.gate.lock().await;
        self.load().await
    }

    async fn truncate(&self, keep: Option<usize>) -> Result<usize, StorageError> {
        let keep = match keep {
            Some(keep) => keep,
            // No cap configured: nothing to enforce.
            None if self.max_entries == 0 => return Ok(0),
            None => self.max_entries,
        };
        let mut writer = self.gate.lock().await;
        let (removed, kept) = self.rewrite_tail(keep).await?;
        writer.entry_count = Some(kept);
        if removed > 0 {
            info!(removed, kept, "truncated audit log");
        }
        Ok(removed)
    }
}

fn open_locked(path: &Path, options: &OpenOptions) -> Result<File, StorageError> {
    let file = options.open(path).map_err(|e| StorageError::io(path, e))?;
    for _ in 0..MAX_LOCK_RETRIES {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(file),
            Err(_) => std::thread::sleep(LOCK_RETRY_SLEEP),
        }
    }
    Err(StorageError::LockContention(path.to_path_buf()))
}

fn append_line(path: &Path, line: &str) -> Result<(), StorageError> {
    let mut options = OpenOptions::new();
    options.read(true).append(true).create(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = open_locked(path, &options)?;
    let result = (|| -> io::Result<()> {
        // A torn final line from an earlier crash must not swallow this record.
        let len = file.metadata()?.len();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::Start(len - 1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                file.write_all(b"\n")?;
            }
        }
        file.write_all(line.as_bytes())?;
        file.flush()?;
        file.sync_data()
    })();
    let _ = FileExt::unlock(&file);
    result.map_err(|e| StorageError::io(path, e))
}

fn read_entries(path: &Path) -> Result<Vec<AuditEntry>, StorageError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(path, e)),
    };

    // Records are read as raw bytes so a torn multi-byte character only
    // invalidates its own line.
    let mut reader = BufReader::new(file);
    let mut entries = Vec::new();
    let mut buf = Vec::new();
    let mut line_no = 0usize;
    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf).map_err(|e| StorageError::io(path, e))?;
        if read == 0 {
            break;
        }
        line_no += 1;
        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<AuditEntry>(&buf) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(line = line_no, error = %e, "skipping malformed audit record"),
        }
    }
    Ok(entries)
}

/// Rewrite the log with only its last `keep` records. Returns (removed, kept).
fn rewrite_keeping(path: &Path, keep: usize) -> Result<(usize, usize), StorageError> {
    if !path.exists() {
        return Ok((0, 0));
    }

    let mut options = OpenOptions::new();
    options.read(true).write(true);
    let lock = open_locked(path, &options)?;

    let result = (|| -> Result<(usize, usize), StorageError> {
        let entries = read_entries(path)?;
        if entries.len() <= keep {
            return Ok((0, entries.len()));
        }
        let removed = entries.len() - keep;

        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StorageError::io(dir, e))?;
        for entry in &entries[removed..] {
            let mut line = serde_json::to_string(entry)?;
            line.push('\n');
            tmp.write_all(line.as_bytes()).map_err(|e| StorageError::io(tmp.path(), e))?;
        }
        tmp.as_file().sync_all().map_err(|e| StorageError::io(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| StorageError::io(path, e.error))?;
        Ok((removed, keep))
    })();

    let _ = FileExt::unlock(&lock);
    result
}

/// Process-local store, for tests and runs that need no durable trail.
pub struct MemoryAuditStore {
    max_entries: usize,
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        entries.push(entry.clone());
        if self.max_entries > 0 && entries.len() > self.max_entries {
            let target = (((self.max_entries as f64) * AUDIT_SOFT_CAP_RATIO) as usize).max(1);
            let excess = entries.len() - target;
            entries.drain(..excess);
        }
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<AuditEntry>, StorageError> {
        Ok(self.entries.lock().await.clone())
    }

    async fn truncate(&self, keep: Option<usize>) -> Result<usize, StorageError> {
        let keep = match keep {
            Some(keep) => keep,
            // No cap configured: nothing to enforce.
            None if self.max_entries == 0 => return Ok(0),
            None => self.max_entries,
        };
        let mut entries = self.entries.lock().await;
        let removed = entries.len().saturating_sub(keep);
        entries.drain(..removed);
        Ok(removed)
    }
}
