//! Billing watermark storage
//!
//! The watermark is a single RFC 3339 timestamp: the end of the last
//! completed accounting pass. It is the only state that outlives a restart.
//!
//! ## Contract
//!
//! - `load` fails when the value is missing or unparseable. There is no
//!   default: billing "since never" is undefined.
//! - `store` is atomic from a reader's point of view, and a failed store is
//!   an error the caller must not ignore.
//!
//! Stored values use second precision with a `Z` suffix, e.g.
//! `2024-03-01T12:00:00Z`. Whitespace around a stored value is ignored.

use crate::error::{CostError, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Durable storage for the billing watermark
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read the watermark
    async fn load(&self) -> Result<DateTime<Utc>>;

    /// Replace the watermark
    async fn store(&self, at: DateTime<Utc>) -> Result<()>;

    /// Human-readable location, used in logs and errors
    fn describe(&self) -> String;
}

/// Parse a stored watermark
pub fn parse_checkpoint(location: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| CostError::CheckpointParse {
            location: location.to_string(),
            value: raw.to_string(),
        })
}

/// Render a watermark for storage
pub fn format_checkpoint(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Watermark kept in a local file
///
/// Writes go to a sibling temp file which is synced and renamed over the
/// target.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the watermark file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "checkpoint".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }

    async fn write_atomic(&self, contents: &[u8]) -> std::io::Result<()> {
        let temp = self.temp_path();

        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp, &self.path).await
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<DateTime<Utc>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CostError::CheckpointMissing(self.describe()));
            }
            Err(e) => return Err(CostError::Io(e)),
        };

        parse_checkpoint(&self.describe(), &raw)
    }

    async fn store(&self, at: DateTime<Utc>) -> Result<()> {
        let value = format_checkpoint(at);
        debug!(path = %self.path.display(), checkpoint = %value, "Writing checkpoint");

        self.write_atomic(value.as_bytes())
            .await
            .map_err(|e| CostError::checkpoint_write(self.describe(), e))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Watermark held in process memory
///
/// Holds the raw stored string so malformed values can be represented.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    raw: Mutex<Option<String>>,
    fail_writes: bool,
}

impl MemoryCheckpointStore {
    /// Empty store; `load` fails until something is stored
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a watermark
    pub fn at(at: DateTime<Utc>) -> Self {
        Self::with_raw(format_checkpoint(at))
    }

    /// Store pre-seeded with a raw value
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Mutex::new(Some(raw.into())),
            fail_writes: false,
        }
    }

    /// Make every `store` call fail
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Current raw value
    pub async fn raw(&self) -> Option<String> {
        self.raw.lock().await.clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<DateTime<Utc>> {
        match self.raw.lock().await.as_deref() {
            Some(raw) => parse_checkpoint(&self.describe(), raw),
            None => Err(CostError::CheckpointMissing(self.describe())),
        }
    }

    async fn store(&self, at: DateTime<Utc>) -> Result<()> {
        if self.fail_writes {
            return Err(CostError::checkpoint_write(self.describe(), "writes disabled"));
        }
        *self.raw.lock().await = Some(format_checkpoint(at));
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
