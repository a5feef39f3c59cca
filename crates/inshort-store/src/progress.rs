//! Ingestion progress checkpoint

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::durable::{DurableJson, LoadSource, Loaded, Validate};
use crate::error::StoreError;

/// Durable record of what the pipeline has already committed.
///
/// Safe to inspect and hand-edit between runs. `processed_ids` only grows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressRecord {
    /// Keys of every item whose assembled record is in the dataset
    pub processed_ids: BTreeSet<String>,
    /// Offset of the first page not yet fully processed
    pub next_page_offset: u64,
    /// Always equal to `processed_ids.len()` at a checkpoint
    pub total_collected: u64,
    pub last_error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    /// When the first run of this ingestion started
    pub session_start: Option<DateTime<Utc>>,
    /// Set when the last run stopped on an interrupt
    pub interrupted: bool,
}

impl Validate for ProgressRecord {
    fn validate(&self) -> Result<(), String> {
        if self.processed_ids.iter().any(String::is_empty) {
            return Err("empty key in processed_ids".into());
        }
        Ok(())
    }
}

impl ProgressRecord {
    pub fn contains(&self, key: &str) -> bool {
        self.processed_ids.contains(key)
    }

    /// Record a committed item. Returns false if it was already present.
    pub fn mark_processed(&mut self, key: impl Into<String>) -> bool {
        let inserted = self.processed_ids.insert(key.into());
        self.total_collected = self.processed_ids.len() as u64;
        inserted
    }

    pub fn processed_count(&self) -> u64 {
        self.processed_ids.len() as u64
    }
}

/// Load/save wrapper around the progress file.
#[derive(Debug)]
pub struct ProgressStore {
    file: DurableJson<ProgressRecord>,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: DurableJson::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Load with backup/default fallback; repairs a stale `total_collected`.
    pub fn load(&self) -> Loaded<ProgressRecord> {
        let mut loaded = self.file.load();
        let record = &mut loaded.value;
        let actual = record.processed_ids.len() as u64;
        if record.total_collected != actual {
            log::warn!(
                "{}: total_collected {} != {} processed ids, using the id count",
                self.path().display(),
                record.total_collected,
                actual
            );
            record.total_collected = actual;
        }
        if loaded.source != LoadSource::Default {
            log::info!(
                "Loaded progress: {} items processed, next offset {}",
                actual,
                record.next_page_offset
            );
        }
        loaded
    }

    /// Committed record for display; leaves every file as it is.
    pub fn read(&self) -> Result<ProgressRecord, StoreError> {
        let mut record = self.file.read_committed()?;
        record.total_collected = record.processed_ids.len() as u64;
        Ok(record)
    }

    /// Stamp `last_updated` and persist.
    pub fn save(&self, record: &mut ProgressRecord, now: DateTime<Utc>) -> Result<(), StoreError> {
        record.total_collected = record.processed_ids.len() as u64;
        record.last_updated = Some(now);
        self.file.save(record)
    }

    pub fn cleanup_stale_tmp(&self) -> bool {
        self.file.cleanup_stale_tmp()
    }
}
