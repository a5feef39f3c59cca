//! Assembled record collection

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::durable::{DurableJson, LoadSource, Loaded, Validate};
use crate::error::StoreError;

/// One catalog item's primary payload plus best-effort sub-resources.
///
/// A `None` sub-resource means the fetch failed or was unavailable,
/// not that the sub-resource does not exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledRecord {
    pub key: String,
    pub primary: serde_json::Value,
    #[serde(default)]
    pub sub_resources: BTreeMap<String, Option<serde_json::Value>>,
}

impl AssembledRecord {
    pub fn new(key: impl Into<String>, primary: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            primary,
            sub_resources: BTreeMap::new(),
        }
    }

    /// Number of sub-resources that were fetched successfully
    pub fn populated_sub_resources(&self) -> usize {
        self.sub_resources.values().filter(|v| v.is_some()).count()
    }
}

/// Ordered collection of records, insertion order = discovery order.
///
/// Serialized as a plain JSON array.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<AssembledRecord>,
    keys: FxHashSet<String>,
}

impl Dataset {
    /// Append a record. Returns false (and drops it) if the key is already present.
    pub fn push(&mut self, record: AssembledRecord) -> bool {
        if !self.keys.insert(record.key.clone()) {
            log::warn!("dataset already holds {}, dropping duplicate", record.key);
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AssembledRecord] {
        &self.records
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.key.as_str())
    }
}

impl FromIterator<AssembledRecord> for Dataset {
    fn from_iter<I: IntoIterator<Item = AssembledRecord>>(iter: I) -> Self {
        let mut dataset = Self::default();
        for record in iter {
            dataset.push(record);
        }
        dataset
    }
}

impl Serialize for Dataset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.records.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Dataset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let records = Vec::<AssembledRecord>::deserialize(deserializer)?;
        Ok(records.into_iter().collect())
    }
}

impl Validate for Dataset {
    fn validate(&self) -> Result<(), String> {
        match self.records.iter().position(|r| r.key.is_empty()) {
            Some(idx) => Err(format!("record {idx} has an empty key")),
            None => Ok(()),
        }
    }
}

/// Load/save wrapper around the dataset file.
#[derive(Debug)]
pub struct DatasetStore {
    file: DurableJson<Dataset>,
}

impl DatasetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: DurableJson::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn load(&self) -> Loaded<Dataset> {
        let loaded = self.file.load();
        if loaded.source != LoadSource::Default {
            log::info!(
                "Loaded {} existing records from {}",
                loaded.value.len(),
                self.path().display()
            );
        }
        loaded
    }

    /// Committed dataset for display; leaves every file as it is.
    pub fn read(&self) -> Result<Dataset, StoreError> {
        self.file.read_committed()
    }

    pub fn save(&self, dataset: &Dataset) -> Result<(), StoreError> {
        log::debug!("Saving {} records to {}", dataset.len(), self.path().display());
        self.file.save(dataset)
    }

    /// Size of the canonical file on disk, if present
    pub fn file_size(&self) -> Option<u64> {
        std::fs::metadata(self.path()).ok().map(|m| m.len())
    }

    pub fn cleanup_stale_tmp(&self) -> bool {
        self.file.cleanup_stale_tmp()
    }
}
