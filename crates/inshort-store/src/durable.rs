//! Atomic durable JSON record
//!
//! File layout next to the canonical file `{name}`:
//! ```text
//! {name}          # canonical copy, always a complete document
//! {name}.tmp      # staging file for the save in flight
//! {name}.backup   # previous canonical copy, only while a save is in flight
//! {name}.corrupt-{utc timestamp}  # unparseable canonical copy set aside by `load`
//! ```
//!
//! `save` writes and fsyncs the staging file, re-reads and validates it,
//! copies the old canonical file to the backup, renames the staging file over
//! the canonical file, then re-reads the canonical file before dropping the
//! backup. A crash at any step leaves either the old or the new document in
//! place, plus possibly a backup that `load` knows how to use.

use std::fs::{self, File};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Structural shape check run after a document parses.
pub trait Validate {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Which copy `load` ended up using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Canonical,
    Backup,
    Default,
}

/// Value returned by [`DurableJson::load`].
#[derive(Debug)]
pub struct Loaded<T> {
    pub value: T,
    pub source: LoadSource,
}

/// One JSON document persisted with write-temp, fsync, rename.
#[derive(Debug, Clone)]
pub struct DurableJson<T> {
    path: PathBuf,
    tmp_path: PathBuf,
    backup_path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

impl<T> DurableJson<T>
where
    T: Serialize + DeserializeOwned + Validate + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            tmp_path: sibling(&path, "tmp"),
            backup_path: sibling(&path, "backup"),
            path,
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Atomically replace the canonical file with `value`.
    ///
    /// On error the previous canonical file is left untouched.
    pub fn save(&self, value: &T) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec_pretty(value).map_err(|e| StoreError::Encode(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        if let Err(e) = self.stage(&bytes) {
            self.discard_tmp();
            return Err(e);
        }

        let had_canonical = self.path.exists();
        if had_canonical {
            if let Err(e) = fs::copy(&self.path, &self.backup_path) {
                self.discard_tmp();
                return Err(StoreError::io(&self.backup_path, e));
            }
        }

        if let Err(e) = fs::rename(&self.tmp_path, &self.path) {
            self.discard_tmp();
            self.discard_backup();
            return Err(StoreError::io(&self.path, e));
        }
        self.sync_parent();

        if let Err(e) = self.read_validated(&self.path) {
            log::error!("{e}; restoring previous copy");
            if had_canonical {
                fs::rename(&self.backup_path, &self.path)
                    .map_err(|e| StoreError::io(&self.path, e))?;
            }
            return Err(e);
        }

        self.discard_backup();
        Ok(())
    }

    /// Write, flush and re-validate the staging file.
    fn stage(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let mut file = File::create(&self.tmp_path).map_err(|e| StoreError::io(&self.tmp_path, e))?;
        file.write_all(bytes)
            .and_then(|()| file.sync_all())
            .map_err(|e| StoreError::io(&self.tmp_path, e))?;
        drop(file);
        self.read_validated(&self.tmp_path).map(drop)
    }

    /// Load the canonical copy, falling back to the backup, then to `T::default()`.
    ///
    /// Never fails. A canonical file that does not parse or validate is
    /// renamed to a timestamped `.corrupt-*` sibling so the next save cannot
    /// destroy it. Other read errors leave the file where it is.
    pub fn load(&self) -> Loaded<T> {
        let canonical_err = match self.read_validated(&self.path) {
            Ok(value) => {
                return Loaded {
                    value,
                    source: LoadSource::Canonical,
                };
            }
            Err(e) => e,
        };

        let canonical_missing = canonical_err.is_not_found();
        if !canonical_missing {
            log::warn!("{canonical_err}; trying backup");
        }

        let result = match self.read_validated(&self.backup_path) {
            Ok(value) => {
                log::warn!("recovered {} from backup", self.path.display());
                Loaded {
                    value,
                    source: LoadSource::Backup,
                }
            }
            Err(backup_err) => {
                if !backup_err.is_not_found() {
                    log::warn!("{backup_err}");
                }
                if !canonical_missing {
                    log::warn!(
                        "no usable copy of {}, starting from empty state",
                        self.path.display()
                    );
                }
                Loaded {
                    value: T::default(),
                    source: LoadSource::Default,
                }
            }
        };

        if canonical_err.is_corruption() {
            self.quarantine();
        }
        result
    }

    /// Canonical copy, else the backup. Never renames or writes anything.
    pub fn read_committed(&self) -> Result<T, StoreError> {
        self.read_validated(&self.path)
            .or_else(|e| self.read_validated(&self.backup_path).map_err(|_| e))
    }

    /// Read and parse any of the copies without falling back.
    pub fn read_validated(&self, path: &Path) -> Result<T, StoreError> {
        let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
        let value: T = serde_json::from_slice(&bytes).map_err(|e| StoreError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        value.validate().map_err(|message| StoreError::Validation {
            path: path.to_path_buf(),
            message,
        })?;
        Ok(value)
    }

    /// Remove a staging file left behind by a crashed save.
    pub fn cleanup_stale_tmp(&self) -> bool {
        if !self.tmp_path.exists() {
            return false;
        }
        log::warn!("Removing stale tmp file: {}", self.tmp_path.display());
        self.discard_tmp();
        true
    }

    fn quarantine(&self) {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let mut corrupt = sibling(&self.path, &format!("corrupt-{stamp}"));
        let mut n = 1;
        while corrupt.exists() {
            corrupt = sibling(&self.path, &format!("corrupt-{stamp}-{n}"));
            n += 1;
        }
        match fs::rename(&self.path, &corrupt) {
            Ok(()) => log::warn!("kept corrupt copy as {}", corrupt.display()),
            Err(e) => log::warn!("cannot set aside {}: {e}", self.path.display()),
        }
    }

    fn discard_tmp(&self) {
        if let Err(e) = fs::remove_file(&self.tmp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::debug!("cannot remove {}: {e}", self.tmp_path.display());
            }
        }
    }

    fn discard_backup(&self) {
        if let Err(e) = fs::remove_file(&self.backup_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::debug!("cannot remove {}: {e}", self.backup_path.display());
            }
        }
    }

    fn sync_parent(&self) {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u32,
        label: String,
    }

    impl Validate for Counter {
        fn validate(&self) -> Result<(), String> {
            if self.label.is_empty() && self.value > 0 {
                return Err("label required".into());
            }
            Ok(())
        }
    }

    fn counter(value: u32) -> Counter {
        Counter {
            value,
            label: format!("v{value}"),
        }
    }

    fn store(dir: &Path) -> DurableJson<Counter> {
        DurableJson::new(dir.join("counter.json"))
    }

    #[test]
    fn load_missing_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = store(dir.path()).load();
        assert_eq!(loaded.source, LoadSource::Default);
        assert_eq!(loaded.value, Counter::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.save(&counter(3)).unwrap();

        let loaded = s.load();
        assert_eq!(loaded.source, LoadSource::Canonical);
        assert_eq!(loaded.value, counter(3));
        assert!(!s.tmp_path().exists());
        assert!(!s.backup_path().exists());
    }

    #[test]
    fn save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let s: DurableJson<Counter> = DurableJson::new(dir.path().join("a/b/counter.json"));
        s.save(&counter(1)).unwrap();
        assert!(s.exists());
    }

    #[test]
    fn truncated_tmp_leaves_canonical_intact() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.save(&counter(1)).unwrap();

        // Crash halfway through staging the next save
        let full = serde_json::to_vec_pretty(&counter(2)).unwrap();
        fs::write(s.tmp_path(), &full[..full.len() / 2]).unwrap();

        let loaded = s.load();
        assert_eq!(loaded.source, LoadSource::Canonical);
        assert_eq!(loaded.value, counter(1));

        // Next save overwrites the stale staging file
        s.save(&counter(2)).unwrap();
        assert_eq!(s.load().value, counter(2));
    }

    #[test]
    fn failed_staging_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.save(&counter(1)).unwrap();

        // A directory in the staging slot makes File::create fail
        fs::create_dir(s.tmp_path()).unwrap();
        let err = s.save(&counter(2)).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));

        fs::remove_dir(s.tmp_path()).unwrap();
        assert_eq!(s.load().value, counter(1));
    }

    #[test]
    fn corrupt_canonical_falls_back_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.save(&counter(5)).unwrap();

        // Crash after backup copy, then canonical gets clobbered
        fs::copy(s.path(), s.backup_path()).unwrap();
        fs::write(s.path(), b"{\"value\": 6, \"lab").unwrap();

        let loaded = s.load();
        assert_eq!(loaded.source, LoadSource::Backup);
        assert_eq!(loaded.value, counter(5));
    }

    #[test]
    fn corrupt_without_backup_defaults_and_quarantines() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        fs::write(s.path(), b"not json").unwrap();

        let loaded = s.load();
        assert_eq!(loaded.source, LoadSource::Default);
        assert!(!s.path().exists());
        assert_eq!(corrupt_copies(dir.path()).len(), 1);
    }

    fn corrupt_copies(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("counter.json.corrupt-"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn repeated_corruption_keeps_every_copy() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        fs::write(s.path(), b"first garbage").unwrap();
        s.load();
        fs::write(s.path(), b"second garbage").unwrap();
        s.load();

        let copies = corrupt_copies(dir.path());
        assert_eq!(copies.len(), 2);
        let contents: Vec<Vec<u8>> = copies
            .iter()
            .map(|n| fs::read(dir.path().join(n)).unwrap())
            .collect();
        assert!(contents.contains(&b"first garbage".to_vec()));
        assert!(contents.contains(&b"second garbage".to_vec()));
    }

    #[test]
    fn read_committed_leaves_corrupt_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        fs::write(s.path(), b"{ nope").unwrap();

        assert!(s.read_committed().unwrap_err().is_corruption());
        assert_eq!(fs::read(s.path()).unwrap(), b"{ nope");
        assert!(corrupt_copies(dir.path()).is_empty());

        fs::write(s.backup_path(), serde_json::to_vec(&counter(4)).unwrap()).unwrap();
        assert_eq!(s.read_committed().unwrap(), counter(4));
    }

    #[test]
    fn unreadable_canonical_is_not_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        // A directory in the canonical slot fails to read but is not corrupt
        fs::create_dir(s.path()).unwrap();

        let loaded = s.load();
        assert_eq!(loaded.source, LoadSource::Default);
        assert!(s.path().is_dir());
        assert!(corrupt_copies(dir.path()).is_empty());
    }

    #[test]
    fn validation_failure_treated_like_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        fs::write(s.path(), br#"{"value": 9, "label": ""}"#).unwrap();
        fs::write(s.backup_path(), serde_json::to_vec(&counter(8)).unwrap()).unwrap();

        let loaded = s.load();
        assert_eq!(loaded.source, LoadSource::Backup);
        assert_eq!(loaded.value, counter(8));
    }

    #[test]
    fn wrong_shape_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        fs::write(s.path(), b"[1, 2, 3]").unwrap();
        let err = s.read_validated(s.path()).unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn cleanup_stale_tmp_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(!s.cleanup_stale_tmp());
        fs::write(s.tmp_path(), b"partial").unwrap();
        assert!(s.cleanup_stale_tmp());
        assert!(!s.tmp_path().exists());
    }

    #[test]
    fn sibling_paths() {
        let s = store(Path::new("/data"));
        assert_eq!(s.tmp_path(), Path::new("/data/counter.json.tmp"));
        assert_eq!(s.backup_path(), Path::new("/data/counter.json.backup"));
    }
}
