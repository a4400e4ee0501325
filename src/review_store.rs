use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Write-once cache of review id → relevance.
///
/// Once a flag is stored for an id it is never revalidated or replaced.
pub trait ReviewStore: Send + Sync {
    fn get(&self, review_id: u64) -> Result<Option<bool>>;

    /// Store a flag unless one already exists. Returns the flag now on record.
    fn put(&self, review_id: u64, relevant: bool) -> Result<bool>;

    /// Return the cached flag, or compute, persist and return it.
    fn get_or_compute(
        &self,
        review_id: u64,
        compute: &mut dyn FnMut() -> Result<bool>,
    ) -> Result<bool> {
        if let Some(flag) = self.get(review_id)? {
            return Ok(flag);
        }
        let flag = compute()?;
        self.put(review_id, flag)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ReviewRecords {
    /// Keyed by review id; TOML table keys must be strings.
    #[serde(default)]
    pub reviews: BTreeMap<String, bool>,
}

/// Review records persisted as TOML in a single file.
///
/// Writers serialise on an advisory lock held on `<path>.lock`, so several
/// processes sharing one store never drop each other's records.
pub struct TomlReviewStore {
    path: PathBuf,
}

impl TomlReviewStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Load records from disk. A missing file is empty; an unreadable or
    /// corrupted one is an error and is left untouched.
    pub fn load(&self) -> Result<ReviewRecords> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ReviewRecords::default()),
            Err(e) => {
                return Err(Error::State(format!(
                    "failed to read review store {}: {e}",
                    self.path.display()
                )));
            }
        };
        toml::from_str(&content).map_err(|e| {
            Error::State(format!(
                "corrupted review store {}: {e}",
                self.path.display()
            ))
        })
    }

    fn create_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::State(format!("failed to create store dir: {e}")))?;
        }
        Ok(())
    }

    /// Run `f` while holding the store's exclusive file lock.
    fn with_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.create_parent()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| Error::State(format!("failed to open store lock: {e}")))?;
        FileExt::lock_exclusive(&file)
            .map_err(|e| Error::State(format!("failed to lock review store: {e}")))?;
        let result = f();
        if let Err(e) = FileExt::unlock(&file) {
            warn!(path = %self.lock_path().display(), error = %e, "failed to unlock review store");
        }
        result
    }

    /// Caller holds the store lock.
    fn save(&self, records: &ReviewRecords) -> Result<()> {
        let content = toml::to_string_pretty(records)
            .map_err(|e| Error::State(format!("failed to serialize reviews: {e}")))?;

        // Write then rename so readers never observe a truncated file.
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(format!(".{}.tmp", std::process::id()));
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, content)
            .map_err(|e| Error::State(format!("failed to write review store: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| Error::State(format!("failed to replace review store: {e}")))?;

        Ok(())
    }
}

impl ReviewStore for TomlReviewStore {
    fn get(&self, review_id: u64) -> Result<Option<bool>> {
        Ok(self.load()?.reviews.get(&review_id.to_string()).copied())
    }

    fn put(&self, review_id: u64, relevant: bool) -> Result<bool> {
        self.with_lock(|| {
            let mut records = self.load()?;
            let key = review_id.to_string();
            if let Some(existing) = records.reviews.get(&key) {
                return Ok(*existing);
            }
            records.reviews.insert(key, relevant);
            self.save(&records)?;
            Ok(relevant)
        })
    }
}

/// In-memory store, for tests and for running without persistence.
#[derive(Default)]
pub struct MemoryReviewStore {
    records: Mutex<BTreeMap<u64, bool>>,
}

impl MemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReviewStore for MemoryReviewStore {
    fn get(&self, review_id: u64) -> Result<Option<bool>> {
        let records = self
            .records
            .lock()
            .map_err(|_| Error::State("review store lock poisoned".to_string()))?;
        Ok(records.get(&review_id).copied())
    }

    fn put(&self, review_id: u64, relevant: bool) -> Result<bool> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| Error::State("review store lock poisoned".to_string()))?;
        Ok(*records.entry(review_id).or_insert(relevant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, TomlReviewStore) {
        let dir = TempDir::new().unwrap();
        let store = TomlReviewStore::new(dir.path().join("state").join("reviews.toml"));
        (dir, store)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (_dir, store) = test_store();
        assert_eq!(store.load().unwrap(), ReviewRecords::default());
        assert_eq!(store.get(42).unwrap(), None);
    }

    #[test]
    fn test_put_then_get() {
        let (_dir, store) = test_store();
        assert!(store.put(42, true).unwrap());
        assert!(!store.put(43, false).unwrap());
        assert_eq!(store.get(42).unwrap(), Some(true));
        assert_eq!(store.get(43).unwrap(), Some(false));
    }

    #[test]
    fn test_put_is_write_once() {
        let (_dir, store) = test_store();
        store.put(7, false).unwrap();
        assert!(!store.put(7, true).unwrap());
        assert_eq!(store.get(7).unwrap(), Some(false));
    }

    #[test]
    fn test_corrupted_file_is_error_and_kept() {
        let (_dir, store) = test_store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        let content = "[reviews]\n\"1\" = true\n\"2\" = false\n[[[ garbage";
        std::fs::write(store.path(), content).unwrap();

        assert!(matches!(store.get(1), Err(Error::State(_))));
        assert!(matches!(store.put(3, true), Err(Error::State(_))));
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), content);
    }

    #[test]
    fn test_concurrent_stores_keep_every_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reviews.toml");
        for round in 0..20u64 {
            let first = TomlReviewStore::new(&path);
            let second = TomlReviewStore::new(&path);
            std::thread::scope(|s| {
                s.spawn(|| first.put(round * 2, true).unwrap());
                s.spawn(|| second.put(round * 2 + 1, false).unwrap());
            });
        }

        let records = TomlReviewStore::new(&path).load().unwrap();
        assert_eq!(records.reviews.len(), 40);
        assert_eq!(records.reviews.get("38"), Some(&true));
        assert_eq!(records.reviews.get("39"), Some(&false));
    }

    #[test]
    fn test_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reviews.toml");
        TomlReviewStore::new(&path).put(1234, true).unwrap();

        let reopened = TomlReviewStore::new(&path);
        assert_eq!(reopened.get(1234).unwrap(), Some(true));

        let content = std::fs::read_to_string(&path).unwrap();
        let _: toml::Value = toml::from_str(&content).unwrap();
    }

    #[test]
    fn test_get_or_compute_runs_once() {
        let store = MemoryReviewStore::new();
        let mut calls = 0;
        let mut compute = || {
            calls += 1;
            Ok(true)
        };
        assert!(store.get_or_compute(5, &mut compute).unwrap());
        assert!(store.get_or_compute(5, &mut compute).unwrap());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_get_or_compute_does_not_store_errors() {
        let store = MemoryReviewStore::new();
        let err = store
            .get_or_compute(9, &mut || Err(Error::external("arc", "down")))
            .unwrap_err();
        assert!(err.to_string().contains("down"));
        assert_eq!(store.get(9).unwrap(), None);
    }
}
