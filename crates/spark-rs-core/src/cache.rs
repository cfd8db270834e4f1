//! Device-local "next spark" cache.
//!
//! The durable store is the source of truth; entries here only skip a round
//! of range and interaction queries and are dropped whenever the user reacts.

use crate::error::SparkCoreError;
use chrono::NaiveDate;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use spark_rs_store::Spark;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Cached next spark for one user and local day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSpark {
    pub date: NaiveDate,
    pub spark: Spark,
    /// Recommendations stored for the day when the entry was written.
    #[serde(default)]
    pub recommendations: u64,
}

/// Read-through cache of the next spark to deliver.
pub trait NextSparkCache: Send + Sync {
    fn get(&self, user_id: &str) -> Result<Option<CachedSpark>, SparkCoreError>;
    fn put(&self, user_id: &str, entry: &CachedSpark) -> Result<(), SparkCoreError>;
    fn invalidate(&self, user_id: &str) -> Result<(), SparkCoreError>;
}

/// Process-local cache.
#[derive(Debug, Default)]
pub struct MemorySparkCache {
    entries: Mutex<HashMap<String, CachedSpark>>,
}

impl MemorySparkCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NextSparkCache for MemorySparkCache {
    fn get(&self, user_id: &str) -> Result<Option<CachedSpark>, SparkCoreError> {
        Ok(self.entries.lock().get(user_id).cloned())
    }

    fn put(&self, user_id: &str, entry: &CachedSpark) -> Result<(), SparkCoreError> {
        self.entries
            .lock()
            .insert(user_id.to_string(), entry.clone());
        Ok(())
    }

    fn invalidate(&self, user_id: &str) -> Result<(), SparkCoreError> {
        self.entries.lock().remove(user_id);
        Ok(())
    }
}

/// One JSON file per user under a cache directory.
#[derive(Debug, Clone)]
pub struct FileSparkCache {
    dir: PathBuf,
}

impl FileSparkCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(user_id)))
    }
}

impl NextSparkCache for FileSparkCache {
    fn get(&self, user_id: &str) -> Result<Option<CachedSpark>, SparkCoreError> {
        let path = self.entry_path(user_id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(SparkCoreError::Io(err)),
        };
        let entry: CachedSpark = serde_json::from_str(&contents).map_err(|err| {
            SparkCoreError::Cache(format!("corrupt cache entry {}: {err}", path.display()))
        })?;
        if entry.spark.user_id != user_id {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn put(&self, user_id: &str, entry: &CachedSpark) -> Result<(), SparkCoreError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.entry_path(user_id);
        // Each writer stages its own file so concurrent puts never rename a
        // half-written sibling into place.
        let tmp = self
            .dir
            .join(format!("{}.{}.tmp", file_stem(user_id), Uuid::new_v4()));
        let serialized = serde_json::to_vec(entry)
            .map_err(|err| SparkCoreError::Cache(format!("serialize cache entry: {err}")))?;
        if let Err(err) = fs::write(&tmp, serialized).and_then(|()| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(SparkCoreError::Io(err));
        }
        debug!("next spark cached (user_id={user_id}, spark_id={})", entry.spark.id);
        Ok(())
    }

    fn invalidate(&self, user_id: &str) -> Result<(), SparkCoreError> {
        match fs::remove_file(self.entry_path(user_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SparkCoreError::Io(err)),
        }
    }
}

/// Filesystem-safe, collision-free name for a user id (lowercase hex of
/// its UTF-8 bytes).
fn file_stem(user_id: &str) -> String {
    user_id.bytes().map(|byte| format!("{byte:02x}")).collect()
}
