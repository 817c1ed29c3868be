use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use engine_logging::engine_warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persist::read_optional;
use crate::{cache_filename, CacheDir, PersistError};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("cache entry {path:?} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("cache lock poisoned")]
    Poisoned,
}

/// Synchronous string key-value store shared with other readers and writers.
///
/// There is no locking across keys; each key is last-writer-wins.
pub trait KeyValueCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
    fn remove(&self, key: &str) -> Result<(), CacheError>;
    fn keys(&self) -> Result<Vec<String>, CacheError>;
}

/// In-process cache; state lasts as long as the value.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, CacheError> {
        let entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.keys().cloned().collect())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    key: String,
    value: String,
}

/// Directory-backed cache: one JSON file per key, replaced atomically.
///
/// Several processes may share the directory; they only ever see whole values.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: CacheDir,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: CacheDir::new(dir),
        }
    }

    fn parse(path: &Path, content: &str) -> Result<FileEntry, CacheError> {
        serde_json::from_str(content).map_err(|err| CacheError::Corrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }
}

impl KeyValueCache for FileCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let name = cache_filename(key);
        let Some(content) = self.dir.read(&name)? else {
            return Ok(None);
        };
        let entry = Self::parse(&self.dir.file(&name), &content)?;
        // A different key hashing to the same file name reads as absent.
        Ok((entry.key == key).then_some(entry.value))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let entry = FileEntry {
            key: key.to_string(),
            value: value.to_string(),
        };
        let name = cache_filename(key);
        let content = serde_json::to_string(&entry).map_err(|err| CacheError::Corrupt {
            path: self.dir.file(&name),
            reason: err.to_string(),
        })?;
        self.dir.write_atomic(&name, &content)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        Ok(self.dir.remove(&cache_filename(key))?)
    }

    fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut keys = Vec::new();
        for path in self.dir.files_with_extension("json")? {
            // Deleted by another writer since the listing.
            let Some(content) = read_optional(&path)? else {
                continue;
            };
            match Self::parse(&path, &content) {
                Ok(entry) => keys.push(entry.key),
                Err(err) => engine_warn!("Skipping unreadable cache entry: {}", err),
            }
        }
        keys.sort();
        Ok(keys)
    }
}
