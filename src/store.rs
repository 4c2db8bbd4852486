//! Durable JSON Store
//!
//! Flat JSON documents on disk, one object per file, rewritten in full on every save.
//! A missing (or empty) file reads as an empty document.
//!
//! Writes go to a sibling temp file that is fsynced and renamed over the target, so a
//! crash mid-write leaves the previous document intact.

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Errors from loading or saving a document
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Load a document, treating a missing or empty file as `T::default()`
pub fn load<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No document at {}, starting empty", path.display());
            return Ok(T::default());
        }
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if content.trim().is_empty() {
        return Ok(T::default());
    }

    serde_json::from_str(&content).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Overwrite the document at `path` with `document`
pub fn save<T>(path: &Path, document: &T) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec_pretty(document)?;
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
    }

    let tmp = temp_path(path);
    {
        let mut file = File::create(&tmp).map_err(write_err)?;
        file.write_all(&bytes).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
    }
    fs::rename(&tmp, path).map_err(write_err)?;

    debug!("Saved {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// String-to-string map with explicit persistence.
///
/// `set` and `remove` only touch memory; `persist` rewrites the backing document.
/// `put` is the durable write used before acknowledging anything to a user.
pub trait MapStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Returns the previous value
    fn set(&self, key: &str, value: &str) -> Option<String>;

    /// Returns the removed value
    fn remove(&self, key: &str) -> Option<String>;

    fn persist(&self) -> Result<(), StoreError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set and persist. If the write fails the in-memory entry is restored, so memory
    /// never claims something the disk does not have.
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let previous = self.set(key, value);
        if let Err(e) = self.persist() {
            match previous {
                Some(prev) => {
                    self.set(key, &prev);
                }
                None => {
                    self.remove(key);
                }
            }
            return Err(e);
        }
        Ok(())
    }
}

/// `MapStore` backed by a JSON object on disk
pub struct JsonMapStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonMapStore {
    /// Open the document at `path`; a missing file is an empty map
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries: BTreeMap<String, String> = load(&path)?;
        info!("Map store opened: {} ({} entries)", path.display(), entries.len());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }
}

impl MapStore for JsonMapStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Option<String> {
        self.entries.lock().insert(key.to_string(), value.to_string())
    }

    fn remove(&self, key: &str) -> Option<String> {
        self.entries.lock().remove(key)
    }

    fn persist(&self) -> Result<(), StoreError> {
        // Held across the write so saves against this path never overlap
        let entries = self.entries.lock();
        save(&self.path, &*entries)
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// In-memory `MapStore`; `persist` only counts calls
#[derive(Default)]
pub struct MemoryMapStore {
    entries: Mutex<BTreeMap<String, String>>,
    persists: Mutex<usize>,
}

impl MemoryMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        {
            let mut map = store.entries.lock();
            for (k, v) in entries {
                map.insert(k.into(), v.into());
            }
        }
        store
    }

    pub fn persist_count(&self) -> usize {
        *self.persists.lock()
    }
}

impl MapStore for MemoryMapStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Option<String> {
        self.entries.lock().insert(key.to_string(), value.to_string())
    }

    fn remove(&self, key: &str) -> Option<String> {
        self.entries.lock().remove(key)
    }

    fn persist(&self) -> Result<(), StoreError> {
        *self.persists.lock() += 1;
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
