//! Local targets that followed changes are applied to.

use crate::error::{FollowError, FollowResult};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Applies followed changes locally.
///
/// Both operations overwrite by key and must be idempotent: after a crash
/// the last change before the checkpoint may be applied again.
pub trait ChangeApplier: Send + Sync {
    /// Creates or replaces the record under `key`.
    fn apply_update(&self, key: &str, data: &Value) -> FollowResult<()>;

    /// Removes the record under `key`, if present.
    fn apply_delete(&self, key: &str) -> FollowResult<()>;
}

/// In-memory mirror of a feed.
#[derive(Debug, Default)]
pub struct MemoryMirror {
    records: RwLock<BTreeMap<String, Value>>,
}

impl MemoryMirror {
    /// Creates an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.records.read().get(key).cloned()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the mirror is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Returns a copy of every record, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.records.read().clone()
    }
}

impl ChangeApplier for MemoryMirror {
    fn apply_update(&self, key: &str, data: &Value) -> FollowResult<()> {
        self.records.write().insert(key.to_string(), data.clone());
        Ok(())
    }

    fn apply_delete(&self, key: &str) -> FollowResult<()> {
        self.records.write().remove(key);
        Ok(())
    }
}

/// Mirror that keeps one JSON file per key in a directory.
#[derive(Debug)]
pub struct DirectoryMirror {
    dir: PathBuf,
}

impl DirectoryMirror {
    /// Opens (creating if needed) a mirror directory.
    pub fn open(dir: &Path) -> FollowResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Returns the directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads the record under `key`.
    pub fn get(&self, key: &str) -> FollowResult<Option<Value>> {
        match fs::read(self.record_path(key)) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| FollowError::Apply(format!("unreadable record {key:?}: {e}"))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the path a key is stored at.
    pub fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(file_name(key))
    }
}

impl ChangeApplier for DirectoryMirror {
    fn apply_update(&self, key: &str, data: &Value) -> FollowResult<()> {
        let path = self.record_path(key);
        let temp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(data)
            .map_err(|e| FollowError::Apply(format!("encode {key:?}: {e}")))?;

        let mut file = File::create(&temp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, &path)?;
        Ok(())
    }

    fn apply_delete(&self, key: &str) -> FollowResult<()> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// File name for a key. Keys that are not plainly file-safe are hex-encoded
/// behind a `~` prefix, which plain names never start with.
fn file_name(key: &str) -> String {
    let plain = !key.is_empty()
        && !key.starts_with('.')
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if plain {
        format!("{key}.json")
    } else {
        format!("~{}.json", hex::encode(key.as_bytes()))
    }
}
