//! Per-feed checkpoints.
//!
//! A checkpoint is the sequence of the last change applied locally. It only
//! moves after the change has been applied, so a crash can replay at most
//! one change, and appliers are idempotent.

use crate::error::{FollowError, FollowResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Sync state of one followed feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSyncState {
    /// Service root URL.
    pub url: String,
    /// Last applied sequence (0 = nothing yet).
    pub checkpoint: u64,
}

impl DataSyncState {
    /// Creates a fresh state for a URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            checkpoint: 0,
        }
    }
}

/// Storage for checkpoints, keyed by URL.
pub trait CheckpointStore: Send + Sync {
    /// Loads the state for a URL; unknown URLs start at 0.
    fn load(&self, url: &str) -> FollowResult<DataSyncState>;

    /// Persists a state.
    fn save(&self, state: &DataSyncState) -> FollowResult<()>;

    /// Forgets the state for a URL.
    fn reset(&self, url: &str) -> FollowResult<()>;
}

/// In-memory checkpoints.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    states: RwLock<HashMap<String, DataSyncState>>,
}

impl MemoryCheckpointStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, url: &str) -> FollowResult<DataSyncState> {
        Ok(self
            .states
            .read()
            .get(url)
            .cloned()
            .unwrap_or_else(|| DataSyncState::new(url)))
    }

    fn save(&self, state: &DataSyncState) -> FollowResult<()> {
        self.states.write().insert(state.url.clone(), state.clone());
        Ok(())
    }

    fn reset(&self, url: &str) -> FollowResult<()> {
        self.states.write().remove(url);
        Ok(())
    }
}

/// Checkpoints stored as one JSON file per URL.
///
/// Files are named by the sha-256 of the URL and replaced atomically.
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Opens (creating if needed) a checkpoint directory.
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

    fn state_path(&self, url: &str) -> PathBuf {
        let name = hex::encode(Sha256::digest(url.as_bytes()));
        self.dir.join(format!("{name}.json"))
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> FollowResult<()> {
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> FollowResult<()> {
        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, url: &str) -> FollowResult<DataSyncState> {
        match fs::read(self.state_path(url)) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| FollowError::Checkpoint(format!("unreadable checkpoint for {url}: {e}"))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(DataSyncState::new(url)),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, state: &DataSyncState) -> FollowResult<()> {
        let path = self.state_path(&state.url);
        let temp = path.with_extension("json.tmp");

        let mut file = File::create(&temp)?;
        let bytes = serde_json::to_vec(state)
            .map_err(|e| FollowError::Checkpoint(format!("encode checkpoint for {}: {e}", state.url)))?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &path)?;
        self.sync_directory()
    }

    fn reset(&self, url: &str) -> FollowResult<()> {
        match fs::remove_file(self.state_path(url)) {
            Ok(()) => self.sync_directory(),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
