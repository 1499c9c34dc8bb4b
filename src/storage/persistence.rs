//! Snapshot persistence.
//!
//! The whole keyspace is written as one JSON document:
//!
//! ```json
//! {
//!   "name":  { "value": "Ariz",       "expiry": null },
//!   "queue": { "value": ["b", "a"],   "expiry": null },
//!   "token": { "value": "abc",        "expiry": "2026-10-17T12:00:00Z" }
//! }
//! ```
//!
//! Saves go to `<path>.tmp` first and are renamed over the target, so a
//! failed save never clobbers the previous snapshot. The keyspace lock is
//! held from serialization until the rename completes.

use crate::storage::engine::{Keyspace, StorageEngine};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

/// Reads and writes the snapshot file at a fixed path.
#[derive(Debug, Clone)]
pub struct Snapshotter {
    path: PathBuf,
}

impl Snapshotter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Writes the current keyspace to disk, replacing any earlier snapshot.
    ///
    /// Returns the number of keys written.
    pub fn save(&self, engine: &StorageEngine) -> Result<usize, PersistenceError> {
        engine.with_keyspace(|keyspace| -> Result<usize, PersistenceError> {
            let document = serde_json::to_vec(keyspace)?;
            self.write_atomically(&document)?;

            debug!(path = %self.path.display(), keys = keyspace.len(), "Snapshot saved");
            Ok(keyspace.len())
        })
    }

    fn write_atomically(&self, document: &[u8]) -> io::Result<()> {
        let tmp = self.tmp_path();

        let result = (|| {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(document)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    /// Reads the snapshot file.
    ///
    /// A missing file is `Ok(None)`. Deadlines are restored as stored and are
    /// not compared against the current time here.
    pub fn try_load(&self) -> Result<Option<Keyspace>, PersistenceError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// Reads the snapshot file, falling back to an empty keyspace.
    ///
    /// Unreadable or malformed snapshots are logged, never fatal.
    pub fn load(&self) -> Keyspace {
        match self.try_load() {
            Ok(Some(keyspace)) => {
                info!(path = %self.path.display(), keys = keyspace.len(), "Snapshot loaded");
                keyspace
            }
            Ok(None) => {
                info!(path = %self.path.display(), "No snapshot found, starting empty");
                Keyspace::new()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable snapshot");
                Keyspace::new()
            }
        }
    }
}
