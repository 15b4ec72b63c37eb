//! Durable storage for the last snapshot seen, so drift that happens while
//! infralog is down is still reported after a restart.

use crate::tfstate::model::Snapshot;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Persistence path cannot be empty")]
    EmptyPath,

    #[error("Failed to create persistence directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read persisted state: {0}")]
    Read(std::io::Error),

    #[error("Failed to parse persisted state: {0}")]
    Parse(serde_json::Error),

    #[error("Failed to serialize state: {0}")]
    Serialize(serde_json::Error),

    #[error("Failed to write temporary state file: {0}")]
    Write(std::io::Error),

    #[error("Failed to rename state file into place: {0}")]
    Rename(std::io::Error),

    #[error("Persistence task failed: {0}")]
    Task(String),
}

/// Storage for the last confirmed snapshot.
///
/// Implementations must be safe for concurrent use.
pub trait Store: Send + Sync {
    /// Returns `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<Snapshot>, PersistError>;

    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistError>;
}
