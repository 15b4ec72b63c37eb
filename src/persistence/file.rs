use super::store::{PersistError, Store};
use crate::tfstate::model::Snapshot;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;
use tracing::debug;

/// Persists the snapshot as an indented JSON document.
///
/// Writes go to a temporary file in the target's directory which is then
/// renamed over the target, so readers only ever see a complete file.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Parent directories are created if missing.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(PersistError::EmptyPath);
        }

        let dir = parent_dir(&path);
        std::fs::create_dir_all(&dir).map_err(|source| PersistError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // the guarded data is `()`, a poisoned lock carries no broken state
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Store for FileStore {
    fn load(&self) -> Result<Option<Snapshot>, PersistError> {
        let _guard = self.guard();

        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistError::Read(e)),
        };

        let snapshot = serde_json::from_slice(&data).map_err(PersistError::Parse)?;
        debug!(path = %self.path.display(), "loaded persisted state");
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistError> {
        let _guard = self.guard();

        let data = serde_json::to_vec_pretty(snapshot).map_err(PersistError::Serialize)?;

        let mut temp = NamedTempFile::new_in(parent_dir(&self.path)).map_err(PersistError::Write)?;
        temp.write_all(&data).map_err(PersistError::Write)?;
        temp.as_file().sync_all().map_err(PersistError::Write)?;

        // on failure the temp file travels back inside the error and is removed on drop
        temp.persist(&self.path)
            .map_err(|e| PersistError::Rename(e.error))?;

        debug!(path = %self.path.display(), serial = snapshot.serial, "persisted state");
        Ok(())
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
