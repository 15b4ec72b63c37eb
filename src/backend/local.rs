use super::state_backend::{Backend, BackendError, SourceDescriptor};
use async_trait::async_trait;
use std::path::PathBuf;

/// Reads the state from a file on the local filesystem.
pub struct LocalBackend {
    path: PathBuf,
}

impl LocalBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn get_state(&self) -> Result<Vec<u8>, BackendError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|source| BackendError::Read {
                path: self.path.display().to_string(),
                source,
            })
    }

    fn name(&self) -> &'static str {
        "local"
    }

    fn source(&self) -> SourceDescriptor {
        SourceDescriptor::new("local", format!("file://{}", self.path.display()))
    }
}
