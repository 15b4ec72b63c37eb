use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to read state file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("State request to {url} failed with status code: {status}")]
    Status { url: String, status: u16 },
}

impl From<reqwest::Error> for BackendError {
    fn from(error: reqwest::Error) -> Self {
        BackendError::HttpError(error.to_string())
    }
}

/// Identifies where a snapshot came from, e.g. `file:///srv/tf/terraform.tfstate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub backend: String,
    pub location: String,
}

impl SourceDescriptor {
    pub fn new(backend: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            location: location.into(),
        }
    }
}

impl std::fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.location)
    }
}

/// Source of raw Terraform state bytes.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get_state(&self) -> Result<Vec<u8>, BackendError>;

    /// Backend type name, for logging.
    fn name(&self) -> &'static str;

    fn source(&self) -> SourceDescriptor;
}
