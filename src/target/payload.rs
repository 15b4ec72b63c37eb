use crate::backend::SourceDescriptor;
use crate::shared::git::GitMetadata;
use crate::tfstate::diff::StateDiff;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TargetError {
    #[error("Invalid target configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("{target} request failed with status code: {status}")]
    Status { target: &'static str, status: u16 },

    #[error("{target} request failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        target: &'static str,
        attempts: u32,
        last: Box<TargetError>,
    },

    #[error("Failed to serialize {target} message: {message}")]
    Serialize {
        target: &'static str,
        message: String,
    },

    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for TargetError {
    fn from(error: reqwest::Error) -> Self {
        TargetError::HttpError(error.to_string())
    }
}

/// Everything a target needs to report one detected drift.
#[derive(Debug, Clone)]
pub struct Payload {
    pub diffs: StateDiff,
    pub timestamp: DateTime<Utc>,
    pub source: SourceDescriptor,
    pub git: Option<GitMetadata>,
}

impl Payload {
    pub fn new(diffs: StateDiff, source: SourceDescriptor, git: Option<GitMetadata>) -> Self {
        Self {
            diffs,
            timestamp: Utc::now(),
            source,
            git,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn formatted_time(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    }
}

/// A sink that receives drift notifications.
#[async_trait]
pub trait Target: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    async fn write(&self, payload: &Payload) -> Result<(), TargetError>;
}

/// Human-readable rendering of one side of a value diff.
pub fn render_value(value: Option<&Value>) -> String {
    match value {
        None => "(none)".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
