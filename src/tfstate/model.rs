use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Attribute and output values are open JSON values compared structurally.
pub type AttributeValue = Value;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to parse state: {message} - Content: {preview}")]
    Parse { message: String, preview: String },
}

/// A complete Terraform state snapshot, as written by `terraform` in a
/// `.tfstate` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Snapshot {
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub terraform_version: String,
    #[serde(default)]
    pub serial: i64,
    #[serde(default)]
    pub lineage: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Resource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub module: String,
    #[serde(default)]
    pub mode: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub instances: Vec<ResourceInstance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceInstance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_key: Option<Value>,
    #[serde(default)]
    pub schema_version: i64,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<String>,
    // sensitive_attributes, dependencies, ... kept for round-tripping only
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Output {
    #[serde(default)]
    pub value: AttributeValue,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sensitive: bool,
}

/// Address of a resource within a snapshot: `[module.]type.name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(String);

/// Components recovered from a [`ResourceId`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceIdParts {
    pub module: String,
    pub resource_type: String,
    pub resource_name: String,
}

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the id back into module path, type and name.
    ///
    /// Everything before the last two segments is the module path, so nested
    /// modules (`module.a.module.b.type.name`) resolve correctly. Ids with
    /// fewer than two segments yield empty parts.
    pub fn split(&self) -> ResourceIdParts {
        let segments: Vec<&str> = self.0.split('.').collect();
        if segments.len() < 2 {
            return ResourceIdParts::default();
        }

        let boundary = segments.len() - 2;
        ResourceIdParts {
            module: segments[..boundary].join("."),
            resource_type: segments[boundary].to_string(),
            resource_name: segments[boundary + 1].to_string(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Resource {
    pub fn id(&self) -> ResourceId {
        if self.module.is_empty() {
            ResourceId(format!("{}.{}", self.resource_type, self.name))
        } else {
            ResourceId(format!(
                "{}.{}.{}",
                self.module, self.resource_type, self.name
            ))
        }
    }
}

impl Snapshot {
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}

/// Parse raw `.tfstate` bytes into a [`Snapshot`].
pub fn parse_state(data: &[u8]) -> Result<Snapshot, StateError> {
    serde_json::from_slice(data).map_err(|e| StateError::Parse {
        message: e.to_string(),
        preview: preview(data),
    })
}

fn preview(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    if text.chars().count() > 100 {
        format!("{}...", text.chars().take(100).collect::<String>())
    } else {
        text.into_owned()
    }
}
