use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Allow-list over resource types and output names.
///
/// Each list has three states: unset matches everything, set-but-empty
/// matches nothing, and a non-empty set is an exact membership test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub resource_types: Option<BTreeSet<String>>,
    #[serde(default)]
    pub outputs: Option<BTreeSet<String>>,
}

impl Filter {
    /// A filter that lets everything through.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn with_resource_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = Some(outputs.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches_resource_type(&self, resource_type: &str) -> bool {
        matches(&self.resource_types, resource_type)
    }

    pub fn matches_output(&self, output: &str) -> bool {
        matches(&self.outputs, output)
    }
}

fn matches(allowed: &Option<BTreeSet<String>>, name: &str) -> bool {
    match allowed {
        None => true,
        // empty set falls through to `contains` and matches nothing
        Some(set) => set.contains(name),
    }
}
