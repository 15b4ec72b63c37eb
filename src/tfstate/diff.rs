//! Snapshot comparison.
//!
//! [`compare`] joins two snapshots on [`ResourceId`] and output name and
//! reports what was added, removed or changed. Output ordering is fully
//! determined by the inputs: resources sort by id, outputs by name and
//! attributes by key.

use super::filter::Filter;
use super::model::{AttributeValue, Output, Resource, ResourceId, ResourceInstance, Snapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompareError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Added,
    Removed,
    Changed,
}

impl DiffStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffStatus::Added => "added",
            DiffStatus::Removed => "removed",
            DiffStatus::Changed => "changed",
        }
    }
}

impl fmt::Display for DiffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A before/after pair. A missing side means the key did not exist.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValueDiff {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<AttributeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<AttributeValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDiff {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub resource_type: String,
    pub resource_name: String,
    pub status: DiffStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attribute_diffs: BTreeMap<String, ValueDiff>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDiff {
    pub output_name: String,
    pub status: DiffStatus,
    #[serde(default)]
    pub value_diff: ValueDiff,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateDiff {
    pub resource_diffs: Vec<ResourceDiff>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_diffs: Vec<OutputDiff>,
}

impl StateDiff {
    pub fn has_changes(&self) -> bool {
        !self.resource_diffs.is_empty() || !self.output_diffs.is_empty()
    }
}

/// Free-function form of [`StateDiff::has_changes`].
pub fn has_changes(diff: &StateDiff) -> bool {
    diff.has_changes()
}

/// Compare two snapshots, keeping only resources and outputs the filter
/// admits.
///
/// Both snapshots must be present. Resources with several instances
/// (`count`/`for_each`) are compared on their first instance only.
pub fn compare(
    old: Option<&Snapshot>,
    new: Option<&Snapshot>,
    filter: &Filter,
) -> Result<StateDiff, CompareError> {
    let (old, new) = match (old, new) {
        (Some(old), Some(new)) => (old, new),
        _ => {
            return Err(CompareError::InvalidInput(
                "old and new snapshots must both be present".to_string(),
            ))
        }
    };

    let old_resources = map_resources(&old.resources, filter);
    let new_resources = map_resources(&new.resources, filter);

    let all_ids: BTreeSet<&ResourceId> = old_resources.keys().chain(new_resources.keys()).collect();

    let mut resource_diffs = Vec::new();
    for id in all_ids {
        let parts = id.split();
        let status_and_attrs = match (old_resources.get(id), new_resources.get(id)) {
            (None, Some(_)) => Some((DiffStatus::Added, BTreeMap::new())),
            (Some(_), None) => Some((DiffStatus::Removed, BTreeMap::new())),
            (Some(before), Some(after)) => {
                let attribute_diffs = compare_instances(&before.instances, &after.instances);
                if attribute_diffs.is_empty() {
                    None
                } else {
                    Some((DiffStatus::Changed, attribute_diffs))
                }
            }
            (None, None) => None,
        };

        if let Some((status, attribute_diffs)) = status_and_attrs {
            resource_diffs.push(ResourceDiff {
                module: (!parts.module.is_empty()).then_some(parts.module),
                resource_type: parts.resource_type,
                resource_name: parts.resource_name,
                status,
                attribute_diffs,
            });
        }
    }

    let old_outputs = filter_outputs(&old.outputs, filter);
    let new_outputs = filter_outputs(&new.outputs, filter);

    Ok(StateDiff {
        resource_diffs,
        output_diffs: compare_outputs(&old_outputs, &new_outputs),
    })
}

fn map_resources<'a>(
    resources: &'a [Resource],
    filter: &Filter,
) -> BTreeMap<ResourceId, &'a Resource> {
    resources
        .iter()
        .filter(|resource| filter.matches_resource_type(&resource.resource_type))
        .map(|resource| (resource.id(), resource))
        .collect()
}

fn filter_outputs<'a>(
    outputs: &'a BTreeMap<String, Output>,
    filter: &Filter,
) -> BTreeMap<&'a str, &'a Output> {
    outputs
        .iter()
        .filter(|(name, _)| filter.matches_output(name))
        .map(|(name, output)| (name.as_str(), output))
        .collect()
}

// TODO: diff every instance keyed by index_key once multi-instance reporting is agreed on
fn compare_instances(
    before: &[ResourceInstance],
    after: &[ResourceInstance],
) -> BTreeMap<String, ValueDiff> {
    match (before.first(), after.first()) {
        (Some(before), Some(after)) => compare_attributes(&before.attributes, &after.attributes),
        _ => BTreeMap::new(),
    }
}

fn compare_attributes(
    before: &BTreeMap<String, AttributeValue>,
    after: &BTreeMap<String, AttributeValue>,
) -> BTreeMap<String, ValueDiff> {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();

    keys.into_iter()
        .filter_map(|key| {
            let diff = match (before.get(key), after.get(key)) {
                (None, Some(new)) => ValueDiff {
                    before: None,
                    after: Some(new.clone()),
                },
                (Some(old), None) => ValueDiff {
                    before: Some(old.clone()),
                    after: None,
                },
                (Some(old), Some(new)) if !values_equal(old, new) => ValueDiff {
                    before: Some(old.clone()),
                    after: Some(new.clone()),
                },
                _ => return None,
            };
            Some((key.clone(), diff))
        })
        .collect()
}

fn compare_outputs(
    before: &BTreeMap<&str, &Output>,
    after: &BTreeMap<&str, &Output>,
) -> Vec<OutputDiff> {
    let names: BTreeSet<&str> = before.keys().chain(after.keys()).copied().collect();

    names
        .into_iter()
        .filter_map(|name| {
            let (status, value_diff) = match (before.get(name), after.get(name)) {
                (None, Some(_)) => (DiffStatus::Added, ValueDiff::default()),
                (Some(_), None) => (DiffStatus::Removed, ValueDiff::default()),
                (Some(old), Some(new)) if !values_equal(&old.value, &new.value) => (
                    DiffStatus::Changed,
                    ValueDiff {
                        before: Some(old.value.clone()),
                        after: Some(new.value.clone()),
                    },
                ),
                _ => return None,
            };
            Some(OutputDiff {
                output_name: name.to_string(),
                status,
                value_diff,
            })
        })
        .collect()
}

/// Deep structural equality. Numbers compare by value, so `1` equals `1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if x == y {
                return true;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance(attributes: Value) -> ResourceInstance {
        ResourceInstance {
            attributes: serde_json::from_value(attributes).unwrap(),
            ..Default::default()
        }
    }

    fn resource(resource_type: &str, name: &str, attributes: Value) -> Resource {
        Resource {
            mode: "managed".to_string(),
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            provider: "provider[\"registry.terraform.io/hashicorp/aws\"]".to_string(),
            instances: vec![instance(attributes)],
            ..Default::default()
        }
    }

    fn snapshot(resources: Vec<Resource>, outputs: &[(&str, Value)]) -> Snapshot {
        Snapshot {
            version: 4,
            terraform_version: "1.5.0".to_string(),
            serial: 1,
            lineage: "lineage".to_string(),
            resources,
            outputs: outputs
                .iter()
                .map(|(name, value)| {
                    (
                        name.to_string(),
                        Output {
                            value: value.clone(),
                            ..Default::default()
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_compare_requires_both_snapshots() {
        let state = snapshot(vec![], &[]);
        let filter = Filter::allow_all();
        assert!(matches!(
            compare(None, Some(&state), &filter),
            Err(CompareError::InvalidInput(_))
        ));
        assert!(matches!(
            compare(Some(&state), None, &filter),
            Err(CompareError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_changed_attribute() {
        let old = snapshot(
            vec![resource("aws_instance", "web", json!({"id": "i-1", "instance_type": "t2.micro"}))],
            &[],
        );
        let new = snapshot(
            vec![resource("aws_instance", "web", json!({"id": "i-1", "instance_type": "t2.small"}))],
            &[],
        );

        let diff = compare(Some(&old), Some(&new), &Filter::allow_all()).unwrap();
        assert_eq!(diff.resource_diffs.len(), 1);
        let rd = &diff.resource_diffs[0];
        assert_eq!(rd.resource_type, "aws_instance");
        assert_eq!(rd.resource_name, "web");
        assert_eq!(rd.status, DiffStatus::Changed);
        assert_eq!(rd.module, None);
        assert_eq!(rd.attribute_diffs.len(), 1);
        assert_eq!(
            rd.attribute_diffs["instance_type"],
            ValueDiff {
                before: Some(json!("t2.micro")),
                after: Some(json!("t2.small")),
            }
        );
        assert!(diff.output_diffs.is_empty());
    }

    #[test]
    fn test_added_resource_has_no_attribute_diffs() {
        let old = snapshot(vec![], &[]);
        let new = snapshot(vec![resource("aws_s3_bucket", "data", json!({"bucket": "data"}))], &[]);

        let diff = compare(Some(&old), Some(&new), &Filter::allow_all()).unwrap();
        assert_eq!(diff.resource_diffs.len(), 1);
        assert_eq!(diff.resource_diffs[0].status, DiffStatus::Added);
        assert!(diff.resource_diffs[0].attribute_diffs.is_empty());
    }

    #[test]
    fn test_removed_output() {
        let old = snapshot(vec![], &[("vpc_id", json!("vpc-123"))]);
        let new = snapshot(vec![], &[]);

        let diff = compare(Some(&old), Some(&new), &Filter::allow_all()).unwrap();
        assert!(diff.resource_diffs.is_empty());
        assert_eq!(
            diff.output_diffs,
            vec![OutputDiff {
                output_name: "vpc_id".to_string(),
                status: DiffStatus::Removed,
                value_diff: ValueDiff::default(),
            }]
        );
    }

    #[test]
    fn test_changed_output_carries_values() {
        let old = snapshot(vec![], &[("vpc_id", json!("vpc-123456"))]);
        let new = snapshot(vec![], &[("vpc_id", json!("vpc-654321"))]);

        let diff = compare(Some(&old), Some(&new), &Filter::allow_all()).unwrap();
        assert_eq!(diff.output_diffs[0].status, DiffStatus::Changed);
        assert_eq!(diff.output_diffs[0].value_diff.before, Some(json!("vpc-123456")));
        assert_eq!(diff.output_diffs[0].value_diff.after, Some(json!("vpc-654321")));
    }

    #[test]
    fn test_added_and_removed_attributes() {
        let old = snapshot(vec![resource("aws_instance", "web", json!({"id": "i-1", "ami": "ami-1"}))], &[]);
        let new = snapshot(vec![resource("aws_instance", "web", json!({"id": "i-1", "type": "t2.micro"}))], &[]);

        let diff = compare(Some(&old), Some(&new), &Filter::allow_all()).unwrap();
        let attrs = &diff.resource_diffs[0].attribute_diffs;
        assert_eq!(attrs["ami"], ValueDiff { before: Some(json!("ami-1")), after: None });
        assert_eq!(attrs["type"], ValueDiff { before: None, after: Some(json!("t2.micro")) });
        assert!(!attrs.contains_key("id"));
    }

    #[test]
    fn test_nested_values_compared_structurally() {
        let old = snapshot(
            vec![resource("aws_instance", "web", json!({"tags": {"Name": "web", "Env": "prod"}, "ports": [80, 443]}))],
            &[],
        );
        let same = snapshot(
            vec![resource("aws_instance", "web", json!({"tags": {"Env": "prod", "Name": "web"}, "ports": [80, 443]}))],
            &[],
        );
        let reordered = snapshot(
            vec![resource("aws_instance", "web", json!({"tags": {"Env": "prod", "Name": "web"}, "ports": [443, 80]}))],
            &[],
        );

        let filter = Filter::allow_all();
        assert!(!compare(Some(&old), Some(&same), &filter).unwrap().has_changes());

        let diff = compare(Some(&old), Some(&reordered), &filter).unwrap();
        assert_eq!(
            diff.resource_diffs[0].attribute_diffs.keys().collect::<Vec<_>>(),
            vec!["ports"]
        );
    }

    #[test]
    fn test_numbers_compare_by_value() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!([1, {"a": 2}]), &json!([1.0, {"a": 2.0}])));
        assert!(!values_equal(&json!(1), &json!(2)));
        assert!(!values_equal(&json!(1), &json!("1")));
        assert!(!values_equal(&json!(null), &json!(false)));
    }

    #[test]
    fn test_unchanged_resources_are_omitted() {
        let state = snapshot(
            vec![
                resource("aws_instance", "web", json!({"id": "i-1"})),
                resource("aws_vpc", "main", json!({"id": "vpc-1"})),
            ],
            &[("vpc_id", json!("vpc-1"))],
        );

        let diff = compare(Some(&state), Some(&state), &Filter::allow_all()).unwrap();
        assert!(!diff.has_changes());
        assert!(!has_changes(&diff));
    }

    #[test]
    fn test_only_first_instance_is_compared() {
        let mut old = resource("aws_instance", "web", json!({"id": "i-0"}));
        old.instances.push(instance(json!({"id": "i-1"})));
        let mut new = resource("aws_instance", "web", json!({"id": "i-0"}));
        new.instances.push(instance(json!({"id": "i-changed"})));

        let diff = compare(
            Some(&snapshot(vec![old], &[])),
            Some(&snapshot(vec![new], &[])),
            &Filter::allow_all(),
        )
        .unwrap();
        assert!(!diff.has_changes());
    }

    #[test]
    fn test_results_sorted_by_id_and_name() {
        let old = snapshot(vec![], &[]);
        let mut nested = resource("aws_subnet", "public", json!({}));
        nested.module = "module.network".to_string();
        let new = snapshot(
            vec![
                resource("aws_vpc", "main", json!({})),
                nested,
                resource("aws_instance", "web", json!({})),
            ],
            &[("zeta", json!(1)), ("alpha", json!(2))],
        );

        let diff = compare(Some(&old), Some(&new), &Filter::allow_all()).unwrap();
        let ids: Vec<_> = diff
            .resource_diffs
            .iter()
            .map(|rd| format!("{}.{}", rd.resource_type, rd.resource_name))
            .collect();
        assert_eq!(ids, vec!["aws_instance.web", "aws_vpc.main", "aws_subnet.public"]);
        assert_eq!(diff.resource_diffs[2].module.as_deref(), Some("module.network"));

        let names: Vec<_> = diff.output_diffs.iter().map(|od| od.output_name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_filter_applies_to_resources_and_outputs() {
        let old = snapshot(vec![], &[]);
        let new = snapshot(
            vec![
                resource("aws_instance", "web", json!({})),
                resource("aws_s3_bucket", "data", json!({})),
            ],
            &[("vpc_id", json!("vpc-1")), ("bucket", json!("data"))],
        );

        let filter = Filter::default()
            .with_resource_types(["aws_s3_bucket"])
            .with_outputs(["vpc_id"]);
        let diff = compare(Some(&old), Some(&new), &filter).unwrap();
        assert_eq!(diff.resource_diffs.len(), 1);
        assert_eq!(diff.resource_diffs[0].resource_type, "aws_s3_bucket");
        assert_eq!(diff.output_diffs.len(), 1);
        assert_eq!(diff.output_diffs[0].output_name, "vpc_id");

        let block_all = Filter::default()
            .with_resource_types(Vec::<String>::new())
            .with_outputs(Vec::<String>::new());
        assert!(!compare(Some(&old), Some(&new), &block_all).unwrap().has_changes());
    }

    #[test]
    fn test_serialized_shape() {
        let old = snapshot(vec![resource("aws_instance", "web", json!({"instance_type": "t2.micro"}))], &[]);
        let new = snapshot(vec![resource("aws_instance", "web", json!({"instance_type": "t2.small"}))], &[]);
        let diff = compare(Some(&old), Some(&new), &Filter::allow_all()).unwrap();

        assert_eq!(
            serde_json::to_value(&diff).unwrap(),
            json!({
                "resource_diffs": [{
                    "resource_type": "aws_instance",
                    "resource_name": "web",
                    "status": "changed",
                    "attribute_diffs": {
                        "instance_type": {"before": "t2.micro", "after": "t2.small"}
                    }
                }]
            })
        );
    }
}
