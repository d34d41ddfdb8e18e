//! Normalized evidence snapshots.
//!
//! Providers return heterogeneous JSON records. Normalization projects each
//! record down to its identifier plus the properties the query asked for, so
//! evaluators see one uniform shape no matter how the provider nests its data.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::{EvidenceQuery, QuerySignature};

/// Path segment matching every element of an array.
pub const WILDCARD_SEGMENT: &str = "*";

/// One resource as seen by evaluators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Provider resource identifier.
    pub id: String,

    /// Requested property path -> value. Missing or null properties are absent.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl Resource {
    pub fn property(&self, path: &str) -> Option<&Value> {
        self.properties.get(path)
    }
}

/// Immutable result of one evidence query within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSnapshot {
    pub signature: QuerySignature,
    pub resource_type: String,
    pub provider: String,
    pub collected_at: DateTime<Utc>,
    /// Provider calls made to assemble the snapshot (pages, retries included).
    pub provider_calls: u32,
    /// Resources sorted by id.
    pub resources: Vec<Resource>,
}

/// Project raw provider records into a snapshot.
///
/// The id comes from `id`, falling back to `name`. Each property path is
/// resolved against the record first and then against its nested `properties`
/// object (the ARM resource shape). A record with no usable id is rejected,
/// since offending resources could not be reported for it.
pub fn normalize_records(
    query: &EvidenceQuery,
    records: Vec<Value>,
    provider: &str,
    provider_calls: u32,
    collected_at: DateTime<Utc>,
) -> Result<EvidenceSnapshot, String> {
    let mut resources = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        let id = record_id(record)
            .ok_or_else(|| format!("record #{} of {} has no id", index, query.resource_type))?;

        let mut properties = BTreeMap::new();
        for path in query.property_set() {
            if let Some(value) = resolve(record, path) {
                properties.insert(path.to_string(), value);
            }
        }

        resources.push(Resource { id, properties });
    }

    resources.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(EvidenceSnapshot {
        signature: query.signature(),
        resource_type: query.resource_type.clone(),
        provider: provider.to_string(),
        collected_at,
        provider_calls,
        resources,
    })
}

fn record_id(record: &Value) -> Option<String> {
    ["id", "name"]
        .iter()
        .filter_map(|key| record.get(*key))
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
        .map(String::from)
}

fn resolve(record: &Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    walk(record, &segments)
        .or_else(|| {
            record
                .get("properties")
                .and_then(|nested| walk(nested, &segments))
        })
        .filter(|v| !v.is_null())
}

/// Dotted path walk. Numeric segments index into arrays
/// (`permissions.0.actions`); a `*` segment visits every element and yields
/// the matched values as one array, with array results flattened one level
/// (`permissions.*.actions` is every action of every permission block).
fn walk(value: &Value, segments: &[&str]) -> Option<Value> {
    let Some((segment, rest)) = segments.split_first() else {
        return Some(value.clone());
    };

    match value {
        Value::Array(items) if *segment == WILDCARD_SEGMENT => {
            let mut matched = Vec::new();
            for item in items {
                match walk(item, rest) {
                    Some(Value::Array(values)) if !rest.is_empty() => matched.extend(values),
                    Some(Value::Null) | None => {}
                    Some(v) => matched.push(v),
                }
            }
            Some(Value::Array(matched))
        }
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .and_then(|item| walk(item, rest)),
        _ => value.get(*segment).and_then(|next| walk(next, rest)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query() -> EvidenceQuery {
        EvidenceQuery::new(
            "Microsoft.Storage/storageAccounts",
            ["minimumTlsVersion", "networkAcls.defaultAction"],
        )
    }

    #[test]
    fn test_flat_and_arm_shapes_normalize_alike() {
        let records = vec![
            json!({"id": "sa-flat", "minimumTlsVersion": "TLS1_2", "networkAcls": {"defaultAction": "Deny"}}),
            json!({"id": "sa-arm", "properties": {"minimumTlsVersion": "TLS1_2", "networkAcls": {"defaultAction": "Deny"}}}),
        ];
        let snap = normalize_records(&query(), records, "fixture", 1, Utc::now()).unwrap();

        assert_eq!(snap.resources.len(), 2);
        assert_eq!(snap.resources[0].properties, snap.resources[1].properties);
        assert_eq!(
            snap.resources[0].property("networkAcls.defaultAction"),
            Some(&json!("Deny"))
        );
    }

    #[test]
    fn test_missing_and_null_properties_are_absent() {
        let records = vec![json!({"id": "sa1", "minimumTlsVersion": null})];
        let snap = normalize_records(&query(), records, "fixture", 1, Utc::now()).unwrap();
        assert!(snap.resources[0].properties.is_empty());
    }

    #[test]
    fn test_resources_sorted_by_id() {
        let records = vec![json!({"id": "c"}), json!({"id": "a"}), json!({"name": "b"})];
        let snap = normalize_records(&query(), records, "fixture", 1, Utc::now()).unwrap();
        let ids: Vec<&str> = snap.resources.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_numeric_segment_indexes_arrays() {
        let query = EvidenceQuery::new(
            "Microsoft.Authorization/roleDefinitions",
            ["permissions.0.actions", "permissions.5.actions"],
        );
        let records = vec![json!({
            "name": "custom-owner",
            "properties": {"permissions": [{"actions": ["*"]}]}
        })];
        let snap = normalize_records(&query, records, "fixture", 1, Utc::now()).unwrap();
        let props = &snap.resources[0].properties;
        assert_eq!(props.get("permissions.0.actions"), Some(&json!(["*"])));
        assert!(!props.contains_key("permissions.5.actions"));
    }

    #[test]
    fn test_wildcard_segment_collects_every_element() {
        let query = EvidenceQuery::new(
            "Microsoft.Authorization/roleDefinitions",
            ["permissions.*.actions", "permissions.*.condition", "tags.*"],
        );
        let records = vec![json!({
            "name": "custom-contributor",
            "tags": {"owner": "ops"},
            "properties": {"permissions": [
                {"actions": ["Microsoft.Compute/*/read"]},
                {"actions": ["*"], "condition": null},
                {"notActions": ["Microsoft.Authorization/*/write"]}
            ]}
        })];
        let snap = normalize_records(&query, records, "fixture", 1, Utc::now()).unwrap();
        let props = &snap.resources[0].properties;

        assert_eq!(
            props.get("permissions.*.actions"),
            Some(&json!(["Microsoft.Compute/*/read", "*"]))
        );
        // No block carries a non-null condition.
        assert_eq!(props.get("permissions.*.condition"), Some(&json!([])));
        // Wildcards only expand arrays.
        assert!(!props.contains_key("tags.*"));
    }

    #[test]
    fn test_record_without_id_rejected() {
        let records = vec![json!({"minimumTlsVersion": "TLS1_2"})];
        let err = normalize_records(&query(), records, "fixture", 1, Utc::now()).unwrap_err();
        assert!(err.contains("no id"));
    }
}
