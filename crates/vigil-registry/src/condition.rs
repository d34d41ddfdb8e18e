//! Condition trees over queried resource properties.
//!
//! YAML forms:
//!
//! ```yaml
//! condition: { property: minimumTlsVersion, op: equals, value: TLS1_2 }
//! condition:
//!   all:
//!     - { property: enableHttpsTrafficOnly, op: equals, value: true }
//!     - not: { property: allowBlobPublicAccess, op: equals, value: true }
//! ```
//!
//! A `*` path segment spans every element of an array, so
//! `permissions.*.actions` is the flattened list of all actions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vigil_evidence::{EvidenceQuery, WILDCARD_SEGMENT};

/// Boolean combination of property comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, from = "ConditionRepr")]
pub enum Condition {
    All { all: Vec<Condition> },
    Any { any: Vec<Condition> },
    Not { not: Box<Condition> },
    Compare(Comparison),
}

/// Wire form; each combinator rejects keys it does not know.
#[derive(Deserialize)]
#[serde(untagged)]
enum ConditionRepr {
    All(AllOf),
    Any(AnyOf),
    Not(NotOf),
    Compare(Comparison),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AllOf {
    all: Vec<Condition>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AnyOf {
    any: Vec<Condition>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NotOf {
    not: Box<Condition>,
}

impl From<ConditionRepr> for Condition {
    fn from(repr: ConditionRepr) -> Self {
        match repr {
            ConditionRepr::All(AllOf { all }) => Condition::All { all },
            ConditionRepr::Any(AnyOf { any }) => Condition::Any { any },
            ConditionRepr::Not(NotOf { not }) => Condition::Not { not },
            ConditionRepr::Compare(cmp) => Condition::Compare(cmp),
        }
    }
}

/// Leaf comparison of one property against an expected value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Comparison {
    /// Property path; must be declared by the rule's query.
    pub property: String,
    pub op: Comparator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Equals,
    NotEquals,
    /// Membership in an expected array.
    In,
    NotIn,
    /// String containment, or array element membership.
    Contains,
    NotContains,
    Exists,
    NotExists,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
}

impl Comparator {
    pub fn needs_value(self) -> bool {
        !matches!(self, Self::Exists | Self::NotExists)
    }

    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            Self::GreaterThan | Self::GreaterOrEqual | Self::LessThan | Self::LessOrEqual
        )
    }
}

impl Condition {
    /// Check structure and that every property is projected by `query`.
    pub fn validate(&self, query: &EvidenceQuery) -> Result<(), String> {
        match self {
            Condition::All { all } => {
                if all.is_empty() {
                    return Err("'all' must list at least one condition".to_string());
                }
                all.iter().try_for_each(|c| c.validate(query))
            }
            Condition::Any { any } => {
                if any.is_empty() {
                    return Err("'any' must list at least one condition".to_string());
                }
                any.iter().try_for_each(|c| c.validate(query))
            }
            Condition::Not { not } => not.validate(query),
            Condition::Compare(cmp) => cmp.validate(query),
        }
    }

    /// Properties referenced anywhere in the tree, in visit order.
    pub fn properties(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_properties(&mut out);
        out
    }

    fn collect_properties<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::All { all: items } | Condition::Any { any: items } => {
                for item in items {
                    item.collect_properties(out);
                }
            }
            Condition::Not { not } => not.collect_properties(out),
            Condition::Compare(cmp) => out.push(&cmp.property),
        }
    }
}

impl Comparison {
    fn validate(&self, query: &EvidenceQuery) -> Result<(), String> {
        if self.property.is_empty() {
            return Err("comparison property cannot be empty".to_string());
        }
        validate_path(&self.property)?;
        if !query.declares(&self.property) {
            return Err(format!(
                "property '{}' is not declared by the query on {}",
                self.property, query.resource_type
            ));
        }

        match (&self.value, self.op.needs_value()) {
            (None, true) => {
                return Err(format!("'{}' requires a value", op_name(self.op)));
            }
            (Some(_), false) => {
                return Err(format!("'{}' takes no value", op_name(self.op)));
            }
            _ => {}
        }

        if matches!(self.op, Comparator::In | Comparator::NotIn)
            && !matches!(self.value, Some(Value::Array(_)))
        {
            return Err(format!("'{}' value must be a list", op_name(self.op)));
        }

        if self.op.is_ordering()
            && !matches!(self.value, Some(Value::Number(_)) | Some(Value::String(_)))
        {
            return Err(format!(
                "'{}' value must be a number or string",
                op_name(self.op)
            ));
        }

        Ok(())
    }
}

fn validate_path(path: &str) -> Result<(), String> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(format!("property path '{}' has an empty segment", path));
    }
    if segments.first() == Some(&WILDCARD_SEGMENT) {
        return Err(format!(
            "property path '{}' cannot start with '{}'",
            path, WILDCARD_SEGMENT
        ));
    }
    if let Some(bad) = segments
        .iter()
        .find(|s| **s != WILDCARD_SEGMENT && s.contains('*'))
    {
        return Err(format!(
            "property path '{}': '{}' must be a whole segment, found '{}'",
            path, WILDCARD_SEGMENT, bad
        ));
    }
    Ok(())
}

fn op_name(op: Comparator) -> String {
    serde_json::to_value(op)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| format!("{:?}", op))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query() -> EvidenceQuery {
        EvidenceQuery::new("t", ["minimumTlsVersion", "allowBlobPublicAccess"])
    }

    #[test]
    fn test_parse_leaf_and_combinators() {
        let yaml = r#"
all:
  - { property: minimumTlsVersion, op: equals, value: TLS1_2 }
  - not: { property: allowBlobPublicAccess, op: equals, value: true }
"#;
        let cond: Condition = serde_yaml::from_str(yaml).unwrap();
        match &cond {
            Condition::All { all } => {
                assert_eq!(all.len(), 2);
                assert!(matches!(all[1], Condition::Not { .. }));
            }
            other => panic!("expected all, got {:?}", other),
        }
        assert!(cond.validate(&query()).is_ok());
        assert_eq!(
            cond.properties(),
            vec!["minimumTlsVersion", "allowBlobPublicAccess"]
        );
    }

    #[test]
    fn test_undeclared_property_rejected() {
        let cond = Condition::Compare(Comparison {
            property: "supportsHttpsTrafficOnly".into(),
            op: Comparator::Equals,
            value: Some(json!(true)),
        });
        let err = cond.validate(&query()).unwrap_err();
        assert!(err.contains("not declared"));
    }

    #[test]
    fn test_value_rules() {
        let missing = Condition::Compare(Comparison {
            property: "minimumTlsVersion".into(),
            op: Comparator::Equals,
            value: None,
        });
        assert!(missing.validate(&query()).unwrap_err().contains("requires a value"));

        let not_list = Condition::Compare(Comparison {
            property: "minimumTlsVersion".into(),
            op: Comparator::In,
            value: Some(json!("TLS1_2")),
        });
        assert!(not_list.validate(&query()).unwrap_err().contains("must be a list"));

        let exists_with_value = Condition::Compare(Comparison {
            property: "minimumTlsVersion".into(),
            op: Comparator::Exists,
            value: Some(json!(true)),
        });
        assert!(exists_with_value
            .validate(&query())
            .unwrap_err()
            .contains("takes no value"));
    }

    #[test]
    fn test_wildcard_paths() {
        let query = EvidenceQuery::new(
            "roles",
            ["permissions.*.actions", "*.actions", "permissions..actions", "permissions.a*"],
        );
        let cmp = |property: &str| {
            Condition::Compare(Comparison {
                property: property.into(),
                op: Comparator::Contains,
                value: Some(json!("*")),
            })
        };

        assert!(cmp("permissions.*.actions").validate(&query).is_ok());
        assert!(cmp("*.actions")
            .validate(&query)
            .unwrap_err()
            .contains("cannot start with"));
        assert!(cmp("permissions..actions")
            .validate(&query)
            .unwrap_err()
            .contains("empty segment"));
        assert!(cmp("permissions.a*")
            .validate(&query)
            .unwrap_err()
            .contains("whole segment"));
    }

    #[test]
    fn test_combinators_reject_unknown_keys() {
        let yaml = r#"
all:
  - { property: minimumTlsVersion, op: exists }
propery: minimumTlsVersion
"#;
        assert!(serde_yaml::from_str::<Condition>(yaml).is_err());

        let yaml = "not: { property: minimumTlsVersion, op: exists }\nextra: 1\n";
        assert!(serde_yaml::from_str::<Condition>(yaml).is_err());

        let yaml = "any:\n  - { property: minimumTlsVersion, op: exists }\n";
        assert!(matches!(
            serde_yaml::from_str::<Condition>(yaml).unwrap(),
            Condition::Any { .. }
        ));
    }

    #[test]
    fn test_empty_combinator_rejected() {
        let cond = Condition::Any { any: vec![] };
        assert!(cond.validate(&query()).is_err());
    }
}
