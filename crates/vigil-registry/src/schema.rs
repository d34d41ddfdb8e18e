//! Control schema types.
//!
//! [`ControlRecord`] mirrors the on-disk shape with every field optional so
//! that a missing field produces a precise error instead of a serde message.
//! [`Control`] is the validated, immutable form the engine works with.

use serde::{Deserialize, Deserializer, Serialize};
use vigil_evidence::EvidenceQuery;

use crate::condition::Condition;
use crate::error::RegistryError;
use crate::loader::ControlOrigin;

/// Control severity. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "info")]
    Informational,
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Informational => "informational",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "informational" | "info" => Ok(Severity::Informational),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(format!(
                "unknown severity '{}' (expected informational, low, medium or high)",
                other
            )),
        }
    }
}

/// How a control is checked (tagged union on `type`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum CheckSpec {
    /// No automated check exists; a human must review.
    Manual {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Structured predicate over collected evidence.
    Predicate { rules: Vec<PredicateRule> },

    /// Embedded provider script carried for reference; never executed.
    Script { language: String, body: String },
}

impl CheckSpec {
    pub fn type_name(&self) -> &'static str {
        match self {
            CheckSpec::Manual { .. } => "manual",
            CheckSpec::Predicate { .. } => "predicate",
            CheckSpec::Script { .. } => "script",
        }
    }

    /// Evidence queries the check declares, in rule order.
    pub fn queries(&self) -> Vec<&EvidenceQuery> {
        match self {
            CheckSpec::Predicate { rules } => rules.iter().map(|r| &r.query).collect(),
            _ => Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            CheckSpec::Manual { .. } => Ok(()),
            CheckSpec::Predicate { rules } => {
                if rules.is_empty() {
                    return Err("predicate check requires at least one rule".to_string());
                }
                rules
                    .iter()
                    .enumerate()
                    .try_for_each(|(i, rule)| rule.validate().map_err(|e| format!("rule {}: {}", i, e)))
            }
            CheckSpec::Script { language, body } => {
                if language.trim().is_empty() || body.trim().is_empty() {
                    return Err("script check requires language and body".to_string());
                }
                Ok(())
            }
        }
    }
}

/// What must hold across the resources a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expectation {
    /// Every resource satisfies the condition.
    #[default]
    All,
    /// No resource satisfies the condition.
    None,
    /// At least one resource satisfies the condition.
    Any,
}

/// Outcome when a rule has no resources to judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyOutcome {
    Pass,
    Fail,
    NotApplicable,
}

/// One evidence query plus the condition applied to its resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PredicateRule {
    pub query: EvidenceQuery,

    #[serde(default)]
    pub expect: Expectation,

    pub condition: Condition,

    /// Applicability filter; resources failing it are out of scope for the rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_empty: Option<EmptyOutcome>,
}

impl PredicateRule {
    pub fn validate(&self) -> Result<(), String> {
        if self.query.resource_type.trim().is_empty() {
            return Err("query.resource_type cannot be empty".to_string());
        }
        if self.query.properties.iter().any(|p| p.trim().is_empty()) {
            return Err("query.properties cannot contain empty names".to_string());
        }
        self.condition.validate(&self.query)?;
        if let Some(when) = &self.when {
            when.validate(&self.query)
                .map_err(|e| format!("when: {}", e))?;
        }
        Ok(())
    }

    /// Effective outcome for an empty resource set.
    pub fn empty_outcome(&self) -> EmptyOutcome {
        self.on_empty.unwrap_or(match self.expect {
            Expectation::All | Expectation::None => EmptyOutcome::Pass,
            Expectation::Any => EmptyOutcome::Fail,
        })
    }
}

/// Raw control record as parsed from a source file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default, alias = "categories", deserialize_with = "one_or_many")]
    pub category: Vec<String>,
    #[serde(default)]
    pub check: Option<CheckSpec>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub remediation: Option<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Validated, immutable control definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Control {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub categories: Vec<String>,
    pub check: CheckSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl Control {
    pub fn is_manual(&self) -> bool {
        matches!(self.check, CheckSpec::Manual { .. })
    }
}

impl ControlRecord {
    /// Validate required fields and check structure.
    pub fn into_control(self, origin: &ControlOrigin) -> Result<Control, RegistryError> {
        let id = required(self.id, "id", origin)?;
        let title = required(self.title, "title", origin)?;
        let severity = self.severity.ok_or_else(|| RegistryError::MissingField {
            origin: origin.clone(),
            field: "severity",
        })?;
        let check = self.check.ok_or_else(|| RegistryError::MissingField {
            origin: origin.clone(),
            field: "check",
        })?;

        check.validate().map_err(|reason| RegistryError::InvalidCheck {
            id: id.clone(),
            origin: origin.clone(),
            reason,
        })?;

        let mut categories: Vec<String> = self
            .category
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        categories.sort();
        categories.dedup();

        Ok(Control {
            id,
            title,
            severity,
            categories,
            check,
            description: self.description,
            rationale: self.rationale,
            remediation: self.remediation,
        })
    }
}

fn required(
    value: Option<String>,
    field: &'static str,
    origin: &ControlOrigin,
) -> Result<String, RegistryError> {
    let value = value.ok_or_else(|| RegistryError::MissingField {
        origin: origin.clone(),
        field,
    })?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::EmptyField {
            origin: origin.clone(),
            field,
        });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> ControlOrigin {
        ControlOrigin::new("test.yaml", None)
    }

    fn parse(yaml: &str) -> ControlRecord {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Informational < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert_eq!("INFO".parse::<Severity>(), Ok(Severity::Informational));
        assert!("critical".parse::<Severity>().is_err());
    }

    #[test]
    fn test_manual_control() {
        let control = parse(
            r#"
id: "2.1.11"
title: Ensure that Microsoft Defender recommendation for 'Apply system updates' is enabled
severity: medium
category: defender
check: { type: manual }
"#,
        )
        .into_control(&origin())
        .unwrap();

        assert!(control.is_manual());
        assert_eq!(control.categories, vec!["defender"]);
    }

    #[test]
    fn test_missing_severity() {
        let err = parse("id: '1'\ntitle: t\ncheck: { type: manual }\n")
            .into_control(&origin())
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::MissingField {
                field: "severity",
                ..
            }
        ));
    }

    #[test]
    fn test_empty_title() {
        let err = parse("id: '1'\ntitle: '  '\nseverity: low\ncheck: { type: manual }\n")
            .into_control(&origin())
            .unwrap_err();
        assert!(matches!(err, RegistryError::EmptyField { field: "title", .. }));
    }

    #[test]
    fn test_missing_check_marker() {
        let err = parse("id: '1'\ntitle: t\nseverity: low\n")
            .into_control(&origin())
            .unwrap_err();
        assert!(matches!(err, RegistryError::MissingField { field: "check", .. }));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<ControlRecord, _> =
            serde_yaml::from_str("id: '1'\ntitle: t\nseverity: low\nsevrity: high\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_predicate_defaults() {
        let control = parse(
            r#"
id: "3.15"
title: Ensure the Minimum TLS version for storage accounts is set to Version 1.2
severity: high
categories: [storage, tls]
check:
  type: predicate
  rules:
    - query:
        resource_type: Microsoft.Storage/storageAccounts
        properties: [minimumTlsVersion]
      condition: { property: minimumTlsVersion, op: equals, value: TLS1_2 }
"#,
        )
        .into_control(&origin())
        .unwrap();

        match &control.check {
            CheckSpec::Predicate { rules } => {
                assert_eq!(rules[0].expect, Expectation::All);
                assert_eq!(rules[0].empty_outcome(), EmptyOutcome::Pass);
            }
            other => panic!("expected predicate, got {:?}", other),
        }
        assert_eq!(control.check.queries().len(), 1);
    }

    #[test]
    fn test_predicate_without_rules_invalid() {
        let err = parse("id: '1'\ntitle: t\nseverity: low\ncheck: { type: predicate, rules: [] }\n")
            .into_control(&origin())
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidCheck { .. }));
    }

    #[test]
    fn test_any_defaults_to_fail_on_empty() {
        let rule: PredicateRule = serde_yaml::from_str(
            r#"
query: { resource_type: t, properties: [enabled] }
expect: any
condition: { property: enabled, op: equals, value: true }
"#,
        )
        .unwrap();
        assert_eq!(rule.empty_outcome(), EmptyOutcome::Fail);
    }

    #[test]
    fn test_script_requires_body() {
        let err = parse(
            "id: '1'\ntitle: t\nseverity: low\ncheck: { type: script, language: powershell, body: '' }\n",
        )
        .into_control(&origin())
        .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidCheck { .. }));
    }
}
