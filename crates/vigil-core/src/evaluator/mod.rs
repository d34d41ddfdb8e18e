//! Check evaluation.
//!
//! [`evaluate`] is a pure function of the control, the evidence it reads and
//! the run context. Manual, script and excluded controls return without
//! touching the evidence source. Predicate rules run in declaration order and
//! request their evidence lazily, one rule at a time; the cancel token is
//! checked before every request.

mod truth;

pub use truth::Truth;

use std::collections::BTreeSet;

use vigil_evidence::{EvidenceSource, QuerySignature, Resource};
use vigil_registry::{CheckSpec, EmptyOutcome, Expectation, PredicateRule, RegisteredControl};

use crate::cancel::CancelToken;
use crate::context::RunContext;
use crate::error::EvaluationError;
use crate::verdict::{Evaluation, Verdict};

/// Result of a single predicate rule.
#[derive(Debug, PartialEq, Eq)]
enum RuleOutcome {
    Pass { judged: usize },
    Fail { offenders: Vec<String>, detail: String },
    NotApplicable,
}

/// Evaluate one control.
///
/// Unavailable evidence becomes an `Error` verdict. The only `Err` returned is
/// [`EvaluationError::Cancelled`], which callers report as not evaluated.
pub async fn evaluate(
    control: &RegisteredControl,
    source: &dyn EvidenceSource,
    ctx: &RunContext,
    cancel: &CancelToken,
) -> Result<Evaluation, EvaluationError> {
    if ctx.is_control_excluded(control.id()) {
        return Ok(Evaluation::new(
            Verdict::not_applicable("excluded by run context"),
            "control excluded by run context",
        ));
    }

    let rules = match &control.control.check {
        CheckSpec::Manual { reason } => {
            let detail = reason
                .clone()
                .unwrap_or_else(|| "no automated check defined".to_string());
            return Ok(Evaluation::new(Verdict::ManualReviewRequired, detail));
        }
        CheckSpec::Script { language, .. } => {
            return Ok(Evaluation::new(
                Verdict::ManualReviewRequired,
                format!("embedded {} script is not executed; review manually", language),
            ));
        }
        CheckSpec::Predicate { rules } => rules,
    };

    let mut evidence: Vec<QuerySignature> = Vec::with_capacity(rules.len());
    match evaluate_rules(rules, source, ctx, cancel, &mut evidence).await {
        Ok(evaluation) => Ok(evaluation.with_evidence(evidence)),
        Err(EvaluationError::Cancelled) => Err(EvaluationError::Cancelled),
        Err(err) => Ok(Evaluation::from_error(&err, evidence)),
    }
}

async fn evaluate_rules(
    rules: &[PredicateRule],
    source: &dyn EvidenceSource,
    ctx: &RunContext,
    cancel: &CancelToken,
    evidence: &mut Vec<QuerySignature>,
) -> Result<Evaluation, EvaluationError> {
    let mut offenders: BTreeSet<String> = BTreeSet::new();
    let mut details = Vec::new();
    let mut failed = false;
    let mut judged = 0usize;
    let mut applicable_rules = 0usize;

    for (index, rule) in rules.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(EvaluationError::Cancelled);
        }

        evidence.push(rule.query.signature());
        let snapshot = source.collect(&rule.query).await?;

        let resources: Vec<&Resource> = snapshot
            .resources
            .iter()
            .filter(|r| !ctx.is_resource_excluded(&r.id))
            .collect();

        match evaluate_rule(rule, &resources) {
            RuleOutcome::Pass { judged: n } => {
                applicable_rules += 1;
                judged += n;
            }
            RuleOutcome::Fail {
                offenders: rule_offenders,
                detail,
            } => {
                applicable_rules += 1;
                failed = true;
                offenders.extend(rule_offenders);
                details.push(if rules.len() > 1 {
                    format!("rule {}: {}", index, detail)
                } else {
                    detail
                });
            }
            RuleOutcome::NotApplicable => {}
        }
    }

    if failed {
        return Ok(Evaluation::new(Verdict::fail(offenders), details.join("; ")));
    }
    if applicable_rules == 0 {
        return Ok(Evaluation::new(
            Verdict::not_applicable("no resources in scope"),
            "no resources in scope for any rule",
        ));
    }
    Ok(Evaluation::new(
        Verdict::Pass,
        format!("{} resource(s) compliant", judged),
    ))
}

fn evaluate_rule(rule: &PredicateRule, resources: &[&Resource]) -> RuleOutcome {
    // Resources whose applicability is unknown stay in scope.
    let in_scope: Vec<&Resource> = resources
        .iter()
        .copied()
        .filter(|r| {
            rule.when
                .as_ref()
                .map_or(true, |when| truth::eval(when, r) != Truth::False)
        })
        .collect();

    if in_scope.is_empty() {
        return match rule.empty_outcome() {
            EmptyOutcome::Pass => RuleOutcome::Pass { judged: 0 },
            EmptyOutcome::NotApplicable => RuleOutcome::NotApplicable,
            EmptyOutcome::Fail => RuleOutcome::Fail {
                offenders: Vec::new(),
                detail: format!("no {} resources found", rule.query.resource_type),
            },
        };
    }

    let results: Vec<(&Resource, Truth)> = in_scope
        .iter()
        .map(|r| (*r, truth::eval(&rule.condition, r)))
        .collect();
    let total = results.len();

    match rule.expect {
        Expectation::All | Expectation::None => {
            // Unknown is never evidence of compliance.
            let offending_truth = if rule.expect == Expectation::All {
                Truth::False
            } else {
                Truth::True
            };
            let offenders: Vec<String> = results
                .iter()
                .filter(|(_, t)| *t == offending_truth || *t == Truth::Unknown)
                .map(|(r, _)| r.id.clone())
                .collect();

            if offenders.is_empty() {
                RuleOutcome::Pass { judged: total }
            } else {
                let unknown = results.iter().filter(|(_, t)| *t == Truth::Unknown).count();
                let mut detail = format!(
                    "{} of {} {} resource(s) offending",
                    offenders.len(),
                    total,
                    rule.query.resource_type
                );
                if unknown > 0 {
                    detail.push_str(&format!(" ({} with missing or incomparable data)", unknown));
                }
                RuleOutcome::Fail { offenders, detail }
            }
        }
        Expectation::Any => {
            if results.iter().any(|(_, t)| *t == Truth::True) {
                RuleOutcome::Pass { judged: total }
            } else {
                RuleOutcome::Fail {
                    offenders: results.iter().map(|(r, _)| r.id.clone()).collect(),
                    detail: format!(
                        "none of {} {} resource(s) satisfy the condition",
                        total, rule.query.resource_type
                    ),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    fn rule(yaml: &str) -> PredicateRule {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn resource(id: &str, props: Value) -> Resource {
        let properties: BTreeMap<String, Value> = serde_json::from_value(props).unwrap();
        Resource {
            id: id.into(),
            properties,
        }
    }

    #[test]
    fn test_all_mode_lists_false_and_unknown() {
        let r = rule(
            "query: {resource_type: sa, properties: [tls]}\ncondition: {property: tls, op: equals, value: TLS1_2}",
        );
        let a = resource("a", json!({"tls": "TLS1_2"}));
        let b = resource("b", json!({"tls": "TLS1_0"}));
        let c = resource("c", json!({}));
        match evaluate_rule(&r, &[&a, &b, &c]) {
            RuleOutcome::Fail { offenders, detail } => {
                assert_eq!(offenders, vec!["b", "c"]);
                assert!(detail.contains("1 with missing"));
            }
            other => panic!("expected fail, got {:?}", other),
        }
    }

    #[test]
    fn test_none_mode_with_when_filter() {
        let r = rule(
            r#"
query: {resource_type: roles, properties: [roleType, actions]}
expect: none
when: {property: roleType, op: equals, value: CustomRole}
condition: {property: actions, op: contains, value: "*"}
"#,
        );
        let builtin = resource("owner", json!({"roleType": "BuiltInRole", "actions": ["*"]}));
        let custom = resource("ops", json!({"roleType": "CustomRole", "actions": ["read"]}));
        assert_eq!(
            evaluate_rule(&r, &[&builtin, &custom]),
            RuleOutcome::Pass { judged: 1 }
        );

        let admin = resource("admin", json!({"roleType": "CustomRole", "actions": ["*"]}));
        assert!(matches!(
            evaluate_rule(&r, &[&builtin, &admin]),
            RuleOutcome::Fail { ref offenders, .. } if offenders == &["admin"]
        ));
    }

    #[test]
    fn test_empty_outcomes() {
        let all = rule("query: {resource_type: sa, properties: [x]}\ncondition: {property: x, op: exists}");
        assert_eq!(evaluate_rule(&all, &[]), RuleOutcome::Pass { judged: 0 });

        let any = rule(
            "query: {resource_type: diag, properties: [x]}\nexpect: any\ncondition: {property: x, op: exists}",
        );
        assert!(matches!(evaluate_rule(&any, &[]), RuleOutcome::Fail { .. }));

        let na = rule(
            "query: {resource_type: sa, properties: [x]}\non_empty: not_applicable\ncondition: {property: x, op: exists}",
        );
        assert_eq!(evaluate_rule(&na, &[]), RuleOutcome::NotApplicable);
    }

    struct Untouchable;

    #[async_trait::async_trait]
    impl EvidenceSource for Untouchable {
        async fn collect(
            &self,
            _query: &vigil_evidence::EvidenceQuery,
        ) -> Result<std::sync::Arc<vigil_evidence::EvidenceSnapshot>, vigil_evidence::EvidenceUnavailable>
        {
            panic!("evidence must not be requested");
        }
    }

    fn registered(yaml: &str) -> RegisteredControl {
        let registry = vigil_registry::Registry::load(
            &[vigil_registry::ControlSource::yaml("t", yaml)],
            vigil_registry::DuplicatePolicy::Reject,
        )
        .unwrap();
        registry.list()[0].clone()
    }

    #[tokio::test]
    async fn test_manual_script_and_excluded_skip_evidence() {
        let manual = registered("id: '1'\ntitle: m\nseverity: low\ncheck: { type: manual, reason: portal only }\n");
        let script = registered(
            "id: '2'\ntitle: s\nseverity: low\ncheck: { type: script, language: powershell, body: Get-AzContext }\n",
        );
        let predicate = registered(
            "id: '3'\ntitle: p\nseverity: low\ncheck:\n  type: predicate\n  rules:\n    - query: {resource_type: sa, properties: [x]}\n      condition: {property: x, op: exists}\n",
        );
        let ctx = RunContext::new("sub").exclude_control("3");
        let cancel = CancelToken::never();

        let eval = evaluate(&manual, &Untouchable, &ctx, &cancel).await.unwrap();
        assert_eq!(eval.verdict, Verdict::ManualReviewRequired);
        assert_eq!(eval.detail, "portal only");

        let eval = evaluate(&script, &Untouchable, &ctx, &cancel).await.unwrap();
        assert_eq!(eval.verdict, Verdict::ManualReviewRequired);
        assert!(eval.detail.contains("powershell"));

        let eval = evaluate(&predicate, &Untouchable, &ctx, &cancel).await.unwrap();
        assert_eq!(eval.verdict.kind(), crate::verdict::VerdictKind::NotApplicable);
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch() {
        let predicate = registered(
            "id: '3'\ntitle: p\nseverity: low\ncheck:\n  type: predicate\n  rules:\n    - query: {resource_type: sa, properties: [x]}\n      condition: {property: x, op: exists}\n",
        );
        let source = crate::cancel::CancelSource::new();
        source.cancel();

        let err = evaluate(&predicate, &Untouchable, &RunContext::new("sub"), &source.token())
            .await
            .unwrap_err();
        assert_eq!(err, EvaluationError::Cancelled);
    }

    #[test]
    fn test_any_mode() {
        let r = rule(
            "query: {resource_type: diag, properties: [ws]}\nexpect: any\ncondition: {property: ws, op: exists}",
        );
        let with = resource("d1", json!({"ws": "law-1"}));
        let without = resource("d2", json!({}));
        assert_eq!(
            evaluate_rule(&r, &[&with, &without]),
            RuleOutcome::Pass { judged: 2 }
        );
        assert!(matches!(
            evaluate_rule(&r, &[&without]),
            RuleOutcome::Fail { .. }
        ));
    }
}
