//! Verdicts and evaluation results.

use std::fmt;

use serde::{Deserialize, Serialize};
use vigil_evidence::QuerySignature;

use crate::error::EvaluationError;

/// Outcome of evaluating one control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail {
        /// Sorted, deduplicated resource ids.
        offending_resources: Vec<String>,
    },
    Error {
        reason: String,
    },
    ManualReviewRequired,
    NotApplicable {
        reason: String,
    },
}

/// Verdict discriminant, used for counting and diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    Pass,
    Fail,
    Error,
    ManualReviewRequired,
    NotApplicable,
}

impl VerdictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictKind::Pass => "pass",
            VerdictKind::Fail => "fail",
            VerdictKind::Error => "error",
            VerdictKind::ManualReviewRequired => "manual_review_required",
            VerdictKind::NotApplicable => "not_applicable",
        }
    }
}

impl fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Verdict {
    pub fn kind(&self) -> VerdictKind {
        match self {
            Verdict::Pass => VerdictKind::Pass,
            Verdict::Fail { .. } => VerdictKind::Fail,
            Verdict::Error { .. } => VerdictKind::Error,
            Verdict::ManualReviewRequired => VerdictKind::ManualReviewRequired,
            Verdict::NotApplicable { .. } => VerdictKind::NotApplicable,
        }
    }

    /// Build a `Fail`, normalizing the offender list.
    pub fn fail(offending: impl IntoIterator<Item = String>) -> Self {
        let mut offending_resources: Vec<String> = offending.into_iter().collect();
        offending_resources.sort();
        offending_resources.dedup();
        Verdict::Fail {
            offending_resources,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Verdict::Error {
            reason: reason.into(),
        }
    }

    pub fn not_applicable(reason: impl Into<String>) -> Self {
        Verdict::NotApplicable {
            reason: reason.into(),
        }
    }

    pub fn offending_resources(&self) -> &[String] {
        match self {
            Verdict::Fail {
                offending_resources,
            } => offending_resources,
            _ => &[],
        }
    }
}

/// A verdict with its diagnostic detail and the evidence it was based on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(flatten)]
    pub verdict: Verdict,
    pub detail: String,
    /// Signatures of the snapshots requested, in request order.
    #[serde(default)]
    pub evidence: Vec<QuerySignature>,
}

impl Evaluation {
    pub fn new(verdict: Verdict, detail: impl Into<String>) -> Self {
        Self {
            verdict,
            detail: detail.into(),
            evidence: Vec::new(),
        }
    }

    pub fn with_evidence(mut self, evidence: Vec<QuerySignature>) -> Self {
        self.evidence = evidence;
        self
    }

    /// `Error` verdict for a failed evaluation.
    pub fn from_error(error: &EvaluationError, evidence: Vec<QuerySignature>) -> Self {
        Self::new(Verdict::error(error.to_string()), error.to_string()).with_evidence(evidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_normalizes_offenders() {
        let verdict = Verdict::fail(vec!["sa-b".to_string(), "sa-a".into(), "sa-b".into()]);
        assert_eq!(verdict.offending_resources(), ["sa-a", "sa-b"]);
    }

    #[test]
    fn test_serialized_shape() {
        let eval = Evaluation::new(Verdict::fail(vec!["sa1".to_string()]), "1 of 3 offending");
        let json = serde_json::to_value(&eval).unwrap();
        assert_eq!(json["status"], "fail");
        assert_eq!(json["offending_resources"][0], "sa1");
        assert_eq!(json["detail"], "1 of 3 offending");

        let manual = serde_json::to_value(Verdict::ManualReviewRequired).unwrap();
        assert_eq!(manual["status"], "manual_review_required");
    }
}
