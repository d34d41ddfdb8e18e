//! Run reports.
//!
//! A [`RunReport`] is produced once per run by [`Aggregator::seal`] and is
//! immutable afterwards. Entries are in natural control-key order, so two runs
//! over identical evidence serialize identically apart from timestamps.

mod aggregator;
mod diff;

pub use aggregator::Aggregator;
pub use diff::{ReportDiff, VerdictChange};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use vigil_evidence::{CollectorStats, EvidenceSnapshot, QuerySignature};
use vigil_registry::{ControlKey, ControlOrigin, RegisteredControl, Severity};

use crate::verdict::{Evaluation, Verdict, VerdictKind};

/// Bumped on incompatible report layout changes.
pub const REPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    Complete,
    Cancelled,
}

/// One control's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub variant: u32,
    pub source: ControlOrigin,
    pub title: String,
    pub severity: Severity,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(flatten)]
    pub evaluation: Evaluation,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl ReportEntry {
    pub fn new(control: &RegisteredControl, evaluation: Evaluation) -> Self {
        Self {
            id: control.key.id.clone(),
            variant: control.key.variant,
            source: control.origin.clone(),
            title: control.control.title.clone(),
            severity: control.control.severity,
            categories: control.control.categories.clone(),
            evaluation,
        }
    }

    pub fn key(&self) -> ControlKey {
        ControlKey::new(self.id.clone(), self.variant)
    }

    pub fn verdict(&self) -> &Verdict {
        &self.evaluation.verdict
    }
}

/// Counts over a sealed report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub manual_review: usize,
    pub not_applicable: usize,
    pub not_evaluated: usize,
    /// Failures per control severity.
    #[serde(default)]
    pub failed_by_severity: BTreeMap<Severity, usize>,
    #[serde(default)]
    pub evidence: CollectorStats,
}

impl Summary {
    pub fn from_entries(
        entries: &[ReportEntry],
        not_evaluated: usize,
        evidence: CollectorStats,
    ) -> Self {
        let mut summary = Summary {
            total: entries.len() + not_evaluated,
            not_evaluated,
            evidence,
            ..Summary::default()
        };
        for entry in entries {
            match entry.verdict().kind() {
                VerdictKind::Pass => summary.passed += 1,
                VerdictKind::Fail => {
                    summary.failed += 1;
                    *summary.failed_by_severity.entry(entry.severity).or_default() += 1;
                }
                VerdictKind::Error => summary.errors += 1,
                VerdictKind::ManualReviewRequired => summary.manual_review += 1,
                VerdictKind::NotApplicable => summary.not_applicable += 1,
            }
        }
        summary
    }
}

/// Sealed result of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub schema_version: u32,
    pub engine_version: String,
    pub scope: String,
    /// Digest of the control catalog the run used.
    pub catalog: String,
    pub started_at: DateTime<Utc>,
    pub sealed_at: DateTime<Utc>,
    pub completion: Completion,
    pub entries: Vec<ReportEntry>,
    /// Keys of controls that never received a verdict (cancelled runs).
    #[serde(default)]
    pub not_evaluated: Vec<ControlKey>,
    pub summary: Summary,
    /// Snapshots used by the run, when embedding is enabled.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub evidence: BTreeMap<QuerySignature, EvidenceSnapshot>,
}

impl RunReport {
    pub fn entry(&self, id: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.id == id && e.variant == 0)
    }

    pub fn is_partial(&self) -> bool {
        self.completion == Completion::Cancelled || !self.not_evaluated.is_empty()
    }

    /// Pretty JSON with stable field and entry order.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// `sha256:<hex>` over the canonical JSON with every timestamp cleared.
    ///
    /// Equal fingerprints mean equal verdicts, details and evidence.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let mut normalized = self.clone();
        normalized.started_at = DateTime::<Utc>::default();
        normalized.sealed_at = DateTime::<Utc>::default();
        for snapshot in normalized.evidence.values_mut() {
            snapshot.collected_at = DateTime::<Utc>::default();
        }
        let bytes = serde_json::to_vec(&normalized)?;
        Ok(format!("sha256:{}", hex::encode(Sha256::digest(&bytes))))
    }

    /// Compare against an earlier report of the same catalog.
    pub fn diff(&self, previous: &RunReport) -> ReportDiff {
        ReportDiff::between(previous, self)
    }

    /// Whether any failed control is at or above `threshold`.
    pub fn has_failure_at_or_above(&self, threshold: Severity) -> bool {
        self.entries
            .iter()
            .any(|e| e.verdict().kind() == VerdictKind::Fail && e.severity >= threshold)
    }

    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0
    }
}
