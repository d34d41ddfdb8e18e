use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vigil_registry::ControlKey;

use super::RunReport;
use crate::verdict::VerdictKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictChange {
    pub key: ControlKey,
    pub before: VerdictKind,
    pub after: VerdictKind,
}

/// Verdict-level differences between two reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDiff {
    pub changed: Vec<VerdictChange>,
    /// Controls present only in the newer report.
    pub added: Vec<ControlKey>,
    /// Controls present only in the older report.
    pub removed: Vec<ControlKey>,
}

impl ReportDiff {
    pub fn between(previous: &RunReport, current: &RunReport) -> Self {
        let before: BTreeMap<ControlKey, VerdictKind> = previous
            .entries
            .iter()
            .map(|e| (e.key(), e.verdict().kind()))
            .collect();
        let after: BTreeMap<ControlKey, VerdictKind> = current
            .entries
            .iter()
            .map(|e| (e.key(), e.verdict().kind()))
            .collect();

        let mut diff = ReportDiff::default();
        for (key, kind) in &after {
            match before.get(key) {
                None => diff.added.push(key.clone()),
                Some(prev) if prev != kind => diff.changed.push(VerdictChange {
                    key: key.clone(),
                    before: *prev,
                    after: *kind,
                }),
                Some(_) => {}
            }
        }
        diff.removed = before
            .keys()
            .filter(|key| !after.contains_key(*key))
            .cloned()
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }

    /// Controls that moved into `Fail` or `Error`.
    pub fn regressions(&self) -> impl Iterator<Item = &VerdictChange> {
        self.changed
            .iter()
            .filter(|c| matches!(c.after, VerdictKind::Fail | VerdictKind::Error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Aggregator, Completion, ReportEntry};
    use crate::verdict::{Evaluation, Verdict};
    use vigil_registry::{ControlOrigin, Severity};

    fn report(entries: &[(&str, Verdict)]) -> RunReport {
        let mut agg = Aggregator::new("sub", "sha256:x");
        for (id, verdict) in entries {
            agg.record(ReportEntry {
                id: id.to_string(),
                variant: 0,
                source: ControlOrigin::new("c.yaml", None),
                title: String::new(),
                severity: Severity::Medium,
                categories: vec![],
                evaluation: Evaluation::new(verdict.clone(), ""),
            })
            .unwrap();
        }
        agg.seal(Completion::Complete).unwrap()
    }

    #[test]
    fn test_diff_reports() {
        let old = report(&[("1", Verdict::Pass), ("2", Verdict::Pass), ("3", Verdict::Pass)]);
        let new = report(&[
            ("1", Verdict::Pass),
            ("2", Verdict::fail(vec!["sa".to_string()])),
            ("4", Verdict::ManualReviewRequired),
        ]);

        let diff = new.diff(&old);
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.changed[0].key, ControlKey::primary("2"));
        assert_eq!(diff.added, vec![ControlKey::primary("4")]);
        assert_eq!(diff.removed, vec![ControlKey::primary("3")]);
        assert_eq!(diff.regressions().count(), 1);
        assert!(new.diff(&new).is_empty());
    }
}
