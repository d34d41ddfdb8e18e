use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use vigil_evidence::{CollectorStats, EvidenceSnapshot, QuerySignature};
use vigil_registry::ControlKey;

use super::{Completion, ReportEntry, RunReport, Summary, REPORT_SCHEMA_VERSION};
use crate::error::ReportError;

/// Mutable report under construction. Owned by the orchestrator for the
/// duration of one run.
#[derive(Debug)]
pub struct Aggregator {
    scope: String,
    catalog: String,
    started_at: DateTime<Utc>,
    entries: BTreeMap<ControlKey, ReportEntry>,
    not_evaluated: BTreeSet<ControlKey>,
    evidence: BTreeMap<QuerySignature, EvidenceSnapshot>,
    stats: CollectorStats,
    sealed: bool,
}

impl Aggregator {
    pub fn new(scope: impl Into<String>, catalog: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            catalog: catalog.into(),
            started_at: Utc::now(),
            entries: BTreeMap::new(),
            not_evaluated: BTreeSet::new(),
            evidence: BTreeMap::new(),
            stats: CollectorStats::default(),
            sealed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), ReportError> {
        if self.sealed {
            return Err(ReportError::ReportAlreadySealed);
        }
        Ok(())
    }

    /// Record a control result.
    ///
    /// Re-recording an identical entry is a no-op; a different entry for an
    /// already recorded key is a [`ReportError::ConflictingRecord`].
    pub fn record(&mut self, entry: ReportEntry) -> Result<(), ReportError> {
        self.ensure_open()?;
        let key = entry.key();

        if let Some(existing) = self.entries.get(&key) {
            if existing == &entry {
                return Ok(());
            }
            return Err(ReportError::ConflictingRecord {
                key: key.to_string(),
                existing: existing.verdict().kind().to_string(),
                new: entry.verdict().kind().to_string(),
            });
        }

        self.not_evaluated.remove(&key);
        self.entries.insert(key, entry);
        Ok(())
    }

    /// Mark a control that will not receive a verdict in this run.
    pub fn mark_not_evaluated(&mut self, key: ControlKey) -> Result<(), ReportError> {
        self.ensure_open()?;
        if !self.entries.contains_key(&key) {
            self.not_evaluated.insert(key);
        }
        Ok(())
    }

    pub fn attach_evidence(
        &mut self,
        snapshots: impl IntoIterator<Item = Arc<EvidenceSnapshot>>,
    ) -> Result<(), ReportError> {
        self.ensure_open()?;
        for snapshot in snapshots {
            self.evidence
                .insert(snapshot.signature.clone(), snapshot.as_ref().clone());
        }
        Ok(())
    }

    pub fn set_collector_stats(&mut self, stats: CollectorStats) -> Result<(), ReportError> {
        self.ensure_open()?;
        self.stats = stats;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Freeze the report. One-way: later `record` or `seal` calls fail.
    pub fn seal(&mut self, completion: Completion) -> Result<RunReport, ReportError> {
        self.ensure_open()?;
        self.sealed = true;

        let entries: Vec<ReportEntry> = std::mem::take(&mut self.entries).into_values().collect();
        let not_evaluated: Vec<ControlKey> =
            std::mem::take(&mut self.not_evaluated).into_iter().collect();
        let summary = Summary::from_entries(&entries, not_evaluated.len(), self.stats);

        Ok(RunReport {
            schema_version: REPORT_SCHEMA_VERSION,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            scope: self.scope.clone(),
            catalog: self.catalog.clone(),
            started_at: self.started_at,
            sealed_at: Utc::now(),
            completion,
            entries,
            not_evaluated,
            summary,
            evidence: std::mem::take(&mut self.evidence),
        })
    }
}
