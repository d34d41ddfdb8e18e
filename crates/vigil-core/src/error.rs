//! Engine error taxonomy.
//!
//! [`EvaluationError`] is local to one control and always ends up as a verdict
//! or a not-evaluated entry. [`ReportError`] and [`RunError`] are contract
//! violations or setup failures that end the run without a report.

use std::path::PathBuf;
use std::time::Duration;

use vigil_evidence::EvidenceUnavailable;
use vigil_registry::RegistryError;

use crate::orchestrator::RunState;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    #[error(transparent)]
    EvidenceUnavailable(#[from] EvidenceUnavailable),

    #[error("evaluation exceeded the {}s per-control deadline", .0.as_secs_f64())]
    Timeout(Duration),

    /// Cooperative cancellation observed between evidence fetches.
    #[error("evaluation cancelled")]
    Cancelled,

    /// The evaluation task was aborted after the cancellation grace period.
    #[error("evaluation aborted after cancellation grace period")]
    Aborted,
}

impl EvaluationError {
    /// Whether the control should be listed as not evaluated rather than
    /// receiving a verdict.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Aborted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("report is already sealed")]
    ReportAlreadySealed,

    #[error("conflicting verdicts recorded for control '{key}': {existing} then {new}")]
    ConflictingRecord {
        key: String,
        existing: String,
        new: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid run state transition {from:?} -> {to:?}")]
    InvalidTransition { from: RunState, to: RunState },

    #[error("worker pool closed unexpectedly")]
    PoolClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid value '{value}' for {var}: {message}")]
    Env {
        var: &'static str,
        value: String,
        message: String,
    },
}
