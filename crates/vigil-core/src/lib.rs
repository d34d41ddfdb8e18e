//! Vigil evaluation engine.
//!
//! Wires the control registry and the evidence collector into a run:
//!
//! - [`evaluator`]: pure check evaluation producing a [`Verdict`]
//! - [`orchestrator`]: bounded, cancellable fan-out over the selected controls
//! - [`report`]: aggregation into a sealed, deterministic [`RunReport`]
//!
//! ```no_run
//! use std::sync::Arc;
//! use vigil_core::{CancelSource, EngineConfig, Orchestrator, RunContext};
//! use vigil_evidence::FixtureProvider;
//! use vigil_registry::{ControlSource, DuplicatePolicy, Registry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::load(
//!     &[ControlSource::resolve("cis-azure-foundations")?],
//!     DuplicatePolicy::Reject,
//! )?;
//! let provider = FixtureProvider::from_path("evidence.json")?;
//!
//! let orchestrator = Orchestrator::new(
//!     Arc::new(registry),
//!     Arc::new(provider),
//!     EngineConfig::default(),
//! );
//! let cancel = CancelSource::new();
//! let report = orchestrator
//!     .run(&RunContext::new("sub-123"), cancel.token())
//!     .await?;
//! println!("{}", report.to_canonical_json()?);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod orchestrator;
pub mod report;
pub mod verdict;

pub use cancel::{CancelSource, CancelToken};
pub use config::EngineConfig;
pub use context::RunContext;
pub use error::{ConfigError, EvaluationError, ReportError, RunError};
pub use evaluator::evaluate;
pub use orchestrator::{Orchestrator, ProgressEvent, ProgressSink, RunState};
pub use report::{
    Aggregator, Completion, ReportDiff, ReportEntry, RunReport, Summary, VerdictChange,
    REPORT_SCHEMA_VERSION,
};
pub use verdict::{Evaluation, Verdict, VerdictKind};
