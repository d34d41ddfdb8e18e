//! Evidence collection for Vigil compliance runs.
//!
//! This crate owns everything between a control's declared evidence needs and
//! the cloud provider:
//!
//! - [`EvidenceQuery`]: a logical request (resource type + property set) with a
//!   stable [`QuerySignature`]
//! - [`EvidenceProvider`]: the opaque provider capability (paged listing)
//! - [`EvidenceCollector`]: run-scoped, single-flight memoization with retry
//! - [`FixtureProvider`]: frozen evidence served from a JSON document
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vigil_evidence::{CollectorOptions, EvidenceCollector, EvidenceQuery, FixtureProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = FixtureProvider::from_path("evidence.json")?;
//! let collector = EvidenceCollector::new(Arc::new(provider), "sub-123", CollectorOptions::default());
//!
//! let query = EvidenceQuery::new(
//!     "Microsoft.Storage/storageAccounts",
//!     ["minimumTlsVersion"],
//! );
//! let snapshot = collector.collect(&query).await?;
//! println!("{} storage accounts", snapshot.resources.len());
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod error;
pub mod fixture;
pub mod provider;
pub mod query;
pub mod retry;
pub mod snapshot;

pub use collector::{CollectorOptions, CollectorStats, EvidenceCollector, EvidenceSource};
pub use error::{EvidenceUnavailable, ProviderError};
pub use fixture::{FixtureDocument, FixtureError, FixtureFailure, FixtureProvider};
pub use provider::{EvidenceProvider, ProviderPage};
pub use query::{EvidenceQuery, QuerySignature};
pub use retry::{RetryFailure, RetryPolicy};
pub use snapshot::{normalize_records, EvidenceSnapshot, Resource, WILDCARD_SEGMENT};
