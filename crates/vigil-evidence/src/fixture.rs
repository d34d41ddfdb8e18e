//! Frozen evidence provider backed by a JSON document.
//!
//! Used for offline runs, audits of recorded inventory, and tests. Document
//! shape:
//!
//! ```json
//! {
//!   "provider": "azure-export",
//!   "page_size": 100,
//!   "resources": {
//!     "Microsoft.Storage/storageAccounts": [{"id": "...", "properties": {}}]
//!   },
//!   "failures": {
//!     "Microsoft.Authorization/roleDefinitions": {"kind": "forbidden", "message": "no reader role"}
//!   }
//! }
//! ```
//!
//! Resource types absent from `resources` list as empty.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::ProviderError;
use crate::provider::{EvidenceProvider, ProviderPage};

/// On-disk fixture format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureDocument {
    #[serde(default)]
    pub provider: Option<String>,

    /// Records per page; `0` or absent means a single page.
    #[serde(default)]
    pub page_size: usize,

    #[serde(default)]
    pub resources: BTreeMap<String, Vec<Value>>,

    /// Permanent failures injected per resource type.
    #[serde(default)]
    pub failures: BTreeMap<String, FixtureFailure>,
}

/// Serializable stand-in for a [`ProviderError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum FixtureFailure {
    Throttled {
        #[serde(default)]
        retry_after_ms: Option<u64>,
    },
    Transient {
        message: String,
    },
    Unauthorized {
        message: String,
    },
    Forbidden {
        message: String,
    },
    NotFound,
    InvalidResponse {
        message: String,
    },
}

impl FixtureFailure {
    fn to_provider_error(&self, resource_type: &str) -> ProviderError {
        match self {
            Self::Throttled { retry_after_ms } => ProviderError::Throttled {
                retry_after: retry_after_ms.map(Duration::from_millis),
            },
            Self::Transient { message } => ProviderError::Transient {
                message: message.clone(),
            },
            Self::Unauthorized { message } => ProviderError::Unauthorized {
                message: message.clone(),
            },
            Self::Forbidden { message } => ProviderError::Forbidden {
                message: message.clone(),
            },
            Self::NotFound => ProviderError::NotFound {
                resource_type: resource_type.to_string(),
            },
            Self::InvalidResponse { message } => ProviderError::InvalidResponse {
                message: message.clone(),
            },
        }
    }
}

/// Fixture loading error.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("failed to read evidence fixture '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse evidence fixture: {message}")]
    Parse { message: String },
}

/// Provider serving a [`FixtureDocument`].
#[derive(Debug, Clone)]
pub struct FixtureProvider {
    name: String,
    document: FixtureDocument,
}

impl FixtureProvider {
    pub fn new(document: FixtureDocument) -> Self {
        let name = document
            .provider
            .clone()
            .unwrap_or_else(|| "fixture".to_string());
        Self { name, document }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| FixtureError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, FixtureError> {
        let document: FixtureDocument =
            serde_json::from_str(content).map_err(|e| FixtureError::Parse {
                message: e.to_string(),
            })?;
        Ok(Self::new(document))
    }

    /// Add records for a resource type.
    pub fn with_resources(mut self, resource_type: impl Into<String>, records: Vec<Value>) -> Self {
        self.document
            .resources
            .entry(resource_type.into())
            .or_default()
            .extend(records);
        self
    }

    /// Make every listing of `resource_type` fail.
    pub fn with_failure(mut self, resource_type: impl Into<String>, failure: FixtureFailure) -> Self {
        self.document.failures.insert(resource_type.into(), failure);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.document.page_size = page_size;
        self
    }

    pub fn document(&self) -> &FixtureDocument {
        &self.document
    }
}

impl Default for FixtureProvider {
    fn default() -> Self {
        Self::new(FixtureDocument::default())
    }
}

#[async_trait]
impl EvidenceProvider for FixtureProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_page(
        &self,
        _scope: &str,
        resource_type: &str,
        continuation: Option<&str>,
    ) -> Result<ProviderPage, ProviderError> {
        if let Some(failure) = self.document.failures.get(resource_type) {
            return Err(failure.to_provider_error(resource_type));
        }

        let records = self
            .document
            .resources
            .get(resource_type)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let offset = match continuation {
            Some(token) => token.parse::<usize>().map_err(|_| ProviderError::InvalidResponse {
                message: format!("bad continuation token '{}'", token),
            })?,
            None => 0,
        };

        let page_size = if self.document.page_size == 0 {
            records.len().max(1)
        } else {
            self.document.page_size
        };

        let end = (offset + page_size).min(records.len());
        let items = records.get(offset..end).unwrap_or_default().to_vec();
        let next = (end < records.len()).then(|| end.to_string());

        Ok(ProviderPage { items, next })
    }
}
