//! Cloud provider capability consumed by the collector.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;

/// One page of raw provider records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderPage {
    pub items: Vec<Value>,
    /// Continuation token for the next page; `None` on the last page.
    pub next: Option<String>,
}

impl ProviderPage {
    pub fn last(items: Vec<Value>) -> Self {
        Self { items, next: None }
    }
}

/// Read-only access to cloud resource inventory.
///
/// Implementations make exactly one provider call per `list_page` invocation
/// and classify failures through [`ProviderError`]; retry and caching live in
/// the collector.
#[async_trait]
pub trait EvidenceProvider: Send + Sync {
    /// Provider name recorded on snapshots.
    fn name(&self) -> &str;

    /// List one page of resources of `resource_type` within `scope`.
    async fn list_page(
        &self,
        scope: &str,
        resource_type: &str,
        continuation: Option<&str>,
    ) -> Result<ProviderPage, ProviderError>;
}
