#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use vigil_core::EngineConfig;
use vigil_evidence::{EvidenceProvider, FixtureProvider, ProviderError, ProviderPage, RetryPolicy};
use vigil_registry::{ControlSource, DuplicatePolicy, Registry, Selection};

pub const STORAGE: &str = "Microsoft.Storage/storageAccounts";
pub const ROLES: &str = "Microsoft.Authorization/roleDefinitions";

pub fn builtin_registry() -> Arc<Registry> {
    let source = ControlSource::resolve("cis-azure-foundations").unwrap();
    Arc::new(Registry::load(&[source], DuplicatePolicy::Reject).unwrap())
}

pub fn inline_registry(yaml: &str) -> Arc<Registry> {
    Arc::new(Registry::load(&[ControlSource::yaml("inline", yaml)], DuplicatePolicy::Reject).unwrap())
}

pub fn only(ids: &[&str]) -> Selection {
    Selection {
        include: ids.iter().map(|s| s.to_string()).collect(),
        ..Selection::default()
    }
}

/// Three storage accounts, `sa-bravo` still on TLS 1.0.
pub fn storage_fixture() -> FixtureProvider {
    FixtureProvider::default().with_resources(
        STORAGE,
        vec![
            json!({
                "id": "sa-alpha",
                "properties": {
                    "minimumTlsVersion": "TLS1_2",
                    "supportsHttpsTrafficOnly": true,
                    "allowBlobPublicAccess": false,
                    "networkAcls": {"defaultAction": "Deny"}
                }
            }),
            json!({
                "id": "sa-bravo",
                "properties": {
                    "minimumTlsVersion": "TLS1_0",
                    "supportsHttpsTrafficOnly": true,
                    "allowBlobPublicAccess": false,
                    "networkAcls": {"defaultAction": "Allow"}
                }
            }),
            json!({
                "id": "sa-charlie",
                "properties": {
                    "minimumTlsVersion": "TLS1_2",
                    "supportsHttpsTrafficOnly": true,
                    "allowBlobPublicAccess": false,
                    "networkAcls": {"defaultAction": "Deny"}
                }
            }),
        ],
    )
}

pub fn fast_config() -> EngineConfig {
    EngineConfig {
        retry: RetryPolicy::new(4, Duration::from_millis(10), Duration::from_secs(2)),
        ..EngineConfig::default()
    }
}

/// Counts `list_page` calls before delegating.
pub struct CountingProvider {
    pub inner: FixtureProvider,
    pub calls: AtomicU32,
}

impl CountingProvider {
    pub fn new(inner: FixtureProvider) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EvidenceProvider for CountingProvider {
    fn name(&self) -> &str {
        "counting"
    }

    async fn list_page(
        &self,
        scope: &str,
        resource_type: &str,
        continuation: Option<&str>,
    ) -> Result<ProviderPage, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_page(scope, resource_type, continuation).await
    }
}

/// Throttles the first `throttles` calls, then delegates.
pub struct ThrottlingProvider {
    pub inner: FixtureProvider,
    pub throttles: AtomicU32,
    pub retry_after: Duration,
    pub calls: AtomicU32,
}

impl ThrottlingProvider {
    pub fn new(inner: FixtureProvider, throttles: u32, retry_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner,
            throttles: AtomicU32::new(throttles),
            retry_after,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl EvidenceProvider for ThrottlingProvider {
    fn name(&self) -> &str {
        "throttling"
    }

    async fn list_page(
        &self,
        scope: &str,
        resource_type: &str,
        continuation: Option<&str>,
    ) -> Result<ProviderPage, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let throttled = self
            .throttles
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if throttled {
            return Err(ProviderError::Throttled {
                retry_after: Some(self.retry_after),
            });
        }
        self.inner.list_page(scope, resource_type, continuation).await
    }
}

/// Sleeps before every call.
pub struct SlowProvider {
    pub inner: FixtureProvider,
    pub delay: Duration,
}

#[async_trait]
impl EvidenceProvider for SlowProvider {
    fn name(&self) -> &str {
        "slow"
    }

    async fn list_page(
        &self,
        scope: &str,
        resource_type: &str,
        continuation: Option<&str>,
    ) -> Result<ProviderPage, ProviderError> {
        tokio::time::sleep(self.delay).await;
        self.inner.list_page(scope, resource_type, continuation).await
    }
}

/// Panics on the given resource type.
pub struct PanickingProvider {
    pub inner: FixtureProvider,
    pub resource_type: &'static str,
}

#[async_trait]
impl EvidenceProvider for PanickingProvider {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn list_page(
        &self,
        scope: &str,
        resource_type: &str,
        continuation: Option<&str>,
    ) -> Result<ProviderPage, ProviderError> {
        if resource_type == self.resource_type {
            panic!("provider bug while listing {}", resource_type);
        }
        self.inner.list_page(scope, resource_type, continuation).await
    }
}
