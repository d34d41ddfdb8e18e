//! Run-scoped evidence collector with single-flight memoization.
//!
//! The collector is the only shared mutable state of a run. Each query
//! signature maps to one shared fetch future: the first caller creates it,
//! every concurrent or later caller awaits the same future, so the provider
//! sees exactly one fetch per signature per run. Entries are never replaced
//! or invalidated mid-run.
//!
//! A caller that gives up (for example because its evaluation deadline
//! elapsed) only drops its own handle; the shared fetch keeps making progress
//! for the remaining waiters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EvidenceUnavailable;
use crate::provider::EvidenceProvider;
use crate::query::{EvidenceQuery, QuerySignature};
use crate::retry::RetryPolicy;
use crate::snapshot::{normalize_records, EvidenceSnapshot};

type FetchOutcome = Result<Arc<EvidenceSnapshot>, EvidenceUnavailable>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// Anything that can answer evidence queries for an evaluator.
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    async fn collect(&self, query: &EvidenceQuery) -> FetchOutcome;
}

/// Collector tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorOptions {
    pub retry: RetryPolicy,
    /// Upper bound on continuation pages followed for one query.
    pub max_pages: u32,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_pages: 100,
        }
    }
}

/// Counters exposed for run summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorStats {
    /// Distinct queries fetched from the provider.
    pub fetches: u64,
    /// Requests answered by an existing (possibly in-flight) fetch.
    pub cache_hits: u64,
    /// Fetches that ended unavailable.
    pub unavailable: u64,
}

#[derive(Debug, Default)]
struct Counters {
    fetches: AtomicU64,
    cache_hits: AtomicU64,
    unavailable: AtomicU64,
}

/// Memoizing evidence collector bound to one run scope.
pub struct EvidenceCollector {
    provider: Arc<dyn EvidenceProvider>,
    scope: String,
    options: CollectorOptions,
    inflight: Mutex<HashMap<QuerySignature, SharedFetch>>,
    counters: Arc<Counters>,
}

impl EvidenceCollector {
    pub fn new(
        provider: Arc<dyn EvidenceProvider>,
        scope: impl Into<String>,
        options: CollectorOptions,
    ) -> Self {
        Self {
            provider,
            scope: scope.into(),
            options,
            inflight: Mutex::new(HashMap::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Collect evidence for `query`, reusing any fetch already started in this run.
    pub async fn collect(&self, query: &EvidenceQuery) -> FetchOutcome {
        let signature = query.signature();

        let fetch = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match inflight.get(&signature) {
                Some(existing) => {
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(signature = %signature, "evidence cache hit");
                    existing.clone()
                }
                None => {
                    self.counters.fetches.fetch_add(1, Ordering::Relaxed);
                    let fetch = fetch_snapshot(
                        Arc::clone(&self.provider),
                        self.scope.clone(),
                        query.clone(),
                        self.options,
                        Arc::clone(&self.counters),
                    )
                    .boxed()
                    .shared();
                    inflight.insert(signature, fetch.clone());
                    fetch
                }
            }
        };

        fetch.await
    }

    /// Snapshots of all completed, successful fetches, ordered by signature.
    pub fn snapshots(&self) -> Vec<Arc<EvidenceSnapshot>> {
        let inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshots: Vec<Arc<EvidenceSnapshot>> = inflight
            .values()
            .filter_map(|fetch| fetch.peek())
            .filter_map(|outcome| outcome.as_ref().ok())
            .cloned()
            .collect();
        snapshots.sort_by(|a, b| a.signature.cmp(&b.signature));
        snapshots
    }

    pub fn stats(&self) -> CollectorStats {
        CollectorStats {
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            unavailable: self.counters.unavailable.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl EvidenceSource for EvidenceCollector {
    async fn collect(&self, query: &EvidenceQuery) -> FetchOutcome {
        EvidenceCollector::collect(self, query).await
    }
}

async fn fetch_snapshot(
    provider: Arc<dyn EvidenceProvider>,
    scope: String,
    query: EvidenceQuery,
    options: CollectorOptions,
    counters: Arc<Counters>,
) -> FetchOutcome {
    let signature = query.signature();
    let outcome = fetch_pages(provider.as_ref(), &scope, &query, options).await;

    match outcome {
        Ok(snapshot) => {
            debug!(
                signature = %signature,
                resources = snapshot.resources.len(),
                calls = snapshot.provider_calls,
                "evidence collected"
            );
            Ok(Arc::new(snapshot))
        }
        Err(unavailable) => {
            counters.unavailable.fetch_add(1, Ordering::Relaxed);
            warn!(
                signature = %signature,
                attempts = unavailable.attempts,
                reason = %unavailable.reason,
                "evidence unavailable"
            );
            Err(unavailable)
        }
    }
}

async fn fetch_pages(
    provider: &dyn EvidenceProvider,
    scope: &str,
    query: &EvidenceQuery,
    options: CollectorOptions,
) -> Result<EvidenceSnapshot, EvidenceUnavailable> {
    let signature = query.signature();
    let resource_type = query.resource_type.as_str();
    let mut records = Vec::new();
    let mut continuation: Option<String> = None;
    let mut calls = 0u32;
    let mut pages = 0u32;

    loop {
        if pages >= options.max_pages.max(1) {
            return Err(EvidenceUnavailable::new(
                signature,
                format!("page limit of {} exceeded", options.max_pages),
                calls,
            ));
        }

        let label = format!("{}#{}", resource_type, pages);
        let token = continuation.as_deref();
        let result = options
            .retry
            .run(&label, move || provider.list_page(scope, resource_type, token))
            .await;

        let page = match result {
            Ok((page, attempts)) => {
                calls += attempts;
                page
            }
            Err(failure) => {
                return Err(EvidenceUnavailable::new(
                    signature,
                    failure.error.to_string(),
                    calls + failure.attempts,
                ));
            }
        };

        pages += 1;
        records.extend(page.items);
        match page.next {
            Some(next) => continuation = Some(next),
            None => break,
        }
    }

    normalize_records(query, records, provider.name(), calls, Utc::now())
        .map_err(|reason| EvidenceUnavailable::new(signature, reason, calls))
}
