//! Run orchestration.
//!
//! One [`Orchestrator`] drives one run through [`RunState`]. Controls are
//! fanned out on a semaphore-bounded `JoinSet`; each evaluation runs under the
//! per-control deadline and a panic or timeout only affects its own control.
//! Results arrive in completion order and are sorted by the aggregator at
//! seal time.
//!
//! Cancellation stops scheduling at once. Evaluations already running get the
//! configured grace period, then are aborted; they and every unscheduled
//! control are reported as not evaluated and the report is sealed as
//! `cancelled`.

mod progress;
mod state;

pub use progress::{ProgressEvent, ProgressSink};
pub use state::RunState;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};
use vigil_evidence::{EvidenceCollector, EvidenceProvider, EvidenceQuery, QuerySignature};
use vigil_registry::{RegisteredControl, Registry};

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::context::RunContext;
use crate::error::{EvaluationError, RunError};
use crate::evaluator::evaluate;
use crate::report::{Aggregator, Completion, ReportEntry, RunReport};
use crate::verdict::{Evaluation, Verdict};

type Outcome = Result<Evaluation, EvaluationError>;

enum DrainStep {
    Joined(Option<Result<(Id, Outcome), JoinError>>),
    Cancelled,
    GraceElapsed,
}

pub struct Orchestrator {
    registry: Arc<Registry>,
    provider: Arc<dyn EvidenceProvider>,
    config: EngineConfig,
    progress: Option<ProgressSink>,
    state: watch::Sender<RunState>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<Registry>,
        provider: Arc<dyn EvidenceProvider>,
        config: EngineConfig,
    ) -> Self {
        let (state, _) = watch::channel(RunState::Pending);
        Self {
            registry,
            provider,
            config,
            progress: None,
            state,
        }
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    fn transition(&self, to: RunState) -> Result<(), RunError> {
        let mut result = Ok(());
        self.state.send_if_modified(|current| {
            if current.can_transition_to(to) {
                debug!(from = %current, to = %to, "run state transition");
                *current = to;
                true
            } else {
                result = Err(RunError::InvalidTransition { from: *current, to });
                false
            }
        });
        result
    }

    /// Execute the run. Fails only on setup or contract errors; per-control
    /// problems end up in the report.
    pub async fn run(&self, ctx: &RunContext, cancel: CancelToken) -> Result<RunReport, RunError> {
        self.transition(RunState::Collecting)?;

        match self.execute(ctx, cancel).await {
            Ok(report) => Ok(report),
            Err(err) => {
                error!(error = %err, scope = %ctx.scope, "run failed");
                let _ = self.transition(RunState::Failed);
                Err(err)
            }
        }
    }

    async fn execute(&self, ctx: &RunContext, cancel: CancelToken) -> Result<RunReport, RunError> {
        self.config.validate()?;

        let controls: Vec<RegisteredControl> = self
            .registry
            .select(&ctx.selection)?
            .into_iter()
            .cloned()
            .collect();

        let collector = Arc::new(EvidenceCollector::new(
            Arc::clone(&self.provider),
            ctx.scope.clone(),
            self.config.collector_options(),
        ));
        let mut aggregator = Aggregator::new(ctx.scope.clone(), self.registry.digest());

        info!(
            scope = %ctx.scope,
            controls = controls.len(),
            concurrency = self.config.concurrency,
            provider = collector.provider_name(),
            "run started"
        );

        if self.config.prefetch {
            self.prefetch(&controls, ctx, &collector, &cancel).await;
        }

        self.transition(RunState::Evaluating)?;
        let completion = self
            .evaluate_all(controls, ctx, &collector, &cancel, &mut aggregator)
            .await?;

        self.transition(RunState::Sealing)?;
        if self.config.embed_evidence {
            aggregator.attach_evidence(collector.snapshots())?;
        }
        let stats = collector.stats();
        aggregator.set_collector_stats(stats)?;
        let report = aggregator.seal(completion)?;

        info!(
            scope = %report.scope,
            passed = report.summary.passed,
            failed = report.summary.failed,
            errors = report.summary.errors,
            manual = report.summary.manual_review,
            not_applicable = report.summary.not_applicable,
            not_evaluated = report.summary.not_evaluated,
            fetches = stats.fetches,
            cache_hits = stats.cache_hits,
            "run sealed"
        );

        self.transition(RunState::Done)?;
        Ok(report)
    }

    /// Warm every distinct query of the schedulable controls. Failures stay
    /// cached as unavailable evidence for the evaluations to report.
    ///
    /// Cancellation stops scheduling; fetches in flight get the grace period
    /// and are then aborted.
    async fn prefetch(
        &self,
        controls: &[RegisteredControl],
        ctx: &RunContext,
        collector: &Arc<EvidenceCollector>,
        cancel: &CancelToken,
    ) {
        let mut queries: BTreeMap<QuerySignature, EvidenceQuery> = BTreeMap::new();
        for control in controls.iter().filter(|c| !ctx.is_control_excluded(c.id())) {
            for query in control.control.check.queries() {
                queries
                    .entry(query.signature())
                    .or_insert_with(|| query.clone());
            }
        }
        debug!(queries = queries.len(), "prefetching evidence");

        let sem = Arc::new(Semaphore::new(self.config.concurrency));
        let mut join_set = JoinSet::new();
        let deadline = self.config.control_timeout();
        let grace = self.config.cancel_grace();

        for query in queries.into_values() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&sem).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                break;
            };
            let collector = Arc::clone(collector);
            join_set.spawn(async move {
                let _permit = permit;
                let _ = timeout(deadline, collector.collect(&query)).await;
            });
        }

        let mut grace_deadline: Option<Instant> = None;
        loop {
            if grace_deadline.is_none() && cancel.is_cancelled() {
                info!(
                    in_flight = join_set.len(),
                    grace_secs = grace.as_secs(),
                    "run cancelled during prefetch"
                );
                grace_deadline = Some(Instant::now() + grace);
            }

            let drained = match grace_deadline {
                Some(at) => match timeout_at(at, join_set.join_next()).await {
                    Ok(joined) => joined.is_none(),
                    Err(_) => {
                        warn!(
                            remaining = join_set.len(),
                            "cancellation grace period elapsed, aborting prefetch"
                        );
                        join_set.abort_all();
                        while join_set.join_next().await.is_some() {}
                        true
                    }
                },
                None => tokio::select! {
                    biased;
                    joined = join_set.join_next() => joined.is_none(),
                    _ = cancel.cancelled() => false,
                },
            };
            if drained {
                break;
            }
        }
    }

    async fn evaluate_all(
        &self,
        controls: Vec<RegisteredControl>,
        ctx: &RunContext,
        collector: &Arc<EvidenceCollector>,
        cancel: &CancelToken,
        aggregator: &mut Aggregator,
    ) -> Result<Completion, RunError> {
        let total = controls.len();
        let deadline = self.config.control_timeout();
        let grace = self.config.cancel_grace();
        let ctx = Arc::new(ctx.clone());
        let sem = Arc::new(Semaphore::new(self.config.concurrency));

        let mut join_set: JoinSet<Outcome> = JoinSet::new();
        let mut running: HashMap<Id, RegisteredControl> = HashMap::new();
        let mut cancelled = false;

        let mut pending = controls.into_iter();
        for control in pending.by_ref() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&sem).acquire_owned() => Some(permit),
            };
            let Some(permit) = permit else {
                aggregator.mark_not_evaluated(control.key.clone())?;
                cancelled = true;
                break;
            };
            let permit = permit.map_err(|_| RunError::PoolClosed)?;

            let task_control = control.clone();
            let collector = Arc::clone(collector);
            let ctx = Arc::clone(&ctx);
            let token = cancel.clone();
            let handle = join_set.spawn(async move {
                let _permit = permit;
                match timeout(
                    deadline,
                    evaluate(&task_control, collector.as_ref(), &ctx, &token),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(EvaluationError::Timeout(deadline)),
                }
            });
            running.insert(handle.id(), control);
        }

        for control in pending {
            aggregator.mark_not_evaluated(control.key)?;
        }
        if cancelled {
            info!(
                in_flight = join_set.len(),
                grace_secs = grace.as_secs(),
                "run cancelled, waiting for in-flight evaluations"
            );
        }

        let mut grace_deadline = cancelled.then(|| Instant::now() + grace);
        let mut aborted = false;
        let mut done = 0usize;

        loop {
            let step = if aborted {
                DrainStep::Joined(join_set.join_next_with_id().await)
            } else if let Some(at) = grace_deadline {
                match timeout_at(at, join_set.join_next_with_id()).await {
                    Ok(joined) => DrainStep::Joined(joined),
                    Err(_) => DrainStep::GraceElapsed,
                }
            } else {
                tokio::select! {
                    biased;
                    joined = join_set.join_next_with_id() => DrainStep::Joined(joined),
                    _ = cancel.cancelled() => DrainStep::Cancelled,
                }
            };

            match step {
                DrainStep::Joined(None) => break,
                DrainStep::Joined(Some(joined)) => {
                    self.handle_joined(joined, &mut running, aggregator)?;
                    done += 1;
                    if let Some(sink) = &self.progress {
                        sink(ProgressEvent { done, total });
                    }
                }
                DrainStep::Cancelled => {
                    cancelled = true;
                    grace_deadline = Some(Instant::now() + grace);
                    info!(
                        in_flight = join_set.len(),
                        grace_secs = grace.as_secs(),
                        "run cancelled, waiting for in-flight evaluations"
                    );
                }
                DrainStep::GraceElapsed => {
                    warn!(
                        remaining = join_set.len(),
                        "cancellation grace period elapsed, aborting evaluations"
                    );
                    join_set.abort_all();
                    aborted = true;
                }
            }
        }

        Ok(if cancelled {
            Completion::Cancelled
        } else {
            Completion::Complete
        })
    }

    fn handle_joined(
        &self,
        joined: Result<(Id, Outcome), JoinError>,
        running: &mut HashMap<Id, RegisteredControl>,
        aggregator: &mut Aggregator,
    ) -> Result<(), RunError> {
        let (id, outcome) = match joined {
            Ok((id, outcome)) => (id, outcome),
            Err(join_err) => {
                let id = join_err.id();
                let outcome = if join_err.is_cancelled() {
                    Err(EvaluationError::Aborted)
                } else {
                    error!(error = %join_err, "evaluation task panicked");
                    Ok(Evaluation::new(
                        Verdict::error("evaluation panicked"),
                        panic_message(join_err),
                    ))
                };
                (id, outcome)
            }
        };

        let Some(control) = running.remove(&id) else {
            return Ok(());
        };

        match outcome {
            Ok(evaluation) => {
                debug!(
                    control = %control.key,
                    verdict = %evaluation.verdict.kind(),
                    "control evaluated"
                );
                aggregator.record(ReportEntry::new(&control, evaluation))?;
            }
            Err(err) if err.is_cancellation() => {
                debug!(control = %control.key, reason = %err, "control not evaluated");
                aggregator.mark_not_evaluated(control.key.clone())?;
            }
            Err(err) => {
                warn!(control = %control.key, error = %err, "control evaluation failed");
                let evidence = control
                    .control
                    .check
                    .queries()
                    .into_iter()
                    .map(EvidenceQuery::signature)
                    .collect();
                aggregator.record(ReportEntry::new(
                    &control,
                    Evaluation::from_error(&err, evidence),
                ))?;
            }
        }
        Ok(())
    }
}

/// Panic payload text. Task ids are left out so reports stay reproducible.
fn panic_message(join_err: JoinError) -> String {
    match join_err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic with a non-string payload".to_string()),
        Err(_) => "evaluation task failed".to_string(),
    }
}
