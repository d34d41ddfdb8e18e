use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};
use vigil_core::{CancelSource, EngineConfig, Orchestrator, ProgressEvent, RunContext, RunReport};
use vigil_evidence::FixtureProvider;
use vigil_registry::Severity;

use super::{duplicate_policy, load_registry};
use crate::cli::args::RunArgs;
use crate::exit_codes;

pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    }
    .with_env_overrides()?;
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if args.embed_evidence {
        config.embed_evidence = true;
    }
    config.on_duplicate = duplicate_policy(&args.controls, Some(&config));
    config.validate()?;

    let registry = load_registry(&args.controls, config.on_duplicate)?;
    let provider = FixtureProvider::from_path(&args.evidence)
        .with_context(|| format!("failed to load evidence from {}", args.evidence.display()))?;

    let mut ctx = RunContext::new(&args.scope).with_selection(args.controls.selection());
    for id in &args.exclude_controls {
        ctx = ctx.exclude_control(id);
    }
    for id in &args.exclude_resources {
        ctx = ctx.exclude_resource(id);
    }
    if let Some(label) = &args.credentials {
        ctx = ctx.with_credentials(label);
    }

    let cancel = CancelSource::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            signal.cancel();
        }
    });

    let orchestrator = Orchestrator::new(Arc::new(registry), Arc::new(provider), config)
        .with_progress(Arc::new(|event: ProgressEvent| {
            debug!(done = event.done, total = event.total, "progress");
        }));
    let report = orchestrator
        .run(&ctx, cancel.token())
        .await
        .context("run failed")?;

    let json = report.to_canonical_json()?;
    match &args.out {
        Some(path) => {
            std::fs::write(path, format!("{json}\n"))
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{json}"),
    }

    eprintln!("{}", summary_line(&report));
    Ok(exit_code(&report, args.fail_on.into()))
}

/// Incomplete results outrank failures: a partial or errored run cannot
/// vouch for the controls it did not judge.
fn exit_code(report: &RunReport, fail_on: Severity) -> i32 {
    if report.is_partial() || report.has_errors() {
        exit_codes::INCOMPLETE
    } else if report.has_failure_at_or_above(fail_on) {
        exit_codes::FAILED
    } else {
        exit_codes::SUCCESS
    }
}

fn summary_line(report: &RunReport) -> String {
    let s = &report.summary;
    let mut line = format!(
        "{}: {} passed, {} failed, {} error, {} manual review, {} not applicable",
        report.scope, s.passed, s.failed, s.errors, s.manual_review, s.not_applicable
    );
    if s.not_evaluated > 0 {
        line.push_str(&format!(", {} not evaluated (cancelled)", s.not_evaluated));
    }
    line
}
