use std::path::Path;

use anyhow::Context;
use vigil_core::RunReport;

use crate::cli::args::DiffArgs;
use crate::exit_codes;

fn read_report(path: &Path) -> anyhow::Result<RunReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read report {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid report {}", path.display()))
}

pub fn run(args: DiffArgs) -> anyhow::Result<i32> {
    let before = read_report(&args.before)?;
    let after = read_report(&args.after)?;
    if before.catalog != after.catalog {
        eprintln!(
            "warning: reports use different catalogs ({} vs {})",
            before.catalog, after.catalog
        );
    }

    let diff = after.diff(&before);
    if diff.is_empty() {
        println!("no verdict changes");
        return Ok(exit_codes::SUCCESS);
    }
    for change in &diff.changed {
        println!("~ {}: {} -> {}", change.key, change.before, change.after);
    }
    for key in &diff.added {
        println!("+ {}", key);
    }
    for key in &diff.removed {
        println!("- {}", key);
    }

    let regressions = diff.regressions().count();
    if args.fail_on_regression && regressions > 0 {
        eprintln!("{} regression(s)", regressions);
        return Ok(exit_codes::FAILED);
    }
    Ok(exit_codes::SUCCESS)
}
