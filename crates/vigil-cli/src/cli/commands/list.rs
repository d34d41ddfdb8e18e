use serde::Serialize;
use vigil_core::EngineConfig;

use super::{duplicate_policy, load_registry};
use crate::cli::args::{ListArgs, ListFormat};
use crate::exit_codes;

#[derive(Serialize)]
struct ListedControl<'a> {
    id: &'a str,
    variant: u32,
    source: String,
    title: &'a str,
    severity: vigil_registry::Severity,
    categories: &'a [String],
    manual: bool,
}

pub fn run(args: ListArgs) -> anyhow::Result<i32> {
    let config = EngineConfig::default().with_env_overrides()?;
    let policy = duplicate_policy(&args.controls, Some(&config));
    let registry = load_registry(&args.controls, policy)?;
    let selected = registry.select(&args.controls.selection())?;

    let rows: Vec<ListedControl<'_>> = selected
        .iter()
        .map(|c| ListedControl {
            id: &c.key.id,
            variant: c.key.variant,
            source: c.origin.to_string(),
            title: &c.control.title,
            severity: c.control.severity,
            categories: &c.control.categories,
            manual: c.control.is_manual(),
        })
        .collect();

    match args.format {
        ListFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        ListFormat::Text => {
            for row in &rows {
                let key = if row.variant == 0 {
                    row.id.to_string()
                } else {
                    format!("{}#{}", row.id, row.variant)
                };
                let kind = if row.manual { "manual" } else { "auto" };
                println!(
                    "{:<12} {:<13} {:<6} {}  ({})",
                    key,
                    row.severity.as_str(),
                    kind,
                    row.title,
                    row.source
                );
            }
            eprintln!("{} control(s), catalog {}", rows.len(), registry.digest());
        }
    }
    Ok(exit_codes::SUCCESS)
}
