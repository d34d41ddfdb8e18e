mod diff;
mod list;
mod run;

use anyhow::Context;
use vigil_core::EngineConfig;
use vigil_registry::{ControlSource, DuplicatePolicy, Registry};

use super::args::{Cli, Command, ControlArgs};
use crate::exit_codes;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Run(args) => run::run(args).await,
        Command::List(args) => list::run(args),
        Command::Diff(args) => diff::run(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::SUCCESS)
        }
    }
}

/// Resolve every `--controls` reference and load them as one registry.
pub(crate) fn load_registry(args: &ControlArgs, policy: DuplicatePolicy) -> anyhow::Result<Registry> {
    let sources = args
        .controls
        .iter()
        .map(|reference| ControlSource::resolve(reference))
        .collect::<Result<Vec<_>, _>>()
        .context("failed to resolve control sources")?;

    Registry::load(&sources, policy).context("failed to load controls")
}

/// Duplicate policy precedence: flag, then configuration.
pub(crate) fn duplicate_policy(args: &ControlArgs, config: Option<&EngineConfig>) -> DuplicatePolicy {
    args.on_duplicate
        .or_else(|| config.map(|c| c.on_duplicate))
        .unwrap_or_default()
}
