use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use vigil_registry::{DuplicatePolicy, Selection, Severity};

#[derive(Parser)]
#[command(
    name = "vigil",
    version,
    about = "Evaluate cloud compliance controls against collected evidence"
)]
pub struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Evaluate controls and write a run report
    Run(RunArgs),
    /// Load control sources and list the registered controls
    List(ListArgs),
    /// Compare two run reports
    Diff(DiffArgs),
    Version,
}

/// Control sources and how to combine them.
#[derive(Args, Clone, Debug)]
pub struct ControlArgs {
    /// Control file, directory or built-in catalog name (repeatable)
    #[arg(long = "controls", default_value = "cis-azure-foundations")]
    pub controls: Vec<String>,

    /// Policy for controls declared more than once: reject|keep_all|keep_last
    #[arg(long)]
    pub on_duplicate: Option<DuplicatePolicy>,

    /// Only controls whose id matches one of these globs
    #[arg(long = "include")]
    pub include: Vec<String>,

    /// Drop controls whose id matches one of these globs
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// Only controls tagged with one of these categories
    #[arg(long = "category")]
    pub categories: Vec<String>,
}

impl ControlArgs {
    pub fn selection(&self) -> Selection {
        Selection {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            categories: self.categories.clone(),
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub controls: ControlArgs,

    /// Frozen evidence document (JSON)
    #[arg(long)]
    pub evidence: PathBuf,

    /// Subscription or account the run evaluates
    #[arg(long)]
    pub scope: String,

    /// Engine configuration (YAML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the configured worker count
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Lowest severity whose failure fails the process
    #[arg(long, value_enum, default_value_t = FailOn::Low)]
    pub fail_on: FailOn,

    /// Write the report here instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Mark a control not applicable for this run (repeatable)
    #[arg(long = "exclude-control")]
    pub exclude_controls: Vec<String>,

    /// Ignore a resource id in every check (repeatable)
    #[arg(long = "exclude-resource")]
    pub exclude_resources: Vec<String>,

    /// Label of the credentials the evidence was collected with
    #[arg(long, env = "VIGIL_CREDENTIALS", hide_env_values = true)]
    pub credentials: Option<String>,

    /// Embed collected evidence snapshots in the report
    #[arg(long)]
    pub embed_evidence: bool,
}

#[derive(Args, Clone, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub controls: ControlArgs,

    #[arg(long, value_enum, default_value_t = ListFormat::Text)]
    pub format: ListFormat,
}

#[derive(Args, Clone, Debug)]
pub struct DiffArgs {
    /// Earlier report
    pub before: PathBuf,
    /// Later report
    pub after: PathBuf,

    /// Exit 1 when a control regressed to fail or error
    #[arg(long)]
    pub fail_on_regression: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailOn {
    Informational,
    Low,
    Medium,
    High,
}

impl From<FailOn> for Severity {
    fn from(value: FailOn) -> Self {
        match value {
            FailOn::Informational => Severity::Informational,
            FailOn::Low => Severity::Low,
            FailOn::Medium => Severity::Medium,
            FailOn::High => Severity::High,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListFormat {
    Text,
    Json,
}
