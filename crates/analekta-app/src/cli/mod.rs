use std::path::PathBuf;

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};

pub mod jobs;

pub use jobs::{JobsArgs, JobsCommands, JobsStatusArgs, JobsStatusFormat};

/// Top-level CLI entry point.
#[derive(Debug, Parser)]
#[command(
    name = "analekta",
    version,
    author,
    about = "Structured document extraction over an asynchronous analysis service"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(global = true, short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn print_help() {
        let mut cmd = Cli::command();
        let _ = cmd.print_help();
        println!();
    }
}

/// Supported subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the notification webhook server.
    Serve(ServeArgs),
    /// Copy loose input documents into fixed-size batch prefixes.
    Organize(OrganizeArgs),
    /// Submit every document in a batch for analysis.
    Launch(LaunchArgs),
    /// Process a file of completion-notification envelopes.
    Notify(NotifyArgs),
    /// Reconcile stalled jobs against the analysis service.
    Recover(RecoverArgs),
    /// Inspect tracked analysis jobs.
    Jobs(JobsArgs),
    /// Export a batch's extraction results as an NDJSON summary ledger.
    Export(ExportArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs;

#[derive(Debug, Args)]
pub struct OrganizeArgs {
    /// Override the configured source bucket.
    #[arg(long)]
    pub bucket: Option<String>,
    /// Documents per batch (defaults to the configured batch size).
    #[arg(long)]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Args)]
pub struct LaunchArgs {
    /// Batch prefix to submit (e.g. `batch-1/`).
    #[arg(long)]
    pub batch: String,
    /// Override the configured completion-notification channel.
    #[arg(long)]
    pub channel: Option<String>,
    /// Override the configured notification publisher role.
    #[arg(long)]
    pub role: Option<String>,
}

#[derive(Debug, Args)]
pub struct NotifyArgs {
    /// JSON file containing a notification batch (`{"Records": [...]}`).
    #[arg(value_name = "FILE")]
    pub input: PathBuf,
}

#[derive(Debug, Args)]
pub struct RecoverArgs {
    /// Skip the confirmation prompt.
    #[arg(long, action = ArgAction::SetTrue)]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Batch prefix to summarize (e.g. `batch-1/`).
    #[arg(long)]
    pub batch: String,
    /// Ledger file to append summary rows to.
    #[arg(long, value_name = "FILE")]
    pub output: PathBuf,
}
