use clap::{Args, Subcommand, ValueEnum};

/// Job tracking command namespace.
#[derive(Debug, Args)]
pub struct JobsArgs {
    #[command(subcommand)]
    pub command: JobsCommands,
}

#[derive(Debug, Subcommand)]
pub enum JobsCommands {
    /// Display record counts per lifecycle status.
    Status(JobsStatusArgs),
}

/// Options for the `jobs status` command.
#[derive(Debug, Args)]
pub struct JobsStatusArgs {
    /// Output format (json or table).
    #[arg(long, default_value = "table")]
    pub format: JobsStatusFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum JobsStatusFormat {
    Json,
    Table,
}
