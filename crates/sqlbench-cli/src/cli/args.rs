use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sqlbench",
    version,
    about = "Runs text-to-SQL benchmarks against real databases and scores the results"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Evaluate a dataset as described by an experiment config
    Run(RunArgs),
    Version,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, env = "SQLBENCH_CONFIG", default_value = "sqlbench.yaml")]
    pub config: PathBuf,

    /// Results land in `<output_dir>/<job_id>/`
    #[arg(long, default_value = "results")]
    pub output_dir: PathBuf,

    /// Reject unknown config keys instead of warning
    #[arg(long)]
    pub strict: bool,

    #[arg(long, env = "SQLBENCH_LOG", default_value = "info")]
    pub log_level: String,

    #[arg(long)]
    pub json_logs: bool,

    /// Disable the live progress bars (also off when stderr is not a terminal)
    #[arg(long)]
    pub no_progress: bool,
}
