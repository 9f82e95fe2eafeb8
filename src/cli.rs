//! Command-line interface definitions for open_eyes.
//!
//! Options can also be provided through environment variables where noted.
//!
//! ```sh
//! # Collect every source scheduled today
//! open_eyes collect -c sources.yaml
//!
//! # Same, in a supervised child process that shuts down gracefully on Ctrl-C
//! open_eyes supervise -c sources.yaml --log-dir ./logs
//!
//! # Export the last three days of finance and tech records
//! open_eyes query -c sources.yaml -d 3d -t 财经,科技 -o report.json
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Also write logs to `<DIR>/<YYYY-MM-DD>/<command>.log`
    #[arg(long, global = true, env = "OPEN_EYES_LOG_DIR")]
    pub log_dir: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every source scheduled for today once
    Collect(CollectArgs),
    /// Run `collect` in a child process and stop it gracefully on Ctrl-C
    Supervise(CollectArgs),
    /// Export stored records within a time window as JSON
    Query(QueryArgs),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Collect(_) => "collect",
            Command::Supervise(_) => "supervise",
            Command::Query(_) => "query",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CollectArgs {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "OPEN_EYES_CONFIG")]
    pub config: Option<String>,

    /// Keep records in memory instead of writing to the database
    #[arg(long)]
    pub dry_run: bool,

    /// Exit non-zero when any source fails
    #[arg(long)]
    pub fail_on_error: bool,
}

impl CollectArgs {
    /// Arguments that reproduce these options for a `collect` child process.
    pub fn to_child_args(&self, log_dir: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(config) = &self.config {
            args.extend(["--config".to_string(), config.clone()]);
        }
        if self.dry_run {
            args.push("--dry-run".to_string());
        }
        if self.fail_on_error {
            args.push("--fail-on-error".to_string());
        }
        if let Some(dir) = log_dir {
            args.extend(["--log-dir".to_string(), dir.to_string()]);
        }
        args
    }
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Path to the YAML configuration file (for `storage`)
    #[arg(short, long, env = "OPEN_EYES_CONFIG")]
    pub config: Option<String>,

    /// Relative window ending now: `<N>d` or `<N>w`
    #[arg(short, long, conflicts_with_all = ["start", "end"])]
    pub duration: Option<String>,

    /// Window start date, `YYYY-MM-DD` (exclusive)
    #[arg(short, long, requires = "end")]
    pub start: Option<String>,

    /// Window end date, `YYYY-MM-DD` (inclusive)
    #[arg(short, long, requires = "start")]
    pub end: Option<String>,

    /// Comma-separated record types to keep
    #[arg(short = 't', long = "type")]
    pub kinds: Option<String>,

    /// Output file; stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
