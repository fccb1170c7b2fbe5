use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use prodmt_core::orchestration::DEFAULT_MAX_CONCURRENT_TASKS;
use prodmt_core::prodigal::PRODIGAL_COMMAND;

#[derive(Debug, Parser)]
#[command(
    name = "prodigal-multi",
    version,
    about = "Train Prodigal on each input file and call genes with the trained model"
)]
pub struct CliArgs {
    /// Input sequence files; one train-and-call task runs per file
    #[arg(value_name = "FILE")]
    pub files: Vec<PathBuf>,

    /// Prodigal executable to invoke
    #[arg(long, env = "PRODMT_PRODIGAL", default_value = PRODIGAL_COMMAND)]
    pub prodigal: PathBuf,

    /// Maximum number of tasks running at once (0 = one per file, no cap)
    #[arg(short, long, env = "PRODMT_JOBS", default_value_t = DEFAULT_MAX_CONCURRENT_TASKS)]
    pub jobs: usize,

    /// Kill a Prodigal stage that runs longer than this many seconds
    #[arg(long, env = "PRODMT_TIMEOUT", value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    /// Let Prodigal write to this terminal instead of discarding its output
    #[arg(long, default_value_t = false)]
    pub show_tool_output: bool,

    /// Directory Prodigal runs in (default: the directory holding this program)
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Write a JSON summary of every task to this path ("-" for stdout)
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Exit non-zero when any task failed
    #[arg(long, default_value_t = false)]
    pub strict: bool,

    /// Increase log verbosity (-v warn, -vv info, -vvv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number of seconds"))?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(format!("timeout must be greater than zero, got {value}"));
    }
    Ok(Duration::from_secs_f64(seconds))
}
