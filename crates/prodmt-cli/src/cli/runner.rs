use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use prodmt_core::execution::{OutputMode, TokioProcessExecutor};
use prodmt_core::models::{LaunchReport, TaskStatus};
use prodmt_core::orchestration::{
    CancellationMode, ConcurrencyLimit, LaunchConfig, LaunchPlan, Launcher,
};
use prodmt_core::prodigal::ProdigalTool;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use super::args::CliArgs;
use super::errors::AppError;

pub fn run(args: CliArgs) -> Result<ExitCode, AppError> {
    init_logging(args.verbose);

    let current_dir = std::env::current_dir().map_err(AppError::CurrentDir)?;
    let program = invocation_path()?;
    let mut plan = LaunchPlan::new(&program, &args.files, &current_dir);
    if let Some(workdir) = &args.workdir {
        plan = plan.with_working_dir(resolve_workdir(workdir)?);
    }
    debug!(
        program = %plan.program.display(),
        working_dir = %plan.working_dir.display(),
        inputs = plan.inputs.len(),
        "resolved launch plan"
    );

    let config = launch_config(&args);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(AppError::Runtime)?;
    let report = runtime.block_on(launch_and_join(config, &plan))?;

    info!(
        completed = report.count(TaskStatus::Completed),
        failed = report.count(TaskStatus::Failed),
        cancelled = report.count(TaskStatus::Cancelled),
        "all tasks finished"
    );

    if let Some(path) = &args.report {
        write_report(&report, path)?;
    }

    Ok(exit_code(&report, args.strict))
}

async fn launch_and_join(config: LaunchConfig, plan: &LaunchPlan) -> Result<LaunchReport, AppError> {
    let launcher = Launcher::new(Arc::new(TokioProcessExecutor), config);
    let handle = launcher.launch(plan).await?;

    // Children run in their own process groups, so an interrupt has to be
    // forwarded by cancelling the tasks that own them.
    let report = tokio::select! {
        report = handle.join() => report?,
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("interrupted; stopping running Prodigal processes");
            handle.cancel_all(CancellationMode::Immediate).await?;
            handle.join().await?
        }
    };

    Ok(report)
}

fn launch_config(args: &CliArgs) -> LaunchConfig {
    LaunchConfig {
        tool: ProdigalTool::new(&args.prodigal),
        concurrency: ConcurrencyLimit::from_jobs(args.jobs),
        stage_timeout: args.timeout,
        output: if args.show_tool_output {
            OutputMode::Inherit
        } else {
            OutputMode::Discard
        },
    }
}

/// The program path as invoked, falling back to the running executable when
/// it was found through `PATH` and `argv[0]` carries no directory.
fn invocation_path() -> Result<PathBuf, AppError> {
    match std::env::args_os().next().map(PathBuf::from) {
        Some(path) if path.components().count() > 1 => Ok(path),
        _ => std::env::current_exe().map_err(AppError::CurrentExe),
    }
}

fn resolve_workdir(workdir: &Path) -> Result<PathBuf, AppError> {
    let resolved = workdir.canonicalize().map_err(|source| AppError::Workdir {
        path: workdir.to_path_buf(),
        source,
    })?;
    if !resolved.is_dir() {
        return Err(AppError::WorkdirNotADirectory { path: resolved });
    }
    Ok(resolved)
}

fn write_report(report: &LaunchReport, path: &Path) -> Result<(), AppError> {
    let report_error = |source: std::io::Error| AppError::Report {
        path: path.to_path_buf(),
        source,
    };

    if path == Path::new("-") {
        let mut stdout = std::io::stdout().lock();
        report.write_json(&mut stdout)?;
        writeln!(stdout).map_err(report_error)?;
        return Ok(());
    }

    let mut writer = BufWriter::new(File::create(path).map_err(report_error)?);
    report.write_json(&mut writer)?;
    writer.flush().map_err(report_error)?;
    Ok(())
}

/// Task outcomes only affect the exit status under `--strict`.
fn exit_code(report: &LaunchReport, strict: bool) -> ExitCode {
    if strict && !report.all_completed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::process::ExitCode;
    use std::time::Duration;

    use clap::Parser;
    use prodmt_core::execution::OutputMode;
    use prodmt_core::models::{LaunchReport, TaskId, TaskReport, TaskStatus};
    use prodmt_core::orchestration::ConcurrencyLimit;

    use super::{exit_code, launch_config, resolve_workdir, write_report};
    use crate::cli::CliArgs;
    use crate::cli::errors::AppError;

    fn report(statuses: &[TaskStatus]) -> LaunchReport {
        LaunchReport {
            working_dir: PathBuf::from("/work"),
            tasks: statuses
                .iter()
                .enumerate()
                .map(|(i, status)| TaskReport {
                    task_id: TaskId(i as u64),
                    input: PathBuf::from(format!("g{i}.fasta")),
                    prefix: PathBuf::from(format!("g{i}")),
                    status: *status,
                    train: None,
                    call: None,
                    error: None,
                    elapsed_ms: None,
                })
                .collect(),
        }
    }

    #[test]
    fn failures_do_not_change_exit_status_unless_strict() {
        let mixed = report(&[TaskStatus::Completed, TaskStatus::Failed]);

        assert_eq!(exit_code(&mixed, false), ExitCode::SUCCESS);
        assert_eq!(exit_code(&mixed, true), ExitCode::FAILURE);
        assert_eq!(
            exit_code(&report(&[TaskStatus::Completed]), true),
            ExitCode::SUCCESS
        );
    }

    #[test]
    fn args_map_onto_launch_config() {
        let args = CliArgs::try_parse_from([
            "prodigal-multi",
            "--prodigal",
            "/opt/prodigal",
            "--jobs",
            "0",
            "--timeout",
            "90",
            "--show-tool-output",
        ])
        .unwrap();

        let config = launch_config(&args);
        assert_eq!(config.tool.program(), Path::new("/opt/prodigal"));
        assert_eq!(config.concurrency, ConcurrencyLimit::Unbounded);
        assert_eq!(config.stage_timeout, Some(Duration::from_secs(90)));
        assert_eq!(config.output, OutputMode::Inherit);
    }

    #[test]
    fn default_args_discard_tool_output_and_cap_jobs() {
        let args = CliArgs::try_parse_from(["prodigal-multi", "a.fasta"]).unwrap();
        let config = launch_config(&args);

        assert_eq!(config.concurrency, ConcurrencyLimit::Bounded(10));
        assert_eq!(config.output, OutputMode::Discard);
    }

    #[test]
    fn workdir_must_exist_and_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "").unwrap();

        assert!(resolve_workdir(dir.path()).is_ok());
        assert!(matches!(
            resolve_workdir(&file),
            Err(AppError::WorkdirNotADirectory { .. })
        ));
        assert!(matches!(
            resolve_workdir(&dir.path().join("missing")),
            Err(AppError::Workdir { .. })
        ));
    }

    #[test]
    fn report_file_is_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        write_report(&report(&[TaskStatus::Failed]), &path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["working_dir"], "/work");
        assert_eq!(json["tasks"][0]["status"], "failed");
    }
}
