use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::sync::Semaphore;

use prodmt_core::execution::{
    ExecutionResult, OutputMode, ProcessExecutor, ProcessExitStatus, ProcessOutput,
    ProcessSpawnRequest, ProcessTerminationMode, ProcessWaitFuture, RunningProcess,
};
use prodmt_core::models::{CoreError, CoreErrorKind, Stage, StageOutcome, TaskId, TaskStatus};
use prodmt_core::orchestration::{
    CancellationMode, ConcurrencyLimit, LaunchConfig, LaunchPlan, Launcher,
};
use prodmt_core::prodigal::ProdigalTool;

/// Records every request and holds each process open until the gate opens.
#[derive(Clone)]
struct RecordingExecutor {
    calls: Arc<Mutex<Vec<ProcessSpawnRequest>>>,
    gate: Arc<Semaphore>,
    failing: Vec<(OsString, Stage)>,
    refuse_spawn: bool,
}

impl RecordingExecutor {
    fn open() -> Self {
        let executor = Self::closed();
        executor.release();
        executor
    }

    fn closed() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            gate: Arc::new(Semaphore::new(0)),
            failing: Vec::new(),
            refuse_spawn: false,
        }
    }

    fn failing(mut self, input: &str, stage: Stage) -> Self {
        self.failing.push((OsString::from(input), stage));
        self
    }

    fn release(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    fn calls(&self) -> Vec<ProcessSpawnRequest> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn calls_for(&self, stage: Stage) -> usize {
        self.calls()
            .iter()
            .filter(|request| request.stage == stage)
            .count()
    }
}

struct GatedProcess {
    gate: Arc<Semaphore>,
    status: ProcessExitStatus,
}

impl RunningProcess for GatedProcess {
    fn pid(&self) -> Option<u32> {
        Some(1)
    }

    fn terminate(&self, _mode: ProcessTerminationMode) -> ExecutionResult<()> {
        Ok(())
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        Box::pin(async move {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| CoreError::new(CoreErrorKind::Internal, "gate closed"))?;
            let now = SystemTime::now();
            Ok(ProcessOutput {
                status: self.status,
                stdout: Vec::new(),
                stderr: Vec::new(),
                started_at: now,
                finished_at: now,
            })
        })
    }
}

impl ProcessExecutor for RecordingExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        if self.refuse_spawn {
            return Err(CoreError::new(
                CoreErrorKind::ProcessFailure,
                "failed to spawn 'prodigal': No such file or directory",
            )
            .for_stage(request.stage));
        }

        let fails = self.failing.iter().any(|(input, stage)| {
            *stage == request.stage
                && request
                    .command
                    .args
                    .iter()
                    .any(|arg| Path::new(arg).file_name() == Some(input.as_os_str()))
        });
        let status = if fails {
            ProcessExitStatus::ExitCode(1)
        } else {
            ProcessExitStatus::ExitCode(0)
        };

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request);
        }

        Ok(Box::new(GatedProcess {
            gate: self.gate.clone(),
            status,
        }))
    }
}

fn plan(files: &[&str]) -> LaunchPlan {
    let mut argv = vec!["/opt/prodmt/bin/prodigal-multi"];
    argv.extend_from_slice(files);
    LaunchPlan::from_argv(argv, Path::new("/data")).expect("argv should parse")
}

fn launcher(executor: &RecordingExecutor, concurrency: ConcurrencyLimit) -> Launcher {
    Launcher::new(
        Arc::new(executor.clone()),
        LaunchConfig {
            concurrency,
            ..LaunchConfig::default()
        },
    )
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn launch_starts_one_task_per_input_without_waiting() {
    let executor = RecordingExecutor::closed();
    let plan = plan(&["a.fasta", "b.fasta", "c.fasta"]);

    let handle = launcher(&executor, ConcurrencyLimit::Unbounded)
        .launch(&plan)
        .await
        .expect("launch should succeed");

    assert_eq!(handle.task_count(), 3);
    settle().await;

    for task in handle.task_ids() {
        assert_eq!(
            handle.queue().status(task).await.unwrap(),
            TaskStatus::Running
        );
    }
    assert_eq!(executor.calls_for(Stage::Train), 3);
    assert_eq!(executor.calls_for(Stage::Call), 0);

    executor.release();
    let report = handle.join().await.expect("join should succeed");

    assert_eq!(report.tasks.len(), 3);
    assert!(report.all_completed());
    assert_eq!(executor.calls_for(Stage::Call), 3);
}

#[tokio::test]
async fn call_stage_follows_train_stage_within_each_task() {
    let executor = RecordingExecutor::open();
    let plan = plan(&["a.fasta", "b.fasta"]);

    let handle = launcher(&executor, ConcurrencyLimit::Unbounded)
        .launch(&plan)
        .await
        .unwrap();
    handle.join().await.unwrap();

    for task in handle.task_ids() {
        let stages: Vec<Stage> = executor
            .calls()
            .iter()
            .filter(|request| request.task_id == Some(task))
            .map(|request| request.stage)
            .collect();
        assert_eq!(stages, vec![Stage::Train, Stage::Call]);
    }
}

#[tokio::test]
async fn requests_run_in_the_program_directory_with_discarded_output() {
    let executor = RecordingExecutor::open();
    let plan = plan(&["genomes/a.fasta"]);

    let handle = launcher(&executor, ConcurrencyLimit::default())
        .launch(&plan)
        .await
        .unwrap();
    handle.join().await.unwrap();

    let calls = executor.calls();
    assert_eq!(calls.len(), 2);
    for request in &calls {
        assert_eq!(
            request.command.working_dir,
            Some(PathBuf::from("/opt/prodmt/bin"))
        );
        assert_eq!(request.output, OutputMode::Discard);
        assert_eq!(request.command.program, PathBuf::from("prodigal"));
        assert!(request.timeout.is_none());
    }
    assert!(
        calls[0]
            .command
            .args
            .contains(&OsString::from("genomes/a.ptrain"))
    );
    assert!(
        calls[1]
            .command
            .args
            .contains(&OsString::from("genomes/a.faa"))
    );
    assert!(
        calls[1]
            .command
            .args
            .contains(&OsString::from("/data/genomes/a.fasta"))
    );
}

#[tokio::test]
async fn zero_inputs_start_no_tasks() {
    let executor = RecordingExecutor::open();
    let plan = plan(&[]);

    let handle = launcher(&executor, ConcurrencyLimit::default())
        .launch(&plan)
        .await
        .unwrap();

    assert_eq!(handle.task_count(), 0);
    let report = handle.join().await.unwrap();
    assert!(report.tasks.is_empty());
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn failing_train_stage_still_runs_call_and_is_only_reported() {
    let executor = RecordingExecutor::open().failing("bad.fasta", Stage::Train);
    let plan = plan(&["good.fasta", "bad.fasta"]);

    let handle = launcher(&executor, ConcurrencyLimit::default())
        .launch(&plan)
        .await
        .unwrap();
    let report = handle.join().await.expect("task failures must not fail the join");

    let good = &report.tasks[0];
    let bad = &report.tasks[1];
    assert_eq!(good.status, TaskStatus::Completed);
    assert_eq!(bad.status, TaskStatus::Failed);
    assert_eq!(bad.train, Some(StageOutcome::Exited { code: 1 }));
    assert_eq!(bad.call, Some(StageOutcome::Exited { code: 0 }));
    assert_eq!(
        bad.error.as_deref(),
        Some("train stage exited with code 1")
    );
    assert_eq!(executor.calls_for(Stage::Call), 2);
}

#[tokio::test]
async fn spawn_failures_are_swallowed_into_the_report() {
    let mut executor = RecordingExecutor::open();
    executor.refuse_spawn = true;
    let plan = plan(&["a.fasta"]);

    let handle = launcher(&executor, ConcurrencyLimit::default())
        .launch(&plan)
        .await
        .unwrap();
    let report = handle.join().await.unwrap();

    let task = &report.tasks[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(matches!(task.train, Some(StageOutcome::Failed { .. })));
    assert!(matches!(task.call, Some(StageOutcome::Failed { .. })));
}

#[tokio::test]
async fn bounded_launch_holds_extra_tasks_in_the_queue() {
    let executor = RecordingExecutor::closed();
    let plan = plan(&["a.fasta", "b.fasta", "c.fasta", "d.fasta", "e.fasta"]);

    let handle = launcher(&executor, ConcurrencyLimit::Bounded(2))
        .launch(&plan)
        .await
        .unwrap();
    settle().await;

    assert_eq!(executor.calls_for(Stage::Train), 2);
    let mut queued = 0;
    for task in handle.task_ids() {
        if handle.queue().status(task).await.unwrap() == TaskStatus::Queued {
            queued += 1;
        }
    }
    assert_eq!(queued, 3);

    executor.release();
    let report = handle.join().await.unwrap();
    assert!(report.all_completed());
    assert_eq!(executor.calls().len(), 10);
}

#[tokio::test]
async fn inputs_sharing_a_prefix_write_the_same_outputs() {
    let executor = RecordingExecutor::open();
    let plan = plan(&["x.fasta", "x.fna"]);

    let handle = launcher(&executor, ConcurrencyLimit::Unbounded)
        .launch(&plan)
        .await
        .unwrap();
    let report = handle.join().await.unwrap();

    assert_eq!(report.tasks.len(), 2);
    assert_eq!(report.tasks[0].prefix, report.tasks[1].prefix);
    let training_files: Vec<OsString> = executor
        .calls()
        .iter()
        .filter(|request| request.stage == Stage::Train)
        .map(|request| request.command.args[1].clone())
        .collect();
    assert_eq!(
        training_files,
        vec![OsString::from("x.ptrain"), OsString::from("x.ptrain")]
    );
}

#[tokio::test]
async fn stage_timeout_and_output_mode_flow_into_requests() {
    let executor = RecordingExecutor::open();
    let plan = plan(&["a.fasta"]);
    let launcher = Launcher::new(
        Arc::new(executor.clone()),
        LaunchConfig {
            tool: ProdigalTool::new("/usr/local/bin/prodigal"),
            concurrency: ConcurrencyLimit::Bounded(1),
            stage_timeout: Some(Duration::from_secs(600)),
            output: OutputMode::Inherit,
        },
    );

    launcher.launch(&plan).await.unwrap().join().await.unwrap();

    for request in executor.calls() {
        assert_eq!(request.timeout, Some(Duration::from_secs(600)));
        assert_eq!(request.output, OutputMode::Inherit);
        assert_eq!(
            request.command.program,
            PathBuf::from("/usr/local/bin/prodigal")
        );
    }
}

#[tokio::test]
async fn cancel_all_marks_unfinished_tasks_cancelled() {
    let executor = RecordingExecutor::closed();
    let plan = plan(&["a.fasta", "b.fasta"]);

    let handle = launcher(&executor, ConcurrencyLimit::Bounded(1))
        .launch(&plan)
        .await
        .unwrap();
    settle().await;

    handle
        .cancel_all(CancellationMode::Immediate)
        .await
        .unwrap();
    let report = handle.join().await.unwrap();

    assert_eq!(report.count(TaskStatus::Cancelled), 2);
    assert_eq!(executor.calls_for(Stage::Call), 0);
    assert_eq!(report.tasks[0].task_id, TaskId(0));
}
