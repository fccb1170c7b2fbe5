use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{Instrument, debug, info, info_span, warn};

use crate::execution::{OutputMode, ProcessExecutor, ProcessSpawnRequest, spawn_validated};
use crate::models::{
    CoreError, CoreErrorKind, InputFile, LaunchReport, Stage, StageOutcome, TaskId, TaskReport,
};
use crate::orchestration::{
    CancellationMode, ConcurrencyLimit, InMemoryAsyncTaskQueue, LaunchPlan, OrchestrationResult,
    TaskCancellationToken, TaskOperation, TaskSubmission,
};
use crate::prodigal::ProdigalTool;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchConfig {
    pub tool: ProdigalTool,
    pub concurrency: ConcurrencyLimit,
    pub stage_timeout: Option<Duration>,
    pub output: OutputMode,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            tool: ProdigalTool::default(),
            concurrency: ConcurrencyLimit::default(),
            stage_timeout: None,
            output: OutputMode::Discard,
        }
    }
}

/// Starts one train-then-call task per input file.
pub struct Launcher {
    executor: Arc<dyn ProcessExecutor>,
    config: LaunchConfig,
}

impl Launcher {
    pub fn new(executor: Arc<dyn ProcessExecutor>, config: LaunchConfig) -> Self {
        Self { executor, config }
    }

    /// Submits every input and returns as soon as all tasks are scheduled.
    /// Nothing here waits on a task; use [`LaunchHandle::join`] for that.
    pub async fn launch(&self, plan: &LaunchPlan) -> OrchestrationResult<LaunchHandle> {
        for (prefix, inputs) in plan.prefix_collisions() {
            warn!(
                prefix = %prefix.display(),
                inputs = ?inputs,
                "inputs share an output prefix; later tasks overwrite earlier outputs"
            );
        }

        let queue = InMemoryAsyncTaskQueue::with_limit(self.config.concurrency);
        let mut tasks = Vec::with_capacity(plan.inputs.len());

        for input in &plan.inputs {
            let stages = Arc::new(Mutex::new(StageLog::default()));
            let operation = self.task_operation(input.clone(), plan, stages.clone());
            let task_id = queue
                .spawn(TaskSubmission::new(&input.path), operation)
                .await?;

            debug!(
                task_id = task_id.0,
                input = %input.path.display(),
                prefix = %input.prefix.display(),
                "task submitted"
            );

            tasks.push(LaunchedTask {
                id: task_id,
                input: input.clone(),
                stages,
            });
        }

        info!(
            tasks = tasks.len(),
            working_dir = %plan.working_dir.display(),
            "launched"
        );

        Ok(LaunchHandle {
            queue,
            working_dir: plan.working_dir.clone(),
            tasks,
        })
    }

    fn task_operation(
        &self,
        input: InputFile,
        plan: &LaunchPlan,
        stages: Arc<Mutex<StageLog>>,
    ) -> TaskOperation {
        let executor = self.executor.clone();
        let config = self.config.clone();
        let working_dir = plan.working_dir.clone();

        Box::new(move |task_id, token| {
            let span = info_span!(
                "task",
                task_id = task_id.0,
                input = %input.path.display()
            );
            Box::pin(
                async move {
                    run_task(
                        executor.as_ref(),
                        &config,
                        &input,
                        &working_dir,
                        task_id,
                        &token,
                        &stages,
                    )
                    .await
                }
                .instrument(span),
            ) as Pin<Box<dyn Future<Output = OrchestrationResult<()>> + Send>>
        })
    }
}

async fn run_task(
    executor: &dyn ProcessExecutor,
    config: &LaunchConfig,
    input: &InputFile,
    working_dir: &Path,
    task_id: TaskId,
    token: &TaskCancellationToken,
    stages: &Mutex<StageLog>,
) -> OrchestrationResult<()> {
    let mut failures = Vec::new();

    for stage in [Stage::Train, Stage::Call] {
        if token.is_cancelled() {
            return Err(CoreError::new(
                CoreErrorKind::Cancelled,
                format!("cancelled before {stage} stage"),
            )
            .for_task(task_id)
            .for_stage(stage));
        }

        let mut request = config
            .tool
            .request(Some(task_id), stage, input, working_dir)
            .output(config.output);
        if let Some(timeout) = config.stage_timeout {
            request = request.timeout(timeout);
        }

        // The call stage runs whatever the train stage produced; its exit
        // status does not gate the second invocation.
        let outcome = run_stage(executor, request).await;
        if !outcome.is_success() {
            failures.push(format!("{stage} stage {}", outcome.describe()));
        }
        record_outcome(stages, task_id, stage, outcome)?;
    }

    if failures.is_empty() {
        debug!("task completed");
        return Ok(());
    }

    let message = failures.join("; ");
    warn!(failure = %message, "task failed");
    Err(CoreError::new(CoreErrorKind::ProcessFailure, message).for_task(task_id))
}

async fn run_stage(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> StageOutcome {
    let stage = request.stage;
    let process = match spawn_validated(executor, request) {
        Ok(process) => process,
        Err(error) => {
            debug!(stage = %stage, error = %error.message, "stage did not start");
            return StageOutcome::Failed {
                message: error.message,
            };
        }
    };

    let outcome = match process.wait().await {
        Ok(output) => StageOutcome::from(output.status),
        Err(error) if error.kind == CoreErrorKind::Timeout => StageOutcome::TimedOut,
        Err(error) => StageOutcome::Failed {
            message: error.message,
        },
    };

    debug!(stage = %stage, outcome = ?outcome, "stage finished");
    outcome
}

#[derive(Debug, Default)]
struct StageLog {
    train: Option<StageOutcome>,
    call: Option<StageOutcome>,
}

impl StageLog {
    fn record(&mut self, stage: Stage, outcome: StageOutcome) {
        match stage {
            Stage::Train => self.train = Some(outcome),
            Stage::Call => self.call = Some(outcome),
        }
    }
}

fn record_outcome(
    stages: &Mutex<StageLog>,
    task_id: TaskId,
    stage: Stage,
    outcome: StageOutcome,
) -> OrchestrationResult<()> {
    let mut log = stages.lock().map_err(|_| poisoned_log(task_id))?;
    log.record(stage, outcome);
    Ok(())
}

fn stage_outcomes(
    stages: &Mutex<StageLog>,
    task_id: TaskId,
) -> OrchestrationResult<(Option<StageOutcome>, Option<StageOutcome>)> {
    let log = stages.lock().map_err(|_| poisoned_log(task_id))?;
    Ok((log.train.clone(), log.call.clone()))
}

fn poisoned_log(task_id: TaskId) -> CoreError {
    CoreError::new(
        CoreErrorKind::Internal,
        format!("stage log for task '{task_id}' is poisoned"),
    )
    .for_task(task_id)
}

struct LaunchedTask {
    id: TaskId,
    input: InputFile,
    stages: Arc<Mutex<StageLog>>,
}

/// The running fan-out. Dropping it leaves tasks running on the runtime.
pub struct LaunchHandle {
    queue: InMemoryAsyncTaskQueue,
    working_dir: PathBuf,
    tasks: Vec<LaunchedTask>,
}

impl LaunchHandle {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|task| task.id).collect()
    }

    pub fn queue(&self) -> &InMemoryAsyncTaskQueue {
        &self.queue
    }

    pub async fn cancel_all(&self, mode: CancellationMode) -> OrchestrationResult<()> {
        self.queue.cancel_all(mode).await
    }

    /// Waits for every task to reach a terminal state and summarizes them.
    /// Task failures are part of the report, never an `Err`.
    pub async fn join(&self) -> OrchestrationResult<LaunchReport> {
        let mut reports = Vec::with_capacity(self.tasks.len());

        for task in &self.tasks {
            let snapshot = self.queue.wait_for_terminal(task.id, None).await?;
            let (train, call) = stage_outcomes(&task.stages, task.id)?;
            let elapsed_ms = match (snapshot.started_at, snapshot.finished_at) {
                (Some(started), Some(finished)) => finished
                    .duration_since(started)
                    .ok()
                    .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
                _ => None,
            };

            reports.push(TaskReport {
                task_id: task.id,
                input: task.input.path.clone(),
                prefix: task.input.prefix.clone(),
                status: snapshot.status,
                train,
                call,
                error: snapshot.error_message,
                elapsed_ms,
            });
        }

        Ok(LaunchReport {
            working_dir: self.working_dir.clone(),
            tasks: reports,
        })
    }
}
