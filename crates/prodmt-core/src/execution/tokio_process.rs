use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;

use crate::execution::{
    ExecutionResult, OutputMode, ProcessExecutor, ProcessExitStatus, ProcessOutput,
    ProcessSpawnRequest, ProcessTerminationMode, ProcessWaitFuture, RunningProcess,
};
use crate::models::{CoreError, CoreErrorKind, Stage, TaskId};

pub struct TokioProcessExecutor;

impl ProcessExecutor for TokioProcessExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        let mut cmd = tokio::process::Command::new(&request.command.program);
        cmd.args(&request.command.args);

        for (key, value) in &request.command.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &request.command.working_dir {
            cmd.current_dir(dir);
        }

        let (stdout, stderr) = match request.output {
            OutputMode::Discard => (Stdio::null(), Stdio::null()),
            OutputMode::Inherit => (Stdio::inherit(), Stdio::inherit()),
            OutputMode::Capture => (Stdio::piped(), Stdio::piped()),
        };
        cmd.stdin(Stdio::null());
        cmd.stdout(stdout);
        cmd.stderr(stderr);
        cmd.process_group(0);
        // Dropping the wait future (task abort) must not leave the tool running.
        cmd.kill_on_drop(true);

        let child = cmd.spawn().map_err(|error| {
            process_failure(
                request.task_id,
                request.stage,
                format!(
                    "failed to spawn '{}': {error}",
                    request.command.program.display()
                ),
            )
        })?;

        let pid = child.id();
        let started_at = SystemTime::now();

        tracing::trace!(
            task_id = request.task_id.map(|id| id.0),
            stage = %request.stage,
            pid,
            program = %request.command.program.display(),
            "spawned process"
        );

        Ok(Box::new(TokioRunningProcess {
            child: Mutex::new(Some(child)),
            pid,
            started_at,
            timeout: request.timeout,
            task_id: request.task_id,
            stage: request.stage,
        }))
    }
}

struct TokioRunningProcess {
    child: Mutex<Option<tokio::process::Child>>,
    pid: Option<u32>,
    started_at: SystemTime,
    timeout: Option<Duration>,
    task_id: Option<TaskId>,
    stage: Stage,
}

impl RunningProcess for TokioRunningProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn terminate(&self, mode: ProcessTerminationMode) -> ExecutionResult<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };

        let signal = match mode {
            ProcessTerminationMode::Immediate => libc::SIGKILL,
            ProcessTerminationMode::Graceful { .. } => libc::SIGTERM,
        };

        if let Err(os_error) = signal_process_group(pid, signal)
            && os_error.raw_os_error() != Some(libc::ESRCH)
        {
            return Err(process_failure(
                self.task_id,
                self.stage,
                format!("failed to send signal {signal} to process group {pid}: {os_error}"),
            ));
        }

        Ok(())
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        let child = self.child.into_inner().ok().flatten();
        let timeout = self.timeout;
        let started_at = self.started_at;
        let task_id = self.task_id;
        let stage = self.stage;
        let pid = self.pid;

        Box::pin(async move {
            let mut child = child.ok_or_else(|| {
                process_failure(task_id, stage, "child process already consumed".to_string())
            })?;

            // Aborting the owning task drops this future; take the whole group
            // down with it, not only the direct child `kill_on_drop` reaches.
            let mut group = GroupKillGuard { pid };

            let stdout_reader = child.stdout.take().map(drain);
            let stderr_reader = child.stderr.take().map(drain);

            let wait_err = |error: std::io::Error| {
                process_failure(task_id, stage, format!("failed to wait for process: {error}"))
            };

            // Wait for exit first, then collect captured output with a short bounded read
            // window; descendants may keep the pipes open after the tool itself exits.
            let status = if let Some(timeout_duration) = timeout {
                match tokio::time::timeout(timeout_duration, child.wait()).await {
                    Ok(result) => result.map_err(wait_err)?,
                    Err(_) => {
                        if let Some(pid) = pid {
                            let _ = signal_process_group(pid, libc::SIGKILL);
                        }
                        let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
                        group.disarm();
                        for reader in [stdout_reader, stderr_reader].into_iter().flatten() {
                            reader.abort();
                        }
                        let mut error = CoreError::new(
                            CoreErrorKind::Timeout,
                            format!(
                                "process timed out after {}ms",
                                timeout_duration.as_millis()
                            ),
                        )
                        .for_stage(stage);
                        error.task = task_id;
                        return Err(error);
                    }
                }
            } else {
                child.wait().await.map_err(wait_err)?
            };

            group.disarm();

            let stdout = collect(stdout_reader).await;
            let stderr = collect(stderr_reader).await;

            let finished_at = SystemTime::now();

            let status = match status.code() {
                Some(code) => ProcessExitStatus::ExitCode(code),
                None => ProcessExitStatus::Terminated,
            };

            Ok(ProcessOutput {
                status,
                stdout,
                stderr,
                started_at,
                finished_at,
            })
        })
    }
}

/// Sends SIGKILL to the process group on drop unless the child was reaped.
struct GroupKillGuard {
    pid: Option<u32>,
}

impl GroupKillGuard {
    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for GroupKillGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.pid.take() {
            let _ = signal_process_group(pid, libc::SIGKILL);
        }
    }
}

fn drain<R>(mut handle: R) -> JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        let _ = handle.read_to_end(&mut buffer).await;
        buffer
    })
}

async fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    let Some(reader) = reader else {
        return Vec::new();
    };

    let read_deadline = Duration::from_millis(250);
    match tokio::time::timeout(read_deadline, reader).await {
        Ok(Ok(buffer)) => buffer,
        _ => Vec::new(),
    }
}

fn signal_process_group(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    let pgid = -(pid as libc::pid_t);
    let result = unsafe { libc::kill(pgid, signal) };
    if result != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn process_failure(task_id: Option<TaskId>, stage: Stage, message: String) -> CoreError {
    let mut error = CoreError::new(CoreErrorKind::ProcessFailure, message).for_stage(stage);
    error.task = task_id;
    error
}
