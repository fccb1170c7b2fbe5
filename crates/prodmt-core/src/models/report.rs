use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;

use crate::execution::ProcessExitStatus;
use crate::models::{TaskId, TaskStatus};

/// What one external invocation amounted to. Kept for logs and the report;
/// never raised as an error.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    Exited { code: i32 },
    Terminated,
    TimedOut,
    Failed { message: String },
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited { code: 0 })
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Exited { code } => format!("exited with code {code}"),
            Self::Terminated => "was terminated by signal".to_string(),
            Self::TimedOut => "timed out".to_string(),
            Self::Failed { message } => format!("failed: {message}"),
        }
    }
}

impl From<ProcessExitStatus> for StageOutcome {
    fn from(status: ProcessExitStatus) -> Self {
        match status {
            ProcessExitStatus::ExitCode(code) => Self::Exited { code },
            ProcessExitStatus::Terminated => Self::Terminated,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub input: PathBuf,
    pub prefix: PathBuf,
    pub status: TaskStatus,
    pub train: Option<StageOutcome>,
    pub call: Option<StageOutcome>,
    pub error: Option<String>,
    pub elapsed_ms: Option<u64>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LaunchReport {
    pub working_dir: PathBuf,
    pub tasks: Vec<TaskReport>,
}

impl LaunchReport {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks
            .iter()
            .filter(|task| task.status == status)
            .count()
    }

    pub fn all_completed(&self) -> bool {
        self.tasks
            .iter()
            .all(|task| task.status == TaskStatus::Completed)
    }

    pub fn write_json(&self, writer: impl Write) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(writer, self)
    }
}
