pub mod launcher;
pub mod plan;
pub mod runtime_queue;

pub use launcher::{LaunchConfig, LaunchHandle, Launcher};
pub use plan::LaunchPlan;
pub use runtime_queue::{
    InMemoryAsyncTaskQueue, TaskCancellationToken, TaskOperation, TaskRuntimeSnapshot,
};

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::models::CoreError;

pub type OrchestrationResult<T> = Result<T, CoreError>;

/// Task limit used when no `--jobs` value is given.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 10;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskSubmission {
    pub input: PathBuf,
    pub requested_at: SystemTime,
}

impl TaskSubmission {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            requested_at: SystemTime::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CancellationMode {
    Immediate,
    Graceful { grace_period: Duration },
}

/// How many tasks may run their external invocations at once.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConcurrencyLimit {
    /// One running task per submission, no cap.
    Unbounded,
    Bounded(usize),
}

impl ConcurrencyLimit {
    /// `0` means unbounded.
    pub fn from_jobs(jobs: usize) -> Self {
        match jobs {
            0 => Self::Unbounded,
            n => Self::Bounded(n),
        }
    }
}

impl Default for ConcurrencyLimit {
    fn default() -> Self {
        Self::Bounded(DEFAULT_MAX_CONCURRENT_TASKS)
    }
}
