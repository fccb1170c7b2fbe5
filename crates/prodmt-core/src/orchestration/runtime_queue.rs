use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::AbortHandle;
use tokio::time::timeout;

use crate::models::{CoreError, CoreErrorKind, TaskId, TaskStatus};
use crate::orchestration::{
    CancellationMode, ConcurrencyLimit, OrchestrationResult, TaskSubmission,
};

pub type TaskOperation = Box<
    dyn FnOnce(
            TaskId,
            TaskCancellationToken,
        ) -> Pin<Box<dyn Future<Output = OrchestrationResult<()>> + Send>>
        + Send,
>;

#[derive(Clone, Debug)]
pub struct TaskCancellationToken {
    flag: Arc<AtomicBool>,
}

impl TaskCancellationToken {
    fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskRuntimeSnapshot {
    pub id: TaskId,
    pub input: PathBuf,
    pub status: TaskStatus,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
    pub error_message: Option<String>,
}

#[derive(Clone)]
pub struct InMemoryAsyncTaskQueue {
    inner: Arc<Mutex<QueueState>>,
    permits: Option<Arc<Semaphore>>,
}

#[derive(Default)]
struct QueueState {
    next_task_id: u64,
    tasks: HashMap<TaskId, TaskRuntimeSnapshot>,
    cancellation_flags: HashMap<TaskId, Arc<AtomicBool>>,
    abort_handles: HashMap<TaskId, AbortHandle>,
    completion_notifiers: HashMap<TaskId, Arc<Notify>>,
}

impl Default for InMemoryAsyncTaskQueue {
    fn default() -> Self {
        Self::with_limit(ConcurrencyLimit::default())
    }
}

impl InMemoryAsyncTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: ConcurrencyLimit) -> Self {
        let permits = match limit {
            ConcurrencyLimit::Unbounded => None,
            // A zero-permit semaphore would park every task forever.
            ConcurrencyLimit::Bounded(n) => Some(Arc::new(Semaphore::new(n.max(1)))),
        };
        Self {
            inner: Arc::new(Mutex::new(QueueState::default())),
            permits,
        }
    }

    /// Schedules `operation` and returns without waiting for it to start.
    pub async fn spawn(
        &self,
        submission: TaskSubmission,
        operation: TaskOperation,
    ) -> OrchestrationResult<TaskId> {
        let (task_id, cancel_flag, completion_notify) = {
            let mut state = self.inner.lock().await;
            let task_id = TaskId(state.next_task_id);
            state.next_task_id = state.next_task_id.saturating_add(1);

            state.tasks.insert(
                task_id,
                TaskRuntimeSnapshot {
                    id: task_id,
                    input: submission.input,
                    status: TaskStatus::Queued,
                    created_at: submission.requested_at,
                    started_at: None,
                    finished_at: None,
                    error_message: None,
                },
            );

            let cancel_flag = Arc::new(AtomicBool::new(false));
            let completion_notify = Arc::new(Notify::new());

            state
                .cancellation_flags
                .insert(task_id, cancel_flag.clone());
            state
                .completion_notifiers
                .insert(task_id, completion_notify.clone());

            (task_id, cancel_flag, completion_notify)
        };

        let inner = self.inner.clone();
        let permits = self.permits.clone();
        let token = TaskCancellationToken::new(cancel_flag);

        // Hold the state lock across the spawn so the abort handle is recorded
        // before the task can reach `finalize_cleanup`.
        let mut state = self.inner.lock().await;
        let join_handle = tokio::spawn(async move {
            let _permit = match permits {
                Some(semaphore) => match semaphore.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        set_terminal(
                            &inner,
                            task_id,
                            TaskStatus::Failed,
                            Some("task queue was closed".to_string()),
                        )
                        .await;
                        finalize_cleanup(&inner, task_id, &completion_notify).await;
                        return;
                    }
                },
                None => None,
            };

            if !set_running_if_possible(&inner, task_id).await {
                finalize_cleanup(&inner, task_id, &completion_notify).await;
                return;
            }

            if token.is_cancelled() {
                set_cancelled_terminal(&inner, task_id, None).await;
                finalize_cleanup(&inner, task_id, &completion_notify).await;
                return;
            }

            let outcome = operation(task_id, token.clone()).await;
            match outcome {
                // Work that ran to the end counts as done even if a graceful
                // cancel arrived meanwhile.
                Ok(()) => {
                    set_terminal(&inner, task_id, TaskStatus::Completed, None).await;
                }
                Err(error) => {
                    if token.is_cancelled() || error.kind == CoreErrorKind::Cancelled {
                        set_cancelled_terminal(&inner, task_id, Some(error.message)).await;
                    } else {
                        set_terminal(&inner, task_id, TaskStatus::Failed, Some(error.message))
                            .await;
                    }
                }
            }

            finalize_cleanup(&inner, task_id, &completion_notify).await;
        });

        state
            .abort_handles
            .insert(task_id, join_handle.abort_handle());

        Ok(task_id)
    }

    pub async fn snapshot(&self, task_id: TaskId) -> OrchestrationResult<TaskRuntimeSnapshot> {
        let state = self.inner.lock().await;
        state
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| task_lookup_error(task_id))
    }

    pub async fn status(&self, task_id: TaskId) -> OrchestrationResult<TaskStatus> {
        Ok(self.snapshot(task_id).await?.status)
    }

    pub async fn task_ids(&self) -> Vec<TaskId> {
        let state = self.inner.lock().await;
        let mut ids: Vec<TaskId> = state.tasks.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn cancel(&self, task_id: TaskId, mode: CancellationMode) -> OrchestrationResult<()> {
        let (abort_handle, notify, prior_status) = {
            let mut state = self.inner.lock().await;
            let prior_status = state
                .tasks
                .get(&task_id)
                .map(|task| task.status)
                .ok_or_else(|| task_lookup_error(task_id))?;
            if prior_status.is_terminal() {
                return Ok(());
            }

            if let Some(cancel_flag) = state.cancellation_flags.get(&task_id) {
                cancel_flag.store(true, Ordering::SeqCst);
            }

            if prior_status == TaskStatus::Queued
                && let Some(task) = state.tasks.get_mut(&task_id)
            {
                task.status = TaskStatus::Cancelled;
                task.finished_at = Some(SystemTime::now());
            }

            let abort_handle = state.abort_handles.get(&task_id).cloned();
            let notify = state
                .completion_notifiers
                .get(&task_id)
                .cloned()
                .ok_or_else(|| task_lookup_error(task_id))?;

            (abort_handle, notify, prior_status)
        };

        let mut force_cancelled_state = false;
        match mode {
            CancellationMode::Immediate => {
                if let Some(handle) = abort_handle {
                    handle.abort();
                }
                force_cancelled_state = true;
            }
            CancellationMode::Graceful { grace_period } => {
                if prior_status == TaskStatus::Running {
                    let wait = notify.notified();
                    if timeout(grace_period, wait).await.is_err()
                        && let Some(handle) = abort_handle
                    {
                        handle.abort();
                        force_cancelled_state = true;
                    }
                } else if prior_status == TaskStatus::Queued {
                    if let Some(handle) = abort_handle {
                        handle.abort();
                    }
                    force_cancelled_state = true;
                }
            }
        }

        if force_cancelled_state {
            self.force_mark_cancelled(task_id).await;
        }

        Ok(())
    }

    pub async fn cancel_all(&self, mode: CancellationMode) -> OrchestrationResult<()> {
        for task_id in self.task_ids().await {
            self.cancel(task_id, mode).await?;
        }
        Ok(())
    }

    pub async fn wait_for_terminal(
        &self,
        task_id: TaskId,
        timeout_duration: Option<std::time::Duration>,
    ) -> OrchestrationResult<TaskRuntimeSnapshot> {
        loop {
            let notify = {
                let state = self.inner.lock().await;
                state
                    .completion_notifiers
                    .get(&task_id)
                    .cloned()
                    .ok_or_else(|| task_lookup_error(task_id))?
            };

            // Register interest before re-reading the status so a completion
            // landing in between still wakes this waiter.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let snapshot = self.snapshot(task_id).await?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }

            if let Some(duration) = timeout_duration {
                timeout(duration, notified).await.map_err(|_| {
                    CoreError::new(
                        CoreErrorKind::Timeout,
                        format!("timed out waiting for task '{}' to complete", task_id.0),
                    )
                    .for_task(task_id)
                })?;
            } else {
                notified.await;
            }
        }
    }
}

impl InMemoryAsyncTaskQueue {
    async fn force_mark_cancelled(&self, task_id: TaskId) {
        let notify = {
            let mut state = self.inner.lock().await;
            if let Some(task) = state.tasks.get_mut(&task_id)
                && !task.status.is_terminal()
            {
                task.status = TaskStatus::Cancelled;
                task.finished_at = Some(SystemTime::now());
            }

            state.abort_handles.remove(&task_id);
            state.cancellation_flags.remove(&task_id);
            state.completion_notifiers.get(&task_id).cloned()
        };

        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }
}

async fn set_running_if_possible(inner: &Arc<Mutex<QueueState>>, task_id: TaskId) -> bool {
    let mut state = inner.lock().await;
    let Some(task) = state.tasks.get_mut(&task_id) else {
        return false;
    };
    if task.status.is_terminal() {
        return false;
    }
    task.status = TaskStatus::Running;
    task.started_at = Some(SystemTime::now());
    true
}

async fn set_terminal(
    inner: &Arc<Mutex<QueueState>>,
    task_id: TaskId,
    status: TaskStatus,
    error_message: Option<String>,
) {
    let mut state = inner.lock().await;
    if let Some(task) = state.tasks.get_mut(&task_id) {
        task.status = status;
        task.finished_at = Some(SystemTime::now());
        task.error_message = error_message;
    }
}

async fn set_cancelled_terminal(
    inner: &Arc<Mutex<QueueState>>,
    task_id: TaskId,
    error_message: Option<String>,
) {
    set_terminal(inner, task_id, TaskStatus::Cancelled, error_message).await;
}

async fn finalize_cleanup(inner: &Arc<Mutex<QueueState>>, task_id: TaskId, notify: &Arc<Notify>) {
    {
        let mut state = inner.lock().await;
        state.abort_handles.remove(&task_id);
        state.cancellation_flags.remove(&task_id);
    }
    notify.notify_waiters();
}

fn task_lookup_error(task_id: TaskId) -> CoreError {
    CoreError::new(
        CoreErrorKind::InvalidInput,
        format!("unknown task id '{}'", task_id.0),
    )
}
