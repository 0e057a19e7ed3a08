//! Long-running task coordination
//!
//! Batched upstream operations run on detached workers; clients poll by
//! progress token. Each task carries its owning session, counters, a
//! cancellation token, and a human-readable message. Cancellation is
//! cooperative: workers check the token at safe points, and cancelling
//! also cancels the task's context so in-flight waits unwind.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Minimum spacing between external progress notifications per task
const NOTIFY_INTERVAL: Duration = Duration::from_millis(100);
/// Notification channel capacity; sends beyond it are dropped
const NOTIFY_BUFFER: usize = 64;

/// Task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Snapshot of a task's progress
#[derive(Debug, Clone, Serialize)]
pub struct TaskProgress {
    pub status: TaskStatus,
    pub completed: u64,
    pub total: u64,
    pub message: String,
    pub failures: Vec<String>,
}

/// External progress event, delivered best-effort
#[derive(Debug, Clone, Serialize)]
pub struct ProgressNotification {
    pub progress_token: String,
    pub completed: u64,
    pub total: u64,
    pub message: String,
}

struct TaskInner {
    status: TaskStatus,
    completed: u64,
    message: String,
    failures: Vec<String>,
    started_at: Option<Instant>,
    completed_at: Option<Instant>,
    last_notified: Option<Instant>,
}

/// One background task, identified by its progress token
pub struct Task {
    progress_token: String,
    session_id: String,
    total: u64,
    created_at: Instant,
    cancel: CancellationToken,
    inner: Mutex<TaskInner>,
    notifications: mpsc::Sender<ProgressNotification>,
}

impl Task {
    pub fn progress_token(&self) -> &str {
        &self.progress_token
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Token workers select against at suspension points.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Move pending → running.
    pub fn start(&self) {
        let mut inner = self.inner.lock().expect("task mutex");
        if inner.status == TaskStatus::Pending {
            inner.status = TaskStatus::Running;
            inner.started_at = Some(Instant::now());
        }
    }

    /// Update counters and message. Terminal tasks ignore updates; an
    /// external notification goes out at most once per 100 ms, dropped
    /// rather than awaited when the channel is full.
    pub fn update_progress(&self, completed: u64, message: impl Into<String>) {
        let notification = {
            let mut inner = self.inner.lock().expect("task mutex");
            if inner.status.is_terminal() {
                return;
            }
            inner.completed = completed.min(self.total);
            inner.message = message.into();

            let now = Instant::now();
            let due = inner
                .last_notified
                .map_or(true, |last| now.duration_since(last) >= NOTIFY_INTERVAL);
            if !due {
                return;
            }
            inner.last_notified = Some(now);
            ProgressNotification {
                progress_token: self.progress_token.clone(),
                completed: inner.completed,
                total: self.total,
                message: inner.message.clone(),
            }
        };
        // Non-blocking send, drop-if-full.
        let _ = self.notifications.try_send(notification);
    }

    /// Record one failed item without ending the task.
    pub fn record_failure(&self, failure: impl Into<String>) {
        let mut inner = self.inner.lock().expect("task mutex");
        if !inner.status.is_terminal() {
            inner.failures.push(failure.into());
        }
    }

    pub fn complete(&self) {
        self.finish(TaskStatus::Completed, None);
    }

    pub fn fail(&self, error: impl Into<String>) {
        self.finish(TaskStatus::Failed, Some(error.into()));
    }

    /// Cancel a pending or running task. Terminal tasks are unaffected.
    pub fn cancel(&self) {
        {
            let mut inner = self.inner.lock().expect("task mutex");
            if inner.status.is_terminal() {
                return;
            }
            inner.status = TaskStatus::Cancelled;
            inner.completed_at = Some(Instant::now());
        }
        self.cancel.cancel();
        debug!(token = %self.progress_token, "task cancelled");
    }

    fn finish(&self, status: TaskStatus, error: Option<String>) {
        let mut inner = self.inner.lock().expect("task mutex");
        if inner.status.is_terminal() {
            return;
        }
        inner.status = status;
        inner.completed_at = Some(Instant::now());
        if let Some(error) = error {
            inner.message = error.clone();
            inner.failures.push(error);
        }
    }

    pub fn progress(&self) -> TaskProgress {
        let inner = self.inner.lock().expect("task mutex");
        TaskProgress {
            status: inner.status,
            completed: inner.completed,
            total: self.total,
            message: inner.message.clone(),
            failures: inner.failures.clone(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.inner.lock().expect("task mutex").status.is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().expect("task mutex").status == TaskStatus::Cancelled
    }

    /// Wall time from creation to completion, or to now while live.
    pub fn duration(&self) -> Duration {
        let inner = self.inner.lock().expect("task mutex");
        match inner.completed_at {
            Some(done) => done.duration_since(self.created_at),
            None => self.created_at.elapsed(),
        }
    }
}

/// Registry of background tasks keyed by progress token
pub struct TaskManager {
    tasks: RwLock<HashMap<String, Arc<Task>>>,
    notifications: mpsc::Sender<ProgressNotification>,
}

impl TaskManager {
    /// Build the manager plus the receiver its tasks notify.
    pub fn channel() -> (Arc<Self>, mpsc::Receiver<ProgressNotification>) {
        let (tx, rx) = mpsc::channel(NOTIFY_BUFFER);
        (
            Arc::new(Self {
                tasks: RwLock::new(HashMap::new()),
                notifications: tx,
            }),
            rx,
        )
    }

    pub async fn create(
        &self,
        session_id: impl Into<String>,
        progress_token: impl Into<String>,
        total: u64,
    ) -> Arc<Task> {
        let task = Arc::new(Task {
            progress_token: progress_token.into(),
            session_id: session_id.into(),
            total,
            created_at: Instant::now(),
            cancel: CancellationToken::new(),
            inner: Mutex::new(TaskInner {
                status: TaskStatus::Pending,
                completed: 0,
                message: String::new(),
                failures: Vec::new(),
                started_at: None,
                completed_at: None,
                last_notified: None,
            }),
            notifications: self.notifications.clone(),
        });
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.progress_token.clone(), task.clone());
        task
    }

    pub async fn get(&self, progress_token: &str) -> Option<Arc<Task>> {
        self.tasks.read().await.get(progress_token).cloned()
    }

    /// Cancel every live task owned by `session_id`; used on disconnect.
    /// Returns how many tasks were cancelled.
    pub async fn cancel_by_session(&self, session_id: &str) -> usize {
        let tasks = self.tasks.read().await;
        let mut cancelled = 0;
        for task in tasks.values() {
            if task.session_id == session_id && !task.is_complete() {
                task.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(session_id, cancelled, "cancelled tasks for disconnected session");
        }
        cancelled
    }

    /// Cancel everything; used on process shutdown.
    pub async fn cancel_all(&self) {
        let tasks = self.tasks.read().await;
        for task in tasks.values() {
            task.cancel();
        }
    }

    /// Drop finished tasks so the registry stays bounded.
    pub async fn remove_finished(&self) -> usize {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, task| !task.is_complete());
        before - tasks.len()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle_pending_running_completed() {
        let (manager, _rx) = TaskManager::channel();
        let task = manager.create("session-1", "pt-1", 10).await;

        assert_eq!(task.progress().status, TaskStatus::Pending);
        task.start();
        assert_eq!(task.progress().status, TaskStatus::Running);

        task.update_progress(4, "4 of 10");
        let progress = task.progress();
        assert_eq!(progress.completed, 4);
        assert_eq!(progress.message, "4 of 10");

        task.complete();
        assert!(task.is_complete());
        assert!(!task.is_cancelled());
    }

    #[tokio::test]
    async fn test_terminal_states_are_sticky() {
        let (manager, _rx) = TaskManager::channel();
        let task = manager.create("session-1", "pt-1", 10).await;
        task.start();
        task.update_progress(7, "almost");
        task.complete();

        // Late updates and cancels change nothing.
        task.update_progress(9, "late");
        task.cancel();
        let progress = task.progress();
        assert_eq!(progress.status, TaskStatus::Completed);
        assert_eq!(progress.completed, 7);
        assert!(!task.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_from_running() {
        let (manager, _rx) = TaskManager::channel();
        let task = manager.create("session-1", "pt-1", 10).await;
        task.start();
        task.cancel();
        assert!(task.is_cancelled());
        assert!(task.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_by_session_spares_other_sessions() {
        let (manager, _rx) = TaskManager::channel();
        let mine = manager.create("session-1", "pt-1", 5).await;
        let theirs = manager.create("session-2", "pt-2", 5).await;
        mine.start();
        theirs.start();

        assert_eq!(manager.cancel_by_session("session-1").await, 1);
        assert!(mine.is_cancelled());
        assert!(!theirs.is_cancelled());
    }

    #[tokio::test]
    async fn test_fail_records_failure() {
        let (manager, _rx) = TaskManager::channel();
        let task = manager.create("session-1", "pt-1", 5).await;
        task.start();
        task.record_failure("item 3: upstream error 105");
        task.fail("gave up after retries");

        let progress = task.progress();
        assert_eq!(progress.status, TaskStatus::Failed);
        assert_eq!(progress.failures.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_throttled_to_100ms() {
        let (manager, mut rx) = TaskManager::channel();
        let task = manager.create("session-1", "pt-1", 100).await;
        task.start();

        task.update_progress(1, "first");
        task.update_progress(2, "suppressed");
        task.update_progress(3, "suppressed");
        tokio::time::advance(NOTIFY_INTERVAL).await;
        task.update_progress(4, "second");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.completed, 1);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.completed, 4);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_registry_get_and_cleanup() {
        let (manager, _rx) = TaskManager::channel();
        let task = manager.create("session-1", "pt-1", 5).await;
        assert!(manager.get("pt-1").await.is_some());
        assert!(manager.get("pt-404").await.is_none());

        task.complete();
        assert_eq!(manager.remove_finished().await, 1);
        assert!(manager.get("pt-1").await.is_none());
        assert!(manager.is_empty().await);
    }
}
