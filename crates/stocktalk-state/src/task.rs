//! Background task records and the detached-work manager
//!
//! Accepting background work means: create a task record, reply "in
//! progress" immediately, spawn the work, and let the user poll. The store
//! enforces status monotonicity (`pending → processing → completed|failed`);
//! a late write from work that was already failed-by-timeout is rejected and
//! logged, an accepted lost update rather than a bug.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use stocktalk_core::{Error, Result};

/// Reason recorded when the poller fails a stale task
pub const TIMEOUT_REASON: &str = "timeout";

/// Lifecycle of a background task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, work not yet started
    Pending,
    /// Work is running
    Processing,
    /// Work finished with a result
    Completed,
    /// Work failed or timed out
    Failed,
}

impl TaskStatus {
    /// Whether no further transitions are allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

/// One background task owned by a single user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncTask {
    pub id: uuid::Uuid,
    pub owner: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl AsyncTask {
    /// Create a pending task for `owner`
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            owner: owner.into(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Age of the task at instant `now`
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Result of asking the store for a status transition
#[derive(Debug, Clone)]
pub enum Transition {
    /// The transition was written; carries the updated record
    Applied(AsyncTask),
    /// The task was already terminal; carries the untouched record
    Rejected(AsyncTask),
}

/// Backing store for task records
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task record
    async fn insert(&self, task: AsyncTask) -> Result<()>;

    /// Read a task by id
    async fn get(&self, id: uuid::Uuid) -> Result<Option<AsyncTask>>;

    /// Read the most recently created task for an owner
    async fn latest_for_owner(&self, owner: &str) -> Result<Option<AsyncTask>>;

    /// Move a task to `status`, enforcing monotonicity.
    ///
    /// A transition out of a terminal state is answered with
    /// [`Transition::Rejected`], never applied. Terminal target states set
    /// `completed_at` and record the result or error.
    async fn transition(
        &self,
        id: uuid::Uuid,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<Transition>;
}

/// In-memory task store
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<uuid::Uuid, AsyncTask>>,
}

impl MemoryTaskStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: AsyncTask) -> Result<()> {
        self.tasks.write().await.insert(task.id, task);
        Ok(())
    }

    async fn get(&self, id: uuid::Uuid) -> Result<Option<AsyncTask>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn latest_for_owner(&self, owner: &str) -> Result<Option<AsyncTask>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.owner == owner)
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn transition(
        &self,
        id: uuid::Uuid,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<Transition> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| Error::Store(format!("task {id} not found")))?;

        if task.status.is_terminal() {
            return Ok(Transition::Rejected(task.clone()));
        }

        task.status = status;
        if status.is_terminal() {
            task.completed_at = Some(Utc::now());
            task.result = result;
            task.error = error;
        }
        Ok(Transition::Applied(task.clone()))
    }
}

/// Task lifecycle and detached execution over a [`TaskStore`]
///
/// Spawned work is tracked by its `JoinHandle` so nothing runs unaccounted
/// for; [`TaskManager::shutdown`] drains the registry.
pub struct TaskManager {
    store: Arc<dyn TaskStore>,
    stale_after: Duration,
    handles: Mutex<HashMap<uuid::Uuid, JoinHandle<()>>>,
}

impl TaskManager {
    /// Create a manager over the given store
    pub fn new(store: Arc<dyn TaskStore>, stale_after: Duration) -> Self {
        Self {
            store,
            stale_after,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Create a manager backed by process memory
    pub fn in_memory(stale_after: Duration) -> Self {
        Self::new(Arc::new(MemoryTaskStore::new()), stale_after)
    }

    /// Create a pending task for `owner` and return its record
    pub async fn create(&self, owner: &str) -> Result<AsyncTask> {
        let task = AsyncTask::new(owner);
        debug!("Created task {} for owner '{}'", task.id, owner);
        self.store.insert(task.clone()).await?;
        Ok(task)
    }

    /// Read a task by id
    pub async fn get(&self, id: uuid::Uuid) -> Result<Option<AsyncTask>> {
        self.store.get(id).await
    }

    /// Read the most recent task for an owner
    pub async fn latest_for_owner(&self, owner: &str) -> Result<Option<AsyncTask>> {
        self.store.latest_for_owner(owner).await
    }

    /// Run `work` for an already-created task without blocking the caller.
    ///
    /// The spawned future marks the task `processing`, awaits the work, and
    /// records the terminal outcome. Failures end up in the task record, not
    /// in a panic; a rejected terminal write is logged and dropped. Work that
    /// panics leaves the task `processing` until the staleness poll fails it.
    pub async fn run<F>(&self, id: uuid::Uuid, work: F)
    where
        F: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);

        let handle = tokio::spawn(async move {
            match store.transition(id, TaskStatus::Processing, None, None).await {
                Ok(Transition::Applied(_)) => {}
                Ok(Transition::Rejected(current)) => {
                    warn!(
                        "Task {} already {} before work started, skipping",
                        id, current.status
                    );
                    return;
                }
                Err(e) => {
                    // Work still runs; the record just misses the processing step
                    error!("Failed to mark task {} processing: {}", id, e);
                }
            }

            let (status, result, err_msg) = match work.await {
                Ok(value) => (TaskStatus::Completed, Some(value), None),
                Err(e) => {
                    warn!("Task {} work failed: {}", id, e);
                    (TaskStatus::Failed, None, Some(e.to_string()))
                }
            };

            match store.transition(id, status, result, err_msg).await {
                Ok(Transition::Applied(_)) => debug!("Task {} finished as {}", id, status),
                Ok(Transition::Rejected(current)) => warn!(
                    "Task {} already {}, dropping late {} outcome",
                    id, current.status, status
                ),
                Err(e) => error!("Failed to record outcome for task {}: {}", id, e),
            }
        });

        self.handles.lock().await.insert(id, handle);
    }

    /// Look up a task on behalf of `owner`, enforcing staleness.
    ///
    /// Resolves the explicit id, or the owner's most recent task when `id` is
    /// `None`. A `processing` task older than the staleness threshold is
    /// failed with reason [`TIMEOUT_REASON`] before being returned; this poll
    /// path is the only reader that also writes. Tasks belonging to someone
    /// else read as absent.
    pub async fn poll(&self, owner: &str, id: Option<uuid::Uuid>) -> Result<Option<AsyncTask>> {
        let task = match id {
            Some(id) => self.store.get(id).await?,
            None => self.store.latest_for_owner(owner).await?,
        };
        let Some(task) = task else {
            return Ok(None);
        };
        if task.owner != owner {
            debug!("Task {} not visible to owner '{}'", task.id, owner);
            return Ok(None);
        }

        if task.status == TaskStatus::Processing && self.is_stale(&task) {
            warn!(
                "Task {} stale after {}s, failing with timeout",
                task.id,
                task.age_at(Utc::now()).num_seconds()
            );
            let transition = self
                .store
                .transition(
                    task.id,
                    TaskStatus::Failed,
                    None,
                    Some(TIMEOUT_REASON.to_string()),
                )
                .await?;
            return Ok(Some(match transition {
                Transition::Applied(task) => task,
                // Lost the race against a real completion; surface that instead
                Transition::Rejected(task) => task,
            }));
        }

        Ok(Some(task))
    }

    fn is_stale(&self, task: &AsyncTask) -> bool {
        match chrono::Duration::from_std(self.stale_after) {
            Ok(threshold) => task.age_at(Utc::now()) > threshold,
            Err(_) => false,
        }
    }

    /// Drop handles of finished work; returns how many are still running
    pub async fn reap_finished(&self) -> usize {
        let mut handles = self.handles.lock().await;
        handles.retain(|id, handle| {
            if handle.is_finished() {
                debug!("Reaped finished task {}", id);
                false
            } else {
                true
            }
        });
        handles.len()
    }

    /// Wait for all spawned work to settle
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.handles.lock().await.drain().collect();
        for (id, handle) in handles {
            if let Err(e) = handle.await {
                error!("Task {} join failed: {}", id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STALE_AFTER: Duration = Duration::from_secs(90);

    #[tokio::test]
    async fn test_create_starts_pending() {
        let manager = TaskManager::in_memory(STALE_AFTER);

        let task = manager.create("u1").await.unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.owner, "u1");
        assert!(task.result.is_none());
        assert!(task.error.is_none());
    }

    #[tokio::test]
    async fn test_run_records_success() {
        let manager = TaskManager::in_memory(STALE_AFTER);
        let task = manager.create("u1").await.unwrap();

        manager
            .run(task.id, async { Ok(json!({"picks": ["2330"]})) })
            .await;
        manager.shutdown().await;

        let task = manager.get(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(json!({"picks": ["2330"]})));
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_run_records_failure_without_panicking() {
        let manager = TaskManager::in_memory(STALE_AFTER);
        let task = manager.create("u1").await.unwrap();

        manager
            .run(task.id, async {
                Err(Error::Server("screening backend down".to_string()))
            })
            .await;
        manager.shutdown().await;

        let task = manager.get(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("screening backend down"));
    }

    #[tokio::test]
    async fn test_store_rejects_exit_from_terminal() {
        let store = MemoryTaskStore::new();
        let task = AsyncTask::new("u1");
        let id = task.id;
        store.insert(task).await.unwrap();

        store
            .transition(id, TaskStatus::Processing, None, None)
            .await
            .unwrap();
        store
            .transition(id, TaskStatus::Completed, Some(json!(1)), None)
            .await
            .unwrap();

        // Late failure write from abandoned work must bounce
        let transition = store
            .transition(id, TaskStatus::Failed, None, Some("late".to_string()))
            .await
            .unwrap();
        assert!(matches!(transition, Transition::Rejected(_)));

        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_poll_fails_stale_processing_task() {
        let store = Arc::new(MemoryTaskStore::new());
        let manager = TaskManager::new(store.clone(), STALE_AFTER);

        let mut task = AsyncTask::new("u1");
        task.status = TaskStatus::Processing;
        task.created_at = Utc::now() - chrono::Duration::seconds(95);
        let id = task.id;
        store.insert(task).await.unwrap();

        let polled = manager.poll("u1", Some(id)).await.unwrap().unwrap();

        assert_eq!(polled.status, TaskStatus::Failed);
        assert_eq!(polled.error.as_deref(), Some(TIMEOUT_REASON));
    }

    #[tokio::test]
    async fn test_poll_leaves_young_processing_task_alone() {
        let store = Arc::new(MemoryTaskStore::new());
        let manager = TaskManager::new(store.clone(), STALE_AFTER);

        let mut task = AsyncTask::new("u1");
        task.status = TaskStatus::Processing;
        let id = task.id;
        store.insert(task).await.unwrap();

        let polled = manager.poll("u1", Some(id)).await.unwrap().unwrap();
        assert_eq!(polled.status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn test_poll_without_id_takes_latest() {
        let store = Arc::new(MemoryTaskStore::new());
        let manager = TaskManager::new(store.clone(), STALE_AFTER);

        let mut old = AsyncTask::new("u1");
        old.created_at = Utc::now() - chrono::Duration::minutes(10);
        store.insert(old).await.unwrap();
        let recent = manager.create("u1").await.unwrap();

        let polled = manager.poll("u1", None).await.unwrap().unwrap();
        assert_eq!(polled.id, recent.id);

        assert!(manager.poll("someone-else", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_poll_hides_foreign_tasks() {
        let manager = TaskManager::in_memory(STALE_AFTER);
        let task = manager.create("u1").await.unwrap();

        assert!(manager.poll("u2", Some(task.id)).await.unwrap().is_none());
    }

    #[test]
    fn test_status_conventions() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());

        assert_eq!(TaskStatus::Processing.to_string(), "processing");
        assert_eq!("failed".parse::<TaskStatus>().unwrap(), TaskStatus::Failed);
        assert!("cancelled".parse::<TaskStatus>().is_err());

        let json = serde_json::to_string(&TaskStatus::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
    }
}
