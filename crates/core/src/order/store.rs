//! Task storage trait and types.

use thiserror::Error;

use super::{NewTask, Task, TaskStatus, TaskUpdate};

/// Error type for task and batch storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Transition not allowed from the current status.
    #[error("cannot move task {task_id} from {current} to {requested}")]
    InvalidTransition {
        task_id: String,
        current: TaskStatus,
        requested: TaskStatus,
    },

    /// Value cannot be stored.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn task_not_found(id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity: "task",
            id: id.into(),
        }
    }

    pub fn batch_not_found(id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity: "batch",
            id: id.into(),
        }
    }
}

/// Filter for querying tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub user_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub batch_id: Option<String>,
    /// Maximum number of results.
    pub limit: i64,
    pub offset: i64,
}

impl TaskFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            user_id: None,
            status: None,
            batch_id: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for task storage backends.
pub trait TaskStore: Send + Sync {
    /// Persist a new task.
    fn create_task(&self, task: NewTask) -> Result<Task, StoreError>;

    /// Get a task by ID.
    fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError>;

    /// List tasks matching the filter, oldest first.
    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;

    /// Apply a partial update. A status change must be a valid transition.
    fn update_task(&self, id: &str, update: TaskUpdate) -> Result<Task, StoreError>;

    /// Bump the poll counter unless it already reached `max_attempts`.
    ///
    /// Returns `None` when the bound is reached. The check and the bump are
    /// a single statement, so concurrent pollers never exceed the bound.
    fn increment_retry_count(
        &self,
        id: &str,
        max_attempts: u32,
    ) -> Result<Option<Task>, StoreError>;

    /// Number of tasks per status. Statuses without tasks are omitted.
    fn count_by_status(&self) -> Result<Vec<(TaskStatus, i64)>, StoreError>;
}
