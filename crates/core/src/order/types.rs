//! Core order task data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vendor::ResponseType;

/// Lifecycle status of an order task.
///
/// ```text
/// pending -> processing -> ready -> downloading -> completed
/// ```
///
/// `error` is reachable from every non-terminal status, `timeout` only from
/// `processing` and `ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Quoted, not charged.
    Pending,
    /// Charged, vendor working on it.
    Processing,
    /// Vendor finished, link not yet resolved.
    Ready,
    /// Resolving the download link.
    Downloading,
    Completed,
    Error,
    Timeout,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Ready => "ready",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Timeout => "timeout",
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Timeout
        )
    }

    /// Returns true for the failed terminal statuses.
    pub fn is_failed(&self) -> bool {
        matches!(self, TaskStatus::Error | TaskStatus::Timeout)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Processing) | (Pending, Error) => true,
            (Processing, Ready | Completed | Error | Timeout) => true,
            (Ready, Downloading | Completed | Error | Timeout) => true,
            (Downloading, Completed | Error) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "ready" => Ok(TaskStatus::Ready),
            "downloading" => Ok(TaskStatus::Downloading),
            "completed" => Ok(TaskStatus::Completed),
            "error" => Ok(TaskStatus::Error),
            "timeout" => Ok(TaskStatus::Timeout),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// A single asset order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// Owner of the task.
    pub user_id: String,
    /// Batch the task was committed in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    /// Vendor-side task id, known once the order was placed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_task_id: Option<String>,
    pub site: String,
    pub asset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub status: TaskStatus,
    /// Quoted cost in points, charged at commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_points: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Last human readable message from the vendor or the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_message: Option<String>,
    /// Number of status polls performed.
    pub retry_count: u32,
    pub response_type: ResponseType,
    /// When the vendor first reported the order ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Whether a fresh download link may be requested for this task.
    pub fn can_redownload(&self) -> bool {
        self.external_task_id.is_some()
            && match self.status {
                TaskStatus::Completed => true,
                TaskStatus::Error => self.ready_at.is_some(),
                _ => false,
            }
    }
}

/// Request to persist a freshly previewed task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub user_id: String,
    pub site: String,
    pub asset_id: String,
    pub source_url: Option<String>,
    /// `Pending` for orderable assets, `Error` when the vendor reported the
    /// asset as unavailable.
    pub status: TaskStatus,
    pub cost_points: Option<u64>,
    pub cost_amount: Option<f64>,
    pub currency: Option<String>,
    pub title: Option<String>,
    pub preview_url: Option<String>,
    pub latest_message: Option<String>,
    pub response_type: ResponseType,
}

/// Partial update of a task. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub external_task_id: Option<String>,
    pub download_url: Option<String>,
    pub file_name: Option<String>,
    pub latest_message: Option<String>,
    pub response_type: Option<ResponseType>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update targeting a status transition.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_external_task_id(mut self, id: impl Into<String>) -> Self {
        self.external_task_id = Some(id.into());
        self
    }

    pub fn with_download(mut self, url: impl Into<String>, file_name: Option<String>) -> Self {
        self.download_url = Some(url.into());
        self.file_name = file_name;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.latest_message = Some(message.into());
        self
    }

    pub fn with_message_opt(mut self, message: Option<String>) -> Self {
        if message.is_some() {
            self.latest_message = message;
        }
        self
    }

    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }
}
