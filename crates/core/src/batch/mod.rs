//! Batches group the tasks committed together.
//!
//! A batch's status and counters are always derived from its children and
//! never patched directly.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::order::{StoreError, Task, TaskStatus};

/// Maximum number of tasks in one batch.
pub const MAX_BATCH_SIZE: usize = 5;

/// Aggregate status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// At least one child is still moving.
    Processing,
    /// Every child completed.
    Completed,
    /// Every child failed.
    Failed,
    /// All children terminal, some completed and some failed.
    Partial,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Partial => "partial",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(BatchStatus::Processing),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            "partial" => Ok(BatchStatus::Partial),
            other => Err(format!("unknown batch status: {}", other)),
        }
    }
}

/// Derive the batch status from its children.
///
/// An empty batch is still `Processing`.
pub fn derive_status(statuses: &[TaskStatus]) -> BatchStatus {
    if statuses.is_empty() || statuses.iter().any(|s| !s.is_terminal()) {
        return BatchStatus::Processing;
    }
    if statuses.iter().all(|s| s.is_failed()) {
        BatchStatus::Failed
    } else if statuses.iter().all(|s| *s == TaskStatus::Completed) {
        BatchStatus::Completed
    } else {
        BatchStatus::Partial
    }
}

/// A committed group of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub user_id: String,
    pub total_orders: u32,
    pub completed_orders: u32,
    pub failed_orders: u32,
    /// Net points spent (spend minus refund) across the children.
    pub total_cost: u64,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-status child counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub pending: u32,
    pub processing: u32,
    pub ready: u32,
    pub downloading: u32,
    pub completed: u32,
    pub error: u32,
    pub timeout: u32,
}

impl BatchStats {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut stats = Self::default();
        for task in tasks {
            let slot = match task.status {
                TaskStatus::Pending => &mut stats.pending,
                TaskStatus::Processing => &mut stats.processing,
                TaskStatus::Ready => &mut stats.ready,
                TaskStatus::Downloading => &mut stats.downloading,
                TaskStatus::Completed => &mut stats.completed,
                TaskStatus::Error => &mut stats.error,
                TaskStatus::Timeout => &mut stats.timeout,
            };
            *slot += 1;
        }
        stats
    }
}

/// Trait for batch storage backends.
pub trait BatchStore: Send + Sync {
    /// Get a batch by ID.
    fn get_batch(&self, id: &str) -> Result<Option<Batch>, StoreError>;

    /// Recompute status, counters and net cost from the children and persist
    /// them. Idempotent.
    fn recompute_batch(&self, id: &str) -> Result<Batch, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn test_derive_all_completed() {
        assert_eq!(derive_status(&[Completed, Completed]), BatchStatus::Completed);
    }

    #[test]
    fn test_derive_all_failed() {
        assert_eq!(derive_status(&[Error, Timeout, Error]), BatchStatus::Failed);
    }

    #[test]
    fn test_derive_mixed_terminal_is_partial() {
        assert_eq!(derive_status(&[Completed, Error]), BatchStatus::Partial);
        assert_eq!(derive_status(&[Timeout, Completed, Completed]), BatchStatus::Partial);
    }

    #[test]
    fn test_derive_any_non_terminal_is_processing() {
        assert_eq!(derive_status(&[Completed, Processing]), BatchStatus::Processing);
        assert_eq!(derive_status(&[Error, Downloading]), BatchStatus::Processing);
        assert_eq!(derive_status(&[Ready]), BatchStatus::Processing);
    }

    #[test]
    fn test_derive_empty_is_processing() {
        assert_eq!(derive_status(&[]), BatchStatus::Processing);
    }

    #[test]
    fn test_derive_single_child() {
        assert_eq!(derive_status(&[Completed]), BatchStatus::Completed);
        assert_eq!(derive_status(&[Timeout]), BatchStatus::Failed);
    }

    #[test]
    fn test_batch_status_strings() {
        for status in [
            BatchStatus::Processing,
            BatchStatus::Completed,
            BatchStatus::Failed,
            BatchStatus::Partial,
        ] {
            assert_eq!(status.as_str().parse::<BatchStatus>().unwrap(), status);
        }
    }
}
