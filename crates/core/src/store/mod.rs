//! SQLite persistence for tasks, batches and the ledger.
//!
//! One connection backs all three stores so that a commit can debit the
//! balance, write the ledger entry and move the task in one transaction.

mod batches;
mod ledger;
mod tasks;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, TransactionBehavior};
use thiserror::Error;
use tracing::{debug, info};

use crate::batch::BatchStore;
use crate::ledger::{BalanceLedger, LedgerEntry, LedgerEntryKind, LedgerError};
use crate::order::{StoreError, Task, TaskStatus, TaskStore};

/// Result of charging a task at commit time.
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    /// Balance debited and task moved to `processing`.
    Charged { task: Task, entry: LedgerEntry },
    /// The task had already been charged; nothing changed.
    AlreadyCharged(Task),
}

/// Why a task could not be charged.
#[derive(Debug, Error)]
pub enum ChargeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("task {task_id} is {status}, only pending tasks can be committed")]
    NotPending { task_id: String, status: TaskStatus },

    #[error("task {0} has no quoted cost")]
    Unpriced(String),
}

/// Storage needed by the order orchestrator.
pub trait OrderStore: TaskStore + BatchStore + BalanceLedger {
    /// Atomically charge a pending task owned by `user_id`, move it to
    /// `processing` and attach it to `batch_id` (created on first use).
    ///
    /// The balance is re-read inside the transaction. On insufficient
    /// balance nothing changes and the task stays `pending`.
    fn charge_task(
        &self,
        task_id: &str,
        user_id: &str,
        batch_id: &str,
    ) -> Result<ChargeOutcome, ChargeError>;
}

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Database(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        info!("Opened database at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                batch_id TEXT,
                external_task_id TEXT,
                site TEXT NOT NULL,
                asset_id TEXT NOT NULL,
                source_url TEXT,
                status TEXT NOT NULL,
                cost_points INTEGER,
                cost_amount REAL,
                currency TEXT,
                title TEXT,
                preview_url TEXT,
                download_url TEXT,
                file_name TEXT,
                latest_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                response_type TEXT NOT NULL DEFAULT 'any',
                ready_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_user_id ON tasks(user_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_batch_id ON tasks(batch_id);

            CREATE TABLE IF NOT EXISTS batches (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                total_orders INTEGER NOT NULL DEFAULT 0,
                completed_orders INTEGER NOT NULL DEFAULT 0,
                failed_orders INTEGER NOT NULL DEFAULT 0,
                total_cost INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS balances (
                user_id TEXT PRIMARY KEY,
                points INTEGER NOT NULL DEFAULT 0 CHECK (points >= 0),
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ledger_entries (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                order_id TEXT,
                kind TEXT NOT NULL,
                amount INTEGER NOT NULL CHECK (amount >= 0),
                balance_after INTEGER NOT NULL,
                reason TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (order_id, kind)
            );

            CREATE INDEX IF NOT EXISTS idx_ledger_user_id ON ledger_entries(user_id, created_at);
            "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }
}

impl OrderStore for SqliteStore {
    fn charge_task(
        &self,
        task_id: &str,
        user_id: &str,
        batch_id: &str,
    ) -> Result<ChargeOutcome, ChargeError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let task = tasks::select_task(&tx, task_id)?
            .filter(|t| t.user_id == user_id)
            .ok_or_else(|| StoreError::task_not_found(task_id))?;

        if task.status != TaskStatus::Pending {
            // A spend entry means an earlier commit got here first.
            if ledger::select_entry(&tx, task_id, LedgerEntryKind::Spend)?.is_some() {
                debug!("Task {} already charged, skipping", task_id);
                return Ok(ChargeOutcome::AlreadyCharged(task));
            }
            return Err(ChargeError::NotPending {
                task_id: task_id.to_string(),
                status: task.status,
            });
        }

        let cost = task
            .cost_points
            .ok_or_else(|| ChargeError::Unpriced(task_id.to_string()))?;

        let entry = match ledger::debit_in(&tx, user_id, cost, task_id, "order commit") {
            Ok(entry) => entry,
            Err(LedgerError::DuplicateCharge { .. }) => {
                return Ok(ChargeOutcome::AlreadyCharged(task));
            }
            Err(e) => return Err(e.into()),
        };

        batches::ensure_batch(&tx, batch_id, user_id)?;
        let task = tasks::attach_and_start(&tx, task, batch_id)?;
        batches::recompute_in(&tx, batch_id)?;

        tx.commit()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        debug!(
            "Charged {} points for task {} (balance now {})",
            entry.amount, task.id, entry.balance_after
        );

        Ok(ChargeOutcome::Charged { task, entry })
    }
}

pub(crate) fn now_string(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
