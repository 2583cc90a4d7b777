//! Batch persistence and recomputation.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use super::{now_string, parse_time, SqliteStore};
use crate::batch::{derive_status, Batch, BatchStatus, BatchStore};
use crate::order::{StoreError, TaskStatus};

const BATCH_COLUMNS: &str = "id, user_id, total_orders, completed_orders, failed_orders, \
     total_cost, status, created_at, updated_at";

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn row_to_batch(row: &rusqlite::Row) -> rusqlite::Result<Batch> {
    let status: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(Batch {
        id: row.get(0)?,
        user_id: row.get(1)?,
        total_orders: row.get::<_, i64>(2)?.max(0) as u32,
        completed_orders: row.get::<_, i64>(3)?.max(0) as u32,
        failed_orders: row.get::<_, i64>(4)?.max(0) as u32,
        total_cost: row.get::<_, i64>(5)?.max(0) as u64,
        status: status.parse().unwrap_or(BatchStatus::Processing),
        created_at: parse_time(&created_at),
        updated_at: parse_time(&updated_at),
    })
}

fn select_batch(conn: &Connection, id: &str) -> Result<Option<Batch>, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM batches WHERE id = ?", BATCH_COLUMNS),
        params![id],
        row_to_batch,
    )
    .optional()
    .map_err(db_err)
}

/// Create the batch row if it does not exist yet.
pub(super) fn ensure_batch(conn: &Connection, id: &str, user_id: &str) -> Result<(), StoreError> {
    let now = now_string(Utc::now());
    conn.execute(
        "INSERT OR IGNORE INTO batches (id, user_id, status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?)",
        params![id, user_id, BatchStatus::Processing.as_str(), now, now],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Recompute a batch from its children inside an open transaction.
pub(super) fn recompute_in(conn: &Connection, id: &str) -> Result<Batch, StoreError> {
    let batch = select_batch(conn, id)?.ok_or_else(|| StoreError::batch_not_found(id))?;

    let mut stmt = conn
        .prepare("SELECT status FROM tasks WHERE batch_id = ?")
        .map_err(db_err)?;
    let statuses: Vec<TaskStatus> = stmt
        .query_map(params![id], |row| row.get::<_, String>(0))
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let net_cost: i64 = conn
        .query_row(
            "SELECT COALESCE(SUM(CASE kind WHEN 'spend' THEN amount \
                                           WHEN 'refund' THEN -amount ELSE 0 END), 0) \
             FROM ledger_entries \
             WHERE order_id IN (SELECT id FROM tasks WHERE batch_id = ?)",
            params![id],
            |row| row.get(0),
        )
        .map_err(db_err)?;

    let updated = Batch {
        total_orders: statuses.len() as u32,
        completed_orders: statuses
            .iter()
            .filter(|s| **s == TaskStatus::Completed)
            .count() as u32,
        failed_orders: statuses.iter().filter(|s| s.is_failed()).count() as u32,
        total_cost: net_cost.max(0) as u64,
        status: derive_status(&statuses),
        updated_at: Utc::now(),
        ..batch
    };

    conn.execute(
        "UPDATE batches SET total_orders = ?, completed_orders = ?, failed_orders = ?, \
         total_cost = ?, status = ?, updated_at = ? WHERE id = ?",
        params![
            updated.total_orders as i64,
            updated.completed_orders as i64,
            updated.failed_orders as i64,
            updated.total_cost as i64,
            updated.status.as_str(),
            now_string(updated.updated_at),
            id,
        ],
    )
    .map_err(db_err)?;

    debug!(
        "Batch {} recomputed: {} ({}/{} completed, {} failed)",
        id, updated.status, updated.completed_orders, updated.total_orders, updated.failed_orders
    );

    Ok(updated)
}

impl BatchStore for SqliteStore {
    fn get_batch(&self, id: &str) -> Result<Option<Batch>, StoreError> {
        let conn = self.conn.lock().unwrap();
        select_batch(&conn, id)
    }

    fn recompute_batch(&self, id: &str) -> Result<Batch, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        let batch = recompute_in(&tx, id)?;
        tx.commit().map_err(db_err)?;
        Ok(batch)
    }
}
