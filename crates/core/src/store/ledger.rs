//! Balances and ledger entries.

use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::info;

use super::{batches, now_string, parse_time, tasks, SqliteStore};
use crate::ledger::{BalanceLedger, LedgerEntry, LedgerEntryKind, LedgerError};
use crate::metrics;

const ENTRY_COLUMNS: &str =
    "id, user_id, order_id, kind, amount, balance_after, reason, created_at";

fn db_err(e: rusqlite::Error) -> LedgerError {
    LedgerError::Database(e.to_string())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<LedgerEntry> {
    let kind: String = row.get(3)?;
    let kind: LedgerEntryKind = kind.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;
    let created_at: String = row.get(7)?;

    Ok(LedgerEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        order_id: row.get(2)?,
        kind,
        amount: row.get::<_, i64>(4)?.max(0) as u64,
        balance_after: row.get::<_, i64>(5)?.max(0) as u64,
        reason: row.get(6)?,
        created_at: parse_time(&created_at),
    })
}

fn read_balance(conn: &Connection, user_id: &str) -> Result<u64, LedgerError> {
    let points: Option<i64> = conn
        .query_row(
            "SELECT points FROM balances WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;
    Ok(points.unwrap_or(0).max(0) as u64)
}

fn ensure_balance_row(conn: &Connection, user_id: &str) -> Result<(), LedgerError> {
    conn.execute(
        "INSERT OR IGNORE INTO balances (user_id, points, updated_at) VALUES (?, 0, ?)",
        params![user_id, now_string(Utc::now())],
    )
    .map_err(db_err)?;
    Ok(())
}

fn insert_entry(
    conn: &Connection,
    user_id: &str,
    order_id: Option<&str>,
    kind: LedgerEntryKind,
    amount: u64,
    reason: &str,
) -> Result<LedgerEntry, LedgerError> {
    let entry = LedgerEntry {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        order_id: order_id.map(str::to_string),
        kind,
        amount,
        balance_after: read_balance(conn, user_id)?,
        reason: Some(reason.to_string()),
        created_at: Utc::now(),
    };

    conn.execute(
        &format!(
            "INSERT INTO ledger_entries ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            ENTRY_COLUMNS
        ),
        params![
            entry.id,
            entry.user_id,
            entry.order_id,
            entry.kind.as_str(),
            entry.amount as i64,
            entry.balance_after as i64,
            entry.reason,
            now_string(entry.created_at),
        ],
    )
    .map_err(|e| match (is_unique_violation(&e), order_id) {
        (true, Some(order_id)) if kind == LedgerEntryKind::Spend => LedgerError::DuplicateCharge {
            order_id: order_id.to_string(),
        },
        _ => db_err(e),
    })?;

    metrics::LEDGER_POINTS
        .with_label_values(&[kind.as_str()])
        .inc_by(amount);

    Ok(entry)
}

pub(super) fn select_entry(
    conn: &Connection,
    order_id: &str,
    kind: LedgerEntryKind,
) -> Result<Option<LedgerEntry>, LedgerError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM ledger_entries WHERE order_id = ? AND kind = ?",
            ENTRY_COLUMNS
        ),
        params![order_id, kind.as_str()],
        row_to_entry,
    )
    .optional()
    .map_err(db_err)
}

/// Debit inside an open transaction. The conditional update keeps the
/// balance from going negative even if the caller's view was stale.
pub(super) fn debit_in(
    conn: &Connection,
    user_id: &str,
    amount: u64,
    order_id: &str,
    reason: &str,
) -> Result<LedgerEntry, LedgerError> {
    if amount > i64::MAX as u64 {
        return Err(LedgerError::InvalidAmount(format!("{} is too large", amount)));
    }
    if select_entry(conn, order_id, LedgerEntryKind::Spend)?.is_some() {
        return Err(LedgerError::DuplicateCharge {
            order_id: order_id.to_string(),
        });
    }

    ensure_balance_row(conn, user_id)?;
    let updated = conn
        .execute(
            "UPDATE balances SET points = points - ?1, updated_at = ?2 \
             WHERE user_id = ?3 AND points >= ?1",
            params![amount as i64, now_string(Utc::now()), user_id],
        )
        .map_err(db_err)?;

    if updated == 0 {
        return Err(LedgerError::InsufficientBalance {
            required: amount,
            available: read_balance(conn, user_id)?,
        });
    }

    insert_entry(
        conn,
        user_id,
        Some(order_id),
        LedgerEntryKind::Spend,
        amount,
        reason,
    )
}

fn add_points(conn: &Connection, user_id: &str, amount: u64) -> Result<(), LedgerError> {
    ensure_balance_row(conn, user_id)?;
    conn.execute(
        "UPDATE balances SET points = points + ?, updated_at = ? WHERE user_id = ?",
        params![amount as i64, now_string(Utc::now()), user_id],
    )
    .map_err(db_err)?;
    Ok(())
}

impl BalanceLedger for SqliteStore {
    fn get_balance(&self, user_id: &str) -> Result<u64, LedgerError> {
        let conn = self.conn.lock().unwrap();
        read_balance(&conn, user_id)
    }

    fn debit(
        &self,
        user_id: &str,
        amount: u64,
        order_id: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        let entry = debit_in(&tx, user_id, amount, order_id, "debit")?;
        tx.commit().map_err(db_err)?;
        Ok(entry)
    }

    fn credit(
        &self,
        user_id: &str,
        amount: u64,
        reason: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(
                "credit must be positive".to_string(),
            ));
        }
        if amount > i64::MAX as u64 {
            return Err(LedgerError::InvalidAmount(format!("{} is too large", amount)));
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        add_points(&tx, user_id, amount)?;
        let entry = insert_entry(&tx, user_id, None, LedgerEntryKind::Credit, amount, reason)?;
        tx.commit().map_err(db_err)?;

        info!("Credited {} points to {}", amount, user_id);
        Ok(entry)
    }

    fn refund(
        &self,
        user_id: &str,
        order_id: &str,
        reason: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let spend = select_entry(&tx, order_id, LedgerEntryKind::Spend)?
            .filter(|e| e.user_id == user_id)
            .ok_or_else(|| LedgerError::NoCharge {
                order_id: order_id.to_string(),
            })?;

        if let Some(existing) = select_entry(&tx, order_id, LedgerEntryKind::Refund)? {
            return Ok(existing);
        }

        add_points(&tx, user_id, spend.amount)?;
        let entry = insert_entry(
            &tx,
            user_id,
            Some(order_id),
            LedgerEntryKind::Refund,
            spend.amount,
            reason,
        )?;

        // Net batch cost changes with the refund.
        let batch_id = tasks::select_task(&tx, order_id)
            .map_err(|e| LedgerError::Database(e.to_string()))?
            .and_then(|t| t.batch_id);
        if let Some(batch_id) = batch_id {
            batches::recompute_in(&tx, &batch_id)
                .map_err(|e| LedgerError::Database(e.to_string()))?;
        }

        tx.commit().map_err(db_err)?;

        info!("Refunded {} points to {} for {}", spend.amount, user_id, order_id);
        Ok(entry)
    }

    fn history(&self, user_id: &str, limit: i64) -> Result<Vec<LedgerEntry>, LedgerError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM ledger_entries WHERE user_id = ? \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?",
                ENTRY_COLUMNS
            ))
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![user_id, limit], row_to_entry)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn find_entry(
        &self,
        order_id: &str,
        kind: LedgerEntryKind,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let conn = self.conn.lock().unwrap();
        select_entry(&conn, order_id, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(user: &str, points: u64) -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.credit(user, points, "top-up").unwrap();
        store
    }

    #[test]
    fn test_unknown_user_has_zero_balance() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.get_balance("nobody").unwrap(), 0);
    }

    #[test]
    fn test_credit_rejects_zero() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(matches!(
            store.credit("alice", 0, "nothing"),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_debit_exactly_once() {
        let store = store_with("alice", 10);

        let entry = store.debit("alice", 4, "order-1").unwrap();
        assert_eq!(entry.kind, LedgerEntryKind::Spend);
        assert_eq!(entry.balance_after, 6);

        let err = store.debit("alice", 4, "order-1").unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateCharge { ref order_id } if order_id == "order-1"));
        assert_eq!(store.get_balance("alice").unwrap(), 6);
    }

    #[test]
    fn test_debit_insufficient_balance_leaves_balance() {
        let store = store_with("alice", 3);

        let err = store.debit("alice", 5, "order-1").unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                required: 5,
                available: 3
            }
        ));
        assert_eq!(store.get_balance("alice").unwrap(), 3);
        assert!(store
            .find_entry("order-1", LedgerEntryKind::Spend)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_debit_rejects_amount_beyond_ledger_range() {
        let store = store_with("alice", 5);

        let err = store.debit("alice", u64::MAX, "order-1").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
        assert_eq!(store.get_balance("alice").unwrap(), 5);
        assert!(store
            .find_entry("order-1", LedgerEntryKind::Spend)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_debit_to_exactly_zero() {
        let store = store_with("alice", 5);
        let entry = store.debit("alice", 5, "order-1").unwrap();
        assert_eq!(entry.balance_after, 0);
    }

    #[test]
    fn test_refund_is_idempotent() {
        let store = store_with("alice", 10);
        store.debit("alice", 4, "order-1").unwrap();

        let first = store.refund("alice", "order-1", "vendor rejected").unwrap();
        assert_eq!(first.amount, 4);
        assert_eq!(first.balance_after, 10);

        let second = store.refund("alice", "order-1", "vendor rejected").unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(store.get_balance("alice").unwrap(), 10);
    }

    #[test]
    fn test_refund_requires_prior_charge() {
        let store = store_with("alice", 10);
        let err = store.refund("alice", "order-9", "oops").unwrap_err();
        assert!(matches!(err, LedgerError::NoCharge { .. }));
        assert_eq!(store.get_balance("alice").unwrap(), 10);
    }

    #[test]
    fn test_history_newest_first() {
        let store = store_with("alice", 10);
        store.debit("alice", 1, "order-1").unwrap();
        store.debit("alice", 2, "order-2").unwrap();
        store.refund("alice", "order-2", "failed").unwrap();

        let history = store.history("alice", 10).unwrap();
        let kinds: Vec<_> = history.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                LedgerEntryKind::Refund,
                LedgerEntryKind::Spend,
                LedgerEntryKind::Spend,
                LedgerEntryKind::Credit
            ]
        );
        assert_eq!(history[0].balance_after, 9);

        assert_eq!(store.history("alice", 2).unwrap().len(), 2);
        assert!(store.history("bob", 10).unwrap().is_empty());
    }
}
