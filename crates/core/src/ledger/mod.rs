//! Point balances and the append-only ledger.
//!
//! Every point mutation goes through [`BalanceLedger`]. A balance never goes
//! negative and an order is charged (and refunded) at most once: the ledger
//! enforces `UNIQUE(order_id, kind)`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    /// Points spent on an order.
    Spend,
    /// Points added (top-up).
    Credit,
    /// Reversal of a spend.
    Refund,
}

impl LedgerEntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryKind::Spend => "spend",
            LedgerEntryKind::Credit => "credit",
            LedgerEntryKind::Refund => "refund",
        }
    }
}

impl fmt::Display for LedgerEntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerEntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spend" => Ok(LedgerEntryKind::Spend),
            "credit" => Ok(LedgerEntryKind::Credit),
            "refund" => Ok(LedgerEntryKind::Refund),
            other => Err(format!("unknown ledger entry kind: {}", other)),
        }
    }
}

/// One immutable ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub kind: LedgerEntryKind,
    pub amount: u64,
    /// Balance right after this entry was applied.
    pub balance_after: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient balance: need {required} points, have {available}")]
    InsufficientBalance { required: u64, available: u64 },

    /// A spend entry already exists for this order.
    #[error("order {order_id} has already been charged")]
    DuplicateCharge { order_id: String },

    /// Refund requested for an order that was never charged.
    #[error("order {order_id} has no charge to refund")]
    NoCharge { order_id: String },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("database error: {0}")]
    Database(String),
}

/// The single choke point for point mutations.
pub trait BalanceLedger: Send + Sync {
    /// Current balance. Unknown users have zero points.
    fn get_balance(&self, user_id: &str) -> Result<u64, LedgerError>;

    /// Charge `amount` for `order_id`. Fails without side effects on
    /// insufficient balance or a prior charge of the same order.
    fn debit(&self, user_id: &str, amount: u64, order_id: &str)
        -> Result<LedgerEntry, LedgerError>;

    /// Add points, e.g. a top-up confirmed by the billing system.
    fn credit(&self, user_id: &str, amount: u64, reason: &str)
        -> Result<LedgerEntry, LedgerError>;

    /// Reverse the charge of `order_id`. Idempotent: a second call returns
    /// the existing refund entry.
    fn refund(
        &self,
        user_id: &str,
        order_id: &str,
        reason: &str,
    ) -> Result<LedgerEntry, LedgerError>;

    /// Most recent entries first.
    fn history(&self, user_id: &str, limit: i64) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Look up the entry of `kind` recorded for an order.
    fn find_entry(
        &self,
        order_id: &str,
        kind: LedgerEntryKind,
    ) -> Result<Option<LedgerEntry>, LedgerError>;
}
