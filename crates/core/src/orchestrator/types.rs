//! Request, response and error types of the order orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::{Batch, BatchStats};
use crate::ledger::LedgerError;
use crate::order::{StoreError, Task};
use crate::store::ChargeError;
use crate::vendor::{DownloadLink, ResponseType, VendorError};

/// Machine readable error kind reported per item and per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ResolutionFailure,
    InsufficientBalance,
    DuplicateCharge,
    VendorRejected,
    VendorUnavailable,
    PollTimeout,
    NotFound,
    InvalidState,
    InvalidRequest,
    Unauthorized,
    Internal,
}

/// Error attached to a single preview item or commit task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ItemError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a vendor failure. Raw payloads never leak, only the message.
    pub fn from_vendor(error: &VendorError) -> Self {
        let kind = if error.is_transient() {
            ErrorKind::VendorUnavailable
        } else {
            ErrorKind::VendorRejected
        };
        Self::new(kind, error.to_string())
    }
}

impl From<&ChargeError> for ItemError {
    fn from(error: &ChargeError) -> Self {
        let kind = match error {
            ChargeError::Ledger(LedgerError::InsufficientBalance { .. }) => {
                ErrorKind::InsufficientBalance
            }
            ChargeError::Ledger(LedgerError::DuplicateCharge { .. }) => ErrorKind::DuplicateCharge,
            ChargeError::Store(StoreError::NotFound { .. }) => ErrorKind::NotFound,
            ChargeError::NotPending { .. } | ChargeError::Unpriced(_) => ErrorKind::InvalidState,
            _ => ErrorKind::Internal,
        };
        Self::new(kind, error.to_string())
    }
}

/// Errors that fail a whole orchestrator call.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Vendor(#[from] VendorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::NotFound(_) => ErrorKind::NotFound,
            OrchestratorError::InvalidState(_) => ErrorKind::InvalidState,
            OrchestratorError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            OrchestratorError::Vendor(e) => ItemError::from_vendor(e).kind,
            OrchestratorError::Store(StoreError::NotFound { .. }) => ErrorKind::NotFound,
            OrchestratorError::Store(StoreError::InvalidTransition { .. }) => {
                ErrorKind::InvalidState
            }
            OrchestratorError::Ledger(LedgerError::InsufficientBalance { .. }) => {
                ErrorKind::InsufficientBalance
            }
            OrchestratorError::Ledger(LedgerError::DuplicateCharge { .. }) => {
                ErrorKind::DuplicateCharge
            }
            OrchestratorError::Ledger(LedgerError::InvalidAmount(_)) => ErrorKind::InvalidRequest,
            _ => ErrorKind::Internal,
        }
    }
}

/// One item of a preview request. An explicit `site` + `id` pair wins over
/// `url`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreviewItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl PreviewItem {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn site_and_id(site: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            site: Some(site.into()),
            id: Some(id.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewRequest {
    pub user_id: String,
    pub items: Vec<PreviewItem>,
    #[serde(default)]
    pub response_type: ResponseType,
}

/// Outcome of one preview item: a task, an error, or an errored task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewItemResult {
    pub input: PreviewItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub results: Vec<PreviewItemResult>,
    /// Current balance; preview never changes it.
    pub balance: u64,
    /// Sum of the quoted costs of the orderable tasks.
    pub total_cost: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    pub user_id: String,
    pub task_ids: Vec<String>,
    /// Overrides the delivery channel chosen at preview.
    #[serde(default)]
    pub response_type: Option<ResponseType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitFailure {
    pub task_id: String,
    pub error: ItemError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResponse {
    pub tasks: Vec<Task>,
    pub failures: Vec<CommitFailure>,
    pub balance: u64,
    /// Present when at least one task was charged in this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatusResponse {
    pub batch: Batch,
    pub stats: BatchStats,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedownloadResponse {
    pub download: DownloadLink,
    pub task: Task,
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    /// Tasks with a background poller attached.
    pub active_polls: usize,
}
