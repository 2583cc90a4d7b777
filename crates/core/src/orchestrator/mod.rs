//! Order orchestrator.
//!
//! Drives stock orders from preview to delivery:
//! - **Preview**: concurrent per item, never charges
//! - **Commit**: one atomic charge per task, vendor placement detached
//! - **Polling**: bounded, one background poller per in-flight task

mod config;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use runner::OrderOrchestrator;
pub use types::{
    BatchStatusResponse, CommitFailure, CommitRequest, CommitResponse, ErrorKind, ItemError,
    OrchestratorError, OrchestratorStatus, PreviewItem, PreviewItemResult, PreviewRequest,
    PreviewResponse, RedownloadResponse,
};
