//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Vendor gateway (requests, latency)
//! - Orders (previews, commits, poll outcomes)
//! - Ledger (points debited and refunded)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Vendor gateway
// =============================================================================

/// Vendor requests by operation and result.
pub static VENDOR_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("stockdesk_vendor_requests_total", "Total vendor API requests"),
        &["operation", "result"], // result: "success", "rejected", "error"
    )
    .unwrap()
});

/// Vendor request latency in seconds.
pub static VENDOR_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "stockdesk_vendor_request_duration_seconds",
            "Duration of vendor API requests",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0]),
        &["operation"],
    )
    .unwrap()
});

// =============================================================================
// Orders
// =============================================================================

/// Preview items by outcome.
pub static PREVIEW_ITEMS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("stockdesk_preview_items_total", "Total items previewed"),
        &["result"], // "priced", "failed"
    )
    .unwrap()
});

/// Commit attempts by outcome.
pub static ORDERS_COMMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("stockdesk_orders_committed_total", "Total commit attempts per task"),
        &["result"], // "placed", "insufficient_balance", "vendor_rejected", "duplicate", "error"
    )
    .unwrap()
});

/// Terminal poll outcomes.
pub static POLL_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("stockdesk_poll_outcomes_total", "Terminal outcomes of order polling"),
        &["outcome"], // "ready", "error", "timeout"
    )
    .unwrap()
});

/// Tasks that reached `completed`.
pub static TASKS_COMPLETED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("stockdesk_tasks_completed_total", "Total tasks completed").unwrap()
});

// =============================================================================
// Ledger
// =============================================================================

/// Points moved through the ledger by entry kind.
pub static LEDGER_POINTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("stockdesk_ledger_points_total", "Points recorded in the ledger"),
        &["kind"], // "spend", "refund", "credit"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(VENDOR_REQUESTS.clone()),
        Box::new(VENDOR_REQUEST_DURATION.clone()),
        Box::new(PREVIEW_ITEMS.clone()),
        Box::new(ORDERS_COMMITTED.clone()),
        Box::new(POLL_OUTCOMES.clone()),
        Box::new(TASKS_COMPLETED.clone()),
        Box::new(LEDGER_POINTS.clone()),
    ]
}
