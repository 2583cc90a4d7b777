//! HTTP surface of the stockdesk order engine.

pub mod api;
pub mod metrics;
pub mod state;
