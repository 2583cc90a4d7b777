//! Testing utilities and mock implementations.
//!
//! `MockVendor` stands in for the upstream vendor so the whole order
//! lifecycle can run in-process.
//!
//! # Example
//!
//! ```rust,ignore
//! use stockdesk_core::testing::{fixtures, MockVendor};
//!
//! let vendor = MockVendor::new();
//! vendor.set_asset("shutterstock", "123", fixtures::asset_info("shutterstock", "123", 1)).await;
//!
//! // Use in AppState or OrderOrchestrator...
//! ```

mod mock_vendor;

pub use mock_vendor::{MockVendor, RecordedVendorCall};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::order::{NewTask, TaskStatus};
    use crate::vendor::{AssetInfo, OrderStatusReport, ResponseType, StockSite, VendorState};

    /// Create a catalog entry.
    pub fn stock_site(site: &str, active: bool) -> StockSite {
        StockSite {
            site: site.to_string(),
            display_name: site.to_string(),
            price: Some(1.0),
            min_price: None,
            currency: None,
            active,
        }
    }

    /// Create an orderable quote costing `points`.
    pub fn asset_info(site: &str, asset_id: &str, points: u64) -> AssetInfo {
        AssetInfo {
            site: site.to_string(),
            asset_id: asset_id.to_string(),
            cost_points: Some(points),
            cost_amount: Some(points as f64),
            currency: None,
            state: VendorState::Ready,
            title: Some(format!("Asset {}", asset_id)),
            preview_url: None,
            file_extension: Some("jpg".to_string()),
            message: None,
        }
    }

    pub fn processing_report() -> OrderStatusReport {
        OrderStatusReport {
            state: VendorState::Processing,
            progress: Some(50.0),
            download_url: None,
            message: None,
        }
    }

    pub fn ready_report(download_url: Option<&str>) -> OrderStatusReport {
        OrderStatusReport {
            state: VendorState::Ready,
            progress: Some(100.0),
            download_url: download_url.map(str::to_string),
            message: None,
        }
    }

    pub fn failed_report(message: &str) -> OrderStatusReport {
        OrderStatusReport {
            state: VendorState::Failed,
            progress: None,
            download_url: None,
            message: Some(message.to_string()),
        }
    }

    /// A pending task request.
    pub fn new_task(user_id: &str, site: &str, asset_id: &str, cost: u64) -> NewTask {
        NewTask {
            user_id: user_id.to_string(),
            site: site.to_string(),
            asset_id: asset_id.to_string(),
            source_url: None,
            status: TaskStatus::Pending,
            cost_points: Some(cost),
            cost_amount: Some(cost as f64),
            currency: None,
            title: None,
            preview_url: None,
            latest_message: None,
            response_type: ResponseType::Any,
        }
    }
}
