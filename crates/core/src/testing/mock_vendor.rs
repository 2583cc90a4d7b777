//! Mock vendor gateway for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::vendor::{
    AssetInfo, DownloadLink, OrderStatusReport, PlacedOrder, ResponseType, StockSite,
    VendorError, VendorGateway, VendorState,
};

type AssetKey = (String, String);

fn key(site: &str, asset_id: &str) -> AssetKey {
    (site.to_string(), asset_id.to_string())
}

/// A recorded gateway call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedVendorCall {
    pub operation: &'static str,
    pub site: Option<String>,
    pub asset_id: Option<String>,
    pub external_task_id: Option<String>,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Mock implementation of the VendorGateway trait.
///
/// Provides controllable behavior for testing:
/// - Configure the catalog and per-asset quotes
/// - Script order status responses per asset
/// - Fail specific orders or the next call
/// - Record every call for assertions
///
/// # Example
///
/// ```rust,ignore
/// let vendor = MockVendor::new();
/// vendor.set_asset("shutterstock", "123", fixtures::asset_info("shutterstock", "123", 1)).await;
/// vendor.set_status_script("shutterstock", "123", vec![
///     Ok(fixtures::processing_report()),
///     Ok(fixtures::ready_report(None)),
/// ]).await;
/// ```
#[derive(Debug)]
pub struct MockVendor {
    sites: Arc<RwLock<Vec<StockSite>>>,
    assets: Arc<RwLock<HashMap<AssetKey, AssetInfo>>>,
    /// create_order fails for these assets.
    order_failures: Arc<RwLock<HashMap<AssetKey, VendorError>>>,
    /// Status responses per asset, consumed in order; the last one repeats.
    status_scripts: Arc<RwLock<HashMap<AssetKey, Vec<Result<OrderStatusReport, VendorError>>>>>,
    /// external task id -> asset.
    orders: Arc<RwLock<HashMap<String, AssetKey>>>,
    download_error: Arc<RwLock<Option<VendorError>>>,
    /// If set, the next operation will fail with this error.
    next_error: Arc<RwLock<Option<VendorError>>>,
    order_delay: Arc<RwLock<Option<Duration>>>,
    calls: Arc<RwLock<Vec<RecordedVendorCall>>>,
    order_counter: Arc<RwLock<u32>>,
}

impl Default for MockVendor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVendor {
    pub fn new() -> Self {
        Self {
            sites: Arc::new(RwLock::new(Vec::new())),
            assets: Arc::new(RwLock::new(HashMap::new())),
            order_failures: Arc::new(RwLock::new(HashMap::new())),
            status_scripts: Arc::new(RwLock::new(HashMap::new())),
            orders: Arc::new(RwLock::new(HashMap::new())),
            download_error: Arc::new(RwLock::new(None)),
            next_error: Arc::new(RwLock::new(None)),
            order_delay: Arc::new(RwLock::new(None)),
            calls: Arc::new(RwLock::new(Vec::new())),
            order_counter: Arc::new(RwLock::new(0)),
        }
    }

    pub async fn set_sites(&self, sites: Vec<StockSite>) {
        *self.sites.write().await = sites;
    }

    pub async fn set_asset(&self, site: &str, asset_id: &str, info: AssetInfo) {
        self.assets.write().await.insert(key(site, asset_id), info);
    }

    /// Make create_order fail for one asset.
    pub async fn fail_order(&self, site: &str, asset_id: &str, error: VendorError) {
        self.order_failures
            .write()
            .await
            .insert(key(site, asset_id), error);
    }

    /// Script status responses for orders of one asset.
    pub async fn set_status_script(
        &self,
        site: &str,
        asset_id: &str,
        script: Vec<Result<OrderStatusReport, VendorError>>,
    ) {
        self.status_scripts
            .write()
            .await
            .insert(key(site, asset_id), script);
    }

    pub async fn set_download_error(&self, error: Option<VendorError>) {
        *self.download_error.write().await = error;
    }

    /// Set an error to be returned by the next operation.
    pub async fn set_next_error(&self, error: VendorError) {
        *self.next_error.write().await = Some(error);
    }

    /// Delay every create_order call.
    pub async fn set_order_delay(&self, delay: Duration) {
        *self.order_delay.write().await = Some(delay);
    }

    /// All recorded calls.
    pub async fn calls(&self) -> Vec<RecordedVendorCall> {
        self.calls.read().await.clone()
    }

    /// Number of recorded calls of one operation.
    pub async fn call_count(&self, operation: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Recorded create_order calls.
    pub async fn created_orders(&self) -> Vec<RecordedVendorCall> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.operation == "create_order")
            .cloned()
            .collect()
    }

    async fn record(
        &self,
        operation: &'static str,
        asset: Option<&AssetKey>,
        external_task_id: Option<&str>,
    ) -> Result<(), VendorError> {
        self.calls.write().await.push(RecordedVendorCall {
            operation,
            site: asset.map(|k| k.0.clone()),
            asset_id: asset.map(|k| k.1.clone()),
            external_task_id: external_task_id.map(str::to_string),
            timestamp: Utc::now(),
        });
        match self.next_error.write().await.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl VendorGateway for MockVendor {
    async fn list_sites(&self) -> Result<Vec<StockSite>, VendorError> {
        self.record("list_sites", None, None).await?;
        Ok(self.sites.read().await.clone())
    }

    async fn get_asset_info(
        &self,
        site: &str,
        asset_id: &str,
        _source_url: Option<&str>,
    ) -> Result<AssetInfo, VendorError> {
        let k = key(site, asset_id);
        self.record("get_asset_info", Some(&k), None).await?;
        self.assets
            .read()
            .await
            .get(&k)
            .cloned()
            .ok_or_else(|| VendorError::Rejected {
                status: Some(404),
                message: format!("asset {}:{} not found", site, asset_id),
            })
    }

    async fn create_order(
        &self,
        site: &str,
        asset_id: &str,
        _source_url: Option<&str>,
    ) -> Result<PlacedOrder, VendorError> {
        let k = key(site, asset_id);
        self.record("create_order", Some(&k), None).await?;

        let delay = *self.order_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(e) = self.order_failures.read().await.get(&k) {
            return Err(e.clone());
        }

        let external_task_id = {
            let mut counter = self.order_counter.write().await;
            *counter += 1;
            format!("vt-{}", *counter)
        };
        self.orders
            .write()
            .await
            .insert(external_task_id.clone(), k);

        Ok(PlacedOrder {
            external_task_id,
            state: VendorState::Processing,
            download_url: None,
            message: None,
        })
    }

    async fn get_order_status(
        &self,
        external_task_id: &str,
    ) -> Result<OrderStatusReport, VendorError> {
        let asset = self.orders.read().await.get(external_task_id).cloned();
        self.record("get_order_status", asset.as_ref(), Some(external_task_id))
            .await?;

        let Some(asset) = asset else {
            return Err(VendorError::Rejected {
                status: Some(404),
                message: format!("unknown task {}", external_task_id),
            });
        };

        let mut scripts = self.status_scripts.write().await;
        match scripts.get_mut(&asset) {
            Some(script) if script.len() > 1 => script.remove(0),
            Some(script) if script.len() == 1 => script[0].clone(),
            _ => Ok(OrderStatusReport {
                state: VendorState::Ready,
                progress: Some(100.0),
                download_url: None,
                message: None,
            }),
        }
    }

    async fn resolve_download(
        &self,
        external_task_id: &str,
        response_type: ResponseType,
    ) -> Result<DownloadLink, VendorError> {
        let asset = self.orders.read().await.get(external_task_id).cloned();
        self.record("resolve_download", asset.as_ref(), Some(external_task_id))
            .await?;

        if let Some(e) = self.download_error.read().await.as_ref() {
            return Err(e.clone());
        }

        let file_name = asset.map(|(site, id)| format!("{}_{}.jpg", site, id));
        Ok(DownloadLink {
            download_url: format!(
                "https://cdn.mock.test/{}/{}",
                response_type.as_str(),
                external_task_id
            ),
            file_name,
        })
    }
}
