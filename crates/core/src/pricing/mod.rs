//! TTL cache over the vendor's site catalog and per-asset quotes.
//!
//! The cache only speeds up previews. Affordability is always decided by
//! the ledger at commit time.

mod config;

pub use config::PricingConfig;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::vendor::{AssetInfo, StockSite, VendorError, VendorGateway, VendorState};

struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

impl<T> Cached<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Read-mostly cache in front of a [`VendorGateway`].
pub struct PricingCache {
    vendor: Arc<dyn VendorGateway>,
    site_ttl: Duration,
    asset_ttl: Duration,
    sites: RwLock<Option<Cached<Vec<StockSite>>>>,
    quotes: RwLock<HashMap<(String, String), Cached<AssetInfo>>>,
}

impl PricingCache {
    pub fn new(vendor: Arc<dyn VendorGateway>, config: &PricingConfig) -> Self {
        Self {
            vendor,
            site_ttl: Duration::from_secs(config.site_ttl_secs),
            asset_ttl: Duration::from_secs(config.asset_ttl_secs),
            sites: RwLock::new(None),
            quotes: RwLock::new(HashMap::new()),
        }
    }

    /// Site catalog, refreshed from the vendor when stale.
    pub async fn get_sites(&self) -> Result<Vec<StockSite>, VendorError> {
        if let Some(cached) = self.sites.read().await.as_ref() {
            if cached.is_fresh(self.site_ttl) {
                return Ok(cached.value.clone());
            }
        }

        debug!("Refreshing site catalog");
        let sites = self.vendor.list_sites().await?;
        *self.sites.write().await = Some(Cached::new(sites.clone()));
        Ok(sites)
    }

    /// Catalog entry for one site, if the vendor lists it.
    pub async fn get_site(&self, site: &str) -> Result<Option<StockSite>, VendorError> {
        Ok(self.get_sites().await?.into_iter().find(|s| s.site == site))
    }

    /// Quote for one asset. Only orderable quotes are cached, and each write
    /// drops the entries that have gone stale.
    pub async fn quote(
        &self,
        site: &str,
        asset_id: &str,
        source_url: Option<&str>,
    ) -> Result<AssetInfo, VendorError> {
        let key = (site.to_string(), asset_id.to_string());
        if let Some(cached) = self.quotes.read().await.get(&key) {
            if cached.is_fresh(self.asset_ttl) {
                return Ok(cached.value.clone());
            }
        }

        let info = self
            .vendor
            .get_asset_info(site, asset_id, source_url)
            .await?;

        if info.state == VendorState::Ready && info.cost_points.is_some() {
            let ttl = self.asset_ttl;
            let mut quotes = self.quotes.write().await;
            quotes.retain(|_, cached| cached.is_fresh(ttl));
            if !ttl.is_zero() {
                quotes.insert(key, Cached::new(info.clone()));
            }
        }
        Ok(info)
    }

    /// Number of quotes currently held.
    pub async fn cached_quotes(&self) -> usize {
        self.quotes.read().await.len()
    }

    /// Cost in points for one asset, if the vendor quotes one.
    pub async fn get_asset_cost(
        &self,
        site: &str,
        asset_id: &str,
    ) -> Result<Option<u64>, VendorError> {
        Ok(self.quote(site, asset_id, None).await?.cost_points)
    }

    pub async fn invalidate_asset(&self, site: &str, asset_id: &str) {
        self.quotes
            .write()
            .await
            .remove(&(site.to_string(), asset_id.to_string()));
    }

    pub async fn invalidate_sites(&self) {
        *self.sites.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockVendor};

    fn cache(vendor: Arc<MockVendor>, site_ttl: u64, asset_ttl: u64) -> PricingCache {
        PricingCache::new(
            vendor,
            &PricingConfig {
                site_ttl_secs: site_ttl,
                asset_ttl_secs: asset_ttl,
            },
        )
    }

    #[tokio::test]
    async fn test_sites_are_cached() {
        let vendor = Arc::new(MockVendor::new());
        vendor.set_sites(vec![fixtures::stock_site("shutterstock", true)]).await;
        let cache = cache(Arc::clone(&vendor), 3600, 1800);

        assert_eq!(cache.get_sites().await.unwrap().len(), 1);
        assert_eq!(cache.get_sites().await.unwrap().len(), 1);
        assert_eq!(vendor.call_count("list_sites").await, 1);

        cache.invalidate_sites().await;
        cache.get_sites().await.unwrap();
        assert_eq!(vendor.call_count("list_sites").await, 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_refreshes() {
        let vendor = Arc::new(MockVendor::new());
        vendor.set_asset("adobestock", "42", fixtures::asset_info("adobestock", "42", 3)).await;
        let cache = cache(Arc::clone(&vendor), 0, 0);

        cache.quote("adobestock", "42", None).await.unwrap();
        cache.quote("adobestock", "42", None).await.unwrap();
        assert_eq!(vendor.call_count("get_asset_info").await, 2);
    }

    #[tokio::test]
    async fn test_quotes_are_cached_until_invalidated() {
        let vendor = Arc::new(MockVendor::new());
        vendor.set_asset("adobestock", "42", fixtures::asset_info("adobestock", "42", 3)).await;
        let cache = cache(Arc::clone(&vendor), 3600, 1800);

        assert_eq!(cache.get_asset_cost("adobestock", "42").await.unwrap(), Some(3));
        assert_eq!(cache.get_asset_cost("adobestock", "42").await.unwrap(), Some(3));
        assert_eq!(vendor.call_count("get_asset_info").await, 1);

        vendor.set_asset("adobestock", "42", fixtures::asset_info("adobestock", "42", 5)).await;
        cache.invalidate_asset("adobestock", "42").await;
        assert_eq!(cache.get_asset_cost("adobestock", "42").await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_stale_quotes_are_dropped_on_write() {
        let vendor = Arc::new(MockVendor::new());
        for id in ["1", "2", "3"] {
            vendor.set_asset("adobestock", id, fixtures::asset_info("adobestock", id, 2)).await;
        }
        let cache = cache(Arc::clone(&vendor), 3600, 1);

        cache.quote("adobestock", "1", None).await.unwrap();
        cache.quote("adobestock", "2", None).await.unwrap();
        assert_eq!(cache.cached_quotes().await, 2);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        cache.quote("adobestock", "3", None).await.unwrap();
        assert_eq!(cache.cached_quotes().await, 1);

        cache.quote("adobestock", "3", None).await.unwrap();
        assert_eq!(vendor.call_count("get_asset_info").await, 3);
    }

    #[tokio::test]
    async fn test_zero_ttl_keeps_nothing() {
        let vendor = Arc::new(MockVendor::new());
        vendor.set_asset("adobestock", "42", fixtures::asset_info("adobestock", "42", 3)).await;
        let cache = cache(Arc::clone(&vendor), 0, 0);

        cache.quote("adobestock", "42", None).await.unwrap();
        assert_eq!(cache.cached_quotes().await, 0);
    }

    #[tokio::test]
    async fn test_unavailable_quotes_are_not_cached() {
        let vendor = Arc::new(MockVendor::new());
        let mut info = fixtures::asset_info("freepik", "7", 1);
        info.state = VendorState::Failed;
        vendor.set_asset("freepik", "7", info).await;
        let cache = cache(Arc::clone(&vendor), 3600, 1800);

        cache.quote("freepik", "7", None).await.unwrap();
        cache.quote("freepik", "7", None).await.unwrap();
        assert_eq!(vendor.call_count("get_asset_info").await, 2);
    }

    #[tokio::test]
    async fn test_vendor_errors_are_not_cached() {
        let vendor = Arc::new(MockVendor::new());
        let cache = cache(Arc::clone(&vendor), 3600, 1800);
        vendor.set_next_error(VendorError::Timeout("slow".into())).await;

        assert!(cache.get_sites().await.is_err());
        assert!(cache.get_sites().await.is_ok());
        assert_eq!(vendor.call_count("list_sites").await, 2);
    }
}
