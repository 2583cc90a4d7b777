//! Common test utilities for API testing with mocks.
//!
//! Builds an in-process router over a real SQLite store and a
//! [`MockVendor`], so the order lifecycle can be driven over HTTP without
//! external infrastructure.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use stockdesk_core::{
    config::{AuthConfig, DatabaseConfig, ServerConfig},
    testing::MockVendor,
    AuthMethod, Authenticator, BalanceLedger, Config, NoneAuthenticator, OrchestratorConfig,
    OrderOrchestrator, OrderStore, PricingCache, PricingConfig, SqliteStore, VendorConfig,
    VendorGateway,
};
use stockdesk_server::{api::create_router, state::AppState};

/// Re-export fixtures for test convenience
pub use stockdesk_core::testing::fixtures;

pub const USER: &str = "alice";

/// Test fixture for API testing with a mock vendor.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_balance() {
///     let fixture = TestFixture::new().await;
///     fixture.fund(USER, 10);
///
///     let response = fixture.get("/api/v1/balance", Some(USER)).await;
///     assert_eq!(response.body["balance"], 10);
/// }
/// ```
pub struct TestFixture {
    pub router: Router,
    pub store: Arc<SqliteStore>,
    pub vendor: Arc<MockVendor>,
    pub orchestrator: Arc<OrderOrchestrator>,
    /// Keeps the database alive for the fixture's lifetime.
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

/// Configuration for the test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub auth_method: AuthMethod,
    pub api_key: Option<String>,
    /// Background pollers; disabled by default so tests poll explicitly.
    pub background_polling: bool,
    pub max_poll_attempts: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            auth_method: AuthMethod::None,
            api_key: None,
            background_polling: false,
            max_poll_attempts: 5,
        }
    }
}

impl TestConfig {
    pub fn with_api_key(key: &str) -> Self {
        Self {
            auth_method: AuthMethod::ApiKey,
            api_key: Some(key.to_string()),
            ..Self::default()
        }
    }
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let config = Config {
            auth: AuthConfig {
                method: test_config.auth_method,
                api_key: test_config.api_key.clone(),
            },
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            vendor: VendorConfig {
                base_url: "http://vendor.invalid/api".to_string(),
                api_key: "vendor-secret".to_string(),
                api_key_header: "X-Api-Key".to_string(),
                timeout_secs: 5,
                response_type: Default::default(),
            },
            pricing: PricingConfig::default(),
            orchestrator: OrchestratorConfig {
                background_polling: test_config.background_polling,
                poll_interval_ms: 1,
                max_poll_attempts: test_config.max_poll_attempts,
                ..Default::default()
            },
        };

        let authenticator: Arc<dyn Authenticator> = match test_config.auth_method {
            AuthMethod::None => Arc::new(NoneAuthenticator::new()),
            AuthMethod::ApiKey => Arc::from(
                stockdesk_core::create_authenticator(&config.auth)
                    .expect("Failed to create authenticator"),
            ),
        };

        let store = Arc::new(SqliteStore::new(&db_path).expect("Failed to create store"));
        let vendor = Arc::new(MockVendor::new());
        vendor
            .set_sites(vec![
                fixtures::stock_site("shutterstock", true),
                fixtures::stock_site("adobestock", true),
                fixtures::stock_site("istockphoto", false),
            ])
            .await;

        let vendor_dyn: Arc<dyn VendorGateway> = vendor.clone();
        let pricing = Arc::new(PricingCache::new(Arc::clone(&vendor_dyn), &config.pricing));
        let store_dyn: Arc<dyn OrderStore> = store.clone();
        let orchestrator = Arc::new(OrderOrchestrator::new(
            config.orchestrator.clone(),
            Arc::clone(&store_dyn),
            vendor_dyn,
            pricing,
        ));
        orchestrator.start().await;

        let state = Arc::new(AppState::new(
            config,
            authenticator,
            store_dyn,
            Arc::clone(&orchestrator),
        ));
        let router = create_router(state);

        Self {
            router,
            store,
            vendor,
            orchestrator,
            temp_dir,
        }
    }

    /// Credit points to a user.
    pub fn fund(&self, user_id: &str, points: u64) {
        self.store
            .credit(user_id, points, "test top-up")
            .expect("Failed to credit user");
    }

    /// Register an orderable asset with the mock vendor.
    pub async fn offer(&self, site: &str, asset_id: &str, points: u64) {
        self.vendor
            .set_asset(site, asset_id, fixtures::asset_info(site, asset_id, points))
            .await;
    }

    pub async fn get(&self, path: &str, user: Option<&str>) -> TestResponse {
        self.request("GET", path, user, &[], None).await
    }

    pub async fn post(&self, path: &str, user: Option<&str>, body: Value) -> TestResponse {
        self.request("POST", path, user, &[], Some(body)).await
    }

    /// Send a request with extra headers.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        user: Option<&str>,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);
        if let Some(user) = user {
            request_builder = request_builder.header("X-User-Id", user);
        }
        for (name, value) in headers {
            request_builder = request_builder.header(*name, *value);
        }

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
