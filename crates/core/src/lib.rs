pub mod auth;
pub mod batch;
pub mod config;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod order;
pub mod pricing;
pub mod resolver;
pub mod store;
pub mod testing;
pub mod vendor;

pub use auth::{
    create_authenticator, ApiKeyAuthenticator, AuthError, AuthRequest, Authenticator, Identity,
    NoneAuthenticator,
};
pub use batch::{Batch, BatchStats, BatchStatus, BatchStore, MAX_BATCH_SIZE};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthMethod, Config, ConfigError,
    SanitizedConfig,
};
pub use ledger::{BalanceLedger, LedgerEntry, LedgerEntryKind, LedgerError};
pub use orchestrator::{
    CommitRequest, CommitResponse, ErrorKind, ItemError, OrchestratorConfig, OrchestratorError,
    OrderOrchestrator, PreviewItem, PreviewRequest, PreviewResponse,
};
pub use order::{StoreError, Task, TaskFilter, TaskStatus, TaskStore};
pub use pricing::{PricingCache, PricingConfig};
pub use store::{ChargeError, ChargeOutcome, OrderStore, SqliteStore};
pub use vendor::{HttpVendorClient, ResponseType, VendorConfig, VendorError, VendorGateway};
