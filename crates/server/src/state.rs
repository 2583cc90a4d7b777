use std::sync::Arc;

use stockdesk_core::{Authenticator, Config, OrderOrchestrator, OrderStore, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    store: Arc<dyn OrderStore>,
    orchestrator: Arc<OrderOrchestrator>,
}

impl AppState {
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn OrderStore>,
        orchestrator: Arc<OrderOrchestrator>,
    ) -> Self {
        Self {
            config,
            authenticator,
            store,
            orchestrator,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn store(&self) -> &dyn OrderStore {
        self.store.as_ref()
    }

    pub fn orchestrator(&self) -> &OrderOrchestrator {
        self.orchestrator.as_ref()
    }
}
