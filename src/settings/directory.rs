//! Contracts the coordinator relies on for remote services.
//!
//! Clients are bound to one endpoint at construction. The coordinator caches
//! them per service and drops the cache whenever that service's endpoint
//! changes, so a client never outlives the configuration it was built for.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::settings::error::SettingsError;
use crate::settings::providers::{DoclingClient, OllamaClient};
use crate::settings::types::{ModelDescriptor, ServiceEndpoint, ServiceKind};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Lists the models a remote inference service currently offers.
#[async_trait]
pub trait ModelDirectory: Send + Sync {
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, SettingsError>;
}

/// Lightweight reachability check. `Ok(())` means the service answered.
#[async_trait]
pub trait ConnectionProbe: Send + Sync {
    async fn probe(&self) -> Result<(), SettingsError>;
}

/// Builds endpoint-bound clients.
pub trait ServiceClientFactory: Send + Sync {
    fn model_directory(
        &self,
        endpoint: &ServiceEndpoint,
    ) -> Result<Arc<dyn ModelDirectory>, SettingsError>;

    fn connection_probe(
        &self,
        service: ServiceKind,
        endpoint: &ServiceEndpoint,
    ) -> Result<Arc<dyn ConnectionProbe>, SettingsError>;
}

/// Production factory backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    timeout: Duration,
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl HttpClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ServiceClientFactory for HttpClientFactory {
    fn model_directory(
        &self,
        endpoint: &ServiceEndpoint,
    ) -> Result<Arc<dyn ModelDirectory>, SettingsError> {
        Ok(Arc::new(OllamaClient::new(endpoint, self.timeout)?))
    }

    fn connection_probe(
        &self,
        service: ServiceKind,
        endpoint: &ServiceEndpoint,
    ) -> Result<Arc<dyn ConnectionProbe>, SettingsError> {
        let probe: Arc<dyn ConnectionProbe> = match service {
            ServiceKind::Chat => Arc::new(OllamaClient::new(endpoint, self.timeout)?),
            ServiceKind::Document => Arc::new(DoclingClient::new(endpoint, self.timeout)?),
        };
        Ok(probe)
    }
}
