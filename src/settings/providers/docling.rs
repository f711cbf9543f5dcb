use std::time::Duration;

use crate::settings::directory::ConnectionProbe;
use crate::settings::error::SettingsError;
use crate::settings::types::ServiceEndpoint;

/// Docling document-conversion server. Only the health route is used here.
pub struct DoclingClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl DoclingClient {
    pub fn new(endpoint: &ServiceEndpoint, timeout: Duration) -> Result<Self, SettingsError> {
        Self::with_base_url(endpoint.base_url(), timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SettingsError> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(SettingsError::InvalidInput(
                "docling base url cannot be empty".to_string(),
            ));
        }
        if timeout.is_zero() {
            return Err(SettingsError::InvalidInput(
                "docling timeout must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            timeout,
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|error| SettingsError::NetworkFailure(error.to_string()))?,
        })
    }
}

#[async_trait::async_trait]
impl ConnectionProbe for DoclingClient {
    async fn probe(&self) -> Result<(), SettingsError> {
        let endpoint = format!("{}/health", self.base_url);
        let response = self.client.get(&endpoint).send().await.map_err(|error| {
            if error.is_timeout() {
                SettingsError::NetworkFailure(format!(
                    "Docling health check timed out after {} ms",
                    self.timeout.as_millis()
                ))
            } else if error.is_connect() {
                SettingsError::NetworkFailure(format!(
                    "could not reach Docling at {}: {error}",
                    self.base_url
                ))
            } else {
                SettingsError::from(error)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SettingsError::NetworkFailure(format!(
                "docling /health returned status {}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}
