use std::time::Duration;

use serde::Deserialize;

use crate::settings::directory::{ConnectionProbe, ModelDirectory};
use crate::settings::error::SettingsError;
use crate::settings::types::{ModelDescriptor, ServiceEndpoint};

/// Families Ollama reports for models with an image encoder.
const VISION_FAMILIES: &[&str] = &["clip", "mllama"];

/// Name fragments of vision models whose tags omit family details.
const VISION_NAME_MARKERS: &[&str] = &[
    "llava",
    "bakllava",
    "vision",
    "moondream",
    "minicpm-v",
    "qwen2.5vl",
    "qwen2-vl",
    "granite3.2-vision",
];

/// Ollama client bound to one endpoint.
pub struct OllamaClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(endpoint: &ServiceEndpoint, timeout: Duration) -> Result<Self, SettingsError> {
        Self::with_base_url(endpoint.base_url(), timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SettingsError> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(SettingsError::InvalidInput(
                "ollama base url cannot be empty".to_string(),
            ));
        }
        if timeout.is_zero() {
            return Err(SettingsError::InvalidInput(
                "ollama timeout must be greater than 0".to_string(),
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

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, SettingsError> {
        let endpoint = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&endpoint)
            .send()
            .await
            .map_err(|error| self.map_connectivity_error(error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SettingsError::NetworkFailure(format!(
                "ollama {path} returned status {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }
        Ok(response)
    }

    fn map_connectivity_error(&self, error: reqwest::Error) -> SettingsError {
        if error.is_connect() {
            return SettingsError::NetworkFailure(format!(
                "could not reach Ollama at {}. Ensure 'ollama serve' is running and listening on this address",
                self.base_url
            ));
        }
        if error.is_timeout() {
            return SettingsError::NetworkFailure(format!(
                "Ollama request timed out after {} ms",
                self.timeout.as_millis()
            ));
        }
        SettingsError::from(error)
    }
}

#[async_trait::async_trait]
impl ModelDirectory for OllamaClient {
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, SettingsError> {
        let response = self.get("/api/tags").await?;
        let payload: TagsResponse = response.json().await.map_err(|error| {
            SettingsError::NetworkFailure(format!(
                "failed to parse Ollama /api/tags response: {error}"
            ))
        })?;

        Ok(payload
            .models
            .into_iter()
            .filter(|entry| !entry.name.trim().is_empty())
            .map(|entry| {
                let families = entry
                    .details
                    .as_ref()
                    .map(TagDetails::all_families)
                    .unwrap_or_default();
                let supports_vision = is_vision_model(&entry.name, &families);
                ModelDescriptor {
                    display_name: display_name_for(&entry.name),
                    name: entry.name,
                    supports_vision,
                }
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl ConnectionProbe for OllamaClient {
    async fn probe(&self) -> Result<(), SettingsError> {
        self.get("/api/version").await.map(|_| ())
    }
}

/// Decide vision capability from the reported families, falling back to
/// well-known model names.
pub fn is_vision_model(name: &str, families: &[String]) -> bool {
    if families
        .iter()
        .any(|family| VISION_FAMILIES.contains(&family.to_ascii_lowercase().as_str()))
    {
        return true;
    }
    let lowered = name.to_ascii_lowercase();
    VISION_NAME_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

fn display_name_for(name: &str) -> String {
    name.strip_suffix(":latest").unwrap_or(name).to_string()
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    details: Option<TagDetails>,
}

#[derive(Debug, Deserialize)]
struct TagDetails {
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    families: Option<Vec<String>>,
}

impl TagDetails {
    fn all_families(&self) -> Vec<String> {
        let mut families = self.families.clone().unwrap_or_default();
        if let Some(family) = self.family.as_ref() {
            families.push(family.clone());
        }
        families
    }
}

#[cfg(test)]
mod tests {
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn client_for(server: &MockServer) -> OllamaClient {
        OllamaClient::with_base_url(server.base_url(), Duration::from_secs(2))
            .expect("ollama client should initialize")
    }

    #[tokio::test]
    async fn list_models_maps_tags_to_descriptors() {
        let server = MockServer::start();
        let tags = server.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200).json_body(json!({
                "models": [
                    { "name": "llama3:latest", "model": "llama3:latest",
                      "details": { "family": "llama", "families": ["llama"] } },
                    { "name": "llava:13b",
                      "details": { "family": "llama", "families": ["llama", "clip"] } },
                    { "name": "llama3.2-vision:11b",
                      "details": { "family": "mllama" } },
                    { "name": "moondream" }
                ]
            }));
        });

        let models = client_for(&server).list_models().await.unwrap();

        tags.assert();
        assert_eq!(
            models,
            vec![
                ModelDescriptor::new("llama3:latest", "llama3", false),
                ModelDescriptor::new("llava:13b", "llava:13b", true),
                ModelDescriptor::new("llama3.2-vision:11b", "llama3.2-vision:11b", true),
                ModelDescriptor::new("moondream", "moondream", true),
            ]
        );
    }

    #[tokio::test]
    async fn list_models_reports_http_errors_as_network_failures() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(500).body("boom");
        });

        let error = client_for(&server).list_models().await.unwrap_err();
        match error {
            SettingsError::NetworkFailure(message) => {
                assert!(message.contains("status 500"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_models_rejects_malformed_payloads() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200).json_body(json!({ "items": [] }));
        });

        let error = client_for(&server).list_models().await.unwrap_err();
        assert!(matches!(error, SettingsError::NetworkFailure(ref m) if m.contains("/api/tags")));
    }

    #[tokio::test]
    async fn probe_hits_the_version_endpoint() {
        let server = MockServer::start();
        let version = server.mock(|when, then| {
            when.method(GET).path("/api/version");
            then.status(200).json_body(json!({ "version": "0.5.7" }));
        });

        client_for(&server).probe().await.unwrap();
        version.assert();
    }

    #[tokio::test]
    async fn unreachable_server_mentions_ollama_serve() {
        // Port 9 (discard) is closed on test machines.
        let client =
            OllamaClient::with_base_url("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let error = client.probe().await.unwrap_err();
        assert!(matches!(error, SettingsError::NetworkFailure(_)));
    }

    #[test]
    fn vision_detection_uses_families_then_names() {
        assert!(is_vision_model("custom", &["CLIP".to_string()]));
        assert!(is_vision_model("bakllava:7b", &[]));
        assert!(!is_vision_model("mistral:7b", &["llama".to_string()]));
    }

    #[test]
    fn construction_rejects_zero_timeout() {
        assert!(OllamaClient::with_base_url("http://localhost:11434", Duration::ZERO).is_err());
    }
}
