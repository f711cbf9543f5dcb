use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::settings::error::SettingsError;

pub const DEFAULT_HOSTNAME: &str = "localhost";
pub const DEFAULT_OLLAMA_PORT: u16 = 11434;
pub const DEFAULT_DOCLING_PORT: u16 = 5001;

/// Suffix appended to a stored preference that the directory no longer reports.
pub const NOT_AVAILABLE_SUFFIX: &str = " (not available)";

// ---------------------------------------------------------------------------
// Services and endpoints
// ---------------------------------------------------------------------------

/// A remote service the app talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Ollama, serving chat/vision models.
    #[serde(rename = "ollama")]
    Chat,
    /// Docling, converting scanned documents.
    #[serde(rename = "docling")]
    Document,
}

impl ServiceKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "ollama",
            Self::Document => "docling",
        }
    }

    pub const fn all() -> &'static [ServiceKind] {
        &[ServiceKind::Chat, ServiceKind::Document]
    }

    pub const fn default_port(&self) -> u16 {
        match self {
            Self::Chat => DEFAULT_OLLAMA_PORT,
            Self::Document => DEFAULT_DOCLING_PORT,
        }
    }

    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Chat => "Ollama",
            Self::Document => "Docling",
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" | "chat" => Ok(Self::Chat),
            "docling" | "document" | "documents" => Ok(Self::Document),
            _ => Err(format!("unsupported service: {value}")),
        }
    }
}

/// Hostname and port of one remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    #[serde(default)]
    pub hostname: String,
    /// Stored values outside `u16` load as 0 and are repaired by `sanitized`.
    #[serde(default, deserialize_with = "lenient_port")]
    pub port: u16,
}

fn lenient_port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_u64()
        .and_then(|port| u16::try_from(port).ok())
        .unwrap_or(0))
}

impl ServiceEndpoint {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }

    pub fn default_for(service: ServiceKind) -> Self {
        Self::new(DEFAULT_HOSTNAME, service.default_port())
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.hostname, self.port)
    }

    /// An endpoint loaded from storage may predate validation; repair the
    /// fields that would break URL construction.
    pub(crate) fn sanitized(mut self, service: ServiceKind) -> Self {
        if validate_hostname(&self.hostname).is_err() {
            self.hostname = DEFAULT_HOSTNAME.to_string();
        }
        if self.port == 0 {
            self.port = service.default_port();
        }
        self
    }
}

/// Parse a port typed into an edit field. Only integers in `[1, 65535]` pass.
pub fn parse_port(value: &str) -> Result<u16, SettingsError> {
    let trimmed = value.trim();
    let parsed: i64 = trimmed
        .parse()
        .map_err(|_| SettingsError::InvalidInput(format!("port '{value}' is not an integer")))?;
    if !(1..=i64::from(u16::MAX)).contains(&parsed) {
        return Err(SettingsError::InvalidInput(format!(
            "port {parsed} is outside 1-65535"
        )));
    }
    Ok(parsed as u16)
}

/// Validate a hostname typed into an edit field and return its trimmed form.
pub fn validate_hostname(value: &str) -> Result<String, SettingsError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SettingsError::InvalidInput(
            "hostname cannot be empty".to_string(),
        ));
    }
    if trimmed.chars().any(|c| c.is_whitespace() || c == '/' || c == '@') {
        return Err(SettingsError::InvalidInput(format!(
            "hostname '{trimmed}' contains invalid characters"
        )));
    }
    let url = reqwest::Url::parse(&format!("http://{trimmed}:1")).map_err(|error| {
        SettingsError::InvalidInput(format!("invalid hostname '{trimmed}': {error}"))
    })?;
    if url.host_str().is_none() || url.port() != Some(1) {
        return Err(SettingsError::InvalidInput(format!(
            "invalid hostname '{trimmed}'"
        )));
    }
    Ok(trimmed.to_string())
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// One entry of a remote model directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub name: String,
    pub display_name: String,
    pub supports_vision: bool,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>, supports_vision: bool) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            supports_vision,
        }
    }
}

/// Which preference slot a model is picked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModelRole {
    #[serde(rename = "chatModel")]
    Chat,
    #[serde(rename = "documentModel")]
    Document,
    #[serde(rename = "visionModel")]
    Vision,
}

impl ModelRole {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chatModel",
            Self::Document => "documentModel",
            Self::Vision => "visionModel",
        }
    }

    pub const fn all() -> &'static [ModelRole] {
        &[ModelRole::Chat, ModelRole::Document, ModelRole::Vision]
    }

    /// Document and vision work feeds images to the model.
    pub const fn requires_vision(&self) -> bool {
        matches!(self, Self::Document | Self::Vision)
    }
}

impl FromStr for ModelRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chat" | "chatmodel" => Ok(Self::Chat),
            "document" | "documentmodel" => Ok(Self::Document),
            "vision" | "visionmodel" => Ok(Self::Vision),
            _ => Err(format!("unsupported model role: {value}")),
        }
    }
}

/// Context window sizes offered to the user.
///
/// Deserialization never fails: a stored value outside the offered set (an
/// older build allowed 2048) loads as the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "u32")]
pub struct ContextSize(u32);

impl<'de> Deserialize<'de> for ContextSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let size = value
            .as_u64()
            .and_then(|raw| u32::try_from(raw).ok())
            .and_then(|raw| ContextSize::try_from(raw).ok());
        Ok(size.unwrap_or_else(|| {
            tracing::warn!("stored context size {value} is not offered, using default");
            ContextSize::default()
        }))
    }
}

impl ContextSize {
    pub const ALLOWED: [u32; 5] = [4096, 8192, 16384, 32768, 65536];

    pub const fn get(&self) -> u32 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = ContextSize> {
        Self::ALLOWED.into_iter().map(ContextSize)
    }
}

impl Default for ContextSize {
    fn default() -> Self {
        Self(8192)
    }
}

impl TryFrom<u32> for ContextSize {
    type Error = SettingsError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if Self::ALLOWED.contains(&value) {
            Ok(Self(value))
        } else {
            Err(SettingsError::InvalidInput(format!(
                "context size {value} must be one of {:?}",
                Self::ALLOWED
            )))
        }
    }
}

impl From<ContextSize> for u32 {
    fn from(value: ContextSize) -> Self {
        value.0
    }
}

/// Selected model names per role. Names are stored by value and may refer to
/// models the directory no longer lists.
///
/// An empty name means "nothing chosen yet".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelPreferences {
    pub chat_model: String,
    pub document_model: String,
    pub vision_model: String,
    pub context_size_limit: ContextSize,
}

impl ModelPreferences {
    pub fn model_for(&self, role: ModelRole) -> &str {
        match role {
            ModelRole::Chat => &self.chat_model,
            ModelRole::Document => &self.document_model,
            ModelRole::Vision => &self.vision_model,
        }
    }

    pub(crate) fn model_for_mut(&mut self, role: ModelRole) -> &mut String {
        match role {
            ModelRole::Chat => &mut self.chat_model,
            ModelRole::Document => &mut self.document_model,
            ModelRole::Vision => &mut self.vision_model,
        }
    }
}

/// A row in a role's model picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOption {
    pub name: String,
    pub display_name: String,
    pub supports_vision: bool,
    /// False for the synthesized entry that keeps a stored choice visible.
    pub is_available: bool,
}

impl From<&ModelDescriptor> for ModelOption {
    fn from(value: &ModelDescriptor) -> Self {
        Self {
            name: value.name.clone(),
            display_name: value.display_name.clone(),
            supports_vision: value.supports_vision,
            is_available: true,
        }
    }
}

impl ModelOption {
    pub fn unavailable(name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: format!("{name}{NOT_AVAILABLE_SUFFIX}"),
            supports_vision: false,
            is_available: false,
        }
    }
}

/// Model directory cache as seen by the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSelectionState {
    pub available_models: Vec<ModelDescriptor>,
    pub is_loading: bool,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Connection status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Unknown,
    Testing,
    Connected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
    Gray,
    Orange,
    Green,
    Red,
}

impl ConnectionStatus {
    pub const fn icon(&self) -> &'static str {
        match self {
            Self::Unknown => "questionmark.circle",
            Self::Testing => "arrow.triangle.2.circlepath",
            Self::Connected => "checkmark.circle.fill",
            Self::Failed => "xmark.circle.fill",
        }
    }

    pub const fn color(&self) -> StatusColor {
        match self {
            Self::Unknown => StatusColor::Gray,
            Self::Testing => StatusColor::Orange,
            Self::Connected => StatusColor::Green,
            Self::Failed => StatusColor::Red,
        }
    }

    pub const fn text(&self) -> &'static str {
        match self {
            Self::Unknown => "Not tested",
            Self::Testing => "Testing...",
            Self::Connected => "Connected",
            Self::Failed => "Connection failed",
        }
    }
}

/// All reactive fields, cloned at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSnapshot {
    pub ollama_config: ServiceEndpoint,
    pub docling_config: ServiceEndpoint,
    pub model_preferences: ModelPreferences,
    pub model_selection: ModelSelectionState,
    pub ollama_status: ConnectionStatus,
    pub docling_status: ConnectionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_port_accepts_only_the_valid_range() {
        assert_eq!(parse_port("1").unwrap(), 1);
        assert_eq!(parse_port(" 11434 ").unwrap(), 11434);
        assert_eq!(parse_port("65535").unwrap(), 65535);

        for bad in ["0", "65536", "-1", "", "abc", "80a", "99999999999999999999"] {
            assert!(
                matches!(parse_port(bad), Err(SettingsError::InvalidInput(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn validate_hostname_trims_and_rejects_garbage() {
        assert_eq!(validate_hostname("  localhost ").unwrap(), "localhost");
        assert_eq!(validate_hostname("192.168.1.20").unwrap(), "192.168.1.20");
        assert_eq!(validate_hostname("mac-mini.local").unwrap(), "mac-mini.local");

        for bad in ["", "   ", "my host", "http://x", "host/path", "user@host", "host:80"] {
            assert!(validate_hostname(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn context_size_only_allows_the_offered_values() {
        assert_eq!(ContextSize::try_from(16384).unwrap().get(), 16384);
        assert!(ContextSize::try_from(1000).is_err());
        assert_eq!(ContextSize::all().count(), 5);

        let parsed: ModelPreferences =
            serde_json::from_str(r#"{"chatModel": "llama3", "contextSizeLimit": 1234}"#).unwrap();
        assert_eq!(parsed.context_size_limit, ContextSize::default());
        assert_eq!(parsed.chat_model, "llama3");

        let parsed: ModelPreferences =
            serde_json::from_str(r#"{"contextSizeLimit": "large"}"#).unwrap();
        assert_eq!(parsed.context_size_limit.get(), 8192);
    }

    #[test]
    fn status_metadata_is_distinct_per_state() {
        let all = [
            ConnectionStatus::Unknown,
            ConnectionStatus::Testing,
            ConnectionStatus::Connected,
            ConnectionStatus::Failed,
        ];
        let texts: std::collections::HashSet<_> = all.iter().map(|s| s.text()).collect();
        assert_eq!(texts.len(), 4);
        assert_eq!(ConnectionStatus::Connected.color(), StatusColor::Green);
        assert_eq!(ConnectionStatus::Failed.color(), StatusColor::Red);
    }

    #[test]
    fn service_kind_round_trips_through_its_id() {
        for service in ServiceKind::all() {
            assert_eq!(service.as_str().parse::<ServiceKind>().unwrap(), *service);
        }
        assert_eq!(
            serde_json::to_string(&ServiceKind::Document).unwrap(),
            "\"docling\""
        );
    }
}
