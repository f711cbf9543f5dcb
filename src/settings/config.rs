use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::db::Database;
use crate::settings::error::SettingsError;
use crate::settings::types::{
    parse_port, validate_hostname, ModelPreferences, ServiceEndpoint, ServiceKind,
};

pub const SETTINGS_RECORD_KEY: &str = "app_settings";

pub const ENV_OLLAMA_HOST: &str = "HEALTHLINK_OLLAMA_HOST";
pub const ENV_OLLAMA_PORT: &str = "HEALTHLINK_OLLAMA_PORT";
pub const ENV_DOCLING_HOST: &str = "HEALTHLINK_DOCLING_HOST";
pub const ENV_DOCLING_PORT: &str = "HEALTHLINK_DOCLING_PORT";

/// The persisted settings: both service endpoints and the model preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SettingsRecord {
    pub ollama: ServiceEndpoint,
    pub docling: ServiceEndpoint,
    pub model_preferences: ModelPreferences,
}

impl Default for SettingsRecord {
    fn default() -> Self {
        Self {
            ollama: ServiceEndpoint::default_for(ServiceKind::Chat),
            docling: ServiceEndpoint::default_for(ServiceKind::Document),
            model_preferences: ModelPreferences::default(),
        }
    }
}

impl SettingsRecord {
    pub fn endpoint(&self, service: ServiceKind) -> &ServiceEndpoint {
        match service {
            ServiceKind::Chat => &self.ollama,
            ServiceKind::Document => &self.docling,
        }
    }

    pub(crate) fn endpoint_mut(&mut self, service: ServiceKind) -> &mut ServiceEndpoint {
        match service {
            ServiceKind::Chat => &mut self.ollama,
            ServiceKind::Document => &mut self.docling,
        }
    }

    fn sanitized(mut self) -> Self {
        self.ollama = self.ollama.sanitized(ServiceKind::Chat);
        self.docling = self.docling.sanitized(ServiceKind::Document);
        self
    }

    /// Override endpoints from `HEALTHLINK_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Override endpoints from any key lookup. Values that fail validation
    /// are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let sources = [
            (ServiceKind::Chat, ENV_OLLAMA_HOST, ENV_OLLAMA_PORT),
            (ServiceKind::Document, ENV_DOCLING_HOST, ENV_DOCLING_PORT),
        ];

        for (service, host_key, port_key) in sources {
            if let Some(raw) = lookup(host_key).filter(|v| !v.trim().is_empty()) {
                match validate_hostname(&raw) {
                    Ok(hostname) => self.endpoint_mut(service).hostname = hostname,
                    Err(error) => tracing::warn!("ignoring {host_key}: {error}"),
                }
            }
            if let Some(raw) = lookup(port_key).filter(|v| !v.trim().is_empty()) {
                match parse_port(&raw) {
                    Ok(port) => self.endpoint_mut(service).port = port,
                    Err(error) => tracing::warn!("ignoring {port_key}: {error}"),
                }
            }
        }
    }
}

/// Read the stored record. `Ok(None)` means nothing has been saved yet.
pub fn load_settings_record(db: &Database) -> Result<Option<SettingsRecord>, SettingsError> {
    let Some(raw) = queries::get_setting(db, SETTINGS_RECORD_KEY)? else {
        return Ok(None);
    };

    let value = serde_json::from_str::<serde_json::Value>(&raw).map_err(|error| {
        SettingsError::PersistenceFailure(format!("invalid settings record in storage: {error}"))
    })?;
    let Some(fields) = value.as_object() else {
        return Err(SettingsError::PersistenceFailure(
            "invalid settings record in storage: expected an object".to_string(),
        ));
    };

    let defaults = SettingsRecord::default();
    let record = SettingsRecord {
        ollama: decode_section(fields, "ollama", defaults.ollama),
        docling: decode_section(fields, "docling", defaults.docling),
        model_preferences: decode_section(fields, "modelPreferences", defaults.model_preferences),
    };
    Ok(Some(record.sanitized()))
}

/// Decode one top-level section, keeping `fallback` when it is missing or
/// malformed so one bad section does not discard the others.
fn decode_section<T: DeserializeOwned>(
    fields: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    fallback: T,
) -> T {
    let Some(value) = fields.get(key) else {
        return fallback;
    };
    match T::deserialize(value) {
        Ok(section) => section,
        Err(error) => {
            tracing::warn!("ignoring stored {key}: {error}");
            fallback
        }
    }
}

/// Read the stored record, falling back to defaults when it is missing or
/// unreadable. Never fails.
pub fn load_or_default(db: &Database) -> SettingsRecord {
    match load_settings_record(db) {
        Ok(Some(record)) => record,
        Ok(None) => SettingsRecord::default(),
        Err(error) => {
            tracing::warn!("using default settings: {error}");
            SettingsRecord::default()
        }
    }
}

pub fn save_settings_record(db: &Database, record: &SettingsRecord) -> Result<(), SettingsError> {
    let value = serde_json::to_string(record)?;
    queries::upsert_setting(db, SETTINGS_RECORD_KEY, &value, &Utc::now().to_rfc3339())?;
    Ok(())
}
