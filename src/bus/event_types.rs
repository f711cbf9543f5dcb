//! Event category and type constants.
//!
//! Each reactive field of the coordinator has exactly one event type, so an
//! observer can map an event straight to the field it must re-read.

use super::event_bus::BusEvent;

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

pub const CATEGORY_SETTINGS: &str = "settings";
pub const CATEGORY_MODELS: &str = "models";
pub const CATEGORY_CONNECTION: &str = "connection";

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

pub const EVENT_ENDPOINT_CHANGED: &str = "settings.endpoint_changed";
pub const EVENT_PREFERENCES_CHANGED: &str = "settings.preferences_changed";
pub const EVENT_PERSISTENCE_FAILED: &str = "settings.persistence_failed";
pub const EVENT_MODEL_SELECTION_CHANGED: &str = "models.selection_changed";
pub const EVENT_CONNECTION_STATUS_CHANGED: &str = "connection.status_changed";

/// Observable field names, matching the UI layer's bindings.
pub const FIELD_OLLAMA_CONFIG: &str = "ollamaConfig";
pub const FIELD_DOCLING_CONFIG: &str = "doclingConfig";
pub const FIELD_MODEL_PREFERENCES: &str = "modelPreferences";
pub const FIELD_MODEL_SELECTION: &str = "modelSelection";
pub const FIELD_OLLAMA_STATUS: &str = "ollamaStatus";
pub const FIELD_DOCLING_STATUS: &str = "doclingStatus";

/// Returns the observable field an event invalidates, or `None` for
/// informational events that change no field.
pub fn changed_field(event: &BusEvent) -> Option<&'static str> {
    let service = event.service.as_deref();
    match event.event_type.as_str() {
        EVENT_ENDPOINT_CHANGED => match service {
            Some("docling") => Some(FIELD_DOCLING_CONFIG),
            _ => Some(FIELD_OLLAMA_CONFIG),
        },
        EVENT_PREFERENCES_CHANGED => Some(FIELD_MODEL_PREFERENCES),
        EVENT_MODEL_SELECTION_CHANGED => Some(FIELD_MODEL_SELECTION),
        EVENT_CONNECTION_STATUS_CHANGED => match service {
            Some("docling") => Some(FIELD_DOCLING_STATUS),
            _ => Some(FIELD_OLLAMA_STATUS),
        },
        _ => None,
    }
}
