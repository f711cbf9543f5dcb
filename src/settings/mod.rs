//! Endpoint configuration, model preferences and connection health.
//!
//! - `types`: data model shared with the UI layer
//! - `config`: the persisted settings record and its validation
//! - `directory`: client contracts for the remote services
//! - `providers`: reqwest implementations for Ollama and Docling
//! - `selectors`: picker rows derived from the model directory
//! - `coordinator`: the state machine tying it all together

pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod providers;
pub mod selectors;
pub mod types;

pub use config::SettingsRecord;
pub use coordinator::{CoordinatorTimeouts, SettingChange, SettingsCoordinator};
pub use directory::{ConnectionProbe, HttpClientFactory, ModelDirectory, ServiceClientFactory};
pub use error::SettingsError;
pub use types::{
    ConnectionStatus, ContextSize, ModelDescriptor, ModelOption, ModelPreferences, ModelRole,
    ModelSelectionState, ServiceEndpoint, ServiceKind, SettingsSnapshot, StatusColor,
};
