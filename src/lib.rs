//! Healthlink settings backend.
//!
//! Owns the configuration a health-records assistant needs to reach its two
//! local services: an Ollama server for chat and a Docling server for
//! document conversion.
//!
//! # Architecture
//!
//! - `settings`: endpoint configuration, model preferences, model directory
//!   cache and connection health, all behind `SettingsCoordinator`
//! - `db`: SQLite store for the persisted settings record
//! - `bus`: event bus carrying change notifications to observers

pub mod bus;
pub mod db;
pub mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use bus::EventBus;
use db::Database;
use settings::config::load_or_default;
use settings::{CoordinatorTimeouts, HttpClientFactory, SettingsCoordinator};

// ---------------------------------------------------------------------------
// Shared error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Db(#[from] db::DbError),
    #[error("{0}")]
    Settings(#[from] settings::SettingsError),
    #[error("{0}")]
    Other(String),
}

impl Serialize for AppError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub db: Arc<Database>,
    pub bus: Arc<EventBus>,
    pub settings: Arc<SettingsCoordinator>,
}

impl AppState {
    /// Open (or create) the database at `db_path` and build the coordinator
    /// over it. Environment overrides are applied on top of the stored record
    /// but only reach disk once a setter writes.
    pub fn open(db_path: &Path, timeouts: CoordinatorTimeouts) -> Result<Self, AppError> {
        tracing::debug!("opening settings database at {}", db_path.display());
        let db = Arc::new(Database::open(db_path)?);
        Ok(Self::with_database(db, timeouts))
    }

    pub fn with_database(db: Arc<Database>, timeouts: CoordinatorTimeouts) -> Self {
        let bus = Arc::new(EventBus::new());
        let mut record = load_or_default(&db);
        record.apply_env_overrides();
        let factory = Arc::new(HttpClientFactory::new(timeouts.directory.max(timeouts.probe)));
        let settings = Arc::new(SettingsCoordinator::with_record(
            db.clone(),
            bus.clone(),
            factory,
            timeouts,
            record,
        ));
        Self { db, bus, settings }
    }
}

// ---------------------------------------------------------------------------
// Paths and logging
// ---------------------------------------------------------------------------

pub fn healthlink_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("HEALTHLINK_DATA_DIR") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(app_data) = std::env::var("APPDATA") {
            return PathBuf::from(app_data).join("Healthlink");
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".healthlink");
    }

    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".healthlink");
    }

    PathBuf::from(".healthlink")
}

pub fn stable_db_path() -> Result<PathBuf, AppError> {
    let data_dir = healthlink_data_dir();
    std::fs::create_dir_all(&data_dir).map_err(|e| {
        AppError::Other(format!(
            "failed to create app data directory {}: {e}",
            data_dir.display()
        ))
    })?;
    Ok(data_dir.join("healthlink.db"))
}

/// Install the global subscriber. Safe to call more than once.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("healthlink=debug,info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
