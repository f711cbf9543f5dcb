use crate::db::DbError;

/// Failures surfaced by the settings coordinator. None of them is fatal;
/// each is recoverable by re-running the operation that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// Rejected at the boundary. No state was changed.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The remote service was unreachable, answered garbage, or timed out.
    #[error("network failure: {0}")]
    NetworkFailure(String),
    /// The durable write failed. The in-memory value was kept.
    #[error("settings not saved: {0}")]
    PersistenceFailure(String),
}

impl SettingsError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidInput(_))
    }
}

impl From<reqwest::Error> for SettingsError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            return Self::NetworkFailure(format!("request timed out: {value}"));
        }
        Self::NetworkFailure(value.to_string())
    }
}

impl From<DbError> for SettingsError {
    fn from(value: DbError) -> Self {
        Self::PersistenceFailure(value.to_string())
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(value: serde_json::Error) -> Self {
        Self::PersistenceFailure(format!("failed to serialize settings: {value}"))
    }
}
