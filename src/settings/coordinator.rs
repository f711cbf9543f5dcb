//! The settings coordinator.
//!
//! Single owner of endpoint configuration, model preferences, the model
//! directory cache and per-service connection status. UI code reads the
//! fields through the accessors (or [`SettingsCoordinator::snapshot`]),
//! subscribes to the bus for change notifications, and mutates only through
//! the setters below.
//!
//! Network work is sequenced by monotonic tokens. Every fetch and every probe
//! takes a token when it starts; an endpoint change invalidates the
//! service's outstanding tokens, and a result whose token is no longer
//! current is dropped instead of applied.
//!
//! Fetches and probes run on their own spawned tasks and settle the state
//! themselves, so a caller that stops awaiting never leaves a service in
//! `Testing` or the directory in `is_loading`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::bus::event_types::{
    CATEGORY_CONNECTION, CATEGORY_MODELS, CATEGORY_SETTINGS, EVENT_CONNECTION_STATUS_CHANGED,
    EVENT_ENDPOINT_CHANGED, EVENT_MODEL_SELECTION_CHANGED, EVENT_PERSISTENCE_FAILED,
    EVENT_PREFERENCES_CHANGED,
};
use crate::bus::{BusEvent, EventBus};
use crate::db::Database;
use crate::settings::config::{load_or_default, save_settings_record, SettingsRecord};
use crate::settings::directory::{
    ConnectionProbe, ModelDirectory, ServiceClientFactory, DEFAULT_REQUEST_TIMEOUT,
};
use crate::settings::error::SettingsError;
use crate::settings::selectors::{default_model_for_role, models_for_role};
use crate::settings::types::{
    parse_port, validate_hostname, ConnectionStatus, ContextSize, ModelDescriptor, ModelOption,
    ModelPreferences, ModelRole, ModelSelectionState, ServiceEndpoint, ServiceKind,
    SettingsSnapshot,
};

/// Upper bounds on each network operation, applied on top of the client's
/// own request timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorTimeouts {
    pub directory: Duration,
    pub probe: Duration,
}

impl Default for CoordinatorTimeouts {
    fn default() -> Self {
        Self {
            directory: DEFAULT_REQUEST_TIMEOUT,
            probe: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Outcome of an accepted setter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingChange {
    Applied,
    /// The value equals the current one; nothing was reset or written.
    Unchanged,
}

type FetchOutcome = Result<Vec<ModelDescriptor>, SettingsError>;
/// Resolves once the spawned fetch task has applied its outcome.
type SharedFetch = Shared<BoxFuture<'static, ()>>;

struct InFlightFetch {
    token: u64,
    completion: SharedFetch,
}

#[derive(Default)]
struct ServiceState {
    status: ConnectionStatus,
    probe_token: u64,
}

struct CoordinatorState {
    record: SettingsRecord,
    model_selection: ModelSelectionState,
    services: HashMap<ServiceKind, ServiceState>,
    fetch_token: u64,
    in_flight_fetch: Option<InFlightFetch>,
}

impl CoordinatorState {
    fn service(&mut self, service: ServiceKind) -> &mut ServiceState {
        self.services.entry(service).or_default()
    }

    fn status(&self, service: ServiceKind) -> ConnectionStatus {
        self.services
            .get(&service)
            .map(|s| s.status)
            .unwrap_or_default()
    }
}

struct CachedClients {
    endpoint: ServiceEndpoint,
    directory: Option<Arc<dyn ModelDirectory>>,
    probe: Option<Arc<dyn ConnectionProbe>>,
}

impl CachedClients {
    fn empty(endpoint: &ServiceEndpoint) -> Self {
        Self {
            endpoint: endpoint.clone(),
            directory: None,
            probe: None,
        }
    }
}

pub struct SettingsCoordinator {
    db: Arc<Database>,
    bus: Arc<EventBus>,
    factory: Arc<dyn ServiceClientFactory>,
    timeouts: CoordinatorTimeouts,
    state: Mutex<CoordinatorState>,
    clients: DashMap<ServiceKind, CachedClients>,
}

impl SettingsCoordinator {
    /// Build a coordinator from whatever is persisted in `db`. Missing or
    /// unreadable settings fall back to defaults.
    pub fn new(
        db: Arc<Database>,
        bus: Arc<EventBus>,
        factory: Arc<dyn ServiceClientFactory>,
        timeouts: CoordinatorTimeouts,
    ) -> Self {
        let record = load_or_default(&db);
        Self::with_record(db, bus, factory, timeouts, record)
    }

    pub fn with_record(
        db: Arc<Database>,
        bus: Arc<EventBus>,
        factory: Arc<dyn ServiceClientFactory>,
        timeouts: CoordinatorTimeouts,
        record: SettingsRecord,
    ) -> Self {
        Self {
            db,
            bus,
            factory,
            timeouts,
            state: Mutex::new(CoordinatorState {
                record,
                model_selection: ModelSelectionState::default(),
                services: HashMap::new(),
                fetch_token: 0,
                in_flight_fetch: None,
            }),
            clients: DashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Readers
    // -----------------------------------------------------------------------

    pub fn endpoint(&self, service: ServiceKind) -> ServiceEndpoint {
        self.lock_state().record.endpoint(service).clone()
    }

    pub fn ollama_config(&self) -> ServiceEndpoint {
        self.endpoint(ServiceKind::Chat)
    }

    pub fn docling_config(&self) -> ServiceEndpoint {
        self.endpoint(ServiceKind::Document)
    }

    pub fn model_preferences(&self) -> ModelPreferences {
        self.lock_state().record.model_preferences.clone()
    }

    pub fn model_selection(&self) -> ModelSelectionState {
        self.lock_state().model_selection.clone()
    }

    pub fn connection_status(&self, service: ServiceKind) -> ConnectionStatus {
        self.lock_state().status(service)
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        let state = self.lock_state();
        SettingsSnapshot {
            ollama_config: state.record.ollama.clone(),
            docling_config: state.record.docling.clone(),
            model_preferences: state.record.model_preferences.clone(),
            model_selection: state.model_selection.clone(),
            ollama_status: state.status(ServiceKind::Chat),
            docling_status: state.status(ServiceKind::Document),
        }
    }

    /// Picker rows for `role`, derived from the cached directory.
    pub fn models_for_role(&self, role: ModelRole) -> Vec<ModelOption> {
        let state = self.lock_state();
        models_for_role(
            &state.model_selection.available_models,
            &state.record.model_preferences,
            role,
        )
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BusEvent> {
        self.bus.subscribe()
    }

    // -----------------------------------------------------------------------
    // Endpoint setters
    // -----------------------------------------------------------------------

    /// Set a service hostname. Invalid input is rejected with
    /// [`SettingsError::InvalidInput`] and leaves every field untouched.
    pub fn set_endpoint_hostname(
        &self,
        service: ServiceKind,
        value: &str,
    ) -> Result<SettingChange, SettingsError> {
        let hostname = validate_hostname(value)?;
        self.update_endpoint(service, |endpoint| {
            if endpoint.hostname == hostname {
                return false;
            }
            endpoint.hostname = hostname;
            true
        })
    }

    /// Set a service port from edit-field text. Only integers in
    /// `[1, 65535]` are accepted.
    pub fn set_endpoint_port(
        &self,
        service: ServiceKind,
        value: &str,
    ) -> Result<SettingChange, SettingsError> {
        let port = parse_port(value)?;
        self.update_endpoint(service, |endpoint| {
            if endpoint.port == port {
                return false;
            }
            endpoint.port = port;
            true
        })
    }

    fn update_endpoint(
        &self,
        service: ServiceKind,
        apply: impl FnOnce(&mut ServiceEndpoint) -> bool,
    ) -> Result<SettingChange, SettingsError> {
        let mut state = self.lock_state();
        if !apply(state.record.endpoint_mut(service)) {
            return Ok(SettingChange::Unchanged);
        }

        let endpoint = state.record.endpoint(service).clone();
        info!(%service, url = %endpoint.base_url(), "service endpoint changed");

        self.invalidate_service(&mut state, service);
        self.emit(
            CATEGORY_SETTINGS,
            EVENT_ENDPOINT_CHANGED,
            Some(service),
            json!({ "endpoint": endpoint }),
        );
        self.persist(&state.record).map(|_| SettingChange::Applied)
    }

    /// Drop everything tied to the service's previous endpoint: cached
    /// clients, outstanding fetch/probe tokens and the connection status.
    fn invalidate_service(&self, state: &mut CoordinatorState, service: ServiceKind) {
        self.clients.remove(&service);

        let svc = state.service(service);
        svc.probe_token += 1;
        let previous = std::mem::replace(&mut svc.status, ConnectionStatus::Unknown);
        if previous != ConnectionStatus::Unknown {
            self.emit_status(service, ConnectionStatus::Unknown);
        }

        if service == ServiceKind::Chat {
            if let Some(stale) = state.in_flight_fetch.take() {
                debug!(token = stale.token, "abandoning model refresh for previous endpoint");
            }
            state.fetch_token += 1;
            if state.model_selection.is_loading {
                state.model_selection.is_loading = false;
                self.emit_selection(&state.model_selection);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Preference setters
    // -----------------------------------------------------------------------

    /// Store a model choice by name. An empty name clears the choice. The
    /// name is not checked against the directory.
    pub fn set_model_preference(
        &self,
        role: ModelRole,
        name: &str,
    ) -> Result<SettingChange, SettingsError> {
        let name = name.trim();
        self.update_preferences(|prefs| {
            let slot = prefs.model_for_mut(role);
            if *slot == name {
                return false;
            }
            *slot = name.to_string();
            true
        })
    }

    pub fn set_context_size_limit(&self, value: u32) -> Result<SettingChange, SettingsError> {
        let size = ContextSize::try_from(value)?;
        self.update_preferences(|prefs| {
            if prefs.context_size_limit == size {
                return false;
            }
            prefs.context_size_limit = size;
            true
        })
    }

    fn update_preferences(
        &self,
        apply: impl FnOnce(&mut ModelPreferences) -> bool,
    ) -> Result<SettingChange, SettingsError> {
        let mut state = self.lock_state();
        if !apply(&mut state.record.model_preferences) {
            return Ok(SettingChange::Unchanged);
        }
        self.emit(
            CATEGORY_SETTINGS,
            EVENT_PREFERENCES_CHANGED,
            None,
            json!({ "modelPreferences": state.record.model_preferences }),
        );
        self.persist(&state.record).map(|_| SettingChange::Applied)
    }

    /// Restore default endpoints and clear all model choices.
    pub fn reset_to_defaults(&self) -> Result<SettingChange, SettingsError> {
        let mut state = self.lock_state();
        let defaults = SettingsRecord::default();
        if state.record == defaults {
            return Ok(SettingChange::Unchanged);
        }

        for &service in ServiceKind::all() {
            if state.record.endpoint(service) != defaults.endpoint(service) {
                *state.record.endpoint_mut(service) = defaults.endpoint(service).clone();
                self.invalidate_service(&mut state, service);
                self.emit(
                    CATEGORY_SETTINGS,
                    EVENT_ENDPOINT_CHANGED,
                    Some(service),
                    json!({ "endpoint": defaults.endpoint(service) }),
                );
            }
        }
        if state.record.model_preferences != defaults.model_preferences {
            state.record.model_preferences = defaults.model_preferences.clone();
            self.emit(
                CATEGORY_SETTINGS,
                EVENT_PREFERENCES_CHANGED,
                None,
                json!({ "modelPreferences": state.record.model_preferences }),
            );
        }

        info!("settings reset to defaults");
        self.persist(&state.record).map(|_| SettingChange::Applied)
    }

    // -----------------------------------------------------------------------
    // Model directory
    // -----------------------------------------------------------------------

    /// Fetch the chat service's model list and replace the cached directory.
    ///
    /// A call made while a fetch is outstanding joins that fetch rather than
    /// issuing a second request. Returns the selection state after the
    /// fetch settled.
    pub async fn refresh_available_models(self: &Arc<Self>) -> ModelSelectionState {
        let completion = {
            let mut state = self.lock_state();
            if let Some(in_flight) = state.in_flight_fetch.as_ref() {
                debug!(token = in_flight.token, "joining in-flight model refresh");
                in_flight.completion.clone()
            } else {
                state.fetch_token += 1;
                let token = state.fetch_token;
                let completion = self.start_fetch(token, state.record.ollama.clone());
                state.in_flight_fetch = Some(InFlightFetch {
                    token,
                    completion: completion.clone(),
                });
                state.model_selection.is_loading = true;
                state.model_selection.error = None;
                self.emit_selection(&state.model_selection);
                completion
            }
        };

        completion.await;
        self.model_selection()
    }

    /// Run [`Self::refresh_available_models`] on the runtime without waiting.
    pub fn spawn_refresh(self: &Arc<Self>) -> tokio::task::JoinHandle<ModelSelectionState> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.refresh_available_models().await })
    }

    /// Spawn the fetch for `token`. The task applies its own outcome; the
    /// returned future only waits for that.
    fn start_fetch(self: &Arc<Self>, token: u64, endpoint: ServiceEndpoint) -> SharedFetch {
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let outcome = this.fetch_models(&endpoint).await;
            this.apply_fetch_outcome(token, outcome);
        });

        let this = Arc::clone(self);
        async move {
            if let Err(error) = task.await {
                warn!("model refresh task ended abnormally: {error}");
                this.apply_fetch_outcome(
                    token,
                    Err(SettingsError::NetworkFailure(format!(
                        "model refresh aborted: {error}"
                    ))),
                );
            }
        }
        .boxed()
        .shared()
    }

    async fn fetch_models(&self, endpoint: &ServiceEndpoint) -> FetchOutcome {
        let client = self.directory_client(endpoint)?;
        let limit = self.timeouts.directory;
        match tokio::time::timeout(limit, client.list_models()).await {
            Ok(result) => result,
            Err(_) => Err(SettingsError::NetworkFailure(format!(
                "model list request timed out after {} ms",
                limit.as_millis()
            ))),
        }
    }

    fn apply_fetch_outcome(&self, token: u64, outcome: FetchOutcome) {
        let mut state = self.lock_state();
        if state.in_flight_fetch.as_ref().map(|f| f.token) != Some(token) {
            debug!(token, current = state.fetch_token, "discarding stale model list");
            return;
        }
        state.in_flight_fetch = None;

        match outcome {
            Ok(models) => {
                info!(count = models.len(), "model directory refreshed");
                state.model_selection = ModelSelectionState {
                    available_models: models,
                    is_loading: false,
                    error: None,
                };
                self.emit_selection(&state.model_selection);
                self.fill_empty_preferences(&mut state);
            }
            Err(error) => {
                warn!("model directory refresh failed: {error}");
                state.model_selection.is_loading = false;
                state.model_selection.error = Some(error.to_string());
                self.emit_selection(&state.model_selection);
            }
        }
    }

    /// Give roles without a stored choice the first eligible model.
    fn fill_empty_preferences(&self, state: &mut CoordinatorState) {
        let mut changed = false;
        for &role in ModelRole::all() {
            if !state.record.model_preferences.model_for(role).is_empty() {
                continue;
            }
            if let Some(name) = default_model_for_role(&state.model_selection.available_models, role)
            {
                debug!(role = role.as_str(), model = name, "selecting default model");
                *state.record.model_preferences.model_for_mut(role) = name.to_string();
                changed = true;
            }
        }
        if !changed {
            return;
        }

        self.emit(
            CATEGORY_SETTINGS,
            EVENT_PREFERENCES_CHANGED,
            None,
            json!({ "modelPreferences": state.record.model_preferences }),
        );
        // The refresh itself succeeded; observers learn of the failed write
        // through the persistence event.
        if let Err(error) = self.persist(&state.record) {
            warn!("default model choices kept in memory only: {error}");
        }
    }

    // -----------------------------------------------------------------------
    // Connection tests
    // -----------------------------------------------------------------------

    /// Probe `service` and record `Connected` or `Failed`.
    ///
    /// While a probe for the same service is outstanding this returns
    /// `Testing` immediately without starting another one.
    pub async fn test_connection(self: &Arc<Self>, service: ServiceKind) -> ConnectionStatus {
        let (token, endpoint) = {
            let mut state = self.lock_state();
            let endpoint = state.record.endpoint(service).clone();
            let svc = state.service(service);
            if svc.status == ConnectionStatus::Testing {
                debug!(%service, "connection test already running");
                return ConnectionStatus::Testing;
            }
            svc.probe_token += 1;
            svc.status = ConnectionStatus::Testing;
            let token = svc.probe_token;
            self.emit_status(service, ConnectionStatus::Testing);
            (token, endpoint)
        };

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let resolved = this.run_probe(service, &endpoint).await;
            this.resolve_probe(service, token, resolved)
        });
        match task.await {
            Ok(status) => status,
            Err(error) => {
                warn!(%service, "connection test task ended abnormally: {error}");
                self.resolve_probe(service, token, ConnectionStatus::Failed)
            }
        }
    }

    async fn run_probe(&self, service: ServiceKind, endpoint: &ServiceEndpoint) -> ConnectionStatus {
        let result = match self.probe_client(service, endpoint) {
            Ok(probe) => match tokio::time::timeout(self.timeouts.probe, probe.probe()).await {
                Ok(result) => result,
                Err(_) => Err(SettingsError::NetworkFailure(format!(
                    "{} did not answer within {} ms",
                    service.display_name(),
                    self.timeouts.probe.as_millis()
                ))),
            },
            Err(error) => Err(error),
        };

        match result {
            Ok(()) => ConnectionStatus::Connected,
            Err(error) => {
                warn!(%service, url = %endpoint.base_url(), "connection test failed: {error}");
                ConnectionStatus::Failed
            }
        }
    }

    /// Record a probe result unless a newer probe or an endpoint change
    /// superseded `token`. Returns the status now in effect.
    fn resolve_probe(
        &self,
        service: ServiceKind,
        token: u64,
        resolved: ConnectionStatus,
    ) -> ConnectionStatus {
        let mut state = self.lock_state();
        let svc = state.service(service);
        if svc.probe_token != token || svc.status != ConnectionStatus::Testing {
            debug!(%service, token, "discarding stale connection test result");
            return svc.status;
        }
        svc.status = resolved;
        self.emit_status(service, resolved);
        resolved
    }

    /// Probe every service concurrently.
    pub async fn test_all_connections(self: &Arc<Self>) -> Vec<(ServiceKind, ConnectionStatus)> {
        let checks = ServiceKind::all().iter().map(|&service| async move {
            (service, self.test_connection(service).await)
        });
        futures::future::join_all(checks).await
    }

    /// Run [`Self::test_connection`] on the runtime without waiting.
    pub fn spawn_connection_test(
        self: &Arc<Self>,
        service: ServiceKind,
    ) -> tokio::task::JoinHandle<ConnectionStatus> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.test_connection(service).await })
    }

    // -----------------------------------------------------------------------
    // Client cache
    // -----------------------------------------------------------------------

    fn directory_client(
        &self,
        endpoint: &ServiceEndpoint,
    ) -> Result<Arc<dyn ModelDirectory>, SettingsError> {
        let mut entry = self
            .clients
            .entry(ServiceKind::Chat)
            .or_insert_with(|| CachedClients::empty(endpoint));
        if entry.endpoint != *endpoint {
            *entry = CachedClients::empty(endpoint);
        }
        if let Some(client) = entry.directory.as_ref() {
            return Ok(client.clone());
        }
        let client = self.factory.model_directory(endpoint)?;
        entry.directory = Some(client.clone());
        Ok(client)
    }

    fn probe_client(
        &self,
        service: ServiceKind,
        endpoint: &ServiceEndpoint,
    ) -> Result<Arc<dyn ConnectionProbe>, SettingsError> {
        let mut entry = self
            .clients
            .entry(service)
            .or_insert_with(|| CachedClients::empty(endpoint));
        if entry.endpoint != *endpoint {
            *entry = CachedClients::empty(endpoint);
        }
        if let Some(client) = entry.probe.as_ref() {
            return Ok(client.clone());
        }
        let client = self.factory.connection_probe(service, endpoint)?;
        entry.probe = Some(client.clone());
        Ok(client)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Write-through. On failure the in-memory record is kept and the error
    /// is both returned and published.
    fn persist(&self, record: &SettingsRecord) -> Result<(), SettingsError> {
        let result = save_settings_record(&self.db, record);
        if let Err(error) = &result {
            warn!("settings write failed, keeping in-memory values: {error}");
            self.emit(
                CATEGORY_SETTINGS,
                EVENT_PERSISTENCE_FAILED,
                None,
                json!({ "error": error.to_string() }),
            );
        }
        result
    }

    fn emit_status(&self, service: ServiceKind, status: ConnectionStatus) {
        self.emit(
            CATEGORY_CONNECTION,
            EVENT_CONNECTION_STATUS_CHANGED,
            Some(service),
            json!({ "status": status, "text": status.text() }),
        );
    }

    fn emit_selection(&self, selection: &ModelSelectionState) {
        self.emit(
            CATEGORY_MODELS,
            EVENT_MODEL_SELECTION_CHANGED,
            Some(ServiceKind::Chat),
            json!({ "modelSelection": selection }),
        );
    }

    fn emit(
        &self,
        category: &str,
        event_type: &str,
        service: Option<ServiceKind>,
        payload: serde_json::Value,
    ) {
        self.bus.emit(
            category,
            event_type,
            service.map(|s| s.as_str().to_string()),
            payload,
        );
    }

    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().expect("settings state mutex poisoned")
    }
}
