// Background state coordinator
// Owns the in-memory mirror of persisted state plus everything that mutates it.
// Handlers lock, read or apply a merge, unlock, then await the backend. A state
// guard is never held across an .await.

pub mod health;
pub mod inventory;
pub mod lifecycle;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, OnceCell};
use tokio::task::AbortHandle;

use crate::backend::{BackendClient, FsListing, FsRoots, PathCheck};
use crate::config::CoordinatorConfig;
use crate::constants::BROADCAST_CAPACITY;
use crate::db::store::decode_or_default;
use crate::db::{StateKey, StateStore};
use crate::error::{CourierError, Result};
use crate::jobs::{insert_history, HistoryView, JobHistoryEntry, JobMeta, JobRecord, PollScheduler};
use crate::library::{AssetCounts, LibraryInventory, LibraryRecord, Selection};
use crate::settings::{Settings, SettingsPatch};

pub use inventory::{LibraryImport, LibraryPatch, NewLibrary};
pub use lifecycle::{ComponentStatus, JobLookup, JobSubmission};

/// Keys rewritten whenever the library list or selection changes.
pub(crate) const LIBRARY_KEYS: [StateKey; 3] = [
    StateKey::Libraries,
    StateKey::SelectedLibraryPath,
    StateKey::SelectedLibraryName,
];

/// Everything the coordinator knows. Only reachable through `Coordinator::lock`.
#[derive(Debug)]
pub struct CoordinatorState {
    pub settings: Settings,
    pub inventory: LibraryInventory,
    /// In-flight jobs keyed by backend task id.
    pub jobs: BTreeMap<String, JobRecord>,
    pub job_meta: BTreeMap<String, JobMeta>,
    pub history: Vec<JobHistoryEntry>,
    pub connected: bool,
    pub last_health_check: Option<DateTime<Utc>>,
    pub(crate) watch: HashMap<String, lifecycle::PollWatch>,
}

impl CoordinatorState {
    fn new(config: &CoordinatorConfig) -> Self {
        Self {
            settings: Settings {
                backend_url: config.default_backend_url.clone(),
                ..Settings::default()
            },
            inventory: LibraryInventory::default(),
            jobs: BTreeMap::new(),
            job_meta: BTreeMap::new(),
            history: Vec::new(),
            connected: false,
            last_health_check: None,
            watch: HashMap::new(),
        }
    }

    fn persisted_value(&self, key: StateKey) -> serde_json::Result<Value> {
        match key {
            StateKey::Settings => serde_json::to_value(&self.settings),
            StateKey::Libraries => serde_json::to_value(self.inventory.libraries()),
            StateKey::JobHistory => serde_json::to_value(&self.history),
            StateKey::JobMeta => serde_json::to_value(&self.job_meta),
            StateKey::SelectedLibraryPath => serde_json::to_value(&self.inventory.selection().path),
            StateKey::SelectedLibraryName => serde_json::to_value(&self.inventory.selection().name),
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let mut jobs: Vec<JobRecord> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        StateSnapshot {
            settings: self.settings.clone(),
            libraries: self.inventory.libraries().to_vec(),
            totals: self.inventory.totals(),
            selected_library_path: self.inventory.selection().path.clone(),
            selected_library_name: self.inventory.selection().name.clone(),
            jobs,
            job_history: self.history.iter().map(HistoryView::from).collect(),
            connected: self.connected,
            last_health_check: self.last_health_check,
        }
    }
}

/// Serializable projection of coordinator state sent to UI surfaces.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub settings: Settings,
    pub libraries: Vec<LibraryRecord>,
    pub totals: AssetCounts,
    pub selected_library_path: Option<String>,
    pub selected_library_name: Option<String>,
    pub jobs: Vec<JobRecord>,
    pub job_history: Vec<HistoryView>,
    pub connected: bool,
    pub last_health_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Error,
}

/// Unsolicited message pushed to every listening surface.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    StateUpdate {
        state: Box<StateSnapshot>,
    },
    Notification {
        level: NotificationLevel,
        title: String,
        message: String,
        #[serde(rename = "jobId", skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
    },
}

pub struct Coordinator {
    config: CoordinatorConfig,
    store: StateStore,
    http: reqwest::Client,
    backend: Mutex<BackendClient>,
    state: Mutex<CoordinatorState>,
    scheduler: PollScheduler,
    init: OnceCell<()>,
    events: broadcast::Sender<Outbound>,
    health_task: Mutex<Option<AbortHandle>>,
    reconciling: AtomicBool,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Coordinator {
    /// Open the state DB and build the backend client. Nothing is loaded until
    /// the first request calls `ensure_initialized`.
    pub fn new(config: CoordinatorConfig) -> Result<Arc<Self>> {
        let store = StateStore::open(&config.db_path)?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CourierError::Other(format!("Cannot build HTTP client: {}", e)))?;
        let backend = BackendClient::with_http(http.clone(), &config.default_backend_url);
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);

        Ok(Arc::new(Self {
            state: Mutex::new(CoordinatorState::new(&config)),
            config,
            store,
            http,
            backend: Mutex::new(backend),
            scheduler: PollScheduler::new(),
            init: OnceCell::new(),
            events,
            health_task: Mutex::new(None),
            reconciling: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        relock(&self.state)
    }

    /// Read-only access for callers outside the crate (CLI, tests).
    pub fn with_state<R>(&self, f: impl FnOnce(&CoordinatorState) -> R) -> R {
        f(&self.lock())
    }

    pub(crate) fn backend(&self) -> BackendClient {
        relock(&self.backend).clone()
    }

    pub(crate) fn set_backend_url(&self, url: &str) {
        *relock(&self.backend) = BackendClient::with_http(self.http.clone(), url);
    }

    // ==================== Startup ====================

    /// Run the one-time startup sequence. A failed attempt is retried by the
    /// next caller.
    pub async fn ensure_initialized(self: &Arc<Self>) -> Result<()> {
        self.init
            .get_or_try_init(|| {
                let this = Arc::clone(self);
                async move { this.initialize().await }
            })
            .await?;
        Ok(())
    }

    async fn initialize(self: &Arc<Self>) -> Result<()> {
        self.load_persisted()?;

        if self.probe_health().await.reconnected {
            self.reconnect_pass().await;
        }
        self.start_health_monitor();

        let state = self.lock();
        log::info!(
            "Coordinator ready ({}): {} libraries, {} history entries, {} pending jobs, backend {} ({})",
            self.store.path().display(),
            state.inventory.libraries().len(),
            state.history.len(),
            state.job_meta.len(),
            state.settings.backend_url,
            if state.connected { "online" } else { "offline" }
        );
        Ok(())
    }

    /// Rehydrate from the store, migrating older layouts on the way.
    fn load_persisted(&self) -> Result<()> {
        let values = self.store.load(&StateKey::ALL)?;
        let mut dirty: Vec<StateKey> = Vec::new();

        let mut settings: Settings = if values.contains_key(&StateKey::Settings) {
            decode_or_default(&values, StateKey::Settings)
        } else {
            Settings {
                backend_url: self.config.default_backend_url.clone(),
                ..Settings::default()
            }
        };

        let records: Vec<LibraryRecord> = decode_or_default(&values, StateKey::Libraries);
        let selection = Selection {
            path: decode_or_default(&values, StateKey::SelectedLibraryPath),
            name: decode_or_default(&values, StateKey::SelectedLibraryName),
        };
        let mut inventory = LibraryInventory::from_persisted(records.clone(), selection);
        if inventory.libraries() != records.as_slice() {
            log::info!(
                "Canonicalized persisted libraries ({} records -> {})",
                records.len(),
                inventory.libraries().len()
            );
            dirty.push(StateKey::Libraries);
        }

        let had_legacy = settings.library_path.is_some() || settings.library_name.is_some();
        let legacy = settings.take_legacy_library();
        if had_legacy {
            dirty.push(StateKey::Settings);
        }
        if let Some((path, name)) = legacy.filter(|_| inventory.is_empty()) {
            let mut record = LibraryRecord::new(&path, name.as_deref());
            if settings.project_relative {
                record = record.with_project_relative(Some(&settings.project_relative_path));
            }
            record.active = true;
            log::info!("Migrated legacy library setting to inventory: {}", record.path);
            inventory.upsert(record);
            dirty.push(StateKey::Libraries);
        }

        if inventory.ensure_selected(false) {
            dirty.extend(LIBRARY_KEYS);
        }

        let loaded: Vec<JobHistoryEntry> = decode_or_default(&values, StateKey::JobHistory);
        let loaded_len = loaded.len();
        let mut history = Vec::with_capacity(loaded_len);
        for entry in loaded.into_iter().rev() {
            insert_history(&mut history, entry);
        }
        if history.len() != loaded_len {
            dirty.push(StateKey::JobHistory);
        }

        let job_meta: BTreeMap<String, JobMeta> = decode_or_default(&values, StateKey::JobMeta);

        {
            let mut state = self.lock();
            state.settings = settings;
            state.inventory = inventory;
            state.history = history;
            state.job_meta = job_meta;
        }
        let backend_url = self.lock().settings.backend_url.clone();
        self.set_backend_url(&backend_url);

        dirty.sort_by_key(|k| k.as_str());
        dirty.dedup();
        self.persist(&dirty)
    }

    // ==================== Persistence & broadcast ====================

    /// Write the given keys from current state. Other keys are untouched.
    pub(crate) fn persist(&self, keys: &[StateKey]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let entries = {
            let state = self.lock();
            keys.iter()
                .map(|key| -> Result<(StateKey, Value)> { Ok((*key, state.persisted_value(*key)?)) })
                .collect::<Result<Vec<_>>>()?
        };
        self.store.save(&entries)?;
        Ok(())
    }

    /// Persist from a background path where there is no caller to report to.
    pub(crate) fn persist_logged(&self, keys: &[StateKey]) {
        if let Err(e) = self.persist(keys) {
            log::error!("Failed to persist coordinator state: {}", e);
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.lock().snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.events.subscribe()
    }

    /// Push the current snapshot to every listener.
    pub fn broadcast_state(&self) {
        let state = Box::new(self.snapshot());
        // No receivers is fine
        let _ = self.events.send(Outbound::StateUpdate { state });
    }

    pub(crate) fn notify(&self, level: NotificationLevel, title: String, message: String, job_id: Option<String>) {
        if !self.lock().settings.notifications {
            return;
        }
        let _ = self.events.send(Outbound::Notification { level, title, message, job_id });
    }

    // ==================== Settings ====================

    /// `updateSettings`. A new backend URL resets connectivity and probes the
    /// new address right away.
    pub async fn update_settings(self: &Arc<Self>, patch: SettingsPatch) -> Result<Settings> {
        let (settings, backend_changed) = {
            let mut state = self.lock();
            let changed = state.settings.apply(patch);
            if changed {
                state.connected = false;
            }
            (state.settings.clone(), changed)
        };
        self.persist(&[StateKey::Settings])?;

        if backend_changed {
            log::info!("Backend URL changed to {}", settings.backend_url);
            self.set_backend_url(&settings.backend_url);
            self.check_health().await;
        }
        Ok(settings)
    }

    // ==================== Filesystem browsing ====================
    // Paths live on the backend host, so browsing goes through it.

    pub async fn list_roots(self: &Arc<Self>) -> Result<FsRoots> {
        self.ensure_backend().await?;
        self.backend().list_roots().await.map_err(|e| self.note_backend_error(e))
    }

    pub async fn list_directory(self: &Arc<Self>, path: &str) -> Result<FsListing> {
        if path.trim().is_empty() {
            return Err(CourierError::validation("Path is required"));
        }
        self.ensure_backend().await?;
        self.backend()
            .list_directory(path.trim())
            .await
            .map_err(|e| self.note_backend_error(e))
    }

    pub async fn check_path(self: &Arc<Self>, path: &str) -> Result<PathCheck> {
        if path.trim().is_empty() {
            return Err(CourierError::validation("Path is required"));
        }
        self.ensure_backend().await?;
        self.backend()
            .check_path(path.trim())
            .await
            .map_err(|e| self.note_backend_error(e))
    }

    /// Stop background work: pending polls and the health timer.
    pub fn shutdown(&self) {
        self.scheduler.cancel_all();
        if let Some(handle) = relock(&self.health_task).take() {
            handle.abort();
        }
        log::debug!("Coordinator background tasks stopped");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(handle) = relock(&self.health_task).take() {
            handle.abort();
        }
    }
}
