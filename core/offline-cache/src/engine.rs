//! Cache engine: per-class fetch strategies plus the install/activate
//! lifecycle.
//!
//! ```text
//! Idle ──install()──▶ Installing ──ok──▶ Installed ──activate()──▶ Activating ──▶ Active
//!                        └──err──▶ (previous state)
//! ```
//!
//! Until the engine is `Active` it does not claim requests: everything goes
//! straight to the network and nothing is stored. [`CacheEngine::bring_up`]
//! keeps retrying install and activation, so a backend that is still starting
//! only delays activation.

use std::cmp;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{CacheError, Result};
use crate::network::Network;
use crate::request::{FetchRequest, FetchResponse, RequestClass, RequestIdentity};
use crate::store::{CacheEntry, StoreRegistry};

pub const DEFAULT_STORE_PREFIX: &str = "deskshell";
pub const DEFAULT_GENERATION: &str = "v1";

/// Shell of the dashboard, fetched during install.
pub const DEFAULT_MANIFEST: &[&str] = &[
    "/",
    "/static/css/style.css",
    "/static/js/app.js",
    "/static/manifest.json",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Backend origin; relative manifest entries resolve against it.
    pub origin: Url,
    pub store_prefix: String,
    /// Bump whenever the manifest changes so activation drops stale stores.
    pub generation: String,
    pub manifest: Vec<String>,
}

impl CacheConfig {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            store_prefix: DEFAULT_STORE_PREFIX.to_string(),
            generation: DEFAULT_GENERATION.to_string(),
            manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn static_store_name(&self) -> String {
        format!("{}-static-{}", self.store_prefix, self.generation)
    }

    pub fn runtime_store_name(&self) -> String {
        format!("{}-runtime-{}", self.store_prefix, self.generation)
    }

    pub fn resolve(&self, reference: &str) -> Result<Url> {
        self.origin
            .join(reference)
            .map_err(|err| CacheError::InvalidManifestUrl {
                url: reference.to_string(),
                details: err.to_string(),
            })
    }

    pub fn manifest_urls(&self) -> Result<Vec<Url>> {
        self.manifest.iter().map(|entry| self.resolve(entry)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Installing,
    /// Install done and waiting skipped; ready for activation.
    Installed,
    Activating,
    Active,
}

/// Control messages accepted from the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineMessage {
    SkipWaiting,
    ClearCache,
}

const INSTALL_BACKOFF_STEP_MS: u64 = 500;
const INSTALL_BACKOFF_MAX_MS: u64 = 30_000;

/// Linear retry schedule for [`CacheEngine::bring_up`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallBackoff {
    pub step: Duration,
    pub max: Duration,
}

impl Default for InstallBackoff {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(INSTALL_BACKOFF_STEP_MS),
            max: Duration::from_millis(INSTALL_BACKOFF_MAX_MS),
        }
    }
}

impl InstallBackoff {
    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        cmp::min(self.step.saturating_mul(attempt), self.max)
    }
}

pub struct CacheEngine {
    config: CacheConfig,
    registry: StoreRegistry,
    network: Arc<dyn Network>,
    state: Mutex<EngineState>,
    /// Serializes install, activate and purge against each other.
    lifecycle: Mutex<()>,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CacheEngine {
    pub fn new(config: CacheConfig, registry: StoreRegistry, network: Arc<dyn Network>) -> Self {
        Self {
            config,
            registry,
            network,
            state: Mutex::new(EngineState::Idle),
            lifecycle: Mutex::new(()),
            pending_writes: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    pub fn state(&self) -> EngineState {
        *lock(&self.state)
    }

    fn set_state(&self, state: EngineState) {
        *lock(&self.state) = state;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Pre-caches the manifest into the static store, then skips waiting.
    ///
    /// All-or-nothing: if any entry fails to fetch nothing is stored and the
    /// engine stays where it was. Re-installing while active refreshes the
    /// static store in place.
    pub fn install(&self) -> Result<usize> {
        let _guard = lock(&self.lifecycle);
        let previous = self.state();
        if previous != EngineState::Active {
            self.set_state(EngineState::Installing);
        }
        info!(store = %self.config.static_store_name(), entries = self.config.manifest.len(), "Installing offline cache");

        match self.precache() {
            Ok(count) => {
                if previous != EngineState::Active {
                    self.set_state(EngineState::Installed);
                }
                info!(entries = count, "Offline cache installed; skipping wait");
                Ok(count)
            }
            Err(err) => {
                warn!(error = %err, "Offline cache install failed");
                self.set_state(previous);
                Err(err)
            }
        }
    }

    fn precache(&self) -> Result<usize> {
        let store = self.registry.open(&self.config.static_store_name())?;

        let mut fetched = Vec::new();
        for url in self.config.manifest_urls()? {
            let request = FetchRequest::get(url);
            let response = self.network.fetch(&request)?;
            if !response.is_success() {
                return Err(CacheError::ManifestEntry {
                    url: request.url.to_string(),
                    status: response.status,
                });
            }
            fetched.push((request.identity(), response));
        }

        for (identity, response) in &fetched {
            store.put(identity, response)?;
        }
        Ok(fetched.len())
    }

    /// Deletes every store that is not current, then starts claiming
    /// requests. Returns how many stale stores were removed.
    pub fn activate(&self) -> Result<usize> {
        let _guard = lock(&self.lifecycle);
        let previous = self.state();
        match previous {
            EngineState::Installed => self.set_state(EngineState::Activating),
            EngineState::Active => {}
            _ => return Err(CacheError::NotInstalled),
        }

        let keep = [
            self.config.static_store_name(),
            self.config.runtime_store_name(),
        ];
        let names = match self.registry.list_store_names() {
            Ok(names) => names,
            Err(err) => {
                self.set_state(previous);
                return Err(err);
            }
        };

        let mut deleted = 0;
        for name in names.iter().filter(|name| !keep.contains(*name)) {
            match self.registry.delete_store(name) {
                Ok(true) => {
                    info!(store = %name, "Deleted stale cache store");
                    deleted += 1;
                }
                Ok(false) => {}
                Err(err) => warn!(error = %err, store = %name, "Failed to delete stale cache store"),
            }
        }

        self.set_state(EngineState::Active);
        info!(deleted, "Offline cache active");
        Ok(deleted)
    }

    /// Installs and activates, retrying on failure until the engine is
    /// active. Returns the number of attempts it took.
    pub fn bring_up(&self, backoff: InstallBackoff) -> u32 {
        let mut attempt: u32 = 1;
        loop {
            match self.try_bring_up() {
                Ok(()) => return attempt,
                Err(err) => {
                    let delay = backoff.delay(attempt);
                    warn!(
                        error = %err,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "Offline cache not active yet; retrying"
                    );
                    thread::sleep(delay);
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    fn try_bring_up(&self) -> Result<()> {
        match self.state() {
            EngineState::Active => return Ok(()),
            EngineState::Installed => {}
            _ => {
                self.install()?;
            }
        }
        self.activate().map(|_| ())
    }

    /// Deletes every store unconditionally.
    pub fn purge(&self) -> Result<usize> {
        let _guard = lock(&self.lifecycle);
        self.wait_for_pending_writes();
        let deleted = self.registry.delete_all()?;
        info!(deleted, "Purged offline cache");
        Ok(deleted)
    }

    pub fn handle_message(&self, message: EngineMessage) -> Result<()> {
        debug!(message = ?message, "Cache engine message");
        match message {
            EngineMessage::SkipWaiting => {
                if self.state() == EngineState::Installed {
                    self.activate()?;
                }
                Ok(())
            }
            EngineMessage::ClearCache => self.purge().map(|_| ()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Request handling
    // ─────────────────────────────────────────────────────────────────────

    /// Answers a UI request. The only error is a network failure with no
    /// cached fallback.
    pub fn handle(&self, request: &FetchRequest) -> Result<FetchResponse> {
        if self.state() != EngineState::Active {
            return self.network.fetch(request);
        }

        let class = request.class();
        debug!(method = %request.method, url = %request.url, class = ?class, "Handling request");
        match class {
            RequestClass::Api => self.network_first(request),
            RequestClass::StreamingMedia => self.network.fetch(request),
            RequestClass::StaticAsset => self.cache_first(request),
        }
    }

    fn network_first(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let runtime = self.config.runtime_store_name();
        match self.network.fetch(request) {
            Ok(response) => {
                if request.is_get() && !response.is_partial() {
                    self.store_in_background(runtime, request.identity(), response.clone());
                }
                Ok(response)
            }
            Err(err) => {
                if request.is_get() {
                    if let Some(entry) = self.lookup(&runtime, &request.identity()) {
                        info!(url = %request.url, error = %err, "Network failed; serving cached response");
                        return Ok(entry.response);
                    }
                }
                Err(err)
            }
        }
    }

    fn cache_first(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let static_store = self.config.static_store_name();
        if request.is_get() {
            if let Some(entry) = self.lookup(&static_store, &request.identity()) {
                debug!(url = %request.url, "Static cache hit");
                return Ok(entry.response);
            }
        }

        let response = self.network.fetch(request)?;
        if request.is_get() && response.is_success() && !response.is_partial() {
            self.store_in_background(static_store, request.identity(), response.clone());
        }
        Ok(response)
    }

    fn lookup(&self, store_name: &str, identity: &RequestIdentity) -> Option<CacheEntry> {
        let result = self
            .registry
            .open(store_name)
            .and_then(|store| store.match_entry(identity));
        match result {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, store = store_name, url = %identity.url, "Cache lookup failed");
                None
            }
        }
    }

    /// Stores a snapshot without delaying the response. Failures are logged.
    fn store_in_background(&self, store_name: String, identity: RequestIdentity, response: FetchResponse) {
        let registry = self.registry.clone();
        let handle = thread::spawn(move || {
            let result = registry
                .open(&store_name)
                .and_then(|store| store.put(&identity, &response));
            if let Err(err) = result {
                warn!(error = %err, store = %store_name, url = %identity.url, "Cache write failed");
            }
        });

        let mut pending = lock(&self.pending_writes);
        pending.retain(|handle| !handle.is_finished());
        pending.push(handle);
    }

    /// Blocks until every background store write issued so far has finished.
    pub fn wait_for_pending_writes(&self) {
        let handles = std::mem::take(&mut *lock(&self.pending_writes));
        for handle in handles {
            if handle.join().is_err() {
                warn!("Cache write thread panicked");
            }
        }
    }
}
