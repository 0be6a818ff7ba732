//! Reconciliation loop and deletion executor
//!
//! One `Sweeper` is constructed at service start and owns all mutable
//! state: the credential registry, the cycle counter, the running flag,
//! and the last-error/last-deleted records. Every operation goes through
//! this context object; there are no module-level globals.
//!
//! A cycle: list auth files, filter to enabled files of the managed
//! provider kind, upsert them into the registry, probe them all through
//! the bounded scheduler, classify each response, apply the state
//! transition, then prune entries absent from the listing. The scheduler
//! call doubles as the barrier: pruning never runs while probes are in
//! flight.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use common::{Secret, now_millis};
use gateway::{AuthFileEntry, Gateway, KeyStore};
use registry::{DeletionTarget, EntryView, Registry, RegistryStats};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::metrics;
use crate::scheduler::run_with_limit;

/// Operator interaction collaborator.
///
/// Confirmation prompts and interactive key entry live outside the core.
/// The headless binary wires in [`HeadlessApprover`]; tests script their
/// own. Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility.
pub trait Approver: Send + Sync {
    /// Ask the operator to confirm a destructive action.
    fn confirm<'a>(&'a self, prompt: &'a str) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    /// Ask the operator for a management key when none is stored.
    fn request_key(&self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>>;
}

/// Approver for headless operation: HTTP-triggered actions carry the
/// operator's intent already, so confirmation always passes, and there is
/// no prompt to type a key into.
pub struct HeadlessApprover;

impl Approver for HeadlessApprover {
    fn confirm<'a>(&'a self, _prompt: &'a str) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async { true })
    }

    fn request_key(&self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        Box::pin(async { None })
    }
}

/// Settings handed to the reconciliation loop at construction.
#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub provider_kind: String,
    pub interval: Duration,
    pub probe_concurrency: usize,
    pub delete_concurrency: usize,
    /// Tracked and surfaced for operator visibility; not a deletion gate.
    pub min_consecutive_invalid: u32,
    /// Probe target URL, echoed in the snapshot.
    pub probe_url: String,
}

impl Default for SweepSettings {
    fn default() -> Self {
        let template = gateway::ProbeTemplate::default();
        Self {
            provider_kind: "codex".to_string(),
            interval: Duration::from_secs(120),
            probe_concurrency: 100,
            delete_concurrency: 50,
            min_consecutive_invalid: 2,
            probe_url: template.url,
        }
    }
}

/// Point-in-time view of the whole service, polled by the presentation
/// layer after every cycle.
#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub cycle: u64,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<u64>,
    pub last_error: String,
    pub last_deleted: Vec<String>,
    pub stats: RegistryStats,
    pub entries: Vec<EntryView>,
    pub config: SnapshotConfig,
}

/// Config echo inside the snapshot.
#[derive(Debug, Serialize)]
pub struct SnapshotConfig {
    pub provider_kind: String,
    pub interval_secs: u64,
    pub probe_concurrency: usize,
    pub delete_concurrency: usize,
    pub min_consecutive_invalid: u32,
    pub probe_url: String,
}

/// The reconciliation service context.
///
/// Cycles and deletions both mutate entry state, so they are mutually
/// exclusive: every public operation runs under `op_lock`. A cycle
/// trigger that loses the lock is dropped; deletions wait their turn.
pub struct Sweeper {
    settings: SweepSettings,
    registry: Registry,
    gateway: Arc<dyn Gateway>,
    keys: KeyStore,
    approver: Arc<dyn Approver>,
    op_lock: Mutex<()>,
    running: AtomicBool,
    cycle: AtomicU64,
    last_run_at: AtomicU64,
    next_run_at: AtomicU64,
    last_error: RwLock<String>,
    last_deleted: RwLock<Vec<String>>,
}

impl Sweeper {
    pub fn new(
        settings: SweepSettings,
        gateway: Arc<dyn Gateway>,
        keys: KeyStore,
        approver: Arc<dyn Approver>,
    ) -> Self {
        Self {
            settings,
            registry: Registry::new(),
            gateway,
            keys,
            approver,
            op_lock: Mutex::new(()),
            running: AtomicBool::new(false),
            cycle: AtomicU64::new(0),
            last_run_at: AtomicU64::new(0),
            next_run_at: AtomicU64::new(0),
            last_error: RwLock::new(String::new()),
            last_deleted: RwLock::new(Vec::new()),
        }
    }

    /// Run one full reconciliation cycle.
    ///
    /// A no-op (logged, not queued) when a cycle or deletion is already in
    /// flight. On a cycle-level failure the registry keeps the state of
    /// the last successful cycle; the running flag is always cleared.
    pub async fn run_cycle(&self, interactive: bool) {
        let Ok(_guard) = self.op_lock.try_lock() else {
            warn!("a cycle or deletion is already in flight, skipping trigger");
            return;
        };
        self.running.store(true, Ordering::SeqCst);

        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        self.last_deleted.write().await.clear();
        self.set_last_error(String::new()).await;
        let now = now_millis();
        self.last_run_at.store(now, Ordering::SeqCst);
        self.next_run_at
            .store(now + self.settings.interval.as_millis() as u64, Ordering::SeqCst);

        let started = Instant::now();
        match self.cycle_body(interactive, cycle).await {
            Ok(probed) => {
                info!(cycle, probed, elapsed_ms = started.elapsed().as_millis() as u64, "cycle done");
            }
            Err(e) => {
                error!(cycle, error = %e, "cycle failed");
                self.set_last_error(e.to_string()).await;
            }
        }
        metrics::record_cycle(started.elapsed().as_secs_f64());

        self.running.store(false, Ordering::SeqCst);
    }

    /// List, filter, probe, classify, update, prune.
    async fn cycle_body(&self, interactive: bool, cycle: u64) -> Result<usize> {
        let key = self
            .resolve_key(interactive)
            .await
            .ok_or(Error::MissingKey)?;

        let files = self
            .gateway
            .list_entries(key.expose())
            .await
            .map_err(Error::Listing)?;

        let mut eligible = Vec::new();
        let mut seen = HashSet::new();
        for file in files {
            if file.provider_kind() != self.settings.provider_kind || !file.is_enabled() {
                continue;
            }
            if !file.is_well_formed() {
                warn!(name = %file.name, "skipping listing row without identity or name");
                continue;
            }
            seen.insert(file.auth_index.clone());
            self.registry
                .upsert(&file.auth_index, &file.name, file.label())
                .await;
            // Already deleted upstream; the listing just hasn't caught up.
            // Keep the entry visible until it drops out, but never probe it.
            if let Some(entry) = self.registry.get(&file.auth_index).await {
                if entry.deleted {
                    continue;
                }
            }
            eligible.push(file);
        }

        info!(
            cycle,
            eligible = eligible.len(),
            concurrency = self.settings.probe_concurrency,
            "probing eligible auth files"
        );

        let probed = eligible.len();
        run_with_limit(eligible, self.settings.probe_concurrency, |file| {
            self.probe_one(file, &key)
        })
        .await;

        // All probes of this cycle have settled; safe to prune
        self.registry.prune_absent(&seen).await;
        Ok(probed)
    }

    /// Probe one auth file and apply the resulting transition.
    ///
    /// Failures stay inside this task: a dead probe becomes entry state,
    /// never an error that could abort sibling probes.
    async fn probe_one(&self, file: AuthFileEntry, key: &Secret<String>) {
        let identity = file.auth_index.clone();
        self.registry.begin_probe(&identity).await;

        match self.gateway.probe_entry(key.expose(), &identity).await {
            Ok(response) => {
                let outcome = verdict::classify(response.status_code, &response.body);
                metrics::record_probe(outcome.verdict.label());
                let hits = self
                    .registry
                    .apply_outcome(&identity, &outcome, now_millis())
                    .await;
                if outcome.verdict.is_invalid() {
                    warn!(
                        name = %file.name,
                        verdict = outcome.verdict.label(),
                        hits = hits.unwrap_or(0),
                        threshold = self.settings.min_consecutive_invalid,
                        reason = %outcome.reason,
                        "invalid-looking probe result"
                    );
                }
            }
            Err(e) => {
                // Inconclusive: the counter must survive this attempt
                warn!(name = %file.name, error = %e, "probe failed before classification");
                metrics::record_probe("transport-error");
                self.registry
                    .apply_transport_failure(&identity, e.status_code(), e.to_string(), now_millis())
                    .await;
            }
        }
    }

    /// Read the management key, asking the operator if allowed and needed.
    async fn resolve_key(&self, interactive: bool) -> Option<Secret<String>> {
        if let Some(key) = self.keys.management_key().await {
            return Some(key);
        }
        if interactive {
            if let Some(entered) = self.approver.request_key().await {
                match self.keys.set_management_key(&entered).await {
                    Ok(()) => return self.keys.management_key().await,
                    Err(e) => warn!(error = %e, "rejected operator-entered management key"),
                }
            }
        }
        None
    }

    /// Delete one tracked auth file upstream.
    ///
    /// Requires the management key and, unless `skip_confirm`, an explicit
    /// confirmation through the approver. On success the entry is marked
    /// `Deleted` and its name recorded; on failure the error becomes the
    /// last error and the entry keeps its state. Returns whether the
    /// deletion went through. Waits for any running cycle to finish first.
    pub async fn delete_one(&self, identity: &str, skip_confirm: bool) -> bool {
        let _guard = self.op_lock.lock().await;
        self.delete_locked(identity, skip_confirm).await
    }

    /// Deletion body; caller holds `op_lock`.
    async fn delete_locked(&self, identity: &str, skip_confirm: bool) -> bool {
        let Some(entry) = self.registry.get(identity).await else {
            self.set_last_error(format!("unknown auth file: {identity}")).await;
            return false;
        };

        let Some(key) = self.keys.management_key().await else {
            self.set_last_error("missing management key".to_string()).await;
            return false;
        };

        if !skip_confirm {
            let prompt = format!("delete auth file {}?", entry.name);
            if !self.approver.confirm(&prompt).await {
                return false;
            }
        }

        match self.gateway.delete_entry(key.expose(), &entry.name).await {
            Ok(()) => {
                if let Some(name) = self.registry.mark_deleted(identity, now_millis()).await {
                    self.last_deleted.write().await.push(name);
                }
                info!(name = %entry.name, "auth file deleted");
                metrics::record_deletion("ok");
                true
            }
            Err(e) => {
                warn!(name = %entry.name, error = %e, "delete failed");
                metrics::record_deletion("error");
                self.set_last_error(e.to_string()).await;
                false
            }
        }
    }

    /// Delete every current deletion-eligible entry.
    ///
    /// One aggregate confirmation, then the collected targets run through
    /// the scheduler under the (smaller) deletion concurrency limit. One
    /// entry's failure never blocks the others. Returns the number of
    /// entries deleted by this call. Waits for any running cycle to finish
    /// first; no cycle starts until the whole batch has settled.
    pub async fn delete_all(&self) -> usize {
        let _guard = self.op_lock.lock().await;
        let targets: Vec<DeletionTarget> = self.registry.candidates().await;
        if targets.is_empty() {
            self.set_last_error("no deletable auth files".to_string()).await;
            return 0;
        }

        let prompt = format!("delete {} invalid auth files?", targets.len());
        if !self.approver.confirm(&prompt).await {
            return 0;
        }

        info!(
            targets = targets.len(),
            concurrency = self.settings.delete_concurrency,
            "bulk-deleting invalid auth files"
        );

        let deleted = AtomicUsize::new(0);
        run_with_limit(targets, self.settings.delete_concurrency, |target| {
            let deleted = &deleted;
            async move {
                if self.delete_locked(&target.identity, true).await {
                    deleted.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
        .await;
        deleted.load(Ordering::SeqCst)
    }

    /// Point-in-time view for the presentation layer.
    pub async fn snapshot(&self) -> Snapshot {
        let last_run_at = self.last_run_at.load(Ordering::SeqCst);
        let next_run_at = self.next_run_at.load(Ordering::SeqCst);
        Snapshot {
            cycle: self.cycle.load(Ordering::SeqCst),
            running: self.is_running(),
            last_run_at: (last_run_at > 0).then_some(last_run_at),
            next_run_at: (next_run_at > 0).then_some(next_run_at),
            last_error: self.last_error.read().await.clone(),
            last_deleted: self.last_deleted.read().await.clone(),
            stats: self.registry.stats().await,
            entries: self.registry.views().await,
            config: SnapshotConfig {
                provider_kind: self.settings.provider_kind.clone(),
                interval_secs: self.settings.interval.as_secs(),
                probe_concurrency: self.settings.probe_concurrency,
                delete_concurrency: self.settings.delete_concurrency,
                min_consecutive_invalid: self.settings.min_consecutive_invalid,
                probe_url: self.settings.probe_url.clone(),
            },
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    pub fn interval(&self) -> Duration {
        self.settings.interval
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub async fn last_error(&self) -> String {
        self.last_error.read().await.clone()
    }

    pub async fn last_deleted(&self) -> Vec<String> {
        self.last_deleted.read().await.clone()
    }

    async fn set_last_error(&self, message: String) {
        *self.last_error.write().await = message;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway::{FileKvStore, KeyValueStore, ProbeResponse};
    use registry::EntryStatus;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    /// In-memory key-value store for tests.
    struct MemKv(StdMutex<HashMap<String, String>>);

    impl MemKv {
        fn new() -> Arc<Self> {
            Arc::new(Self(StdMutex::new(HashMap::new())))
        }
    }

    impl KeyValueStore for MemKv {
        fn get<'a>(
            &'a self,
            key: &'a str,
        ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
            Box::pin(async move { self.0.lock().unwrap().get(key).cloned() })
        }

        fn set<'a>(
            &'a self,
            key: &'a str,
            value: &'a str,
        ) -> Pin<Box<dyn Future<Output = gateway::Result<()>> + Send + 'a>> {
            self.0
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Box::pin(async { Ok(()) })
        }

        fn delete<'a>(
            &'a self,
            key: &'a str,
        ) -> Pin<Box<dyn Future<Output = gateway::Result<()>> + Send + 'a>> {
            self.0.lock().unwrap().remove(key);
            Box::pin(async { Ok(()) })
        }
    }

    /// Scripted management API.
    #[derive(Default)]
    struct MockGateway {
        files: StdMutex<Vec<AuthFileEntry>>,
        /// Downstream (status, body) per auth_index; default (200, "{}")
        probes: StdMutex<HashMap<String, (u16, String)>>,
        /// auth_index values whose probe fails at the transport level
        probe_errors: StdMutex<HashSet<String>>,
        /// names whose deletion fails
        delete_failures: StdMutex<HashSet<String>>,
        deleted: StdMutex<Vec<String>>,
        list_gate: Option<Arc<Notify>>,
        delete_gate: Option<Arc<Notify>>,
    }

    impl MockGateway {
        fn with_files(files: Vec<AuthFileEntry>) -> Arc<Self> {
            let gw = Self::default();
            *gw.files.lock().unwrap() = files;
            Arc::new(gw)
        }

        fn set_files(&self, files: Vec<AuthFileEntry>) {
            *self.files.lock().unwrap() = files;
        }

        fn set_probe(&self, auth_index: &str, status: u16, body: &str) {
            self.probes
                .lock()
                .unwrap()
                .insert(auth_index.to_string(), (status, body.to_string()));
        }

        fn fail_probe(&self, auth_index: &str) {
            self.probe_errors
                .lock()
                .unwrap()
                .insert(auth_index.to_string());
        }

        fn fail_delete(&self, name: &str) {
            self.delete_failures.lock().unwrap().insert(name.to_string());
        }

        fn deleted_names(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    impl Gateway for MockGateway {
        fn list_entries<'a>(
            &'a self,
            _key: &'a str,
        ) -> Pin<Box<dyn Future<Output = gateway::Result<Vec<AuthFileEntry>>> + Send + 'a>>
        {
            Box::pin(async move {
                if let Some(gate) = &self.list_gate {
                    gate.notified().await;
                }
                Ok(self.files.lock().unwrap().clone())
            })
        }

        fn probe_entry<'a>(
            &'a self,
            _key: &'a str,
            auth_index: &'a str,
        ) -> Pin<Box<dyn Future<Output = gateway::Result<ProbeResponse>> + Send + 'a>> {
            Box::pin(async move {
                if self.probe_errors.lock().unwrap().contains(auth_index) {
                    return Err(gateway::Error::Transport("connection reset".into()));
                }
                let (status_code, body) = self
                    .probes
                    .lock()
                    .unwrap()
                    .get(auth_index)
                    .cloned()
                    .unwrap_or((200, "{}".to_string()));
                Ok(ProbeResponse { status_code, body })
            })
        }

        fn delete_entry<'a>(
            &'a self,
            _key: &'a str,
            name: &'a str,
        ) -> Pin<Box<dyn Future<Output = gateway::Result<()>> + Send + 'a>> {
            Box::pin(async move {
                if let Some(gate) = &self.delete_gate {
                    gate.notified().await;
                }
                if self.delete_failures.lock().unwrap().contains(name) {
                    return Err(gateway::Error::Api {
                        status: 500,
                        body: "delete failed".into(),
                    });
                }
                self.deleted.lock().unwrap().push(name.to_string());
                Ok(())
            })
        }
    }

    /// Approver with a fixed script.
    struct ScriptedApprover {
        approve: bool,
        key: Option<String>,
    }

    impl ScriptedApprover {
        fn approving() -> Arc<Self> {
            Arc::new(Self {
                approve: true,
                key: None,
            })
        }

        fn denying() -> Arc<Self> {
            Arc::new(Self {
                approve: false,
                key: None,
            })
        }

        fn with_key(key: &str) -> Arc<Self> {
            Arc::new(Self {
                approve: true,
                key: Some(key.to_string()),
            })
        }
    }

    impl Approver for ScriptedApprover {
        fn confirm<'a>(
            &'a self,
            _prompt: &'a str,
        ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
            Box::pin(async move { self.approve })
        }

        fn request_key(&self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
            Box::pin(async move { self.key.clone() })
        }
    }

    fn codex_file(auth_index: &str, name: &str) -> AuthFileEntry {
        AuthFileEntry {
            auth_index: auth_index.to_string(),
            name: name.to_string(),
            provider: Some("codex".to_string()),
            ..Default::default()
        }
    }

    async fn sweeper_with_key(
        gateway: Arc<dyn Gateway>,
        approver: Arc<dyn Approver>,
    ) -> Arc<Sweeper> {
        let keys = KeyStore::new(MemKv::new());
        keys.set_management_key("mk-test").await.unwrap();
        Arc::new(Sweeper::new(
            SweepSettings::default(),
            gateway,
            keys,
            approver,
        ))
    }

    const INVALIDATED_BODY: &str =
        "401 Your authentication token has been invalidated. Please try signing in again.";

    #[tokio::test]
    async fn end_to_end_invalid_entry_becomes_deletable_then_deleted() {
        let gw = MockGateway::with_files(vec![codex_file("1", "codex-1.json")]);
        gw.set_probe("1", 401, INVALIDATED_BODY);
        let sweeper = sweeper_with_key(gw.clone(), ScriptedApprover::approving()).await;

        sweeper.run_cycle(false).await;

        let entry = sweeper.registry().get("1").await.unwrap();
        assert_eq!(entry.status, EntryStatus::Invalidated);
        assert_eq!(entry.consecutive_invalid, 1);
        assert!(entry.last_probe_at.is_some());
        let candidates = sweeper.registry().candidates().await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "codex-1.json");

        assert!(sweeper.delete_one("1", false).await);
        let entry = sweeper.registry().get("1").await.unwrap();
        assert_eq!(entry.status, EntryStatus::Deleted);
        assert_eq!(entry.consecutive_invalid, 0);
        assert_eq!(sweeper.last_deleted().await, vec!["codex-1.json"]);
        assert_eq!(gw.deleted_names(), vec!["codex-1.json"]);
    }

    #[tokio::test]
    async fn cycle_filters_by_provider_kind_and_enabled_flag() {
        let other = AuthFileEntry {
            provider: Some("claude".to_string()),
            ..codex_file("2", "claude-2.json")
        };
        let disabled = AuthFileEntry {
            disabled: true,
            ..codex_file("3", "codex-3.json")
        };
        let gw = MockGateway::with_files(vec![codex_file("1", "codex-1.json"), other, disabled]);
        let sweeper = sweeper_with_key(gw, ScriptedApprover::approving()).await;

        sweeper.run_cycle(false).await;

        assert_eq!(sweeper.registry().len().await, 1);
        assert!(sweeper.registry().get("1").await.is_some());
    }

    #[tokio::test]
    async fn malformed_listing_rows_are_skipped_not_fatal() {
        let nameless = AuthFileEntry {
            name: String::new(),
            ..codex_file("2", "")
        };
        let gw = MockGateway::with_files(vec![codex_file("1", "codex-1.json"), nameless]);
        let sweeper = sweeper_with_key(gw, ScriptedApprover::approving()).await;

        sweeper.run_cycle(false).await;

        assert_eq!(sweeper.registry().len().await, 1);
        assert!(sweeper.last_error().await.is_empty());
    }

    #[tokio::test]
    async fn missing_key_aborts_cycle_and_leaves_registry_untouched() {
        let gw = MockGateway::with_files(vec![codex_file("1", "codex-1.json")]);
        gw.set_probe("1", 401, "invalid_token");
        let sweeper = sweeper_with_key(gw.clone(), ScriptedApprover::approving()).await;

        sweeper.run_cycle(false).await;
        let before = sweeper.registry().get("1").await.unwrap();
        assert_eq!(before.consecutive_invalid, 1);

        sweeper.keys().clear_management_key().await.unwrap();
        gw.set_files(vec![codex_file("9", "codex-9.json")]);
        sweeper.run_cycle(false).await;

        assert!(sweeper.last_error().await.contains("management key"));
        assert_eq!(sweeper.cycle(), 2, "cycle counter still advances");
        // Registry is exactly as of the last successful cycle
        assert_eq!(sweeper.registry().len().await, 1);
        let after = sweeper.registry().get("1").await.unwrap();
        assert_eq!(after.consecutive_invalid, 1);
        assert!(sweeper.registry().get("9").await.is_none());
    }

    #[tokio::test]
    async fn interactive_cycle_asks_for_key_and_stores_it() {
        let gw = MockGateway::with_files(vec![codex_file("1", "codex-1.json")]);
        let keys = KeyStore::new(MemKv::new());
        let sweeper = Arc::new(Sweeper::new(
            SweepSettings::default(),
            gw,
            keys,
            ScriptedApprover::with_key("mk-entered"),
        ));

        sweeper.run_cycle(true).await;

        assert!(sweeper.last_error().await.is_empty());
        assert_eq!(sweeper.registry().len().await, 1);
        assert_eq!(
            sweeper.keys().management_key().await.unwrap().expose(),
            "mk-entered"
        );
    }

    #[tokio::test]
    async fn transport_failure_keeps_the_invalid_counter() {
        let gw = MockGateway::with_files(vec![codex_file("1", "codex-1.json")]);
        gw.set_probe("1", 401, "invalid_token");
        let sweeper = sweeper_with_key(gw.clone(), ScriptedApprover::approving()).await;

        sweeper.run_cycle(false).await;
        assert_eq!(
            sweeper.registry().get("1").await.unwrap().consecutive_invalid,
            1
        );

        gw.fail_probe("1");
        sweeper.run_cycle(false).await;

        let entry = sweeper.registry().get("1").await.unwrap();
        assert_eq!(entry.status, EntryStatus::ProbeFailed);
        assert_eq!(entry.consecutive_invalid, 1, "inconclusive attempt");
        assert_eq!(entry.last_status_code, 0);
    }

    #[tokio::test]
    async fn entries_absent_from_listing_are_pruned_after_the_cycle() {
        let gw = MockGateway::with_files(vec![
            codex_file("1", "codex-1.json"),
            codex_file("2", "codex-2.json"),
        ]);
        let sweeper = sweeper_with_key(gw.clone(), ScriptedApprover::approving()).await;

        sweeper.run_cycle(false).await;
        assert_eq!(sweeper.registry().len().await, 2);

        gw.set_files(vec![codex_file("1", "codex-1.json")]);
        sweeper.run_cycle(false).await;

        assert_eq!(sweeper.registry().len().await, 1);
        assert!(sweeper.registry().get("2").await.is_none());
    }

    #[tokio::test]
    async fn run_cycle_while_running_is_a_noop() {
        let gate = Arc::new(Notify::new());
        let gw = Arc::new(MockGateway {
            list_gate: Some(gate.clone()),
            ..Default::default()
        });
        *gw.files.lock().unwrap() = vec![codex_file("1", "codex-1.json")];
        let sweeper = sweeper_with_key(gw, ScriptedApprover::approving()).await;

        let background = {
            let sweeper = sweeper.clone();
            tokio::spawn(async move { sweeper.run_cycle(false).await })
        };
        // Let the first cycle reach the gated listing call
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sweeper.is_running());

        sweeper.run_cycle(false).await;
        assert_eq!(sweeper.cycle(), 1, "second trigger must not start a cycle");

        gate.notify_one();
        background.await.unwrap();
        assert_eq!(sweeper.cycle(), 1);
        assert!(!sweeper.is_running());
        assert_eq!(sweeper.registry().len().await, 1);
    }

    #[tokio::test]
    async fn delete_all_partial_failures_delete_the_rest() {
        let files: Vec<AuthFileEntry> = (1..=5)
            .map(|i| codex_file(&i.to_string(), &format!("codex-{i}.json")))
            .collect();
        let gw = MockGateway::with_files(files);
        for i in 1..=5 {
            gw.set_probe(&i.to_string(), 401, "invalid_token");
        }
        gw.fail_delete("codex-2.json");
        gw.fail_delete("codex-4.json");
        let sweeper = sweeper_with_key(gw.clone(), ScriptedApprover::approving()).await;

        sweeper.run_cycle(false).await;
        assert_eq!(sweeper.registry().candidates().await.len(), 5);

        let deleted = sweeper.delete_all().await;
        assert_eq!(deleted, 3);

        let mut names = sweeper.last_deleted().await;
        names.sort();
        assert_eq!(names, vec!["codex-1.json", "codex-3.json", "codex-5.json"]);
        assert!(sweeper.last_error().await.contains("delete failed"));

        // Failed entries keep their state and stay eligible
        let survivor = sweeper.registry().get("2").await.unwrap();
        assert_eq!(survivor.status, EntryStatus::Invalidated);
        assert!(survivor.is_deletable());
    }

    #[tokio::test]
    async fn cycle_triggered_during_bulk_delete_is_skipped() {
        let gate = Arc::new(Notify::new());
        let gw = Arc::new(MockGateway {
            delete_gate: Some(gate.clone()),
            ..Default::default()
        });
        gw.set_files(vec![
            codex_file("1", "codex-1.json"),
            codex_file("2", "codex-2.json"),
        ]);
        gw.set_probe("1", 401, "invalid_token");
        gw.set_probe("2", 401, "invalid_token");
        gw.fail_delete("codex-2.json");
        let sweeper = sweeper_with_key(gw.clone(), ScriptedApprover::approving()).await;

        sweeper.run_cycle(false).await;
        assert_eq!(sweeper.registry().candidates().await.len(), 2);

        let bulk = {
            let sweeper = sweeper.clone();
            tokio::spawn(async move { sweeper.delete_all().await })
        };
        // Let both deletions park on the gated gateway call
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A trigger must not interleave with the deletion in flight, and in
        // particular must not clear last_deleted under the running batch
        sweeper.run_cycle(false).await;
        assert_eq!(sweeper.cycle(), 1);

        gate.notify_waiters();
        let deleted = bulk.await.unwrap();
        assert_eq!(deleted, 1, "count comes from successes, not list diffs");
        assert_eq!(sweeper.last_deleted().await, vec!["codex-1.json"]);
        assert!(sweeper.last_error().await.contains("delete failed"));
    }

    #[tokio::test]
    async fn deleted_entry_still_listed_is_not_reprobed() {
        let gw = MockGateway::with_files(vec![codex_file("1", "codex-1.json")]);
        gw.set_probe("1", 401, "invalid_token");
        let sweeper = sweeper_with_key(gw.clone(), ScriptedApprover::approving()).await;

        sweeper.run_cycle(false).await;
        assert!(sweeper.delete_one("1", true).await);

        // The listing lags the deletion; the entry stays terminal even
        // though a fresh probe would have come back healthy
        gw.set_probe("1", 200, "{}");
        sweeper.run_cycle(false).await;

        let entry = sweeper.registry().get("1").await.unwrap();
        assert!(entry.deleted);
        assert_eq!(entry.status, EntryStatus::Deleted);
        assert_eq!(sweeper.registry().len().await, 1, "kept until the listing drops it");

        gw.set_files(vec![]);
        sweeper.run_cycle(false).await;
        assert!(sweeper.registry().is_empty().await);
    }

    #[tokio::test]
    async fn delete_all_without_candidates_records_an_error() {
        let gw = MockGateway::with_files(vec![codex_file("1", "codex-1.json")]);
        let sweeper = sweeper_with_key(gw, ScriptedApprover::approving()).await;
        sweeper.run_cycle(false).await;

        assert_eq!(sweeper.delete_all().await, 0);
        assert!(sweeper.last_error().await.contains("no deletable"));
    }

    #[tokio::test]
    async fn declined_confirmation_blocks_deletion() {
        let gw = MockGateway::with_files(vec![codex_file("1", "codex-1.json")]);
        gw.set_probe("1", 401, "invalid_token");
        let sweeper = sweeper_with_key(gw.clone(), ScriptedApprover::denying()).await;
        sweeper.run_cycle(false).await;

        assert!(!sweeper.delete_one("1", false).await);
        assert_eq!(sweeper.delete_all().await, 0);
        assert!(gw.deleted_names().is_empty());
        assert_eq!(
            sweeper.registry().get("1").await.unwrap().status,
            EntryStatus::Invalidated
        );
    }

    #[tokio::test]
    async fn skip_confirm_bypasses_the_approver() {
        let gw = MockGateway::with_files(vec![codex_file("1", "codex-1.json")]);
        gw.set_probe("1", 401, "invalid_token");
        let sweeper = sweeper_with_key(gw.clone(), ScriptedApprover::denying()).await;
        sweeper.run_cycle(false).await;

        assert!(sweeper.delete_one("1", true).await);
        assert_eq!(gw.deleted_names(), vec!["codex-1.json"]);
    }

    #[tokio::test]
    async fn delete_one_without_key_records_error() {
        let gw = MockGateway::with_files(vec![codex_file("1", "codex-1.json")]);
        gw.set_probe("1", 401, "invalid_token");
        let sweeper = sweeper_with_key(gw, ScriptedApprover::approving()).await;
        sweeper.run_cycle(false).await;

        sweeper.keys().clear_management_key().await.unwrap();
        assert!(!sweeper.delete_one("1", true).await);
        assert!(sweeper.last_error().await.contains("missing management key"));
    }

    #[tokio::test]
    async fn new_cycle_clears_last_deleted_and_last_error() {
        let gw = MockGateway::with_files(vec![codex_file("1", "codex-1.json")]);
        gw.set_probe("1", 401, "invalid_token");
        let sweeper = sweeper_with_key(gw.clone(), ScriptedApprover::approving()).await;

        sweeper.run_cycle(false).await;
        assert!(sweeper.delete_one("1", true).await);
        assert_eq!(sweeper.last_deleted().await.len(), 1);

        gw.set_probe("1", 200, "{}");
        sweeper.run_cycle(false).await;
        assert!(sweeper.last_deleted().await.is_empty());
        assert!(sweeper.last_error().await.is_empty());
    }

    #[tokio::test]
    async fn snapshot_reflects_cycle_state_and_config_echo() {
        let gw = MockGateway::with_files(vec![
            codex_file("1", "codex-1.json"),
            codex_file("2", "codex-2.json"),
        ]);
        gw.set_probe("2", 401, "unauthorized");
        let sweeper = sweeper_with_key(gw, ScriptedApprover::approving()).await;

        sweeper.run_cycle(false).await;
        let snapshot = sweeper.snapshot().await;

        assert_eq!(snapshot.cycle, 1);
        assert!(!snapshot.running);
        assert!(snapshot.last_run_at.is_some());
        assert!(snapshot.next_run_at.unwrap() > snapshot.last_run_at.unwrap());
        assert_eq!(snapshot.stats.total, 2);
        assert_eq!(snapshot.stats.usable, 1);
        assert_eq!(snapshot.stats.deletable, 1);
        assert_eq!(snapshot.entries.len(), 2);
        // Threshold is displayed, not enforced: one hit already deletable
        assert_eq!(snapshot.config.min_consecutive_invalid, 2);
        assert!(snapshot.entries.iter().any(|e| e.deletable));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["config"]["provider_kind"], "codex");
        assert_eq!(json["entries"][1]["status"], "unauthorized");
    }

    #[tokio::test]
    async fn file_backed_key_store_works_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(
            FileKvStore::load(dir.path().join("keys.json"))
                .await
                .unwrap(),
        );
        let keys = KeyStore::new(kv);
        keys.set_management_key("mk-file").await.unwrap();

        let gw = MockGateway::with_files(vec![codex_file("1", "codex-1.json")]);
        let sweeper = Sweeper::new(
            SweepSettings::default(),
            gw,
            keys,
            ScriptedApprover::approving(),
        );

        sweeper.run_cycle(false).await;
        assert!(sweeper.last_error().await.is_empty());
        assert_eq!(sweeper.registry().len().await, 1);
    }
}
