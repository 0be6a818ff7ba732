//! Registry of tracked credentials
//!
//! `RwLock<HashMap>` keyed by credential identity. Process-wide state with an
//! explicit owner: created empty at service start, live for the process's
//! lifetime, cleared only by per-entry pruning after each cycle.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};
use verdict::ClassificationOutcome;

use crate::entry::{CredentialEntry, EntryView};

/// A deletion-eligible entry, as collected for the deletion executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionTarget {
    pub identity: String,
    pub name: String,
}

/// Aggregate counts for the snapshot.
///
/// `total` and `usable` count non-deleted entries only; `deletable` is the
/// current deletion-candidate count.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub usable: usize,
    pub deletable: usize,
}

/// In-memory registry of tracked credentials.
pub struct Registry {
    entries: RwLock<HashMap<String, CredentialEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create or refresh an entry from a listing row.
    ///
    /// First sighting creates a `Pending` entry with a zero counter. A
    /// re-sighting only refreshes the informational fields; probe state
    /// carries over between cycles.
    pub async fn upsert(&self, identity: &str, name: &str, label: Option<String>) {
        let mut entries = self.entries.write().await;
        match entries.get_mut(identity) {
            Some(entry) => {
                entry.name = name.to_string();
                entry.label = label;
            }
            None => {
                debug!(identity, name, "tracking new credential");
                entries.insert(
                    identity.to_string(),
                    CredentialEntry::new(identity.to_string(), name.to_string(), label),
                );
            }
        }
    }

    /// Transition an entry to `Probing` before its probe is dispatched.
    pub async fn begin_probe(&self, identity: &str) {
        if let Some(entry) = self.entries.write().await.get_mut(identity) {
            entry.begin_probe();
        }
    }

    /// Apply a classification verdict to an entry.
    ///
    /// Returns the entry's consecutive-invalid counter after the update, or
    /// `None` if the identity is not tracked.
    pub async fn apply_outcome(
        &self,
        identity: &str,
        outcome: &ClassificationOutcome,
        now_millis: u64,
    ) -> Option<u32> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(identity)?;
        entry.apply_outcome(outcome, now_millis);
        Some(entry.consecutive_invalid)
    }

    /// Record a probe that failed before classification (transport error,
    /// gateway error, timeout). Counter is left unchanged.
    pub async fn apply_transport_failure(
        &self,
        identity: &str,
        status_code: u16,
        reason: String,
        now_millis: u64,
    ) {
        if let Some(entry) = self.entries.write().await.get_mut(identity) {
            entry.apply_transport_failure(status_code, reason, now_millis);
        }
    }

    /// Record a successful deletion. Returns the entry name if it was tracked.
    pub async fn mark_deleted(&self, identity: &str, now_millis: u64) -> Option<String> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(identity)?;
        entry.mark_deleted(now_millis);
        Some(entry.name.clone())
    }

    /// Remove every tracked identity not present in this cycle's eligible
    /// listing, counters included. Runs after all probes of the cycle settle.
    pub async fn prune_absent(&self, seen: &HashSet<String>) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|identity, _| seen.contains(identity));
        let pruned = before - entries.len();
        if pruned > 0 {
            info!(pruned, remaining = entries.len(), "pruned entries absent from listing");
        }
    }

    /// Current deletion-eligible entries.
    ///
    /// Eligibility is gated purely by the latest classification; the
    /// consecutive-invalid threshold is displayed but not enforced here.
    pub async fn candidates(&self) -> Vec<DeletionTarget> {
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|e| e.is_deletable())
            .map(|e| DeletionTarget {
                identity: e.identity.clone(),
                name: e.name.clone(),
            })
            .collect()
    }

    /// Per-entry views, sorted by name for stable presentation.
    pub async fn views(&self) -> Vec<EntryView> {
        let entries = self.entries.read().await;
        let mut views: Vec<EntryView> = entries.values().map(|e| e.view()).collect();
        views.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        views
    }

    /// Aggregate counts over non-deleted entries.
    pub async fn stats(&self) -> RegistryStats {
        let entries = self.entries.read().await;
        let live: Vec<&CredentialEntry> = entries.values().filter(|e| !e.deleted).collect();
        let deletable = live.iter().filter(|e| e.is_deletable()).count();
        RegistryStats {
            total: live.len(),
            usable: live.len() - deletable,
            deletable,
        }
    }

    /// Clone of a tracked entry.
    pub async fn get(&self, identity: &str) -> Option<CredentialEntry> {
        self.entries.read().await.get(identity).cloned()
    }

    /// Number of tracked entries, deleted ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
