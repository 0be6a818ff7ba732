//! Tracked entry state and transitions

use serde::Serialize;
use verdict::{ClassificationOutcome, Verdict};

/// Maximum length of the stored body excerpt.
const EXCERPT_MAX: usize = 160;

/// Runtime status of a tracked credential.
///
/// Transitions:
/// - Pending → Probing (probe dispatched)
/// - Probing → Usable / QuotaLimited / ProbeFailed (non-invalid verdict;
///   counter resets to 0, candidate flag cleared)
/// - Probing → Invalidated / Unauthorized (invalid verdict; counter
///   increments by 1, candidate flag set)
/// - Probing → ProbeFailed (probe call itself failed; counter unchanged,
///   distinguishing an inconclusive attempt from a confirmed verdict)
/// - Invalidated / Unauthorized → Deleted (deletion succeeded; counter
///   cleared, entry retained until a listing confirms its absence)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryStatus {
    Pending,
    Probing,
    Usable,
    Invalidated,
    Unauthorized,
    QuotaLimited,
    ProbeFailed,
    Deleted,
}

impl EntryStatus {
    /// Status label for snapshots and logging.
    pub fn label(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Probing => "probing",
            EntryStatus::Usable => "usable",
            EntryStatus::Invalidated => "invalidated",
            EntryStatus::Unauthorized => "unauthorized",
            EntryStatus::QuotaLimited => "quota-limited",
            EntryStatus::ProbeFailed => "probe-failed",
            EntryStatus::Deleted => "deleted",
        }
    }
}

impl From<Verdict> for EntryStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Usable => EntryStatus::Usable,
            Verdict::Invalidated => EntryStatus::Invalidated,
            Verdict::Unauthorized => EntryStatus::Unauthorized,
            Verdict::QuotaLimited => EntryStatus::QuotaLimited,
            Verdict::ProbeFailed => EntryStatus::ProbeFailed,
        }
    }
}

/// One tracked credential.
#[derive(Debug, Clone)]
pub struct CredentialEntry {
    /// Opaque stable identifier, unique within the registry
    pub identity: String,
    pub name: String,
    /// Informational label (the account email, when the listing carries one)
    pub label: Option<String>,
    pub status: EntryStatus,
    /// Last observed classification status code, 0 if none yet
    pub last_status_code: u16,
    pub last_reason: String,
    /// Truncated, whitespace-collapsed diagnostic text from the last probe
    pub last_body_excerpt: String,
    /// Unix milliseconds of the most recent probe attempt
    pub last_probe_at: Option<u64>,
    /// Consecutive Invalidated/Unauthorized classifications since last reset
    pub consecutive_invalid: u32,
    /// Mirrors `status ∈ {Invalidated, Unauthorized}`
    pub deletion_candidate: bool,
    /// Terminal flag once a deletion succeeds
    pub deleted: bool,
}

impl CredentialEntry {
    /// New entry on first sighting.
    pub fn new(identity: String, name: String, label: Option<String>) -> Self {
        Self {
            identity,
            name,
            label,
            status: EntryStatus::Pending,
            last_status_code: 0,
            last_reason: String::new(),
            last_body_excerpt: String::new(),
            last_probe_at: None,
            consecutive_invalid: 0,
            deletion_candidate: false,
            deleted: false,
        }
    }

    /// Mark the probe as dispatched.
    pub fn begin_probe(&mut self) {
        self.status = EntryStatus::Probing;
    }

    /// Apply a classification verdict from a completed probe response.
    ///
    /// Invalid verdicts increment the consecutive counter and set the
    /// candidate flag; every other verdict resets the counter to 0 and
    /// clears it.
    pub fn apply_outcome(&mut self, outcome: &ClassificationOutcome, now_millis: u64) {
        self.status = outcome.verdict.into();
        self.last_status_code = outcome.status_code;
        self.last_reason = outcome.reason.clone();
        self.last_body_excerpt = excerpt(&outcome.body);
        self.last_probe_at = Some(now_millis);
        self.deleted = false;

        if outcome.verdict.is_invalid() {
            self.consecutive_invalid += 1;
            self.deletion_candidate = true;
        } else {
            self.consecutive_invalid = 0;
            self.deletion_candidate = false;
        }
    }

    /// Apply a probe that failed before any classification was possible
    /// (transport error, gateway error, timeout).
    ///
    /// The counter is left untouched: an inconclusive attempt neither
    /// confirms nor clears an invalidation streak.
    pub fn apply_transport_failure(&mut self, status_code: u16, reason: String, now_millis: u64) {
        self.status = EntryStatus::ProbeFailed;
        self.last_status_code = status_code;
        self.last_reason = reason;
        self.last_body_excerpt.clear();
        self.last_probe_at = Some(now_millis);
        self.deletion_candidate = false;
        self.deleted = false;
    }

    /// Record a successful deletion. Terminal until pruned.
    pub fn mark_deleted(&mut self, now_millis: u64) {
        self.deleted = true;
        self.status = EntryStatus::Deleted;
        self.consecutive_invalid = 0;
        self.deletion_candidate = false;
        self.last_reason = "deleted".to_string();
        self.last_probe_at = Some(now_millis);
    }

    /// Whether the deletion executor may pick this entry up.
    pub fn is_deletable(&self) -> bool {
        !self.deleted && self.deletion_candidate
    }

    /// Presentation view of this entry.
    pub fn view(&self) -> EntryView {
        EntryView {
            identity: self.identity.clone(),
            name: self.name.clone(),
            label: self.label.clone(),
            status: self.status,
            status_code: self.last_status_code,
            reason: self.last_reason.clone(),
            body_excerpt: self.last_body_excerpt.clone(),
            last_probe_at: self.last_probe_at,
            consecutive_invalid: self.consecutive_invalid,
            deletable: self.is_deletable(),
            deleted: self.deleted,
        }
    }
}

/// Per-entry view model for the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct EntryView {
    pub identity: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub status: EntryStatus,
    pub status_code: u16,
    pub reason: String,
    pub body_excerpt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_probe_at: Option<u64>,
    pub consecutive_invalid: u32,
    pub deletable: bool,
    pub deleted: bool,
}

/// Collapse whitespace and cap diagnostic text at [`EXCERPT_MAX`] characters.
pub fn excerpt(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= EXCERPT_MAX {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(EXCERPT_MAX).collect();
    format!("{cut}...")
}
