//! Credential registry for tracked Codex auth files
//!
//! In-memory mapping from credential identity to its tracked entry: status,
//! consecutive-invalid counter, and last probe metadata. Mutated only by the
//! reconciliation cycle and the deletion executor, both of which go through
//! the `RwLock` here, so probe tasks may overlap freely in time without
//! racing on entry state.
//!
//! Entry lifecycle:
//! 1. First sighting in a listing → created as `Pending`, counter 0
//! 2. Probe dispatched → `Probing`
//! 3. Classified → `Usable` / `Invalidated` / `Unauthorized` /
//!    `QuotaLimited` / `ProbeFailed`, counter updated per the verdict
//! 4. Deletion succeeds → `Deleted`, retained until a listing omits it
//! 5. Absent from a cycle's eligible listing → pruned, counter included

pub mod entry;
pub mod registry;

pub use entry::{CredentialEntry, EntryStatus, EntryView, excerpt};
pub use registry::{DeletionTarget, Registry, RegistryStats};
