//! Probe response classification for Codex auth files
//!
//! Turns a raw probe response (HTTP status + body) into a validity verdict.
//! Classification is a pure function: no IO, no caching, identical inputs
//! always yield identical outputs. The interesting case is 401, where the
//! response body is matched against known invalidation phrases to separate
//! credentials that are definitely dead from ones that merely look suspect.

pub mod classify;

pub use classify::{ClassificationOutcome, Verdict, classify};
