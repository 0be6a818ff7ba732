//! CLIProxyAPI management gateway
//!
//! Collaborator interfaces consumed by the reconciliation loop:
//!
//! - `Gateway`: listing, single-credential probing, and deletion against the
//!   management API (`/v0/management`), implemented over reqwest by
//!   `HttpGateway` with a bearer management key and a fixed per-call timeout.
//! - `KeyValueStore`: the operator's persistent key-value store, implemented
//!   as a JSON file by `FileKvStore`. `KeyStore` layers the management-key
//!   resolution on top, including the legacy storage-key migration.
//!
//! Listing rows and probe results cross this boundary through explicit serde
//! schemas with defaulting, never ad hoc field access.

pub mod client;
pub mod error;
pub mod keystore;
pub mod schema;

pub use client::{Gateway, HttpGateway, ProbeTemplate};
pub use error::{Error, Result};
pub use keystore::{FileKvStore, KeyStore, KeyValueStore};
pub use schema::{AuthFileEntry, ProbeResponse};
