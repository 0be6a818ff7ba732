//! Management key storage
//!
//! The operator's management key lives in a local persistent key-value
//! store. `KeyValueStore` is the collaborator interface ({get, set,
//! delete}); `FileKvStore` implements it as a JSON file with atomic
//! temp-file + rename writes and 0600 permissions, since the key grants
//! delete access upstream. A tokio Mutex serializes writes.
//!
//! `KeyStore` layers the management-key policy on top: reads try the
//! dedicated storage key first, then a list of legacy alternate keys left
//! behind by earlier deployments; the first legacy hit is migrated forward
//! to the dedicated key.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use common::Secret;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Storage key the management key is kept under.
const STORAGE_KEY: &str = "codex_quota_manager_management_key";

/// Alternate keys tried on first read and migrated forward.
const LEGACY_KEYS: &[&str] = &[
    "management_key",
    "managementKey",
    "remote_management_key",
    "remoteManagementKey",
    "cpapi_management_key",
    "cliproxy_management_key",
];

/// Persistent key-value store collaborator.
///
/// Dyn-compatible so the service can swap implementations (file-backed in
/// production, in-memory in tests).
pub trait KeyValueStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str)
    -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn delete<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// JSON-file-backed key-value store.
pub struct FileKvStore {
    path: PathBuf,
    state: Mutex<HashMap<String, String>>,
}

impl FileKvStore {
    /// Load the store from the given file path.
    ///
    /// A missing file is a cold start: the store begins empty and the file
    /// is created on first write.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Store(format!("reading key store file: {e}")))?;
            let state: HashMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::Store(format!("parsing key store file: {e}")))?;
            info!(path = %path.display(), entries = state.len(), "loaded key store");
            state
        } else {
            info!(path = %path.display(), "key store file not found, starting empty");
            HashMap::new()
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }
}

impl KeyValueStore for FileKvStore {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move { self.state.lock().await.get(key).cloned() })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.insert(key.to_string(), value.to_string());
            write_atomic(&self.path, &state).await
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.remove(key).is_some() {
                write_atomic(&self.path, &state).await?;
            }
            Ok(())
        })
    }
}

/// Management-key resolution over any [`KeyValueStore`].
pub struct KeyStore {
    store: Arc<dyn KeyValueStore>,
}

impl KeyStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Read the management key, trying legacy storage keys as fallback.
    ///
    /// A legacy hit is written back under the dedicated key so future reads
    /// take the direct path. Whitespace-only values count as absent.
    pub async fn management_key(&self) -> Option<Secret<String>> {
        if let Some(value) = self.store.get(STORAGE_KEY).await {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(Secret::new(trimmed.to_string()));
            }
        }

        for legacy in LEGACY_KEYS {
            if let Some(value) = self.store.get(legacy).await {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    continue;
                }
                debug!(from = legacy, "migrating management key to dedicated storage key");
                if let Err(e) = self.store.set(STORAGE_KEY, trimmed).await {
                    tracing::warn!(error = %e, "failed to migrate legacy management key");
                }
                return Some(Secret::new(trimmed.to_string()));
            }
        }

        None
    }

    /// Store the management key. Empty or whitespace-only keys are rejected.
    pub async fn set_management_key(&self, key: &str) -> Result<()> {
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(Error::Store("management key is empty".into()));
        }
        self.store.set(STORAGE_KEY, trimmed).await
    }

    /// Remove the stored management key.
    pub async fn clear_management_key(&self) -> Result<()> {
        self.store.delete(STORAGE_KEY).await
    }
}

/// Write the key map to a file atomically with 0600 permissions.
async fn write_atomic(path: &Path, data: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Store(format!("serializing key store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Store("key store path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".keystore.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Store(format!("writing temp key store file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Store(format!("setting key store permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Store(format!("renaming temp key store file: {e}")))?;

    debug!(path = %path.display(), "persisted key store");
    Ok(())
}
