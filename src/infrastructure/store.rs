//! Extension-scoped persistent store.
//!
//! A flat key/value JSON file holding the credential (under historical key
//! names), the cached identity claim, sync bookkeeping, and the pending
//! resume record. Values are written through to disk on every mutation so a
//! page reload never loses them.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::error::StoreError;

/// Current credential key.
pub const KEY_CREDENTIAL: &str = "svAccessToken";
/// Credential keys in precedence order, most recently introduced first.
pub const CREDENTIAL_KEYS: &[&str] = &["svAccessToken", "accessToken", "authToken"];
pub const KEY_IDENTITY_CLAIM: &str = "identityClaim";
/// Display info written by the origin application's sign-in flow; this
/// engine only reads it.
pub const KEY_USER_INFO: &str = "userInfo";
pub const KEY_LAST_SYNC: &str = "lastSyncAt";
pub const KEY_CONNECTION_STATUS: &str = "connectionStatus";
pub const KEY_PENDING_RESUME: &str = "pendingResume";
pub const KEY_API_BASE: &str = "apiBaseUrl";

/// Durable resume intent persisted just before an agent-triggered page
/// navigation. Single consumer: checked once on load, deleted immediately
/// after use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResumeToken {
    pub credential: String,
    pub api_url: String,
    pub existing_count: u64,
}

/// File-backed key/value store shared by the agent and the control surface.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl SessionStore {
    /// Opens the store at `path`, loading existing contents if present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Opens the store at the platform data directory.
    pub fn at_default_location() -> Result<Self, StoreError> {
        let base = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        Self::open(base.join("conn-harvester").join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values
            .get(key)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get::<String>(key).filter(|s| !s.is_empty())
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), serde_json::to_value(value)?);
        self.persist(&values)
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }

    /// Read-and-delete, for single-consumer values such as the resume token.
    pub fn take<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        match values.remove(key) {
            Some(value) => {
                self.persist(&values)?;
                Ok(serde_json::from_value(value).ok())
            }
            None => Ok(None),
        }
    }

    /// First credential found under the historical key names, newest first.
    pub fn credential(&self) -> Option<String> {
        CREDENTIAL_KEYS.iter().find_map(|key| self.get_string(key))
    }

    /// Removes the credential under every historical key name, plus the
    /// cached claim derived from it.
    pub fn clear_credential(&self) -> Result<(), StoreError> {
        for key in CREDENTIAL_KEYS {
            self.remove(key)?;
        }
        self.remove(KEY_IDENTITY_CLAIM)
    }

    fn persist(&self, values: &HashMap<String, serde_json::Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(values)?;
        fs::write(&self.path, bytes)?;
        debug!(path = %self.path.display(), "session store persisted");
        Ok(())
    }
}
