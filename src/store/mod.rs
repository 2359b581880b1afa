//! Durable token storage.
//!
//! The persisted state is a single JSON document mapping external user id to
//! [`TokenRecord`]. Stores operate on the whole mapping: callers load the
//! full map, mutate it, and save it back. Two concurrent writers can race on
//! the file with the last writer's snapshot winning; the broker assumes a
//! single server process owns the file, so this is accepted rather than
//! locked around.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::error;

/// One user's stored token state.
///
/// `access_token` and `refresh_token` hold ciphertext produced by
/// [`TokenCipher`](crate::crypto::TokenCipher), never plaintext.
/// `refresh_token` is the empty string when the provider issued none.
/// Provider profile metadata (`jira_*`) is plaintext.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default, with = "flexible_utc")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default, with = "flexible_utc")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "flexible_utc")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub jira_account_id: String,
    #[serde(default)]
    pub jira_email: String,
    #[serde(default)]
    pub jira_cloud_id: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Timestamp (de)serialization that normalizes everything to UTC.
///
/// Values are written as RFC 3339. On read, timezone-less values are
/// interpreted as UTC rather than rejected, so records written by earlier
/// deployments that stored naive timestamps stay readable.
pub mod flexible_utc {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => parse(&s).map(Some).map_err(serde::de::Error::custom),
        }
    }

    /// Parses an RFC 3339 timestamp; naive timestamps are treated as UTC.
    pub fn parse(s: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp '{}': {}", s, e))
    }
}

/// Durable mapping from external user id to [`TokenRecord`].
///
/// `load` never fails the caller: a missing or corrupt backing document is
/// logged and reported as an empty mapping. `save` replaces the entire
/// document from the caller's in-memory view.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> HashMap<String, TokenRecord>;
    fn save(&self, tokens: &HashMap<String, TokenRecord>) -> Result<()>;
}

/// JSON-file-backed token store.
///
/// `save` writes the full mapping to a temporary file in the same directory
/// and renames it over the target, so readers never observe a half-written
/// document.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> HashMap<String, TokenRecord> {
        if !self.path.exists() {
            return HashMap::new();
        }

        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to read token store");
                return HashMap::new();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(tokens) => tokens,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Token store is corrupt, starting empty");
                HashMap::new()
            }
        }
    }

    fn save(&self, tokens: &HashMap<String, TokenRecord>) -> Result<()> {
        let json = serde_json::to_string_pretty(tokens)
            .context("Failed to serialize token store to JSON")?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, json).with_context(|| {
            format!("Failed to write temporary token store {}", tmp_path.display())
        })?;

        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!("Failed to replace token store {}", self.path.display())
        })?;

        Ok(())
    }
}

/// In-memory token store, used as a fake in tests and for deployments that
/// do not need persistence across restarts.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, TokenRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> HashMap<String, TokenRecord> {
        self.tokens.lock().unwrap().clone()
    }

    fn save(&self, tokens: &HashMap<String, TokenRecord>) -> Result<()> {
        *self.tokens.lock().unwrap() = tokens.clone();
        Ok(())
    }
}
