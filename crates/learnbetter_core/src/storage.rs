use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::clock::unix_millis;
use crate::config::{ProcessingConfig, ProcessingConfigPatch};

pub const TOKEN_KEY: &str = "learn_better_token";
pub const USER_KEY: &str = "learn_better_user";
pub const PROCESSING_CONFIG_KEY: &str = "learn_better_processing_config";
pub const TOKEN_EXPIRED_KEY: &str = "learn_better_token_expired";

const KV_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv_entries (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at_unix_ms INTEGER NOT NULL
);
"#;

/// String-keyed persistence shared by the content cache and the client state.
///
/// Expiry and merge policies live above this trait.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for &S {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).keys_with_prefix(prefix)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RefCell<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .borrow()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

pub struct SqliteStore {
    connection: Connection,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create database parent directory {}",
                    parent.display()
                )
            })?;
        }
        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy timeout")?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL journal mode")?;
        Self::with_connection(connection)
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory sqlite database")?;
        Self::with_connection(connection)
    }

    fn with_connection(connection: Connection) -> Result<Self> {
        connection
            .execute_batch(KV_SCHEMA_SQL)
            .context("failed to initialize key-value schema")?;
        Ok(Self { connection })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.connection
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("failed to read key {key}"))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let updated_at = i64::try_from(unix_millis()).unwrap_or(i64::MAX);
        self.connection
            .execute(
                "INSERT INTO kv_entries (key, value, updated_at_unix_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at_unix_ms = excluded.updated_at_unix_ms",
                params![key, value, updated_at],
            )
            .with_context(|| format!("failed to write key {key}"))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.connection
            .execute("DELETE FROM kv_entries WHERE key = ?1", params![key])
            .with_context(|| format!("failed to delete key {key}"))?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT key FROM kv_entries WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
            )
            .context("failed to prepare key scan")?;
        let rows = statement
            .query_map(params![prefix], |row| row.get::<_, String>(0))
            .context("failed to scan keys")?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.context("failed to decode key row")?);
        }
        Ok(keys)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: Value,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Auth session, processing settings and the one-shot "token expired" flag.
pub struct ClientState<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> ClientState<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn token(&self) -> Result<Option<String>> {
        self.store.get(TOKEN_KEY)
    }

    pub fn set_token(&self, token: &str) -> Result<()> {
        self.store.set(TOKEN_KEY, token)
    }

    pub fn remove_token(&self) -> Result<()> {
        self.store.delete(TOKEN_KEY)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.token(), Ok(Some(token)) if !token.is_empty())
    }

    pub fn user(&self) -> Option<AuthUser> {
        let raw = match self.store.get(USER_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                warn!("failed to read stored user: {error:#}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(error) => {
                warn!("discarding unparsable stored user: {error}");
                None
            }
        }
    }

    pub fn set_user(&self, user: &AuthUser) -> Result<()> {
        let raw = serde_json::to_string(user).context("failed to serialize user")?;
        self.store.set(USER_KEY, &raw)
    }

    pub fn remove_user(&self) -> Result<()> {
        self.store.delete(USER_KEY)
    }

    pub fn clear_auth(&self) -> Result<()> {
        self.remove_token()?;
        self.remove_user()
    }

    pub fn mark_token_expired(&self) -> Result<()> {
        self.store.set(TOKEN_EXPIRED_KEY, "true")
    }

    /// Returns whether the flag was raised, clearing it in the same call.
    pub fn take_token_expired(&self) -> Result<bool> {
        let raised = self.store.get(TOKEN_EXPIRED_KEY)?.is_some();
        if raised {
            self.store.delete(TOKEN_EXPIRED_KEY)?;
        }
        Ok(raised)
    }

    /// Stored processing settings overlaid on the embedded defaults.
    pub fn processing_config(&self) -> Result<Option<ProcessingConfig>> {
        let Some(raw) = self.store.get(PROCESSING_CONFIG_KEY)? else {
            return Ok(None);
        };
        let patch: ProcessingConfigPatch = match serde_json::from_str(&raw) {
            Ok(patch) => patch,
            Err(error) => {
                warn!("ignoring unparsable processing config: {error}");
                return Ok(None);
            }
        };
        Ok(Some(ProcessingConfig::embedded()?.overlay(patch)))
    }

    pub fn save_processing_config(&self, config: &ProcessingConfig) -> Result<()> {
        let raw =
            serde_json::to_string(config).context("failed to serialize processing config")?;
        self.store.set(PROCESSING_CONFIG_KEY, &raw)
    }

    pub fn clear_processing_config(&self) -> Result<()> {
        self.store.delete(PROCESSING_CONFIG_KEY)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::{AuthUser, ClientState, KeyValueStore, MemoryStore, PROCESSING_CONFIG_KEY, SqliteStore};

    #[test]
    fn sqlite_store_round_trips_and_scans_by_prefix() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(&temp.path().join("data").join("state.db")).expect("open");

        store.set("cache_a", "1").expect("set a");
        store.set("cache_b", "2").expect("set b");
        store.set("other", "3").expect("set other");
        store.set("cache_a", "updated").expect("overwrite a");

        assert_eq!(store.get("cache_a").expect("get").as_deref(), Some("updated"));
        assert_eq!(
            store.keys_with_prefix("cache_").expect("scan"),
            vec!["cache_a".to_string(), "cache_b".to_string()]
        );

        store.delete("cache_a").expect("delete");
        assert!(store.get("cache_a").expect("get").is_none());
    }

    #[test]
    fn sqlite_prefix_scan_treats_wildcards_literally() {
        let store = SqliteStore::open_in_memory().expect("open");
        store.set("a%b", "1").expect("set");
        store.set("axb", "2").expect("set");
        assert_eq!(store.keys_with_prefix("a%").expect("scan"), vec!["a%b".to_string()]);
    }

    #[test]
    fn token_expired_flag_is_consumed_once() {
        let state = ClientState::new(MemoryStore::new());
        assert!(!state.take_token_expired().expect("take"));
        state.mark_token_expired().expect("mark");
        assert!(state.take_token_expired().expect("take"));
        assert!(!state.take_token_expired().expect("take again"));
    }

    #[test]
    fn clear_auth_removes_token_and_user() {
        let store = MemoryStore::new();
        let state = ClientState::new(&store);
        state.set_token("jwt").expect("token");
        state
            .set_user(&AuthUser {
                id: json!(7),
                username: "reader".to_string(),
                email: None,
                name: None,
                avatar: None,
                created_at: None,
            })
            .expect("user");
        assert!(state.is_authenticated());
        assert_eq!(state.user().map(|user| user.username), Some("reader".to_string()));

        state.clear_auth().expect("clear");
        assert!(!state.is_authenticated());
        assert!(state.user().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn token_and_user_are_removed_independently() {
        let store = MemoryStore::new();
        let state = ClientState::new(&store);
        state.set_token("jwt").expect("token");
        state
            .set_user(&AuthUser {
                id: json!("u-1"),
                username: "reader".to_string(),
                email: Some("reader@example.com".to_string()),
                name: None,
                avatar: None,
                created_at: None,
            })
            .expect("user");

        state.remove_token().expect("remove token");
        assert!(!state.is_authenticated());
        assert_eq!(state.user().and_then(|user| user.email), Some("reader@example.com".to_string()));

        state.set_token("jwt-2").expect("token");
        state.remove_user().expect("remove user");
        assert!(state.user().is_none());
        assert_eq!(state.token().expect("read").as_deref(), Some("jwt-2"));
    }

    #[test]
    fn saved_processing_config_overlays_embedded_defaults() {
        let store = MemoryStore::new();
        store
            .set(PROCESSING_CONFIG_KEY, r#"{"model":"local-model"}"#)
            .expect("seed");
        let state = ClientState::new(&store);

        let config = state.processing_config().expect("read").expect("present");
        assert_eq!(config.model, "local-model");
        assert!(config.summary_prompt.contains("{{content}}"));
        assert!(config.key_concepts_prompt.contains("{{content}}"));
    }

    #[test]
    fn unparsable_processing_config_reads_as_absent() {
        let store = MemoryStore::new();
        store.set(PROCESSING_CONFIG_KEY, "{not json").expect("seed");
        let state = ClientState::new(&store);
        assert!(state.processing_config().expect("read").is_none());
    }
}
