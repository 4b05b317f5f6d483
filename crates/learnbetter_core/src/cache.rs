use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::api::KeyConcept;
use crate::clock::unix_millis;
use crate::config::ProcessingConfig;
use crate::question::QuizEnvelope;
use crate::storage::KeyValueStore;

pub const CACHE_KEY_PREFIX: &str = "learn_better_content_cache_";
const NO_CONFIG_FINGERPRINT: &str = "none";

/// Everything known locally about one processed source URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_concepts: Option<Vec<KeyConcept>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz: Option<QuizEnvelope>,
    #[serde(rename = "cachedAt")]
    pub cached_at: u64,
}

/// Partial update; `None` fields leave the stored value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachePatch {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub key_concepts: Option<Vec<KeyConcept>>,
    pub quiz: Option<QuizEnvelope>,
}

impl CachePatch {
    pub fn quiz(quiz: QuizEnvelope) -> Self {
        Self {
            quiz: Some(quiz),
            ..Self::default()
        }
    }

    pub fn key_concepts(key_concepts: Vec<KeyConcept>) -> Self {
        Self {
            key_concepts: Some(key_concepts),
            ..Self::default()
        }
    }
}

impl CacheEntry {
    fn merge(mut self, patch: CachePatch, cached_at: u64) -> Self {
        if let Some(title) = patch.title {
            self.title = Some(title);
        }
        if let Some(summary) = patch.summary {
            self.summary = Some(summary);
        }
        if let Some(key_concepts) = patch.key_concepts {
            self.key_concepts = Some(key_concepts);
        }
        if let Some(quiz) = patch.quiz {
            self.quiz = Some(quiz);
        }
        self.cached_at = cached_at;
        self
    }

    fn is_expired(&self, now_ms: u64, ttl: Duration) -> bool {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        now_ms.saturating_sub(self.cached_at) > ttl_ms
    }
}

/// URL + processing-config keyed cache with TTL expiry and merge-on-write.
pub struct ContentCache<S: KeyValueStore> {
    store: S,
    ttl: Duration,
}

impl<S: KeyValueStore> ContentCache<S> {
    pub fn new(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, url: &str, config: Option<&ProcessingConfig>) -> Option<CacheEntry> {
        self.get_at(url, config, unix_millis())
    }

    pub fn get_at(
        &self,
        url: &str,
        config: Option<&ProcessingConfig>,
        now_ms: u64,
    ) -> Option<CacheEntry> {
        let key = cache_key(url, config);
        let raw = match self.store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                warn!("content cache read failed for {key}: {error:#}");
                return None;
            }
        };

        let entry = match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => entry,
            Err(error) => {
                warn!("purging unparsable content cache entry {key}: {error}");
                self.delete_quietly(&key);
                return None;
            }
        };
        if entry.is_expired(now_ms, self.ttl) {
            debug!("purging expired content cache entry {key}");
            self.delete_quietly(&key);
            return None;
        }
        Some(entry)
    }

    pub fn set(
        &self,
        url: &str,
        patch: CachePatch,
        config: Option<&ProcessingConfig>,
    ) -> Result<CacheEntry> {
        self.set_at(url, patch, config, unix_millis())
    }

    /// Reads the current entry, overlays `patch`, restamps `cachedAt` and writes back.
    pub fn set_at(
        &self,
        url: &str,
        patch: CachePatch,
        config: Option<&ProcessingConfig>,
        now_ms: u64,
    ) -> Result<CacheEntry> {
        let key = cache_key(url, config);
        let existing = self.get_at(url, config, now_ms).unwrap_or_default();
        let merged = existing.merge(patch, now_ms);
        let raw = serde_json::to_string(&merged).context("failed to serialize cache entry")?;
        self.store
            .set(&key, &raw)
            .with_context(|| format!("failed to write content cache entry {key}"))?;
        debug!("content cache updated for {key}");
        Ok(merged)
    }

    pub fn remove(&self, url: &str, config: Option<&ProcessingConfig>) -> Result<()> {
        self.store.delete(&cache_key(url, config))
    }

    /// Drops expired and unparsable entries; returns how many were removed.
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        let keys = match self.store.keys_with_prefix(CACHE_KEY_PREFIX) {
            Ok(keys) => keys,
            Err(error) => {
                warn!("content cache scan failed: {error:#}");
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys {
            let stale = match self.store.get(&key) {
                Ok(Some(raw)) => serde_json::from_str::<CacheEntry>(&raw)
                    .map(|entry| entry.is_expired(now_ms, self.ttl))
                    .unwrap_or(true),
                Ok(None) => false,
                Err(error) => {
                    warn!("content cache read failed for {key}: {error:#}");
                    false
                }
            };
            if stale && self.delete_quietly(&key) {
                removed += 1;
            }
        }
        removed
    }

    fn delete_quietly(&self, key: &str) -> bool {
        match self.store.delete(key) {
            Ok(()) => true,
            Err(error) => {
                warn!("failed to purge content cache entry {key}: {error:#}");
                false
            }
        }
    }
}

pub fn cache_key(url: &str, config: Option<&ProcessingConfig>) -> String {
    let material = format!("{}|{}", normalize_url(url), config_fingerprint(config));
    format!("{CACHE_KEY_PREFIX}{}", compute_hash(&material))
}

/// Lowercase scheme and host, keep the port, strip trailing slashes from the
/// path, keep query and fragment. Unparsable input is only trimmed.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    let Some(host) = url.host_str() else {
        return trimmed.to_string();
    };

    let mut normalized = format!("{}://{}", url.scheme(), host.to_ascii_lowercase());
    if let Some(port) = url.port() {
        normalized.push_str(&format!(":{port}"));
    }
    normalized.push_str(url.path().trim_end_matches('/'));
    if let Some(query) = url.query() {
        normalized.push('?');
        normalized.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        normalized.push('#');
        normalized.push_str(fragment);
    }
    normalized
}

pub fn config_fingerprint(config: Option<&ProcessingConfig>) -> String {
    let Some(config) = config else {
        return NO_CONFIG_FINGERPRINT.to_string();
    };
    let material = [
        config.model.as_str(),
        config.api_key.as_str(),
        config.summary_prompt.as_str(),
        config.key_concepts_prompt.as_str(),
    ]
    .join("\u{1f}");
    compute_hash(&material)
}

fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
