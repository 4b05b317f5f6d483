use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const EMBEDDED_PROCESSING_CONFIG: &str = include_str!("../../../config/default-processing.json");

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_RETRIES: usize = 2;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;
pub const DEFAULT_TARGET_QUESTIONS: usize = 10;
pub const DEFAULT_QUIZ_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_QUIZ_POLL_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_PROCESSING_POLL_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_CACHE_TTL_HOURS: u64 = 24;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct LearnConfig {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub quiz: QuizSection,
    #[serde(default)]
    pub processing: ProcessingSection,
    #[serde(default)]
    pub cache: CacheSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ApiSection {
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct QuizSection {
    pub target_questions: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub poll_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ProcessingSection {
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CacheSection {
    pub ttl_hours: Option<u64>,
}

impl LearnConfig {
    /// Resolve the API base URL: env LEARNBETTER_API_URL > config > default.
    pub fn api_base_url(&self) -> String {
        if let Some(value) = env_override("LEARNBETTER_API_URL") {
            return value;
        }
        self.api
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    /// Resolve the request timeout: env LEARNBETTER_HTTP_TIMEOUT_MS > config > default.
    pub fn timeout_ms(&self) -> u64 {
        env_override("LEARNBETTER_HTTP_TIMEOUT_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .or(self.api.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    pub fn max_retries(&self) -> usize {
        self.api.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    pub fn retry_delay_ms(&self) -> u64 {
        self.api.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS)
    }

    pub fn target_questions(&self) -> usize {
        self.quiz
            .target_questions
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_TARGET_QUESTIONS)
    }

    pub fn quiz_poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.quiz
                .poll_interval_ms
                .unwrap_or(DEFAULT_QUIZ_POLL_INTERVAL_MS),
        )
    }

    pub fn quiz_poll_timeout(&self) -> Duration {
        Duration::from_millis(
            self.quiz
                .poll_timeout_ms
                .unwrap_or(DEFAULT_QUIZ_POLL_TIMEOUT_MS),
        )
    }

    pub fn processing_poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.processing
                .poll_interval_ms
                .unwrap_or(DEFAULT_PROCESSING_POLL_INTERVAL_MS),
        )
    }

    pub fn cache_ttl(&self) -> Duration {
        let hours = self.cache.ttl_hours.unwrap_or(DEFAULT_CACHE_TTL_HOURS);
        Duration::from_secs(hours.saturating_mul(3_600))
    }
}

/// Load and parse a LearnConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<LearnConfig> {
    if !config_path.exists() {
        return Ok(LearnConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: LearnConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn render_default_config() -> String {
    format!(
        "# learnbetter client configuration\n\n[api]\nbase_url = \"{DEFAULT_API_BASE_URL}\"\ntimeout_ms = {DEFAULT_TIMEOUT_MS}\nmax_retries = {DEFAULT_MAX_RETRIES}\nretry_delay_ms = {DEFAULT_RETRY_DELAY_MS}\n\n[quiz]\ntarget_questions = {DEFAULT_TARGET_QUESTIONS}\npoll_interval_ms = {DEFAULT_QUIZ_POLL_INTERVAL_MS}\npoll_timeout_ms = {DEFAULT_QUIZ_POLL_TIMEOUT_MS}\n\n[processing]\npoll_interval_ms = {DEFAULT_PROCESSING_POLL_INTERVAL_MS}\n\n[cache]\nttl_hours = {DEFAULT_CACHE_TTL_HOURS}\n"
    )
}

/// Model and prompt settings sent along with a processing request.
///
/// These four fields are also the cache fingerprint input: content processed
/// under different settings is cached separately.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingConfig {
    pub model: String,
    pub api_key: String,
    pub summary_prompt: String,
    pub key_concepts_prompt: String,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingConfigPatch {
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub summary_prompt: Option<String>,
    pub key_concepts_prompt: Option<String>,
}

impl ProcessingConfig {
    pub fn embedded() -> Result<Self> {
        serde_json::from_str(EMBEDDED_PROCESSING_CONFIG)
            .context("failed to parse embedded processing config")
    }

    pub fn overlay(mut self, patch: ProcessingConfigPatch) -> Self {
        if let Some(model) = patch.model {
            self.model = model;
        }
        if let Some(api_key) = patch.api_key {
            self.api_key = api_key;
        }
        if let Some(summary_prompt) = patch.summary_prompt {
            self.summary_prompt = summary_prompt;
        }
        if let Some(key_concepts_prompt) = patch.key_concepts_prompt {
            self.key_concepts_prompt = key_concepts_prompt;
        }
        self
    }
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
