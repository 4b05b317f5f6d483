use std::path::PathBuf;
use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::multipart::Form;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{LearnConfig, ProcessingConfig};
use crate::question::{ContentId, QuizEnvelope, QuizId};
use crate::storage::{ClientState, KeyValueStore};

pub type ConceptId = i64;

/// Failure talking to the backend, kept typed so callers can surface the
/// server's own `message`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed with HTTP {status}{}", status_suffix(.message))]
    Status {
        status: u16,
        message: Option<String>,
    },
    #[error("request did not complete: {0}")]
    Transport(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn user_message(&self) -> Option<&str> {
        match self {
            Self::Status { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401, .. })
    }
}

fn status_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|message| format!(": {message}"))
        .unwrap_or_default()
}

/// The backend's `message` if any layer of `error` carries one, else `fallback`.
pub fn user_facing_message(error: &anyhow::Error, fallback: &str) -> String {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ApiError>())
        .and_then(ApiError::user_message)
        .filter(|message| !message.trim().is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentUpload {
    File {
        path: PathBuf,
        category: Option<String>,
    },
    Weblink {
        url: String,
    },
    Text {
        text: String,
    },
}

impl ContentUpload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::Weblink { .. } => "weblink",
            Self::Text { .. } => "text",
        }
    }

    pub fn source_url(&self) -> Option<&str> {
        match self {
            Self::Weblink { url } => Some(url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentRecord {
    pub id: ContentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadResponse {
    pub content: ContentRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatusKind {
    Pending,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl ProcessingStatusKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryPayload {
    #[serde(default)]
    pub summary_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyConcept {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ConceptId>,
    pub concept_name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingStatus {
    pub processing_status: ProcessingStatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummaryPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_concepts: Option<Vec<KeyConcept>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
}

impl ProcessingStatus {
    pub fn summary_text(&self) -> Option<&str> {
        self.summary
            .as_ref()
            .map(|summary| summary.summary_text.as_str())
    }
}

/// Remote learning service as seen by the client core.
pub trait LearnApi {
    fn upload_content(&mut self, upload: &ContentUpload) -> Result<UploadResponse>;
    fn trigger_processing(
        &mut self,
        content_id: ContentId,
        config: Option<&ProcessingConfig>,
    ) -> Result<()>;
    fn get_processing_status(&mut self, content_id: ContentId) -> Result<ProcessingStatus>;
    /// The backend creates the quiz on first request.
    fn get_quiz_by_content_id(&mut self, content_id: ContentId) -> Result<QuizEnvelope>;
    fn get_quiz_by_id(&mut self, quiz_id: QuizId) -> Result<QuizEnvelope>;
    fn delete_key_concept(&mut self, content_id: ContentId, concept_id: ConceptId) -> Result<()>;
    fn list_content(&mut self, page: Option<u32>, limit: Option<u32>)
    -> Result<Vec<ContentRecord>>;
    fn get_content(&mut self, content_id: ContentId) -> Result<ContentRecord>;
    fn delete_content(&mut self, content_id: ContentId) -> Result<()>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct LearnClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl LearnClientConfig {
    pub fn from_config(config: &LearnConfig) -> Self {
        Self {
            base_url: config.api_base_url(),
            timeout_ms: config.timeout_ms(),
            max_retries: config.max_retries(),
            retry_delay_ms: config.retry_delay_ms(),
        }
    }
}

pub struct HttpLearnClient<S: KeyValueStore> {
    client: Client,
    config: LearnClientConfig,
    state: ClientState<S>,
    request_count: usize,
}

impl<S: KeyValueStore> HttpLearnClient<S> {
    pub fn new(config: LearnClientConfig, state: ClientState<S>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build learn API HTTP client")?;
        Ok(Self {
            client,
            config,
            state,
            request_count: 0,
        })
    }

    pub fn state(&self) -> &ClientState<S> {
        &self.state
    }

    fn get_json(&mut self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.execute(Method::GET, path, |request| Ok(request.query(query)))
    }

    fn send_json(&mut self, method: Method, path: &str, body: &Value) -> Result<Value> {
        self.execute(method, path, |request| Ok(request.json(body)))
    }

    /// Only GET requests are retried; writes get exactly one attempt.
    fn execute<F>(&mut self, method: Method, path: &str, attach: F) -> Result<Value>
    where
        F: Fn(RequestBuilder) -> Result<RequestBuilder>,
    {
        let url = endpoint_url(&self.config.base_url, path)?;
        let max_retries = if method == Method::GET {
            self.config.max_retries
        } else {
            0
        };

        for attempt in 0..=max_retries {
            self.request_count += 1;
            let mut request = self.client.request(method.clone(), url.clone());
            if let Some(token) = self.bearer_token() {
                request = request.bearer_auth(token);
            }
            debug!(%method, path, attempt, "learn API request");

            match attach(request)?.send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response
                            .text()
                            .map_err(|error| ApiError::Decode(error.to_string()))?;
                        return parse_body(&body);
                    }
                    if status == StatusCode::UNAUTHORIZED {
                        self.expire_session();
                    }
                    if attempt < max_retries && is_retryable_status(status) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    let body = response.text().unwrap_or_default();
                    return Err(ApiError::Status {
                        status: status.as_u16(),
                        message: error_message(&body),
                    }
                    .into());
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(ApiError::Transport(error.to_string()).into());
                }
            }
        }

        bail!("learn API request exhausted retry budget")
    }

    fn bearer_token(&self) -> Option<String> {
        match self.state.token() {
            Ok(token) => token.filter(|token| !token.is_empty()),
            Err(error) => {
                warn!("failed to read auth token: {error:#}");
                None
            }
        }
    }

    fn expire_session(&self) {
        warn!("backend rejected credentials; clearing stored session");
        if let Err(error) = self.state.clear_auth() {
            warn!("failed to clear auth state: {error:#}");
        }
        if let Err(error) = self.state.mark_token_expired() {
            warn!("failed to flag expired token: {error:#}");
        }
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }
}

impl<S: KeyValueStore> LearnApi for HttpLearnClient<S> {
    fn upload_content(&mut self, upload: &ContentUpload) -> Result<UploadResponse> {
        let payload = match upload {
            ContentUpload::File { path, category } => {
                self.execute(Method::POST, "/v1/content/upload", |request| {
                    let mut form = Form::new().text("content_type", "file");
                    if let Some(category) = category.as_deref().filter(|value| !value.is_empty()) {
                        form = form.text("file_category", category.to_string());
                    }
                    let form = form
                        .file("file", path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    Ok(request.multipart(form))
                })?
            }
            ContentUpload::Weblink { url } => self.send_json(
                Method::POST,
                "/v1/content/upload",
                &json!({"content_type": "weblink", "source_url": url}),
            )?,
            ContentUpload::Text { text } => self.send_json(
                Method::POST,
                "/v1/content/upload",
                &json!({"content_type": "text", "raw_text": text}),
            )?,
        };
        decode(payload, "upload response")
    }

    fn trigger_processing(
        &mut self,
        content_id: ContentId,
        config: Option<&ProcessingConfig>,
    ) -> Result<()> {
        self.send_json(
            Method::POST,
            &format!("/v1/content/{content_id}/process"),
            &trigger_payload(config),
        )
        .with_context(|| format!("failed to start processing content {content_id}"))?;
        Ok(())
    }

    fn get_processing_status(&mut self, content_id: ContentId) -> Result<ProcessingStatus> {
        let payload = self
            .get_json(&format!("/v1/content/{content_id}/processing-status"), &[])
            .with_context(|| format!("failed to read processing status of {content_id}"))?;
        decode(payload, "processing status")
    }

    fn get_quiz_by_content_id(&mut self, content_id: ContentId) -> Result<QuizEnvelope> {
        let payload = self
            .get_json(&format!("/v1/content/{content_id}/quiz"), &[])
            .with_context(|| format!("failed to fetch quiz for content {content_id}"))?;
        decode(payload, "quiz")
    }

    fn get_quiz_by_id(&mut self, quiz_id: QuizId) -> Result<QuizEnvelope> {
        let payload = self
            .get_json(&format!("/v1/quiz/{quiz_id}"), &[])
            .with_context(|| format!("failed to fetch quiz {quiz_id}"))?;
        decode(payload, "quiz")
    }

    fn delete_key_concept(&mut self, content_id: ContentId, concept_id: ConceptId) -> Result<()> {
        self.execute(
            Method::DELETE,
            &format!("/v1/content/{content_id}/key-concepts/{concept_id}"),
            Ok,
        )
        .with_context(|| format!("failed to delete key concept {concept_id}"))?;
        Ok(())
    }

    fn list_content(
        &mut self,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<Vec<ContentRecord>> {
        let mut query = Vec::new();
        if let Some(page) = page {
            query.push(("page", page.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        let payload = self
            .get_json("/v1/content", &query)
            .context("failed to list content")?;
        content_list(payload)
    }

    fn get_content(&mut self, content_id: ContentId) -> Result<ContentRecord> {
        let payload = self
            .get_json(&format!("/v1/content/{content_id}"), &[])
            .with_context(|| format!("failed to fetch content {content_id}"))?;
        content_record(payload)
    }

    fn delete_content(&mut self, content_id: ContentId) -> Result<()> {
        self.execute(Method::DELETE, &format!("/v1/content/{content_id}"), Ok)
            .with_context(|| format!("failed to delete content {content_id}"))?;
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

pub fn trigger_payload(config: Option<&ProcessingConfig>) -> Value {
    match config {
        Some(config) => json!({
            "model": config.model,
            "api_key": config.api_key,
            "summary_prompt": config.summary_prompt,
            "key_concepts_prompt": config.key_concepts_prompt,
        }),
        None => json!({}),
    }
}

fn endpoint_url(base_url: &str, path: &str) -> Result<Url> {
    let joined = format!("{}{}", base_url.trim_end_matches('/'), path);
    Url::parse(&joined).with_context(|| format!("invalid learn API URL: {joined}"))
}

fn parse_body(body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|error| ApiError::Decode(error.to_string()).into())
}

fn error_message(body: &str) -> Option<String> {
    let payload: Value = serde_json::from_str(body).ok()?;
    payload
        .get("message")
        .or_else(|| payload.get("error"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn decode<T: DeserializeOwned>(payload: Value, what: &str) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|error| ApiError::Decode(format!("{what}: {error}")).into())
}

/// Accepts both `{content: {...}}` and a bare record.
fn content_record(payload: Value) -> Result<ContentRecord> {
    let record = match payload {
        Value::Object(mut map) if map.get("content").is_some_and(Value::is_object) => {
            map.remove("content").unwrap_or(Value::Null)
        }
        other => other,
    };
    decode(record, "content")
}

/// Accepts `[..]`, `{content: [..]}` or `{contents: [..]}`.
fn content_list(payload: Value) -> Result<Vec<ContentRecord>> {
    let items = match payload {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => map
            .remove("content")
            .filter(Value::is_array)
            .or_else(|| map.remove("contents"))
            .unwrap_or_else(|| Value::Array(Vec::new())),
        _ => Value::Array(Vec::new()),
    };
    decode(items, "content list")
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}
