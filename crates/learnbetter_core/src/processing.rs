//! Content submission and the processing-status monitor that follows it.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::api::{ConceptId, ContentUpload, KeyConcept, LearnApi, ProcessingStatus, ProcessingStatusKind};
use crate::cache::{CacheEntry, CachePatch, ContentCache};
use crate::clock::Clock;
use crate::config::ProcessingConfig;
use crate::progress::SimulatedProgress;
use crate::question::ContentId;
use crate::storage::KeyValueStore;

pub const PROCESSING_FAILED: &str = "Processing failed. Please try again.";
pub const RETRY_FAILED: &str = "Failed to retry processing";
pub const CONCEPT_DELETE_FAILED: &str = "Failed to delete key concept. Please try again.";

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The source was already processed under the same settings.
    Cached(CacheEntry),
    Started(ContentId),
}

/// Uploads content and asks the backend to process it. Web links already
/// summarized under `config` are answered from the cache instead.
pub fn submit_content<A, S>(
    api: &mut A,
    cache: &ContentCache<S>,
    upload: &ContentUpload,
    config: Option<&ProcessingConfig>,
) -> Result<Submission>
where
    A: LearnApi + ?Sized,
    S: KeyValueStore,
{
    if let Some(url) = upload.source_url()
        && let Some(entry) = cache.get(url, config)
        && entry.summary.is_some()
    {
        info!("{url} already processed; using cached summary");
        return Ok(Submission::Cached(entry));
    }

    let response = api
        .upload_content(upload)
        .with_context(|| format!("failed to upload {} content", upload.kind()))?;
    let content_id = response.content.id;
    api.trigger_processing(content_id, config)?;
    info!(content_id, "content uploaded; processing started");
    Ok(Submission::Started(content_id))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingState {
    Processing,
    Completed,
    Failed(String),
}

pub struct ProcessingMonitor {
    content_id: ContentId,
    source_url: Option<String>,
    interval: Duration,
    state: ProcessingState,
    next_poll_at: Option<Instant>,
    poll_in_flight: bool,
    progress: SimulatedProgress,
    title: Option<String>,
    summary: Option<String>,
    key_concepts: Vec<KeyConcept>,
    error: Option<String>,
    torn_down: bool,
}

impl ProcessingMonitor {
    pub fn new(content_id: ContentId, source_url: Option<String>, interval: Duration) -> Self {
        Self {
            content_id,
            source_url,
            interval,
            state: ProcessingState::Processing,
            next_poll_at: None,
            poll_in_flight: false,
            progress: SimulatedProgress::for_processing(),
            title: None,
            summary: None,
            key_concepts: Vec::new(),
            error: None,
            torn_down: false,
        }
    }

    pub fn content_id(&self) -> ContentId {
        self.content_id
    }

    pub fn state(&self) -> &ProcessingState {
        &self.state
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn key_concepts(&self) -> &[KeyConcept] {
        &self.key_concepts
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn progress(&self) -> &SimulatedProgress {
        &self.progress
    }

    pub fn is_polling(&self) -> bool {
        self.next_poll_at.is_some()
    }

    /// Schedules an immediate first poll.
    pub fn start(&mut self, now: Instant) {
        if self.torn_down || self.state != ProcessingState::Processing {
            return;
        }
        self.next_poll_at = Some(now);
        self.progress.start(now);
    }

    pub fn tick<A, S>(&mut self, api: &mut A, cache: &ContentCache<S>, now: Instant)
    where
        A: LearnApi + ?Sized,
        S: KeyValueStore,
    {
        if self.torn_down || self.state != ProcessingState::Processing {
            return;
        }
        self.progress.advance(now);
        let Some(due) = self.next_poll_at else {
            return;
        };
        if now < due || self.poll_in_flight {
            return;
        }
        self.next_poll_at = Some(now + self.interval);

        self.poll_in_flight = true;
        let result = api.get_processing_status(self.content_id);
        self.poll_in_flight = false;

        match result {
            Ok(status) => self.apply_status(cache, status),
            Err(error) => warn!(
                content_id = self.content_id,
                "processing status poll failed: {error:#}"
            ),
        }
    }

    pub fn apply_status<S: KeyValueStore>(&mut self, cache: &ContentCache<S>, status: ProcessingStatus) {
        if self.torn_down {
            return;
        }
        match status.processing_status {
            ProcessingStatusKind::Completed => {
                self.stop_timers();
                self.progress.complete();
                self.state = ProcessingState::Completed;
                if let Some(title) = status.title.as_deref().filter(|title| !title.is_empty()) {
                    self.title = Some(title.to_string());
                }
                self.summary = status.summary_text().map(ToString::to_string);
                if let Some(concepts) = status.key_concepts.filter(|concepts| !concepts.is_empty()) {
                    self.key_concepts = concepts;
                }
                info!(content_id = self.content_id, "processing completed");

                self.cache_results(
                    cache,
                    CachePatch {
                        title: Some(self.title.clone().unwrap_or_default()),
                        summary: self.summary.clone(),
                        key_concepts: Some(self.key_concepts.clone()),
                        quiz: None,
                    },
                );
            }
            ProcessingStatusKind::Failed => {
                self.stop_timers();
                let message = status
                    .processing_error
                    .filter(|message| !message.trim().is_empty())
                    .unwrap_or_else(|| PROCESSING_FAILED.to_string());
                info!(content_id = self.content_id, "processing failed: {message}");
                self.error = Some(message.clone());
                self.state = ProcessingState::Failed(message);
            }
            other => debug!(content_id = self.content_id, status = other.as_str(), "still processing"),
        }
    }

    /// Re-triggers processing with the backend's own settings.
    pub fn retry<A: LearnApi + ?Sized>(&mut self, api: &mut A, now: Instant) {
        if self.torn_down {
            return;
        }
        self.state = ProcessingState::Processing;
        self.error = None;
        self.progress.start(now);

        match api.trigger_processing(self.content_id, None) {
            Ok(()) => {
                self.next_poll_at = Some(now);
            }
            Err(error) => {
                warn!(content_id = self.content_id, "retry failed: {error:#}");
                self.stop_timers();
                self.error = Some(RETRY_FAILED.to_string());
                self.state = ProcessingState::Failed(RETRY_FAILED.to_string());
            }
        }
    }

    /// Removes a key concept locally first, then remotely. If the remote
    /// call fails the authoritative list is re-fetched and replaces the
    /// local one. Returns whether the remote delete succeeded.
    pub fn delete_key_concept<A, S>(
        &mut self,
        api: &mut A,
        cache: &ContentCache<S>,
        concept_id: ConceptId,
    ) -> bool
    where
        A: LearnApi + ?Sized,
        S: KeyValueStore,
    {
        self.key_concepts
            .retain(|concept| concept.id != Some(concept_id));
        self.cache_results(cache, CachePatch::key_concepts(self.key_concepts.clone()));

        let Err(error) = api.delete_key_concept(self.content_id, concept_id) else {
            return true;
        };
        warn!(concept_id, "key concept delete failed: {error:#}");

        match api.get_processing_status(self.content_id) {
            Ok(status) => {
                if let Some(concepts) = status.key_concepts.filter(|concepts| !concepts.is_empty()) {
                    self.key_concepts = concepts;
                    self.cache_results(cache, CachePatch::key_concepts(self.key_concepts.clone()));
                }
            }
            Err(error) => warn!("failed to restore key concepts: {error:#}"),
        }
        self.error = Some(CONCEPT_DELETE_FAILED.to_string());
        false
    }

    pub fn next_wakeup(&self) -> Option<Instant> {
        if self.torn_down || self.state != ProcessingState::Processing {
            return None;
        }
        match (self.next_poll_at, self.progress.next_tick_at()) {
            (Some(poll), Some(progress)) => Some(poll.min(progress)),
            (poll, progress) => poll.or(progress),
        }
    }

    /// Blocks on `clock` until processing leaves the `Processing` state.
    pub fn wait<A, S, C>(&mut self, api: &mut A, cache: &ContentCache<S>, clock: &C) -> &ProcessingState
    where
        A: LearnApi + ?Sized,
        S: KeyValueStore,
        C: Clock + ?Sized,
    {
        while let Some(wakeup) = self.next_wakeup() {
            clock.sleep_until(wakeup);
            self.tick(api, cache, clock.now());
        }
        &self.state
    }

    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.stop_timers();
    }

    fn stop_timers(&mut self) {
        self.next_poll_at = None;
        self.progress.stop();
    }

    fn cache_results<S: KeyValueStore>(&self, cache: &ContentCache<S>, patch: CachePatch) {
        let Some(url) = self.source_url.as_deref() else {
            return;
        };
        if let Err(error) = cache.set(url, patch, None) {
            warn!("failed to cache processing results: {error:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        CONCEPT_DELETE_FAILED, PROCESSING_FAILED, ProcessingMonitor, ProcessingState, RETRY_FAILED,
        Submission, submit_content,
    };
    use crate::api::{ContentUpload, ProcessingStatusKind};
    use crate::cache::CachePatch;
    use crate::clock::{Clock, ManualClock};
    use crate::config::ProcessingConfig;
    use crate::storage::MemoryStore;
    use crate::test_support::{MockApi, cache, completed_status, status};

    const URL: &str = "https://example.com/post";
    const INTERVAL: Duration = Duration::from_secs(3);

    #[test]
    fn submit_uploads_then_triggers_with_config() {
        let store = MemoryStore::new();
        let mut api = MockApi::default();
        let config = ProcessingConfig::embedded().expect("embedded");
        let upload = ContentUpload::Weblink { url: URL.to_string() };

        let submission =
            submit_content(&mut api, &cache(&store), &upload, Some(&config)).expect("submit");
        assert_eq!(submission, Submission::Started(42));
        assert_eq!(api.uploaded, vec![upload]);
        assert_eq!(api.triggered, vec![(42, Some(config))]);
    }

    #[test]
    fn submit_short_circuits_on_cached_summary() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        cache
            .set(
                URL,
                CachePatch {
                    summary: Some("cached".to_string()),
                    ..CachePatch::default()
                },
                None,
            )
            .expect("seed");
        let mut api = MockApi::default();
        let upload = ContentUpload::Weblink { url: URL.to_string() };

        let submission = submit_content(&mut api, &cache, &upload, None).expect("submit");
        assert!(matches!(submission, Submission::Cached(entry) if entry.summary.as_deref() == Some("cached")));
        assert_eq!(api.request_count, 0);
    }

    #[test]
    fn polls_every_interval_until_completed_and_caches_results() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        let clock = ManualClock::new();
        let mut api = MockApi::default();
        api.statuses
            .ok(status(ProcessingStatusKind::Pending))
            .ok(status(ProcessingStatusKind::Processing))
            .ok(completed_status("X", &[(1, "A"), (2, "B")]));

        let mut monitor = ProcessingMonitor::new(42, Some(URL.to_string()), INTERVAL);
        monitor.start(clock.now());
        assert_eq!(monitor.wait(&mut api, &cache, &clock), &ProcessingState::Completed);

        assert_eq!(api.status_calls, 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(6));
        assert_eq!(monitor.summary(), Some("X"));
        assert_eq!(monitor.progress().value(), 100.0);
        assert!(!monitor.is_polling());

        let entry = cache.get(URL, None).expect("cached");
        assert_eq!(entry.summary.as_deref(), Some("X"));
        assert_eq!(entry.title.as_deref(), Some("Processed"));
        assert_eq!(entry.key_concepts.map(|concepts| concepts.len()), Some(2));
    }

    #[test]
    fn failure_uses_backend_error_or_generic_text() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        let mut monitor = ProcessingMonitor::new(42, None, INTERVAL);
        let mut failed = status(ProcessingStatusKind::Failed);
        failed.processing_error = Some("PDF is encrypted".to_string());
        monitor.apply_status(&cache, failed);
        assert_eq!(monitor.state(), &ProcessingState::Failed("PDF is encrypted".to_string()));

        let mut monitor = ProcessingMonitor::new(42, None, INTERVAL);
        monitor.apply_status(&cache, status(ProcessingStatusKind::Failed));
        assert_eq!(monitor.error(), Some(PROCESSING_FAILED));
        assert!(store.is_empty());
    }

    #[test]
    fn poll_errors_keep_monitor_processing() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        let clock = ManualClock::new();
        let mut api = MockApi::default();
        api.statuses.fail(502, None).ok(completed_status("Y", &[]));

        let mut monitor = ProcessingMonitor::new(42, None, INTERVAL);
        monitor.start(clock.now());
        monitor.tick(&mut api, &cache, clock.now());
        assert_eq!(monitor.state(), &ProcessingState::Processing);
        clock.advance(INTERVAL);
        monitor.tick(&mut api, &cache, clock.now());
        assert_eq!(monitor.state(), &ProcessingState::Completed);
    }

    #[test]
    fn retry_retriggers_and_reports_trigger_failure() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        let clock = ManualClock::new();
        let mut api = MockApi::default();
        api.triggers.fail(500, None).ok(());
        api.statuses.ok(completed_status("Z", &[]));

        let mut monitor = ProcessingMonitor::new(42, None, INTERVAL);
        monitor.apply_status(&cache, status(ProcessingStatusKind::Failed));

        monitor.retry(&mut api, clock.now());
        assert_eq!(monitor.state(), &ProcessingState::Failed(RETRY_FAILED.to_string()));

        monitor.retry(&mut api, clock.now());
        assert_eq!(monitor.state(), &ProcessingState::Processing);
        assert_eq!(api.triggered.last(), Some(&(42, None)));
        assert_eq!(monitor.wait(&mut api, &cache, &clock), &ProcessingState::Completed);
    }

    #[test]
    fn concept_delete_is_optimistic_and_compensated_on_failure() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        let mut api = MockApi::default();
        let mut monitor = ProcessingMonitor::new(42, Some(URL.to_string()), INTERVAL);
        monitor.apply_status(&cache, completed_status("S", &[(1, "A"), (2, "B"), (3, "C")]));

        assert!(monitor.delete_key_concept(&mut api, &cache, 2));
        assert_eq!(monitor.key_concepts().len(), 2);
        let cached = cache.get(URL, None).and_then(|entry| entry.key_concepts);
        assert_eq!(cached.map(|concepts| concepts.len()), Some(2));

        api.concept_deletes.fail(500, None);
        api.statuses.ok(completed_status("S", &[(1, "A"), (3, "C")]));
        assert!(!monitor.delete_key_concept(&mut api, &cache, 3));
        assert_eq!(monitor.key_concepts().len(), 2);
        assert_eq!(monitor.error(), Some(CONCEPT_DELETE_FAILED));
        let cached = cache.get(URL, None).and_then(|entry| entry.key_concepts);
        assert_eq!(cached.map(|concepts| concepts.len()), Some(2));
        assert_eq!(api.deleted_concepts, vec![(42, 2), (42, 3)]);
    }

    #[test]
    fn teardown_stops_polling() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        let clock = ManualClock::new();
        let mut api = MockApi::default();
        api.statuses.ok(status(ProcessingStatusKind::Processing));

        let mut monitor = ProcessingMonitor::new(42, None, INTERVAL);
        monitor.start(clock.now());
        monitor.teardown();
        monitor.tick(&mut api, &cache, clock.now());
        assert_eq!(api.status_calls, 0);
        assert_eq!(monitor.next_wakeup(), None);
    }
}
