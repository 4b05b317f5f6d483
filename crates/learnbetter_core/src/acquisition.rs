//! Quiz acquisition: initial fetch (cache first, then network), detection of
//! partially generated quizzes and the bounded polling loop that grows them.
//!
//! The controller is a single-threaded state machine. Timers are explicit
//! deadlines checked by [`QuizController::tick`]; nothing runs in the
//! background, so stopping a timer is just dropping its schedule.

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::api::{LearnApi, user_facing_message};
use crate::cache::{CachePatch, ContentCache};
use crate::clock::Clock;
use crate::config::{
    DEFAULT_QUIZ_POLL_INTERVAL_MS, DEFAULT_QUIZ_POLL_TIMEOUT_MS, DEFAULT_TARGET_QUESTIONS,
    LearnConfig, ProcessingConfig,
};
use crate::progress::SimulatedProgress;
use crate::question::{ContentId, Question, Quiz, QuizEnvelope, QuizId};
use crate::session::{AdvanceOutcome, QuizReport, QuizSession};
use crate::storage::KeyValueStore;
use crate::validate::UserAnswer;

pub const QUIZ_LOAD_FAILED: &str = "Failed to load quiz. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    pub target_questions: usize,
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollTiming {
    pub fn from_config(config: &LearnConfig) -> Self {
        Self {
            target_questions: config.target_questions(),
            interval: config.quiz_poll_interval(),
            timeout: config.quiz_poll_timeout(),
        }
    }
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            target_questions: DEFAULT_TARGET_QUESTIONS,
            interval: Duration::from_millis(DEFAULT_QUIZ_POLL_INTERVAL_MS),
            timeout: Duration::from_millis(DEFAULT_QUIZ_POLL_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizSource {
    Content(ContentId),
    Quiz(QuizId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizRequest {
    pub source: QuizSource,
    pub source_url: Option<String>,
    pub config: Option<ProcessingConfig>,
    pub resume_index: usize,
}

impl QuizRequest {
    pub fn for_content(content_id: ContentId) -> Self {
        Self {
            source: QuizSource::Content(content_id),
            source_url: None,
            config: None,
            resume_index: 0,
        }
    }

    pub fn for_quiz(quiz_id: QuizId, resume_index: usize) -> Self {
        Self {
            source: QuizSource::Quiz(quiz_id),
            source_url: None,
            config: None,
            resume_index,
        }
    }

    pub fn with_source(mut self, url: impl Into<String>, config: Option<ProcessingConfig>) -> Self {
        self.source_url = Some(url.into());
        self.config = config;
        self
    }

    fn cached_quiz_matches(&self, envelope: &QuizEnvelope) -> bool {
        match self.source {
            QuizSource::Quiz(quiz_id) => envelope.quiz.id == quiz_id,
            QuizSource::Content(content_id) => envelope.quiz.content_id == Some(content_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizState {
    Loading,
    Active,
    Completed,
    Error(String),
}

/// Proof that an initial fetch was admitted by the in-flight guard.
#[derive(Debug)]
#[must_use]
pub struct FetchTicket {
    generation: u64,
}

#[derive(Debug, Clone, Copy)]
struct PollSchedule {
    deadline: Instant,
    next_poll_at: Instant,
    attempts: usize,
}

pub struct QuizController {
    request: QuizRequest,
    timing: PollTiming,
    state: QuizState,
    quiz: Option<Quiz>,
    session: QuizSession,
    fetch_in_flight: bool,
    poll_in_flight: bool,
    poll: Option<PollSchedule>,
    question_count: usize,
    content_id: Option<ContentId>,
    loading_more: bool,
    progress: SimulatedProgress,
    generation: u64,
    torn_down: bool,
}

impl QuizController {
    pub fn new(request: QuizRequest, timing: PollTiming) -> Self {
        let content_id = match request.source {
            QuizSource::Content(content_id) => Some(content_id),
            QuizSource::Quiz(_) => None,
        };
        Self {
            request,
            timing,
            state: QuizState::Loading,
            quiz: None,
            session: QuizSession::default(),
            fetch_in_flight: false,
            poll_in_flight: false,
            poll: None,
            question_count: 0,
            content_id,
            loading_more: false,
            progress: SimulatedProgress::for_quiz(),
            generation: 0,
            torn_down: false,
        }
    }

    pub fn state(&self) -> &QuizState {
        &self.state
    }

    pub fn quiz(&self) -> Option<&Quiz> {
        self.quiz.as_ref()
    }

    pub fn session(&self) -> &QuizSession {
        &self.session
    }

    /// The question under the cursor; `None` until the first one arrives.
    pub fn current_question(&self) -> Option<&Question> {
        self.quiz
            .as_ref()?
            .questions
            .get(self.session.current_index())
    }

    pub fn question_count(&self) -> usize {
        self.question_count
    }

    pub fn loading_more(&self) -> bool {
        self.loading_more
    }

    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    pub fn poll_attempts(&self) -> usize {
        self.poll.map(|poll| poll.attempts).unwrap_or_default()
    }

    pub fn progress(&self) -> &SimulatedProgress {
        &self.progress
    }

    pub fn request(&self) -> &QuizRequest {
        &self.request
    }

    /// Admits one initial fetch at a time; a second call while one is
    /// outstanding (or after teardown) is refused.
    pub fn begin_fetch(&mut self, now: Instant) -> Option<FetchTicket> {
        if self.torn_down {
            return None;
        }
        if self.fetch_in_flight {
            debug!("quiz fetch already in flight; ignoring duplicate request");
            return None;
        }
        self.fetch_in_flight = true;
        self.generation += 1;
        self.stop_polling();
        self.state = QuizState::Loading;
        self.progress.start(now);
        Some(FetchTicket {
            generation: self.generation,
        })
    }

    pub fn complete_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<QuizEnvelope>,
        now: Instant,
    ) {
        if self.torn_down || ticket.generation != self.generation {
            debug!("dropping stale quiz fetch result");
            return;
        }
        self.fetch_in_flight = false;

        let envelope = match result {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!("quiz fetch failed: {error:#}");
                self.progress.stop();
                self.state = QuizState::Error(user_facing_message(&error, QUIZ_LOAD_FAILED));
                return;
            }
        };

        let quiz = Quiz::from_payload(&envelope.quiz);
        self.question_count = quiz.len();
        if let Some(content_id) = quiz.content_id {
            self.content_id = Some(content_id);
        }
        self.session = QuizSession::new(self.question_count, self.request.resume_index);
        self.quiz = Some(quiz);
        self.progress.complete();
        self.state = QuizState::Active;
        info!(
            quiz_id = envelope.quiz.id,
            questions = self.question_count,
            "quiz active"
        );

        if self.question_count < self.timing.target_questions {
            self.start_polling(now);
        }
    }

    /// Runs the whole initial acquisition path synchronously.
    pub fn load<A, S>(&mut self, api: &mut A, cache: &ContentCache<S>, now: Instant)
    where
        A: LearnApi + ?Sized,
        S: KeyValueStore,
    {
        let Some(ticket) = self.begin_fetch(now) else {
            return;
        };
        let result = self.fetch_initial(api, cache);
        self.complete_fetch(ticket, result, now);
    }

    /// Restarts acquisition from the first question.
    pub fn retry<A, S>(&mut self, api: &mut A, cache: &ContentCache<S>, now: Instant)
    where
        A: LearnApi + ?Sized,
        S: KeyValueStore,
    {
        if self.torn_down {
            return;
        }
        self.fetch_in_flight = false;
        self.request.resume_index = 0;
        self.load(api, cache, now);
    }

    fn fetch_initial<A, S>(&self, api: &mut A, cache: &ContentCache<S>) -> Result<QuizEnvelope>
    where
        A: LearnApi + ?Sized,
        S: KeyValueStore,
    {
        if let (Some(url), Some(config)) = (&self.request.source_url, &self.request.config) {
            match cache.get(url, Some(config)).and_then(|entry| entry.quiz) {
                Some(cached) if self.request.cached_quiz_matches(&cached) => {
                    debug!(quiz_id = cached.quiz.id, "quiz served from content cache");
                    return Ok(cached);
                }
                Some(_) => debug!("cached quiz does not match request; fetching"),
                None => debug!("no cached quiz for {url}"),
            }
        }

        let envelope = match self.request.source {
            QuizSource::Content(content_id) => api.get_quiz_by_content_id(content_id)?,
            QuizSource::Quiz(quiz_id) => api.get_quiz_by_id(quiz_id)?,
        };
        self.remember(cache, &envelope);
        Ok(envelope)
    }

    fn remember<S: KeyValueStore>(&self, cache: &ContentCache<S>, envelope: &QuizEnvelope) {
        let Some(url) = self.request.source_url.as_deref() else {
            return;
        };
        if let Err(error) = cache.set(
            url,
            CachePatch::quiz(envelope.clone()),
            self.request.config.as_ref(),
        ) {
            warn!("failed to cache quiz: {error:#}");
        }
    }

    /// Starts the growth poll with an immediate first attempt. Returns
    /// `false` when a poll loop is already running.
    pub fn start_polling(&mut self, now: Instant) -> bool {
        if self.torn_down || self.poll.is_some() {
            return false;
        }
        self.poll = Some(PollSchedule {
            deadline: now + self.timing.timeout,
            next_poll_at: now,
            attempts: 0,
        });
        self.loading_more = true;
        info!(
            questions = self.question_count,
            target = self.timing.target_questions,
            "polling for more questions"
        );
        true
    }

    pub fn stop_polling(&mut self) {
        self.poll = None;
        self.loading_more = false;
    }

    /// Fires whatever timers are due at `now`.
    pub fn tick<A, S>(&mut self, api: &mut A, cache: &ContentCache<S>, now: Instant)
    where
        A: LearnApi + ?Sized,
        S: KeyValueStore,
    {
        if self.torn_down {
            return;
        }
        if self.state == QuizState::Loading {
            self.progress.advance(now);
        }

        let Some(mut schedule) = self.poll else {
            return;
        };
        if now >= schedule.deadline {
            info!(
                attempts = schedule.attempts,
                questions = self.question_count,
                "poll timeout reached"
            );
            self.stop_polling();
            return;
        }
        if now < schedule.next_poll_at || self.poll_in_flight {
            return;
        }

        schedule.attempts += 1;
        schedule.next_poll_at = now + self.timing.interval;
        self.poll = Some(schedule);

        if self.question_count >= self.timing.target_questions {
            self.stop_polling();
            return;
        }
        let Some(content_id) = self.content_id else {
            warn!("cannot poll for questions: quiz has no content id");
            return;
        };

        self.poll_in_flight = true;
        let result = api.get_quiz_by_content_id(content_id);
        self.poll_in_flight = false;

        match result {
            Ok(envelope) => {
                self.apply_poll_result(cache, envelope);
            }
            Err(error) => warn!(
                attempt = schedule.attempts,
                "quiz poll failed: {error:#}"
            ),
        }
    }

    /// Merges a poll response: only the tail beyond the known count is
    /// appended. Returns the number of questions added.
    pub fn apply_poll_result<S: KeyValueStore>(
        &mut self,
        cache: &ContentCache<S>,
        envelope: QuizEnvelope,
    ) -> usize {
        if self.torn_down || self.state != QuizState::Active {
            return 0;
        }
        let Some(quiz) = self.quiz.as_mut() else {
            return 0;
        };
        let returned = envelope.quiz.questions.len();
        if returned <= self.question_count {
            debug!(questions = self.question_count, "no new questions yet");
            return 0;
        }

        let appended = quiz.append_tail(&envelope.quiz);
        self.question_count = quiz.len();
        if let Some(content_id) = envelope.quiz.content_id {
            self.content_id = Some(content_id);
        }
        self.session.grow(self.question_count);
        info!(
            appended,
            questions = self.question_count,
            "quiz grew"
        );
        self.remember(cache, &envelope);

        if self.question_count >= self.timing.target_questions {
            info!("all questions loaded; polling stopped");
            self.stop_polling();
        }
        appended
    }

    /// Earliest instant at which [`QuizController::tick`] has work to do.
    pub fn next_wakeup(&self) -> Option<Instant> {
        if self.torn_down {
            return None;
        }
        let poll = self
            .poll
            .map(|poll| poll.next_poll_at.min(poll.deadline));
        let progress = (self.state == QuizState::Loading)
            .then(|| self.progress.next_tick_at())
            .flatten();
        match (poll, progress) {
            (Some(poll), Some(progress)) => Some(poll.min(progress)),
            (poll, progress) => poll.or(progress),
        }
    }

    /// Sleeps and ticks until the quiz grows past its current size or
    /// polling ends. Returns the question count afterwards.
    pub fn wait_for_more<A, S, C>(&mut self, api: &mut A, cache: &ContentCache<S>, clock: &C) -> usize
    where
        A: LearnApi + ?Sized,
        S: KeyValueStore,
        C: Clock + ?Sized,
    {
        let known = self.question_count;
        while self.loading_more && self.question_count == known && !self.torn_down {
            let Some(wakeup) = self.next_wakeup() else {
                break;
            };
            clock.sleep_until(wakeup);
            self.tick(api, cache, clock.now());
        }
        self.question_count
    }

    pub fn submit_answer(&mut self, answer: UserAnswer, answered_at: u64) -> Option<bool> {
        if self.torn_down || self.state != QuizState::Active {
            return None;
        }
        let quiz = self.quiz.as_ref()?;
        self.session.submit_answer(quiz, answer, answered_at)
    }

    pub fn advance(&mut self) -> AdvanceOutcome {
        if self.torn_down || self.state != QuizState::Active {
            return AdvanceOutcome::FeedbackPending;
        }
        let outcome = self
            .session
            .advance(self.question_count, self.loading_more);
        match outcome {
            AdvanceOutcome::Finished => {
                self.stop_polling();
                self.state = QuizState::Completed;
                info!("quiz completed");
            }
            AdvanceOutcome::AwaitingQuestions => {
                debug!("waiting for more questions before advancing");
            }
            _ => {}
        }
        outcome
    }

    pub fn jump_to(&mut self, index: usize) -> usize {
        if self.torn_down {
            return self.session.current_index();
        }
        self.session.jump_to(index, self.question_count)
    }

    pub fn report(&self) -> Option<QuizReport> {
        self.quiz.as_ref().map(|quiz| self.session.report(quiz))
    }

    /// Stops every timer; later ticks and results are ignored.
    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.stop_polling();
        self.progress.stop();
        self.fetch_in_flight = false;
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}
