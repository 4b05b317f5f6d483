use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Result, bail};
use learnbetter_core::acquisition::{PollTiming, QuizController, QuizRequest, QuizState};
use learnbetter_core::api::{
    ConceptId, ContentRecord, ContentUpload, LearnApi, ProcessingStatus, UploadResponse,
};
use learnbetter_core::cache::{CachePatch, ContentCache};
use learnbetter_core::clock::{Clock, ManualClock};
use learnbetter_core::config::ProcessingConfig;
use learnbetter_core::processing::{ProcessingMonitor, ProcessingState, Submission, submit_content};
use learnbetter_core::question::{ContentId, QuizEnvelope, QuizId};
use learnbetter_core::session::{AdvanceOutcome, ScoreBand};
use learnbetter_core::storage::MemoryStore;
use learnbetter_core::validate::UserAnswer;
use serde_json::json;

const SOURCE_URL: &str = "https://example.com/article";

#[derive(Default)]
struct ScriptedBackend {
    statuses: VecDeque<ProcessingStatus>,
    quizzes: VecDeque<QuizEnvelope>,
    uploads: Vec<ContentUpload>,
    triggers: Vec<ContentId>,
    requests: usize,
}

impl ScriptedBackend {
    fn next_quiz(&mut self) -> Result<QuizEnvelope> {
        let quiz = if self.quizzes.len() > 1 {
            self.quizzes.pop_front()
        } else {
            self.quizzes.front().cloned()
        };
        match quiz {
            Some(quiz) => Ok(quiz),
            None => bail!("no quiz scripted"),
        }
    }
}

impl LearnApi for ScriptedBackend {
    fn upload_content(&mut self, upload: &ContentUpload) -> Result<UploadResponse> {
        self.requests += 1;
        self.uploads.push(upload.clone());
        Ok(serde_json::from_value(json!({
            "content": {"id": 42, "content_type": upload.kind(), "processing_status": "pending"}
        }))?)
    }

    fn trigger_processing(
        &mut self,
        content_id: ContentId,
        _config: Option<&ProcessingConfig>,
    ) -> Result<()> {
        self.requests += 1;
        self.triggers.push(content_id);
        Ok(())
    }

    fn get_processing_status(&mut self, _content_id: ContentId) -> Result<ProcessingStatus> {
        self.requests += 1;
        match self.statuses.pop_front() {
            Some(status) => Ok(status),
            None => bail!("no status scripted"),
        }
    }

    fn get_quiz_by_content_id(&mut self, _content_id: ContentId) -> Result<QuizEnvelope> {
        self.requests += 1;
        self.next_quiz()
    }

    fn get_quiz_by_id(&mut self, _quiz_id: QuizId) -> Result<QuizEnvelope> {
        self.requests += 1;
        self.next_quiz()
    }

    fn delete_key_concept(&mut self, _content_id: ContentId, _concept_id: ConceptId) -> Result<()> {
        self.requests += 1;
        Ok(())
    }

    fn list_content(&mut self, _page: Option<u32>, _limit: Option<u32>) -> Result<Vec<ContentRecord>> {
        self.requests += 1;
        Ok(Vec::new())
    }

    fn get_content(&mut self, content_id: ContentId) -> Result<ContentRecord> {
        self.requests += 1;
        bail!("content {content_id} not scripted")
    }

    fn delete_content(&mut self, _content_id: ContentId) -> Result<()> {
        self.requests += 1;
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.requests
    }
}

fn status(value: serde_json::Value) -> ProcessingStatus {
    serde_json::from_value(value).expect("status payload")
}

/// Questions alternate between true/false and objective; the true/false
/// answer is `"true"` and the objective answer is option `B`.
fn quiz(count: usize) -> QuizEnvelope {
    let questions = (0..count)
        .map(|index| {
            if index % 2 == 0 {
                json!({
                    "id": index + 1,
                    "question_type": "true_false",
                    "question_title": format!("Statement {}", index + 1),
                    "correct_answers": ["true"],
                    "order_index": index
                })
            } else {
                json!({
                    "id": index + 1,
                    "question_type": "objective",
                    "question_title": format!("Pick one {}", index + 1),
                    "answer_options": {"options": ["alpha", "beta", "gamma"]},
                    "correct_answers": ["B"],
                    "hint": "It is the second letter.",
                    "order_index": index
                })
            }
        })
        .collect::<Vec<_>>();
    serde_json::from_value(json!({
        "quiz": {"id": 7, "content_id": 42, "questions": questions}
    }))
    .expect("quiz payload")
}

#[test]
fn weblink_flows_from_upload_to_scored_quiz() {
    let clock = ManualClock::new();
    let store = MemoryStore::new();
    let cache = ContentCache::new(&store, Duration::from_secs(24 * 3_600));
    let mut backend = ScriptedBackend::default();
    backend
        .statuses
        .push_back(status(json!({"processing_status": "pending"})));
    backend.statuses.push_back(status(json!({
        "processing_status": "completed",
        "title": "Article",
        "summary": {"summary_text": "X"},
        "key_concepts": [
            {"id": 1, "concept_name": "A", "description": "first"},
            {"id": 2, "concept_name": "B", "description": "second"}
        ]
    })));
    backend.quizzes.push_back(quiz(6));
    backend.quizzes.push_back(quiz(6));
    backend.quizzes.push_back(quiz(10));

    let upload = ContentUpload::Weblink {
        url: SOURCE_URL.to_string(),
    };
    let submission = submit_content(&mut backend, &cache, &upload, None).expect("submit");
    assert_eq!(submission, Submission::Started(42));
    assert_eq!(backend.triggers, vec![42]);
    assert_eq!(backend.uploads, vec![upload.clone()]);

    let mut monitor = ProcessingMonitor::new(42, Some(SOURCE_URL.to_string()), Duration::from_secs(3));
    monitor.start(clock.now());
    let state = monitor.wait(&mut backend, &cache, &clock).clone();
    assert_eq!(state, ProcessingState::Completed);
    assert_eq!(monitor.summary(), Some("X"));
    assert_eq!(monitor.progress().percent(), 100);

    let cached = cache.get(SOURCE_URL, None).expect("summary cached");
    assert_eq!(cached.summary.as_deref(), Some("X"));
    let names = cached
        .key_concepts
        .unwrap_or_default()
        .into_iter()
        .map(|concept| concept.concept_name)
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["A", "B"]);

    let mut controller = QuizController::new(
        QuizRequest::for_content(42).with_source(SOURCE_URL, None),
        PollTiming::default(),
    );
    controller.load(&mut backend, &cache, clock.now());
    assert_eq!(*controller.state(), QuizState::Active);
    assert_eq!(controller.question_count(), 6);
    assert!(controller.loading_more());

    let mut correct = 0;
    let mut saw_growth = false;
    loop {
        controller.tick(&mut backend, &cache, clock.now());
        let index = controller.session().current_index();
        let answer = if index % 2 == 0 {
            UserAnswer::choice("true")
        } else if index == 3 {
            UserAnswer::choice("C")
        } else {
            UserAnswer::choice("B")
        };
        if controller
            .submit_answer(answer, clock.unix_millis())
            .expect("question is answerable")
        {
            correct += 1;
        }

        match controller.advance() {
            AdvanceOutcome::Moved(_) => {}
            AdvanceOutcome::AwaitingQuestions => {
                let grown = controller.wait_for_more(&mut backend, &cache, &clock);
                assert_eq!(grown, 10);
                saw_growth = true;
                assert!(!controller.loading_more());
                assert!(!controller.is_polling());
                assert!(matches!(controller.advance(), AdvanceOutcome::Moved(6)));
            }
            AdvanceOutcome::Finished => break,
            AdvanceOutcome::FeedbackPending => panic!("answer was not recorded"),
        }
    }

    assert!(saw_growth);
    assert_eq!(*controller.state(), QuizState::Completed);
    assert_eq!(controller.session().answered_count(), 10);

    let report = controller.report().expect("report");
    assert_eq!(report.total, 10);
    assert_eq!(report.correct, correct);
    assert_eq!(report.correct, 9);
    assert!((report.score - 0.9).abs() < f64::EPSILON);
    assert_eq!(report.percentage, 90);
    assert_eq!(report.band, ScoreBand::Excellent);

    let missed = report
        .review
        .iter()
        .filter(|item| !item.is_correct)
        .collect::<Vec<_>>();
    assert_eq!(missed.len(), 1);
    assert_eq!(missed[0].position, 4);
    assert_eq!(missed[0].correct_answer.as_deref(), Some("B"));
    assert_eq!(missed[0].hint.as_deref(), Some("It is the second letter."));

    let entry = cache.get(SOURCE_URL, None).expect("entry kept");
    assert_eq!(entry.summary.as_deref(), Some("X"));
    assert_eq!(entry.quiz.map(|quiz| quiz.quiz.questions.len()), Some(10));
}

#[test]
fn cached_quiz_is_served_without_a_network_call() {
    let clock = ManualClock::new();
    let store = MemoryStore::new();
    let cache = ContentCache::new(&store, Duration::from_secs(3_600));
    let config = ProcessingConfig::embedded().expect("embedded config");
    cache
        .set(SOURCE_URL, CachePatch::quiz(quiz(10)), Some(&config))
        .expect("seed cache");

    let mut backend = ScriptedBackend::default();
    let mut controller = QuizController::new(
        QuizRequest::for_content(42).with_source(SOURCE_URL, Some(config)),
        PollTiming::default(),
    );
    controller.load(&mut backend, &cache, clock.now());

    assert_eq!(*controller.state(), QuizState::Active);
    assert_eq!(controller.question_count(), 10);
    assert!(!controller.is_polling());
    assert_eq!(backend.request_count(), 0);
}

#[test]
fn polling_gives_up_after_the_safety_timeout() {
    let clock = ManualClock::new();
    let store = MemoryStore::new();
    let cache = ContentCache::new(&store, Duration::from_secs(3_600));
    let mut backend = ScriptedBackend::default();
    backend.quizzes.push_back(quiz(4));

    let mut controller = QuizController::new(QuizRequest::for_content(42), PollTiming::default());
    controller.load(&mut backend, &cache, clock.now());
    assert!(controller.loading_more());

    let count = controller.wait_for_more(&mut backend, &cache, &clock);
    assert_eq!(count, 4);
    assert!(!controller.loading_more());
    assert!(clock.elapsed() >= Duration::from_secs(60));
    assert!(clock.elapsed() < Duration::from_secs(66));
}
