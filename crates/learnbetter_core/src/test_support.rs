use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Result, bail};
use serde_json::json;

use crate::api::{
    ApiError, ConceptId, ContentRecord, ContentUpload, KeyConcept, LearnApi, ProcessingStatus,
    ProcessingStatusKind, SummaryPayload, UploadResponse,
};
use crate::cache::ContentCache;
use crate::config::ProcessingConfig;
use crate::question::{ContentId, QuizEnvelope, QuizId};
use crate::storage::MemoryStore;

/// Replies handed out in order; the last one repeats.
pub struct Script<T: Clone> {
    replies: VecDeque<std::result::Result<T, (u16, Option<String>)>>,
}

impl<T: Clone> Default for Script<T> {
    fn default() -> Self {
        Self {
            replies: VecDeque::new(),
        }
    }
}

impl<T: Clone> Script<T> {
    pub fn ok(&mut self, value: T) -> &mut Self {
        self.replies.push_back(Ok(value));
        self
    }

    pub fn fail(&mut self, status: u16, message: Option<&str>) -> &mut Self {
        self.replies
            .push_back(Err((status, message.map(ToString::to_string))));
        self
    }

    fn next(&mut self) -> Result<T> {
        let reply = if self.replies.len() > 1 {
            self.replies.pop_front()
        } else {
            self.replies.front().cloned()
        };
        match reply {
            Some(Ok(value)) => Ok(value),
            Some(Err((status, message))) => Err(ApiError::Status { status, message }.into()),
            None => bail!("no scripted reply"),
        }
    }
}

#[derive(Default)]
pub struct MockApi {
    pub quiz_by_content: Script<QuizEnvelope>,
    pub quiz_by_id: Script<QuizEnvelope>,
    pub statuses: Script<ProcessingStatus>,
    pub triggers: Script<()>,
    pub concept_deletes: Script<()>,
    pub uploaded: Vec<ContentUpload>,
    pub triggered: Vec<(ContentId, Option<ProcessingConfig>)>,
    pub deleted_concepts: Vec<(ContentId, ConceptId)>,
    pub quiz_content_calls: usize,
    pub quiz_id_calls: usize,
    pub status_calls: usize,
    pub request_count: usize,
}

impl LearnApi for MockApi {
    fn upload_content(&mut self, upload: &ContentUpload) -> Result<UploadResponse> {
        self.request_count += 1;
        self.uploaded.push(upload.clone());
        Ok(UploadResponse {
            content: ContentRecord {
                id: 42,
                title: None,
                content_type: Some(upload.kind().to_string()),
                source_url: upload.source_url().map(ToString::to_string),
                processing_status: Some("pending".to_string()),
                created_at: None,
            },
        })
    }

    fn trigger_processing(
        &mut self,
        content_id: ContentId,
        config: Option<&ProcessingConfig>,
    ) -> Result<()> {
        self.request_count += 1;
        self.triggered.push((content_id, config.cloned()));
        if self.triggers.replies.is_empty() {
            return Ok(());
        }
        self.triggers.next()
    }

    fn get_processing_status(&mut self, _content_id: ContentId) -> Result<ProcessingStatus> {
        self.request_count += 1;
        self.status_calls += 1;
        self.statuses.next()
    }

    fn get_quiz_by_content_id(&mut self, _content_id: ContentId) -> Result<QuizEnvelope> {
        self.request_count += 1;
        self.quiz_content_calls += 1;
        self.quiz_by_content.next()
    }

    fn get_quiz_by_id(&mut self, _quiz_id: QuizId) -> Result<QuizEnvelope> {
        self.request_count += 1;
        self.quiz_id_calls += 1;
        self.quiz_by_id.next()
    }

    fn delete_key_concept(&mut self, content_id: ContentId, concept_id: ConceptId) -> Result<()> {
        self.request_count += 1;
        self.deleted_concepts.push((content_id, concept_id));
        if self.concept_deletes.replies.is_empty() {
            return Ok(());
        }
        self.concept_deletes.next()
    }

    fn list_content(
        &mut self,
        _page: Option<u32>,
        _limit: Option<u32>,
    ) -> Result<Vec<ContentRecord>> {
        self.request_count += 1;
        Ok(Vec::new())
    }

    fn get_content(&mut self, content_id: ContentId) -> Result<ContentRecord> {
        self.request_count += 1;
        bail!("content {content_id} not scripted")
    }

    fn delete_content(&mut self, _content_id: ContentId) -> Result<()> {
        self.request_count += 1;
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// A cache with a one-day TTL over `store`.
pub fn cache(store: &MemoryStore) -> ContentCache<&MemoryStore> {
    ContentCache::new(store, Duration::from_secs(86_400))
}

/// A quiz whose questions are all true/false with answer `"true"`.
pub fn quiz_envelope(quiz_id: QuizId, content_id: ContentId, count: usize) -> QuizEnvelope {
    let questions = (0..count)
        .map(|index| {
            json!({
                "id": index + 1,
                "quiz_id": quiz_id,
                "question_type": "true_false",
                "question_title": format!("Statement {}", index + 1),
                "correct_answers": ["true"],
                "order_index": index
            })
        })
        .collect::<Vec<_>>();
    serde_json::from_value(json!({
        "quiz": {"id": quiz_id, "content_id": content_id, "questions": questions}
    }))
    .expect("quiz envelope")
}

pub fn status(kind: ProcessingStatusKind) -> ProcessingStatus {
    ProcessingStatus {
        processing_status: kind,
        title: None,
        summary: None,
        key_concepts: None,
        processing_error: None,
    }
}

pub fn completed_status(summary: &str, concepts: &[(i64, &str)]) -> ProcessingStatus {
    ProcessingStatus {
        processing_status: ProcessingStatusKind::Completed,
        title: Some("Processed".to_string()),
        summary: Some(SummaryPayload {
            summary_text: summary.to_string(),
        }),
        key_concepts: Some(
            concepts
                .iter()
                .map(|(id, name)| KeyConcept {
                    id: Some(*id),
                    concept_name: name.to_string(),
                    description: format!("{name} explained"),
                })
                .collect(),
        ),
        processing_error: None,
    }
}
