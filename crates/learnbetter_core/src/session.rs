use std::collections::BTreeMap;

use serde::Serialize;

use crate::question::{QuestionId, Quiz};
use crate::validate::{UserAnswer, correct_answer_text, describe_user_answer, validate_answer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerRecord {
    pub question_id: QuestionId,
    pub user_answer: UserAnswer,
    pub is_correct: bool,
    pub answered_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Moved(usize),
    /// At the last loaded question while more are still being generated.
    AwaitingQuestions,
    Finished,
    /// The current question has not been answered yet.
    FeedbackPending,
}

/// Cursor and answer slots of one quiz attempt.
///
/// Slots are only written by [`QuizSession::submit_answer`] and only removed
/// by [`QuizSession::clear_current`]; growing the quiz adds empty slots.
#[derive(Debug, Clone, Default)]
pub struct QuizSession {
    current_index: usize,
    answers: Vec<Option<AnswerRecord>>,
    feedback_visible: bool,
}

impl QuizSession {
    pub fn new(question_count: usize, requested_index: usize) -> Self {
        Self {
            current_index: clamp_index(requested_index, question_count),
            answers: vec![None; question_count],
            feedback_visible: false,
        }
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn answers(&self) -> &[Option<AnswerRecord>] {
        &self.answers
    }

    pub fn answer_at(&self, index: usize) -> Option<&AnswerRecord> {
        self.answers.get(index).and_then(Option::as_ref)
    }

    pub fn feedback_visible(&self) -> bool {
        self.feedback_visible
    }

    pub fn answered_count(&self) -> usize {
        self.answers.iter().flatten().count()
    }

    /// Validates and records `answer` for the current slot. An already
    /// answered slot keeps its record and reports its stored result.
    pub fn submit_answer(&mut self, quiz: &Quiz, answer: UserAnswer, answered_at: u64) -> Option<bool> {
        let question = quiz.questions.get(self.current_index)?;
        if let Some(is_correct) = self
            .answer_at(self.current_index)
            .map(|record| record.is_correct)
        {
            self.feedback_visible = true;
            return Some(is_correct);
        }

        let is_correct = validate_answer(Some(question), Some(&answer));
        if self.answers.len() <= self.current_index {
            self.answers.resize(self.current_index + 1, None);
        }
        self.answers[self.current_index] = Some(AnswerRecord {
            question_id: question.id,
            user_answer: answer,
            is_correct,
            answered_at,
        });
        self.feedback_visible = true;
        Some(is_correct)
    }

    pub fn advance(&mut self, question_count: usize, loading_more: bool) -> AdvanceOutcome {
        if question_count == 0 {
            return if loading_more {
                AdvanceOutcome::AwaitingQuestions
            } else {
                AdvanceOutcome::Finished
            };
        }
        if !self.feedback_visible && self.answer_at(self.current_index).is_none() {
            return AdvanceOutcome::FeedbackPending;
        }
        if self.current_index + 1 < question_count {
            self.current_index += 1;
            self.feedback_visible = false;
            return AdvanceOutcome::Moved(self.current_index);
        }
        if loading_more {
            AdvanceOutcome::AwaitingQuestions
        } else {
            AdvanceOutcome::Finished
        }
    }

    /// Adds empty slots for newly arrived questions and re-clamps the cursor.
    pub fn grow(&mut self, question_count: usize) {
        if question_count > self.answers.len() {
            self.answers.resize(question_count, None);
        }
        self.current_index = clamp_index(self.current_index, question_count);
    }

    pub fn jump_to(&mut self, index: usize, question_count: usize) -> usize {
        self.current_index = clamp_index(index, question_count);
        self.feedback_visible = false;
        self.current_index
    }

    pub fn clear_current(&mut self) {
        if let Some(slot) = self.answers.get_mut(self.current_index) {
            *slot = None;
        }
        self.feedback_visible = false;
    }

    pub fn report(&self, quiz: &Quiz) -> QuizReport {
        let total = quiz.len();
        let mut correct = 0;
        let mut breakdown: BTreeMap<String, TypeTally> = BTreeMap::new();
        let mut review = Vec::with_capacity(total);

        for (index, question) in quiz.questions.iter().enumerate() {
            let record = self.answer_at(index);
            let is_correct = record.is_some_and(|record| record.is_correct);
            if is_correct {
                correct += 1;
            }

            let tally = breakdown.entry(question.type_label()).or_default();
            tally.total += 1;
            if is_correct {
                tally.correct += 1;
            }

            review.push(ReviewItem {
                position: index + 1,
                question_id: question.id,
                title: question.title.clone(),
                description: question.description.clone(),
                user_answer: describe_user_answer(record.map(|record| &record.user_answer)),
                is_correct,
                correct_answer: (!is_correct).then(|| correct_answer_text(Some(question))),
                hint: question.hint.clone().filter(|_| !is_correct),
                linked_concepts: question.linked_concepts.clone(),
            });
        }

        let score = if total == 0 {
            0.0
        } else {
            correct as f64 / total as f64
        };
        let percentage = (score * 100.0).round() as u32;
        QuizReport {
            correct,
            total,
            score,
            percentage,
            band: ScoreBand::from_percentage(percentage),
            breakdown,
            review,
        }
    }
}

fn clamp_index(index: usize, question_count: usize) -> usize {
    index.min(question_count.saturating_sub(1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoreBand {
    Excellent,
    Good,
    Average,
    NeedsImprovement,
}

impl ScoreBand {
    pub fn from_percentage(percentage: u32) -> Self {
        match percentage {
            80.. => Self::Excellent,
            60..=79 => Self::Good,
            40..=59 => Self::Average,
            _ => Self::NeedsImprovement,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent work!",
            Self::Good => "Good job!",
            Self::Average => "Not bad, keep practicing!",
            Self::NeedsImprovement => "Keep studying and try again!",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TypeTally {
    pub correct: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewItem {
    pub position: usize,
    pub question_id: QuestionId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub user_answer: String,
    pub is_correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub linked_concepts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuizReport {
    pub correct: usize,
    pub total: usize,
    pub score: f64,
    pub percentage: u32,
    pub band: ScoreBand,
    pub breakdown: BTreeMap<String, TypeTally>,
    pub review: Vec<ReviewItem>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AdvanceOutcome, QuizSession, ScoreBand, TypeTally};
    use crate::question::{Quiz, QuizPayload};
    use crate::validate::UserAnswer;

    fn quiz() -> Quiz {
        let payload: QuizPayload = serde_json::from_value(json!({
            "id": 5,
            "content_id": 42,
            "questions": [
                {"id": 1, "question_type": "objective", "question_title": "Capital?",
                 "answer_options": {"options": ["Paris", "Rome"]}, "correct_answers": ["A"],
                 "hint": "France"},
                {"id": 2, "question_type": "TrueOrFalse", "question_title": "Sky blue?",
                 "correct_answers": ["true"]},
                {"id": 3, "question_type": "odd_one_out", "question_title": "Odd?",
                 "answer_options": {"items": ["cat", "dog", "car"]}, "correct_answers": ["car"],
                 "linked_concepts": ["Vehicles"]}
            ]
        }))
        .expect("quiz payload");
        Quiz::from_payload(&payload)
    }

    #[test]
    fn requested_index_is_clamped_to_loaded_questions() {
        assert_eq!(QuizSession::new(3, 7).current_index(), 2);
        assert_eq!(QuizSession::new(0, 4).current_index(), 0);
        assert_eq!(QuizSession::new(3, 1).current_index(), 1);
    }

    #[test]
    fn advance_requires_feedback_and_respects_pending_questions() {
        let quiz = quiz();
        let mut session = QuizSession::new(quiz.len(), 0);
        assert_eq!(session.advance(quiz.len(), false), AdvanceOutcome::FeedbackPending);

        assert_eq!(session.submit_answer(&quiz, UserAnswer::choice("A"), 1), Some(true));
        assert_eq!(session.advance(quiz.len(), false), AdvanceOutcome::Moved(1));
        assert!(!session.feedback_visible());

        session.jump_to(9, quiz.len());
        assert_eq!(session.current_index(), 2);
        session.submit_answer(&quiz, UserAnswer::choice("dog"), 2);
        assert_eq!(session.advance(quiz.len(), true), AdvanceOutcome::AwaitingQuestions);
        assert_eq!(session.current_index(), 2);
        assert_eq!(session.advance(quiz.len(), false), AdvanceOutcome::Finished);
    }

    #[test]
    fn answered_slot_is_not_overwritten_until_cleared() {
        let quiz = quiz();
        let mut session = QuizSession::new(quiz.len(), 1);
        assert_eq!(session.submit_answer(&quiz, UserAnswer::choice("false"), 1), Some(false));
        assert_eq!(session.submit_answer(&quiz, UserAnswer::choice("true"), 2), Some(false));
        assert_eq!(session.answer_at(1).map(|record| record.answered_at), Some(1));

        session.clear_current();
        assert_eq!(session.submit_answer(&quiz, UserAnswer::choice("true"), 3), Some(true));
        assert_eq!(session.answered_count(), 1);
    }

    #[test]
    fn resubmitting_an_answered_slot_shows_its_feedback_again() {
        let quiz = quiz();
        let mut session = QuizSession::new(quiz.len(), 0);
        session.submit_answer(&quiz, UserAnswer::choice("A"), 1);
        session.advance(quiz.len(), false);
        session.jump_to(0, quiz.len());
        assert!(!session.feedback_visible());

        assert_eq!(session.submit_answer(&quiz, UserAnswer::choice("B"), 2), Some(true));
        assert!(session.feedback_visible());
        assert_eq!(session.answer_at(0).map(|record| record.answered_at), Some(1));
    }

    #[test]
    fn empty_quiz_waits_or_finishes_instead_of_asking_for_feedback() {
        let mut session = QuizSession::new(0, 0);
        assert_eq!(session.advance(0, true), AdvanceOutcome::AwaitingQuestions);
        assert_eq!(session.advance(0, false), AdvanceOutcome::Finished);
        assert_eq!(session.current_index(), 0);
    }

    #[test]
    fn grow_keeps_existing_records() {
        let quiz = quiz();
        let mut session = QuizSession::new(2, 0);
        session.submit_answer(&quiz, UserAnswer::choice("A"), 1);
        session.grow(3);
        assert_eq!(session.answers().len(), 3);
        assert!(session.answer_at(0).is_some());
        assert!(session.answer_at(2).is_none());
        session.grow(1);
        assert_eq!(session.answers().len(), 3);
        assert_eq!(session.current_index(), 0);
    }

    #[test]
    fn report_scores_bands_and_reviews() {
        let quiz = quiz();
        let mut session = QuizSession::new(quiz.len(), 0);
        session.submit_answer(&quiz, UserAnswer::choice("B"), 1);
        session.advance(quiz.len(), false);
        session.submit_answer(&quiz, UserAnswer::choice("true"), 2);
        session.advance(quiz.len(), false);
        session.submit_answer(&quiz, UserAnswer::choice("car"), 3);

        let report = session.report(&quiz);
        assert_eq!(report.correct, 2);
        assert_eq!(report.total, 3);
        assert_eq!(report.percentage, 67);
        assert_eq!(report.band, ScoreBand::Good);
        assert_eq!(
            report.breakdown.get("Objective"),
            Some(&TypeTally { correct: 0, total: 1 })
        );
        assert_eq!(
            report.breakdown.get("OddOneOut"),
            Some(&TypeTally { correct: 1, total: 1 })
        );

        let first = &report.review[0];
        assert_eq!(first.user_answer, "B");
        assert_eq!(first.correct_answer.as_deref(), Some("A"));
        assert_eq!(first.hint.as_deref(), Some("France"));
        assert!(report.review[2].correct_answer.is_none());
        assert_eq!(report.review[2].linked_concepts, vec!["Vehicles".to_string()]);
    }

    #[test]
    fn score_bands_follow_rounded_percentage() {
        assert_eq!(ScoreBand::from_percentage(80), ScoreBand::Excellent);
        assert_eq!(ScoreBand::from_percentage(79), ScoreBand::Good);
        assert_eq!(ScoreBand::from_percentage(40), ScoreBand::Average);
        assert_eq!(ScoreBand::from_percentage(39), ScoreBand::NeedsImprovement);
        assert_eq!(QuizSession::new(0, 0).report(&Quiz {
            id: 1,
            content_id: None,
            questions: Vec::new(),
        }).percentage, 0);
    }
}
