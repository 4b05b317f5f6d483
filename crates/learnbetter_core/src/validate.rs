//! Correctness predicates for the five question kinds.
//!
//! Every entry point fails closed: a missing question, an unrecognized type,
//! a missing answer or missing correct answers all yield `false`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::question::{Question, QuestionBody, QuestionKind};

pub const NOT_AVAILABLE: &str = "N/A";
pub const MATCH_DISPLAY_PLACEHOLDER: &str = "See correct matches above";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPair {
    pub term: String,
    #[serde(rename = "match")]
    pub matched: String,
}

impl MatchPair {
    pub fn new(term: impl Into<String>, matched: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            matched: matched.into(),
        }
    }
}

/// What the user submitted for one question.
///
/// `Choice` carries an option letter (Objective, FillBlank), a lowercase
/// `"true"`/`"false"` (TrueFalse) or the selected item text (OddOneOut).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserAnswer {
    Choice(String),
    Pairs(Vec<MatchPair>),
    Mapping(BTreeMap<String, String>),
}

impl UserAnswer {
    pub fn choice(value: impl Into<String>) -> Self {
        Self::Choice(value.into())
    }

    fn as_choice(&self) -> Option<&str> {
        match self {
            Self::Choice(value) if !value.is_empty() => Some(value),
            _ => None,
        }
    }

    fn pairs(&self) -> Vec<(&str, &str)> {
        match self {
            Self::Choice(_) => Vec::new(),
            Self::Pairs(pairs) => pairs
                .iter()
                .map(|pair| (pair.term.as_str(), pair.matched.as_str()))
                .collect(),
            Self::Mapping(mapping) => mapping
                .iter()
                .map(|(term, matched)| (term.as_str(), matched.as_str()))
                .collect(),
        }
    }
}

pub fn validate_answer(question: Option<&Question>, answer: Option<&UserAnswer>) -> bool {
    let (Some(question), Some(answer)) = (question, answer) else {
        return false;
    };
    let Some(correct) = question.correct_answers.as_deref() else {
        return false;
    };

    match &question.body {
        QuestionBody::Objective { .. }
        | QuestionBody::FillBlank { .. }
        | QuestionBody::OddOneOut { .. } => answer
            .as_choice()
            .is_some_and(|choice| correct.iter().any(|item| item == choice)),
        QuestionBody::TrueFalse => match (answer.as_choice(), correct.first()) {
            (Some(choice), Some(expected)) => choice == expected,
            _ => false,
        },
        QuestionBody::MatchFollowing { left, right } => {
            validate_matching(question, left, right, correct, answer)
        }
        QuestionBody::Unknown { raw_type } => {
            warn!(question_id = question.id, "unknown question type: {raw_type}");
            false
        }
    }
}

fn validate_matching(
    question: &Question,
    left: &[String],
    right: &[String],
    correct: &[String],
    answer: &UserAnswer,
) -> bool {
    if correct.first().is_none_or(|pair| !pair.contains('-')) {
        return false;
    }

    let submitted = answer.pairs();
    let resolved = submitted
        .iter()
        .filter_map(|(term, matched)| {
            let left_index = left.iter().position(|item| item == term)?;
            let right_index = right.iter().position(|item| item == matched)?;
            Some(format!("{left_index}-{right_index}"))
        })
        .collect::<Vec<_>>();

    if resolved.len() < submitted.len() {
        warn!(
            question_id = question.id,
            dropped = submitted.len() - resolved.len(),
            "match answer references terms or matches missing from answer options"
        );
    }

    resolved.len() == correct.len() && correct.iter().all(|pair| resolved.contains(pair))
}

/// Resolves index-pair answers such as `"0-1"` into `(term, match)` text.
pub fn correct_matches(question: &Question) -> Vec<(String, String)> {
    let QuestionBody::MatchFollowing { left, right } = &question.body else {
        return Vec::new();
    };
    question
        .correct_answers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|pair| {
            let (left_index, right_index) = pair.split_once('-')?;
            let term = left.get(left_index.trim().parse::<usize>().ok()?)?;
            let matched = right.get(right_index.trim().parse::<usize>().ok()?)?;
            Some((term.clone(), matched.clone()))
        })
        .collect()
}

/// Feedback text: `"A"`, `"A or B"`, `"A, B, or C"` for lettered kinds,
/// capitalized True/False, the raw item for OddOneOut.
pub fn format_correct_answer_for_display(question: Option<&Question>) -> String {
    let Some(correct) = question.and_then(|question| question.correct_answers.as_deref()) else {
        return NOT_AVAILABLE.to_string();
    };
    if correct.is_empty() {
        return NOT_AVAILABLE.to_string();
    }

    match question.and_then(Question::kind) {
        Some(QuestionKind::TrueFalse) => capitalize(&correct[0]),
        Some(QuestionKind::OddOneOut) => correct[0].clone(),
        Some(QuestionKind::MatchFollowing) => MATCH_DISPLAY_PLACEHOLDER.to_string(),
        _ => join_alternatives(correct),
    }
}

/// Correct answer for the review list; match questions list their pairs.
pub fn correct_answer_text(question: Option<&Question>) -> String {
    let Some(question) = question else {
        return NOT_AVAILABLE.to_string();
    };
    let Some(correct) = question.correct_answers.as_deref() else {
        return NOT_AVAILABLE.to_string();
    };
    if question.kind() == Some(QuestionKind::MatchFollowing) {
        let matches = correct_matches(question);
        if matches.is_empty() {
            return correct.join(", ");
        }
        return matches
            .iter()
            .map(|(term, matched)| format!("{term} → {matched}"))
            .collect::<Vec<_>>()
            .join("; ");
    }
    correct.join(", ")
}

pub fn describe_user_answer(answer: Option<&UserAnswer>) -> String {
    match answer {
        None => "No answer".to_string(),
        Some(UserAnswer::Choice(value)) if value.is_empty() => "No answer".to_string(),
        Some(UserAnswer::Choice(value)) => value.clone(),
        Some(other) => other
            .pairs()
            .iter()
            .map(|(term, matched)| format!("{term} → {matched}"))
            .collect::<Vec<_>>()
            .join("; "),
    }
}

fn join_alternatives(values: &[String]) -> String {
    match values {
        [] => NOT_AVAILABLE.to_string(),
        [only] => only.clone(),
        [first, second] => format!("{first} or {second}"),
        [rest @ .., last] => format!("{}, or {last}", rest.join(", ")),
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
