use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

pub type ContentId = i64;
pub type QuizId = i64;
pub type QuestionId = i64;

/// `{quiz: {...}}` as returned by both quiz retrieval endpoints.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct QuizEnvelope {
    pub quiz: QuizPayload,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct QuizPayload {
    pub id: QuizId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<ContentId>,
    #[serde(default)]
    pub questions: Vec<QuestionPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// One question exactly as the backend encodes it. Field pairs such as
/// `answer_options`/`answer_json` are alternative spellings of one value.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct QuestionPayload {
    pub id: QuestionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz_id: Option<QuizId>,
    #[serde(default)]
    pub question_type: String,
    #[serde(default)]
    pub question_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_options: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answers: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_concepts: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_key_concepts: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_index: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum QuestionKind {
    Objective,
    TrueFalse,
    FillBlank,
    MatchFollowing,
    OddOneOut,
}

impl QuestionKind {
    /// Maps every backend spelling of a question type onto one kind.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "objective" | "Objective" => Some(Self::Objective),
            "true_false" | "TrueOrFalse" | "TrueFalse" => Some(Self::TrueFalse),
            "fill_blank" | "FillInTheBlank" | "FillBlank" => Some(Self::FillBlank),
            "match" | "match_following" | "MatchTheFollowing" | "MatchFollowing" => {
                Some(Self::MatchFollowing)
            }
            "odd_one_out" | "OddOneOut" => Some(Self::OddOneOut),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Objective => "Objective",
            Self::TrueFalse => "TrueOrFalse",
            Self::FillBlank => "FillInTheBlank",
            Self::MatchFollowing => "MatchTheFollowing",
            Self::OddOneOut => "OddOneOut",
        }
    }
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Type-specific payload of a question after ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionBody {
    Objective {
        options: Vec<String>,
    },
    TrueFalse,
    FillBlank {
        text: Option<String>,
        options: Vec<String>,
    },
    MatchFollowing {
        left: Vec<String>,
        right: Vec<String>,
    },
    OddOneOut {
        items: Vec<String>,
    },
    Unknown {
        raw_type: String,
    },
}

impl QuestionBody {
    pub fn kind(&self) -> Option<QuestionKind> {
        match self {
            Self::Objective { .. } => Some(QuestionKind::Objective),
            Self::TrueFalse => Some(QuestionKind::TrueFalse),
            Self::FillBlank { .. } => Some(QuestionKind::FillBlank),
            Self::MatchFollowing { .. } => Some(QuestionKind::MatchFollowing),
            Self::OddOneOut { .. } => Some(QuestionKind::OddOneOut),
            Self::Unknown { .. } => None,
        }
    }

    /// Lettered choices for the multiple-choice kinds, in `A`, `B`, ... order.
    pub fn choices(&self) -> &[String] {
        match self {
            Self::Objective { options } | Self::FillBlank { options, .. } => options,
            Self::OddOneOut { items } => items,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: QuestionId,
    pub title: String,
    pub description: Option<String>,
    pub body: QuestionBody,
    pub correct_answers: Option<Vec<String>>,
    pub hint: Option<String>,
    pub linked_concepts: Vec<String>,
    pub order_index: i64,
}

impl Question {
    pub fn from_payload(payload: &QuestionPayload, position: usize) -> Self {
        let options = payload
            .answer_options
            .as_ref()
            .or(payload.answer_json.as_ref());
        let body = match QuestionKind::parse(&payload.question_type) {
            Some(QuestionKind::Objective) => QuestionBody::Objective {
                options: choice_list(options),
            },
            Some(QuestionKind::TrueFalse) => QuestionBody::TrueFalse,
            Some(QuestionKind::FillBlank) => QuestionBody::FillBlank {
                text: options
                    .and_then(|value| value.get("text"))
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
                options: choice_list(options),
            },
            Some(QuestionKind::MatchFollowing) => {
                let (left, right) = matching_columns(options);
                QuestionBody::MatchFollowing { left, right }
            }
            Some(QuestionKind::OddOneOut) => QuestionBody::OddOneOut {
                items: choice_list(options),
            },
            None => QuestionBody::Unknown {
                raw_type: payload.question_type.clone(),
            },
        };

        let hint = payload
            .hint
            .as_deref()
            .filter(|hint| !hint.is_empty())
            .or(payload.hint_description.as_deref())
            .filter(|hint| !hint.is_empty())
            .map(ToString::to_string);

        Self {
            id: payload.id,
            title: payload.question_title.clone(),
            description: payload.description.clone(),
            body,
            correct_answers: payload
                .correct_answers
                .as_ref()
                .map(|value| correct_answer_list(payload.id, value)),
            hint,
            linked_concepts: payload
                .linked_concepts
                .as_ref()
                .or(payload.linked_key_concepts.as_ref())
                .map(string_list)
                .unwrap_or_default(),
            order_index: payload
                .order_index
                .unwrap_or_else(|| i64::try_from(position).unwrap_or(i64::MAX)),
        }
    }

    pub fn kind(&self) -> Option<QuestionKind> {
        self.body.kind()
    }

    /// Label used for grouping in score breakdowns; unknown types keep their raw name.
    pub fn type_label(&self) -> String {
        match &self.body {
            QuestionBody::Unknown { raw_type } => raw_type.clone(),
            body => body
                .kind()
                .map(|kind| kind.label().to_string())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quiz {
    pub id: QuizId,
    pub content_id: Option<ContentId>,
    pub questions: Vec<Question>,
}

impl Quiz {
    pub fn from_payload(payload: &QuizPayload) -> Self {
        Self {
            id: payload.id,
            content_id: payload.content_id,
            questions: payload
                .questions
                .iter()
                .enumerate()
                .map(|(position, question)| Question::from_payload(question, position))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Appends the payload's questions beyond the current length. Existing
    /// entries are never replaced, even if the backend reordered them.
    pub fn append_tail(&mut self, payload: &QuizPayload) -> usize {
        let known = self.questions.len();
        if payload.questions.len() <= known {
            return 0;
        }
        for (position, question) in payload.questions.iter().enumerate().skip(known) {
            self.questions
                .push(Question::from_payload(question, position));
        }
        if self.content_id.is_none() {
            self.content_id = payload.content_id;
        }
        payload.questions.len() - known
    }
}

pub fn option_letter(index: usize) -> Option<char> {
    u8::try_from(index)
        .ok()
        .filter(|value| *value < 26)
        .map(|value| char::from(b'A' + value))
}

pub fn letter_index(letter: &str) -> Option<usize> {
    let mut chars = letter.trim().chars();
    let first = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() || !first.is_ascii_uppercase() {
        return None;
    }
    Some(usize::from(first as u8 - b'A'))
}

/// Normalizes `{options: [...]}`, `{options: {A: ..}}`, `{items: [...]}`,
/// a bare lettered map `{A: .., B: ..}` or a bare array into an ordered list.
fn choice_list(options: Option<&Value>) -> Vec<String> {
    let Some(options) = options else {
        return Vec::new();
    };
    match options {
        Value::Array(values) => values.iter().map(value_text).collect(),
        Value::Object(map) => {
            if let Some(inner) = map.get("options").or_else(|| map.get("items")) {
                return choice_list(Some(inner));
            }
            lettered_values(map)
        }
        _ => Vec::new(),
    }
}

fn lettered_values(map: &Map<String, Value>) -> Vec<String> {
    let ordered = map
        .iter()
        .filter_map(|(key, value)| letter_index(key).map(|index| (index, value_text(value))))
        .collect::<BTreeMap<_, _>>();
    ordered.into_values().collect()
}

fn matching_columns(options: Option<&Value>) -> (Vec<String>, Vec<String>) {
    let Some(options) = options else {
        return (Vec::new(), Vec::new());
    };
    if let Some(pairs) = options.get("pairs").and_then(Value::as_array) {
        let left = pairs
            .iter()
            .filter_map(|pair| pair.get("term"))
            .map(value_text)
            .collect();
        let right = pairs
            .iter()
            .filter_map(|pair| pair.get("match"))
            .map(value_text)
            .collect();
        return (left, right);
    }
    let column = |name: &str| {
        options
            .get(name)
            .and_then(Value::as_array)
            .map(|values| values.iter().map(value_text).collect::<Vec<_>>())
            .unwrap_or_default()
    };
    (column("left"), column("right"))
}

/// Like [`string_list`], but logs the `{term, match}` objects it drops.
fn correct_answer_list(question_id: QuestionId, value: &Value) -> Vec<String> {
    let dropped = value
        .as_array()
        .map(|values| values.iter().filter(|value| value.is_object()).count())
        .unwrap_or_default();
    if dropped > 0 {
        warn!(
            question_id,
            dropped, "ignoring object-valued correct answers; only index pairs are matched"
        );
    }
    string_list(value)
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(values) => values
            .iter()
            .filter(|value| !value.is_object() && !value.is_null())
            .map(value_text)
            .collect(),
        Value::Null => Vec::new(),
        other => vec![value_text(other)],
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
