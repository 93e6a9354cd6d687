//! Validation and canonicalization of loosely shaped question records.
//!
//! Two policies live here on purpose: [`normalize_question`] reports exactly
//! why one record is unusable, while [`sanitize_question`] and
//! [`sanitize_group`] silently drop what cannot be repaired so a noisy batch
//! still imports.

use crate::answers::normalize_correct_answers;
use crate::error::ValidationError;
use crate::identity;
use crate::models::{Group, Question, DEFAULT_DOMAIN};
use serde_json::{Map, Value};
use tracing::debug;

const TEXT_KEYS: &[&str] = &["question", "text", "prompt", "stem"];
const CHOICE_KEYS: &[&str] = &["choices", "options"];
const ANSWER_KEYS: &[&str] = &["correct_answers", "correct_answer", "answer", "answers", "correct"];
const EXPLANATION_KEYS: &[&str] = &["explanation", "comment", "rationale", "analysis"];
const QUESTION_ID_KEYS: &[&str] = &["id", "uuid", "question_id"];
const GROUP_ID_KEYS: &[&str] = &["id", "group_id", "uuid"];
const CONTEXT_KEYS: &[&str] = &["context", "scenario", "passage", "shared_context"];
const DOMAIN_KEYS: &[&str] = &["domain", "category"];
pub(crate) const GROUP_LIST_KEYS: &[&str] = &["questions", "items", "data"];

/// How a question without an explicit id gets one.
#[derive(Debug, Clone, Copy)]
pub enum IdScope<'a> {
    /// Ungrouped source: the two-level legacy scheme over the raw text.
    Global,
    /// Group-sourced: scoped by the owning group's id.
    Group(&'a str),
}

/// Strict single-question normalization.
pub fn normalize_question(raw: &Value, scope: IdScope<'_>) -> Result<Question, ValidationError> {
    let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let raw_text = first_text(obj, TEXT_KEYS).ok_or(ValidationError::MissingText)?;
    let question = raw_text.trim().to_string();

    let choices = first_present(obj, CHOICE_KEYS)
        .and_then(normalize_choices)
        .filter(|c| c.len() >= 2)
        .ok_or(ValidationError::TooFewChoices)?;

    let correct_answers = normalize_correct_answers(first_present(obj, ANSWER_KEYS), &choices);
    if correct_answers.is_empty() {
        return Err(ValidationError::NoCorrectAnswer);
    }

    let explanation = first_text(obj, EXPLANATION_KEYS)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let id = first_text(obj, QUESTION_ID_KEYS)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| match scope {
            IdScope::Global => identity::legacy_question_id(&raw_text),
            IdScope::Group(group_id) => identity::group_question_id(group_id, &question),
        });

    Ok(Question {
        id,
        question,
        choices,
        correct_answers,
        explanation,
    })
}

/// Bulk-path counterpart of [`normalize_question`]: invalid records become
/// `None` and are only logged.
pub fn sanitize_question(raw: &Value, scope: IdScope<'_>) -> Option<Question> {
    match normalize_question(raw, scope) {
        Ok(q) => Some(q),
        Err(err) => {
            debug!("dropping question during sanitization: {}", err);
            None
        }
    }
}

/// Canonicalizes one group-shaped object. A group whose questions all fail
/// sanitization is dropped.
pub fn sanitize_group(raw: &Value) -> Option<Group> {
    let obj = raw.as_object()?;
    let raw_questions = group_question_list(obj)?;

    let domain = domain_of(obj, DEFAULT_DOMAIN);
    let context = first_text(obj, CONTEXT_KEYS)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let id = first_text(obj, GROUP_ID_KEYS)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            let texts: Vec<String> = raw_questions
                .iter()
                .filter_map(|q| q.as_object().and_then(|o| first_text(o, TEXT_KEYS)))
                .map(|t| t.trim().to_string())
                .collect();
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            identity::content_group_id(&domain, &context, &refs)
        });

    let questions: Vec<Question> = raw_questions
        .iter()
        .filter_map(|q| sanitize_question(q, IdScope::Group(&id)))
        .collect();
    if questions.is_empty() {
        debug!("dropping group {} with no valid questions", id);
        return None;
    }

    Some(Group {
        id,
        domain,
        context,
        questions,
    })
}

/// Wraps one ungrouped question into its own single-question group. The
/// question's `domain` (or `default_domain`) becomes the group's domain.
pub fn wrap_legacy_question(raw: &Value, default_domain: &str) -> Option<Group> {
    let question = sanitize_question(raw, IdScope::Global)?;
    let domain = raw
        .as_object()
        .map(|obj| domain_of(obj, default_domain))
        .unwrap_or_else(|| default_domain.to_string());
    let context = raw
        .as_object()
        .and_then(|obj| first_text(obj, CONTEXT_KEYS))
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    Some(Group {
        id: identity::inline_group_id(&question.id),
        domain,
        context,
        questions: vec![question],
    })
}

/// A nested question list marks an object as a group rather than a question.
pub fn is_group_shaped(raw: &Value) -> bool {
    raw.as_object()
        .map(|obj| group_question_list(obj).is_some())
        .unwrap_or(false)
}

pub(crate) fn group_question_list(obj: &Map<String, Value>) -> Option<&Vec<Value>> {
    GROUP_LIST_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_array))
}

/// Domain of a record: trimmed, falling back to `default` when blank.
pub fn domain_of(obj: &Map<String, Value>, default: &str) -> String {
    first_text(obj, DOMAIN_KEYS)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Choices as an ordered list, or as a mapping flattened in key order.
/// Every entry keeps its position so integer answers stay aligned.
fn normalize_choices(raw: &Value) -> Option<Vec<String>> {
    match raw {
        Value::Array(items) => Some(items.iter().map(choice_text).collect()),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Some(keys.into_iter().map(|k| choice_text(&map[k])).collect())
        }
        _ => None,
    }
}

fn choice_text(value: &Value) -> String {
    let text = match value {
        Value::Null => Some(String::new()),
        Value::Object(obj) => first_text(obj, &["text", "content", "label", "value"]),
        other => coerce_text(other),
    };
    text.unwrap_or_else(|| value.to_string()).trim().to_string()
}

fn first_present<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| obj.get(*key).filter(|v| !v.is_null()))
}

/// First key holding non-blank scalar text. The text is returned untrimmed.
pub(crate) fn first_text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        obj.get(*key)
            .and_then(coerce_text)
            .filter(|s| !s.trim().is_empty())
    })
}

fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
