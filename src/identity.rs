//! Content-derived identifiers.
//!
//! Every id produced here is a name-based UUIDv5, so importing the same
//! source twice yields the same ids and the merge updates records in place.

use uuid::Uuid;

/// Tag hashed inside the per-question namespace for ungrouped questions.
/// Changing it changes every legacy id already stored on disk.
pub const LEGACY_QUESTION_TAG: &str = "cissp-question";

const GROUP_TAG: &str = "question-group";
const INLINE_GROUP_TAG: &str = "inline-group";

pub fn derive_id(namespace: &Uuid, content: &str) -> String {
    Uuid::new_v5(namespace, content.as_bytes()).to_string()
}

/// Two-level id for a question that has no owning group in its source:
/// the question text names a namespace, the fixed tag is hashed inside it.
pub fn legacy_question_id(question_text: &str) -> String {
    let namespace = Uuid::new_v5(&Uuid::NAMESPACE_DNS, question_text.as_bytes());
    derive_id(&namespace, LEGACY_QUESTION_TAG)
}

/// Id for a question sourced from a group. Identical text in two groups
/// yields two ids.
pub fn group_question_id(group_id: &str, question_text: &str) -> String {
    let namespace = Uuid::new_v5(&Uuid::NAMESPACE_DNS, group_id.as_bytes());
    derive_id(&namespace, question_text)
}

/// Id for a group that arrived without one. A shared context is the natural
/// key; a context-free group is keyed by its domain and question texts.
pub fn content_group_id(domain: &str, context: &str, question_texts: &[&str]) -> String {
    let namespace = Uuid::new_v5(&Uuid::NAMESPACE_OID, GROUP_TAG.as_bytes());
    let content = if context.is_empty() {
        format!("questions:{}\n{}", domain, question_texts.join("\n"))
    } else {
        format!("context:{}", context)
    };
    derive_id(&namespace, &content)
}

/// Id of the single-question group that wraps a legacy question.
pub fn inline_group_id(question_id: &str) -> String {
    let namespace = Uuid::new_v5(&Uuid::NAMESPACE_OID, INLINE_GROUP_TAG.as_bytes());
    derive_id(&namespace, question_id)
}
