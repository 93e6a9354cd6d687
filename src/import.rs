//! Import entry points: resolve an arbitrarily shaped payload into candidate
//! groups, then merge them into the stored bank by id.

use crate::error::ImportError;
use crate::models::{Bank, Group, DEFAULT_DOMAIN};
use crate::sanitize;
use crate::store::{find_question_location, remove_empty_groups, BankStore};
use crate::transcript::{parse_transcript, QuestionDraft};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::info;

const GROUP_CONTAINER_KEYS: &[&str] = &["groups", "question_groups"];
const QUESTION_CONTAINER_KEYS: &[&str] = &["questions", "data", "items"];
const GROUP_MARKER_KEYS: &[&str] = &["context", "scenario", "passage", "shared_context", "id", "group_id"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub updated: usize,
}

/// A sanitized group ready to merge. Inline groups wrap one ungrouped
/// question and never relocate a question that already exists.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub group: Group,
    pub inline: bool,
}

/// Input shapes the reconciler understands.
#[derive(Debug)]
enum PayloadShape<'a> {
    /// A list whose entries are groups or flat questions.
    Mixed(&'a [Value], String),
    /// A question map keyed by id.
    QuestionMap(Vec<&'a Value>, String),
    /// One object that is itself a group.
    SingleGroup(&'a Value),
    /// One object that is itself a question.
    SingleQuestion(&'a Value),
}

pub fn import_payload(store: &BankStore, raw: &Value) -> Result<ImportSummary, ImportError> {
    let candidates = resolve_candidates(raw)?;
    if candidates.is_empty() {
        info!("import payload held no valid questions");
        return Ok(ImportSummary::default());
    }
    let mut bank = store.load();
    let summary = merge_candidates(&mut bank, candidates);
    store.save(&bank)?;
    info!(imported = summary.imported, updated = summary.updated, "import finished");
    Ok(summary)
}

/// Parses a transcript and imports the result as ungrouped questions. Nothing
/// is written when parsing fails.
pub fn import_transcript(store: &BankStore, text: &str, domain: &str) -> Result<ImportSummary, ImportError> {
    let drafts = parse_transcript(text, domain)?;
    import_payload(store, &drafts_to_payload(&drafts))
}

pub fn drafts_to_payload(drafts: &[QuestionDraft]) -> Value {
    Value::Array(
        drafts
            .iter()
            .map(|d| {
                serde_json::json!({
                    "question": d.question,
                    "choices": d.choices,
                    "correct_answers": d.correct_answers,
                    "domain": d.domain,
                    "comment": d.comment,
                })
            })
            .collect(),
    )
}

/// Turns a payload into sanitized candidates without touching storage.
/// Fails only when no group or question shape is recognizable at all.
pub fn resolve_candidates(raw: &Value) -> Result<Vec<Candidate>, ImportError> {
    let shape = classify(raw)?;
    if !shape.has_records() {
        return Err(ImportError::UnrecognizedFormat);
    }
    let candidates: Vec<Candidate> = match shape {
        PayloadShape::Mixed(items, domain) => items
            .iter()
            .filter_map(|item| candidate_from_entry(item, &domain))
            .collect(),
        PayloadShape::QuestionMap(items, domain) => items
            .into_iter()
            .filter_map(|item| candidate_from_entry(item, &domain))
            .collect(),
        PayloadShape::SingleGroup(group) => sanitize::sanitize_group(group)
            .map(|group| Candidate { group, inline: false })
            .into_iter()
            .collect(),
        PayloadShape::SingleQuestion(question) => candidate_from_entry(question, DEFAULT_DOMAIN)
            .into_iter()
            .collect(),
    };
    Ok(candidates)
}

impl PayloadShape<'_> {
    /// Entries that are not objects cannot be questions or groups. A payload
    /// made only of those is not a question payload at all.
    fn has_records(&self) -> bool {
        match self {
            Self::Mixed(items, _) => items.iter().any(Value::is_object),
            Self::QuestionMap(items, _) => items.iter().any(|v| v.is_object()),
            Self::SingleGroup(_) | Self::SingleQuestion(_) => true,
        }
    }
}

fn classify(raw: &Value) -> Result<PayloadShape<'_>, ImportError> {
    match raw {
        Value::Array(items) => Ok(PayloadShape::Mixed(items, DEFAULT_DOMAIN.to_string())),
        Value::Object(obj) => classify_object(raw, obj),
        _ => Err(ImportError::UnrecognizedFormat),
    }
}

fn classify_object<'a>(raw: &'a Value, obj: &'a Map<String, Value>) -> Result<PayloadShape<'a>, ImportError> {
    let domain = sanitize::domain_of(obj, DEFAULT_DOMAIN);

    if let Some(groups) = GROUP_CONTAINER_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_array))
    {
        return Ok(PayloadShape::Mixed(groups, domain));
    }

    let has_group_marker = GROUP_MARKER_KEYS.iter().any(|key| obj.contains_key(*key));
    for key in QUESTION_CONTAINER_KEYS {
        match obj.get(*key) {
            Some(Value::Array(items)) => {
                let nested_groups = items.iter().any(sanitize::is_group_shaped);
                if has_group_marker && !nested_groups {
                    return Ok(PayloadShape::SingleGroup(raw));
                }
                return Ok(PayloadShape::Mixed(items, domain));
            }
            Some(Value::Object(map)) => {
                return Ok(PayloadShape::QuestionMap(map.values().collect(), domain));
            }
            _ => {}
        }
    }

    if ["question", "text", "prompt", "stem"].iter().any(|key| obj.contains_key(*key)) {
        return Ok(PayloadShape::SingleQuestion(raw));
    }
    Err(ImportError::UnrecognizedFormat)
}

fn candidate_from_entry(item: &Value, default_domain: &str) -> Option<Candidate> {
    if sanitize::is_group_shaped(item) {
        sanitize::sanitize_group(item).map(|group| Candidate { group, inline: false })
    } else {
        sanitize::wrap_legacy_question(item, default_domain).map(|group| Candidate { group, inline: true })
    }
}

/// Merges candidates into `bank` by id and prunes groups left empty.
///
/// A question id is looked up across the whole bank. A match is replaced in
/// place, or moved into the incoming group when that group differs from its
/// current owner. Unknown ids are appended.
pub fn merge_candidates(bank: &mut Bank, candidates: Vec<Candidate>) -> ImportSummary {
    let mut summary = ImportSummary::default();
    let mut group_index: HashMap<String, usize> = bank
        .groups
        .iter()
        .enumerate()
        .map(|(i, g)| (g.id.clone(), i))
        .collect();

    for Candidate { group, inline } in candidates {
        if inline {
            merge_inline(bank, &mut group_index, group, &mut summary);
            continue;
        }

        let target = match group_index.get(&group.id) {
            Some(&idx) => {
                bank.groups[idx].domain = group.domain.clone();
                bank.groups[idx].context = group.context.clone();
                idx
            }
            None => {
                bank.groups.push(Group {
                    id: group.id.clone(),
                    domain: group.domain.clone(),
                    context: group.context.clone(),
                    questions: Vec::new(),
                });
                group_index.insert(group.id.clone(), bank.groups.len() - 1);
                bank.groups.len() - 1
            }
        };

        for question in group.questions {
            match find_question_location(bank, &question.id) {
                Some((gi, qi)) if gi == target => {
                    bank.groups[gi].questions[qi] = question;
                    summary.updated += 1;
                }
                Some((gi, qi)) => {
                    bank.groups[gi].questions.remove(qi);
                    bank.groups[target].questions.push(question);
                    summary.updated += 1;
                }
                None => {
                    bank.groups[target].questions.push(question);
                    summary.imported += 1;
                }
            }
        }
    }

    remove_empty_groups(bank);
    summary
}

fn merge_inline(bank: &mut Bank, group_index: &mut HashMap<String, usize>, group: Group, summary: &mut ImportSummary) {
    for question in &group.questions {
        if let Some((gi, qi)) = find_question_location(bank, &question.id) {
            if bank.groups[gi].id == group.id {
                bank.groups[gi].domain = group.domain.clone();
                bank.groups[gi].context = group.context.clone();
            }
            bank.groups[gi].questions[qi] = question.clone();
            summary.updated += 1;
            continue;
        }
        match group_index.get(&group.id) {
            Some(&idx) => bank.groups[idx].questions.push(question.clone()),
            None => {
                bank.groups.push(Group {
                    questions: vec![question.clone()],
                    ..group.clone()
                });
                group_index.insert(group.id.clone(), bank.groups.len() - 1);
            }
        }
        summary.imported += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group_payload(group_id: &str, question_id: &str) -> Value {
        json!({
            "groups": [{
                "id": group_id,
                "domain": "Security",
                "questions": [
                    {"id": question_id, "question": "Which is a detective control?", "choices": ["Log review", "Fence"], "answer": "A"}
                ]
            }]
        })
    }

    #[test]
    fn unrecognized_shapes_fail_before_merge() {
        assert!(matches!(resolve_candidates(&json!("text")), Err(ImportError::UnrecognizedFormat)));
        assert!(matches!(resolve_candidates(&json!({"foo": []})), Err(ImportError::UnrecognizedFormat)));
        assert!(matches!(resolve_candidates(&json!(42)), Err(ImportError::UnrecognizedFormat)));
        assert!(matches!(resolve_candidates(&json!([1, 2, "x"])), Err(ImportError::UnrecognizedFormat)));
        assert!(matches!(resolve_candidates(&json!({"questions": [1, 2]})), Err(ImportError::UnrecognizedFormat)));
        assert!(matches!(resolve_candidates(&json!({"questions": {"a": 1}})), Err(ImportError::UnrecognizedFormat)));
    }

    #[test]
    fn invalid_objects_are_dropped_not_rejected() {
        let candidates = resolve_candidates(&json!([{"question": "Q", "choices": ["a"]}, 7])).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn reimported_flat_question_takes_new_domain() {
        let mut bank = Bank::default();
        let question = |domain: &str| json!([{"question": "Q", "choices": ["a", "b"], "answer": "A", "domain": domain}]);
        merge_candidates(&mut bank, resolve_candidates(&question("Crypto")).unwrap());
        let summary = merge_candidates(&mut bank, resolve_candidates(&question("Ops")).unwrap());
        assert_eq!(summary, ImportSummary { imported: 0, updated: 1 });
        assert_eq!(bank.groups.len(), 1);
        assert_eq!(bank.groups[0].domain, "Ops");
    }

    #[test]
    fn inline_update_leaves_a_real_group_alone() {
        let mut bank = Bank::default();
        merge_candidates(&mut bank, resolve_candidates(&group_payload("g1", "q1")).unwrap());
        merge_candidates(
            &mut bank,
            resolve_candidates(&json!([{"id": "q1", "question": "Q", "choices": ["a", "b"], "answer": "A", "domain": "Ops"}]))
                .unwrap(),
        );
        assert_eq!(bank.groups[0].id, "g1");
        assert_eq!(bank.groups[0].domain, "Security");
    }

    #[test]
    fn shapes_resolve_to_candidates() {
        let flat = resolve_candidates(&json!([
            {"question": "Q1", "choices": ["a", "b"], "answer": "A"},
            {"question": "Q2", "choices": ["a"], "answer": "A"}
        ]))
        .unwrap();
        assert_eq!(flat.len(), 1);
        assert!(flat[0].inline);

        let keyed = resolve_candidates(&json!({
            "domain": "Crypto",
            "questions": {"x": {"question": "Q", "choices": ["a", "b"], "answer": 1}}
        }))
        .unwrap();
        assert_eq!(keyed[0].group.domain, "Crypto");

        let single_group = resolve_candidates(&json!({
            "context": "Shared",
            "questions": [{"question": "Q", "choices": ["a", "b"], "answer": 1}]
        }))
        .unwrap();
        assert_eq!(single_group.len(), 1);
        assert!(!single_group[0].inline);
        assert_eq!(single_group[0].group.context, "Shared");

        let nested = resolve_candidates(&json!({
            "data": [{"id": "g", "items": [{"text": "Q", "options": ["a", "b"], "correct": "b"}]}]
        }))
        .unwrap();
        assert_eq!(nested[0].group.id, "g");

        let one = resolve_candidates(&json!({"question": "Q", "choices": ["a", "b"], "answer": "a"})).unwrap();
        assert_eq!(one.len(), 1);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut bank = Bank::default();
        let first = merge_candidates(&mut bank, resolve_candidates(&group_payload("g1", "q1")).unwrap());
        assert_eq!(first, ImportSummary { imported: 1, updated: 0 });
        let snapshot = bank.clone();
        let second = merge_candidates(&mut bank, resolve_candidates(&group_payload("g1", "q1")).unwrap());
        assert_eq!(second, ImportSummary { imported: 0, updated: 1 });
        assert_eq!(bank, snapshot);
    }

    #[test]
    fn merge_relocates_between_groups() {
        let mut bank = Bank::default();
        merge_candidates(&mut bank, resolve_candidates(&group_payload("g1", "q1")).unwrap());
        let moved = merge_candidates(&mut bank, resolve_candidates(&group_payload("g2", "q1")).unwrap());
        assert_eq!(moved, ImportSummary { imported: 0, updated: 1 });
        assert_eq!(bank.groups.len(), 1);
        assert_eq!(bank.groups[0].id, "g2");
        assert_eq!(bank.groups[0].questions[0].id, "q1");
    }

    #[test]
    fn inline_questions_update_in_place() {
        let mut bank = Bank::default();
        merge_candidates(&mut bank, resolve_candidates(&group_payload("g1", "q1")).unwrap());
        let summary = merge_candidates(
            &mut bank,
            resolve_candidates(&json!([
                {"id": "q1", "question": "Reworded?", "choices": ["a", "b"], "answer": "B"},
                {"question": "Brand new", "choices": ["a", "b"], "answer": "A"}
            ]))
            .unwrap(),
        );
        assert_eq!(summary, ImportSummary { imported: 1, updated: 1 });
        assert_eq!(bank.groups[0].id, "g1");
        assert_eq!(bank.groups[0].questions[0].question, "Reworded?");
        assert_eq!(bank.groups.len(), 2);
    }

    #[test]
    fn group_update_replaces_domain_and_context() {
        let mut bank = Bank::default();
        merge_candidates(&mut bank, resolve_candidates(&group_payload("g1", "q1")).unwrap());
        merge_candidates(
            &mut bank,
            resolve_candidates(&json!({"groups": [{
                "id": "g1", "domain": "Ops", "context": "New",
                "questions": [{"id": "q2", "question": "Other", "choices": ["a", "b"], "answer": 0}]
            }]}))
            .unwrap(),
        );
        assert_eq!(bank.groups[0].domain, "Ops");
        assert_eq!(bank.groups[0].context, "New");
        assert_eq!(bank.groups[0].questions.len(), 2);
    }
}
