use serde_json::Value;
use std::collections::BTreeSet;

/// Resolves a raw "correct answer" value against the choice list.
///
/// Accepts an integer index, a single letter (`A` is 0), or text equal to a
/// choice (case-insensitive), alone or in an array. Tokens that resolve to
/// nothing are skipped. The result is sorted and deduplicated; an empty
/// result means the record has no usable answer.
pub fn normalize_correct_answers(raw: Option<&Value>, choices: &[String]) -> Vec<usize> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let lowered: Vec<String> = choices.iter().map(|c| c.to_lowercase()).collect();
    let mut resolved = BTreeSet::new();
    match raw {
        Value::Array(values) => {
            for value in values {
                if let Some(idx) = resolve_one(value, &lowered) {
                    resolved.insert(idx);
                }
            }
        }
        value => {
            if let Some(idx) = resolve_one(value, &lowered) {
                resolved.insert(idx);
            }
        }
    }
    resolved.into_iter().collect()
}

fn resolve_one(value: &Value, lowered_choices: &[String]) -> Option<usize> {
    match value {
        Value::Number(n) => {
            let idx = usize::try_from(n.as_u64()?).ok()?;
            (idx < lowered_choices.len()).then_some(idx)
        }
        Value::String(s) => {
            let stripped = s.trim();
            if let Some(idx) = letter_index(stripped) {
                if idx < lowered_choices.len() {
                    return Some(idx);
                }
            }
            let lowered = stripped.to_lowercase();
            lowered_choices.iter().position(|c| *c == lowered)
        }
        _ => None,
    }
}

/// `"A"` / `"a"` is 0, `"B"` is 1, and so on. Anything but one ASCII letter
/// is `None`.
pub fn letter_index(token: &str) -> Option<usize> {
    let mut chars = token.chars();
    let c = chars.next()?;
    if chars.next().is_some() || !c.is_ascii_alphabetic() {
        return None;
    }
    Some((c.to_ascii_uppercase() as u8 - b'A') as usize)
}
