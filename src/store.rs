//! On-disk bank and wrong-answer log, plus the read/edit helpers that work
//! on a loaded [`Bank`].

use crate::error::{StoreError, ValidationError};
use crate::models::{Bank, FlatQuestion, Group, WrongAnswerEntry, BANK_VERSION, DEFAULT_DOMAIN};
use crate::sanitize::{self, IdScope};
use chrono::NaiveDateTime;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Recognized layouts of a stored bank document, resolved once per load.
#[derive(Debug)]
pub enum StoredShape {
    /// `{"version": n, "groups": [...]}`
    Versioned(Vec<Value>),
    /// A bare array of flat questions.
    LegacyList(Vec<Value>),
    /// `{"questions": [...]}` without groups.
    LegacyQuestions(Vec<Value>),
    Unrecognized,
}

impl StoredShape {
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::LegacyList(items),
            Value::Object(mut obj) => match obj.remove("groups") {
                Some(Value::Array(groups)) => Self::Versioned(groups),
                _ => match obj.remove("questions") {
                    Some(Value::Array(questions)) => Self::LegacyQuestions(questions),
                    _ => Self::Unrecognized,
                },
            },
            _ => Self::Unrecognized,
        }
    }

    pub fn into_bank(self) -> Bank {
        let groups = match self {
            Self::Versioned(groups) => groups.iter().filter_map(sanitize::sanitize_group).collect(),
            Self::LegacyList(items) | Self::LegacyQuestions(items) => items
                .iter()
                .filter_map(|item| {
                    if sanitize::is_group_shaped(item) {
                        sanitize::sanitize_group(item)
                    } else {
                        sanitize::wrap_legacy_question(item, DEFAULT_DOMAIN)
                    }
                })
                .collect(),
            Self::Unrecognized => Vec::new(),
        };
        Bank {
            version: BANK_VERSION,
            groups,
        }
    }
}

impl Bank {
    /// Migrates any stored layout to the canonical shape.
    pub fn from_value(value: Value) -> Self {
        StoredShape::classify(value).into_bank()
    }
}

pub struct BankStore {
    path: PathBuf,
}

impl BankStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails: a missing or unreadable document is an empty bank.
    pub fn load(&self) -> Bank {
        match read_json(&self.path) {
            Some(value) => Bank::from_value(value),
            None => Bank::default(),
        }
    }

    /// Re-sanitizes every group and rewrites the whole document.
    pub fn save(&self, bank: &Bank) -> Result<(), StoreError> {
        let groups: Vec<Group> = bank
            .groups
            .iter()
            .filter_map(|group| {
                let raw = serde_json::to_value(group).ok()?;
                sanitize::sanitize_group(&raw)
            })
            .collect();
        let canonical = Bank {
            version: BANK_VERSION,
            groups,
        };
        write_atomic(&self.path, &serde_json::to_vec_pretty(&canonical)?)
    }

    /// Saves an untyped document; anything that is not an object is written
    /// as an empty bank.
    pub fn save_raw(&self, raw: &Value) -> Result<(), StoreError> {
        let bank = if raw.is_object() {
            Bank::from_value(raw.clone())
        } else {
            Bank::default()
        };
        self.save(&bank)
    }
}

/// `(group index, question index)` of a question id.
pub fn find_question_location(bank: &Bank, question_id: &str) -> Option<(usize, usize)> {
    bank.groups.iter().enumerate().find_map(|(gi, group)| {
        group
            .questions
            .iter()
            .position(|q| q.id == question_id)
            .map(|qi| (gi, qi))
    })
}

pub fn remove_empty_groups(bank: &mut Bank) {
    bank.groups.retain(|g| !g.questions.is_empty());
}

/// Returns the ids actually removed.
pub fn remove_questions_by_id(bank: &mut Bank, ids: &HashSet<String>) -> Vec<String> {
    let mut removed = Vec::new();
    for group in &mut bank.groups {
        group.questions.retain(|q| {
            if ids.contains(&q.id) {
                removed.push(q.id.clone());
                false
            } else {
                true
            }
        });
    }
    remove_empty_groups(bank);
    removed
}

/// Removes whole groups; returns the ids of the questions they held.
pub fn remove_groups_by_id(bank: &mut Bank, group_ids: &HashSet<String>) -> Vec<String> {
    let mut removed = Vec::new();
    bank.groups.retain(|g| {
        if group_ids.contains(&g.id) {
            removed.extend(g.questions.iter().map(|q| q.id.clone()));
            false
        } else {
            true
        }
    });
    removed
}

/// Strictly re-normalizes one question in place. The id and position are kept.
pub fn update_question(bank: &mut Bank, question_id: &str, raw: &Value) -> Result<Option<()>, ValidationError> {
    let Some((gi, qi)) = find_question_location(bank, question_id) else {
        return Ok(None);
    };
    let group_id = bank.groups[gi].id.clone();
    let mut question = sanitize::normalize_question(raw, IdScope::Group(&group_id))?;
    question.id = question_id.to_string();
    bank.groups[gi].questions[qi] = question;
    Ok(Some(()))
}

/// Returns `false` when no group has that id.
pub fn update_group(bank: &mut Bank, group_id: &str, domain: Option<&str>, context: Option<&str>) -> bool {
    let Some(group) = bank.groups.iter_mut().find(|g| g.id == group_id) else {
        return false;
    };
    if let Some(domain) = domain {
        let domain = domain.trim();
        group.domain = if domain.is_empty() { DEFAULT_DOMAIN.to_string() } else { domain.to_string() };
    }
    if let Some(context) = context {
        group.context = context.trim().to_string();
    }
    true
}

pub fn flatten(bank: &Bank) -> Vec<FlatQuestion> {
    bank.groups
        .iter()
        .flat_map(|group| {
            group.questions.iter().map(move |q| FlatQuestion {
                question: q.clone(),
                domain: group.domain.clone(),
                group_id: group.id.clone(),
                group_context: group.context.clone(),
            })
        })
        .collect()
}

/// The bank restricted to `group_ids`, or the whole bank for `None`.
pub fn build_export_payload(bank: &Bank, group_ids: Option<&[String]>) -> Bank {
    let groups = match group_ids {
        None => bank.groups.clone(),
        Some(ids) => bank
            .groups
            .iter()
            .filter(|g| ids.iter().any(|id| *id == g.id))
            .cloned()
            .collect(),
    };
    Bank {
        version: BANK_VERSION,
        groups,
    }
}

pub fn domains(bank: &Bank) -> Vec<String> {
    let mut domains: Vec<String> = bank.groups.iter().map(|g| g.domain.clone()).collect();
    domains.sort();
    domains.dedup();
    domains
}

/// Exact domain match plus a case-insensitive substring search over the
/// question, its choices, explanation and group context.
pub fn filter_questions(questions: Vec<FlatQuestion>, domain: Option<&str>, search: Option<&str>) -> Vec<FlatQuestion> {
    let term = search.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty());
    questions
        .into_iter()
        .filter(|q| domain.map_or(true, |d| d.is_empty() || q.domain == d))
        .filter(|q| {
            let Some(term) = term.as_deref() else {
                return true;
            };
            q.question.question.to_lowercase().contains(term)
                || q.question.explanation.to_lowercase().contains(term)
                || q.group_context.to_lowercase().contains(term)
                || q.question.choices.iter().any(|c| c.to_lowercase().contains(term))
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Attempt {
    pub question_id: String,
    pub selected: Vec<usize>,
    pub is_correct: bool,
}

/// Flat list of missed questions, keyed by question id.
pub struct WrongAnswerLog {
    path: PathBuf,
}

impl WrongAnswerLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Unreadable files and malformed entries are skipped.
    pub fn load(&self) -> Vec<WrongAnswerEntry> {
        let Some(Value::Array(items)) = read_json(&self.path) else {
            return Vec::new();
        };
        items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("skipping malformed wrong-answer entry in {:?}: {}", self.path, err);
                    None
                }
            })
            .collect()
    }

    pub fn save(&self, entries: &[WrongAnswerEntry]) -> Result<(), StoreError> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(entries)?)
    }

    pub fn record_attempts(&self, attempts: &[Attempt]) -> Result<(), StoreError> {
        self.record_attempts_at(attempts, chrono::Utc::now().naive_utc())
    }

    /// A correct answer clears the question's entry; a wrong one bumps it.
    pub fn record_attempts_at(&self, attempts: &[Attempt], now: NaiveDateTime) -> Result<(), StoreError> {
        if attempts.is_empty() {
            return Ok(());
        }
        let mut entries = self.load();
        for attempt in attempts {
            let existing = entries.iter().position(|e| e.question_id == attempt.question_id);
            match (attempt.is_correct, existing) {
                (true, Some(pos)) => {
                    entries.remove(pos);
                }
                (true, None) => {}
                (false, Some(pos)) => {
                    let entry = &mut entries[pos];
                    entry.wrong_count += 1;
                    entry.last_attempt = now;
                    entry.last_answer = attempt.selected.clone();
                }
                (false, None) => entries.push(WrongAnswerEntry {
                    question_id: attempt.question_id.clone(),
                    wrong_count: 1,
                    last_attempt: now,
                    last_answer: attempt.selected.clone(),
                }),
            }
        }
        self.save(&entries)
    }

    /// Drops entries for deleted questions; returns how many went away.
    pub fn prune(&self, question_ids: &HashSet<String>) -> Result<usize, StoreError> {
        if question_ids.is_empty() {
            return Ok(0);
        }
        let mut entries = self.load();
        let before = entries.len();
        entries.retain(|e| !question_ids.contains(&e.question_id));
        let removed = before - entries.len();
        if removed > 0 {
            self.save(&entries)?;
        }
        Ok(removed)
    }
}

fn read_json(path: &Path) -> Option<Value> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!("failed to read {:?}: {}", path, err);
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("failed to parse {:?}: {}", path, err);
            None
        }
    }
}

/// Writes a sibling temp file, syncs it, then renames it over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    {
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    fs::rename(&tmp, path).map_err(io_err)
}
