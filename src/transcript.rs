//! Parser for pasted exam transcripts: numbered questions with lettered
//! choices, followed by an answer key under an English or Chinese heading.
//!
//! Structure is read permissively. The cross-reference between questions and
//! answers is strict: any question without a usable answer rejects the whole
//! transcript.

use crate::error::TranscriptError;
use crate::models::DEFAULT_DOMAIN;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

static QUESTION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:[Qq](?:uestion)?\s*)?(\d{1,3})\s*([.．)）、:：])(\s*)(.*)$").unwrap()
});

static CHOICE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[(（]?([A-La-l])\s*([.．)）、:：])(\s*)(.*)$").unwrap());

static CONTEXT_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:(?:scenario|case\s+study|context|passage|background)\b|questions?\s+\d+\s*(?:-|–|~|to|through|and)\s*\d+|(?:use|refer\s+to)\s+the\s+following|材料|案例|背景|阅读)",
    )
    .unwrap()
});

static ANSWER_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*[#*\[【(（]*\s*(?:answer\s*key|answers?|参考答案|答案(?:与解析|及解析)?|解答|解析)\s*[\]】)）*]*\s*[:：]?\s*$",
    )
    .unwrap()
});

static ANSWER_HEADING_LOOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*answers?\s*[:：](.*)$").unwrap());

static ANSWER_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:[Qq](?:uestion)?\s*)?(\d{1,3})\s*[.．)）、:：\-–]\s*(.*)$").unwrap()
});

static COMPACT_ANSWER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\d{1,3}\s*[.．)）、:：\-–]\s*(?:[A-L]{1,6}|[a-l])\s*[,，;；]?\s*)+$").unwrap()
});

static COMPACT_ANSWER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,3})\s*[.．)）、:：\-–]\s*([A-L]{1,6}|[a-l])").unwrap());

static LEADING_ANSWER_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:answer\s*key|answers?|正确答案|参考答案|答案|解答)\s*(?:is\b)?\s*[:：]?\s*").unwrap()
});

static EXPLANATION_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:解析|说明|說明|理由|\b(?:explanation|rationale|reason)\b)\s*[:：]?\s*").unwrap()
});

static EXPLANATION_CLAUSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(?:因为|因為|\bbecause\b)").unwrap());

static ANSWER_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\s,，、/／;；&]+").unwrap());

static UPPER_ANSWER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:[A-L]+|[a-l])$").unwrap());

static LETTER_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]+").unwrap());

static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// One question recovered from a transcript, answers already resolved to
/// 0-based indices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionDraft {
    pub number: u32,
    pub question: String,
    pub choices: Vec<String>,
    pub correct_answers: Vec<usize>,
    pub domain: String,
    pub comment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Scanning,
    InQuestion,
    InChoice,
}

struct OpenQuestion {
    number: u32,
    context: String,
    body: Vec<String>,
    choices: Vec<(char, Vec<String>)>,
}

struct ParsedQuestion {
    number: u32,
    text: String,
    labels: Vec<char>,
    choices: Vec<String>,
}

#[derive(Default)]
struct AnswerEntry {
    letters: Vec<char>,
    comment: Vec<String>,
}

pub fn parse_transcript(raw: &str, domain: &str) -> Result<Vec<QuestionDraft>, TranscriptError> {
    let domain = match domain.trim() {
        "" => DEFAULT_DOMAIN.to_string(),
        d => d.to_string(),
    };
    let lines: Vec<&str> = raw.lines().collect();
    let (question_lines, answer_lines) = split_sections(&lines)?;

    let questions = parse_questions(question_lines)?;
    if questions.is_empty() {
        return Err(TranscriptError::NoQuestions);
    }
    let mut answers = parse_answers(&answer_lines)?;

    let mut drafts = Vec::with_capacity(questions.len());
    for question in questions {
        let entry = answers
            .remove(&question.number)
            .ok_or(TranscriptError::MissingAnswer { number: question.number })?;
        let mut indices = Vec::new();
        for letter in &entry.letters {
            let idx = question
                .labels
                .iter()
                .position(|l| l == letter)
                .ok_or(TranscriptError::InvalidAnswerLetter {
                    number: question.number,
                    letter: *letter,
                })?;
            indices.push(idx);
        }
        indices.sort_unstable();
        indices.dedup();
        if indices.is_empty() {
            return Err(TranscriptError::NoAnswerLetters { number: question.number });
        }
        drafts.push(QuestionDraft {
            number: question.number,
            question: question.text,
            choices: question.choices,
            correct_answers: indices,
            domain: domain.clone(),
            comment: collapse_block(&entry.comment),
        });
    }
    if !answers.is_empty() {
        let mut extra: Vec<u32> = answers.into_keys().collect();
        extra.sort_unstable();
        debug!("answer key entries without a question: {:?}", extra);
    }
    Ok(drafts)
}

/// Splits at the first answer heading. Text after a loose `Answers:` on the
/// same line is kept as the first answer line.
fn split_sections<'a>(lines: &'a [&'a str]) -> Result<(&'a [&'a str], Vec<&'a str>), TranscriptError> {
    if let Some(pos) = lines.iter().position(|l| ANSWER_HEADING.is_match(l)) {
        return Ok((&lines[..pos], lines[pos + 1..].to_vec()));
    }
    for (pos, line) in lines.iter().enumerate() {
        if let Some(caps) = ANSWER_HEADING_LOOSE.captures(line) {
            let mut answer_lines = Vec::with_capacity(lines.len() - pos);
            if let Some(rest) = caps.get(1).map(|m| m.as_str()).filter(|s| !s.trim().is_empty()) {
                answer_lines.push(rest);
            }
            answer_lines.extend_from_slice(&lines[pos + 1..]);
            return Ok((&lines[..pos], answer_lines));
        }
    }
    Err(TranscriptError::MissingAnswerSection)
}

fn parse_questions(lines: &[&str]) -> Result<Vec<ParsedQuestion>, TranscriptError> {
    let mut parsed = Vec::new();
    let mut seen = HashSet::new();
    let mut pending_context: Vec<String> = Vec::new();
    let mut active_context = String::new();
    let mut current: Option<OpenQuestion> = None;
    let mut state = State::Scanning;

    for line in lines {
        if let Some((number, rest)) = match_question_start(line) {
            if let Some(open) = current.take() {
                parsed.push(close_question(open)?);
            }
            if !seen.insert(number) {
                return Err(TranscriptError::DuplicateQuestion { number });
            }
            let context = collapse_block(&pending_context);
            if !context.is_empty() {
                active_context = context;
            }
            pending_context.clear();
            current = Some(OpenQuestion {
                number,
                context: active_context.clone(),
                body: vec![rest.to_string()],
                choices: Vec::new(),
            });
            state = State::InQuestion;
            continue;
        }

        let Some(open) = current.as_mut() else {
            pending_context.push(line.to_string());
            continue;
        };
        if let Some((letter, rest)) = match_choice_start(line) {
            open.choices.push((letter, vec![rest.to_string()]));
            state = State::InChoice;
        } else if state == State::InChoice && CONTEXT_START.is_match(line) {
            if let Some(done) = current.take() {
                parsed.push(close_question(done)?);
            }
            pending_context.push(line.to_string());
            state = State::Scanning;
        } else if let (State::InChoice, Some((_, choice_lines))) = (state, open.choices.last_mut()) {
            choice_lines.push(line.to_string());
        } else {
            open.body.push(line.to_string());
        }
    }
    if let Some(open) = current.take() {
        parsed.push(close_question(open)?);
    }
    Ok(parsed)
}

fn match_question_start(line: &str) -> Option<(u32, &str)> {
    let caps = QUESTION_LINE.captures(line)?;
    let separator = caps.get(2)?.as_str();
    let spaced = !caps.get(3)?.as_str().is_empty();
    let rest = caps.get(4)?.as_str();
    // "3.5 percent" or "10:30" are text, not numbering.
    if !spaced && matches!(separator, "." | ":") && rest.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    Some((caps.get(1)?.as_str().parse().ok()?, rest))
}

fn match_choice_start(line: &str) -> Option<(char, &str)> {
    let caps = CHOICE_LINE.captures(line)?;
    let letter = caps.get(1)?.as_str().chars().next()?;
    let spaced = !caps.get(3)?.as_str().is_empty();
    let rest = caps.get(4)?.as_str();
    // Lowercase labels need a space after the separator so "e.g." stays text.
    if letter.is_ascii_lowercase() && !spaced && !rest.is_empty() {
        return None;
    }
    Some((letter.to_ascii_uppercase(), rest))
}

fn close_question(open: OpenQuestion) -> Result<ParsedQuestion, TranscriptError> {
    let number = open.number;
    let body = collapse_block(&open.body);
    if body.is_empty() {
        return Err(TranscriptError::EmptyQuestion { number });
    }
    let text = if open.context.is_empty() {
        body
    } else {
        format!("{}\n\n{}", open.context, body)
    };

    let mut choices = open.choices;
    choices.sort_by_key(|(letter, _)| *letter);
    if let Some(pair) = choices.windows(2).find(|w| w[0].0 == w[1].0) {
        return Err(TranscriptError::DuplicateChoice { number, letter: pair[0].0 });
    }
    if choices.len() < 2 {
        return Err(TranscriptError::TooFewChoices {
            number,
            found: choices.len(),
        });
    }
    let (labels, choices) = choices
        .into_iter()
        .map(|(letter, lines)| (letter, collapse_block(&lines)))
        .unzip();
    Ok(ParsedQuestion {
        number,
        text,
        labels,
        choices,
    })
}

fn parse_answers(lines: &[&str]) -> Result<HashMap<u32, AnswerEntry>, TranscriptError> {
    let mut answers: HashMap<u32, AnswerEntry> = HashMap::new();
    let mut current: Option<u32> = None;

    for line in lines {
        if COMPACT_ANSWER_LINE.is_match(line) && COMPACT_ANSWER.find_iter(line).count() > 1 {
            for caps in COMPACT_ANSWER.captures_iter(line) {
                let Ok(number) = caps[1].parse::<u32>() else {
                    continue;
                };
                let letters = caps[2].chars().map(|c| c.to_ascii_uppercase()).collect();
                insert_answer(&mut answers, number, AnswerEntry { letters, comment: Vec::new() })?;
                current = Some(number);
            }
            continue;
        }
        if let Some(caps) = ANSWER_ENTRY.captures(line) {
            let Ok(number) = caps[1].parse::<u32>() else {
                continue;
            };
            let (letters, comment) = parse_answer_tail(&caps[2]);
            let comment = if comment.is_empty() { Vec::new() } else { vec![comment] };
            insert_answer(&mut answers, number, AnswerEntry { letters, comment })?;
            current = Some(number);
            continue;
        }
        if let Some(entry) = current.and_then(|n| answers.get_mut(&n)) {
            entry.comment.push(line.to_string());
        }
    }
    Ok(answers)
}

fn insert_answer(answers: &mut HashMap<u32, AnswerEntry>, number: u32, entry: AnswerEntry) -> Result<(), TranscriptError> {
    if answers.insert(number, entry).is_some() {
        return Err(TranscriptError::DuplicateAnswer { number });
    }
    Ok(())
}

/// Reads the letters and trailing explanation from the text after an answer
/// number, e.g. `"AC, Explanation: both apply"`.
fn parse_answer_tail(tail: &str) -> (Vec<char>, String) {
    let mut rest = tail.trim();
    while let Some(m) = LEADING_ANSWER_WORD.find(rest) {
        if m.end() == 0 {
            break;
        }
        rest = &rest[m.end()..];
    }

    let (answer_part, explanation) = split_explanation(rest);
    let (mut letters, remainder) = leading_letters(answer_part);
    if letters.is_empty() {
        // Last resort, prone to false positives: any lone capital A-L.
        letters = LETTER_RUN
            .find_iter(rest)
            .filter_map(|m| {
                let mut chars = m.as_str().chars();
                match (chars.next(), chars.next()) {
                    (Some(c @ 'A'..='L'), None) => Some(c),
                    _ => None,
                }
            })
            .collect();
        dedup_in_order(&mut letters);
    }
    let comment = explanation.unwrap_or(remainder);
    (letters, comment.trim().to_string())
}

fn split_explanation(text: &str) -> (&str, Option<&str>) {
    let label = EXPLANATION_LABEL.find(text);
    let clause = EXPLANATION_CLAUSE.find(text);
    match (label, clause) {
        (Some(l), Some(c)) if c.start() < l.start() => (&text[..c.start()], Some(trim_lead(&text[c.start()..]))),
        (Some(l), _) => (&text[..l.start()], Some(trim_lead(&text[l.end()..]))),
        (None, Some(c)) => (&text[..c.start()], Some(trim_lead(&text[c.start()..]))),
        (None, None) => (text, None),
    }
}

fn trim_lead(s: &str) -> &str {
    s.trim_start_matches(|c: char| c.is_whitespace() || "-–—:：".contains(c))
        .trim_end()
}

/// Collects answer tokens from the start of `text`; stops at the first word
/// that is not one. Returns the letters and the text left over.
fn leading_letters(text: &str) -> (Vec<char>, &str) {
    let mut letters = Vec::new();
    for m in ANSWER_TOKEN.find_iter(text) {
        let token = m
            .as_str()
            .trim_matches(|c: char| "()（）[]【】.．。:：-–—\"'".contains(c));
        if token.is_empty() || token.eq_ignore_ascii_case("and") {
            continue;
        }
        if UPPER_ANSWER.is_match(token) {
            letters.extend(token.chars().map(|c| c.to_ascii_uppercase()));
            continue;
        }
        let remainder = if letters.is_empty() { "" } else { &text[m.start()..] };
        dedup_in_order(&mut letters);
        return (letters, remainder);
    }
    dedup_in_order(&mut letters);
    (letters, "")
}

fn dedup_in_order(letters: &mut Vec<char>) {
    let mut seen = HashSet::new();
    letters.retain(|c| seen.insert(*c));
}

/// Trims every line, drops leading/trailing blank lines and folds runs of
/// blank lines into one.
fn collapse_block<S: AsRef<str>>(lines: &[S]) -> String {
    let joined = lines
        .iter()
        .map(|l| l.as_ref().trim())
        .collect::<Vec<_>>()
        .join("\n");
    BLANK_RUNS.replace_all(joined.trim(), "\n\n").into_owned()
}
