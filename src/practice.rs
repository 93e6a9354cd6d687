use crate::models::{
    normalize_selection, score_answer, score_percent, Bank, FlatQuestion, PracticeTest, QuestionResult,
    TestMode, TestResult, WrongAnswerEntry,
};
use crate::store::{flatten, Attempt};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet};

/// `requested == 0` means "all available"; anything else is clamped to
/// `1..=available`.
pub fn clamp_count(requested: usize, available: usize) -> usize {
    let wanted = if requested == 0 { available } else { requested };
    wanted.min(available).max(1)
}

/// Uniform sample without replacement. `None` when nothing matches.
pub fn assemble_test<R: Rng + ?Sized>(
    questions: Vec<FlatQuestion>,
    domain: Option<&str>,
    requested: usize,
    mode: TestMode,
    rng: &mut R,
) -> Option<PracticeTest> {
    let pool: Vec<FlatQuestion> = questions
        .into_iter()
        .filter(|q| domain.map_or(true, |d| d.is_empty() || q.domain == d))
        .collect();
    if pool.is_empty() {
        return None;
    }
    let count = clamp_count(requested, pool.len());
    let picked = pool.choose_multiple(rng, count).cloned().collect();
    Some(PracticeTest {
        questions: picked,
        created_at: chrono::Utc::now().naive_utc(),
        mode,
    })
}

/// Review questions: everything the wrong-answer log still lists.
pub fn review_questions(bank: &Bank, wrong: &[WrongAnswerEntry]) -> Vec<FlatQuestion> {
    let ids: HashSet<&str> = wrong.iter().map(|w| w.question_id.as_str()).collect();
    flatten(bank)
        .into_iter()
        .filter(|q| ids.contains(q.question.id.as_str()))
        .collect()
}

/// Same sampling, restricted to questions the wrong-answer log still lists.
pub fn assemble_review<R: Rng + ?Sized>(
    bank: &Bank,
    wrong: &[WrongAnswerEntry],
    requested: usize,
    rng: &mut R,
) -> Option<PracticeTest> {
    assemble_test(review_questions(bank, wrong), None, requested, TestMode::Review, rng)
}

/// Grades a submission. Unanswered questions count as wrong with an empty
/// selection.
pub fn grade(test: &PracticeTest, submitted: &HashMap<String, Vec<usize>>) -> (TestResult, Vec<Attempt>) {
    let mut results = Vec::with_capacity(test.questions.len());
    let mut attempts = Vec::with_capacity(test.questions.len());
    let mut correct_count = 0;
    for flat in &test.questions {
        let raw = submitted.get(&flat.question.id).map(Vec::as_slice).unwrap_or(&[]);
        let selected = normalize_selection(&flat.question, raw);
        let is_correct = score_answer(&flat.question, &selected);
        if is_correct {
            correct_count += 1;
        }
        attempts.push(Attempt {
            question_id: flat.question.id.clone(),
            selected: selected.clone(),
            is_correct,
        });
        results.push(QuestionResult {
            question: flat.clone(),
            selected,
            is_correct,
            correct_answers: flat.question.correct_answers.clone(),
        });
    }
    let total_questions = test.questions.len();
    let result = TestResult {
        results,
        score: score_percent(correct_count, total_questions),
        correct_count,
        total_questions,
        mode: test.mode,
    };
    (result, attempts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Question;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn flat(id: &str, domain: &str) -> FlatQuestion {
        FlatQuestion {
            question: Question {
                id: id.into(),
                question: format!("Q{id}"),
                choices: vec!["a".into(), "b".into(), "c".into()],
                correct_answers: vec![1],
                explanation: String::new(),
            },
            domain: domain.into(),
            group_id: "g".into(),
            group_context: String::new(),
        }
    }

    #[test]
    fn counts_are_clamped() {
        assert_eq!(clamp_count(0, 5), 5);
        assert_eq!(clamp_count(3, 5), 3);
        assert_eq!(clamp_count(50, 5), 5);
    }

    #[test]
    fn assembly_filters_by_domain() {
        let mut rng = StdRng::seed_from_u64(7);
        let pool = vec![flat("1", "A"), flat("2", "B"), flat("3", "A")];
        let test = assemble_test(pool.clone(), Some("A"), 10, TestMode::Standard, &mut rng).unwrap();
        assert_eq!(test.questions.len(), 2);
        assert!(test.questions.iter().all(|q| q.domain == "A"));
        let ids: HashSet<_> = test.questions.iter().map(|q| q.question.id.clone()).collect();
        assert_eq!(ids.len(), 2);

        assert!(assemble_test(pool.clone(), Some("Z"), 1, TestMode::Standard, &mut rng).is_none());
        let one = assemble_test(pool, None, 1, TestMode::Review, &mut rng).unwrap();
        assert_eq!(one.questions.len(), 1);
        assert_eq!(one.mode, TestMode::Review);
    }

    #[test]
    fn grading_scores_and_reports_attempts() {
        let mut rng = StdRng::seed_from_u64(1);
        let test = assemble_test(vec![flat("1", "A"), flat("2", "A"), flat("3", "A")], None, 0, TestMode::Standard, &mut rng)
            .unwrap();
        let submitted = HashMap::from([
            ("1".to_string(), vec![1, 1]),
            ("2".to_string(), vec![0]),
        ]);
        let (result, attempts) = grade(&test, &submitted);
        assert_eq!(result.total_questions, 3);
        assert_eq!(result.correct_count, 1);
        assert_eq!(result.score, 33.33);
        let wrong: Vec<_> = attempts.iter().filter(|a| !a.is_correct).map(|a| a.question_id.as_str()).collect();
        assert_eq!(wrong.len(), 2);
        assert!(wrong.contains(&"3"));
    }

    #[test]
    fn review_draws_only_logged_questions() {
        let bank = Bank {
            version: crate::models::BANK_VERSION,
            groups: vec![crate::models::Group {
                id: "g".into(),
                domain: "A".into(),
                context: String::new(),
                questions: vec![flat("1", "A").question, flat("2", "A").question],
            }],
        };
        let wrong = vec![WrongAnswerEntry {
            question_id: "2".into(),
            wrong_count: 3,
            last_attempt: chrono::Utc::now().naive_utc(),
            last_answer: vec![0],
        }];
        let mut rng = StdRng::seed_from_u64(3);
        let test = assemble_review(&bank, &wrong, 0, &mut rng).unwrap();
        assert_eq!(test.mode, TestMode::Review);
        assert_eq!(test.questions.len(), 1);
        assert_eq!(test.questions[0].question.id, "2");
        assert!(assemble_review(&bank, &[], 5, &mut rng).is_none());
    }
}
