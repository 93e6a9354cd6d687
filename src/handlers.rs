use crate::ai::strip_code_fences;
use crate::error::{AppError, ErrorDetail};
use crate::import::{import_payload, import_transcript};
use crate::models::{Bank, FlatQuestion, PracticeTest, TestMode, TestQuestionView, TestResult};
use crate::practice::{assemble_review, assemble_test, grade, review_questions};
use crate::session::SessionData;
use crate::state::AppState;
use crate::store::{
    build_export_payload, domains, filter_questions, flatten, remove_groups_by_id, remove_questions_by_id,
    update_group as apply_group_update, update_question as apply_question_update,
};
use crate::transcript::{parse_transcript, QuestionDraft};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::info;
use validator::Validate;

const SESSION_COOKIE: &str = "practice_session";
const DEFAULT_PER_PAGE: usize = 20;
const MAX_PER_PAGE: usize = 200;

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Resolves the caller's practice session, issuing a fresh cookie when the
/// presented one is missing or expired.
fn practice_session(jar: CookieJar, state: &AppState) -> (CookieJar, String) {
    let presented = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    let token = state.sessions.get_or_create(presented.as_deref());
    if presented.as_deref() == Some(token.as_str()) {
        return (jar, token);
    }
    let cookie = Cookie::build((SESSION_COOKIE, token.clone()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build();
    (jar.add(cookie), token)
}

fn payload_errors(errors: validator::ValidationErrors, req_id: String) -> AppError {
    let details = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| ErrorDetail {
                field: field.to_string(),
                issue: e.message.as_ref().map(|m| m.to_string()).unwrap_or_else(|| e.code.to_string()),
            })
        })
        .collect();
    AppError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "invalid request payload", req_id).with_details(details)
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub domain: Option<String>,
    pub q: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct QuestionPage {
    pub questions: Vec<FlatQuestion>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub domains: Vec<String>,
}

pub async fn list_questions(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Json<QuestionPage> {
    let bank = state.bank.load();
    let filtered = filter_questions(flatten(&bank), query.domain.as_deref(), query.q.as_deref());
    let per_page = query.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    let page = query.page.unwrap_or(1).max(1);
    let total = filtered.len();
    let questions = filtered.into_iter().skip((page - 1).saturating_mul(per_page)).take(per_page).collect();
    Json(QuestionPage {
        questions,
        total,
        page,
        per_page,
        domains: domains(&bank),
    })
}

pub async fn get_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<FlatQuestion>, AppError> {
    let bank = state.bank.load();
    flatten(&bank)
        .into_iter()
        .find(|q| q.question.id == id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("question", request_id_from_headers(&headers)))
}

pub async fn update_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<FlatQuestion>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let _guard = state.write_lock.lock().await;
    let mut bank = state.bank.load();
    match apply_question_update(&mut bank, &id, &payload) {
        Ok(Some(())) => {}
        Ok(None) => return Err(AppError::not_found("question", req_id)),
        Err(err) => return Err(AppError::validation(&err, req_id)),
    }
    state.bank.save(&bank).map_err(|e| AppError::store(&e, req_id.clone()))?;
    flatten(&bank)
        .into_iter()
        .find(|q| q.question.id == id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("question", req_id))
}

/// Saves the bank and drops wrong-log entries for the removed questions.
fn commit_removal(state: &AppState, bank: &Bank, removed: &[String], req_id: &str) -> Result<(), AppError> {
    state.bank.save(bank).map_err(|e| AppError::store(&e, req_id))?;
    let ids: HashSet<String> = removed.iter().cloned().collect();
    let pruned = state.wrong_answers.prune(&ids).map_err(|e| AppError::store(&e, req_id))?;
    info!(removed = removed.len(), pruned, "questions deleted");
    Ok(())
}

pub async fn delete_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let req_id = request_id_from_headers(&headers);
    let _guard = state.write_lock.lock().await;
    let mut bank = state.bank.load();
    let removed = remove_questions_by_id(&mut bank, &HashSet::from([id]));
    if removed.is_empty() {
        return Err(AppError::not_found("question", req_id));
    }
    commit_removal(&state, &bank, &removed, &req_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkDeletePayload {
    #[validate(length(min = 1, message = "at least one id is required"))]
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: usize,
}

pub async fn delete_questions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<BulkDeletePayload>,
) -> Result<Json<DeletedResponse>, AppError> {
    let req_id = request_id_from_headers(&headers);
    payload.validate().map_err(|e| payload_errors(e, req_id.clone()))?;
    let _guard = state.write_lock.lock().await;
    let mut bank = state.bank.load();
    let ids: HashSet<String> = payload.ids.into_iter().collect();
    let removed = remove_questions_by_id(&mut bank, &ids);
    if !removed.is_empty() {
        commit_removal(&state, &bank, &removed, &req_id)?;
    }
    Ok(Json(DeletedResponse { deleted: removed.len() }))
}

#[derive(Debug, Serialize)]
pub struct GroupSummary {
    pub id: String,
    pub domain: String,
    pub context: String,
    pub question_count: usize,
}

pub async fn list_groups(State(state): State<AppState>) -> Json<Vec<GroupSummary>> {
    let bank = state.bank.load();
    Json(
        bank.groups
            .iter()
            .map(|g| GroupSummary {
                id: g.id.clone(),
                domain: g.domain.clone(),
                context: g.context.clone(),
                question_count: g.questions.len(),
            })
            .collect(),
    )
}

#[derive(Debug, Deserialize)]
pub struct GroupMetaPayload {
    pub domain: Option<String>,
    pub context: Option<String>,
}

pub async fn update_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<GroupMetaPayload>,
) -> Result<Json<GroupSummary>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let _guard = state.write_lock.lock().await;
    let mut bank = state.bank.load();
    if !apply_group_update(&mut bank, &id, payload.domain.as_deref(), payload.context.as_deref()) {
        return Err(AppError::not_found("group", req_id));
    }
    state.bank.save(&bank).map_err(|e| AppError::store(&e, req_id.clone()))?;
    bank.groups
        .iter()
        .find(|g| g.id == id)
        .map(|g| {
            Json(GroupSummary {
                id: g.id.clone(),
                domain: g.domain.clone(),
                context: g.context.clone(),
                question_count: g.questions.len(),
            })
        })
        .ok_or_else(|| AppError::not_found("group", req_id))
}

pub async fn delete_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let req_id = request_id_from_headers(&headers);
    let _guard = state.write_lock.lock().await;
    let mut bank = state.bank.load();
    if !bank.groups.iter().any(|g| g.id == id) {
        return Err(AppError::not_found("group", req_id));
    }
    let removed = remove_groups_by_id(&mut bank, &HashSet::from([id]));
    commit_removal(&state, &bank, &removed, &req_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn import_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<crate::import::ImportSummary>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let _guard = state.write_lock.lock().await;
    let summary = import_payload(&state.bank, &payload).map_err(|e| AppError::import(e, req_id))?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize, Validate)]
pub struct TranscriptPayload {
    #[validate(length(min = 1, message = "transcript text is required"))]
    pub text: String,
    pub domain: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct TranscriptPreview {
    pub count: usize,
    pub drafts: Vec<QuestionDraft>,
}

pub async fn import_transcript_text(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<TranscriptPayload>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    payload.validate().map_err(|e| payload_errors(e, req_id.clone()))?;
    let domain = payload.domain.as_deref().unwrap_or_default();
    if payload.dry_run {
        let drafts = parse_transcript(&payload.text, domain).map_err(|e| AppError::transcript(&e, req_id))?;
        let preview = TranscriptPreview {
            count: drafts.len(),
            drafts,
        };
        return Ok(Json(serde_json::json!(preview)));
    }
    let _guard = state.write_lock.lock().await;
    let summary = import_transcript(&state.bank, &payload.text, domain).map_err(|e| AppError::import(e, req_id))?;
    Ok(Json(serde_json::json!(summary)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AiImportPayload {
    #[validate(length(min = 1, message = "text is required"))]
    pub text: String,
    pub domain: Option<String>,
}

pub async fn import_ai(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AiImportPayload>,
) -> Result<Json<crate::import::ImportSummary>, AppError> {
    let req_id = request_id_from_headers(&headers);
    if !state.extractor.is_enabled() {
        return Err(AppError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "AI_DISABLED",
            "ai extraction is not configured",
            req_id,
        ));
    }
    payload.validate().map_err(|e| payload_errors(e, req_id.clone()))?;
    let domain = payload
        .domain
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(crate::models::DEFAULT_DOMAIN);

    let raw = state.extractor.extract(&payload.text, domain).await.map_err(|e| {
        AppError::new(
            StatusCode::BAD_GATEWAY,
            "UPSTREAM_ERROR",
            format!("ai extraction failed: {}", e),
            req_id.clone(),
        )
    })?;
    let json_value: serde_json::Value = serde_json::from_str(&strip_code_fences(&raw)).map_err(|e| {
        AppError::new(
            StatusCode::BAD_GATEWAY,
            "UPSTREAM_ERROR",
            format!("ai result is not valid json: {}", e),
            req_id.clone(),
        )
    })?;

    let compiled = jsonschema::draft202012::new(&state.import_schema).map_err(|_| {
        AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "schema build failed", req_id.clone())
    })?;
    if compiled.validate(&json_value).is_err() {
        let details = compiled
            .iter_errors(&json_value)
            .map(|e| ErrorDetail {
                field: e.instance_path.to_string(),
                issue: e.to_string(),
            })
            .collect();
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "ai payload does not match schema",
            req_id,
        )
        .with_details(details));
    }

    let _guard = state.write_lock.lock().await;
    let summary = import_payload(&state.bank, &json_value).map_err(|e| AppError::import(e, req_id))?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub groups: Option<String>,
}

pub async fn export_bank(State(state): State<AppState>, Query(query): Query<ExportQuery>) -> Json<Bank> {
    let bank = state.bank.load();
    let selected: Option<Vec<String>> = query
        .groups
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|ids| !ids.is_empty());
    Json(build_export_payload(&bank, selected.as_deref()))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTestPayload {
    pub domain: Option<String>,
    /// Omitted or 0 means every available question.
    #[validate(range(max = 1000, message = "count is too large"))]
    pub count: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TestView {
    pub mode: TestMode,
    pub created_at: NaiveDateTime,
    pub total: usize,
    pub questions: Vec<TestQuestionView>,
}

impl From<&PracticeTest> for TestView {
    fn from(test: &PracticeTest) -> Self {
        Self {
            mode: test.mode,
            created_at: test.created_at,
            total: test.questions.len(),
            questions: test.questions.iter().map(TestQuestionView::from).collect(),
        }
    }
}

fn start_test(
    state: &AppState,
    jar: CookieJar,
    test: Option<PracticeTest>,
    req_id: String,
) -> Result<(CookieJar, Json<TestView>), AppError> {
    let test = test.ok_or_else(|| {
        AppError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "no questions available for this test", req_id)
    })?;
    let (jar, token) = practice_session(jar, state);
    let mut session = state.sessions.read(&token).unwrap_or_default();
    let view = TestView::from(&test);
    session.current_test = Some(test);
    state.sessions.write(&token, session);
    Ok((jar, Json(view)))
}

pub async fn create_test(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<CreateTestPayload>,
) -> Result<(CookieJar, Json<TestView>), AppError> {
    let req_id = request_id_from_headers(&headers);
    payload.validate().map_err(|e| payload_errors(e, req_id.clone()))?;
    let bank = state.bank.load();
    let test = assemble_test(
        flatten(&bank),
        payload.domain.as_deref(),
        payload.count.unwrap_or(0),
        TestMode::Standard,
        &mut rand::thread_rng(),
    );
    start_test(&state, jar, test, req_id)
}

pub async fn current_test(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<TestView>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let (jar, token) = practice_session(jar, &state);
    let session = state.sessions.read(&token).unwrap_or_default();
    let test = session.current_test.ok_or_else(|| AppError::not_found("test", req_id))?;
    Ok((jar, Json(TestView::from(&test))))
}

#[derive(Debug, Deserialize)]
pub struct SubmitPayload {
    #[serde(default)]
    pub answers: HashMap<String, Vec<usize>>,
}

pub async fn submit_test(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<SubmitPayload>,
) -> Result<(CookieJar, Json<TestResult>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let (jar, token) = practice_session(jar, &state);
    let session = state.sessions.read(&token).unwrap_or_default();
    let test = session
        .current_test
        .ok_or_else(|| AppError::not_found("test", req_id.clone()))?;

    let (result, attempts) = grade(&test, &payload.answers);
    {
        let _guard = state.write_lock.lock().await;
        state
            .wrong_answers
            .record_attempts(&attempts)
            .map_err(|e| AppError::store(&e, req_id))?;
    }
    info!(score = result.score, total = result.total_questions, "test graded");
    state.sessions.write(
        &token,
        SessionData {
            current_test: None,
            last_results: Some(result.clone()),
        },
    );
    Ok((jar, Json(result)))
}

pub async fn last_results(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<TestResult>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let (jar, token) = practice_session(jar, &state);
    let result = state
        .sessions
        .read(&token)
        .and_then(|s| s.last_results)
        .ok_or_else(|| AppError::not_found("result", req_id))?;
    Ok((jar, Json(result)))
}

#[derive(Debug, Serialize)]
pub struct ReviewEntry {
    #[serde(flatten)]
    pub question: FlatQuestion,
    pub wrong_count: u32,
    pub last_attempt: NaiveDateTime,
    pub last_answer: Vec<usize>,
}

pub async fn list_review(State(state): State<AppState>) -> Json<Vec<ReviewEntry>> {
    let bank = state.bank.load();
    let wrong = state.wrong_answers.load();
    let by_id: HashMap<String, FlatQuestion> = review_questions(&bank, &wrong)
        .into_iter()
        .map(|q| (q.question.id.clone(), q))
        .collect();
    Json(
        wrong
            .into_iter()
            .filter_map(|entry| {
                by_id.get(&entry.question_id).map(|q| ReviewEntry {
                    question: q.clone(),
                    wrong_count: entry.wrong_count,
                    last_attempt: entry.last_attempt,
                    last_answer: entry.last_answer,
                })
            })
            .collect(),
    )
}

pub async fn create_review_test(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<CreateTestPayload>,
) -> Result<(CookieJar, Json<TestView>), AppError> {
    let req_id = request_id_from_headers(&headers);
    payload.validate().map_err(|e| payload_errors(e, req_id.clone()))?;
    let bank = state.bank.load();
    let wrong = state.wrong_answers.load();
    let test = assemble_review(&bank, &wrong, payload.count.unwrap_or(0), &mut rand::thread_rng());
    start_test(&state, jar, test, req_id)
}
