use crate::handlers;
use crate::state::AppState;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_credentials(true)
        .allow_origin([
            HeaderValue::from_static("http://localhost:5173"),
            HeaderValue::from_static("http://127.0.0.1:5173"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::header::COOKIE,
            axum::http::HeaderName::from_static("x-request-id"),
        ]);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/questions", get(handlers::list_questions))
        .route("/api/v1/questions/delete", post(handlers::delete_questions))
        .route(
            "/api/v1/questions/:id",
            get(handlers::get_question)
                .put(handlers::update_question)
                .delete(handlers::delete_question),
        )
        .route("/api/v1/groups", get(handlers::list_groups))
        .route(
            "/api/v1/groups/:id",
            put(handlers::update_group).delete(handlers::delete_group),
        )
        .route("/api/v1/import", post(handlers::import_json))
        .route("/api/v1/import/transcript", post(handlers::import_transcript_text))
        .route("/api/v1/import/ai", post(handlers::import_ai))
        .route("/api/v1/export", get(handlers::export_bank))
        .route("/api/v1/tests", post(handlers::create_test))
        .route("/api/v1/tests/current", get(handlers::current_test))
        .route("/api/v1/tests/submit", post(handlers::submit_test))
        .route("/api/v1/results/last", get(handlers::last_results))
        .route("/api/v1/review", get(handlers::list_review))
        .route("/api/v1/review/tests", post(handlers::create_review_test))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
