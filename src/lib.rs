pub mod ai;
pub mod answers;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod import;
pub mod models;
pub mod practice;
pub mod routes;
pub mod sanitize;
pub mod session;
pub mod state;
pub mod store;
pub mod transcript;

use std::sync::Arc;

pub fn build_state(config: state::Config) -> anyhow::Result<state::AppState> {
    let extractor: Arc<dyn ai::QuestionExtractor> = if let Some(real) = ai::OpenAiExtractor::from_env() {
        Arc::new(real)
    } else {
        Arc::new(ai::DisabledExtractor)
    };
    build_state_with(config, extractor)
}

pub fn build_state_with(
    config: state::Config,
    extractor: Arc<dyn ai::QuestionExtractor>,
) -> anyhow::Result<state::AppState> {
    let schema_raw = include_str!("../contracts/import_payload.schema.json");
    let schema: serde_json::Value = serde_json::from_str(schema_raw)?;
    jsonschema::draft202012::new(&schema).map_err(|e| anyhow::anyhow!("import schema is invalid: {e}"))?;
    let sessions = Arc::new(session::InMemorySessionStore::new(config.session_ttl));
    Ok(state::AppState::new(config, sessions, extractor, schema))
}
