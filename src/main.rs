use question_bank::{build_state, routes::build_router, state::Config};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Config::from_env();
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(
        questions = %config.questions_path.display(),
        wrong_answers = %config.wrong_answers_path.display(),
        "using data files"
    );

    let state = build_state(config)?;
    if !state.extractor.is_enabled() {
        tracing::info!("AI_API_KEY not set, ai import disabled");
    }
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("backend listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
