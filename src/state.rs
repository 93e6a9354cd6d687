use crate::ai::QuestionExtractor;
use crate::session::SessionStore;
use crate::store::{BankStore, WrongAnswerLog};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct Config {
    pub questions_path: PathBuf,
    pub wrong_answers_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub session_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("DATA_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "./data".to_string());
        let mut config = Self::for_data_dir(data_dir);
        if let Some(path) = std::env::var("QUESTIONS_PATH").ok().filter(|v| !v.trim().is_empty()) {
            config.questions_path = path.into();
        }
        if let Some(path) = std::env::var("WRONG_ANSWERS_PATH").ok().filter(|v| !v.trim().is_empty()) {
            config.wrong_answers_path = path.into();
        }
        config.host = std::env::var("BACKEND_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        config.port = std::env::var("BACKEND_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        if let Some(secs) = std::env::var("SESSION_TTL_SECS").ok().and_then(|v| v.parse::<u64>().ok()) {
            config.session_ttl = Duration::from_secs(secs);
        }
        config
    }

    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            questions_path: data_dir.join("questions.json"),
            wrong_answers_path: data_dir.join("wrong_questions.json"),
            host: "127.0.0.1".to_string(),
            port: 8080,
            session_ttl: Duration::from_secs(7200),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub bank: Arc<BankStore>,
    pub wrong_answers: Arc<WrongAnswerLog>,
    pub sessions: Arc<dyn SessionStore>,
    pub extractor: Arc<dyn QuestionExtractor>,
    pub import_schema: Arc<serde_json::Value>,
    /// Held across every read-modify-write of the data files.
    pub write_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        config: Config,
        sessions: Arc<dyn SessionStore>,
        extractor: Arc<dyn QuestionExtractor>,
        import_schema: serde_json::Value,
    ) -> Self {
        Self {
            bank: Arc::new(BankStore::new(config.questions_path.clone())),
            wrong_answers: Arc::new(WrongAnswerLog::new(config.wrong_answers_path.clone())),
            config: Arc::new(config),
            sessions,
            extractor,
            import_schema: Arc::new(import_schema),
            write_lock: Arc::new(Mutex::new(())),
        }
    }
}
