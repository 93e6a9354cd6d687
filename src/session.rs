use crate::models::{PracticeTest, TestResult};
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// What one browser session carries between requests.
#[derive(Debug, Clone, Default)]
pub struct SessionData {
    pub current_test: Option<PracticeTest>,
    pub last_results: Option<TestResult>,
}

/// Session state keyed by an opaque token. Handlers receive an implementation
/// through [`crate::state::AppState`].
pub trait SessionStore: Send + Sync {
    /// Returns `token` when it names a live session, otherwise a new token.
    fn get_or_create(&self, token: Option<&str>) -> String;
    fn read(&self, token: &str) -> Option<SessionData>;
    fn write(&self, token: &str, data: SessionData);
    fn expire(&self, token: &str);
}

struct Entry {
    data: SessionData,
    last_seen: Instant,
}

pub struct InMemorySessionStore {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Drops every session idle for longer than the ttl.
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.last_seen.elapsed() <= ttl);
    }

    fn is_live(&self, token: &str) -> bool {
        match self.entries.get(token) {
            Some(entry) => entry.last_seen.elapsed() <= self.ttl,
            None => false,
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn get_or_create(&self, token: Option<&str>) -> String {
        if let Some(token) = token.filter(|t| self.is_live(t)) {
            if let Some(mut entry) = self.entries.get_mut(token) {
                entry.last_seen = Instant::now();
            }
            return token.to_string();
        }
        self.purge_expired();
        let token = uuid::Uuid::new_v4().to_string();
        self.entries.insert(
            token.clone(),
            Entry {
                data: SessionData::default(),
                last_seen: Instant::now(),
            },
        );
        token
    }

    fn read(&self, token: &str) -> Option<SessionData> {
        if !self.is_live(token) {
            self.entries.remove(token);
            return None;
        }
        let mut entry = self.entries.get_mut(token)?;
        entry.last_seen = Instant::now();
        Some(entry.data.clone())
    }

    fn write(&self, token: &str, data: SessionData) {
        self.entries.insert(
            token.to_string(),
            Entry {
                data,
                last_seen: Instant::now(),
            },
        );
    }

    fn expire(&self, token: &str) {
        self.entries.remove(token);
    }
}
