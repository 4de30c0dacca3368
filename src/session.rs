use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::ConnectionParams;
use crate::llm::{ChatModel, ChatRole};

pub const GREETING: &str = "Hello! I'm your SQL assistant. Ask me anything about your database!";
const HISTORY_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub query: String,
    pub response: String,
}

impl HistoryEntry {
    /// The entry with its query shortened for the sidebar.
    pub fn preview(&self) -> HistoryEntry {
        let query = if self.query.chars().count() > HISTORY_PREVIEW_CHARS {
            let head: String = self.query.chars().take(HISTORY_PREVIEW_CHARS).collect();
            format!("{head}...")
        } else {
            self.query.clone()
        };
        HistoryEntry {
            timestamp: self.timestamp.clone(),
            query,
            response: self.response.clone(),
        }
    }
}

/// What a session needs to answer questions once the form is submitted.
#[derive(Clone)]
pub struct SessionConnection {
    pub params: ConnectionParams,
    pub model: Arc<dyn ChatModel>,
}

pub struct Session {
    messages: Vec<Message>,
    history: Vec<HistoryEntry>,
    max_history: usize,
    pub connection: Option<SessionConnection>,
}

fn greeting() -> Message {
    Message {
        role: ChatRole::Assistant,
        content: GREETING.to_string(),
    }
}

impl Session {
    pub fn new(max_history: usize) -> Self {
        Self {
            messages: vec![greeting()],
            history: Vec::new(),
            max_history,
            connection: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message {
            role: ChatRole::User,
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message {
            role: ChatRole::Assistant,
            content: content.into(),
        });
    }

    /// Records a failed question in the transcript, not in the history.
    pub fn push_error(&mut self, error: &str) -> String {
        let message = format!("Error processing query: {error}");
        self.push_assistant(message.clone());
        message
    }

    pub fn save_query(&mut self, query: &str, response: &str) {
        self.history.push(HistoryEntry {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            query: query.to_string(),
            response: response.to_string(),
        });
        if self.history.len() > self.max_history {
            let excess = self.history.len() - self.max_history;
            self.history.drain(..excess);
        }
    }

    /// Newest first, at most `limit` entries, queries shortened.
    pub fn recent_history(&self, limit: usize) -> Vec<HistoryEntry> {
        self.history
            .iter()
            .rev()
            .take(limit)
            .map(HistoryEntry::preview)
            .collect()
    }

    pub fn clear_chat(&mut self) {
        self.messages = vec![greeting()];
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

pub type SharedSession = Arc<tokio::sync::Mutex<Session>>;

struct StoredSession {
    session: SharedSession,
    last_seen: Instant,
}

/// Sessions keyed by the id the browser keeps. Only connecting creates a
/// session; reads of an unknown id see nothing and store nothing.
pub struct SessionStore {
    max_history: usize,
    sessions: RwLock<HashMap<Uuid, StoredSession>>,
}

impl SessionStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<SharedSession> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions.get_mut(&id)?;
        stored.last_seen = Instant::now();
        Some(stored.session.clone())
    }

    /// Returns the session for `id`, creating it (with a fresh id when none
    /// was given) on first use.
    pub async fn get_or_create(&self, id: Option<Uuid>) -> (Uuid, SharedSession) {
        let id = id.unwrap_or_else(Uuid::new_v4);

        let mut sessions = self.sessions.write().await;
        let stored = sessions.entry(id).or_insert_with(|| StoredSession {
            session: Arc::new(tokio::sync::Mutex::new(Session::new(self.max_history))),
            last_seen: Instant::now(),
        });
        stored.last_seen = Instant::now();
        (id, stored.session.clone())
    }

    /// Drops sessions nobody has used for `max_idle`.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, stored| stored.last_seen.elapsed() < max_idle);
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_with_greeting() {
        let session = Session::new(50);
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].role, ChatRole::Assistant);
        assert_eq!(session.messages()[0].content, GREETING);
    }

    #[test]
    fn history_keeps_newest_entries() {
        let mut session = Session::new(3);
        for i in 0..5 {
            session.save_query(&format!("q{i}"), &format!("r{i}"));
        }
        let queries: Vec<&str> = session.history().iter().map(|h| h.query.as_str()).collect();
        assert_eq!(queries, vec!["q2", "q3", "q4"]);
    }

    #[test]
    fn recent_history_is_newest_first_and_truncated() {
        let mut session = Session::new(50);
        session.save_query("short", "a");
        session.save_query(&"x".repeat(120), "b");

        let recent = session.recent_history(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].query, format!("{}...", "x".repeat(100)));
        assert_eq!(recent[1].query, "short");
        assert_eq!(recent[0].timestamp.len(), "2024-01-01 00:00:00".len());
    }

    #[test]
    fn clearing_chat_keeps_history() {
        let mut session = Session::new(50);
        session.push_user("Show me all students with grade A");
        session.push_assistant("Alice and Eve");
        session.save_query("Show me all students with grade A", "Alice and Eve");

        session.clear_chat();
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.history().len(), 1);

        session.clear_history();
        assert!(session.history().is_empty());
    }

    #[test]
    fn errors_are_added_to_transcript() {
        let mut session = Session::new(50);
        let message = session.push_error("boom");
        assert_eq!(message, "Error processing query: boom");
        assert_eq!(session.messages().last().unwrap().content, message);
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn store_reuses_sessions_by_id() {
        let store = SessionStore::new(50);
        let (id, first) = store.get_or_create(None).await;
        first.lock().await.push_user("hi");

        let (same_id, second) = store.get_or_create(Some(id)).await;
        assert_eq!(id, same_id);
        assert_eq!(second.lock().await.messages().len(), 2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn lookups_never_create_sessions() {
        let store = SessionStore::new(50);
        assert!(store.get(Uuid::new_v4()).await.is_none());
        assert!(store.is_empty().await);

        let (id, _) = store.get_or_create(None).await;
        assert!(store.get(id).await.is_some());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted() {
        let store = SessionStore::new(50);
        store.get_or_create(None).await;
        store.get_or_create(None).await;

        assert_eq!(store.evict_idle(Duration::from_secs(3600)).await, 0);
        assert_eq!(store.evict_idle(Duration::ZERO).await, 2);
        assert!(store.is_empty().await);
    }
}
