pub mod chat;
pub mod connect;
pub mod database;
pub mod history;

use std::sync::Arc;

use axum::response::{Html, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::cache::ConnectionCache;
use crate::config::AppConfig;
use crate::session::SessionStore;

const INDEX_HTML: &str = include_str!("../../static/index.html");

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub connections: Arc<ConnectionCache>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let connections = ConnectionCache::new(config.cache_ttl(), config.sqlite_path.clone());
        let sessions = SessionStore::new(config.max_query_history);
        Self {
            config: Arc::new(config),
            connections: Arc::new(connections),
            sessions: Arc::new(sessions),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: Option<Uuid>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health_check))
        .route("/api/connect", post(connect::connect))
        .route("/api/database/tables", get(database::list_tables))
        .route("/api/database/preview", get(database::preview_table))
        .route("/api/chat", get(chat::get_transcript).post(chat::ask))
        .route("/api/chat/clear", post(chat::clear_chat))
        .route("/api/history", get(history::list_history))
        .route("/api/history/clear", post(history::clear_history))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "sql-chat"
    }))
}
