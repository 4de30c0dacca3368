use axum::extract::{Query, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{AppState, SessionQuery};
use crate::session::HistoryEntry;

const SIDEBAR_HISTORY: usize = 10;

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: Uuid,
    pub total: usize,
    pub entries: Vec<HistoryEntry>,
}

impl HistoryResponse {
    fn empty(session_id: Uuid) -> Self {
        HistoryResponse {
            session_id,
            total: 0,
            entries: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ClearHistoryRequest {
    pub session_id: Uuid,
}

pub async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<HistoryResponse> {
    let session_id = query.session_id.unwrap_or_else(Uuid::new_v4);
    let Some(session) = state.sessions.get(session_id).await else {
        return Json(HistoryResponse::empty(session_id));
    };
    let session = session.lock().await;
    Json(HistoryResponse {
        session_id,
        total: session.history().len(),
        entries: session.recent_history(SIDEBAR_HISTORY),
    })
}

pub async fn clear_history(
    State(state): State<AppState>,
    Json(request): Json<ClearHistoryRequest>,
) -> Json<HistoryResponse> {
    if let Some(session) = state.sessions.get(request.session_id).await {
        session.lock().await.clear_history();
    }
    Json(HistoryResponse::empty(request.session_id))
}
