use axum::extract::{Query, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{AppState, SessionQuery};
use crate::db::{Database, QueryResult};
use crate::error::AppError;

#[derive(Debug, Serialize)]
pub struct TablesResponse {
    pub dialect: String,
    pub tables: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub session_id: Uuid,
    pub table: String,
}

async fn session_database(state: &AppState, session_id: Option<Uuid>) -> Result<Database, AppError> {
    let session_id = session_id.ok_or(AppError::NotConnected)?;
    let session = state.sessions.get(session_id).await.ok_or(AppError::NotConnected)?;
    let params = session
        .lock()
        .await
        .connection
        .as_ref()
        .map(|c| c.params.clone())
        .ok_or(AppError::NotConnected)?;
    state.connections.get_or_connect(&params).await
}

pub async fn list_tables(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<TablesResponse>, AppError> {
    let db = session_database(&state, query.session_id).await?;
    Ok(Json(TablesResponse {
        dialect: db.dialect().to_string(),
        tables: db.usable_table_names().await?,
    }))
}

pub async fn preview_table(
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<QueryResult>, AppError> {
    let db = session_database(&state, Some(query.session_id)).await?;
    Ok(Json(db.preview(&query.table).await?))
}
