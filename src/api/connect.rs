use axum::extract::State;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::config::LlmProvider;
use crate::db::{validate_connection, validate_inputs, ConnectionParams, DatabaseKind, RemoteConfig};
use crate::error::AppError;
use crate::llm::{build_model, verify};
use crate::session::SessionConnection;

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub session_id: Option<Uuid>,
    pub kind: DatabaseKind,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub session_id: Uuid,
    pub dialect: String,
    pub model: String,
    pub tables: Vec<String>,
}

/// Handles the sidebar form: validate, check the key, open (or reuse) the
/// database and attach both to the session.
pub async fn connect(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> Result<Json<ConnectResponse>, AppError> {
    let params = ConnectionParams {
        kind: request.kind,
        remote: request.remote,
    };

    let api_key = if request.api_key.trim().is_empty() {
        state.config.groq_api_key.clone().unwrap_or_default()
    } else {
        request.api_key
    };

    match state.config.provider {
        LlmProvider::Groq => validate_inputs(&api_key, &params)?,
        LlmProvider::Ollama => validate_connection(&params)?,
    }

    let model = build_model(&state.config, &api_key)?;
    verify(model.as_ref()).await?;

    let db = state.connections.get_or_connect(&params).await?;
    let tables = db.usable_table_names().await?;

    let (session_id, session) = state.sessions.get_or_create(request.session_id).await;
    let model_name = model.model_name().to_string();
    session.lock().await.connection = Some(SessionConnection {
        params: params.clone(),
        model,
    });

    tracing::info!(%session_id, database = %params.describe(), model = %model_name, "session connected");

    Ok(Json(ConnectResponse {
        session_id,
        dialect: db.dialect().to_string(),
        model: model_name,
        tables,
    }))
}
