use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::api::{AppState, SessionQuery};
use crate::chain::{Chain, ChainStep, StepObserver};
use crate::error::AppError;
use crate::llm::ChatRole;
use crate::session::{Message, Session, GREETING};
use crate::text_to_sql_chain::TextToSqlChain;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Uuid,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ClearChatRequest {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub session_id: Uuid,
    pub connected: bool,
    pub messages: Vec<Message>,
}

type EventStream = UnboundedReceiver<Result<Event, Infallible>>;

fn sse_event<T: Serialize>(name: &str, value: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(value)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// Forwards chain steps to the browser as they happen.
struct ChannelObserver {
    tx: UnboundedSender<Result<Event, Infallible>>,
}

impl StepObserver for ChannelObserver {
    fn on_step(&self, step: &ChainStep) {
        // the browser may have gone away
        let _ = self.tx.unbounded_send(Ok(sse_event("step", step)));
    }
}

impl TranscriptResponse {
    fn of(session_id: Uuid, session: &Session) -> Self {
        TranscriptResponse {
            session_id,
            connected: session.connection.is_some(),
            messages: session.messages().to_vec(),
        }
    }

    /// What an unknown session looks like: just the greeting.
    fn fresh(session_id: Uuid) -> Self {
        TranscriptResponse {
            session_id,
            connected: false,
            messages: vec![Message {
                role: ChatRole::Assistant,
                content: GREETING.to_string(),
            }],
        }
    }
}

pub async fn get_transcript(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<TranscriptResponse> {
    let session_id = query.session_id.unwrap_or_else(Uuid::new_v4);
    let Some(session) = state.sessions.get(session_id).await else {
        return Json(TranscriptResponse::fresh(session_id));
    };
    let session = session.lock().await;
    Json(TranscriptResponse::of(session_id, &session))
}

/// Answers one question, streaming `step` events followed by a final
/// `answer` or `error` event.
pub async fn ask(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<EventStream>, AppError> {
    let question = request.message.trim().to_string();
    if question.is_empty() {
        return Err(AppError::Validation("Ask a question about your database".into()));
    }

    let session_id = request.session_id;
    let session = state.sessions.get(session_id).await.ok_or(AppError::NotConnected)?;
    let connection = session
        .lock()
        .await
        .connection
        .clone()
        .ok_or(AppError::NotConnected)?;

    let db = state.connections.get_or_connect(&connection.params).await?;
    session.lock().await.push_user(question.clone());

    let chain = TextToSqlChain::new(
        connection.model,
        db,
        state.config.top_k,
        state.config.max_attempts,
    );

    let (tx, rx) = unbounded();
    tokio::spawn(async move {
        let observer = ChannelObserver { tx: tx.clone() };
        let outcome = chain.run(question.clone(), &observer).await;

        let mut session = session.lock().await;
        let event = match outcome {
            Ok(answer) => {
                session.push_assistant(answer.clone());
                session.save_query(&question, &answer);
                sse_event("answer", &json!({ "text": answer }))
            }
            Err(e) => {
                tracing::error!(%session_id, error = %e, "query processing failed");
                let message = session.push_error(&e.to_string());
                sse_event("error", &json!({ "text": message }))
            }
        };
        let _ = tx.unbounded_send(Ok(event));
    });

    Ok(Sse::new(rx).keep_alive(KeepAlive::default()))
}

pub async fn clear_chat(
    State(state): State<AppState>,
    Json(request): Json<ClearChatRequest>,
) -> Json<TranscriptResponse> {
    let session_id = request.session_id;
    let Some(session) = state.sessions.get(session_id).await else {
        return Json(TranscriptResponse::fresh(session_id));
    };
    let mut session = session.lock().await;
    session.clear_chat();
    Json(TranscriptResponse::of(session_id, &session))
}
