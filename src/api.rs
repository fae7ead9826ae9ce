use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::spawn;
use tracing::{error, info};

use crate::{
    app_state::{snapshot, AppState, Status},
    error::KbError,
    models::KbMeta,
    rag::{self, RagAnswer},
    retriever::RetrievalOptions,
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct ChatPayload {
    message: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    per_doc_cap: Option<usize>,
}

#[derive(Serialize)]
pub struct ChatResponse {
    success: bool,
    #[serde(flatten)]
    answer: RagAnswer,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KbInfo {
    meta: Option<KbMeta>,
    stale: bool,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn failure(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "success": false, "message": message.to_string() })))
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/rebuild", post(rebuild_handler))
        .route("/api/status", get(status_handler))
        .route("/api/kb-info", get(kb_info_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> Result<Json<ChatResponse>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(failure(StatusCode::BAD_REQUEST, "El mensaje está vacío."));
    }

    let opts = RetrievalOptions {
        top_k: payload.top_k.unwrap_or(state.config.top_k).max(1),
        per_doc_cap: payload.per_doc_cap.unwrap_or(state.config.per_doc_cap).max(1),
    };

    match rag::rag_query(&state.kb, state.generator.as_ref(), &payload.message, opts).await {
        Ok(answer) => Ok(Json(ChatResponse {
            success: true,
            answer,
        })),
        Err(e) => {
            error!("Error al procesar la consulta RAG: {e:#}");
            let status = match e.downcast_ref::<KbError>() {
                Some(KbError::EmptyCorpus(_)) => StatusCode::SERVICE_UNAVAILABLE,
                Some(KbError::EmbeddingProvider(_)) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err(failure(status, format!("Error al procesar la consulta RAG: {e}")))
        }
    }
}

#[axum::debug_handler]
async fn rebuild_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    if snapshot(&state.status).is_busy {
        return Err(failure(StatusCode::CONFLICT, "Ya hay una indexación en curso."));
    }

    spawn(async move {
        if let Err(err) = state.kb.rebuild().await {
            error!("Error de reconstrucción: {err}");
        }
    });

    Ok(StatusCode::ACCEPTED)
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(snapshot(&state.status))
}

#[axum::debug_handler]
async fn kb_info_handler(State(state): State<AppState>) -> Result<Json<KbInfo>, ApiError> {
    let meta = state
        .kb
        .current_meta()
        .await
        .map_err(|e| failure(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    let stale = state
        .kb
        .is_stale()
        .await
        .map_err(|e| failure(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(Json(KbInfo { meta, stale }))
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    let sender = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(());
    }
    StatusCode::OK
}
