use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::{config::AppConfig, knowledge::KnowledgeBaseHandle, llm::AnswerGenerator};

pub type StatusHandle = Arc<Mutex<Status>>;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub kb: Arc<KnowledgeBaseHandle>,
    pub generator: Arc<dyn AnswerGenerator>,
    pub status: StatusHandle,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
}

impl Status {
    pub fn ready(message: &str) -> StatusHandle {
        Arc::new(Mutex::new(Status {
            is_busy: false,
            message: message.to_string(),
            progress: 0.0,
        }))
    }
}

/// Actualiza el estado compartido. Un mutex envenenado no debe tumbar una
/// construcción en curso.
pub fn report(status: &StatusHandle, message: impl Into<String>, progress: f32) {
    let mut guard = status.lock().unwrap_or_else(|e| e.into_inner());
    guard.message = message.into();
    guard.progress = progress.clamp(0.0, 1.0);
}

pub fn set_busy(status: &StatusHandle, busy: bool) {
    let mut guard = status.lock().unwrap_or_else(|e| e.into_inner());
    guard.is_busy = busy;
    if !busy {
        guard.progress = 0.0;
    }
}

pub fn snapshot(status: &StatusHandle) -> Status {
    status.lock().unwrap_or_else(|e| e.into_inner()).clone()
}
