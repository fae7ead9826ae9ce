//! Taxonomía de errores del motor de la base de conocimiento.

use thiserror::Error;

pub type KbResult<T> = std::result::Result<T, KbError>;

#[derive(Debug, Error)]
pub enum KbError {
    /// No quedó ningún documento válido tras listar, extraer y filtrar.
    #[error("No hay documentos válidos en el corpus: {0}")]
    EmptyCorpus(String),

    /// Un documento no se pudo leer. Aborta la construcción completa.
    #[error("No se pudo extraer texto de {path}: {message}")]
    Extraction { path: String, message: String },

    #[error("Error del proveedor de embeddings: {0}")]
    EmbeddingProvider(String),

    /// Un fichero QA no tiene una forma reconocida. Se omite ese fichero.
    #[error("Dataset QA no reconocido en {path}: {reason}")]
    MalformedDataset { path: String, reason: String },

    #[error("Error de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error de JSON: {0}")]
    Json(#[from] serde_json::Error),
}
