//! Modelos de dominio: documentos del corpus, unidades recuperables y el
//! índice persistido.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefijo de id de las unidades creadas por la fusión de datasets QA.
pub const QA_ID_PREFIX: &str = "qa::";

/// Fichero del corpus. Se recalcula en cada listado y no se persiste.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub full_path: String,
    pub size_bytes: u64,
    pub mtime_millis: i64,
    pub extension: String,
}

/// Trozo de un documento con su embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub doc: String,
    pub chunk_index: usize,
    pub text: String,
    #[serde(default)]
    pub embedding: Vec<f64>,
}

impl Chunk {
    pub fn new(doc: &str, chunk_index: usize, text: String) -> Self {
        Self {
            id: chunk_id(doc, chunk_index),
            doc: doc.to_string(),
            chunk_index,
            text,
            embedding: Vec::new(),
        }
    }
}

pub fn chunk_id(doc: &str, chunk_index: usize) -> String {
    format!("{doc}::{chunk_index}")
}

/// Bloque pregunta/respuesta. `text` concatena pregunta, respuesta,
/// variantes y etiquetas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaBlock {
    pub id: String,
    pub title: String,
    pub source: String,
    pub text: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub embedding: Vec<f64>,
}

/// Entrada del índice: chunk de documento o bloque QA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KnowledgeUnit {
    Chunk(Chunk),
    Qa(QaBlock),
}

/// Lo que el recuperador necesita de una unidad.
pub trait Retrievable {
    fn id(&self) -> &str;
    /// Nombre de la fuente, usado para el tope de diversidad.
    fn source_name(&self) -> &str;
    fn position(&self) -> usize;
    fn text(&self) -> &str;
    fn embedding(&self) -> &[f64];
}

impl Retrievable for Chunk {
    fn id(&self) -> &str {
        &self.id
    }
    fn source_name(&self) -> &str {
        &self.doc
    }
    fn position(&self) -> usize {
        self.chunk_index
    }
    fn text(&self) -> &str {
        &self.text
    }
    fn embedding(&self) -> &[f64] {
        &self.embedding
    }
}

impl Retrievable for QaBlock {
    fn id(&self) -> &str {
        &self.id
    }
    fn source_name(&self) -> &str {
        &self.source
    }
    fn position(&self) -> usize {
        0
    }
    fn text(&self) -> &str {
        &self.text
    }
    fn embedding(&self) -> &[f64] {
        &self.embedding
    }
}

impl Retrievable for KnowledgeUnit {
    fn id(&self) -> &str {
        match self {
            Self::Chunk(c) => c.id(),
            Self::Qa(b) => b.id(),
        }
    }
    fn source_name(&self) -> &str {
        match self {
            Self::Chunk(c) => c.source_name(),
            Self::Qa(b) => b.source_name(),
        }
    }
    fn position(&self) -> usize {
        match self {
            Self::Chunk(c) => c.position(),
            Self::Qa(b) => b.position(),
        }
    }
    fn text(&self) -> &str {
        match self {
            Self::Chunk(c) => c.text(),
            Self::Qa(b) => b.text(),
        }
    }
    fn embedding(&self) -> &[f64] {
        match self {
            Self::Chunk(c) => c.embedding(),
            Self::Qa(b) => b.embedding(),
        }
    }
}

impl KnowledgeUnit {
    /// `true` si la unidad procede de una fusión QA y no del corpus.
    pub fn is_merged_qa(&self) -> bool {
        self.id().starts_with(QA_ID_PREFIX)
    }

    pub fn set_embedding(&mut self, embedding: Vec<f64>) {
        match self {
            Self::Chunk(c) => c.embedding = embedding,
            Self::Qa(b) => b.embedding = embedding,
        }
    }
}

/// Metadatos de construcción del índice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KbMeta {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub embed_model: String,
    #[serde(default)]
    pub chat_model: String,
    #[serde(default)]
    pub target_chunk_count: usize,
    #[serde(default)]
    pub chunk_size_chars: usize,
    #[serde(default)]
    pub overlap_chars: usize,
    #[serde(default)]
    pub doc_count: usize,
    #[serde(default)]
    pub chunk_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_signature: Option<String>,
}

impl KbMeta {
    /// Metadatos de un índice que no procede de ninguna construcción.
    pub fn empty(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            embed_model: String::new(),
            chat_model: String::new(),
            target_chunk_count: 0,
            chunk_size_chars: 0,
            overlap_chars: 0,
            doc_count: 0,
            chunk_count: 0,
            docs_signature: None,
        }
    }
}

impl std::fmt::Display for KbMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} documentos, {} chunks (tamaño {} / solape {}), modelo {}",
            self.doc_count, self.chunk_count, self.chunk_size_chars, self.overlap_chars, self.embed_model
        )
    }
}

/// Índice persistido: metadatos más unidades en orden de inserción.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub meta: KbMeta,
    #[serde(default)]
    pub chunks: Vec<KnowledgeUnit>,
}

/// Resultado de una recuperación. Nunca se persiste.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    pub doc: String,
    pub chunk_index: usize,
    pub text: String,
    pub score: f64,
}
