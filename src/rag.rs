//! Consulta RAG sobre la base de conocimiento.
//!
//! Flujo:
//!   1. Asegurar que el índice está al día (reconstruye si el corpus cambió).
//!   2. Recuperar los `top_k` chunks más similares con tope por documento.
//!   3. El LLM responde usando sólo esos chunks.
//!   4. Se devuelven la respuesta, las fuentes y los metadatos del índice.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::{
    knowledge::KnowledgeBaseHandle,
    llm::AnswerGenerator,
    models::RetrievalResult,
    retriever::RetrievalOptions,
};

const SNIPPET_CHARS: usize = 280;

const NO_CONTEXT_ANSWER: &str =
    "No se encontró información relevante en los documentos para responder a esta pregunta.";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub doc: String,
    pub chunk_index: usize,
    pub score: f64,
    pub snippet: String,
}

impl From<&RetrievalResult> for SourceRef {
    fn from(r: &RetrievalResult) -> Self {
        Self {
            doc: r.doc.clone(),
            chunk_index: r.chunk_index,
            score: r.score,
            snippet: snippet(&r.text),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerMeta {
    pub index_created_at: DateTime<Utc>,
    pub doc_count: usize,
    pub chunk_count: usize,
    pub embed_model: String,
    pub chat_model: String,
    pub rebuilt: bool,
    pub top_k: usize,
    pub per_doc_cap: usize,
}

/// Respuesta de una consulta. Nunca incluye el índice completo.
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub meta: AnswerMeta,
}

/// Lanza una consulta RAG completa.
pub async fn rag_query(
    kb: &KnowledgeBaseHandle,
    generator: &dyn AnswerGenerator,
    question: &str,
    opts: RetrievalOptions,
) -> Result<RagAnswer> {
    let question = question.trim();
    if question.is_empty() {
        bail!("La pregunta está vacía");
    }

    let (fresh, results) = kb.retrieve(question, opts).await?;
    let meta = AnswerMeta {
        index_created_at: fresh.kb.meta.created_at,
        doc_count: fresh.kb.meta.doc_count,
        chunk_count: fresh.kb.meta.chunk_count,
        embed_model: fresh.kb.meta.embed_model.clone(),
        chat_model: generator.chat_model().to_string(),
        rebuilt: fresh.rebuilt,
        top_k: opts.top_k,
        per_doc_cap: opts.per_doc_cap,
    };

    if results.is_empty() {
        return Ok(RagAnswer {
            answer: NO_CONTEXT_ANSWER.to_string(),
            sources: Vec::new(),
            meta,
        });
    }

    info!(
        "Consulta con {} chunks de contexto (mejor puntuación {:.3})",
        results.len(),
        results[0].score
    );
    let answer = generator.generate(question, &results).await?;

    Ok(RagAnswer {
        answer,
        sources: results.iter().map(SourceRef::from).collect(),
        meta,
    })
}

fn snippet(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(SNIPPET_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
