//! Búsqueda semántica sobre el índice cargado en memoria.
//!
//! Recorre todas las unidades, puntúa por similitud coseno con la consulta,
//! ordena de forma estable y aplica un tope de resultados por documento para
//! que una sola fuente no acapare el contexto.

use std::collections::HashMap;

use tracing::debug;

use crate::{
    error::{KbError, KbResult},
    llm::Embedder,
    models::{KnowledgeBase, RetrievalResult, Retrievable},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub per_doc_cap: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 6,
            per_doc_cap: 2,
        }
    }
}

/// Similitud coseno en `[-1, 1]`. Devuelve `0.0` si algún vector tiene norma
/// cero, si están vacíos o si sus dimensiones no coinciden.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return 0.0;
    }
    let score = dot / denom;
    if score.is_finite() {
        score.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Ordena `units` por similitud con `query_vec` y selecciona hasta `top_k`
/// con como mucho `per_doc_cap` por fuente. Los empates conservan el orden
/// original.
pub fn rank<T: Retrievable>(units: &[T], query_vec: &[f64], opts: RetrievalOptions) -> Vec<RetrievalResult> {
    let top_k = opts.top_k.max(1);
    let per_doc_cap = opts.per_doc_cap.max(1);

    let mut scored: Vec<(usize, f64)> = units
        .iter()
        .enumerate()
        .map(|(i, u)| (i, cosine_similarity(query_vec, u.embedding())))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut per_doc: HashMap<&str, usize> = HashMap::new();
    let mut results = Vec::with_capacity(top_k);
    for (i, score) in scored {
        if results.len() == top_k {
            break;
        }
        let unit = &units[i];
        let taken = per_doc.entry(unit.source_name()).or_insert(0);
        if *taken >= per_doc_cap {
            continue;
        }
        *taken += 1;
        results.push(RetrievalResult {
            doc: unit.source_name().to_string(),
            chunk_index: unit.position(),
            text: unit.text().to_string(),
            score,
        });
    }
    results
}

/// Calcula el embedding de la consulta y devuelve los chunks más relevantes.
pub async fn retrieve(
    kb: &KnowledgeBase,
    embedder: &dyn Embedder,
    query: &str,
    opts: RetrievalOptions,
) -> KbResult<Vec<RetrievalResult>> {
    let embeddings = embedder.embed(&[query.to_string()]).await?;
    let query_vec = embeddings
        .into_iter()
        .next()
        .ok_or_else(|| KbError::EmbeddingProvider("No se pudo generar embedding de la query".into()))?;

    let results = rank(&kb.chunks, &query_vec, opts);
    debug!(
        "Recuperados {} de {} chunks para la consulta",
        results.len(),
        kb.chunks.len()
    );
    Ok(results)
}
