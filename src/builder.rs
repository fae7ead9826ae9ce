//! Construcción de la base de conocimiento a partir del corpus:
//! extracción → normalización → troceo → embeddings por lotes → índice.
//!
//! Cualquier fallo de extracción o del proveedor aborta la construcción sin
//! tocar el índice persistido.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use tracing::{info, warn};

use crate::{
    app_state::{report, StatusHandle},
    chunker::{chunk_text, ChunkSizing},
    config::AppConfig,
    corpus::{signature, DocumentSource},
    error::{KbError, KbResult},
    llm::Embedder,
    models::{Chunk, KbMeta, KnowledgeBase, KnowledgeUnit},
    normalize::normalize,
    store::IndexStore,
};

/// Documentos con menos caracteres normalizados se consideran ruido.
pub const MIN_DOC_CHARS: usize = 80;

#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub target_chunk_count: usize,
    pub embed_batch_size: usize,
    pub embed_concurrency: usize,
    pub chat_model: String,
}

impl BuildSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            target_chunk_count: cfg.target_chunk_count,
            embed_batch_size: cfg.embed_batch_size,
            embed_concurrency: cfg.embed_concurrency,
            chat_model: cfg.llm_chat_model.clone(),
        }
    }
}

/// Resumen de una construcción.
#[derive(Debug, Default, Clone)]
pub struct BuildSummary {
    pub docs_listed: usize,
    pub docs_indexed: usize,
    pub docs_skipped: usize,
    pub chunks_created: usize,
    pub qa_units_kept: usize,
    pub backup: Option<PathBuf>,
}

impl std::fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} documentos listados, {} indexados, {} omitidos por cortos. {} chunks creados, {} bloques QA conservados.",
            self.docs_listed, self.docs_indexed, self.docs_skipped, self.chunks_created, self.qa_units_kept
        )
    }
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub kb: KnowledgeBase,
    pub summary: BuildSummary,
}

/// Reconstruye el índice completo y lo persiste.
///
/// Los bloques QA fusionados del índice anterior se conservan; los chunks de
/// documentos se sustituyen por completo.
pub async fn build_knowledge_base(
    corpus: &dyn DocumentSource,
    embedder: &dyn Embedder,
    store: &dyn IndexStore,
    settings: &BuildSettings,
    status: Option<&StatusHandle>,
    now: DateTime<Utc>,
) -> KbResult<BuildOutcome> {
    let mut summary = BuildSummary::default();
    let docs = corpus.list_documents()?;
    summary.docs_listed = docs.len();
    if docs.is_empty() {
        return Err(KbError::EmptyCorpus(corpus.describe()));
    }
    info!("Construyendo base de conocimiento con {} documentos de {}", docs.len(), corpus.describe());

    // --- Fase 1: Extracción ---
    let mut texts: Vec<(String, String)> = Vec::new();
    for (index, doc) in docs.iter().enumerate() {
        if let Some(status) = status {
            report(
                status,
                format!("[{}/{}] Extrayendo: {}...", index + 1, docs.len(), doc.name),
                0.4 * (index + 1) as f32 / docs.len() as f32,
            );
        }
        let text = normalize(&corpus.extract_text(doc)?);
        if text.chars().count() < MIN_DOC_CHARS {
            warn!("Documento demasiado corto, se omite: {}", doc.name);
            summary.docs_skipped += 1;
            continue;
        }
        texts.push((doc.name.clone(), text));
    }
    if texts.is_empty() {
        return Err(KbError::EmptyCorpus(corpus.describe()));
    }
    summary.docs_indexed = texts.len();

    // --- Fase 2: Troceo ---
    let total_chars: usize = texts.iter().map(|(_, t)| t.chars().count()).sum();
    let sizing = ChunkSizing::for_corpus(total_chars, settings.target_chunk_count);
    let mut chunks: Vec<Chunk> = Vec::new();
    for (name, text) in &texts {
        for (idx, piece) in chunk_text(text, sizing.chunk_size_chars, sizing.overlap_chars)
            .into_iter()
            .enumerate()
        {
            chunks.push(Chunk::new(name, idx, piece));
        }
    }
    summary.chunks_created = chunks.len();
    info!(
        "{} caracteres → {} chunks (tamaño {}, solape {})",
        total_chars,
        chunks.len(),
        sizing.chunk_size_chars,
        sizing.overlap_chars
    );

    // --- Fase 3: Embeddings ---
    let inputs: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_in_batches(
        embedder,
        &inputs,
        settings.embed_batch_size,
        settings.embed_concurrency,
        status,
    )
    .await?;
    for (chunk, vector) in chunks.iter_mut().zip(vectors) {
        chunk.embedding = vector;
    }

    // La firma se toma después de extraer para detectar cambios concurrentes.
    let docs_signature = signature(&corpus.list_documents()?);

    let carried: Vec<KnowledgeUnit> = store
        .load()?
        .map(|previous| previous.chunks.into_iter().filter(KnowledgeUnit::is_merged_qa).collect())
        .unwrap_or_default();
    summary.qa_units_kept = carried.len();

    let meta = KbMeta {
        created_at: now,
        embed_model: embedder.embed_model().to_string(),
        chat_model: settings.chat_model.clone(),
        target_chunk_count: settings.target_chunk_count,
        chunk_size_chars: sizing.chunk_size_chars,
        overlap_chars: sizing.overlap_chars,
        doc_count: texts.len(),
        chunk_count: chunks.len(),
        docs_signature: Some(docs_signature),
    };
    let mut units: Vec<KnowledgeUnit> = chunks.into_iter().map(KnowledgeUnit::Chunk).collect();
    units.extend(carried);
    let kb = KnowledgeBase { meta, chunks: units };

    if let Some(status) = status {
        report(status, "Guardando índice...", 1.0);
    }
    summary.backup = store.save(&kb)?;
    info!("✅ Base de conocimiento construida. {}", summary);

    Ok(BuildOutcome { kb, summary })
}

/// Calcula embeddings en lotes de `batch_size`, con hasta `concurrency` lotes
/// en vuelo. El resultado `i` corresponde siempre al texto `i`.
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
    concurrency: usize,
    status: Option<&StatusHandle>,
) -> KbResult<Vec<Vec<f64>>> {
    let batch_size = batch_size.max(1);
    let total_batches = texts.len().div_ceil(batch_size);
    let mut vectors = Vec::with_capacity(texts.len());

    // `buffered` entrega los lotes en el orden de emisión.
    let owned: Vec<Vec<String>> = texts.chunks(batch_size).map(<[String]>::to_vec).collect();
    let mut batches = stream::iter(owned)
        .map(|batch: Vec<String>| async move { (batch.len(), embedder.embed(&batch).await) })
        .buffered(concurrency.max(1));

    let mut done = 0usize;
    while let Some((expected, result)) = batches.next().await {
        let batch_vectors = result?;
        if batch_vectors.len() != expected {
            return Err(KbError::EmbeddingProvider(format!(
                "El proveedor devolvió {} embeddings para {} textos",
                batch_vectors.len(),
                expected
            )));
        }
        vectors.extend(batch_vectors);
        done += 1;
        if let Some(status) = status {
            report(
                status,
                format!("Calculando embeddings: lote {done}/{total_batches}"),
                0.4 + 0.55 * done as f32 / total_batches as f32,
            );
        }
    }

    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use std::sync::{atomic::Ordering, Arc};

    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::{
        app_state::Status,
        corpus::memory::MemoryCorpus,
        llm::fake::FakeEmbedder,
        models::{QaBlock, Retrievable},
        store::{memory::MemoryStore, JsonFileStore},
    };

    fn settings(batch: usize) -> BuildSettings {
        BuildSettings {
            target_chunk_count: 300,
            embed_batch_size: batch,
            embed_concurrency: 2,
            chat_model: "gpt-test".into(),
        }
    }

    fn long_text(topic: &str, paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|i| format!("Párrafo {i} sobre {topic}. {}", "relleno ".repeat(60)))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[tokio::test]
    async fn test_build_assembles_meta_and_chunks() {
        let corpus = MemoryCorpus::default();
        corpus.put("rust.md", &long_text("rust", 6), 10);
        corpus.put("python.txt", &long_text("python", 3), 20);
        corpus.put("nota.md", "demasiado corto", 30);
        let store = MemoryStore::default();
        let embedder = FakeEmbedder::default();

        let outcome = build_knowledge_base(&corpus, &embedder, &store, &settings(4), None, Utc::now())
            .await
            .unwrap();
        let meta = &outcome.kb.meta;

        assert_eq!(meta.doc_count, 2);
        assert_eq!(meta.chunk_count, outcome.kb.chunks.len());
        assert_eq!(meta.chunk_size_chars, 800);
        assert_eq!(meta.overlap_chars, 96);
        assert_eq!(meta.embed_model, "fake-embed");
        assert_eq!(meta.chat_model, "gpt-test");
        assert_eq!(
            meta.docs_signature.as_deref(),
            Some(signature(&corpus.list_documents().unwrap()).as_str())
        );
        assert_eq!(outcome.summary.docs_skipped, 1);
        assert!(outcome.summary.backup.is_none());
        assert!(store.load().unwrap().is_some());

        // Orden de inserción: documento y después índice de chunk.
        let ids: Vec<_> = outcome.kb.chunks.iter().map(|u| u.id().to_string()).collect();
        let first_rust = ids.iter().position(|id| id.starts_with("rust.md")).unwrap();
        assert!(ids[..first_rust].iter().all(|id| id.starts_with("python.txt::")));
        assert_eq!(ids[0], "python.txt::0");
        assert_eq!(ids[first_rust], "rust.md::0");
        for unit in &outcome.kb.chunks {
            assert_eq!(unit.embedding(), FakeEmbedder::vector(unit.text()).as_slice());
        }
    }

    #[tokio::test]
    async fn test_empty_corpus_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir(&docs).unwrap();
        let index = dir.path().join("kb.json");
        let corpus = crate::corpus::FsCorpus::new(&docs);
        let store = JsonFileStore::new(&index);

        let err = build_knowledge_base(&corpus, &FakeEmbedder::default(), &store, &settings(8), None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::EmptyCorpus(_)));
        assert!(!index.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_only_short_docs_is_empty_corpus() {
        let corpus = MemoryCorpus::default();
        corpus.put("a.md", "corto", 1);
        let store = MemoryStore::default();
        let result = build_knowledge_base(&corpus, &FakeEmbedder::default(), &store, &settings(8), None, Utc::now()).await;
        assert!(matches!(assert_err!(result), KbError::EmptyCorpus(_)));
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extraction_failure_aborts() {
        let corpus = MemoryCorpus::default();
        corpus.put("ok.md", &long_text("rust", 2), 1);
        corpus.put("roto.pdf", "x", 1);
        corpus.mark_unreadable("roto.pdf");
        let store = MemoryStore::default();
        let result = build_knowledge_base(&corpus, &FakeEmbedder::default(), &store, &settings(8), None, Utc::now()).await;
        assert!(matches!(assert_err!(result), KbError::Extraction { .. }));
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_previous_index() {
        let corpus = MemoryCorpus::default();
        corpus.put("ok.md", &long_text("rust", 2), 1);
        let store = MemoryStore::default();
        assert_ok!(build_knowledge_base(&corpus, &FakeEmbedder::default(), &store, &settings(8), None, Utc::now()).await);
        let before = store.load().unwrap();

        corpus.put("nuevo.md", &long_text("python", 2), 2);
        let result = build_knowledge_base(&corpus, &FakeEmbedder::failing(), &store, &settings(8), None, Utc::now()).await;
        assert!(matches!(assert_err!(result), KbError::EmbeddingProvider(_)));
        assert_eq!(store.load().unwrap(), before);
        assert!(store.backups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_backs_up_and_keeps_qa_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir(&docs).unwrap();
        std::fs::write(docs.join("uno.md"), long_text("rust", 3)).unwrap();
        let index = dir.path().join("kb.json");
        let corpus = crate::corpus::FsCorpus::new(&docs);
        let store = JsonFileStore::new(&index);
        let embedder = FakeEmbedder::default();

        let first = build_knowledge_base(&corpus, &embedder, &store, &settings(8), None, Utc::now())
            .await
            .unwrap();
        assert_eq!(first.kb.meta.doc_count, 1);

        // Un bloque QA fusionado debe sobrevivir a la reconstrucción.
        let mut with_qa = first.kb.clone();
        with_qa.chunks.push(KnowledgeUnit::Qa(QaBlock {
            id: "qa::faq.json::0".into(),
            title: "¿Horario?".into(),
            source: "faq.json".into(),
            text: "Pregunta: ¿Horario?\nRespuesta: de 9 a 18".into(),
            tags: Default::default(),
            meta: Default::default(),
            embedding: vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
        }));
        store.save(&with_qa).unwrap();

        std::fs::write(docs.join("dos.md"), long_text("python", 4)).unwrap();
        let second = build_knowledge_base(&corpus, &embedder, &store, &settings(8), None, Utc::now())
            .await
            .unwrap();

        let backup = second.summary.backup.expect("backup");
        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("kb_backup_") && name.ends_with(".json"));
        assert!(backup.exists());
        assert_eq!(second.kb.meta.doc_count, 2);
        let doc_chunks = second.kb.chunks.iter().filter(|u| !u.is_merged_qa()).count();
        assert_eq!(second.kb.meta.chunk_count, doc_chunks);
        assert_eq!(second.summary.qa_units_kept, 1);
        assert!(second.kb.chunks.iter().any(|u| u.id() == "qa::faq.json::0"));
        assert_eq!(store.load().unwrap().unwrap(), second.kb);
    }

    /// Embedder cuyos lotes terminan en orden inverso al de emisión.
    struct SlowFirst;

    #[async_trait]
    impl Embedder for SlowFirst {
        fn embed_model(&self) -> &str {
            "slow-first"
        }

        async fn embed(&self, texts: &[String]) -> KbResult<Vec<Vec<f64>>> {
            let first: usize = texts[0].parse().unwrap();
            let delay = 40u64.saturating_sub(first as u64 * 4);
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            Ok(texts.iter().map(|t| vec![t.parse::<f64>().unwrap()]).collect())
        }
    }

    #[tokio::test]
    async fn test_batches_keep_order_under_concurrency() {
        let texts: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let status = Status::ready("listo");
        let vectors = embed_in_batches(&SlowFirst, &texts, 3, 4, Some(&status)).await.unwrap();
        let flat: Vec<f64> = vectors.into_iter().map(|v| v[0]).collect();
        assert_eq!(flat, (0..10).map(|i| i as f64).collect::<Vec<_>>());
        assert!(status.lock().unwrap().message.contains("4/4"));
    }

    #[tokio::test]
    async fn test_batch_size_bounds_calls() {
        let embedder = Arc::new(FakeEmbedder::default());
        let texts: Vec<String> = (0..130).map(|i| format!("texto {i}")).collect();
        let vectors = embed_in_batches(embedder.as_ref(), &texts, 64, 1, None).await.unwrap();
        assert_eq!(vectors.len(), 130);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }
}
