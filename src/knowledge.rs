//! Manejador explícito del índice: caché en memoria, comprobación de
//! obsolescencia y reconstrucción bajo demanda.
//!
//! Una consulta recalcula la firma del corpus vivo y la revisión del almacén.
//! Si ambas coinciden con el índice en caché se usa tal cual; si no, se
//! recarga del almacén y, si sigue obsoleto, se reconstruye antes de responder. Las reconstrucciones se
//! serializan con un mutex y se vuelve a comprobar tras obtenerlo, de modo
//! que dos consultas simultáneas no reconstruyen dos veces.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};

use crate::{
    app_state::{report, set_busy, StatusHandle},
    builder::{build_knowledge_base, BuildOutcome, BuildSettings},
    corpus::{is_stale, signature, DocumentSource},
    error::KbResult,
    llm::Embedder,
    models::{KbMeta, KnowledgeBase, RetrievalResult},
    retriever::{retrieve, RetrievalOptions},
    store::IndexStore,
};

pub type Clock = fn() -> DateTime<Utc>;

/// Índice listo para consultar.
#[derive(Debug, Clone)]
pub struct FreshIndex {
    pub kb: Arc<KnowledgeBase>,
    /// `true` si hubo que reconstruir para obtenerlo.
    pub rebuilt: bool,
}

/// Índice en memoria junto con la revisión del almacén de la que se leyó.
struct CachedIndex {
    kb: Arc<KnowledgeBase>,
    revision: Option<String>,
}

pub struct KnowledgeBaseHandle {
    corpus: Arc<dyn DocumentSource>,
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn Embedder>,
    settings: BuildSettings,
    status: StatusHandle,
    clock: Clock,
    cached: RwLock<Option<CachedIndex>>,
    rebuild_lock: Mutex<()>,
}

impl KnowledgeBaseHandle {
    pub fn new(
        corpus: Arc<dyn DocumentSource>,
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn Embedder>,
        settings: BuildSettings,
        status: StatusHandle,
    ) -> Self {
        Self {
            corpus,
            store,
            embedder,
            settings,
            status,
            clock: Utc::now,
            cached: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Firma del corpus en este momento.
    pub fn live_signature(&self) -> KbResult<String> {
        Ok(signature(&self.corpus.list_documents()?))
    }

    /// Índice en caché si el almacén no ha cambiado desde que se leyó.
    /// Otro proceso (p. ej. `merge-qa`) puede reescribir el índice sin tocar
    /// el corpus.
    async fn cached_if_current(&self) -> KbResult<Option<Arc<KnowledgeBase>>> {
        let revision = self.store.revision()?;
        Ok(self
            .cached
            .read()
            .await
            .as_ref()
            .filter(|c| c.revision == revision)
            .map(|c| c.kb.clone()))
    }

    async fn remember(&self, kb: Arc<KnowledgeBase>, revision: Option<String>) {
        *self.cached.write().await = Some(CachedIndex { kb, revision });
    }

    /// Metadatos del índice persistido, sin reconstruir.
    pub async fn current_meta(&self) -> KbResult<Option<KbMeta>> {
        if let Some(kb) = self.cached_if_current().await? {
            return Ok(Some(kb.meta.clone()));
        }
        Ok(self.store.load()?.map(|kb| kb.meta))
    }

    /// Compara el índice persistido con el corpus vivo.
    pub async fn is_stale(&self) -> KbResult<bool> {
        let live = self.live_signature()?;
        if let Some(kb) = self.cached_if_current().await? {
            return Ok(is_stale(Some(&kb), &live));
        }
        Ok(is_stale(self.store.load()?.as_ref(), &live))
    }

    /// Devuelve un índice al día, reconstruyendo si hace falta.
    pub async fn ensure_fresh(&self) -> KbResult<FreshIndex> {
        let live = self.live_signature()?;
        if let Some(kb) = self.cached_if_current().await? {
            if !is_stale(Some(&kb), &live) {
                return Ok(FreshIndex { kb, rebuilt: false });
            }
        }

        let _guard = self.rebuild_lock.lock().await;
        // Otra consulta pudo reconstruir mientras esperábamos el mutex.
        let live = self.live_signature()?;
        let revision = self.store.revision()?;
        if let Some(kb) = self.store.load()? {
            if !is_stale(Some(&kb), &live) {
                let kb = Arc::new(kb);
                self.remember(kb.clone(), revision).await;
                return Ok(FreshIndex { kb, rebuilt: false });
            }
        }

        info!("Índice ausente u obsoleto; reconstruyendo antes de responder.");
        let outcome = self.run_build().await?;
        let kb = Arc::new(outcome.kb);
        self.remember(kb.clone(), self.store.revision()?).await;
        Ok(FreshIndex { kb, rebuilt: true })
    }

    /// Reconstrucción forzada.
    pub async fn rebuild(&self) -> KbResult<BuildOutcome> {
        let _guard = self.rebuild_lock.lock().await;
        let outcome = self.run_build().await?;
        self.remember(Arc::new(outcome.kb.clone()), self.store.revision()?)
            .await;
        Ok(outcome)
    }

    /// Recupera los chunks más relevantes sobre un índice al día.
    pub async fn retrieve(
        &self,
        query: &str,
        opts: RetrievalOptions,
    ) -> KbResult<(FreshIndex, Vec<RetrievalResult>)> {
        let fresh = self.ensure_fresh().await?;
        let results = retrieve(&fresh.kb, self.embedder.as_ref(), query, opts).await?;
        Ok((fresh, results))
    }

    async fn run_build(&self) -> KbResult<BuildOutcome> {
        set_busy(&self.status, true);
        report(&self.status, "Iniciando indexación...", 0.0);

        let result = build_knowledge_base(
            self.corpus.as_ref(),
            self.embedder.as_ref(),
            self.store.as_ref(),
            &self.settings,
            Some(&self.status),
            (self.clock)(),
        )
        .await;

        set_busy(&self.status, false);
        match &result {
            Ok(outcome) => report(&self.status, format!("¡Indexación completada! {}", outcome.summary), 0.0),
            Err(err) => {
                error!("Error de indexación: {err}");
                report(&self.status, format!("Error en la indexación: {err}"), 0.0);
            }
        }
        result
    }
}
