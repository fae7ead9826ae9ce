use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use axum::Router;
use chrono::Utc;
use clap::{Parser, Subcommand};
use kb_rag::{
    api,
    app_state::{AppState, Status, StatusHandle},
    builder::BuildSettings,
    config::AppConfig,
    corpus::FsCorpus,
    knowledge::KnowledgeBaseHandle,
    llm::{Embedder, LlmManager},
    qa_merge::{self, DedupKey, MergeMode, MergeOptions},
    store::JsonFileStore,
};
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kb-rag", version, about = "Base de conocimiento RAG sobre un directorio de documentos")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Arranca el servidor web (por defecto).
    Serve,
    /// Reconstruye el índice a partir de DOCS_DIR.
    Rebuild,
    /// Fusiona datasets pregunta/respuesta en el índice.
    MergeQa {
        /// Índice a modificar (por defecto INDEX_PATH).
        #[arg(long)]
        index: Option<PathBuf>,
        /// Ficheros JSON con registros QA.
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// append | replace
        #[arg(long, default_value = "append")]
        mode: MergeMode,
        /// question | question-answer
        #[arg(long, default_value = "question")]
        dedup_by: DedupKey,
        /// No calcular embeddings de los bloques nuevos.
        #[arg(long)]
        no_embed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cli = Cli::parse();
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Inicializar gestor de LLMs
    let llm_manager = Arc::new(LlmManager::from_config(&cfg).context("Error inicializando LLM Manager")?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cfg, llm_manager).await,
        Command::Rebuild => {
            let handle = knowledge_handle(&cfg, llm_manager, Status::ready("Reconstrucción manual."));
            let outcome = handle.rebuild().await?;
            println!("{}", outcome.summary);
            Ok(())
        }
        Command::MergeQa {
            index,
            files,
            mode,
            dedup_by,
            no_embed,
        } => {
            let index = index.unwrap_or_else(|| cfg.index_path.clone());
            let embedder = (!no_embed).then(|| llm_manager.as_ref() as &dyn Embedder);
            let report = qa_merge::merge_into_index(
                &index,
                &files,
                MergeOptions { mode, dedup: dedup_by },
                embedder,
                cfg.embed_batch_size,
            )
            .await?;
            println!("{report}");
            Ok(())
        }
    }
}

fn knowledge_handle(
    cfg: &AppConfig,
    llm_manager: Arc<LlmManager>,
    status: StatusHandle,
) -> KnowledgeBaseHandle {
    KnowledgeBaseHandle::new(
        Arc::new(FsCorpus::new(&cfg.docs_dir)),
        Arc::new(JsonFileStore::new(&cfg.index_path)),
        llm_manager,
        BuildSettings::from_config(cfg),
        status,
    )
    .with_clock(Utc::now)
}

async fn serve(cfg: AppConfig, llm_manager: Arc<LlmManager>) -> Result<()> {
    let status = Status::ready("Servidor listo.");
    let kb = Arc::new(knowledge_handle(&cfg, llm_manager.clone(), status.clone()));

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 4. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        kb,
        generator: llm_manager,
        status,
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 5. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new(&cfg.static_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 6. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    let server_url = format!("http://{}", server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);
    info!(
        "Corpus: {} · Índice: {}",
        cfg.docs_dir.display(),
        cfg.index_path.display()
    );

    if cfg.open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
