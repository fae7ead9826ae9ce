//! Carga y gestión de configuración de la aplicación (corpus, índice y LLM).

use std::{env, path::PathBuf, str::FromStr};

use anyhow::{anyhow, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub docs_dir: PathBuf,
    pub index_path: PathBuf,
    pub server_addr: String,
    pub static_dir: PathBuf,
    pub open_browser: bool,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub llm_max_output_tokens: u64,

    pub target_chunk_count: usize,
    pub embed_batch_size: usize,
    pub embed_concurrency: usize,
    pub top_k: usize,
    pub per_doc_cap: usize,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let llm_provider = env::var("LLM_PROVIDER")
            .unwrap_or_else(|_| "openai".to_string())
            .parse()?;

        Ok(Self {
            docs_dir: env_or("DOCS_DIR", "docs").into(),
            index_path: env_or("INDEX_PATH", "data/knowledge_base.json").into(),
            server_addr: env_or("SERVER_ADDR", "127.0.0.1:3322"),
            static_dir: env_or("STATIC_DIR", "frontend").into(),
            open_browser: env_parse("OPEN_BROWSER", false)?,
            llm_provider,
            llm_embedding_model: env_or("LLM_EMBEDDING_MODEL", "text-embedding-3-small"),
            llm_chat_model: env_or("LLM_CHAT_MODEL", "gpt-4o-mini"),
            llm_max_output_tokens: env_parse("LLM_MAX_OUTPUT_TOKENS", 700)?,
            target_chunk_count: env_parse("KB_TARGET_CHUNKS", 300)?,
            embed_batch_size: env_parse("KB_EMBED_BATCH", 64)?,
            embed_concurrency: env_parse("KB_EMBED_CONCURRENCY", 1)?,
            top_k: env_parse("RAG_TOP_K", 6)?,
            per_doc_cap: env_parse("RAG_PER_DOC_CAP", 2)?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Valor inválido en {key} ('{raw}'): {e}")),
        _ => Ok(default),
    }
}
