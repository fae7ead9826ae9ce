//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.
//!
//! El motor sólo conoce los traits [`Embedder`] y [`AnswerGenerator`];
//! [`LlmManager`] es la implementación real.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts

use crate::{
    config::{AppConfig, LlmProvider},
    error::{KbError, KbResult},
    models::RetrievalResult,
};

/// Proveedor de embeddings. Devuelve un vector por texto, en el mismo orden.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn embed_model(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> KbResult<Vec<Vec<f64>>>;
}

/// Redacta la respuesta final a partir de los chunks recuperados.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn chat_model(&self) -> &str;

    async fn generate(&self, question: &str, context: &[RetrievalResult]) -> Result<String>;
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
    pub max_output_tokens: u64,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            max_output_tokens: cfg.llm_max_output_tokens,
        })
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    async fn embed_with_openai(&self, texts: &[String]) -> KbResult<Vec<Vec<f64>>> {
        use rig::client::EmbeddingsClient as _;
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};

        let client = openai::Client::from_env();
        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        let embeddings = embedding_model
            .embed_texts(texts.to_vec())
            .await
            .map_err(|e| KbError::EmbeddingProvider(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(KbError::EmbeddingProvider(format!(
                "Número de embeddings ({}) distinto al número de textos ({})",
                embeddings.len(),
                texts.len()
            )));
        }

        Ok(embeddings.into_iter().map(|e| e.vec).collect())
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    async fn answer_with_openai(&self, question: &str, context: &str) -> Result<String> {
        use rig::client::CompletionClient as _;
        use rig::providers::openai;

        const SYSTEM_PROMPT: &str = r#"
Eres un asistente experto en RAG.
Respondes en el idioma de la pregunta, de forma clara y concisa.
Sólo puedes usar la información suministrada en el contexto, que contiene fragmentos de documentos.
Si el contexto no contiene la respuesta, di explícitamente que no la sabes.
"#;

        let client = openai::Client::from_env();
        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client
            .agent(model_name)
            .preamble(SYSTEM_PROMPT)
            .context(context)
            .max_tokens(self.max_output_tokens)
            .build();

        let answer = agent.prompt(question).await?;
        Ok(answer)
    }
}

#[async_trait]
impl Embedder for LlmManager {
    fn embed_model(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(&self, texts: &[String]) -> KbResult<Vec<Vec<f64>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self.provider {
            LlmProvider::OpenAI => self.embed_with_openai(texts).await,
            ref other => Err(KbError::EmbeddingProvider(format!(
                "Proveedor LLM {other:?} aún no implementado para embeddings"
            ))),
        }
    }
}

#[async_trait]
impl AnswerGenerator for LlmManager {
    fn chat_model(&self) -> &str {
        &self.chat_model
    }

    async fn generate(&self, question: &str, context: &[RetrievalResult]) -> Result<String> {
        let context = format_context(context);
        match self.provider {
            LlmProvider::OpenAI => self.answer_with_openai(question, &context).await,
            ref other => Err(anyhow!("Proveedor LLM {other:?} aún no implementado para chat")),
        }
    }
}

/// Contexto para el modelo: sólo los chunks seleccionados, nunca el índice.
pub fn format_context(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .map(|r| format!("[{} #{}]\n{}", r.doc, r.chunk_index, r.text))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
