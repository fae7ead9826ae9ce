//! Base de conocimiento RAG sobre un directorio de documentos.
//!
//! Ingesta de PDF/TXT/MD, troceo solapado, índice de embeddings persistido en
//! JSON con detección de obsolescencia y recuperación por similitud coseno con
//! tope de diversidad por documento.

pub mod api;
pub mod app_state;
pub mod builder;
pub mod chunker;
pub mod config;
pub mod corpus;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod models;
pub mod normalize;
pub mod qa_merge;
pub mod rag;
pub mod retriever;
pub mod store;
