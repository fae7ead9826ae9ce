//! Corpus de documentos: listado de ficheros elegibles, extracción de texto
//! y firma del conjunto para detectar índices obsoletos.

use std::{fs, path::PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::{
    error::{KbError, KbResult},
    models::{Document, KnowledgeBase},
};

pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];

const SIGNATURE_SEPARATOR: &str = "\n";

/// Origen de documentos del que se construye la base de conocimiento.
pub trait DocumentSource: Send + Sync {
    /// Documentos elegibles en el estado actual del origen.
    fn list_documents(&self) -> KbResult<Vec<Document>>;

    /// Texto bruto (sin normalizar) de un documento.
    fn extract_text(&self, doc: &Document) -> KbResult<String>;

    /// Descripción para mensajes y logs.
    fn describe(&self) -> String;
}

/// Corpus respaldado por un directorio del sistema de archivos.
#[derive(Debug, Clone)]
pub struct FsCorpus {
    root: PathBuf,
}

impl FsCorpus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DocumentSource for FsCorpus {
    fn list_documents(&self) -> KbResult<Vec<Document>> {
        if !self.root.is_dir() {
            warn!("El directorio del corpus no existe: {}", self.root.display());
            return Ok(Vec::new());
        }

        let mut docs = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Entrada del corpus inaccesible, se omite: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let extension = path
                .extension()
                .and_then(std::ffi::OsStr::to_str)
                .unwrap_or("")
                .to_lowercase();
            if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
                debug!("Saltando fichero con extensión no soportada: {}", path.display());
                continue;
            }

            let metadata = entry.metadata().map_err(|e| KbError::Io(e.into()))?;
            let modified: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
            let name = path
                .strip_prefix(&self.root)
                .unwrap_or(path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            docs.push(Document {
                name,
                full_path: path.to_string_lossy().to_string(),
                size_bytes: metadata.len(),
                mtime_millis: modified.timestamp_millis(),
                extension,
            });
        }

        docs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(docs)
    }

    fn extract_text(&self, doc: &Document) -> KbResult<String> {
        let extraction_error = |message: String| KbError::Extraction {
            path: doc.full_path.clone(),
            message,
        };
        match doc.extension.as_str() {
            "pdf" => pdf_extract::extract_text(&doc.full_path).map_err(|e| extraction_error(e.to_string())),
            _ => {
                let bytes = fs::read(&doc.full_path).map_err(|e| extraction_error(e.to_string()))?;
                String::from_utf8(bytes).map_err(|_| extraction_error("el fichero no es UTF-8".to_string()))
            }
        }
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Huella del conjunto de documentos a partir de `nombre|tamaño|mtime`.
///
/// No depende del orden del listado. No es un hash de contenido: un fichero
/// sustituido con el mismo tamaño y mtime no se detecta.
pub fn signature(docs: &[Document]) -> String {
    let mut tokens: Vec<String> = docs
        .iter()
        .map(|d| format!("{}|{}|{}", d.name, d.size_bytes, d.mtime_millis))
        .collect();
    tokens.sort();
    tokens.join(SIGNATURE_SEPARATOR)
}

/// Un índice está obsoleto si no existe, si no tiene firma o si su firma no
/// coincide con la del corpus vivo.
pub fn is_stale(kb: Option<&KnowledgeBase>, live_signature: &str) -> bool {
    match kb.and_then(|kb| kb.meta.docs_signature.as_deref()) {
        Some(stored) => stored != live_signature,
        None => true,
    }
}
