//! Persistencia del índice: contrato de carga/guardado y almacén en un
//! fichero JSON con copia de seguridad previa y escritura atómica.

use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, warn};

use crate::{error::KbResult, models::KnowledgeBase};

/// Contrato de persistencia de la base de conocimiento.
pub trait IndexStore: Send + Sync {
    /// `None` si todavía no hay índice.
    fn load(&self) -> KbResult<Option<KnowledgeBase>>;

    /// Guarda el índice. Devuelve la ruta de la copia de seguridad si se hizo una.
    fn save(&self, kb: &KnowledgeBase) -> KbResult<Option<PathBuf>>;

    /// Marca que cambia con cada guardado, también los hechos por otro proceso.
    /// `None` si todavía no hay índice.
    fn revision(&self) -> KbResult<Option<String>>;
}

/// Índice guardado como un único fichero JSON.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Copia el índice actual junto al original, si existe. Nunca pisa una
    /// copia anterior: si el nombre ya está ocupado se añade `-1`, `-2`...
    pub fn backup(&self, now: DateTime<Utc>) -> KbResult<Option<PathBuf>> {
        if !self.path.is_file() {
            return Ok(None);
        }
        let base = backup_path(&self.path, now);
        let mut attempt = 0usize;
        loop {
            let candidate = if attempt == 0 {
                base.clone()
            } else {
                numbered(&base, attempt)
            };
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(mut target) => {
                    io::copy(&mut File::open(&self.path)?, &mut target)?;
                    info!("💾 Copia de seguridad del índice en {}", candidate.display());
                    return Ok(Some(candidate));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl IndexStore for JsonFileStore {
    fn load(&self) -> KbResult<Option<KnowledgeBase>> {
        if !self.path.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        match serde_json::from_str(&raw) {
            Ok(kb) => Ok(Some(kb)),
            Err(e) => {
                warn!(
                    "Índice ilegible en {} ({e}); se tratará como inexistente.",
                    self.path.display()
                );
                Ok(None)
            }
        }
    }

    fn save(&self, kb: &KnowledgeBase) -> KbResult<Option<PathBuf>> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let backup = self.backup(Utc::now())?;

        let tmp = tmp_path(&self.path);
        let body = serde_json::to_vec(kb)?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;

        info!(
            "Índice guardado en {} ({} unidades).",
            self.path.display(),
            kb.chunks.len()
        );
        Ok(backup)
    }

    fn revision(&self) -> KbResult<Option<String>> {
        let metadata = match fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Ok(Some(format!("{}|{}", metadata.len(), modified)))
    }
}

/// `<nombre>_backup_<ISO8601 con ':' y '.' cambiados por '-'>.json` junto al original.
pub fn backup_path(original: &Path, now: DateTime<Utc>) -> PathBuf {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "knowledge_base".to_string());
    let stamp = now
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    original.with_file_name(format!("{stem}_backup_{stamp}.json"))
}

fn numbered(backup: &Path, n: usize) -> PathBuf {
    let stem = backup
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    backup.with_file_name(format!("{stem}-{n}.json"))
}

fn tmp_path(original: &Path) -> PathBuf {
    let mut name = original
        .file_name()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    original.with_file_name(name)
}
