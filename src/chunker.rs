//! Troceo de documentos en chunks solapados por límites de párrafo.
//!
//! Algoritmo:
//!   1. Normalizar y separar en párrafos por líneas en blanco.
//!   2. Acumular párrafos en un buffer mientras quepan en `chunk_size_chars`
//!      (contando el separador `\n\n`).
//!   3. Si no cabe, emitir el buffer y arrancar uno nuevo sembrado con los
//!      últimos `overlap_chars` caracteres del anterior.
//!   4. Un párrafo mayor que `chunk_size_chars * 1.8` se corta en trozos fijos
//!      de `chunk_size_chars`, sin solape.
//!
//! Todas las longitudes se miden en caracteres, no en bytes.

use crate::normalize::normalize;

/// Factor a partir del cual un párrafo se considera demasiado grande.
pub const OVERSIZE_FACTOR: f64 = 1.8;

const PARAGRAPH_SEPARATOR: &str = "\n\n";
const SEPARATOR_CHARS: usize = 2;

const MIN_CHUNK_CHARS: usize = 800;
const MAX_CHUNK_CHARS: usize = 3200;
const DEFAULT_CHUNK_CHARS: usize = 1400;
const MIN_OVERLAP_CHARS: usize = 80;
const MAX_OVERLAP_CHARS: usize = 450;
const OVERLAP_RATIO: f64 = 0.12;

/// Tamaño de chunk y solape elegidos para un corpus concreto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSizing {
    pub chunk_size_chars: usize,
    pub overlap_chars: usize,
}

impl ChunkSizing {
    /// Ajusta el tamaño al volumen del corpus para acercarse a
    /// `target_chunk_count` chunks sin salirse de [800, 3200].
    pub fn for_corpus(total_chars: usize, target_chunk_count: usize) -> Self {
        let chunk_size_chars = if total_chars == 0 || target_chunk_count == 0 {
            DEFAULT_CHUNK_CHARS
        } else {
            (total_chars / target_chunk_count).clamp(MIN_CHUNK_CHARS, MAX_CHUNK_CHARS)
        };
        let overlap = (OVERLAP_RATIO * chunk_size_chars as f64).round() as usize;
        Self {
            chunk_size_chars,
            overlap_chars: overlap.clamp(MIN_OVERLAP_CHARS, MAX_OVERLAP_CHARS),
        }
    }
}

/// Trocea `text` en chunks no vacíos.
///
/// Requiere `0 < overlap_chars < chunk_size_chars`; un solape fuera de rango
/// se recorta a `chunk_size_chars - 1`.
pub fn chunk_text(text: &str, chunk_size_chars: usize, overlap_chars: usize) -> Vec<String> {
    let chunk_size_chars = chunk_size_chars.max(1);
    let overlap_chars = overlap_chars.min(chunk_size_chars - 1);
    let max_chars = (chunk_size_chars as f64 * OVERSIZE_FACTOR) as usize;

    let normalized = normalize(text);
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    for para in normalized.split(PARAGRAPH_SEPARATOR) {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        let para_chars = para.chars().count();

        if para_chars as f64 > chunk_size_chars as f64 * OVERSIZE_FACTOR {
            flush(&mut chunks, &mut buf);
            buf_chars = 0;
            chunks.extend(hard_split(para, chunk_size_chars));
            continue;
        }

        let joined = if buf.is_empty() {
            para_chars
        } else {
            buf_chars + SEPARATOR_CHARS + para_chars
        };
        if joined <= chunk_size_chars {
            if !buf.is_empty() {
                buf.push_str(PARAGRAPH_SEPARATOR);
            }
            buf.push_str(para);
            buf_chars = joined;
            continue;
        }

        let seed = tail_chars(&buf, overlap_chars);
        flush(&mut chunks, &mut buf);
        let seed = seed.trim_start();
        let seed_chars = seed.chars().count();

        // El solape sólo se añade si el chunk resultante respeta el límite.
        if !seed.is_empty() && seed_chars + SEPARATOR_CHARS + para_chars <= max_chars {
            buf.push_str(seed);
            buf.push_str(PARAGRAPH_SEPARATOR);
            buf_chars = seed_chars + SEPARATOR_CHARS + para_chars;
        } else {
            buf_chars = para_chars;
        }
        buf.push_str(para);
    }
    flush(&mut chunks, &mut buf);

    chunks
}

fn flush(chunks: &mut Vec<String>, buf: &mut String) {
    let trimmed = buf.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
    buf.clear();
}

fn tail_chars(text: &str, n: usize) -> String {
    let total = text.chars().count();
    text.chars().skip(total.saturating_sub(n)).collect()
}

fn hard_split(para: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = para.chars().collect();
    chars
        .chunks(size)
        .map(|slice| slice.iter().collect::<String>())
        .filter(|s: &String| !s.trim().is_empty())
        .collect()
}
