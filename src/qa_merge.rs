//! Fusión de datasets pregunta/respuesta en el índice.
//!
//! Cada registro QA se convierte en una unidad recuperable cuyo texto reúne
//! pregunta, respuesta, variantes y etiquetas. Los datasets llegan con formas
//! y nombres de campo heterogéneos (`question`/`q`/`pregunta`...); el esquema
//! se resuelve una vez por fichero a partir del primer registro.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{
    builder::embed_in_batches,
    error::{KbError, KbResult},
    llm::Embedder,
    models::{Chunk, KbMeta, KnowledgeBase, KnowledgeUnit, QaBlock, Retrievable, QA_ID_PREFIX},
    normalize::{fold_key, normalize},
    store::{IndexStore, JsonFileStore},
};

const QUESTION_FIELDS: [&str; 5] = ["question", "q", "pregunta", "prompt", "title"];
const ANSWER_FIELDS: [&str; 6] = ["answer", "a", "respuesta", "response", "content", "text"];
const VARIANT_FIELDS: [&str; 5] = ["variants", "paraphrases", "variantes", "alternatives", "alt_questions"];
const TAG_FIELDS: [&str; 4] = ["tags", "etiquetas", "keywords", "labels"];
const ID_FIELDS: [&str; 3] = ["id", "uid", "key"];

/// Claves de contenedor probadas, en orden, cuando el JSON no es un array.
const CONTAINER_KEYS: [&str; 3] = ["items", "blocks", "qa"];

const QUESTION_LABEL: &str = "Pregunta: ";
const ANSWER_LABEL: &str = "Respuesta: ";
const VARIANTS_LABEL: &str = "Variantes: ";
const TAGS_LABEL: &str = "Etiquetas: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// Conserva los bloques QA existentes y deduplica contra ellos.
    #[default]
    Append,
    /// Sustituye los bloques QA existentes; sólo se deduplica dentro de esta fusión.
    Replace,
}

impl FromStr for MergeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "replace" => Ok(Self::Replace),
            other => Err(format!("modo desconocido: {other} (append|replace)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupKey {
    #[default]
    Question,
    QuestionAnswer,
}

impl FromStr for DedupKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "question" => Ok(Self::Question),
            "question-answer" | "question_answer" => Ok(Self::QuestionAnswer),
            other => Err(format!("clave desconocida: {other} (question|question-answer)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    pub mode: MergeMode,
    pub dedup: DedupKey,
}

/// Registro QA ya mapeado a campos canónicos.
#[derive(Debug, Clone, PartialEq)]
pub struct QaRecord {
    pub id: Option<String>,
    pub question: String,
    pub answer: String,
    pub variants: Vec<String>,
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct QaDataset {
    pub source: String,
    pub records: Vec<QaRecord>,
    /// Registros sin pregunta o sin respuesta.
    pub skipped_records: usize,
}

/// Correspondencia entre campos canónicos y las claves de un dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMap {
    pub question: &'static str,
    pub answer: &'static str,
    pub variants: Option<&'static str>,
    pub tags: Option<&'static str>,
    pub id: Option<&'static str>,
}

impl FieldMap {
    /// Elige, para cada campo, la primera clave candidata presente en `sample`.
    pub fn resolve(sample: &Map<String, Value>) -> Option<Self> {
        let pick = |candidates: &[&'static str]| candidates.iter().copied().find(|k| sample.contains_key(*k));
        let question = pick(&QUESTION_FIELDS)?;
        let answer = ANSWER_FIELDS
            .iter()
            .copied()
            .find(|k| *k != question && sample.contains_key(*k))?;
        Some(Self {
            question,
            answer,
            variants: pick(&VARIANT_FIELDS),
            tags: pick(&TAG_FIELDS),
            id: pick(&ID_FIELDS),
        })
    }

    fn apply(&self, record: &Map<String, Value>) -> Option<QaRecord> {
        let question = single_line(record.get(self.question).and_then(Value::as_str)?);
        let answer = normalize(record.get(self.answer).and_then(Value::as_str)?);
        if question.is_empty() || answer.is_empty() {
            return None;
        }
        let variants = self
            .variants
            .and_then(|k| record.get(k))
            .map(string_list)
            .unwrap_or_default()
            .into_iter()
            .map(|v| single_line(&v))
            .filter(|v| !v.is_empty())
            .collect();
        let tags = self
            .tags
            .and_then(|k| record.get(k))
            .map(string_list)
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let id = self.id.and_then(|k| record.get(k)).and_then(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        Some(QaRecord {
            id,
            question,
            answer,
            variants,
            tags,
        })
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Acepta un array de cadenas o una única cadena separada por `|` o `,`.
fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(s) => s.split(['|', ',']).map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

/// Extrae la lista de registros probando las formas conocidas en orden.
fn records_of(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(obj) => CONTAINER_KEYS
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_array)),
        _ => None,
    }
}

/// Interpreta un dataset ya parseado.
pub fn parse_dataset(source: &str, value: &Value) -> KbResult<QaDataset> {
    let malformed = |reason: &str| KbError::MalformedDataset {
        path: source.to_string(),
        reason: reason.to_string(),
    };
    let items = records_of(value).ok_or_else(|| malformed("se esperaba un array o {items|blocks|qa}"))?;

    let mut dataset = QaDataset {
        source: source.to_string(),
        records: Vec::new(),
        skipped_records: 0,
    };
    if items.is_empty() {
        return Ok(dataset);
    }

    let sample = items
        .iter()
        .find_map(Value::as_object)
        .ok_or_else(|| malformed("ningún registro es un objeto"))?;
    let fields = FieldMap::resolve(sample).ok_or_else(|| malformed("no se reconocen campos de pregunta y respuesta"))?;

    for item in items {
        match item.as_object().and_then(|obj| fields.apply(obj)) {
            Some(record) => dataset.records.push(record),
            None => dataset.skipped_records += 1,
        }
    }
    Ok(dataset)
}

/// Lee un fichero de dataset. Cualquier fallo se informa como dataset mal formado.
pub fn load_dataset(path: &Path) -> KbResult<QaDataset> {
    let source = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let malformed = |reason: String| KbError::MalformedDataset {
        path: path.display().to_string(),
        reason,
    };
    let raw = fs::read_to_string(path).map_err(|e| malformed(e.to_string()))?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| malformed(e.to_string()))?;
    parse_dataset(&source, &value)
}

/// Forma de las unidades que se añaden al índice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSchema {
    DocumentChunk,
    QaBlock,
}

impl TargetSchema {
    /// Se imita la forma de la primera unidad existente.
    pub fn detect(existing: &[KnowledgeUnit]) -> Self {
        match existing.first() {
            Some(KnowledgeUnit::Chunk(_)) => Self::DocumentChunk,
            _ => Self::QaBlock,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub units: Vec<KnowledgeUnit>,
    pub schema: TargetSchema,
    pub added: usize,
    pub duplicates: usize,
    pub removed: usize,
    pub skipped_records: usize,
}

/// Texto recuperable de un registro.
pub fn compose_text(record: &QaRecord) -> String {
    let mut text = format!("{QUESTION_LABEL}{}\n{ANSWER_LABEL}{}", record.question, record.answer);
    if !record.variants.is_empty() {
        text.push('\n');
        text.push_str(VARIANTS_LABEL);
        text.push_str(&record.variants.join(" | "));
    }
    if !record.tags.is_empty() {
        text.push('\n');
        text.push_str(TAGS_LABEL);
        text.push_str(&record.tags.iter().cloned().collect::<Vec<_>>().join(", "));
    }
    text
}

/// Recupera pregunta y respuesta del texto compuesto por [`compose_text`].
fn split_composed(text: &str) -> Option<(String, String)> {
    let rest = text.strip_prefix(QUESTION_LABEL)?;
    let (question, rest) = rest.split_once(&format!("\n{ANSWER_LABEL}"))?;
    let answer_end = [VARIANTS_LABEL, TAGS_LABEL]
        .iter()
        .filter_map(|label| rest.find(&format!("\n{label}")))
        .min()
        .unwrap_or(rest.len());
    Some((question.to_string(), rest[..answer_end].to_string()))
}

fn dedup_key(question: &str, answer: &str, dedup: DedupKey) -> String {
    match dedup {
        DedupKey::Question => fold_key(question),
        DedupKey::QuestionAnswer => format!("{}\u{1f}{}", fold_key(question), fold_key(answer)),
    }
}

/// Clave de deduplicación de una unidad ya presente en el índice. Los bloques
/// QA aportan su pregunta (metadatos, texto compuesto o título); los chunks
/// sólo cuentan si su texto tiene la forma de [`compose_text`].
fn existing_key(unit: &KnowledgeUnit, dedup: DedupKey) -> Option<String> {
    let composed = split_composed(unit.text());
    let (question, answer) = match unit {
        KnowledgeUnit::Qa(block) => {
            let meta_str = |k: &str| block.meta.get(k).and_then(Value::as_str).map(str::to_string);
            let question = meta_str("question")
                .or_else(|| composed.as_ref().map(|(q, _)| q.clone()))
                .or_else(|| Some(block.title.clone()).filter(|t| !t.trim().is_empty()))?;
            let answer = meta_str("answer")
                .or_else(|| composed.map(|(_, a)| a))
                .unwrap_or_else(|| block.text.clone());
            (question, answer)
        }
        KnowledgeUnit::Chunk(_) => composed?,
    };
    Some(dedup_key(&question, &answer, dedup))
}

/// Fusiona los datasets con las unidades existentes y devuelve la lista completa.
pub fn merge_qa(existing: &[KnowledgeUnit], datasets: &[QaDataset], opts: MergeOptions) -> MergeOutcome {
    let schema = TargetSchema::detect(existing);

    let (mut units, removed): (Vec<KnowledgeUnit>, usize) = match opts.mode {
        MergeMode::Append => (existing.to_vec(), 0),
        MergeMode::Replace => {
            let kept: Vec<_> = existing.iter().filter(|u| !u.is_merged_qa()).cloned().collect();
            let removed = existing.len() - kept.len();
            (kept, removed)
        }
    };

    let mut seen: HashSet<String> = match opts.mode {
        MergeMode::Append => units.iter().filter_map(|u| existing_key(u, opts.dedup)).collect(),
        MergeMode::Replace => HashSet::new(),
    };
    let mut used_ids: HashSet<String> = units.iter().map(|u| u.id().to_string()).collect();
    let mut next_index: HashMap<String, usize> = HashMap::new();

    let mut outcome = MergeOutcome {
        units: Vec::new(),
        schema,
        added: 0,
        duplicates: 0,
        removed,
        skipped_records: 0,
    };

    for dataset in datasets {
        outcome.skipped_records += dataset.skipped_records;
        for record in &dataset.records {
            if !seen.insert(dedup_key(&record.question, &record.answer, opts.dedup)) {
                outcome.duplicates += 1;
                continue;
            }

            let counter = next_index.entry(dataset.source.clone()).or_insert(0);
            let (id, position) = loop {
                let candidate = format!("{QA_ID_PREFIX}{}::{}", dataset.source, counter);
                let position = *counter;
                *counter += 1;
                if used_ids.insert(candidate.clone()) {
                    break (candidate, position);
                }
            };

            let text = compose_text(record);
            let unit = match schema {
                TargetSchema::DocumentChunk => KnowledgeUnit::Chunk(Chunk {
                    id,
                    doc: dataset.source.clone(),
                    chunk_index: position,
                    text,
                    embedding: Vec::new(),
                }),
                TargetSchema::QaBlock => {
                    let mut meta = Map::new();
                    meta.insert("origin".into(), Value::from("qa-merge"));
                    meta.insert("question".into(), Value::from(record.question.clone()));
                    meta.insert("answer".into(), Value::from(record.answer.clone()));
                    if let Some(original) = &record.id {
                        meta.insert("sourceId".into(), Value::from(original.clone()));
                    }
                    if !record.variants.is_empty() {
                        meta.insert("variants".into(), Value::from(record.variants.clone()));
                    }
                    KnowledgeUnit::Qa(QaBlock {
                        id,
                        title: record.question.clone(),
                        source: dataset.source.clone(),
                        text,
                        tags: record.tags.clone(),
                        meta,
                        embedding: Vec::new(),
                    })
                }
            };
            units.push(unit);
            outcome.added += 1;
        }
    }

    outcome.units = units;
    outcome
}

/// Resultado de la herramienta de fusión sobre un fichero de índice.
#[derive(Debug, Default)]
pub struct MergeReport {
    pub files_read: usize,
    pub files_skipped: Vec<PathBuf>,
    pub added: usize,
    pub duplicates: usize,
    pub removed: usize,
    pub skipped_records: usize,
    pub embedded: usize,
    pub backup: Option<PathBuf>,
}

impl std::fmt::Display for MergeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} ficheros leídos, {} omitidos. {} bloques añadidos, {} duplicados, {} sustituidos, {} registros incompletos, {} embeddings calculados.",
            self.files_read,
            self.files_skipped.len(),
            self.added,
            self.duplicates,
            self.removed,
            self.skipped_records,
            self.embedded
        )
    }
}

/// Fusiona ficheros QA en el índice de `index_path`, con copia de seguridad
/// previa. Los ficheros mal formados se omiten con un aviso.
pub async fn merge_into_index(
    index_path: &Path,
    files: &[PathBuf],
    opts: MergeOptions,
    embedder: Option<&dyn Embedder>,
    batch_size: usize,
) -> KbResult<MergeReport> {
    let store = JsonFileStore::new(index_path);
    let mut kb = store.load()?.unwrap_or_else(|| KnowledgeBase {
        meta: KbMeta::empty(Utc::now()),
        chunks: Vec::new(),
    });

    let mut report = MergeReport::default();
    let mut datasets = Vec::new();
    for path in files {
        match load_dataset(path) {
            Ok(dataset) => {
                report.files_read += 1;
                datasets.push(dataset);
            }
            Err(err) => {
                warn!("Se omite el dataset: {err}");
                report.files_skipped.push(path.clone());
            }
        }
    }

    let outcome = merge_qa(&kb.chunks, &datasets, opts);
    report.added = outcome.added;
    report.duplicates = outcome.duplicates;
    report.removed = outcome.removed;
    report.skipped_records = outcome.skipped_records;
    kb.chunks = outcome.units;

    if let Some(embedder) = embedder {
        let pending: Vec<usize> = kb
            .chunks
            .iter()
            .enumerate()
            .filter(|(_, u)| u.is_merged_qa() && u.embedding().is_empty())
            .map(|(i, _)| i)
            .collect();
        let texts: Vec<String> = pending.iter().map(|i| kb.chunks[*i].text().to_string()).collect();
        let vectors = embed_in_batches(embedder, &texts, batch_size, 1, None).await?;
        for (i, vector) in pending.into_iter().zip(vectors) {
            kb.chunks[i].set_embedding(vector);
        }
        report.embedded = texts.len();
    }

    report.backup = store.save(&kb)?;
    info!("Fusión QA completada en {}. {}", index_path.display(), report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::llm::fake::FakeEmbedder;

    fn dataset(source: &str, value: Value) -> QaDataset {
        parse_dataset(source, &value).unwrap()
    }

    #[test]
    fn test_field_resolution_first_match_wins() {
        let sample = json!({"pregunta": "¿Horario?", "q": "corta", "respuesta": "9-18", "etiquetas": ["horario"]});
        let map = FieldMap::resolve(sample.as_object().unwrap()).unwrap();
        assert_eq!(map.question, "q");
        assert_eq!(map.answer, "respuesta");
        assert_eq!(map.tags, Some("etiquetas"));
        assert_eq!(map.variants, None);
    }

    #[test]
    fn test_title_and_text_shape() {
        let sample = json!({"title": "¿Envío?", "text": "Gratis desde 50€"});
        let map = FieldMap::resolve(sample.as_object().unwrap()).unwrap();
        assert_eq!((map.question, map.answer), ("title", "text"));
    }

    #[test]
    fn test_dataset_shapes_in_priority_order() {
        let record = json!({"question": "¿Precio?", "answer": "10€"});
        for value in [
            json!([record.clone()]),
            json!({"items": [record.clone()]}),
            json!({"blocks": [record.clone()]}),
            json!({"qa": [record.clone()]}),
            json!({"items": [record.clone()], "qa": "ignorado"}),
        ] {
            assert_eq!(dataset("faq.json", value).records.len(), 1);
        }
    }

    #[test]
    fn test_unrecognised_shapes_are_malformed() {
        for value in [
            json!({"data": []}),
            json!("texto"),
            json!([1, 2, 3]),
            json!([{"foo": "bar"}]),
        ] {
            let err = parse_dataset("raro.json", &value).unwrap_err();
            assert!(matches!(err, KbError::MalformedDataset { .. }), "{value}");
        }
    }

    #[test]
    fn test_incomplete_records_are_counted() {
        let ds = dataset(
            "faq.json",
            json!([
                {"question": "¿Uno?", "answer": "uno", "variants": "¿1? | ¿un?", "id": 7},
                {"question": "¿Dos?"},
                {"question": "  ", "answer": "vacía"},
                "no es objeto"
            ]),
        );
        assert_eq!(ds.records.len(), 1);
        assert_eq!(ds.skipped_records, 3);
        assert_eq!(ds.records[0].variants, vec!["¿1?", "¿un?"]);
        assert_eq!(ds.records[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_compose_text_and_split_back() {
        let record = QaRecord {
            id: None,
            question: "¿Cuál es el horario?".into(),
            answer: "De 9 a 18.\n\nSábados cerrado.".into(),
            variants: vec!["¿A qué hora abrís?".into()],
            tags: ["horario".to_string(), "tienda".to_string()].into_iter().collect(),
        };
        let text = compose_text(&record);
        assert_eq!(
            text,
            "Pregunta: ¿Cuál es el horario?\nRespuesta: De 9 a 18.\n\nSábados cerrado.\nVariantes: ¿A qué hora abrís?\nEtiquetas: horario, tienda"
        );
        let (q, a) = split_composed(&text).unwrap();
        assert_eq!(q, record.question);
        assert_eq!(a, record.answer);
    }

    #[test]
    fn test_duplicate_across_files_is_dropped_once() {
        let a = dataset(
            "tienda.json",
            json!([
                {"question": "¿Cuál es el horario?", "answer": "9-18"},
                {"question": "¿Hacéis envíos?", "answer": "Sí"}
            ]),
        );
        let b = dataset(
            "soporte.json",
            json!({"qa": [
                {"pregunta": "  ¿CUAL es el HORARIO? ", "respuesta": "De 9 a 18"},
                {"pregunta": "¿Tiene garantía?", "respuesta": "Dos años"}
            ]}),
        );
        let outcome = merge_qa(&[], &[a, b], MergeOptions::default());
        assert_eq!(outcome.added, 3);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.units.len(), 4 - 1);
        assert_eq!(outcome.schema, TargetSchema::QaBlock);
        assert!(outcome.units.iter().all(KnowledgeUnit::is_merged_qa));
    }

    #[test]
    fn test_question_answer_key_keeps_different_answers() {
        let a = dataset("a.json", json!([{"q": "¿Horario?", "a": "9-18"}]));
        let b = dataset("b.json", json!([{"q": "¿horario?", "a": "10-20"}, {"q": "¿Horário?", "a": "9-18 "}]));
        let opts = MergeOptions {
            dedup: DedupKey::QuestionAnswer,
            ..MergeOptions::default()
        };
        let outcome = merge_qa(&[], &[a, b], opts);
        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.duplicates, 1);
    }

    #[test]
    fn test_target_schema_follows_existing_units() {
        let existing = vec![KnowledgeUnit::Chunk(Chunk::new("manual.md", 0, "texto".into()))];
        let ds = dataset("faq.json", json!([{"question": "¿Precio?", "answer": "10€"}]));
        let outcome = merge_qa(&existing, &[ds], MergeOptions::default());
        assert_eq!(outcome.schema, TargetSchema::DocumentChunk);
        match &outcome.units[1] {
            KnowledgeUnit::Chunk(c) => {
                assert_eq!(c.id, "qa::faq.json::0");
                assert_eq!(c.doc, "faq.json");
                assert!(c.text.starts_with("Pregunta: ¿Precio?"));
            }
            other => panic!("forma inesperada: {other:?}"),
        }
    }

    #[test]
    fn test_append_dedups_against_previous_runs() {
        let first = merge_qa(
            &[],
            &[dataset("faq.json", json!([{"question": "¿Precio?", "answer": "10€"}]))],
            MergeOptions::default(),
        );
        let again = dataset(
            "faq.json",
            json!([{"question": "¿precio?", "answer": "10€"}, {"question": "¿Envío?", "answer": "Gratis"}]),
        );
        let second = merge_qa(&first.units, &[again], MergeOptions::default());
        assert_eq!(second.added, 1);
        assert_eq!(second.duplicates, 1);
        let ids: Vec<_> = second.units.iter().map(|u| u.id().to_string()).collect();
        assert_eq!(ids, vec!["qa::faq.json::0", "qa::faq.json::1"]);
    }

    #[test]
    fn test_replace_drops_previous_qa_but_keeps_documents() {
        let doc = KnowledgeUnit::Chunk(Chunk::new("manual.md", 0, "texto".into()));
        let first = merge_qa(
            &[doc.clone()],
            &[dataset("faq.json", json!([{"question": "¿Precio?", "answer": "10€"}]))],
            MergeOptions::default(),
        );
        assert_eq!(first.units.len(), 2);

        let opts = MergeOptions {
            mode: MergeMode::Replace,
            ..MergeOptions::default()
        };
        let replacement = dataset(
            "faq.json",
            json!([{"question": "¿Precio?", "answer": "12€"}, {"question": "¿PRECIO?", "answer": "12€"}]),
        );
        let second = merge_qa(&first.units, &[replacement], opts);
        assert_eq!(second.removed, 1);
        assert_eq!(second.added, 1);
        assert_eq!(second.duplicates, 1);
        assert_eq!(second.units[0], doc);
        assert!(second.units[1].text().contains("12€"));
    }

    #[test]
    fn test_append_dedups_against_preexisting_blocks() {
        let mut meta = Map::new();
        meta.insert("question".into(), Value::from("¿Precio?"));
        let existing = vec![
            KnowledgeUnit::Qa(QaBlock {
                id: "faq-1".into(),
                title: "¿Precio?".into(),
                source: "faq.md".into(),
                text: "Cuesta 10€".into(),
                tags: Default::default(),
                meta,
                embedding: Vec::new(),
            }),
            KnowledgeUnit::Qa(QaBlock {
                id: "faq-2".into(),
                title: "Envíos".into(),
                source: "faq.md".into(),
                text: "Pregunta: ¿Hacéis envíos?\nRespuesta: Sí".into(),
                tags: Default::default(),
                meta: Default::default(),
                embedding: Vec::new(),
            }),
        ];
        let incoming = dataset(
            "nuevo.json",
            json!([
                {"question": "¿precio?", "answer": "10€"},
                {"question": "¿HACÉIS envios?", "answer": "Sí"},
                {"question": "¿Garantía?", "answer": "Dos años"}
            ]),
        );
        let outcome = merge_qa(&existing, &[incoming.clone()], MergeOptions::default());
        assert_eq!(outcome.duplicates, 2);
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.units.len(), 3);

        let opts = MergeOptions {
            mode: MergeMode::Replace,
            ..MergeOptions::default()
        };
        let replaced = merge_qa(&existing, &[incoming], opts);
        assert_eq!(replaced.duplicates, 0);
        assert_eq!(replaced.added, 3);
    }

    #[tokio::test]
    async fn test_merge_tool_skips_bad_files_and_backs_up() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("kb.json");
        let store = JsonFileStore::new(&index);
        store
            .save(&KnowledgeBase {
                meta: KbMeta {
                    docs_signature: Some("sig".into()),
                    ..KbMeta::empty(Utc::now())
                },
                chunks: vec![KnowledgeUnit::Qa(QaBlock {
                    id: "manual".into(),
                    title: "Manual".into(),
                    source: "manual.md".into(),
                    text: "texto del manual".into(),
                    tags: Default::default(),
                    meta: Default::default(),
                    embedding: vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                })],
            })
            .unwrap();

        let good = dir.path().join("faq.json");
        fs::write(&good, json!([{"question": "¿Horario?", "answer": "9-18"}]).to_string()).unwrap();
        let bad = dir.path().join("roto.json");
        fs::write(&bad, "{\"data\": 1}").unwrap();
        let missing = dir.path().join("no-existe.json");

        let embedder = FakeEmbedder::default();
        let report = merge_into_index(
            &index,
            &[good, bad.clone(), missing.clone()],
            MergeOptions::default(),
            Some(&embedder),
            64,
        )
        .await
        .unwrap();

        assert_eq!(report.files_read, 1);
        assert_eq!(report.files_skipped, vec![bad, missing]);
        assert_eq!(report.added, 1);
        assert_eq!(report.embedded, 1);
        assert!(report.backup.as_ref().is_some_and(|p| p.exists()));

        let kb = store.load().unwrap().unwrap();
        assert_eq!(kb.meta.docs_signature.as_deref(), Some("sig"));
        assert_eq!(kb.chunks.len(), 2);
        assert_eq!(kb.chunks[1].embedding(), FakeEmbedder::vector(kb.chunks[1].text()).as_slice());
    }
}
