use anyhow::{Context, Result};
use medrec_assistant::{GeminiClient, LanguageModel};
use medrec_core::{FieldMap, MedrecConfig};
use medrec_ocr::{OcrBackend, PageRasterizer, TextSource, UploadError, UploadOutcome, UploadProcessor};
use medrec_storage::{InsertStatus, LookupSource, RecordDirectory, SessionStore};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "medrec.toml";

/// Build the run configuration once, at start-up. `env_api_key` fills in the
/// assistant key when the file does not set one.
pub fn build_config(path: Option<&Path>, env_api_key: Option<String>) -> Result<MedrecConfig> {
    let mut config = match path {
        Some(path) => MedrecConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => MedrecConfig::load(Path::new(DEFAULT_CONFIG_FILE))?,
        None => MedrecConfig::default(),
    };
    if config.assistant.api_key.is_none() {
        config.assistant.api_key = env_api_key.filter(|k| !k.is_empty());
    }
    config.validate()?;
    Ok(config)
}

pub fn load_directory(config: &MedrecConfig) -> Result<RecordDirectory> {
    match &config.records.directory {
        Some(path) => Ok(RecordDirectory::load(path)?),
        None => Ok(RecordDirectory::default()),
    }
}

// ── process ───────────────────────────────────────────────────────────────────

/// Run every upload on the blocking pool, one task per file. Results come back
/// in input order.
pub async fn process_files<R, P>(
    processor: Arc<UploadProcessor<R, P>>,
    paths: Vec<PathBuf>,
) -> Result<Vec<(PathBuf, Result<UploadOutcome, UploadError>)>>
where
    R: OcrBackend + 'static,
    P: PageRasterizer + 'static,
{
    let tasks: Vec<_> = paths
        .into_iter()
        .map(|path| {
            let processor = Arc::clone(&processor);
            tokio::task::spawn_blocking(move || {
                let result = processor.process_upload(&path);
                (path, result)
            })
        })
        .collect();

    let mut results = Vec::with_capacity(tasks.len());
    for task in tasks {
        results.push(task.await.context("upload task panicked")?);
    }
    Ok(results)
}

#[derive(Debug, Serialize)]
pub struct UploadReport {
    pub file: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<TextSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadReport {
    pub fn new(path: &Path, result: &Result<UploadOutcome, UploadError>) -> Self {
        let file = path.display().to_string();
        match result {
            Ok(outcome) => UploadReport {
                file,
                status: "ok".into(),
                patient_id: Some(outcome.patient_id().to_string()),
                source: Some(outcome.source),
                fields: Some(outcome.fields.clone()),
                error: None,
            },
            Err(e) => UploadReport {
                file,
                status: e.kind().to_string(),
                patient_id: None,
                source: None,
                fields: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Store successful uploads in `store`, logging failures. Returns the number
/// of failed uploads.
pub fn ingest(store: &mut SessionStore, results: Vec<(PathBuf, Result<UploadOutcome, UploadError>)>) -> usize {
    let mut failed = 0;
    for (path, result) in results {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        match result {
            Ok(outcome) => {
                if store.insert(outcome, filename.as_str()) == InsertStatus::Duplicate {
                    tracing::info!("{filename} was already processed");
                }
            }
            Err(e) => {
                tracing::error!("{filename}: {e} [{}]", e.kind());
                failed += 1;
            }
        }
    }
    failed
}

// ── lookup ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct LookupOutput {
    pub patient_id: String,
    pub field: String,
    pub value: String,
    pub source: LookupSource,
}

pub fn lookup(store: &SessionStore, id: &str, field: &str) -> Result<LookupOutput> {
    if let Some(current) = store.current_patient().filter(|current| *current != id) {
        tracing::warn!("Looking up {id}, but the last processed document belongs to {current}");
    }
    let hit = store.lookup(id, field)?;
    Ok(LookupOutput {
        patient_id: id.to_string(),
        field: field.to_lowercase(),
        value: hit.value,
        source: hit.source,
    })
}

// ── explain ───────────────────────────────────────────────────────────────────

pub async fn explain(config: &MedrecConfig, question: &str) -> Result<String> {
    let client = GeminiClient::new(&config.assistant)?;
    tracing::info!("Asking {} for an explanation", client.model());
    Ok(client.explain(question).await?)
}
