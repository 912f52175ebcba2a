use chrono::{DateTime, Utc};
use medrec_core::{validate_record_id, FieldMap, QueryField};
use medrec_ocr::UploadOutcome;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::directory::RecordDirectory;
use crate::fallback;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("Invalid record ID format: {0:?}")]
    InvalidRecordId(String),
    #[error("{0}")]
    UnknownField(String),
    #[error("Data not found for patient {id}: {field}")]
    NotFound { id: String, field: QueryField },
}

/// A processed upload, as held for the rest of the session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub fields: FieldMap,
    pub text: String,
    pub filename: String,
    pub sha256: String,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertStatus {
    /// First document for this patient.
    New,
    /// Replaced an earlier, different document for the same patient.
    Replaced,
    /// The identical file had already been processed for this patient.
    Duplicate,
}

/// Where a lookup answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupSource {
    Directory,
    Extracted,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupHit {
    pub value: String,
    pub source: LookupSource,
}

/// Uploads processed during one session, keyed by patient id.
#[derive(Debug, Default)]
pub struct SessionStore {
    records: BTreeMap<String, SessionRecord>,
    current: Option<String>,
    directory: RecordDirectory,
}

impl SessionStore {
    pub fn new(directory: RecordDirectory) -> Self {
        Self { records: BTreeMap::new(), current: None, directory }
    }

    /// Store an upload under its patient id and make that patient current.
    pub fn insert(&mut self, outcome: UploadOutcome, filename: impl Into<String>) -> InsertStatus {
        let id = outcome.patient_id().to_string();
        let status = match self.records.get(&id) {
            None => InsertStatus::New,
            Some(existing) if existing.sha256 == outcome.sha256 => InsertStatus::Duplicate,
            Some(_) => InsertStatus::Replaced,
        };
        let record = SessionRecord {
            fields: outcome.fields,
            text: outcome.text,
            filename: filename.into(),
            sha256: outcome.sha256,
            processed_at: Utc::now(),
        };
        tracing::info!("Stored {} for patient {id} ({status:?})", record.filename);
        self.records.insert(id.clone(), record);
        self.current = Some(id);
        status
    }

    pub fn current_patient(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&SessionRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Answer `field` for patient `id`: the record directory first, then the
    /// fields extracted from the upload, then the upload's raw text.
    pub fn lookup(&self, id: &str, field: &str) -> Result<LookupHit, LookupError> {
        if !validate_record_id(id) {
            return Err(LookupError::InvalidRecordId(id.to_string()));
        }
        let field: QueryField = field.parse().map_err(LookupError::UnknownField)?;

        if let Some(value) = self.directory.get(id, field) {
            return Ok(LookupHit { value: value.to_string(), source: LookupSource::Directory });
        }

        if let Some(record) = self.records.get(id) {
            if let Some(name) = field.extracted_as() {
                if record.fields.is_found(name) {
                    let value = record.fields.get(name).to_string();
                    return Ok(LookupHit { value, source: LookupSource::Extracted });
                }
            }
            if let Some(value) = fallback::find_in_text(&record.text, field) {
                tracing::debug!("Answered {field} for {id} from raw text");
                return Ok(LookupHit { value, source: LookupSource::Text });
            }
        }

        Err(LookupError::NotFound { id: id.to_string(), field })
    }
}
