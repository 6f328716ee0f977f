use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ingest::{FileOutcome, IngestReport, Outcome};
use crate::storage::StoredFile;

/// Response for `POST /api/v1/uploads`
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub files: Vec<FileOutcomeResponse>,
    /// Non-file form fields, passed through unchanged
    pub fields: BTreeMap<String, String>,
}

/// One file part of the request.
#[derive(Debug, Serialize, Deserialize)]
pub struct FileOutcomeResponse {
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    pub status: String, // "stored", "rejected" or "failed"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<StoredFile>,
    /// Where the stored file can be fetched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileOutcomeResponse {
    pub fn from_outcome(outcome: &FileOutcome, public_path: &str) -> Self {
        let (file, error) = match &outcome.outcome {
            Outcome::Stored(file) => (Some(file.clone()), None),
            Outcome::Rejected { reason, .. } | Outcome::Failed { reason, .. } => (None, Some(reason.clone())),
        };

        Self {
            field: outcome.field.clone(),
            original_name: outcome.original_name.clone(),
            status: outcome.outcome.label().to_string(),
            url: file.as_ref().map(|f| public_url(public_path, f)),
            file,
            error,
        }
    }
}

impl UploadResponse {
    pub fn from_report(report: &IngestReport, public_path: &str) -> Self {
        Self {
            files: report.files.iter().map(|f| FileOutcomeResponse::from_outcome(f, public_path)).collect(),
            fields: report.fields.clone(),
        }
    }
}

fn public_url(public_path: &str, file: &StoredFile) -> String {
    format!("{}/{}", public_path.trim_end_matches('/'), file.relative_path)
}
