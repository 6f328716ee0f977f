use std::collections::BTreeMap;

use axum::http::StatusCode;

use crate::errors::Error;
use crate::storage::StoredFile;

/// Terminal state of one file part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Stored(StoredFile),
    /// Refused because of the client's input; nothing was written
    Rejected { status: StatusCode, reason: String },
    /// Server-side failure; any partial write was removed
    Failed { status: StatusCode, reason: String },
}

impl Outcome {
    pub fn from_result(result: Result<StoredFile, Error>) -> Self {
        match result {
            Ok(stored) => Outcome::Stored(stored),
            Err(e) if e.is_client_error() => Outcome::Rejected {
                status: e.status_code(),
                reason: e.user_message(),
            },
            Err(e) => Outcome::Failed {
                status: e.status_code(),
                reason: e.user_message(),
            },
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Outcome::Stored(_) => StatusCode::CREATED,
            Outcome::Rejected { status, .. } | Outcome::Failed { status, .. } => *status,
        }
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Stored(_) => "stored",
            Outcome::Rejected { .. } => "rejected",
            Outcome::Failed { .. } => "failed",
        }
    }
}

/// Outcome of one file part, with the client-declared metadata it arrived with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub field: String,
    pub original_name: Option<String>,
    pub content_type: Option<String>,
    pub outcome: Outcome,
}

impl FileOutcome {
    pub fn stored(&self) -> Option<&StoredFile> {
        match &self.outcome {
            Outcome::Stored(file) => Some(file),
            _ => None,
        }
    }
}

/// Everything ingested from one request, attached to the request for downstream handlers.
///
/// File outcomes are kept in arrival order; text fields of the form are kept by name (a repeated
/// name keeps the last value).
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub files: Vec<FileOutcome>,
    pub fields: BTreeMap<String, String>,
}

impl IngestReport {
    pub fn stored(&self) -> impl Iterator<Item = &StoredFile> {
        self.files.iter().filter_map(FileOutcome::stored)
    }

    /// Stored files that arrived under form field `field`.
    pub fn stored_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a StoredFile> + 'a {
        self.files.iter().filter(move |f| f.field == field).filter_map(FileOutcome::stored)
    }

    pub fn all_stored(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(|f| f.stored().is_some())
    }

    /// Overall status: 201 when everything was stored, 207 for a mix, otherwise the most
    /// severe per-file status (server failures outrank client rejections).
    pub fn status_code(&self) -> StatusCode {
        let stored = self.stored().count();

        if stored == self.files.len() && stored > 0 {
            return StatusCode::CREATED;
        }
        if stored > 0 {
            return StatusCode::MULTI_STATUS;
        }

        let first_failure = self.files.iter().find_map(|f| match &f.outcome {
            Outcome::Failed { status, .. } => Some(*status),
            _ => None,
        });
        first_failure
            .or_else(|| self.files.first().map(|f| f.outcome.status_code()))
            .unwrap_or(StatusCode::BAD_REQUEST)
    }
}
