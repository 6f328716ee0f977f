//! Per-request ingestion of multipart uploads.
//!
//! Every file part walks the same path:
//!
//! ```text
//! Start -> Filtering -> Rejected
//!                    -> Naming -> Writing -> Stored
//!                                         -> Failed
//! ```
//!
//! Filtering looks only at the declared content type, so a refused part's body is never read.
//! Naming draws a fresh name (retrying if the name is somehow taken) and Writing streams the body
//! through the [`StorageWriter`]. Parts are handled one after another in arrival order, each with
//! its own [`Outcome`].
//!
//! What happens to a request with mixed outcomes is decided by [`UploadPolicy`]:
//!
//! - `Partial`: every part keeps its own outcome and stored files stay stored.
//! - `AllOrNothing`: the first part that is not stored fails the whole request with that part's
//!   error, and files already stored for the request are removed.
//!
//! Under either policy a request-level failure (malformed or truncated multipart, too many file
//! parts) removes the files stored so far, since no downstream handler will ever learn of them.
//! Per-file metrics are recorded once the request's fate is known: files removed this way count
//! as `discarded`, not `stored`.

mod middleware;
mod report;

pub use middleware::ingest_uploads;
pub use report::{FileOutcome, IngestReport, Outcome};

use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::{debug, error, instrument, warn};

use crate::config::{Config, UploadPolicy};
use crate::errors::{Error, Result};
use crate::storage::{ContentFilter, NameGenerator, Reservation, StorageDirectory, StorageWriter, StoredFile, TimestampNameGenerator};

/// Names drawn before giving up on finding a free one.
pub const MAX_NAME_ATTEMPTS: usize = 4;

/// One incoming file part. Lives only as long as its request.
pub struct UploadRequest<S> {
    pub field: String,
    /// Client-supplied and untrusted
    pub original_name: Option<String>,
    /// Client-supplied and untrusted
    pub content_type: Option<String>,
    pub body: S,
}

/// Composes filter, name generator and writer into the per-file state machine.
pub struct Ingestor {
    filter: ContentFilter,
    namer: Arc<dyn NameGenerator>,
    writer: StorageWriter,
    policy: UploadPolicy,
    /// None = unlimited
    max_files: Option<usize>,
    max_request_size: u64,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("filter", &self.filter)
            .field("writer", &self.writer)
            .field("policy", &self.policy)
            .field("max_files", &self.max_files)
            .finish_non_exhaustive()
    }
}

impl Ingestor {
    pub fn new(config: &Config, directory: Arc<StorageDirectory>) -> Self {
        let files = &config.limits.files;
        Self {
            filter: ContentFilter::new(config.uploads.allowed_prefix.clone()),
            namer: Arc::new(TimestampNameGenerator),
            writer: StorageWriter::new(directory, files.max_file_size),
            policy: config.uploads.policy,
            max_files: (files.max_files_per_request > 0).then_some(files.max_files_per_request),
            max_request_size: files.max_request_size,
        }
    }

    /// Swap the name generator, e.g. for a deterministic one in tests.
    pub fn with_name_generator(mut self, namer: Arc<dyn NameGenerator>) -> Self {
        self.namer = namer;
        self
    }

    /// Size constraints for the multipart parser; 0 in config means unlimited.
    ///
    /// Only the whole stream is bounded here. Per-file size is enforced by the writer so that an
    /// oversized file is refused on its own without breaking the rest of the request.
    pub fn constraints(&self) -> multer::Constraints {
        let mut size_limit = multer::SizeLimit::new();
        if self.max_request_size > 0 {
            size_limit = size_limit.whole_stream(self.max_request_size);
        }
        multer::Constraints::new().size_limit(size_limit)
    }

    /// Run one file part through filtering, naming and writing.
    #[instrument(skip_all, fields(field = %request.field, original_name = ?request.original_name))]
    pub async fn ingest<S>(&self, request: UploadRequest<S>) -> Result<StoredFile>
    where
        S: Stream<Item = std::io::Result<Bytes>>,
    {
        // Filtering
        if !self.filter.accept(request.content_type.as_deref()) {
            debug!(content_type = ?request.content_type, "Rejected upload by declared content type");
            return Err(Error::UnsupportedMediaType {
                content_type: request.content_type.unwrap_or_default(),
            });
        }

        // Naming, then Writing
        let original_name = request.original_name.as_deref().unwrap_or_default();
        self.place(original_name, request.body).await.inspect_err(|e| {
            if e.is_client_error() {
                debug!(error = %e, "Upload refused");
            } else {
                error!(error = %e, "Upload failed");
            }
        })
    }

    async fn place<S>(&self, original_name: &str, body: S) -> Result<StoredFile>
    where
        S: Stream<Item = std::io::Result<Bytes>>,
    {
        let reservation = self.reserve(original_name).await?;
        reservation.write(body).await
    }

    async fn reserve(&self, original_name: &str) -> Result<Reservation> {
        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let name = self.namer.generate(original_name);
            match self.writer.reserve(&name).await {
                Ok(reservation) => return Ok(reservation),
                Err(e) if e.is_name_collision() => {
                    warn!(name = %name, attempt, "Generated file name already taken, drawing another");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::NameExhausted {
            attempts: MAX_NAME_ATTEMPTS,
        })
    }

    /// Ingest every part of a multipart body.
    ///
    /// Text fields are collected into the report. File parts (parts with a file name) go through
    /// [`Ingestor::ingest`] according to the configured [`UploadPolicy`].
    pub async fn ingest_multipart(&self, mut multipart: multer::Multipart<'_>) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => {
                    self.abandon(&report).await;
                    return Err(parse_error(e));
                }
            };

            let field_name = field.name().unwrap_or_default().to_string();

            let Some(original_name) = field.file_name().map(str::to_string) else {
                match field.text().await {
                    Ok(value) => {
                        report.fields.insert(field_name, value);
                        continue;
                    }
                    Err(e) => {
                        self.abandon(&report).await;
                        return Err(parse_error(e));
                    }
                }
            };

            if let Some(max) = self.max_files
                && report.files.len() >= max
            {
                self.abandon(&report).await;
                return Err(Error::BadRequest {
                    message: format!("Too many files in one request (maximum {max})"),
                });
            }

            // Raw header rather than the parsed mime, which would normalize case
            let content_type = field
                .headers()
                .get(axum::http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let request = UploadRequest {
                field: field_name.clone(),
                original_name: Some(original_name.clone()),
                content_type: content_type.clone(),
                body: field.map(|chunk| chunk.map_err(stream_error)),
            };

            let outcome = match self.ingest(request).await {
                Err(e) if self.policy == UploadPolicy::AllOrNothing => {
                    let label = if e.is_client_error() { "rejected" } else { "failed" };
                    metrics::counter!("ingestd_files_total", "outcome" => label).increment(1);
                    self.abandon(&report).await;
                    return Err(e);
                }
                result => Outcome::from_result(result),
            };
            report.files.push(FileOutcome {
                field: field_name,
                original_name: Some(original_name),
                content_type,
                outcome,
            });
        }

        for file in &report.files {
            record(&file.outcome);
        }
        Ok(report)
    }

    /// Remove files already stored for a request that is being abandoned and count them as
    /// `discarded`; every other outcome of the request is counted as it is.
    async fn abandon(&self, report: &IngestReport) {
        for file in &report.files {
            let Outcome::Stored(stored) = &file.outcome else {
                record(&file.outcome);
                continue;
            };
            metrics::counter!("ingestd_files_total", "outcome" => "discarded").increment(1);
            match tokio::fs::remove_file(&stored.path).await {
                Ok(()) => debug!(name = %stored.name, "Removed upload from abandoned request"),
                Err(e) => warn!(name = %stored.name, error = %e, "Failed to remove upload from abandoned request"),
            }
        }
    }
}

fn record(outcome: &Outcome) {
    metrics::counter!("ingestd_files_total", "outcome" => outcome.label()).increment(1);
    if let Outcome::Stored(file) = outcome {
        metrics::counter!("ingestd_stored_bytes_total").increment(file.size);
    }
}

fn is_size_error(e: &multer::Error) -> bool {
    matches!(e, multer::Error::StreamSizeExceeded { .. } | multer::Error::FieldSizeExceeded { .. })
}

/// Map a body error inside a file part to I/O; size breaches keep their meaning.
fn stream_error(e: multer::Error) -> std::io::Error {
    let kind = if is_size_error(&e) {
        std::io::ErrorKind::FileTooLarge
    } else {
        std::io::ErrorKind::UnexpectedEof
    };
    std::io::Error::new(kind, e)
}

/// Map a multipart error between parts or in a text field to a request error.
///
/// A body that could not be read or ended early is an I/O failure; only malformed framing is the
/// client's fault.
fn parse_error(e: multer::Error) -> Error {
    match e {
        e if is_size_error(&e) => Error::PayloadTooLarge {
            message: format!("Request too large: {e}"),
        },
        multer::Error::StreamReadFailed(_)
        | multer::Error::IncompleteStream
        | multer::Error::IncompleteFieldData { .. }
        | multer::Error::IncompleteHeaders => Error::io(
            "receive multipart body",
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, e),
        ),
        e => Error::BadRequest {
            message: format!("Failed to parse multipart data: {e}"),
        },
    }
}
