use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{info, instrument};

use crate::AppState;
use crate::api::models::uploads::UploadResponse;
use crate::errors::{Error, Result};
use crate::ingest::IngestReport;

/// Report what happened to each file of an upload request.
///
/// The body has already been consumed by [`crate::ingest::ingest_uploads`]; this handler only
/// turns the attached [`IngestReport`] into a response. The status is 201 when every file was
/// stored, 207 when some were, otherwise the status of the most severe per-file failure.
#[instrument(skip_all, fields(files = report.files.len()))]
pub async fn create_upload(State(state): State<AppState>, Extension(report): Extension<IngestReport>) -> Result<Response> {
    if report.files.is_empty() {
        return Err(Error::BadRequest {
            message: "No file provided".to_string(),
        });
    }

    let status = report.status_code();
    let body = UploadResponse::from_report(&report, &state.config.uploads.public_path);

    for file in report.stored() {
        info!(name = %file.name, size = file.size, "Upload stored");
    }

    Ok((status, Json(body)).into_response())
}

pub async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
