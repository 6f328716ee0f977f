//! Middleware that consumes a multipart body and hands its [`IngestReport`] downstream.
//!
//! ```text
//! Request → limiter → ingest_uploads (this) → handler(Extension<IngestReport>) → Response
//! ```
//!
//! The handler never sees the raw body: the request is forwarded with an empty body and the
//! report as an extension. Requests that fail before any file is handled (not multipart, no
//! boundary, over capacity) are answered here without reaching the handler.

use axum::{
    body::Body,
    extract::{Request, State},
    http::header::CONTENT_TYPE,
    middleware::Next,
    response::Response,
};
use tracing::{debug, instrument};

use crate::AppState;
use crate::errors::{Error, Result};

#[instrument(skip_all, fields(path = %request.uri().path(), method = %request.method()))]
pub async fn ingest_uploads(State(state): State<AppState>, request: Request, next: Next) -> Result<Response> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let boundary = multer::parse_boundary(&content_type).map_err(|_| Error::UnsupportedMediaType {
        content_type: content_type.clone(),
    })?;

    // held until the whole body has been ingested
    let _permit = state.limiters.acquire_upload().await?;

    let (mut parts, body) = request.into_parts();
    let multipart = multer::Multipart::with_constraints(body.into_data_stream(), boundary, state.ingestor.constraints());

    let report = state.ingestor.ingest_multipart(multipart).await?;
    debug!(
        files = report.files.len(),
        stored = report.stored().count(),
        fields = report.fields.len(),
        "Ingested multipart request"
    );

    parts.extensions.insert(report);
    Ok(next.run(Request::from_parts(parts, Body::empty())).await)
}
