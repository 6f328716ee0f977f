//! HTTP surface of the service.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Response bodies
//!
//! # Routes
//!
//! - `POST /api/v1/uploads`: multipart upload, ingested by [`crate::ingest::ingest_uploads`]
//!   before the handler runs
//! - `GET {public_path}/{name}`: stored files, served from the upload directory
//! - `GET /healthz`: liveness
//! - `GET /internal/metrics`: Prometheus metrics (when `enable_metrics` is set)

pub mod handlers;
pub mod models;
