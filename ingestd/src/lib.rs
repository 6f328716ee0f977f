//! # ingestd: upload ingestion service
//!
//! `ingestd` accepts multipart uploads, keeps the files whose declared content type is allowed
//! (images by default), and persists each one under a freshly generated, collision-resistant
//! name in a single storage directory. Stored files are served back read-only.
//!
//! ## Request Flow
//!
//! ```text
//! POST /api/v1/uploads
//!   → TraceLayer
//!   → ingest::ingest_uploads (limiter, multipart parsing, per-file ingestion)
//!   → api::handlers::uploads::create_upload (reads the IngestReport extension)
//! ```
//!
//! Each file part goes through [`storage::ContentFilter`], [`storage::NameGenerator`] and
//! [`storage::StorageWriter`] in that order. The storage directory is created on first use,
//! exactly once, no matter how many requests race for it ([`storage::StorageDirectory`]). Writes
//! stream to a hidden temporary file and are published under their final name only when complete,
//! so a truncated, oversized or cancelled upload never leaves a partial file behind.
//!
//! ## Modules
//!
//! - [`config`]: figment-based configuration (YAML file + `INGESTD_` environment variables)
//! - [`storage`]: directory bootstrap, naming, filtering and writing
//! - [`ingest`]: per-request state machine and the ingestion middleware
//! - [`limits`]: upload concurrency limiting
//! - [`api`]: handlers and response models
//! - [`errors`]: error type and its HTTP mapping
//! - [`telemetry`]: tracing setup

pub mod api;
pub mod config;
pub mod errors;
pub mod ingest;
pub mod limits;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
mod test;
#[cfg(test)]
mod test_utils;

use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    http::StatusCode,
    middleware::{Next, from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, info};

use crate::ingest::Ingestor;
use crate::limits::Limiters;
use crate::storage::StorageDirectory;

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .ingestor(Arc::new(ingestor))
///     .limiters(limiters)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub ingestor: Arc<Ingestor>,
    #[builder(default)]
    pub limiters: Limiters,
}

impl AppState {
    /// Wire up state from configuration. Touches nothing on disk.
    pub fn from_config(config: Config) -> Self {
        let directory = Arc::new(StorageDirectory::new(&config.uploads.upload_directory));
        let ingestor = Ingestor::new(&config, directory);
        let limiters = Limiters::new(&config.limits);

        AppState::builder()
            .config(config)
            .ingestor(Arc::new(ingestor))
            .limiters(limiters)
            .build()
    }
}

/// Build the application router.
pub fn build_router(state: &AppState) -> Router {
    let uploads = Router::new()
        .route("/uploads", post(api::handlers::uploads::create_upload))
        .route_layer(from_fn_with_state(state.clone(), ingest::ingest_uploads))
        .with_state(state.clone());

    // In-progress writes are dotfiles; never serve them
    let files = ServiceBuilder::new()
        .layer(from_fn(hide_dotfiles))
        .service(ServeDir::new(&state.config.uploads.upload_directory));

    let mut router = Router::new()
        .route("/healthz", get(api::handlers::uploads::healthz))
        .nest("/api/v1", uploads)
        .nest_service(&state.config.uploads.public_path, files);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

async fn hide_dotfiles(request: Request, next: Next) -> Response {
    let hidden = request.uri().path().split('/').any(|segment| segment.starts_with('.'));
    if hidden {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(request).await
}

/// The assembled service: state, router and the config it was built from.
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    pub fn new(config: Config) -> Self {
        let state = AppState::from_config(config.clone());
        let router = build_router(&state);
        Self { router, config }
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            upload_directory = %self.config.uploads.upload_directory.display(),
            "Upload service listening on http://{}", bind_addr
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Server stopped");
        Ok(())
    }
}
