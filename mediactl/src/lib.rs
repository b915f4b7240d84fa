//! # mediactl: Media Ingestion Service
//!
//! `mediactl` accepts image uploads over HTTP, checks what they really are, shrinks the ones
//! that are too large, stores them under unique keys, and hands out time-limited URLs for
//! reading them back.
//!
//! ## Overview
//!
//! Clients can't be trusted to say what they upload: a filename ending in `.png` and a
//! `Content-Type: image/png` header say nothing about the bytes. Every upload is therefore
//! identified from its magic bytes, and anything that isn't a JPEG or PNG is rejected before it
//! gets near storage. Images larger than the configured ceiling are downscaled and re-encoded
//! in their own format until they fit, so storage never holds an object above the limit.
//!
//! ### Request Flow
//!
//! ```text
//! multipart body ──▶ ValidatedFile(s) ──▶ IngestionPipeline ──▶ ObjectStore
//!                    sniff + compress      store (+ presign)     S3 / in-memory
//! ```
//!
//! Validation happens in the [`api::extract`] extractors, before a handler runs. A handler
//! only ever receives [`media::NormalizedFile`]s. The [`pipeline::IngestionPipeline`] writes them
//! through an [`storage::ObjectStore`] and optionally issues a presigned read URL. A record of
//! each stored object is kept in [`db`] so it can be listed, re-signed and deleted.
//!
//! ### Core Components
//!
//! - **[`media`]**: content sniffing, size-bounded image compression and upload validation
//! - **[`storage`]**: the object store abstraction, with S3 and in-memory backends
//! - **[`pipeline`]**: validation followed by storage, for single files and batches
//! - **[`api`]**: axum extractors, handlers and models
//! - **[`db`]**: records of stored media
//! - **[`limits`]**: bounds on concurrent uploads
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use mediactl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = mediactl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     mediactl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod errors;
pub mod limits;
pub mod media;
mod openapi;
pub mod pipeline;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{self, HeaderName, HeaderValue};
use axum::{
    Json, Router,
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    clock::{Clock, SystemClock},
    config::{CorsOrigin, StorageBackend},
    db::handlers::MediaTable,
    limits::Limiters,
    openapi::ApiDoc,
    pipeline::IngestionPipeline,
    storage::{InMemoryObjectStore, ObjectStore, S3ObjectStore},
};

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .pipeline(Arc::new(pipeline))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub pipeline: Arc<IngestionPipeline>,
    #[builder(default)]
    pub records: MediaTable,
    /// Set when running on the in-memory backend, which serves its own presigned URLs
    pub memory_store: Option<Arc<InMemoryObjectStore>>,
    #[builder(default)]
    pub limiters: Limiters,
}

impl AppState {
    /// State backed by a process-local object store.
    pub fn in_memory(config: Config, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(memory_store(&config, clock.clone()));
        Self::with_store(config, store.clone(), Some(store), clock)
    }

    fn with_store(config: Config, store: Arc<dyn ObjectStore>, memory_store: Option<Arc<InMemoryObjectStore>>, clock: Arc<dyn Clock>) -> Self {
        let pipeline = IngestionPipeline::from_config(&config, store);
        AppState::builder()
            .limiters(Limiters::new(&config.limits))
            .records(MediaTable::new(clock))
            .pipeline(Arc::new(pipeline))
            .maybe_memory_store(memory_store)
            .config(config)
            .build()
    }
}

fn memory_store(config: &Config, clock: Arc<dyn Clock>) -> InMemoryObjectStore {
    let bucket = config.storage.bucket.clone();
    match &config.storage.memory.signing_secret {
        Some(secret) => InMemoryObjectStore::new(bucket, config.object_url_base(), secret.as_bytes().to_vec(), clock),
        None => InMemoryObjectStore::with_random_key(bucket, config.object_url_base(), clock),
    }
}

/// Construct the object store the configuration asks for.
#[instrument(skip_all, fields(backend = ?config.storage.backend))]
async fn setup_state(config: &Config, clock: Arc<dyn Clock>) -> AppState {
    match config.storage.backend {
        StorageBackend::S3 => {
            let store = S3ObjectStore::new(&config.storage, clock.clone()).await;
            info!(bucket = %config.storage.bucket, region = %config.storage.s3.region, "Using S3 object storage");
            AppState::with_store(config.clone(), Arc::new(store), None, clock)
        }
        StorageBackend::Memory => {
            info!(bucket = %config.storage.bucket, "Using in-memory object storage; objects are lost on restart");
            AppState::in_memory(config.clone(), clock)
        }
    }
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.cors;

    let allow_origin = if cors_config.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut exposed = vec![http::header::LOCATION];
    for header in &cors_config.exposed_headers {
        exposed.push(header.parse::<HeaderName>()?);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::DELETE])
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .allow_credentials(cors_config.allow_credentials)
        .expose_headers(exposed);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router.
///
/// Media routes are nested under the configured prefix. Upload routes get a body limit of
/// `uploads.max_request_bytes`. The object route only exists on the in-memory backend.
///
/// # Errors
///
/// Returns an error if the CORS configuration contains a value that isn't a valid header.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    use api::handlers::{media, objects};

    let body_limit = DefaultBodyLimit::max(state.config.uploads.max_request_bytes);

    let mut api_routes = Router::new()
        .route(
            "/media",
            post(media::upload_media).layer(body_limit).get(media::list_media),
        )
        .route("/media/bulk", post(media::upload_media_bulk).layer(body_limit))
        .route("/media/{id}", get(media::get_media).delete(media::delete_media))
        .route("/media/{id}/url", get(media::get_media_url));

    if state.memory_store.is_some() {
        api_routes = api_routes.route("/objects/{bucket}/{*key}", get(objects::get_object));
    }

    let api_routes = api_routes.with_state(state.clone());

    let prefix = state.config.prefix.as_str();
    let api_doc = ApiDoc::with_prefix(prefix);
    let router = if prefix.is_empty() {
        Router::new().merge(api_routes)
    } else {
        Router::new().nest(prefix, api_routes)
    };

    let router = router
        .route("/healthz", get(|| async { "OK" }))
        .route("/api-docs/openapi.json", get({
            let doc = api_doc.clone();
            move || {
                let doc = doc.clone();
                async move { Json(doc) }
            }
        }))
        .merge(Scalar::with_url("/docs", api_doc));

    let router = router.layer(create_cors_layer(&state.config)?).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Main application struct that owns all resources and manages the lifecycle.
///
/// 1. **Create**: [`Application::new`] constructs the object store and router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown signal is received, in-flight requests finish and
///    telemetry is flushed
pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    /// Create an application whose URL signing and record timestamps read from `clock`
    pub async fn with_clock(config: Config, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        debug!("Starting media service with configuration: {:#?}", config);

        let app_state = setup_state(&config, clock).await;
        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            app_state,
            config,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.app_state
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, AppState) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.app_state)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Media service listening on http://{}, API at {}{}",
            bind_addr,
            self.config.public_url.as_str().trim_end_matches('/'),
            self.config.prefix
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
