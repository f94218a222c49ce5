//! HTTP surface: `POST /tts`.

pub mod body;
pub mod error;

use crate::artifact::Areas;
use crate::capability::Capabilities;
use crate::cleanup::{CleanupCoordinator, CleanupScheduler, CleanupWorkers};
use crate::config::Config;
use crate::defaults;
use crate::handler::RequestHandler;
use crate::request::TtsRequest;
use anyhow::Context;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderName, StatusCode, header};
use axum::response::Response;
use axum::routing::post;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use body::GuardedBody;
pub use error::ApiError;

/// Header carrying the id of the request that produced a response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<RequestHandler>,
}

/// Build the router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/tts", post(tts))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)]),
        )
        .with_state(state)
}

async fn tts(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request = TtsRequest::from_slice(&body)?;
    let delivery = state.handler.handle(request).await?;
    let request_id = delivery.request_id.to_string();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, defaults::AUDIO_MEDIA_TYPE)
        .header(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"speech.wav\"",
        )
        .header(REQUEST_ID_HEADER, request_id)
        .body(GuardedBody::from_delivery(delivery).into_body())
        .map_err(|e| ApiError::internal(format!("Failed to build response: {e}")))
}

/// Everything the service needs at runtime, initialized once.
pub struct Service {
    state: AppState,
    scheduler: CleanupScheduler,
    workers: CleanupWorkers,
}

impl Service {
    /// Wire the production capabilities from configuration.
    pub fn build(config: &Config) -> anyhow::Result<Self> {
        Self::with_capabilities(config, Capabilities::from_config(config))
    }

    /// Wire the service around the given capabilities.
    ///
    /// Opens (and on cold start wipes) both areas and starts the cleanup pool.
    pub fn with_capabilities(config: &Config, capabilities: Capabilities) -> anyhow::Result<Self> {
        let areas = Areas::open(&config.storage).context("Failed to prepare artifact directories")?;
        let (scheduler, workers) =
            CleanupWorkers::spawn(CleanupCoordinator::new(areas.clone()), &config.cleanup)
                .context("Failed to start cleanup workers")?;

        let handler = RequestHandler::new(
            areas,
            capabilities,
            scheduler.clone(),
            config.caption.fallback_text.clone(),
        );

        Ok(Self {
            state: AppState {
                handler: Arc::new(handler),
            },
            scheduler,
            workers,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn scheduler(&self) -> &CleanupScheduler {
        &self.scheduler
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Serve until `shutdown` resolves, then finish all queued cleanup.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("HTTP server failed")?;

        tracing::info!(
            "Server stopped, draining {} pending cleanup task(s)",
            self.scheduler.stats().pending
        );
        let workers = self.workers;
        tokio::task::spawn_blocking(move || workers.shutdown())
            .await
            .context("Cleanup shutdown task failed")?
            .map_err(anyhow::Error::msg)?;

        let stats = self.scheduler.stats();
        tracing::info!(
            "Cleanup finished: {} completed, {} failed",
            stats.completed,
            stats.failed
        );
        Ok(())
    }
}

/// Bind, serve and shut down on Ctrl+C or SIGTERM.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let service = Service::build(&config)?;
    tracing::info!(
        "Capabilities: describer={} synthesizer={}",
        service.state.handler.capabilities().describer_name(),
        service.state.handler.capabilities().synthesizer_name()
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Server ready. Press Ctrl+C to stop.");

    service.serve(listener, shutdown_signal()).await
}

/// Wait for Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        },
    }
}
