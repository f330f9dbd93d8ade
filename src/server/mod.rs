pub mod handlers;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::control::ControlApi;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub control: ControlApi,
    pub shutdown: CancellationToken,
}

/// HTTP front end: dashboard page, control endpoints and the status
/// WebSocket.
pub struct ControlServer {
    state: AppState,
    listen_addr: String,
}

impl ControlServer {
    pub fn new(control: ControlApi, shutdown: CancellationToken, listen_addr: &str) -> Self {
        Self {
            state: AppState { control, shutdown },
            listen_addr: listen_addr.to_string(),
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub async fn start(self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.listen_addr))?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until the shutdown token fires.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!("Dashboard listening on http://{}", addr);

        let shutdown = self.state.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("HTTP server error")?;
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::dashboard::index))
        .route("/instances", get(handlers::control::list_instances))
        .route("/start/:id", get(handlers::control::start_handler))
        .route("/stop/:id", get(handlers::control::stop_handler))
        .route("/restart/:id", get(handlers::control::restart_handler))
        .route("/status/:id", get(handlers::control::status_handler))
        .route("/ws/status", get(handlers::status_ws::ws_status))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
