//! Control API server

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::UiConfig;
use crate::error::{Error, Result};
use crate::session::SessionHandle;
use crate::ui::handlers;

/// Shared state for the handlers
pub struct AppState {
    pub session: Arc<SessionHandle>,
}

/// Routes for one session
pub fn router(session: Arc<SessionHandle>) -> Router {
    let state = Arc::new(AppState { session });

    Router::new()
        .route("/api/session", get(handlers::get_session))
        .route("/api/participants", get(handlers::get_participants))
        .route("/api/session/audio/toggle", post(handlers::toggle_audio))
        .route("/api/session/video/toggle", post(handlers::toggle_video))
        .route("/api/session/end", post(handlers::end_call))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP server exposing the call controls
pub struct WebServer {
    config: UiConfig,
    session: Arc<SessionHandle>,
}

impl WebServer {
    pub fn new(config: UiConfig, session: Arc<SessionHandle>) -> Self {
        Self { config, session }
    }

    pub fn address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.config.bind_address, self.config.http_port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid control API address: {}", e)))
    }

    /// Serve until the task is aborted or the listener fails
    pub async fn run(self) -> Result<()> {
        let addr = self.address()?;
        let app = router(self.session);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr = %addr, "Control API listening");

        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Run on a background task
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!("Control API stopped: {}", e);
            }
        })
    }
}
