use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::auth;
use crate::auth::{AuthService, SessionIssuer};
use crate::config::AppConfig;
use crate::db::repo::open_store;
use crate::error::Result;

pub struct AppState {
    pub auth: AuthService,
}

pub async fn build_state(config: &AppConfig) -> Result<Arc<AppState>> {
    let store = open_store(&config.store).await?;
    let auth = AuthService::new(store, SessionIssuer::from_config(config))?;
    Ok(Arc::new(AppState { auth }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/signup", post(auth::signup))
        .route("/api/login", post(auth::login))
        .route("/api/session", get(auth::session))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub async fn start_server(config: AppConfig) -> Result<()> {
    let state = build_state(&config).await?;
    let app = router(state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "Server running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
