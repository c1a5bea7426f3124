//! API module - HTTP handlers and routes

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::state::StateTree;
use crate::sync::EventFeed;

/// Shared state of the management API
#[derive(Clone)]
pub struct BridgeState {
    pub tree: Arc<dyn StateTree>,
    pub feed: Arc<EventFeed>,
    pub auth_url: String,
    /// XOR key for handing out tokens in their stored form
    pub secret: Option<String>,
}

pub fn routes() -> Router<BridgeState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .route("/api/health", get(handlers::health_check))
        // State tree
        .route("/api/states", get(handlers::list_states))
        .route(
            "/api/states/:id",
            get(handlers::get_state).put(handlers::write_state),
        )
        // Manual event injection
        .route("/api/events", post(handlers::post_event))
        // Token exchange
        .route("/api/token", post(handlers::request_token))
}

/// Router of the DynDNS webhook listener
pub fn webhook_routes(feed: Arc<EventFeed>) -> Router {
    Router::new()
        .route("/", post(handlers::receive_webhook))
        .route("/webhook", post(handlers::receive_webhook))
        .with_state(feed)
        .layer(TraceLayer::new_for_http())
}

/// Serve the webhook listener on `port` until the task is aborted
pub async fn serve_webhook(port: u16, feed: Arc<EventFeed>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Webhook listener on {}", addr);

    axum::serve(listener, webhook_routes(feed)).await?;
    Ok(())
}
