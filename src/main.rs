//! nello-bridge - nello smart-lock integration
//!
//! Mirrors nello locations, time windows and webhook events into a state
//! tree and turns writes to control nodes into nello API calls.

mod api;
mod codec;
mod config;
mod dispatch;
mod error;
mod ical;
mod models;
mod nello;
mod state;
mod sync;

use std::net::SocketAddr;
use std::sync::Arc;

use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::BridgeState;
use crate::dispatch::CommandDispatcher;
use crate::nello::{LockApi, NelloClient};
use crate::state::{MemoryStateTree, StateTree};
use crate::sync::{AdapterContext, EventFeed, LocationSyncer, TimeWindowReconciler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nello_bridge=info,tower_http=debug".into()),
        )
        .init();

    tracing::info!("Starting nello-bridge...");

    // Load configuration
    let config = config::Config::load()?;
    if !config.nello.has_token() {
        tracing::error!("Token is missing! Please generate a token via POST /api/token and configure it first!");
    }
    tracing::info!("Configuration loaded");

    let tree: Arc<dyn StateTree> = Arc::new(MemoryStateTree::new());
    let feed = Arc::new(EventFeed::new(
        tree.clone(),
        config.adapter.events_max_count,
    ));

    // Start the nello side only with a token; the API still serves token exchange
    let syncer = if config.nello.has_token() {
        let api: Arc<dyn LockApi> =
            Arc::new(NelloClient::new(&config.nello).map_err(anyhow::Error::msg)?);
        let ctx = Arc::new(AdapterContext::new());
        let reconciler = Arc::new(TimeWindowReconciler::new(
            ctx.clone(),
            tree.clone(),
            api.clone(),
        ));

        let dispatcher = Arc::new(CommandDispatcher::new(
            tree.clone(),
            api.clone(),
            reconciler.clone(),
            feed.clone(),
            config.adapter.iot.clone(),
        ));
        let changes = tree.changes();
        let dispatch_task = tokio::spawn(dispatcher.run(changes));

        let syncer = Arc::new(LocationSyncer::new(
            ctx,
            tree.clone(),
            api,
            reconciler,
            feed.clone(),
            config.adapter.clone(),
        ));
        let starter = syncer.clone();
        tokio::spawn(async move {
            starter.start().await;
        });
        Some((syncer, dispatch_task))
    } else {
        None
    };

    // Build application router
    let bridge_state = BridgeState {
        tree,
        feed,
        auth_url: config.nello.auth_url.clone(),
        secret: config.nello.secret.clone().filter(|k| !k.is_empty()),
    };
    let app = api::routes().with_state(bridge_state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    // Start server
    let host: std::net::IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some((syncer, dispatch_task)) = syncer {
        syncer.shutdown().await;
        if dispatch_task.is_finished() {
            if let Err(e) = dispatch_task.await {
                tracing::error!("[Dispatch] Command loop ended early: {}", e);
            }
        } else {
            dispatch_task.abort();
        }
    }
    tracing::info!("nello-bridge stopped and unloaded.");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
