//! Docsync Server binary.

use std::sync::Arc;

use docsync_server::config::Config;
use docsync_server::datastore;
use docsync_server::websocket::ConnectionManager;
use docsync_server::{Adapter, AdapterConfig, AppState, Syncer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docsync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Docsync Server on {}:{}", config.host, config.port);

    let documents = datastore::open(&config.store).await?;
    let changes = datastore::open(&config.sync_store).await?;

    let conn_manager = ConnectionManager::new_shared();
    let syncer = Arc::new(Syncer::new(changes).with_listener(conn_manager.clone()));

    let adapter = Adapter::new(
        AdapterConfig::new(documents)
            .with_conflict_handler(config.conflict_policy.handler())
            .with_notifier(syncer.clone())
            .with_document_level_errors(config.send_document_level_errors),
    );

    let state = AppState::new(Arc::new(adapter), syncer, conn_manager);
    let app = docsync_server::app(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
