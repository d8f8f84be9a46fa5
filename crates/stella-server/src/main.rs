mod config;

use std::sync::Arc;

use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use stella_api::{AppStateInner, create_router};
use stella_db::{Database, DbConfig};
use stella_gateway::dispatcher::Dispatcher;
use stella_gateway::relay::{OutboxRelay, RelayConfig};

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stella_server=debug,stella_api=debug,stella_gateway=debug,stella_db=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db_config = DbConfig {
        lock_timeout: config.db_timeout,
        ..DbConfig::default()
    };
    let db = Arc::new(Database::open_with(&config.db_path, &db_config)?);

    // Fan-out relay
    let relay = OutboxRelay::new(
        db.clone(),
        Dispatcher::new(),
        RelayConfig {
            interval: config.outbox_interval,
            retention: config.outbox_retention,
        },
    );
    tokio::spawn(relay.clone().run());

    let state = AppStateInner::new(db, relay, config.request_timeout);

    let app = create_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr = config.addr()?;
    info!("Stella server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
