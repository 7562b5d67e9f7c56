use std::{net::SocketAddr, sync::Arc};

use secrecy::ExposeSecret;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memberhub::api::middleware::session::{
    create_memory_session_layer, create_session_layer, AppState,
};
use memberhub::config::{Config, StorageBackend};
use memberhub::db;
use memberhub::store::{MemoryStore, PgStore, RedemptionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memberhub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting memberhub server...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(storage = ?config.storage, "Configuration loaded successfully");

    let app = match config.storage {
        StorageBackend::Postgres => {
            let database_url = config
                .database_url
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for postgres storage"))?;

            // Create database pool
            let pool = db::create_pool(database_url.expose_secret(), config.db_max_connections).await?;
            tracing::info!("Database pool created");

            // Run migrations
            db::run_migrations(&pool).await?;
            tracing::info!("Database migrations completed");

            let session_layer = create_session_layer(pool.clone(), config.secure_cookies).await?;
            tracing::info!("Session layer initialized");

            let store: Arc<dyn RedemptionStore> = Arc::new(PgStore::new(pool));
            memberhub::api::router()
                .layer(session_layer)
                .with_state(AppState::new(store, config.clone()))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; redemptions are lost on restart");

            let store: Arc<dyn RedemptionStore> = Arc::new(MemoryStore::new());
            memberhub::api::router()
                .layer(create_memory_session_layer(config.secure_cookies))
                .with_state(AppState::new(store, config.clone()))
        }
    }
    .layer(TraceLayer::new_for_http());

    let ip: std::net::IpAddr = config.host.parse()?;
    let addr = SocketAddr::new(ip, config.port);
    tracing::info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, cleaning up...");
}
