use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;
use tower_sessions::{Expiry, MemoryStore as MemorySessionStore, SessionManagerLayer};
use tower_sessions_sqlx_store::PostgresStore;

use crate::services::RedemptionEngine;
use crate::store::RedemptionStore;

/// Session keys used in the application
pub const SESSION_KEY_MEMBER_ID: &str = "member_id";

fn configure<S>(layer: SessionManagerLayer<S>, secure: bool) -> SessionManagerLayer<S>
where
    S: tower_sessions::SessionStore,
{
    layer
        .with_secure(secure)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(24)))
}

/// Session layer backed by PostgreSQL
pub async fn create_session_layer(
    pool: PgPool,
    secure: bool,
) -> Result<SessionManagerLayer<PostgresStore>, sqlx::Error> {
    let session_store = PostgresStore::new(pool);
    session_store.migrate().await?;

    Ok(configure(SessionManagerLayer::new(session_store), secure))
}

/// Session layer kept in process memory, used with the in-memory backend
pub fn create_memory_session_layer(secure: bool) -> SessionManagerLayer<MemorySessionStore> {
    configure(SessionManagerLayer::new(MemorySessionStore::default()), secure)
}

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: RedemptionEngine,
    pub store: Arc<dyn RedemptionStore>,
    pub config: crate::config::Config,
}

impl AppState {
    pub fn new(store: Arc<dyn RedemptionStore>, config: crate::config::Config) -> Self {
        Self {
            engine: RedemptionEngine::new(Arc::clone(&store)),
            store,
            config,
        }
    }
}

impl FromRef<AppState> for RedemptionEngine {
    fn from_ref(state: &AppState) -> RedemptionEngine {
        state.engine.clone()
    }
}
