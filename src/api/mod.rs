// API module - HTTP endpoints

use axum::Router;

use middleware::session::AppState;

pub mod health;
pub mod middleware;
pub mod offers;
pub mod redemptions;

/// All routes, without session or trace layers
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(offers::router())
        .merge(redemptions::router())
}
