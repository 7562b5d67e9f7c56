use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::api::middleware::{auth::require_auth, session::AppState};
use crate::error::Result;
use crate::models::{Availability, NewOffer, Offer, OfferUpdate};
use crate::services::RedemptionEngine;

#[derive(Debug, Serialize)]
pub struct OfferResponse {
    #[serde(flatten)]
    pub offer: Offer,
    pub availability: Availability,
}

/// Get offer with its derived availability
async fn get_offer(
    State(engine): State<RedemptionEngine>,
    Path(id): Path<Uuid>,
) -> Result<Json<OfferResponse>> {
    let offer = engine.catalog.get(id).await?;
    let availability = engine.catalog.availability(id).await?;

    Ok(Json(OfferResponse {
        offer,
        availability,
    }))
}

/// Publish an offer (member portal)
async fn create_offer(
    State(engine): State<RedemptionEngine>,
    Json(req): Json<NewOffer>,
) -> Result<(StatusCode, Json<Offer>)> {
    let offer = engine.catalog.publish(req).await?;

    Ok((StatusCode::CREATED, Json(offer)))
}

/// Edit title, capacity, window or active flag
async fn update_offer(
    State(engine): State<RedemptionEngine>,
    Path(id): Path<Uuid>,
    Json(req): Json<OfferUpdate>,
) -> Result<Json<Offer>> {
    let offer = engine.catalog.update(id, req).await?;

    Ok(Json(offer))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/offers",
            post(create_offer).route_layer(middleware::from_fn(require_auth)),
        )
        .route(
            "/api/offers/:id",
            get(get_offer).merge(put(update_offer).route_layer(middleware::from_fn(require_auth))),
        )
}
