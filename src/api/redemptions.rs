use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tower_sessions::Session;
use uuid::Uuid;

use crate::api::middleware::{
    auth::{current_member, require_auth},
    session::AppState,
};
use crate::error::{AppError, EngineError, Result};
use crate::models::{Availability, IdentityKey, OfferKind, RedemptionFilter, RedemptionRecord};
use crate::services::{Caller, PublicCaller, RedemptionEngine};

// Request/Response types
#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub code: String,
    pub caller: Option<PublicCaller>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EnrollRequest {
    pub caller: Option<PublicCaller>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub cpf: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RedemptionResponse {
    pub redemption: RedemptionRecord,
    /// Omitted when the post-commit read fails; the redemption stands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability: Option<Availability>,
}

/// Enroll and cancel bodies are optional. An empty body means nothing was
/// sent; anything else has to parse.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::Validation(format!("Invalid JSON body: {e}")))
}

/// Logged-in members redeem as themselves; everyone else must send
/// contact data
async fn resolve_caller(session: &Session, public: Option<PublicCaller>) -> Result<Caller> {
    if let Some(account_id) = current_member(session).await? {
        return Ok(Caller::Member { account_id });
    }
    public
        .map(Caller::Public)
        .ok_or_else(|| AppError::Validation("Caller name, CPF and phone are required".to_string()))
}

/// The redemption is already committed here, so a failed availability
/// read must not turn it into an error response
async fn respond(
    engine: &RedemptionEngine,
    redemption: RedemptionRecord,
    status: StatusCode,
) -> (StatusCode, Json<RedemptionResponse>) {
    let availability = match engine.catalog.availability(redemption.offer_id).await {
        Ok(availability) => Some(availability),
        Err(e) => {
            tracing::warn!(
                redemption_id = %redemption.id,
                error = %e,
                "Availability read failed after commit"
            );
            None
        }
    };

    (
        status,
        Json(RedemptionResponse {
            redemption,
            availability,
        }),
    )
}

// Handlers

/// Redeem a benefit code
async fn redeem_benefit(
    State(engine): State<RedemptionEngine>,
    session: Session,
    Json(req): Json<RedeemRequest>,
) -> Result<(StatusCode, Json<RedemptionResponse>)> {
    let caller = resolve_caller(&session, req.caller).await?;
    let redemption = engine.redeem_benefit(&req.code, &caller).await?;

    Ok(respond(&engine, redemption, StatusCode::CREATED).await)
}

async fn enroll(
    engine: RedemptionEngine,
    kind: OfferKind,
    offer_id: Uuid,
    session: Session,
    body: Bytes,
) -> Result<(StatusCode, Json<RedemptionResponse>)> {
    let req: EnrollRequest = optional_body(&body)?;
    let caller = resolve_caller(&session, req.caller).await?;
    let redemption = engine.enroll(kind, offer_id, &caller).await?;

    Ok(respond(&engine, redemption, StatusCode::CREATED).await)
}

async fn cancel(
    engine: RedemptionEngine,
    kind: OfferKind,
    offer_id: Uuid,
    session: Session,
    body: Bytes,
) -> Result<(StatusCode, Json<RedemptionResponse>)> {
    let req: CancelRequest = optional_body(&body)?;
    let identity_key = match current_member(&session).await? {
        Some(account_id) => IdentityKey::member(account_id),
        None => {
            let cpf = req
                .cpf
                .ok_or_else(|| AppError::Validation("CPF is required".to_string()))?;
            engine
                .resolver
                .public_key(&cpf)
                .map_err(EngineError::from)?
        }
    };
    let redemption = engine.cancel(kind, offer_id, &identity_key).await?;

    Ok(respond(&engine, redemption, StatusCode::OK).await)
}

async fn enroll_training(
    State(engine): State<RedemptionEngine>,
    Path(id): Path<Uuid>,
    session: Session,
    body: Bytes,
) -> Result<(StatusCode, Json<RedemptionResponse>)> {
    enroll(engine, OfferKind::Training, id, session, body).await
}

async fn enroll_event(
    State(engine): State<RedemptionEngine>,
    Path(id): Path<Uuid>,
    session: Session,
    body: Bytes,
) -> Result<(StatusCode, Json<RedemptionResponse>)> {
    enroll(engine, OfferKind::Event, id, session, body).await
}

async fn cancel_training(
    State(engine): State<RedemptionEngine>,
    Path(id): Path<Uuid>,
    session: Session,
    body: Bytes,
) -> Result<(StatusCode, Json<RedemptionResponse>)> {
    cancel(engine, OfferKind::Training, id, session, body).await
}

async fn cancel_event(
    State(engine): State<RedemptionEngine>,
    Path(id): Path<Uuid>,
    session: Session,
    body: Bytes,
) -> Result<(StatusCode, Json<RedemptionResponse>)> {
    cancel(engine, OfferKind::Event, id, session, body).await
}

/// Every redemption of one offer (admin console / member portal)
async fn list_offer_redemptions(
    State(engine): State<RedemptionEngine>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RedemptionRecord>>> {
    engine.catalog.get(id).await?;
    let records = engine.ledger.list_by_offer(id).await?;

    Ok(Json(records))
}

/// Filtered redemption listing for reports
async fn list_redemptions(
    State(engine): State<RedemptionEngine>,
    Query(filter): Query<RedemptionFilter>,
) -> Result<Json<Vec<RedemptionRecord>>> {
    let records = engine.ledger.list_all(&filter).await?;

    Ok(Json(records))
}

async fn get_redemption(
    State(engine): State<RedemptionEngine>,
    Path(id): Path<Uuid>,
) -> Result<Json<RedemptionRecord>> {
    Ok(Json(engine.ledger.find(id).await?))
}

pub fn router() -> Router<AppState> {
    let protected = Router::new()
        .route("/offers/:id/redemptions", get(list_offer_redemptions))
        .route("/api/redemptions", get(list_redemptions))
        .route("/api/redemptions/:id", get(get_redemption))
        .route_layer(middleware::from_fn(require_auth));

    Router::new()
        .route("/benefits/redeem", post(redeem_benefit))
        .route("/trainings/:id/enroll", post(enroll_training))
        .route("/trainings/:id/cancel", post(cancel_training))
        .route("/events/:id/enroll", post(enroll_event))
        .route("/events/:id/cancel", post(cancel_event))
        .merge(protected)
}
