use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::identity::InvalidIdentity;
use crate::services::validity::IneligibleReason;
use crate::store::StoreError;

/// Outcomes of the redemption engine other than success.
///
/// Everything except `AllocatorUnavailable` is an expected business result.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(#[from] InvalidIdentity),

    #[error("Offer not eligible: {0}")]
    OfferNotEligible(IneligibleReason),

    #[error("This identity already holds an active redemption for the offer")]
    AlreadyRedeemed,

    #[error("No capacity left for this offer")]
    CapacityExhausted,

    #[error("No active redemption to cancel")]
    NoActiveRedemption,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Redemption service unavailable, please retry")]
    AllocatorUnavailable(#[source] StoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateActive => EngineError::AlreadyRedeemed,
            StoreError::CodeTaken(code) => {
                EngineError::Conflict(format!("code {code} is already used by an active benefit"))
            }
            other => EngineError::AllocatorUnavailable(other),
        }
    }
}

impl EngineError {
    /// Only storage faults are worth retrying; retries never double-consume
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AllocatorUnavailable(_))
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidIdentity(_) => "INVALID_IDENTITY",
            Self::OfferNotEligible(_) => "OFFER_NOT_ELIGIBLE",
            Self::AlreadyRedeemed => "ALREADY_REDEEMED",
            Self::CapacityExhausted => "CAPACITY_EXHAUSTED",
            Self::NoActiveRedemption => "NO_ACTIVE_REDEMPTION",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::AllocatorUnavailable(_) => "ALLOCATOR_UNAVAILABLE",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::NoActiveRedemption => StatusCode::NOT_FOUND,
            Self::InvalidIdentity(_) => StatusCode::BAD_REQUEST,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::OfferNotEligible(_)
            | Self::AlreadyRedeemed
            | Self::CapacityExhausted
            | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::AllocatorUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Engine(err) => {
                if let EngineError::AllocatorUnavailable(source) = err {
                    tracing::error!(error = %source, "Allocator unavailable");
                }
                let message = match err {
                    EngineError::OfferNotEligible(reason) => {
                        return (
                            err.status(),
                            Json(json!({
                                "error": err.error_code(),
                                "reason": reason.as_str(),
                                "message": err.to_string(),
                            })),
                        )
                            .into_response();
                    }
                    other => other.to_string(),
                };
                (err.status(), err.error_code(), message)
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Session(msg) => {
                tracing::error!(error = %msg, "Session error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "SESSION_ERROR",
                    "Session error".to_string(),
                )
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required. Please log in.".to_string(),
            ),
            AppError::Internal(err) => {
                tracing::error!(error = ?err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_faults_map_to_engine_outcomes() {
        assert!(matches!(
            EngineError::from(StoreError::DuplicateActive),
            EngineError::AlreadyRedeemed
        ));
        assert!(matches!(
            EngineError::from(StoreError::CodeTaken("X".into())),
            EngineError::Conflict(_)
        ));
        let err = EngineError::from(StoreError::Unavailable("down".into()));
        assert!(err.is_retryable());
        assert_eq!(err.error_code(), "ALLOCATOR_UNAVAILABLE");
    }

    #[test]
    fn business_outcomes_are_not_retryable() {
        assert!(!EngineError::CapacityExhausted.is_retryable());
        assert!(!EngineError::AlreadyRedeemed.is_retryable());
        assert!(!EngineError::OfferNotEligible(IneligibleReason::Expired).is_retryable());
    }

    #[test]
    fn every_outcome_has_a_distinct_status_or_code() {
        let errors = [
            EngineError::NotFound("offer".into()),
            EngineError::InvalidIdentity(InvalidIdentity::CpfChecksum),
            EngineError::OfferNotEligible(IneligibleReason::NotYetOpen),
            EngineError::AlreadyRedeemed,
            EngineError::CapacityExhausted,
            EngineError::NoActiveRedemption,
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.error_code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn http_status_mapping() {
        let resp = AppError::from(EngineError::CapacityExhausted).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = AppError::from(EngineError::AllocatorUnavailable(StoreError::Unavailable(
            "down".into(),
        )))
        .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let resp = AppError::Unauthorized.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
