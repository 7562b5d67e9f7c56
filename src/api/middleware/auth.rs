use axum::{extract::Request, middleware::Next, response::Response};
use tower_sessions::Session;
use uuid::Uuid;

use super::session::SESSION_KEY_MEMBER_ID;
use crate::error::AppError;

/// Middleware that requires a logged-in member (admin console and member
/// portal routes)
pub async fn require_auth(session: Session, request: Request, next: Next) -> Result<Response, AppError> {
    get_authenticated_member(&session).await?;
    Ok(next.run(request).await)
}

/// Member account id from the session, if someone is logged in
pub async fn current_member(session: &Session) -> Result<Option<Uuid>, AppError> {
    session
        .get(SESSION_KEY_MEMBER_ID)
        .await
        .map_err(|e| AppError::Session(e.to_string()))
}

/// Extracts the authenticated member ID from the session
pub async fn get_authenticated_member(session: &Session) -> Result<Uuid, AppError> {
    current_member(session).await?.ok_or(AppError::Unauthorized)
}
