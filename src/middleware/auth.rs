use crate::error::{AppError, AppResult};
use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
};
use tower_sessions::Session;
use uuid::Uuid;

/// Session key holding the signed-in user's id
pub const USER_ID_KEY: &str = "user_id";

/// The signed-in user's id, if the session has one
pub async fn current_user_id(session: &Session) -> AppResult<Option<Uuid>> {
    let user_id: Option<String> = session.get(USER_ID_KEY).await?;
    Ok(user_id.and_then(|id| Uuid::parse_str(&id).ok()))
}

/// Like [`current_user_id`] but fails with 401 when nobody is signed in
pub async fn require_user_id(session: &Session) -> AppResult<Uuid> {
    current_user_id(session)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))
}

/// Bind `user_id` to the session, issuing a fresh session id first
pub async fn log_in(session: &Session, user_id: Uuid) -> AppResult<()> {
    session.cycle_id().await?;
    session.insert(USER_ID_KEY, user_id.to_string()).await?;
    Ok(())
}

pub async fn require_auth(
    session: Session,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    require_user_id(&session).await?;
    Ok(next.run(request).await)
}
