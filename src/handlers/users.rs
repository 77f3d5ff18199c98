//! # User Handlers
//!
//! Account provisioning and the current user's profile.

use crate::db::models::UserEntity;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::{log_in, require_user_id};
use crate::state::AppState;
use crate::webauthn::types::SignupRequest;
use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use tower_sessions::Session;

/// Create an account and sign the session in
///
/// The new user has no passkey yet; registering one is the next step.
///
/// ## Route
/// POST /api/users
pub async fn create_user(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(AppError::BadRequest("Username is required".to_string()));
    }
    let display_name = match req.display_name.trim() {
        "" => username,
        name => name,
    };

    let user = UserEntity::new(username, display_name, state.clock.now());
    state.repository.save_user(&user).await?;
    log_in(&session, user.id).await?;
    tracing::info!(user = %user.name, "Account created");

    Ok((StatusCode::CREATED, Json(profile(&user))))
}

/// Get the signed-in user's profile
///
/// ## Route
/// GET /api/users/me (protected by `require_auth`)
pub async fn get_current_user(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&session).await?;
    let user = state
        .repository
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User with id '{}' not found", user_id)))?;

    Ok(Json(profile(&user)))
}

fn profile(user: &UserEntity) -> Value {
    json!({
        "id": user.id,
        "username": user.name,
        "display_name": user.display_name,
        "created_at": user.created_at
    })
}
