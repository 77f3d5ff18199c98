//! # Passkey Ceremony Handlers
//!
//! Each ceremony takes two requests. The options call stores the issued
//! challenge in the session; the finish call takes it back out, so a
//! challenge can only ever be submitted once per session.

use crate::error::{AppError, AppResult};
use crate::middleware::auth::{current_user_id, log_in, USER_ID_KEY};
use crate::state::AppState;
use crate::webauthn::codec;
use crate::webauthn::error::{CeremonyError, Rejection};
use crate::webauthn::types::{AuthenticationRequest, AuthenticationStartRequest, RegistrationRequest};
use axum::{extract::State, Json};
use serde_json::{json, Value};
use tower_sessions::Session;

const REGISTRATION_CHALLENGE_KEY: &str = "registration_challenge";
const AUTHENTICATION_CHALLENGE_KEY: &str = "authentication_challenge";

/// Remove the pending challenge from the session and decode it
async fn take_challenge(session: &Session, key: &str) -> AppResult<Vec<u8>> {
    let unknown = || AppError::Ceremony(CeremonyError::Rejected(Rejection::UnknownOrExpiredChallenge));

    let encoded: String = session.remove(key).await?.ok_or_else(unknown)?;
    codec::b64url_decode("challenge", &encoded).map_err(|_| unknown())
}

// Registration endpoints

pub async fn register_options(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Json<Value>> {
    let user_id = current_user_id(&session).await?;
    let options = state.relying_party_for(user_id).start_registration().await?;
    session
        .insert(REGISTRATION_CHALLENGE_KEY, &options.challenge)
        .await?;

    Ok(Json(json!(options)))
}

pub async fn register_finish(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<RegistrationRequest>,
) -> AppResult<Json<Value>> {
    let user_id = current_user_id(&session).await?;
    let challenge = take_challenge(&session, REGISTRATION_CHALLENGE_KEY).await?;
    let record = state
        .relying_party_for(user_id)
        .finish_registration(&challenge, &req)
        .await?;

    Ok(Json(json!({
        "success": true,
        "credential_id": codec::b64url_encode(&record.credential_id),
        "label": record.label,
        "message": "Registration successful"
    })))
}

// Authentication endpoints

pub async fn authenticate_options(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<AuthenticationStartRequest>,
) -> AppResult<Json<Value>> {
    let options = state
        .relying_party_for(None)
        .start_authentication(req.username.as_deref())
        .await?;
    session
        .insert(AUTHENTICATION_CHALLENGE_KEY, &options.challenge)
        .await?;

    Ok(Json(json!(options)))
}

pub async fn authenticate_finish(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<AuthenticationRequest>,
) -> AppResult<Json<Value>> {
    let challenge = take_challenge(&session, AUTHENTICATION_CHALLENGE_KEY).await?;
    let authenticated = state
        .relying_party_for(None)
        .finish_authentication(&challenge, &req)
        .await?;

    log_in(&session, authenticated.user.id).await?;

    Ok(Json(json!({
        "success": true,
        "user_id": authenticated.user.id,
        "username": authenticated.user.name,
        "message": "Authentication successful"
    })))
}

// Session management

pub async fn logout(session: Session) -> AppResult<Json<Value>> {
    session.delete().await?;

    Ok(Json(json!({
        "success": true,
        "message": "Logged out successfully"
    })))
}

pub async fn session_info(session: Session) -> AppResult<Json<Value>> {
    let user_id: Option<String> = session.get(USER_ID_KEY).await?;

    match user_id {
        Some(id) => Ok(Json(json!({
            "authenticated": true,
            "user_id": id
        }))),
        None => Ok(Json(json!({
            "authenticated": false
        }))),
    }
}
