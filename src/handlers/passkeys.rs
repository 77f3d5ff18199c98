//! # Passkey Management Handlers
//!
//! Listing and revoking the signed-in user's credentials. Both routes sit
//! behind `require_auth`.

use crate::db::models::CredentialRecord;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::require_user_id;
use crate::state::AppState;
use crate::webauthn::codec;
use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use tower_sessions::Session;

/// GET /api/passkeys
pub async fn list_passkeys(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&session).await?;
    let credentials = state.repository.find_credentials_by_user_id(user_id).await?;

    Ok(Json(json!({
        "passkeys": credentials.iter().map(summary).collect::<Vec<_>>()
    })))
}

/// DELETE /api/passkeys/{credential_id}
///
/// `credential_id` is base64url. Someone else's credential is a 404, same
/// as a credential that does not exist.
pub async fn revoke_passkey(
    State(state): State<AppState>,
    session: Session,
    Path(credential_id): Path<String>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&session).await?;
    let credential_id = codec::b64url_decode("credentialId", &credential_id)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    state
        .relying_party_for(Some(user_id))
        .revoke_credential(user_id, &credential_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Passkey revoked"
    })))
}

// Public key material is left out; clients have no use for it
fn summary(record: &CredentialRecord) -> Value {
    json!({
        "credential_id": codec::b64url_encode(&record.credential_id),
        "label": record.label,
        "algorithm": record.public_key.algorithm().id(),
        "signature_counter": record.signature_counter,
        "backup_eligible": record.backup_eligible,
        "backup_state": record.backup_state,
        "attestation_format": record.attestation_format,
        "created_at": record.created_at,
        "last_used_at": record.last_used_at
    })
}
