//! # Error Handling
//!
//! The HTTP-facing error type and its conversion into responses.
//!
//! Ceremony failures are deliberately vague on the wire: the client only
//! learns that authentication failed, while the precise reason (origin
//! mismatch, replayed challenge, counter regression...) goes to the log.

use crate::db::repository::{RepositoryError, StorageError};
use crate::webauthn::error::{CeremonyError, Rejection};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

const AUTHENTICATION_FAILED: &str = "Authentication failed";

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A passkey ceremony did not complete
    #[error(transparent)]
    Ceremony(#[from] CeremonyError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// User is not logged in or the session expired
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl AppError {
    /// Map to (status, user-facing message), logging whatever the client
    /// should not see
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::Storage(e)
            | AppError::Ceremony(CeremonyError::Storage(e))
            | AppError::Repository(RepositoryError::Storage(e)) => {
                tracing::error!("Storage error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Ceremony(CeremonyError::Rejected(rejection)) => {
                tracing::warn!(reason = %rejection, "Passkey ceremony rejected");
                let status = match rejection {
                    Rejection::Malformed(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::UNAUTHORIZED,
                };
                (status, AUTHENTICATION_FAILED.to_string())
            }
            AppError::Ceremony(CeremonyError::NotAuthenticated) => {
                (StatusCode::UNAUTHORIZED, "Unauthorized: Not authenticated".to_string())
            }
            // Do not reveal whether an account or its passkeys exist
            AppError::Ceremony(e @ (CeremonyError::UnknownUser | CeremonyError::NoCredentials)) => {
                tracing::warn!(reason = %e, "Authentication options refused");
                (StatusCode::BAD_REQUEST, AUTHENTICATION_FAILED.to_string())
            }
            AppError::Ceremony(CeremonyError::CredentialNotFound)
            | AppError::Repository(RepositoryError::CredentialNotFound) => {
                (StatusCode::NOT_FOUND, "Not found: Credential not found".to_string())
            }
            AppError::Repository(RepositoryError::DuplicateUser) => {
                (StatusCode::CONFLICT, "Conflict: Username already taken".to_string())
            }
            AppError::Repository(e) => {
                tracing::warn!("Repository error: {}", e);
                (StatusCode::BAD_REQUEST, "Bad request".to_string())
            }
            AppError::Session(e) => {
                tracing::error!("Session error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Session error".to_string())
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
        }
    }
}

/// Renders `{ "error": "message" }` with the mapped status code
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = self.status_and_message();
        (status, Json(json!({ "error": error_message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webauthn::error::VerificationFailure;

    #[test]
    fn rejections_do_not_leak_the_reason() {
        let err = AppError::from(CeremonyError::from(VerificationFailure::OriginMismatch));
        let (status, message) = err.status_and_message();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(message, AUTHENTICATION_FAILED);
    }

    #[test]
    fn unknown_user_looks_like_any_other_failure() {
        let (status, message) = AppError::from(CeremonyError::UnknownUser).status_and_message();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, AUTHENTICATION_FAILED);
    }

    #[test]
    fn duplicate_user_is_a_conflict() {
        let (status, _) = AppError::from(RepositoryError::DuplicateUser).status_and_message();
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[test]
    fn storage_failures_hide_their_details() {
        let corrupt = || StorageError::Corrupt("bad uuid in users.id".into());
        for err in [
            AppError::from(corrupt()),
            AppError::from(CeremonyError::from(corrupt())),
            AppError::from(RepositoryError::from(corrupt())),
        ] {
            let (status, message) = err.status_and_message();
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(message, "Database error");
        }
    }
}
