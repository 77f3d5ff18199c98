//! # WebAuthn Error Types
//!
//! Errors raised by the relying party core. The specific reasons are meant for
//! audit logs; the HTTP layer collapses them into a generic message so a
//! client cannot learn which check failed.

use super::challenge::ChallengeError;
use crate::db::repository::StorageError;
use thiserror::Error;

/// A binary or JSON structure from the browser could not be decoded
///
/// `field` names the structure that failed, e.g. `authData` or
/// `clientDataJSON.challenge`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {field}: {reason}")]
pub struct MalformedInput {
    pub field: &'static str,
    pub reason: String,
}

impl MalformedInput {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// The reason a decoded attestation or assertion was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    #[error("client data type does not match the ceremony")]
    CeremonyTypeMismatch,
    #[error("origin mismatch")]
    OriginMismatch,
    #[error("relying party id hash mismatch")]
    RpIdMismatch,
    #[error("challenge mismatch")]
    ChallengeMismatch,
    #[error("user presence flag not set")]
    UserNotPresent,
    #[error("user verification required but not performed")]
    UserNotVerified,
    #[error("attested credential data missing")]
    MissingCredentialData,
    #[error("credential id does not match authenticator data")]
    CredentialIdMismatch,
    #[error("unsupported public key algorithm")]
    UnsupportedAlgorithm,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("unsupported attestation format")]
    UnsupportedAttestation,
    #[error("invalid attestation statement")]
    AttestationInvalid,
    #[error("invalid signature")]
    SignatureInvalid,
    #[error("signature counter regression")]
    CounterRegression,
    #[error("credential not registered")]
    UnknownCredential,
    #[error("credential not allowed for this ceremony")]
    CredentialNotAllowed,
}

/// Why a submitted ceremony ended in the `Rejected` state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("unknown or expired challenge")]
    UnknownOrExpiredChallenge,
    #[error(transparent)]
    Malformed(#[from] MalformedInput),
    #[error("verification failed: {0}")]
    Verification(#[from] VerificationFailure),
    #[error("unknown user")]
    UnknownUser,
    #[error("duplicate credential")]
    DuplicateCredential,
}

/// Errors returned by the ceremony orchestrator
#[derive(Debug, Error)]
pub enum CeremonyError {
    #[error("ceremony rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("no authenticated user")]
    NotAuthenticated,

    #[error("unknown user")]
    UnknownUser,

    #[error("user has no registered credentials")]
    NoCredentials,

    #[error("credential not found")]
    CredentialNotFound,

    /// Storage failures are surfaced unmodified; retrying is up to the caller
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<VerificationFailure> for CeremonyError {
    fn from(failure: VerificationFailure) -> Self {
        CeremonyError::Rejected(Rejection::Verification(failure))
    }
}

impl From<MalformedInput> for CeremonyError {
    fn from(malformed: MalformedInput) -> Self {
        CeremonyError::Rejected(Rejection::Malformed(malformed))
    }
}

/// Any challenge that cannot be redeemed is reported the same way
impl From<ChallengeError> for CeremonyError {
    fn from(err: ChallengeError) -> Self {
        match err {
            ChallengeError::Storage(e) => CeremonyError::Storage(e),
            ChallengeError::Expired | ChallengeError::NotFound | ChallengeError::AlreadyUsed => {
                CeremonyError::Rejected(Rejection::UnknownOrExpiredChallenge)
            }
        }
    }
}
