//! # Database Models
//!
//! Domain records for users and their passkey credentials, plus the row
//! structs sqlx maps SQLite rows into. Timestamps are stored as RFC3339 text
//! and converted when a row is turned into a domain record.

use super::repository::StorageError;
use super::{parse_db_timestamp, parse_optional_timestamp};
use crate::webauthn::challenge::{Challenge, ChallengePurpose};
use crate::webauthn::cose::CosePublicKey;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A user who can own passkeys
///
/// Immutable once provisioned; removed only together with the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntity {
    /// Random UUID, also sent to authenticators as the WebAuthn user handle
    pub id: Uuid,

    /// Unique login handle
    pub name: String,

    /// Human-readable name shown by the authenticator during creation
    pub display_name: String,

    pub created_at: DateTime<Utc>,
}

impl UserEntity {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            display_name: display_name.into(),
            created_at: now,
        }
    }
}

/// A registered passkey
///
/// Only the public key is stored; the private key never leaves the
/// authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    /// Globally unique credential id chosen by the authenticator
    pub credential_id: Vec<u8>,

    pub user_id: Uuid,

    /// Public key with its algorithm tag
    pub public_key: CosePublicKey,

    /// Last accepted signature counter; never decreases
    pub signature_counter: u32,

    /// User-supplied name, e.g. "YubiKey" or "Work laptop"
    pub label: String,

    /// Whether the credential may be synced to other devices
    pub backup_eligible: bool,

    /// Whether the credential was backed up when registered
    pub backup_state: bool,

    /// Attestation format sent at registration ("none" or "packed")
    pub attestation_format: String,

    pub created_at: DateTime<Utc>,

    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub created_at: String,
}

impl TryFrom<UserRow> for UserEntity {
    type Error = StorageError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(UserEntity {
            id: parse_uuid(&row.id)?,
            name: row.name,
            display_name: row.display_name,
            created_at: parse_db_timestamp(&row.created_at)?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CredentialRow {
    pub credential_id: Vec<u8>,
    pub user_id: String,
    pub algorithm: i64,
    pub public_key: Vec<u8>,
    pub signature_counter: i64,
    pub label: String,
    pub backup_eligible: bool,
    pub backup_state: bool,
    pub attestation_format: String,
    pub created_at: String,
    pub last_used_at: Option<String>,
}

impl TryFrom<CredentialRow> for CredentialRecord {
    type Error = StorageError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        let public_key = CosePublicKey::from_cbor(&row.public_key)
            .map_err(|e| StorageError::Corrupt(format!("credential public key: {e}")))?;
        if public_key.algorithm().id() != row.algorithm {
            return Err(StorageError::Corrupt(format!(
                "credential algorithm column {} does not match its key",
                row.algorithm
            )));
        }

        Ok(CredentialRecord {
            credential_id: row.credential_id,
            user_id: parse_uuid(&row.user_id)?,
            public_key,
            signature_counter: u32::try_from(row.signature_counter).map_err(|_| {
                StorageError::Corrupt(format!("signature counter {}", row.signature_counter))
            })?,
            label: row.label,
            backup_eligible: row.backup_eligible,
            backup_state: row.backup_state,
            attestation_format: row.attestation_format,
            created_at: parse_db_timestamp(&row.created_at)?,
            last_used_at: parse_optional_timestamp(row.last_used_at.as_deref())?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChallengeRow {
    pub value: Vec<u8>,
    pub purpose: String,
    pub subject_user_id: Option<String>,
    pub issued_at: String,
    pub expires_at: String,
}

impl TryFrom<ChallengeRow> for Challenge {
    type Error = StorageError;

    fn try_from(row: ChallengeRow) -> Result<Self, Self::Error> {
        Ok(Challenge {
            value: row.value,
            purpose: ChallengePurpose::parse(&row.purpose)
                .ok_or_else(|| StorageError::Corrupt(format!("challenge purpose {:?}", row.purpose)))?,
            subject_user_id: row.subject_user_id.as_deref().map(parse_uuid).transpose()?,
            issued_at: parse_db_timestamp(&row.issued_at)?,
            expires_at: parse_db_timestamp(&row.expires_at)?,
        })
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(value).map_err(|_| StorageError::Corrupt(format!("invalid uuid {value:?}")))
}
