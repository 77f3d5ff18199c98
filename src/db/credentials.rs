//! # Credential Database Operations
//!
//! SQLite implementation of [`CredentialRepository`]. Credentials hold the
//! public keys used to verify assertions; private keys never leave the
//! user's authenticator.
//!
//! Uniqueness and ownership are enforced by the schema (primary key on
//! `credential_id`, foreign key to `users`), and the counter update is a
//! single conditional `UPDATE`, so no read-modify-write race exists.

use crate::db::models::{CredentialRecord, CredentialRow, UserEntity};
use crate::db::repository::{CredentialRepository, RepositoryError, StorageError};
use crate::db::{to_db_timestamp, users};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Clone)]
pub struct SqliteCredentialRepository {
    pool: SqlitePool,
}

impl SqliteCredentialRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Store a newly registered credential
///
/// A duplicate id surfaces as a unique violation and an unknown owner as a
/// foreign key violation; both are mapped to repository errors.
pub async fn save_credential(pool: &SqlitePool, record: &CredentialRecord) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO credentials
         (credential_id, user_id, algorithm, public_key, signature_counter, label,
          backup_eligible, backup_state, attestation_format, created_at, last_used_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.credential_id)
    .bind(record.user_id.to_string())
    .bind(record.public_key.algorithm().id())
    .bind(record.public_key.to_cbor())
    .bind(i64::from(record.signature_counter))
    .bind(&record.label)
    .bind(record.backup_eligible)
    .bind(record.backup_state)
    .bind(&record.attestation_format)
    .bind(to_db_timestamp(record.created_at))
    .bind(record.last_used_at.map(to_db_timestamp))
    .execute(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::DuplicateCredential,
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepositoryError::UnknownUser,
        _ => RepositoryError::from(e),
    })?;

    Ok(())
}

pub async fn find_by_user_id(
    pool: &SqlitePool,
    user_id: Uuid,
) -> Result<Vec<CredentialRecord>, StorageError> {
    let rows = sqlx::query_as::<_, CredentialRow>(
        "SELECT * FROM credentials WHERE user_id = ? ORDER BY created_at",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(CredentialRecord::try_from).collect()
}

pub async fn find_by_credential_id(
    pool: &SqlitePool,
    credential_id: &[u8],
) -> Result<Option<CredentialRecord>, StorageError> {
    sqlx::query_as::<_, CredentialRow>("SELECT * FROM credentials WHERE credential_id = ?")
        .bind(credential_id)
        .fetch_optional(pool)
        .await?
        .map(CredentialRecord::try_from)
        .transpose()
}

/// Advance the signature counter and stamp `last_used_at`
///
/// The `WHERE` clause repeats the counter rule from
/// [`counter_advances`](crate::db::repository::counter_advances) so the
/// check and the write happen in one statement.
pub async fn update_counter(
    pool: &SqlitePool,
    credential_id: &[u8],
    new_counter: u32,
    used_at: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let counter = i64::from(new_counter);
    let result = sqlx::query(
        "UPDATE credentials
         SET signature_counter = ?, last_used_at = ?
         WHERE credential_id = ?
           AND (signature_counter < ? OR (signature_counter = 0 AND ? = 0))",
    )
    .bind(counter)
    .bind(to_db_timestamp(used_at))
    .bind(credential_id)
    .bind(counter)
    .bind(counter)
    .execute(pool)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    match find_by_credential_id(pool, credential_id).await? {
        Some(_) => Err(RepositoryError::CounterRegression),
        None => Err(RepositoryError::CredentialNotFound),
    }
}

pub async fn delete_credential(pool: &SqlitePool, credential_id: &[u8]) -> Result<(), RepositoryError> {
    let result = sqlx::query("DELETE FROM credentials WHERE credential_id = ?")
        .bind(credential_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::CredentialNotFound);
    }
    Ok(())
}

#[async_trait]
impl CredentialRepository for SqliteCredentialRepository {
    async fn save_user(&self, user: &UserEntity) -> Result<(), RepositoryError> {
        users::insert_user(&self.pool, user).await
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<(), RepositoryError> {
        users::delete_user(&self.pool, user_id).await
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<UserEntity>, StorageError> {
        users::find_by_name(&self.pool, name).await
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<UserEntity>, StorageError> {
        users::find_by_id(&self.pool, user_id).await
    }

    async fn find_credentials_by_user_id(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<CredentialRecord>, StorageError> {
        find_by_user_id(&self.pool, user_id).await
    }

    async fn find_credential(
        &self,
        credential_id: &[u8],
    ) -> Result<Option<CredentialRecord>, StorageError> {
        find_by_credential_id(&self.pool, credential_id).await
    }

    async fn save(&self, record: &CredentialRecord) -> Result<(), RepositoryError> {
        save_credential(&self.pool, record).await
    }

    async fn update_counter_and_usage(
        &self,
        credential_id: &[u8],
        new_counter: u32,
        used_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        update_counter(&self.pool, credential_id, new_counter, used_at).await
    }

    async fn delete(&self, credential_id: &[u8]) -> Result<(), RepositoryError> {
        delete_credential(&self.pool, credential_id).await
    }
}
