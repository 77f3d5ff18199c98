//! # Credential Repository
//!
//! The storage contract the ceremony orchestrator relies on. Implementations
//! must enforce two invariants themselves rather than leaving them to
//! callers:
//!
//! - a credential can only be saved for an existing user, and its id is
//!   unique across all users
//! - `update_counter_and_usage` is a compare-and-set, so concurrent
//!   authentications cannot move a signature counter backwards

use super::models::{CredentialRecord, UserEntity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Failure of the underlying store
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be turned back into a record
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("unknown user")]
    UnknownUser,

    #[error("user name already taken")]
    DuplicateUser,

    #[error("duplicate credential")]
    DuplicateCredential,

    #[error("credential not found")]
    CredentialNotFound,

    #[error("signature counter regression")]
    CounterRegression,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        RepositoryError::Storage(StorageError::Database(err))
    }
}

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Provision a user; fails with `DuplicateUser` if the name is taken
    async fn save_user(&self, user: &UserEntity) -> Result<(), RepositoryError>;

    /// Remove a user together with all of their credentials
    async fn delete_user(&self, user_id: Uuid) -> Result<(), RepositoryError>;

    async fn find_user_by_name(&self, name: &str) -> Result<Option<UserEntity>, StorageError>;

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<UserEntity>, StorageError>;

    /// All credentials of a user, in no particular order
    async fn find_credentials_by_user_id(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<CredentialRecord>, StorageError>;

    async fn find_credential(
        &self,
        credential_id: &[u8],
    ) -> Result<Option<CredentialRecord>, StorageError>;

    /// Store a newly registered credential
    ///
    /// Fails with `UnknownUser` if the owner does not exist and with
    /// `DuplicateCredential` if the id is already registered.
    async fn save(&self, record: &CredentialRecord) -> Result<(), RepositoryError>;

    /// Record a successful authentication
    ///
    /// Applies only if `new_counter` still advances the stored counter (see
    /// [`counter_advances`]); otherwise fails with `CounterRegression`.
    async fn update_counter_and_usage(
        &self,
        credential_id: &[u8],
        new_counter: u32,
        used_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn delete(&self, credential_id: &[u8]) -> Result<(), RepositoryError>;
}

/// Clone-detection rule: the counter must strictly increase, except for
/// authenticators that never count and report zero every time
pub fn counter_advances(stored: u32, new: u32) -> bool {
    new > stored || (new == 0 && stored == 0)
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, UserEntity>,
    credentials: HashMap<Vec<u8>, CredentialRecord>,
}

/// Repository kept entirely in memory
///
/// A single lock guards users and credentials together, so the foreign-key
/// and uniqueness checks happen atomically with the write.
#[derive(Default)]
pub struct MemoryCredentialRepository {
    inner: RwLock<Inner>,
}

impl MemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialRepository for MemoryCredentialRepository {
    async fn save_user(&self, user: &UserEntity) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        if inner.users.values().any(|existing| existing.name == user.name) {
            return Err(RepositoryError::DuplicateUser);
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        if inner.users.remove(&user_id).is_none() {
            return Err(RepositoryError::UnknownUser);
        }
        inner.credentials.retain(|_, record| record.user_id != user_id);
        Ok(())
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<UserEntity>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().find(|user| user.name == name).cloned())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<UserEntity>, StorageError> {
        Ok(self.inner.read().await.users.get(&user_id).cloned())
    }

    async fn find_credentials_by_user_id(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<CredentialRecord>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner
            .credentials
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_credential(
        &self,
        credential_id: &[u8],
    ) -> Result<Option<CredentialRecord>, StorageError> {
        Ok(self.inner.read().await.credentials.get(credential_id).cloned())
    }

    async fn save(&self, record: &CredentialRecord) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&record.user_id) {
            return Err(RepositoryError::UnknownUser);
        }
        if inner.credentials.contains_key(&record.credential_id) {
            return Err(RepositoryError::DuplicateCredential);
        }
        inner
            .credentials
            .insert(record.credential_id.clone(), record.clone());
        Ok(())
    }

    async fn update_counter_and_usage(
        &self,
        credential_id: &[u8],
        new_counter: u32,
        used_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .credentials
            .get_mut(credential_id)
            .ok_or(RepositoryError::CredentialNotFound)?;
        if !counter_advances(record.signature_counter, new_counter) {
            return Err(RepositoryError::CounterRegression);
        }
        record.signature_counter = new_counter;
        record.last_used_at = Some(used_at);
        Ok(())
    }

    async fn delete(&self, credential_id: &[u8]) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        inner
            .credentials
            .remove(credential_id)
            .map(|_| ())
            .ok_or(RepositoryError::CredentialNotFound)
    }
}
