//! # User Accounts
//!
//! The relying party core does not own user accounts; it asks a
//! [`UserAccountProvider`] who a named user is and who is signed in for the
//! current request.

use crate::db::models::UserEntity;
use crate::db::repository::{CredentialRepository, StorageError};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait UserAccountProvider: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<UserEntity>, StorageError>;

    /// The user bound to the current request, if any
    async fn current_authenticated_user(&self) -> Result<Option<UserEntity>, StorageError>;
}

/// Accounts backed by the credential repository's user table
///
/// Built per request: `current` is the user id taken from the session.
#[derive(Clone)]
pub struct RepositoryAccounts {
    repository: Arc<dyn CredentialRepository>,
    current: Option<Uuid>,
}

impl RepositoryAccounts {
    pub fn new(repository: Arc<dyn CredentialRepository>, current: Option<Uuid>) -> Self {
        Self {
            repository,
            current,
        }
    }
}

#[async_trait]
impl UserAccountProvider for RepositoryAccounts {
    async fn find_by_name(&self, name: &str) -> Result<Option<UserEntity>, StorageError> {
        self.repository.find_user_by_name(name).await
    }

    async fn current_authenticated_user(&self) -> Result<Option<UserEntity>, StorageError> {
        match self.current {
            Some(user_id) => self.repository.find_user_by_id(user_id).await,
            None => Ok(None),
        }
    }
}
