//! # Application State
//!
//! Shared resources handed to every request handler. Axum clones the state
//! per request, which is cheap: the pool is a handle and everything else
//! sits behind an `Arc`.
//!
//! ## What lives here
//! 1. The SQLite pool, opened and migrated once at startup
//! 2. The credential repository and challenge store built on that pool
//! 3. The clock every expiry check reads
//! 4. A relying party wired to all of the above
//!
//! The relying party needs to know who is signed in, and that changes from
//! request to request. Handlers therefore never use the shared instance
//! directly: they ask [`AppState::relying_party_for`] for a copy bound to the
//! session's user.

use crate::accounts::RepositoryAccounts;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::challenges::SqliteChallengeStore;
use crate::db::credentials::SqliteCredentialRepository;
use crate::db::repository::CredentialRepository;
use crate::db::MIGRATOR;
use crate::webauthn::ceremony::{RelyingParty, RelyingPartyConfig};
use crate::webauthn::challenge::ChallengeStore;
use anyhow::Result;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    /// Connection pool shared by the repository, challenge and session stores
    ///
    /// Cloning the pool clones a handle, not the connections.
    pub db: SqlitePool,

    /// Users and their passkeys
    ///
    /// A trait object so tests can swap in the in-memory repository.
    pub repository: Arc<dyn CredentialRepository>,

    /// Outstanding ceremony challenges, also swept by the background task in `main`
    pub challenges: Arc<dyn ChallengeStore>,

    /// System time in production, a manual clock in tests
    pub clock: Arc<dyn Clock>,

    /// Relying party without a signed-in user; see [`AppState::relying_party_for`]
    relying_party: RelyingParty,
}

impl AppState {
    /// Connect to the database, run migrations and build the relying party
    ///
    /// # Errors
    /// Fails if the relying party settings are invalid, the database cannot
    /// be opened or a migration fails.
    pub async fn new(config: &Config) -> Result<Self> {
        // Validate RP_ID / RP_ORIGIN before touching the database so a
        // misconfigured server fails fast
        let rp_config = config.relying_party()?;

        // The pool size is managed by SQLx
        let db = SqlitePool::connect(&config.database_url).await?;

        // Embedded migrations from ./migrations, tracked so each runs once
        MIGRATOR.run(&db).await?;

        Ok(Self::from_pool(db, rp_config, Arc::new(SystemClock)))
    }

    /// Assemble state on an already migrated pool
    ///
    /// Integration tests call this with an in-memory pool and a manual clock.
    pub fn from_pool(db: SqlitePool, rp_config: RelyingPartyConfig, clock: Arc<dyn Clock>) -> Self {
        let repository: Arc<dyn CredentialRepository> =
            Arc::new(SqliteCredentialRepository::new(db.clone()));
        let challenges: Arc<dyn ChallengeStore> = Arc::new(SqliteChallengeStore::new(
            db.clone(),
            clock.clone(),
            rp_config.challenge_timeout,
        ));
        // Nobody is signed in on the base instance
        let relying_party = RelyingParty::new(
            rp_config,
            challenges.clone(),
            repository.clone(),
            Arc::new(RepositoryAccounts::new(repository.clone(), None)),
            clock.clone(),
        );

        AppState {
            db,
            repository,
            challenges,
            clock,
            relying_party,
        }
    }

    /// The relying party as seen by the user signed in on this request
    ///
    /// Pass the id from the session (`None` for anonymous requests). Only the
    /// account provider changes; stores, clock and config are shared.
    pub fn relying_party_for(&self, current_user: Option<Uuid>) -> RelyingParty {
        self.relying_party.with_accounts(Arc::new(RepositoryAccounts::new(
            self.repository.clone(),
            current_user,
        )))
    }
}
