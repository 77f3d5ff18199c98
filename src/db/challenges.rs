//! # Challenge Database Operations
//!
//! SQLite implementation of [`ChallengeStore`]. Each row is one issued
//! challenge: its random value, purpose, optional subject user and the
//! issue and expiry times.
//!
//! ## Lifecycle
//! 1. `issue` inserts a row with `used_at` NULL
//! 2. `redeem` sets `used_at` if the row is unused and unexpired
//! 3. A redeem that misses is classified as unknown, already used or expired;
//!    expired rows are deleted on the spot
//! 4. `purge_expired` (run periodically from `main`) removes the rest
//!
//! Used rows are kept until they expire so a replay reports `AlreadyUsed`
//! rather than `NotFound`.

use crate::clock::Clock;
use crate::db::models::ChallengeRow;
use crate::db::repository::StorageError;
use crate::db::to_db_timestamp;
use crate::webauthn::challenge::{Challenge, ChallengeError, ChallengePurpose, ChallengeStore};
use async_trait::async_trait;
use chrono::Duration;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Challenge store shared by every process using the same database
///
/// Redemption is one conditional `UPDATE ... RETURNING`; SQLite serializes
/// writers, so only one caller can flip `used_at` for a given value.
#[derive(Clone)]
pub struct SqliteChallengeStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl SqliteChallengeStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            pool,
            clock,
            timeout,
        }
    }
}

#[async_trait]
impl ChallengeStore for SqliteChallengeStore {
    async fn issue(
        &self,
        purpose: ChallengePurpose,
        subject_user_id: Option<Uuid>,
    ) -> Result<Challenge, ChallengeError> {
        let challenge = Challenge::generate(purpose, subject_user_id, self.clock.now(), self.timeout);

        sqlx::query(
            "INSERT INTO challenges (value, purpose, subject_user_id, issued_at, expires_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&challenge.value)
        .bind(challenge.purpose.as_str())
        .bind(challenge.subject_user_id.map(|id| id.to_string()))
        .bind(to_db_timestamp(challenge.issued_at))
        .bind(to_db_timestamp(challenge.expires_at))
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        Ok(challenge)
    }

    async fn redeem(&self, value: &[u8]) -> Result<Challenge, ChallengeError> {
        let now = to_db_timestamp(self.clock.now());

        let redeemed = sqlx::query_as::<_, ChallengeRow>(
            "UPDATE challenges
             SET used_at = ?
             WHERE value = ? AND used_at IS NULL AND expires_at > ?
             RETURNING value, purpose, subject_user_id, issued_at, expires_at",
        )
        .bind(&now)
        .bind(value)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;

        if let Some(row) = redeemed {
            return Ok(Challenge::try_from(row)?);
        }

        // Nothing was updated; find out why
        let used_at: Option<Option<String>> =
            sqlx::query_scalar("SELECT used_at FROM challenges WHERE value = ?")
                .bind(value)
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::from)?;

        match used_at {
            None => Err(ChallengeError::NotFound),
            Some(Some(_)) => Err(ChallengeError::AlreadyUsed),
            Some(None) => {
                sqlx::query("DELETE FROM challenges WHERE value = ?")
                    .bind(value)
                    .execute(&self.pool)
                    .await
                    .map_err(StorageError::from)?;
                Err(ChallengeError::Expired)
            }
        }
    }

    async fn purge_expired(&self) -> Result<u64, ChallengeError> {
        let result = sqlx::query("DELETE FROM challenges WHERE expires_at <= ?")
            .bind(to_db_timestamp(self.clock.now()))
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(result.rows_affected())
    }
}
