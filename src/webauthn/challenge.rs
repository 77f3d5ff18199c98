//! # Challenge Store
//!
//! Every ceremony starts by issuing a random challenge that the authenticator
//! signs over. A challenge can be redeemed exactly once and only before it
//! expires; redemption is atomic per value so two concurrent submissions of
//! the same challenge cannot both succeed.

use crate::clock::Clock;
use crate::db::repository::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Number of random bytes in a challenge
pub const CHALLENGE_LEN: usize = 32;

/// Default time a challenge stays redeemable
pub const DEFAULT_CHALLENGE_TIMEOUT_SECS: i64 = 300;

/// Entries kept in memory before `issue` sweeps expired ones
const LAZY_PURGE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengePurpose {
    Registration,
    Authentication,
}

impl ChallengePurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengePurpose::Registration => "registration",
            ChallengePurpose::Authentication => "authentication",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "registration" => Some(ChallengePurpose::Registration),
            "authentication" => Some(ChallengePurpose::Authentication),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub value: Vec<u8>,
    pub purpose: ChallengePurpose,
    /// User the ceremony was started for, if known at issue time
    pub subject_user_id: Option<Uuid>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    /// Create a challenge with fresh random bytes
    pub fn generate(
        purpose: ChallengePurpose,
        subject_user_id: Option<Uuid>,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Self {
        let mut value = vec![0u8; CHALLENGE_LEN];
        rand::thread_rng().fill_bytes(&mut value);

        Self {
            value,
            purpose,
            subject_user_id,
            issued_at: now,
            expires_at: now + timeout,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("challenge expired")]
    Expired,
    #[error("challenge not found")]
    NotFound,
    #[error("challenge already used")]
    AlreadyUsed,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Issue and remember a new challenge
    async fn issue(
        &self,
        purpose: ChallengePurpose,
        subject_user_id: Option<Uuid>,
    ) -> Result<Challenge, ChallengeError>;

    /// Consume a challenge; succeeds at most once per value
    async fn redeem(&self, value: &[u8]) -> Result<Challenge, ChallengeError>;

    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self) -> Result<u64, ChallengeError>;
}

struct Entry {
    challenge: Challenge,
    used: bool,
}

/// In-process challenge store
///
/// Each value lives in its own dashmap shard slot, so redemption holds only
/// that slot's write lock while checking and marking the entry.
pub struct MemoryChallengeStore {
    entries: DashMap<Vec<u8>, Entry>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl MemoryChallengeStore {
    pub fn new(clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sweep(&self) -> u64 {
        let now = self.clock.now();
        // counted in the closure; concurrent inserts change len() meanwhile
        let mut removed = 0u64;
        self.entries.retain(|_, entry| {
            let keep = !entry.challenge.is_expired_at(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn issue(
        &self,
        purpose: ChallengePurpose,
        subject_user_id: Option<Uuid>,
    ) -> Result<Challenge, ChallengeError> {
        if self.entries.len() >= LAZY_PURGE_THRESHOLD {
            self.sweep();
        }

        let challenge = Challenge::generate(purpose, subject_user_id, self.clock.now(), self.timeout);
        self.entries.insert(
            challenge.value.clone(),
            Entry {
                challenge: challenge.clone(),
                used: false,
            },
        );
        Ok(challenge)
    }

    async fn redeem(&self, value: &[u8]) -> Result<Challenge, ChallengeError> {
        let now = self.clock.now();

        {
            let Some(mut entry) = self.entries.get_mut(value) else {
                return Err(ChallengeError::NotFound);
            };
            if entry.used {
                return Err(ChallengeError::AlreadyUsed);
            }
            if !entry.challenge.is_expired_at(now) {
                entry.used = true;
                return Ok(entry.challenge.clone());
            }
        }

        // the shard guard must be dropped before removing, or this deadlocks
        self.entries.remove(value);
        Err(ChallengeError::Expired)
    }

    async fn purge_expired(&self) -> Result<u64, ChallengeError> {
        Ok(self.sweep())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (Arc<ManualClock>, MemoryChallengeStore) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryChallengeStore::new(
            clock.clone(),
            Duration::seconds(DEFAULT_CHALLENGE_TIMEOUT_SECS),
        );
        (clock, store)
    }

    #[tokio::test]
    async fn issued_challenge_is_random_and_long_enough() {
        let (_, store) = store();
        let a = store.issue(ChallengePurpose::Registration, None).await.unwrap();
        let b = store.issue(ChallengePurpose::Registration, None).await.unwrap();

        assert!(a.value.len() >= 16);
        assert_ne!(a.value, b.value);
        assert_eq!(a.expires_at - a.issued_at, Duration::minutes(5));
    }

    #[tokio::test]
    async fn challenge_redeems_once() {
        let (_, store) = store();
        let user = Uuid::new_v4();
        let issued = store
            .issue(ChallengePurpose::Authentication, Some(user))
            .await
            .unwrap();

        let redeemed = store.redeem(&issued.value).await.unwrap();
        assert_eq!(redeemed, issued);
        assert!(matches!(
            store.redeem(&issued.value).await,
            Err(ChallengeError::AlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn unknown_challenge_is_not_found() {
        let (_, store) = store();
        assert!(matches!(
            store.redeem(&[0u8; CHALLENGE_LEN]).await,
            Err(ChallengeError::NotFound)
        ));
    }

    #[tokio::test]
    async fn expired_challenge_is_rejected_then_forgotten() {
        let (clock, store) = store();
        let issued = store.issue(ChallengePurpose::Registration, None).await.unwrap();

        clock.advance(Duration::minutes(5));
        assert!(matches!(
            store.redeem(&issued.value).await,
            Err(ChallengeError::Expired)
        ));
        assert!(matches!(
            store.redeem(&issued.value).await,
            Err(ChallengeError::NotFound)
        ));
    }

    #[tokio::test]
    async fn purge_drops_only_expired_entries() {
        let (clock, store) = store();
        store.issue(ChallengePurpose::Registration, None).await.unwrap();
        clock.advance(Duration::minutes(3));
        let fresh = store.issue(ChallengePurpose::Authentication, None).await.unwrap();
        clock.advance(Duration::minutes(3));

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.redeem(&fresh.value).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_redemption_has_a_single_winner() {
        let (_, store) = store();
        let store = Arc::new(store);
        let issued = store.issue(ChallengePurpose::Authentication, None).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let value = issued.value.clone();
                tokio::spawn(async move { store.redeem(&value).await.is_ok() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn purging_while_issuing_counts_only_removed_entries() {
        const ISSUERS: usize = 4;
        const PER_ISSUER: usize = 3000;

        // zero timeout: every entry is already expired when the sweep sees it
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryChallengeStore::new(clock, Duration::zero()));

        let issuers: Vec<_> = (0..ISSUERS)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    for _ in 0..PER_ISSUER {
                        store.issue(ChallengePurpose::Registration, None).await.unwrap();
                    }
                })
            })
            .collect();
        let purger = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut purged = 0u64;
                for _ in 0..200 {
                    purged += store.purge_expired().await.unwrap();
                    tokio::task::yield_now().await;
                }
                purged
            })
        };

        for issuer in issuers {
            issuer.await.unwrap();
        }
        let purged = purger.await.unwrap();
        assert!(purged <= (ISSUERS * PER_ISSUER) as u64);

        let remaining = store.len() as u64;
        assert_eq!(store.purge_expired().await.unwrap(), remaining);
        assert!(store.is_empty());
    }
}
