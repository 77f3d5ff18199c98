//! # Database Module
//!
//! Persistence for users, passkey credentials and ceremony challenges:
//! - `models`: domain records and the SQLite row structs they map from
//! - `repository`: the [`CredentialRepository`](repository::CredentialRepository)
//!   contract and its in-memory implementation
//! - `users` / `credentials`: the SQLite implementation of that contract
//! - `challenges`: the SQLite-backed challenge store

pub mod challenges;
pub mod credentials;
pub mod models;
pub mod repository;
pub mod users;

use chrono::{DateTime, SecondsFormat, Utc};
use repository::StorageError;
use sqlx::migrate::Migrator;

/// Embedded schema migrations from `./migrations`
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Fixed-width RFC3339 so stored timestamps compare correctly as text
pub(crate) fn to_db_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_db_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| StorageError::Corrupt(format!("invalid timestamp {value:?}")))
}

pub(crate) fn parse_optional_timestamp(
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, StorageError> {
    value.map(parse_db_timestamp).transpose()
}
