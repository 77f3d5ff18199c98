//! # HTTP Request Handlers
//!
//! One submodule per area of the API:
//! - `health`: liveness check
//! - `users`: account creation and profile
//! - `auth`: passkey ceremonies (options / finish), logout, session status
//! - `passkeys`: list and revoke the signed-in user's passkeys
//! - `dashboard`: the page behind login
//!
//! Handlers extract what they need (state, session, JSON body), call into
//! the relying party or the repository, and return `AppResult<Json<_>>` so
//! failures go through [`AppError`](crate::error::AppError).

pub mod auth;
pub mod dashboard;
pub mod health;
pub mod passkeys;
pub mod users;
