//! # Middleware Module
//!
//! Middleware runs before the route handlers and can short-circuit a request.
//!
//! - `auth`: rejects requests without a signed-in session, plus the session
//!   helpers handlers use to read and set the signed-in user

pub mod auth;
