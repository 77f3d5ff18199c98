//! # Passkey Relying Party
//!
//! A WebAuthn relying party that verifies attestations and assertions itself:
//! challenges, CBOR/COSE decoding, signature checks and counter tracking all
//! live in [`webauthn`], persistence in [`db`], and the HTTP API in
//! [`handlers`].

pub mod accounts;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;
pub mod webauthn;

use crate::handlers::auth::*;
use crate::handlers::dashboard::index;
use crate::handlers::health::health_check;
use crate::handlers::passkeys::{list_passkeys, revoke_passkey};
use crate::handlers::users::{create_user, get_current_user};
use crate::state::AppState;
use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, SessionManagerLayer};
use tower_sessions_sqlx_store::SqliteStore;

/// Build the application router
///
/// `session_store` must already be migrated. Sessions expire after 24 hours
/// of inactivity.
pub fn create_router(state: AppState, session_store: SqliteStore, secure_cookies: bool) -> Router {
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(secure_cookies)
        .with_expiry(Expiry::OnInactivity(Duration::hours(24)));

    // Any origin may call the API; the WebAuthn origin check is what binds
    // credentials to the site
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Routes that need a signed-in session; anything else gets a 401
    let protected_routes = Router::new()
        .route("/", get(index))
        .route("/api/users/me", get(get_current_user))
        .route("/api/passkeys", get(list_passkeys))
        .route("/api/passkeys/{credential_id}", delete(revoke_passkey))
        .route("/api/passkeys/register/options", post(register_options))
        .route("/api/passkeys/register/finish", post(register_finish))
        .layer(axum_middleware::from_fn(middleware::auth::require_auth))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health_check))
        // Account creation (signs the new user in)
        .route("/api/users", post(create_user))
        // Login with a passkey
        .route("/api/passkeys/authenticate/options", post(authenticate_options))
        .route("/api/passkeys/authenticate/finish", post(authenticate_finish))
        // Session management
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/session", get(session_info))
        .merge(protected_routes)
        // Layers run outermost last: trace, then CORS, then sessions
        .layer(session_layer)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
