//! # Configuration Management
//!
//! Configuration comes from the environment (a `.env` file is loaded first
//! when present).
//!
//! ## Environment Variables
//! - `HOST`: Server bind address (default: 127.0.0.1)
//! - `PORT`: Server port (default: 8080)
//! - `DATABASE_URL`: SQLite connection string
//! - `RP_ID`: Relying Party ID, the domain credentials are scoped to
//! - `RP_ORIGIN`: Exact origin browsers must report (scheme, host, port)
//! - `RP_NAME`: Name shown by the authenticator during passkey creation
//! - `CHALLENGE_TIMEOUT_SECS`: How long a ceremony challenge stays valid
//!   (default: 300, at most one day)
//! - `USER_VERIFICATION`: `required`, `preferred` or `discouraged`

use crate::webauthn::ceremony::RelyingPartyConfig;
use crate::webauthn::challenge::DEFAULT_CHALLENGE_TIMEOUT_SECS;
use crate::webauthn::types::UserVerificationPolicy;
use anyhow::{bail, Context, Result};
use std::env;
use url::Url;

/// Longest accepted challenge lifetime (one day)
pub const MAX_CHALLENGE_TIMEOUT_SECS: i64 = 24 * 60 * 60;

/// Application configuration
///
/// ## WebAuthn Terminology
/// - **RP ID**: your domain without scheme or port ("example.com", "localhost")
/// - **RP Origin**: full origin of the web app ("https://example.com")
///
/// The origin's host must be the RP ID or a subdomain of it, otherwise
/// browsers refuse to create credentials for it.
#[derive(Debug, Clone)]
pub struct Config {
    /// Examples: "127.0.0.1" (localhost only), "0.0.0.0" (all interfaces)
    pub host: String,

    pub port: u16,

    /// Format: "sqlite:filename.db?mode=rwc" (read, write, create)
    pub database_url: String,

    pub rp_id: String,

    /// For local development: "http://localhost:8080"
    pub rp_origin: String,

    pub rp_name: String,

    /// Seconds a ceremony challenge stays redeemable
    /// Also sent to the browser as the ceremony `timeout`
    pub challenge_timeout_secs: i64,

    /// Whether authenticators must verify the user (PIN, biometrics)
    /// `required` rejects assertions without the UV flag
    pub user_verification: UserVerificationPolicy,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// ## Example .env file
    /// ```text
    /// HOST=127.0.0.1
    /// PORT=8080
    /// DATABASE_URL=sqlite:passkey.db?mode=rwc
    /// RP_ID=localhost
    /// RP_ORIGIN=http://localhost:8080
    /// RP_NAME=Spring Security Relying Party
    /// CHALLENGE_TIMEOUT_SECS=300
    /// USER_VERIFICATION=preferred
    /// ```
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine
        dotenvy::dotenv().ok();

        // How long a browser has to answer a ceremony before its challenge
        // stops being redeemable
        let challenge_timeout_secs = parse_challenge_timeout(
            &env::var("CHALLENGE_TIMEOUT_SECS")
                .unwrap_or_else(|_| DEFAULT_CHALLENGE_TIMEOUT_SECS.to_string()),
        )?;

        // Accepts "required", "preferred" or "discouraged" in any case
        let user_verification = match env::var("USER_VERIFICATION") {
            Ok(value) => value.parse().map_err(anyhow::Error::msg)?,
            Err(_) => UserVerificationPolicy::default(),
        };

        Ok(Config {
            // Default: 127.0.0.1 (only reachable from this machine)
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),

            // Fails startup instead of silently falling back on a typo
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid port number")?,

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:passkey.db?mode=rwc".to_string()),

            // Domain only, no scheme or port: "localhost", "example.com"
            rp_id: env::var("RP_ID").unwrap_or_else(|_| "localhost".to_string()),

            // Scheme and host (plus port if not the default); checked
            // against RP_ID in `relying_party()`
            rp_origin: env::var("RP_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),

            // Shown by the authenticator when a passkey is created
            rp_name: env::var("RP_NAME")
                .unwrap_or_else(|_| "Spring Security Relying Party".to_string()),

            challenge_timeout_secs,

            user_verification,
        })
    }

    /// Socket address for `tokio::net::TcpListener::bind()`, e.g. "127.0.0.1:8080"
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the session cookie should carry the `Secure` attribute
    pub fn secure_cookies(&self) -> bool {
        self.rp_origin.starts_with("https://")
    }

    /// Validate the relying party settings and build the ceremony config
    ///
    /// ## Checks
    /// - `RP_ORIGIN` parses as a URL with a host
    /// - that host is `RP_ID` itself or one of its subdomains
    /// - the challenge timeout lies within `1..=MAX_CHALLENGE_TIMEOUT_SECS`
    ///
    /// The origin is stored in its serialized form ("https://example.com"),
    /// which is what browsers put in `clientDataJSON`.
    pub fn relying_party(&self) -> Result<RelyingPartyConfig> {
        let challenge_timeout_secs = check_challenge_timeout(self.challenge_timeout_secs)?;

        let origin = Url::parse(&self.rp_origin)
            .with_context(|| format!("RP_ORIGIN '{}' is not a valid URL", self.rp_origin))?;
        let Some(host) = origin.host_str() else {
            bail!("RP_ORIGIN '{}' has no host", self.rp_origin);
        };
        if self.rp_id.is_empty() {
            bail!("RP_ID must not be empty");
        }
        if host != self.rp_id && !host.ends_with(&format!(".{}", self.rp_id)) {
            bail!(
                "RP_ORIGIN host '{}' is not within RP_ID '{}'",
                host,
                self.rp_id
            );
        }

        Ok(RelyingPartyConfig {
            id: self.rp_id.clone(),
            name: self.rp_name.clone(),
            origin: origin.origin().ascii_serialization(),
            challenge_timeout: chrono::Duration::seconds(challenge_timeout_secs),
            user_verification: self.user_verification,
        })
    }
}

/// Parse `CHALLENGE_TIMEOUT_SECS`
fn parse_challenge_timeout(raw: &str) -> Result<i64> {
    let secs: i64 = raw
        .trim()
        .parse()
        .context("CHALLENGE_TIMEOUT_SECS must be a number of seconds")?;
    check_challenge_timeout(secs)
}

fn check_challenge_timeout(secs: i64) -> Result<i64> {
    if secs <= 0 {
        bail!("CHALLENGE_TIMEOUT_SECS must be positive");
    }
    if secs > MAX_CHALLENGE_TIMEOUT_SECS {
        bail!(
            "CHALLENGE_TIMEOUT_SECS must be at most {} seconds",
            MAX_CHALLENGE_TIMEOUT_SECS
        );
    }
    Ok(secs)
}
