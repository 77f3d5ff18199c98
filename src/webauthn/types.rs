//! # WebAuthn API Types
//!
//! Request/response shapes of the ceremony wire contract. JSON fields are
//! camelCase and every binary value travels as base64url without padding.
//!
//! ## API Flow
//! Each ceremony has two steps: options and finish
//! - Options: server issues a challenge, the browser passes these options to
//!   `navigator.credentials.create()` / `.get()`
//! - Finish: the browser posts the authenticator's response back
//!
//! Binary fields of the finish requests are kept as strings here and decoded
//! by the orchestrator, so a bad encoding is reported as malformed input
//! naming the field rather than as a generic JSON error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How strongly the relying party asks for user verification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerificationPolicy {
    /// Reject responses without the UV flag
    Required,
    #[default]
    Preferred,
    Discouraged,
}

impl UserVerificationPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            UserVerificationPolicy::Required => "required",
            UserVerificationPolicy::Preferred => "preferred",
            UserVerificationPolicy::Discouraged => "discouraged",
        }
    }
}

impl fmt::Display for UserVerificationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserVerificationPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "required" => Ok(UserVerificationPolicy::Required),
            "preferred" => Ok(UserVerificationPolicy::Preferred),
            "discouraged" => Ok(UserVerificationPolicy::Discouraged),
            other => Err(format!("unknown user verification policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingPartyEntity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntityInfo {
    /// User handle: base64url of the user's UUID bytes
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialParameters {
    #[serde(rename = "type")]
    pub kind: String,
    pub alg: i64,
}

/// Reference to a registered credential in `excludeCredentials` /
/// `allowCredentials`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl CredentialDescriptor {
    pub fn public_key(id: String) -> Self {
        Self {
            kind: PUBLIC_KEY_TYPE.to_string(),
            id,
        }
    }
}

pub const PUBLIC_KEY_TYPE: &str = "public-key";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    pub resident_key: String,
    pub user_verification: UserVerificationPolicy,
}

/// Options for `navigator.credentials.create()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    pub challenge: String,
    pub rp: RelyingPartyEntity,
    pub user: UserEntityInfo,
    pub pub_key_cred_params: Vec<CredentialParameters>,
    /// Milliseconds
    pub timeout: u64,
    pub exclude_credentials: Vec<CredentialDescriptor>,
    pub attestation: String,
    pub authenticator_selection: AuthenticatorSelection,
}

/// Options for `navigator.credentials.get()`
///
/// An empty `allowCredentials` asks the browser for a discoverable
/// credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationOptions {
    pub challenge: String,
    pub rp_id: String,
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub timeout: u64,
    pub user_verification: UserVerificationPolicy,
}

/// Completion of a registration ceremony
///
/// ## Example JSON
/// ```json
/// {
///   "credentialId": "q2P1...",
///   "attestationObject": "o2NmbXRkbm9uZ...",
///   "clientDataJSON": "eyJ0eXBlIjoid2ViYXV0aG4uY3JlYXRlIi...",
///   "label": "YubiKey"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub credential_id: String,
    pub attestation_object: String,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    /// Optional user-facing name for the passkey
    #[serde(default)]
    pub label: String,
}

/// Completion of an authentication ceremony
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationRequest {
    pub credential_id: String,
    pub authenticator_data: String,
    pub signature: String,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
}

/// Request to create an account
///
/// ## Example JSON
/// ```json
/// {
///   "username": "alice",
///   "display_name": "Alice Smith"
/// }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub display_name: String,
}

/// Request for authentication options; omit `username` for a discoverable
/// credential login
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AuthenticationStartRequest {
    #[serde(default)]
    pub username: Option<String>,
}
