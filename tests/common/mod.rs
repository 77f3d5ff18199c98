//! Shared fixtures: a software authenticator that produces real
//! attestations and assertions, plus an in-memory relying party.

#![allow(dead_code)]

use ed25519_dalek::Signer as _;
use p256::ecdsa::signature::Signer as _;
use passkey_rp::accounts::RepositoryAccounts;
use passkey_rp::clock::ManualClock;
use passkey_rp::db::models::UserEntity;
use passkey_rp::db::repository::{CredentialRepository, MemoryCredentialRepository};
use passkey_rp::webauthn::ceremony::{RelyingParty, RelyingPartyConfig};
use passkey_rp::webauthn::challenge::MemoryChallengeStore;
use passkey_rp::webauthn::codec::{
    self, flags, AttestationObject, AttestationStatement, AttestedCredentialData,
    AuthenticatorData, AuthenticatorFlags,
};
use passkey_rp::webauthn::cose::CosePublicKey;
use passkey_rp::webauthn::types::{
    AuthenticationRequest, RegistrationRequest, UserVerificationPolicy,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub const RP_ID: &str = "example.test";
pub const ORIGIN: &str = "https://example.test";

enum Key {
    Es256(p256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

/// Authenticator holding one credential, signing like a real device would
pub struct SoftAuthenticator {
    key: Key,
    pub credential_id: Vec<u8>,
    pub counter: u32,
    pub rp_id: String,
    pub origin: String,
    pub user_verified: bool,
}

impl SoftAuthenticator {
    pub fn es256(seed: u8) -> Self {
        let key = p256::ecdsa::SigningKey::from_slice(&[seed; 32]).expect("valid P-256 scalar");
        Self::with_key(Key::Es256(key), seed)
    }

    pub fn ed25519(seed: u8) -> Self {
        Self::with_key(Key::Ed25519(ed25519_dalek::SigningKey::from_bytes(&[seed; 32])), seed)
    }

    fn with_key(key: Key, seed: u8) -> Self {
        Self {
            key,
            credential_id: vec![seed; 16],
            counter: 0,
            rp_id: RP_ID.to_string(),
            origin: ORIGIN.to_string(),
            user_verified: true,
        }
    }

    pub fn public_key(&self) -> CosePublicKey {
        match &self.key {
            Key::Es256(key) => {
                let point = key.verifying_key().to_encoded_point(false);
                CosePublicKey::Es256 {
                    x: point.x().unwrap().as_slice().try_into().unwrap(),
                    y: point.y().unwrap().as_slice().try_into().unwrap(),
                }
            }
            Key::Ed25519(key) => CosePublicKey::Ed25519 {
                x: key.verifying_key().to_bytes(),
            },
        }
    }

    fn flags(&self, extra: u8) -> AuthenticatorFlags {
        let mut bits = flags::USER_PRESENT | extra;
        if self.user_verified {
            bits |= flags::USER_VERIFIED;
        }
        AuthenticatorFlags(bits)
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        match &self.key {
            Key::Es256(key) => {
                let signature: p256::ecdsa::Signature = key.sign(message);
                signature.to_der().as_bytes().to_vec()
            }
            Key::Ed25519(key) => key.sign(message).to_bytes().to_vec(),
        }
    }

    /// `navigator.credentials.create()` answering options with `challenge`
    pub fn register(&self, challenge: &str) -> RegistrationRequest {
        let public_key = self.public_key();
        let auth_data = AuthenticatorData {
            rp_id_hash: Sha256::digest(self.rp_id.as_bytes()).into(),
            flags: self.flags(flags::ATTESTED_CREDENTIAL_DATA),
            sign_count: self.counter,
            attested_credential: Some(AttestedCredentialData {
                aaguid: [0; 16],
                credential_id: self.credential_id.clone(),
                algorithm: public_key.algorithm().id(),
                public_key: public_key.to_cbor(),
            }),
            extensions: None,
        };
        let attestation = AttestationObject {
            fmt: "none".into(),
            auth_data,
            att_stmt: AttestationStatement::default(),
        };

        RegistrationRequest {
            credential_id: codec::b64url_encode(&self.credential_id),
            attestation_object: codec::b64url_encode(&codec::encode_attestation(&attestation)),
            client_data_json: codec::b64url_encode(&self.client_data("webauthn.create", challenge)),
            label: "Test key".into(),
        }
    }

    /// `navigator.credentials.get()`: bumps the counter and signs
    pub fn assert(&mut self, challenge: &str) -> AuthenticationRequest {
        self.counter += 1;
        self.assert_with_counter(challenge, self.counter)
    }

    pub fn assert_with_counter(&self, challenge: &str, counter: u32) -> AuthenticationRequest {
        let auth_data = AuthenticatorData {
            rp_id_hash: Sha256::digest(self.rp_id.as_bytes()).into(),
            flags: self.flags(0),
            sign_count: counter,
            attested_credential: None,
            extensions: None,
        }
        .to_bytes();
        let client_data = self.client_data("webauthn.get", challenge);

        let mut message = auth_data.clone();
        message.extend_from_slice(&Sha256::digest(&client_data));

        AuthenticationRequest {
            credential_id: codec::b64url_encode(&self.credential_id),
            authenticator_data: codec::b64url_encode(&auth_data),
            signature: codec::b64url_encode(&self.sign(&message)),
            client_data_json: codec::b64url_encode(&client_data),
        }
    }

    fn client_data(&self, ceremony_type: &str, challenge: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "type": ceremony_type,
            "challenge": challenge,
            "origin": self.origin,
            "crossOrigin": false
        }))
        .unwrap()
    }
}

pub fn rp_config(user_verification: UserVerificationPolicy) -> RelyingPartyConfig {
    RelyingPartyConfig {
        id: RP_ID.to_string(),
        name: "Example".to_string(),
        origin: ORIGIN.to_string(),
        challenge_timeout: chrono::Duration::minutes(5),
        user_verification,
    }
}

/// Relying party over in-memory stores with a manual clock
pub struct Harness {
    pub repository: Arc<MemoryCredentialRepository>,
    pub challenges: Arc<MemoryChallengeStore>,
    pub clock: Arc<ManualClock>,
    pub rp: RelyingParty,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(UserVerificationPolicy::Preferred)
    }

    pub fn with_policy(user_verification: UserVerificationPolicy) -> Self {
        let repository = Arc::new(MemoryCredentialRepository::new());
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let challenges = Arc::new(MemoryChallengeStore::new(
            clock.clone(),
            chrono::Duration::minutes(5),
        ));
        let rp = RelyingParty::new(
            rp_config(user_verification),
            challenges.clone(),
            repository.clone(),
            Arc::new(RepositoryAccounts::new(repository.clone(), None)),
            clock.clone(),
        );
        Self {
            repository,
            challenges,
            clock,
            rp,
        }
    }

    pub async fn add_user(&self, name: &str) -> UserEntity {
        let user = UserEntity::new(name, name.to_uppercase(), chrono::Utc::now());
        self.repository.save_user(&user).await.unwrap();
        user
    }

    /// The relying party as seen by `user`'s session
    pub fn signed_in(&self, user: &UserEntity) -> RelyingParty {
        self.rp.with_accounts(Arc::new(RepositoryAccounts::new(
            self.repository.clone(),
            Some(user.id),
        )))
    }

    /// Run a full registration of `authenticator` for `user`
    pub async fn register(&self, user: &UserEntity, authenticator: &SoftAuthenticator) {
        let rp = self.signed_in(user);
        let options = rp.start_registration().await.unwrap();
        let challenge = codec::b64url_decode("challenge", &options.challenge).unwrap();
        rp.finish_registration(&challenge, &authenticator.register(&options.challenge))
            .await
            .unwrap();
    }
}

pub fn decode_challenge(encoded: &str) -> Vec<u8> {
    codec::b64url_decode("challenge", encoded).unwrap()
}
