//! # Ceremony Orchestrator
//!
//! [`RelyingParty`] drives the two WebAuthn ceremonies end to end:
//!
//! ### Registration (creating a passkey)
//! 1. `start_registration()` issues a challenge for the signed-in user and
//!    returns the options for `navigator.credentials.create()`
//! 2. `finish_registration()` redeems the challenge, decodes and verifies the
//!    attestation, then stores the new credential
//!
//! ### Authentication (logging in)
//! 1. `start_authentication()` issues a challenge, with an allow list when a
//!    username is given or empty for discoverable credentials
//! 2. `finish_authentication()` redeems the challenge, verifies the assertion
//!    against the stored public key and advances the signature counter
//!
//! The pending state of a ceremony is its challenge record. Finishing always
//! redeems the challenge first, so whatever happens afterwards the same
//! challenge cannot be submitted again.

use super::challenge::{Challenge, ChallengePurpose, ChallengeStore};
use super::codec::{self, AssertionPayload};
use super::cose::SUPPORTED_ALGORITHMS;
use super::error::{CeremonyError, Rejection, VerificationFailure};
use super::types::{
    AuthenticationOptions, AuthenticationRequest, AuthenticatorSelection, CredentialDescriptor,
    CredentialParameters, RegistrationOptions, RegistrationRequest, RelyingPartyEntity,
    UserEntityInfo, UserVerificationPolicy, PUBLIC_KEY_TYPE,
};
use super::verifier::{self, Expectations};
use crate::accounts::UserAccountProvider;
use crate::clock::Clock;
use crate::db::models::{CredentialRecord, UserEntity};
use crate::db::repository::{CredentialRepository, RepositoryError};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Label given to a passkey registered without one
pub const DEFAULT_CREDENTIAL_LABEL: &str = "Passkey";

/// Relying party identity and ceremony policy
#[derive(Debug, Clone)]
pub struct RelyingPartyConfig {
    /// Domain the credentials are scoped to, e.g. `example.com`
    pub id: String,
    pub name: String,
    /// Exact origin the browser must report, e.g. `https://example.com`
    pub origin: String,
    pub challenge_timeout: chrono::Duration,
    pub user_verification: UserVerificationPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyKind {
    Registration,
    Authentication,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyState {
    Idle,
    ChallengeIssued,
    AttestationReceived,
    AssertionReceived,
    Verified,
    Completed,
    Rejected,
}

impl CeremonyState {
    /// Whether `self -> next` is a legal step for a ceremony of `kind`
    pub fn can_transition(self, kind: CeremonyKind, next: CeremonyState) -> bool {
        use CeremonyKind::{Authentication, Registration};
        use CeremonyState::*;

        matches!(
            (kind, self, next),
            (_, Idle, ChallengeIssued)
                | (Registration, ChallengeIssued, AttestationReceived)
                | (Authentication, ChallengeIssued, AssertionReceived)
                | (Registration, AttestationReceived, Verified)
                | (Authentication, AssertionReceived, Verified)
                | (_, Verified, Completed)
                | (
                    _,
                    ChallengeIssued | AttestationReceived | AssertionReceived | Verified,
                    Rejected
                )
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CeremonyState::Completed | CeremonyState::Rejected)
    }
}

/// Tracks one finish call through the state machine
#[derive(Debug)]
struct Ceremony {
    kind: CeremonyKind,
    state: CeremonyState,
}

impl Ceremony {
    /// A finish call picks up a ceremony whose challenge was issued earlier
    fn resume(kind: CeremonyKind) -> Self {
        Self {
            kind,
            state: CeremonyState::ChallengeIssued,
        }
    }

    fn advance(&mut self, next: CeremonyState) {
        debug_assert!(
            self.state.can_transition(self.kind, next),
            "illegal ceremony transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(ceremony = ?self.kind, from = ?self.state, to = ?next, "Ceremony transition");
        self.state = next;
    }

    fn reject(&mut self, rejection: impl Into<Rejection>) -> CeremonyError {
        let rejection = rejection.into();
        warn!(ceremony = ?self.kind, at = ?self.state, reason = %rejection, "Ceremony rejected");
        self.advance(CeremonyState::Rejected);
        CeremonyError::Rejected(rejection)
    }
}

/// Result of a successful authentication ceremony
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user: UserEntity,
    pub credential_id: Vec<u8>,
    pub signature_counter: u32,
}

#[derive(Clone)]
pub struct RelyingParty {
    config: Arc<RelyingPartyConfig>,
    challenges: Arc<dyn ChallengeStore>,
    repository: Arc<dyn CredentialRepository>,
    accounts: Arc<dyn UserAccountProvider>,
    clock: Arc<dyn Clock>,
}

impl RelyingParty {
    pub fn new(
        config: RelyingPartyConfig,
        challenges: Arc<dyn ChallengeStore>,
        repository: Arc<dyn CredentialRepository>,
        accounts: Arc<dyn UserAccountProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            challenges,
            repository,
            accounts,
            clock,
        }
    }

    /// Same relying party, bound to a different account provider
    pub fn with_accounts(&self, accounts: Arc<dyn UserAccountProvider>) -> Self {
        Self {
            accounts,
            ..self.clone()
        }
    }

    pub fn config(&self) -> &RelyingPartyConfig {
        &self.config
    }

    pub async fn start_registration(&self) -> Result<RegistrationOptions, CeremonyError> {
        let user = self
            .accounts
            .current_authenticated_user()
            .await?
            .ok_or(CeremonyError::NotAuthenticated)?;

        let existing = self.repository.find_credentials_by_user_id(user.id).await?;
        let challenge = self
            .challenges
            .issue(ChallengePurpose::Registration, Some(user.id))
            .await?;
        debug!(
            ceremony = ?CeremonyKind::Registration,
            to = ?CeremonyState::ChallengeIssued,
            user = %user.name,
            "Ceremony transition"
        );

        Ok(RegistrationOptions {
            challenge: codec::encode_challenge(&challenge),
            rp: RelyingPartyEntity {
                id: self.config.id.clone(),
                name: self.config.name.clone(),
            },
            user: UserEntityInfo {
                id: codec::b64url_encode(user.id.as_bytes()),
                name: user.name,
                display_name: user.display_name,
            },
            pub_key_cred_params: SUPPORTED_ALGORITHMS
                .iter()
                .map(|(alg, _)| CredentialParameters {
                    kind: PUBLIC_KEY_TYPE.to_string(),
                    alg: *alg,
                })
                .collect(),
            timeout: self.timeout_millis(),
            exclude_credentials: existing
                .iter()
                .map(|record| {
                    CredentialDescriptor::public_key(codec::b64url_encode(&record.credential_id))
                })
                .collect(),
            attestation: "none".to_string(),
            authenticator_selection: AuthenticatorSelection {
                resident_key: "preferred".to_string(),
                user_verification: self.config.user_verification,
            },
        })
    }

    pub async fn finish_registration(
        &self,
        challenge_value: &[u8],
        request: &RegistrationRequest,
    ) -> Result<CredentialRecord, CeremonyError> {
        let mut ceremony = Ceremony::resume(CeremonyKind::Registration);
        let challenge = self
            .redeem(&mut ceremony, challenge_value, ChallengePurpose::Registration)
            .await?;

        let Some(subject) = challenge.subject_user_id else {
            return Err(ceremony.reject(Rejection::UnknownOrExpiredChallenge));
        };
        match self.accounts.current_authenticated_user().await? {
            Some(current) if current.id == subject => {}
            Some(_) => return Err(ceremony.reject(Rejection::UnknownOrExpiredChallenge)),
            None => {
                ceremony.advance(CeremonyState::Rejected);
                return Err(CeremonyError::NotAuthenticated);
            }
        }

        ceremony.advance(CeremonyState::AttestationReceived);
        let decoded = codec::b64url_decode("credentialId", &request.credential_id)
            .and_then(|credential_id| {
                let attestation =
                    codec::b64url_decode("attestationObject", &request.attestation_object)?;
                let client_data = codec::b64url_decode("clientDataJSON", &request.client_data_json)?;
                Ok((
                    credential_id,
                    codec::decode_attestation(&attestation)?,
                    codec::decode_client_data(&client_data)?,
                ))
            });
        let (credential_id, attestation, client_data) = match decoded {
            Ok(decoded) => decoded,
            Err(malformed) => return Err(ceremony.reject(malformed)),
        };

        let verified = match verifier::verify_registration(
            &attestation,
            &client_data,
            &self.expectations(&challenge),
        ) {
            Ok(verified) => verified,
            Err(failure) => return Err(ceremony.reject(failure)),
        };
        if verified.credential_id != credential_id {
            return Err(ceremony.reject(VerificationFailure::CredentialIdMismatch));
        }
        ceremony.advance(CeremonyState::Verified);

        let label = request.label.trim();
        let record = CredentialRecord {
            credential_id: verified.credential_id,
            user_id: subject,
            public_key: verified.public_key,
            signature_counter: verified.sign_count,
            label: if label.is_empty() {
                DEFAULT_CREDENTIAL_LABEL.to_string()
            } else {
                label.to_string()
            },
            backup_eligible: verified.backup_eligible,
            backup_state: verified.backup_state,
            attestation_format: verified.attestation_format,
            created_at: self.clock.now(),
            last_used_at: None,
        };

        match self.repository.save(&record).await {
            Ok(()) => {}
            Err(RepositoryError::Storage(e)) => return Err(e.into()),
            Err(RepositoryError::UnknownUser) => {
                return Err(ceremony.reject(Rejection::UnknownUser))
            }
            Err(_) => return Err(ceremony.reject(Rejection::DuplicateCredential)),
        }

        ceremony.advance(CeremonyState::Completed);
        info!(
            user_id = %record.user_id,
            credential_id = %codec::b64url_encode(&record.credential_id),
            algorithm = ?record.public_key.algorithm(),
            "Passkey registered"
        );
        Ok(record)
    }

    pub async fn start_authentication(
        &self,
        username: Option<&str>,
    ) -> Result<AuthenticationOptions, CeremonyError> {
        let (subject, allow_credentials) = match username {
            Some(name) => {
                let user = self
                    .accounts
                    .find_by_name(name)
                    .await?
                    .ok_or(CeremonyError::UnknownUser)?;
                let credentials = self.repository.find_credentials_by_user_id(user.id).await?;
                if credentials.is_empty() {
                    return Err(CeremonyError::NoCredentials);
                }
                let allow = credentials
                    .iter()
                    .map(|record| {
                        CredentialDescriptor::public_key(codec::b64url_encode(&record.credential_id))
                    })
                    .collect();
                (Some(user.id), allow)
            }
            // Discoverable credential: the authenticator picks the account
            None => (None, Vec::new()),
        };

        let challenge = self
            .challenges
            .issue(ChallengePurpose::Authentication, subject)
            .await?;
        debug!(
            ceremony = ?CeremonyKind::Authentication,
            to = ?CeremonyState::ChallengeIssued,
            discoverable = subject.is_none(),
            "Ceremony transition"
        );

        Ok(AuthenticationOptions {
            challenge: codec::encode_challenge(&challenge),
            rp_id: self.config.id.clone(),
            allow_credentials,
            timeout: self.timeout_millis(),
            user_verification: self.config.user_verification,
        })
    }

    pub async fn finish_authentication(
        &self,
        challenge_value: &[u8],
        request: &AuthenticationRequest,
    ) -> Result<AuthenticatedUser, CeremonyError> {
        let mut ceremony = Ceremony::resume(CeremonyKind::Authentication);
        let challenge = self
            .redeem(&mut ceremony, challenge_value, ChallengePurpose::Authentication)
            .await?;

        ceremony.advance(CeremonyState::AssertionReceived);
        let decoded = codec::b64url_decode("credentialId", &request.credential_id).and_then(
            |credential_id| {
                let authenticator_data =
                    codec::b64url_decode("authenticatorData", &request.authenticator_data)?;
                let signature = codec::b64url_decode("signature", &request.signature)?;
                let client_data_json =
                    codec::b64url_decode("clientDataJSON", &request.client_data_json)?;
                let assertion = codec::decode_assertion(AssertionPayload {
                    authenticator_data: &authenticator_data,
                    signature: &signature,
                    client_data_json: &client_data_json,
                })?;
                Ok((credential_id, assertion))
            },
        );
        let (credential_id, assertion) = match decoded {
            Ok(decoded) => decoded,
            Err(malformed) => return Err(ceremony.reject(malformed)),
        };

        let Some(record) = self.repository.find_credential(&credential_id).await? else {
            return Err(ceremony.reject(VerificationFailure::UnknownCredential));
        };
        if challenge
            .subject_user_id
            .is_some_and(|subject| subject != record.user_id)
        {
            return Err(ceremony.reject(VerificationFailure::CredentialNotAllowed));
        }

        let counter = match verifier::verify_assertion(
            &assertion,
            &record.public_key,
            &self.expectations(&challenge),
            record.signature_counter,
        ) {
            Ok(counter) => counter,
            Err(failure) => return Err(ceremony.reject(failure)),
        };
        ceremony.advance(CeremonyState::Verified);

        // Compare-and-set: a concurrent login with the same counter loses here
        match self
            .repository
            .update_counter_and_usage(&credential_id, counter, self.clock.now())
            .await
        {
            Ok(()) => {}
            Err(RepositoryError::Storage(e)) => return Err(e.into()),
            Err(RepositoryError::CounterRegression) => {
                return Err(ceremony.reject(VerificationFailure::CounterRegression))
            }
            Err(_) => return Err(ceremony.reject(VerificationFailure::UnknownCredential)),
        }

        let Some(user) = self.repository.find_user_by_id(record.user_id).await? else {
            return Err(ceremony.reject(Rejection::UnknownUser));
        };

        ceremony.advance(CeremonyState::Completed);
        info!(
            user = %user.name,
            credential_id = %codec::b64url_encode(&credential_id),
            counter,
            "Passkey authentication succeeded"
        );
        Ok(AuthenticatedUser {
            user,
            credential_id,
            signature_counter: counter,
        })
    }

    /// Delete one of `user_id`'s credentials
    ///
    /// A credential owned by someone else is reported as not found.
    pub async fn revoke_credential(
        &self,
        user_id: Uuid,
        credential_id: &[u8],
    ) -> Result<(), CeremonyError> {
        let owned = self
            .repository
            .find_credential(credential_id)
            .await?
            .is_some_and(|record| record.user_id == user_id);
        if !owned {
            return Err(CeremonyError::CredentialNotFound);
        }

        match self.repository.delete(credential_id).await {
            Ok(()) => {
                info!(%user_id, credential_id = %codec::b64url_encode(credential_id), "Passkey revoked");
                Ok(())
            }
            Err(RepositoryError::Storage(e)) => Err(e.into()),
            Err(_) => Err(CeremonyError::CredentialNotFound),
        }
    }

    async fn redeem(
        &self,
        ceremony: &mut Ceremony,
        value: &[u8],
        purpose: ChallengePurpose,
    ) -> Result<Challenge, CeremonyError> {
        match self.challenges.redeem(value).await {
            Ok(challenge) if challenge.purpose == purpose => Ok(challenge),
            Ok(_) => Err(ceremony.reject(Rejection::UnknownOrExpiredChallenge)),
            Err(err) => match CeremonyError::from(err) {
                CeremonyError::Rejected(rejection) => Err(ceremony.reject(rejection)),
                other => Err(other),
            },
        }
    }

    fn expectations<'a>(&'a self, challenge: &'a Challenge) -> Expectations<'a> {
        Expectations {
            challenge: &challenge.value,
            origin: &self.config.origin,
            rp_id: &self.config.id,
            user_verification: self.config.user_verification,
        }
    }

    fn timeout_millis(&self) -> u64 {
        u64::try_from(self.config.challenge_timeout.num_milliseconds()).unwrap_or(0)
    }
}
