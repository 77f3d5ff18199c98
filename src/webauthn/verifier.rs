//! # Signature Verifier
//!
//! Checks a decoded registration or authentication response against what the
//! relying party expects. The checks run in a fixed order and the first one
//! that fails decides the [`VerificationFailure`]:
//!
//! 1. client data type (`webauthn.create` / `webauthn.get`)
//! 2. origin
//! 3. RP id hash in the authenticator data
//! 4. challenge echoed in the client data
//! 5. user presence, then user verification per policy
//! 6. credential data and algorithm (registration only)
//! 7. signature over `authenticatorData || SHA-256(clientDataJSON)`
//! 8. signature counter (authentication only)

use super::codec::{AssertionResponse, AttestationObject, AuthenticatorData, ClientData};
use super::cose::{CoseAlgorithm, CosePublicKey};
use super::error::VerificationFailure;
use super::types::UserVerificationPolicy;
use crate::db::repository::counter_advances;
use sha2::{Digest, Sha256};
use url::Url;

pub const CLIENT_DATA_TYPE_CREATE: &str = "webauthn.create";
pub const CLIENT_DATA_TYPE_GET: &str = "webauthn.get";

/// What a response has to match to be accepted
#[derive(Debug, Clone, Copy)]
pub struct Expectations<'a> {
    /// Challenge bytes the relying party issued for this ceremony
    pub challenge: &'a [u8],
    pub origin: &'a str,
    pub rp_id: &'a str,
    pub user_verification: UserVerificationPolicy,
}

/// Credential material extracted from an accepted attestation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRegistration {
    pub credential_id: Vec<u8>,
    pub public_key: CosePublicKey,
    pub sign_count: u32,
    pub backup_eligible: bool,
    pub backup_state: bool,
    pub attestation_format: String,
    pub aaguid: [u8; 16],
}

pub fn verify_registration(
    attestation: &AttestationObject,
    client_data: &ClientData,
    expected: &Expectations<'_>,
) -> Result<VerifiedRegistration, VerificationFailure> {
    let auth_data = &attestation.auth_data;
    check_common(client_data, auth_data, CLIENT_DATA_TYPE_CREATE, expected)?;

    let attested = auth_data
        .attested_credential
        .as_ref()
        .ok_or(VerificationFailure::MissingCredentialData)?;
    if CoseAlgorithm::from_id(attested.algorithm).is_none() {
        return Err(VerificationFailure::UnsupportedAlgorithm);
    }
    let public_key = CosePublicKey::from_cbor(&attested.public_key)?;

    verify_attestation_statement(attestation, &public_key, &client_data.hash)?;

    Ok(VerifiedRegistration {
        credential_id: attested.credential_id.clone(),
        public_key,
        sign_count: auth_data.sign_count,
        backup_eligible: auth_data.flags.backup_eligible(),
        backup_state: auth_data.flags.backup_state(),
        attestation_format: attestation.fmt.clone(),
        aaguid: attested.aaguid,
    })
}

/// Verify an assertion made with `public_key`; returns the counter to store
pub fn verify_assertion(
    assertion: &AssertionResponse,
    public_key: &CosePublicKey,
    expected: &Expectations<'_>,
    last_counter: u32,
) -> Result<u32, VerificationFailure> {
    let auth_data = &assertion.authenticator_data;
    check_common(&assertion.client_data, auth_data, CLIENT_DATA_TYPE_GET, expected)?;

    let message = signed_message(auth_data, &assertion.client_data.hash);
    public_key.verify(&message, &assertion.signature)?;

    if !counter_advances(last_counter, auth_data.sign_count) {
        return Err(VerificationFailure::CounterRegression);
    }
    Ok(auth_data.sign_count)
}

/// Compare two origins by scheme, host and port
///
/// `actual` must already be a serialized origin, as browsers report it: a
/// path, query, trailing slash or explicit default port does not match.
pub fn origins_match(expected: &str, actual: &str) -> bool {
    match (Url::parse(expected), Url::parse(actual)) {
        (Ok(expected), Ok(parsed)) => {
            let serialized = parsed.origin().ascii_serialization();
            expected.origin().is_tuple()
                && serialized == actual
                && expected.origin().ascii_serialization() == serialized
        }
        _ => false,
    }
}

/// Steps 1 to 5, shared by both ceremonies
fn check_common(
    client_data: &ClientData,
    auth_data: &AuthenticatorData,
    ceremony_type: &str,
    expected: &Expectations<'_>,
) -> Result<(), VerificationFailure> {
    if client_data.ceremony_type != ceremony_type {
        return Err(VerificationFailure::CeremonyTypeMismatch);
    }
    if !origins_match(expected.origin, &client_data.origin) {
        return Err(VerificationFailure::OriginMismatch);
    }

    let rp_id_hash: [u8; 32] = Sha256::digest(expected.rp_id.as_bytes()).into();
    if auth_data.rp_id_hash != rp_id_hash {
        return Err(VerificationFailure::RpIdMismatch);
    }

    if client_data.challenge != expected.challenge {
        return Err(VerificationFailure::ChallengeMismatch);
    }

    if !auth_data.flags.user_present() {
        return Err(VerificationFailure::UserNotPresent);
    }
    if expected.user_verification == UserVerificationPolicy::Required
        && !auth_data.flags.user_verified()
    {
        return Err(VerificationFailure::UserNotVerified);
    }
    Ok(())
}

fn verify_attestation_statement(
    attestation: &AttestationObject,
    public_key: &CosePublicKey,
    client_data_hash: &[u8; 32],
) -> Result<(), VerificationFailure> {
    let statement = &attestation.att_stmt;
    match attestation.fmt.as_str() {
        "none" => {
            if statement.is_empty() {
                Ok(())
            } else {
                Err(VerificationFailure::AttestationInvalid)
            }
        }
        // Self attestation only: the credential key signs its own registration
        "packed" => {
            if statement.x5c.is_some() {
                return Err(VerificationFailure::UnsupportedAttestation);
            }
            let (Some(alg), Some(sig)) = (statement.alg, statement.sig.as_deref()) else {
                return Err(VerificationFailure::AttestationInvalid);
            };
            if alg != public_key.algorithm().id() {
                return Err(VerificationFailure::AttestationInvalid);
            }
            let message = signed_message(&attestation.auth_data, client_data_hash);
            public_key.verify(&message, sig)
        }
        _ => Err(VerificationFailure::UnsupportedAttestation),
    }
}

fn signed_message(auth_data: &AuthenticatorData, client_data_hash: &[u8; 32]) -> Vec<u8> {
    let mut message = auth_data.to_bytes();
    message.extend_from_slice(client_data_hash);
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webauthn::codec::{
        decode_client_data, flags, AttestationStatement, AttestedCredentialData,
        AuthenticatorFlags,
    };
    use p256::ecdsa::signature::Signer;
    use p256::ecdsa::{Signature, SigningKey};

    const ORIGIN: &str = "https://example.test";
    const RP_ID: &str = "example.test";
    const CHALLENGE: &[u8] = &[9u8; 32];

    fn expectations(user_verification: UserVerificationPolicy) -> Expectations<'static> {
        Expectations {
            challenge: CHALLENGE,
            origin: ORIGIN,
            rp_id: RP_ID,
            user_verification,
        }
    }

    fn key_pair() -> (SigningKey, CosePublicKey) {
        let signing = SigningKey::from_slice(&[0x24u8; 32]).unwrap();
        let point = signing.verifying_key().to_encoded_point(false);
        let key = CosePublicKey::Es256 {
            x: point.x().unwrap().as_slice().try_into().unwrap(),
            y: point.y().unwrap().as_slice().try_into().unwrap(),
        };
        (signing, key)
    }

    fn client_data(ceremony_type: &str, challenge: &[u8], origin: &str) -> ClientData {
        let json = format!(
            r#"{{"type":"{ceremony_type}","challenge":"{}","origin":"{origin}","crossOrigin":false}}"#,
            crate::webauthn::codec::b64url_encode(challenge)
        );
        decode_client_data(json.as_bytes()).unwrap()
    }

    fn auth_data(flag_bits: u8, sign_count: u32, key: Option<&CosePublicKey>) -> AuthenticatorData {
        AuthenticatorData {
            rp_id_hash: Sha256::digest(RP_ID.as_bytes()).into(),
            flags: AuthenticatorFlags(flag_bits),
            sign_count,
            attested_credential: key.map(|key| AttestedCredentialData {
                aaguid: [0; 16],
                credential_id: vec![0x5A; 16],
                algorithm: key.algorithm().id(),
                public_key: key.to_cbor(),
            }),
            extensions: None,
        }
    }

    fn attestation(key: &CosePublicKey) -> AttestationObject {
        AttestationObject {
            fmt: "none".into(),
            auth_data: auth_data(
                flags::USER_PRESENT | flags::ATTESTED_CREDENTIAL_DATA | flags::BACKUP_ELIGIBLE,
                0,
                Some(key),
            ),
            att_stmt: AttestationStatement::default(),
        }
    }

    fn assertion(signing: &SigningKey, flag_bits: u8, sign_count: u32) -> AssertionResponse {
        let authenticator_data = auth_data(flag_bits, sign_count, None);
        let client_data = client_data(CLIENT_DATA_TYPE_GET, CHALLENGE, ORIGIN);
        let signature: Signature =
            signing.sign(&signed_message(&authenticator_data, &client_data.hash));
        AssertionResponse {
            authenticator_data,
            signature: signature.to_der().as_bytes().to_vec(),
            client_data,
        }
    }

    #[test]
    fn none_attestation_is_accepted() {
        let (_, key) = key_pair();
        let client = client_data(CLIENT_DATA_TYPE_CREATE, CHALLENGE, ORIGIN);
        let verified = verify_registration(
            &attestation(&key),
            &client,
            &expectations(UserVerificationPolicy::Preferred),
        )
        .unwrap();

        assert_eq!(verified.public_key, key);
        assert_eq!(verified.credential_id, vec![0x5A; 16]);
        assert!(verified.backup_eligible);
        assert!(!verified.backup_state);
        assert_eq!(verified.attestation_format, "none");
    }

    #[test]
    fn registration_checks_run_in_order() {
        let (_, key) = key_pair();
        let expected = expectations(UserVerificationPolicy::Required);

        // wrong type and wrong origin: the type check wins
        let client = client_data(CLIENT_DATA_TYPE_GET, CHALLENGE, "https://evil.test");
        assert_eq!(
            verify_registration(&attestation(&key), &client, &expected),
            Err(VerificationFailure::CeremonyTypeMismatch)
        );

        let client = client_data(CLIENT_DATA_TYPE_CREATE, CHALLENGE, "https://evil.test");
        assert_eq!(
            verify_registration(&attestation(&key), &client, &expected),
            Err(VerificationFailure::OriginMismatch)
        );

        let mut object = attestation(&key);
        object.auth_data.rp_id_hash = [0; 32];
        let client = client_data(CLIENT_DATA_TYPE_CREATE, &[1; 32], ORIGIN);
        assert_eq!(
            verify_registration(&object, &client, &expected),
            Err(VerificationFailure::RpIdMismatch)
        );

        assert_eq!(
            verify_registration(&attestation(&key), &client, &expected),
            Err(VerificationFailure::ChallengeMismatch)
        );

        let client = client_data(CLIENT_DATA_TYPE_CREATE, CHALLENGE, ORIGIN);
        assert_eq!(
            verify_registration(&attestation(&key), &client, &expected),
            Err(VerificationFailure::UserNotVerified)
        );
    }

    #[test]
    fn missing_credential_data_is_rejected() {
        let (_, key) = key_pair();
        let mut object = attestation(&key);
        object.auth_data.attested_credential = None;
        let client = client_data(CLIENT_DATA_TYPE_CREATE, CHALLENGE, ORIGIN);
        assert_eq!(
            verify_registration(&object, &client, &expectations(UserVerificationPolicy::Preferred)),
            Err(VerificationFailure::MissingCredentialData)
        );
    }

    #[test]
    fn packed_self_attestation_must_be_signed_by_the_credential() {
        let (signing, key) = key_pair();
        let client = client_data(CLIENT_DATA_TYPE_CREATE, CHALLENGE, ORIGIN);
        let expected = expectations(UserVerificationPolicy::Preferred);

        let mut object = attestation(&key);
        object.fmt = "packed".into();
        let signature: Signature = signing.sign(&signed_message(&object.auth_data, &client.hash));
        object.att_stmt = AttestationStatement {
            alg: Some(-7),
            sig: Some(signature.to_der().as_bytes().to_vec()),
            ..Default::default()
        };
        assert!(verify_registration(&object, &client, &expected).is_ok());

        object.att_stmt.alg = Some(-8);
        assert_eq!(
            verify_registration(&object, &client, &expected),
            Err(VerificationFailure::AttestationInvalid)
        );

        object.att_stmt.alg = Some(-7);
        object.att_stmt.x5c = Some(vec![vec![0x30, 0x00]]);
        assert_eq!(
            verify_registration(&object, &client, &expected),
            Err(VerificationFailure::UnsupportedAttestation)
        );
    }

    #[test]
    fn other_attestation_formats_are_unsupported() {
        let (_, key) = key_pair();
        let mut object = attestation(&key);
        object.fmt = "fido-u2f".into();
        let client = client_data(CLIENT_DATA_TYPE_CREATE, CHALLENGE, ORIGIN);
        assert_eq!(
            verify_registration(&object, &client, &expectations(UserVerificationPolicy::Preferred)),
            Err(VerificationFailure::UnsupportedAttestation)
        );
    }

    #[test]
    fn assertion_returns_new_counter() {
        let (signing, key) = key_pair();
        let response = assertion(&signing, flags::USER_PRESENT | flags::USER_VERIFIED, 8);
        let counter = verify_assertion(
            &response,
            &key,
            &expectations(UserVerificationPolicy::Required),
            7,
        )
        .unwrap();
        assert_eq!(counter, 8);
    }

    #[test]
    fn assertion_without_user_presence_is_rejected() {
        let (signing, key) = key_pair();
        let response = assertion(&signing, 0, 1);
        assert_eq!(
            verify_assertion(&response, &key, &expectations(UserVerificationPolicy::Discouraged), 0),
            Err(VerificationFailure::UserNotPresent)
        );
    }

    #[test]
    fn tampered_assertion_fails_signature_check() {
        let (signing, key) = key_pair();
        let mut response = assertion(&signing, flags::USER_PRESENT, 3);
        response.authenticator_data.sign_count = 4;
        assert_eq!(
            verify_assertion(&response, &key, &expectations(UserVerificationPolicy::Preferred), 0),
            Err(VerificationFailure::SignatureInvalid)
        );
    }

    #[test]
    fn counter_must_advance_unless_both_zero() {
        let (signing, key) = key_pair();
        let expected = expectations(UserVerificationPolicy::Preferred);

        let response = assertion(&signing, flags::USER_PRESENT, 5);
        assert_eq!(
            verify_assertion(&response, &key, &expected, 5),
            Err(VerificationFailure::CounterRegression)
        );

        let response = assertion(&signing, flags::USER_PRESENT, 0);
        assert_eq!(verify_assertion(&response, &key, &expected, 0), Ok(0));
    }

    #[test]
    fn origin_must_match_exactly() {
        assert!(origins_match("https://example.test", "https://example.test"));
        assert!(!origins_match("https://example.test", "https://example.test:443"));
        assert!(!origins_match("https://example.test", "https://example.test/"));
        assert!(!origins_match("https://example.test", "https://example.test/x"));
        assert!(!origins_match("https://example.test", "https://example.test?next=1"));
        assert!(origins_match("http://localhost:8080", "http://localhost:8080"));
        assert!(!origins_match("https://example.test", "http://example.test"));
        assert!(!origins_match("https://example.test", "https://example.test:8443"));
        assert!(!origins_match("https://example.test", "https://sub.example.test"));
        assert!(!origins_match("https://example.test", "not a url"));
    }
}
