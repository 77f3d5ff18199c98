//! # COSE Public Keys
//!
//! Credential public keys arrive as COSE_Key CBOR maps (RFC 9053). Only the
//! algorithms in [`SUPPORTED_ALGORITHMS`] are accepted; anything else is
//! rejected at verification time rather than resolved dynamically.

use super::error::VerificationFailure;
use ciborium::value::{Integer, Value};
use p256::ecdsa::signature::Verifier as _;
use serde::Serialize;
use thiserror::Error;

// COSE_Key map labels
const LABEL_KTY: i64 = 1;
const LABEL_ALG: i64 = 3;
const LABEL_CRV: i64 = -1;
const LABEL_X: i64 = -2;
const LABEL_Y: i64 = -3;

const KTY_OKP: i64 = 1;
const KTY_EC2: i64 = 2;
const CRV_P256: i64 = 1;
const CRV_ED25519: i64 = 6;

/// Signature algorithms this relying party accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CoseAlgorithm {
    /// ECDSA over P-256 with SHA-256
    Es256,
    /// Ed25519
    EdDsa,
}

/// Lookup table from COSE algorithm identifier to supported algorithm,
/// in order of preference for registration options
pub const SUPPORTED_ALGORITHMS: &[(i64, CoseAlgorithm)] =
    &[(-7, CoseAlgorithm::Es256), (-8, CoseAlgorithm::EdDsa)];

impl CoseAlgorithm {
    pub fn from_id(id: i64) -> Option<Self> {
        SUPPORTED_ALGORITHMS
            .iter()
            .find(|(known, _)| *known == id)
            .map(|(_, alg)| *alg)
    }

    pub fn id(self) -> i64 {
        match self {
            CoseAlgorithm::Es256 => -7,
            CoseAlgorithm::EdDsa => -8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("malformed COSE key: {0}")]
    Malformed(String),
    #[error("unsupported COSE algorithm {0}")]
    UnsupportedAlgorithm(i64),
}

impl From<KeyError> for VerificationFailure {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Malformed(_) => VerificationFailure::InvalidPublicKey,
            KeyError::UnsupportedAlgorithm(_) => VerificationFailure::UnsupportedAlgorithm,
        }
    }
}

/// A decoded credential public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CosePublicKey {
    Es256 { x: [u8; 32], y: [u8; 32] },
    Ed25519 { x: [u8; 32] },
}

impl CosePublicKey {
    pub fn algorithm(&self) -> CoseAlgorithm {
        match self {
            CosePublicKey::Es256 { .. } => CoseAlgorithm::Es256,
            CosePublicKey::Ed25519 { .. } => CoseAlgorithm::EdDsa,
        }
    }

    /// Parse a COSE_Key CBOR map
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, KeyError> {
        let value: Value = ciborium::from_reader(bytes)
            .map_err(|e| KeyError::Malformed(format!("invalid CBOR: {e}")))?;
        let Value::Map(entries) = value else {
            return Err(KeyError::Malformed("COSE key must be a map".into()));
        };

        let mut kty = None;
        let mut alg = None;
        let mut crv = None;
        let mut x = None;
        let mut y = None;

        for (key, value) in entries {
            // labels outside i64 are not ones we read
            let Some(label) = key.as_integer().and_then(|l| i64::try_from(i128::from(l)).ok())
            else {
                continue;
            };
            match (label, value) {
                (LABEL_KTY, Value::Integer(v)) => kty = Some(int_param(v, "kty")?),
                (LABEL_ALG, Value::Integer(v)) => alg = Some(int_param(v, "alg")?),
                (LABEL_CRV, Value::Integer(v)) => crv = Some(int_param(v, "crv")?),
                (LABEL_X, Value::Bytes(b)) => x = Some(b),
                (LABEL_Y, Value::Bytes(b)) => y = Some(b),
                _ => {}
            }
        }

        let alg = alg.ok_or_else(|| KeyError::Malformed("missing alg".into()))?;
        let algorithm = CoseAlgorithm::from_id(alg).ok_or(KeyError::UnsupportedAlgorithm(alg))?;

        match algorithm {
            CoseAlgorithm::Es256 => {
                if kty != Some(KTY_EC2) || crv != Some(CRV_P256) {
                    return Err(KeyError::Malformed("ES256 key must be EC2 on P-256".into()));
                }
                Ok(CosePublicKey::Es256 {
                    x: coordinate(x, "x")?,
                    y: coordinate(y, "y")?,
                })
            }
            CoseAlgorithm::EdDsa => {
                if kty != Some(KTY_OKP) || crv != Some(CRV_ED25519) {
                    return Err(KeyError::Malformed("EdDSA key must be OKP on Ed25519".into()));
                }
                Ok(CosePublicKey::Ed25519 {
                    x: coordinate(x, "x")?,
                })
            }
        }
    }

    /// Encode as a COSE_Key CBOR map
    pub fn to_cbor(&self) -> Vec<u8> {
        let entries = match self {
            CosePublicKey::Es256 { x, y } => vec![
                (int(LABEL_KTY), int(KTY_EC2)),
                (int(LABEL_ALG), int(CoseAlgorithm::Es256.id())),
                (int(LABEL_CRV), int(CRV_P256)),
                (int(LABEL_X), Value::Bytes(x.to_vec())),
                (int(LABEL_Y), Value::Bytes(y.to_vec())),
            ],
            CosePublicKey::Ed25519 { x } => vec![
                (int(LABEL_KTY), int(KTY_OKP)),
                (int(LABEL_ALG), int(CoseAlgorithm::EdDsa.id())),
                (int(LABEL_CRV), int(CRV_ED25519)),
                (int(LABEL_X), Value::Bytes(x.to_vec())),
            ],
        };
        super::codec::write_cbor(&Value::Map(entries))
    }

    /// Verify `signature` over `message` with this key
    ///
    /// ES256 signatures are ASN.1 DER encoded; Ed25519 signatures are the raw
    /// 64 bytes.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), VerificationFailure> {
        match self {
            CosePublicKey::Es256 { x, y } => {
                let mut sec1 = Vec::with_capacity(65);
                sec1.push(0x04);
                sec1.extend_from_slice(x);
                sec1.extend_from_slice(y);
                let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)
                    .map_err(|_| VerificationFailure::InvalidPublicKey)?;
                let signature = p256::ecdsa::Signature::from_der(signature)
                    .map_err(|_| VerificationFailure::SignatureInvalid)?;
                key.verify(message, &signature)
                    .map_err(|_| VerificationFailure::SignatureInvalid)
            }
            CosePublicKey::Ed25519 { x } => {
                let key = ed25519_dalek::VerifyingKey::from_bytes(x)
                    .map_err(|_| VerificationFailure::InvalidPublicKey)?;
                let signature = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|_| VerificationFailure::SignatureInvalid)?;
                key.verify_strict(message, &signature)
                    .map_err(|_| VerificationFailure::SignatureInvalid)
            }
        }
    }
}

fn int(v: i64) -> Value {
    Value::Integer(v.into())
}

fn int_param(value: Integer, name: &str) -> Result<i64, KeyError> {
    i64::try_from(i128::from(value))
        .map_err(|_| KeyError::Malformed(format!("{name} out of range")))
}

fn coordinate(bytes: Option<Vec<u8>>, name: &str) -> Result<[u8; 32], KeyError> {
    let bytes = bytes.ok_or_else(|| KeyError::Malformed(format!("missing {name} coordinate")))?;
    bytes
        .try_into()
        .map_err(|_| KeyError::Malformed(format!("{name} coordinate must be 32 bytes")))
}
