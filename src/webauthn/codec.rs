//! # Credential Codec
//!
//! Decoding and encoding of the binary structures exchanged with the browser
//! during a ceremony:
//!
//! - **attestationObject**: CBOR map `{fmt, attStmt, authData}` returned by
//!   `navigator.credentials.create()`
//! - **authenticatorData**: fixed 37 byte header, optional attested credential
//!   data and optional CBOR extensions
//! - **clientDataJSON**: JSON the browser signs over, carrying the challenge
//!   and origin
//!
//! Decoding is strict: every byte must be accounted for, and any structural
//! problem is reported as [`MalformedInput`] naming the offending field.
//! Because the COSE key and extension blocks are kept as raw bytes,
//! [`AuthenticatorData::to_bytes`] reproduces the decoded input exactly.

use super::challenge::Challenge;
use super::error::MalformedInput;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use ciborium::value::Value;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::Cursor;

/// base64url without padding on output, padding tolerated on input
const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Length of the fixed authenticator data header (rpIdHash + flags + signCount)
const AUTH_DATA_HEADER_LEN: usize = 37;

pub fn b64url_encode(bytes: &[u8]) -> String {
    BASE64URL.encode(bytes)
}

pub fn b64url_decode(field: &'static str, input: &str) -> Result<Vec<u8>, MalformedInput> {
    BASE64URL
        .decode(input.as_bytes())
        .map_err(|e| MalformedInput::new(field, format!("invalid base64url: {e}")))
}

/// Encode a challenge for the outbound ceremony options
pub fn encode_challenge(challenge: &Challenge) -> String {
    b64url_encode(&challenge.value)
}

/// Authenticator data flag bits
pub mod flags {
    pub const USER_PRESENT: u8 = 0x01;
    pub const USER_VERIFIED: u8 = 0x04;
    pub const BACKUP_ELIGIBLE: u8 = 0x08;
    pub const BACKUP_STATE: u8 = 0x10;
    pub const ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
    pub const EXTENSION_DATA: u8 = 0x80;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatorFlags(pub u8);

impl AuthenticatorFlags {
    fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn user_present(self) -> bool {
        self.contains(flags::USER_PRESENT)
    }

    pub fn user_verified(self) -> bool {
        self.contains(flags::USER_VERIFIED)
    }

    pub fn backup_eligible(self) -> bool {
        self.contains(flags::BACKUP_ELIGIBLE)
    }

    pub fn backup_state(self) -> bool {
        self.contains(flags::BACKUP_STATE)
    }

    pub fn has_attested_credential_data(self) -> bool {
        self.contains(flags::ATTESTED_CREDENTIAL_DATA)
    }

    pub fn has_extensions(self) -> bool {
        self.contains(flags::EXTENSION_DATA)
    }
}

/// Credential data present in authenticator data at registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    /// COSE algorithm identifier read from the key's `alg` label
    pub algorithm: i64,
    /// The COSE_Key exactly as sent by the authenticator
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: AuthenticatorFlags,
    pub sign_count: u32,
    pub attested_credential: Option<AttestedCredentialData>,
    /// Raw CBOR extension map, present when the ED flag is set
    pub extensions: Option<Vec<u8>>,
}

impl AuthenticatorData {
    pub fn parse(bytes: &[u8]) -> Result<Self, MalformedInput> {
        const FIELD: &str = "authData";

        if bytes.len() < AUTH_DATA_HEADER_LEN {
            return Err(MalformedInput::new(
                FIELD,
                format!(
                    "expected at least {AUTH_DATA_HEADER_LEN} bytes, got {}",
                    bytes.len()
                ),
            ));
        }

        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&bytes[..32]);
        let flags = AuthenticatorFlags(bytes[32]);
        let sign_count = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);

        let mut rest = &bytes[AUTH_DATA_HEADER_LEN..];

        let attested_credential = if flags.has_attested_credential_data() {
            let (data, remaining) = parse_attested_credential(rest)?;
            rest = remaining;
            Some(data)
        } else {
            None
        };

        let extensions = if flags.has_extensions() {
            let (value, consumed) = read_cbor_item(rest, "authData.extensions")?;
            if !matches!(value, Value::Map(_)) {
                return Err(MalformedInput::new(
                    "authData.extensions",
                    "expected a CBOR map",
                ));
            }
            let raw = rest[..consumed].to_vec();
            rest = &rest[consumed..];
            Some(raw)
        } else {
            None
        };

        if !rest.is_empty() {
            return Err(MalformedInput::new(
                FIELD,
                format!("{} trailing bytes", rest.len()),
            ));
        }

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential,
            extensions,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(AUTH_DATA_HEADER_LEN);
        data.extend_from_slice(&self.rp_id_hash);
        data.push(self.flags.0);
        data.extend_from_slice(&self.sign_count.to_be_bytes());
        if let Some(attested) = &self.attested_credential {
            data.extend_from_slice(&attested.aaguid);
            data.extend_from_slice(&(attested.credential_id.len() as u16).to_be_bytes());
            data.extend_from_slice(&attested.credential_id);
            data.extend_from_slice(&attested.public_key);
        }
        if let Some(extensions) = &self.extensions {
            data.extend_from_slice(extensions);
        }
        data
    }
}

fn parse_attested_credential(
    input: &[u8],
) -> Result<(AttestedCredentialData, &[u8]), MalformedInput> {
    const FIELD: &str = "authData.attestedCredentialData";

    if input.len() < 18 {
        return Err(MalformedInput::new(
            FIELD,
            "too short for aaguid and credential id length",
        ));
    }

    let mut aaguid = [0u8; 16];
    aaguid.copy_from_slice(&input[..16]);
    let id_len = u16::from_be_bytes([input[16], input[17]]) as usize;
    let after_len = &input[18..];

    if id_len == 0 || after_len.len() < id_len {
        return Err(MalformedInput::new(
            FIELD,
            format!(
                "credential id length {id_len} does not fit in {} remaining bytes",
                after_len.len()
            ),
        ));
    }

    let credential_id = after_len[..id_len].to_vec();
    let key_bytes = &after_len[id_len..];

    let (key, consumed) = read_cbor_item(key_bytes, "authData.credentialPublicKey")?;
    let algorithm = cose_key_algorithm(&key)?;

    Ok((
        AttestedCredentialData {
            aaguid,
            credential_id,
            algorithm,
            public_key: key_bytes[..consumed].to_vec(),
        },
        &key_bytes[consumed..],
    ))
}

fn cose_key_algorithm(key: &Value) -> Result<i64, MalformedInput> {
    const FIELD: &str = "authData.credentialPublicKey";

    let Value::Map(entries) = key else {
        return Err(MalformedInput::new(FIELD, "expected a CBOR map"));
    };
    let alg = entries
        .iter()
        .find_map(|(k, v)| match (k, v) {
            (Value::Integer(label), Value::Integer(alg)) if i128::from(*label) == 3 => Some(*alg),
            _ => None,
        })
        .ok_or_else(|| MalformedInput::new(FIELD, "missing alg"))?;
    i64::try_from(i128::from(alg)).map_err(|_| MalformedInput::new(FIELD, "alg out of range"))
}

/// Decode one CBOR item from the front of `input`, returning it with the
/// number of bytes it occupied
fn read_cbor_item(input: &[u8], field: &'static str) -> Result<(Value, usize), MalformedInput> {
    let mut cursor = Cursor::new(input);
    let value: Value = ciborium::from_reader(&mut cursor)
        .map_err(|e| MalformedInput::new(field, format!("invalid CBOR: {e}")))?;
    Ok((value, cursor.position() as usize))
}

pub(crate) fn write_cbor(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).expect("writing CBOR into a Vec cannot fail");
    buf
}

/// Attestation statement (`attStmt`)
///
/// `alg`, `sig` and `x5c` are the fields of the `packed` format; entries of
/// other formats are preserved in `other`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttestationStatement {
    pub alg: Option<i64>,
    pub sig: Option<Vec<u8>>,
    pub x5c: Option<Vec<Vec<u8>>>,
    pub other: Vec<(String, Value)>,
}

impl AttestationStatement {
    pub fn is_empty(&self) -> bool {
        self.alg.is_none() && self.sig.is_none() && self.x5c.is_none() && self.other.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttestationObject {
    pub fmt: String,
    pub auth_data: AuthenticatorData,
    pub att_stmt: AttestationStatement,
}

pub fn decode_attestation(bytes: &[u8]) -> Result<AttestationObject, MalformedInput> {
    const FIELD: &str = "attestationObject";

    let (value, consumed) = read_cbor_item(bytes, FIELD)?;
    if consumed != bytes.len() {
        return Err(MalformedInput::new(
            FIELD,
            format!("{} trailing bytes", bytes.len() - consumed),
        ));
    }
    let Value::Map(entries) = value else {
        return Err(MalformedInput::new(FIELD, "expected a CBOR map"));
    };

    let mut fmt = None;
    let mut auth_data = None;
    let mut att_stmt = None;

    for (key, value) in entries {
        let key = key
            .into_text()
            .map_err(|_| MalformedInput::new(FIELD, "map keys must be text"))?;
        match key.as_str() {
            "fmt" => {
                let text = value
                    .into_text()
                    .map_err(|_| MalformedInput::new("fmt", "expected text"))?;
                set_once(&mut fmt, text, "fmt")?;
            }
            "authData" => {
                let raw = value
                    .into_bytes()
                    .map_err(|_| MalformedInput::new("authData", "expected a byte string"))?;
                set_once(&mut auth_data, AuthenticatorData::parse(&raw)?, "authData")?;
            }
            "attStmt" => {
                let map = value
                    .into_map()
                    .map_err(|_| MalformedInput::new("attStmt", "expected a CBOR map"))?;
                set_once(&mut att_stmt, parse_attestation_statement(map)?, "attStmt")?;
            }
            other => {
                return Err(MalformedInput::new(
                    FIELD,
                    format!("unexpected key {other:?}"),
                ))
            }
        }
    }

    Ok(AttestationObject {
        fmt: fmt.ok_or_else(|| MalformedInput::new("fmt", "missing"))?,
        auth_data: auth_data.ok_or_else(|| MalformedInput::new("authData", "missing"))?,
        att_stmt: att_stmt.ok_or_else(|| MalformedInput::new("attStmt", "missing"))?,
    })
}

fn parse_attestation_statement(
    entries: Vec<(Value, Value)>,
) -> Result<AttestationStatement, MalformedInput> {
    let mut stmt = AttestationStatement::default();

    for (key, value) in entries {
        let key = key
            .into_text()
            .map_err(|_| MalformedInput::new("attStmt", "map keys must be text"))?;
        match key.as_str() {
            "alg" => {
                let alg = value
                    .as_integer()
                    .ok_or_else(|| MalformedInput::new("attStmt.alg", "expected an integer"))?;
                let alg = i64::try_from(i128::from(alg))
                    .map_err(|_| MalformedInput::new("attStmt.alg", "alg out of range"))?;
                set_once(&mut stmt.alg, alg, "attStmt.alg")?;
            }
            "sig" => {
                let sig = value
                    .into_bytes()
                    .map_err(|_| MalformedInput::new("attStmt.sig", "expected a byte string"))?;
                set_once(&mut stmt.sig, sig, "attStmt.sig")?;
            }
            "x5c" => {
                let certs = value
                    .into_array()
                    .map_err(|_| MalformedInput::new("attStmt.x5c", "expected an array"))?
                    .into_iter()
                    .map(|cert| {
                        cert.into_bytes().map_err(|_| {
                            MalformedInput::new("attStmt.x5c", "certificates must be byte strings")
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                set_once(&mut stmt.x5c, certs, "attStmt.x5c")?;
            }
            _ => stmt.other.push((key, value)),
        }
    }

    Ok(stmt)
}

fn set_once<T>(slot: &mut Option<T>, value: T, field: &'static str) -> Result<(), MalformedInput> {
    if slot.is_some() {
        return Err(MalformedInput::new(field, "duplicate key"));
    }
    *slot = Some(value);
    Ok(())
}

pub fn encode_attestation(object: &AttestationObject) -> Vec<u8> {
    let stmt = &object.att_stmt;
    let mut statement = Vec::new();
    if let Some(alg) = stmt.alg {
        statement.push((Value::Text("alg".into()), Value::Integer(alg.into())));
    }
    if let Some(sig) = &stmt.sig {
        statement.push((Value::Text("sig".into()), Value::Bytes(sig.clone())));
    }
    if let Some(x5c) = &stmt.x5c {
        let certs = x5c.iter().cloned().map(Value::Bytes).collect();
        statement.push((Value::Text("x5c".into()), Value::Array(certs)));
    }
    for (key, value) in &stmt.other {
        statement.push((Value::Text(key.clone()), value.clone()));
    }

    write_cbor(&Value::Map(vec![
        (Value::Text("fmt".into()), Value::Text(object.fmt.clone())),
        (Value::Text("attStmt".into()), Value::Map(statement)),
        (
            Value::Text("authData".into()),
            Value::Bytes(object.auth_data.to_bytes()),
        ),
    ]))
}

#[derive(Deserialize)]
struct CollectedClientData {
    #[serde(rename = "type")]
    ceremony_type: String,
    challenge: String,
    origin: String,
    #[serde(rename = "crossOrigin", default)]
    cross_origin: bool,
}

/// Decoded clientDataJSON
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientData {
    /// `webauthn.create` or `webauthn.get`
    pub ceremony_type: String,
    pub challenge: Vec<u8>,
    pub origin: String,
    pub cross_origin: bool,
    /// SHA-256 of the raw JSON, the value authenticators sign over
    pub hash: [u8; 32],
    pub raw: Vec<u8>,
}

pub fn decode_client_data(bytes: &[u8]) -> Result<ClientData, MalformedInput> {
    let collected: CollectedClientData = serde_json::from_slice(bytes)
        .map_err(|e| MalformedInput::new("clientDataJSON", e.to_string()))?;
    let challenge = b64url_decode("clientDataJSON.challenge", &collected.challenge)?;

    Ok(ClientData {
        ceremony_type: collected.ceremony_type,
        challenge,
        origin: collected.origin,
        cross_origin: collected.cross_origin,
        hash: Sha256::digest(bytes).into(),
        raw: bytes.to_vec(),
    })
}

/// Raw parts of an authentication response
#[derive(Debug, Clone, Copy)]
pub struct AssertionPayload<'a> {
    pub authenticator_data: &'a [u8],
    pub signature: &'a [u8],
    pub client_data_json: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionResponse {
    pub authenticator_data: AuthenticatorData,
    pub signature: Vec<u8>,
    pub client_data: ClientData,
}

pub fn decode_assertion(payload: AssertionPayload<'_>) -> Result<AssertionResponse, MalformedInput> {
    let authenticator_data = AuthenticatorData::parse(payload.authenticator_data)?;
    if authenticator_data.attested_credential.is_some() {
        return Err(MalformedInput::new(
            "authData",
            "assertions must not carry attested credential data",
        ));
    }
    if payload.signature.is_empty() {
        return Err(MalformedInput::new("signature", "empty"));
    }

    Ok(AssertionResponse {
        authenticator_data,
        signature: payload.signature.to_vec(),
        client_data: decode_client_data(payload.client_data_json)?,
    })
}
