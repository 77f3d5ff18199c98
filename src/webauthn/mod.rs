//! # WebAuthn Module
//!
//! The relying party core: everything needed to run passkey ceremonies
//! without delegating to an external WebAuthn library.
//!
//! ## Submodules
//! - `challenge`: single-use, expiring ceremony challenges
//! - `codec`: attestation objects, authenticator data and client data
//! - `cose`: COSE public keys and the supported algorithm table
//! - `verifier`: origin, RP id, flag, signature and counter checks
//! - `ceremony`: the [`RelyingParty`](ceremony::RelyingParty) orchestrator
//! - `types`: JSON shapes of the options and completion requests
//! - `error`: rejection reasons and ceremony errors

pub mod ceremony;
pub mod challenge;
pub mod codec;
pub mod cose;
pub mod error;
pub mod types;
pub mod verifier;
