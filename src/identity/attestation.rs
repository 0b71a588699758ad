// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Device attestation verification.
//!
//! A device proves control of its key by signing a message with the
//! standard personal-message scheme (`"\x19Ethereum Signed Message:\n" ++
//! len ++ message`). The signature is the 65-byte `r || s || v` form,
//! hex-encoded with or without a `0x` prefix.

use alloy::primitives::{Address, Signature};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Hex characters in a 65-byte `r || s || v` signature.
pub const SIGNATURE_HEX_LEN: usize = 130;

/// A message plus a signature proving control of a device key.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Attestation {
    /// The signed message, exactly as the device signed it.
    pub message: String,
    /// Hex-encoded 65-byte signature (`0x` prefix optional).
    pub signature: String,
}

/// Errors that can occur while verifying an attestation.
#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("Invalid signature length: expected {expected} hex characters, got {actual}")]
    Format { expected: usize, actual: usize },

    #[error("Invalid signature encoding: {0}")]
    Encoding(String),

    #[error("Signature verification failed: {0}")]
    Verification(String),
}

/// Strip an optional `0x` prefix and check the body length.
fn normalize_signature_hex(signature: &str) -> Result<&str, AttestationError> {
    let trimmed = signature.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if body.len() != SIGNATURE_HEX_LEN {
        return Err(AttestationError::Format {
            expected: SIGNATURE_HEX_LEN,
            actual: body.len(),
        });
    }

    Ok(body)
}

/// Recover the address that signed `message`.
///
/// Pure function of its inputs: no I/O, no state.
pub fn recover_signer(message: &str, signature: &str) -> Result<Address, AttestationError> {
    let body = normalize_signature_hex(signature)?;

    let raw = alloy::hex::decode(body).map_err(|e| AttestationError::Encoding(e.to_string()))?;

    let signature = Signature::from_raw(&raw)
        .map_err(|e| AttestationError::Verification(e.to_string()))?;

    signature
        .recover_address_from_msg(message.as_bytes())
        .map_err(|e| AttestationError::Verification(e.to_string()))
}

impl Attestation {
    /// Verify this attestation and return the signer address.
    pub fn verify(&self) -> Result<Address, AttestationError> {
        recover_signer(&self.message, &self.signature)
    }
}
