// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Custodial key derivation.
//!
//! Every device gets a signing key held by the server on its behalf. The key
//! is never stored: it is recomputed from the device address and the
//! process-wide server salt with PBKDF2-HMAC-SHA256, so the same inputs
//! always yield the same key across calls and restarts.

use std::fmt;

use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use hmac::Hmac;
use sha2::Sha256;

/// PBKDF2 rounds used for custodial derivation.
pub const DERIVATION_ROUNDS: u32 = 100_000;

/// Minimum salt length accepted at startup.
pub const MIN_SALT_LEN: usize = 16;

/// Process-wide derivation secret.
#[derive(Clone)]
pub struct ServerSalt(Vec<u8>);

impl ServerSalt {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, DerivationError> {
        let bytes = bytes.into();
        if bytes.len() < MIN_SALT_LEN {
            return Err(DerivationError::Configuration(format!(
                "server salt must be at least {MIN_SALT_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ServerSalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServerSalt(<redacted>)")
    }
}

/// A device identity with its custodial signing key.
#[derive(Clone)]
pub struct DerivedIdentity {
    /// Lowercased device address the key was derived from.
    pub device_address: String,
    /// Custodial signer (private key never leaves the process).
    pub signer: PrivateKeySigner,
    /// Address of the custodial signer.
    pub custodial_address: Address,
}

impl DerivedIdentity {
    /// Raw 32-byte custodial private key.
    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.signer.to_bytes().0
    }
}

impl fmt::Debug for DerivedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedIdentity")
            .field("device_address", &self.device_address)
            .field("custodial_address", &self.custodial_address)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DerivationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Derived key is not a valid secp256k1 scalar: {0}")]
    InvalidScalar(String),
}

/// Derive the custodial identity for `device_address`.
///
/// Deterministic: consults no randomness and no external state. CPU-bound,
/// so async callers should run it on the blocking pool.
pub fn derive_identity(
    device_address: &str,
    salt: &ServerSalt,
) -> Result<DerivedIdentity, DerivationError> {
    let normalized = device_address.trim().to_ascii_lowercase();

    let mut key = [0u8; 32];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(
        normalized.as_bytes(),
        salt.as_bytes(),
        DERIVATION_ROUNDS,
        &mut key,
    )
    .map_err(|e| DerivationError::InvalidScalar(e.to_string()))?;

    // Zero or >= n is astronomically unlikely, but not impossible.
    k256::ecdsa::SigningKey::from_slice(&key)
        .map_err(|e| DerivationError::InvalidScalar(e.to_string()))?;

    let signer = PrivateKeySigner::from_slice(&key)
        .map_err(|e| DerivationError::InvalidScalar(e.to_string()))?;
    let custodial_address = signer.address();

    Ok(DerivedIdentity {
        device_address: normalized,
        signer,
        custodial_address,
    })
}
