// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Device identity: attestation recovery and custodial key derivation.

pub mod attestation;
pub mod derivation;

pub use attestation::{recover_signer, Attestation, AttestationError, SIGNATURE_HEX_LEN};
pub use derivation::{derive_identity, DerivationError, DerivedIdentity, ServerSalt};
