// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Edge Record Server - attested device record dispatch
//!
//! Edge devices prove control of a key with a signed attestation and push a
//! small structured record either to a public append-only ledger, signed by
//! a custodial key derived for the device, or through an anonymous
//! mix-network relay.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `identity` - attestation recovery and custodial key derivation
//! - `dispatch` - route selection and the dispatch lifecycle
//! - `ledger` - ledger entity publishing and lookups
//! - `relay` - anonymous relay process driver and transcript parsing
//! - `providers` - content pinning for uploaded files
//! - `store` - in-memory record log

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod models;
pub mod providers;
pub mod relay;
pub mod state;
pub mod store;
pub mod upload;
