// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Public ledger integration.
//!
//! This module provides functionality for:
//! - Submitting time-bounded entities signed by custodial keys
//! - Reading entities back by key or by attribute query
//! - Classifying submission failures (underfunded custodial wallets)

pub mod client;
pub mod publisher;
pub mod types;

pub use client::{ChainLedger, LedgerBackend, LedgerError};
pub use publisher::EntityPublisher;
pub use types::*;
