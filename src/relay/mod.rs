// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Anonymous mix-network relay.
//!
//! - `transcript` - labeled-field output parser and outcome classification
//! - `process` - subprocess driver with a bounded wait

use async_trait::async_trait;

use crate::models::DeviceRecord;

pub mod process;
pub mod transcript;

pub use process::ProcessRelay;
pub use transcript::{classify_transcript, RelayError, RelayOutcome, RelayTranscript};

/// Forwards a record through the anonymous relay.
#[async_trait]
pub trait RelayInvoker: Send + Sync {
    async fn invoke(&self, record: &DeviceRecord) -> Result<RelayOutcome, RelayError>;
}
