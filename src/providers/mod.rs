// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Third-party service providers.
//!
//! - `pinata` - content-addressed pinning of uploaded files

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::upload::UploadedFile;

pub mod pinata;

pub use pinata::PinataClient;

/// Errors raised by a pinning backend.
#[derive(Debug, thiserror::Error)]
pub enum PinningError {
    #[error("Pinning configuration missing: {0}")]
    MissingConfig(String),

    #[error("Failed to read upload: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pinning service error: {0}")]
    Service(String),
}

/// Content-addressed store that pins uploaded bytes.
#[async_trait]
pub trait PinningBackend: Send + Sync {
    /// Pin `file` and return its content identifier.
    async fn pin(
        &self,
        file: &UploadedFile,
        metadata: &BTreeMap<String, String>,
    ) -> Result<String, PinningError>;
}
