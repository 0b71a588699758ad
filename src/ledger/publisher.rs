// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Publishing device records as ledger entities.

use std::sync::Arc;

use tracing::{info, warn};

use super::client::{LedgerBackend, LedgerError};
use super::types::{
    Attribute, CreateEntity, EntityReceipt, DEVICE_RECORD_TYPE, JSON_CONTENT_TYPE, TYPE_ATTRIBUTE,
};
use crate::{identity::DerivedIdentity, models::DeviceRecord};

/// Phrases backends use for an underfunded sender.
const INSUFFICIENT_FUNDS_PHRASES: &[&str] = &[
    "insufficient funds",
    "insufficient balance",
    "not enough funds",
];

/// Builds entity create calls for device records and submits them.
#[derive(Clone)]
pub struct EntityPublisher {
    backend: Arc<dyn LedgerBackend>,
    ttl_secs: u64,
}

impl EntityPublisher {
    pub fn new(backend: Arc<dyn LedgerBackend>, ttl_secs: u64) -> Self {
        Self { backend, ttl_secs }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Publish `record` signed by the custodial key of `identity`.
    ///
    /// Attempted exactly once; failures are classified, never retried.
    pub async fn publish(
        &self,
        record: &DeviceRecord,
        identity: &DerivedIdentity,
    ) -> Result<EntityReceipt, LedgerError> {
        let entity = self.build_entity(record)?;
        let wallet_address = identity.custodial_address.to_string();

        match self.backend.create_entity(&identity.signer, entity).await {
            Ok(receipt) => {
                info!(
                    record_id = %record.id,
                    entity_key = %receipt.entity_key,
                    tx_hash = %receipt.tx_hash,
                    custodial_address = %wallet_address,
                    "Published device record to ledger"
                );
                Ok(receipt)
            }
            Err(e) => {
                let classified = classify_ledger_error(e, &wallet_address);
                warn!(
                    record_id = %record.id,
                    custodial_address = %wallet_address,
                    error = %classified,
                    "Ledger publish failed"
                );
                Err(classified)
            }
        }
    }

    pub fn build_entity(&self, record: &DeviceRecord) -> Result<CreateEntity, LedgerError> {
        let payload = serde_json::to_vec(record).map_err(|e| {
            LedgerError::Submission(format!("failed to serialize record payload: {e}"))
        })?;

        Ok(CreateEntity {
            payload,
            content_type: JSON_CONTENT_TYPE.to_string(),
            attributes: build_attributes(record),
            ttl: self.ttl_secs,
        })
    }
}

/// Attribute set indexed alongside a record.
pub fn build_attributes(record: &DeviceRecord) -> Vec<Attribute> {
    let mut attributes = vec![
        Attribute::new(TYPE_ATTRIBUTE, DEVICE_RECORD_TYPE),
        Attribute::new("devicePub", &record.device_pub),
        Attribute::new("nodeId", &record.node_id),
    ];

    if let Some(location) = record.location {
        attributes.push(Attribute::new("lat", location.lat.to_string()));
        attributes.push(Attribute::new("lon", location.lon.to_string()));
    }

    if !record.tags.is_empty() {
        attributes.push(Attribute::new("tags", record.tags.join(",")));
    }

    if let Some(cid) = &record.content_id {
        attributes.push(Attribute::new("contentId", cid));
    }

    attributes
}

/// Surface underfunded-wallet failures with the wallet to fund.
pub fn classify_ledger_error(error: LedgerError, wallet_address: &str) -> LedgerError {
    match error {
        LedgerError::InsufficientFunds { .. } => LedgerError::InsufficientFunds {
            wallet_address: wallet_address.to_string(),
        },
        LedgerError::Submission(msg) | LedgerError::Rpc(msg) => {
            if is_insufficient_funds(&msg) {
                LedgerError::InsufficientFunds {
                    wallet_address: wallet_address.to_string(),
                }
            } else {
                LedgerError::Submission(msg)
            }
        }
        LedgerError::InvalidRpcUrl(msg) | LedgerError::InvalidResponse(msg) => {
            LedgerError::Submission(msg)
        }
    }
}

fn is_insufficient_funds(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    INSUFFICIENT_FUNDS_PHRASES.iter().any(|p| lower.contains(p))
}
