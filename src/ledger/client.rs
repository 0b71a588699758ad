// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger client for entity storage over EVM JSON-RPC.
//!
//! Entities are created by sending a transaction, signed by the custodial
//! key, to the storage processor address with the JSON-encoded create call
//! as calldata. Reads go through the ledger's own RPC namespace.

use std::borrow::Cow;

use alloy::{
    network::EthereumWallet,
    primitives::{Address, B256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::{Log, TransactionRequest},
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use serde_json::json;

use super::types::{render_query, CreateEntity, EntityReceipt, LedgerEntity, Predicate};
use crate::config::LedgerConfig;

const GET_ENTITY_METHOD: &str = "ledger_getEntity";
const QUERY_ENTITIES_METHOD: &str = "ledger_queryEntities";

/// Errors that can occur during ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("Insufficient funds in custodial wallet {wallet_address}")]
    InsufficientFunds { wallet_address: String },

    #[error("Ledger submission failed: {0}")]
    Submission(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Invalid ledger response: {0}")]
    InvalidResponse(String),
}

/// Public append-only ledger storing time-bounded entities.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// Submit a create call signed by `signer`.
    async fn create_entity(
        &self,
        signer: &PrivateKeySigner,
        entity: CreateEntity,
    ) -> Result<EntityReceipt, LedgerError>;

    async fn get_entity(&self, entity_key: &str) -> Result<Option<LedgerEntity>, LedgerError>;

    async fn query(&self, predicates: &[Predicate]) -> Result<Vec<LedgerEntity>, LedgerError>;
}

/// Ledger backend on an EVM chain.
pub struct ChainLedger {
    rpc_url: url::Url,
    processor_address: Address,
    /// Read-only provider shared by queries.
    reader: DynProvider,
}

impl ChainLedger {
    pub fn new(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let rpc_url: url::Url = config
            .rpc_url
            .parse()
            .map_err(|e: url::ParseError| LedgerError::InvalidRpcUrl(e.to_string()))?;

        let reader = ProviderBuilder::new()
            .connect_http(rpc_url.clone())
            .erased();

        Ok(Self {
            rpc_url,
            processor_address: config.processor_address,
            reader,
        })
    }
}

#[async_trait]
impl LedgerBackend for ChainLedger {
    async fn create_entity(
        &self,
        signer: &PrivateKeySigner,
        entity: CreateEntity,
    ) -> Result<EntityReceipt, LedgerError> {
        let calldata = encode_create_call(&entity)?;

        // Each custodial key gets its own signing provider.
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer.clone()))
            .connect_http(self.rpc_url.clone());

        let tx = TransactionRequest::default()
            .from(signer.address())
            .to(self.processor_address)
            .input(calldata.into());

        let pending = provider
            .send_transaction(tx)
            .await
            .map_err(|e| LedgerError::Submission(e.to_string()))?;
        let tx_hash = *pending.tx_hash();

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| LedgerError::Submission(format!("failed to get receipt: {e}")))?;

        if !receipt.status() {
            return Err(LedgerError::Submission(format!(
                "create transaction {tx_hash} reverted"
            )));
        }

        let entity_key = entity_key_from_logs(receipt.inner.logs(), self.processor_address)?;

        Ok(EntityReceipt {
            entity_key: entity_key.to_string(),
            tx_hash: tx_hash.to_string(),
        })
    }

    async fn get_entity(&self, entity_key: &str) -> Result<Option<LedgerEntity>, LedgerError> {
        self.reader
            .raw_request::<_, Option<LedgerEntity>>(
                Cow::Borrowed(GET_ENTITY_METHOD),
                (entity_key.to_string(),),
            )
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn query(&self, predicates: &[Predicate]) -> Result<Vec<LedgerEntity>, LedgerError> {
        self.reader
            .raw_request::<_, Vec<LedgerEntity>>(
                Cow::Borrowed(QUERY_ENTITIES_METHOD),
                (render_query(predicates),),
            )
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }
}

/// Calldata for a create call: `{"creates":[...]}` as JSON bytes.
pub fn encode_create_call(entity: &CreateEntity) -> Result<Vec<u8>, LedgerError> {
    serde_json::to_vec(&json!({ "creates": [entity] }))
        .map_err(|e| LedgerError::InvalidResponse(format!("failed to encode create call: {e}")))
}

/// The processor announces the new key as the first indexed topic of its log.
pub fn entity_key_from_logs(logs: &[Log], processor: Address) -> Result<B256, LedgerError> {
    logs.iter()
        .find(|log| log.address() == processor)
        .and_then(|log| log.topics().get(1).copied())
        .ok_or_else(|| LedgerError::InvalidResponse("receipt carries no entity key".to_string()))
}
