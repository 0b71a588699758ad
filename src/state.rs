// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    config::{AppConfig, UploadConfig},
    dispatch::Dispatcher,
    identity::{DerivationError, ServerSalt},
    ledger::{ChainLedger, EntityPublisher, LedgerBackend, LedgerError},
    providers::{PinataClient, PinningError},
    relay::ProcessRelay,
    store::RecordLog,
};

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Salt(#[from] DerivationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Pinning(#[from] PinningError),
}

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    /// Read side of the ledger.
    pub ledger: Arc<dyn LedgerBackend>,
    pub upload: UploadConfig,
    /// Relay command line, reported by readiness.
    pub relay_command: String,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, ledger: Arc<dyn LedgerBackend>) -> Self {
        Self {
            dispatcher,
            ledger,
            upload: UploadConfig::default(),
            relay_command: String::new(),
        }
    }

    pub fn with_upload(mut self, upload: UploadConfig) -> Self {
        self.upload = upload;
        self
    }

    pub fn with_relay_command(mut self, command: impl Into<String>) -> Self {
        self.relay_command = command.into();
        self
    }

    /// Wire the production backends described by `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, InitError> {
        let ledger: Arc<dyn LedgerBackend> = Arc::new(ChainLedger::new(&config.ledger)?);
        let publisher = EntityPublisher::new(ledger.clone(), config.ledger.entity_ttl_secs);
        let relay = Arc::new(ProcessRelay::new(&config.relay));

        let mut dispatcher = Dispatcher::new(publisher, relay, RecordLog::new())
            .with_signature_bypass(config.allow_signature_bypass);

        match &config.server_salt {
            Some(salt) => dispatcher = dispatcher.with_salt(ServerSalt::new(salt.clone())?),
            None => warn!("SERVER_SALT not set, ledger submissions will be rejected"),
        }

        match &config.pinning {
            Some(pinata) => {
                dispatcher = dispatcher.with_pinning(Arc::new(PinataClient::new(pinata)?));
            }
            None => warn!("PINATA_JWT not set, file uploads will be rejected"),
        }

        if config.allow_signature_bypass {
            warn!("Signature bypass is enabled; do not run this build in production");
        }

        info!(
            ledger_rpc = %config.ledger.rpc_url,
            processor = %config.ledger.processor_address,
            relay_command = %config.relay.command,
            relay_timeout_secs = config.relay.timeout.as_secs(),
            "Backends initialized"
        );

        Ok(Self::new(dispatcher, ledger)
            .with_upload(config.upload.clone())
            .with_relay_command(config.relay.command.clone()))
    }

    pub fn records(&self) -> &RecordLog {
        self.dispatcher.records()
    }
}
