// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Dispatch router.
//!
//! Routes one submission to exactly one backend:
//!
//! | whistleblow | signature | bypass | route |
//! |-------------|-----------|--------|-------|
//! | true | any | any | relay, signature never checked |
//! | false | present | any | verify, derive, ledger |
//! | false | absent | allowed | placeholder identity, derive, ledger |
//! | false | absent | not allowed | `MissingSignature` |
//!
//! On the ledger path an accompanying file is pinned before the entity is
//! published and its content identifier becomes part of the record. Every
//! terminal outcome of a well-formed record is appended to the record log
//! before the caller sees it.

use std::{collections::BTreeMap, sync::Arc};

use axum::http::StatusCode;
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::state::{DispatchState, DispatchTracker, InvalidTransition};
use crate::{
    identity::{
        derive_identity, Attestation, AttestationError, DerivationError, DerivedIdentity,
        ServerSalt,
    },
    ledger::{EntityPublisher, LedgerError},
    models::{DeviceRecord, RecordDraft},
    providers::{PinningBackend, PinningError},
    relay::{RelayError, RelayInvoker, RelayOutcome},
    store::{RecordLog, RecordLogError, Route, StoredRecord},
    upload::UploadedFile,
};

/// Device address used when the signature bypass is honoured.
pub const PLACEHOLDER_DEVICE_ADDRESS: &str = "0x000000000000000000000000000000000000dEaD";

/// Prefix of generated `devicePub` values on the relay path.
pub const ANONYMOUS_DEVICE_PREFIX: &str = "anonymous_";

/// One inbound submission.
#[derive(Debug, Default)]
pub struct SubmitRecord {
    pub record: RecordDraft,
    pub message: Option<String>,
    pub signature: Option<String>,
    pub whistleblow: bool,
    pub bypass_signature: bool,
    pub file: Option<UploadedFile>,
}

/// Backend selected for a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutePlan {
    Relay,
    /// Ledger path with a device-signed attestation.
    LedgerAttested,
    /// Ledger path with the placeholder identity.
    LedgerPlaceholder,
}

impl RoutePlan {
    pub fn route(&self) -> Route {
        match self {
            Self::Relay => Route::Relay,
            Self::LedgerAttested | Self::LedgerPlaceholder => Route::Ledger,
        }
    }
}

/// Pick the backend for a submission.
///
/// `bypass_allowed` must already combine the request flag with the
/// process-wide switch.
pub fn choose_route(
    whistleblow: bool,
    signature_present: bool,
    bypass_allowed: bool,
) -> Result<RoutePlan, DispatchError> {
    match (whistleblow, signature_present, bypass_allowed) {
        (true, _, _) => Ok(RoutePlan::Relay),
        (false, true, _) => Ok(RoutePlan::LedgerAttested),
        (false, false, true) => Ok(RoutePlan::LedgerPlaceholder),
        (false, false, false) => Err(DispatchError::MissingSignature),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("{0}")]
    SignatureFormat(String),

    #[error("{0}")]
    SignatureVerification(String),

    #[error("A signature is required unless whistleblow is set")]
    MissingSignature,

    #[error("Server misconfigured: {0}")]
    Configuration(String),

    #[error("{0}")]
    KeyDerivation(String),

    #[error("{0}")]
    PinningService(String),

    #[error("Insufficient funds in custodial wallet {wallet_address}")]
    LedgerInsufficientFunds { wallet_address: String },

    #[error("{0}")]
    LedgerSubmission(String),

    #[error("{0}")]
    RelayTimeoutNoData(String),

    #[error("{0}")]
    RelayProcess(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) | Self::MissingSignature => StatusCode::BAD_REQUEST,
            Self::SignatureFormat(_) | Self::SignatureVerification(_) => StatusCode::UNAUTHORIZED,
            Self::LedgerInsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code, also kept on failed log entries.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "malformed_request",
            Self::SignatureFormat(_) => "signature_format_error",
            Self::SignatureVerification(_) => "signature_verification_error",
            Self::MissingSignature => "missing_signature",
            Self::Configuration(_) => "configuration_error",
            Self::KeyDerivation(_) => "key_derivation_error",
            Self::PinningService(_) => "pinning_service_error",
            Self::LedgerInsufficientFunds { .. } => "ledger_insufficient_funds",
            Self::LedgerSubmission(_) => "ledger_submission_error",
            Self::RelayTimeoutNoData(_) => "relay_timeout_no_data",
            Self::RelayProcess(_) => "relay_process_error",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn wallet_address(&self) -> Option<&str> {
        match self {
            Self::LedgerInsufficientFunds { wallet_address } => Some(wallet_address),
            _ => None,
        }
    }
}

impl From<AttestationError> for DispatchError {
    fn from(e: AttestationError) -> Self {
        match e {
            AttestationError::Format { .. } | AttestationError::Encoding(_) => {
                Self::SignatureFormat(e.to_string())
            }
            AttestationError::Verification(_) => Self::SignatureVerification(e.to_string()),
        }
    }
}

impl From<DerivationError> for DispatchError {
    fn from(e: DerivationError) -> Self {
        match e {
            DerivationError::Configuration(msg) => Self::Configuration(msg),
            DerivationError::InvalidScalar(_) => Self::KeyDerivation(e.to_string()),
        }
    }
}

impl From<PinningError> for DispatchError {
    fn from(e: PinningError) -> Self {
        match e {
            PinningError::MissingConfig(name) => {
                Self::Configuration(format!("{name} is not configured"))
            }
            PinningError::Io(_) | PinningError::Service(_) => Self::PinningService(e.to_string()),
        }
    }
}

impl From<LedgerError> for DispatchError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds { wallet_address } => {
                Self::LedgerInsufficientFunds { wallet_address }
            }
            other => Self::LedgerSubmission(other.to_string()),
        }
    }
}

impl From<RelayError> for DispatchError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::TimeoutNoData { .. } => Self::RelayTimeoutNoData(e.to_string()),
            RelayError::Process(_) => Self::RelayProcess(e.to_string()),
        }
    }
}

impl From<RecordLogError> for DispatchError {
    fn from(e: RecordLogError) -> Self {
        Self::MalformedRequest(e.to_string())
    }
}

impl From<InvalidTransition> for DispatchError {
    fn from(e: InvalidTransition) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Result of a ledger dispatch.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerOutcome {
    pub record_id: String,
    pub entity_key: String,
    pub tx_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    /// Device address the custodial key was derived from.
    pub device_address: String,
    pub custodial_address: String,
}

/// Result of a relay dispatch.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelayDispatch {
    pub record_id: String,
    pub node_id: String,
    pub whistleblow: bool,
    pub relay: RelayOutcome,
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(untagged)]
pub enum DispatchOutcome {
    Ledger(LedgerOutcome),
    Relay(RelayDispatch),
}

/// Orchestrates verification, derivation, pinning, publishing and relaying.
#[derive(Clone)]
pub struct Dispatcher {
    salt: Option<ServerSalt>,
    allow_signature_bypass: bool,
    publisher: EntityPublisher,
    pinning: Option<Arc<dyn PinningBackend>>,
    relay: Arc<dyn RelayInvoker>,
    log: RecordLog,
}

impl Dispatcher {
    pub fn new(publisher: EntityPublisher, relay: Arc<dyn RelayInvoker>, log: RecordLog) -> Self {
        Self {
            salt: None,
            allow_signature_bypass: false,
            publisher,
            pinning: None,
            relay,
            log,
        }
    }

    pub fn with_salt(mut self, salt: ServerSalt) -> Self {
        self.salt = Some(salt);
        self
    }

    pub fn with_pinning(mut self, pinning: Arc<dyn PinningBackend>) -> Self {
        self.pinning = Some(pinning);
        self
    }

    /// Honour request-level `bypassSignature`.
    pub fn with_signature_bypass(mut self, allow: bool) -> Self {
        self.allow_signature_bypass = allow;
        self
    }

    pub fn records(&self) -> &RecordLog {
        &self.log
    }

    pub fn has_salt(&self) -> bool {
        self.salt.is_some()
    }

    pub fn has_pinning(&self) -> bool {
        self.pinning.is_some()
    }

    /// Verify `attestation` and derive the custodial identity of its signer.
    pub async fn identity_for(
        &self,
        attestation: &Attestation,
    ) -> Result<DerivedIdentity, DispatchError> {
        let device_address = attestation.verify()?;
        self.derive(&device_address.to_string()).await
    }

    /// Dispatch one submission.
    pub async fn submit(&self, request: SubmitRecord) -> Result<DispatchOutcome, DispatchError> {
        let SubmitRecord {
            record: draft,
            message,
            signature,
            whistleblow,
            bypass_signature,
            file,
        } = request;

        let mut tracker = DispatchTracker::new();
        tracker.advance(DispatchState::Validating)?;

        let mut record = match self.validate(draft).await {
            Ok(record) => record,
            Err(e) => {
                tracker.advance(DispatchState::Failed)?;
                return Err(e);
            }
        };
        tracker.set_record_id(&record.id);

        let signature = signature.filter(|s| !s.trim().is_empty());
        let plan = choose_route(
            whistleblow,
            signature.is_some(),
            bypass_signature && self.allow_signature_bypass,
        );
        if bypass_signature && !self.allow_signature_bypass && signature.is_none() {
            warn!(record_id = %record.id, "Signature bypass requested but not enabled");
        }

        // A missing signature still settles on the ledger path.
        let route = plan.as_ref().map(RoutePlan::route).unwrap_or(Route::Ledger);

        // The id is reserved from here on, so every path below reaches the log.
        let result = match tracker.advance(DispatchState::Routed(route)) {
            Ok(()) => {
                self.dispatch(plan, &mut record, message, signature, file)
                    .await
            }
            Err(e) => Err(e.into()),
        };

        let entry = match &result {
            Ok(DispatchOutcome::Ledger(outcome)) => {
                StoredRecord::completed(record, route).with_entity_key(&outcome.entity_key)
            }
            Ok(DispatchOutcome::Relay(_)) => StoredRecord::completed(record, route),
            Err(e) => StoredRecord::failed(record, route, e.error_code()),
        };
        self.log.append(entry).await?;

        tracker.advance(if result.is_ok() {
            DispatchState::Completed
        } else {
            DispatchState::Failed
        })?;

        if let Err(e) = &result {
            warn!(
                route = ?route,
                error_code = e.error_code(),
                error = %e,
                "Dispatch failed"
            );
        }

        result
    }

    /// Complete the draft and claim its id in the log.
    async fn validate(&self, draft: RecordDraft) -> Result<DeviceRecord, DispatchError> {
        let record = draft.complete().map_err(DispatchError::MalformedRequest)?;
        self.log.reserve(&record.id).await?;
        Ok(record)
    }

    async fn dispatch(
        &self,
        plan: Result<RoutePlan, DispatchError>,
        record: &mut DeviceRecord,
        message: Option<String>,
        signature: Option<String>,
        file: Option<UploadedFile>,
    ) -> Result<DispatchOutcome, DispatchError> {
        match plan? {
            RoutePlan::Relay => self.dispatch_relay(record, file).await,
            RoutePlan::LedgerAttested => {
                let address = pair_attestation(message, signature)?.verify()?;
                self.dispatch_ledger(record, address.to_string(), file)
                    .await
            }
            RoutePlan::LedgerPlaceholder => {
                warn!(record_id = %record.id, "Signature bypass in use, publishing with placeholder identity");
                self.dispatch_ledger(record, PLACEHOLDER_DEVICE_ADDRESS.to_string(), file)
                    .await
            }
        }
    }

    async fn dispatch_relay(
        &self,
        record: &mut DeviceRecord,
        file: Option<UploadedFile>,
    ) -> Result<DispatchOutcome, DispatchError> {
        if let Some(file) = file {
            warn!(
                record_id = %record.id,
                file_name = file.file_name(),
                size = file.size(),
                "Discarding file submitted on relay path"
            );
        }

        if record.device_pub.is_empty() {
            record.device_pub = anonymous_device_pub();
        }

        let relay = self.relay.invoke(record).await?;

        Ok(DispatchOutcome::Relay(RelayDispatch {
            record_id: record.id.clone(),
            node_id: record.node_id.clone(),
            whistleblow: true,
            relay,
        }))
    }

    async fn dispatch_ledger(
        &self,
        record: &mut DeviceRecord,
        device_address: String,
        file: Option<UploadedFile>,
    ) -> Result<DispatchOutcome, DispatchError> {
        if record.device_pub.is_empty() {
            record.device_pub = device_address.clone();
        }

        let identity = self.derive(&device_address).await?;

        if let Some(file) = file {
            let cid = self.pin(file, record).await?;
            record.content_id = Some(cid);
        }

        let receipt = self.publisher.publish(record, &identity).await?;

        Ok(DispatchOutcome::Ledger(LedgerOutcome {
            record_id: record.id.clone(),
            entity_key: receipt.entity_key,
            tx_hash: receipt.tx_hash,
            content_id: record.content_id.clone(),
            device_address: identity.device_address,
            custodial_address: identity.custodial_address.to_string(),
        }))
    }

    /// Derivation is CPU-bound, so it runs on the blocking pool.
    async fn derive(&self, device_address: &str) -> Result<DerivedIdentity, DispatchError> {
        let salt = self
            .salt
            .clone()
            .ok_or_else(|| DispatchError::Configuration("SERVER_SALT is not set".to_string()))?;
        let device_address = device_address.to_string();

        tokio::task::spawn_blocking(move || derive_identity(&device_address, &salt))
            .await
            .map_err(|e| DispatchError::Internal(format!("key derivation task failed: {e}")))?
            .map_err(DispatchError::from)
    }

    /// Pin `file`; the spool file is gone when this returns.
    async fn pin(&self, file: UploadedFile, record: &DeviceRecord) -> Result<String, DispatchError> {
        let pinning = self.pinning.as_ref().ok_or_else(|| {
            DispatchError::Configuration("PINATA_JWT is not set, file uploads are disabled".to_string())
        })?;

        let metadata = BTreeMap::from([
            ("recordId".to_string(), record.id.clone()),
            ("nodeId".to_string(), record.node_id.clone()),
            ("devicePub".to_string(), record.device_pub.clone()),
        ]);

        let result = pinning.pin(&file, &metadata).await;
        let (file_name, size) = (file.file_name().to_string(), file.size());
        drop(file);

        match result {
            Ok(cid) => {
                info!(record_id = %record.id, file_name = %file_name, size, cid = %cid, "Pinned upload");
                Ok(cid)
            }
            Err(e) => {
                warn!(record_id = %record.id, file_name = %file_name, error = %e, "Pinning failed");
                Err(e.into())
            }
        }
    }
}

fn pair_attestation(
    message: Option<String>,
    signature: Option<String>,
) -> Result<Attestation, DispatchError> {
    match (message.filter(|m| !m.is_empty()), signature) {
        (Some(message), Some(signature)) => Ok(Attestation { message, signature }),
        (None, Some(_)) => Err(DispatchError::MalformedRequest(
            "signature provided without message".to_string(),
        )),
        (_, None) => Err(DispatchError::MissingSignature),
    }
}

fn anonymous_device_pub() -> String {
    format!("{ANONYMOUS_DEVICE_PREFIX}{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        identity::ServerSalt,
        ledger::{CreateEntity, EntityReceipt, LedgerBackend, LedgerEntity, Predicate},
        store::DispatchStatus,
    };
    use alloy::signers::{local::PrivateKeySigner, SignerSync};
    use async_trait::async_trait;
    use std::{
        path::PathBuf,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    const SALT: &str = "dispatch-test-salt-0123456789";

    #[derive(Default)]
    struct FakeLedger {
        created: Mutex<Vec<(String, CreateEntity)>>,
        fail_with: Option<String>,
        delay: Option<std::time::Duration>,
    }

    #[async_trait]
    impl LedgerBackend for FakeLedger {
        async fn create_entity(
            &self,
            signer: &PrivateKeySigner,
            entity: CreateEntity,
        ) -> Result<EntityReceipt, LedgerError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(msg) = &self.fail_with {
                return Err(LedgerError::Submission(msg.clone()));
            }
            let mut created = self.created.lock().unwrap();
            created.push((signer.address().to_string(), entity));
            Ok(EntityReceipt {
                entity_key: format!("0xentity{}", created.len()),
                tx_hash: format!("0xtx{}", created.len()),
            })
        }

        async fn get_entity(&self, _: &str) -> Result<Option<LedgerEntity>, LedgerError> {
            Ok(None)
        }

        async fn query(&self, _: &[Predicate]) -> Result<Vec<LedgerEntity>, LedgerError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct FakePinning {
        fail: bool,
        seen_paths: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl PinningBackend for FakePinning {
        async fn pin(
            &self,
            file: &UploadedFile,
            metadata: &BTreeMap<String, String>,
        ) -> Result<String, PinningError> {
            assert!(file.path().exists());
            assert!(metadata.contains_key("recordId"));
            self.seen_paths.lock().unwrap().push(file.path());
            if self.fail {
                return Err(PinningError::Service("quota exceeded".into()));
            }
            Ok("bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi".into())
        }
    }

    #[derive(Default)]
    struct FakeRelay {
        outcome: Option<RelayOutcome>,
        calls: AtomicUsize,
        seen_device_pub: Mutex<Option<String>>,
    }

    #[async_trait]
    impl RelayInvoker for FakeRelay {
        async fn invoke(&self, record: &DeviceRecord) -> Result<RelayOutcome, RelayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_device_pub.lock().unwrap() = Some(record.device_pub.clone());
            self.outcome
                .clone()
                .ok_or(RelayError::TimeoutNoData { elapsed_secs: 90 })
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        ledger: Arc<FakeLedger>,
        pinning: Arc<FakePinning>,
        relay: Arc<FakeRelay>,
    }

    fn harness_with(ledger: FakeLedger, pinning: FakePinning, relay: FakeRelay) -> Harness {
        let ledger = Arc::new(ledger);
        let pinning = Arc::new(pinning);
        let relay = Arc::new(relay);
        let dispatcher = Dispatcher::new(
            EntityPublisher::new(ledger.clone(), 3600),
            relay.clone(),
            RecordLog::new(),
        )
        .with_salt(ServerSalt::new(SALT).unwrap())
        .with_pinning(pinning.clone());
        Harness {
            dispatcher,
            ledger,
            pinning,
            relay,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeLedger::default(), FakePinning::default(), FakeRelay::default())
    }

    fn sent_outcome() -> RelayOutcome {
        RelayOutcome {
            sent_message_ids: vec!["id1".into()],
            round_ids: vec![7],
            ..Default::default()
        }
    }

    fn signed(seed: u8, message: &str) -> (PrivateKeySigner, String) {
        let signer = PrivateKeySigner::from_slice(&[seed; 32]).unwrap();
        let sig = signer.sign_message_sync(message.as_bytes()).unwrap();
        (signer, alloy::hex::encode_prefixed(sig.as_bytes()))
    }

    fn draft(id: &str) -> RecordDraft {
        RecordDraft {
            id: Some(id.into()),
            node_id: Some("node-a".into()),
            text: Some("reading".into()),
            ..Default::default()
        }
    }

    fn attested(id: &str, seed: u8) -> (SubmitRecord, PrivateKeySigner) {
        let (signer, signature) = signed(seed, "edge check-in");
        let request = SubmitRecord {
            record: draft(id),
            message: Some("edge check-in".into()),
            signature: Some(signature),
            ..Default::default()
        };
        (request, signer)
    }

    fn file(bytes: &[u8]) -> UploadedFile {
        UploadedFile::spool(bytes, "photo.jpg", Some("image/jpeg".into()), None).unwrap()
    }

    #[test]
    fn decision_table() {
        for signature in [false, true] {
            for bypass in [false, true] {
                assert_eq!(choose_route(true, signature, bypass).unwrap(), RoutePlan::Relay);
            }
        }
        assert_eq!(choose_route(false, true, false).unwrap(), RoutePlan::LedgerAttested);
        assert_eq!(choose_route(false, true, true).unwrap(), RoutePlan::LedgerAttested);
        assert_eq!(
            choose_route(false, false, true).unwrap(),
            RoutePlan::LedgerPlaceholder
        );
        assert!(matches!(
            choose_route(false, false, false),
            Err(DispatchError::MissingSignature)
        ));
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            DispatchError::MalformedRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(DispatchError::MissingSignature.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            DispatchError::SignatureFormat("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            DispatchError::SignatureVerification("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        let funds = DispatchError::LedgerInsufficientFunds {
            wallet_address: "0xw".into(),
        };
        assert_eq!(funds.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(funds.wallet_address(), Some("0xw"));
        assert_eq!(
            DispatchError::RelayTimeoutNoData("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn whistleblow_goes_to_relay_without_checking_signature() {
        let h = harness_with(
            FakeLedger::default(),
            FakePinning::default(),
            FakeRelay {
                outcome: Some(sent_outcome()),
                ..Default::default()
            },
        );

        let outcome = h
            .dispatcher
            .submit(SubmitRecord {
                record: draft("rec-relay"),
                signature: Some("not even hex".into()),
                whistleblow: true,
                ..Default::default()
            })
            .await
            .unwrap();

        match outcome {
            DispatchOutcome::Relay(relay) => {
                assert!(relay.whistleblow);
                assert_eq!(relay.node_id, "node-a");
                assert_eq!(relay.relay.sent_message_ids, vec!["id1"]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let device_pub = h.relay.seen_device_pub.lock().unwrap().clone().unwrap();
        assert!(device_pub.starts_with(ANONYMOUS_DEVICE_PREFIX));
        assert!(h.ledger.created.lock().unwrap().is_empty());

        let anonymous = h.dispatcher.records().list_anonymous().await;
        assert_eq!(anonymous.len(), 1);
        assert_eq!(anonymous[0].record.device_pub, device_pub);
        assert_eq!(anonymous[0].route, Route::Relay);
    }

    #[tokio::test]
    async fn relay_keeps_caller_device_pub_and_discards_file() {
        let h = harness_with(
            FakeLedger::default(),
            FakePinning::default(),
            FakeRelay {
                outcome: Some(sent_outcome()),
                ..Default::default()
            },
        );
        let upload = file(b"secret");
        let spool_path = upload.path();

        let mut record = draft("rec-relay-file");
        record.device_pub = Some("caller-key".into());
        h.dispatcher
            .submit(SubmitRecord {
                record,
                whistleblow: true,
                file: Some(upload),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(
            h.relay.seen_device_pub.lock().unwrap().as_deref(),
            Some("caller-key")
        );
        assert!(h.pinning.seen_paths.lock().unwrap().is_empty());
        assert!(!spool_path.exists());
    }

    #[tokio::test]
    async fn relay_timeout_is_logged_as_failed() {
        let h = harness();

        let err = h
            .dispatcher
            .submit(SubmitRecord {
                record: draft("rec-timeout"),
                whistleblow: true,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::RelayTimeoutNoData(_)));

        let stored = h.dispatcher.records().get("rec-timeout").await.unwrap();
        assert_eq!(stored.status, DispatchStatus::Failed);
        assert_eq!(stored.error_code.as_deref(), Some("relay_timeout_no_data"));
        assert!(stored.is_anonymous);
    }

    #[tokio::test]
    async fn attested_submission_publishes_with_derived_key() {
        let h = harness();
        let (request, device) = attested("rec-ledger", 3);

        let outcome = h.dispatcher.submit(request).await.unwrap();
        let DispatchOutcome::Ledger(ledger) = outcome else {
            panic!("expected ledger outcome");
        };

        let expected = derive_identity(
            &device.address().to_string(),
            &ServerSalt::new(SALT).unwrap(),
        )
        .unwrap();
        assert_eq!(ledger.custodial_address, expected.custodial_address.to_string());
        assert_eq!(ledger.entity_key, "0xentity1");

        let created = h.ledger.created.lock().unwrap();
        assert_eq!(created[0].0, expected.custodial_address.to_string());
        let payload: DeviceRecord = serde_json::from_slice(&created[0].1.payload).unwrap();
        assert_eq!(payload.device_pub, device.address().to_string());

        drop(created);
        let stored = h.dispatcher.records().get("rec-ledger").await.unwrap();
        assert_eq!(stored.status, DispatchStatus::Completed);
        assert_eq!(stored.entity_key.as_deref(), Some("0xentity1"));
        assert!(!stored.is_anonymous);
    }

    #[tokio::test]
    async fn uploaded_file_cid_is_part_of_published_record() {
        let h = harness();
        let (mut request, _) = attested("rec-file", 4);
        let upload = file(b"\xff\xd8\xff jpeg bytes");
        let spool_path = upload.path();
        request.file = Some(upload);

        let outcome = h.dispatcher.submit(request).await.unwrap();
        let DispatchOutcome::Ledger(ledger) = outcome else {
            panic!("expected ledger outcome");
        };
        let cid = ledger.content_id.unwrap();

        let created = h.ledger.created.lock().unwrap();
        let payload: DeviceRecord = serde_json::from_slice(&created[0].1.payload).unwrap();
        assert_eq!(payload.content_id.as_deref(), Some(cid.as_str()));
        assert!(created[0]
            .1
            .attributes
            .iter()
            .any(|a| a.key == "contentId" && a.value == cid));
        assert!(!spool_path.exists());
    }

    #[tokio::test]
    async fn pinning_failure_removes_spool_and_skips_ledger() {
        let h = harness_with(
            FakeLedger::default(),
            FakePinning {
                fail: true,
                ..Default::default()
            },
            FakeRelay::default(),
        );
        let (mut request, _) = attested("rec-pin-fail", 5);
        request.file = Some(file(b"bytes"));

        let err = h.dispatcher.submit(request).await.unwrap_err();
        assert!(matches!(err, DispatchError::PinningService(msg) if msg.contains("quota exceeded")));

        let seen = h.pinning.seen_paths.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].exists());
        assert!(h.ledger.created.lock().unwrap().is_empty());

        let stored = h.dispatcher.records().get("rec-pin-fail").await.unwrap();
        assert_eq!(stored.error_code.as_deref(), Some("pinning_service_error"));
    }

    #[tokio::test]
    async fn unrecoverable_signature_is_rejected_before_any_backend_call() {
        let h = harness();
        let upload = file(b"bytes");
        let spool_path = upload.path();

        let err = h
            .dispatcher
            .submit(SubmitRecord {
                record: draft("rec-bad-sig"),
                message: Some("hello".into()),
                signature: Some(format!("0x{}", "00".repeat(65))),
                file: Some(upload),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert!(h.pinning.seen_paths.lock().unwrap().is_empty());
        assert!(h.ledger.created.lock().unwrap().is_empty());
        assert!(!spool_path.exists());
    }

    #[tokio::test]
    async fn malformed_signature_is_unauthorized() {
        let h = harness();
        let err = h
            .dispatcher
            .submit(SubmitRecord {
                record: draft("rec-short-sig"),
                message: Some("hello".into()),
                signature: Some("0xdeadbeef".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::SignatureFormat(_)));
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert!(h.ledger.created.lock().unwrap().is_empty());
        assert_eq!(
            h.dispatcher.records().get("rec-short-sig").await.unwrap().status,
            DispatchStatus::Failed
        );
    }

    #[tokio::test]
    async fn signature_without_message_is_malformed() {
        let h = harness();
        let (mut request, _) = attested("rec-no-msg", 7);
        request.message = None;

        let err = h.dispatcher.submit(request).await.unwrap_err();
        assert!(matches!(err, DispatchError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn missing_signature_without_bypass_fails() {
        let h = harness();
        let err = h
            .dispatcher
            .submit(SubmitRecord {
                record: draft("rec-unsigned"),
                bypass_signature: true,
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::MissingSignature));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(h.ledger.created.lock().unwrap().is_empty());

        let stored = h.dispatcher.records().get("rec-unsigned").await.unwrap();
        assert_eq!(stored.error_code.as_deref(), Some("missing_signature"));
    }

    #[tokio::test]
    async fn bypass_uses_placeholder_when_enabled() {
        let h = harness();
        let dispatcher = h.dispatcher.clone().with_signature_bypass(true);

        let outcome = dispatcher
            .submit(SubmitRecord {
                record: draft("rec-bypass"),
                bypass_signature: true,
                ..Default::default()
            })
            .await
            .unwrap();

        let DispatchOutcome::Ledger(ledger) = outcome else {
            panic!("expected ledger outcome");
        };
        assert_eq!(ledger.device_address, PLACEHOLDER_DEVICE_ADDRESS.to_ascii_lowercase());
    }

    #[tokio::test]
    async fn insufficient_funds_surfaces_custodial_wallet() {
        let h = harness_with(
            FakeLedger {
                fail_with: Some("insufficient funds for gas * price + value".into()),
                ..Default::default()
            },
            FakePinning::default(),
            FakeRelay::default(),
        );
        let (request, device) = attested("rec-broke", 8);

        let err = h.dispatcher.submit(request).await.unwrap_err();
        let expected = derive_identity(
            &device.address().to_string(),
            &ServerSalt::new(SALT).unwrap(),
        )
        .unwrap();

        assert_eq!(err.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(
            err.wallet_address(),
            Some(expected.custodial_address.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn missing_salt_is_configuration_error() {
        let ledger = Arc::new(FakeLedger::default());
        let dispatcher = Dispatcher::new(
            EntityPublisher::new(ledger.clone(), 60),
            Arc::new(FakeRelay::default()),
            RecordLog::new(),
        );
        let (request, _) = attested("rec-no-salt", 9);

        let err = dispatcher.submit(request).await.unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
        assert!(ledger.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_and_duplicate_records_are_not_logged() {
        let h = harness();
        let mut bad = draft("rec-bad");
        bad.tags = vec!["".into()];
        let err = h
            .dispatcher
            .submit(SubmitRecord {
                record: bad,
                whistleblow: true,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::MalformedRequest(_)));
        assert!(h.dispatcher.records().is_empty().await);

        let (first, _) = attested("rec-dup", 10);
        h.dispatcher.submit(first).await.unwrap();
        let (second, _) = attested("rec-dup", 10);
        let err = h.dispatcher.submit(second).await.unwrap_err();

        assert!(matches!(err, DispatchError::MalformedRequest(_)));
        assert_eq!(h.dispatcher.records().len().await, 1);
        assert_eq!(h.ledger.created.lock().unwrap().len(), 1);
        assert_eq!(h.relay.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_submissions_with_same_id_publish_once() {
        let h = harness_with(
            FakeLedger {
                delay: Some(std::time::Duration::from_millis(200)),
                ..Default::default()
            },
            FakePinning::default(),
            FakeRelay::default(),
        );
        let (a, _) = attested("rec-same", 13);
        let (b, _) = attested("rec-same", 14);

        let (ra, rb) = tokio::join!(h.dispatcher.submit(a), h.dispatcher.submit(b));

        assert_eq!(ra.is_ok() as u8 + rb.is_ok() as u8, 1);
        let err = ra.err().or(rb.err()).unwrap();
        assert!(matches!(err, DispatchError::MalformedRequest(_)));
        assert_eq!(h.ledger.created.lock().unwrap().len(), 1);

        let stored = h.dispatcher.records().get("rec-same").await.unwrap();
        assert_eq!(stored.status, DispatchStatus::Completed);
        assert_eq!(stored.entity_key.as_deref(), Some("0xentity1"));
        assert_eq!(h.dispatcher.records().len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_devices_get_distinct_custodial_keys() {
        let h = harness();
        let (a, _) = attested("rec-a", 11);
        let (b, _) = attested("rec-b", 12);

        let (ra, rb) = tokio::join!(h.dispatcher.submit(a), h.dispatcher.submit(b));
        let (DispatchOutcome::Ledger(ra), DispatchOutcome::Ledger(rb)) = (ra.unwrap(), rb.unwrap())
        else {
            panic!("expected ledger outcomes");
        };

        assert_ne!(ra.custodial_address, rb.custodial_address);
        assert_ne!(ra.entity_key, rb.entity_key);

        let stored_a = h.dispatcher.records().get("rec-a").await.unwrap();
        let stored_b = h.dispatcher.records().get("rec-b").await.unwrap();
        assert_eq!(stored_a.entity_key.as_deref(), Some(ra.entity_key.as_str()));
        assert_eq!(stored_b.entity_key.as_deref(), Some(rb.entity_key.as_str()));
        assert_ne!(stored_a.record.device_pub, stored_b.record.device_pub);
    }

    #[tokio::test]
    async fn identity_for_matches_derivation() {
        let h = harness();
        let (signer, signature) = signed(13, "who am i");
        let identity = h
            .dispatcher
            .identity_for(&Attestation {
                message: "who am i".into(),
                signature,
            })
            .await
            .unwrap();

        assert_eq!(
            identity.device_address,
            signer.address().to_string().to_ascii_lowercase()
        );
    }
}
