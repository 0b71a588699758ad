// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ephemeral record log.
//!
//! Every dispatched record lands here, successful or not. The log is
//! append-only for the life of the process and is lost on restart. One
//! mutex guards the primary map, the anonymous-only index and the ids of
//! dispatches still in flight, and reads hand out copies so callers cannot
//! rewrite history.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use utoipa::ToSchema;

use crate::models::DeviceRecord;

/// Which backend a record was routed to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Ledger,
    Relay,
}

/// Terminal state of a dispatch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Completed,
    Failed,
}

/// A record as kept by the log.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    #[serde(flatten)]
    pub record: DeviceRecord,
    pub stored_at: DateTime<Utc>,
    pub is_anonymous: bool,
    pub route: Route,
    pub status: DispatchStatus,
    /// Error code of a failed dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Ledger entity key of a completed ledger dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_key: Option<String>,
}

impl StoredRecord {
    pub fn completed(record: DeviceRecord, route: Route) -> Self {
        Self {
            record,
            stored_at: Utc::now(),
            is_anonymous: route == Route::Relay,
            route,
            status: DispatchStatus::Completed,
            error_code: None,
            entity_key: None,
        }
    }

    pub fn failed(record: DeviceRecord, route: Route, error_code: impl Into<String>) -> Self {
        Self {
            status: DispatchStatus::Failed,
            error_code: Some(error_code.into()),
            ..Self::completed(record, route)
        }
    }

    pub fn with_entity_key(mut self, entity_key: impl Into<String>) -> Self {
        self.entity_key = Some(entity_key.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordLogError {
    #[error("Record {0} is already in the log")]
    Duplicate(String),
}

#[derive(Default)]
struct LogInner {
    records: HashMap<String, StoredRecord>,
    /// Insertion order of every id.
    order: Vec<String>,
    /// Insertion order of anonymous ids.
    anonymous: Vec<String>,
    /// Ids reserved by dispatches that have not been appended yet.
    pending: HashSet<String>,
}

/// Shared handle to the process-wide record log.
#[derive(Clone, Default)]
pub struct RecordLog {
    inner: Arc<Mutex<LogInner>>,
}

impl RecordLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id` for a dispatch about to start.
    ///
    /// Fails if the id is already logged or held by another dispatch. The
    /// claim is released by [`append`](Self::append) or [`release`](Self::release).
    pub async fn reserve(&self, id: &str) -> Result<(), RecordLogError> {
        let mut inner = self.inner.lock().await;
        if inner.records.contains_key(id) || !inner.pending.insert(id.to_string()) {
            return Err(RecordLogError::Duplicate(id.to_string()));
        }
        Ok(())
    }

    /// Drop a claim taken with [`reserve`](Self::reserve) without logging.
    pub async fn release(&self, id: &str) {
        self.inner.lock().await.pending.remove(id);
    }

    /// Append a record. Existing entries are never replaced.
    pub async fn append(&self, entry: StoredRecord) -> Result<(), RecordLogError> {
        let mut inner = self.inner.lock().await;
        let id = entry.id().to_string();

        if inner.records.contains_key(&id) {
            return Err(RecordLogError::Duplicate(id));
        }
        inner.pending.remove(&id);

        if entry.is_anonymous {
            inner.anonymous.push(id.clone());
        }
        inner.order.push(id.clone());
        inner.records.insert(id, entry);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<StoredRecord> {
        self.inner.lock().await.records.get(id).cloned()
    }

    /// Snapshot of every record in insertion order.
    pub async fn list(&self) -> Vec<StoredRecord> {
        let inner = self.inner.lock().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .cloned()
            .collect()
    }

    /// Snapshot of anonymous records in insertion order.
    pub async fn list_anonymous(&self) -> Vec<StoredRecord> {
        let inner = self.inner.lock().await;
        inner
            .anonymous
            .iter()
            .filter_map(|id| inner.records.get(id))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
