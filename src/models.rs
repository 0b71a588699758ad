// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Record Data Models
//!
//! This module defines the device record exchanged with edge devices and
//! the draft form callers submit. All wire types use camelCase field names
//! and derive `ToSchema` for the OpenAPI document.
//!
//! ## Model Categories
//!
//! - **Drafts**: caller input, every field optional
//! - **Records**: a draft completed with generated defaults and validated

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Longest accepted free-text body.
pub const MAX_TEXT_CHARS: usize = 4096;

// =============================================================================
// Record Components
// =============================================================================

/// Geographic position reported by the device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

/// Storage capacity reported by the device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub free_bytes: u64,
    pub quota: u64,
}

// =============================================================================
// Device Record
// =============================================================================

/// A device record as published to the ledger or the relay.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Unique record identifier.
    pub id: String,
    /// Edge node that produced the record.
    pub node_id: String,
    /// Public identity of the device (address or anonymous placeholder).
    pub device_pub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageInfo>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub text: String,
    /// Content identifier of an attached file, once pinned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

/// Caller-supplied record; missing fields are filled in by [`RecordDraft::complete`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordDraft {
    pub id: Option<String>,
    pub node_id: Option<String>,
    pub device_pub: Option<String>,
    pub location: Option<Location>,
    pub last_seen: Option<DateTime<Utc>>,
    pub storage: Option<StorageInfo>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub text: Option<String>,
}

impl RecordDraft {
    /// Validate the draft and fill in generated defaults.
    ///
    /// `device_pub` is left empty when the caller omitted it; the router
    /// assigns it once the route is known.
    pub fn complete(self) -> Result<DeviceRecord, String> {
        if let Some(location) = &self.location {
            if !(-90.0..=90.0).contains(&location.lat) {
                return Err(format!("location.lat out of range: {}", location.lat));
            }
            if !(-180.0..=180.0).contains(&location.lon) {
                return Err(format!("location.lon out of range: {}", location.lon));
            }
        }

        if let Some(storage) = &self.storage {
            if storage.free_bytes > storage.quota {
                return Err("storage.freeBytes exceeds storage.quota".to_string());
            }
        }

        let mut tags = Vec::with_capacity(self.tags.len());
        for tag in self.tags {
            let tag = tag.trim().to_string();
            if tag.is_empty() {
                return Err("tags must not be empty".to_string());
            }
            if tag.contains(',') {
                return Err(format!("tag `{tag}` must not contain a comma"));
            }
            tags.push(tag);
        }

        let text = self.text.unwrap_or_default();
        if text.chars().count() > MAX_TEXT_CHARS {
            return Err(format!("text exceeds {MAX_TEXT_CHARS} characters"));
        }

        let id = non_blank(self.id).unwrap_or_else(|| Uuid::new_v4().to_string());
        let node_id = non_blank(self.node_id).unwrap_or_else(generate_node_id);

        Ok(DeviceRecord {
            id,
            node_id,
            device_pub: non_blank(self.device_pub).unwrap_or_default(),
            location: self.location,
            last_seen: self.last_seen.unwrap_or_else(Utc::now),
            storage: self.storage,
            tags,
            text,
            content_id: None,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn generate_node_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("node-{}", &hex[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_fills_defaults() {
        let record = RecordDraft::default().complete().unwrap();

        assert!(Uuid::parse_str(&record.id).is_ok());
        assert!(record.node_id.starts_with("node-"));
        assert_eq!(record.node_id.len(), 13);
        assert!(record.device_pub.is_empty());
        assert!(record.text.is_empty());
        assert!(record.content_id.is_none());
    }

    #[test]
    fn complete_keeps_caller_values() {
        let draft = RecordDraft {
            id: Some("rec-1".into()),
            node_id: Some("node-a".into()),
            device_pub: Some("0xabc".into()),
            location: Some(Location { lat: 52.5, lon: 13.4 }),
            tags: vec![" sensor ".into(), "berlin".into()],
            text: Some("hello".into()),
            ..Default::default()
        };
        let record = draft.complete().unwrap();

        assert_eq!(record.id, "rec-1");
        assert_eq!(record.node_id, "node-a");
        assert_eq!(record.device_pub, "0xabc");
        assert_eq!(record.tags, vec!["sensor", "berlin"]);
        assert_eq!(record.text, "hello");
    }

    #[test]
    fn complete_rejects_bad_input() {
        let bad_lat = RecordDraft {
            location: Some(Location { lat: 91.0, lon: 0.0 }),
            ..Default::default()
        };
        assert!(bad_lat.complete().is_err());

        let comma_tag = RecordDraft {
            tags: vec!["a,b".into()],
            ..Default::default()
        };
        assert!(comma_tag.complete().is_err());

        let over_quota = RecordDraft {
            storage: Some(StorageInfo {
                free_bytes: 10,
                quota: 5,
            }),
            ..Default::default()
        };
        assert!(over_quota.complete().is_err());

        let long_text = RecordDraft {
            text: Some("x".repeat(MAX_TEXT_CHARS + 1)),
            ..Default::default()
        };
        assert!(long_text.complete().is_err());
    }

    #[test]
    fn record_serializes_camel_case() {
        let record = RecordDraft {
            node_id: Some("n1".into()),
            storage: Some(StorageInfo {
                free_bytes: 1,
                quota: 2,
            }),
            ..Default::default()
        }
        .complete()
        .unwrap();

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["nodeId"], "n1");
        assert_eq!(value["storage"]["freeBytes"], 1);
        assert!(value.get("contentId").is_none());
        assert!(value.get("lastSeen").is_some());
    }
}
