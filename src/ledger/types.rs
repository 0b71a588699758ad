// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger entity types and constants.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Content type of every published record payload.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Attribute key tagging the entity type.
pub const TYPE_ATTRIBUTE: &str = "type";

/// Entity type of device records.
pub const DEVICE_RECORD_TYPE: &str = "device_record";

/// A key/value annotation attached to an entity.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A create call as submitted to the ledger.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntity {
    /// Raw payload bytes, hex-encoded on the wire.
    #[serde(serialize_with = "serialize_hex")]
    pub payload: Vec<u8>,
    pub content_type: String,
    pub attributes: Vec<Attribute>,
    /// Time-to-live in seconds.
    pub ttl: u64,
}

fn serialize_hex<S: serde::Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&alloy::hex::encode_prefixed(bytes))
}

/// Result of a successful create call.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntityReceipt {
    pub entity_key: String,
    pub tx_hash: String,
}

/// An entity as returned by the ledger read API.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LedgerEntity {
    pub entity_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Hex-encoded payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    pub attributes: Vec<Attribute>,
    /// Expiration as a unix timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl LedgerEntity {
    /// Decode a JSON payload, if present and well-formed.
    pub fn payload_json(&self) -> Option<serde_json::Value> {
        let raw = alloy::hex::decode(self.payload.as_deref()?).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

/// Equality predicate over entity attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub key: String,
    pub value: String,
}

impl Predicate {
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Render predicates as a ledger query: `k = "v" && k2 = "v2"`.
pub fn render_query(predicates: &[Predicate]) -> String {
    predicates
        .iter()
        .map(|p| {
            let escaped = p.value.replace('\\', "\\\\").replace('"', "\\\"");
            format!("{} = \"{}\"", p.key, escaped)
        })
        .collect::<Vec<_>>()
        .join(" && ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_query_joins_and_escapes() {
        let query = render_query(&[
            Predicate::eq("type", "device_record"),
            Predicate::eq("devicePub", "say \"hi\""),
        ]);
        assert_eq!(query, r#"type = "device_record" && devicePub = "say \"hi\"""#);
        assert_eq!(render_query(&[]), "");
    }

    #[test]
    fn create_entity_serializes_payload_as_hex() {
        let create = CreateEntity {
            payload: b"{}".to_vec(),
            content_type: JSON_CONTENT_TYPE.to_string(),
            attributes: vec![Attribute::new("type", "device_record")],
            ttl: 60,
        };
        let value = serde_json::to_value(&create).unwrap();
        assert_eq!(value["payload"], "0x7b7d");
        assert_eq!(value["contentType"], "application/json");
        assert_eq!(value["attributes"][0]["key"], "type");
        assert_eq!(value["ttl"], 60);
    }

    #[test]
    fn ledger_entity_decodes_payload_and_attributes() {
        let entity: LedgerEntity = serde_json::from_value(serde_json::json!({
            "entityKey": "0x01",
            "payload": alloy::hex::encode_prefixed(br#"{"contentId":"bafy"}"#),
            "attributes": [{ "key": "nodeId", "value": "n1" }]
        }))
        .unwrap();

        assert_eq!(entity.payload_json().unwrap()["contentId"], "bafy");
        assert_eq!(entity.attribute("nodeId"), Some("n1"));
        assert_eq!(entity.attribute("missing"), None);
    }
}
