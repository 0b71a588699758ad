// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Pinata integration for pinning uploaded files to IPFS.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, StatusCode,
};
use serde_json::{json, Value};
use tracing::info;

use super::{PinningBackend, PinningError};
use crate::{config::PinataConfig, upload::UploadedFile};

const PIN_FILE_PATH: &str = "/pinning/pinFileToIPFS";

/// Characters of a non-JSON error body kept in the error message.
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Clone)]
pub struct PinataClient {
    api_base_url: String,
    jwt: String,
    http: Client,
}

impl PinataClient {
    pub fn new(config: &PinataConfig) -> Result<Self, PinningError> {
        if config.jwt.trim().is_empty() {
            return Err(PinningError::MissingConfig("PINATA_JWT".to_string()));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PinningError::Service(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base_url: config.api_url.trim_end_matches('/').to_string(),
            jwt: config.jwt.clone(),
            http,
        })
    }

    async fn pin_file(
        &self,
        file: &UploadedFile,
        metadata: &BTreeMap<String, String>,
    ) -> Result<String, PinningError> {
        let bytes = file.read().await?;

        let part = Part::bytes(bytes)
            .file_name(file.file_name().to_string())
            .mime_str(file.content_type())
            .map_err(|e| PinningError::Service(format!("invalid content type: {e}")))?;

        let form = Form::new()
            .part("file", part)
            .text(
                "pinataMetadata",
                build_pin_metadata(file.file_name(), metadata).to_string(),
            )
            .text("pinataOptions", json!({ "cidVersion": 1 }).to_string());

        let response = self
            .http
            .post(format!("{}{}", self.api_base_url, PIN_FILE_PATH))
            .header("Authorization", format!("Bearer {}", self.jwt))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PinningError::Service(format!("POST {PIN_FILE_PATH} failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            PinningError::Service(format!("failed to read {PIN_FILE_PATH} response: {e}"))
        })?;
        let cid = parse_pin_response(status, &body)?;

        info!(
            cid = %cid,
            file_name = %file.file_name(),
            size = file.size(),
            "Pinned uploaded file"
        );

        Ok(cid.to_string())
    }
}

#[async_trait]
impl PinningBackend for PinataClient {
    async fn pin(
        &self,
        file: &UploadedFile,
        metadata: &BTreeMap<String, String>,
    ) -> Result<String, PinningError> {
        self.pin_file(file, metadata).await
    }
}

/// Turn a `pinFileToIPFS` response into a CID or an error carrying the
/// service's own message.
fn parse_pin_response(status: StatusCode, body: &str) -> Result<String, PinningError> {
    let json: Option<Value> = serde_json::from_str(body).ok();

    if !status.is_success() {
        let message = match json.as_ref().and_then(extract_error_message) {
            Some(message) => message.to_string(),
            None if body.trim().is_empty() => "empty response body".to_string(),
            None => truncate(body.trim(), MAX_ERROR_BODY_CHARS),
        };
        return Err(PinningError::Service(format!(
            "POST {PIN_FILE_PATH} returned {status}: {message}"
        )));
    }

    json.as_ref()
        .and_then(extract_cid)
        .map(str::to_string)
        .ok_or_else(|| PinningError::Service("missing IpfsHash in pinning response".to_string()))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

fn build_pin_metadata(file_name: &str, keyvalues: &BTreeMap<String, String>) -> Value {
    json!({
        "name": file_name,
        "keyvalues": keyvalues,
    })
}

fn extract_cid(response: &Value) -> Option<&str> {
    response
        .get("IpfsHash")
        .and_then(Value::as_str)
        .filter(|cid| !cid.trim().is_empty())
}

/// Pinata reports errors either as a string or as `{reason, details}`.
fn extract_error_message(response: &Value) -> Option<&str> {
    let error = response.get("error")?;
    error
        .as_str()
        .or_else(|| error.get("details").and_then(Value::as_str))
        .or_else(|| error.get("reason").and_then(Value::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_cid_reads_ipfs_hash() {
        let body = json!({ "IpfsHash": "bafybeigdyrzt", "PinSize": 12 });
        assert_eq!(extract_cid(&body), Some("bafybeigdyrzt"));
        assert_eq!(extract_cid(&json!({ "IpfsHash": "" })), None);
        assert_eq!(extract_cid(&Value::Null), None);
    }

    #[test]
    fn extract_error_message_handles_both_shapes() {
        let plain = json!({ "error": "Invalid authentication" });
        assert_eq!(extract_error_message(&plain), Some("Invalid authentication"));

        let nested = json!({ "error": { "reason": "INVALID_FILE", "details": "file too large" } });
        assert_eq!(extract_error_message(&nested), Some("file too large"));

        let reason_only = json!({ "error": { "reason": "NO_SCOPES" } });
        assert_eq!(extract_error_message(&reason_only), Some("NO_SCOPES"));

        assert_eq!(extract_error_message(&json!({})), None);
    }

    #[test]
    fn pin_response_success_yields_cid() {
        let cid = parse_pin_response(StatusCode::OK, r#"{"IpfsHash":"bafy123","PinSize":3}"#);
        assert_eq!(cid.unwrap(), "bafy123");

        let err = parse_pin_response(StatusCode::OK, "<html>ok</html>").unwrap_err();
        assert!(err.to_string().contains("missing IpfsHash"));
    }

    #[test]
    fn pin_response_error_keeps_json_message() {
        let err = parse_pin_response(
            StatusCode::UNAUTHORIZED,
            r#"{"error":{"reason":"INVALID_CREDENTIALS","details":"bad jwt"}}"#,
        )
        .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("401"));
        assert!(text.contains("bad jwt"));
    }

    #[test]
    fn pin_response_error_keeps_plain_text_body() {
        let err = parse_pin_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "<html><body>413 Request Entity Too Large</body></html>",
        )
        .unwrap_err();
        assert!(err.to_string().contains("413 Request Entity Too Large"));

        let err = parse_pin_response(StatusCode::BAD_GATEWAY, "  ").unwrap_err();
        assert!(err.to_string().contains("empty response body"));
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(MAX_ERROR_BODY_CHARS * 2);
        let err = parse_pin_response(StatusCode::BAD_GATEWAY, &body).unwrap_err();
        let text = err.to_string();
        assert!(text.ends_with("..."));
        assert!(text.len() < body.len());
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("hi", 2), "hi");
    }

    #[test]
    fn pin_metadata_carries_keyvalues() {
        let mut keyvalues = BTreeMap::new();
        keyvalues.insert("nodeId".to_string(), "node-1".to_string());

        let metadata = build_pin_metadata("photo.jpg", &keyvalues);
        assert_eq!(metadata["name"], "photo.jpg");
        assert_eq!(metadata["keyvalues"]["nodeId"], "node-1");
    }

    #[test]
    fn new_requires_jwt() {
        let config = PinataConfig {
            api_url: "https://api.pinata.cloud".to_string(),
            jwt: "  ".to_string(),
        };
        assert!(matches!(
            PinataClient::new(&config),
            Err(PinningError::MissingConfig(_))
        ));
    }

    #[test]
    fn new_trims_trailing_slash() {
        let config = PinataConfig {
            api_url: "https://api.pinata.cloud/".to_string(),
            jwt: "token".to_string(),
        };
        let client = PinataClient::new(&config).unwrap();
        assert_eq!(client.api_base_url, "https://api.pinata.cloud");
    }
}
