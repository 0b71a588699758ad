// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relay transcript parsing and outcome classification.
//!
//! The relay prints a line-oriented, labeled-field protocol on stdout and
//! stderr. It never exits on its own after a successful send and sometimes
//! exits non-zero anyway, so the outcome is decided from what the transcript
//! contains rather than from how the process ended.
//!
//! | Line | Effect |
//! |------|--------|
//! | `DMPUBKEY: <v>` | `peer_pub_key` |
//! | `DMTOKEN: <v>` | `peer_token` |
//! | `DMRECVPUBKEY: <v>` | `recipient_pub_key` |
//! | `DMRECVTOKEN: <v>` | `recipient_token` |
//! | `User ReceptionID: <v>` | `reception_id` |
//! | `Network Status: <bool>` | `network_up` (latches once `true`) |
//! | `DM Send: <id>, <round>, ...` | appends to `sent_message_ids` / `round_ids` |
//! | `... Message received ...` | increments `received_count` |
//! | `Received <n>/<m> messages` | sets `received_count = n` |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Fields extracted from a relay run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelayOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_pub_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_pub_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reception_id: Option<String>,
    pub sent_message_ids: Vec<String>,
    pub round_ids: Vec<u64>,
    pub received_count: u64,
    pub network_up: bool,
}

impl RelayOutcome {
    /// Whether any field that proves the relay did useful work was seen.
    pub fn has_delivery_evidence(&self) -> bool {
        self.peer_pub_key.is_some()
            || !self.sent_message_ids.is_empty()
            || self.reception_id.is_some()
    }
}

/// Everything captured from one relay run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayTranscript {
    /// Output lines, stdout and stderr combined.
    pub lines: Vec<String>,
    /// The bounded wait expired before the process exited.
    pub timed_out: bool,
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

impl RelayTranscript {
    pub fn from_output(output: &str, timed_out: bool, exit_code: Option<i32>) -> Self {
        Self {
            lines: output.lines().map(str::to_string).collect(),
            timed_out,
            exit_code,
            elapsed: Duration::ZERO,
        }
    }

    fn has_output(&self) -> bool {
        self.lines.iter().any(|l| !l.trim().is_empty())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("Relay timed out after {elapsed_secs}s without producing any usable output")]
    TimeoutNoData { elapsed_secs: u64 },

    #[error("Relay process failed: {0}")]
    Process(String),
}

/// Parse one output line into `outcome`.
pub fn apply_line(outcome: &mut RelayOutcome, raw: &str) {
    let line = raw.trim();

    if let Some(value) = field(line, "DMRECVPUBKEY:") {
        outcome.recipient_pub_key = Some(value);
    } else if let Some(value) = field(line, "DMRECVTOKEN:") {
        outcome.recipient_token = Some(value);
    } else if let Some(value) = field(line, "DMPUBKEY:") {
        outcome.peer_pub_key = Some(value);
    } else if let Some(value) = field(line, "DMTOKEN:") {
        outcome.peer_token = Some(value);
    } else if let Some(value) = field(line, "User ReceptionID:") {
        outcome.reception_id = Some(value);
    } else if let Some(value) = field(line, "Network Status:") {
        if value.eq_ignore_ascii_case("true") {
            outcome.network_up = true;
        }
    } else if let Some(rest) = line.strip_prefix("DM Send:") {
        if let Some((id, round)) = parse_dm_send(rest) {
            outcome.sent_message_ids.push(id);
            outcome.round_ids.push(round);
        }
    } else if let Some(count) = parse_received_summary(line) {
        outcome.received_count = count;
    } else if line.contains("Message received") {
        outcome.received_count += 1;
    }
}

/// Whether `line` carries any field [`apply_line`] understands.
pub fn is_labeled(line: &str) -> bool {
    let mut scratch = RelayOutcome::default();
    apply_line(&mut scratch, line);
    scratch != RelayOutcome::default()
}

/// Parse a whole transcript.
pub fn parse_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> RelayOutcome {
    let mut outcome = RelayOutcome::default();
    for line in lines {
        apply_line(&mut outcome, line);
    }
    outcome
}

/// Partial output counts as success.
///
/// Decides the outcome of a relay run from its transcript alone:
/// 1. any delivery evidence (peer key, sent message, reception id) is a
///    success, whatever the exit status and even after a timeout;
/// 2. otherwise a timeout is [`RelayError::TimeoutNoData`];
/// 3. otherwise the process exited without evidence and is a
///    [`RelayError::Process`], with or without output.
pub fn classify_transcript(transcript: &RelayTranscript) -> Result<RelayOutcome, RelayError> {
    let outcome = parse_lines(transcript.lines.iter().map(String::as_str));

    if outcome.has_delivery_evidence() {
        return Ok(outcome);
    }

    if transcript.timed_out {
        return Err(RelayError::TimeoutNoData {
            elapsed_secs: transcript.elapsed.as_secs(),
        });
    }

    let status = transcript
        .exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string());

    if !transcript.has_output() {
        return Err(RelayError::Process(format!(
            "exited ({status}) with no output"
        )));
    }

    let last = transcript
        .lines
        .iter()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim())
        .unwrap_or_default();
    Err(RelayError::Process(format!(
        "exited ({status}) without delivery evidence; last output: {last}"
    )))
}

fn field(line: &str, label: &str) -> Option<String> {
    line.strip_prefix(label)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `" <id>, <round>, ..."` → `(id, round)`.
fn parse_dm_send(rest: &str) -> Option<(String, u64)> {
    let mut parts = rest.split(',').map(str::trim);
    let id = parts.next().filter(|id| !id.is_empty())?;
    let round = parts.next()?.parse().ok()?;
    // The protocol terminates the round with a comma.
    parts.next()?;
    Some((id.to_string(), round))
}

/// `"Received <n>/<m> messages"` → `n`.
fn parse_received_summary(line: &str) -> Option<u64> {
    let rest = line.strip_prefix("Received ")?;
    let (counts, tail) = rest.split_once(' ')?;
    if !tail.trim_start().starts_with("messages") {
        return None;
    }
    let (received, expected) = counts.split_once('/')?;
    expected.parse::<u64>().ok()?;
    received.parse().ok()
}
