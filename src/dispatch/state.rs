// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Dispatch lifecycle.
//!
//! ```text
//! Received -> Validating -> Routed(Ledger | Relay) -> Completed
//!                  |                 |
//!                  +-----> Failed <--+
//! ```

use std::fmt;

use tracing::debug;

use crate::store::Route;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Received,
    Validating,
    Routed(Route),
    Completed,
    Failed,
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: DispatchState) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Validating)
                | (Self::Validating, Self::Routed(_))
                | (Self::Validating, Self::Failed)
                | (Self::Routed(_), Self::Completed)
                | (Self::Routed(_), Self::Failed)
        )
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => f.write_str("received"),
            Self::Validating => f.write_str("validating"),
            Self::Routed(Route::Ledger) => f.write_str("routed(ledger)"),
            Self::Routed(Route::Relay) => f.write_str("routed(relay)"),
            Self::Completed => f.write_str("completed"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid dispatch transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: DispatchState,
    pub to: DispatchState,
}

/// Current state of one submission.
#[derive(Debug)]
pub struct DispatchTracker {
    record_id: Option<String>,
    state: DispatchState,
}

impl DispatchTracker {
    pub fn new() -> Self {
        Self {
            record_id: None,
            state: DispatchState::Received,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// The route taken, once routed.
    pub fn route(&self) -> Option<Route> {
        match self.state {
            DispatchState::Routed(route) => Some(route),
            _ => None,
        }
    }

    pub fn set_record_id(&mut self, record_id: &str) {
        self.record_id = Some(record_id.to_string());
    }

    pub fn advance(&mut self, next: DispatchState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        debug!(
            record_id = self.record_id.as_deref().unwrap_or("-"),
            from = %self.state,
            to = %next,
            "Dispatch state transition"
        );
        self.state = next;
        Ok(())
    }
}

impl Default for DispatchTracker {
    fn default() -> Self {
        Self::new()
    }
}
