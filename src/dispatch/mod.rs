// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Submission dispatch: route selection, lifecycle and error taxonomy.

pub mod router;
pub mod state;

pub use router::{
    choose_route, DispatchError, DispatchOutcome, Dispatcher, LedgerOutcome, RelayDispatch,
    RoutePlan, SubmitRecord, ANONYMOUS_DEVICE_PREFIX, PLACEHOLDER_DEVICE_ADDRESS,
};
pub use state::{DispatchState, DispatchTracker};
