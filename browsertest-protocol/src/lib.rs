// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Messages exchanged between the browsertest main process and its worker processes.
//!
//! The main process and each worker talk over the worker's stdin and stdout. Every message is a
//! single JSON document on its own line:
//!
//! * [`MasterMessage`] flows from the main process to a worker.
//! * [`WorkerMessage`] flows from a worker to the main process.
//!
//! Remote calls carry their arguments and results as JSON values. The `runTest` call, which is the
//! one the orchestration core relies on, uses [`RunTestRequest`] and [`RunTestResponse`].

#![warn(missing_docs)]

mod errors;
mod framing;
mod messages;
mod state;

pub use errors::*;
pub use framing::*;
pub use messages::*;
pub use run_test::*;
pub use state::*;
