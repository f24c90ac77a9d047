// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core orchestration logic for browsertest.
//!
//! This crate takes a [`TestCollection`](list::TestCollection) of already-built tests, grouped by
//! browser, and runs them across a pool of worker processes and browser sessions:
//!
//! * [`runner::MainRunner`] is the entry point. It creates the browser pool and the
//!   [`WorkersRegistry`](workers::WorkersRegistry), fans tests out to one
//!   [`BrowserRunner`](runner::BrowserRunner) per browser, and reports a flat stream of
//!   [`RunnerEvent`](reporter::RunnerEvent)s to its listeners.
//! * Each test is driven by a [`TestRunner`](runner::TestRunner), which acquires a session,
//!   calls into a worker, and retries failures according to the browser's configuration.
//!
//! Parsing test files, creating browser sessions and reporting are handled elsewhere; this crate
//! consumes them through the [`session::BrowserPool`] and [`reporter::RunnerListener`] traits.

pub mod config;
pub mod errors;
mod helpers;
pub mod list;
pub mod reporter;
pub mod runner;
pub mod session;
pub mod signal;
#[cfg(test)]
mod test_helpers;
mod time;
pub mod workers;
