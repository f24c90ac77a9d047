// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end runs of [`MainRunner`](browsertest_runner::runner::MainRunner) against in-memory
//! workers speaking the worker protocol.

mod basic;
mod fixtures;
