// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration elements for browsertest.

mod keep_browser;
mod retry;
mod tests_per_worker;
mod worker_count;

pub use keep_browser::*;
pub use retry::*;
pub use tests_per_worker::*;
pub use worker_count::*;
