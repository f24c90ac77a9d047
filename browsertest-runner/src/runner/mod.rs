// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test runner.
//!
//! The main structure in this module is [`MainRunner`]. It owns one [`BrowserRunner`] per browser,
//! each of which drives its tests through a [`TestRunner`].

mod browser_agent;
mod browser_runner;
mod completion_group;
mod insistant;
mod intercept;
mod main_runner;
mod regular;
mod skipped;
mod suite_monitor;
mod test_runner;

pub use browser_agent::*;
pub use browser_runner::*;
pub use completion_group::*;
pub use insistant::*;
pub use intercept::{Interception, Interceptor};
pub use main_runner::*;
pub use regular::*;
pub use skipped::*;
pub use suite_monitor::*;
pub use test_runner::*;
