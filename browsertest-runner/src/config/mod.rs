// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for browsertest.
//!
//! Configuration is read from TOML. The built-in [default
//! config](core::Config::DEFAULT_CONFIG) is layered under an optional user file, and each browser
//! in `[browsers]` inherits any key it doesn't set from `[browser-defaults]`.
//!
//! Per-browser configuration is handed to runners as a
//! [`LiveBrowserConfig`](core::LiveBrowserConfig):
//! a shared view that may be changed while a run is in progress. Runners re-read it at each
//! decision point.

pub mod core;
pub mod elements;
