// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test model: suites, tests and collections of tests grouped by browser.
//!
//! Tests are built by an external reader and handed to the runner already finalized. Runners only
//! ever mutate clones of them, so that the results of one attempt never leak into the next.

mod collection;

pub use collection::*;
pub use test::*;
