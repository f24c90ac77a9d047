// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker process pool.
//!
//! Test bodies run in separate worker processes. The [`WorkersRegistry`] starts them through a
//! [`WorkerSpawner`], talks to them using the messages in [`browsertest_protocol`], and exposes
//! registered remote methods as [`RegisteredWorkers`].

mod facade;
mod process;
mod registry;
mod spawner;

pub use facade::*;
pub use process::WorkerProcess;
pub use registry::*;
pub use spawner::*;
