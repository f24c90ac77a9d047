// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events produced during a run, and the listeners that consume them.
//!
//! Formatting output is left to consumers of this crate: anything implementing
//! [`RunnerListener`] can be attached to a [`MainRunner`](crate::runner::MainRunner).

mod events;
mod stats;

use crate::errors::ListenerError;
pub use events::*;
use futures::future::BoxFuture;
pub use stats::*;

/// A consumer of [`RunnerEvent`]s.
pub trait RunnerListener: Send + Sync {
    /// Handles an event.
    ///
    /// Called for every event except the ones the runner waits on, which go to
    /// [`wait_event`](Self::wait_event) instead.
    fn handle_event(&self, event: &RunnerEvent);

    /// Handles `RUNNER_START` or `RUNNER_END`.
    ///
    /// The runner waits for the returned future of every listener before it continues. An error
    /// returned for `RUNNER_START` stops tests from being dispatched.
    ///
    /// The default implementation forwards to [`handle_event`](Self::handle_event) and succeeds.
    fn wait_event<'a>(
        &'a self,
        event: &'a RunnerEvent,
    ) -> BoxFuture<'a, Result<(), ListenerError>> {
        self.handle_event(event);
        Box::pin(futures::future::ready(Ok(())))
    }
}
