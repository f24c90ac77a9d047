// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::list::Test;
use std::{fmt, sync::Arc};

/// Information passed to a [`ShouldRetry`] policy when a test attempt fails.
#[derive(Clone, Copy, Debug)]
pub struct RetryContext<'a> {
    /// The failed attempt. The failure itself is in [`Test::err`].
    pub ctx: &'a Test,

    /// Retries still available for this test, counting the one being decided on.
    ///
    /// This is always at least 1: a test with no retries left is not offered to the policy.
    pub retries_left: usize,
}

/// A policy deciding whether a failed test gets another attempt.
///
/// The default policy retries for as long as retries remain.
#[derive(Clone)]
pub struct ShouldRetry {
    policy: Arc<dyn Fn(&RetryContext<'_>) -> bool + Send + Sync>,
}

impl ShouldRetry {
    /// Creates a new policy from a predicate.
    pub fn new(policy: impl Fn(&RetryContext<'_>) -> bool + Send + Sync + 'static) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    /// Returns true if the failed attempt described by `cx` should be retried.
    pub fn should_retry(&self, cx: &RetryContext<'_>) -> bool {
        (self.policy)(cx)
    }
}

impl Default for ShouldRetry {
    fn default() -> Self {
        Self::new(|_| true)
    }
}

impl fmt::Debug for ShouldRetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShouldRetry").finish_non_exhaustive()
    }
}
