// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::RunnerEvent;

/// Statistics for a run, passed to `RUNNER_END` and returned from
/// [`MainRunner::run`](crate::runner::MainRunner::run).
///
/// Statistics are computed from the events listeners actually received, so interceptors that
/// suppress or rewrite test events also change the counts.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct RunStats {
    /// The number of tests that finished: passed, failed for good, or skipped.
    pub total: usize,

    /// The number of tests that passed.
    pub passed: usize,

    /// The number of tests that failed after exhausting their retries.
    pub failed: usize,

    /// The number of tests that were skipped.
    pub skipped: usize,

    /// The number of retries performed across all tests.
    pub retries: usize,
}

impl RunStats {
    /// Returns true if any tests failed.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub(crate) fn on_event(&mut self, event: &RunnerEvent) {
        match event {
            RunnerEvent::TestPass(_) => {
                self.total += 1;
                self.passed += 1;
            }
            RunnerEvent::TestFail(_) => {
                self.total += 1;
                self.failed += 1;
            }
            RunnerEvent::TestPending(_) => {
                self.total += 1;
                self.skipped += 1;
            }
            RunnerEvent::Retry { .. } => {
                self.retries += 1;
            }
            _ => {}
        }
    }
}
