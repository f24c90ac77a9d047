// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{TestEventSink, TestRunnerEvent};
use crate::list::Test;

/// Reports a pending or disabled test without running it.
///
/// Disabled tests and tests skipped silently (directly or through a suite) produce no events.
#[derive(Debug)]
pub struct SkippedTestRunner {
    test: Test,
}

impl SkippedTestRunner {
    /// Creates a new runner.
    pub fn new(test: Test) -> Self {
        Self { test }
    }

    /// Returns the skipped test.
    pub fn test(&self) -> &Test {
        &self.test
    }

    /// Reports the test as pending.
    pub fn run(&self, sink: &TestEventSink<'_>) {
        if self.test.disabled || self.test.is_silently_skipped() {
            return;
        }
        sink(TestRunnerEvent::TestBegin(self.test.clone()));
        sink(TestRunnerEvent::TestPending(self.test.clone()));
        sink(TestRunnerEvent::TestEnd(self.test.clone()));
    }
}
