// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{BrowserAgent, InsistantTestRunner, SkippedTestRunner};
use crate::{config::core::LiveBrowserConfig, list::Test, workers::Workers};
use std::sync::Arc;

/// An event produced while running a single test.
#[derive(Clone, Debug)]
pub enum TestRunnerEvent {
    /// An attempt started.
    TestBegin(Test),

    /// An attempt passed.
    TestPass(Test),

    /// The test failed and will not be retried.
    TestFail(Test),

    /// An attempt finished. Always follows the attempt's pass, fail or retry.
    TestEnd(Test),

    /// The test was skipped.
    TestPending(Test),

    /// An attempt failed and another one will follow.
    Retry {
        /// The failed attempt.
        test: Test,
        /// Retries remaining after the next attempt.
        retries_left: usize,
    },
}

impl TestRunnerEvent {
    /// Returns the test the event is about.
    pub fn test(&self) -> &Test {
        match self {
            Self::TestBegin(test)
            | Self::TestPass(test)
            | Self::TestFail(test)
            | Self::TestEnd(test)
            | Self::TestPending(test)
            | Self::Retry { test, .. } => test,
        }
    }
}

/// Receives the events of a running test.
pub type TestEventSink<'a> = dyn Fn(TestRunnerEvent) + Send + Sync + 'a;

/// Runs a single test from start to its final outcome.
#[derive(Debug)]
pub enum TestRunner {
    /// The test is pending or disabled and is not executed.
    Skipped(SkippedTestRunner),

    /// The test is executed, and retried on failure as configured.
    Insistant(InsistantTestRunner),
}

impl TestRunner {
    /// Creates the runner appropriate for `test`.
    pub fn create(test: Test, config: LiveBrowserConfig, agent: Arc<BrowserAgent>) -> Self {
        if test.pending || test.disabled {
            Self::Skipped(SkippedTestRunner::new(test))
        } else {
            Self::Insistant(InsistantTestRunner::new(test, config, agent))
        }
    }

    /// Returns the test being run.
    pub fn test(&self) -> &Test {
        match self {
            Self::Skipped(runner) => runner.test(),
            Self::Insistant(runner) => runner.test(),
        }
    }

    /// Runs the test, reporting events to `sink`.
    pub async fn run(&self, workers: &dyn Workers, sink: &TestEventSink<'_>) {
        match self {
            Self::Skipped(runner) => runner.run(sink),
            Self::Insistant(runner) => runner.run(workers, sink).await,
        }
    }

    /// Requests cancellation. Returns true if this call cancelled the runner, false if it was
    /// already cancelled or there is nothing to cancel.
    pub fn cancel(&self) -> bool {
        match self {
            Self::Skipped(_) => false,
            Self::Insistant(runner) => runner.cancel(),
        }
    }

    /// Returns true if the runner was cancelled.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Skipped(_) => false,
            Self::Insistant(runner) => runner.is_cancelled(),
        }
    }
}
