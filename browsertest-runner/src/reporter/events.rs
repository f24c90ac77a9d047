// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::RunStats;
use crate::{
    errors::RunnerEventError,
    list::{BrowserId, SessionId, Suite, Test},
    runner::{BrowserRunnerEvent, TestRunnerEvent},
    session::PoolEvent,
    workers::WorkerProcess,
};
use std::{fmt, sync::Arc};

/// An event emitted by a [`MainRunner`](crate::runner::MainRunner).
///
/// Events are delivered to every [`RunnerListener`](super::RunnerListener), after passing through
/// any registered [`Interceptor`](crate::runner::Interceptor)s.
#[derive(Clone, Debug)]
pub enum RunnerEvent {
    /// The run is about to start. Listeners are waited on before any test is dispatched.
    RunnerStart,

    /// Tests are about to be dispatched.
    Begin,

    /// All dispatched tests have finished.
    End,

    /// The run is over. Listeners are waited on before the run returns.
    RunnerEnd(RunStats),

    /// A non-fatal error occurred.
    Error(RunnerEventError),

    /// A worker process was started.
    NewWorkerProcess(WorkerProcess),

    /// The browser pool started a session.
    SessionStart {
        /// The session's browser.
        browser_id: BrowserId,
        /// The new session.
        session_id: SessionId,
    },

    /// The browser pool ended a session.
    SessionEnd {
        /// The session's browser.
        browser_id: BrowserId,
        /// The ended session.
        session_id: SessionId,
    },

    /// A test attempt started.
    TestBegin(Test),

    /// A test attempt passed.
    TestPass(Test),

    /// A test failed for good: it will not be retried.
    TestFail(Test),

    /// A test attempt finished.
    TestEnd(Test),

    /// A test was skipped.
    TestPending(Test),

    /// A test attempt failed and the test will be run again.
    Retry {
        /// The failed attempt.
        test: Test,
        /// Retries remaining after the one about to start.
        retries_left: usize,
    },

    /// The first test in a suite started.
    SuiteBegin {
        /// The suite.
        suite: Arc<Suite>,
        /// The browser the suite's tests run in.
        browser_id: BrowserId,
    },

    /// The last test in a suite finished.
    SuiteEnd {
        /// The suite.
        suite: Arc<Suite>,
        /// The browser the suite's tests run in.
        browser_id: BrowserId,
    },
}

impl RunnerEvent {
    /// Returns the name of this event.
    pub fn name(&self) -> EventName {
        match self {
            Self::RunnerStart => EventName::RunnerStart,
            Self::Begin => EventName::Begin,
            Self::End => EventName::End,
            Self::RunnerEnd(_) => EventName::RunnerEnd,
            Self::Error(_) => EventName::Error,
            Self::NewWorkerProcess(_) => EventName::NewWorkerProcess,
            Self::SessionStart { .. } => EventName::SessionStart,
            Self::SessionEnd { .. } => EventName::SessionEnd,
            Self::TestBegin(_) => EventName::TestBegin,
            Self::TestPass(_) => EventName::TestPass,
            Self::TestFail(_) => EventName::TestFail,
            Self::TestEnd(_) => EventName::TestEnd,
            Self::TestPending(_) => EventName::TestPending,
            Self::Retry { .. } => EventName::Retry,
            Self::SuiteBegin { .. } => EventName::SuiteBegin,
            Self::SuiteEnd { .. } => EventName::SuiteEnd,
        }
    }

    /// Returns the test this event is about, if any.
    pub fn test(&self) -> Option<&Test> {
        match self {
            Self::TestBegin(test)
            | Self::TestPass(test)
            | Self::TestFail(test)
            | Self::TestEnd(test)
            | Self::TestPending(test)
            | Self::Retry { test, .. } => Some(test),
            _ => None,
        }
    }
}

impl From<TestRunnerEvent> for RunnerEvent {
    fn from(event: TestRunnerEvent) -> Self {
        match event {
            TestRunnerEvent::TestBegin(test) => Self::TestBegin(test),
            TestRunnerEvent::TestPass(test) => Self::TestPass(test),
            TestRunnerEvent::TestFail(test) => Self::TestFail(test),
            TestRunnerEvent::TestEnd(test) => Self::TestEnd(test),
            TestRunnerEvent::TestPending(test) => Self::TestPending(test),
            TestRunnerEvent::Retry { test, retries_left } => Self::Retry { test, retries_left },
        }
    }
}

impl From<BrowserRunnerEvent> for RunnerEvent {
    fn from(event: BrowserRunnerEvent) -> Self {
        match event {
            BrowserRunnerEvent::Test(event) => event.into(),
            BrowserRunnerEvent::SuiteBegin { suite, browser_id } => {
                Self::SuiteBegin { suite, browser_id }
            }
            BrowserRunnerEvent::SuiteEnd { suite, browser_id } => {
                Self::SuiteEnd { suite, browser_id }
            }
        }
    }
}

impl From<PoolEvent> for RunnerEvent {
    fn from(event: PoolEvent) -> Self {
        match event {
            PoolEvent::SessionStart {
                browser_id,
                session_id,
            } => Self::SessionStart {
                browser_id,
                session_id,
            },
            PoolEvent::SessionEnd {
                browser_id,
                session_id,
            } => Self::SessionEnd {
                browser_id,
                session_id,
            },
        }
    }
}

/// The name of a [`RunnerEvent`], without its payload.
///
/// Interceptors are registered by event name.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum EventName {
    /// [`RunnerEvent::RunnerStart`].
    RunnerStart,
    /// [`RunnerEvent::Begin`].
    Begin,
    /// [`RunnerEvent::End`].
    End,
    /// [`RunnerEvent::RunnerEnd`].
    RunnerEnd,
    /// [`RunnerEvent::Error`].
    Error,
    /// [`RunnerEvent::NewWorkerProcess`].
    NewWorkerProcess,
    /// [`RunnerEvent::SessionStart`].
    SessionStart,
    /// [`RunnerEvent::SessionEnd`].
    SessionEnd,
    /// [`RunnerEvent::TestBegin`].
    TestBegin,
    /// [`RunnerEvent::TestPass`].
    TestPass,
    /// [`RunnerEvent::TestFail`].
    TestFail,
    /// [`RunnerEvent::TestEnd`].
    TestEnd,
    /// [`RunnerEvent::TestPending`].
    TestPending,
    /// [`RunnerEvent::Retry`].
    Retry,
    /// [`RunnerEvent::SuiteBegin`].
    SuiteBegin,
    /// [`RunnerEvent::SuiteEnd`].
    SuiteEnd,
}

impl EventName {
    /// Returns the wire name of this event, for example `TEST_BEGIN`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RunnerStart => "RUNNER_START",
            Self::Begin => "BEGIN",
            Self::End => "END",
            Self::RunnerEnd => "RUNNER_END",
            Self::Error => "ERROR",
            Self::NewWorkerProcess => "NEW_WORKER_PROCESS",
            Self::SessionStart => "SESSION_START",
            Self::SessionEnd => "SESSION_END",
            Self::TestBegin => "TEST_BEGIN",
            Self::TestPass => "TEST_PASS",
            Self::TestFail => "TEST_FAIL",
            Self::TestEnd => "TEST_END",
            Self::TestPending => "TEST_PENDING",
            Self::Retry => "RETRY",
            Self::SuiteBegin => "SUITE_BEGIN",
            Self::SuiteEnd => "SUITE_END",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
