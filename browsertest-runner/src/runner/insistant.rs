// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    BrowserAgent, HighPriorityBrowserAgent, RegularTestRunner, SessionProvider, TestEventSink,
    TestRunnerEvent,
};
use crate::{
    config::{core::LiveBrowserConfig, elements::RetryContext},
    helpers::lock,
    list::Test,
    workers::Workers,
};
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tracing::debug;

/// Runs a test, retrying failed attempts while the browser's retry budget and retry policy allow.
///
/// A failed attempt that is retried is reported as `RETRY` instead of `TEST_FAIL`. Retries acquire
/// their session with high priority.
#[derive(Debug)]
pub struct InsistantTestRunner {
    test: Test,
    config: LiveBrowserConfig,
    agent: Arc<BrowserAgent>,
    cancelled: AtomicBool,
    retries_performed: AtomicUsize,
    current: Mutex<Option<Arc<RegularTestRunner>>>,
}

impl InsistantTestRunner {
    /// Creates a new runner.
    pub fn new(test: Test, config: LiveBrowserConfig, agent: Arc<BrowserAgent>) -> Self {
        Self {
            test,
            config,
            agent,
            cancelled: AtomicBool::new(false),
            retries_performed: AtomicUsize::new(0),
            current: Mutex::new(None),
        }
    }

    /// Returns the test being run.
    pub fn test(&self) -> &Test {
        &self.test
    }

    /// Returns the number of retries started so far.
    pub fn retries_performed(&self) -> usize {
        self.retries_performed.load(Ordering::Acquire)
    }

    /// Requests cancellation. Returns true if the runner was not cancelled before.
    ///
    /// The current attempt stops before acquiring a session or calling a worker if it hasn't yet,
    /// and no further attempts are made.
    pub fn cancel(&self) -> bool {
        let current = lock(&self.current);
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(attempt) = &*current {
            attempt.cancel();
        }
        true
    }

    /// Returns true if the runner was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Runs the test until it passes or fails for good.
    ///
    /// If the runner is cancelled after a retry was announced but before the retry starts, the
    /// retry never begins: the last failure is reported as final, followed by its `TEST_END`.
    pub async fn run(&self, workers: &dyn Workers, sink: &TestEventSink<'_>) {
        let mut provider: Arc<dyn SessionProvider> = self.agent.clone();
        let mut retried: Option<Test> = None;
        loop {
            let attempt = Arc::new(RegularTestRunner::new(
                self.test.clone(),
                self.config.clone(),
                provider,
            ));
            let abandoned = {
                let mut current = lock(&self.current);
                match retried.take() {
                    // cancel() sets the flag under this lock, so a retry is either abandoned here
                    // or reachable by cancel() once installed.
                    Some(failed) if self.is_cancelled() => Some(failed),
                    _ => {
                        if self.is_cancelled() {
                            attempt.cancel();
                        }
                        *current = Some(attempt.clone());
                        None
                    }
                }
            };
            if let Some(failed) = abandoned {
                debug!(test = %failed.full_title(), "cancelled before retrying");
                sink(TestRunnerEvent::TestFail(failed.clone()));
                sink(TestRunnerEvent::TestEnd(failed));
                return;
            }

            let retry_of = Mutex::new(None);
            let attempt_sink = |event: TestRunnerEvent| match event {
                TestRunnerEvent::TestFail(test) => match self.retry_decision(&test) {
                    Some(retries_left) => {
                        *lock(&retry_of) = Some(test.clone());
                        sink(TestRunnerEvent::Retry { test, retries_left });
                    }
                    None => sink(TestRunnerEvent::TestFail(test)),
                },
                other => sink(other),
            };
            attempt.run(workers, &attempt_sink).await;
            lock(&self.current).take();

            retried = retry_of.into_inner().unwrap_or_else(PoisonError::into_inner);
            if retried.is_none() {
                return;
            }
            provider = Arc::new(HighPriorityBrowserAgent::new(self.agent.clone()));
        }
    }

    /// Decides whether a failed attempt is retried. Returns the retries left after the next
    /// attempt, or `None` if the failure is final.
    fn retry_decision(&self, test: &Test) -> Option<usize> {
        if self.is_cancelled() {
            return None;
        }

        // The retry count may change while the run is in progress, so read it afresh.
        let performed = self.retries_performed.load(Ordering::Acquire);
        let retries_left = self.config.retry().saturating_sub(performed);
        if retries_left == 0 {
            return None;
        }
        if test.has_only_no_ref_image_failures() {
            debug!(
                test = %test.full_title(),
                "not retrying: reference images are missing",
            );
            return None;
        }
        if !self.config.should_retry(&RetryContext {
            ctx: test,
            retries_left,
        }) {
            debug!(test = %test.full_title(), retries_left, "retry policy declined retry");
            return None;
        }

        self.retries_performed.fetch_add(1, Ordering::AcqRel);
        debug!(
            browser_id = %test.browser_id,
            test = %test.full_title(),
            retries_left = retries_left - 1,
            "retrying test",
        );
        Some(retries_left - 1)
    }
}
