// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{SessionProvider, TestEventSink, TestRunnerEvent};
use crate::{
    config::core::LiveBrowserConfig,
    errors::{CallError, TestError},
    list::Test,
    session::Session,
    time::Stopwatch,
    workers::Workers,
};
use browsertest_protocol::{RunTestRequest, RunTestResponse, WorkerError};
use debug_ignore::DebugIgnore;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::{debug, warn};

/// Runs one attempt of a test in a worker.
///
/// Every attempt reports `TEST_BEGIN`, then `TEST_PASS` or `TEST_FAIL`, then `TEST_END`, even if no
/// session could be acquired.
#[derive(Debug)]
pub struct RegularTestRunner {
    test: Test,
    config: LiveBrowserConfig,
    provider: DebugIgnore<Arc<dyn SessionProvider>>,
    cancelled: AtomicBool,
}

impl RegularTestRunner {
    /// Creates a runner for one attempt of `test`, acquiring its session through `provider`.
    pub fn new(test: Test, config: LiveBrowserConfig, provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            test,
            config,
            provider: DebugIgnore(provider),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Prevents the attempt from acquiring a session or calling a worker. An attempt that is
    /// already in a worker runs to completion.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Runs the attempt.
    pub async fn run(&self, workers: &dyn Workers, sink: &TestEventSink<'_>) {
        let mut test = self.test.clone();
        if self.is_cancelled() {
            report_failure_without_session(test, TestError::Cancelled, sink);
            return;
        }

        let mut session = match self.provider.get_browser().await {
            Ok(session) => session,
            Err(err) => {
                // Cancelling the run cancels the pool too, which fails pending acquisitions.
                let err = if self.is_cancelled() {
                    TestError::Cancelled
                } else {
                    TestError::SessionAcquisition(err)
                };
                report_failure_without_session(test, err, sink);
                return;
            }
        };
        test.session_id = Some(session.session_id.clone());
        if test.browser_version.is_none() {
            test.browser_version = session.version.clone();
        }
        sink(TestRunnerEvent::TestBegin(test.clone()));

        if self.is_cancelled() {
            test.err = Some(TestError::Cancelled);
            sink(TestRunnerEvent::TestFail(test.clone()));
            sink(TestRunnerEvent::TestEnd(test));
            self.release(session).await;
            return;
        }

        let mut free_browser = workers.watch_free_browser(&session.session_id);
        let request = RunTestRequest {
            full_title: test.full_title(),
            file: test.file.clone(),
            browser_id: test.browser_id.as_smol_str().clone(),
            browser_version: test.browser_version.clone(),
            session_id: session.session_id.as_smol_str().clone(),
            session_caps: session.capabilities.clone(),
            session_opts: session.session_opts.clone(),
            state: session.state.clone(),
        };

        let stopwatch = Stopwatch::start();
        let result = workers.run_test(request).await;
        let lap = stopwatch.lap();
        test.start_time = Some(lap.start_time);
        test.duration = Some(lap.duration);

        let failed = match result {
            Ok(response) => {
                apply_response(&mut test, &mut session, response);
                sink(TestRunnerEvent::TestPass(test.clone()));
                false
            }
            Err(err) => {
                if let CallError::Remote(worker_err) = &err {
                    apply_worker_error(&mut test, &mut session, worker_err);
                }
                test.err = Some(TestError::from_call_error(err));
                sink(TestRunnerEvent::TestFail(test.clone()));
                true
            }
        };
        sink(TestRunnerEvent::TestEnd(test));

        // Workers send the free-browser notification before the result of the call, so by now it
        // has either arrived or isn't coming.
        if let Some(Some(patch)) = free_browser.try_take() {
            session.apply_state(&patch);
        }
        drop(free_browser);

        if self.config.keep_browser_mode().keeps_session(failed) {
            debug!(
                browser_id = %session.browser_id,
                session_id = %session.session_id,
                "keeping browser session open",
            );
            return;
        }
        self.release(session).await;
    }

    async fn release(&self, session: Session) {
        let browser_id = session.browser_id.clone();
        let session_id = session.session_id.clone();
        if let Err(err) = self.provider.free_browser(session).await {
            warn!(%browser_id, %session_id, "failed to release browser session: {err}");
        }
    }
}

fn report_failure_without_session(mut test: Test, err: TestError, sink: &TestEventSink<'_>) {
    sink(TestRunnerEvent::TestBegin(test.clone()));
    test.err = Some(err);
    sink(TestRunnerEvent::TestFail(test.clone()));
    sink(TestRunnerEvent::TestEnd(test));
}

fn apply_response(test: &mut Test, session: &mut Session, response: RunTestResponse) {
    test.meta.extend(response.meta);
    test.context = response.context;
    test.history = response.history;
    test.assert_view_results = response.assert_view_results;
    if let Some(patch) = &response.browser_state {
        session.apply_state(patch);
    }
}

fn apply_worker_error(test: &mut Test, session: &mut Session, err: &WorkerError) {
    if let Some(meta) = &err.meta {
        test.meta.extend(meta.clone());
    }
    if let Some(context) = &err.context {
        test.context = Some(context.clone());
    }
    if let Some(history) = &err.history {
        test.history = history.clone();
    }
    test.assert_view_results = err.assert_view_results.clone();
    if let Some(patch) = &err.browser_state {
        session.apply_state(patch);
    }
}
