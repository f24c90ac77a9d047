// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{BrowserAgent, CompletionGroup, SuiteMonitor, TestRunner, TestRunnerEvent};
use crate::{
    config::core::LiveBrowserConfig,
    helpers::lock,
    list::{BrowserId, Suite, Test},
    session::BrowserPool,
    workers::Workers,
};
use debug_ignore::DebugIgnore;
use indexmap::IndexMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use tokio::task::{JoinError, JoinHandle};

/// An event produced by a [`BrowserRunner`].
#[derive(Clone, Debug)]
pub enum BrowserRunnerEvent {
    /// An event from one of the runner's tests.
    Test(TestRunnerEvent),

    /// The first test in a suite started.
    SuiteBegin {
        /// The suite.
        suite: Arc<Suite>,
        /// The runner's browser.
        browser_id: BrowserId,
    },

    /// The last test in a suite finished.
    SuiteEnd {
        /// The suite.
        suite: Arc<Suite>,
        /// The runner's browser.
        browser_id: BrowserId,
    },
}

/// Runs all tests for one browser.
///
/// Tests start as soon as they are added, including after [`wait_tests_completion`] has begun
/// waiting. Clones share the same runner.
///
/// [`wait_tests_completion`]: Self::wait_tests_completion
#[derive(Clone, Debug)]
pub struct BrowserRunner {
    inner: Arc<BrowserRunnerInner>,
}

#[derive(Debug)]
struct BrowserRunnerInner {
    browser_id: BrowserId,
    config: LiveBrowserConfig,
    pool: DebugIgnore<Arc<dyn BrowserPool>>,
    workers: DebugIgnore<Arc<dyn Workers>>,
    sink: DebugIgnore<Arc<dyn Fn(BrowserRunnerEvent) + Send + Sync>>,
    suite_monitor: Mutex<SuiteMonitor>,
    group: CompletionGroup,
    cancelled: AtomicBool,
    state: Mutex<RunnerState>,
}

#[derive(Debug, Default)]
struct RunnerState {
    next_id: u64,
    active: IndexMap<u64, Arc<TestRunner>>,
    handles: Vec<JoinHandle<()>>,
}

impl BrowserRunner {
    /// Creates a new runner for `browser_id`, reporting events to `sink`.
    pub fn new(
        browser_id: BrowserId,
        config: LiveBrowserConfig,
        pool: Arc<dyn BrowserPool>,
        workers: Arc<dyn Workers>,
        sink: impl Fn(BrowserRunnerEvent) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(BrowserRunnerInner {
                browser_id,
                config,
                pool: DebugIgnore(pool),
                workers: DebugIgnore(workers),
                sink: DebugIgnore(Arc::new(sink)),
                suite_monitor: Mutex::new(SuiteMonitor::new()),
                group: CompletionGroup::new(),
                cancelled: AtomicBool::new(false),
                state: Mutex::new(RunnerState::default()),
            }),
        }
    }

    /// Returns the browser this runner runs tests for.
    pub fn browser_id(&self) -> &BrowserId {
        &self.inner.browser_id
    }

    /// Starts running `test` on a Tokio task.
    ///
    /// Returns false if the runner was cancelled, or if all its tests already finished and
    /// [`wait_tests_completion`](Self::wait_tests_completion) observed it.
    pub fn add_test_to_run(&self, test: Test) -> bool {
        if self.is_cancelled() {
            return false;
        }

        let agent = Arc::new(BrowserAgent::new(
            self.inner.browser_id.clone(),
            test.browser_version.clone(),
            self.inner.pool.0.clone(),
        ));
        let runner = Arc::new(TestRunner::create(test, self.inner.config.clone(), agent));

        let mut state = lock(&self.inner.state);
        // cancel() holds the state lock while it cancels active runners.
        if self.is_cancelled() {
            return false;
        }
        let id = state.next_id;
        let task = {
            let inner = self.inner.clone();
            let runner = runner.clone();
            async move {
                let sink = |event| inner.handle_test_event(event);
                runner.run(&**inner.workers, &sink).await;
                lock(&inner.state).active.shift_remove(&id);
            }
        };
        let Ok(tracked) = self.inner.group.add(task) else {
            return false;
        };

        state.next_id += 1;
        state.active.insert(id, runner);
        state.handles.push(tokio::spawn(tracked));
        true
    }

    /// Waits for every test added to this runner, including tests added during the wait.
    ///
    /// Returns the panics of any test tasks that panicked.
    pub async fn wait_tests_completion(&self) -> Result<(), Vec<JoinError>> {
        self.inner.group.done().await;

        let handles = std::mem::take(&mut lock(&self.inner.state).handles);
        let mut errors = Vec::new();
        for handle in handles {
            if let Err(err) = handle.await {
                errors.push(err);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Cancels every test that hasn't finished yet and refuses new tests.
    ///
    /// Returns the number of test runners cancelled by this call. Calling this more than once has
    /// no further effect.
    pub fn cancel(&self) -> usize {
        let state = lock(&self.inner.state);
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return 0;
        }
        state
            .active
            .values()
            .filter(|runner| runner.cancel())
            .count()
    }

    /// Returns true if [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Returns true if the runner's tests all finished and no more can be added.
    pub fn is_sealed(&self) -> bool {
        self.inner.group.is_sealed()
    }

    /// Returns the number of tests that have not finished yet.
    pub fn running_tests(&self) -> usize {
        lock(&self.inner.state).active.len()
    }
}

impl BrowserRunnerInner {
    fn emit(&self, event: BrowserRunnerEvent) {
        (self.sink)(event)
    }

    /// Forwards a test event, with suite events around it.
    ///
    /// Suite bookkeeping and emission happen under one lock so that suite events stay ordered
    /// with respect to the test events that caused them.
    fn handle_test_event(&self, event: TestRunnerEvent) {
        let mut monitor = lock(&self.suite_monitor);
        match &event {
            TestRunnerEvent::TestBegin(test) => {
                for suite in monitor.test_begin(test) {
                    self.emit(BrowserRunnerEvent::SuiteBegin {
                        suite,
                        browser_id: self.browser_id.clone(),
                    });
                }
                self.emit(BrowserRunnerEvent::Test(event));
            }
            TestRunnerEvent::TestEnd(test) => {
                let finished = monitor.test_end(test);
                self.emit(BrowserRunnerEvent::Test(event));
                for suite in finished {
                    self.emit(BrowserRunnerEvent::SuiteEnd {
                        suite,
                        browser_id: self.browser_id.clone(),
                    });
                }
            }
            TestRunnerEvent::Retry { test, .. } => {
                monitor.test_retry(test);
                self.emit(BrowserRunnerEvent::Test(event));
            }
            TestRunnerEvent::TestPass(_)
            | TestRunnerEvent::TestFail(_)
            | TestRunnerEvent::TestPending(_) => {
                self.emit(BrowserRunnerEvent::Test(event));
            }
        }
    }
}
