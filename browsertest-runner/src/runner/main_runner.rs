// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{BrowserRunner, Interceptor, intercept::apply_interceptors};
use crate::{
    config::core::Config,
    errors::{BrowserNotConfigured, ListenerError, RunError},
    helpers::{lock, plural},
    list::{BrowserId, Test, TestCollection},
    reporter::{RunStats, RunnerEvent, RunnerListener},
    session::{BrowserPool, BrowserPoolFactory, PoolEventSink},
    signal::SignalHandlerKind,
    time::Stopwatch,
    workers::{RegistryEvent, WorkerSpawner, Workers, WorkersRegistry},
};
use browsertest_protocol::{CANCEL_METHOD, RUN_TEST_METHOD};
use debug_ignore::DebugIgnore;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::{
    Arc, Mutex, OnceLock,
    atomic::{AtomicBool, Ordering},
};
use tracing::{debug, info, warn};

/// The worker module that exposes the test execution methods.
pub const DEFAULT_WORKER_MODULE: &str = "browsertest/worker";

/// Builds a [`MainRunner`].
#[derive(Debug)]
pub struct MainRunnerBuilder {
    listeners: DebugIgnore<Vec<Arc<dyn RunnerListener>>>,
    interceptors: Vec<Interceptor>,
    runtime_config: Value,
    signal_handler: SignalHandlerKind,
    worker_module: String,
}

impl Default for MainRunnerBuilder {
    fn default() -> Self {
        Self {
            listeners: DebugIgnore(Vec::new()),
            interceptors: Vec::new(),
            runtime_config: Value::Object(Map::new()),
            signal_handler: SignalHandlerKind::Standard,
            worker_module: DEFAULT_WORKER_MODULE.to_owned(),
        }
    }
}

impl MainRunnerBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener that receives every event of the run.
    pub fn add_listener(&mut self, listener: Arc<dyn RunnerListener>) -> &mut Self {
        self.listeners.push(listener);
        self
    }

    /// Adds an interceptor for test and suite events. Interceptors run in the order added.
    pub fn add_interceptor(&mut self, interceptor: Interceptor) -> &mut Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Sets the runtime configuration sent to every worker when it starts.
    pub fn set_runtime_config(&mut self, runtime_config: Value) -> &mut Self {
        self.runtime_config = runtime_config;
        self
    }

    /// Sets the signal handler used while running.
    pub fn set_signal_handler(&mut self, signal_handler: SignalHandlerKind) -> &mut Self {
        self.signal_handler = signal_handler;
        self
    }

    /// Sets the worker module whose methods execute tests.
    pub fn set_worker_module(&mut self, module: impl Into<String>) -> &mut Self {
        self.worker_module = module.into();
        self
    }

    /// Creates the runner.
    pub fn build(
        self,
        config: Config,
        pool_factory: Arc<dyn BrowserPoolFactory>,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> MainRunner {
        MainRunner {
            inner: Arc::new(MainRunnerInner {
                config,
                pool_factory: DebugIgnore(pool_factory),
                spawner: DebugIgnore(spawner),
                runtime_config: self.runtime_config,
                signal_handler: self.signal_handler,
                worker_module: self.worker_module,
                dispatcher: Arc::new(Dispatcher {
                    listeners: self.listeners,
                    interceptors: self.interceptors,
                    stats: Mutex::new(RunStats::default()),
                }),
                pool: OnceLock::new(),
                started: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                run_state: Mutex::new(None),
            }),
        }
    }
}

/// Runs a collection of tests across browsers.
///
/// Each browser in the collection gets a [`BrowserRunner`]. All of them share one browser pool
/// and one [`WorkersRegistry`]. Clones share the same runner, so a clone can be used to
/// [`cancel`](Self::cancel) or [add tests to](Self::add_test_to_run) a run in progress.
#[derive(Clone, Debug)]
pub struct MainRunner {
    inner: Arc<MainRunnerInner>,
}

#[derive(Debug)]
struct MainRunnerInner {
    config: Config,
    pool_factory: DebugIgnore<Arc<dyn BrowserPoolFactory>>,
    spawner: DebugIgnore<Arc<dyn WorkerSpawner>>,
    runtime_config: Value,
    signal_handler: SignalHandlerKind,
    worker_module: String,
    dispatcher: Arc<Dispatcher>,
    pool: OnceLock<DebugIgnore<Arc<dyn BrowserPool>>>,
    started: AtomicBool,
    finished: AtomicBool,
    cancelled: AtomicBool,
    run_state: Mutex<Option<RunState>>,
}

#[derive(Debug)]
struct RunState {
    registry: WorkersRegistry,
    pool: DebugIgnore<Arc<dyn BrowserPool>>,
    /// The runner that takes new tests for each browser.
    browser_runners: IndexMap<BrowserId, BrowserRunner>,
    /// Every runner created during the run, in creation order. A browser's runner is replaced
    /// once all its tests finished, so this can hold several runners for the same browser.
    all_runners: Vec<BrowserRunner>,
    accepting: bool,
}

impl RunState {
    /// Returns the runner that takes new tests for `browser_id`, creating one if the browser
    /// has none or if its runner already finished.
    fn runner_for(
        &mut self,
        browser_id: &BrowserId,
        inner: &MainRunnerInner,
    ) -> Result<BrowserRunner, BrowserNotConfigured> {
        if let Some(runner) = self
            .browser_runners
            .get(browser_id)
            .filter(|runner| !runner.is_sealed())
        {
            return Ok(runner.clone());
        }

        let config = inner.config.for_browser(browser_id)?;
        let workers: Arc<dyn Workers> = Arc::new(self.registry.register(
            inner.worker_module.clone(),
            [RUN_TEST_METHOD, CANCEL_METHOD],
        ));
        let dispatcher = inner.dispatcher.clone();
        let runner = BrowserRunner::new(
            browser_id.clone(),
            config,
            self.pool.0.clone(),
            workers,
            move |event| dispatcher.emit_intercepted(event.into()),
        );
        let replaced = self
            .browser_runners
            .insert(browser_id.clone(), runner.clone())
            .is_some();
        debug!(%browser_id, replaced, "created browser runner");
        self.all_runners.push(runner.clone());
        Ok(runner)
    }
}

impl MainRunner {
    /// Creates the browser pool, if it wasn't created yet.
    ///
    /// [`run`](Self::run) calls this itself. Calling it earlier lets the pool start up while tests
    /// are still being collected.
    pub fn init(&self) {
        self.pool();
    }

    fn pool(&self) -> Arc<dyn BrowserPool> {
        let pool = self.inner.pool.get_or_init(|| {
            let dispatcher = self.inner.dispatcher.clone();
            let events = PoolEventSink::new(move |event| dispatcher.emit(event.into()));
            DebugIgnore(self.inner.pool_factory.create(&self.inner.config, events))
        });
        pool.0.clone()
    }

    /// Runs every test in `collection` and returns the final statistics.
    ///
    /// `RUNNER_START` listeners are waited on before any test is dispatched. `RUNNER_END` is
    /// emitted exactly once, even if `RUNNER_START` failed. Test failures and cancellation are
    /// reported through events and the returned stats, not as errors.
    ///
    /// A runner can only be run once.
    pub async fn run(&self, collection: TestCollection) -> Result<RunStats, RunError> {
        let mut signal_handler = self.inner.signal_handler.build()?;
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(RunError::AlreadyRunning);
        }
        let stopwatch = Stopwatch::start();

        let pool = self.pool();
        let registry = WorkersRegistry::new(
            &self.inner.config,
            self.inner.runtime_config.clone(),
            self.inner.spawner.0.clone(),
            {
                let dispatcher = self.inner.dispatcher.clone();
                move |event| {
                    dispatcher.emit(match event {
                        RegistryEvent::NewWorkerProcess(process) => {
                            RunnerEvent::NewWorkerProcess(process)
                        }
                        RegistryEvent::Error(err) => RunnerEvent::Error(err),
                    })
                }
            },
        );
        *lock(&self.inner.run_state) = Some(RunState {
            registry: registry.clone(),
            pool: DebugIgnore(pool),
            browser_runners: IndexMap::new(),
            all_runners: Vec::new(),
            accepting: true,
        });

        let signal_task = tokio::spawn({
            let this = self.clone();
            async move {
                while let Some(event) = signal_handler.recv().await {
                    if this.is_cancelled() {
                        info!(?event, "received signal while cancelling, ignoring");
                    } else {
                        info!(?event, "received signal, cancelling run");
                        this.cancel();
                    }
                }
            }
        });

        let dispatcher = &self.inner.dispatcher;
        let mut run_error = None;
        match dispatcher.emit_and_wait(RunnerEvent::RunnerStart).await {
            Ok(()) => {
                if !self.is_cancelled() {
                    registry.init();
                }
                dispatcher.emit(RunnerEvent::Begin);
                if let Err(err) = self.dispatch_collection(&collection) {
                    run_error = Some(err.into());
                }
                if let Err(err) = self.wait_browser_runners().await {
                    run_error.get_or_insert(err);
                }
                dispatcher.emit(RunnerEvent::End);
            }
            Err(err) => {
                warn!("RUNNER_START handler failed, not running tests");
                run_error = Some(RunError::RunnerStart(err));
                self.close_dispatch();
            }
        }

        let stats = dispatcher.stats();
        let end_result = dispatcher
            .emit_and_wait(RunnerEvent::RunnerEnd(stats))
            .await;
        registry.end().await;
        signal_task.abort();
        self.inner.finished.store(true, Ordering::Release);

        let lap = stopwatch.lap();
        debug!(
            start_time = %lap.start_time,
            end_time = %lap.end_time(),
            duration = ?lap.duration,
            total = stats.total,
            passed = stats.passed,
            failed = stats.failed,
            "run finished",
        );

        match (run_error, end_result) {
            (Some(err), _) => Err(err),
            (None, Err(err)) => Err(RunError::RunnerEnd(err)),
            (None, Ok(())) => Ok(stats),
        }
    }

    /// Adds a test to the run in progress, for `browser_id` or else the test's own browser.
    ///
    /// Returns false if the run hasn't started, has finished dispatching, or was cancelled, or if
    /// the browser isn't configured.
    pub fn add_test_to_run(&self, mut test: Test, browser_id: Option<BrowserId>) -> bool {
        if !self.is_running() || self.is_cancelled() {
            return false;
        }
        if let Some(browser_id) = browser_id {
            test.browser_id = browser_id;
        }
        match self.add_to_browser_runner(test) {
            Ok(added) => added,
            Err(err) => {
                warn!("not adding test: {err}");
                false
            }
        }
    }

    /// Cancels the run.
    ///
    /// Tests that haven't started are reported as failed without running, no attempt is retried,
    /// and pending session requests fail. Attempts already running in a worker are asked to stop
    /// but are allowed to report their result.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        let state = {
            let state = lock(&self.inner.run_state);
            state.as_ref().map(|state| {
                let runners = state.all_runners.clone();
                (state.registry.clone(), runners)
            })
        };
        let Some((registry, runners)) = state else {
            debug!("cancelled before the run started");
            return;
        };

        let cancelled: usize = runners.iter().map(BrowserRunner::cancel).sum();
        if let Some(pool) = self.inner.pool.get() {
            pool.cancel();
        }
        registry.cancel();
        info!(
            "cancelled {cancelled} running {}",
            plural::tests_str(cancelled)
        );
    }

    /// Returns true while [`run`](Self::run) is in progress.
    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::Acquire) && !self.inner.finished.load(Ordering::Acquire)
    }

    /// Returns true if [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    fn dispatch_collection(&self, collection: &TestCollection) -> Result<(), BrowserNotConfigured> {
        let mut first_error = None;
        for browser_id in collection.browsers() {
            let tests = collection.tests_for(browser_id);
            debug!(
                %browser_id,
                "dispatching {} {}",
                tests.len(),
                plural::tests_str(tests.len())
            );
            for test in tests {
                if let Err(err) = self.add_to_browser_runner(test.clone()) {
                    warn!("skipping tests: {err}");
                    first_error.get_or_insert(err);
                    break;
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn add_to_browser_runner(&self, test: Test) -> Result<bool, BrowserNotConfigured> {
        if self.is_cancelled() {
            return Ok(false);
        }

        loop {
            let runner = {
                let mut state = lock(&self.inner.run_state);
                let Some(state) = state.as_mut().filter(|state| state.accepting) else {
                    return Ok(false);
                };
                // cancel() sets the flag before it collects runners under this lock, so a
                // runner created past this check is seen by cancel().
                if self.is_cancelled() {
                    return Ok(false);
                }
                state.runner_for(&test.browser_id, &self.inner)?
            };

            if runner.add_test_to_run(test.clone()) {
                return Ok(true);
            }
            // The runner refuses the test if a concurrent cancel() reached it, or if its last
            // test finished since it was looked up. The latter gets a fresh runner.
            if runner.is_cancelled() || !runner.is_sealed() {
                return Ok(false);
            }
        }
    }

    /// Waits for every browser runner, including ones created while waiting.
    async fn wait_browser_runners(&self) -> Result<(), RunError> {
        let mut waited = 0;
        let mut first_error = None;
        loop {
            let runners: Vec<_> = {
                let mut state = lock(&self.inner.run_state);
                let Some(state) = state.as_mut() else {
                    break;
                };
                let runners: Vec<_> = state.all_runners[waited..].to_vec();
                if runners.is_empty() {
                    state.accepting = false;
                }
                runners
            };
            if runners.is_empty() {
                break;
            }
            waited += runners.len();

            let results = futures::future::join_all(runners.iter().map(|runner| async move {
                (runner.browser_id().clone(), runner.wait_tests_completion().await)
            }))
            .await;
            for (browser_id, result) in results {
                if let Err(errors) = result {
                    warn!(
                        %browser_id,
                        "{} test {} panicked",
                        errors.len(),
                        plural::tasks_str(errors.len()),
                    );
                    first_error.get_or_insert(RunError::TaskPanicked { browser_id, errors });
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn close_dispatch(&self) {
        if let Some(state) = lock(&self.inner.run_state).as_mut() {
            state.accepting = false;
        }
    }
}

/// Delivers events to listeners and keeps the run's statistics.
#[derive(Debug)]
struct Dispatcher {
    listeners: DebugIgnore<Vec<Arc<dyn RunnerListener>>>,
    interceptors: Vec<Interceptor>,
    stats: Mutex<RunStats>,
}

impl Dispatcher {
    fn emit(&self, event: RunnerEvent) {
        lock(&self.stats).on_event(&event);
        for listener in self.listeners.iter() {
            listener.handle_event(&event);
        }
    }

    fn emit_intercepted(&self, event: RunnerEvent) {
        if let Some(event) = apply_interceptors(event, &self.interceptors) {
            self.emit(event);
        }
    }

    /// Delivers a lifecycle event and waits for every listener to finish handling it.
    ///
    /// Returns the first error reported by a listener.
    async fn emit_and_wait(&self, event: RunnerEvent) -> Result<(), ListenerError> {
        lock(&self.stats).on_event(&event);
        let results = futures::future::join_all(
            self.listeners
                .iter()
                .map(|listener| listener.wait_event(&event)),
        )
        .await;
        results.into_iter().collect()
    }

    fn stats(&self) -> RunStats {
        *lock(&self.stats)
    }
}
