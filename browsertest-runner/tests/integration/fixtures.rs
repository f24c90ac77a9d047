// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use browsertest_protocol::{
    CallOutcome, MasterMessage, MessageReader, RUN_TEST_METHOD, RunTestRequest, RunTestResponse,
    WorkerError, WorkerMessage, write_message,
};
use browsertest_runner::{
    config::core::Config,
    errors::{BrowserPoolError, ListenerError, WorkerSpawnError},
    list::{BrowserId, Suite, Test, TestCollection},
    reporter::{RunnerEvent, RunnerListener},
    session::{
        BrowserPool, BrowserPoolFactory, FreeBrowserOpts, GetBrowserOpts, PoolEvent,
        PoolEventSink, Session,
    },
    workers::{WorkerChannel, WorkerExitStatus, WorkerSpawnOptions, WorkerSpawner},
};
use futures::{FutureExt, future::BoxFuture};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, Once,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::{Notify, Semaphore, oneshot};

pub(crate) fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        _ = color_eyre::install();
        _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
            .try_init();
    });
}

/// Builds a collection from `(browser, title)` pairs, all in one suite per browser.
pub(crate) fn collection(tests: &[(&str, &str)]) -> TestCollection {
    let root = Suite::root("root");
    let suite = Suite::child(&root, "main", "main page");
    tests
        .iter()
        .map(|(browser, title)| Test::new(*title, "tests/main.js", suite.clone(), *browser))
        .collect()
}

pub(crate) fn config(browsers: &[&str], retry: usize) -> Config {
    let mut config = Config::default_config();
    for browser in browsers {
        config.add_browser(*browser).set_retry(retry);
    }
    config
}

// ---
// Browser pool
// ---

/// A pool that creates a fresh session for every request.
#[derive(Debug, Default)]
pub(crate) struct FakePoolFactory {
    capacity: Option<usize>,
    created: AtomicUsize,
    pool: Mutex<Option<Arc<FakePool>>>,
}

impl FakePoolFactory {
    /// Limits the number of sessions handed out at once.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            created: AtomicUsize::new(0),
            pool: Mutex::new(None),
        }
    }

    pub(crate) fn pool(&self) -> Arc<FakePool> {
        self.pool
            .lock()
            .unwrap()
            .clone()
            .expect("pool was created")
    }

    /// Returns the number of pools created.
    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl BrowserPoolFactory for FakePoolFactory {
    fn create(&self, _config: &Config, events: PoolEventSink) -> Arc<dyn BrowserPool> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let pool = Arc::new(FakePool {
            events,
            capacity: self.capacity.map(Semaphore::new),
            next_id: AtomicUsize::new(0),
            freed: Mutex::new(Vec::new()),
        });
        *self.pool.lock().unwrap() = Some(pool.clone());
        pool
    }
}

#[derive(Debug)]
pub(crate) struct FakePool {
    events: PoolEventSink,
    capacity: Option<Semaphore>,
    next_id: AtomicUsize,
    freed: Mutex<Vec<(String, bool)>>,
}

impl FakePool {
    /// Returns the freed session ids, with whether each was force-freed.
    pub(crate) fn freed(&self) -> Vec<(String, bool)> {
        self.freed.lock().unwrap().clone()
    }
}

impl BrowserPool for FakePool {
    fn get_browser<'a>(
        &'a self,
        browser_id: &'a BrowserId,
        _opts: GetBrowserOpts,
    ) -> BoxFuture<'a, Result<Session, BrowserPoolError>> {
        Box::pin(async move {
            if let Some(capacity) = &self.capacity {
                capacity
                    .acquire()
                    .await
                    .map_err(|_| BrowserPoolError::Cancelled)?
                    .forget();
            }
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let session = Session::new(browser_id.clone(), format!("{browser_id}-{n}"));
            self.events.emit(PoolEvent::SessionStart {
                browser_id: browser_id.clone(),
                session_id: session.session_id.clone(),
            });
            Ok(session)
        })
    }

    fn free_browser(
        &self,
        session: Session,
        opts: FreeBrowserOpts,
    ) -> BoxFuture<'_, Result<(), BrowserPoolError>> {
        Box::pin(async move {
            self.freed
                .lock()
                .unwrap()
                .push((session.session_id.to_string(), opts.force));
            if opts.force {
                self.events.emit(PoolEvent::SessionEnd {
                    browser_id: session.browser_id.clone(),
                    session_id: session.session_id.clone(),
                });
            }
            if let Some(capacity) = &self.capacity {
                capacity.add_permits(1);
            }
            Ok(())
        })
    }

    fn cancel(&self) {
        if let Some(capacity) = &self.capacity {
            capacity.close();
        }
    }
}

// ---
// Workers
// ---

type Behavior =
    dyn Fn(&RunTestRequest, usize) -> Result<RunTestResponse, WorkerError> + Send + Sync;

/// Starts in-memory workers that run tests with a closure.
///
/// The closure gets the request and the attempt number for that test, starting at 1.
pub(crate) struct FakeWorkerSpawner {
    behavior: Arc<Behavior>,
    attempts: Arc<Mutex<HashMap<String, usize>>>,
    spawned: AtomicUsize,
    gate: Option<Gate>,
    started: Arc<Notify>,
    reject_on_first_call: bool,
}

/// Holds tests until opened, either all of them or only the ones with a given title.
#[derive(Clone)]
struct Gate {
    semaphore: Arc<Semaphore>,
    title: Option<String>,
}

impl Gate {
    fn new(title: Option<String>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(0)),
            title,
        }
    }

    fn holds(&self, request: &RunTestRequest) -> bool {
        self.title
            .as_deref()
            .is_none_or(|title| request.full_title.ends_with(title))
    }
}

impl FakeWorkerSpawner {
    pub(crate) fn new(
        behavior: impl Fn(&RunTestRequest, usize) -> Result<RunTestResponse, WorkerError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            behavior: Arc::new(behavior),
            attempts: Arc::default(),
            spawned: AtomicUsize::new(0),
            gate: None,
            started: Arc::new(Notify::new()),
            reject_on_first_call: false,
        }
    }

    pub(crate) fn passing() -> Self {
        Self::new(|_, _| Ok(RunTestResponse::default()))
    }

    /// Holds every test until [`open_gate`](Self::open_gate) is called.
    pub(crate) fn gated(mut self) -> Self {
        self.gate = Some(Gate::new(None));
        self
    }

    /// Holds only the tests whose full title ends with `title` until the gate is opened.
    pub(crate) fn gated_on(mut self, title: &str) -> Self {
        self.gate = Some(Gate::new(Some(title.to_owned())));
        self
    }

    /// Makes each worker report an unhandled rejection before its first result.
    pub(crate) fn rejecting(mut self) -> Self {
        self.reject_on_first_call = true;
        self
    }

    pub(crate) fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.semaphore.add_permits(1);
        }
    }

    pub(crate) async fn wait_started(&self) {
        self.started.notified().await
    }

    pub(crate) fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub(crate) fn attempts(&self, title: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(title)
            .copied()
            .unwrap_or_default()
    }
}

impl WorkerSpawner for FakeWorkerSpawner {
    fn spawn(&self, _opts: &WorkerSpawnOptions) -> Result<WorkerChannel, WorkerSpawnError> {
        let n = self.spawned.fetch_add(1, Ordering::SeqCst) + 1;
        let (main_side, worker_side) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(main_side);
        let (exit_tx, exit_rx) = oneshot::channel();

        let worker = FakeWorker {
            behavior: self.behavior.clone(),
            attempts: self.attempts.clone(),
            gate: self.gate.clone(),
            started: self.started.clone(),
            reject_on_first_call: self.reject_on_first_call,
        };
        tokio::spawn(worker.run(worker_side, exit_tx));

        Ok(WorkerChannel {
            pid: Some(4000 + n as u32),
            reader: Box::pin(reader),
            writer: Box::pin(writer),
            exit: async move { exit_rx.await.unwrap_or_default() }.boxed(),
        })
    }
}

struct FakeWorker {
    behavior: Arc<Behavior>,
    attempts: Arc<Mutex<HashMap<String, usize>>>,
    gate: Option<Gate>,
    started: Arc<Notify>,
    reject_on_first_call: bool,
}

impl FakeWorker {
    async fn run(self, stream: tokio::io::DuplexStream, exit: oneshot::Sender<WorkerExitStatus>) {
        let (read, write) = tokio::io::split(stream);
        let write = Arc::new(tokio::sync::Mutex::new(write));
        let mut reader = MessageReader::new(read);
        send(&write, &WorkerMessage::WorkerInit).await;
        send(&write, &WorkerMessage::WorkerSyncConfig).await;

        let mut rejected = false;
        while let Ok(Some(message)) = reader.next_message::<MasterMessage>().await {
            let MasterMessage::Call {
                call_id,
                method,
                args,
                ..
            } = message
            else {
                continue;
            };
            if self.reject_on_first_call && !rejected {
                rejected = true;
                let error = WorkerError::new("Error", "unhandled rejection in test file");
                send(&write, &WorkerMessage::WorkerUnhandledRejection { error }).await;
            }

            // Calls run concurrently, like they would in a real worker.
            let behavior = self.behavior.clone();
            let attempts = self.attempts.clone();
            let gate = self.gate.clone();
            let started = self.started.clone();
            let write = write.clone();
            tokio::spawn(async move {
                let outcome = if method == RUN_TEST_METHOD {
                    let request: RunTestRequest =
                        serde_json::from_value(args).expect("valid runTest request");
                    if let Some(gate) = gate.filter(|gate| gate.holds(&request)) {
                        started.notify_one();
                        let _permit = gate
                            .semaphore
                            .acquire()
                            .await
                            .expect("gate is never closed");
                    }
                    let attempt = {
                        let mut attempts = attempts.lock().unwrap();
                        let attempt = attempts.entry(request.full_title.clone()).or_default();
                        *attempt += 1;
                        *attempt
                    };
                    send(
                        &write,
                        &WorkerMessage::FreeBrowser {
                            session_id: request.session_id.clone(),
                            state: None,
                        },
                    )
                    .await;
                    match behavior(&request, attempt) {
                        Ok(response) => CallOutcome::Ok {
                            value: serde_json::to_value(response).expect("response serializes"),
                        },
                        Err(error) => CallOutcome::Err { error },
                    }
                } else {
                    CallOutcome::Ok { value: Value::Null }
                };
                send(&write, &WorkerMessage::CallResult { call_id, outcome }).await;
            });
        }

        _ = exit.send(WorkerExitStatus {
            code: Some(0),
            signal: None,
        });
    }
}

async fn send(
    write: &tokio::sync::Mutex<tokio::io::WriteHalf<tokio::io::DuplexStream>>,
    message: &WorkerMessage,
) {
    let mut write = write.lock().await;
    // The main side may already be gone at the end of a run.
    _ = write_message(&mut *write, message).await;
}

// ---
// Listener
// ---

/// A recorded event: its name, and the test title or suite title it is about.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Recorded {
    pub(crate) name: &'static str,
    pub(crate) subject: Option<String>,
    pub(crate) retries_left: Option<usize>,
}

#[derive(Default)]
pub(crate) struct RecordingListener {
    events: Mutex<Vec<RunnerEvent>>,
    fail_runner_start: bool,
    on_event: Mutex<Option<Box<dyn Fn(&RunnerEvent) + Send + Sync>>>,
}

impl RecordingListener {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing_runner_start() -> Arc<Self> {
        Arc::new(Self {
            fail_runner_start: true,
            ..Default::default()
        })
    }

    /// Calls `f` for every event, after recording it.
    pub(crate) fn set_on_event(&self, f: impl Fn(&RunnerEvent) + Send + Sync + 'static) {
        *self.on_event.lock().unwrap() = Some(Box::new(f));
    }

    pub(crate) fn events(&self) -> Vec<RunnerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn recorded(&self) -> Vec<Recorded> {
        self.events()
            .iter()
            .map(|event| {
                let subject = match event {
                    RunnerEvent::SuiteBegin { suite, .. } | RunnerEvent::SuiteEnd { suite, .. } => {
                        Some(suite.title().to_owned())
                    }
                    other => other.test().map(|test| test.title.clone()),
                };
                let retries_left = match event {
                    RunnerEvent::Retry { retries_left, .. } => Some(*retries_left),
                    _ => None,
                };
                Recorded {
                    name: event.name().as_str(),
                    subject,
                    retries_left,
                }
            })
            .collect()
    }

    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.events()
            .iter()
            .map(|event| event.name().as_str())
            .collect()
    }

    /// Waits until an event named `name` about the test titled `title` was recorded.
    pub(crate) async fn wait_for(&self, name: &str, title: &str) {
        while !self.for_test(title).iter().any(|recorded| recorded.name == name) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Returns the events about the test titled `title`.
    pub(crate) fn for_test(&self, title: &str) -> Vec<Recorded> {
        self.recorded()
            .into_iter()
            .filter(|recorded| {
                recorded.name.starts_with("TEST_") || recorded.name == "RETRY"
            })
            .filter(|recorded| recorded.subject.as_deref() == Some(title))
            .collect()
    }
}

impl RunnerListener for RecordingListener {
    fn handle_event(&self, event: &RunnerEvent) {
        self.events.lock().unwrap().push(event.clone());
        if let Some(f) = &*self.on_event.lock().unwrap() {
            f(event);
        }
    }

    fn wait_event<'a>(
        &'a self,
        event: &'a RunnerEvent,
    ) -> BoxFuture<'a, Result<(), ListenerError>> {
        self.handle_event(event);
        let result = if self.fail_runner_start && matches!(event, RunnerEvent::RunnerStart) {
            Err(ListenerError::new("reporter could not open its output file"))
        } else {
            Ok(())
        };
        Box::pin(futures::future::ready(result))
    }
}

pub(crate) fn recorded(name: &'static str, subject: &str) -> Recorded {
    Recorded {
        name,
        subject: Some(subject.to_owned()),
        retries_left: None,
    }
}
