// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stub pools, workers and event sinks shared by unit tests.

use crate::{
    config::core::Config,
    errors::{BrowserPoolError, CallError, ConfigParseError},
    list::{BrowserId, SessionId},
    reporter::RunnerEvent,
    runner::TestRunnerEvent,
    session::{BrowserPool, FreeBrowserOpts, GetBrowserOpts, Session},
    workers::{FreeBrowserWaiters, FreeBrowserWatch, Workers},
};
use browsertest_protocol::{BrowserStatePatch, RunTestRequest, RunTestResponse};
use camino_tempfile::tempdir;
use futures::future::BoxFuture;
use smol_str::SmolStr;
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::{Notify, Semaphore};

/// Parses `contents` as a `browsertest.toml` file.
pub(crate) fn config_from_str(contents: &str) -> Result<Config, ConfigParseError> {
    let dir = tempdir().expect("created temp dir");
    let path = dir.path().join("browsertest.toml");
    std::fs::write(&path, contents).expect("wrote config file");
    Config::from_sources(Some(path.as_path()))
}

/// A call made against a [`StubPool`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PoolCall {
    Get {
        session_id: SessionId,
        version: Option<SmolStr>,
        high_priority: bool,
    },
    Free {
        session_id: SessionId,
        force: bool,
    },
}

/// An in-memory [`BrowserPool`].
///
/// Hands out scripted session ids first, then fresh `session-N` ids.
#[derive(Debug, Default)]
pub(crate) struct StubPool {
    script: Mutex<VecDeque<String>>,
    next_id: Mutex<usize>,
    capacity: Option<Semaphore>,
    fail_get: Mutex<Option<BrowserPoolError>>,
    fail_free: Mutex<Option<BrowserPoolError>>,
    cancelled: AtomicBool,
    calls: Mutex<Vec<PoolCall>>,
}

impl StubPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_script(mut self, script: Vec<String>) -> Self {
        self.script = Mutex::new(script.into());
        self
    }

    /// Limits the number of sessions handed out at once.
    pub(crate) fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(Semaphore::new(capacity));
        self
    }

    pub(crate) fn fail_next_get(&self, err: BrowserPoolError) {
        *self.fail_get.lock().unwrap() = Some(err);
    }

    pub(crate) fn fail_next_free(&self, err: BrowserPoolError) {
        *self.fail_free.lock().unwrap() = Some(err);
    }

    pub(crate) fn calls(&self) -> Vec<PoolCall> {
        self.calls.lock().unwrap().clone()
    }

    fn next_session_id(&self) -> SessionId {
        if let Some(id) = self.script.lock().unwrap().pop_front() {
            return id.into();
        }
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        format!("session-{next_id}").into()
    }
}

impl BrowserPool for StubPool {
    fn get_browser<'a>(
        &'a self,
        browser_id: &'a BrowserId,
        opts: GetBrowserOpts,
    ) -> BoxFuture<'a, Result<Session, BrowserPoolError>> {
        Box::pin(async move {
            if self.cancelled.load(Ordering::Acquire) {
                return Err(BrowserPoolError::Cancelled);
            }
            if let Some(err) = self.fail_get.lock().unwrap().take() {
                return Err(err);
            }
            if let Some(capacity) = &self.capacity {
                capacity
                    .acquire()
                    .await
                    .map_err(|_| BrowserPoolError::Cancelled)?
                    .forget();
            }

            let mut session = Session::new(browser_id.clone(), self.next_session_id());
            session.version = opts.version.clone();
            self.calls.lock().unwrap().push(PoolCall::Get {
                session_id: session.session_id.clone(),
                version: opts.version,
                high_priority: opts.high_priority,
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
            self.calls.lock().unwrap().push(PoolCall::Free {
                session_id: session.session_id,
                force: opts.force,
            });
            if let Some(capacity) = &self.capacity {
                capacity.add_permits(1);
            }
            match self.fail_free.lock().unwrap().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(capacity) = &self.capacity {
            capacity.close();
        }
    }
}

type RunTestScript = dyn Fn(&RunTestRequest) -> Result<RunTestResponse, CallError> + Send + Sync;

/// An in-memory [`Workers`] answering `runTest` calls from a closure.
pub(crate) struct StubWorkers {
    script: Arc<RunTestScript>,
    free_browser: Option<Option<BrowserStatePatch>>,
    waiters: FreeBrowserWaiters,
    requests: Arc<Mutex<Vec<RunTestRequest>>>,
    gate: Option<Arc<Semaphore>>,
    started: Arc<Notify>,
}

impl StubWorkers {
    pub(crate) fn new(
        script: impl Fn(&RunTestRequest) -> Result<RunTestResponse, CallError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            script: Arc::new(script),
            free_browser: None,
            waiters: FreeBrowserWaiters::new(),
            requests: Arc::default(),
            gate: None,
            started: Arc::new(Notify::new()),
        }
    }

    pub(crate) fn passing() -> Self {
        Self::new(|_| Ok(RunTestResponse::default()))
    }

    /// Sends a free-browser notification for every call's session before answering it.
    pub(crate) fn with_free_browser(mut self, state: Option<BrowserStatePatch>) -> Self {
        self.free_browser = Some(state);
        self
    }

    /// Holds every call until [`open_gate`](Self::open_gate) is called.
    pub(crate) fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub(crate) fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// Waits until a call has started.
    pub(crate) async fn wait_started(&self) {
        self.started.notified().await
    }

    pub(crate) fn requests(&self) -> Vec<RunTestRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn free_browser_waiters(&self) -> &FreeBrowserWaiters {
        &self.waiters
    }
}

impl Workers for StubWorkers {
    fn run_test(
        &self,
        request: RunTestRequest,
    ) -> BoxFuture<'static, Result<RunTestResponse, CallError>> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.script.clone();
        let free_browser = self.free_browser.clone();
        let waiters = self.waiters.clone();
        let gate = self.gate.clone();
        let started = self.started.clone();

        Box::pin(async move {
            started.notify_one();
            if let Some(gate) = gate {
                // The permit goes back on drop, so one opening releases every call.
                let _permit = gate.acquire().await.map_err(|_| CallError::Cancelled)?;
            }
            if let Some(state) = free_browser {
                waiters.notify(&SessionId::new(request.session_id.clone()), state);
            }
            script(&request)
        })
    }

    fn watch_free_browser(&self, session_id: &SessionId) -> FreeBrowserWatch {
        self.waiters.watch(session_id)
    }
}

/// Collects the events reported by a test runner.
#[derive(Clone, Debug, Default)]
pub(crate) struct EventRecorder {
    events: Arc<Mutex<Vec<TestRunnerEvent>>>,
}

impl EventRecorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn sink(&self) -> impl Fn(TestRunnerEvent) + Send + Sync + 'static {
        let events = self.events.clone();
        move |event| events.lock().unwrap().push(event)
    }

    pub(crate) fn events(&self) -> Vec<TestRunnerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.events()
            .into_iter()
            .map(|event| RunnerEvent::from(event).name().as_str())
            .collect()
    }
}
