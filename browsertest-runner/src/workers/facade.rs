// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::WorkersRegistry;
use crate::{errors::CallError, helpers::lock, list::SessionId};
use browsertest_protocol::{BrowserStatePatch, RUN_TEST_METHOD, RunTestRequest, RunTestResponse};
use futures::future::BoxFuture;
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};
use tokio::sync::oneshot;

/// The worker surface test runners call into.
pub trait Workers: Send + Sync {
    /// Runs a test inside a worker.
    fn run_test(
        &self,
        request: RunTestRequest,
    ) -> BoxFuture<'static, Result<RunTestResponse, CallError>>;

    /// Starts watching for the worker's notification that it is done with `session_id`.
    ///
    /// The watch must be created before the call that uses the session is made.
    fn watch_free_browser(&self, session_id: &SessionId) -> FreeBrowserWatch;
}

/// Routes free-browser notifications from workers to whoever is waiting for them, keyed by
/// session id.
#[derive(Clone, Debug, Default)]
pub struct FreeBrowserWaiters {
    inner: Arc<Mutex<WaitersInner>>,
}

#[derive(Debug, Default)]
struct WaitersInner {
    next_generation: u64,
    waiters: HashMap<SessionId, Waiter>,
}

#[derive(Debug)]
struct Waiter {
    generation: u64,
    tx: oneshot::Sender<Option<BrowserStatePatch>>,
}

impl FreeBrowserWaiters {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Watches for a notification about `session_id`, replacing any earlier watch for it.
    pub fn watch(&self, session_id: &SessionId) -> FreeBrowserWatch {
        let (tx, rx) = oneshot::channel();
        let mut inner = lock(&self.inner);
        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner
            .waiters
            .insert(session_id.clone(), Waiter { generation, tx });
        FreeBrowserWatch {
            rx,
            session_id: session_id.clone(),
            generation,
            waiters: self.clone(),
        }
    }

    /// Delivers a notification. Returns false if nobody was watching `session_id`.
    pub fn notify(&self, session_id: &SessionId, state: Option<BrowserStatePatch>) -> bool {
        let waiter = lock(&self.inner).waiters.remove(session_id);
        match waiter {
            Some(waiter) => waiter.tx.send(state).is_ok(),
            None => false,
        }
    }

    /// Returns the number of sessions being watched.
    pub fn len(&self) -> usize {
        lock(&self.inner).waiters.len()
    }

    /// Returns true if no sessions are being watched.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A pending free-browser notification for one session. Dropping it stops the watch.
#[derive(Debug)]
pub struct FreeBrowserWatch {
    rx: oneshot::Receiver<Option<BrowserStatePatch>>,
    session_id: SessionId,
    generation: u64,
    waiters: FreeBrowserWaiters,
}

impl FreeBrowserWatch {
    /// Returns the notification if it has arrived: `Some(patch)`, where the worker may or may not
    /// have reported a state patch.
    pub fn try_take(&mut self) -> Option<Option<BrowserStatePatch>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for FreeBrowserWatch {
    fn drop(&mut self) {
        let mut inner = lock(&self.waiters.inner);
        if inner
            .waiters
            .get(&self.session_id)
            .is_some_and(|waiter| waiter.generation == self.generation)
        {
            inner.waiters.remove(&self.session_id);
        }
    }
}

/// A set of methods registered with a [`WorkersRegistry`], for one module.
#[derive(Clone, Debug)]
pub struct RegisteredWorkers {
    registry: WorkersRegistry,
    module: String,
    methods: Arc<HashSet<String>>,
}

impl RegisteredWorkers {
    pub(super) fn new(
        registry: WorkersRegistry,
        module: String,
        methods: Arc<HashSet<String>>,
    ) -> Self {
        Self {
            registry,
            module,
            methods,
        }
    }

    /// Returns the module the methods belong to.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Calls a registered method in a worker.
    pub fn call(
        &self,
        method: &str,
        args: Value,
    ) -> BoxFuture<'static, Result<Value, CallError>> {
        if !self.methods.contains(method) {
            let err = CallError::UnknownMethod {
                module: self.module.clone(),
                method: method.to_owned(),
            };
            return Box::pin(futures::future::ready(Err(err)));
        }

        let registry = self.registry.clone();
        let module = self.module.clone();
        let method = method.to_owned();
        Box::pin(async move { registry.call(&module, &method, args).await })
    }
}

impl Workers for RegisteredWorkers {
    fn run_test(
        &self,
        request: RunTestRequest,
    ) -> BoxFuture<'static, Result<RunTestResponse, CallError>> {
        let args = match serde_json::to_value(&request) {
            Ok(args) => args,
            Err(err) => return Box::pin(futures::future::ready(Err(CallError::Encode(err)))),
        };
        let call = self.call(RUN_TEST_METHOD, args);
        Box::pin(async move {
            let value = call.await?;
            serde_json::from_value(value).map_err(CallError::Decode)
        })
    }

    fn watch_free_browser(&self, session_id: &SessionId) -> FreeBrowserWatch {
        self.registry.free_browser_waiters().watch(session_id)
    }
}
