// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{errors::CallError, helpers::lock};
use browsertest_protocol::{CallId, MasterMessage};
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::{mpsc, oneshot};

pub(super) type CallResultSender = oneshot::Sender<Result<Value, CallError>>;
pub(super) type CallResultReceiver = oneshot::Receiver<Result<Value, CallError>>;

/// A handle to one worker process.
///
/// Handles are cheap to clone and stay valid after the worker exits; they then report
/// `is_connected() == false`.
#[derive(Clone)]
pub struct WorkerProcess {
    inner: Arc<ProcessInner>,
}

struct ProcessInner {
    pid: Option<u32>,
    connected: AtomicBool,
    retiring: AtomicBool,
    tx: Mutex<Option<mpsc::UnboundedSender<MasterMessage>>>,
    in_flight: Mutex<HashMap<CallId, CallResultSender>>,
}

impl WorkerProcess {
    pub(super) fn new(pid: Option<u32>, tx: mpsc::UnboundedSender<MasterMessage>) -> Self {
        Self {
            inner: Arc::new(ProcessInner {
                pid,
                connected: AtomicBool::new(true),
                retiring: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the worker's process id, if it has one.
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    /// Returns true until the worker's pipe closes or the worker exits.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Sends a message to the worker. Returns false if the worker is no longer connected.
    pub fn send(&self, message: MasterMessage) -> bool {
        if !self.is_connected() {
            return false;
        }
        match &*lock(&self.inner.tx) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Returns the number of calls waiting for a result from this worker.
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }

    pub(super) fn register_call(&self, call_id: CallId) -> CallResultReceiver {
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.in_flight).insert(call_id, tx);
        rx
    }

    /// Forgets a call without completing it.
    pub(super) fn unregister_call(&self, call_id: CallId) {
        lock(&self.inner.in_flight).remove(&call_id);
    }

    /// Completes a call. Returns false if the call was not in flight.
    pub(super) fn complete_call(&self, call_id: CallId, result: Result<Value, CallError>) -> bool {
        let (sender, now_idle) = {
            let mut in_flight = lock(&self.inner.in_flight);
            let sender = in_flight.remove(&call_id);
            (sender, in_flight.is_empty())
        };
        if now_idle && self.inner.retiring.load(Ordering::Acquire) {
            self.close();
        }
        match sender {
            Some(sender) => {
                // The caller may have stopped waiting; that's fine.
                _ = sender.send(result);
                true
            }
            None => false,
        }
    }

    /// Stops sending new calls to this worker and closes it once its calls finish.
    pub(super) fn retire(&self) {
        self.inner.retiring.store(true, Ordering::Release);
        if lock(&self.inner.in_flight).is_empty() {
            self.close();
        }
    }

    /// Closes the worker's input, which asks it to exit.
    pub(super) fn close(&self) {
        lock(&self.inner.tx).take();
    }

    /// Marks the worker disconnected and fails every call still in flight.
    pub(super) fn disconnect(&self, make_error: impl Fn() -> CallError) {
        self.inner.connected.store(false, Ordering::Release);
        self.close();
        let pending: Vec<_> = lock(&self.inner.in_flight).drain().collect();
        for (_, sender) in pending {
            _ = sender.send(Err(make_error()));
        }
    }
}

impl fmt::Debug for WorkerProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerProcess")
            .field("pid", &self.pid())
            .field("connected", &self.is_connected())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
