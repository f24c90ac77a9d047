// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    FreeBrowserWaiters, RegisteredWorkers, WorkerChannel, WorkerSpawnOptions, WorkerSpawner,
    process::WorkerProcess,
};
use crate::{
    config::core::Config,
    errors::{CallError, RunnerEventError},
    helpers::{lock, plural},
    list::SessionId,
};
use browsertest_protocol::{
    CallOutcome, MasterMessage, MessageReader, ProtocolError, WorkerMessage, write_message,
};
use camino::Utf8PathBuf;
use debug_ignore::DebugIgnore;
use serde_json::Value;
use smol_str::SmolStr;
use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    io::AsyncWriteExt,
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// How long [`WorkersRegistry::end`] waits for workers to exit before killing them.
const WORKER_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the channel returned by [`WorkersRegistry::subscribe`].
const WORKER_EVENT_CAPACITY: usize = 256;

/// Sizing of the worker pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PoolOptions {
    /// The maximum number of worker processes alive at once.
    pub max_concurrent_workers: usize,

    /// How many calls a worker handles before it is replaced, or `None` for no limit.
    pub max_calls_per_worker: Option<usize>,

    /// Start workers in debug mode.
    pub debug: bool,
}

impl PoolOptions {
    /// Computes pool options from the `[system]` configuration.
    ///
    /// Debug mode forces a single worker with no call limit.
    pub fn from_config(config: &Config) -> Self {
        if config.debug() {
            Self {
                max_concurrent_workers: 1,
                max_calls_per_worker: None,
                debug: true,
            }
        } else {
            Self {
                max_concurrent_workers: config.workers().compute().max(1),
                max_calls_per_worker: config.tests_per_worker().limit(),
                debug: false,
            }
        }
    }
}

/// A notification from a [`WorkersRegistry`].
#[derive(Clone, Debug)]
pub enum RegistryEvent {
    /// A worker process was started.
    NewWorkerProcess(WorkerProcess),

    /// A worker reported an error nobody handled.
    Error(RunnerEventError),
}

/// A free-form named event sent by a worker.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerEvent {
    /// The process id of the worker that sent the event.
    pub pid: Option<u32>,

    /// The event name.
    pub event: SmolStr,

    /// The event payload.
    pub data: Value,
}

/// Manages a pool of worker processes and dispatches remote calls to them.
///
/// Clones share the same pool.
#[derive(Clone, Debug)]
pub struct WorkersRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    options: PoolOptions,
    spawner: DebugIgnore<Arc<dyn WorkerSpawner>>,
    config_path: Option<Utf8PathBuf>,
    runtime_config: Value,
    config_snapshot: Value,
    events: DebugIgnore<Arc<dyn Fn(RegistryEvent) + Send + Sync>>,
    worker_events: broadcast::Sender<WorkerEvent>,
    free_browser: FreeBrowserWaiters,
    next_call_id: AtomicU64,
    cancelled: AtomicBool,
    ended: AtomicBool,
    state: Mutex<PoolState>,
}

#[derive(Debug, Default)]
struct PoolState {
    workers: Vec<WorkerSlot>,
    exit_handles: Vec<JoinHandle<()>>,
}

#[derive(Debug)]
struct WorkerSlot {
    process: WorkerProcess,
    calls: usize,
}

impl WorkersRegistry {
    /// Creates a new registry. No workers are started until [`init`](Self::init) or the first
    /// call.
    pub fn new(
        config: &Config,
        runtime_config: Value,
        spawner: Arc<dyn WorkerSpawner>,
        events: impl Fn(RegistryEvent) + Send + Sync + 'static,
    ) -> Self {
        let (worker_events, _) = broadcast::channel(WORKER_EVENT_CAPACITY);
        Self {
            inner: Arc::new(RegistryInner {
                options: PoolOptions::from_config(config),
                spawner: DebugIgnore(spawner),
                config_path: config.config_path().map(ToOwned::to_owned),
                runtime_config,
                config_snapshot: config.serialize_for_workers(),
                events: DebugIgnore(Arc::new(events)),
                worker_events,
                free_browser: FreeBrowserWaiters::new(),
                next_call_id: AtomicU64::new(0),
                cancelled: AtomicBool::new(false),
                ended: AtomicBool::new(false),
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Returns the pool sizing in use.
    pub fn options(&self) -> PoolOptions {
        self.inner.options
    }

    /// Starts the pool's workers up front, so that the first calls don't wait for them.
    ///
    /// Workers that fail to start are logged; calls will try to start them again. Does nothing
    /// once the registry is cancelled or ended.
    pub fn init(&self) {
        if self.is_cancelled() || self.is_ended() {
            return;
        }
        let mut new_workers = Vec::new();
        {
            let mut state = lock(&self.inner.state);
            while state.workers.len() < self.inner.options.max_concurrent_workers {
                match self.inner.start_worker(&mut state) {
                    Ok(process) => new_workers.push(process),
                    Err(err) => {
                        warn!("failed to start worker: {err}");
                        break;
                    }
                }
            }
        }
        debug!(
            "started {} {}",
            new_workers.len(),
            plural::workers_str(new_workers.len())
        );
        for process in new_workers {
            (self.inner.events)(RegistryEvent::NewWorkerProcess(process));
        }
    }

    /// Exposes `methods` from `module` as remote methods.
    pub fn register(
        &self,
        module: impl Into<String>,
        methods: impl IntoIterator<Item = impl Into<String>>,
    ) -> RegisteredWorkers {
        let methods: HashSet<String> = methods.into_iter().map(Into::into).collect();
        RegisteredWorkers::new(self.clone(), module.into(), Arc::new(methods))
    }

    /// Calls `method` from `module` in a worker, starting one if needed.
    pub async fn call(&self, module: &str, method: &str, args: Value) -> Result<Value, CallError> {
        let (rx, process, call_id) = self.inner.dispatch(module, method, args)?;
        match rx.await {
            Ok(result) => result,
            // The sender is only dropped without a result if the worker went away.
            Err(_) => {
                process.unregister_call(call_id);
                Err(CallError::WorkerDisconnected { pid: process.pid() })
            }
        }
    }

    /// Refuses new calls and asks every worker to stop the work it is doing.
    ///
    /// Calls already dispatched still complete with whatever the worker reports.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let state = lock(&self.inner.state);
        for slot in &state.workers {
            slot.process.send(MasterMessage::Cancel);
        }
    }

    /// Returns true if [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Shuts the pool down. Workers are asked to exit and killed if they don't do so in time.
    pub async fn end(&self) {
        if self.inner.ended.swap(true, Ordering::AcqRel) {
            return;
        }

        let (workers, mut exit_handles) = {
            let mut state = lock(&self.inner.state);
            (
                std::mem::take(&mut state.workers),
                std::mem::take(&mut state.exit_handles),
            )
        };
        for slot in &workers {
            slot.process.close();
        }

        let wait_all = futures::future::join_all(exit_handles.iter_mut());
        if tokio::time::timeout(WORKER_EXIT_TIMEOUT, wait_all)
            .await
            .is_err()
        {
            info!("workers did not exit in time, killing them");
            for handle in &exit_handles {
                handle.abort();
            }
        }
        for slot in &workers {
            slot.process.disconnect(|| CallError::RegistryEnded);
        }
    }

    /// Returns true once [`end`](Self::end) was called.
    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::Acquire)
    }

    /// Subscribes to free-form events sent by workers.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.inner.worker_events.subscribe()
    }

    /// Returns the worker processes currently in the pool.
    pub fn workers(&self) -> Vec<WorkerProcess> {
        lock(&self.inner.state)
            .workers
            .iter()
            .map(|slot| slot.process.clone())
            .collect()
    }

    pub(super) fn free_browser_waiters(&self) -> &FreeBrowserWaiters {
        &self.inner.free_browser
    }
}

type Dispatched = (super::process::CallResultReceiver, WorkerProcess, u64);

impl RegistryInner {
    fn dispatch(
        self: &Arc<Self>,
        module: &str,
        method: &str,
        args: Value,
    ) -> Result<Dispatched, CallError> {
        if self.ended.load(Ordering::Acquire) {
            return Err(CallError::RegistryEnded);
        }
        if self.cancelled.load(Ordering::Acquire) {
            return Err(CallError::Cancelled);
        }

        let mut new_worker = None;
        let dispatched = {
            let mut state = lock(&self.state);
            state.workers.retain(|slot| slot.process.is_connected());

            let least_loaded = state
                .workers
                .iter()
                .enumerate()
                .min_by_key(|(_, slot)| slot.process.in_flight())
                .map(|(index, slot)| (index, slot.process.in_flight()));
            let index = match least_loaded {
                Some((index, 0)) => index,
                Some((index, _)) if state.workers.len() >= self.options.max_concurrent_workers => {
                    index
                }
                _ => {
                    let process = self.start_worker(&mut state)?;
                    new_worker = Some(process);
                    state.workers.len() - 1
                }
            };

            let slot = &mut state.workers[index];
            slot.calls += 1;
            let process = slot.process.clone();
            let retire = self
                .options
                .max_calls_per_worker
                .is_some_and(|max| slot.calls >= max);
            if retire {
                debug!(pid = ?process.pid(), calls = slot.calls, "retiring worker");
                state.workers.remove(index);
            }

            let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
            let rx = process.register_call(call_id);
            let sent = process.send(MasterMessage::Call {
                call_id,
                module: module.to_owned(),
                method: method.to_owned(),
                args,
            });
            if retire {
                // Closes the worker once this call completes.
                process.retire();
            }
            if sent {
                debug!(pid = ?process.pid(), call_id, module, method, "dispatched call");
                Ok((rx, process, call_id))
            } else {
                process.unregister_call(call_id);
                Err(CallError::WorkerDisconnected { pid: process.pid() })
            }
        };

        if let Some(process) = new_worker {
            (self.events)(RegistryEvent::NewWorkerProcess(process));
        }
        dispatched
    }

    /// Starts a worker and adds it to the pool.
    fn start_worker(self: &Arc<Self>, state: &mut PoolState) -> Result<WorkerProcess, CallError> {
        let WorkerChannel {
            pid,
            reader,
            mut writer,
            exit,
        } = self.spawner.spawn(&WorkerSpawnOptions {
            debug: self.options.debug,
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<MasterMessage>();
        let process = WorkerProcess::new(pid, tx);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(err) = write_message(&mut writer, &message).await {
                    debug!(?pid, "failed to write to worker: {err}");
                    break;
                }
            }
            _ = writer.shutdown().await;
        });

        tokio::spawn({
            let this = self.clone();
            let process = process.clone();
            async move {
                let mut reader = MessageReader::new(reader);
                loop {
                    match reader.next_message::<WorkerMessage>().await {
                        Ok(Some(message)) => this.handle_message(&process, message),
                        Ok(None) => break,
                        Err(ProtocolError::Decode { line, source }) => {
                            warn!(
                                ?pid,
                                "ignoring malformed message from worker ({source}): {line}",
                            );
                        }
                        Err(err) => {
                            debug!(?pid, "failed to read from worker: {err}");
                            break;
                        }
                    }
                }
                process.disconnect(|| CallError::WorkerDisconnected { pid });
            }
        });

        let exit_handle = tokio::spawn({
            let this = self.clone();
            let process = process.clone();
            async move {
                let status = exit.await;
                if !status.success() && !this.ended.load(Ordering::Acquire) {
                    warn!(
                        ?pid,
                        code = ?status.code,
                        signal = ?status.signal,
                        "worker exited abnormally",
                    );
                }
                process.disconnect(|| CallError::WorkerExited { pid });
            }
        });

        debug!(?pid, "started worker");
        state.exit_handles.push(exit_handle);
        state.workers.push(WorkerSlot {
            process: process.clone(),
            calls: 0,
        });
        Ok(process)
    }

    fn handle_message(&self, process: &WorkerProcess, message: WorkerMessage) {
        match message {
            WorkerMessage::WorkerInit => {
                process.send(MasterMessage::MasterInit {
                    config_path: self.config_path.clone(),
                    runtime_config: self.runtime_config.clone(),
                });
            }
            WorkerMessage::WorkerSyncConfig => {
                process.send(MasterMessage::MasterSyncConfig {
                    config: self.config_snapshot.clone(),
                });
            }
            WorkerMessage::WorkerUnhandledRejection { error } => {
                (self.events)(RegistryEvent::Error(
                    RunnerEventError::WorkerUnhandledRejection {
                        pid: process.pid(),
                        error,
                    },
                ));
            }
            WorkerMessage::CallResult { call_id, outcome } => {
                let result = match outcome {
                    CallOutcome::Ok { value } => Ok(value),
                    CallOutcome::Err { error } => Err(CallError::Remote(error)),
                };
                if !process.complete_call(call_id, result) {
                    debug!(pid = ?process.pid(), call_id, "result for unknown call");
                }
            }
            WorkerMessage::FreeBrowser { session_id, state } => {
                let session_id = SessionId::new(session_id);
                if !self.free_browser.notify(&session_id, state) {
                    debug!(%session_id, "free-browser notification with no waiter");
                }
            }
            WorkerMessage::Event { event, data } => {
                // No subscribers is fine.
                _ = self.worker_events.send(WorkerEvent {
                    pid: process.pid(),
                    event,
                    data,
                });
            }
        }
    }
}
