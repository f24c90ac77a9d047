// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by browsertest.

use crate::{helpers::plural, list::BrowserId, reporter::EventName};
use browsertest_protocol::WorkerError;
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{error, fmt, sync::Arc};
use thiserror::Error;
use tokio::task::JoinError;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse browsertest config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    err: ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, err: ConfigError) -> Self {
        Self {
            config_file: config_file.into(),
            err,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }
}

/// An error which indicates that a browser was requested but isn't present in the config.
#[derive(Clone, Debug, Error)]
#[error("browser `{browser_id}` not found (known browsers: {})", .known.join(", "))]
pub struct BrowserNotConfigured {
    browser_id: BrowserId,
    known: Vec<String>,
}

impl BrowserNotConfigured {
    pub(crate) fn new(
        browser_id: BrowserId,
        known: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut known: Vec<_> = known.into_iter().map(|s| s.into()).collect();
        known.sort_unstable();
        Self { browser_id, known }
    }

    /// Returns the browser that was requested.
    pub fn browser_id(&self) -> &BrowserId {
        &self.browser_id
    }
}

/// Error returned while parsing a [`WorkerCount`](crate::config::elements::WorkerCount) value.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum WorkerCountParseError {
    /// At least one worker is needed to run tests.
    #[error("workers must not be 0")]
    Zero,

    /// The count doesn't fit in a `usize` on this platform.
    #[error("workers value {0} is out of range")]
    TooLarge(i64),

    /// A string other than `num-cpus`.
    #[error("unrecognized value for workers: {0:?} (expected an integer or \"num-cpus\")")]
    UnknownKeyword(String),
}

/// An error produced by a [`BrowserPool`](crate::session::BrowserPool).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum BrowserPoolError {
    /// The pool was cancelled and no longer hands out sessions.
    #[error("browser pool was cancelled")]
    Cancelled,

    /// Any other failure.
    #[error("{message}")]
    Other {
        /// A description of the failure.
        message: String,
    },
}

impl BrowserPoolError {
    /// Creates a new [`BrowserPoolError::Other`].
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// The reason a test attempt failed, stored in [`Test::err`](crate::list::Test::err).
#[derive(Clone, Debug, Error)]
pub enum TestError {
    /// No browser session could be acquired for the test.
    #[error("failed to acquire a browser session")]
    SessionAcquisition(#[source] BrowserPoolError),

    /// The worker ran the test and reported a failure.
    #[error(transparent)]
    Worker(WorkerError),

    /// The test could not be delivered to a worker, or its result could not be read back.
    #[error("error communicating with worker: {message}")]
    Transport {
        /// A description of the failure, including its causes.
        message: String,
    },

    /// The run was cancelled before the test could execute.
    #[error("test was cancelled before it ran")]
    Cancelled,
}

impl TestError {
    pub(crate) fn from_call_error(err: CallError) -> Self {
        match err {
            CallError::Remote(err) => Self::Worker(err),
            other => Self::Transport {
                message: DisplayErrorChain(&other).to_string(),
            },
        }
    }
}

/// An error that occurred while calling a method in a worker process.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CallError {
    /// The registry has ended and accepts no more calls.
    #[error("workers registry has ended")]
    RegistryEnded,

    /// The registry was cancelled and accepts no more calls.
    #[error("workers registry was cancelled")]
    Cancelled,

    /// The method was not registered for the module.
    #[error("method `{method}` is not registered for module `{module}`")]
    UnknownMethod {
        /// The module the method was called on.
        module: String,
        /// The method that was called.
        method: String,
    },

    /// The worker's pipe closed before it responded.
    #[error("worker{} disconnected before responding", DisplayPid(*.pid))]
    WorkerDisconnected {
        /// The worker's process id, if known.
        pid: Option<u32>,
    },

    /// The worker process exited before it responded.
    #[error("worker{} exited before responding", DisplayPid(*.pid))]
    WorkerExited {
        /// The worker's process id, if known.
        pid: Option<u32>,
    },

    /// A worker could not be spawned to handle the call.
    #[error(transparent)]
    Spawn(#[from] WorkerSpawnError),

    /// The call arguments could not be encoded.
    #[error("failed to encode call arguments")]
    Encode(#[source] serde_json::Error),

    /// The call result could not be decoded.
    #[error("failed to decode call result")]
    Decode(#[source] serde_json::Error),

    /// The method failed inside the worker.
    #[error("worker reported an error")]
    Remote(#[source] WorkerError),
}

struct DisplayPid(Option<u32>);

impl fmt::Display for DisplayPid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(pid) => write!(f, " (pid {pid})"),
            None => Ok(()),
        }
    }
}

/// An error that occurred while spawning a worker process.
#[derive(Debug, Error)]
#[error("failed to spawn worker `{program}`")]
pub struct WorkerSpawnError {
    program: String,
    #[source]
    err: std::io::Error,
}

impl WorkerSpawnError {
    /// Creates a new `WorkerSpawnError`.
    ///
    /// Public so that custom [`WorkerSpawner`](crate::workers::WorkerSpawner) implementations can
    /// report failures.
    pub fn new(program: impl Into<String>, err: std::io::Error) -> Self {
        Self {
            program: program.into(),
            err,
        }
    }
}

/// An error returned when adding an operation to a
/// [`CompletionGroup`](crate::runner::CompletionGroup) that was already fulfilled.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("completion group was already fulfilled and accepts no more operations")]
pub struct GroupSealedError;

/// An error returned by a [`RunnerListener`](crate::reporter::RunnerListener) while handling a
/// lifecycle event.
#[derive(Debug, Error)]
#[error("lifecycle event handler failed")]
pub struct ListenerError {
    #[source]
    err: Box<dyn error::Error + Send + Sync>,
}

impl ListenerError {
    /// Creates a new `ListenerError` wrapping `err`.
    pub fn new(err: impl Into<Box<dyn error::Error + Send + Sync>>) -> Self {
        Self { err: err.into() }
    }
}

/// An error returned by an [`Interceptor`](crate::runner::Interceptor).
#[derive(Debug, Error)]
#[error("event interceptor failed")]
pub struct InterceptError {
    #[source]
    err: Box<dyn error::Error + Send + Sync>,
}

impl InterceptError {
    /// Creates a new `InterceptError` wrapping `err`.
    pub fn new(err: impl Into<Box<dyn error::Error + Send + Sync>>) -> Self {
        Self { err: err.into() }
    }
}

/// An error carried by a [`RunnerEvent::Error`](crate::reporter::RunnerEvent::Error).
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum RunnerEventError {
    /// An event interceptor failed.
    #[error("interceptor for {event} failed")]
    Interceptor {
        /// The event the interceptor was registered for.
        event: EventName,

        /// The error the interceptor returned.
        #[source]
        error: Arc<InterceptError>,
    },

    /// A worker reported a rejection nobody handled.
    #[error("worker{} reported an unhandled rejection", DisplayPid(*.pid))]
    WorkerUnhandledRejection {
        /// The worker's process id, if known.
        pid: Option<u32>,

        /// The rejection reason.
        #[source]
        error: WorkerError,
    },
}

/// An error that occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] std::io::Error);

/// An error that caused a run to fail.
///
/// Test failures and cancellation are not errors: they are reported through events and
/// [`RunStats`](crate::reporter::RunStats).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// [`MainRunner::run`](crate::runner::MainRunner::run) was called more than once.
    #[error("this runner was already started")]
    AlreadyRunning,

    /// The signal handler could not be set up.
    #[error(transparent)]
    SignalHandlerSetup(#[from] SignalHandlerSetupError),

    /// The collection had tests for a browser missing from the configuration. Tests for other
    /// browsers still ran.
    #[error(transparent)]
    BrowserNotConfigured(#[from] BrowserNotConfigured),

    /// A `RUNNER_START` handler failed, so no tests were dispatched.
    #[error("RUNNER_START handler failed")]
    RunnerStart(#[source] ListenerError),

    /// A `RUNNER_END` handler failed.
    #[error("RUNNER_END handler failed")]
    RunnerEnd(#[source] ListenerError),

    /// One or more test tasks panicked.
    #[error(
        "{} test {} for browser `{browser_id}` panicked",
        .errors.len(),
        plural::tasks_str(.errors.len()),
    )]
    TaskPanicked {
        /// The browser whose tasks panicked.
        browser_id: BrowserId,
        /// The panics.
        errors: Vec<JoinError>,
    },
}

/// Displays an error along with its chain of sources.
pub(crate) struct DisplayErrorChain<'a>(pub(crate) &'a (dyn error::Error + 'static));

impl fmt::Display for DisplayErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}
