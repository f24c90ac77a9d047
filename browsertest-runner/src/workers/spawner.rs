// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::WorkerSpawnError;
use futures::{FutureExt, future::BoxFuture};
use std::{fmt, io, pin::Pin, process::Stdio};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    process::Command,
};
use tracing::{debug, warn};

/// The environment variable set for workers started in debug mode.
pub const WORKER_DEBUG_ENV: &str = "BROWSERTEST_WORKER_DEBUG";

/// Options passed to a [`WorkerSpawner`] for every worker it starts.
#[derive(Clone, Copy, Debug, Default)]
pub struct WorkerSpawnOptions {
    /// Start the worker so a debugger can be attached.
    pub debug: bool,
}

/// How a worker process exited.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WorkerExitStatus {
    /// The exit code, if the process exited normally.
    pub code: Option<i32>,

    /// The signal that terminated the process, on Unix.
    pub signal: Option<i32>,
}

impl WorkerExitStatus {
    /// Returns true if the worker exited with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for WorkerExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// The pipes and exit notification of a started worker.
pub struct WorkerChannel {
    /// The worker's process id, if it has one.
    pub pid: Option<u32>,

    /// Messages from the worker.
    pub reader: Pin<Box<dyn AsyncRead + Send>>,

    /// Messages to the worker. Closing this asks the worker to exit.
    pub writer: Pin<Box<dyn AsyncWrite + Send>>,

    /// Resolves once the worker has exited. Dropping it kills the worker.
    pub exit: BoxFuture<'static, WorkerExitStatus>,
}

impl fmt::Debug for WorkerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerChannel")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Starts worker processes.
pub trait WorkerSpawner: Send + Sync {
    /// Starts a new worker.
    ///
    /// Called from within a Tokio runtime.
    fn spawn(&self, opts: &WorkerSpawnOptions) -> Result<WorkerChannel, WorkerSpawnError>;
}

/// A [`WorkerSpawner`] that runs a program as a child process, talking to it over stdin and
/// stdout.
#[derive(Clone, Debug)]
pub struct ProcessSpawner {
    program: String,
    args: Vec<String>,
}

impl ProcessSpawner {
    /// Creates a new spawner for the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Adds arguments passed to every worker.
    pub fn args(&mut self, args: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn make_command(&self, opts: &WorkerSpawnOptions) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if opts.debug {
            cmd.arg("--debug").env(WORKER_DEBUG_ENV, "1");
        }
        cmd
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self, opts: &WorkerSpawnOptions) -> Result<WorkerChannel, WorkerSpawnError> {
        let mut child = self
            .make_command(opts)
            .spawn()
            .map_err(|err| WorkerSpawnError::new(&self.program, err))?;
        let pid = child.id();

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(WorkerSpawnError::new(
                &self.program,
                io::Error::other("worker pipes were not captured"),
            ));
        };
        debug!(program = %self.program, ?pid, debug = opts.debug, "spawned worker process");

        let exit = async move {
            match child.wait().await {
                Ok(status) => status.into(),
                Err(err) => {
                    warn!(?pid, "failed to wait for worker process: {err}");
                    WorkerExitStatus::default()
                }
            }
        }
        .boxed();

        Ok(WorkerChannel {
            pid,
            reader: Box::pin(stdout),
            writer: Box::pin(stdin),
            exit,
        })
    }
}
