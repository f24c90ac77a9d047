// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for handling signals during a run.
//!
//! With the standard handler, the first interrupt or termination signal received while a run is
//! in progress cancels the run. Later signals are logged and otherwise ignored, so that the run can
//! still wind down and report `RUNNER_END`.

use crate::errors::SignalHandlerSetupError;

/// The kind of signal handling to set up for a run.
///
/// A `SignalHandlerKind` can be passed into
/// [`MainRunnerBuilder::set_signal_handler`](crate::runner::MainRunnerBuilder::set_signal_handler).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum SignalHandlerKind {
    /// Cancel the run on SIGINT, SIGTERM or SIGHUP on Unix, and on Ctrl-C on Windows.
    #[default]
    Standard,

    /// Don't listen to signals. Useful for tests and for embedders that handle signals
    /// themselves and call [`MainRunner::cancel`](crate::runner::MainRunner::cancel).
    Noop,
}

impl SignalHandlerKind {
    pub(crate) fn build(self) -> Result<SignalHandler, SignalHandlerSetupError> {
        let listeners = match self {
            Self::Standard => imp::listeners()?,
            Self::Noop => Vec::new(),
        };
        Ok(SignalHandler { listeners })
    }
}

/// A signal that cancels the run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum CancelSignal {
    Interrupt,
    #[cfg(unix)]
    Terminate,
    #[cfg(unix)]
    Hangup,
}

#[derive(Debug)]
pub(crate) struct SignalHandler {
    listeners: Vec<imp::Listener>,
}

impl SignalHandler {
    /// Waits for the next signal. Returns `None` once no more signals can arrive.
    pub(crate) async fn recv(&mut self) -> Option<CancelSignal> {
        while !self.listeners.is_empty() {
            let (received, index, _) = futures::future::select_all(
                self.listeners
                    .iter_mut()
                    .map(|listener| Box::pin(listener.recv())),
            )
            .await;
            match received {
                Some(signal) => return Some(signal),
                None => {
                    // This signal's stream is closed.
                    self.listeners.swap_remove(index);
                }
            }
        }
        None
    }
}

#[cfg(unix)]
mod imp {
    use super::CancelSignal;
    use tokio::signal::unix::{Signal, SignalKind, signal};

    #[derive(Debug)]
    pub(super) struct Listener {
        signal: CancelSignal,
        stream: Signal,
    }

    impl Listener {
        pub(super) async fn recv(&mut self) -> Option<CancelSignal> {
            self.stream.recv().await.map(|()| self.signal)
        }
    }

    pub(super) fn listeners() -> std::io::Result<Vec<Listener>> {
        [
            (CancelSignal::Interrupt, SignalKind::interrupt()),
            (CancelSignal::Terminate, SignalKind::terminate()),
            (CancelSignal::Hangup, SignalKind::hangup()),
        ]
        .into_iter()
        .map(|(cancel_signal, kind)| -> std::io::Result<Listener> {
            Ok(Listener {
                signal: cancel_signal,
                stream: signal(kind)?,
            })
        })
        .collect()
    }
}

#[cfg(windows)]
mod imp {
    use super::CancelSignal;
    use tokio::signal::windows::{CtrlC, ctrl_c};

    #[derive(Debug)]
    pub(super) struct Listener {
        stream: CtrlC,
    }

    impl Listener {
        pub(super) async fn recv(&mut self) -> Option<CancelSignal> {
            self.stream.recv().await.map(|()| CancelSignal::Interrupt)
        }
    }

    pub(super) fn listeners() -> std::io::Result<Vec<Listener>> {
        Ok(vec![Listener { stream: ctrl_c()? }])
    }
}
