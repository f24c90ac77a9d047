// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{BrowserStatePatch, WorkerError};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;

/// Identifies an outstanding remote call.
pub type CallId = u64;

/// A message sent from the main process to a worker.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum MasterMessage {
    /// Reply to [`WorkerMessage::WorkerInit`].
    MasterInit {
        /// The path of the configuration file the main process loaded, if any.
        config_path: Option<Utf8PathBuf>,

        /// Runtime configuration shared by every worker.
        runtime_config: Value,
    },

    /// Reply to [`WorkerMessage::WorkerSyncConfig`].
    MasterSyncConfig {
        /// The serialized configuration.
        config: Value,
    },

    /// Execute `method` from `module` with `args`.
    Call {
        /// The id the worker must echo back in [`WorkerMessage::CallResult`].
        call_id: CallId,

        /// The module that exposes `method`.
        module: String,

        /// The method to call.
        method: String,

        /// Call arguments.
        args: Value,
    },

    /// The run was cancelled.
    Cancel,
}

/// A message sent from a worker to the main process.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum WorkerMessage {
    /// The worker started and wants the shared runtime configuration.
    WorkerInit,

    /// The worker wants the serialized configuration.
    WorkerSyncConfig,

    /// A promise was rejected inside the worker with nobody handling it.
    WorkerUnhandledRejection {
        /// The rejection reason.
        error: WorkerError,
    },

    /// The outcome of a [`MasterMessage::Call`].
    CallResult {
        /// The id of the call this result belongs to.
        call_id: CallId,

        /// The outcome.
        outcome: CallOutcome,
    },

    /// The worker is done with a browser session and the main process may release it.
    ///
    /// A worker sends this before the result of the call that used the session.
    FreeBrowser {
        /// The session that may be released.
        session_id: SmolStr,

        /// Changes to the session state to apply before releasing it.
        #[serde(default)]
        state: Option<BrowserStatePatch>,
    },

    /// A free-form named event.
    Event {
        /// The event name.
        event: SmolStr,

        /// The event payload.
        #[serde(default)]
        data: Value,
    },
}

/// The outcome of a remote call.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum CallOutcome {
    /// The call completed.
    Ok {
        /// The value the method returned.
        #[serde(default)]
        value: Value,
    },

    /// The call failed.
    Err {
        /// The error the method failed with.
        error: WorkerError,
    },
}
