// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{AssertViewResult, BrowserStatePatch};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// An error reported by a worker process.
///
/// Besides the error itself, a failed test run carries whatever the worker managed to collect
/// before failing, so that the main process can enrich the failing test with it.
#[derive(Clone, Debug, Default, Error, Deserialize, Serialize, PartialEq)]
#[error("{name}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct WorkerError {
    /// The kind of error, for example `"TimeoutError"`.
    #[serde(default = "default_error_name")]
    pub name: String,

    /// A human-readable message.
    #[serde(default)]
    pub message: String,

    /// A stack trace from the worker, if available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,

    /// Test metadata collected before the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,

    /// Test context collected before the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// Command history collected before the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Value>>,

    /// Results of the visual assertions that ran before the failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assert_view_results: Vec<AssertViewResult>,

    /// Changes to the browser session state observed by the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_state: Option<BrowserStatePatch>,
}

impl WorkerError {
    /// Creates a new `WorkerError` with the given name and message and no enrichment.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            ..Default::default()
        }
    }
}

fn default_error_name() -> String {
    "Error".to_owned()
}

/// An error that occurred while reading or writing protocol messages.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Reading from or writing to the pipe failed.
    #[error("I/O error on worker pipe")]
    Io(#[from] std::io::Error),

    /// A message could not be serialized.
    #[error("failed to encode message")]
    Encode(#[source] serde_json::Error),

    /// A line could not be decoded as a message.
    #[error("failed to decode message from line `{line}`")]
    Decode {
        /// The line that failed to decode.
        line: String,

        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },
}
