// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The state of a browser session as tracked by the main process.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BrowserState {
    /// Whether the session is broken and must not be reused.
    #[serde(default)]
    pub is_broken: bool,

    /// Any other state the worker chose to report.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BrowserState {
    /// Applies a partial update to this state.
    ///
    /// Keys present in the patch overwrite keys present here; other keys are left alone.
    pub fn apply(&mut self, patch: &BrowserStatePatch) {
        if let Some(is_broken) = patch.is_broken {
            self.is_broken = is_broken;
        }
        for (key, value) in &patch.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }
}

/// A partial update to a [`BrowserState`], reported by a worker.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BrowserStatePatch {
    /// A new value for [`BrowserState::is_broken`], if it changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_broken: Option<bool>,

    /// Other keys to update.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BrowserStatePatch {
    /// Returns a patch that marks the session as broken.
    pub fn broken() -> Self {
        Self {
            is_broken: Some(true),
            extra: Map::new(),
        }
    }
}
