// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

/// Type for the `keep-browser-mode` config key.
///
/// When enabled, browser sessions are not released after their test finishes, so they can be
/// inspected.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct KeepBrowserMode {
    /// Whether sessions are kept at all.
    #[serde(default)]
    pub enabled: bool,

    /// If set together with `enabled`, only sessions that ran a failing test are kept.
    #[serde(default)]
    pub on_fail: bool,
}

impl KeepBrowserMode {
    /// Returns true if a session that ran a test with the given outcome should be kept open.
    pub fn keeps_session(self, test_failed: bool) -> bool {
        self.enabled && (!self.on_fail || test_failed)
    }
}
