// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::list::{Suite, SuiteId, Test};
use std::{collections::HashMap, sync::Arc};

/// Turns per-test begin, end and retry notifications into suite begin and end notifications.
///
/// A suite ends once none of its tests is running and none is waiting for a retry. The root
/// suite is never announced.
#[derive(Debug, Default)]
pub struct SuiteMonitor {
    suites: HashMap<SuiteId, SuiteEntry>,
    /// Tests with a retry in flight, by full title.
    retries: HashMap<String, RetryStage>,
}

#[derive(Debug, Default)]
struct SuiteEntry {
    running: usize,
    awaiting_retry: usize,
}

impl SuiteEntry {
    fn is_finished(&self) -> bool {
        self.running == 0 && self.awaiting_retry == 0
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum RetryStage {
    /// The failed attempt has not ended yet.
    Requested,
    /// The failed attempt ended and the next one has not begun.
    Awaiting,
}

impl SuiteMonitor {
    /// Creates a new monitor with no suites in progress.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the start of a test attempt. Returns the suites that just started, outermost
    /// first.
    pub fn test_begin(&mut self, test: &Test) -> Vec<Arc<Suite>> {
        let was_awaiting = self.retries.remove(&test.full_title()) == Some(RetryStage::Awaiting);
        let mut started = Vec::new();
        for suite in non_root_ancestors(test) {
            let entry = self.suites.entry(suite.id().clone()).or_insert_with(|| {
                started.push(suite.clone());
                SuiteEntry::default()
            });
            entry.running += 1;
            if was_awaiting {
                entry.awaiting_retry = entry.awaiting_retry.saturating_sub(1);
            }
        }
        started.reverse();
        started
    }

    /// Records the end of a test attempt. Returns the suites that just finished, innermost first.
    ///
    /// An end for a test whose retry never began closes that retry without counting an attempt.
    pub fn test_end(&mut self, test: &Test) -> Vec<Arc<Suite>> {
        let key = test.full_title();
        let stage = self.retries.get(&key).copied();
        match stage {
            Some(RetryStage::Requested) => {
                self.retries.insert(key, RetryStage::Awaiting);
            }
            Some(RetryStage::Awaiting) => {
                self.retries.remove(&key);
            }
            None => {}
        }

        let mut finished = Vec::new();
        for suite in non_root_ancestors(test) {
            let Some(entry) = self.suites.get_mut(suite.id()) else {
                continue;
            };
            match stage {
                Some(RetryStage::Requested) => {
                    entry.running = entry.running.saturating_sub(1);
                    entry.awaiting_retry += 1;
                }
                Some(RetryStage::Awaiting) => {
                    entry.awaiting_retry = entry.awaiting_retry.saturating_sub(1);
                }
                None => entry.running = entry.running.saturating_sub(1),
            }
            if entry.is_finished() {
                self.suites.remove(suite.id());
                finished.push(suite.clone());
            }
        }
        finished
    }

    /// Records that a test attempt failed and will be retried, which keeps its suites open until
    /// the next attempt finishes.
    pub fn test_retry(&mut self, test: &Test) {
        self.retries.insert(test.full_title(), RetryStage::Requested);
    }

    /// Returns the number of suites with tests in progress.
    pub fn open_suites(&self) -> usize {
        self.suites.len()
    }
}

fn non_root_ancestors(test: &Test) -> impl Iterator<Item = &Arc<Suite>> {
    test.parent.ancestors().filter(|suite| !suite.is_root())
}
