// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{BrowserId, Test};
use indexmap::IndexMap;
use std::cmp::Ordering;

/// Tests to run, grouped by browser.
///
/// Browsers and the tests within each browser are iterated in insertion order unless
/// [`sort_tests`](Self::sort_tests) is called. Browsers without tests are never present.
#[derive(Clone, Debug, Default)]
pub struct TestCollection {
    tests: IndexMap<BrowserId, Vec<Test>>,
}

impl TestCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a test to the browser named by its [`Test::browser_id`].
    pub fn add_test(&mut self, test: Test) {
        self.tests
            .entry(test.browser_id.clone())
            .or_default()
            .push(test);
    }

    /// Returns the browsers that have tests, in insertion order.
    pub fn browsers(&self) -> impl ExactSizeIterator<Item = &BrowserId> {
        self.tests.keys()
    }

    /// Returns the tests for a browser.
    pub fn tests_for(&self, browser_id: &BrowserId) -> &[Test] {
        self.tests.get(browser_id).map_or(&[], Vec::as_slice)
    }

    /// Calls `f` for every test, browser by browser.
    pub fn each_test(&self, mut f: impl FnMut(&Test)) {
        self.tests.values().flatten().for_each(|test| f(test));
    }

    /// Calls `f` for every test along with its browser id and pinned browser version.
    pub fn each_test_across_browsers(&self, mut f: impl FnMut(&Test, &BrowserId, Option<&str>)) {
        for (browser_id, tests) in &self.tests {
            for test in tests {
                f(test, browser_id, test.browser_version.as_deref());
            }
        }
    }

    /// Sorts the tests for one browser with a comparator. The sort is stable.
    pub fn sort_tests(
        &mut self,
        browser_id: &BrowserId,
        cmp: impl FnMut(&Test, &Test) -> Ordering,
    ) {
        if let Some(tests) = self.tests.get_mut(browser_id) {
            tests.sort_by(cmp);
        }
    }

    /// Returns the total number of tests across all browsers.
    pub fn len(&self) -> usize {
        self.tests.values().map(Vec::len).sum()
    }

    /// Returns true if there are no tests.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

impl FromIterator<Test> for TestCollection {
    fn from_iter<I: IntoIterator<Item = Test>>(iter: I) -> Self {
        let mut collection = Self::new();
        for test in iter {
            collection.add_test(test);
        }
        collection
    }
}
