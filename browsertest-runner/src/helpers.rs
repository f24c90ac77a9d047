// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for browsertest-runner.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Utilities for pluralizing various words based on count.
pub(crate) mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub(crate) fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "task" if `count` is 1, otherwise "tasks".
    pub(crate) fn tasks_str(count: usize) -> &'static str {
        if count == 1 { "task" } else { "tasks" }
    }

    /// Returns "worker" if `count` is 1, otherwise "workers".
    pub(crate) fn workers_str(count: usize) -> &'static str {
        if count == 1 { "worker" } else { "workers" }
    }
}

// Critical sections guarded by these locks never leave their state half-updated, so the state
// behind a poisoned lock is still consistent.

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
