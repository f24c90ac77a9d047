// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::GroupSealedError;
use pin_project_lite::pin_project;
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
};
use tokio::sync::watch;

/// Tracks a growing set of in-flight operations.
///
/// [`done`](Self::done) waits for every operation added so far, including ones added while it is
/// waiting. Once `done` has observed all operations settled, the group is sealed and further
/// [`add`](Self::add) calls fail.
///
/// Clones share the same group.
#[derive(Clone, Debug)]
pub struct CompletionGroup {
    state: Arc<watch::Sender<GroupState>>,
}

#[derive(Debug, Default)]
struct GroupState {
    pending: usize,
    added: usize,
    sealed: bool,
}

impl CompletionGroup {
    /// Creates a new, empty group.
    pub fn new() -> Self {
        Self {
            state: Arc::new(watch::Sender::new(GroupState::default())),
        }
    }

    /// Adds an operation to the group.
    ///
    /// The returned future produces the same output as `fut`. The operation counts as settled
    /// once the returned future completes or is dropped.
    pub fn add<F: Future>(&self, fut: F) -> Result<Tracked<F>, GroupSealedError> {
        let mut accepted = false;
        self.state.send_if_modified(|state| {
            if state.sealed {
                return false;
            }
            state.pending += 1;
            state.added += 1;
            accepted = true;
            true
        });

        if !accepted {
            return Err(GroupSealedError);
        }
        Ok(Tracked {
            inner: fut,
            guard: Some(PendingGuard {
                state: self.state.clone(),
            }),
        })
    }

    /// Returns true if at least one operation was added and every added operation has settled.
    pub fn is_fulfilled(&self) -> bool {
        let state = self.state.borrow();
        state.added > 0 && state.pending == 0
    }

    /// Returns true if the group no longer accepts operations.
    pub fn is_sealed(&self) -> bool {
        self.state.borrow().sealed
    }

    /// Waits until every operation added to the group, including ones added during the wait, has
    /// settled.
    ///
    /// If nothing was ever added, this returns immediately and leaves the group open.
    pub async fn done(&self) {
        let mut rx = self.state.subscribe();
        loop {
            // We hold the sender, so this can't fail.
            if rx.wait_for(|state| state.pending == 0).await.is_err() {
                return;
            }

            // An operation may have been added between the wakeup and now, so check again while
            // holding the lock.
            let mut settled = false;
            self.state.send_if_modified(|state| {
                if state.pending > 0 {
                    return false;
                }
                settled = true;
                if state.added > 0 && !state.sealed {
                    state.sealed = true;
                    true
                } else {
                    false
                }
            });
            if settled {
                return;
            }
        }
    }
}

impl Default for CompletionGroup {
    fn default() -> Self {
        Self::new()
    }
}

pin_project! {
    /// A future added to a [`CompletionGroup`].
    #[must_use = "futures do nothing unless polled"]
    pub struct Tracked<F> {
        #[pin]
        inner: F,
        guard: Option<PendingGuard>,
    }
}

impl<F> fmt::Debug for Tracked<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

impl<F: Future> Future for Tracked<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let output = ready!(this.inner.poll(cx));
        this.guard.take();
        Poll::Ready(output)
    }
}

#[derive(Debug)]
struct PendingGuard {
    state: Arc<watch::Sender<GroupState>>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.state.send_modify(|state| state.pending -= 1);
    }
}
