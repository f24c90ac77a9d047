// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Browser sessions and the pool that hands them out.
//!
//! Creating and tearing down real browser sessions happens outside this crate. The runner only
//! sees the [`BrowserPool`] trait, which is built once per run through a [`BrowserPoolFactory`].

use crate::{
    config::core::Config,
    errors::BrowserPoolError,
    list::{BrowserId, SessionId},
};
use browsertest_protocol::{BrowserState, BrowserStatePatch};
use debug_ignore::DebugIgnore;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use smol_str::SmolStr;
use std::sync::Arc;

/// A live browser session handed out by a [`BrowserPool`].
#[derive(Clone, Debug)]
pub struct Session {
    /// The browser this session belongs to.
    pub browser_id: BrowserId,

    /// The session's identity.
    pub session_id: SessionId,

    /// The concrete browser version, if the pool knows it.
    pub version: Option<SmolStr>,

    /// The capabilities the session was created with.
    pub capabilities: Map<String, Value>,

    /// Options used to connect to the session, passed through to workers.
    pub session_opts: Map<String, Value>,

    /// Mutable state accumulated while tests run in the session.
    pub state: BrowserState,
}

impl Session {
    /// Creates a session with empty capabilities and default state.
    pub fn new(browser_id: impl Into<BrowserId>, session_id: impl Into<SessionId>) -> Self {
        Self {
            browser_id: browser_id.into(),
            session_id: session_id.into(),
            version: None,
            capabilities: Map::new(),
            session_opts: Map::new(),
            state: BrowserState::default(),
        }
    }

    /// Merges a state patch reported by a worker into this session's state.
    pub fn apply_state(&mut self, patch: &BrowserStatePatch) {
        self.state.apply(patch);
    }

    /// Returns true if a worker marked this session as unusable.
    pub fn is_broken(&self) -> bool {
        self.state.is_broken
    }
}

/// Options for [`BrowserPool::get_browser`].
#[derive(Clone, Debug, Default)]
pub struct GetBrowserOpts {
    /// Request a specific browser version.
    pub version: Option<SmolStr>,

    /// Serve this request ahead of ordinary requests. Used for retries.
    pub high_priority: bool,
}

/// Options for [`BrowserPool::free_browser`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FreeBrowserOpts {
    /// Tear the session down instead of returning it for reuse.
    pub force: bool,
}

/// A source of browser sessions.
pub trait BrowserPool: Send + Sync {
    /// Acquires a session for `browser_id`, waiting until one is available.
    fn get_browser<'a>(
        &'a self,
        browser_id: &'a BrowserId,
        opts: GetBrowserOpts,
    ) -> BoxFuture<'a, Result<Session, BrowserPoolError>>;

    /// Returns a session to the pool.
    fn free_browser(
        &self,
        session: Session,
        opts: FreeBrowserOpts,
    ) -> BoxFuture<'_, Result<(), BrowserPoolError>>;

    /// Fails all pending and future [`get_browser`](Self::get_browser) calls.
    fn cancel(&self);
}

/// A session lifecycle notification from a [`BrowserPool`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolEvent {
    /// A new session was started.
    SessionStart {
        /// The session's browser.
        browser_id: BrowserId,
        /// The new session.
        session_id: SessionId,
    },

    /// A session was torn down.
    SessionEnd {
        /// The session's browser.
        browser_id: BrowserId,
        /// The ended session.
        session_id: SessionId,
    },
}

/// Where a [`BrowserPool`] sends its [`PoolEvent`]s.
///
/// Events sent here are forwarded to the run's listeners.
#[derive(Clone, Debug)]
pub struct PoolEventSink {
    f: DebugIgnore<Arc<dyn Fn(PoolEvent) + Send + Sync>>,
}

impl PoolEventSink {
    /// Creates a new sink calling `f` for every event.
    pub fn new(f: impl Fn(PoolEvent) + Send + Sync + 'static) -> Self {
        Self {
            f: DebugIgnore(Arc::new(f)),
        }
    }

    /// Sends an event.
    pub fn emit(&self, event: PoolEvent) {
        (self.f)(event)
    }
}

/// Creates the [`BrowserPool`] for a run.
pub trait BrowserPoolFactory: Send + Sync {
    /// Creates a pool using `config`, reporting session lifecycle events to `events`.
    fn create(&self, config: &Config, events: PoolEventSink) -> Arc<dyn BrowserPool>;
}
