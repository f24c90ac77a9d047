// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::BrowserPoolError,
    helpers::lock,
    list::{BrowserId, SessionId},
    session::{BrowserPool, FreeBrowserOpts, GetBrowserOpts, Session},
};
use debug_ignore::DebugIgnore;
use futures::future::BoxFuture;
use smol_str::SmolStr;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Acquires and releases browser sessions on behalf of a single test.
pub trait SessionProvider: Send + Sync {
    /// The browser sessions are acquired for.
    fn browser_id(&self) -> &BrowserId;

    /// Acquires a session.
    fn get_browser(&self) -> BoxFuture<'_, Result<Session, BrowserPoolError>>;

    /// Releases a session acquired through this provider.
    fn free_browser(&self, session: Session) -> BoxFuture<'_, Result<(), BrowserPoolError>>;
}

/// Requests sessions for one test from the shared [`BrowserPool`].
///
/// Two consecutive sessions handed out by the same agent never share a session id: if the pool
/// returns the previous session again, it is torn down and another one requested.
#[derive(Debug)]
pub struct BrowserAgent {
    browser_id: BrowserId,
    version: Option<SmolStr>,
    pool: DebugIgnore<Arc<dyn BrowserPool>>,
    last_session: Mutex<Option<SessionId>>,
}

impl BrowserAgent {
    /// Creates a new agent for the given browser and version.
    pub fn new(
        browser_id: BrowserId,
        version: Option<SmolStr>,
        pool: Arc<dyn BrowserPool>,
    ) -> Self {
        Self {
            browser_id,
            version,
            pool: DebugIgnore(pool),
            last_session: Mutex::new(None),
        }
    }

    /// Returns the browser version requested from the pool, if any.
    pub fn version(&self) -> Option<&SmolStr> {
        self.version.as_ref()
    }

    async fn acquire(&self, high_priority: bool) -> Result<Session, BrowserPoolError> {
        loop {
            let opts = GetBrowserOpts {
                version: self.version.clone(),
                high_priority,
            };
            let session = self.pool.get_browser(&self.browser_id, opts).await?;

            let repeated = lock(&self.last_session).as_ref() == Some(&session.session_id);
            if !repeated {
                *lock(&self.last_session) = Some(session.session_id.clone());
                return Ok(session);
            }

            debug!(
                browser_id = %self.browser_id,
                session_id = %session.session_id,
                "pool returned the previous session again, requesting a fresh one",
            );
            self.pool
                .free_browser(session, FreeBrowserOpts { force: true })
                .await?;
        }
    }

    async fn release(&self, session: Session) -> Result<(), BrowserPoolError> {
        let force = session.is_broken();
        self.pool
            .free_browser(session, FreeBrowserOpts { force })
            .await
    }
}

impl SessionProvider for BrowserAgent {
    fn browser_id(&self) -> &BrowserId {
        &self.browser_id
    }

    fn get_browser(&self) -> BoxFuture<'_, Result<Session, BrowserPoolError>> {
        Box::pin(self.acquire(false))
    }

    fn free_browser(&self, session: Session) -> BoxFuture<'_, Result<(), BrowserPoolError>> {
        Box::pin(self.release(session))
    }
}

/// A [`BrowserAgent`] whose requests are served ahead of ordinary ones. Used for retries.
///
/// Shares the wrapped agent's record of the previous session.
#[derive(Clone, Debug)]
pub struct HighPriorityBrowserAgent {
    inner: Arc<BrowserAgent>,
}

impl HighPriorityBrowserAgent {
    /// Wraps an agent.
    pub fn new(inner: Arc<BrowserAgent>) -> Self {
        Self { inner }
    }
}

impl SessionProvider for HighPriorityBrowserAgent {
    fn browser_id(&self) -> &BrowserId {
        self.inner.browser_id()
    }

    fn get_browser(&self) -> BoxFuture<'_, Result<Session, BrowserPoolError>> {
        Box::pin(self.inner.acquire(true))
    }

    fn free_browser(&self, session: Session) -> BoxFuture<'_, Result<(), BrowserPoolError>> {
        self.inner.free_browser(session)
    }
}
