//! Render sessions: the logical identity of one render.
//!
//! The active [`SessionKey`] lives in a tokio task-local, so it follows the
//! render future across `.await` points whichever worker thread resumes it.
//! Nothing here looks at thread identity.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::futures::TaskLocalFuture;
use tokio::task::JoinHandle;

use crate::registry::{CallbackRegistry, CallbackSet};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static CURRENT_SESSION: SessionKey;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey(u64);

impl SessionKey {
    pub(crate) fn next() -> Self {
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// The session installed for the running task or closure, if any.
pub fn current_session_key() -> Option<SessionKey> {
    CURRENT_SESSION.try_with(|key| *key).ok()
}

/// One open render session on a [`CallbackRegistry`].
///
/// Created by [`CallbackRegistry::begin_render`]. [`finish`](Self::finish)
/// hands the session's callbacks to the caller; dropping the session without
/// finishing (an error path, a cancelled future) discards them. Either way
/// the registry keeps nothing of the session afterwards.
pub struct RenderSession {
    key: SessionKey,
    registry: Arc<CallbackRegistry>,
    closed: bool,
}

impl RenderSession {
    pub(crate) fn open(registry: Arc<CallbackRegistry>) -> Self {
        let key = SessionKey::next();
        registry.open_session(key);
        log::debug!("render session {key} opened");
        Self {
            key,
            registry,
            closed: false,
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    /// Runs `f` with this session current.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        CURRENT_SESSION.sync_scope(self.key, f)
    }

    /// Makes this session current for every poll of `future`, on whichever
    /// thread polls it.
    pub fn scope<F: Future>(&self, future: F) -> TaskLocalFuture<SessionKey, F> {
        CURRENT_SESSION.scope(self.key, future)
    }

    /// Ids registered in this session so far, in registration order.
    pub fn emitted(&self) -> Vec<String> {
        self.registry.emitted_ids(self.key)
    }

    /// Closes the session and takes ownership of its callbacks.
    pub fn finish(mut self) -> CallbackSet {
        self.closed = true;
        let callbacks = self.registry.close_session(self.key);
        log::debug!(
            "render session {} finished with {} callbacks",
            self.key,
            callbacks.len()
        );
        callbacks
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        if !self.closed {
            let discarded = self.registry.close_session(self.key);
            log::debug!(
                "render session {} abandoned, {} callbacks discarded",
                self.key,
                discarded.len()
            );
        }
    }
}

impl fmt::Debug for RenderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderSession")
            .field("key", &self.key)
            .field("closed", &self.closed)
            .finish()
    }
}

/// `spawn_blocking` that carries the caller's render session onto the
/// blocking-pool thread.
pub fn spawn_blocking_in_session<F, R>(f: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let key = current_session_key();
    tokio::task::spawn_blocking(move || match key {
        Some(key) => CURRENT_SESSION.sync_scope(key, f),
        None => f(),
    })
}
