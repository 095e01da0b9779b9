//! Server-side table of click handlers, addressed by opaque string ids.
//!
//! Entries are partitioned by render session. A render registers into its own
//! session only, and closing the session removes everything it registered,
//! so concurrent renders never see or clear each other's callbacks.
//! Callbacks that must outlive their render (to be executed by a later
//! request) are handed back with [`CallbackRegistry::retain`].

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexSet;
use thiserror::Error;

use crate::session::{current_session_key, RenderSession, SessionKey};

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no render session is active")]
    NoActiveSession,
    #[error("callback id is missing or blank")]
    InvalidId,
}

struct CallbackEntry {
    invoke: Callback,
    session: Option<SessionKey>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, CallbackEntry>,
    sessions: HashMap<SessionKey, IndexSet<String>>,
}

/// Callbacks taken out of a finished session.
///
/// `ids` lists every id the session registered, in registration order, which
/// is also the order they appear in the rendered document.
#[derive(Default)]
pub struct CallbackSet {
    ids: Vec<String>,
    entries: Vec<(String, Callback)>,
}

impl CallbackSet {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSet")
            .field("ids", &self.ids)
            .field("live", &self.entries.len())
            .finish()
    }
}

#[derive(Default)]
pub struct CallbackRegistry {
    state: Mutex<RegistryState>,
    next_id: AtomicU64,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a fresh session. Calling this again while another session is
    /// current starts an unrelated session; nothing carries over.
    pub fn begin_render(self: &Arc<Self>) -> RenderSession {
        RenderSession::open(Arc::clone(self))
    }

    /// Stores `callback` under a new process-unique id in the current session.
    pub fn register_callback(
        &self,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<String, RegistryError> {
        let session = current_session_key().ok_or(RegistryError::NoActiveSession)?;
        let mut state = self.lock();
        let emitted = state
            .sessions
            .get_mut(&session)
            .ok_or(RegistryError::NoActiveSession)?;
        let serial = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("{session}-{serial}");
        emitted.insert(id.clone());
        state.entries.insert(
            id.clone(),
            CallbackEntry {
                invoke: Box::new(callback),
                session: Some(session),
            },
        );
        log::trace!("callback {id} registered");
        Ok(id)
    }

    /// Runs and removes the callback stored under `id`. Returns false when
    /// there is none: already executed, discarded with its session, or never
    /// issued. A panicking callback still counts as executed.
    pub fn execute_callback(&self, id: &str) -> bool {
        let entry = self.lock().entries.remove(id);
        let Some(entry) = entry else {
            log::warn!("callback {id} not found");
            return false;
        };
        if catch_unwind(AssertUnwindSafe(entry.invoke)).is_err() {
            log::error!("callback {id} panicked");
        }
        true
    }

    pub fn has_callback(&self, id: &str) -> bool {
        self.lock().entries.contains_key(id)
    }

    /// Live entries across all sessions plus retained ones.
    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    /// Live entries registered by the current session.
    pub fn session_size(&self) -> usize {
        let Some(session) = current_session_key() else {
            return 0;
        };
        let state = self.lock();
        state.sessions.get(&session).map_or(0, |emitted| {
            emitted
                .iter()
                .filter(|id| state.entries.contains_key(id.as_str()))
                .count()
        })
    }

    /// Drops the current session's entries, or the retained entries when no
    /// session is current. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let session = current_session_key();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.session != session);
        if let Some(emitted) = session.and_then(|key| state.sessions.get_mut(&key)) {
            emitted.clear();
        }
        before - state.entries.len()
    }

    /// Adopts callbacks from a finished session as session-less entries so a
    /// later request can execute them.
    pub fn retain(&self, callbacks: CallbackSet) -> usize {
        let mut state = self.lock();
        let count = callbacks.entries.len();
        for (id, invoke) in callbacks.entries {
            state.entries.insert(
                id,
                CallbackEntry {
                    invoke,
                    session: None,
                },
            );
        }
        count
    }

    /// Drops retained entries by id without running them. Entries that
    /// belong to a live session are left alone. Returns how many were removed.
    pub fn discard<S: AsRef<str>>(&self, ids: &[S]) -> usize {
        let mut state = self.lock();
        let mut removed = 0;
        for id in ids {
            let id = id.as_ref();
            if state
                .entries
                .get(id)
                .is_some_and(|entry| entry.session.is_none())
            {
                state.entries.remove(id);
                removed += 1;
            }
        }
        removed
    }

    /// Trimmed `id`, or [`RegistryError::InvalidId`] when blank.
    pub fn validate_id(id: &str) -> Result<&str, RegistryError> {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            Err(RegistryError::InvalidId)
        } else {
            Ok(trimmed)
        }
    }

    pub(crate) fn open_session(&self, key: SessionKey) {
        self.lock().sessions.insert(key, IndexSet::new());
    }

    pub(crate) fn emitted_ids(&self, key: SessionKey) -> Vec<String> {
        self.lock()
            .sessions
            .get(&key)
            .map(|emitted| emitted.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn close_session(&self, key: SessionKey) -> CallbackSet {
        let mut state = self.lock();
        let Some(emitted) = state.sessions.remove(&key) else {
            return CallbackSet::default();
        };
        let ids: Vec<String> = emitted.into_iter().collect();
        let mut entries = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(entry) = state.entries.remove(id) {
                entries.push((id.clone(), entry.invoke));
            }
        }
        CallbackSet { ids, entries }
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("CallbackRegistry")
            .field("entries", &state.entries.len())
            .field("sessions", &state.sessions.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
