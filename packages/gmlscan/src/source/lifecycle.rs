//! Reference-counted backend initialisation.
//!
//! The first session of a backend runs its initialisation hook and the last
//! one to close runs its shutdown hook. Nothing else touches this state.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::Backend;

static PULL_SESSIONS: AtomicUsize = AtomicUsize::new(0);
static BATCH_SESSIONS: AtomicUsize = AtomicUsize::new(0);

fn counter(backend: Backend) -> &'static AtomicUsize {
    match backend {
        Backend::Pull => &PULL_SESSIONS,
        Backend::Batch => &BATCH_SESSIONS,
    }
}

/// Number of open sessions using `backend`.
#[must_use]
pub fn active_sessions(backend: Backend) -> usize {
    counter(backend).load(Ordering::SeqCst)
}

/// Held by every open source; dropping it closes the session.
#[derive(Debug)]
pub struct SessionGuard {
    backend: Backend,
}

impl SessionGuard {
    /// Open a session, initialising the backend if it is the first.
    #[must_use]
    pub fn acquire(backend: Backend) -> Self {
        if counter(backend).fetch_add(1, Ordering::SeqCst) == 0 {
            tracing::debug!(backend = backend.as_str(), "initialising parser backend");
        }
        Self { backend }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if counter(self.backend).fetch_sub(1, Ordering::SeqCst) == 1 {
            tracing::debug!(backend = self.backend.as_str(), "shutting down parser backend");
        }
    }
}
