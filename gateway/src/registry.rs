//! Process-wide table of live chat sessions
//!
//! The registry never owns a session: each session is owned by its connection
//! task, and the registry only records that the identifier is in use. Entries
//! are removed by dropping the [`SessionGuard`] returned from
//! [`SessionRegistry::register`], so every exit path of a connection task
//! releases its identifier.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tracing::{debug, info};

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Another live session already uses this identifier
    #[error("Session '{0}' is already connected")]
    DuplicateId(String),
}

/// Metadata recorded for a live session
#[derive(Debug, Clone)]
struct SessionEntry {
    /// Distinguishes successive registrations of the same id
    generation: u64,
    connected_at: Instant,
}

/// Live sessions keyed by client identifier
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id`, failing with [`RegistryError::DuplicateId`] if it is live.
    ///
    /// The returned guard unregisters the id when dropped.
    pub fn register(self: &Arc<Self>, id: &str) -> Result<SessionGuard, RegistryError> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        match self.sessions.entry(id.to_string()) {
            Entry::Occupied(_) => return Err(RegistryError::DuplicateId(id.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(SessionEntry {
                    generation,
                    connected_at: Instant::now(),
                });
            }
        }

        // Shard locks are released here, so counting cannot deadlock
        info!(session_id = %id, active = self.count(), "Session registered");
        Ok(SessionGuard {
            registry: Arc::clone(self),
            id: id.to_string(),
            generation,
        })
    }

    /// Remove `id`. Idempotent; returns whether an entry was removed.
    pub fn unregister(&self, id: &str) -> bool {
        self.remove_where(id, |_| true)
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    fn remove_where(&self, id: &str, matches: impl FnOnce(&SessionEntry) -> bool) -> bool {
        match self.sessions.remove_if(id, |_, entry| matches(entry)) {
            Some((_, entry)) => {
                info!(
                    session_id = %id,
                    active = self.count(),
                    connected_for = ?entry.connected_at.elapsed(),
                    "Session unregistered"
                );
                true
            }
            None => {
                debug!(session_id = %id, "Unregister of unknown session ignored");
                false
            }
        }
    }
}

/// Keeps a session registered for as long as it is alive.
///
/// Dropping the guard removes only the registration it was issued for, never
/// a later registration of the same id.
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: String,
    generation: u64,
}

impl SessionGuard {
    /// The registered identifier.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let generation = self.generation;
        self.registry
            .remove_where(&self.id, |entry| entry.generation == generation);
    }
}
