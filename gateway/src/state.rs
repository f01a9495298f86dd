//! Shared application state
//!
//! One [`AppState`] is created at startup and shared by every route. It owns
//! the session registry, the conversation factory, the connection counters
//! and the process-wide shutdown token.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ServerConfig;
use crate::core::conversation::{ConversationFactory, ConversationResult, GeminiConversationFactory};
use crate::handlers::chat::SessionSettings;
use crate::registry::SessionRegistry;

/// Why a WebSocket connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionLimitError {
    #[error("Global WebSocket connection limit reached")]
    GlobalLimitReached,
    #[error("Per-IP WebSocket connection limit reached")]
    PerIpLimitReached,
}

pub struct AppState {
    pub config: ServerConfig,
    /// Live chat sessions by client id
    pub registry: Arc<SessionRegistry>,
    /// Creates one upstream conversation per session
    pub conversations: Arc<dyn ConversationFactory>,
    /// Cancelled when the server shuts down
    pub shutdown: CancellationToken,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
}

impl AppState {
    /// Build the state with the Gemini conversation factory.
    pub fn new(config: ServerConfig) -> ConversationResult<Arc<Self>> {
        let factory = GeminiConversationFactory::new(config.gemini_config())?;
        Ok(Self::with_factory(config, Arc::new(factory)))
    }

    /// Build the state around an arbitrary conversation factory.
    pub fn with_factory(config: ServerConfig, conversations: Arc<dyn ConversationFactory>) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            conversations,
            shutdown: CancellationToken::new(),
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Per-session settings derived from the configuration.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            turn_timeout: self.config.turn_timeout(),
            idle_timeout: self.config.idle_timeout(),
            ..SessionSettings::default()
        }
    }

    // -------------------------------------------------------------------------
    // Connection tracking
    // -------------------------------------------------------------------------

    /// Reserve a WebSocket connection slot for `ip`.
    ///
    /// The slot is released when the returned permit (and every clone of it) is dropped.
    pub fn try_acquire_connection(
        self: &Arc<Self>,
        ip: IpAddr,
    ) -> Result<ConnectionPermit, ConnectionLimitError> {
        let per_ip_limit = self.config.max_connections_per_ip;
        let global_limit = self.config.max_websocket_connections;

        {
            let mut count = self.ip_connections.entry(ip).or_insert(0);
            if *count >= per_ip_limit {
                return Err(ConnectionLimitError::PerIpLimitReached);
            }

            let reserved = self
                .ws_connections
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    match global_limit {
                        Some(max) if current >= max => None,
                        _ => Some(current + 1),
                    }
                })
                .is_ok();

            if reserved {
                *count += 1;
                debug!(ip = %ip, ip_connections = *count, "Connection slot acquired");
                return Ok(ConnectionPermit(Arc::new(PermitInner {
                    state: Arc::clone(self),
                    ip,
                })));
            }
        }

        self.ip_connections.remove_if(&ip, |_, count| *count == 0);
        Err(ConnectionLimitError::GlobalLimitReached)
    }

    fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });

        if let Entry::Occupied(mut entry) = self.ip_connections.entry(ip) {
            let count = entry.get_mut();
            *count = count.saturating_sub(1);
            if *count == 0 {
                entry.remove();
            }
        }
        debug!(ip = %ip, "Connection slot released");
    }

    /// Number of WebSocket connections currently holding a slot.
    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    /// Number of slots held by `ip`.
    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|count| *count).unwrap_or(0)
    }
}

/// RAII connection slot, carried from the middleware into the session task.
#[derive(Clone)]
pub struct ConnectionPermit(Arc<PermitInner>);

struct PermitInner {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl ConnectionPermit {
    pub fn ip(&self) -> IpAddr {
        self.0.ip
    }
}

impl std::fmt::Debug for ConnectionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPermit").field("ip", &self.0.ip).finish()
    }
}

impl Drop for PermitInner {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
    }
}
