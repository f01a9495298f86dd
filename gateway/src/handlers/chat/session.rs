//! Per-connection chat session
//!
//! A [`Session`] owns exactly one upstream conversation and drives the turn
//! state machine for a single client:
//!
//! ```text
//! Idle --turn--> AwaitingUpstream --started--> Streaming --done/failed--> Idle
//!                      |                                                   ^
//!                      +------------------start failed---------------------+
//! any state --disconnect / shutdown / idle timeout--> Closed
//! ```
//!
//! Turns are processed strictly one at a time. While a turn is in flight the
//! session keeps reading the transport so that keepalives are answered and a
//! disconnect aborts the turn; any other frame is queued and handled after the
//! current turn's terminal event has been written.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{Frame, ProtocolError, ServerEvent, Turn, decode_frame};
use crate::core::conversation::{
    BoxedConversation, ConversationError, ConversationFactory, TurnContent,
};

/// Frames buffered while a turn is in flight; later ones are dropped and reported
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 32;

/// Message sent before closing an idle connection
pub const IDLE_TIMEOUT_MESSAGE: &str = "Connection closed due to inactivity";

// =============================================================================
// Types
// =============================================================================

/// Failure of the underlying connection. Always fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Failed to receive frame: {0}")]
    Receive(String),
    #[error("Failed to send frame: {0}")]
    Send(String),
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next turn
    Idle,
    /// Starting the upstream conversation
    AwaitingUpstream,
    /// Relaying fragments of the current reply
    Streaming,
    /// Terminal
    Closed,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Close frame or end of stream from the client
    ClientClosed,
    /// Read or write failure
    Transport(TransportError),
    /// Server shutdown
    Shutdown,
    /// No inbound frame within the idle timeout
    IdleTimeout,
}

/// Session tunables
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Bound on upstream start and on the gap between fragments
    pub turn_timeout: Option<Duration>,
    /// Close the connection after this long without an inbound frame
    pub idle_timeout: Option<Duration>,
    /// Frames buffered while a turn is in flight
    pub max_pending_frames: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            turn_timeout: Some(Duration::from_secs(60)),
            idle_timeout: Some(Duration::from_secs(300)),
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
        }
    }
}

/// Outcome of waiting on the upstream while servicing the transport
enum Wait<T> {
    Ready(T),
    TimedOut,
}

/// Frames received while a turn was in flight, already decoded
struct Inbox {
    queued: VecDeque<Result<Turn, ProtocolError>>,
    capacity: usize,
}

impl Inbox {
    fn is_full(&self) -> bool {
        self.queued.len() >= self.capacity
    }

    /// Queue a decoded frame. Past capacity, frames are folded into a single
    /// trailing `Backlog` error so the queue stays bounded and ordered.
    fn push(&mut self, decoded: Result<Turn, ProtocolError>) {
        if !self.is_full() {
            self.queued.push_back(decoded);
            return;
        }
        match self.queued.back_mut() {
            Some(Err(ProtocolError::Backlog { dropped })) => *dropped += 1,
            _ => self.queued.push_back(Err(ProtocolError::Backlog { dropped: 1 })),
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// One client's relay session.
pub struct Session {
    id: String,
    state: SessionState,
    factory: Arc<dyn ConversationFactory>,
    conversation: Option<BoxedConversation>,
    settings: SessionSettings,
    inbox: Inbox,
    turns: u64,
}

impl Session {
    /// Create an idle session. The upstream conversation is created on the first turn.
    pub fn new(
        id: impl Into<String>,
        factory: Arc<dyn ConversationFactory>,
        settings: SessionSettings,
    ) -> Self {
        let capacity = settings.max_pending_frames.max(1);
        Self {
            id: id.into(),
            state: SessionState::Idle,
            factory,
            conversation: None,
            settings,
            inbox: Inbox {
                queued: VecDeque::with_capacity(capacity),
                capacity,
            },
            turns: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of turns processed so far.
    pub fn turns(&self) -> u64 {
        self.turns
    }

    /// Run the session until the client leaves, the transport fails, or `shutdown` fires.
    ///
    /// The upstream conversation is closed and the outbound sink flushed and
    /// closed on every exit path.
    pub async fn run<I, O>(
        &mut self,
        inbound: &mut I,
        outbound: &mut O,
        shutdown: &CancellationToken,
    ) -> CloseReason
    where
        I: Stream<Item = Result<Frame, TransportError>> + Unpin,
        O: Sink<ServerEvent, Error = TransportError> + Unpin,
    {
        info!(session_id = %self.id, "Chat session started");

        let reason = loop {
            let next = match self.inbox.queued.pop_front() {
                Some(queued) => queued,
                None => match self.next_frame(inbound, outbound, shutdown).await {
                    Ok(frame) => decode_frame(&frame),
                    Err(reason) => break reason,
                },
            };

            if let Err(reason) = self.handle(next, inbound, outbound, shutdown).await {
                break reason;
            }
        };

        self.close().await;
        if !matches!(reason, CloseReason::Transport(_)) {
            let _ = outbound.close().await;
        }

        info!(
            session_id = %self.id,
            turns = self.turns,
            reason = ?reason,
            "Chat session closed"
        );
        reason
    }

    /// Wait for the next inbound frame while idle.
    async fn next_frame<I, O>(
        &mut self,
        inbound: &mut I,
        outbound: &mut O,
        shutdown: &CancellationToken,
    ) -> Result<Frame, CloseReason>
    where
        I: Stream<Item = Result<Frame, TransportError>> + Unpin,
        O: Sink<ServerEvent, Error = TransportError> + Unpin,
    {
        let idle = sleep_or_forever(self.settings.idle_timeout);

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(CloseReason::Shutdown),
            next = inbound.next() => match next {
                Some(Ok(Frame::Close)) | None => Err(CloseReason::ClientClosed),
                Some(Err(e)) => Err(CloseReason::Transport(e)),
                Some(Ok(frame)) => Ok(frame),
            },
            _ = idle => {
                warn!(session_id = %self.id, "Closing idle chat session");
                send(outbound, ServerEvent::error(IDLE_TIMEOUT_MESSAGE)).await?;
                Err(CloseReason::IdleTimeout)
            }
        }
    }

    /// Handle one decoded inbound frame.
    async fn handle<I, O>(
        &mut self,
        decoded: Result<Turn, ProtocolError>,
        inbound: &mut I,
        outbound: &mut O,
        shutdown: &CancellationToken,
    ) -> Result<(), CloseReason>
    where
        I: Stream<Item = Result<Frame, TransportError>> + Unpin,
        O: Sink<ServerEvent, Error = TransportError> + Unpin,
    {
        match decoded {
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Rejected inbound frame");
                send(outbound, ServerEvent::error(e)).await
            }
            Ok(turn) => match turn.into_content() {
                None => send(outbound, ServerEvent::Pong).await,
                Some(content) => self.process_turn(content, inbound, outbound, shutdown).await,
            },
        }
    }

    /// Relay one turn upstream and write its events, ending with exactly one terminal event.
    async fn process_turn<I, O>(
        &mut self,
        content: TurnContent,
        inbound: &mut I,
        outbound: &mut O,
        shutdown: &CancellationToken,
    ) -> Result<(), CloseReason>
    where
        I: Stream<Item = Result<Frame, TransportError>> + Unpin,
        O: Sink<ServerEvent, Error = TransportError> + Unpin,
    {
        self.turns += 1;
        let turn = self.turns;
        let timeout = self.settings.turn_timeout;
        debug!(session_id = %self.id, turn, kind = content.kind(), size = content.len(), "Processing turn");

        if self.conversation.is_none() {
            match self.factory.create() {
                Ok(conversation) => self.conversation = Some(conversation),
                Err(e) => {
                    warn!(session_id = %self.id, error = %e, "Failed to create conversation");
                    return send(outbound, ServerEvent::error(e)).await;
                }
            }
        }
        let Some(conversation) = self.conversation.as_mut() else {
            return Ok(());
        };

        if !conversation.is_started() {
            self.state = SessionState::AwaitingUpstream;
            let started = service_until(
                conversation.start(),
                timeout,
                inbound,
                outbound,
                &mut self.inbox,
                shutdown,
            )
            .await?;

            let failure = match started {
                Wait::Ready(Ok(())) => None,
                Wait::Ready(Err(e)) => Some(e),
                Wait::TimedOut => Some(timeout_error("start", timeout)),
            };
            if let Some(e) = failure {
                self.state = SessionState::Idle;
                warn!(session_id = %self.id, turn, error = %e, "Upstream conversation failed to start");
                return send(outbound, ServerEvent::error(e)).await;
            }
            info!(
                session_id = %self.id,
                provider = self.factory.provider_name(),
                details = %conversation.get_provider_info(),
                "Upstream conversation started"
            );
        }

        self.state = SessionState::Streaming;
        let mut fragments = conversation.send_turn(content);
        let mut relayed = 0usize;

        let terminal = loop {
            let next = service_until(
                fragments.next(),
                timeout,
                inbound,
                outbound,
                &mut self.inbox,
                shutdown,
            )
            .await?;

            match next {
                Wait::Ready(Some(Ok(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    relayed += 1;
                    send(outbound, ServerEvent::Chunk { text }).await?;
                }
                Wait::Ready(Some(Err(e))) => break ServerEvent::error(e),
                Wait::Ready(None) => break ServerEvent::End,
                Wait::TimedOut => break ServerEvent::error(timeout_error("fragment", timeout)),
            }
        };
        drop(fragments);

        self.state = SessionState::Idle;
        match &terminal {
            ServerEvent::Error { message } => {
                warn!(session_id = %self.id, turn, fragments = relayed, error = %message, "Turn failed");
            }
            _ => debug!(session_id = %self.id, turn, fragments = relayed, "Turn completed"),
        }
        send(outbound, terminal).await
    }

    /// Close the upstream conversation and enter the terminal state.
    async fn close(&mut self) {
        self.state = SessionState::Closed;
        self.inbox.queued.clear();

        if let Some(mut conversation) = self.conversation.take()
            && let Err(e) = conversation.close().await
        {
            warn!(session_id = %self.id, error = %e, "Failed to close upstream conversation");
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Write one event.
async fn send<O>(outbound: &mut O, event: ServerEvent) -> Result<(), CloseReason>
where
    O: Sink<ServerEvent, Error = TransportError> + Unpin,
{
    outbound.send(event).await.map_err(CloseReason::Transport)
}

async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

fn timeout_error(stage: &str, timeout: Option<Duration>) -> ConversationError {
    let limit = timeout.unwrap_or_default();
    ConversationError::Timeout(format!("no upstream {stage} within {limit:?}"))
}

/// Drive `upstream` to completion while keeping the transport serviced.
///
/// Pings are answered immediately, other frames are queued in `inbox`, and a
/// disconnect or shutdown aborts the wait. The transport is read even when
/// `inbox` is full, so a close is always observed.
async fn service_until<F, I, O>(
    upstream: F,
    timeout: Option<Duration>,
    inbound: &mut I,
    outbound: &mut O,
    inbox: &mut Inbox,
    shutdown: &CancellationToken,
) -> Result<Wait<F::Output>, CloseReason>
where
    F: Future,
    I: Stream<Item = Result<Frame, TransportError>> + Unpin,
    O: Sink<ServerEvent, Error = TransportError> + Unpin,
{
    tokio::pin!(upstream);
    let deadline = sleep_or_forever(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(CloseReason::Shutdown),
            output = &mut upstream => return Ok(Wait::Ready(output)),
            _ = &mut deadline => return Ok(Wait::TimedOut),
            next = inbound.next() => match next {
                Some(Ok(Frame::Close)) | None => return Err(CloseReason::ClientClosed),
                Some(Err(e)) => return Err(CloseReason::Transport(e)),
                Some(Ok(frame)) => match decode_frame(&frame) {
                    Ok(Turn::Ping) => send(outbound, ServerEvent::Pong).await?,
                    decoded => inbox.push(decoded),
                },
            },
        }
    }
}
