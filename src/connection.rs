//! Backend connection lifecycle.
//!
//! [`ConnectionManager`] is a plain state machine: it owns the connection
//! state and the pending queue, and every handler returns the
//! [`ConnectionAction`]s the driver must perform. No I/O happens here.
//!
//! ```text
//!                send / start
//! Disconnected ───────────────► Connecting ──── open ────► Open
//!      ▲                            │                        │
//!      └────── failed / closed ─────┴──── closed / error ────┘
//! ```
//!
//! Reconnection is lazy: after a failure nothing happens until the next
//! [`ConnectionManager::send`].

use std::collections::VecDeque;

use tracing::{debug, info, warn};

/// Identifies one connection attempt.
pub type AttemptId = u64;

/// Backend connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
}

/// Side effect requested by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Start connecting, tagging all resulting events with this attempt.
    Connect(AttemptId),
    /// Send this text over the open connection.
    Transmit(String),
}

/// Owns the connection state and the FIFO of texts waiting for it.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    state: ConnectionState,
    /// Outbound texts waiting for the connection to open.
    pending: VecDeque<String>,
    /// Most recent attempt. Events for older attempts are stale.
    attempt: AttemptId,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of queued texts.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether `attempt` is the attempt currently in flight.
    pub fn is_connecting(&self, attempt: AttemptId) -> bool {
        self.state == ConnectionState::Connecting && attempt == self.attempt
    }

    /// Kick off the first connection attempt without waiting for traffic.
    pub fn start(&mut self) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Disconnected {
            vec![self.begin_attempt()]
        } else {
            Vec::new()
        }
    }

    /// Send `text` now if open, otherwise queue it and make sure exactly one
    /// attempt is in flight.
    pub fn send(&mut self, text: String) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Open => vec![ConnectionAction::Transmit(text)],
            ConnectionState::Connecting => {
                self.pending.push_back(text);
                debug!("queued while connecting ({} pending)", self.pending.len());
                Vec::new()
            }
            ConnectionState::Disconnected => {
                self.pending.push_back(text);
                vec![self.begin_attempt()]
            }
        }
    }

    /// The connection for `attempt` is up: flush the queue in order.
    ///
    /// Returns nothing for a stale attempt; the caller should drop that
    /// connection.
    pub fn on_open(&mut self, attempt: AttemptId) -> Vec<ConnectionAction> {
        if !self.is_connecting(attempt) {
            debug!("ignoring open for stale attempt {}", attempt);
            return Vec::new();
        }

        self.state = ConnectionState::Open;
        info!(
            "backend connected (attempt {}), flushing {} queued",
            attempt,
            self.pending.len()
        );
        self.pending.drain(..).map(ConnectionAction::Transmit).collect()
    }

    /// The connection for `attempt` failed or closed.
    ///
    /// `unsent` holds texts that were handed to the connection but never
    /// written; they go back to the head of the queue in their original
    /// order. If a newer connection is already open they are sent on it.
    pub fn on_closed(&mut self, attempt: AttemptId, unsent: Vec<String>) -> Vec<ConnectionAction> {
        if attempt == self.attempt && self.state != ConnectionState::Disconnected {
            self.state = ConnectionState::Disconnected;
            info!("backend disconnected (attempt {})", attempt);
        }

        if unsent.is_empty() {
            return Vec::new();
        }

        if self.state == ConnectionState::Open {
            warn!(
                "resending {} texts from superseded attempt {}",
                unsent.len(),
                attempt
            );
            return unsent.into_iter().map(ConnectionAction::Transmit).collect();
        }

        debug!("requeueing {} unsent texts", unsent.len());
        for text in unsent.into_iter().rev() {
            self.pending.push_front(text);
        }
        Vec::new()
    }

    fn begin_attempt(&mut self) -> ConnectionAction {
        self.attempt += 1;
        self.state = ConnectionState::Connecting;
        debug!("connecting (attempt {})", self.attempt);
        ConnectionAction::Connect(self.attempt)
    }
}
