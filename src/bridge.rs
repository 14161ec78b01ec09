//! The bridge state machine.
//!
//! [`Bridge`] owns all mutable bridge state (input buffer, response mode,
//! pending queue, connection state) and exposes one handler per event
//! kind. Each handler mutates that state and returns the [`Effect`]s the
//! driver in [`crate::app`] must carry out, in order. Nothing here touches
//! a socket or a file descriptor, so every ordering property can be tested
//! by feeding events and inspecting effects.
//!
//! # Data Flow
//!
//! ```text
//! stdin bytes ─► FrameBuffer ─► route() ─┬─► Respond ─► encode_message ─► Effect::Write
//!                                        ├─► Forward ─► ConnectionManager ─► Effect::Transmit / Connect
//!                                        └─► Drop
//! backend text ─────────────────────────────────────► encode_message ─► Effect::Write
//! ```

use tracing::{debug, error, info, warn};

use crate::connection::{AttemptId, ConnectionAction, ConnectionManager, ConnectionState};
use crate::router::{route, Route};
use crate::transport::framing::{encode_message, FrameBuffer, FramingError, ResponseMode};

// =============================================================================
// Events and Effects
// =============================================================================

/// Something that happened outside the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// Bytes arrived on stdin.
    Input(Vec<u8>),
    /// Stdin reached end of file.
    InputClosed,
    /// The connection for `attempt` completed its handshake.
    BackendOpened {
        /// Attempt that opened.
        attempt: AttemptId,
    },
    /// A text message arrived from the backend.
    BackendMessage(String),
    /// The connection attempt could not be established.
    BackendFailed {
        /// Attempt that failed.
        attempt: AttemptId,
        /// Human-readable cause.
        reason: String,
    },
    /// An open connection ended.
    BackendClosed {
        /// Attempt that closed.
        attempt: AttemptId,
        /// Texts accepted for sending but never written, oldest first.
        unsent: Vec<String>,
    },
}

/// Something the driver must do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Write these bytes to stdout.
    Write(Vec<u8>),
    /// Start connection attempt `AttemptId`.
    Connect(AttemptId),
    /// Send this text to the backend over the open connection.
    Transmit(String),
    /// Stop the process: the input stream can no longer be framed.
    Fatal(FramingError),
}

impl From<ConnectionAction> for Effect {
    fn from(action: ConnectionAction) -> Self {
        match action {
            ConnectionAction::Connect(attempt) => Effect::Connect(attempt),
            ConnectionAction::Transmit(text) => Effect::Transmit(text),
        }
    }
}

// =============================================================================
// Bridge
// =============================================================================

/// One bridge instance.
///
/// Independent instances share nothing, so several can run in one process.
#[derive(Debug, Default)]
pub struct Bridge {
    frames: FrameBuffer,
    connection: ConnectionManager,
    /// Set once a framing error has been reported; all later input is ignored.
    failed: bool,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Effects to run once at startup: the first connection attempt.
    pub fn start(&mut self) -> Vec<Effect> {
        self.connection.start().into_iter().map(Effect::from).collect()
    }

    /// Dispatch `event` to its handler.
    pub fn handle(&mut self, event: BridgeEvent) -> Vec<Effect> {
        match event {
            BridgeEvent::Input(data) => self.on_input(&data),
            BridgeEvent::InputClosed => self.on_input_closed(),
            BridgeEvent::BackendOpened { attempt } => self.on_backend_opened(attempt),
            BridgeEvent::BackendMessage(text) => self.on_backend_message(&text),
            BridgeEvent::BackendFailed { attempt, reason } => {
                self.on_backend_failed(attempt, &reason)
            }
            BridgeEvent::BackendClosed { attempt, unsent } => {
                self.on_backend_closed(attempt, unsent)
            }
        }
    }

    /// Whether an open for `attempt` would be accepted.
    ///
    /// The driver uses this to discard connections for superseded attempts.
    pub fn accepts_open(&self, attempt: AttemptId) -> bool {
        self.connection.is_connecting(attempt)
    }

    pub fn response_mode(&self) -> ResponseMode {
        self.frames.mode()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn pending_len(&self) -> usize {
        self.connection.pending_len()
    }

    /// Number of buffered stdin bytes not yet consumed as a frame.
    pub fn buffered_len(&self) -> usize {
        self.frames.len()
    }

    fn on_input(&mut self, data: &[u8]) -> Vec<Effect> {
        if self.failed {
            return Vec::new();
        }

        debug!("stdin {} bytes", data.len());
        self.frames.extend(data);

        let mut effects = Vec::new();
        loop {
            match self.frames.next_message() {
                Ok(Some(message)) => self.dispatch(message, &mut effects),
                Ok(None) => break,
                Err(e) => {
                    error!("framing error: {}", e);
                    self.failed = true;
                    effects.push(Effect::Fatal(e));
                    break;
                }
            }
        }
        effects
    }

    fn on_input_closed(&mut self) -> Vec<Effect> {
        info!(
            "stdin ended ({} bytes unconsumed); staying alive for backend responses",
            self.frames.len()
        );
        Vec::new()
    }

    fn on_backend_opened(&mut self, attempt: AttemptId) -> Vec<Effect> {
        self.connection
            .on_open(attempt)
            .into_iter()
            .map(Effect::from)
            .collect()
    }

    fn on_backend_message(&mut self, text: &str) -> Vec<Effect> {
        vec![self.write(text)]
    }

    fn on_backend_failed(&mut self, attempt: AttemptId, reason: &str) -> Vec<Effect> {
        warn!("backend connection failed (attempt {}): {}", attempt, reason);
        self.connection
            .on_closed(attempt, Vec::new())
            .into_iter()
            .map(Effect::from)
            .collect()
    }

    fn on_backend_closed(&mut self, attempt: AttemptId, unsent: Vec<String>) -> Vec<Effect> {
        self.connection
            .on_closed(attempt, unsent)
            .into_iter()
            .map(Effect::from)
            .collect()
    }

    fn dispatch(&mut self, message: String, effects: &mut Vec<Effect>) {
        match route(&message) {
            Route::Respond(response) => effects.push(self.write(&response)),
            Route::Forward => {
                effects.extend(self.connection.send(message).into_iter().map(Effect::from));
            }
            Route::Drop => debug!("dropped notification"),
        }
    }

    fn write(&self, text: &str) -> Effect {
        debug!("write {} bytes", text.len());
        Effect::Write(encode_message(self.frames.mode(), text))
    }
}
