//! WebSocket connection to the editor backend.
//!
//! Thin wrapper around `tokio-tungstenite` that hides the stream generics
//! behind a writer/reader pair suitable for a `tokio::select!` loop. The
//! bridge only ever exchanges UTF-8 text; everything else is folded into
//! [`BackendMessage`] or skipped.

use std::fmt;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio_tungstenite::tungstenite;
use url::Url;

/// Concrete WebSocket stream type.
type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Backend transport failures.
///
/// None of these are fatal to the bridge; the connection manager resets to
/// disconnected and waits for the next send.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Handshake failed (refused, reset, bad response).
    #[error("connection to {url} failed: {source}")]
    ConnectionFailed {
        /// Backend URL.
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(#[source] tungstenite::Error),

    /// Reading a frame failed.
    #[error("read failed: {0}")]
    Read(#[source] tungstenite::Error),
}

/// Message received from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    /// Text payload, passed through verbatim.
    Text(String),
    /// Close frame.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Write half of the backend connection.
pub struct BackendWriter {
    sink: SplitSink<WsStream, tungstenite::Message>,
}

impl fmt::Debug for BackendWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendWriter").finish_non_exhaustive()
    }
}

impl BackendWriter {
    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Send`] if the connection is gone.
    pub async fn send_text(&mut self, text: &str) -> Result<(), BackendError> {
        self.sink
            .send(tungstenite::Message::Text(text.to_owned().into()))
            .await
            .map_err(BackendError::Send)
    }

    /// Flush and close the sink.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Send`] if the close frame cannot be written.
    pub async fn close(&mut self) -> Result<(), BackendError> {
        self.sink.close().await.map_err(BackendError::Send)
    }
}

/// Read half of the backend connection.
pub struct BackendReader {
    stream: SplitStream<WsStream>,
}

impl fmt::Debug for BackendReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendReader").finish_non_exhaustive()
    }
}

impl BackendReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Binary frames are decoded as lossy UTF-8. Ping/pong and raw frames
    /// are skipped; tungstenite answers pings itself.
    pub async fn recv(&mut self) -> Option<Result<BackendMessage, BackendError>> {
        loop {
            match self.stream.next().await? {
                Ok(tungstenite::Message::Text(text)) => {
                    return Some(Ok(BackendMessage::Text(text.to_string())));
                }
                Ok(tungstenite::Message::Binary(data)) => {
                    let text = String::from_utf8_lossy(&data).into_owned();
                    return Some(Ok(BackendMessage::Text(text)));
                }
                Ok(tungstenite::Message::Close(frame)) => {
                    let (code, reason) = frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(BackendMessage::Close { code, reason }));
                }
                Ok(
                    tungstenite::Message::Ping(_)
                    | tungstenite::Message::Pong(_)
                    | tungstenite::Message::Frame(_),
                ) => continue,
                Err(e) => return Some(Err(BackendError::Read(e))),
            }
        }
    }
}

/// Open a WebSocket connection to `url`.
///
/// # Errors
///
/// Returns [`BackendError::ConnectionFailed`] if the TCP connect or the
/// WebSocket handshake fails.
pub async fn connect(url: &Url) -> Result<(BackendWriter, BackendReader), BackendError> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|source| BackendError::ConnectionFailed {
            url: url.to_string(),
            source,
        })?;

    let (sink, stream) = ws_stream.split();

    Ok((BackendWriter { sink }, BackendReader { stream }))
}
