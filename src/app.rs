//! Async driver for the bridge.
//!
//! [`App`] runs a single event loop that owns the [`Bridge`]. Background
//! tasks (the stdin reader and one task per backend connection) only ever
//! post [`LoopEvent`]s into a channel; all state changes and all stdout
//! writes happen on the loop, one event at a time.
//!
//! The loop never finishes on its own. Stdin EOF is logged and ignored so
//! late backend responses can still be delivered; only a fatal framing
//! error or a broken stdout ends [`App::run`].

use std::collections::VecDeque;
use std::io::Write;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use url::Url;

use crate::bridge::{Bridge, BridgeEvent, Effect};
use crate::connection::AttemptId;
use crate::transport::backend::{self, BackendMessage, BackendReader, BackendWriter};

/// Size of a single stdin read.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Event posted to the loop by a background task.
#[derive(Debug)]
pub enum LoopEvent {
    /// Forwarded to the bridge as is.
    Bridge(BridgeEvent),
    /// The connection for `attempt` is up; `outbound` feeds its writer.
    BackendReady {
        attempt: AttemptId,
        outbound: UnboundedSender<String>,
    },
}

/// Outbound channel of the currently open backend connection.
#[derive(Debug)]
struct OpenConnection {
    attempt: AttemptId,
    outbound: UnboundedSender<String>,
}

/// The bridge event loop and the I/O it drives.
#[derive(Debug)]
pub struct App<W: Write> {
    bridge: Bridge,
    backend_url: Url,
    out: W,
    events_tx: UnboundedSender<LoopEvent>,
    events_rx: UnboundedReceiver<LoopEvent>,
    connection: Option<OpenConnection>,
}

impl<W: Write> App<W> {
    /// Create a loop writing framed output to `out`.
    pub fn new(backend_url: Url, out: W) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            bridge: Bridge::new(),
            backend_url,
            out,
            events_tx,
            events_rx,
            connection: None,
        }
    }

    /// Run the loop, reading client input from `input`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::transport::FramingError`] (wrapped in `anyhow`)
    /// when the input cannot be framed, or an I/O error when stdout fails.
    pub async fn run<R>(mut self, input: R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        info!("bridging stdio to {}", self.backend_url);
        tokio::spawn(read_input(input, self.events_tx.clone()));

        let startup = self.bridge.start();
        self.apply(startup)?;

        // `self.events_tx` keeps the channel open, so `recv` never yields `None`.
        while let Some(event) = self.events_rx.recv().await {
            let effects = match event {
                LoopEvent::Bridge(event) => {
                    if let BridgeEvent::BackendClosed { attempt, .. } = &event {
                        self.forget_connection(*attempt);
                    }
                    self.bridge.handle(event)
                }
                LoopEvent::BackendReady { attempt, outbound } => {
                    if self.bridge.accepts_open(attempt) {
                        self.connection = Some(OpenConnection { attempt, outbound });
                        self.bridge.handle(BridgeEvent::BackendOpened { attempt })
                    } else {
                        debug!("discarding connection for superseded attempt {}", attempt);
                        Vec::new()
                    }
                }
            };
            self.apply(effects)?;
        }

        Ok(())
    }

    /// Carry out effects in order.
    fn apply(&mut self, effects: Vec<Effect>) -> Result<()> {
        let mut queue: VecDeque<Effect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Write(bytes) => {
                    self.out
                        .write_all(&bytes)
                        .context("Failed to write to stdout")?;
                    self.out.flush().context("Failed to flush stdout")?;
                }
                Effect::Connect(attempt) => {
                    tokio::spawn(run_connection(
                        self.backend_url.clone(),
                        attempt,
                        self.events_tx.clone(),
                    ));
                }
                Effect::Transmit(text) => {
                    if let Err((attempt, unsent)) = self.transmit(text, &mut queue) {
                        let follow_up = self
                            .bridge
                            .handle(BridgeEvent::BackendClosed { attempt, unsent });
                        for effect in follow_up.into_iter().rev() {
                            queue.push_front(effect);
                        }
                    }
                }
                Effect::Fatal(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    /// Hand `text` to the open connection's writer.
    ///
    /// If the writer is gone, `text` and every later `Transmit` still in
    /// `queue` are pulled out and returned in order so they can be requeued.
    fn transmit(
        &mut self,
        text: String,
        queue: &mut VecDeque<Effect>,
    ) -> std::result::Result<(), (AttemptId, Vec<String>)> {
        let failed = match &self.connection {
            Some(conn) => match conn.outbound.send(text) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(text)) => (conn.attempt, text),
            },
            // Open without a writer cannot happen; attempt 0 is never current.
            None => (0, text),
        };

        self.connection = None;
        let (attempt, first) = failed;
        let mut unsent = vec![first];
        queue.retain(|effect| match effect {
            Effect::Transmit(text) => {
                unsent.push(text.clone());
                false
            }
            _ => true,
        });
        warn!("backend writer gone, requeueing {} texts", unsent.len());
        Err((attempt, unsent))
    }

    fn forget_connection(&mut self, attempt: AttemptId) {
        if self
            .connection
            .as_ref()
            .is_some_and(|conn| conn.attempt == attempt)
        {
            self.connection = None;
        }
    }
}

/// Pump `input` into the loop until EOF.
async fn read_input<R>(mut input: R, events: UnboundedSender<LoopEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match input.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let event = LoopEvent::Bridge(BridgeEvent::Input(buf[..n].to_vec()));
                if events.send(event).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("stdin read failed: {}", e);
                break;
            }
        }
    }
    let _ = events.send(LoopEvent::Bridge(BridgeEvent::InputClosed));
}

/// Connect, then shuttle frames both ways until the connection ends.
///
/// Posts exactly one terminal event per attempt: `BackendFailed` if the
/// handshake never completed, otherwise `BackendClosed` carrying anything
/// that was queued for the writer but not written.
async fn run_connection(url: Url, attempt: AttemptId, events: UnboundedSender<LoopEvent>) {
    let (writer, reader) = match backend::connect(&url).await {
        Ok(pair) => pair,
        Err(e) => {
            let _ = events.send(LoopEvent::Bridge(BridgeEvent::BackendFailed {
                attempt,
                reason: e.to_string(),
            }));
            return;
        }
    };

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let ready = LoopEvent::BackendReady {
        attempt,
        outbound: outbound_tx,
    };
    if events.send(ready).is_err() {
        return;
    }

    let unsent = pump(writer, reader, outbound_rx, &events).await;
    let _ = events.send(LoopEvent::Bridge(BridgeEvent::BackendClosed { attempt, unsent }));
}

async fn pump(
    mut writer: BackendWriter,
    mut reader: BackendReader,
    mut outbound: UnboundedReceiver<String>,
    events: &UnboundedSender<LoopEvent>,
) -> Vec<String> {
    let mut unsent = loop {
        tokio::select! {
            frame = reader.recv() => match frame {
                Some(Ok(BackendMessage::Text(text))) => {
                    let _ = events.send(LoopEvent::Bridge(BridgeEvent::BackendMessage(text)));
                }
                Some(Ok(BackendMessage::Close { code, reason })) => {
                    info!("backend closed connection ({}: {})", code, reason);
                    break Vec::new();
                }
                Some(Err(e)) => {
                    warn!("backend {}", e);
                    break Vec::new();
                }
                None => {
                    info!("backend stream ended");
                    break Vec::new();
                }
            },
            next = outbound.recv() => match next {
                Some(text) => {
                    if let Err(e) = writer.send_text(&text).await {
                        warn!("backend {}", e);
                        break vec![text];
                    }
                }
                // The loop dropped this connection.
                None => break Vec::new(),
            },
        }
    };

    outbound.close();
    while let Ok(text) = outbound.try_recv() {
        unsent.push(text);
    }
    let _ = writer.close().await;
    unsent
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Cloneable stdout stand-in.
    #[derive(Clone, Default)]
    struct SharedOutput(Arc<Mutex<Vec<u8>>>);

    impl SharedOutput {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl std::fmt::Debug for SharedOutput {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SharedOutput").finish()
        }
    }

    async fn wait_for_output(out: &SharedOutput, predicate: impl Fn(&[u8]) -> bool) {
        timeout(TEST_TIMEOUT, async {
            while !predicate(&out.contents()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Test timed out waiting for output");
    }

    #[tokio::test]
    async fn test_local_handshake_without_backend() {
        let out = SharedOutput::default();
        let app = App::new(Url::parse("ws://127.0.0.1:1/").unwrap(), out.clone());
        let input: &'static [u8] = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\"}\n";

        let handle = tokio::spawn(app.run(input));
        wait_for_output(&out, |bytes| bytes.ends_with(b"\n")).await;

        let text = String::from_utf8(out.contents()).unwrap();
        let response: Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(response["id"], json!(1));
        assert_eq!(
            response["result"]["serverInfo"]["name"],
            json!("vscode-mcp-open-docs")
        );

        // Stdin EOF does not end the loop.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test]
    async fn test_fatal_header_ends_run() {
        let out = SharedOutput::default();
        let app = App::new(Url::parse("ws://127.0.0.1:1/").unwrap(), out.clone());
        let input: &'static [u8] = b"Content-Type: text/plain\r\n\r\n{}";

        let result = timeout(TEST_TIMEOUT, app.run(input))
            .await
            .expect("Test timed out");

        let err = result.unwrap_err();
        assert!(err
            .downcast_ref::<crate::transport::FramingError>()
            .is_some());
        assert!(out.contents().is_empty());
    }

    #[tokio::test]
    async fn test_forwarding_roundtrip_through_backend() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Backend answers every request with a result echoing its id and
        // reports the ids it saw once three have arrived.
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut seen = Vec::new();
            let mut seen_tx = Some(seen_tx);
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let request: Value = serde_json::from_str(&text).unwrap();
                seen.push(request["id"].clone());
                let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": {"ok": true}});
                ws.send(Message::Text(reply.to_string().into())).await.unwrap();
                if seen.len() == 3 {
                    if let Some(tx) = seen_tx.take() {
                        let _ = tx.send(seen.clone());
                    }
                }
            }
        });

        let (mut client, server) = tokio::io::duplex(1024);
        let out = SharedOutput::default();
        let app = App::new(Url::parse(&format!("ws://{}/", addr)).unwrap(), out.clone());
        let handle = tokio::spawn(app.run(server));

        for id in 1..=3 {
            let body = format!(
                r#"{{"jsonrpc":"2.0","id":{},"method":"tools/call","params":{{"name":"listOpenDocuments","arguments":{{}}}}}}"#,
                id
            );
            let frame = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
            client.write_all(frame.as_bytes()).await.unwrap();
        }

        let seen = timeout(TEST_TIMEOUT, seen_rx)
            .await
            .expect("Test timed out")
            .unwrap();
        assert_eq!(seen, vec![json!(1), json!(2), json!(3)]);

        wait_for_output(&out, |bytes| {
            bytes
                .windows(b"Content-Length".len())
                .filter(|w| *w == b"Content-Length")
                .count()
                == 3
        })
        .await;

        handle.abort();
    }
}
