//! The socket seam.
//!
//! A [`Transport`] is a bidirectional text-message pipe with an explicit
//! lifecycle. [`crate::SessionConnection`] owns at most one at a time and
//! asks its [`TransportFactory`] for a fresh one on every connect, so a
//! transport never has to support being reopened.
//!
//! [`WebSocketTransport`] is the production implementation; tests plug in a
//! scripted one through [`crate::SessionConnection::with_transport`].

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::errors::ClientError;

const OPEN_TIMEOUT: Duration = Duration::from_secs(15);

/// Close code reported when the stream ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

// ─── Events ───────────────────────────────────────────────────────────────────

/// Something that happened on an open transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The handshake completed.
    Opened,
    /// One inbound text frame.
    Message(String),
    /// The peer closed, or the link died. Always the last event.
    Closed { code: u16, reason: String },
    /// A non-fatal error; a `Closed` follows if the link is gone.
    Error(String),
}

// ─── Trait ────────────────────────────────────────────────────────────────────

/// A bidirectional text-message pipe.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the link. Events arrive on the returned receiver in wire order;
    /// the receiver yields `None` once the transport is closed.
    async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, ClientError>;

    /// Send one text frame.
    async fn send(&mut self, payload: String) -> Result<(), ClientError>;

    /// Close the link. Idempotent.
    async fn close(&mut self);

    /// `true` between a successful `open` and `close`.
    fn is_open(&self) -> bool;
}

/// Builds a fresh [`Transport`] for each connection attempt.
pub trait TransportFactory: Send + Sync + 'static {
    fn create(&self) -> Box<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Box<dyn Transport> + Send + Sync + 'static,
{
    fn create(&self) -> Box<dyn Transport> {
        self()
    }
}

// ─── WebSocketTransport ───────────────────────────────────────────────────────

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// [`Transport`] over a `ws://` or `wss://` WebSocket.
pub struct WebSocketTransport {
    url:    String,
    sink:   Option<WsSink>,
    reader: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), sink: None, reader: None }
    }

    /// A factory producing transports for `url`.
    pub fn factory(url: impl Into<String>) -> impl TransportFactory {
        let url = url.into();
        move || Box::new(WebSocketTransport::new(url.clone())) as Box<dyn Transport>
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, ClientError> {
        if self.sink.is_some() {
            return Err(ClientError::illegal("websocket is already open"));
        }
        tracing::debug!("[tether] Opening websocket {} …", self.url);
        let (ws, _) = tokio::time::timeout(OPEN_TIMEOUT, connect_async(self.url.as_str()))
            .await
            .map_err(|_| ClientError::Transport(format!("connect to {} timed out", self.url)))?
            .map_err(|e| ClientError::Transport(format!("connect to {} failed: {e}", self.url)))?;

        let (sink, mut stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(TransportEvent::Opened);

        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if tx.send(TransportEvent::Message(text)).is_err() { return; }
                    }
                    Ok(Message::Binary(data)) => {
                        if tx.send(binary_frame(data)).is_err() { return; }
                    }
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((1005, String::new()));
                        let _ = tx.send(TransportEvent::Closed { code, reason });
                        return;
                    }
                    // Pings are answered by tungstenite itself.
                    Ok(_) => {}
                    Err(e) => {
                        let _ = tx.send(TransportEvent::Error(e.to_string()));
                        let _ = tx.send(TransportEvent::Closed { code: ABNORMAL_CLOSURE, reason: e.to_string() });
                        return;
                    }
                }
            }
            let _ = tx.send(TransportEvent::Closed {
                code:   ABNORMAL_CLOSURE,
                reason: "stream ended".into(),
            });
        });

        self.sink   = Some(sink);
        self.reader = Some(reader);
        Ok(rx)
    }

    async fn send(&mut self, payload: String) -> Result<(), ClientError> {
        let sink = self.sink.as_mut()
            .ok_or_else(|| ClientError::Transport("websocket is not open".into()))?;
        sink.send(Message::Text(payload))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn is_open(&self) -> bool {
        self.sink.is_some()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Frames are textual envelopes; a binary frame must hold UTF-8 text.
fn binary_frame(data: Vec<u8>) -> TransportEvent {
    match String::from_utf8(data) {
        Ok(text) => TransportEvent::Message(text),
        Err(e) => TransportEvent::Error(format!("binary frame is not valid UTF-8: {}", e.utf8_error())),
    }
}
