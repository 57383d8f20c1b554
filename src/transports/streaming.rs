//! Streaming transport over a per-session WebSocket.
//!
//! One connection per session. Chunks go out as JSON text or MessagePack
//! binary depending on the negotiated [`WireFormat`]; the end-of-capture
//! control message is always JSON text. After the end message the client
//! leaves the connection open: the service pushes the terminal result and
//! owns the teardown, which avoids closing before the result arrives.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::protocol::{ChunkMessage, ControlMessage, ServerMessage, WireFormat, encode_end};
use crate::transport::{Transport, TransportEvent};
use crate::types::Chunk;

/// Persistent bidirectional transport.
///
/// `open` splits the socket into a writer task fed by an outbound queue
/// and a reader task that decodes service messages into events. Dropping
/// the outbound queue (via [`close`](Transport::close)) stops the writer;
/// the cancellation token stops the reader.
pub struct StreamingTransport {
    url: String,
    format: WireFormat,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    cancel: CancellationToken,
}

impl StreamingTransport {
    /// Creates a transport for the given session WebSocket URL.
    pub fn new(url: impl Into<String>, format: WireFormat) -> Self {
        Self { url: url.into(), format, outbound: None, cancel: CancellationToken::new() }
    }

    /// Derives the per-session WebSocket URL from the HTTP API base.
    pub fn session_url(api_base: &str, session_id: &str) -> String {
        let base = api_base.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws_base}/ws/sessions/{session_id}")
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn sender(&self) -> Result<&mpsc::UnboundedSender<Message>> {
        self.outbound
            .as_ref()
            .ok_or_else(|| SessionError::invalid_state("send", "not connected"))
    }
}

#[async_trait::async_trait]
impl Transport for StreamingTransport {
    async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        let (socket, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|err| {
                SessionError::connect_failed_with_source(
                    &self.url,
                    "websocket handshake failed",
                    Box::new(err),
                )
            })?;
        debug!(url = %self.url, format = self.format.as_str(), "streaming transport connected");

        let (mut sink, mut stream) = socket.split();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        self.outbound = Some(out_tx);

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Err(err) = sink.send(message).await {
                    warn!(error = %err, "websocket send failed");
                    break;
                }
            }
        });

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    incoming = stream.next() => {
                        let stop = match incoming {
                            Some(Ok(message)) => forward(message, &event_tx),
                            Some(Err(err)) => {
                                let _ = event_tx.send(TransportEvent::Closed {
                                    reason: Some(err.to_string()),
                                });
                                true
                            }
                            None => {
                                let _ = event_tx.send(TransportEvent::Closed { reason: None });
                                true
                            }
                        };
                        if stop {
                            break;
                        }
                    }
                }
            }
        });

        Ok(event_rx)
    }

    fn is_ready(&self) -> bool {
        self.outbound.is_some()
    }

    fn send_chunk(&mut self, chunk: Chunk) -> Result<()> {
        let message = ChunkMessage::from_chunk(&chunk);
        let frame = match self.format {
            WireFormat::Json => Message::text(serde_json::to_string(&message)?),
            WireFormat::MessagePack => Message::binary(message.encode(WireFormat::MessagePack)?),
        };
        self.sender()?
            .send(frame)
            .map_err(|_| SessionError::ConnectionLost)?;
        debug!(chunk_seq = chunk.seq, frames = chunk.frame_count(), "chunk queued");
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        // the end marker is JSON text regardless of the chunk encoding
        self.sender()?
            .send(Message::text(encode_end()))
            .map_err(|_| SessionError::ConnectionLost)?;
        debug!("end control message queued");
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Message::Close(None));
        }
        self.cancel.cancel();
    }
}

/// Decodes one inbound frame into events. Returns `true` when the reader
/// should stop.
fn forward(message: Message, events: &mpsc::UnboundedSender<TransportEvent>) -> bool {
    let decoded = match &message {
        Message::Text(text) => ServerMessage::from_json(text.as_bytes()),
        Message::Binary(bytes) => ServerMessage::from_msgpack(bytes),
        Message::Close(frame) => {
            let reason = frame
                .as_ref()
                .filter(|f| !f.reason.is_empty())
                .map(|f| f.reason.to_string());
            let _ = events.send(TransportEvent::Closed { reason });
            return true;
        }
        _ => return false,
    };

    match decoded {
        Ok(server_message) => {
            let _ = events.send(event_for(server_message));
        }
        Err(err) => {
            warn!(error = %err, "undecodable server message");
            let _ = events.send(TransportEvent::ServerError {
                message: "Invalid server message".to_string(),
            });
        }
    }
    false
}

fn event_for(message: ServerMessage) -> TransportEvent {
    match message {
        ServerMessage::Control(ControlMessage::Ack { chunk_seq, received }) => {
            TransportEvent::Ack { chunk_seq, received }
        }
        ServerMessage::Control(ControlMessage::ChunkSignal { face_detected }) => {
            TransportEvent::FaceSignal { face_detected }
        }
        ServerMessage::Control(ControlMessage::Progress { stage }) => {
            TransportEvent::Progress { stage }
        }
        ServerMessage::Control(ControlMessage::Error { message }) => {
            TransportEvent::ServerError { message }
        }
        ServerMessage::Result(result) => TransportEvent::Result(Box::new(result)),
    }
}
