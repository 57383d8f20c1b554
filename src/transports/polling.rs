//! Polling transport: one HTTP request per chunk.
//!
//! Chunks are POSTed to the session's chunk endpoint and acknowledged
//! synchronously by the response body. A mutual-exclusion flag keeps at
//! most one request in flight; assembly ticks that find the flag set skip
//! sending and leave their frames pending. Failed chunks come back as
//! [`TransportEvent::SendFailed`] so the driver can requeue the frames.
//! Finalization is an explicit end request whose response is the result.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::protocol::{ChunkAck, ChunkMessage};
use crate::transport::{Transport, TransportEvent};
use crate::types::{Chunk, SessionResult};

/// Discrete request/response transport.
///
/// Requests run on spawned tasks so the driver loop never blocks on the
/// network; outcomes arrive on the event channel like any other inbound
/// traffic. The `reqwest` client carries the request timeout, so a hung
/// request cannot hold the in-flight flag forever.
pub struct PollingTransport {
    api_base: String,
    session_id: String,
    client: reqwest::Client,
    in_flight: Arc<AtomicBool>,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
}

impl PollingTransport {
    /// Creates a transport for the given API base and session.
    ///
    /// The client is shared with session negotiation so the whole session
    /// uses one connection pool and one timeout policy.
    pub fn new(
        api_base: impl Into<String>,
        session_id: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Self {
            api_base,
            session_id: session_id.into(),
            client,
            in_flight: Arc::new(AtomicBool::new(false)),
            events: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn chunk_url(&self) -> String {
        format!("{}/sessions/{}/chunk", self.api_base, self.session_id)
    }

    fn end_url(&self) -> String {
        format!("{}/sessions/{}/end", self.api_base, self.session_id)
    }

    fn events(&self) -> Result<&mpsc::UnboundedSender<TransportEvent>> {
        self.events
            .as_ref()
            .ok_or_else(|| SessionError::invalid_state("send", "not connected"))
    }

    fn claim_in_flight(&self, operation: &str) -> Result<()> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SessionError::invalid_state(operation, "awaiting a response"))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for PollingTransport {
    async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        // no persistent connection to establish; just wire up the event side
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.events = Some(event_tx);
        self.in_flight.store(false, Ordering::SeqCst);
        debug!(session_id = %self.session_id, "polling transport ready");
        Ok(event_rx)
    }

    fn is_ready(&self) -> bool {
        self.events.is_some() && !self.in_flight.load(Ordering::SeqCst)
    }

    fn send_chunk(&mut self, chunk: Chunk) -> Result<()> {
        let events = self.events()?.clone();
        self.claim_in_flight("send_chunk")?;

        let message = ChunkMessage::from_chunk(&chunk);
        let client = self.client.clone();
        let url = self.chunk_url();
        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(async move {
            let outcome = post_chunk(&client, &url, &message).await;
            in_flight.store(false, Ordering::SeqCst);
            let event = match outcome {
                Ok(ack) => {
                    debug!(chunk_seq = ack.chunk_seq, received = ack.received, "chunk acknowledged");
                    TransportEvent::Ack { chunk_seq: ack.chunk_seq, received: ack.received }
                }
                Err(err) => {
                    warn!(chunk_seq = chunk.seq, error = %err, "chunk send failed");
                    TransportEvent::SendFailed { chunk, reason: err.to_string() }
                }
            };
            let _ = events.send(event);
        });
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        let events = self.events()?.clone();
        self.claim_in_flight("finalize")?;

        let client = self.client.clone();
        let url = self.end_url();
        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(async move {
            let outcome = post_end(&client, &url).await;
            in_flight.store(false, Ordering::SeqCst);
            let event = match outcome {
                Ok(result) => TransportEvent::Result(Box::new(result)),
                Err(err) => {
                    warn!(error = %err, "finalize request failed");
                    TransportEvent::FinalizeFailed { reason: err.to_string() }
                }
            };
            let _ = events.send(event);
        });
        Ok(())
    }

    async fn close(&mut self) {
        self.events = None;
        debug!(session_id = %self.session_id, "polling transport closed");
    }
}

async fn post_chunk(client: &reqwest::Client, url: &str, message: &ChunkMessage) -> Result<ChunkAck> {
    let response = client.post(url).json(message).send().await?;
    if !response.status().is_success() {
        return Err(SessionError::server(format!(
            "chunk rejected with status {}",
            response.status()
        )));
    }
    Ok(response.json::<ChunkAck>().await?)
}

async fn post_end(client: &reqwest::Client, url: &str) -> Result<SessionResult> {
    let response = client.post(url).send().await?;
    if !response.status().is_success() {
        return Err(SessionError::server(format!(
            "finalize rejected with status {}",
            response.status()
        )));
    }
    Ok(response.json::<SessionResult>().await?)
}
