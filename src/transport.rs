//! Transport seam between the session driver and the processing service.
//!
//! Two strategies implement [`Transport`]: a persistent bidirectional
//! stream ([`StreamingTransport`](crate::transports::StreamingTransport))
//! and discrete per-chunk requests
//! ([`PollingTransport`](crate::transports::PollingTransport)). The driver
//! is strategy-agnostic: it hands chunks to `send_chunk`, asks `is_ready`
//! before assembling, signals end-of-capture with `finalize`, and consumes
//! everything inbound as [`TransportEvent`]s.

use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{Chunk, SessionResult};

/// Delivery strategy for assembled chunks.
///
/// Send paths are non-blocking: `send_chunk` and `finalize` enqueue work
/// and return, with the outcome reported asynchronously on the event
/// channel returned by [`open`](Self::open). An `Err` from either means
/// the transport could not even accept the work (closed, or a local
/// encode failure).
#[async_trait::async_trait]
pub trait Transport: Send + 'static {
    /// Establishes the session channel and returns the inbound event stream.
    async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Whether the transport can accept a chunk right now.
    ///
    /// The polling strategy reports `false` while a request is in flight;
    /// the driver skips that assembly tick and the frames stay pending.
    fn is_ready(&self) -> bool;

    /// Hands one chunk to the transport for delivery.
    fn send_chunk(&mut self, chunk: Chunk) -> Result<()>;

    /// Signals logical end-of-capture to the service.
    ///
    /// Streaming sends an end control message and leaves the connection up
    /// for the service to push the result and close. Polling issues the
    /// finalize request whose response carries the result.
    fn finalize(&mut self) -> Result<()>;

    /// Tears the channel down without waiting for a result.
    async fn close(&mut self);
}

/// Everything a transport reports back to the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Cumulative acknowledgment: chunks up to `chunk_seq` were accepted.
    Ack { chunk_seq: u64, received: u32 },
    /// Live per-chunk hint from the service about face visibility.
    FaceSignal { face_detected: bool },
    /// Processing progress hint, surfaced for logging only.
    Progress { stage: String },
    /// The terminal measurement result. Ends the session.
    Result(Box<SessionResult>),
    /// Error reported by the service. Non-fatal on its own.
    ServerError { message: String },
    /// A chunk could not be delivered; its frames should be requeued.
    SendFailed { chunk: Chunk, reason: String },
    /// The finalize call itself failed, so no result is coming.
    FinalizeFailed { reason: String },
    /// The connection closed. Fatal while the session is still capturing.
    Closed { reason: Option<String> },
}
