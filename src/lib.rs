//! Camera-pulse capture sessions: frame sampling, chunked delivery and
//! acknowledgment-driven flow control for a remote rPPG estimation service.
//!
//! Pulsecap owns the client side of a measurement session: it samples
//! compressed frames from a [`FrameSource`] at a throttled rate, batches
//! them into sequence-numbered chunks, ships them over one of two
//! interchangeable transports, and collects the terminal physiological
//! result.
//!
//! # Features
//!
//! - **Two delivery strategies**: a persistent WebSocket stream or
//!   discrete per-chunk HTTP requests, behind one [`Transport`] trait
//! - **Flow control**: cumulative acks gate capture when the service
//!   falls behind, bounding client and server queues
//! - **Loss policy**: failed chunk sends requeue their frames in order;
//!   sequence numbers are never reused
//! - **Derived vitals**: respiration, PRQ, HRV and stress estimates fill
//!   in whatever the service omits
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pulsecap::{Pulsecap, SyntheticSource, WireFormat};
//!
//! #[tokio::main]
//! async fn main() -> pulsecap::Result<()> {
//!     let api = "http://localhost:8000/api";
//!     let config = Pulsecap::negotiate(api, true).await?;
//!
//!     let mut session = Pulsecap::streaming(config, SyntheticSource::new(), api, WireFormat::Json);
//!     session.start()?;
//!
//!     let result = session.wait_for_result().await?;
//!     println!("bpm: {:?} ({})", result.bpm, result.quality);
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
pub mod config;
pub mod protocol;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Session pipeline
pub mod assembler;
pub mod controller;
pub mod driver;
pub mod negotiation;
pub mod source;

// Delivery strategies
pub mod transport;
pub mod transports;

// Core exports
pub use error::*;
pub use types::*;

// Session API exports
pub use config::{Resolution, SessionConfig};
pub use controller::SessionController;
pub use negotiation::SessionParams;
pub use protocol::WireFormat;
pub use source::{FrameSource, FrameSpec, SyntheticSource};
pub use transport::{Transport, TransportEvent};
pub use transports::{PollingTransport, StreamingTransport};

/// Unified entry point for capture sessions.
///
/// The factory covers the common wiring: negotiate a session with the
/// service, then build a [`SessionController`] on either delivery
/// strategy. Constructing the pieces by hand stays possible for tests
/// and custom sources.
///
/// # Examples
///
/// ## Streaming session
/// ```rust,no_run
/// use pulsecap::{Pulsecap, SyntheticSource, WireFormat};
///
/// #[tokio::main]
/// async fn main() -> pulsecap::Result<()> {
///     let api = "http://localhost:8000/api";
///     let config = Pulsecap::negotiate(api, true).await?;
///     let mut session =
///         Pulsecap::streaming(config, SyntheticSource::new(), api, WireFormat::MessagePack);
///     session.start()?;
///     let result = session.wait_for_result().await?;
///     println!("bpm: {:?}", result.bpm);
///     Ok(())
/// }
/// ```
///
/// ## Polling session
/// ```rust,no_run
/// use pulsecap::{Pulsecap, SyntheticSource};
///
/// #[tokio::main]
/// async fn main() -> pulsecap::Result<()> {
///     let api = "http://localhost:8000/api";
///     let config = Pulsecap::negotiate(api, true).await?;
///     let mut session = Pulsecap::polling(config, SyntheticSource::new(), api)?;
///     session.start()?;
///     let result = session.wait_for_result().await?;
///     println!("bpm: {:?}", result.bpm);
///     Ok(())
/// }
/// ```
pub struct Pulsecap;

impl Pulsecap {
    /// Negotiates a new session with the service.
    ///
    /// POSTs the consent flag to the session-start endpoint and maps the
    /// returned parameters onto a [`SessionConfig`]. The service owns the
    /// session id, capture window, frame rate and chunk sizing; values it
    /// omits fall back to the documented defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the service is unreachable, rejects the
    /// request, or answers without a session id.
    pub async fn negotiate(api_base: &str, consent: bool) -> Result<SessionConfig> {
        let client = negotiation::http_client()?;
        let params = negotiation::negotiate_session(&client, api_base, consent).await?;
        Ok(SessionConfig::from_params(&params))
    }

    /// Builds a controller on the streaming (WebSocket) transport.
    ///
    /// Chunks travel as JSON text or MessagePack binary depending on
    /// `format`; acknowledgments and the final result are pushed back on
    /// the same connection.
    pub fn streaming<S>(
        config: SessionConfig,
        source: S,
        api_base: &str,
        format: WireFormat,
    ) -> SessionController<S, StreamingTransport>
    where
        S: FrameSource,
    {
        let url = StreamingTransport::session_url(api_base, &config.session_id);
        SessionController::new(config, source, StreamingTransport::new(url, format))
    }

    /// Builds a controller on the polling (per-chunk HTTP) transport.
    ///
    /// Each chunk is POSTed and acknowledged synchronously; an explicit
    /// end request at session end returns the result.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn polling<S>(
        config: SessionConfig,
        source: S,
        api_base: &str,
    ) -> Result<SessionController<S, PollingTransport>>
    where
        S: FrameSource,
    {
        let client = negotiation::http_client()?;
        let transport = PollingTransport::new(api_base, &config.session_id, client);
        Ok(SessionController::new(config, source, transport))
    }
}
