//! Transport strategy implementations.
//!
//! [`StreamingTransport`] keeps one WebSocket open for the whole session;
//! [`PollingTransport`] issues one HTTP request per chunk. Both speak the
//! same session protocol and feed the driver through
//! [`TransportEvent`](crate::transport::TransportEvent)s.

mod polling;
mod streaming;

pub use polling::PollingTransport;
pub use streaming::StreamingTransport;
