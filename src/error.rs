//! Error types for capture sessions.
//!
//! All errors in this crate funnel into [`SessionError`], which implements
//! `std::error::Error`, chains transport causes via `#[source]`, and
//! classifies itself for retry decisions.
//!
//! ## Error Categories
//!
//! - **Config Errors**: Invalid or incomplete session parameters
//! - **Capture Errors**: Frame source not ready, or a single frame failed to encode
//! - **Connect Errors**: Opening the session transport failed
//! - **Transport Errors**: A chunk send or HTTP request failed mid-session
//! - **Protocol Errors**: The service sent something the client cannot decode
//! - **Server Errors**: The service reported an explicit error message
//!
//! ## Recovery and Retry
//!
//! Errors report whether retrying can help:
//!
//! ```rust
//! use pulsecap::SessionError;
//!
//! let error = SessionError::transport("chunk POST failed");
//! if error.is_retryable() {
//!     println!("Can retry this operation");
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```
//!
//! ## Helper Constructors
//!
//! Use helper methods for common error scenarios:
//!
//! ```rust
//! use pulsecap::SessionError;
//!
//! let config_error = SessionError::config("capture_seconds must be non-zero");
//! let camera_error = SessionError::source_not_ready("no active video track");
//! let server_error = SessionError::server("face not detected");
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T, E = SessionError> = std::result::Result<T, E>;

/// Main error type for capture session operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SessionError {
    #[error("invalid session configuration: {reason}")]
    Config { reason: String },

    #[error("capture source not ready: {reason}")]
    SourceNotReady { reason: String },

    #[error("frame encode failed: {reason}")]
    Encode { reason: String },

    #[error("failed to open transport at {url}: {reason}")]
    Connect {
        url: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("transport send failed: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("connection lost")]
    ConnectionLost,

    #[error("session service error: {message}")]
    Server { message: String },

    #[error("protocol error in {context}: {details}")]
    Protocol { context: String, details: String },

    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("{operation} is not allowed while the session is {state}")]
    InvalidState { operation: String, state: String },

    #[error("session failed: {reason}")]
    Failed { reason: String },
}

impl SessionError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Connect { .. } => true,
            SessionError::Transport { .. } => true,
            SessionError::Timeout { .. } => true,
            SessionError::Server { .. } => true,
            SessionError::Encode { .. } => true,
            SessionError::Config { .. } => false,
            SessionError::SourceNotReady { .. } => false,
            SessionError::ConnectionLost => false,
            SessionError::Protocol { .. } => false,
            SessionError::InvalidState { .. } => false,
            SessionError::Failed { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            SessionError::Config { .. } => vec![
                "Check the negotiated session parameters",
                "Verify the session id is non-empty",
            ],
            SessionError::SourceNotReady { .. } => vec![
                "Check camera permissions",
                "Verify the video device is attached and not in use",
                "Wait for the video stream to start before capturing",
            ],
            SessionError::Encode { .. } => vec![
                "Verify the drawing surface is available",
                "Lower the frame resolution or quality",
            ],
            SessionError::Connect { .. } => vec![
                "Verify the service base URL",
                "Check that the measurement service is running",
                "Check network connectivity",
            ],
            SessionError::Transport { .. } => vec![
                "Retry the send on the next tick",
                "Check network connectivity",
            ],
            SessionError::ConnectionLost => vec![
                "Restart the session",
                "Check network stability before the next attempt",
            ],
            SessionError::Server { .. } => vec![
                "Read the service message for specifics",
                "Check the measurement service logs",
            ],
            SessionError::Protocol { .. } => vec![
                "Check client and service version compatibility",
                "Verify the wire format matches the deployment",
            ],
            SessionError::Timeout { .. } => vec![
                "Check service load and responsiveness",
                "Increase the request timeout",
            ],
            SessionError::InvalidState { .. } => vec![
                "Reset the controller before starting a new session",
                "Check the session phase before the operation",
            ],
            SessionError::Failed { .. } => vec![
                "Reset the controller and start a new session",
            ],
        }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        SessionError::Config { reason: reason.into() }
    }

    /// Helper constructor for capture source readiness errors.
    pub fn source_not_ready(reason: impl Into<String>) -> Self {
        SessionError::SourceNotReady { reason: reason.into() }
    }

    /// Helper constructor for single-frame encode errors.
    pub fn encode(reason: impl Into<String>) -> Self {
        SessionError::Encode { reason: reason.into() }
    }

    /// Helper constructor for transport open errors.
    pub fn connect_failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        SessionError::Connect { url: url.into(), reason: reason.into(), source: None }
    }

    /// Helper constructor for transport open errors with a cause.
    pub fn connect_failed_with_source(
        url: impl Into<String>,
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        SessionError::Connect { url: url.into(), reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for mid-session transport errors.
    pub fn transport(reason: impl Into<String>) -> Self {
        SessionError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for mid-session transport errors with a cause.
    pub fn transport_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        SessionError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for service-reported errors.
    pub fn server(message: impl Into<String>) -> Self {
        SessionError::Server { message: message.into() }
    }

    /// Helper constructor for wire decode errors.
    pub fn protocol(context: impl Into<String>, details: impl Into<String>) -> Self {
        SessionError::Protocol { context: context.into(), details: details.into() }
    }

    /// Helper constructor for lifecycle misuse errors.
    pub fn invalid_state(operation: impl Into<String>, state: impl Into<String>) -> Self {
        SessionError::InvalidState { operation: operation.into(), state: state.into() }
    }

    /// Helper constructor for terminal session failures.
    pub fn session_failed(reason: impl Into<String>) -> Self {
        SessionError::Failed { reason: reason.into() }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Transport { reason: err.to_string(), source: Some(Box::new(err)) }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Protocol { context: "json".to_string(), details: err.to_string() }
    }
}

impl From<rmp_serde::encode::Error> for SessionError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        SessionError::Protocol { context: "messagepack encode".to_string(), details: err.to_string() }
    }
}

impl From<rmp_serde::decode::Error> for SessionError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        SessionError::Protocol { context: "messagepack decode".to_string(), details: err.to_string() }
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SessionError::Timeout { duration: crate::config::REQUEST_TIMEOUT }
        } else {
            SessionError::Transport { reason: err.to_string(), source: Some(Box::new(err)) }
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => SessionError::ConnectionLost,
            other => {
                SessionError::Transport { reason: other.to_string(), source: Some(Box::new(other)) }
            }
        }
    }
}
