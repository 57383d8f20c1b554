//! Session negotiation against the measurement service.
//!
//! One `POST {api_base}/sessions/start` per session: the service owns every
//! session parameter (duration, rate, resolution, guardrails) and the client
//! consumes them as-is. Fields the service omits fall back to the documented
//! service defaults so older deployments keep working.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{
    DEFAULT_CAPTURE_SECONDS, DEFAULT_JPEG_QUALITY, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_TARGET_FPS,
    REQUEST_TIMEOUT,
};
use crate::error::{Result, SessionError};

/// Parameters handed out by the service when a session is created.
///
/// Guardrail fields (`ttl_sec`, `max_frames`, `max_bytes_mb`) are enforced
/// server-side; the client carries them for display and diagnostics only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    pub session_id: String,
    #[serde(default = "default_capture_seconds")]
    pub capture_seconds: u32,
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: f32,
    #[serde(default = "default_roi_refresh_interval")]
    pub roi_refresh_interval: u32,
    #[serde(default = "default_ttl_sec")]
    pub ttl_sec: u32,
    #[serde(default = "default_max_frames")]
    pub max_frames: u32,
    #[serde(default = "default_max_bytes_mb")]
    pub max_bytes_mb: u32,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_mock_mode")]
    pub mock_mode: bool,
}

fn default_capture_seconds() -> u32 {
    DEFAULT_CAPTURE_SECONDS
}

fn default_target_fps() -> u32 {
    DEFAULT_TARGET_FPS
}

fn default_resolution() -> String {
    "640x360".to_string()
}

fn default_jpeg_quality() -> f32 {
    DEFAULT_JPEG_QUALITY
}

fn default_roi_refresh_interval() -> u32 {
    3
}

fn default_ttl_sec() -> u32 {
    180
}

fn default_max_frames() -> u32 {
    400
}

fn default_max_bytes_mb() -> u32 {
    20
}

fn default_max_chunk_size() -> usize {
    DEFAULT_MAX_CHUNK_SIZE
}

fn default_mock_mode() -> bool {
    true
}

#[derive(Serialize)]
struct StartRequest {
    consent: bool,
}

/// Builds an HTTP client with the crate-wide request timeout applied.
///
/// Shared by negotiation and the polling transport so a hung request can
/// never stall a session indefinitely.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| SessionError::transport_with_source("failed to build HTTP client", Box::new(e)))
}

/// Negotiates a new session with the measurement service.
///
/// # Errors
///
/// Returns an error if:
/// - The request fails or times out
/// - The service rejects the request (non-2xx status)
/// - The response body is not a valid parameter set
pub async fn negotiate_session(
    client: &reqwest::Client,
    api_base: &str,
    consent: bool,
) -> Result<SessionParams> {
    let url = format!("{}/sessions/start", api_base.trim_end_matches('/'));
    debug!(%url, consent, "negotiating session");

    let response = client.post(&url).json(&StartRequest { consent }).send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() { format!("HTTP {status}") } else { body };
        return Err(SessionError::server(format!("session negotiation rejected: {message}")));
    }

    let params = response
        .json::<SessionParams>()
        .await
        .map_err(|e| SessionError::protocol("session negotiation response", e.to_string()))?;

    info!(
        session_id = %params.session_id,
        capture_seconds = params.capture_seconds,
        target_fps = params.target_fps,
        resolution = %params.resolution,
        mock_mode = params.mock_mode,
        "session negotiated"
    );
    Ok(params)
}
