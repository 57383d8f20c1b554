//! Session configuration and timing constants.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SessionError};
use crate::negotiation::SessionParams;

/// Floor on the capture interval so frame encoding cost stays bounded.
pub const MIN_CAPTURE_INTERVAL: Duration = Duration::from_millis(80);

/// Cadence of the chunk assembler.
pub const ASSEMBLY_INTERVAL: Duration = Duration::from_secs(1);

/// Cadence of the elapsed-time check that ends capture.
pub const CLOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Cadence of the lighting-quality probe.
pub const LIGHTING_POLL_INTERVAL: Duration = Duration::from_millis(800);

/// Hard timeout on every HTTP request (negotiation, chunk POST, finalize).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Service defaults, applied when negotiation omits a field or when a
/// config is built without negotiating.
pub const DEFAULT_CAPTURE_SECONDS: u32 = 25;
pub const DEFAULT_TARGET_FPS: u32 = 8;
pub const DEFAULT_JPEG_QUALITY: f32 = 0.5;
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 10;

/// Frame dimensions in pixels.
///
/// Parses from and displays as the `"WxH"` wire form used by session
/// negotiation. Malformed strings fall back to the 640×360 default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parses `"WxH"`, falling back to the default on malformed input.
    pub fn from_wire(value: &str) -> Self {
        match value.parse() {
            Ok(resolution) => resolution,
            Err(_) => {
                warn!(resolution = %value, "malformed resolution string; using default");
                Self::default()
            }
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self { width: 640, height: 360 }
    }
}

impl FromStr for Resolution {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        let (width, height) = s
            .split_once('x')
            .ok_or_else(|| SessionError::config(format!("resolution '{s}' is not of form WxH")))?;
        let width = width
            .trim()
            .parse::<u32>()
            .map_err(|e| SessionError::config(format!("bad resolution width '{width}': {e}")))?;
        let height = height
            .trim()
            .parse::<u32>()
            .map_err(|e| SessionError::config(format!("bad resolution height '{height}': {e}")))?;
        if width == 0 || height == 0 {
            return Err(SessionError::config(format!("resolution '{s}' has a zero dimension")));
        }
        Ok(Self { width, height })
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Immutable settings for one capture session.
///
/// Built from negotiated [`SessionParams`] via [`from_params`](Self::from_params),
/// or manually for tests and fixed deployments. A config never changes after
/// the session starts; a new session gets a new config.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Service-assigned session identifier.
    pub session_id: String,
    /// Target capture duration in seconds.
    pub capture_seconds: u32,
    /// Target sampling rate in frames per second.
    pub target_fps: u32,
    /// Frame dimensions.
    pub resolution: Resolution,
    /// Compression quality in `0..=1`; clamped to `0.05..=0.95` before use.
    pub jpeg_quality: f32,
    /// Upper bound on frames per chunk.
    pub max_chunk_size: usize,
    /// Whether the service fabricates the result instead of processing frames.
    pub simulated: bool,
}

impl SessionConfig {
    /// Creates a config with service defaults for everything but the id.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            capture_seconds: DEFAULT_CAPTURE_SECONDS,
            target_fps: DEFAULT_TARGET_FPS,
            resolution: Resolution::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            simulated: true,
        }
    }

    /// Maps negotiated service parameters into a session config.
    pub fn from_params(params: &SessionParams) -> Self {
        Self {
            session_id: params.session_id.clone(),
            capture_seconds: params.capture_seconds,
            target_fps: params.target_fps,
            resolution: Resolution::from_wire(&params.resolution),
            jpeg_quality: params.jpeg_quality,
            max_chunk_size: params.max_chunk_size,
            simulated: params.mock_mode,
        }
    }

    /// Interval between frame captures: `1000 / target_fps` ms with the
    /// 80ms floor applied, and a zero fps treated as one.
    pub fn capture_interval(&self) -> Duration {
        let period = Duration::from_millis(1000 / u64::from(self.target_fps.max(1)));
        period.max(MIN_CAPTURE_INTERVAL)
    }

    /// Compression quality with the encoder-safe clamp applied.
    pub fn clamped_quality(&self) -> f32 {
        self.jpeg_quality.clamp(0.05, 0.95)
    }

    /// Rejects configs that cannot run a session at all.
    pub fn validate(&self) -> Result<()> {
        if self.session_id.is_empty() {
            return Err(SessionError::config("session id is empty"));
        }
        if self.capture_seconds == 0 {
            return Err(SessionError::config("capture_seconds must be non-zero"));
        }
        if self.max_chunk_size == 0 {
            return Err(SessionError::config("max_chunk_size must be non-zero"));
        }
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(SessionError::config(format!(
                "resolution {} has a zero dimension",
                self.resolution
            )));
        }
        if !self.jpeg_quality.is_finite() {
            return Err(SessionError::config("jpeg_quality must be finite"));
        }
        Ok(())
    }
}
