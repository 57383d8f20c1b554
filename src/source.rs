//! Frame source seam and the built-in synthetic source.
//!
//! A [`FrameSource`] wraps whatever produces compressed frames: a camera
//! behind a drawing surface in real deployments, or [`SyntheticSource`]
//! for simulated sessions, benches and tests. Sources handle their own
//! encode pipeline; the driver only asks for one frame at a time, so a
//! single encode is in flight against the shared surface at any moment.

use crate::error::Result;

/// Darkest average luma considered usable, 8-bit scale.
pub const LUMA_DARK_LIMIT: f64 = 40.0;

/// Brightest average luma considered usable, 8-bit scale.
pub const LUMA_BRIGHT_LIMIT: f64 = 220.0;

/// Per-frame capture settings, fixed for the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSpec {
    pub width: u32,
    pub height: u32,
    /// Compression quality, already clamped to the encoder-safe range.
    pub quality: f32,
}

/// Trait for compressed-frame producers.
///
/// Sources abstract over the actual capture device. The driver polls
/// [`is_ready`](Self::is_ready) before every sample and skips the tick when
/// the source cannot deliver; a failed encode is logged and skipped too, so
/// implementations may fail per-frame without ending the session.
#[async_trait::async_trait]
pub trait FrameSource: Send + 'static {
    /// Capture and compress one frame.
    ///
    /// Returns the encoded bytes, or an error when the drawing surface is
    /// unavailable or encoding fails. Errors are per-frame; the session
    /// keeps sampling.
    async fn capture_frame(&mut self, spec: &FrameSpec) -> Result<Vec<u8>>;

    /// Whether the device can produce a frame right now.
    fn is_ready(&self) -> bool;

    /// Average 8-bit luma of the current scene, if the source can sample it.
    ///
    /// Feeds the lighting heuristic. Sources without cheap pixel access
    /// return `None` and the lighting flag stays optimistic.
    async fn sample_luma(&mut self) -> Option<f64> {
        None
    }
}

/// Whether an average luma falls in the usable band.
pub fn lighting_ok(average_luma: f64) -> bool {
    (LUMA_DARK_LIMIT..=LUMA_BRIGHT_LIMIT).contains(&average_luma)
}

/// Average BT.601 luma over packed RGB triples.
///
/// Returns `None` for an empty buffer or one that is not a whole number
/// of triples.
pub fn average_luma(rgb: &[u8]) -> Option<f64> {
    if rgb.is_empty() || !rgb.len().is_multiple_of(3) {
        return None;
    }
    let sum: f64 = rgb
        .chunks_exact(3)
        .map(|px| 0.299 * f64::from(px[0]) + 0.587 * f64::from(px[1]) + 0.114 * f64::from(px[2]))
        .sum();
    Some(sum / (rgb.len() / 3) as f64)
}

/// Camera-free frame source producing deterministic pseudo-JPEG buffers.
///
/// Frames carry valid SOI/EOI framing around a seeded pseudo-random payload
/// whose size scales with resolution and quality, so transport and assembly
/// behave as they would with real footage. Always ready; luma sits in the
/// middle of the usable band unless overridden.
#[derive(Debug)]
pub struct SyntheticSource {
    state: u64,
    frames_produced: u64,
    luma: f64,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self::with_seed(0x5eed_cafe)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { state: seed.max(1), frames_produced: 0, luma: 128.0 }
    }

    /// Overrides the luma the source reports, for lighting tests.
    pub fn with_luma(mut self, luma: f64) -> Self {
        self.luma = luma;
        self
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames_produced
    }

    fn next_byte(&mut self) -> u8 {
        // xorshift64
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        (self.state & 0xFF) as u8
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl FrameSource for SyntheticSource {
    async fn capture_frame(&mut self, spec: &FrameSpec) -> Result<Vec<u8>> {
        let quality = f64::from(spec.quality.clamp(0.05, 0.95));
        let payload_len =
            ((u64::from(spec.width) * u64::from(spec.height)) as f64 * quality * 0.1) as usize;

        let mut frame = Vec::with_capacity(payload_len + 6);
        frame.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
        for _ in 0..payload_len {
            frame.push(self.next_byte());
        }
        frame.extend_from_slice(&[0xFF, 0xD9]);

        self.frames_produced += 1;
        Ok(frame)
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn sample_luma(&mut self) -> Option<f64> {
        Some(self.luma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lighting_band_edges() {
        assert!(!lighting_ok(39.9));
        assert!(lighting_ok(40.0));
        assert!(lighting_ok(128.0));
        assert!(lighting_ok(220.0));
        assert!(!lighting_ok(220.1));
    }

    #[test]
    fn luma_of_solid_colors() {
        assert_eq!(average_luma(&[255, 255, 255]), Some(255.0));
        assert_eq!(average_luma(&[0, 0, 0]), Some(0.0));

        // green carries the most weight under BT.601
        let green = average_luma(&[0, 255, 0]).unwrap();
        let red = average_luma(&[255, 0, 0]).unwrap();
        let blue = average_luma(&[0, 0, 255]).unwrap();
        assert!(green > red && red > blue);
    }

    #[test]
    fn luma_rejects_ragged_buffers() {
        assert_eq!(average_luma(&[]), None);
        assert_eq!(average_luma(&[1, 2]), None);
        assert_eq!(average_luma(&[1, 2, 3, 4]), None);
    }

    #[tokio::test]
    async fn synthetic_frames_have_jpeg_framing() {
        let mut source = SyntheticSource::new();
        let spec = FrameSpec { width: 640, height: 360, quality: 0.5 };
        let frame = source.capture_frame(&spec).await.unwrap();

        assert_eq!(&frame[..2], &[0xFF, 0xD8]);
        assert_eq!(&frame[frame.len() - 2..], &[0xFF, 0xD9]);
        assert_eq!(source.frames_produced(), 1);
    }

    #[tokio::test]
    async fn synthetic_frames_differ_and_scale_with_quality() {
        let mut source = SyntheticSource::with_seed(7);
        let spec = FrameSpec { width: 320, height: 240, quality: 0.5 };
        let first = source.capture_frame(&spec).await.unwrap();
        let second = source.capture_frame(&spec).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(first.len(), second.len());

        let low = FrameSpec { quality: 0.1, ..spec };
        let small = source.capture_frame(&low).await.unwrap();
        assert!(small.len() < first.len());
    }

    #[tokio::test]
    async fn synthetic_source_reports_luma() {
        let mut bright = SyntheticSource::new().with_luma(240.0);
        assert_eq!(bright.sample_luma().await, Some(240.0));
        assert!(!lighting_ok(bright.sample_luma().await.unwrap()));

        let mut normal = SyntheticSource::new();
        assert!(lighting_ok(normal.sample_luma().await.unwrap()));
    }
}
