//! Observable session lifecycle state.

/// Lifecycle phase of a capture session.
///
/// The normal path is `Idle → Capturing → Draining → Finalized`. `Error`
/// is reachable from any active phase and requires an explicit reset or
/// restart to leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No session is running.
    #[default]
    Idle,
    /// Frames are being sampled and shipped.
    Capturing,
    /// Capture has ended; remaining frames are flushing and the terminal
    /// result is awaited.
    Draining,
    /// The terminal result arrived.
    Finalized,
    /// The session failed and will not produce a result.
    Error,
}

impl SessionPhase {
    /// Whether the session is doing work (capturing or draining).
    pub fn is_active(&self) -> bool {
        matches!(self, SessionPhase::Capturing | SessionPhase::Draining)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Capturing => "capturing",
            SessionPhase::Draining => "draining",
            SessionPhase::Finalized => "finalized",
            SessionPhase::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a running (or finished) session.
///
/// Snapshots are published on a watch channel by the driver task; they are
/// cheap to clone and safe to hold across frames. Counters reset when a new
/// session starts, never in between.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    /// Whole seconds since the session started.
    pub seconds_elapsed: u32,
    /// Frames appended to the pending buffer so far.
    pub frames_captured: u64,
    /// Frames the service has acknowledged receiving.
    pub frames_sent: u64,
    /// Chunks the service has confirmed receiving.
    pub chunks_sent: u64,
    /// Highest acknowledged chunk sequence, if any ack arrived yet.
    pub last_acked_seq: Option<u64>,
    /// Frames currently buffered and awaiting assembly.
    pub pending_frames: usize,
    /// Latest per-chunk face-detection hint from the service.
    pub face_detected: Option<bool>,
    /// Latest lighting heuristic verdict; `true` until proven otherwise.
    pub lighting_ok: bool,
    /// Most recent error message, kept until the next reset.
    pub last_error: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            seconds_elapsed: 0,
            frames_captured: 0,
            frames_sent: 0,
            chunks_sent: 0,
            last_acked_seq: None,
            pending_frames: 0,
            face_detected: None,
            lighting_ok: true,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_is_idle_and_clean() {
        let snapshot = SessionSnapshot::default();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert_eq!(snapshot.frames_captured, 0);
        assert_eq!(snapshot.chunks_sent, 0);
        assert_eq!(snapshot.last_acked_seq, None);
        assert!(snapshot.lighting_ok);
        assert!(snapshot.last_error.is_none());
    }

    #[test]
    fn phase_activity() {
        assert!(!SessionPhase::Idle.is_active());
        assert!(SessionPhase::Capturing.is_active());
        assert!(SessionPhase::Draining.is_active());
        assert!(!SessionPhase::Finalized.is_active());
        assert!(!SessionPhase::Error.is_active());
    }

    #[test]
    fn phase_labels() {
        assert_eq!(SessionPhase::Draining.to_string(), "draining");
        assert_eq!(SessionPhase::Error.as_str(), "error");
    }
}
