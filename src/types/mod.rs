//! Core types for capture sessions.
//!
//! This module provides the foundational data structures for moving frames
//! from a capture device to the measurement service:
//! - [`Chunk`] is a sequence-numbered batch of compressed frames
//! - [`SessionResult`] is the terminal, service-authoritative measurement
//! - [`SignalQuality`] bands a result as good/medium/poor
//! - [`SessionPhase`] and [`SessionSnapshot`] expose lifecycle state to callers
//!
//! ## Ordering Guarantees
//!
//! Frames keep their capture order inside a chunk and chunks keep their
//! sequence order across a session; both are enforced by the assembler,
//! not by these types. Sequence numbers are never reused, even when the
//! frames of a failed send travel again in a later chunk.
//!
//! ## Usage Example
//!
//! ```rust
//! use pulsecap::types::{Chunk, SessionPhase, SessionSnapshot};
//!
//! let chunk = Chunk {
//!     seq: 0,
//!     ts_start_ms: 1_700_000_000_000,
//!     width: 640,
//!     height: 360,
//!     frames: vec![vec![0xFF, 0xD8, 0xFF, 0xD9]],
//! };
//! assert_eq!(chunk.frame_count(), 1);
//!
//! let snapshot = SessionSnapshot::default();
//! assert_eq!(snapshot.phase, SessionPhase::Idle);
//! ```

mod chunk;
mod result;
mod state;

// Re-export all public types
pub use chunk::Chunk;
pub use result::{SessionResult, SignalQuality};
pub use state::{SessionPhase, SessionSnapshot};

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    prop_compose! {
        fn arb_result()(
            bpm in prop::option::of(30.0f64..200.0),
            confidence in 0.0f64..=1.0,
            snr_db in prop::option::of(-10.0f64..20.0),
            quality in prop::sample::select(vec![
                SignalQuality::Good, SignalQuality::Medium, SignalQuality::Poor
            ]),
            frames_received in 0u64..2000,
            face_detect_rate in 0.0f64..=1.0
        ) -> SessionResult {
            SessionResult {
                bpm,
                confidence,
                quality,
                message: None,
                duration_s: 25.0,
                frames_received,
                face_detect_rate,
                snr_db,
                bpm_series: None,
                breathing_rate_brpm: None,
                prq: None,
                hrv_sdnn_ms: None,
                stress_level: None,
            }
        }
    }

    proptest! {
        #[test]
        fn prop_chunk_payload_matches_frame_sizes(
            frames in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..20),
            seq in 0u64..10_000
        ) {
            let expected: usize = frames.iter().map(Vec::len).sum();
            let chunk = Chunk { seq, ts_start_ms: 0, width: 640, height: 360, frames };
            prop_assert_eq!(chunk.payload_bytes(), expected);
            prop_assert_eq!(chunk.seq, seq);
        }

        #[test]
        fn prop_derived_vitals_stay_clamped(result in arb_result()) {
            let derived = result.clone().with_derived_vitals();

            if result.bpm.is_none() {
                prop_assert_eq!(derived.breathing_rate_brpm, None);
                prop_assert_eq!(derived.prq, None);
                prop_assert_eq!(derived.hrv_sdnn_ms, None);
                prop_assert_eq!(derived.stress_level, None);
            } else {
                let breathing = derived.breathing_rate_brpm.unwrap();
                prop_assert!((10.0..=20.0).contains(&breathing));
                prop_assert!((20.0..=120.0).contains(&derived.hrv_sdnn_ms.unwrap()));
                prop_assert!((1.0..=30.0).contains(&derived.stress_level.unwrap()));
                prop_assert!(derived.prq.unwrap() > 0.0);
            }

            // the authoritative wire fields never change
            prop_assert_eq!(derived.bpm, result.bpm);
            prop_assert_eq!(derived.confidence, result.confidence);
            prop_assert_eq!(derived.frames_received, result.frames_received);
        }

        #[test]
        fn prop_result_json_roundtrip(result in arb_result()) {
            let encoded = serde_json::to_string(&result).unwrap();
            let decoded: SessionResult = serde_json::from_str(&encoded).unwrap();
            prop_assert_eq!(decoded, result);
        }
    }
}
