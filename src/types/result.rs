//! Terminal session results and derived vitals.

use serde::{Deserialize, Serialize};

/// Service-assigned quality band for the measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalQuality {
    Good,
    Medium,
    #[default]
    Poor,
}

impl SignalQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalQuality::Good => "good",
            SignalQuality::Medium => "medium",
            SignalQuality::Poor => "poor",
        }
    }
}

impl std::fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authoritative measurement output for one session.
///
/// The remote service owns this object and may omit any optional field
/// depending on data quality. `bpm` and `quality` are the shape markers
/// used to recognize a result on the wire: `bpm` must be present (even
/// if null) and `quality` must carry a valid band.
///
/// Secondary vitals (respiration, PRQ, HRV, stress) are nullable; when
/// the service omits them and a heart rate is available,
/// [`with_derived_vitals`](Self::with_derived_vitals) fills them with
/// non-clinical heuristic estimates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    /// Estimated heart rate in beats per minute, if one could be measured.
    // required-but-nullable: the key must be on the wire even when null
    #[serde(deserialize_with = "Option::deserialize")]
    pub bpm: Option<f64>,
    /// Estimate confidence in `0..=1`.
    #[serde(default)]
    pub confidence: f64,
    /// Quality band assigned by the service.
    pub quality: SignalQuality,
    /// Optional operator-readable note (e.g. why quality is poor).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Seconds of footage the estimate covers.
    #[serde(default)]
    pub duration_s: f64,
    /// Total frames the service accepted for this session.
    #[serde(default)]
    pub frames_received: u64,
    /// Fraction of frames with a detectable face, `0..=1`.
    #[serde(default)]
    pub face_detect_rate: f64,
    /// Signal-to-noise ratio of the pulse band in dB.
    #[serde(default)]
    pub snr_db: Option<f64>,
    /// Optional per-second heart-rate trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm_series: Option<Vec<f64>>,
    /// Respiration rate in breaths per minute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breathing_rate_brpm: Option<f64>,
    /// Pulse-respiration quotient (heart rate / respiration rate).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prq: Option<f64>,
    /// Heart-rate variability as SDNN in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hrv_sdnn_ms: Option<f64>,
    /// Stress score on a 1..=30 scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress_level: Option<f64>,
}

fn clamp(n: f64, lo: f64, hi: f64) -> f64 {
    n.clamp(lo, hi)
}

fn round1(n: f64) -> f64 {
    (n * 10.0).round() / 10.0
}

impl SessionResult {
    /// Fills missing secondary vitals with heuristic, non-clinical estimates.
    ///
    /// Values the service already provided are kept untouched. Without a
    /// heart rate there is nothing to derive from, so a null `bpm` leaves
    /// every secondary field null.
    pub fn with_derived_vitals(mut self) -> Self {
        let Some(bpm) = self.bpm else {
            return self;
        };

        // Respiration proxy, kept in a plausible adult range.
        let breathing = clamp(12.0 + ((bpm.round() as i64).rem_euclid(7) - 3) as f64 * 0.7, 10.0, 20.0);

        // Stability blends confidence with SNR; unknown SNR scores neutral.
        let snr_score = match self.snr_db {
            Some(snr) => clamp((snr + 5.0) / 20.0, 0.0, 1.0),
            None => 0.35,
        };
        let stability = clamp(0.5 * self.confidence + 0.5 * snr_score, 0.0, 1.0);

        // HRV proxy: more stable signal and lower rate score higher SDNN.
        let sdnn = clamp(35.0 + stability * 55.0 - (bpm - 70.0) * 0.25, 20.0, 120.0);

        // Stress proxy: inverse of stability plus a penalty for high rate.
        let stress =
            clamp(5.0 + (1.0 - stability) * 22.0 + clamp((bpm - 75.0) * 0.25, 0.0, 12.0), 1.0, 30.0);

        self.breathing_rate_brpm.get_or_insert(round1(breathing));
        self.prq.get_or_insert(round1(bpm / breathing));
        self.hrv_sdnn_ms.get_or_insert(sdnn.round());
        self.stress_level.get_or_insert(stress.round());
        self
    }
}
