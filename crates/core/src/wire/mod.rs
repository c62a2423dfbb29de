//! JSON records sent to the receiver, one per analysed frame.
//!
//! Field names, nesting and order are fixed by existing receivers:
//!
//! ```json
//! {"timestamp":1700000000.123,"onset":{"is_onset":false},
//!  "tempo":{"bpm":120.186,"confidence":0.9,"is_beat":true},
//!  "pitch":{"pitch":440.123,"confidence":0.987}}
//! ```
//!
//! Every float is rounded to three decimals before serialisation.
//! Payloads use compact separators (`,` and `:` with no padding). Older
//! senders wrote `", "` and `": "`; receivers parse both the same, but the
//! bytes differ.

use serde::{Deserialize, Serialize};

use crate::Result;

const DECIMALS: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OnsetResult {
    pub is_onset: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TempoResult {
    pub bpm: f64,
    pub confidence: f64,
    pub is_beat: bool,
}

/// `pitch` is in Hz and may be 0 when nothing was detected.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PitchResult {
    pub pitch: f64,
    pub confidence: f64,
}

/// The three detector outputs for one frame, before timestamping.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameFeatures {
    pub onset: OnsetResult,
    pub tempo: TempoResult,
    pub pitch: PitchResult,
}

/// Wire record for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Wall-clock seconds at which the frame arrived from the driver.
    pub timestamp: f64,
    pub onset: OnsetResult,
    pub tempo: TempoResult,
    pub pitch: PitchResult,
}

impl FeatureRecord {
    /// Builds a record with every float already rounded.
    pub fn new(timestamp: f64, features: FrameFeatures) -> Self {
        let FrameFeatures {
            onset,
            tempo,
            pitch,
        } = features;

        Self {
            timestamp: round3(timestamp),
            onset,
            tempo: TempoResult {
                bpm: round3(tempo.bpm),
                confidence: round3(tempo.confidence),
                is_beat: tempo.is_beat,
            },
            pitch: PitchResult {
                pitch: round3(pitch.pitch),
                confidence: round3(pitch.confidence),
            },
        }
    }

    /// Compact JSON payload for a single datagram.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Rounds half away from zero to three decimals. Idempotent.
pub fn round3(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    (value * DECIMALS).round() / DECIMALS
}
