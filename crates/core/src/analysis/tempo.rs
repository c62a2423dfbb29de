use std::collections::VecDeque;

use super::{
    spectrum::{parabolic_offset, SpectralWindow},
    DetectorGeometry, TempoDetector,
};
use crate::{PulsecastError, Result};

/// Seconds of detection-function history used for period estimation.
const HISTORY_SECONDS: f32 = 5.8;
const MIN_BPM: f32 = 40.0;
const MAX_BPM: f32 = 250.0;
/// Beat period the Rayleigh prior favours, in seconds (120 BPM).
const PREFERRED_PERIOD_SECONDS: f32 = 0.5;
/// Past beats combined when aligning the beat phase.
const PHASE_COMB_TEETH: usize = 4;

/// Detection functions the beat tracker can follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempoMethod {
    /// Spectral difference. Also selected by `default`.
    SpecDiff,
}

impl TempoMethod {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "default" | "specdiff" => Ok(Self::SpecDiff),
            other => Err(PulsecastError::config(format!(
                "unknown tempo method `{other}`"
            ))),
        }
    }
}

/// Streaming beat tracker.
///
/// Each frame adds one spectral-difference value to a rolling history of
/// roughly six seconds. Every quarter of that history the beat period is
/// re-estimated from the autocorrelation of the history, weighted by a
/// Rayleigh prior centred on 120 BPM, and the beat phase is re-aligned with
/// a comb over the most recent periods. Between estimates beats are
/// predicted by stepping the period forward from the last aligned beat.
#[derive(Debug)]
pub struct BeatTracker {
    method: TempoMethod,
    geometry: DetectorGeometry,
    spectrum: SpectralWindow,
    previous_power: Vec<f32>,
    history: VecDeque<f32>,
    history_len: usize,
    step: usize,
    min_lag: usize,
    max_lag: usize,
    rayleigh: f32,
    frame_index: u64,
    frames_since_estimate: usize,
    period: Option<usize>,
    next_beat: Option<u64>,
    bpm: f32,
    confidence: f32,
}

impl BeatTracker {
    pub fn new(method: TempoMethod, geometry: DetectorGeometry) -> Self {
        let frame_rate = geometry.frame_rate();
        let history_len = {
            let frames = (HISTORY_SECONDS * frame_rate).max(8.0);
            2usize.pow(frames.log2().round() as u32)
        };
        let max_lag = ((60.0 * frame_rate / MIN_BPM).ceil() as usize).clamp(2, history_len / 2);
        let min_lag = ((60.0 * frame_rate / MAX_BPM).floor() as usize).clamp(1, max_lag - 1);
        let spectrum = SpectralWindow::new(geometry.window_size);
        let bins = spectrum.bins();

        Self {
            method,
            geometry,
            spectrum,
            previous_power: vec![0.0; bins],
            history: VecDeque::with_capacity(history_len),
            history_len,
            step: (history_len / 4).max(1),
            min_lag,
            max_lag,
            rayleigh: (PREFERRED_PERIOD_SECONDS * frame_rate).max(1.0),
            frame_index: 0,
            frames_since_estimate: usize::MAX,
            period: None,
            next_beat: None,
            bpm: 0.0,
            confidence: 0.0,
        }
    }

    pub fn method(&self) -> TempoMethod {
        self.method
    }

    /// Current beat period in frames, once estimated.
    pub fn period_frames(&self) -> Option<usize> {
        self.period
    }

    fn push_history(&mut self, value: f32) {
        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(value);
    }

    fn estimate(&mut self) {
        let history = self.history.make_contiguous();
        let len = history.len();

        let autocorrelation: Vec<f32> = (0..=self.max_lag)
            .map(|lag| {
                let sum: f32 = history[..len - lag]
                    .iter()
                    .zip(&history[lag..])
                    .map(|(a, b)| a * b)
                    .sum();
                sum / (len - lag) as f32
            })
            .collect();

        if autocorrelation[0] <= f32::EPSILON {
            self.clear_estimate();
            return;
        }

        let beta = self.rayleigh;
        let weighted: Vec<f32> = autocorrelation
            .iter()
            .enumerate()
            .map(|(lag, value)| {
                let lag = lag as f32;
                value * lag / (beta * beta) * (-(lag * lag) / (2.0 * beta * beta)).exp()
            })
            .collect();

        let best = (self.min_lag..=self.max_lag)
            .max_by(|a, b| weighted[*a].total_cmp(&weighted[*b]))
            .unwrap_or(self.min_lag);

        if weighted[best] <= 0.0 {
            self.clear_estimate();
            return;
        }

        let offset = if best > self.min_lag && best < self.max_lag {
            parabolic_offset(weighted[best - 1], weighted[best], weighted[best + 1])
        } else {
            0.0
        };
        let period = best as f32 + offset;

        self.bpm = 60.0 * self.geometry.frame_rate() / period;
        self.confidence = (autocorrelation[best] / autocorrelation[0]).clamp(0.0, 1.0);
        self.period = Some(best);
        self.next_beat = Some(self.align_phase(best));
    }

    /// Returns the first predicted beat frame at or after the current one.
    fn align_phase(&self, period: usize) -> u64 {
        let len = self.history.len();
        let phase = (0..period)
            .max_by(|a, b| {
                self.comb_score(*a, period, len)
                    .total_cmp(&self.comb_score(*b, period, len))
            })
            .unwrap_or(0);

        let current = self.frame_index;
        let mut next = current.saturating_sub(phase as u64);
        while next < current {
            next += period as u64;
        }
        next
    }

    fn comb_score(&self, phase: usize, period: usize, len: usize) -> f32 {
        (0..PHASE_COMB_TEETH)
            .map(|tooth| phase + tooth * period)
            .filter(|back| *back < len)
            .map(|back| self.history[len - 1 - back])
            .sum()
    }

    fn clear_estimate(&mut self) {
        self.period = None;
        self.next_beat = None;
        self.bpm = 0.0;
        self.confidence = 0.0;
    }
}

impl TempoDetector for BeatTracker {
    fn detect(&mut self, frame: &[f32]) -> Result<bool> {
        let magnitudes = self.spectrum.push(frame)?;
        let value = spectral_difference(&mut self.previous_power, magnitudes);
        self.push_history(value);

        self.frames_since_estimate = self.frames_since_estimate.saturating_add(1);
        if self.history.len() >= 2 * self.max_lag && self.frames_since_estimate >= self.step {
            self.estimate();
            self.frames_since_estimate = 0;
        }

        let mut is_beat = false;
        if let (Some(next), Some(period)) = (self.next_beat, self.period) {
            if self.frame_index >= next {
                is_beat = true;
                self.next_beat = Some(next + period as u64);
            }
        }

        self.frame_index += 1;
        Ok(is_beat)
    }

    fn bpm(&self) -> f32 {
        self.bpm
    }

    fn confidence(&self) -> f32 {
        self.confidence
    }

    fn hop_size(&self) -> usize {
        self.geometry.hop_size
    }
}

/// Sum over bins of the square root of the absolute change in power.
fn spectral_difference(previous_power: &mut [f32], magnitudes: &[f32]) -> f32 {
    let mut value = 0.0;
    for (previous, magnitude) in previous_power.iter_mut().zip(magnitudes) {
        let power = magnitude * magnitude;
        value += (power - *previous).abs().sqrt();
        *previous = power;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> BeatTracker {
        BeatTracker::new(
            TempoMethod::SpecDiff,
            DetectorGeometry::new(1024, 512, 44_100).unwrap(),
        )
    }

    fn click_frame(index: usize, period: usize) -> Vec<f32> {
        let mut frame = vec![0.0; 512];
        if index % period == 0 {
            frame[0] = 1.0;
        }
        frame
    }

    #[test]
    fn derives_history_geometry_from_frame_rate() {
        let tracker = tracker();
        assert_eq!(tracker.history_len, 512);
        assert_eq!(tracker.step, 128);
        assert_eq!(tracker.min_lag, 20);
        assert_eq!(tracker.max_lag, 130);
    }

    #[test]
    fn locks_onto_a_click_track() {
        // 43 frames of 512 samples at 44.1 kHz is one beat at ~120 BPM.
        let mut tracker = tracker();
        let mut beats = Vec::new();

        for index in 0..1200 {
            if tracker.detect(&click_frame(index, 43)).unwrap() {
                beats.push(index);
            }
        }

        assert_eq!(tracker.period_frames(), Some(43));
        assert!((tracker.bpm() - 120.0).abs() < 5.0, "bpm {}", tracker.bpm());
        assert!(tracker.confidence() > 0.5);
        assert!(beats.len() >= 10, "beats {beats:?}");
        for pair in beats.windows(2) {
            assert_eq!(pair[1] - pair[0], 43);
        }
    }

    #[test]
    fn stays_silent_without_signal() {
        let mut tracker = tracker();
        for _ in 0..600 {
            assert!(!tracker.detect(&[0.0; 512]).unwrap());
        }
        assert_eq!(tracker.bpm(), 0.0);
        assert_eq!(tracker.confidence(), 0.0);
        assert_eq!(tracker.period_frames(), None);
    }

    #[test]
    fn parses_method_names() {
        assert_eq!(TempoMethod::parse("specdiff").unwrap(), TempoMethod::SpecDiff);
        assert_eq!(TempoMethod::parse("default").unwrap(), TempoMethod::SpecDiff);
        assert!(TempoMethod::parse("energy").is_err());
    }
}
