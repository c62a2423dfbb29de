use std::collections::VecDeque;

use super::{
    spectrum::{level_db, SpectralWindow},
    DetectorGeometry, OnsetDetector,
};
use crate::{PulsecastError, Result};

const HISTORY_LEN: usize = 7;
const THRESHOLD: f32 = 0.3;
const MIN_INTER_ONSET_SECONDS: f32 = 0.05;
const SILENCE_DB: f32 = -70.0;
/// Smallest normalised flux that can count as an onset.
const MIN_FLUX: f32 = 0.02;

/// Onset detection function variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnsetMethod {
    /// High frequency content. Also selected by `default`.
    Hfc,
    /// Positive spectral flux, normalised by the current spectrum's sum.
    SpecFlux,
}

impl OnsetMethod {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "default" | "hfc" => Ok(Self::Hfc),
            "specflux" => Ok(Self::SpecFlux),
            other => Err(PulsecastError::config(format!(
                "unknown onset method `{other}`"
            ))),
        }
    }

    fn floor(self) -> f32 {
        match self {
            Self::Hfc => 0.0,
            Self::SpecFlux => MIN_FLUX,
        }
    }
}

/// Spectral onset detector with an adaptive median/mean threshold.
#[derive(Debug)]
pub struct SpectralOnset {
    method: OnsetMethod,
    geometry: DetectorGeometry,
    spectrum: SpectralWindow,
    previous_magnitudes: Vec<f32>,
    history: VecDeque<f32>,
    previous_value: f32,
    min_interval_frames: u64,
    frame_index: u64,
    last_onset: Option<u64>,
}

impl SpectralOnset {
    pub fn new(method: OnsetMethod, geometry: DetectorGeometry) -> Self {
        let spectrum = SpectralWindow::new(geometry.window_size);
        let bins = spectrum.bins();
        let min_interval_frames =
            (MIN_INTER_ONSET_SECONDS * geometry.frame_rate()).round().max(1.0) as u64;

        Self {
            method,
            geometry,
            spectrum,
            previous_magnitudes: vec![0.0; bins],
            history: VecDeque::with_capacity(HISTORY_LEN),
            previous_value: 0.0,
            min_interval_frames,
            frame_index: 0,
            last_onset: None,
        }
    }

    pub fn method(&self) -> OnsetMethod {
        self.method
    }

    fn threshold(&self) -> (f32, f32) {
        if self.history.is_empty() {
            return (0.0, 0.0);
        }
        let mut sorted: Vec<f32> = self.history.iter().copied().collect();
        sorted.sort_by(f32::total_cmp);
        let median = sorted[sorted.len() / 2];
        let mean = sorted.iter().sum::<f32>() / sorted.len() as f32;
        (median + THRESHOLD * mean, mean)
    }

    fn interval_elapsed(&self) -> bool {
        self.last_onset
            .map(|last| self.frame_index - last >= self.min_interval_frames)
            .unwrap_or(true)
    }
}

impl OnsetDetector for SpectralOnset {
    fn detect(&mut self, frame: &[f32]) -> Result<f32> {
        let magnitudes = self.spectrum.push(frame)?;
        let value = detection_value(self.method, magnitudes, &self.previous_magnitudes);
        self.previous_magnitudes.copy_from_slice(magnitudes);

        let (threshold, mean) = self.threshold();
        let rising = value - self.previous_value > THRESHOLD * mean;
        let is_onset = value > threshold
            && value > self.method.floor()
            && rising
            && self.interval_elapsed()
            && level_db(frame) > SILENCE_DB;

        if is_onset {
            self.last_onset = Some(self.frame_index);
        }

        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(value);
        self.previous_value = value;
        self.frame_index += 1;

        Ok(if is_onset { value } else { 0.0 })
    }

    fn hop_size(&self) -> usize {
        self.geometry.hop_size
    }
}

fn detection_value(method: OnsetMethod, magnitudes: &[f32], previous: &[f32]) -> f32 {
    match method {
        OnsetMethod::Hfc => magnitudes
            .iter()
            .enumerate()
            .map(|(bin, magnitude)| (bin + 1) as f32 * magnitude)
            .sum(),
        OnsetMethod::SpecFlux => {
            let total: f32 = magnitudes.iter().sum();
            if total <= f32::EPSILON {
                return 0.0;
            }
            let flux: f32 = magnitudes
                .iter()
                .zip(previous)
                .map(|(current, previous)| (current - previous).max(0.0))
                .sum();
            flux / total
        }
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;

    fn geometry() -> DetectorGeometry {
        DetectorGeometry::new(1024, 512, 44_100).unwrap()
    }

    fn sine_frames(count: usize, start: usize) -> Vec<Vec<f32>> {
        (0..count)
            .map(|frame| {
                (0..512)
                    .map(|n| {
                        let t = ((start + frame) * 512 + n) as f32 / 44_100.0;
                        0.5 * (2.0 * PI * 330.0 * t).sin()
                    })
                    .collect()
            })
            .collect()
    }

    fn count_onsets(method: OnsetMethod) -> (usize, Option<usize>) {
        let mut detector = SpectralOnset::new(method, geometry());
        let mut onsets = 0;
        let mut first = None;

        for _ in 0..20 {
            assert_eq!(detector.detect(&[0.0; 512]).unwrap(), 0.0);
        }
        for (index, frame) in sine_frames(40, 20).iter().enumerate() {
            if detector.detect(frame).unwrap() > 0.0 {
                onsets += 1;
                first.get_or_insert(index);
            }
        }
        (onsets, first)
    }

    #[test]
    fn hfc_reports_a_single_onset_when_a_tone_starts() {
        let (onsets, first) = count_onsets(OnsetMethod::Hfc);
        assert_eq!(onsets, 1);
        assert_eq!(first, Some(0));
    }

    #[test]
    fn specflux_reports_a_single_onset_when_a_tone_starts() {
        let (onsets, first) = count_onsets(OnsetMethod::SpecFlux);
        assert_eq!(onsets, 1);
        assert_eq!(first, Some(0));
    }

    #[test]
    fn parses_method_names() {
        assert_eq!(OnsetMethod::parse("default").unwrap(), OnsetMethod::Hfc);
        assert_eq!(OnsetMethod::parse("specflux").unwrap(), OnsetMethod::SpecFlux);
        assert!(OnsetMethod::parse("complex").is_err());
    }
}
