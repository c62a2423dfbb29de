use super::{
    spectrum::{level_db, parabolic_offset, slide},
    DetectorGeometry, PitchDetector,
};
use crate::{PulsecastError, Result};

const TOLERANCE: f32 = 0.15;
const SILENCE_DB: f32 = -50.0;
/// Shortest lag considered, skipping the trivial dip around zero.
const MIN_LAG: usize = 2;

/// Pitch estimation variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PitchMethod {
    /// YIN. Also selected by `default`.
    Yin,
}

impl PitchMethod {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "default" | "yin" => Ok(Self::Yin),
            other => Err(PulsecastError::config(format!(
                "unknown pitch method `{other}`"
            ))),
        }
    }
}

/// YIN estimator over a sliding window of `window_size` samples.
#[derive(Debug)]
pub struct YinPitch {
    method: PitchMethod,
    geometry: DetectorGeometry,
    buffer: Vec<f32>,
    normalised: Vec<f32>,
    confidence: f32,
}

impl YinPitch {
    pub fn new(method: PitchMethod, geometry: DetectorGeometry) -> Self {
        Self {
            method,
            geometry,
            buffer: vec![0.0; geometry.window_size],
            normalised: vec![1.0; (geometry.window_size / 2).max(MIN_LAG + 2)],
            confidence: 0.0,
        }
    }

    pub fn method(&self) -> PitchMethod {
        self.method
    }

    /// Fills `normalised` with the cumulative mean normalised difference.
    fn difference(&mut self) {
        let half = self.buffer.len() / 2;
        let mut running = 0.0;
        self.normalised.fill(1.0);

        // Lags past `len - half` would compare beyond the window.
        let last_lag = (self.buffer.len() - half).min(self.normalised.len() - 1);
        for lag in 1..=last_lag {
            let difference: f32 = self.buffer[..half]
                .iter()
                .zip(&self.buffer[lag..lag + half])
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            running += difference;
            self.normalised[lag] = if running > 0.0 {
                difference * lag as f32 / running
            } else {
                1.0
            };
        }
    }

    /// First dip under the tolerance, walked down to its local minimum.
    fn first_dip(&self) -> Option<usize> {
        let values = &self.normalised;
        let mut lag = MIN_LAG;
        while lag < values.len() {
            if values[lag] < TOLERANCE {
                while lag + 1 < values.len() && values[lag + 1] < values[lag] {
                    lag += 1;
                }
                return Some(lag);
            }
            lag += 1;
        }
        None
    }
}

impl PitchDetector for YinPitch {
    fn detect(&mut self, frame: &[f32]) -> Result<f32> {
        slide(&mut self.buffer, frame);

        if level_db(&self.buffer) < SILENCE_DB {
            self.confidence = 0.0;
            return Ok(0.0);
        }

        self.difference();

        let Some(lag) = self.first_dip() else {
            let best = self.normalised[MIN_LAG..]
                .iter()
                .copied()
                .fold(f32::INFINITY, f32::min);
            self.confidence = (1.0 - best).clamp(0.0, 1.0);
            return Ok(0.0);
        };

        let values = &self.normalised;
        let offset = if lag + 1 < values.len() {
            parabolic_offset(values[lag - 1], values[lag], values[lag + 1])
        } else {
            0.0
        };

        self.confidence = (1.0 - values[lag]).clamp(0.0, 1.0);
        Ok(self.geometry.sample_rate as f32 / (lag as f32 + offset))
    }

    fn confidence(&self) -> f32 {
        self.confidence
    }

    fn hop_size(&self) -> usize {
        self.geometry.hop_size
    }
}
