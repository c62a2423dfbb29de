//! Per-frame feature extraction.
//!
//! The three detectors sit behind small traits so the pipeline only depends
//! on their call contract: configured once with a method name and the buffer
//! geometry, then fed consecutive hop-sized frames. Every call mutates the
//! detector's history, so a detector instance must see frames in capture
//! order and never from two threads at once. [`AnalysisAdapter`] owns all
//! three and is moved into the single analysis worker.

mod onset;
mod pitch;
mod spectrum;
mod tempo;

use std::fmt;

pub use onset::{OnsetMethod, SpectralOnset};
pub use pitch::{PitchMethod, YinPitch};
pub use tempo::{BeatTracker, TempoMethod};

use crate::{
    AppConfig, AudioConfig, AudioFrame, FrameFeatures, OnsetResult, PitchResult, PulsecastError,
    Result, TempoResult,
};

/// Onset detection contract.
pub trait OnsetDetector: Send {
    /// Consumes one hop and returns a non-negative value, positive on onset.
    fn detect(&mut self, frame: &[f32]) -> Result<f32>;

    fn hop_size(&self) -> usize;
}

/// Beat and tempo tracking contract.
pub trait TempoDetector: Send {
    /// Consumes one hop and reports whether a beat falls inside it.
    fn detect(&mut self, frame: &[f32]) -> Result<bool>;

    /// Current tempo estimate in beats per minute, 0 before the first estimate.
    fn bpm(&self) -> f32;

    /// Confidence of the current tempo estimate in [0, 1].
    fn confidence(&self) -> f32;

    fn hop_size(&self) -> usize;
}

/// Fundamental frequency estimation contract.
pub trait PitchDetector: Send {
    /// Consumes one hop and returns the estimated pitch in Hz (0 if none).
    fn detect(&mut self, frame: &[f32]) -> Result<f32>;

    /// Confidence of the last estimate in [0, 1].
    fn confidence(&self) -> f32;

    fn hop_size(&self) -> usize;
}

/// Smallest analysis window the built-in detectors accept.
pub const MIN_WINDOW: usize = 16;

/// Window, hop and sample rate a detector is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorGeometry {
    pub window_size: usize,
    pub hop_size: usize,
    pub sample_rate: u32,
}

impl DetectorGeometry {
    pub fn new(window_size: usize, hop_size: usize, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 || hop_size == 0 {
            return Err(PulsecastError::config(
                "detectors need a positive sample rate and hop size",
            ));
        }
        if window_size < hop_size {
            return Err(PulsecastError::config(format!(
                "detector window {window_size} is smaller than hop {hop_size}"
            )));
        }
        if window_size < MIN_WINDOW {
            return Err(PulsecastError::config(format!(
                "detector window {window_size} is below the minimum of {MIN_WINDOW}"
            )));
        }
        Ok(Self {
            window_size,
            hop_size,
            sample_rate,
        })
    }

    pub fn from_audio(audio: &AudioConfig) -> Result<Self> {
        Self::new(audio.window_size, audio.hop_size, audio.sample_rate)
    }

    /// Analysis steps per second.
    pub fn frame_rate(&self) -> f32 {
        self.sample_rate as f32 / self.hop_size as f32
    }
}

/// Runs the onset, tempo and pitch detectors over the same frame.
pub struct AnalysisAdapter {
    hop_size: usize,
    onset: Box<dyn OnsetDetector>,
    tempo: Box<dyn TempoDetector>,
    pitch: Box<dyn PitchDetector>,
}

impl AnalysisAdapter {
    /// Wraps already-configured detectors. Their hop sizes must agree.
    pub fn new(
        onset: Box<dyn OnsetDetector>,
        tempo: Box<dyn TempoDetector>,
        pitch: Box<dyn PitchDetector>,
    ) -> Result<Self> {
        let hop_size = onset.hop_size();
        if tempo.hop_size() != hop_size || pitch.hop_size() != hop_size {
            return Err(PulsecastError::config(format!(
                "detector hop sizes disagree: onset {}, tempo {}, pitch {}",
                hop_size,
                tempo.hop_size(),
                pitch.hop_size()
            )));
        }

        Ok(Self {
            hop_size,
            onset,
            tempo,
            pitch,
        })
    }

    /// Builds the built-in detectors from the validated application config.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.audio.validate()?;
        let geometry = DetectorGeometry::from_audio(&config.audio)?;
        let detectors = &config.detectors;

        let onset = SpectralOnset::new(OnsetMethod::parse(&detectors.onset_method)?, geometry);
        let tempo = BeatTracker::new(TempoMethod::parse(&detectors.tempo_method)?, geometry);
        let pitch = YinPitch::new(PitchMethod::parse(&detectors.pitch_method)?, geometry);

        tracing::debug!(
            onset = %detectors.onset_method,
            tempo = %detectors.tempo_method,
            pitch = %detectors.pitch_method,
            window = geometry.window_size,
            hop = geometry.hop_size,
            sample_rate = geometry.sample_rate,
            "detectors configured"
        );

        Self::new(Box::new(onset), Box::new(tempo), Box::new(pitch))
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Analyses one frame. Sample values are not validated.
    pub fn analyze(&mut self, frame: &AudioFrame) -> Result<FrameFeatures> {
        let samples = frame.samples();
        if samples.len() != self.hop_size {
            return Err(PulsecastError::FrameLength {
                expected: self.hop_size,
                actual: samples.len(),
            });
        }

        let pitch = self.pitch.detect(samples)?;
        let pitch = PitchResult {
            pitch: f64::from(pitch),
            confidence: f64::from(self.pitch.confidence()),
        };

        let is_beat = self.tempo.detect(samples)?;
        let tempo = TempoResult {
            bpm: f64::from(self.tempo.bpm()),
            confidence: f64::from(self.tempo.confidence()),
            is_beat,
        };

        let onset = OnsetResult {
            is_onset: self.onset.detect(samples)? > 0.0,
        };

        Ok(FrameFeatures {
            onset,
            tempo,
            pitch,
        })
    }
}

impl fmt::Debug for AnalysisAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisAdapter")
            .field("hop_size", &self.hop_size)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Deterministic stand-in returning fixed values and counting calls.
    pub(crate) struct StubDetectors {
        pub hop_size: usize,
        pub onset: f32,
        pub bpm: f32,
        pub tempo_confidence: f32,
        pub is_beat: bool,
        pub pitch: f32,
        pub pitch_confidence: f32,
    }

    impl StubDetectors {
        pub(crate) fn fixed(hop_size: usize) -> Self {
            Self {
                hop_size,
                onset: 1.0,
                bpm: 120.00049,
                tempo_confidence: 0.87654,
                is_beat: true,
                pitch: 440.12345,
                pitch_confidence: 0.98765,
            }
        }

        pub(crate) fn into_adapter(self) -> AnalysisAdapter {
            let hop_size = self.hop_size;
            AnalysisAdapter::new(
                Box::new(StubOnset {
                    hop_size,
                    value: self.onset,
                }),
                Box::new(StubTempo {
                    hop_size,
                    bpm: self.bpm,
                    confidence: self.tempo_confidence,
                    is_beat: self.is_beat,
                }),
                Box::new(StubPitch {
                    hop_size,
                    pitch: self.pitch,
                    confidence: self.pitch_confidence,
                }),
            )
            .unwrap()
        }
    }

    struct StubOnset {
        hop_size: usize,
        value: f32,
    }

    impl OnsetDetector for StubOnset {
        fn detect(&mut self, _frame: &[f32]) -> Result<f32> {
            Ok(self.value)
        }

        fn hop_size(&self) -> usize {
            self.hop_size
        }
    }

    struct StubTempo {
        hop_size: usize,
        bpm: f32,
        confidence: f32,
        is_beat: bool,
    }

    impl TempoDetector for StubTempo {
        fn detect(&mut self, _frame: &[f32]) -> Result<bool> {
            Ok(self.is_beat)
        }

        fn bpm(&self) -> f32 {
            self.bpm
        }

        fn confidence(&self) -> f32 {
            self.confidence
        }

        fn hop_size(&self) -> usize {
            self.hop_size
        }
    }

    struct StubPitch {
        hop_size: usize,
        pitch: f32,
        confidence: f32,
    }

    impl PitchDetector for StubPitch {
        fn detect(&mut self, _frame: &[f32]) -> Result<f32> {
            Ok(self.pitch)
        }

        fn confidence(&self) -> f32 {
            self.confidence
        }

        fn hop_size(&self) -> usize {
            self.hop_size
        }
    }

    /// Pitch stand-in whose output is the running sum of each frame's first
    /// sample, so results depend on the order frames arrive in.
    pub(crate) struct OrderSensitivePitch {
        pub hop_size: usize,
        pub total: f32,
    }

    impl PitchDetector for OrderSensitivePitch {
        fn detect(&mut self, frame: &[f32]) -> Result<f32> {
            self.total = self.total * 10.0 + frame[0];
            Ok(self.total)
        }

        fn confidence(&self) -> f32 {
            1.0
        }

        fn hop_size(&self) -> usize {
            self.hop_size
        }
    }

    pub(crate) fn order_sensitive_adapter(hop_size: usize) -> AnalysisAdapter {
        let mut stubs = StubDetectors::fixed(hop_size);
        stubs.onset = 0.0;
        let base = stubs.into_adapter();
        AnalysisAdapter {
            pitch: Box::new(OrderSensitivePitch {
                hop_size,
                total: 0.0,
            }),
            ..base
        }
    }

    /// Pitch stand-in that panics on frames starting with a negative sample
    /// and otherwise echoes the first sample.
    struct PanicOnNegativePitch {
        hop_size: usize,
    }

    impl PitchDetector for PanicOnNegativePitch {
        fn detect(&mut self, frame: &[f32]) -> Result<f32> {
            assert!(frame[0] >= 0.0, "negative lead sample");
            Ok(frame[0])
        }

        fn confidence(&self) -> f32 {
            1.0
        }

        fn hop_size(&self) -> usize {
            self.hop_size
        }
    }

    pub(crate) fn panic_on_negative_adapter(hop_size: usize) -> AnalysisAdapter {
        let base = StubDetectors::fixed(hop_size).into_adapter();
        AnalysisAdapter {
            pitch: Box::new(PanicOnNegativePitch { hop_size }),
            ..base
        }
    }

    fn frame_of(len: usize) -> AudioFrame {
        AudioFrame::new(vec![0.25; len], 1.0, 0)
    }

    #[test]
    fn combines_all_three_detectors() {
        let mut adapter = StubDetectors::fixed(4).into_adapter();
        let features = adapter.analyze(&frame_of(4)).unwrap();

        assert!(features.onset.is_onset);
        assert!(features.tempo.is_beat);
        assert!((features.tempo.bpm - 120.00049).abs() < 1e-3);
        assert!((features.pitch.pitch - 440.12345).abs() < 1e-3);
    }

    #[test]
    fn rejects_frames_of_the_wrong_length() {
        let mut adapter = StubDetectors::fixed(4).into_adapter();
        let err = adapter.analyze(&frame_of(3)).unwrap_err();

        assert!(matches!(
            err,
            PulsecastError::FrameLength {
                expected: 4,
                actual: 3
            }
        ));
        assert!(!err.is_fatal());
    }

    #[test]
    fn rejects_mismatched_detector_hops() {
        let onset = SpectralOnset::new(
            OnsetMethod::Hfc,
            DetectorGeometry::new(1024, 512, 44_100).unwrap(),
        );
        let tempo = BeatTracker::new(
            TempoMethod::SpecDiff,
            DetectorGeometry::new(1024, 256, 44_100).unwrap(),
        );
        let pitch = YinPitch::new(
            PitchMethod::Yin,
            DetectorGeometry::new(1024, 512, 44_100).unwrap(),
        );

        let err = AnalysisAdapter::new(Box::new(onset), Box::new(tempo), Box::new(pitch))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn builds_from_default_config() {
        let adapter = AnalysisAdapter::from_config(&AppConfig::default()).unwrap();
        assert_eq!(adapter.hop_size(), 512);
    }

    #[test]
    fn silent_frames_produce_quiet_features() {
        let mut adapter = AnalysisAdapter::from_config(&AppConfig::default()).unwrap();
        let frame = AudioFrame::new(vec![0.0; 512], 0.0, 0);

        for _ in 0..8 {
            let features = adapter.analyze(&frame).unwrap();
            assert!(!features.onset.is_onset);
            assert!(!features.tempo.is_beat);
            assert_eq!(features.pitch.pitch, 0.0);
        }
    }

    #[test]
    fn geometry_rejects_window_below_hop() {
        assert!(DetectorGeometry::new(256, 512, 44_100).is_err());
        assert!(DetectorGeometry::new(1024, 0, 44_100).is_err());
    }

    #[test]
    fn geometry_rejects_tiny_windows() {
        let err = DetectorGeometry::new(4, 4, 44_100).unwrap_err();
        assert!(err.is_fatal());
        assert!(DetectorGeometry::new(MIN_WINDOW, MIN_WINDOW, 44_100).is_ok());
    }

    #[test]
    fn smallest_window_analyses_loud_frames() {
        let mut config = AppConfig::default();
        config.audio.window_size = MIN_WINDOW;
        config.audio.hop_size = MIN_WINDOW;
        config.audio.buffer_size = MIN_WINDOW;
        let mut adapter = AnalysisAdapter::from_config(&config).unwrap();

        for sequence in 0..64u64 {
            let samples: Vec<f32> = (0..MIN_WINDOW)
                .map(|i| if (i + sequence as usize) % 3 == 0 { 0.8 } else { -0.4 })
                .collect();
            let features = adapter
                .analyze(&AudioFrame::new(samples, 0.0, sequence))
                .unwrap();
            assert!(features.pitch.pitch >= 0.0);
        }
    }
}
