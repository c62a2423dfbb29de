//! Core library for Pulsecast.
//!
//! Live audio arrives from the capture driver in hop-sized frames, is
//! analysed for onsets, beats and pitch by a single worker that owns the
//! detector state, and leaves as one JSON datagram per frame.
//!
//! ```text
//! cpal callback -> FrameAssembler -> FrameDispatcher -> [bounded FIFO]
//!     -> worker: AnalysisAdapter -> FeatureRecord -> DatagramSink
//! ```

pub mod analysis;
pub mod audio;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod net;
pub mod wire;

pub use analysis::{AnalysisAdapter, OnsetDetector, PitchDetector, TempoDetector};
pub use audio::{list_input_devices, unix_seconds, AudioFrame, CaptureStream, FrameAssembler};
pub use config::{
    AppConfig, AudioConfig, DetectorConfig, DispatchConfig, NetworkConfig, OverflowPolicy,
};
pub use dispatch::{
    spawn_pipeline, DispatchOutcome, FrameDispatcher, PipelineHandle, PipelineStats,
    StatsSnapshot,
};
pub use error::{PulsecastError, Result};
pub use net::{DatagramSink, UdpSink};
pub use wire::{FeatureRecord, FrameFeatures, OnsetResult, PitchResult, TempoResult};
