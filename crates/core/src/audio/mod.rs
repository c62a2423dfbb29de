mod capture;

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

pub use capture::{list_input_devices, CaptureStream};

/// One hop of mono samples as delivered by the capture driver.
///
/// Immutable once built; clones share the sample storage.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Arc<[f32]>,
    timestamp: f64,
    sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: impl Into<Arc<[f32]>>, timestamp: f64, sequence: u64) -> Self {
        Self {
            samples: samples.into(),
            timestamp,
            sequence,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Wall-clock seconds at which the frame was completed by the driver.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Capture order, starting at zero.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Seconds since the Unix epoch.
pub fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

/// Re-blocks interleaved driver buffers into exact hop-sized mono frames.
///
/// Drivers do not always honour the requested buffer size, so the callback
/// feeds whatever it receives and gets back zero or more complete frames.
/// Multi-channel input is averaged down to mono.
#[derive(Debug)]
pub struct FrameAssembler {
    hop_size: usize,
    channels: usize,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl FrameAssembler {
    pub fn new(hop_size: usize, channels: usize) -> Self {
        Self {
            hop_size: hop_size.max(1),
            channels: channels.max(1),
            pending: Vec::with_capacity(hop_size.max(1)),
            next_sequence: 0,
        }
    }

    /// Appends `interleaved` samples and hands every completed frame to `emit`.
    pub fn push<F>(&mut self, interleaved: &[f32], mut emit: F)
    where
        F: FnMut(AudioFrame),
    {
        for group in interleaved.chunks(self.channels) {
            let mono = group.iter().sum::<f32>() / group.len() as f32;
            self.pending.push(mono);

            if self.pending.len() == self.hop_size {
                let samples: Arc<[f32]> = Arc::from(self.pending.as_slice());
                self.pending.clear();
                let frame = AudioFrame::new(samples, unix_seconds(), self.next_sequence);
                self.next_sequence += 1;
                emit(frame);
            }
        }
    }

    /// Samples waiting for the next frame to complete.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
