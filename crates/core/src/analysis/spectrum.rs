use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::Result;

/// Sliding analysis window advanced by one hop per call, with the magnitude
/// spectrum of the Hann-weighted window computed after each advance.
pub(crate) struct SpectralWindow {
    buffer: Vec<f32>,
    window: Vec<f32>,
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    magnitudes: Vec<f32>,
}

impl SpectralWindow {
    pub(crate) fn new(window_size: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(window_size);
        let input = plan.make_input_vec();
        let spectrum = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();
        let magnitudes = vec![0.0; spectrum.len()];

        Self {
            buffer: vec![0.0; window_size],
            window: (0..window_size)
                .map(|index| hann_value(index, window_size))
                .collect(),
            plan,
            input,
            spectrum,
            scratch,
            magnitudes,
        }
    }

    /// Slides `hop` into the window and returns the new magnitude spectrum.
    pub(crate) fn push(&mut self, hop: &[f32]) -> Result<&[f32]> {
        slide(&mut self.buffer, hop);

        for ((input, sample), weight) in self.input.iter_mut().zip(&self.buffer).zip(&self.window) {
            *input = sample * weight;
        }

        self.plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;

        for (magnitude, bin) in self.magnitudes.iter_mut().zip(&self.spectrum) {
            *magnitude = bin.norm();
        }

        Ok(&self.magnitudes)
    }

    pub(crate) fn bins(&self) -> usize {
        self.magnitudes.len()
    }
}

impl fmt::Debug for SpectralWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralWindow")
            .field("size", &self.buffer.len())
            .finish()
    }
}

/// Shifts `buffer` left by `hop.len()` and appends `hop` at the end.
pub(crate) fn slide(buffer: &mut [f32], hop: &[f32]) {
    let hop = &hop[hop.len().saturating_sub(buffer.len())..];
    let keep = buffer.len() - hop.len();
    buffer.copy_within(hop.len().., 0);
    buffer[keep..].copy_from_slice(hop);
}

/// Signal level in dB relative to full scale, from the RMS of `samples`.
pub(crate) fn level_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return f32::NEG_INFINITY;
    }
    let energy: f32 = samples.iter().map(|sample| sample * sample).sum();
    let rms = (energy / samples.len() as f32).sqrt();
    20.0 * rms.max(1e-12).log10()
}

/// Vertex offset of the parabola through three neighbouring values, in
/// [-0.5, 0.5] relative to the middle one.
pub(crate) fn parabolic_offset(left: f32, centre: f32, right: f32) -> f32 {
    let denominator = left - 2.0 * centre + right;
    if denominator.abs() <= f32::EPSILON {
        return 0.0;
    }
    (0.5 * (left - right) / denominator).clamp(-0.5, 0.5)
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
