use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{config::SAMPLE_SIZE_BYTES, CurrentsError, Result};

/// Taper applied to the mono samples before the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WindowFunction {
    #[default]
    Rectangular,
    Hann,
}

/// Averages each interleaved frame of little-endian `f32` samples into one
/// mono sample. Trailing bytes that do not form a whole frame are ignored.
pub fn downmix(bytes: &[u8], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    let frame_bytes = channels * SAMPLE_SIZE_BYTES;
    if frame_bytes == 0 {
        return;
    }

    for frame in bytes.chunks_exact(frame_bytes) {
        let sum: f32 = frame
            .chunks_exact(SAMPLE_SIZE_BYTES)
            .map(|s| f32::from_le_bytes([s[0], s[1], s[2], s[3]]))
            .sum();
        out.push(sum / channels as f32);
    }
}

/// Width of one useful bin: the Nyquist-style limit `sample_rate / channels`
/// spread across `useful_count` bins.
pub fn bin_size(sample_rate: u32, channels: u32, useful_count: usize) -> f64 {
    if useful_count == 0 || channels == 0 {
        return 0.0;
    }
    (sample_rate as f64 / channels as f64) / useful_count as f64
}

/// Converts a winning bin index to a frequency, hard-clamped to `max_freq`.
pub fn bin_frequency(index: usize, bin_size: f64, max_freq: f64) -> f64 {
    (bin_size * index as f64).min(max_freq)
}

/// Real FFT with cached plan and buffers, used to locate the strongest bin.
pub struct SpectrumAnalyzer {
    window: WindowFunction,
    planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl SpectrumAnalyzer {
    pub fn new(window: WindowFunction) -> Self {
        Self {
            window,
            planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    /// Returns the index of the largest magnitude among the first
    /// `useful_count` bins. Ties keep the lowest index; silence yields 0.
    pub fn peak_bin(&mut self, samples: &[f32], useful_count: usize) -> Result<usize> {
        let len = samples.len();
        if len < 2 {
            return Err(CurrentsError::BufferFault(format!(
                "cannot transform {len} sample(s)"
            )));
        }

        let window = self.window;
        let fft = self.prepare_fft(len);
        for (index, (slot, value)) in fft.input.iter_mut().zip(samples).enumerate() {
            *slot = match window {
                WindowFunction::Rectangular => *value,
                WindowFunction::Hann => *value * hann_value(index, len),
            };
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)
            .map_err(|e| CurrentsError::BufferFault(format!("fft failed: {e}")))?;

        let mut max = 0.0;
        let mut peak = 0;
        for (i, bin) in fft.spectrum.iter().take(useful_count).enumerate() {
            let magnitude = bin.norm();
            if magnitude > max {
                max = magnitude;
                peak = i;
            }
        }
        Ok(peak)
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        if self.fft.as_ref().map_or(true, |fft| fft.size != size) {
            self.fft = None;
        }

        let planner = &mut self.planner;
        self.fft.get_or_insert_with(|| {
            let plan = planner.plan_fft_forward(size);
            FftResources {
                size,
                scratch: plan.make_scratch_vec(),
                spectrum: plan.make_output_vec(),
                input: plan.make_input_vec(),
                plan,
            }
        })
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("window", &self.window)
            .field("fft_size", &self.fft.as_ref().map(|fft| fft.size))
            .finish()
    }
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
