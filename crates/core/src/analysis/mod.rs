//! Frequency extraction: turns interleaved stereo PCM bytes into colours.
//!
//! [`FrequencyAnalyzer`] is the synchronous per-window computation and can be
//! driven directly by tests. [`FrequencyExtractor`] runs it on a dedicated
//! worker fed by an [`ExtractorSink`].

use std::fmt;

use serde::Serialize;

use crate::{
    CaptureConfig, Color, CurrentsError, ExtractorConfig, Gradient, InterpolateMode, Result,
};

mod extractor;
mod filter;
mod latest;
mod sink;
mod spectrum;

pub use extractor::FrequencyExtractor;
pub use filter::{smooth, Damper, FrequencyState, HueMapping};
pub use latest::{latest, LatestSender};
pub use sink::{ByteSink, ExtractorSink};
pub use spectrum::{bin_frequency, bin_size, downmix, SpectrumAnalyzer, WindowFunction};

/// Everything computed for one processing tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnalysisFrame {
    pub tick: u64,
    pub raw_frequency: f64,
    pub displayed_frequency: f64,
    pub hue: f64,
    pub color: Color,
}

/// Window-at-a-time frequency and colour computation.
pub struct FrequencyAnalyzer {
    capture: CaptureConfig,
    config: ExtractorConfig,
    spectrum: SpectrumAnalyzer,
    state: FrequencyState,
    hues: HueMapping,
    gradient: Option<Gradient>,
    mode: InterpolateMode,
    samples: Vec<f32>,
    ticks: u64,
}

impl FrequencyAnalyzer {
    /// Validates both configurations. Only 2 channels at 44.1 kHz are
    /// accepted; the bin-size maths depends on it.
    pub fn new(capture: &CaptureConfig, config: ExtractorConfig) -> Result<Self> {
        if capture.channels != 2 || capture.sample_rate != 44_100 {
            return Err(CurrentsError::UnsupportedFormat {
                channels: capture.channels,
                sample_rate: capture.sample_rate,
            });
        }
        config.validate()?;

        Ok(Self {
            capture: *capture,
            spectrum: SpectrumAnalyzer::new(config.window_function),
            state: FrequencyState::new(config.smoothing_alpha, config.damping_window),
            hues: HueMapping::from(&config),
            gradient: None,
            mode: config.interpolation,
            samples: Vec::with_capacity(config.window_bytes / capture.frame_bytes()),
            ticks: 0,
            config,
        })
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn set_gradient(&mut self, gradient: Option<Gradient>) {
        self.gradient = gradient;
    }

    pub fn set_interpolation(&mut self, mode: InterpolateMode) {
        self.mode = mode;
    }

    /// Clears smoothing and damping history.
    pub fn reset(&mut self) {
        self.state.reset();
        self.ticks = 0;
    }

    /// Processes exactly one window of interleaved little-endian `f32` bytes.
    pub fn process_window(&mut self, window: &[u8]) -> Result<AnalysisFrame> {
        if window.len() != self.config.window_bytes {
            return Err(CurrentsError::BufferFault(format!(
                "expected a {}-byte window, got {}",
                self.config.window_bytes,
                window.len()
            )));
        }

        let channels = self.capture.channels as usize;
        downmix(window, channels, &mut self.samples);

        // The spectrum of a real signal is mirrored; only the first half is
        // distinct.
        let useful_count = self.samples.len() / channels;
        let index = self.spectrum.peak_bin(&self.samples, useful_count)?;
        let size = bin_size(self.capture.sample_rate, self.capture.channels, useful_count);
        let raw_frequency = bin_frequency(index, size, self.config.max_freq);

        let displayed_frequency = self.state.update(raw_frequency);
        let hue = self.hues.hue(displayed_frequency);
        let color = self.resolve_color(hue);

        self.ticks += 1;
        Ok(AnalysisFrame {
            tick: self.ticks,
            raw_frequency,
            displayed_frequency,
            hue,
            color,
        })
    }

    fn resolve_color(&self, hue: f64) -> Color {
        match &self.gradient {
            Some(gradient) => self.mode.interpolate(self.hues.position(hue), gradient),
            None => Color::from_hsv(hue, 1.0, 1.0),
        }
    }
}

impl fmt::Debug for FrequencyAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrequencyAnalyzer")
            .field("capture", &self.capture)
            .field("config", &self.config)
            .field("state", &self.state)
            .field("gradient", &self.gradient.as_ref().map(Gradient::len))
            .field("mode", &self.mode)
            .field("ticks", &self.ticks)
            .finish()
    }
}
