use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{CurrentsError, InterpolateMode, Result, WindowFunction};

/// Size in bytes of one 32-bit float sample.
pub const SAMPLE_SIZE_BYTES: usize = 4;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub extractor: ExtractorConfig,
    pub serial: SerialConfig,
    /// Name of the capture device to open on startup.
    pub device: Option<String>,
    /// Name of the gradient to colour with; HSV is used when absent.
    pub gradient: Option<String>,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.extractor.validate()?;
        Ok(config)
    }

    /// Writes the configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

/// Format of the PCM stream requested from the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub channels: u32,
    pub sample_rate: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 44_100,
        }
    }
}

impl CaptureConfig {
    /// Number of bytes in one interleaved frame (one sample per channel).
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * SAMPLE_SIZE_BYTES
    }
}

/// Tuning of the frequency extractor's processing loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Period of the processing tick in milliseconds.
    pub tick_interval_ms: u64,
    /// Bytes consumed per tick. Must be a whole number of stereo frames.
    pub window_bytes: usize,
    /// Capacity of the ring buffer between the capture callback and the
    /// extractor. Must hold at least two windows.
    pub buffer_bytes: usize,
    /// Weight of the previous frequency in the exponential smoothing step.
    pub smoothing_alpha: f64,
    /// Number of smoothed frequencies averaged for display.
    pub damping_window: usize,
    /// Hard clamp applied to the raw frequency.
    pub max_freq: f64,
    /// Frequency at which the hue reaches `useful_freq_hue`.
    pub max_useful_freq: f64,
    pub total_hues: f64,
    pub useful_freq_hue: f64,
    pub interpolation: InterpolateMode,
    pub window_function: WindowFunction,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 250,
            window_bytes: 1024 * 8,
            buffer_bytes: 1024 * 8 * 4,
            smoothing_alpha: 0.7,
            damping_window: 4,
            max_freq: 2500.0,
            max_useful_freq: 1200.0,
            total_hues: 320.0,
            useful_freq_hue: 310.0,
            interpolation: InterpolateMode::Blended,
            window_function: WindowFunction::Rectangular,
        }
    }
}

impl ExtractorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Checks every value the processing loop divides by or indexes with.
    pub fn validate(&self) -> Result<()> {
        let frame = CaptureConfig::default().frame_bytes();
        if self.tick_interval_ms == 0 {
            return Err(invalid("tick interval must be positive"));
        }
        // Two frames per useful bin, so the window needs at least four frames.
        if self.window_bytes < frame * 4 || self.window_bytes % frame != 0 {
            return Err(invalid(format!(
                "window of {} bytes is not a whole number of {frame}-byte frames (minimum four)",
                self.window_bytes
            )));
        }
        if self.buffer_bytes / 2 < self.window_bytes {
            return Err(invalid(format!(
                "buffer of {} bytes must hold at least two {}-byte windows",
                self.buffer_bytes, self.window_bytes
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing_alpha) {
            return Err(invalid(format!(
                "smoothing alpha {} is outside [0, 1)",
                self.smoothing_alpha
            )));
        }
        if self.damping_window == 0 {
            return Err(invalid("damping window must hold at least one value"));
        }
        let positive = [
            ("max_freq", self.max_freq),
            ("max_useful_freq", self.max_useful_freq),
            ("total_hues", self.total_hues),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(format!("{name} must be positive, got {value}")));
            }
        }
        if !(self.useful_freq_hue.is_finite() && self.useful_freq_hue >= 0.0) {
            return Err(invalid("useful_freq_hue must not be negative"));
        }
        if self.useful_freq_hue > self.total_hues {
            return Err(invalid(format!(
                "useful_freq_hue {} exceeds total_hues {}",
                self.useful_freq_hue, self.total_hues
            )));
        }
        Ok(())
    }
}

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port to connect to on startup.
    pub port: Option<String>,
    pub baud: u32,
    /// How many black frames are written before the port is closed.
    pub black_repeats: usize,
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: 9600,
            black_repeats: 3,
            read_timeout_ms: 100,
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn invalid<T: Into<String>>(msg: T) -> CurrentsError {
    CurrentsError::InvalidConfig(msg.into())
}
