//! Core library for Currents.
//!
//! Audio is captured from an input device, its dominant frequency is
//! extracted once per tick, mapped to a hue and then to a colour through an
//! optional gradient, and the colour is streamed to a lighting controller
//! over a serial link. Each module owns one stage of that chain; the
//! [`lifecycle`] module wires them together.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod mapping;
pub mod serial;

#[cfg(test)]
mod support;

pub use analysis::{
    AnalysisFrame, ByteSink, ExtractorSink, FrequencyAnalyzer, FrequencyExtractor, WindowFunction,
};
pub use audio::{CaptureBackend, CaptureSession, CpalBackend, Device, DeviceId};
pub use config::{AppConfig, CaptureConfig, ExtractorConfig, SerialConfig};
pub use error::{CurrentsError, Result};
pub use lifecycle::{Outcome, Pipeline, PipelineEvent};
pub use mapping::{Color, Gradient, GradientSet, InterpolateMode, Keypoint, Rgb8};
pub use serial::{SerialBackend, SerialColorSink, SerialLink, SystemSerial};
