//! Glue between capture, extraction and the serial link.

use std::{fmt, time::Duration};

use crossbeam_channel::{never, select, Receiver};
use tracing::{debug, error, info, warn, Dispatch};

use crate::{
    audio::{CaptureBackend, CaptureSession, Device},
    serial::{SerialBackend, SerialColorSink},
    AppConfig, CaptureConfig, Color, CurrentsError, ExtractorConfig, FrequencyExtractor, Gradient,
    InterpolateMode, Result,
};

/// Why a capture stream or extractor worker terminated.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Stopped on request.
    Stopped,
    /// Stopped so another device could take over. Not a failure.
    StoppedForDeviceChange,
    Failed(CurrentsError),
}

impl Outcome {
    pub fn from_abort(error: Option<CurrentsError>) -> Self {
        error.map_or(Outcome::Stopped, Outcome::Failed)
    }

    /// True for requested stops, including device changes.
    pub fn is_intentional(&self) -> bool {
        !self.is_failure()
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn error(&self) -> Option<&CurrentsError> {
        match self {
            Outcome::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Stopped => f.write_str("stopped"),
            Outcome::StoppedForDeviceChange => f.write_str("stopped for device change"),
            Outcome::Failed(error) => write!(f, "failed: {error}"),
        }
    }
}

/// What one [`Pipeline::step`] observed.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A new colour was computed and handed to the serial link.
    Color(Color),
    /// Nothing happened before the timeout.
    Idle,
    CaptureEnded(Outcome),
    ExtractorEnded(Outcome),
}

/// Audio in, colours out.
///
/// The pipeline is driven by calling [`step`](Self::step) in a loop. Serial
/// failures are logged and never stop capture or analysis.
pub struct Pipeline<C: CaptureBackend, S: SerialBackend> {
    capture: CaptureSession<C>,
    extractor: FrequencyExtractor,
    serial: SerialColorSink<S>,
    capture_config: CaptureConfig,
    extractor_config: ExtractorConfig,
    gradient: Option<Gradient>,
    dispatch: Dispatch,
    colors: Receiver<Color>,
    capture_done: Receiver<Outcome>,
    extractor_done: Receiver<Outcome>,
    serial_failing: bool,
}

impl<C: CaptureBackend, S: SerialBackend> Pipeline<C, S> {
    pub fn new(capture: C, serial: S, config: &AppConfig) -> Result<Self> {
        let dispatch = tracing::dispatcher::get_default(Dispatch::clone);
        Self::with_dispatch(capture, serial, config, dispatch)
    }

    /// Builds every component with `dispatch` as its diagnostic sink.
    pub fn with_dispatch(
        capture: C,
        serial: S,
        config: &AppConfig,
        dispatch: Dispatch,
    ) -> Result<Self> {
        let extractor = FrequencyExtractor::with_dispatch(
            &config.capture,
            config.extractor.clone(),
            dispatch.clone(),
        )?;
        let capture = CaptureSession::with_dispatch(capture, dispatch.clone());
        let serial =
            SerialColorSink::with_dispatch(serial, config.serial.clone(), dispatch.clone());

        Ok(Self {
            colors: extractor.colors(),
            capture_done: capture.completion(),
            extractor_done: extractor.completion(),
            capture,
            extractor,
            serial,
            capture_config: config.capture,
            extractor_config: config.extractor.clone(),
            gradient: None,
            dispatch,
            serial_failing: false,
        })
    }

    pub fn capture(&self) -> &CaptureSession<C> {
        &self.capture
    }

    pub fn serial(&self) -> &SerialColorSink<S> {
        &self.serial
    }

    pub fn list_devices(&self) -> Result<Vec<Device>> {
        self.capture.list_devices()
    }

    pub fn find_device(&self, name: &str) -> Result<Device> {
        self.capture.find_device(name)
    }

    /// Starts capturing from `device`, replacing any running stream. A
    /// terminated extractor is rebuilt first.
    pub fn start(&mut self, device: &Device) -> Result<()> {
        if !self.extractor.is_running() {
            self.rebuild_extractor()?;
        }
        self.capture
            .start_capture(device, self.extractor.sink(), &self.capture_config)
    }

    /// Moves capture to `device`. The old stream ends with
    /// [`Outcome::StoppedForDeviceChange`]; smoothing history is kept.
    pub fn switch_device(&mut self, device: &Device) -> Result<()> {
        info!(device = %device.name, "switching capture device");
        self.start(device)
    }

    pub fn stop(&mut self) {
        self.capture.stop_capture();
    }

    pub fn connect(&mut self, port: &str) -> Result<()> {
        self.serial_failing = false;
        self.serial.connect(port)
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.serial.disconnect()
    }

    pub fn set_gradient(&mut self, gradient: Option<Gradient>) -> Result<()> {
        self.gradient = gradient.clone();
        self.extractor.set_gradient(gradient)
    }

    pub fn set_interpolation(&mut self, mode: InterpolateMode) -> Result<()> {
        self.extractor_config.interpolation = mode;
        self.extractor.set_interpolation(mode)
    }

    pub fn set_tick_interval(&mut self, interval: Duration) -> Result<()> {
        self.extractor.set_tick_interval(interval)?;
        self.extractor_config.tick_interval_ms = interval.as_millis().max(1) as u64;
        Ok(())
    }

    /// Waits up to `timeout` for the next colour or termination.
    pub fn step(&mut self, timeout: Duration) -> PipelineEvent {
        let colors = self.colors.clone();
        let capture_done = self.capture_done.clone();
        let extractor_done = self.extractor_done.clone();

        select! {
            recv(colors) -> color => match color {
                Ok(color) => {
                    self.forward(color);
                    PipelineEvent::Color(color)
                }
                // The colour stream closes just before completion is sent.
                Err(_) => {
                    self.colors = never();
                    match self.extractor_done.recv_timeout(timeout) {
                        Ok(outcome) => self.extractor_ended(outcome),
                        Err(_) => PipelineEvent::Idle,
                    }
                }
            },
            recv(capture_done) -> outcome => match outcome {
                Ok(outcome) => self.capture_ended(outcome),
                Err(_) => PipelineEvent::Idle,
            },
            recv(extractor_done) -> outcome => match outcome {
                Ok(outcome) => self.extractor_ended(outcome),
                Err(_) => {
                    self.extractor_done = never();
                    PipelineEvent::Idle
                }
            },
            default(timeout) => PipelineEvent::Idle,
        }
    }

    /// Stops everything, blanks the controller and releases the capture
    /// context. Returns the first failure.
    pub fn shutdown(&mut self) -> Result<()> {
        self.capture.stop_capture();
        self.extractor.stop();
        self.extractor.join();
        let serial = self.serial.disconnect();
        let capture = self.capture.destroy();
        info!("pipeline shut down");
        serial.and(capture)
    }

    fn forward(&mut self, color: Color) {
        match self.serial.send_color(color) {
            Ok(()) => {
                if self.serial_failing {
                    info!("serial link recovered");
                    self.serial_failing = false;
                }
            }
            Err(error) if !self.serial_failing => {
                warn!(%error, "colour not delivered; capture keeps running");
                self.serial_failing = true;
            }
            Err(error) => debug!(%error, "colour not delivered"),
        }
    }

    fn capture_ended(&mut self, outcome: Outcome) -> PipelineEvent {
        match &outcome {
            Outcome::StoppedForDeviceChange => debug!("capture handed over to new device"),
            Outcome::Stopped => info!("capture stopped"),
            Outcome::Failed(error) => {
                error!(%error, "capture failed");
                // Release the dead stream; its completion was already sent.
                self.capture.stop_capture();
            }
        }
        PipelineEvent::CaptureEnded(outcome)
    }

    fn extractor_ended(&mut self, outcome: Outcome) -> PipelineEvent {
        self.colors = never();
        self.extractor_done = never();
        // The worker exits right after reporting; reap it so `start` rebuilds.
        self.extractor.join();
        if let Outcome::Failed(error) = &outcome {
            error!(%error, "frequency extractor failed; stopping capture");
            self.capture.stop_capture();
        }
        PipelineEvent::ExtractorEnded(outcome)
    }

    fn rebuild_extractor(&mut self) -> Result<()> {
        self.extractor.join();
        let extractor = FrequencyExtractor::with_dispatch(
            &self.capture_config,
            self.extractor_config.clone(),
            self.dispatch.clone(),
        )?;
        if self.gradient.is_some() {
            extractor.set_gradient(self.gradient.clone())?;
        }
        debug!("frequency extractor restarted");
        self.colors = extractor.colors();
        self.extractor_done = extractor.completion();
        self.extractor = extractor;
        Ok(())
    }
}

impl<C: CaptureBackend, S: SerialBackend> fmt::Debug for Pipeline<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("capture", &self.capture)
            .field("extractor", &self.extractor)
            .field("serial", &self.serial)
            .finish()
    }
}
