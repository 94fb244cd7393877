use std::{
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{select, tick, unbounded, Receiver, RecvTimeoutError, Sender};
use ringbuf::{
    traits::{Consumer, Observer},
    HeapCons,
};
use tracing::{debug, trace, warn, Dispatch};

use super::{latest, ExtractorSink, FrequencyAnalyzer, LatestSender};
use crate::{
    CaptureConfig, Color, CurrentsError, ExtractorConfig, Gradient, InterpolateMode, Outcome,
    Result,
};

/// How often the worker wakes between ticks to drop stale bytes and to look
/// for commands while waiting on a window.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

enum Command {
    Stop(Option<CurrentsError>),
    SetGradient(Option<Gradient>),
    SetInterpolation(InterpolateMode),
    SetTickInterval(Duration),
}

/// Background frequency extractor.
///
/// Bytes written into [`sink`](Self::sink) are analysed one window per tick
/// on a dedicated thread. Colours are published on a latest-value-wins
/// channel, so [`colors`](Self::colors) never yields a backlog.
#[derive(Debug)]
pub struct FrequencyExtractor {
    sink: ExtractorSink,
    colors: Receiver<Color>,
    commands: Sender<Command>,
    completion: Receiver<Outcome>,
    worker: Option<JoinHandle<()>>,
}

impl FrequencyExtractor {
    /// Starts an extractor that logs through the caller's current default
    /// subscriber.
    pub fn new(capture: &CaptureConfig, config: ExtractorConfig) -> Result<Self> {
        let dispatch = tracing::dispatcher::get_default(Dispatch::clone);
        Self::with_dispatch(capture, config, dispatch)
    }

    /// Starts an extractor whose worker reports diagnostics to `dispatch`.
    pub fn with_dispatch(
        capture: &CaptureConfig,
        config: ExtractorConfig,
        dispatch: Dispatch,
    ) -> Result<Self> {
        let analyzer = FrequencyAnalyzer::new(capture, config.clone())?;
        let (sink, consumer) =
            ExtractorSink::with_capacity(config.buffer_bytes, capture.frame_bytes());
        let (color_tx, colors) = latest();
        let (commands, command_rx) = unbounded();
        let (completion_tx, completion) = unbounded();

        let worker = Worker {
            window: vec![0; config.window_bytes],
            ticker: tick(config.tick_interval()),
            analyzer,
            consumer,
            sink: sink.clone(),
            commands: command_rx,
            colors: Some(color_tx),
            completion: completion_tx,
        };

        let handle = thread::Builder::new()
            .name("currents-extractor".into())
            .spawn(move || {
                let _guard = tracing::dispatcher::set_default(&dispatch);
                worker.run();
            })
            .map_err(|e| CurrentsError::msg(format!("failed to spawn extractor thread: {e}")))?;

        Ok(Self {
            sink,
            colors,
            commands,
            completion,
            worker: Some(handle),
        })
    }

    /// Byte sink to hand to a capture session. Clones share one ring buffer.
    pub fn sink(&self) -> ExtractorSink {
        self.sink.clone()
    }

    /// Stream of computed colours. Every receiver shares the same single
    /// slot; the stream ends when the extractor stops.
    pub fn colors(&self) -> Receiver<Color> {
        self.colors.clone()
    }

    /// Receives exactly one [`Outcome`] when the worker exits.
    pub fn completion(&self) -> Receiver<Outcome> {
        self.completion.clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    pub fn set_gradient(&self, gradient: Option<Gradient>) -> Result<()> {
        self.send(Command::SetGradient(gradient))
    }

    pub fn set_interpolation(&self, mode: InterpolateMode) -> Result<()> {
        self.send(Command::SetInterpolation(mode))
    }

    pub fn set_tick_interval(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(CurrentsError::InvalidConfig("tick interval must be positive".into()));
        }
        self.send(Command::SetTickInterval(interval))
    }

    /// Requests a clean stop. Observed at the worker's next iteration; a
    /// stopped extractor ignores the request.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop(None));
    }

    /// Stops the worker and reports `error` as the completion outcome.
    pub fn abort(&self, error: CurrentsError) {
        let _ = self.commands.send(Command::Stop(Some(error)));
    }

    /// Waits for the worker thread to exit.
    pub fn join(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("extractor worker panicked");
            }
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| CurrentsError::msg("frequency extractor has stopped"))
    }
}

impl Drop for FrequencyExtractor {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

enum Fill {
    Ready,
    Interrupted(Outcome),
}

struct Worker {
    analyzer: FrequencyAnalyzer,
    consumer: HeapCons<u8>,
    sink: ExtractorSink,
    commands: Receiver<Command>,
    colors: Option<LatestSender<Color>>,
    completion: Sender<Outcome>,
    ticker: Receiver<Instant>,
    window: Vec<u8>,
}

impl Worker {
    fn run(mut self) {
        debug!(
            window_bytes = self.window.len(),
            tick = ?self.analyzer.config().tick_interval(),
            "frequency extractor started"
        );

        let outcome = self.run_loop();

        self.sink.close();
        // Close the colour stream before reporting completion.
        self.colors.take();
        debug!(?outcome, "frequency extractor finished");
        let _ = self.completion.send(outcome);
    }

    fn run_loop(&mut self) -> Outcome {
        loop {
            let commands = self.commands.clone();
            let ticker = self.ticker.clone();

            select! {
                recv(commands) -> command => match command {
                    Ok(Command::Stop(error)) => return Outcome::from_abort(error),
                    Ok(other) => self.apply(other),
                    Err(_) => return Outcome::Stopped,
                },
                recv(ticker) -> _ => match self.fill_window() {
                    Ok(Fill::Ready) => {
                        if let Err(error) = self.process_window() {
                            return Outcome::Failed(error);
                        }
                    }
                    Ok(Fill::Interrupted(outcome)) => return outcome,
                    Err(error) => return Outcome::Failed(error),
                },
                default(POLL_INTERVAL) => self.discard_stale(),
            }
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::SetGradient(gradient) => {
                debug!(keypoints = gradient.as_ref().map(Gradient::len), "gradient changed");
                self.analyzer.set_gradient(gradient);
            }
            Command::SetInterpolation(mode) => {
                debug!(%mode, "interpolation changed");
                self.analyzer.set_interpolation(mode);
            }
            Command::SetTickInterval(interval) => {
                debug!(?interval, "tick interval changed");
                self.ticker = tick(interval);
            }
            Command::Stop(_) => {}
        }
    }

    /// Keeps at most one window buffered so each tick sees current audio.
    fn discard_stale(&mut self) {
        let occupied = self.consumer.occupied_len();
        let window = self.window.len();
        if occupied > window {
            let skipped = self.consumer.skip(occupied - window);
            trace!(skipped, "discarded stale audio");
        }
    }

    /// Blocks until a full window is buffered, then copies it out. Commands
    /// are still served while waiting so a stop is never stuck behind a
    /// silent device.
    fn fill_window(&mut self) -> Result<Fill> {
        loop {
            if self.consumer.occupied_len() >= self.window.len() {
                self.discard_stale();
                let read = self.consumer.pop_slice(&mut self.window);
                if read != self.window.len() {
                    return Err(CurrentsError::BufferFault(format!(
                        "read {read} of {} buffered bytes",
                        self.window.len()
                    )));
                }
                return Ok(Fill::Ready);
            }

            match self.commands.recv_timeout(POLL_INTERVAL) {
                Ok(Command::Stop(error)) => {
                    return Ok(Fill::Interrupted(Outcome::from_abort(error)))
                }
                Ok(other) => self.apply(other),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Ok(Fill::Interrupted(Outcome::Stopped))
                }
            }
        }
    }

    fn process_window(&mut self) -> Result<()> {
        let frame = self.analyzer.process_window(&self.window)?;
        trace!(
            tick = frame.tick,
            raw = frame.raw_frequency,
            displayed = frame.displayed_frequency,
            hue = frame.hue,
            color = %frame.color,
            "processed window"
        );
        if let Some(colors) = &self.colors {
            colors.publish(frame.color);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tests::stereo_sine;
    use crate::ByteSink;

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_config() -> ExtractorConfig {
        ExtractorConfig {
            tick_interval_ms: 10,
            smoothing_alpha: 0.0,
            damping_window: 1,
            ..Default::default()
        }
    }

    #[test]
    fn rejects_unsupported_format() {
        let capture = CaptureConfig {
            channels: 1,
            sample_rate: 44_100,
        };
        assert!(matches!(
            FrequencyExtractor::new(&capture, fast_config()),
            Err(CurrentsError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn publishes_colours_for_written_audio() {
        let extractor = FrequencyExtractor::new(&CaptureConfig::default(), fast_config()).unwrap();
        let mut sink = extractor.sink();
        sink.write_block(&stereo_sine(440.0, 1024)).unwrap();

        let colour = extractor.colors().recv_timeout(WAIT).unwrap();
        // 440 Hz maps to a hue of about 111 degrees.
        assert!(colour.g > colour.r, "{colour:?}");
        assert_eq!(colour.b, 0.0);
    }

    #[test]
    fn stop_closes_stream_and_reports_stopped() {
        let mut extractor =
            FrequencyExtractor::new(&CaptureConfig::default(), fast_config()).unwrap();
        let colors = extractor.colors();
        let completion = extractor.completion();

        extractor.stop();
        assert_eq!(completion.recv_timeout(WAIT), Ok(Outcome::Stopped));
        assert!(colors.recv_timeout(WAIT).is_err());

        extractor.join();
        assert!(!extractor.is_running());
        assert!(extractor.set_interpolation(InterpolateMode::Blocky).is_err());
    }

    #[test]
    fn stop_is_observed_while_waiting_for_audio() {
        let config = ExtractorConfig {
            tick_interval_ms: 1,
            ..fast_config()
        };
        let extractor = FrequencyExtractor::new(&CaptureConfig::default(), config).unwrap();
        // Let the worker block in the window fill.
        thread::sleep(Duration::from_millis(20));
        extractor.stop();
        assert_eq!(extractor.completion().recv_timeout(WAIT), Ok(Outcome::Stopped));
    }

    #[test]
    fn abort_reports_its_error_and_closes_the_sink() {
        let extractor = FrequencyExtractor::new(&CaptureConfig::default(), fast_config()).unwrap();
        let mut sink = extractor.sink();
        extractor.abort(CurrentsError::msg("device vanished"));

        assert_eq!(
            extractor.completion().recv_timeout(WAIT),
            Ok(Outcome::Failed(CurrentsError::msg("device vanished")))
        );
        assert_eq!(sink.write_block(&[0; 8]), Err(CurrentsError::SinkClosed));
    }

    #[test]
    fn gradient_updates_reach_the_worker() {
        let extractor = FrequencyExtractor::new(&CaptureConfig::default(), fast_config()).unwrap();
        let green = Color::new(0.0, 1.0, 0.0);
        extractor
            .set_gradient(Some(Gradient::new(vec![crate::Keypoint::new(green, 0.0)])))
            .unwrap();

        let mut sink = extractor.sink();
        let colors = extractor.colors();
        let deadline = Instant::now() + WAIT;
        loop {
            sink.write_block(&stereo_sine(300.0, 1024)).unwrap();
            let colour = colors.recv_timeout(Duration::from_millis(200));
            if colour == Ok(green) {
                break;
            }
            assert!(Instant::now() < deadline, "gradient never applied");
        }
    }
}
