//! Capture session: owns the audio backend and at most one live stream.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, warn, Dispatch};

use crate::{ByteSink, CaptureConfig, CurrentsError, Outcome, Result};

mod backend;

pub use backend::CpalBackend;

/// Opaque backend identifier of a capture endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new<T: Into<String>>(id: T) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A capture endpoint as enumerated by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Device {
    pub name: String,
    pub id: DeviceId,
}

impl Device {
    pub fn new<N: Into<String>>(name: N, id: DeviceId) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Called on the backend's thread with each block of interleaved
/// little-endian `f32` bytes.
pub type BlockCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;
/// Called on the backend's thread when the stream fails.
pub type ErrorCallback = Box<dyn FnMut(CurrentsError) + Send + 'static>;

/// Boundary to the audio host.
pub trait CaptureBackend {
    /// Live stream handle. Dropping it stops delivery; once `drop` returns no
    /// further callbacks run.
    type Stream;

    fn devices(&self) -> Result<Vec<Device>>;

    fn open(
        &self,
        device: &Device,
        config: &CaptureConfig,
        on_block: BlockCallback,
        on_error: ErrorCallback,
    ) -> Result<Self::Stream>;
}

struct ActiveCapture<S> {
    device: Device,
    stream: S,
    finished: Arc<AtomicBool>,
}

/// Streams raw PCM from one device at a time into a [`ByteSink`].
///
/// Termination of each stream is reported exactly once on the
/// [`completion`](Self::completion) channel.
pub struct CaptureSession<B: CaptureBackend> {
    backend: Option<B>,
    active: Option<ActiveCapture<B::Stream>>,
    done_tx: Sender<Outcome>,
    done_rx: Receiver<Outcome>,
    dispatch: Dispatch,
}

impl<B: CaptureBackend> CaptureSession<B> {
    pub fn new(backend: B) -> Self {
        Self::with_dispatch(backend, tracing::dispatcher::get_default(Dispatch::clone))
    }

    /// Uses `dispatch` for diagnostics raised on the backend's callback
    /// thread.
    pub fn with_dispatch(backend: B, dispatch: Dispatch) -> Self {
        let (done_tx, done_rx) = unbounded();
        Self {
            backend: Some(backend),
            active: None,
            done_tx,
            done_rx,
            dispatch,
        }
    }

    /// Enumerates capture devices.
    pub fn list_devices(&self) -> Result<Vec<Device>> {
        self.backend()?.devices()
    }

    /// Finds a device by exact name.
    pub fn find_device(&self, name: &str) -> Result<Device> {
        self.list_devices()?
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| CurrentsError::Backend(format!("no capture device named {name:?}")))
    }

    /// Stops whatever is running, then opens `device` and forwards every
    /// block to `sink`.
    ///
    /// Replacing a running stream reports
    /// [`Outcome::StoppedForDeviceChange`] for it before the new stream is
    /// opened, so two devices never feed the same sink at once.
    pub fn start_capture<S: ByteSink>(
        &mut self,
        device: &Device,
        sink: S,
        config: &CaptureConfig,
    ) -> Result<()> {
        self.backend()?;
        self.stop_with(Outcome::StoppedForDeviceChange);

        let finished = Arc::new(AtomicBool::new(false));
        let on_block = self.block_callback(sink, Arc::clone(&finished));
        let on_error = self.error_callback(Arc::clone(&finished));

        let stream = self.backend()?.open(device, config, on_block, on_error)?;
        info!(
            device = %device.name,
            channels = config.channels,
            sample_rate = config.sample_rate,
            "capture started"
        );
        self.active = Some(ActiveCapture {
            device: device.clone(),
            stream,
            finished,
        });
        Ok(())
    }

    /// Stops the running stream, if any. Its termination arrives on the
    /// completion channel as [`Outcome::Stopped`]; with nothing running this
    /// is a no-op.
    pub fn stop_capture(&mut self) {
        self.stop_with(Outcome::Stopped);
    }

    /// Releases the backend. Fails with [`CurrentsError::InUse`] while a
    /// stream is running.
    pub fn destroy(&mut self) -> Result<()> {
        if self.is_active() {
            return Err(CurrentsError::InUse);
        }
        if self.backend.take().is_some() {
            debug!("capture context released");
        }
        Ok(())
    }

    /// True while a stream is open, including one whose sink has failed but
    /// has not been stopped yet.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_device(&self) -> Option<&Device> {
        self.active.as_ref().map(|a| &a.device)
    }

    /// Receives one [`Outcome`] per terminated stream.
    pub fn completion(&self) -> Receiver<Outcome> {
        self.done_rx.clone()
    }

    fn backend(&self) -> Result<&B> {
        self.backend
            .as_ref()
            .ok_or_else(|| CurrentsError::Backend("capture context has been destroyed".into()))
    }

    fn stop_with(&mut self, reason: Outcome) {
        let Some(active) = self.active.take() else {
            return;
        };
        let ActiveCapture {
            device,
            stream,
            finished,
        } = active;
        drop(stream);

        if !finished.swap(true, Ordering::AcqRel) {
            debug!(device = %device.name, ?reason, "capture stopped");
            let _ = self.done_tx.send(reason);
        }
    }

    fn block_callback<S: ByteSink>(&self, mut sink: S, finished: Arc<AtomicBool>) -> BlockCallback {
        let done = self.done_tx.clone();
        let dispatch = self.dispatch.clone();
        Box::new(move |bytes: &[u8]| {
            // Blocks arriving after a failure are dropped until restart.
            if finished.load(Ordering::Acquire) {
                return;
            }
            if let Err(error) = sink.write_block(bytes) {
                if !finished.swap(true, Ordering::AcqRel) {
                    tracing::dispatcher::with_default(&dispatch, || {
                        warn!(%error, "capture sink failed; dropping further audio");
                    });
                    let _ = done.send(Outcome::Failed(error));
                }
            }
        })
    }

    fn error_callback(&self, finished: Arc<AtomicBool>) -> ErrorCallback {
        let done = self.done_tx.clone();
        let dispatch = self.dispatch.clone();
        Box::new(move |error: CurrentsError| {
            if !finished.swap(true, Ordering::AcqRel) {
                tracing::dispatcher::with_default(&dispatch, || {
                    warn!(%error, "capture stream failed");
                });
                let _ = done.send(Outcome::Failed(error));
            }
        })
    }
}

impl<B: CaptureBackend> Drop for CaptureSession<B> {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

impl<B: CaptureBackend> fmt::Debug for CaptureSession<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSession")
            .field("destroyed", &self.backend.is_none())
            .field("active_device", &self.active_device())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::TryRecvError;

    use super::*;
    use crate::support::{MockCaptureBackend, MockEvent};

    fn session() -> (CaptureSession<MockCaptureBackend>, MockCaptureBackend) {
        let backend = MockCaptureBackend::with_devices(&["Line In", "USB Mic"]);
        (CaptureSession::new(backend.clone()), backend)
    }

    fn recording_sink() -> (impl ByteSink, Receiver<Vec<u8>>) {
        let (tx, rx) = unbounded();
        let sink = move |bytes: &[u8]| -> Result<()> {
            let _ = tx.send(bytes.to_vec());
            Ok(())
        };
        (sink, rx)
    }

    #[test]
    fn forwards_blocks_to_the_sink() {
        let (mut session, backend) = session();
        let devices = session.list_devices().unwrap();
        let (sink, blocks) = recording_sink();

        session
            .start_capture(&devices[0], sink, &CaptureConfig::default())
            .unwrap();
        backend.deliver(&[1, 2, 3, 4]);

        assert_eq!(blocks.try_recv(), Ok(vec![1, 2, 3, 4]));
        assert_eq!(session.active_device(), Some(&devices[0]));
    }

    #[test]
    fn device_change_stops_the_old_stream_first() {
        let (mut session, backend) = session();
        let devices = session.list_devices().unwrap();
        let completion = session.completion();
        let config = CaptureConfig::default();

        let (sink, _) = recording_sink();
        session.start_capture(&devices[0], sink, &config).unwrap();
        let (sink, _) = recording_sink();
        session.start_capture(&devices[1], sink, &config).unwrap();

        assert_eq!(
            backend.events(),
            vec![
                MockEvent::Opened("Line In".into()),
                MockEvent::Closed("Line In".into()),
                MockEvent::Opened("USB Mic".into()),
            ]
        );
        assert_eq!(completion.try_recv(), Ok(Outcome::StoppedForDeviceChange));
        assert_eq!(completion.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(session.active_device(), Some(&devices[1]));
        assert!(Outcome::StoppedForDeviceChange.is_intentional());
    }

    #[test]
    fn stop_reports_completion_once() {
        let (mut session, _backend) = session();
        let devices = session.list_devices().unwrap();
        let completion = session.completion();

        // Nothing running: no-op.
        session.stop_capture();
        assert_eq!(completion.try_recv(), Err(TryRecvError::Empty));

        let (sink, _) = recording_sink();
        session
            .start_capture(&devices[0], sink, &CaptureConfig::default())
            .unwrap();
        session.stop_capture();
        session.stop_capture();

        assert_eq!(completion.recv_timeout(Duration::from_secs(1)), Ok(Outcome::Stopped));
        assert_eq!(completion.try_recv(), Err(TryRecvError::Empty));
        assert!(!session.is_active());
    }

    #[test]
    fn sink_failure_aborts_and_drops_later_blocks() {
        let (mut session, backend) = session();
        let devices = session.list_devices().unwrap();
        let completion = session.completion();
        let (tx, writes) = unbounded();
        let sink = move |_: &[u8]| -> Result<()> {
            let _ = tx.send(());
            Err(CurrentsError::SinkClosed)
        };

        session
            .start_capture(&devices[0], sink, &CaptureConfig::default())
            .unwrap();
        backend.deliver(&[0; 8]);
        backend.deliver(&[0; 8]);

        assert_eq!(writes.len(), 1);
        assert_eq!(completion.try_recv(), Ok(Outcome::Failed(CurrentsError::SinkClosed)));

        // Stopping after a failure reports nothing further.
        session.stop_capture();
        assert_eq!(completion.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn backend_errors_surface_as_failures() {
        let (mut session, backend) = session();
        let devices = session.list_devices().unwrap();
        let completion = session.completion();
        let (sink, _) = recording_sink();

        session
            .start_capture(&devices[0], sink, &CaptureConfig::default())
            .unwrap();
        backend.fail_stream(CurrentsError::Backend("device unplugged".into()));

        assert_eq!(
            completion.try_recv(),
            Ok(Outcome::Failed(CurrentsError::Backend("device unplugged".into())))
        );
    }

    #[test]
    fn open_failure_leaves_session_idle() {
        let (mut session, backend) = session();
        let devices = session.list_devices().unwrap();
        backend.refuse_open(true);
        let (sink, _) = recording_sink();

        let result = session.start_capture(&devices[0], sink, &CaptureConfig::default());
        assert!(matches!(result, Err(CurrentsError::Backend(_))));
        assert!(!session.is_active());
    }

    #[test]
    fn enumeration_failure_is_a_backend_error() {
        let (session, backend) = session();
        backend.refuse_enumeration(true);
        assert!(matches!(session.list_devices(), Err(CurrentsError::Backend(_))));
    }

    #[test]
    fn destroy_requires_an_idle_session() {
        let (mut session, _backend) = session();
        let devices = session.list_devices().unwrap();
        let (sink, _) = recording_sink();
        session
            .start_capture(&devices[0], sink, &CaptureConfig::default())
            .unwrap();

        assert_eq!(session.destroy(), Err(CurrentsError::InUse));
        session.stop_capture();
        session.destroy().unwrap();
        assert!(session.list_devices().is_err());
    }
}
