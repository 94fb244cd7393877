//! Hardware stand-ins for tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    io::{self, Read, Write},
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::Duration,
};

use crate::{
    audio::{BlockCallback, CaptureBackend, Device, DeviceId, ErrorCallback},
    serial::{SerialBackend, SerialLink},
    CaptureConfig, CurrentsError, Result, SerialConfig,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Opened(String),
    Closed(String),
}

#[derive(Default)]
struct CaptureState {
    devices: Vec<Device>,
    events: Vec<MockEvent>,
    live: Option<(BlockCallback, ErrorCallback)>,
    refuse_open: bool,
    refuse_enumeration: bool,
}

/// Capture backend whose "hardware" is driven by the test thread.
#[derive(Clone, Default)]
pub struct MockCaptureBackend {
    state: Arc<Mutex<CaptureState>>,
}

impl MockCaptureBackend {
    pub fn with_devices(names: &[&str]) -> Self {
        let backend = Self::default();
        backend.state().devices = names
            .iter()
            .map(|name| Device::new(*name, DeviceId::new(format!("mock:{name}"))))
            .collect();
        backend
    }

    /// Runs the live stream's block callback, if a stream is open.
    pub fn deliver(&self, bytes: &[u8]) {
        if let Some((on_block, _)) = self.state().live.as_mut() {
            on_block(bytes);
        }
    }

    pub fn fail_stream(&self, error: CurrentsError) {
        if let Some((_, on_error)) = self.state().live.as_mut() {
            on_error(error);
        }
    }

    pub fn refuse_open(&self, refuse: bool) {
        self.state().refuse_open = refuse;
    }

    pub fn refuse_enumeration(&self, refuse: bool) {
        self.state().refuse_enumeration = refuse;
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.state().events.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.state().live.is_some()
    }

    fn state(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap()
    }
}

pub struct MockStream {
    name: String,
    state: Arc<Mutex<CaptureState>>,
}

impl Drop for MockStream {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.live = None;
        state.events.push(MockEvent::Closed(self.name.clone()));
    }
}

impl CaptureBackend for MockCaptureBackend {
    type Stream = MockStream;

    fn devices(&self) -> Result<Vec<Device>> {
        let state = self.state();
        if state.refuse_enumeration {
            return Err(CurrentsError::Backend("enumeration refused".into()));
        }
        Ok(state.devices.clone())
    }

    fn open(
        &self,
        device: &Device,
        _config: &CaptureConfig,
        on_block: BlockCallback,
        on_error: ErrorCallback,
    ) -> Result<MockStream> {
        let mut state = self.state();
        if state.refuse_open {
            return Err(CurrentsError::Backend(format!("cannot open {}", device.name)));
        }
        assert!(state.live.is_none(), "two streams open at once");
        state.live = Some((on_block, on_error));
        state.events.push(MockEvent::Opened(device.name.clone()));
        Ok(MockStream {
            name: device.name.clone(),
            state: Arc::clone(&self.state),
        })
    }
}

#[derive(Default)]
struct SerialState {
    ports: Vec<String>,
    open: HashSet<String>,
    opens: usize,
    written: HashMap<String, Vec<u8>>,
    telemetry: HashMap<String, VecDeque<u8>>,
    fail_writes: bool,
}

/// In-memory serial ports that record every byte written.
#[derive(Clone, Default)]
pub struct MockSerialBackend {
    state: Arc<Mutex<SerialState>>,
}

impl MockSerialBackend {
    pub fn with_ports(ports: &[&str]) -> Self {
        let backend = Self::default();
        backend.state().ports = ports.iter().map(|p| p.to_string()).collect();
        backend
    }

    pub fn written(&self, port: &str) -> Vec<u8> {
        self.state().written.get(port).cloned().unwrap_or_default()
    }

    pub fn is_open(&self, port: &str) -> bool {
        self.state().open.contains(port)
    }

    pub fn open_count(&self) -> usize {
        self.state().opens
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    pub fn queue_telemetry(&self, port: &str, bytes: &[u8]) {
        self.state()
            .telemetry
            .entry(port.to_string())
            .or_default()
            .extend(bytes);
    }

    pub fn pending_telemetry(&self, port: &str) -> usize {
        self.state().telemetry.get(port).map_or(0, VecDeque::len)
    }

    fn state(&self) -> MutexGuard<'_, SerialState> {
        self.state.lock().unwrap()
    }
}

impl SerialBackend for MockSerialBackend {
    fn ports(&self) -> Result<Vec<String>> {
        Ok(self.state().ports.clone())
    }

    fn open(&self, port: &str, _config: &SerialConfig) -> Result<Box<dyn SerialLink>> {
        let mut state = self.state();
        let unavailable = |reason: &str| CurrentsError::PortUnavailable {
            port: port.to_string(),
            reason: reason.to_string(),
        };
        if !state.ports.iter().any(|p| p == port) {
            return Err(unavailable("no such port"));
        }
        if !state.open.insert(port.to_string()) {
            return Err(unavailable("port busy"));
        }
        state.opens += 1;
        Ok(Box::new(MockLink {
            port: port.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockLink {
    port: String,
    state: Arc<Mutex<SerialState>>,
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link down"));
        }
        state
            .written
            .entry(self.port.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for MockLink {
    fn reader(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(MockReader {
            port: self.port.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.state.lock().unwrap().open.remove(&self.port);
    }
}

struct MockReader {
    port: String,
    state: Arc<Mutex<SerialState>>,
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = {
            let mut state = self.state.lock().unwrap();
            let pending = state.telemetry.entry(self.port.clone()).or_default();
            let n = buf.len().min(pending.len());
            for (slot, byte) in buf.iter_mut().zip(pending.drain(..n)) {
                *slot = byte;
            }
            n
        };
        if read == 0 {
            thread::sleep(Duration::from_millis(1));
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        Ok(read)
    }
}
