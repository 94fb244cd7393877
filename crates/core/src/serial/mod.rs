//! Serial colour sink: ships colours to the lighting controller.

use std::{
    fmt,
    io::{self, Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, info, trace, warn, Dispatch};

use crate::{Color, CurrentsError, Result, Rgb8, SerialConfig};

mod frame;
mod port;

pub use frame::{decode_frame, encode_frame, pack_rgb, unpack_rgb, FRAME_LEN};
pub use port::SystemSerial;

/// Boundary to the operating system's serial ports.
pub trait SerialBackend: Send + Sync {
    /// Names of ports a controller could be attached to.
    fn ports(&self) -> Result<Vec<String>>;

    /// Opens `port` exclusively. Reads on the returned link time out after
    /// `config.read_timeout()`.
    fn open(&self, port: &str, config: &SerialConfig) -> Result<Box<dyn SerialLink>>;
}

/// An open port. Writes go to the controller; [`reader`](Self::reader)
/// returns an independent handle for draining what it sends back.
pub trait SerialLink: Write + Send {
    fn reader(&self) -> Result<Box<dyn Read + Send>>;
}

struct Connection {
    port: String,
    link: Box<dyn SerialLink>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl Connection {
    fn write_frame(&mut self, color: Rgb8) -> Result<()> {
        self.link
            .write_all(&encode_frame(color))
            .and_then(|()| self.link.flush())
            .map_err(|e| CurrentsError::PortIo(format!("{}: {e}", self.port)))
    }

    fn close(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!(port = %self.port, "serial reader panicked");
            }
        }
    }
}

/// Owns at most one serial connection and transmits colours over it.
///
/// All sends share one lock, so frames never interleave on the wire.
pub struct SerialColorSink<B: SerialBackend> {
    backend: B,
    config: SerialConfig,
    connection: Mutex<Option<Connection>>,
    dispatch: Dispatch,
}

impl<B: SerialBackend> SerialColorSink<B> {
    pub fn new(backend: B, config: SerialConfig) -> Self {
        Self::with_dispatch(backend, config, tracing::dispatcher::get_default(Dispatch::clone))
    }

    /// Uses `dispatch` for the background reader's diagnostics.
    pub fn with_dispatch(backend: B, config: SerialConfig, dispatch: Dispatch) -> Self {
        Self {
            backend,
            config,
            connection: Mutex::new(None),
            dispatch,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Opens `port` and starts draining controller telemetry.
    ///
    /// Fails with [`CurrentsError::PortUnavailable`] if the port cannot be
    /// opened or this sink is already connected elsewhere.
    pub fn connect(&self, port: &str) -> Result<()> {
        let mut connection = self.lock();
        if let Some(current) = connection.as_ref() {
            if current.port == port {
                return Ok(());
            }
            return Err(CurrentsError::PortUnavailable {
                port: port.to_string(),
                reason: format!("already connected to {}", current.port),
            });
        }

        let link = self.backend.open(port, &self.config).map_err(|e| match e {
            e @ CurrentsError::PortUnavailable { .. } => e,
            other => CurrentsError::PortUnavailable {
                port: port.to_string(),
                reason: other.to_string(),
            },
        })?;

        let stop = Arc::new(AtomicBool::new(false));
        let reader = match link.reader() {
            Ok(source) => Some(self.spawn_reader(port, source, Arc::clone(&stop))?),
            Err(error) => {
                warn!(port, %error, "controller telemetry unavailable");
                None
            }
        };

        info!(port, baud = self.config.baud, "serial connected");
        *connection = Some(Connection {
            port: port.to_string(),
            link,
            stop,
            reader,
        });
        Ok(())
    }

    /// Sends black, then releases the port. A no-op when not connected.
    ///
    /// The port is released even if the black frames fail to send; the first
    /// such failure is returned.
    pub fn disconnect(&self) -> Result<()> {
        let Some(mut connection) = self.lock().take() else {
            return Ok(());
        };

        let mut result = Ok(());
        for _ in 0..self.config.black_repeats.max(1) {
            if let Err(error) = connection.write_frame(Color::BLACK.to_rgb8()) {
                warn!(port = %connection.port, %error, "failed to blank controller");
                result = result.and(Err(error));
            }
        }

        let port = connection.port.clone();
        connection.close();
        info!(%port, "serial disconnected");
        result
    }

    /// Transmits one colour frame. Succeeds trivially when not connected.
    ///
    /// A failed write is reported but leaves the connection open.
    pub fn send_color(&self, color: Color) -> Result<()> {
        match self.lock().as_mut() {
            Some(connection) => connection.write_frame(color.to_rgb8()),
            None => Ok(()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    pub fn port(&self) -> Option<String> {
        self.lock().as_ref().map(|c| c.port.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_reader(
        &self,
        port: &str,
        source: Box<dyn Read + Send>,
        stop: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>> {
        let dispatch = self.dispatch.clone();
        let port = port.to_string();
        let idle = self.config.read_timeout();
        thread::Builder::new()
            .name("currents-serial-reader".into())
            .spawn(move || {
                let _guard = tracing::dispatcher::set_default(&dispatch);
                drain_telemetry(&port, source, &stop, idle);
            })
            .map_err(CurrentsError::from)
    }
}

/// Reassembles 4-byte big-endian telemetry words from arbitrarily split reads.
#[derive(Debug, Default)]
struct TelemetryWord {
    bytes: [u8; 4],
    filled: usize,
}

impl TelemetryWord {
    /// Unfilled tail to read into.
    fn space(&mut self) -> &mut [u8] {
        &mut self.bytes[self.filled..]
    }

    /// Accounts for `read` bytes written into [`space`](Self::space) and
    /// yields the word once all four have arrived.
    fn advance(&mut self, read: usize) -> Option<u32> {
        self.filled = (self.filled + read).min(self.bytes.len());
        if self.filled < self.bytes.len() {
            return None;
        }
        self.filled = 0;
        Some(u32::from_be_bytes(self.bytes))
    }
}

/// Logs each word the controller sends until `stop` is set.
fn drain_telemetry(
    port: &str,
    mut source: Box<dyn Read + Send>,
    stop: &AtomicBool,
    idle: Duration,
) {
    let mut word = TelemetryWord::default();
    while !stop.load(Ordering::Acquire) {
        match source.read(word.space()) {
            Ok(0) => thread::sleep(idle),
            Ok(n) => {
                if let Some(value) = word.advance(n) {
                    trace!(port, value, "controller telemetry");
                }
            }
            Err(e) if is_transient(&e) => {}
            Err(e) => {
                debug!(port, error = %e, "serial read failed; retrying");
                thread::sleep(idle);
            }
        }
    }
    debug!(port, "serial reader stopped");
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

impl<B: SerialBackend> Drop for SerialColorSink<B> {
    fn drop(&mut self) {
        if let Err(error) = self.disconnect() {
            warn!(%error, "serial sink dropped while connected");
        }
    }
}

impl<B: SerialBackend> fmt::Debug for SerialColorSink<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialColorSink")
            .field("config", &self.config)
            .field("port", &self.port())
            .finish()
    }
}
