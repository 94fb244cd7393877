/// Result alias that carries the custom [`CurrentsError`] type.
pub type Result<T> = std::result::Result<T, CurrentsError>;

/// Common error type for the core crate.
///
/// The type is `Clone` so a single failure can be handed to every party
/// listening on a completion channel; library errors are therefore stored as
/// their rendered message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CurrentsError {
    /// The capture format does not match the one the extractor's bin-size
    /// maths is written for.
    #[error("unsupported capture format: {channels} channel(s) at {sample_rate} Hz")]
    UnsupportedFormat { channels: u32, sample_rate: u32 },
    /// A configuration value outside of its accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Device enumeration or stream failures reported by the audio backend.
    #[error("audio backend error: {0}")]
    Backend(String),
    /// The capture context cannot be released while a stream is running.
    #[error("capture context is still in use")]
    InUse,
    /// The serial port could not be opened.
    #[error("serial port {port} is unavailable: {reason}")]
    PortUnavailable { port: String, reason: String },
    /// Writing to an open serial port failed.
    #[error("serial port write failed: {0}")]
    PortIo(String),
    /// The extractor's byte buffer returned something other than "need more
    /// data".
    #[error("buffer fault: {0}")]
    BufferFault(String),
    /// The byte sink no longer has a live extractor behind it.
    #[error("byte sink is closed")]
    SinkClosed,
    #[error("io error: {0}")]
    Io(String),
    #[error("json error: {0}")]
    Json(String),
    /// Free-form message for conditions without a dedicated variant.
    #[error("{0}")]
    Message(String),
}

impl CurrentsError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for CurrentsError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for CurrentsError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<std::io::Error> for CurrentsError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<serde_json::Error> for CurrentsError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value.to_string())
    }
}
