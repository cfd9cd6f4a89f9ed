//! Error types for the streaming pipeline

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capture device errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Invalid capture configuration: {0}")]
    InvalidConfiguration(String),
}

/// Datagram transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Invalid packet format")]
    InvalidPacket,
}

/// Session lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A capture session is already running")]
    AlreadyRunning,

    #[error("Workers did not stop within the shutdown timeout")]
    ShutdownTimeout,

    #[error("Capture failed during startup: {0}")]
    Capture(#[from] CaptureError),

    #[error("Transport failed during startup: {0}")]
    Transport(#[from] TransportError),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
