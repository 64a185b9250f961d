//! Line-oriented link to the device.
//!
//! The dialogue controller only ever talks to a [`Transport`]; the serial
//! implementation lives in [`crate::port`] and tests use [`mock::MockTransport`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("port is not open")]
    NotOpen,
    #[error("open {name}: {reason}")]
    Open { name: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of one read attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    /// A complete line, trailing `\n` included.
    Line(String),
    /// Nothing complete arrived before the read timeout.
    NoPacket,
    /// Bytes arrived but were not a printable ASCII line.
    DecodingError,
}

pub trait Transport {
    /// Open the named port, closing whatever was open before.
    fn open(&mut self, name: &str) -> Result<(), TransportError>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    /// Write one complete line. The caller supplies the terminator.
    fn write_line(&mut self, line: &str) -> Result<(), TransportError>;
    fn read_line(&mut self) -> ReadStatus;
}
