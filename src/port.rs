use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::time::Duration;

use anyhow::Result;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, error};

use crate::transport::{ReadStatus, Transport, TransportError};

const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Enumerate serial ports the OS knows about.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()
        .map_err(|e| anyhow::anyhow!("enumerate serial ports: {}", e))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

fn open_port(name: &str, baud: u32) -> std::result::Result<Box<dyn SerialPort>, TransportError> {
    serialport::new(name, baud)
        .timeout(READ_TIMEOUT)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open()
        .map_err(|e| TransportError::Open {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

/// Serial port carrying the newline-framed device protocol (8N1, no flow control).
pub struct SerialLink {
    baud: u32,
    reader: Option<BufReader<Box<dyn SerialPort>>>,
    // partial line kept across read timeouts
    pending: Vec<u8>,
}

impl SerialLink {
    pub fn new(baud: u32) -> Self {
        Self {
            baud,
            reader: None,
            pending: Vec::new(),
        }
    }
}

impl Transport for SerialLink {
    fn open(&mut self, name: &str) -> std::result::Result<(), TransportError> {
        self.close();
        let port = open_port(name, self.baud)?;
        debug!("[port] opened {} at {} baud", name, self.baud);
        self.reader = Some(BufReader::new(port));
        Ok(())
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!("[port] closed");
        }
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    fn write_line(&mut self, line: &str) -> std::result::Result<(), TransportError> {
        let reader = self.reader.as_mut().ok_or(TransportError::NotOpen)?;
        debug!("[port] tx {:?}", line);
        let port = reader.get_mut();
        port.write_all(line.as_bytes())?;
        port.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> ReadStatus {
        match self.reader.as_mut() {
            Some(reader) => read_frame(reader, &mut self.pending),
            None => ReadStatus::NoPacket,
        }
    }
}

/// Read towards the next `\n`. Bytes received before a timeout stay in
/// `pending` and are completed by a later call.
fn read_frame<R: BufRead>(reader: &mut R, pending: &mut Vec<u8>) -> ReadStatus {
    match reader.read_until(b'\n', pending) {
        Ok(_) if pending.ends_with(b"\n") => take_line(pending),
        Ok(_) => ReadStatus::NoPacket,
        Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
            ReadStatus::NoPacket
        }
        Err(e) => {
            error!("[port] read failed: {}", e);
            pending.clear();
            ReadStatus::DecodingError
        }
    }
}

fn take_line(pending: &mut Vec<u8>) -> ReadStatus {
    let mut raw = std::mem::take(pending);
    if raw.ends_with(b"\r\n") {
        raw.truncate(raw.len() - 2);
        raw.push(b'\n');
    }
    if !raw.iter().all(|b| *b == b'\n' || (0x20..0x7f).contains(b)) {
        return ReadStatus::DecodingError;
    }
    match String::from_utf8(raw) {
        Ok(line) => {
            debug!("[port] rx {:?}", line);
            ReadStatus::Line(line)
        }
        Err(_) => ReadStatus::DecodingError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{self, Read};

    /// Hands out one scripted chunk (or error) per `read` call.
    struct Chunked(VecDeque<io::Result<Vec<u8>>>);

    impl Read for Chunked {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(ErrorKind::TimedOut, "idle")),
            }
        }
    }

    fn timeout() -> io::Result<Vec<u8>> {
        Err(io::Error::new(ErrorKind::TimedOut, "timeout"))
    }

    #[test]
    fn closed_link_refuses_writes() {
        let mut link = SerialLink::new(115_200);
        assert!(!link.is_open());
        assert!(matches!(
            link.write_line("R\n"),
            Err(TransportError::NotOpen)
        ));
        assert_eq!(link.read_line(), ReadStatus::NoPacket);
    }

    #[test]
    fn crlf_is_folded_to_lf() {
        let mut pending = b"o\r\n".to_vec();
        assert_eq!(take_line(&mut pending), ReadStatus::Line("o\n".into()));
        assert!(pending.is_empty());
    }

    #[test]
    fn binary_garbage_is_a_decoding_error() {
        let mut pending = vec![0xff, 0x00, b'\n'];
        assert_eq!(take_line(&mut pending), ReadStatus::DecodingError);
    }

    #[test]
    fn partial_line_survives_timeout() {
        let mut reader = BufReader::new(Chunked(VecDeque::from([
            Ok(b"f,G".to_vec()),
            timeout(),
            Ok(b",1\no\n".to_vec()),
        ])));
        let mut pending = Vec::new();
        assert_eq!(read_frame(&mut reader, &mut pending), ReadStatus::NoPacket);
        assert_eq!(pending, b"f,G");
        assert_eq!(
            read_frame(&mut reader, &mut pending),
            ReadStatus::Line("f,G,1\n".into())
        );
        assert_eq!(
            read_frame(&mut reader, &mut pending),
            ReadStatus::Line("o\n".into())
        );
        assert_eq!(read_frame(&mut reader, &mut pending), ReadStatus::NoPacket);
        assert!(pending.is_empty());
    }

    #[test]
    fn hard_read_error_drops_partial_line() {
        let mut reader = BufReader::new(Chunked(VecDeque::from([
            Ok(b"f,G".to_vec()),
            Err(io::Error::new(ErrorKind::BrokenPipe, "unplugged")),
        ])));
        let mut pending = Vec::new();
        assert_eq!(
            read_frame(&mut reader, &mut pending),
            ReadStatus::DecodingError
        );
        assert!(pending.is_empty());
    }
}
