//! Error taxonomy.
//!
//! Only [`ConnectionError`] and [`ProcessStartError`] (plus a display that cannot be
//! opened) abort the program. Everything else is per command, per packet or per
//! frame and ends as a single log line at the place it happened.

use std::{io, process::ExitStatus, time::Duration};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Fatal startup failures.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    ProcessStart(#[from] ProcessStartError),

    #[error(transparent)]
    Display(#[from] DisplayError),
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("can't bind udp socket {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("handshake not completed within {0:?}")]
    Timeout(Duration),

    #[error("shutdown requested during handshake")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("session is not connected")]
    NotConnected,

    #[error("transport failure sending {command}: {source}")]
    Transport {
        command: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("link lost after {0} consecutive send failures")]
    LinkLost(u32),
}

/// A control datagram that can't be a device packet. It is dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),

    #[error("packet unknown header: {0:#x}")]
    BadHeader(u8),

    #[error("bad packet size {declared} for {actual} byte buffer")]
    BadSize { declared: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum RelayError {
    /// A single packet could not be written; it is dropped.
    #[error("can't forward {len} byte video packet: {source}")]
    Write {
        len: usize,
        #[source]
        source: io::Error,
    },

    /// The transcoder input is gone, nothing more will be forwarded.
    #[error("transcoder input pipe is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("short frame: expected {expected} bytes, got {actual}")]
    ShortFrame { expected: usize, actual: usize },

    #[error("frame read failed after {read} bytes: {source}")]
    Read {
        read: usize,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
#[error("can't launch {program}: {source}")]
pub struct ProcessStartError {
    pub program: String,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error)]
#[error("{program} exited unexpectedly: {status}")]
pub struct ProcessExitError {
    pub program: String,
    pub status: ExitStatus,
}

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("can't open display {program}: {source}")]
    Open {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("can't render frame: {0}")]
    Render(#[from] io::Error),

    #[error("frame is {actual_width}x{actual_height}, display expects {width}x{height}")]
    FrameSize {
        width: usize,
        height: usize,
        actual_width: usize,
        actual_height: usize,
    },

    #[error("display is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors_convert() {
        let e: Error = ConnectionError::Timeout(Duration::from_secs(10)).into();
        assert!(matches!(e, Error::Connection(_)));
        assert!(e.to_string().contains("10s"));

        let e: Error = ProcessStartError {
            program: "ffmpeg".to_owned(),
            source: io::Error::new(io::ErrorKind::NotFound, "not found"),
        }
        .into();
        assert!(matches!(e, Error::ProcessStart(_)));
        assert!(e.to_string().contains("ffmpeg"));
    }

    #[test]
    fn test_decode_error_message() {
        let e = DecodeError::ShortFrame {
            expected: 12,
            actual: 5,
        };
        assert_eq!("short frame: expected 12 bytes, got 5", e.to_string());
    }
}
