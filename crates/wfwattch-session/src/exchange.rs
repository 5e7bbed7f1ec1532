//! One request/response cycle over a blocking stream.

use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use tracing::trace;
use wfwattch_frame::{
    decode_measurement, expected_frame_len, validate_response, FrameError, Reading, HEADER_SIZE,
};

use crate::error::{Result, SessionError};
use crate::socket::is_timeout;

/// A stream whose blocking reads and writes can be bounded.
pub(crate) trait DeviceIo: Read + Write {
    /// `None` blocks without a bound.
    fn set_io_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl DeviceIo for TcpStream {
    fn set_io_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }
}

/// Point in time by which the current call must complete.
///
/// A timeout too large to add to the current instant leaves the call unbounded.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Option<Instant>,
    timeout: Duration,
}

impl Deadline {
    pub(crate) fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
            timeout,
        }
    }

    /// Time left (`None` when unbounded), or `Timeout` once the deadline has passed.
    pub(crate) fn remaining(&self) -> Result<Option<Duration>> {
        let Some(at) = self.at else {
            return Ok(None);
        };
        let left = at.saturating_duration_since(Instant::now());
        if left.is_zero() {
            Err(SessionError::Timeout(self.timeout))
        } else {
            Ok(Some(left))
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Send `command`, read the response into `buf` and decode it.
pub(crate) fn measure<S: DeviceIo>(
    stream: &mut S,
    command: &[u8],
    code: u8,
    buf: &mut [u8],
    deadline: &Deadline,
) -> Result<Reading> {
    write_command(stream, command, deadline)?;
    let len = read_frame(stream, buf, deadline)?;
    finish(&buf[..len], code)
}

/// Write every byte of `command`, retrying partial writes.
pub(crate) fn write_command<S: DeviceIo>(
    stream: &mut S,
    command: &[u8],
    deadline: &Deadline,
) -> Result<()> {
    let mut offset = 0usize;
    while offset < command.len() {
        stream.set_io_timeout(deadline.remaining()?)?;
        match stream.write(&command[offset..]) {
            Ok(0) => {
                return Err(SessionError::WriteFailed {
                    written: offset,
                    total: command.len(),
                })
            }
            Ok(n) => {
                offset += n;
                trace!(written = n, offset, total = command.len(), "command chunk sent");
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if is_timeout(&err) => return Err(SessionError::Timeout(deadline.timeout())),
            Err(err) => return Err(SessionError::Io(err)),
        }
    }

    stream.flush()?;
    Ok(())
}

/// Accumulate bytes in `buf` until a whole frame is present.
///
/// Returns the frame length. A zero-byte read before that is a short frame.
pub(crate) fn read_frame<S: DeviceIo>(
    stream: &mut S,
    buf: &mut [u8],
    deadline: &Deadline,
) -> Result<usize> {
    let mut filled = 0usize;
    loop {
        if let Some(len) = complete_len(buf, filled)? {
            return Ok(len);
        }

        stream.set_io_timeout(deadline.remaining()?)?;
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(short_frame(buf, filled).into()),
            Ok(n) => {
                filled += n;
                trace!(read = n, filled, "response chunk received");
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if is_timeout(&err) => return Err(SessionError::Timeout(deadline.timeout())),
            Err(err) => return Err(SessionError::Io(err)),
        }
    }
}

/// `Some(frame_len)` once the first `filled` bytes of `buf` hold a full frame.
pub(crate) fn complete_len(buf: &[u8], filled: usize) -> Result<Option<usize>> {
    let Some(len) = expected_frame_len(&buf[..filled]) else {
        return Ok(None);
    };
    if len > buf.len() {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: buf.len(),
        }
        .into());
    }
    Ok((filled >= len).then_some(len))
}

pub(crate) fn short_frame(buf: &[u8], filled: usize) -> FrameError {
    FrameError::ShortFrame {
        needed: expected_frame_len(&buf[..filled]).unwrap_or(HEADER_SIZE),
        available: filled,
    }
}

/// Validate a complete response frame and decode its measurement.
pub(crate) fn finish(frame: &[u8], code: u8) -> Result<Reading> {
    let payload = validate_response(frame, code)?;
    Ok(decode_measurement(payload)?)
}
