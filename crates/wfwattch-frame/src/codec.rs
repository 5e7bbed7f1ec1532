use bytes::{BufMut, Bytes, BytesMut};

use crate::crc::crc8;
use crate::error::{FrameError, Result};

/// Start-of-frame marker.
pub const STX: u8 = 0xAA;

/// Frame header: STX (1) + length (2) = 3 bytes.
pub const HEADER_SIZE: usize = 3;

/// Frame trailer: CRC-8 (1) = 1 byte.
pub const TRAILER_SIZE: usize = 1;

/// Largest payload the 2-byte length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Command code of the "measure" request.
pub const MEASURE_CODE: u8 = 0x18;

/// The "measure" request: code `0x18` with a single zero argument.
pub const MEASURE: Command = Command::new(MEASURE_CODE, &[0x00]);

/// A device command: a code byte plus a fixed argument array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    code: u8,
    args: &'static [u8],
}

impl Command {
    /// Create a new command.
    pub const fn new(code: u8, args: &'static [u8]) -> Self {
        Self { code, args }
    }

    /// The command code echoed back by the device.
    pub fn code(&self) -> u8 {
        self.code
    }

    /// The command arguments.
    pub fn args(&self) -> &'static [u8] {
        self.args
    }

    /// The total wire size of this command (header + code + args + checksum).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + 1 + self.args.len() + TRAILER_SIZE
    }

    /// Append the framed command to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        encode_command(self.code, self.args, dst)
    }

    /// Encode the framed command into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// Encode a command frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬────────────┬──────────┬─────────────┬──────────────────┐
/// │ STX (1B) │ Length     │ Code     │ Args        │ CRC-8 (1B)       │
/// │ 0xAA     │ (2B BE)    │ (1B)     │ (N bytes)   │ over code + args │
/// └──────────┴────────────┴──────────┴─────────────┴──────────────────┘
/// ```
///
/// `Length` counts the code byte and the arguments.
pub fn encode_command(code: u8, args: &[u8], dst: &mut BytesMut) -> Result<()> {
    let payload_len = 1 + args.len();
    if payload_len > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: MAX_PAYLOAD,
        });
    }

    dst.reserve(HEADER_SIZE + payload_len + TRAILER_SIZE);
    dst.put_u8(STX);
    dst.put_u16(payload_len as u16);
    let payload_start = dst.len();
    dst.put_u8(code);
    dst.put_slice(args);
    let checksum = crc8(&dst[payload_start..]);
    dst.put_u8(checksum);
    Ok(())
}

/// The full wire size of the frame whose header is at the start of `received`.
///
/// Returns `None` until the 3-byte header is available.
pub fn expected_frame_len(received: &[u8]) -> Option<usize> {
    if received.len() < HEADER_SIZE {
        return None;
    }
    let declared = u16::from_be_bytes([received[1], received[2]]);
    Some(HEADER_SIZE + usize::from(declared) + TRAILER_SIZE)
}

/// Validate a response frame and return its payload after the code byte.
///
/// The echoed code (offset 3) must equal `expected_code`, and the trailing
/// byte must equal the CRC-8 of the `length` bytes starting at offset 3.
/// Any bytes after the declared frame are ignored.
pub fn validate_response(frame: &[u8], expected_code: u8) -> Result<&[u8]> {
    let total = expected_frame_len(frame).ok_or(FrameError::ShortFrame {
        needed: HEADER_SIZE,
        available: frame.len(),
    })?;

    let minimum = HEADER_SIZE + 1 + TRAILER_SIZE;
    if total < minimum {
        return Err(FrameError::ShortFrame {
            needed: minimum,
            available: total,
        });
    }
    if frame.len() < total {
        return Err(FrameError::ShortFrame {
            needed: total,
            available: frame.len(),
        });
    }

    let actual = frame[HEADER_SIZE];
    if actual != expected_code {
        return Err(FrameError::CodeMismatch {
            expected: expected_code,
            actual,
        });
    }

    let body = &frame[HEADER_SIZE..total - TRAILER_SIZE];
    let computed = crc8(body);
    let carried = frame[total - TRAILER_SIZE];
    if computed != carried {
        return Err(FrameError::ChecksumMismatch {
            expected: computed,
            actual: carried,
        });
    }

    Ok(&body[1..])
}
