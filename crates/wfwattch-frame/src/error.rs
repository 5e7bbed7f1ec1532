/// Errors that can occur while encoding, validating or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Fewer bytes were available than the frame or payload requires.
    #[error("short frame ({available} bytes, need {needed})")]
    ShortFrame { needed: usize, available: usize },

    /// The echoed command code does not match the command that was sent.
    #[error("command code mismatch (sent 0x{expected:02X}, got 0x{actual:02X})")]
    CodeMismatch { expected: u8, actual: u8 },

    /// The trailing checksum does not match the CRC-8 of the payload.
    #[error("checksum mismatch (computed 0x{expected:02X}, frame carries 0x{actual:02X})")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// The device reported a non-zero status inside a valid frame.
    #[error("device reported error 0x{0:02X}")]
    DeviceError(u8),

    /// The date-time record is not a valid calendar value.
    #[error("invalid device timestamp {0:02X?}")]
    InvalidTimestamp([u8; 6]),

    /// The command payload does not fit the 2-byte length field.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The declared frame does not fit the receive buffer.
    #[error("frame too large ({size} bytes, buffer holds {max})")]
    FrameTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
