//! Frame codec for the WFWATTCH2 power meter protocol.
//!
//! Every message on the wire is framed as:
//! - A 1-byte start marker (`0xAA`)
//! - A 2-byte big-endian payload length
//! - The payload (command code followed by arguments or response data)
//! - A 1-byte CRC-8 over the payload
//!
//! Everything in this crate is pure: no sockets, no state.

pub mod codec;
pub mod crc;
pub mod error;
pub mod measurement;

pub use codec::{
    encode_command, expected_frame_len, validate_response, Command, HEADER_SIZE, MAX_PAYLOAD,
    MEASURE, MEASURE_CODE, STX, TRAILER_SIZE,
};
pub use crc::crc8;
pub use error::{FrameError, Result};
pub use measurement::{decode_measurement, Reading, MEASUREMENT_PAYLOAD_LEN};
