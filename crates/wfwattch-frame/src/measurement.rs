use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{FrameError, Result};

/// Measure response payload: status (1) + voltage (6) + current (6) + power (6) + clock (6).
pub const MEASUREMENT_PAYLOAD_LEN: usize = 25;

const FIELD_SIZE: usize = 6;

/// Voltage and power carry 24 fractional bits.
const VOLTAGE_SCALE: f64 = (1u64 << 24) as f64;
const POWER_SCALE: f64 = (1u64 << 24) as f64;
/// Current carries 30 fractional bits.
const CURRENT_SCALE: f64 = (1u64 << 30) as f64;

const BASE_YEAR: i32 = 2000;

/// One decoded measurement snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Device clock at the time of measurement (no timezone).
    pub timestamp: NaiveDateTime,
    /// RMS voltage in volts.
    pub voltage: f64,
    /// RMS current in amperes.
    pub current: f64,
    /// Active power in watts.
    pub power: f64,
}

impl Reading {
    /// Current in milliamperes.
    pub fn current_milliamps(&self) -> f64 {
        self.current * 1000.0
    }
}

/// Decode the payload of a measure response.
///
/// `payload` is the frame body after the echoed code: `[status, data(24)]`.
/// A non-zero status is reported as [`FrameError::DeviceError`] before the
/// length is considered, and no fields are parsed.
pub fn decode_measurement(payload: &[u8]) -> Result<Reading> {
    let Some((&status, data)) = payload.split_first() else {
        return Err(FrameError::ShortFrame {
            needed: MEASUREMENT_PAYLOAD_LEN,
            available: 0,
        });
    };

    if status != 0 {
        return Err(FrameError::DeviceError(status));
    }

    if payload.len() < MEASUREMENT_PAYLOAD_LEN {
        return Err(FrameError::ShortFrame {
            needed: MEASUREMENT_PAYLOAD_LEN,
            available: payload.len(),
        });
    }

    let voltage = read_u48_le(field(data, 0)) as f64 / VOLTAGE_SCALE;
    let current = read_u48_le(field(data, 1)) as f64 / CURRENT_SCALE;
    let power = read_u48_le(field(data, 2)) as f64 / POWER_SCALE;
    let timestamp = decode_timestamp(field(data, 3))?;

    Ok(Reading {
        timestamp,
        voltage,
        current,
        power,
    })
}

fn field(data: &[u8], index: usize) -> [u8; FIELD_SIZE] {
    let start = index * FIELD_SIZE;
    let mut out = [0u8; FIELD_SIZE];
    out.copy_from_slice(&data[start..start + FIELD_SIZE]);
    out
}

/// Little-endian unsigned 48-bit integer; byte 0 is least significant.
fn read_u48_le(bytes: [u8; FIELD_SIZE]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// `[sec, min, hour, day, month, year - 2000]`.
fn decode_timestamp(raw: [u8; FIELD_SIZE]) -> Result<NaiveDateTime> {
    let [sec, min, hour, day, month, year] = raw;
    NaiveDate::from_ymd_opt(BASE_YEAR + i32::from(year), u32::from(month), u32::from(day))
        .and_then(|date| date.and_hms_opt(u32::from(hour), u32::from(min), u32::from(sec)))
        .ok_or(FrameError::InvalidTimestamp(raw))
}
