//! Client library for WFWATTCH2 single-phase power meters.
//!
//! The meter speaks a small framed protocol over TCP port 60121. This crate
//! bundles the pieces needed to query it.
//!
//! # Crate Structure
//!
//! - [`frame`]: Command encoding, CRC-8, response validation and measurement decoding
//! - [`session`]: Connection lifecycle and the measure request/response cycle
//!
//! ```no_run
//! use std::time::Duration;
//! use wfwattch::session::DeviceSession;
//!
//! let mut meter = DeviceSession::new("192.168.1.50".parse().unwrap());
//! meter.connect(Duration::from_secs(5)).unwrap();
//! let reading = meter.update(Duration::from_secs(5)).unwrap();
//! println!("{:.2} W at {}", reading.power, reading.timestamp);
//! ```

/// Re-export frame codec types.
pub mod frame {
    pub use wfwattch_frame::*;
}

/// Re-export session types (async session requires the `async` feature).
pub mod session {
    pub use wfwattch_session::*;
}
