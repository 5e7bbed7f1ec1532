//! Device session for WFWATTCH2 power meters.
//!
//! A [`DeviceSession`] owns one TCP connection to one meter and performs the
//! strictly request/response "measure" exchange: write the command frame,
//! read until the response frame is complete, validate it and keep the
//! decoded [`Reading`].
//!
//! With the `async` feature, [`AsyncDeviceSession`] offers the same
//! operations on top of tokio.

pub mod config;
pub mod error;
mod exchange;
pub mod session;
mod socket;

#[cfg(feature = "async")]
pub mod async_session;

pub use config::{SessionConfig, DEFAULT_PORT, DEFAULT_TIMEOUT, RECEIVE_BUFFER_SIZE};
pub use error::{Result, SessionError};
pub use session::DeviceSession;
pub use wfwattch_frame::Reading;

#[cfg(feature = "async")]
pub use async_session::AsyncDeviceSession;
