use std::net::SocketAddr;
use std::time::Duration;

use wfwattch_frame::FrameError;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The TCP connect did not complete in time.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    /// The TCP connect failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// The socket accepted zero bytes before the command was fully sent.
    #[error("write failed after {written} of {total} bytes")]
    WriteFailed { written: usize, total: usize },

    /// The request did not complete in time. The connection is dropped.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// An I/O error occurred on the connection.
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `update` was called without an open connection.
    #[error("session is not connected")]
    NotConnected,

    /// `connect` was called while a connection is already open.
    #[error("session is already connected to {0}")]
    AlreadyConnected(SocketAddr),

    /// The response frame failed validation or decoding.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

impl SessionError {
    /// Whether this error is a connect or request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectTimeout { .. } | Self::Timeout(_))
    }

    /// The status code reported by the device, if that is what failed.
    pub fn device_error(&self) -> Option<u8> {
        match self {
            Self::Frame(FrameError::DeviceError(code)) => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
