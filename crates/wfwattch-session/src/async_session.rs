use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::BytesMut;
use chrono::NaiveDateTime;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};
use wfwattch_frame::{Reading, MEASURE};

use crate::config::{SessionConfig, RECEIVE_BUFFER_SIZE};
use crate::error::{Result, SessionError};
use crate::exchange::{complete_len, finish, short_frame};
use crate::socket::set_abortive_close;

/// Async counterpart of [`DeviceSession`](crate::DeviceSession) built on tokio.
///
/// Each call's timeout covers the whole call; when it fires the in-flight
/// I/O is abandoned and, for `update`, the connection is dropped.
pub struct AsyncDeviceSession {
    endpoint: SocketAddr,
    config: SessionConfig,
    stream: Option<TcpStream>,
    write_buf: BytesMut,
    read_buf: Box<[u8]>,
    last_error: u8,
    reading: Option<Reading>,
}

impl AsyncDeviceSession {
    /// Create a disconnected session for the meter at `address` on the default port.
    pub fn new(address: IpAddr) -> Self {
        Self::with_config(address, SessionConfig::default())
    }

    /// Create a disconnected session with explicit configuration.
    pub fn with_config(address: IpAddr, config: SessionConfig) -> Self {
        Self {
            endpoint: SocketAddr::new(address, config.port),
            config,
            stream: None,
            write_buf: BytesMut::with_capacity(MEASURE.wire_size()),
            read_buf: vec![0u8; RECEIVE_BUFFER_SIZE].into_boxed_slice(),
            last_error: 0,
            reading: None,
        }
    }

    /// The meter endpoint.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Current session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether a connection is open. Performs no I/O.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the TCP connection within `timeout`.
    ///
    /// Returns [`SessionError::AlreadyConnected`] if a connection is already
    /// open; the existing socket is left untouched.
    pub async fn connect(&mut self, timeout: Duration) -> Result<()> {
        if self.stream.is_some() {
            return Err(SessionError::AlreadyConnected(self.endpoint));
        }

        let addr = self.endpoint;
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(SessionError::Connect { addr, source }),
            Err(_) => return Err(SessionError::ConnectTimeout { addr, timeout }),
        };

        stream
            .set_nodelay(true)
            .and_then(|()| set_abortive_close(&stream))
            .map_err(|source| SessionError::Connect { addr, source })?;

        debug!(endpoint = %addr, "connected to meter");
        self.stream = Some(stream);
        Ok(())
    }

    /// Run one measure request within `timeout`.
    ///
    /// The previous reading and device status are cleared first. A timeout
    /// abandons the in-flight I/O and drops the connection.
    pub async fn update(&mut self, timeout: Duration) -> Result<Reading> {
        self.reading = None;
        self.last_error = 0;

        let Some(stream) = self.stream.as_mut() else {
            return Err(SessionError::NotConnected);
        };

        self.write_buf.clear();
        MEASURE.encode(&mut self.write_buf)?;

        let exchange = measure(stream, &self.write_buf, MEASURE.code(), &mut self.read_buf);
        let result = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout(timeout)),
        };

        match result {
            Ok(reading) => {
                self.reading = Some(reading);
                Ok(reading)
            }
            Err(err) => {
                if let Some(code) = err.device_error() {
                    self.last_error = code;
                }
                warn!(endpoint = %self.endpoint, error = %err, "measure request failed");
                if err.is_timeout() {
                    self.close();
                }
                Err(err)
            }
        }
    }

    /// Close the connection. A no-op when already disconnected.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(endpoint = %self.endpoint, "connection closed");
        }
    }

    /// The last successful reading, if the latest update succeeded.
    pub fn reading(&self) -> Option<&Reading> {
        self.reading.as_ref()
    }

    /// Device clock of the current reading.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.reading.map(|r| r.timestamp)
    }

    /// Voltage of the current reading, in volts.
    pub fn voltage(&self) -> Option<f64> {
        self.reading.map(|r| r.voltage)
    }

    /// Current of the current reading, in amperes.
    pub fn current(&self) -> Option<f64> {
        self.reading.map(|r| r.current)
    }

    /// Power of the current reading, in watts.
    pub fn power(&self) -> Option<f64> {
        self.reading.map(|r| r.power)
    }

    /// Status byte from the last update: 0 on success or non-device failure.
    pub fn last_error(&self) -> u8 {
        self.last_error
    }
}

impl std::fmt::Debug for AsyncDeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncDeviceSession")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .field("last_error", &self.last_error)
            .field("reading", &self.reading)
            .finish()
    }
}

async fn measure<S>(stream: &mut S, command: &[u8], code: u8, buf: &mut [u8]) -> Result<Reading>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut offset = 0usize;
    while offset < command.len() {
        let n = stream.write(&command[offset..]).await?;
        if n == 0 {
            return Err(SessionError::WriteFailed {
                written: offset,
                total: command.len(),
            });
        }
        offset += n;
    }
    stream.flush().await?;

    let mut filled = 0usize;
    let len = loop {
        if let Some(len) = complete_len(buf, filled)? {
            break len;
        }
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(short_frame(buf, filled).into());
        }
        filled += n;
        trace!(read = n, filled, "response chunk received");
    };

    finish(&buf[..len], code)
}
