use std::net::{IpAddr, SocketAddr, TcpStream};
use std::time::Duration;

use bytes::BytesMut;
use chrono::NaiveDateTime;
use tracing::{debug, warn};
use wfwattch_frame::{Reading, MEASURE};

use crate::config::{SessionConfig, RECEIVE_BUFFER_SIZE};
use crate::error::{Result, SessionError};
use crate::exchange::{self, Deadline};
use crate::socket;

/// A blocking session with one WFWATTCH2 meter.
///
/// The session is either disconnected or holds exactly one TCP connection.
/// Every [`update`](Self::update) is one measure request and one response;
/// nothing is retried. Reconnect policy belongs to the caller: the usual loop
/// connects when [`is_connected`](Self::is_connected) is false and calls
/// [`close`](Self::close) after a failed update.
pub struct DeviceSession {
    endpoint: SocketAddr,
    config: SessionConfig,
    stream: Option<TcpStream>,
    write_buf: BytesMut,
    read_buf: Box<[u8]>,
    last_error: u8,
    reading: Option<Reading>,
}

impl DeviceSession {
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
    pub fn connect(&mut self, timeout: Duration) -> Result<()> {
        if self.stream.is_some() {
            return Err(SessionError::AlreadyConnected(self.endpoint));
        }

        let stream = socket::connect(self.endpoint, timeout)?;
        debug!(endpoint = %self.endpoint, "connected to meter");
        self.stream = Some(stream);
        Ok(())
    }

    /// Run one measure request within `timeout`.
    ///
    /// The previous reading and device status are cleared first. On success
    /// the decoded reading replaces them; on failure they stay cleared. A
    /// timeout also drops the connection.
    pub fn update(&mut self, timeout: Duration) -> Result<Reading> {
        self.clear();

        let Some(stream) = self.stream.as_mut() else {
            return Err(SessionError::NotConnected);
        };

        let deadline = Deadline::after(timeout);
        self.write_buf.clear();
        MEASURE.encode(&mut self.write_buf)?;

        let result = exchange::measure(
            stream,
            &self.write_buf,
            MEASURE.code(),
            &mut self.read_buf,
            &deadline,
        );

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
                    self.drop_connection();
                }
                Err(err)
            }
        }
    }

    /// Close the connection. A no-op when already disconnected.
    pub fn close(&mut self) {
        self.drop_connection();
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

    fn clear(&mut self) {
        self.reading = None;
        self.last_error = 0;
    }

    fn drop_connection(&mut self) {
        if self.stream.take().is_some() {
            debug!(endpoint = %self.endpoint, "connection closed");
        }
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .field("last_error", &self.last_error)
            .field("reading", &self.reading)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use wfwattch_frame::FrameError;

    use super::*;
    use crate::exchange::tests::{assert_expected_reading, measure_response, response_with_status};

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Bind a fake meter that answers each measure request with the next response.
    fn fake_meter(responses: Vec<Vec<u8>>) -> (DeviceSession, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            for response in responses {
                let mut request = [0u8; 6];
                stream.read_exact(&mut request).unwrap();
                assert_eq!(request, [0xAA, 0x00, 0x02, 0x18, 0x00, 0x65]);
                stream.write_all(&response).unwrap();
            }
        });

        let session = DeviceSession::with_config(
            addr.ip(),
            SessionConfig {
                port: addr.port(),
                ..SessionConfig::default()
            },
        );
        (session, handle)
    }

    #[test]
    fn new_session_is_disconnected_and_empty() {
        let session = DeviceSession::new("192.0.2.1".parse().unwrap());
        assert_eq!(session.endpoint().port(), 60121);
        assert!(!session.is_connected());
        assert!(session.reading().is_none());
        assert_eq!(session.last_error(), 0);
    }

    #[test]
    fn update_stores_reading() {
        let (mut session, meter) = fake_meter(vec![measure_response()]);

        session.connect(TIMEOUT).unwrap();
        assert!(session.is_connected());

        let reading = session.update(TIMEOUT).unwrap();
        assert_expected_reading(&reading);
        assert_eq!(session.voltage(), Some(230.0));
        assert_eq!(session.current(), Some(0.5));
        assert_eq!(session.power(), Some(115.0));
        assert_eq!(session.timestamp(), Some(reading.timestamp));

        meter.join().unwrap();
    }

    #[test]
    fn update_with_maximal_timeout_is_unbounded() {
        let (mut session, meter) = fake_meter(vec![measure_response()]);
        session.connect(TIMEOUT).unwrap();

        let reading = session.update(Duration::MAX).unwrap();
        assert_expected_reading(&reading);
        assert!(session.is_connected());

        meter.join().unwrap();
    }

    #[test]
    fn connection_is_reused_across_updates() {
        let (mut session, meter) = fake_meter(vec![measure_response(), measure_response()]);
        session.connect(TIMEOUT).unwrap();

        session.update(TIMEOUT).unwrap();
        session.update(TIMEOUT).unwrap();
        assert!(session.reading().is_some());

        meter.join().unwrap();
    }

    #[test]
    fn flipped_checksum_clears_reading() {
        let mut bad = measure_response();
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        let (mut session, meter) = fake_meter(vec![measure_response(), bad]);
        session.connect(TIMEOUT).unwrap();

        session.update(TIMEOUT).unwrap();
        assert!(session.reading().is_some());

        let err = session.update(TIMEOUT).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Frame(FrameError::ChecksumMismatch { .. })
        ));
        assert!(session.reading().is_none());
        assert!(session.timestamp().is_none());
        assert!(session.voltage().is_none());
        assert!(session.current().is_none());
        assert!(session.power().is_none());

        meter.join().unwrap();
    }

    #[test]
    fn device_error_is_recorded() {
        let (mut session, meter) = fake_meter(vec![response_with_status(0x02)]);
        session.connect(TIMEOUT).unwrap();

        let err = session.update(TIMEOUT).unwrap_err();
        assert_eq!(err.device_error(), Some(0x02));
        assert_eq!(session.last_error(), 0x02);
        assert!(session.reading().is_none());

        meter.join().unwrap();
    }

    #[test]
    fn fresh_connection_after_failure_does_not_leak_values() {
        let mut bad = measure_response();
        bad[3] = 0x00;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let meter = thread::spawn(move || {
            for response in [measure_response(), bad, measure_response()] {
                let (mut stream, _) = listener.accept().unwrap();
                let mut request = [0u8; 6];
                stream.read_exact(&mut request).unwrap();
                stream.write_all(&response).unwrap();
            }
        });

        let config = SessionConfig {
            port: addr.port(),
            ..SessionConfig::default()
        };
        let mut session = DeviceSession::with_config(addr.ip(), config);

        session.connect(TIMEOUT).unwrap();
        session.update(TIMEOUT).unwrap();
        session.close();

        session.connect(TIMEOUT).unwrap();
        let err = session.update(TIMEOUT).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Frame(FrameError::CodeMismatch { .. })
        ));
        assert!(session.reading().is_none());
        session.close();

        session.connect(TIMEOUT).unwrap();
        let reading = session.update(TIMEOUT).unwrap();
        assert_expected_reading(&reading);

        meter.join().unwrap();
    }

    #[test]
    fn peer_close_is_short_frame() {
        let (mut session, meter) = fake_meter(vec![measure_response()[..7].to_vec()]);
        session.connect(TIMEOUT).unwrap();

        let err = session.update(TIMEOUT).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Frame(FrameError::ShortFrame {
                needed: 30,
                available: 7
            })
        ));
        assert!(session.reading().is_none());
        meter.join().unwrap();
    }

    #[test]
    fn silent_meter_times_out_and_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let meter = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 6];
            stream.read_exact(&mut request).unwrap();
            // Hold the connection open without answering.
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest);
        });

        let config = SessionConfig {
            port: addr.port(),
            ..SessionConfig::default()
        };
        let mut session = DeviceSession::with_config(addr.ip(), config);
        session.connect(TIMEOUT).unwrap();

        let err = session.update(Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, SessionError::Timeout(_)));
        assert!(!session.is_connected());
        assert!(session.reading().is_none());

        meter.join().unwrap();
    }

    #[test]
    fn connect_twice_is_rejected() {
        let (mut session, meter) = fake_meter(vec![measure_response()]);
        session.connect(TIMEOUT).unwrap();

        let err = session.connect(TIMEOUT).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyConnected(_)));

        // The original connection still works.
        session.update(TIMEOUT).unwrap();
        meter.join().unwrap();
    }

    #[test]
    fn update_without_connect_fails() {
        let mut session = DeviceSession::new("127.0.0.1".parse().unwrap());
        let err = session.update(TIMEOUT).unwrap_err();
        assert!(matches!(err, SessionError::NotConnected));
    }

    #[test]
    fn close_is_idempotent() {
        let (mut session, meter) = fake_meter(Vec::new());
        session.connect(TIMEOUT).unwrap();

        session.close();
        assert!(!session.is_connected());
        session.close();
        assert!(!session.is_connected());

        meter.join().unwrap();
    }

    #[test]
    fn connect_refused_reports_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut session = DeviceSession::with_config(
            addr.ip(),
            SessionConfig {
                port: addr.port(),
                ..SessionConfig::default()
            },
        );
        let err = session.connect(TIMEOUT).unwrap_err();
        assert!(matches!(err, SessionError::Connect { .. }));
        assert!(!session.is_connected());
    }
}
