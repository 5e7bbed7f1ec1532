use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::{Result, SessionError};

/// Open a TCP connection to the meter within `timeout`.
///
/// The socket gets TCP_NODELAY and a zero linger so that closing it resets
/// the connection instead of lingering in TIME_WAIT.
pub(crate) fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    if timeout.is_zero() {
        return Err(SessionError::ConnectTimeout { addr, timeout });
    }

    let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|source| {
        if is_timeout(&source) {
            SessionError::ConnectTimeout { addr, timeout }
        } else {
            SessionError::Connect { addr, source }
        }
    })?;

    configure(&stream).map_err(|source| SessionError::Connect { addr, source })?;
    Ok(stream)
}

fn configure(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    set_abortive_close(stream)
}

pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

/// Enable SO_LINGER with a zero timeout.
#[cfg(unix)]
pub(crate) fn set_abortive_close<S: std::os::fd::AsRawFd>(socket: &S) -> io::Result<()> {
    let linger = libc::linger {
        l_onoff: 1,
        l_linger: 0,
    };

    // SAFETY: `linger` is a valid readable value of the size passed, and the
    // descriptor belongs to a socket owned by the caller for this call's duration.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            (&linger as *const libc::linger).cast::<libc::c_void>(),
            std::mem::size_of::<libc::linger>() as libc::socklen_t,
        )
    };

    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Linger control is only wired up for Unix sockets.
#[cfg(not(unix))]
pub(crate) fn set_abortive_close<S>(_socket: &S) -> io::Result<()> {
    tracing::debug!("abortive close not supported on this platform");
    Ok(())
}
