use std::time::Duration;

/// TCP port the meter listens on.
pub const DEFAULT_PORT: u16 = 60121;

/// Default bound for a single connect or update call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Size of the reusable receive buffer; responses must fit in it.
pub const RECEIVE_BUFFER_SIZE: usize = 256;

/// Configuration for a device session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Device TCP port. Default: 60121.
    pub port: u16,
    /// Per-call timeout callers use for connect/update. Default: 5 s.
    pub timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}
