use std::path::{Path, PathBuf};
use std::time::Duration;

use murmur_core::control::{default_base_dir, socket_path};

/// Configuration for a [`Daemon`](crate::Daemon).
///
/// All fields have defaults matching the wire protocol; use the builder
/// to override:
///
/// ```rust
/// use std::time::Duration;
/// use murmur_daemon::DaemonConfig;
///
/// let config = DaemonConfig::new()
///     .dial_timeout(Some(Duration::from_secs(2)))
///     .incoming_buffer(64);
/// ```
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Path of the control socket.
    pub(crate) socket_path: PathBuf,
    /// Timeout for the initial bus connect.
    pub(crate) connect_timeout: Duration,
    /// Cadence of presence probes during a dial.
    pub(crate) ping_interval: Duration,
    /// How long a dial waits for a presence reply. `None` waits forever.
    pub(crate) dial_timeout: Option<Duration>,
    /// Capacity of the incoming chat channel; a full channel stalls the
    /// chat subject until the frontend catches up.
    pub(crate) incoming_buffer: usize,
}

/// Timeout for the initial bus connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Cadence of presence probes during a dial.
pub const PING_INTERVAL: Duration = Duration::from_millis(33);
/// Default dial deadline.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Default capacity of the incoming chat channel.
pub const INCOMING_BUFFER: usize = 32;

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self {
            socket_path: socket_path(&default_base_dir()),
            connect_timeout: CONNECT_TIMEOUT,
            ping_interval: PING_INTERVAL,
            dial_timeout: Some(DIAL_TIMEOUT),
            incoming_buffer: INCOMING_BUFFER,
        }
    }

    /// Set the control socket path.
    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Set the bus connect timeout (default: 30 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the presence probe cadence (default: 33 ms).
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the dial deadline (default: 5 s). `None` waits forever.
    pub fn dial_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Set the incoming chat channel capacity (default: 32).
    pub fn incoming_buffer(mut self, capacity: usize) -> Self {
        self.incoming_buffer = capacity;
        self
    }

    /// The configured control socket path.
    pub fn socket(&self) -> &Path {
        &self.socket_path
    }
}
