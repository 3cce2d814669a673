//! The murmur daemon.
//!
//! Holds the bus connection, the session, and at most one chat; the CLI
//! drives it over a Unix-domain socket. See [`Daemon`] for the control
//! surface and [`server`] for the socket front door.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use murmur_daemon::{server, Daemon, DaemonConfig};
//!
//! # async fn example() -> std::io::Result<()> {
//! let config = DaemonConfig::new();
//! let listener = server::bind(config.socket())?;
//! let daemon = Arc::new(Daemon::new(config));
//! server::serve(daemon, listener).await
//! # }
//! ```

pub mod bus;
mod chat;
mod config;
mod daemon;
mod error;
pub mod mem;
pub mod server;
mod session;

pub use chat::{ChatConnection, RelayHandle};
pub use config::{DaemonConfig, CONNECT_TIMEOUT, DIAL_TIMEOUT, INCOMING_BUFFER, PING_INTERVAL};
pub use daemon::Daemon;
pub use error::{BusError, CombinedError, DaemonError};
pub use session::Session;
