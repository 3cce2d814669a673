use std::fmt;
use std::time::Duration;

use murmur_core::control::ErrorCode;

/// Errors from the bus façade.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("connect to {url} timed out after {timeout:?}")]
    ConnectTimeout { url: String, timeout: Duration },

    #[error("subscribe to {subject} failed: {source}")]
    Subscribe {
        subject: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("publish to {subject} failed: {source}")]
    Publish {
        subject: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unsubscribe from {subject} failed: {source}")]
    Unsubscribe {
        subject: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("flush failed: {0}")]
    Flush(#[source] anyhow::Error),

    #[error("bus connection is closed")]
    Closed,
}

/// Errors surfaced by the daemon control surface.
///
/// Each variant maps to one stable [`ErrorCode`] on the control protocol;
/// the full cause chain stays in the daemon log.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("transport error: {0}")]
    Bus(#[from] BusError),

    #[error("already online")]
    AlreadyOnline,

    #[error("a chat already exists")]
    ChatExists,

    #[error("no chat is attached")]
    NoChat,

    #[error("invalid in the current state: {reason}")]
    InvalidState { reason: String },

    #[error("recipient is offline")]
    RecipientOffline,

    #[error("frontend stream failed: {0}")]
    Frontend(#[source] anyhow::Error),

    #[error("payload encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),

    #[error("{0}")]
    Combined(CombinedError),
}

impl DaemonError {
    /// The stable code reported over the control protocol.
    pub fn code(&self) -> ErrorCode {
        match self {
            DaemonError::Bus(_) => ErrorCode::Transport,
            DaemonError::AlreadyOnline => ErrorCode::AlreadyOnline,
            DaemonError::ChatExists => ErrorCode::ChatExists,
            DaemonError::NoChat => ErrorCode::NoChat,
            DaemonError::InvalidState { .. } => ErrorCode::InvalidState,
            DaemonError::RecipientOffline => ErrorCode::RecipientOffline,
            DaemonError::Frontend(_) => ErrorCode::Frontend,
            DaemonError::Encode(_) | DaemonError::Internal(_) => ErrorCode::Internal,
            DaemonError::Combined(combined) => combined
                .0
                .first()
                .map(DaemonError::code)
                .unwrap_or(ErrorCode::Internal),
        }
    }
}

/// Several failures from one operation, all reported together.
///
/// Teardown runs every cleanup step regardless of individual failures and
/// the relay reports both task results; this carries whatever accumulated.
#[derive(Debug, Default)]
pub struct CombinedError(pub Vec<DaemonError>);

impl CombinedError {
    pub fn push(&mut self, err: DaemonError) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Ok` when nothing accumulated, the sole error unwrapped, or the
    /// whole list as [`DaemonError::Combined`].
    pub fn into_result(mut self) -> Result<(), DaemonError> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(DaemonError::Combined(self)),
        }
    }
}

impl fmt::Display for CombinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors: ", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(DaemonError::AlreadyOnline.code(), ErrorCode::AlreadyOnline);
        assert_eq!(DaemonError::NoChat.code(), ErrorCode::NoChat);
        assert_eq!(
            DaemonError::Bus(BusError::Closed).code(),
            ErrorCode::Transport
        );
        assert_eq!(DaemonError::RecipientOffline.code(), ErrorCode::RecipientOffline);
    }

    #[test]
    fn combined_unwraps_a_single_error() {
        let mut errors = CombinedError::default();
        errors.push(DaemonError::NoChat);
        assert!(matches!(errors.into_result(), Err(DaemonError::NoChat)));
    }

    #[test]
    fn combined_keeps_the_first_code() {
        let mut errors = CombinedError::default();
        errors.push(DaemonError::Bus(BusError::Closed));
        errors.push(DaemonError::NoChat);
        let err = errors.into_result().unwrap_err();
        assert_eq!(err.code(), ErrorCode::Transport);
        assert!(err.to_string().contains("2 errors"));
    }

    #[test]
    fn empty_combined_is_ok() {
        assert!(CombinedError::default().into_result().is_ok());
    }
}
